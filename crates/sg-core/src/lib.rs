pub mod types;
pub mod mapped_file;
pub mod error;
pub mod config;
pub mod progress;
pub mod protocol;
pub mod pattern;
pub mod hash;
pub mod metadata;
pub mod format;

pub use types::*;
pub use mapped_file::MappedFile;
pub use error::{EngineError, EngineResult, ErrorCode, ErrorPayload};
pub use config::{EngineConfig, TimeoutPolicy};
pub use progress::{ProgressStats, ProgressThrottle};
pub use protocol::{
    JobId, JobKind, Request, RequestEnvelope, Response, ResponseEnvelope, SearchStats, WorkerKind,
};
pub use pattern::{
    normalize, parse_hex_pattern, scan_pattern_parallel, scan_windowed,
    NormalizedPattern, SearchKind, SearchQuery,
};
pub use hash::{HashAlgorithm, HashStats, StreamingDigest};
pub use metadata::{parse_metadata, MetadataField, MetadataOutcome, MetadataRecord};
