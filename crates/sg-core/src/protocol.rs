//! Worker message protocol.
//!
//! Every message is an envelope `{type, id, ...payload}` keyed by a
//! correlation id. Requests and responses are closed tagged unions; the
//! dispatcher matches on the id first and the variant second.

use std::fmt;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{EngineError, ErrorCode, ErrorPayload};
use crate::hash::HashStats;
use crate::metadata::MetadataOutcome;
use crate::pattern::{NormalizedPattern, SearchKind};
use crate::progress::ProgressStats;
use crate::types::FileRef;

/// Correlation id attached to a request and echoed on every related message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobId(Uuid);

impl JobId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for JobId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.simple())
    }
}

/// The fixed pool of background workers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkerKind {
    /// Chunk reads for the viewport.
    ChunkIo,
    /// Pattern search and metadata extraction.
    Analysis,
    Hash,
}

impl WorkerKind {
    pub const ALL: [WorkerKind; 3] = [Self::ChunkIo, Self::Analysis, Self::Hash];

    pub fn label(&self) -> &'static str {
        match self {
            Self::ChunkIo => "chunk-io",
            Self::Analysis => "analysis",
            Self::Hash => "hash",
        }
    }
}

impl fmt::Display for WorkerKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobKind {
    Chunk,
    Search,
    Hash,
    Metadata,
}

impl JobKind {
    pub fn worker(&self) -> WorkerKind {
        match self {
            Self::Chunk => WorkerKind::ChunkIo,
            Self::Search | Self::Metadata => WorkerKind::Analysis,
            Self::Hash => WorkerKind::Hash,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE", rename_all_fields = "camelCase")]
pub enum Request {
    ReadChunk {
        file: FileRef,
        offset: u64,
        length: u32,
        /// Distance from the viewport start; lower is served first.
        priority: u64,
    },
    SearchHex {
        file: FileRef,
        pattern: Vec<u8>,
    },
    SearchAscii {
        file: FileRef,
        pattern: Vec<u8>,
        ignore_case: bool,
    },
    ProcessHash {
        file: FileRef,
        hash_type: String,
    },
    ProcessExif {
        image_buffer: Vec<u8>,
    },
    /// Stop the job named by the envelope id. One message serves every job
    /// kind: a search is cancelled through its job id, which doubles as the
    /// search id, so there is no search-specific cancel message.
    Cancel {},
    Shutdown {},
}

impl Request {
    pub fn search(file: FileRef, pattern: &NormalizedPattern) -> Self {
        match pattern.kind {
            SearchKind::Hex => Self::SearchHex { file, pattern: pattern.bytes.clone() },
            SearchKind::Ascii => Self::SearchAscii {
                file,
                pattern: pattern.bytes.clone(),
                ignore_case: pattern.ignore_case,
            },
        }
    }

    /// `None` for control messages.
    pub fn job_kind(&self) -> Option<JobKind> {
        match self {
            Self::ReadChunk { .. } => Some(JobKind::Chunk),
            Self::SearchHex { .. } | Self::SearchAscii { .. } => Some(JobKind::Search),
            Self::ProcessHash { .. } => Some(JobKind::Hash),
            Self::ProcessExif { .. } => Some(JobKind::Metadata),
            Self::Cancel {} | Self::Shutdown {} => None,
        }
    }

    pub fn priority(&self) -> u64 {
        match self {
            Self::ReadChunk { priority, .. } => *priority,
            _ => 0,
        }
    }

    /// Input size used to scale the job timeout.
    pub fn size_hint(&self) -> u64 {
        match self {
            Self::ReadChunk { length, .. } => *length as u64,
            Self::SearchHex { file, .. }
            | Self::SearchAscii { file, .. }
            | Self::ProcessHash { file, .. } => file.size(),
            Self::ProcessExif { image_buffer } => image_buffer.len() as u64,
            Self::Cancel {} | Self::Shutdown {} => 0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequestEnvelope {
    pub id: JobId,
    #[serde(flatten)]
    pub request: Request,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchStats {
    pub matches: u64,
    pub bytes_scanned: u64,
    pub duration_ms: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE", rename_all_fields = "camelCase")]
pub enum Response {
    ChunkData {
        offset: u64,
        buffer: Vec<u8>,
    },
    SearchResult {
        indices: Vec<u64>,
        stats: SearchStats,
    },
    HashResult {
        hash: String,
        hash_type: String,
        stats: HashStats,
    },
    ExifResult {
        outcome: MetadataOutcome,
    },
    Progress {
        stats: ProgressStats,
    },
    Cancelled {},
    /// Job failure when the envelope carries an id, worker fault otherwise.
    Error {
        error_code: ErrorCode,
        error: String,
    },
}

impl Response {
    pub fn error(err: &EngineError) -> Self {
        let ErrorPayload { error_code, error } = err.to_payload();
        Self::Error { error_code, error }
    }

    /// Wire name of the variant, for logs. Never prints payload bytes.
    pub fn type_name(&self) -> &'static str {
        match self {
            Self::ChunkData { .. } => "CHUNK_DATA",
            Self::SearchResult { .. } => "SEARCH_RESULT",
            Self::HashResult { .. } => "HASH_RESULT",
            Self::ExifResult { .. } => "EXIF_RESULT",
            Self::Progress { .. } => "PROGRESS",
            Self::Cancelled {} => "CANCELLED",
            Self::Error { .. } => "ERROR",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResponseEnvelope {
    /// `None` only for worker-level faults that cannot be correlated.
    pub id: Option<JobId>,
    #[serde(flatten)]
    pub response: Response,
}
