//! Streaming digest backend. Input is fed in pieces; nothing requires the
//! whole file in memory.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha224, Sha256, Sha384, Sha512};

use crate::error::EngineError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HashAlgorithm {
    Sha224,
    Sha256,
    Sha384,
    Sha512,
    Blake3,
}

impl HashAlgorithm {
    pub const ALL: [HashAlgorithm; 5] = [
        Self::Sha224,
        Self::Sha256,
        Self::Sha384,
        Self::Sha512,
        Self::Blake3,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            Self::Sha224 => "sha224",
            Self::Sha256 => "sha256",
            Self::Sha384 => "sha384",
            Self::Sha512 => "sha512",
            Self::Blake3 => "blake3",
        }
    }
}

impl fmt::Display for HashAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for HashAlgorithm {
    type Err = EngineError;

    /// Accepts "sha256", "SHA-256", "sha_256" and so on.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let folded: String = s
            .chars()
            .filter(|c| c.is_ascii_alphanumeric())
            .map(|c| c.to_ascii_lowercase())
            .collect();
        Self::ALL
            .into_iter()
            .find(|algo| algo.name() == folded)
            .ok_or_else(|| EngineError::UnsupportedHash(s.to_string()))
    }
}

/// Incremental hasher over one of the supported algorithms.
pub enum StreamingDigest {
    Sha224(Sha224),
    Sha256(Sha256),
    Sha384(Sha384),
    Sha512(Sha512),
    Blake3(Box<blake3::Hasher>),
}

impl StreamingDigest {
    pub fn new(algorithm: HashAlgorithm) -> Self {
        match algorithm {
            HashAlgorithm::Sha224 => Self::Sha224(Sha224::new()),
            HashAlgorithm::Sha256 => Self::Sha256(Sha256::new()),
            HashAlgorithm::Sha384 => Self::Sha384(Sha384::new()),
            HashAlgorithm::Sha512 => Self::Sha512(Sha512::new()),
            HashAlgorithm::Blake3 => Self::Blake3(Box::new(blake3::Hasher::new())),
        }
    }

    pub fn update(&mut self, bytes: &[u8]) {
        match self {
            Self::Sha224(h) => Digest::update(h, bytes),
            Self::Sha256(h) => Digest::update(h, bytes),
            Self::Sha384(h) => Digest::update(h, bytes),
            Self::Sha512(h) => Digest::update(h, bytes),
            Self::Blake3(h) => {
                h.update(bytes);
            }
        }
    }

    /// Lowercase hex digest.
    pub fn finalize_hex(self) -> String {
        match self {
            Self::Sha224(h) => hex::encode(h.finalize()),
            Self::Sha256(h) => hex::encode(h.finalize()),
            Self::Sha384(h) => hex::encode(h.finalize()),
            Self::Sha512(h) => hex::encode(h.finalize()),
            Self::Blake3(h) => h.finalize().to_hex().to_string(),
        }
    }
}

/// Timing and throughput of a completed hash.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HashStats {
    pub bytes: u64,
    pub duration_ms: f64,
    pub throughput_mib_s: f64,
}

impl HashStats {
    pub fn new(bytes: u64, duration_ms: f64) -> Self {
        let throughput_mib_s = if duration_ms > 0.0 {
            bytes as f64 / (1024.0 * 1024.0) / (duration_ms / 1000.0)
        } else {
            0.0
        };
        Self { bytes, duration_ms, throughput_mib_s }
    }
}

/// Hash a sequence of byte pieces.
pub fn digest_pieces<'a, I>(algorithm: HashAlgorithm, pieces: I) -> String
where
    I: IntoIterator<Item = &'a [u8]>,
{
    let mut digest = StreamingDigest::new(algorithm);
    for piece in pieces {
        digest.update(piece);
    }
    digest.finalize_hex()
}

#[cfg(test)]
mod tests {
    use super::*;

    const EMPTY_SHA256: &str = "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855";

    #[test]
    fn empty_input_sha256() {
        assert_eq!(digest_pieces(HashAlgorithm::Sha256, std::iter::empty()), EMPTY_SHA256);
    }

    #[test]
    fn known_abc_digests() {
        assert_eq!(
            digest_pieces(HashAlgorithm::Sha256, [b"abc".as_slice()]),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
        assert_eq!(
            digest_pieces(HashAlgorithm::Blake3, [b"".as_slice()]),
            "af1349b9f5f9a1a6a0404dea36dcc9499bcb25c9adc112b7cc9a93cae41f3262"
        );
    }

    #[test]
    fn piecewise_equals_whole() {
        let data: Vec<u8> = (0..10_000u32).map(|i| (i * 7 % 251) as u8).collect();
        for algo in HashAlgorithm::ALL {
            let whole = digest_pieces(algo, [data.as_slice()]);
            let pieces = digest_pieces(algo, data.chunks(333));
            assert_eq!(whole, pieces, "{algo}");
        }
    }

    #[test]
    fn parse_algorithm_names() {
        assert_eq!("SHA-256".parse::<HashAlgorithm>().unwrap(), HashAlgorithm::Sha256);
        assert_eq!("blake3".parse::<HashAlgorithm>().unwrap(), HashAlgorithm::Blake3);
        let err = "md5".parse::<HashAlgorithm>().unwrap_err();
        assert_eq!(err, EngineError::UnsupportedHash("md5".into()));
    }

    #[test]
    fn stats_throughput() {
        let stats = HashStats::new(10 * 1024 * 1024, 1000.0);
        assert!((stats.throughput_mib_s - 10.0).abs() < 1e-9);
        assert_eq!(HashStats::new(5, 0.0).throughput_mib_s, 0.0);
    }
}
