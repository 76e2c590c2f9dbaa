use std::fmt;
use std::str::FromStr;

use md5::Md5;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Digest algorithm used for chunk and whole-file checksums.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DigestAlgorithm {
    /// Matches the digests existing upload clients send.
    #[default]
    Md5,
    Sha256,
}

impl DigestAlgorithm {
    pub fn as_str(self) -> &'static str {
        match self {
            DigestAlgorithm::Md5 => "md5",
            DigestAlgorithm::Sha256 => "sha256",
        }
    }
}

impl fmt::Display for DigestAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DigestAlgorithm {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "md5" => Ok(DigestAlgorithm::Md5),
            "sha256" | "sha-256" => Ok(DigestAlgorithm::Sha256),
            other => Err(format!("unknown digest algorithm: {other}")),
        }
    }
}

/// Computes and checks hex digests with a fixed algorithm.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ChecksumVerifier {
    algorithm: DigestAlgorithm,
}

impl ChecksumVerifier {
    pub fn new(algorithm: DigestAlgorithm) -> Self {
        Self { algorithm }
    }

    pub fn algorithm(&self) -> DigestAlgorithm {
        self.algorithm
    }

    /// Returns the lowercase hex digest of `data`.
    pub fn compute_digest(&self, data: &[u8]) -> String {
        let mut d = self.digester();
        d.update(data);
        d.finalize()
    }

    /// Compares against `expected`, ignoring hex case and surrounding
    /// whitespace.
    pub fn verify(&self, data: &[u8], expected: &str) -> bool {
        self.compute_digest(data)
            .eq_ignore_ascii_case(expected.trim())
    }

    /// Starts an incremental digest.
    pub fn digester(&self) -> Digester {
        match self.algorithm {
            DigestAlgorithm::Md5 => Digester::Md5(Md5::new()),
            DigestAlgorithm::Sha256 => Digester::Sha256(Sha256::new()),
        }
    }
}

/// Incremental digest for streamed data.
pub enum Digester {
    Md5(Md5),
    Sha256(Sha256),
}

impl Digester {
    pub fn update(&mut self, data: &[u8]) {
        match self {
            Digester::Md5(h) => h.update(data),
            Digester::Sha256(h) => h.update(data),
        }
    }

    /// Consumes the digester and returns the lowercase hex digest.
    pub fn finalize(self) -> String {
        match self {
            Digester::Md5(h) => hex::encode(h.finalize()),
            Digester::Sha256(h) => hex::encode(h.finalize()),
        }
    }
}
