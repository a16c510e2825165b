//! Multi-algorithm digest calculation.
//!
//! Artifacts are content-addressed by one or more digests. Downloads compute
//! every supported algorithm while streaming so any subset of expected
//! digests can be validated afterwards without re-reading the file.

use std::{
    collections::BTreeMap,
    fmt,
    fs::File,
    io::Read,
    path::Path,
    str::FromStr,
};

use serde::{Deserialize, Serialize};
use sha2::{Digest as _, Sha256, Sha384, Sha512};

use crate::{
    error::{CoreError, ErrorContext},
    CoreResult,
};

/// Digest algorithms an artifact can be addressed by.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DigestAlgorithm {
    Blake3,
    Sha256,
    Sha384,
    Sha512,
}

impl DigestAlgorithm {
    /// All supported algorithms, in identity-preference order.
    pub const ALL: [DigestAlgorithm; 4] = [
        DigestAlgorithm::Blake3,
        DigestAlgorithm::Sha256,
        DigestAlgorithm::Sha384,
        DigestAlgorithm::Sha512,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            DigestAlgorithm::Blake3 => "blake3",
            DigestAlgorithm::Sha256 => "sha256",
            DigestAlgorithm::Sha384 => "sha384",
            DigestAlgorithm::Sha512 => "sha512",
        }
    }
}

impl fmt::Display for DigestAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DigestAlgorithm {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "blake3" => Ok(DigestAlgorithm::Blake3),
            "sha256" => Ok(DigestAlgorithm::Sha256),
            "sha384" => Ok(DigestAlgorithm::Sha384),
            "sha512" => Ok(DigestAlgorithm::Sha512),
            other => Err(CoreError::UnknownDigestAlgorithm(other.to_string())),
        }
    }
}

/// Lowercase hex digests keyed by algorithm.
pub type DigestSet = BTreeMap<DigestAlgorithm, String>;

/// True if both sets carry the same value for at least one algorithm.
///
/// This is the artifact identity rule: any shared non-empty digest field
/// makes two artifacts the same content.
pub fn shares_digest(a: &DigestSet, b: &DigestSet) -> bool {
    a.iter().any(|(algorithm, value)| {
        !value.is_empty() && b.get(algorithm).is_some_and(|other| other == value)
    })
}

enum Hasher {
    Blake3(Box<blake3::Hasher>),
    Sha256(Sha256),
    Sha384(Sha384),
    Sha512(Sha512),
}

impl Hasher {
    fn new(algorithm: DigestAlgorithm) -> Self {
        match algorithm {
            DigestAlgorithm::Blake3 => Hasher::Blake3(Box::new(blake3::Hasher::new())),
            DigestAlgorithm::Sha256 => Hasher::Sha256(Sha256::new()),
            DigestAlgorithm::Sha384 => Hasher::Sha384(Sha384::new()),
            DigestAlgorithm::Sha512 => Hasher::Sha512(Sha512::new()),
        }
    }

    fn update(&mut self, chunk: &[u8]) {
        match self {
            Hasher::Blake3(h) => {
                h.update(chunk);
            }
            Hasher::Sha256(h) => h.update(chunk),
            Hasher::Sha384(h) => h.update(chunk),
            Hasher::Sha512(h) => h.update(chunk),
        }
    }

    fn finish(self) -> String {
        match self {
            Hasher::Blake3(h) => h.finalize().to_hex().to_string(),
            Hasher::Sha256(h) => hex::encode(h.finalize()),
            Hasher::Sha384(h) => hex::encode(h.finalize()),
            Hasher::Sha512(h) => hex::encode(h.finalize()),
        }
    }
}

/// Incrementally hashes one byte stream with several algorithms at once,
/// keeping a running byte counter.
pub struct MultiHasher {
    hashers: Vec<(DigestAlgorithm, Hasher)>,
    bytes: u64,
}

impl MultiHasher {
    pub fn new(algorithms: &[DigestAlgorithm]) -> Self {
        Self {
            hashers: algorithms
                .iter()
                .map(|&algorithm| (algorithm, Hasher::new(algorithm)))
                .collect(),
            bytes: 0,
        }
    }

    /// Hashes with every supported algorithm.
    pub fn all() -> Self {
        Self::new(&DigestAlgorithm::ALL)
    }

    pub fn update(&mut self, chunk: &[u8]) {
        for (_, hasher) in &mut self.hashers {
            hasher.update(chunk);
        }
        self.bytes += chunk.len() as u64;
    }

    pub fn bytes_seen(&self) -> u64 {
        self.bytes
    }

    pub fn finish(self) -> (DigestSet, u64) {
        let digests = self
            .hashers
            .into_iter()
            .map(|(algorithm, hasher)| (algorithm, hasher.finish()))
            .collect();
        (digests, self.bytes)
    }
}

/// Calculates digests and the size of a file in one streaming pass.
pub fn file_digests<P: AsRef<Path>>(
    file_path: P,
    algorithms: &[DigestAlgorithm],
) -> CoreResult<(DigestSet, u64)> {
    let file_path = file_path.as_ref();
    let mut file =
        File::open(file_path).with_context(|| format!("opening {}", file_path.display()))?;
    let mut hasher = MultiHasher::new(algorithms);
    let mut buf = [0u8; 64 * 1024];
    loop {
        let n = file
            .read(&mut buf)
            .with_context(|| format!("reading {}", file_path.display()))?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }
    Ok(hasher.finish())
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use tempfile::NamedTempFile;

    use super::*;

    const BLAKE3_HELLO: &str = "dc5a4edb8240b018124052c330270696f96771a63b45250a5c17d3000e823355";
    const SHA256_HELLO: &str = "a948904f2f0f479b8f8197694b30184b0d2ed1c1cd2a1ec0fb85d299a192a447";

    #[test]
    fn test_multi_hasher_known_vectors() {
        let mut hasher = MultiHasher::new(&[DigestAlgorithm::Blake3, DigestAlgorithm::Sha256]);
        hasher.update(b"hello ");
        hasher.update(b"world\n");
        let (digests, size) = hasher.finish();

        assert_eq!(size, 12);
        assert_eq!(digests[&DigestAlgorithm::Blake3], BLAKE3_HELLO);
        assert_eq!(digests[&DigestAlgorithm::Sha256], SHA256_HELLO);
    }

    #[test]
    fn test_multi_hasher_empty_input() {
        let (digests, size) = MultiHasher::all().finish();
        assert_eq!(size, 0);
        assert_eq!(digests.len(), DigestAlgorithm::ALL.len());
        // sha256 of the empty string
        assert_eq!(
            digests[&DigestAlgorithm::Sha256],
            "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
        );
    }

    #[test]
    fn test_file_digests() {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(b"hello world\n").unwrap();

        let (digests, size) = file_digests(file.path(), &[DigestAlgorithm::Blake3]).unwrap();
        assert_eq!(size, 12);
        assert_eq!(digests[&DigestAlgorithm::Blake3], BLAKE3_HELLO);
    }

    #[test]
    fn test_file_digests_missing_file() {
        let result = file_digests("/path/to/nonexistent/file", &DigestAlgorithm::ALL);
        assert!(result.is_err());
    }

    #[test]
    fn test_shares_digest() {
        let mut a = DigestSet::new();
        a.insert(DigestAlgorithm::Sha256, SHA256_HELLO.to_string());
        a.insert(DigestAlgorithm::Blake3, BLAKE3_HELLO.to_string());

        let mut b = DigestSet::new();
        b.insert(DigestAlgorithm::Sha256, SHA256_HELLO.to_string());
        assert!(shares_digest(&a, &b));

        let mut c = DigestSet::new();
        c.insert(DigestAlgorithm::Sha256, "00".repeat(32));
        assert!(!shares_digest(&a, &c));

        let d = DigestSet::new();
        assert!(!shares_digest(&a, &d));
    }

    #[test]
    fn test_algorithm_round_trip() {
        for algorithm in DigestAlgorithm::ALL {
            let parsed: DigestAlgorithm = algorithm.as_str().parse().unwrap();
            assert_eq!(parsed, algorithm);
        }
        assert!("md5".parse::<DigestAlgorithm>().is_err());
    }
}
