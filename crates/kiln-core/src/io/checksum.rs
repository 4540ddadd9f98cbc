//! Checksum computation and verification for fetched files.

use std::collections::BTreeMap;
use std::fs::File;
use std::io::{self, Read};
use std::path::Path;

use kiln_schema::ChecksumAlgorithm;
use md5::Md5;
use sha1::Sha1;
use sha2::{Digest, Sha256, Sha512};
use thiserror::Error;

/// Failures while verifying a file against its declared digests.
#[derive(Error, Debug)]
pub enum ChecksumError {
    /// The file does not hash to the declared value.
    #[error("checksum mismatch ({algorithm}): expected {expected}, got {actual}")]
    Mismatch {
        /// Algorithm whose digest differed.
        algorithm: ChecksumAlgorithm,
        /// Declared digest, lowercase hex.
        expected: String,
        /// Computed digest, lowercase hex.
        actual: String,
    },

    /// No hasher for the named algorithm.
    #[error("unsupported checksum algorithm: {0}")]
    Unsupported(String),

    /// The file could not be read.
    #[error("IO error: {0}")]
    Io(#[from] io::Error),
}

/// Outcome of a successful verification.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verification {
    /// Nothing was declared, so nothing was checked.
    Skipped,
    /// This many declared digests matched.
    Verified(usize),
}

/// Hex digest of a file under `algorithm`.
pub fn file_digest(path: &Path, algorithm: ChecksumAlgorithm) -> io::Result<String> {
    match algorithm {
        ChecksumAlgorithm::Md5 => digest_file::<Md5>(path),
        ChecksumAlgorithm::Sha1 => digest_file::<Sha1>(path),
        ChecksumAlgorithm::Sha256 => digest_file::<Sha256>(path),
        ChecksumAlgorithm::Sha512 => digest_file::<Sha512>(path),
    }
}

fn digest_file<D: Digest>(path: &Path) -> io::Result<String> {
    let mut hasher = D::new();
    let mut file = File::open(path)?;
    let mut buffer = [0u8; 64 * 1024];
    loop {
        let count = file.read(&mut buffer)?;
        if count == 0 {
            break;
        }
        hasher.update(&buffer[..count]);
    }
    Ok(hex::encode(hasher.finalize()))
}

/// Check `path` against every declared digest (algorithm name to lowercase hex).
///
/// An empty declaration passes with a warning.
pub fn verify_file(
    path: &Path,
    declared: &BTreeMap<String, String>,
) -> Result<Verification, ChecksumError> {
    if declared.is_empty() {
        tracing::warn!(path = %path.display(), "no checksum declared, skipping verification");
        return Ok(Verification::Skipped);
    }

    for (name, expected) in declared {
        let algorithm: ChecksumAlgorithm = name
            .parse()
            .map_err(|_| ChecksumError::Unsupported(name.clone()))?;
        let actual = file_digest(path, algorithm)?;
        if !actual.eq_ignore_ascii_case(expected) {
            return Err(ChecksumError::Mismatch {
                algorithm,
                expected: expected.clone(),
                actual,
            });
        }
        tracing::debug!(path = %path.display(), %algorithm, "checksum verified");
    }
    Ok(Verification::Verified(declared.len()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    const HELLO_SHA256: &str = "2cf24dba5fb0a30e26e83b2ac5b9e29e1b161e5c1fa7425e73043362938b9824";
    const HELLO_MD5: &str = "5d41402abc4b2a76b9719d911017c592";
    const HELLO_SHA1: &str = "aaf4c61ddcc5e8a2dabede0f3b482cd9aea9434d";

    fn hello() -> (tempfile::TempDir, std::path::PathBuf) {
        let tmp = tempdir().unwrap();
        let path = tmp.path().join("hello.txt");
        std::fs::write(&path, "hello").unwrap();
        (tmp, path)
    }

    #[test]
    fn test_digests() {
        let (_tmp, path) = hello();
        assert_eq!(file_digest(&path, ChecksumAlgorithm::Sha256).unwrap(), HELLO_SHA256);
        assert_eq!(file_digest(&path, ChecksumAlgorithm::Md5).unwrap(), HELLO_MD5);
        assert_eq!(file_digest(&path, ChecksumAlgorithm::Sha1).unwrap(), HELLO_SHA1);
        assert_eq!(file_digest(&path, ChecksumAlgorithm::Sha512).unwrap().len(), 128);
    }

    #[test]
    fn test_verify_passes_and_counts() {
        let (_tmp, path) = hello();
        let declared = BTreeMap::from([
            ("md5".to_string(), HELLO_MD5.to_string()),
            ("sha256".to_string(), HELLO_SHA256.to_uppercase()),
        ]);
        assert_eq!(verify_file(&path, &declared).unwrap(), Verification::Verified(2));
    }

    #[test]
    fn test_verify_mismatch_names_both_hashes() {
        let (_tmp, path) = hello();
        let wrong = "0".repeat(64);
        let declared = BTreeMap::from([("sha256".to_string(), wrong.clone())]);
        let err = verify_file(&path, &declared).unwrap_err();
        let msg = err.to_string();
        assert!(msg.contains(&wrong), "{msg}");
        assert!(msg.contains(HELLO_SHA256), "{msg}");
        assert!(matches!(err, ChecksumError::Mismatch { algorithm: ChecksumAlgorithm::Sha256, .. }));
    }

    #[test]
    fn test_verify_without_checksums_is_skipped() {
        let (_tmp, path) = hello();
        assert_eq!(verify_file(&path, &BTreeMap::new()).unwrap(), Verification::Skipped);
    }

    #[test]
    fn test_unknown_algorithm_is_rejected() {
        let (_tmp, path) = hello();
        let declared = BTreeMap::from([("crc32".to_string(), "abcd".to_string())]);
        assert!(matches!(
            verify_file(&path, &declared),
            Err(ChecksumError::Unsupported(name)) if name == "crc32"
        ));
    }
}
