//! Content digests
//!
//! New content is hashed with SHA-256 (64 hex characters). Older revisions may
//! carry a 32 character MD5 digest; the length of the stored string is the only
//! thing that tells the two apart.

use std::fs::File;
use std::io::{self, Read};
use std::path::Path;

use sha2::{Digest, Sha256};

/// Stored in place of a digest when the blob could not be hashed.
pub const DIGEST_UNAVAILABLE: &str = "0";

const READ_CHUNK: usize = 8192;

/// Algorithm a stored digest was produced with.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DigestKind {
    /// Legacy weak hash (MD5)
    Md5,
    /// SHA-256
    Sha256,
    Unknown,
}

impl DigestKind {
    /// Classify a stored digest by its length.
    pub fn of(digest: Option<&str>) -> Self {
        match digest.map(str::len) {
            Some(32) => DigestKind::Md5,
            Some(64) => DigestKind::Sha256,
            _ => DigestKind::Unknown,
        }
    }

    pub fn label(&self) -> Option<&'static str> {
        match self {
            DigestKind::Md5 => Some("MD5"),
            DigestKind::Sha256 => Some("SHA256"),
            DigestKind::Unknown => None,
        }
    }
}

/// SHA-256 of everything readable from `reader`, as lowercase hex.
pub fn digest_reader<R: Read>(mut reader: R) -> io::Result<String> {
    let mut hasher = Sha256::new();
    let mut buffer = [0u8; READ_CHUNK];
    loop {
        let read = reader.read(&mut buffer)?;
        if read == 0 {
            break;
        }
        hasher.update(&buffer[..read]);
    }
    Ok(hex::encode(hasher.finalize()))
}

pub fn digest_bytes(data: &[u8]) -> String {
    hex::encode(Sha256::digest(data))
}

/// SHA-256 of a file.
///
/// Never fails: a file that cannot be read is logged and yields
/// [`DIGEST_UNAVAILABLE`], so hashing problems cannot block storing content.
pub fn file_digest(path: &Path) -> String {
    match File::open(path).and_then(digest_reader) {
        Ok(digest) => digest,
        Err(e) => {
            log::error!("Failed to digest {}: {}", path.display(), e);
            DIGEST_UNAVAILABLE.to_string()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const ABC_SHA256: &str = "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad";

    #[test]
    fn test_known_digest() {
        assert_eq!(digest_bytes(b"abc"), ABC_SHA256);
        assert_eq!(digest_reader(&b"abc"[..]).unwrap(), ABC_SHA256);
    }

    #[test]
    fn test_file_digest_matches_bytes() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("blob");
        std::fs::write(&path, vec![7u8; 3 * READ_CHUNK + 11]).unwrap();
        assert_eq!(file_digest(&path), digest_bytes(&vec![7u8; 3 * READ_CHUNK + 11]));
    }

    #[test]
    fn test_missing_file_yields_sentinel() {
        let dir = tempfile::tempdir().unwrap();
        let digest = file_digest(&dir.path().join("absent"));
        assert_eq!(digest, DIGEST_UNAVAILABLE);
        assert_eq!(DigestKind::of(Some(&digest)), DigestKind::Unknown);
    }

    #[test]
    fn test_kind_by_length() {
        assert_eq!(DigestKind::of(Some(ABC_SHA256)), DigestKind::Sha256);
        assert_eq!(
            DigestKind::of(Some("900150983cd24fb0d6963f7d28e17f72")),
            DigestKind::Md5
        );
        assert_eq!(DigestKind::of(None), DigestKind::Unknown);
        assert_eq!(DigestKind::Sha256.label(), Some("SHA256"));
        assert_eq!(DigestKind::Unknown.label(), None);
    }
}
