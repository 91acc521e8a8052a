//! Content fingerprinting.
//!
//! A fingerprint is the hex SHA-256 of a file's full byte content. Files are
//! streamed in fixed-size blocks so memory use stays bounded no matter how
//! large the file is.

use sha2::{Digest, Sha256};
use std::fs::File;
use std::io::{self, Read};
use std::path::Path;

use crate::error::FileError;

/// Read block size used while hashing.
const BLOCK_SIZE: usize = 64 * 1024;

/// Fingerprint an in-memory byte slice.
pub fn fingerprint_bytes(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    format!("{:x}", hasher.finalize())
}

/// Fingerprint any reader by streaming it in [`BLOCK_SIZE`] blocks.
pub fn fingerprint_reader<R: Read>(mut reader: R) -> io::Result<String> {
    let mut hasher = Sha256::new();
    let mut block = vec![0u8; BLOCK_SIZE];
    loop {
        let n = match reader.read(&mut block) {
            Ok(0) => break,
            Ok(n) => n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        };
        hasher.update(&block[..n]);
    }
    Ok(format!("{:x}", hasher.finalize()))
}

/// Fingerprint a file on disk.
pub fn fingerprint_file(path: &Path) -> Result<String, FileError> {
    let file = File::open(path).map_err(|source| FileError::Fingerprint {
        path: path.to_path_buf(),
        source,
    })?;
    fingerprint_reader(file).map_err(|source| FileError::Fingerprint {
        path: path.to_path_buf(),
        source,
    })
}
