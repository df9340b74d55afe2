// Content fingerprints for staleness detection (equality-only, never interpreted).
use std::fs;
use std::io::{ErrorKind, Read};
use std::path::Path;
use xxhash_rust::xxh3::{xxh3_128, Xxh3};

use crate::error::{AuditError, Result};

const HASH_BUF_SIZE: usize = 64 * 1024;

/// Opaque 128-bit fingerprint of an asset's serialized source bytes, as 32 lowercase hex chars.
pub type SourceFingerprint = String;

/// Stream the file at `path` through xxh3-128.
pub fn hash_file(path: &Path) -> Result<SourceFingerprint> {
    let mut file = fs::File::open(path).map_err(|e| {
        if e.kind() == ErrorKind::NotFound {
            AuditError::NotFound(path.display().to_string())
        } else {
            AuditError::io(path, e)
        }
    })?;
    let mut hasher = Xxh3::new();
    let mut buf = vec![0u8; HASH_BUF_SIZE];

    loop {
        let n = file.read(&mut buf).map_err(|e| AuditError::io(path, e))?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }

    Ok(format_fingerprint(hasher.digest128()))
}

pub fn hash_bytes(content: &[u8]) -> SourceFingerprint {
    format_fingerprint(xxh3_128(content))
}

fn format_fingerprint(value: u128) -> SourceFingerprint {
    format!("{value:032x}")
}
