use std::fs::{self, File, Metadata};
use std::io::{BufWriter, ErrorKind, Read, Write};
use std::path::Path;
use tempfile::NamedTempFile;

use crate::error::{AuditError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DurabilityMode {
    Durable,
    Fast,
}

#[derive(Debug, Clone)]
pub struct WriteOptions {
    pub durability: DurabilityMode,
    pub buffer_size: usize,
    /// Leave the target untouched when it already holds exactly these bytes.
    pub idempotent_skip: bool,
}

impl Default for WriteOptions {
    fn default() -> Self {
        Self {
            durability: DurabilityMode::Durable,
            buffer_size: 64 * 1024,
            idempotent_skip: true,
        }
    }
}

impl WriteOptions {
    pub fn fast() -> Self {
        Self {
            durability: DurabilityMode::Fast,
            ..Self::default()
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WriteStats {
    pub bytes_written: u64,
    pub fsync_count: u32,
    pub skipped_unchanged: bool,
}

/// Temp-file-then-rename writer: readers see either the old file or the new one, never a prefix.
pub struct AtomicWriter {
    options: WriteOptions,
}

impl AtomicWriter {
    pub fn new(options: WriteOptions) -> Self {
        Self { options }
    }

    pub fn write_bytes(&self, path: &Path, content: &[u8]) -> Result<WriteStats> {
        let parent = match path.parent() {
            Some(p) if !p.as_os_str().is_empty() => p,
            Some(_) => Path::new("."),
            None => {
                return Err(AuditError::io(
                    path,
                    std::io::Error::new(ErrorKind::InvalidInput, "path has no parent directory"),
                ))
            }
        };

        let existing_meta = match fs::metadata(path) {
            Ok(meta) => Some(meta),
            Err(err) if err.kind() == ErrorKind::NotFound => None,
            Err(err) => return Err(AuditError::io(path, err)),
        };

        if self.options.idempotent_skip {
            if let Some(meta) = existing_meta.as_ref() {
                if is_unchanged(path, meta, content)? {
                    return Ok(WriteStats {
                        bytes_written: 0,
                        fsync_count: 0,
                        skipped_unchanged: true,
                    });
                }
            }
        }

        fs::create_dir_all(parent).map_err(|e| AuditError::io(parent, e))?;

        let mut fsync_count = 0u32;
        let mut temp_file = NamedTempFile::new_in(parent).map_err(|e| AuditError::io(parent, e))?;

        {
            let mut writer =
                BufWriter::with_capacity(self.options.buffer_size.max(1), temp_file.as_file_mut());
            writer
                .write_all(content)
                .and_then(|_| writer.flush())
                .map_err(|e| AuditError::io(path, e))?;
        }

        if self.options.durability == DurabilityMode::Durable {
            temp_file
                .as_file()
                .sync_data()
                .map_err(|e| AuditError::io(path, e))?;
            fsync_count += 1;
        }

        temp_file
            .persist(path)
            .map_err(|e| AuditError::io(path, e.error))?;

        if self.options.durability == DurabilityMode::Durable {
            fsync_parent_dir(parent)?;
            fsync_count += 1;
        }

        Ok(WriteStats {
            bytes_written: content.len() as u64,
            fsync_count,
            skipped_unchanged: false,
        })
    }
}

fn is_unchanged(path: &Path, metadata: &Metadata, content: &[u8]) -> Result<bool> {
    if metadata.len() != content.len() as u64 {
        return Ok(false);
    }

    let mut file = File::open(path).map_err(|e| AuditError::io(path, e))?;
    let mut buf = [0u8; 8192];
    let mut offset = 0usize;

    loop {
        let n = file.read(&mut buf).map_err(|e| AuditError::io(path, e))?;
        if n == 0 {
            return Ok(offset == content.len());
        }
        if content.get(offset..offset + n) != Some(&buf[..n]) {
            return Ok(false);
        }
        offset += n;
    }
}

#[cfg(unix)]
fn fsync_parent_dir(parent: &Path) -> Result<()> {
    let dir = File::open(parent).map_err(|e| AuditError::io(parent, e))?;
    dir.sync_all().map_err(|e| AuditError::io(parent, e))
}

#[cfg(not(unix))]
fn fsync_parent_dir(_parent: &Path) -> Result<()> {
    Ok(())
}
