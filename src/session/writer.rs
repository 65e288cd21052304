//! Fragment writer
//!
//! Appends fragment bodies to the upload file. The size on disk is the sole
//! authority on progress: fragments entirely below it are stale, fragments
//! starting above it leave a gap, and both are rejected without writing.
//! Overlap handling is trim-and-append: bytes already on disk are skipped,
//! never re-verified, so replaying a fragment is idempotent.

use std::path::Path;

use tokio::io::AsyncWriteExt;

use crate::error::BitsError;
use crate::protocol::ContentRange;

/// Outcome of a successful append.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FragmentWrite {
    /// File size after the append; reported as `BITS-Received-Content-Range`.
    pub file_size: u64,
    /// Whether the file now holds all `total` bytes.
    pub completed: bool,
}

/// Appends the non-overlapping suffix of `body` to the file at `path`.
///
/// Caller guarantees `body.len() == range.fragment_len()` (the protocol
/// layer enforces it before delegating here).
pub async fn append_fragment(
    path: &Path,
    range: &ContentRange,
    body: &[u8],
) -> Result<FragmentWrite, BitsError> {
    let file_size = match tokio::fs::metadata(path).await {
        Ok(meta) => meta.len(),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => 0,
        Err(e) => return Err(e.into()),
    };

    // Entirely below the high-water mark: already written.
    if range.end < file_size {
        return Err(BitsError::RangeNotSatisfiable { received: file_size });
    }
    // Starts above it: would leave a hole.
    if range.start > file_size {
        return Err(BitsError::RangeNotSatisfiable { received: file_size });
    }

    let mut options = tokio::fs::OpenOptions::new();
    options.create(true).append(true);
    #[cfg(unix)]
    options.mode(0o755);
    let mut file = options.open(path).await?;

    // Trim the overlap with what is already on disk.
    let data_offset = (file_size - range.start) as usize;
    let data = &body[data_offset..];
    file.write_all(data).await?;
    file.flush().await?;

    let new_size = file_size + data.len() as u64;
    Ok(FragmentWrite {
        file_size: new_size,
        completed: range.is_final(),
    })
}
