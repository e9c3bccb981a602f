//! MD5 digests over local files.
//!
//! The service keys dedup and validation on MD5: the whole-file digest, a
//! digest of the leading 256 KiB, and one digest per upload slice (the
//! `block_list` sent at precreate). All digests are lowercase hex. Files are
//! streamed in bounded buffers so memory stays flat for large inputs.

use md5::{Digest, Md5};
use std::fs::File;
use std::io::Read;
use std::path::Path;

use crate::cancel::CancelToken;
use crate::error::TransferError;

const READ_BUF_SIZE: usize = 1 << 20; // 1 MiB

/// Length of the dedup-hint prefix the service hashes: 256 KiB.
pub const PREFIX_LEN: u64 = 256 * 1024;

/// Local file identity captured once per transfer: size, mtime, whole-file
/// MD5. A resume attempt is invalidated when recomputed values differ.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocalFileInfo {
    pub size: u64,
    pub mtime: i64,
    pub md5: String,
}

/// Size and mtime only; the cheap half of resume validation.
pub fn stat_file(path: &Path) -> Result<(u64, i64), TransferError> {
    let meta = std::fs::metadata(path)?;
    let mtime = meta
        .modified()?
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0);
    Ok((meta.len(), mtime))
}

/// Captures the full [`LocalFileInfo`], streaming the file once for its MD5.
pub fn local_file_info(path: &Path) -> Result<LocalFileInfo, TransferError> {
    let (size, mtime) = stat_file(path)?;
    let md5 = md5_file(path)?;
    Ok(LocalFileInfo { size, mtime, md5 })
}

/// MD5 of an entire file as lowercase hex, streamed in 1 MiB buffers.
pub fn md5_file(path: &Path) -> Result<String, TransferError> {
    let mut f = File::open(path)?;
    let mut hasher = Md5::new();
    let mut buf = vec![0u8; READ_BUF_SIZE];
    loop {
        let n = f.read(&mut buf)?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }
    Ok(hex::encode(hasher.finalize()))
}

/// MD5 of the leading 256 KiB, the service's dedup hint.
///
/// Equals the whole-file MD5 when the file is no longer than the prefix (no
/// second read pass in that case).
pub fn prefix_md5(path: &Path, file_size: u64, file_md5: &str) -> Result<String, TransferError> {
    if file_size <= PREFIX_LEN {
        return Ok(file_md5.to_string());
    }
    let mut f = File::open(path)?;
    let mut buf = vec![0u8; PREFIX_LEN as usize];
    f.read_exact(&mut buf)?;
    let mut hasher = Md5::new();
    hasher.update(&buf);
    Ok(hex::encode(hasher.finalize()))
}

/// Per-slice MD5 list for a given slice size, in slice order.
///
/// When the file fits in one slice the list is exactly `[file_md5]` and the
/// file is not re-read. Cancellation is checked between buffers; `progress`
/// receives the bytes hashed per buffer.
pub fn slice_md5_list(
    path: &Path,
    file_size: u64,
    file_md5: &str,
    slice_size: u64,
    cancel: &CancelToken,
    progress: &dyn Fn(i64),
) -> Result<Vec<String>, TransferError> {
    if slice_size == 0 || slice_size >= file_size {
        progress(file_size as i64);
        return Ok(vec![file_md5.to_string()]);
    }

    let mut f = File::open(path)?;
    let mut buf = vec![0u8; slice_size as usize];
    let mut out = Vec::new();
    loop {
        cancel.check()?;
        let n = read_full(&mut f, &mut buf)?;
        if n == 0 {
            break;
        }
        let mut hasher = Md5::new();
        hasher.update(&buf[..n]);
        out.push(hex::encode(hasher.finalize()));
        progress(n as i64);
    }
    Ok(out)
}

/// Reads until `buf` is full or EOF; returns the number of bytes read.
fn read_full(f: &mut File, buf: &mut [u8]) -> Result<usize, TransferError> {
    let mut filled = 0;
    while filled < buf.len() {
        let n = f.read(&mut buf[filled..])?;
        if n == 0 {
            break;
        }
        filled += n;
    }
    Ok(filled)
}
