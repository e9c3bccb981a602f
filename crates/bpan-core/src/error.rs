//! Transfer error type shared by the upload and download engines.

use std::fmt;
use std::io;

/// Error returned by a transfer operation (slice upload, part download,
/// probe, commit, merge). Kept as an enum so the retry driver and the
/// resume-fallback logic can match on kinds before anything is erased
/// into `anyhow` at the CLI edge.
#[derive(Debug)]
pub enum TransferError {
    /// The caller's cancellation token was tripped.
    Cancelled,
    /// libcurl reported a failure (timeout, connection, DNS, etc.).
    Network(curl::Error),
    /// The HTTP response had a non-2xx status.
    HttpStatus { status: u32, body: String },
    /// The service answered with a non-zero `errno`.
    Protocol { errno: i64, errmsg: String },
    /// The response body was not the JSON envelope we expected.
    Parse(serde_json::Error),
    /// A ranged GET delivered fewer (or more) bytes than the part length.
    PartialTransfer { expected: u64, received: u64 },
    /// The merged file size does not match the probed file size.
    MergedSizeMismatch { expected: u64, actual: u64 },
    /// Local file I/O failed (open, read, write, mkdir).
    Io(io::Error),
    /// A snapshot no longer matches the local file or the remote plan.
    ResumeMismatch(String),
}

impl TransferError {
    pub fn is_cancelled(&self) -> bool {
        matches!(self, TransferError::Cancelled)
    }
}

impl fmt::Display for TransferError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransferError::Cancelled => write!(f, "transfer cancelled"),
            TransferError::Network(e) => write!(f, "{}", e),
            TransferError::HttpStatus { status, body } => {
                write!(f, "HTTP {}: {}", status, body)
            }
            TransferError::Protocol { errno, errmsg } => {
                write!(f, "error_code:{}, error_msg:{}", errno, errmsg)
            }
            TransferError::Parse(e) => write!(f, "malformed response: {}", e),
            TransferError::PartialTransfer { expected, received } => {
                write!(f, "partial transfer: expected {} bytes, got {}", expected, received)
            }
            TransferError::MergedSizeMismatch { expected, actual } => {
                write!(f, "merged file incomplete: expected {} bytes, got {}", expected, actual)
            }
            TransferError::Io(e) => write!(f, "io: {}", e),
            TransferError::ResumeMismatch(why) => write!(f, "snapshot no longer valid: {}", why),
        }
    }
}

impl std::error::Error for TransferError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            TransferError::Network(e) => Some(e),
            TransferError::Parse(e) => Some(e),
            TransferError::Io(e) => Some(e),
            _ => None,
        }
    }
}

impl From<io::Error> for TransferError {
    fn from(e: io::Error) -> Self {
        TransferError::Io(e)
    }
}

impl From<curl::Error> for TransferError {
    fn from(e: curl::Error) -> Self {
        TransferError::Network(e)
    }
}

impl From<serde_json::Error> for TransferError {
    fn from(e: serde_json::Error) -> Self {
        TransferError::Parse(e)
    }
}
