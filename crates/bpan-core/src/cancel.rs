//! Shared cancellation token for in-flight transfers.
//!
//! A transfer holds a clone of the token and checks it before admitting new
//! slices/parts, before each retry attempt, between streamed buffers, and
//! between merge steps. Tripping the token from any thread stops the
//! transfer with `TransferError::Cancelled`; completed work is kept so the
//! caller can persist the snapshot and resume later.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::error::TransferError;

#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    flag: Arc<AtomicBool>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    /// Request cancellation. Idempotent; visible to all clones.
    pub fn cancel(&self) {
        self.flag.store(true, Ordering::Relaxed);
    }

    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::Relaxed)
    }

    /// Returns `Err(TransferError::Cancelled)` if the token is tripped.
    pub fn check(&self) -> Result<(), TransferError> {
        if self.is_cancelled() {
            Err(TransferError::Cancelled)
        } else {
            Ok(())
        }
    }
}
