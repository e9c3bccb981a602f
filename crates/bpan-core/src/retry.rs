//! Bounded fixed-delay retry driver.
//!
//! The service's budgets are fixed: a slice upload or part download gets 10
//! attempts 6 s apart, a HEAD probe 5 attempts 1 s apart, a mkdir 3 attempts
//! 1 s apart. Cancellation is checked before every attempt and wins over the
//! last attempt's error. Attempts that streamed progress or materialised a
//! temp file are rolled back before the next attempt so accounting never
//! drifts.

use std::cell::Cell;
use std::fs;
use std::path::PathBuf;
use std::thread;
use std::time::Duration;

use crate::cancel::CancelToken;
use crate::error::TransferError;

/// Fixed attempt count and inter-attempt delay.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    /// Maximum number of attempts (including the first).
    pub attempts: u32,
    /// Fixed sleep between attempts.
    pub delay: Duration,
}

impl RetryPolicy {
    pub fn slice_upload() -> Self {
        Self { attempts: 10, delay: Duration::from_secs(6) }
    }

    pub fn part_download() -> Self {
        Self { attempts: 10, delay: Duration::from_secs(6) }
    }

    pub fn probe() -> Self {
        Self { attempts: 5, delay: Duration::from_secs(1) }
    }

    pub fn mkdir() -> Self {
        Self { attempts: 3, delay: Duration::from_secs(1) }
    }
}

/// Runs `op` until it succeeds or the attempt budget is exhausted.
///
/// Every error is considered transient at this level (the service
/// occasionally returns protocol errors for slices that succeed on the next
/// try) except cancellation, which aborts immediately with the cancellation
/// reason rather than the attempt's error.
pub fn run_with_retry<T>(
    policy: &RetryPolicy,
    cancel: &CancelToken,
    mut op: impl FnMut() -> Result<T, TransferError>,
) -> Result<T, TransferError> {
    let mut last_err = None;
    for attempt in 1..=policy.attempts.max(1) {
        if attempt > 1 {
            thread::sleep(policy.delay);
        }
        cancel.check()?;
        match op() {
            Ok(v) => return Ok(v),
            Err(TransferError::Cancelled) => return Err(TransferError::Cancelled),
            Err(e) => {
                tracing::warn!(attempt, error = %e, "attempt failed");
                last_err = Some(e);
            }
        }
    }
    Err(last_err.unwrap_or(TransferError::Cancelled))
}

/// Like [`run_with_retry`], but for attempts that stream progress and may
/// leave a partial temp file behind.
///
/// `op` receives a wrapped progress callback; the driver tracks how many
/// bytes the attempt reported and, when the attempt fails, reports the exact
/// negative delta and removes the attempt's temp file (if the op returned
/// one) before sleeping and retrying. This keeps the shared `done_size`
/// counter from drifting above the total across retries.
pub fn run_transfer_with_retry<T>(
    policy: &RetryPolicy,
    cancel: &CancelToken,
    progress: &dyn Fn(i64),
    mut op: impl FnMut(&dyn Fn(i64)) -> (Option<PathBuf>, Result<T, TransferError>),
) -> Result<T, TransferError> {
    let mut last_err = None;
    for attempt in 1..=policy.attempts.max(1) {
        if attempt > 1 {
            thread::sleep(policy.delay);
        }
        cancel.check()?;

        let attempt_bytes = Cell::new(0i64);
        let counting = |n: i64| {
            attempt_bytes.set(attempt_bytes.get() + n);
            progress(n);
        };
        let (temp_file, result) = op(&counting);
        match result {
            Ok(v) => return Ok(v),
            Err(e) => {
                // Undo this attempt's contribution before the next one.
                if attempt_bytes.get() != 0 {
                    progress(-attempt_bytes.get());
                }
                if let Some(path) = temp_file {
                    let _ = fs::remove_file(&path);
                }
                if e.is_cancelled() {
                    return Err(TransferError::Cancelled);
                }
                tracing::warn!(attempt, error = %e, "transfer attempt failed, rolled back");
                last_err = Some(e);
            }
        }
    }
    Err(last_err.unwrap_or(TransferError::Cancelled))
}
