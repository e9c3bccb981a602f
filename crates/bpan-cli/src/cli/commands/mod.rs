//! Command implementations plus the plumbing they share: token resolution,
//! progress printing, snapshot persistence, and temp-file cleanup.

pub mod download;
pub mod resume;
pub mod status;
pub mod upload;

use anyhow::{anyhow, Result};
use bpan_core::download::DownloadOutcome;
use bpan_core::progress::Phase;
use bpan_core::upload::UploadOutcome;
use std::path::PathBuf;

use crate::store::{SnapshotStore, TransferId, TransferState};

pub fn resolve_token(token: Option<String>) -> Result<String> {
    token
        .or_else(|| std::env::var("BPAN_ACCESS_TOKEN").ok())
        .ok_or_else(|| anyhow!("no access token: pass --token or set BPAN_ACCESS_TOKEN"))
}

/// Progress ticks arrive already coalesced by the engine.
pub fn print_progress(phase: Phase, done: u64, total: u64) {
    eprintln!("[phase {}] {} / {} bytes", phase.as_code(), done, total);
}

/// Persists the upload outcome, then reports it. The snapshot reaches the
/// store before anything else happens so an interrupted run stays
/// resumable.
pub async fn finish_upload(
    store: &SnapshotStore,
    id: TransferId,
    outcome: UploadOutcome,
) -> Result<()> {
    let snapshot_json = serde_json::to_string(&outcome.snapshot)?;
    match outcome.result {
        Ok(record) => {
            store.update_snapshot(id, TransferState::Completed, &snapshot_json).await?;
            println!(
                "Uploaded {} ({} bytes, md5 {})",
                record.path, record.size, record.md5
            );
            Ok(())
        }
        Err(e) => {
            let state = if outcome.snapshot.recoverable {
                TransferState::Recoverable
            } else {
                TransferState::Failed
            };
            store.update_snapshot(id, state, &snapshot_json).await?;
            if state == TransferState::Recoverable {
                println!("Upload interrupted; resume with: bpan resume {id}");
            }
            Err(e.into())
        }
    }
}

/// Persists the download outcome, deletes the temp files the engine handed
/// back, then reports. Persist-then-delete order keeps a crash in between
/// resumable.
pub async fn finish_download(
    store: &SnapshotStore,
    id: TransferId,
    outcome: DownloadOutcome,
) -> Result<()> {
    let snapshot_json = serde_json::to_string(&outcome.snapshot)?;
    let state = match &outcome.result {
        Ok(()) => TransferState::Completed,
        Err(_) if outcome.snapshot.recoverable => TransferState::Recoverable,
        Err(_) => TransferState::Failed,
    };
    store.update_snapshot(id, state, &snapshot_json).await?;
    remove_part_files(outcome.deletable);

    match outcome.result {
        Ok(()) => {
            println!(
                "Downloaded {} ({} bytes)",
                outcome.snapshot.save_path, outcome.snapshot.total_size
            );
            Ok(())
        }
        Err(e) => {
            if state == TransferState::Recoverable {
                println!("Download interrupted; resume with: bpan resume {id}");
            }
            Err(e.into())
        }
    }
}

/// Removes the engine's deletion list, one thread per file; a failure on one
/// file must not strand the rest.
pub fn remove_part_files(files: Vec<PathBuf>) {
    std::thread::scope(|scope| {
        for file in &files {
            scope.spawn(move || {
                if let Err(e) = std::fs::remove_file(file) {
                    tracing::warn!(path = %file.display(), error = %e, "temp file removal failed");
                }
            });
        }
    });
}

pub fn temp_dir_or_default(temp_dir: Option<String>) -> PathBuf {
    temp_dir.map(PathBuf::from).unwrap_or_else(std::env::temp_dir)
}
