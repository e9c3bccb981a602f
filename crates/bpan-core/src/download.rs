//! Download engine: probe → part plan → parallel ranged fetch → merge.
//!
//! A HEAD probe learns the file size and whether the server honours byte
//! ranges. Range-capable files larger than one part are fetched as parallel
//! ranged GETs into per-part temp files and merged in index order;
//! everything else streams straight to the destination. The snapshot is
//! mutated as parts land; temp files that became safe to delete are returned
//! to the caller, never removed by the engine, so a crash between error and
//! cleanup still leaves a resumable state.

use std::collections::VecDeque;
use std::fs::{self, File};
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{mpsc, Mutex};
use std::thread;
use std::time::{SystemTime, UNIX_EPOCH};

use crate::cancel::CancelToken;
use crate::error::TransferError;
use crate::http;
use crate::plan;
use crate::progress::{Phase, ProgressFn, ProgressSink};
use crate::retry::{run_transfer_with_retry, run_with_retry, RetryPolicy};
use crate::snapshot::{DownloadPartSnapshot, DownloadSnapshot};
use crate::tier::VipTier;

const MERGE_BUF_SIZE: usize = 4 * 1024 * 1024;

/// Result of a download run: the mutated snapshot, the temp files that are
/// now safe to delete (the caller removes them), and the overall result.
pub struct DownloadOutcome {
    pub snapshot: DownloadSnapshot,
    pub deletable: Vec<PathBuf>,
    pub result: Result<(), TransferError>,
}

#[derive(Debug, Clone, Copy)]
struct PartJob {
    index: usize,
    from: u64,
    to: u64,
}

struct PartDone {
    index: usize,
    path: PathBuf,
}

pub struct Downloader {
    link: String,
    save_path: PathBuf,
    file_md5: String,
    fs_id: u64,
    tier: VipTier,
    part_size: u64,
    part_workers: usize,
    part_retry: RetryPolicy,
    probe_retry: RetryPolicy,
    /// Filled by the probe.
    file_size: u64,
}

impl Downloader {
    pub fn new(
        link: impl Into<String>,
        save_path: impl Into<PathBuf>,
        file_md5: impl Into<String>,
        fs_id: u64,
        tier: VipTier,
    ) -> Self {
        Self {
            link: link.into(),
            save_path: save_path.into(),
            file_md5: file_md5.into(),
            fs_id,
            tier,
            part_size: tier.download_part_size(),
            part_workers: tier.download_parallelism(),
            part_retry: RetryPolicy::part_download(),
            probe_retry: RetryPolicy::probe(),
            file_size: 0,
        }
    }

    /// Overrides the tier-derived part size.
    pub fn set_part_size(&mut self, part_size: u64) {
        self.part_size = part_size;
    }

    /// Overrides the tier-derived part parallelism.
    pub fn set_part_workers(&mut self, workers: usize) {
        self.part_workers = workers.max(1);
    }

    /// Overrides the part retry budget (tests shrink the delays).
    pub fn set_retry_policy(&mut self, policy: RetryPolicy) {
        self.part_retry = policy;
    }

    /// Overrides the probe retry budget (tests shrink the delays).
    pub fn set_probe_retry_policy(&mut self, policy: RetryPolicy) {
        self.probe_retry = policy;
    }

    /// Runs a fresh download into `temp_dir` + the destination path.
    pub fn download(
        &mut self,
        temp_dir: &Path,
        cancel: &CancelToken,
        progress: &ProgressFn,
    ) -> DownloadOutcome {
        let mut snapshot = DownloadSnapshot {
            fs_id: self.fs_id,
            file_md5: self.file_md5.clone(),
            save_path: self.save_path.display().to_string(),
            vip_type: self.tier.as_code(),
            ..Default::default()
        };

        let ranged = match self.probe(cancel) {
            Ok(ranged) => ranged,
            Err(e) => return DownloadOutcome { snapshot, deletable: Vec::new(), result: Err(e) },
        };
        snapshot.total_size = self.file_size;

        if !ranged || self.file_size <= self.part_size {
            let result = self.download_whole(&mut snapshot, cancel, progress);
            return DownloadOutcome { snapshot, deletable: Vec::new(), result };
        }

        let (deletable, result) = self.fresh_parts(&mut snapshot, temp_dir, cancel, progress);
        DownloadOutcome { snapshot, deletable, result }
    }

    /// Resumes a download from a persisted snapshot.
    ///
    /// Parts whose temp file vanished are re-queued (and their bytes
    /// subtracted); a changed file MD5 or tier invalidates the whole plan,
    /// so the old temp files are handed back for deletion and a fresh
    /// download runs instead.
    pub fn resume_download(
        &mut self,
        snapshot: DownloadSnapshot,
        temp_dir: &Path,
        cancel: &CancelToken,
        progress: &ProgressFn,
    ) -> DownloadOutcome {
        let mut snapshot = snapshot;
        let mut deletable = Vec::new();

        let ranged = match self.probe(cancel) {
            Ok(ranged) => ranged,
            Err(e) => return DownloadOutcome { snapshot, deletable, result: Err(e) },
        };

        if !ranged || self.file_size <= self.part_size {
            collect_part_files(&snapshot, &mut deletable);
            snapshot.vip_type = self.tier.as_code();
            snapshot.file_md5 = self.file_md5.clone();
            snapshot.total_size = self.file_size;
            snapshot.done_size = 0;
            snapshot.done_parts = Vec::new();
            let result = self.download_whole(&mut snapshot, cancel, progress);
            return DownloadOutcome { snapshot, deletable, result };
        }

        if snapshot.vip_type != self.tier.as_code() || snapshot.file_md5 != self.file_md5 {
            tracing::warn!(
                save_path = %self.save_path.display(),
                "tier or file md5 diverged, discarding download snapshot"
            );
            collect_part_files(&snapshot, &mut deletable);
            snapshot.vip_type = self.tier.as_code();
            snapshot.file_md5 = self.file_md5.clone();
            snapshot.total_size = self.file_size;
            snapshot.done_size = 0;
            snapshot.done_parts = Vec::new();
            let (mut more, result) = self.fresh_parts(&mut snapshot, temp_dir, cancel, progress);
            deletable.append(&mut more);
            return DownloadOutcome { snapshot, deletable, result };
        }

        // Re-queue any part whose temp file no longer exists.
        for part in snapshot.done_parts.iter_mut() {
            if part.file_path.is_empty() {
                continue;
            }
            match fs::metadata(&part.file_path) {
                Ok(_) => {}
                Err(e) => {
                    if e.kind() != std::io::ErrorKind::NotFound {
                        deletable.push(PathBuf::from(&part.file_path));
                    }
                    tracing::warn!(path = %part.file_path, error = %e, "part file lost, re-queueing");
                    part.file_path = String::new();
                    snapshot.done_size = snapshot.done_size.saturating_sub(part.part_len());
                }
            }
        }
        snapshot.recoverable = true;

        let (mut more, result) = self.fetch_and_merge(&mut snapshot, temp_dir, cancel, progress);
        deletable.append(&mut more);
        DownloadOutcome { snapshot, deletable, result }
    }

    /// HEAD the download URL (with the probe retry budget); learns size and
    /// range support.
    fn probe(&mut self, cancel: &CancelToken) -> Result<bool, TransferError> {
        let link = self.link.clone();
        let info = run_with_retry(&self.probe_retry, cancel, || {
            let head = http::head_probe(&link, cancel)?;
            match head.content_length {
                Some(_) => Ok(head),
                None => Err(TransferError::Protocol {
                    errno: -1,
                    errmsg: "HEAD response missing Content-Length".to_string(),
                }),
            }
        })?;
        self.file_size = info.content_length.unwrap_or(0);
        tracing::debug!(
            size = self.file_size,
            accept_ranges = info.accept_ranges,
            "probe complete"
        );
        Ok(info.accept_ranges)
    }

    /// Plans the parts into the snapshot and runs fetch + merge.
    fn fresh_parts(
        &self,
        snapshot: &mut DownloadSnapshot,
        temp_dir: &Path,
        cancel: &CancelToken,
        progress: &ProgressFn,
    ) -> (Vec<PathBuf>, Result<(), TransferError>) {
        let parts = plan::plan_parts(self.file_size, self.part_size);
        snapshot.total_part = parts.len();
        snapshot.part_size = self.file_size / parts.len().max(1) as u64;
        snapshot.done_parts = parts
            .iter()
            .map(|p| DownloadPartSnapshot { from: p.from, to: p.to, file_path: String::new() })
            .collect();
        snapshot.done_size = 0;
        snapshot.recoverable = true;
        tracing::info!(
            save_path = %self.save_path.display(),
            total_part = snapshot.total_part,
            "download starting"
        );

        self.fetch_and_merge(snapshot, temp_dir, cancel, progress)
    }

    /// Phases 3 and 4: fetch every pending part on the worker pool, then
    /// merge in index order.
    fn fetch_and_merge(
        &self,
        snapshot: &mut DownloadSnapshot,
        temp_dir: &Path,
        cancel: &CancelToken,
        progress: &ProgressFn,
    ) -> (Vec<PathBuf>, Result<(), TransferError>) {
        let mut deletable = Vec::new();

        if let Err(e) = ensure_dir(temp_dir, cancel) {
            return (deletable, Err(e));
        }

        let total_size = snapshot.total_size;
        let sink = ProgressSink::new(progress, Phase::Transferring, total_size, snapshot.done_size);
        sink.start();

        if let Err(e) = self.fetch_parts(snapshot, temp_dir, &sink, cancel) {
            return (deletable, Err(e));
        }

        let merge_sink = ProgressSink::new(progress, Phase::Merging, total_size, 0);
        merge_sink.start();
        match self.merge_parts(&snapshot.done_parts, &merge_sink, cancel) {
            Ok(()) => {
                for part in &snapshot.done_parts {
                    deletable.push(PathBuf::from(&part.file_path));
                }
                snapshot.recoverable = false;
                (deletable, Ok(()))
            }
            Err(e) => (deletable, Err(e)),
        }
    }

    /// Bounded worker pool over the pending parts; completions fan in over a
    /// channel sized to the part count and are applied by this thread.
    fn fetch_parts(
        &self,
        snapshot: &mut DownloadSnapshot,
        temp_dir: &Path,
        sink: &ProgressSink,
        cancel: &CancelToken,
    ) -> Result<(), TransferError> {
        let jobs: Vec<PartJob> = snapshot
            .done_parts
            .iter()
            .enumerate()
            .filter(|(_, p)| p.file_path.is_empty())
            .map(|(i, p)| PartJob { index: i, from: p.from, to: p.to })
            .collect();
        if jobs.is_empty() {
            return Ok(());
        }

        let worker_count = self.part_workers.max(1).min(jobs.len());
        let (tx, rx) = mpsc::sync_channel::<(PartJob, Result<PartDone, TransferError>)>(jobs.len());
        let work: Mutex<VecDeque<PartJob>> = Mutex::new(jobs.into_iter().collect());
        let work = &work;
        let failed = AtomicBool::new(false);
        let failed = &failed;
        let mut first_error: Option<TransferError> = None;

        thread::scope(|scope| {
            for _ in 0..worker_count {
                let tx = tx.clone();
                scope.spawn(move || loop {
                    if failed.load(Ordering::Relaxed) || cancel.is_cancelled() {
                        break;
                    }
                    let job = match work.lock().unwrap().pop_front() {
                        Some(job) => job,
                        None => break,
                    };
                    let result = self.try_download_part(job, temp_dir, sink, cancel);
                    if result.is_err() {
                        failed.store(true, Ordering::Relaxed);
                    }
                    let _ = tx.send((job, result));
                });
            }
            drop(tx);

            for (job, result) in rx {
                match result {
                    Ok(done) => {
                        snapshot.done_parts[done.index].file_path =
                            done.path.display().to_string();
                        snapshot.done_size += job.to - job.from + 1;
                        tracing::debug!(
                            index = done.index,
                            done_size = snapshot.done_size,
                            "part downloaded"
                        );
                    }
                    Err(e) => {
                        if first_error.is_none() {
                            first_error = Some(e);
                        }
                    }
                }
            }
        });

        cancel.check()?;
        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    /// One part through the retry driver. A failed attempt's temp file is
    /// removed and its progress rolled back before the next attempt.
    fn try_download_part(
        &self,
        job: PartJob,
        temp_dir: &Path,
        sink: &ProgressSink,
        cancel: &CancelToken,
    ) -> Result<PartDone, TransferError> {
        run_transfer_with_retry(&self.part_retry, cancel, &|n| sink.add(n), |prog| {
            let temp = self.part_temp_path(temp_dir, job.index);
            let result = self.download_part_once(job, &temp, prog, cancel);
            (Some(temp), result)
        })
    }

    fn download_part_once(
        &self,
        job: PartJob,
        temp: &Path,
        progress: &dyn Fn(i64),
        cancel: &CancelToken,
    ) -> Result<PartDone, TransferError> {
        let written =
            http::get_to_file(&self.link, Some((job.from, job.to)), temp, cancel, progress)?;
        let expected = job.to - job.from + 1;
        if written != expected {
            return Err(TransferError::PartialTransfer { expected, received: written });
        }
        Ok(PartDone { index: job.index, path: temp.to_path_buf() })
    }

    /// Temp file name: `<stem>_<index>_<ms-since-epoch>` under `temp_dir`.
    fn part_temp_path(&self, temp_dir: &Path, index: usize) -> PathBuf {
        let stem = self
            .save_path
            .file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or("part");
        let millis = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_millis();
        temp_dir.join(format!("{}_{}_{}", stem, index, millis))
    }

    /// Phase 4: append every part to the destination in index order and
    /// verify the byte total.
    fn merge_parts(
        &self,
        parts: &[DownloadPartSnapshot],
        sink: &ProgressSink,
        cancel: &CancelToken,
    ) -> Result<(), TransferError> {
        if let Some(parent) = self.save_path.parent() {
            ensure_dir(parent, cancel)?;
        }
        let mut merged = File::create(&self.save_path)?;
        let mut buf = vec![0u8; MERGE_BUF_SIZE];
        let mut total: u64 = 0;

        for part in parts {
            cancel.check()?;
            let mut part_file = File::open(&part.file_path)?;
            let mut copied: u64 = 0;
            loop {
                let n = part_file.read(&mut buf)?;
                if n == 0 {
                    break;
                }
                merged.write_all(&buf[..n])?;
                copied += n as u64;
            }
            total += copied;
            sink.add(copied as i64);
        }

        if total != self.file_size {
            return Err(TransferError::MergedSizeMismatch {
                expected: self.file_size,
                actual: total,
            });
        }
        tracing::info!(save_path = %self.save_path.display(), size = total, "merge complete");
        Ok(())
    }

    /// Single-stream path for range-less servers and files that fit in one
    /// part.
    fn download_whole(
        &self,
        snapshot: &mut DownloadSnapshot,
        cancel: &CancelToken,
        progress: &ProgressFn,
    ) -> Result<(), TransferError> {
        snapshot.part_size = self.file_size;
        snapshot.total_part = 1;
        snapshot.recoverable = false;
        tracing::info!(save_path = %self.save_path.display(), "single-stream download");

        if let Some(parent) = self.save_path.parent() {
            ensure_dir(parent, cancel)?;
        }
        let sink = ProgressSink::new(progress, Phase::Transferring, self.file_size, 0);
        sink.start();
        http::get_to_file(&self.link, None, &self.save_path, cancel, &|n| sink.add(n))?;
        snapshot.done_size = self.file_size;
        Ok(())
    }
}

/// Creates a directory (and parents), retrying transient failures.
fn ensure_dir(dir: &Path, cancel: &CancelToken) -> Result<(), TransferError> {
    run_with_retry(&RetryPolicy::mkdir(), cancel, || {
        fs::create_dir_all(dir).map_err(TransferError::Io)
    })
}

fn collect_part_files(snapshot: &DownloadSnapshot, deletable: &mut Vec<PathBuf>) {
    for part in &snapshot.done_parts {
        if !part.file_path.is_empty() {
            deletable.push(PathBuf::from(&part.file_path));
        }
    }
}
