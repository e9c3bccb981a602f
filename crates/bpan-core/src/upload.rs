//! Upload engine: precreate → parallel slice upload → commit.
//!
//! Precreate registers the transfer (and may short-circuit on a dedup hit),
//! slice uploads run on a bounded worker pool against the `upload_id`, and
//! commit materialises the file from the ordered server-side slice MD5s.
//! The snapshot is mutated as slices land and is returned alongside any
//! error so the caller can persist it and resume later.

use std::collections::VecDeque;
use std::fs::File;
use std::os::unix::fs::FileExt;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{mpsc, Mutex};
use std::thread;

use crate::api::{self, PreCreateResponse, UploadResponse};
use crate::cancel::CancelToken;
use crate::config::Config;
use crate::digest::{self, LocalFileInfo};
use crate::error::TransferError;
use crate::http;
use crate::plan;
use crate::progress::{Phase, ProgressFn, ProgressSink};
use crate::retry::{run_transfer_with_retry, RetryPolicy};
use crate::sanitize::sanitize_remote_path;
use crate::snapshot::UploadSnapshot;
use crate::tier::VipTier;

const PRECREATE_URI: &str = "/rest/2.0/xpan/file?method=precreate";
const CREATE_URI: &str = "/rest/2.0/xpan/file?method=create";
const SUPERFILE2_UPLOAD_URI: &str = "/rest/2.0/pcs/superfile2?method=upload";

/// In-flight slice uploads per transfer.
const SLICE_WORKERS: usize = 2;

/// One upload at a time per process: concurrent large uploads each hold
/// slice buffers in memory.
static UPLOAD_LOCK: Mutex<()> = Mutex::new(());

/// Result of an upload run: the mutated snapshot plus the committed file
/// record (or the error that stopped the transfer).
pub struct UploadOutcome {
    pub snapshot: UploadSnapshot,
    pub result: Result<UploadResponse, TransferError>,
}

#[derive(Debug, Clone, Copy)]
struct SliceJob {
    index: usize,
    offset: u64,
    len: usize,
}

struct SliceDone {
    partseq: usize,
    md5: String,
}

pub struct Uploader {
    config: Config,
    access_token: String,
    remote_path: String,
    local_path: PathBuf,
    tier: VipTier,
    slice_size_override: Option<u64>,
    slice_retry: RetryPolicy,
    file_info: Option<LocalFileInfo>,
}

impl Uploader {
    /// The remote path is sanitised here; every later call uses the
    /// sanitised form.
    pub fn new(
        config: Config,
        access_token: impl Into<String>,
        remote_path: &str,
        local_path: impl Into<PathBuf>,
        tier: VipTier,
    ) -> Self {
        Self {
            config,
            access_token: access_token.into(),
            remote_path: sanitize_remote_path(remote_path),
            local_path: local_path.into(),
            tier,
            slice_size_override: None,
            slice_retry: RetryPolicy::slice_upload(),
            file_info: None,
        }
    }

    /// Overrides the tier-derived slice size.
    pub fn set_slice_size(&mut self, slice_size: u64) {
        self.slice_size_override = Some(slice_size);
    }

    /// Overrides the slice retry budget (tests shrink the delays).
    pub fn set_retry_policy(&mut self, policy: RetryPolicy) {
        self.slice_retry = policy;
    }

    pub fn remote_path(&self) -> &str {
        &self.remote_path
    }

    fn slice_size_for(&self, file_size: u64) -> u64 {
        match self.slice_size_override {
            Some(size) => size,
            None => self.tier.upload_slice_size(file_size),
        }
    }

    /// Local file identity, computed once per uploader (the MD5 pass is a
    /// full read of the file).
    fn ensure_file_info(&mut self) -> Result<LocalFileInfo, TransferError> {
        if let Some(info) = &self.file_info {
            return Ok(info.clone());
        }
        let info = digest::local_file_info(&self.local_path)?;
        self.file_info = Some(info.clone());
        Ok(info)
    }

    /// Runs a fresh upload.
    pub fn upload(&mut self, cancel: &CancelToken, progress: &ProgressFn) -> UploadOutcome {
        let mut snapshot = UploadSnapshot {
            path: self.remote_path.clone(),
            local_path: self.local_path.display().to_string(),
            ..Default::default()
        };

        let info = match self.ensure_file_info() {
            Ok(info) => info,
            Err(e) => return UploadOutcome { snapshot, result: Err(e) },
        };
        snapshot.file_md5 = info.md5.clone();
        snapshot.file_mtime = info.mtime;
        snapshot.total_size = info.size;
        let slice_size = self.slice_size_for(info.size);

        let pre = match self.precreate(&info, slice_size, cancel, progress) {
            Ok(pre) => pre,
            Err(e) => return UploadOutcome { snapshot, result: Err(e) },
        };
        snapshot.upload_id = pre.uploadid.clone();

        if pre.is_dedup_hit() {
            // The server already holds this content; no bytes move.
            let result = match pre.info {
                Some(info) => {
                    tracing::info!(path = %self.remote_path, "dedup hit, upload skipped");
                    progress(Phase::Transferring, info.size, info.size);
                    snapshot.total_size = info.size;
                    snapshot.done_size = info.size;
                    Ok(UploadResponse::from(info))
                }
                None => Err(TransferError::Protocol {
                    errno: -1,
                    errmsg: "dedup response carried no file record".to_string(),
                }),
            };
            return UploadOutcome { snapshot, result };
        }

        let _guard = UPLOAD_LOCK.lock().unwrap_or_else(|e| e.into_inner());

        let slice_num = plan::slice_count(info.size, slice_size);
        snapshot.slice_size = slice_size;
        snapshot.slice_num = slice_num;
        snapshot.done_slices = vec![String::new(); slice_num];
        snapshot.recoverable = true;
        tracing::info!(
            path = %self.remote_path,
            size = info.size,
            slice_num,
            "upload starting"
        );

        let sink = ProgressSink::new(progress, Phase::Transferring, info.size, 0);
        sink.start();

        let jobs = self.slice_jobs(&snapshot);
        let upload_id = snapshot.upload_id.clone();
        if let Err(e) = self.upload_slices(&upload_id, jobs, &mut snapshot, &sink, cancel) {
            return UploadOutcome { snapshot, result: Err(e) };
        }

        match self.commit(&upload_id, &snapshot.done_slices, info.size, cancel) {
            Ok(record) => {
                snapshot.recoverable = false;
                UploadOutcome { snapshot, result: Ok(record) }
            }
            Err(e) => UploadOutcome { snapshot, result: Err(e) },
        }
    }

    /// Resumes an interrupted upload from a persisted snapshot.
    ///
    /// The snapshot is trusted only if the local file still matches its
    /// recorded size and mtime and it carries an `upload_id`; otherwise the
    /// engine falls back to a fresh upload transparently.
    pub fn resume_upload(
        &mut self,
        snapshot: UploadSnapshot,
        cancel: &CancelToken,
        progress: &ProgressFn,
    ) -> UploadOutcome {
        if let Err(reason) = self.validate_resume(&snapshot) {
            tracing::warn!(reason = %reason, "upload snapshot rejected, starting fresh");
            return self.upload(cancel, progress);
        }

        let mut snapshot = snapshot;
        snapshot.recoverable = true;

        let _guard = UPLOAD_LOCK.lock().unwrap_or_else(|e| e.into_inner());
        tracing::info!(
            path = %self.remote_path,
            done_size = snapshot.done_size,
            total_size = snapshot.total_size,
            "resuming upload"
        );

        let sink = ProgressSink::new(
            progress,
            Phase::Transferring,
            snapshot.total_size,
            snapshot.done_size,
        );
        sink.start();

        let jobs = self.slice_jobs(&snapshot);
        let upload_id = snapshot.upload_id.clone();
        if let Err(e) = self.upload_slices(&upload_id, jobs, &mut snapshot, &sink, cancel) {
            return UploadOutcome { snapshot, result: Err(e) };
        }

        match self.commit(&upload_id, &snapshot.done_slices, snapshot.total_size, cancel) {
            Ok(record) => {
                snapshot.recoverable = false;
                UploadOutcome { snapshot, result: Ok(record) }
            }
            Err(e) => UploadOutcome { snapshot, result: Err(e) },
        }
    }

    fn validate_resume(&self, snapshot: &UploadSnapshot) -> Result<(), String> {
        if snapshot.upload_id.is_empty() {
            return Err("missing upload_id".to_string());
        }
        if snapshot.slice_num == 0
            || snapshot.slice_size == 0
            || snapshot.done_slices.len() != snapshot.slice_num
        {
            return Err("malformed slice plan".to_string());
        }
        let (size, mtime) = digest::stat_file(&self.local_path).map_err(|e| e.to_string())?;
        if size != snapshot.total_size {
            return Err(format!(
                "local size changed: {} != {}",
                size, snapshot.total_size
            ));
        }
        if mtime != snapshot.file_mtime {
            return Err(format!(
                "local mtime changed: {} != {}",
                mtime, snapshot.file_mtime
            ));
        }
        Ok(())
    }

    /// Jobs for every slice whose `done_slices` slot is still empty.
    fn slice_jobs(&self, snapshot: &UploadSnapshot) -> Vec<SliceJob> {
        snapshot
            .missing_slices()
            .into_iter()
            .map(|i| SliceJob {
                index: i,
                offset: i as u64 * snapshot.slice_size,
                len: plan::slice_len(snapshot.total_size, snapshot.slice_size, i) as usize,
            })
            .collect()
    }

    /// Phase 1: hash, then register the upload. Emits preparing-phase ticks
    /// while the block list is computed.
    fn precreate(
        &self,
        info: &LocalFileInfo,
        slice_size: u64,
        cancel: &CancelToken,
        progress: &ProgressFn,
    ) -> Result<PreCreateResponse, TransferError> {
        let sink = ProgressSink::new(progress, Phase::Preparing, info.size, 0);
        sink.start();

        let block_list = digest::slice_md5_list(
            &self.local_path,
            info.size,
            &info.md5,
            slice_size,
            cancel,
            &|n| sink.add(n),
        )?;
        let prefix_md5 = digest::prefix_md5(&self.local_path, info.size, &info.md5)?;

        let block_list_json = serde_json::to_string(&block_list)?;
        let body = format!(
            "path={}&size={}&isdir=0&autoinit=1&rtype=3&block_list={}&content-md5={}&slice-md5={}",
            http::url_encode(&self.remote_path),
            info.size,
            http::url_encode(&block_list_json),
            info.md5,
            prefix_md5,
        );
        let url = format!(
            "{}{}&access_token={}",
            self.config.open_api_base, PRECREATE_URI, self.access_token
        );
        let resp = http::post_form(&url, &body, cancel)?;
        api::parse_precreate(&resp.body)
    }

    /// Phase 2: drain the job queue with a bounded worker pool. Results fan
    /// in over a channel sized to the job count and are applied to the
    /// snapshot by this (single) thread.
    fn upload_slices(
        &self,
        upload_id: &str,
        jobs: Vec<SliceJob>,
        snapshot: &mut UploadSnapshot,
        sink: &ProgressSink,
        cancel: &CancelToken,
    ) -> Result<(), TransferError> {
        if jobs.is_empty() {
            return Ok(());
        }

        let file = File::open(&self.local_path)?;
        let file = &file;
        let worker_count = SLICE_WORKERS.min(jobs.len());
        let (tx, rx) = mpsc::sync_channel::<(SliceJob, Result<SliceDone, TransferError>)>(jobs.len());
        let work: Mutex<VecDeque<SliceJob>> = Mutex::new(jobs.into_iter().collect());
        let work = &work;
        let failed = AtomicBool::new(false);
        let failed = &failed;
        let mut first_error: Option<TransferError> = None;

        thread::scope(|scope| {
            for _ in 0..worker_count {
                let tx = tx.clone();
                scope.spawn(move || loop {
                    // Admission gate: no new slices once one has failed or
                    // the transfer is cancelled; in-flight ones drain.
                    if failed.load(Ordering::Relaxed) || cancel.is_cancelled() {
                        break;
                    }
                    let job = match work.lock().unwrap().pop_front() {
                        Some(job) => job,
                        None => break,
                    };
                    let result = self.try_upload_slice(file, upload_id, job, sink, cancel);
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
                        if done.partseq >= snapshot.done_slices.len() {
                            failed.store(true, Ordering::Relaxed);
                            if first_error.is_none() {
                                first_error = Some(TransferError::Protocol {
                                    errno: -1,
                                    errmsg: format!("partseq {} out of range", done.partseq),
                                });
                            }
                            continue;
                        }
                        snapshot.done_slices[done.partseq] = done.md5;
                        snapshot.done_size += job.len as u64;
                        tracing::debug!(
                            seq = done.partseq,
                            part_size = job.len,
                            done_size = snapshot.done_size,
                            total_size = snapshot.total_size,
                            "slice uploaded"
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

    /// One slice through the retry driver: rollback on failed attempts keeps
    /// the progress counter honest.
    fn try_upload_slice(
        &self,
        file: &File,
        upload_id: &str,
        job: SliceJob,
        sink: &ProgressSink,
        cancel: &CancelToken,
    ) -> Result<SliceDone, TransferError> {
        let mut buf = vec![0u8; job.len];
        file.read_exact_at(&mut buf, job.offset)?;
        let filename = basename(&self.local_path);

        run_transfer_with_retry(&self.slice_retry, cancel, &|n| sink.add(n), |prog| {
            (
                None,
                self.upload_slice_once(upload_id, job.index, filename, &buf, prog, cancel),
            )
        })
    }

    fn upload_slice_once(
        &self,
        upload_id: &str,
        part_seq: usize,
        filename: &str,
        data: &[u8],
        progress: &dyn Fn(i64),
        cancel: &CancelToken,
    ) -> Result<SliceDone, TransferError> {
        let query = format!(
            "access_token={}&path={}&type=tmpfile&uploadid={}&partseq={}",
            http::url_encode(&self.access_token),
            http::url_encode(&self.remote_path),
            http::url_encode(upload_id),
            part_seq,
        );
        let url = format!(
            "{}{}&{}",
            self.config.pcs_data_base, SUPERFILE2_UPLOAD_URI, query
        );
        let resp = http::post_multipart(&url, filename, data, cancel, progress)?;
        let parsed = api::parse_slice_upload(&resp.body)?;
        Ok(SliceDone {
            partseq: parsed.partseq.map(|s| s as usize).unwrap_or(part_seq),
            md5: parsed.md5,
        })
    }

    /// Phase 3: materialise the file from the ordered slice MD5s. Protocol
    /// errors here are fatal to the transfer; the snapshot stays recoverable
    /// so the caller can retry the resume path.
    fn commit(
        &self,
        upload_id: &str,
        block_list: &[String],
        size: u64,
        cancel: &CancelToken,
    ) -> Result<UploadResponse, TransferError> {
        let block_list_json = serde_json::to_string(block_list)?;
        let body = format!(
            "path={}&uploadid={}&block_list={}&size={}&isdir=0&rtype=3",
            http::url_encode(&self.remote_path),
            http::url_encode(upload_id),
            http::url_encode(&block_list_json),
            size,
        );
        let url = format!(
            "{}{}&access_token={}",
            self.config.open_api_base, CREATE_URI, self.access_token
        );
        let resp = http::post_form(&url, &body, cancel)?;
        let record = api::parse_commit(&resp.body)?;
        tracing::info!(path = %self.remote_path, size, "upload committed");
        Ok(record)
    }
}

fn basename(path: &Path) -> &str {
    path.file_name().and_then(|n| n.to_str()).unwrap_or("file")
}
