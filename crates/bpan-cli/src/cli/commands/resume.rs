use anyhow::{anyhow, bail, Result};
use bpan_core::cancel::CancelToken;
use bpan_core::config::Config;
use bpan_core::download::Downloader;
use bpan_core::snapshot::{DownloadSnapshot, UploadSnapshot};
use bpan_core::tier::VipTier;
use bpan_core::upload::Uploader;

use super::{finish_download, finish_upload, print_progress, resolve_token, temp_dir_or_default};
use crate::store::{SnapshotStore, TransferKind, TransferState};

pub async fn run(
    store: &SnapshotStore,
    cfg: Config,
    id: i64,
    token: Option<String>,
    tier: Option<i32>,
    temp_dir: Option<String>,
) -> Result<()> {
    let row = store
        .get_transfer(id)
        .await?
        .ok_or_else(|| anyhow!("no stored transfer with id {id}"))?;
    if row.state == TransferState::Completed {
        bail!("transfer {id} already completed");
    }
    let snapshot_json = row
        .snapshot_json
        .ok_or_else(|| anyhow!("transfer {id} has no snapshot to resume from"))?;

    match row.kind {
        TransferKind::Upload => {
            let snapshot: UploadSnapshot = serde_json::from_str(&snapshot_json)?;
            let token = resolve_token(token)?;
            let tier = VipTier::from_code(tier.unwrap_or(0));
            let outcome = tokio::task::spawn_blocking(move || {
                let mut uploader =
                    Uploader::new(cfg, token, &snapshot.path, &snapshot.local_path, tier);
                uploader.resume_upload(snapshot, &CancelToken::new(), &print_progress)
            })
            .await?;
            finish_upload(store, id, outcome).await
        }
        TransferKind::Download => {
            let snapshot: DownloadSnapshot = serde_json::from_str(&snapshot_json)?;
            let tier = VipTier::from_code(tier.unwrap_or(snapshot.vip_type));
            let url = row.remote;
            let temp_dir = temp_dir_or_default(temp_dir);
            let outcome = tokio::task::spawn_blocking(move || {
                let mut downloader = Downloader::new(
                    url,
                    &snapshot.save_path,
                    snapshot.file_md5.as_str(),
                    snapshot.fs_id,
                    tier,
                );
                downloader.resume_download(snapshot, &temp_dir, &CancelToken::new(), &print_progress)
            })
            .await?;
            finish_download(store, id, outcome).await
        }
    }
}
