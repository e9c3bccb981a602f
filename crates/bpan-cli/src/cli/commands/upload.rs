use anyhow::Result;
use bpan_core::cancel::CancelToken;
use bpan_core::config::Config;
use bpan_core::tier::VipTier;
use bpan_core::upload::Uploader;

use super::{finish_upload, print_progress, resolve_token};
use crate::store::{SnapshotStore, TransferKind};

pub async fn run(
    store: &SnapshotStore,
    cfg: Config,
    local: String,
    remote: String,
    token: Option<String>,
    tier: i32,
    slice_size: Option<u64>,
) -> Result<()> {
    let token = resolve_token(token)?;
    let tier = VipTier::from_code(tier);
    let id = store.add_transfer(TransferKind::Upload, &remote, &local).await?;

    let outcome = tokio::task::spawn_blocking(move || {
        let mut uploader = Uploader::new(cfg, token, &remote, &local, tier);
        if let Some(size) = slice_size {
            uploader.set_slice_size(size);
        }
        uploader.upload(&CancelToken::new(), &print_progress)
    })
    .await?;

    finish_upload(store, id, outcome).await
}
