use anyhow::Result;
use bpan_core::cancel::CancelToken;
use bpan_core::download::Downloader;
use bpan_core::tier::VipTier;

use super::{finish_download, print_progress, temp_dir_or_default};
use crate::store::{SnapshotStore, TransferKind};

#[allow(clippy::too_many_arguments)]
pub async fn run(
    store: &SnapshotStore,
    url: String,
    md5: String,
    out: String,
    fs_id: u64,
    tier: i32,
    part_size: Option<u64>,
    temp_dir: Option<String>,
) -> Result<()> {
    let tier = VipTier::from_code(tier);
    let id = store.add_transfer(TransferKind::Download, &url, &out).await?;
    let temp_dir = temp_dir_or_default(temp_dir);

    let outcome = tokio::task::spawn_blocking(move || {
        let mut downloader = Downloader::new(url, &out, md5, fs_id, tier);
        if let Some(size) = part_size {
            downloader.set_part_size(size);
        }
        downloader.download(&temp_dir, &CancelToken::new(), &print_progress)
    })
    .await?;

    finish_download(store, id, outcome).await
}
