use anyhow::Result;
use clap::{Parser, Subcommand};

use crate::store::SnapshotStore;

mod commands;

/// Top-level CLI for the bpan cloud-disk client.
#[derive(Debug, Parser)]
#[command(name = "bpan")]
#[command(about = "bpan: resumable chunked transfers for the cloud disk", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: CliCommand,
}

#[derive(Debug, Subcommand)]
pub enum CliCommand {
    /// Upload a local file to the cloud disk.
    Upload {
        /// Local file to upload.
        local: String,

        /// Remote destination path.
        remote: String,

        /// OAuth access token (falls back to $BPAN_ACCESS_TOKEN).
        #[arg(long)]
        token: Option<String>,

        /// VIP tier: 0 free, 1 member, 2 super.
        #[arg(long, default_value_t = 0)]
        tier: i32,

        /// Explicit slice size in bytes (overrides the tier default).
        #[arg(long)]
        slice_size: Option<u64>,
    },

    /// Download a remote file from its resolved download URL.
    Download {
        /// Direct download URL.
        url: String,

        /// Server-reported MD5 of the file.
        #[arg(long)]
        md5: String,

        /// Destination path.
        #[arg(long)]
        out: String,

        /// Remote file id.
        #[arg(long, default_value_t = 0)]
        fs_id: u64,

        /// VIP tier: 0 free, 1 member, 2 super.
        #[arg(long, default_value_t = 0)]
        tier: i32,

        /// Explicit part size in bytes (overrides the tier default).
        #[arg(long)]
        part_size: Option<u64>,

        /// Directory for part temp files (defaults to the system temp dir).
        #[arg(long)]
        temp_dir: Option<String>,
    },

    /// Resume a stored transfer by its id.
    Resume {
        /// Transfer identifier (see `bpan status`).
        id: i64,

        /// OAuth access token, for upload resumes.
        #[arg(long)]
        token: Option<String>,

        /// Current VIP tier; defaults to the tier stored in the snapshot.
        #[arg(long)]
        tier: Option<i32>,

        /// Directory for part temp files (defaults to the system temp dir).
        #[arg(long)]
        temp_dir: Option<String>,
    },

    /// Show stored transfers.
    Status,

    /// Remove a stored transfer record.
    Remove {
        /// Transfer identifier.
        id: i64,
    },
}

impl CliCommand {
    pub async fn run_from_args() -> Result<()> {
        let cli = Cli::parse();

        let cfg = bpan_core::config::load_or_init()?;
        tracing::debug!("loaded config: {:?}", cfg);
        let store = SnapshotStore::open_default().await?;

        match cli.command {
            CliCommand::Upload { local, remote, token, tier, slice_size } => {
                commands::upload::run(&store, cfg, local, remote, token, tier, slice_size).await
            }
            CliCommand::Download { url, md5, out, fs_id, tier, part_size, temp_dir } => {
                commands::download::run(&store, url, md5, out, fs_id, tier, part_size, temp_dir)
                    .await
            }
            CliCommand::Resume { id, token, tier, temp_dir } => {
                commands::resume::run(&store, cfg, id, token, tier, temp_dir).await
            }
            CliCommand::Status => commands::status::run(&store).await,
            CliCommand::Remove { id } => {
                store.remove_transfer(id).await?;
                println!("Removed transfer {id}");
                Ok(())
            }
        }
    }
}
