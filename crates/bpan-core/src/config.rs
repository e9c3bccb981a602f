use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::PathBuf;

/// Service endpoints used by the transfer engine.
///
/// The defaults point at the production cloud-disk service; tests (and
/// self-hosted gateways) override them with a local address. Loaded from
/// `~/.config/bpan/config.toml` by the CLI.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Base URL for the open REST API (precreate / create).
    pub open_api_base: String,
    /// Base URL for the PCS data plane (slice upload).
    pub pcs_data_base: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            open_api_base: "https://pan.baidu.com".to_string(),
            pcs_data_base: "https://d.pcs.baidu.com".to_string(),
        }
    }
}

pub fn config_path() -> Result<PathBuf> {
    let xdg_dirs = xdg::BaseDirectories::with_prefix("bpan")?;
    Ok(xdg_dirs.place_config_file("config.toml")?)
}

/// Load configuration from disk, creating a default file if none exists.
pub fn load_or_init() -> Result<Config> {
    let path = config_path()?;
    if !path.exists() {
        let default_cfg = Config::default();
        let toml = toml::to_string_pretty(&default_cfg)?;
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(&path, toml)?;
        tracing::info!("created default config at {}", path.display());
        return Ok(default_cfg);
    }

    let data = fs::read_to_string(&path)?;
    let cfg: Config = toml::from_str(&data)?;
    Ok(cfg)
}
