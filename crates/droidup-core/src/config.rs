use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::PathBuf;
use std::time::Duration;

/// How to reach the device that updates are installed on (optional section in config.toml).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AdbConfig {
    /// Path or name of the `adb` executable.
    pub path: String,
    /// Device serial passed as `-s`; None = the only connected device.
    #[serde(default)]
    pub serial: Option<String>,
}

impl Default for AdbConfig {
    fn default() -> Self {
        Self {
            path: "adb".to_string(),
            serial: None,
        }
    }
}

/// Global configuration loaded from `~/.config/droidup/config.toml`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DroidupConfig {
    /// Maximum age of cached release metadata before it is refetched.
    pub cache_ttl_secs: u64,
    /// Interval between download status checks.
    pub poll_interval_ms: u64,
    /// Remote metadata lookups slower than this are treated as "no result".
    pub fetch_timeout_secs: u64,
    /// Warn before downloading when the download directory has less free space.
    pub min_free_bytes: u64,
    /// Where downloaded packages are written (None = XDG cache dir).
    #[serde(default)]
    pub download_dir: Option<PathBuf>,
    /// Optional adb settings; if missing, `adb` from PATH is used.
    #[serde(default)]
    pub adb: Option<AdbConfig>,
}

impl Default for DroidupConfig {
    fn default() -> Self {
        Self {
            cache_ttl_secs: 600,
            poll_interval_ms: 500,
            fetch_timeout_secs: 30,
            min_free_bytes: 104_857_600,
            download_dir: None,
            adb: None,
        }
    }
}

impl DroidupConfig {
    pub fn cache_ttl(&self) -> Duration {
        Duration::from_secs(self.cache_ttl_secs)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn fetch_timeout(&self) -> Duration {
        Duration::from_secs(self.fetch_timeout_secs)
    }

    /// Configured download directory, or `~/.cache/droidup/downloads`.
    pub fn resolved_download_dir(&self) -> Result<PathBuf> {
        if let Some(dir) = &self.download_dir {
            return Ok(dir.clone());
        }
        let xdg_dirs = xdg::BaseDirectories::with_prefix("droidup")?;
        Ok(xdg_dirs.get_cache_home().join("downloads"))
    }
}

pub fn config_path() -> Result<PathBuf> {
    let xdg_dirs = xdg::BaseDirectories::with_prefix("droidup")?;
    Ok(xdg_dirs.place_config_file("config.toml")?)
}

/// Load configuration from disk, creating a default file if none exists.
pub fn load_or_init() -> Result<DroidupConfig> {
    let path = config_path()?;
    if !path.exists() {
        let default_cfg = DroidupConfig::default();
        let toml = toml::to_string_pretty(&default_cfg)?;
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(&path, toml)?;
        tracing::info!("created default config at {}", path.display());
        return Ok(default_cfg);
    }

    let data = fs::read_to_string(&path)?;
    let cfg: DroidupConfig = toml::from_str(&data)?;
    Ok(cfg)
}
