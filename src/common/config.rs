use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::Context;
use serde::{Deserialize, Serialize};

/// Environment variable naming the TOML config file.
pub const CONFIG_ENV: &str = "DATAVAULT_CONFIG";

/// Chunk size below which a bare stream frame is taken as the tail of an upload.
pub const DEFAULT_HEURISTIC_THRESHOLD: usize = 96 * 1024;

#[derive(Serialize, Deserialize, Debug, Clone, Default)]
#[serde(default)]
pub struct VaultConfig {
    pub storage: StorageConfig,
    pub ingest: IngestConfig,
    pub upload: UploadConfig,
    /// Fallback filter for the tracing subscriber when `RUST_LOG` is unset.
    pub log_filter: Option<String>,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(default)]
pub struct StorageConfig {
    /// Pre-allocated files of in-flight uploads.
    pub staging_dir: PathBuf,
    pub dataset_dir: PathBuf,
    pub snapshot_dir: PathBuf,
    pub result_dir: PathBuf,
    pub audit_dir: PathBuf,
    pub error_dir: PathBuf,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(default)]
pub struct IngestConfig {
    /// Infer completion of bare frames from their size. Deprecated; envelopes
    /// carrying an explicit last-chunk flag are always preferred.
    pub size_heuristic: bool,
    pub heuristic_threshold: usize,
    pub offset_width: OffsetWidth,
}

/// Width of the offset field in the structured frame preamble.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum OffsetWidth {
    U32,
    U64,
}

impl OffsetWidth {
    pub fn bytes(self) -> usize {
        match self {
            OffsetWidth::U32 => 4,
            OffsetWidth::U64 => 8,
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(default)]
pub struct UploadConfig {
    /// Slots untouched for longer than this are swept. `None` keeps them until shutdown.
    pub idle_timeout_secs: Option<u64>,
    pub sweep_interval_secs: u64,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self::rooted_at("vault")
    }
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            size_heuristic: true,
            heuristic_threshold: DEFAULT_HEURISTIC_THRESHOLD,
            offset_width: OffsetWidth::U64,
        }
    }
}

impl Default for UploadConfig {
    fn default() -> Self {
        Self {
            idle_timeout_secs: None,
            sweep_interval_secs: 60,
        }
    }
}

impl UploadConfig {
    pub fn idle_timeout(&self) -> Option<Duration> {
        self.idle_timeout_secs.map(Duration::from_secs)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs.max(1))
    }
}

impl StorageConfig {
    /// Every storage directory rooted at `root`.
    pub fn rooted_at(root: impl AsRef<Path>) -> Self {
        let root = root.as_ref();
        Self {
            staging_dir: root.join("staging"),
            dataset_dir: root.join("datasets"),
            snapshot_dir: root.join("snapshots"),
            result_dir: root.join("results"),
            audit_dir: root.join("audit"),
            error_dir: root.join("errors"),
        }
    }

    pub fn create_dirs(&self) -> std::io::Result<()> {
        for dir in [
            &self.staging_dir,
            &self.dataset_dir,
            &self.snapshot_dir,
            &self.result_dir,
            &self.audit_dir,
            &self.error_dir,
        ] {
            fs::create_dir_all(dir)?;
        }
        Ok(())
    }
}

impl VaultConfig {
    pub fn load(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let text = fs::read_to_string(path)
            .with_context(|| format!("reading config '{}'", path.display()))?;
        Self::from_toml(&text).with_context(|| format!("parsing config '{}'", path.display()))
    }

    pub fn from_toml(text: &str) -> anyhow::Result<Self> {
        let config: VaultConfig = toml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    /// Loads `.env`, then the file named by `DATAVAULT_CONFIG`, else defaults.
    pub fn from_env() -> anyhow::Result<Self> {
        dotenv::dotenv().ok();
        match std::env::var(CONFIG_ENV) {
            Ok(path) => Self::load(path),
            Err(_) => Ok(Self::default()),
        }
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if self.ingest.heuristic_threshold == 0 {
            anyhow::bail!("ingest.heuristic_threshold must be > 0");
        }
        if self.upload.idle_timeout_secs == Some(0) {
            anyhow::bail!("upload.idle_timeout_secs must be > 0 when set");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_toml_keeps_defaults() {
        let config = VaultConfig::from_toml(
            r#"
            log_filter = "datavault=debug"

            [storage]
            staging_dir = "/tmp/stage"

            [ingest]
            size_heuristic = false
            offset_width = "u32"
            "#,
        )
        .unwrap();

        assert_eq!(config.storage.staging_dir, PathBuf::from("/tmp/stage"));
        assert_eq!(config.storage.result_dir, PathBuf::from("vault/results"));
        assert!(!config.ingest.size_heuristic);
        assert_eq!(config.ingest.offset_width, OffsetWidth::U32);
        assert_eq!(config.ingest.heuristic_threshold, 96 * 1024);
        assert_eq!(config.upload.idle_timeout(), None);
    }

    #[test]
    fn default_storage_is_rooted_at_vault() {
        let storage = StorageConfig::default();
        let rooted = StorageConfig::rooted_at("vault");
        assert_eq!(storage.staging_dir, PathBuf::from("vault/staging"));
        assert_eq!(storage.error_dir, rooted.error_dir);
        assert_eq!(storage.dataset_dir, rooted.dataset_dir);
        assert_eq!(storage.snapshot_dir, rooted.snapshot_dir);
        assert_eq!(storage.result_dir, rooted.result_dir);
        assert_eq!(storage.audit_dir, rooted.audit_dir);
    }

    #[test]
    fn zero_threshold_is_rejected() {
        let err = VaultConfig::from_toml("[ingest]\nheuristic_threshold = 0\n").unwrap_err();
        assert!(err.to_string().contains("heuristic_threshold"));
    }

    #[test]
    fn load_reads_file_and_reports_path() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("vault.toml");
        fs::write(&path, "[upload]\nidle_timeout_secs = 30\nsweep_interval_secs = 5\n").unwrap();

        let config = VaultConfig::load(&path).unwrap();
        assert_eq!(config.upload.idle_timeout(), Some(Duration::from_secs(30)));
        assert_eq!(config.upload.sweep_interval(), Duration::from_secs(5));

        let err = VaultConfig::load(dir.path().join("missing.toml")).unwrap_err();
        assert!(format!("{:#}", err).contains("missing.toml"));
    }
}
