use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Top-level configuration for the iris-meta library.
///
/// Controls whether and how photo files are modified, and how the
/// synchronization engine stages its rewrites.
///
/// # Loading
///
/// ```rust,no_run
/// use iris_meta::config::{Config, StoreOption};
///
/// // From a JSON file
/// let config = Config::load(Some("config.json".as_ref())).unwrap();
///
/// // Or use defaults and customize
/// let mut config = Config::default();
/// config.metadata.store_option = StoreOption::XmpOnly;
/// ```
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Which metadata blocks may be modified.
    pub metadata: MetadataConfig,
    /// Rewrite engine settings.
    pub sync: SyncSettings,
    /// CLI output behavior.
    pub output: OutputConfig,
}

/// How much of a photo file the application may touch.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StoreOption {
    /// Never modify photo files. Stores are discarded, so `get` keeps
    /// returning what is on disk.
    DoNotStore,
    /// Update the XMP packet, leave EXIF alone.
    XmpOnly,
    /// Update XMP and the standard EXIF tags.
    #[default]
    XmpAndExif,
}

impl StoreOption {
    pub fn writes_files(&self) -> bool {
        !matches!(self, Self::DoNotStore)
    }

    pub fn writes_exif(&self) -> bool {
        matches!(self, Self::XmpAndExif)
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct MetadataConfig {
    pub store_option: StoreOption,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncSettings {
    /// Appended to the photo file name to form the sibling temp file.
    pub temp_suffix: String,
    /// Buffer size of the event channel. Slow subscribers lag beyond this.
    pub event_capacity: usize,
}

impl Default for SyncSettings {
    fn default() -> Self {
        Self {
            temp_suffix: ".temp".to_string(),
            event_capacity: 64,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct OutputConfig {
    /// Print results as JSON.
    pub json: bool,
}

impl Config {
    /// Resolve the config file path, in the same directory as the executable.
    pub fn config_path() -> Result<PathBuf> {
        let exe_path = std::env::current_exe().context("Failed to get executable path")?;
        let exe_dir = exe_path
            .parent()
            .context("Failed to get executable directory")?;
        Ok(exe_dir.join("config.json"))
    }

    /// Load config from the given path, or from the default location.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let config_path = match path {
            Some(p) => p.to_path_buf(),
            None => Self::config_path()?,
        };

        if !config_path.exists() {
            log::warn!(
                "Config file not found at {}. Using defaults.",
                config_path.display()
            );
            return Ok(Self::default());
        }

        let contents =
            std::fs::read_to_string(&config_path).context("Failed to read config file")?;
        let config: Config =
            serde_json::from_str(&contents).context("Failed to parse config file")?;
        Ok(config)
    }

    /// Save config to the given path, or to the default location.
    pub fn save(&self, path: Option<&Path>) -> Result<()> {
        let config_path = match path {
            Some(p) => p.to_path_buf(),
            None => Self::config_path()?,
        };

        let contents = serde_json::to_string_pretty(self).context("Failed to serialize config")?;
        std::fs::write(&config_path, contents).context("Failed to write config file")?;
        log::info!("Config saved to {}", config_path.display());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn defaults() {
        let config = Config::default();
        assert_eq!(config.metadata.store_option, StoreOption::XmpAndExif);
        assert_eq!(config.sync.temp_suffix, ".temp");
        assert!(!config.output.json);
    }

    #[test]
    fn store_option_levels() {
        assert!(!StoreOption::DoNotStore.writes_files());
        assert!(StoreOption::XmpOnly.writes_files());
        assert!(!StoreOption::XmpOnly.writes_exif());
        assert!(StoreOption::XmpAndExif.writes_exif());
    }

    #[test]
    fn missing_file_yields_defaults() {
        let dir = TempDir::new().unwrap();
        let config = Config::load(Some(&dir.path().join("nope.json"))).unwrap();
        assert_eq!(config.metadata.store_option, StoreOption::XmpAndExif);
    }

    #[test]
    fn save_and_load() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.json");

        let mut config = Config::default();
        config.metadata.store_option = StoreOption::XmpOnly;
        config.sync.temp_suffix = ".tmp".into();
        config.save(Some(&path)).unwrap();

        let raw = std::fs::read_to_string(&path).unwrap();
        assert!(raw.contains("\"xmp_only\""));

        let loaded = Config::load(Some(&path)).unwrap();
        assert_eq!(loaded.metadata.store_option, StoreOption::XmpOnly);
        assert_eq!(loaded.sync.temp_suffix, ".tmp");
    }

    #[test]
    fn partial_file_fills_defaults() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(&path, r#"{ "metadata": { "store_option": "do_not_store" } }"#).unwrap();

        let loaded = Config::load(Some(&path)).unwrap();
        assert_eq!(loaded.metadata.store_option, StoreOption::DoNotStore);
        assert_eq!(loaded.sync.event_capacity, 64);
    }

    #[test]
    fn invalid_json_is_an_error() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(&path, "{ not json").unwrap();
        assert!(Config::load(Some(&path)).is_err());
    }
}
