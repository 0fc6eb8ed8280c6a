use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Top-level configuration loaded from wallkeeper.toml.
#[derive(Debug, Deserialize)]
#[serde(default)]
#[derive(Default)]
pub struct WallkeeperConfig {
    pub app: AppConfig,
    pub watchdog: WatchdogConfig,
    pub resume: ResumeConfig,
    pub storage: StorageConfig,
}

/// Identity of the managed application.
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// Candidate executable locations, scanned in priority order at startup.
    pub candidate_paths: Vec<PathBuf>,
    /// Process-table name key. Defaults to the resolved executable's file name.
    pub process_name: Option<String>,
}

/// Liveness-loop timing.
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct WatchdogConfig {
    pub check_interval_secs: u64,
    pub restart_delay_secs: u64,
    pub stop_timeout_secs: u64,
    pub shutdown_join_timeout_secs: u64,
}

/// Post-wake delay policy.
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct ResumeConfig {
    /// Sleeps at or above this duration count as "long".
    pub long_sleep_threshold_secs: u64,
    pub short_delay_secs: u64,
    pub long_delay_secs: u64,
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    pub data_dir: PathBuf,
}

// --- Default implementations ---

impl Default for AppConfig {
    fn default() -> Self {
        let mut candidates = Vec::new();
        if let Some(home) = dirs::home_dir() {
            candidates.push(home.join(".local/bin/linux-wallpaperengine"));
            candidates.push(
                home.join(".steam/root/steamapps/common/wallpaper_engine/linux-wallpaperengine"),
            );
        }
        candidates.push(PathBuf::from("/usr/local/bin/linux-wallpaperengine"));
        candidates.push(PathBuf::from("/usr/bin/linux-wallpaperengine"));
        candidates.push(PathBuf::from("/opt/wallpaperengine/linux-wallpaperengine"));
        Self {
            candidate_paths: candidates,
            process_name: None,
        }
    }
}

impl Default for WatchdogConfig {
    fn default() -> Self {
        Self {
            check_interval_secs: 10,
            restart_delay_secs: 3,
            stop_timeout_secs: 5,
            shutdown_join_timeout_secs: 2,
        }
    }
}

impl Default for ResumeConfig {
    fn default() -> Self {
        Self {
            // 2.5 hours
            long_sleep_threshold_secs: 9000,
            short_delay_secs: 5,
            long_delay_secs: 30,
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        let root = dirs::data_dir()
            .map(|d| d.join("wallkeeper"))
            .unwrap_or_else(|| PathBuf::from(".wallkeeper"));
        Self { data_dir: root }
    }
}

impl WatchdogConfig {
    pub fn check_interval(&self) -> Duration {
        Duration::from_secs(self.check_interval_secs)
    }

    pub fn restart_delay(&self) -> Duration {
        Duration::from_secs(self.restart_delay_secs)
    }

    pub fn stop_timeout(&self) -> Duration {
        Duration::from_secs(self.stop_timeout_secs)
    }

    pub fn shutdown_join_timeout(&self) -> Duration {
        Duration::from_secs(self.shutdown_join_timeout_secs)
    }
}

impl ResumeConfig {
    pub fn long_sleep_threshold(&self) -> Duration {
        Duration::from_secs(self.long_sleep_threshold_secs)
    }

    pub fn short_delay(&self) -> Duration {
        Duration::from_secs(self.short_delay_secs)
    }

    pub fn long_delay(&self) -> Duration {
        Duration::from_secs(self.long_delay_secs)
    }
}

/// Errors that can occur while loading configuration.
#[derive(Debug)]
pub enum ConfigError {
    /// Config file exists but could not be read.
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    /// Config file contents are not valid TOML for our schema.
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::Read { path, source } => {
                write!(f, "failed to read config {}: {}", path.display(), source)
            }
            ConfigError::Parse { path, source } => {
                write!(f, "failed to parse config {}: {}", path.display(), source)
            }
        }
    }
}

impl std::error::Error for ConfigError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ConfigError::Read { source, .. } => Some(source),
            ConfigError::Parse { source, .. } => Some(source),
        }
    }
}

impl WallkeeperConfig {
    /// Load from the given path, falling back to pure defaults when the file
    /// does not exist. A present-but-broken file is an error, not a fallback.
    pub fn load_or_default(path: &Path) -> Result<Self, ConfigError> {
        match std::fs::read_to_string(path) {
            Ok(contents) => toml::from_str(&contents).map_err(|e| ConfigError::Parse {
                path: path.to_path_buf(),
                source: e,
            }),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Self::default()),
            Err(e) => Err(ConfigError::Read {
                path: path.to_path_buf(),
                source: e,
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_timings() {
        let config = WallkeeperConfig::default();
        assert_eq!(config.watchdog.check_interval(), Duration::from_secs(10));
        assert_eq!(config.watchdog.restart_delay(), Duration::from_secs(3));
        assert_eq!(config.watchdog.stop_timeout(), Duration::from_secs(5));
        assert_eq!(
            config.resume.long_sleep_threshold(),
            Duration::from_secs(9000)
        );
        assert_eq!(config.resume.short_delay(), Duration::from_secs(5));
        assert_eq!(config.resume.long_delay(), Duration::from_secs(30));
    }

    #[test]
    fn test_default_candidates_nonempty() {
        let config = AppConfig::default();
        assert!(!config.candidate_paths.is_empty());
        assert!(config.process_name.is_none());
    }

    #[test]
    fn test_load_missing_file_gives_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = WallkeeperConfig::load_or_default(&dir.path().join("absent.toml")).unwrap();
        assert_eq!(config.watchdog.check_interval_secs, 10);
    }

    #[test]
    fn test_load_partial_file_merges_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("wallkeeper.toml");
        std::fs::write(
            &path,
            "[watchdog]\ncheck_interval_secs = 3\n\n[app]\nprocess_name = \"wallpaper64\"\n",
        )
        .unwrap();

        let config = WallkeeperConfig::load_or_default(&path).unwrap();
        assert_eq!(config.watchdog.check_interval_secs, 3);
        // Untouched sections keep their defaults
        assert_eq!(config.watchdog.restart_delay_secs, 3);
        assert_eq!(config.resume.long_delay_secs, 30);
        assert_eq!(config.app.process_name.as_deref(), Some("wallpaper64"));
    }

    #[test]
    fn test_load_broken_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("wallkeeper.toml");
        std::fs::write(&path, "[watchdog]\ncheck_interval_secs = \"ten\"\n").unwrap();

        let err = WallkeeperConfig::load_or_default(&path).unwrap_err();
        assert!(matches!(err, ConfigError::Parse { .. }));
        assert!(err.to_string().contains("failed to parse config"));
    }
}
