use std::{
    fs,
    path::{Path, PathBuf},
    sync::{PoisonError, RwLock},
    time::Duration,
};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::transport::{LineEndpoint, PairedNode};

pub const BACKEND_URL_ENV: &str = "ROADWATCH_BACKEND_URL";
pub const DEBUG_ENV: &str = "ROADWATCH_DEBUG";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "snake_case", tag = "kind")]
pub enum TransportConfig {
    /// Paired nodes reachable as a serial device or TCP bridge.
    Line { paired: Vec<PairedNode> },
    /// Discovery + notifications through a host radio.
    Notify { scan_window_secs: u64 },
}

impl Default for TransportConfig {
    fn default() -> Self {
        TransportConfig::Line {
            paired: vec![PairedNode {
                name: "Zenith_Node_01".into(),
                endpoint: LineEndpoint::Device(PathBuf::from("/dev/rfcomm0")),
            }],
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct LocationConfig {
    /// `None` disables positioning; every report then lands at (0, 0).
    pub gpsd_addr: Option<String>,
    pub cached_timeout_ms: u64,
    pub fresh_timeout_secs: u64,
    /// How long a fix stays good enough to stamp a new report. Keep it short on a vehicle.
    pub max_cached_age_secs: u64,
}

impl Default for LocationConfig {
    fn default() -> Self {
        Self {
            gpsd_addr: Some("127.0.0.1:2947".into()),
            cached_timeout_ms: 500,
            fresh_timeout_secs: 5,
            max_cached_age_secs: 5,
        }
    }
}

impl LocationConfig {
    pub fn cached_timeout(&self) -> Duration {
        Duration::from_millis(self.cached_timeout_ms)
    }

    pub fn fresh_timeout(&self) -> Duration {
        Duration::from_secs(self.fresh_timeout_secs)
    }

    pub fn max_cached_age(&self) -> Duration {
        Duration::from_secs(self.max_cached_age_secs)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct AppConfig {
    pub node_name: String,
    pub transport: TransportConfig,
    pub connect_timeout_secs: u64,
    pub handshake: Option<String>,
    pub backend_url: String,
    pub user_id: String,
    pub forward_timeout_secs: u64,
    pub classifier_url: String,
    pub classifier_timeout_secs: u64,
    pub location: LocationConfig,
    /// Database and kept media live here. Relative paths resolve against the config file.
    pub data_dir: PathBuf,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            node_name: "Zenith_Node_01".into(),
            transport: TransportConfig::default(),
            connect_timeout_secs: 10,
            handshake: None,
            backend_url: "http://localhost:3000".into(),
            user_id: "user_sensor_bt".into(),
            forward_timeout_secs: 15,
            classifier_url: "http://localhost:8080/classify".into(),
            classifier_timeout_secs: 30,
            location: LocationConfig::default(),
            data_dir: PathBuf::from("data"),
        }
    }
}

impl AppConfig {
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    pub fn forward_timeout(&self) -> Duration {
        Duration::from_secs(self.forward_timeout_secs)
    }

    pub fn classifier_timeout(&self) -> Duration {
        Duration::from_secs(self.classifier_timeout_secs)
    }

    fn apply_env(&mut self, backend_url: Option<String>) {
        if let Some(url) = backend_url.filter(|url| !url.trim().is_empty()) {
            self.backend_url = url;
        }
    }
}

/// `ROADWATCH_DEBUG=1` or `=true`.
pub fn debug_requested() -> bool {
    std::env::var(DEBUG_ENV)
        .map(|value| matches!(value.trim().to_ascii_lowercase().as_str(), "1" | "true"))
        .unwrap_or(false)
}

pub struct ConfigStore {
    path: PathBuf,
    data: RwLock<AppConfig>,
}

impl ConfigStore {
    /// Loads the file if present, otherwise starts from defaults. Environment overrides
    /// apply to the in-memory copy only.
    pub fn new(path: PathBuf) -> Result<Self> {
        Self::with_env(path, std::env::var(BACKEND_URL_ENV).ok())
    }

    fn with_env(path: PathBuf, backend_url: Option<String>) -> Result<Self> {
        let mut data = if path.exists() {
            let contents = fs::read_to_string(&path)
                .with_context(|| format!("Failed to read config from {}", path.display()))?;
            serde_json::from_str(&contents)
                .with_context(|| format!("Invalid config in {}", path.display()))?
        } else {
            AppConfig::default()
        };
        data.apply_env(backend_url);

        Ok(Self {
            path,
            data: RwLock::new(data),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn get(&self) -> AppConfig {
        self.data
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn data_dir(&self) -> PathBuf {
        let configured = self.get().data_dir;
        if configured.is_absolute() {
            return configured;
        }
        match self.path.parent() {
            Some(base) => base.join(configured),
            None => configured,
        }
    }

    pub fn update(&self, config: AppConfig) -> Result<()> {
        let mut guard = self.data.write().unwrap_or_else(PoisonError::into_inner);
        self.persist(&config)?;
        *guard = config;
        Ok(())
    }

    fn persist(&self, data: &AppConfig) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create {}", parent.display()))?;
        }
        let serialized = serde_json::to_string_pretty(data)?;
        fs::write(&self.path, serialized)
            .with_context(|| format!("Failed to write config to {}", self.path.display()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_config_path() -> PathBuf {
        std::env::temp_dir()
            .join(format!("roadwatch_cfg_{}", uuid::Uuid::new_v4()))
            .join("config.json")
    }

    #[test]
    fn missing_file_yields_defaults() {
        let store = ConfigStore::with_env(temp_config_path(), None).unwrap();
        assert_eq!(store.get(), AppConfig::default());
    }

    #[test]
    fn cached_fixes_expire_within_seconds_by_default() {
        let location = AppConfig::default().location;
        assert!(location.max_cached_age() <= Duration::from_secs(5));
        assert!(location.max_cached_age() >= location.cached_timeout());
    }

    #[test]
    fn update_persists_and_reloads() {
        let path = temp_config_path();
        let store = ConfigStore::with_env(path.clone(), None).unwrap();

        let mut config = store.get();
        config.node_name = "Zenith_Node_07".into();
        config.transport = TransportConfig::Line {
            paired: vec![PairedNode {
                name: "Zenith_Node_07".into(),
                endpoint: LineEndpoint::Tcp("10.0.0.7:7000".into()),
            }],
        };
        store.update(config.clone()).unwrap();

        let reloaded = ConfigStore::with_env(path, None).unwrap();
        assert_eq!(reloaded.get(), config);
    }

    #[test]
    fn partial_file_fills_in_defaults() {
        let path = temp_config_path();
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(&path, r#"{"node_name": "Bench", "location": {"gpsd_addr": null}}"#).unwrap();

        let config = ConfigStore::with_env(path, None).unwrap().get();
        assert_eq!(config.node_name, "Bench");
        assert_eq!(config.location.gpsd_addr, None);
        assert_eq!(config.location.fresh_timeout_secs, 5);
        assert_eq!(config.forward_timeout_secs, 15);
    }

    #[test]
    fn env_backend_url_wins_without_being_persisted() {
        let path = temp_config_path();
        let store =
            ConfigStore::with_env(path.clone(), Some("http://fleet.example:3000".into())).unwrap();
        assert_eq!(store.get().backend_url, "http://fleet.example:3000");
        assert!(!path.exists());

        let blank = ConfigStore::with_env(temp_config_path(), Some("  ".into())).unwrap();
        assert_eq!(blank.get().backend_url, AppConfig::default().backend_url);
    }

    #[test]
    fn relative_data_dir_sits_next_to_the_config() {
        let path = temp_config_path();
        let store = ConfigStore::with_env(path.clone(), None).unwrap();
        assert_eq!(store.data_dir(), path.parent().unwrap().join("data"));
    }
}
