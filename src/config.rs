//! Client configuration
//!
//! Persisted as TOML in the platform config directory. A [`ConfigStore`]
//! owns the file and publishes every saved snapshot on a watch channel, so
//! interested components subscribe instead of sharing a global.

use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::sync::watch;

use crate::constants::{
    DEFAULT_TCP_PORT, DEFAULT_UDP_PORT, HEARTBEAT_INTERVAL_SECS, PLAYBACK_QUEUE_CAPACITY,
};
use crate::error::ConfigError;
use crate::network::ServerEndpoint;
use crate::session::SessionConfig;

pub const CONFIG_FILE_NAME: &str = "config.toml";

/// Everything the client reads from disk
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    pub log_level: String,
    pub server_host: String,
    pub server_tcp_port: u16,
    pub server_udp_port: u16,
    /// Input device name, empty for the system default
    pub audio_input: String,
    /// Output device name, empty for the system default
    pub audio_output: String,
    /// Push-to-talk binding, interpreted by the key listener
    pub ptt_key: String,
    pub heartbeat_interval_secs: u64,
    pub playback_queue_capacity: usize,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            server_host: "127.0.0.1".to_string(),
            server_tcp_port: DEFAULT_TCP_PORT,
            server_udp_port: DEFAULT_UDP_PORT,
            audio_input: String::new(),
            audio_output: String::new(),
            ptt_key: "Key.ctrl_l".to_string(),
            heartbeat_interval_secs: HEARTBEAT_INTERVAL_SECS,
            playback_queue_capacity: PLAYBACK_QUEUE_CAPACITY,
        }
    }
}

impl ClientConfig {
    /// `<platform config dir>/config.toml`
    pub fn default_path() -> Result<PathBuf, ConfigError> {
        ProjectDirs::from("com", "apocfly", "atc-voice-client")
            .map(|dirs| dirs.config_dir().join(CONFIG_FILE_NAME))
            .ok_or(ConfigError::NoConfigDir)
    }

    /// Load from `path`, writing defaults there if the file does not exist
    pub fn load_or_create(path: &Path) -> Result<Self, ConfigError> {
        if path.is_file() {
            let text = fs::read_to_string(path)?;
            let config = toml::from_str(&text)?;
            tracing::debug!(path = %path.display(), "Loaded config");
            Ok(config)
        } else {
            let config = Self::default();
            config.save(path)?;
            tracing::info!(path = %path.display(), "Created default config");
            Ok(config)
        }
    }

    pub fn save(&self, path: &Path) -> Result<(), ConfigError> {
        if let Some(dir) = path.parent() {
            fs::create_dir_all(dir)?;
        }
        fs::write(path, toml::to_string_pretty(self)?)?;
        Ok(())
    }

    pub fn endpoint(&self) -> ServerEndpoint {
        ServerEndpoint {
            host: self.server_host.clone(),
            tcp_port: self.server_tcp_port,
            udp_port: self.server_udp_port,
        }
    }

    pub fn session_config(&self) -> SessionConfig {
        SessionConfig {
            endpoint: self.endpoint(),
            heartbeat_interval: Duration::from_secs(self.heartbeat_interval_secs.max(1)),
        }
    }

    /// Playback queue size, at least one frame
    pub fn queue_capacity(&self) -> usize {
        self.playback_queue_capacity.max(1)
    }
}

/// Owner of the config file with change notifications
pub struct ConfigStore {
    path: PathBuf,
    tx: watch::Sender<ClientConfig>,
}

impl ConfigStore {
    pub fn open(path: PathBuf) -> Result<Self, ConfigError> {
        let config = ClientConfig::load_or_create(&path)?;
        let (tx, _) = watch::channel(config);
        Ok(Self { path, tx })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn current(&self) -> ClientConfig {
        self.tx.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<ClientConfig> {
        self.tx.subscribe()
    }

    /// Apply `f`, persist, and notify subscribers
    pub fn update<F>(&self, f: F) -> Result<(), ConfigError>
    where
        F: FnOnce(&mut ClientConfig),
    {
        let mut config = self.current();
        f(&mut config);
        config.save(&self.path)?;
        self.tx.send_replace(config);
        Ok(())
    }
}
