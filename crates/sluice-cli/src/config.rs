//! Configuration file for the sluice CLI.

use serde::{Deserialize, Serialize};
use sluice_core::{Algorithm, ClientConfig, ServerConfig, parse_port};
use std::fs;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// sluice configuration
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    /// Server role settings
    #[serde(default)]
    pub server: ServerSection,
    /// Client role settings
    #[serde(default)]
    pub client: ClientSection,
    /// Congestion control settings
    #[serde(default)]
    pub congestion: CongestionSection,
    /// Transfer pacing settings
    #[serde(default)]
    pub transfer: TransferSection,
    /// Logging settings
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Server role settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerSection {
    /// Listen port
    #[serde(default = "default_port")]
    pub port: u16,
    /// Directory served to and written by clients
    #[serde(default = "default_storage_dir")]
    pub storage_dir: PathBuf,
    /// Seconds without traffic before a client is dropped
    #[serde(default = "default_idle_timeout")]
    pub idle_timeout_secs: u64,
}

/// Client role settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientSection {
    /// Default server, `host:port`
    #[serde(default = "default_server")]
    pub server: String,
    /// Where downloads are saved
    #[serde(default = "default_download_dir")]
    pub download_dir: PathBuf,
    /// Connection timeout in seconds
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_secs: u64,
}

/// Congestion control settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CongestionSection {
    /// Algorithm: reno, tahoe, cubic or vegas
    #[serde(default = "default_algorithm")]
    pub algorithm: String,
    /// Upper bound for the congestion window, in packets
    #[serde(default = "default_window_cap")]
    pub receive_window_cap: u32,
}

/// Transfer pacing settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransferSection {
    /// Bytes per data packet
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,
    /// Outbound queue depth that pauses the sender
    #[serde(default = "default_max_queue_depth")]
    pub max_queue_depth: usize,
    /// Sleep a tenth of the smoothed RTT between packets
    #[serde(default = "default_true")]
    pub rtt_pacing: bool,
    /// Probability of answering a chunk with NACK
    #[serde(default)]
    pub simulated_loss: f64,
    /// Window exhaustion counted as a loss, in milliseconds
    #[serde(default = "default_ack_timeout")]
    pub ack_timeout_ms: u64,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level
    #[serde(default = "default_log_level")]
    pub level: String,
}

// Default values

fn default_port() -> u16 {
    sluice_core::DEFAULT_PORT
}

fn default_storage_dir() -> PathBuf {
    PathBuf::from("uploads")
}

fn default_idle_timeout() -> u64 {
    60
}

fn default_server() -> String {
    format!("127.0.0.1:{}", sluice_core::DEFAULT_PORT)
}

fn default_download_dir() -> PathBuf {
    PathBuf::from("downloads")
}

fn default_connect_timeout() -> u64 {
    10
}

fn default_algorithm() -> String {
    "reno".to_string()
}

fn default_window_cap() -> u32 {
    sluice_core::MAX_WINDOW_SIZE
}

fn default_chunk_size() -> usize {
    sluice_core::DEFAULT_CHUNK_SIZE
}

fn default_max_queue_depth() -> usize {
    50
}

fn default_true() -> bool {
    true
}

fn default_ack_timeout() -> u64 {
    2000
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for ServerSection {
    fn default() -> Self {
        Self {
            port: default_port(),
            storage_dir: default_storage_dir(),
            idle_timeout_secs: default_idle_timeout(),
        }
    }
}

impl Default for ClientSection {
    fn default() -> Self {
        Self {
            server: default_server(),
            download_dir: default_download_dir(),
            connect_timeout_secs: default_connect_timeout(),
        }
    }
}

impl Default for CongestionSection {
    fn default() -> Self {
        Self {
            algorithm: default_algorithm(),
            receive_window_cap: default_window_cap(),
        }
    }
}

impl Default for TransferSection {
    fn default() -> Self {
        Self {
            chunk_size: default_chunk_size(),
            max_queue_depth: default_max_queue_depth(),
            rtt_pacing: true,
            simulated_loss: 0.0,
            ack_timeout_ms: default_ack_timeout(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

/// Split `host:port`, validating the port
///
/// # Errors
///
/// Returns an error if the port is missing or invalid, or the host is empty.
pub fn split_host_port(addr: &str) -> anyhow::Result<(String, u16)> {
    let Some((host, port)) = addr.trim().rsplit_once(':') else {
        anyhow::bail!("Server '{}' missing port (expected format: host:port)", addr);
    };
    let port = parse_port(port)?;
    let host = host.trim_start_matches('[').trim_end_matches(']');
    if host.is_empty() {
        anyhow::bail!("Server '{}' has empty hostname", addr);
    }
    Ok((host.to_string(), port))
}

impl Config {
    /// Load configuration from file
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn load<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let contents = fs::read_to_string(path)?;
        let config: Self = toml::from_str(&contents)?;
        Ok(config)
    }

    /// Save configuration to file
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be written.
    pub fn save<P: AsRef<Path>>(&self, path: P) -> anyhow::Result<()> {
        let contents = toml::to_string_pretty(self)?;
        if let Some(parent) = path.as_ref().parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(path, contents)?;
        Ok(())
    }

    /// Get default config path
    #[must_use]
    pub fn default_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("/tmp"))
            .join("sluice/config.toml")
    }

    /// Load config from default path, or create default if it doesn't exist
    ///
    /// # Errors
    ///
    /// Returns an error if reading or creating the config fails.
    pub fn load_or_default() -> anyhow::Result<Self> {
        let path = Self::default_path();
        if path.exists() {
            Self::load(&path)
        } else {
            let config = Self::default();
            config.save(&path)?;
            Ok(config)
        }
    }

    /// Configured congestion algorithm
    ///
    /// # Errors
    ///
    /// Returns an error for unknown algorithm names.
    pub fn algorithm(&self) -> anyhow::Result<Algorithm> {
        Ok(self.congestion.algorithm.parse()?)
    }

    /// Server role configuration with every section applied
    ///
    /// # Errors
    ///
    /// Returns an error if any value is invalid.
    pub fn server_config(&self) -> anyhow::Result<ServerConfig> {
        let mut config = ServerConfig {
            listen_addr: SocketAddr::from(([0, 0, 0, 0], self.server.port)),
            storage_dir: self.server.storage_dir.clone(),
            ..ServerConfig::default()
        };
        config.engine.idle_timeout = Duration::from_secs(self.server.idle_timeout_secs);
        self.apply_engine(&mut config.engine)?;
        config.validate()?;
        Ok(config)
    }

    /// Client role configuration for `server` (or the configured default)
    ///
    /// # Errors
    ///
    /// Returns an error if the address or any value is invalid.
    pub fn client_config(&self, server: Option<&str>) -> anyhow::Result<ClientConfig> {
        let (host, port) = split_host_port(server.unwrap_or(&self.client.server))?;
        let mut config = ClientConfig::new(host, port);
        config.download_dir = self.client.download_dir.clone();
        config.connect_timeout = Duration::from_secs(self.client.connect_timeout_secs);
        self.apply_engine(&mut config.engine)?;
        config.validate()?;
        Ok(config)
    }

    fn apply_engine(&self, engine: &mut sluice_core::EngineConfig) -> anyhow::Result<()> {
        engine.congestion.algorithm = self.algorithm()?;
        engine.congestion.receive_window_cap = self.congestion.receive_window_cap;
        engine.transfer.chunk_size = self.transfer.chunk_size;
        engine.transfer.max_queue_depth = self.transfer.max_queue_depth;
        engine.transfer.rtt_pacing = self.transfer.rtt_pacing;
        engine.transfer.simulated_loss = self.transfer.simulated_loss;
        engine.transfer.ack_timeout = Duration::from_millis(self.transfer.ack_timeout_ms);
        Ok(())
    }

    /// Validate configuration
    ///
    /// # Errors
    ///
    /// Returns an error if configuration is invalid.
    pub fn validate(&self) -> anyhow::Result<()> {
        self.server_config()?;
        split_host_port(&self.client.server)?;

        let valid_log_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_log_levels.contains(&self.logging.level.to_lowercase().as_str()) {
            anyhow::bail!(
                "Invalid log level: {}. Must be one of: {}",
                self.logging.level,
                valid_log_levels.join(", ")
            );
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.server.port, 8080);
        assert_eq!(config.client.server, "127.0.0.1:8080");
        assert_eq!(config.transfer.chunk_size, 1024);
        assert_eq!(config.algorithm().unwrap(), Algorithm::Reno);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_validation() {
        let mut config = Config::default();

        config.congestion.algorithm = "bbr".to_string();
        assert!(config.validate().is_err());

        config.congestion.algorithm = "TCP_CUBIC".to_string();
        config.transfer.chunk_size = 0;
        assert!(config.validate().is_err());

        config.transfer.chunk_size = 1024;
        config.transfer.simulated_loss = 2.0;
        assert!(config.validate().is_err());

        config.transfer.simulated_loss = 0.1;
        config.logging.level = "loud".to_string();
        assert!(config.validate().is_err());

        config.logging.level = "debug".to_string();
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_split_host_port() {
        assert_eq!(
            split_host_port("example.com:9000").unwrap(),
            ("example.com".to_string(), 9000)
        );
        assert_eq!(split_host_port("[::1]:8080").unwrap(), ("::1".to_string(), 8080));
        assert!(split_host_port("example.com").is_err());
        assert!(split_host_port("example.com:0").is_err());
        assert!(split_host_port(":8080").is_err());
    }

    #[test]
    fn test_role_configs() {
        let mut config = Config::default();
        config.congestion.algorithm = "vegas".to_string();
        config.transfer.rtt_pacing = false;

        let server = config.server_config().unwrap();
        assert_eq!(server.listen_addr.port(), 8080);
        assert_eq!(server.engine.congestion.algorithm, Algorithm::Vegas);
        assert!(!server.engine.transfer.rtt_pacing);

        let client = config.client_config(Some("10.0.0.5:7000")).unwrap();
        assert_eq!(client.host, "10.0.0.5");
        assert_eq!(client.port, 7000);
        assert_eq!(client.engine.ping_interval, Some(Duration::from_secs(10)));
    }

    #[test]
    fn test_toml_round_trip() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("nested/config.toml");

        let mut config = Config::default();
        config.server.port = 9001;
        config.save(&path).unwrap();

        let loaded = Config::load(&path).unwrap();
        assert_eq!(loaded.server.port, 9001);
        assert_eq!(loaded.client.download_dir, PathBuf::from("downloads"));
    }

    #[test]
    fn test_partial_file_uses_defaults() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.toml");
        fs::write(&path, "[congestion]\nalgorithm = \"tahoe\"\n").unwrap();

        let config = Config::load(&path).unwrap();
        assert_eq!(config.algorithm().unwrap(), Algorithm::Tahoe);
        assert_eq!(config.server.port, 8080);
        assert_eq!(config.transfer.max_queue_depth, 50);
    }
}
