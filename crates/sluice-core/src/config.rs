//! Engine configuration
//!
//! Every struct has a `Default` matching the reference constants and a
//! `validate()` that runs before any socket is opened.

use crate::congestion::Algorithm;
use crate::error::ConfigError;
use std::net::{SocketAddr, ToSocketAddrs};
use std::path::PathBuf;
use std::time::Duration;

/// Default server port
pub const DEFAULT_PORT: u16 = 8080;

/// Default data packet size in bytes
pub const DEFAULT_CHUNK_SIZE: usize = 1024;

/// Largest accepted chunk size (1 MiB)
pub const MAX_CHUNK_SIZE: usize = 1024 * 1024;

/// Default receive window cap, in packets
pub const MAX_WINDOW_SIZE: u32 = 65535;

/// Parse a user-supplied port number
///
/// # Errors
///
/// Returns `ConfigError::InvalidPort` for non-numeric, out-of-range and zero
/// ports.
pub fn parse_port(text: &str) -> Result<u16, ConfigError> {
    match text.trim().parse::<u16>() {
        Ok(0) | Err(_) => Err(ConfigError::InvalidPort(text.to_string())),
        Ok(port) => Ok(port),
    }
}

/// Congestion controller parameters
#[derive(Debug, Clone)]
pub struct CongestionConfig {
    /// Algorithm new sessions start with
    pub algorithm: Algorithm,
    /// Initial congestion window (packets)
    pub initial_window: f64,
    /// Initial slow start threshold (packets)
    pub initial_ssthresh: f64,
    /// Upper bound for the congestion window (packets)
    pub receive_window_cap: u32,
    /// RTT assumed before the first sample
    pub initial_rtt: Duration,
    /// Number of RTT samples averaged into the smoothed RTT
    pub rtt_history: usize,
}

impl Default for CongestionConfig {
    fn default() -> Self {
        Self {
            algorithm: Algorithm::Reno,
            initial_window: 1.0,
            initial_ssthresh: 64.0,
            receive_window_cap: MAX_WINDOW_SIZE,
            initial_rtt: Duration::from_millis(100),
            rtt_history: 10,
        }
    }
}

impl CongestionConfig {
    /// Validate controller parameters
    ///
    /// # Errors
    ///
    /// Returns an error for a zero window cap or a threshold below one.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.receive_window_cap == 0 {
            return Err(ConfigError::InvalidReceiveWindow);
        }
        if self.initial_ssthresh < 1.0 {
            return Err(ConfigError::InvalidThreshold);
        }
        if self.rtt_history == 0 {
            return Err(ConfigError::MustBePositive("rtt history"));
        }
        Ok(())
    }
}

/// File transfer pacing parameters
#[derive(Debug, Clone)]
pub struct TransferConfig {
    /// Bytes read from disk per data packet
    pub chunk_size: usize,
    /// Outbound queue depth above which the sender pauses
    pub max_queue_depth: usize,
    /// Pause taken when the queue is over `max_queue_depth`
    pub backpressure_pause: Duration,
    /// Sleep between window checks while the window is exhausted
    pub window_poll: Duration,
    /// Window exhaustion longer than this counts as a lost packet
    pub ack_timeout: Duration,
    /// Sleep `smoothed_rtt / 10` between packets
    pub rtt_pacing: bool,
    /// Probability that a received chunk is answered with `NACK`
    pub simulated_loss: f64,
}

impl Default for TransferConfig {
    fn default() -> Self {
        Self {
            chunk_size: DEFAULT_CHUNK_SIZE,
            max_queue_depth: 50,
            backpressure_pause: Duration::from_millis(10),
            window_poll: Duration::from_millis(1),
            ack_timeout: Duration::from_secs(2),
            rtt_pacing: true,
            simulated_loss: 0.0,
        }
    }
}

impl TransferConfig {
    /// Validate pacing parameters
    ///
    /// # Errors
    ///
    /// Returns an error for out-of-range sizes, depths or probabilities.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.chunk_size == 0 || self.chunk_size > MAX_CHUNK_SIZE {
            return Err(ConfigError::InvalidChunkSize {
                max: MAX_CHUNK_SIZE,
                actual: self.chunk_size,
            });
        }
        if self.max_queue_depth == 0 {
            return Err(ConfigError::InvalidQueueDepth);
        }
        if !(0.0..=1.0).contains(&self.simulated_loss) {
            return Err(ConfigError::InvalidLossProbability);
        }
        if self.ack_timeout.is_zero() {
            return Err(ConfigError::MustBePositive("ack timeout"));
        }
        Ok(())
    }
}

/// Event loop parameters shared by both roles
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Sessions without read activity for this long are closed
    pub idle_timeout: Duration,
    /// Upper bound on a single readiness wait
    pub poll_timeout: Duration,
    /// Bytes pulled from a socket per read call
    pub read_buffer_size: usize,
    /// Interval between `PING` messages (client role only)
    pub ping_interval: Option<Duration>,
    /// Interval between `EngineEvent::Metrics` publications
    pub metrics_interval: Option<Duration>,
    /// Congestion controller parameters for new sessions
    pub congestion: CongestionConfig,
    /// Transfer pacing parameters
    pub transfer: TransferConfig,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            idle_timeout: Duration::from_secs(60),
            poll_timeout: Duration::from_secs(1),
            read_buffer_size: 4096,
            ping_interval: None,
            metrics_interval: Some(Duration::from_millis(500)),
            congestion: CongestionConfig::default(),
            transfer: TransferConfig::default(),
        }
    }
}

impl EngineConfig {
    /// Defaults for the client role: shorter poll, bigger buffer, 10 s pings
    #[must_use]
    pub fn client() -> Self {
        Self {
            poll_timeout: Duration::from_millis(100),
            read_buffer_size: 8192,
            ping_interval: Some(Duration::from_secs(10)),
            ..Self::default()
        }
    }

    /// Validate loop, congestion and transfer parameters
    ///
    /// # Errors
    ///
    /// Returns the first invalid parameter found.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.idle_timeout.is_zero() {
            return Err(ConfigError::MustBePositive("idle timeout"));
        }
        if self.poll_timeout.is_zero() {
            return Err(ConfigError::MustBePositive("poll timeout"));
        }
        if self.read_buffer_size == 0 {
            return Err(ConfigError::MustBePositive("read buffer size"));
        }
        if self.ping_interval.is_some_and(|d| d.is_zero()) {
            return Err(ConfigError::MustBePositive("ping interval"));
        }
        if self.metrics_interval.is_some_and(|d| d.is_zero()) {
            return Err(ConfigError::MustBePositive("metrics interval"));
        }
        self.congestion.validate()?;
        self.transfer.validate()
    }
}

/// Server role configuration
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Listen address; port 0 picks an ephemeral port
    pub listen_addr: SocketAddr,
    /// Directory files are listed from, served from and uploaded into
    pub storage_dir: PathBuf,
    /// Event loop parameters
    pub engine: EngineConfig,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen_addr: SocketAddr::from(([0, 0, 0, 0], DEFAULT_PORT)),
            storage_dir: PathBuf::from("uploads"),
            engine: EngineConfig::default(),
        }
    }
}

impl ServerConfig {
    /// Configuration listening on all interfaces at `port`
    #[must_use]
    pub fn with_port(port: u16) -> Self {
        Self {
            listen_addr: SocketAddr::from(([0, 0, 0, 0], port)),
            ..Self::default()
        }
    }

    /// Validate the configuration
    ///
    /// # Errors
    ///
    /// Returns the first invalid parameter found.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.engine.validate()
    }
}

/// Client role configuration
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Server host name or IP
    pub host: String,
    /// Server port
    pub port: u16,
    /// Where downloaded files are written
    pub download_dir: PathBuf,
    /// Upper bound on connection establishment
    pub connect_timeout: Duration,
    /// Event loop parameters
    pub engine: EngineConfig,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: DEFAULT_PORT,
            download_dir: PathBuf::from("downloads"),
            connect_timeout: Duration::from_secs(10),
            engine: EngineConfig::client(),
        }
    }
}

impl ClientConfig {
    /// Configuration for `host:port` with client defaults
    #[must_use]
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
            ..Self::default()
        }
    }

    /// Validate the configuration, without resolving the host
    ///
    /// # Errors
    ///
    /// Returns an error for port 0, an empty host or invalid engine settings.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.port == 0 {
            return Err(ConfigError::InvalidPort("0".to_string()));
        }
        if self.host.trim().is_empty() {
            return Err(ConfigError::InvalidAddress(String::new()));
        }
        if self.connect_timeout.is_zero() {
            return Err(ConfigError::MustBePositive("connect timeout"));
        }
        self.engine.validate()
    }

    /// Resolve `host:port` to the first socket address
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::InvalidAddress` when resolution yields nothing.
    pub fn resolve(&self) -> Result<SocketAddr, ConfigError> {
        let target = format!("{}:{}", self.host, self.port);
        target
            .to_socket_addrs()
            .ok()
            .and_then(|mut addrs| addrs.next())
            .ok_or(ConfigError::InvalidAddress(target))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_port() {
        assert_eq!(parse_port("8080"), Ok(8080));
        assert_eq!(parse_port(" 65535 "), Ok(65535));
        assert!(parse_port("0").is_err());
        assert!(parse_port("65536").is_err());
        assert!(parse_port("http").is_err());
        assert!(parse_port("").is_err());
    }

    #[test]
    fn test_defaults_are_valid() {
        assert!(ServerConfig::default().validate().is_ok());
        assert!(ClientConfig::default().validate().is_ok());

        let client = EngineConfig::client();
        assert_eq!(client.ping_interval, Some(Duration::from_secs(10)));
        assert_eq!(client.read_buffer_size, 8192);
        assert_eq!(EngineConfig::default().idle_timeout, Duration::from_secs(60));
    }

    #[test]
    fn test_transfer_validation() {
        let mut config = TransferConfig::default();
        config.chunk_size = 0;
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidChunkSize { actual: 0, .. })
        ));

        config.chunk_size = 1024;
        config.simulated_loss = 1.5;
        assert_eq!(config.validate(), Err(ConfigError::InvalidLossProbability));

        config.simulated_loss = 0.1;
        config.max_queue_depth = 0;
        assert_eq!(config.validate(), Err(ConfigError::InvalidQueueDepth));
    }

    #[test]
    fn test_engine_validation() {
        let mut config = EngineConfig::default();
        config.idle_timeout = Duration::ZERO;
        assert_eq!(
            config.validate(),
            Err(ConfigError::MustBePositive("idle timeout"))
        );

        let mut config = EngineConfig::default();
        config.congestion.receive_window_cap = 0;
        assert_eq!(config.validate(), Err(ConfigError::InvalidReceiveWindow));
    }

    #[test]
    fn test_client_validation() {
        let mut config = ClientConfig::new("localhost", 0);
        assert!(matches!(config.validate(), Err(ConfigError::InvalidPort(_))));

        config.port = 9000;
        config.host = "  ".to_string();
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidAddress(_))
        ));
    }

    #[test]
    fn test_client_resolve() {
        let config = ClientConfig::new("127.0.0.1", 9000);
        assert_eq!(config.resolve().unwrap(), "127.0.0.1:9000".parse().unwrap());
    }
}
