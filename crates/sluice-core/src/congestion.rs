//! Simulated congestion control.
//!
//! Models how aggressively a session may send. The "network" is the
//! application's own send queue: window budget is consumed by
//! [`CongestionController::on_data_sent`] and restored by acknowledgements,
//! independent of any loss the kernel TCP stack might see.
//!
//! Four algorithms share one state machine and differ only in how the window
//! grows on acknowledgement and backs off on loss:
//!
//! | Algorithm | Growth per ack                        | Loss response                      |
//! |-----------|---------------------------------------|------------------------------------|
//! | Reno      | +1 in slow start, +1/cwnd otherwise   | ssthresh = cwnd/2, cwnd = ssthresh |
//! | Tahoe     | +1 in slow start, +1/cwnd otherwise   | ssthresh = cwnd/2, cwnd = 1        |
//! | Cubic     | +cbrt(1)                              | ssthresh = 0.7 cwnd, cwnd = ssthresh |
//! | Vegas     | +0.5                                  | ssthresh = 0.8 cwnd, cwnd = ssthresh |

use crate::config::CongestionConfig;
use crate::error::ConfigError;
use serde::Serialize;
use std::collections::VecDeque;
use std::fmt;
use std::str::FromStr;
use std::time::{Duration, Instant};

/// Interval after which the throughput estimator takes a new sample
const THROUGHPUT_SAMPLE_INTERVAL: Duration = Duration::from_millis(1000);

/// Congestion control algorithm
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Algorithm {
    /// TCP Reno: halve on loss, skip slow start afterwards
    #[default]
    Reno,
    /// TCP Tahoe: halve threshold on loss and restart slow start
    Tahoe,
    /// Simplified CUBIC: constant step growth, 0.7 backoff
    Cubic,
    /// Simplified Vegas: half-step growth, 0.8 backoff
    Vegas,
}

impl Algorithm {
    /// All algorithms, in presentation order
    pub const ALL: [Algorithm; 4] = [
        Algorithm::Reno,
        Algorithm::Tahoe,
        Algorithm::Cubic,
        Algorithm::Vegas,
    ];

    /// Wire name used in the `ALGORITHM` command
    #[must_use]
    pub const fn wire_name(self) -> &'static str {
        match self {
            Algorithm::Reno => "TCP_RENO",
            Algorithm::Tahoe => "TCP_TAHOE",
            Algorithm::Cubic => "TCP_CUBIC",
            Algorithm::Vegas => "TCP_VEGAS",
        }
    }
}

impl fmt::Display for Algorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.wire_name())
    }
}

impl FromStr for Algorithm {
    type Err = ConfigError;

    /// Accepts `RENO`, `TCP_RENO`, `reno`, ... for each algorithm
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let upper = s.trim().to_ascii_uppercase();
        let name = upper.strip_prefix("TCP_").unwrap_or(&upper);
        match name {
            "RENO" => Ok(Algorithm::Reno),
            "TAHOE" => Ok(Algorithm::Tahoe),
            "CUBIC" => Ok(Algorithm::Cubic),
            "VEGAS" => Ok(Algorithm::Vegas),
            _ => Err(ConfigError::UnknownAlgorithm(s.to_string())),
        }
    }
}

/// Point-in-time view of a controller, for metrics reporting
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct CongestionSnapshot {
    /// Active algorithm
    pub algorithm: Algorithm,
    /// Reported congestion window (`max(1, cwnd)`)
    pub congestion_window: f64,
    /// Slow start threshold
    pub slow_start_threshold: f64,
    /// Whether the controller is in slow start
    pub in_slow_start: bool,
    /// Mean of the recent RTT samples, milliseconds
    pub smoothed_rtt_ms: f64,
    /// Upper bound for the window
    pub receive_window_cap: u32,
    /// Last throughput sample, bits per second
    pub throughput_bps: f64,
    /// Lost packets / sent packets
    pub packet_loss_rate: f64,
    /// Packets counted as lost
    pub packets_lost: u64,
    /// Packets sent
    pub packets_total: u64,
}

/// Per-session simulated transport state
///
/// Invariants: `0 <= cwnd <= receive_window_cap` and `ssthresh >= 1` after
/// every transition.
#[derive(Debug, Clone)]
pub struct CongestionController {
    algorithm: Algorithm,
    cwnd: f64,
    ssthresh: f64,
    in_slow_start: bool,
    smoothed_rtt_ms: f64,
    rtt_samples: VecDeque<f64>,
    rtt_history: usize,
    receive_window_cap: u32,
    initial_window: f64,
    initial_ssthresh: f64,
    bytes_since_sample: u64,
    last_sample: Instant,
    throughput_bps: f64,
    packets_lost: u64,
    packets_total: u64,
    last_ack: Option<Instant>,
}

impl CongestionController {
    /// Create a controller in its initial slow start regime
    #[must_use]
    pub fn new(config: &CongestionConfig, now: Instant) -> Self {
        let receive_window_cap = config.receive_window_cap.max(1);
        let rtt_history = config.rtt_history.max(1);
        Self {
            algorithm: config.algorithm,
            cwnd: config.initial_window.clamp(0.0, f64::from(receive_window_cap)),
            ssthresh: config.initial_ssthresh.max(1.0),
            in_slow_start: true,
            smoothed_rtt_ms: config.initial_rtt.as_secs_f64() * 1000.0,
            rtt_samples: VecDeque::with_capacity(rtt_history),
            rtt_history,
            receive_window_cap,
            initial_window: config.initial_window,
            initial_ssthresh: config.initial_ssthresh.max(1.0),
            bytes_since_sample: 0,
            last_sample: now,
            throughput_bps: 0.0,
            packets_lost: 0,
            packets_total: 0,
            last_ack: None,
        }
    }

    /// Switch algorithm and restart from the initial regime
    pub fn set_algorithm(&mut self, algorithm: Algorithm) {
        self.algorithm = algorithm;
        self.cwnd = self.clamp(self.initial_window);
        self.ssthresh = self.initial_ssthresh;
        self.in_slow_start = true;
    }

    /// A data packet of `bytes` was emitted: consume one window slot
    pub fn on_data_sent(&mut self, bytes: usize, now: Instant) {
        self.packets_total += 1;
        self.bytes_since_sample += bytes as u64;
        self.cwnd = (self.cwnd - 1.0).max(0.0);
        self.refresh_throughput(now);
    }

    /// An acknowledgement arrived carrying an RTT sample
    pub fn on_ack_received(&mut self, now: Instant, rtt: Duration) {
        self.rtt_samples.push_back(rtt.as_secs_f64() * 1000.0);
        while self.rtt_samples.len() > self.rtt_history {
            self.rtt_samples.pop_front();
        }
        self.smoothed_rtt_ms = self.rtt_samples.iter().sum::<f64>() / self.rtt_samples.len() as f64;
        self.last_ack = Some(now);

        match self.algorithm {
            Algorithm::Reno | Algorithm::Tahoe => {
                if self.in_slow_start {
                    self.cwnd += 1.0;
                    if self.cwnd >= self.ssthresh {
                        self.in_slow_start = false;
                    }
                } else if self.cwnd > 0.0 {
                    self.cwnd += 1.0 / self.cwnd;
                } else {
                    // An empty window grows by a full slot rather than dividing by zero
                    self.cwnd += 1.0;
                }
            }
            Algorithm::Cubic => self.cwnd += 1.0_f64.cbrt(),
            Algorithm::Vegas => self.cwnd += 0.5,
        }
        self.cwnd = self.clamp(self.cwnd);
        self.refresh_throughput(now);
    }

    /// A packet was reported lost: back off according to the algorithm
    pub fn on_packet_loss(&mut self, now: Instant) {
        self.packets_lost += 1;

        match self.algorithm {
            Algorithm::Reno => {
                self.ssthresh = (self.cwnd / 2.0).max(1.0);
                self.cwnd = self.ssthresh;
                self.in_slow_start = false;
            }
            Algorithm::Tahoe => {
                self.ssthresh = (self.cwnd / 2.0).max(1.0);
                self.cwnd = 1.0;
                self.in_slow_start = true;
            }
            Algorithm::Cubic => {
                self.ssthresh = (self.cwnd * 0.7).max(1.0);
                self.cwnd = self.ssthresh;
                self.in_slow_start = false;
            }
            Algorithm::Vegas => {
                self.ssthresh = (self.cwnd * 0.8).max(1.0);
                self.cwnd = self.ssthresh;
                self.in_slow_start = false;
            }
        }
        self.cwnd = self.clamp(self.cwnd);
        self.refresh_throughput(now);
    }

    /// Recompute throughput if more than a second passed since the last sample
    pub fn refresh_throughput(&mut self, now: Instant) {
        let elapsed = now.saturating_duration_since(self.last_sample);
        if elapsed > THROUGHPUT_SAMPLE_INTERVAL {
            self.throughput_bps = self.bytes_since_sample as f64 * 8.0 / elapsed.as_secs_f64();
            self.bytes_since_sample = 0;
            self.last_sample = now;
        }
    }

    /// Whether the raw window has budget for another packet
    #[must_use]
    pub fn can_send(&self) -> bool {
        self.cwnd > 0.0
    }

    /// Window as reported to collaborators, never below one packet
    #[must_use]
    pub fn effective_window(&self) -> f64 {
        self.cwnd.max(1.0)
    }

    /// Raw congestion window
    #[must_use]
    pub fn congestion_window(&self) -> f64 {
        self.cwnd
    }

    /// Slow start threshold
    #[must_use]
    pub fn slow_start_threshold(&self) -> f64 {
        self.ssthresh
    }

    /// Whether the controller is in slow start
    #[must_use]
    pub fn in_slow_start(&self) -> bool {
        self.in_slow_start
    }

    /// Active algorithm
    #[must_use]
    pub fn algorithm(&self) -> Algorithm {
        self.algorithm
    }

    /// Mean of the last RTT samples, milliseconds
    #[must_use]
    pub fn smoothed_rtt_ms(&self) -> f64 {
        self.smoothed_rtt_ms
    }

    /// Smoothed RTT as a duration
    #[must_use]
    pub fn smoothed_rtt(&self) -> Duration {
        Duration::from_secs_f64(self.smoothed_rtt_ms.max(0.0) / 1000.0)
    }

    /// Upper bound for the window
    #[must_use]
    pub fn receive_window_cap(&self) -> u32 {
        self.receive_window_cap
    }

    /// Last throughput sample in bits per second
    #[must_use]
    pub fn throughput_bps(&self) -> f64 {
        self.throughput_bps
    }

    /// Lost packets / sent packets (0 before anything was sent)
    #[must_use]
    pub fn packet_loss_rate(&self) -> f64 {
        if self.packets_total == 0 {
            0.0
        } else {
            self.packets_lost as f64 / self.packets_total as f64
        }
    }

    /// Time of the last acknowledgement, if any
    #[must_use]
    pub fn last_ack(&self) -> Option<Instant> {
        self.last_ack
    }

    /// Snapshot for metrics reporting
    #[must_use]
    pub fn snapshot(&self) -> CongestionSnapshot {
        CongestionSnapshot {
            algorithm: self.algorithm,
            congestion_window: self.effective_window(),
            slow_start_threshold: self.ssthresh,
            in_slow_start: self.in_slow_start,
            smoothed_rtt_ms: self.smoothed_rtt_ms,
            receive_window_cap: self.receive_window_cap,
            throughput_bps: self.throughput_bps,
            packet_loss_rate: self.packet_loss_rate(),
            packets_lost: self.packets_lost,
            packets_total: self.packets_total,
        }
    }

    fn clamp(&self, window: f64) -> f64 {
        window.clamp(0.0, f64::from(self.receive_window_cap))
    }
}
