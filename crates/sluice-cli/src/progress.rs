//! Transfer progress and metrics rendering.

use indicatif::{ProgressBar, ProgressStyle};
use sluice_core::{CongestionSnapshot, SessionSnapshot};
use std::time::Duration;

const BAR_TEMPLATE: &str = "{msg}\n{spinner:.green} [{elapsed_precise}] [{wide_bar:.cyan/blue}] {bytes}/{total_bytes} ({bytes_per_sec}, {eta})";

/// Progress bar for one transfer, fed from session snapshots
pub struct TransferProgress {
    bar: ProgressBar,
    filename: String,
}

impl TransferProgress {
    /// Create a new progress tracker
    #[must_use]
    pub fn new(total_bytes: u64, filename: &str) -> Self {
        let bar = ProgressBar::new(total_bytes);
        let style = ProgressStyle::default_bar()
            .template(BAR_TEMPLATE)
            .unwrap_or_else(|_| ProgressStyle::default_bar())
            .progress_chars("#>-");
        bar.set_style(style);
        bar.set_message(format!("Transferring: {filename}"));

        Self {
            bar,
            filename: filename.to_string(),
        }
    }

    /// Move the bar to the snapshot's byte count and show the window state
    pub fn update(&self, snapshot: &SessionSnapshot) {
        self.bar.set_position(snapshot.transfer.transferred);
        self.bar.set_message(format!(
            "{} | {}",
            self.filename,
            congestion_summary(&snapshot.congestion)
        ));
    }

    /// Finish with custom message
    pub fn finish_with_message(&self, msg: String) {
        self.bar.finish_with_message(msg);
    }

    /// Abandon the progress bar (for errors)
    pub fn abandon(&self) {
        self.bar.abandon();
    }
}

/// One-line rendering of a congestion snapshot
#[must_use]
pub fn congestion_summary(c: &CongestionSnapshot) -> String {
    format!(
        "{} cwnd {:.2} ssthresh {:.2}{} rtt {:.1} ms | {} | loss {:.2}%",
        c.algorithm,
        c.congestion_window,
        c.slow_start_threshold,
        if c.in_slow_start { " (slow start)" } else { "" },
        c.smoothed_rtt_ms,
        format_bitrate(c.throughput_bps),
        c.packet_loss_rate * 100.0,
    )
}

/// Metrics line printed by `sluice serve` for each session
#[must_use]
pub fn session_line(snapshot: &SessionSnapshot) -> String {
    let mut line = format!(
        "{} | {} | queue {}",
        snapshot.label,
        congestion_summary(&snapshot.congestion),
        snapshot.queue_depth
    );
    let transfer = &snapshot.transfer;
    if !transfer.filename.is_empty() {
        line.push_str(&format!(
            " | {} {:?} {:.0}%",
            transfer.filename,
            transfer.status,
            transfer.progress * 100.0
        ));
    }
    line
}

/// Format bytes in human-readable format
#[must_use]
pub fn format_bytes(bytes: u64) -> String {
    const UNITS: &[&str] = &["B", "KB", "MB", "GB", "TB"];
    let mut size = bytes as f64;
    let mut unit = 0;

    while size >= 1024.0 && unit < UNITS.len() - 1 {
        size /= 1024.0;
        unit += 1;
    }

    format!("{size:.2} {}", UNITS[unit])
}

/// Format a bit rate with decimal prefixes
#[must_use]
pub fn format_bitrate(bits_per_sec: f64) -> String {
    const UNITS: &[&str] = &["bps", "Kbps", "Mbps", "Gbps"];
    let mut rate = bits_per_sec.max(0.0);
    let mut unit = 0;

    while rate >= 1000.0 && unit < UNITS.len() - 1 {
        rate /= 1000.0;
        unit += 1;
    }

    format!("{rate:.2} {}", UNITS[unit])
}

/// Format duration in human-readable format
#[must_use]
pub fn format_duration(duration: Duration) -> String {
    let secs = duration.as_secs();

    if secs < 60 {
        format!("{:.1}s", duration.as_secs_f64())
    } else if secs < 3600 {
        format!("{}m {}s", secs / 60, secs % 60)
    } else {
        format!("{}h {}m", secs / 3600, (secs % 3600) / 60)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sluice_core::{Algorithm, SessionId, TransferSnapshot};

    fn snapshot(filename: &str) -> SessionSnapshot {
        SessionSnapshot {
            id: SessionId(2),
            label: "Client-1 (127.0.0.1:50000)".to_string(),
            congestion: CongestionSnapshot {
                algorithm: Algorithm::Cubic,
                congestion_window: 4.0,
                slow_start_threshold: 64.0,
                in_slow_start: true,
                smoothed_rtt_ms: 12.5,
                receive_window_cap: 65535,
                throughput_bps: 2_500_000.0,
                packet_loss_rate: 0.05,
                packets_lost: 1,
                packets_total: 20,
            },
            queue_depth: 3,
            transfer: TransferSnapshot {
                filename: filename.to_string(),
                ..TransferSnapshot::default()
            },
        }
    }

    #[test]
    fn test_format_bytes() {
        assert_eq!(format_bytes(0), "0.00 B");
        assert_eq!(format_bytes(512), "512.00 B");
        assert_eq!(format_bytes(1024), "1.00 KB");
        assert_eq!(format_bytes(1536), "1.50 KB");
        assert_eq!(format_bytes(1024 * 1024), "1.00 MB");
        assert_eq!(format_bytes(1024 * 1024 * 1024), "1.00 GB");
    }

    #[test]
    fn test_format_bitrate() {
        assert_eq!(format_bitrate(0.0), "0.00 bps");
        assert_eq!(format_bitrate(999.0), "999.00 bps");
        assert_eq!(format_bitrate(1500.0), "1.50 Kbps");
        assert_eq!(format_bitrate(2_500_000.0), "2.50 Mbps");
    }

    #[test]
    fn test_format_duration() {
        assert_eq!(format_duration(Duration::from_millis(2500)), "2.5s");
        assert_eq!(format_duration(Duration::from_secs(90)), "1m 30s");
        assert_eq!(format_duration(Duration::from_secs(3661)), "1h 1m");
    }

    #[test]
    fn test_congestion_summary() {
        let line = congestion_summary(&snapshot("").congestion);
        assert!(line.contains("cwnd 4.00"));
        assert!(line.contains("(slow start)"));
        assert!(line.contains("rtt 12.5 ms"));
        assert!(line.contains("2.50 Mbps"));
        assert!(line.contains("loss 5.00%"));
    }

    #[test]
    fn test_session_line_shows_transfer_only_when_named() {
        assert!(session_line(&snapshot("")).ends_with("queue 3"));
        assert!(session_line(&snapshot("a.txt")).contains("| a.txt Idle 0%"));
    }
}
