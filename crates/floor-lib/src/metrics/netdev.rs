//! Network throughput from `/proc/net/dev`
//!
//! The kernel exposes cumulative byte counters per interface; throughput is
//! the counter delta between two reads divided by the time between them.

use super::{MetricsError, MetricsResult, NetworkSource};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::path::{Path, PathBuf};
use tokio::time::Instant;

pub const PROC_NET_DEV: &str = "/proc/net/dev";

/// Combined receive and transmit byte counters for `interface`
///
/// Lines look like `  eth0: 1234 10 0 0 0 0 0 0 5678 ...`; receive bytes
/// are the first counter and transmit bytes the ninth.
pub fn parse_interface_bytes(contents: &str, interface: &str) -> Option<u64> {
    contents.lines().find_map(|line| {
        let (name, counters) = line.split_once(':')?;
        if name.trim() != interface {
            return None;
        }

        let fields: Vec<&str> = counters.split_whitespace().collect();
        if fields.len() < 9 {
            return None;
        }

        let rx: u64 = fields[0].parse().ok()?;
        let tx: u64 = fields[8].parse().ok()?;
        Some(rx.saturating_add(tx))
    })
}

#[derive(Debug, Clone, Copy)]
struct CounterSample {
    total_bytes: u64,
    at: Instant,
}

/// Throughput source reading a procfs-style interface statistics file
pub struct ProcNetDevSource {
    path: PathBuf,
    interface: String,
    previous: Mutex<Option<CounterSample>>,
}

impl ProcNetDevSource {
    pub fn new(interface: impl Into<String>) -> Self {
        Self::with_path(PROC_NET_DEV, interface)
    }

    pub fn with_path(path: impl AsRef<Path>, interface: impl Into<String>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            interface: interface.into(),
            previous: Mutex::new(None),
        }
    }

    pub fn interface(&self) -> &str {
        &self.interface
    }

    /// Record a counter reading and return Mbps since the previous one
    ///
    /// The first reading only establishes the baseline and reports 0. A
    /// counter that went backwards (interface reset) also reports 0.
    fn record(&self, total_bytes: u64, at: Instant) -> f64 {
        let mut previous = self.previous.lock();
        let rate = match *previous {
            Some(prev) if total_bytes >= prev.total_bytes => {
                let elapsed = at.saturating_duration_since(prev.at).as_secs_f64();
                if elapsed > 0.0 {
                    (total_bytes - prev.total_bytes) as f64 * 8.0 / 1_000_000.0 / elapsed
                } else {
                    0.0
                }
            }
            _ => 0.0,
        };

        *previous = Some(CounterSample { total_bytes, at });
        rate
    }
}

#[async_trait]
impl NetworkSource for ProcNetDevSource {
    async fn throughput_mbps(&self) -> MetricsResult<f64> {
        let contents = tokio::fs::read_to_string(&self.path).await?;
        let total = parse_interface_bytes(&contents, &self.interface)
            .ok_or_else(|| MetricsError::InterfaceNotFound(self.interface.clone()))?;

        Ok(self.record(total, Instant::now()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tempfile::NamedTempFile;

    const SAMPLE: &str = "\
Inter-|   Receive                                                |  Transmit
 face |bytes    packets errs drop fifo frame compressed multicast|bytes    packets errs drop fifo colls carrier compressed
    lo: 1000       10    0    0    0     0          0         0     1000      10    0    0    0     0       0          0
  eth0: 5000000    400    0    0    0     0          0         0  3000000     300    0    0    0     0       0          0
veth0abc: 7       1    0    0    0     0          0         0        9       1    0    0    0     0       0          0
";

    #[test]
    fn test_parse_interface_bytes() {
        assert_eq!(parse_interface_bytes(SAMPLE, "eth0"), Some(8_000_000));
        assert_eq!(parse_interface_bytes(SAMPLE, "lo"), Some(2000));
    }

    #[test]
    fn test_parse_matches_exact_interface_name() {
        assert_eq!(parse_interface_bytes(SAMPLE, "veth0abc"), Some(16));
        assert_eq!(parse_interface_bytes(SAMPLE, "eth"), None);
        assert_eq!(parse_interface_bytes(SAMPLE, "ens5"), None);
    }

    #[test]
    fn test_parse_counter_without_space_after_colon() {
        let line = "eth1:12345 1 0 0 0 0 0 0 55 1 0 0 0 0 0 0";
        assert_eq!(parse_interface_bytes(line, "eth1"), Some(12_400));
    }

    #[test]
    fn test_rate_from_counter_delta() {
        let source = ProcNetDevSource::with_path("/nonexistent", "eth0");
        let t0 = Instant::now();

        assert_eq!(source.record(0, t0), 0.0);
        // 2.5 MB over 2s is 10 Mbps
        let rate = source.record(2_500_000, t0 + Duration::from_secs(2));
        assert!((rate - 10.0).abs() < 1e-9);
    }

    #[test]
    fn test_counter_reset_reports_zero() {
        let source = ProcNetDevSource::with_path("/nonexistent", "eth0");
        let t0 = Instant::now();

        source.record(10_000, t0);
        assert_eq!(source.record(500, t0 + Duration::from_secs(1)), 0.0);
    }

    #[tokio::test]
    async fn test_reads_file() {
        let file = NamedTempFile::new().unwrap();
        std::fs::write(file.path(), SAMPLE).unwrap();
        let source = ProcNetDevSource::with_path(file.path(), "eth0");

        assert_eq!(source.throughput_mbps().await.unwrap(), 0.0);
    }

    #[tokio::test]
    async fn test_missing_interface_is_error() {
        let file = NamedTempFile::new().unwrap();
        std::fs::write(file.path(), SAMPLE).unwrap();
        let source = ProcNetDevSource::with_path(file.path(), "wlan0");

        assert!(matches!(
            source.throughput_mbps().await,
            Err(MetricsError::InterfaceNotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_missing_file_is_io_error() {
        let source = ProcNetDevSource::with_path("/nonexistent/net/dev", "eth0");
        assert!(matches!(
            source.throughput_mbps().await,
            Err(MetricsError::Io(_))
        ));
    }
}
