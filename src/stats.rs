use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::Duration;

/// Number of recent request latencies kept for the average and quantiles
const LATENCY_WINDOW: usize = 1024;

/// Counters for a single connector.
///
/// All counters are cumulative for the lifetime of the process; restarting a
/// connector bumps `connects`/`disconnects` but never resets message counts.
pub struct Stats {
    name: String,
    id: String,
    inner: Mutex<StatsInner>,
}

#[derive(Default)]
struct StatsInner {
    connected: bool,
    connects: u64,
    disconnects: u64,
    messages_in: u64,
    messages_out: u64,
    bytes_in: u64,
    bytes_out: u64,
    request_count: u64,
    latencies: VecDeque<Duration>,
}

impl Stats {
    pub fn new(name: impl Into<String>, id: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            id: id.into(),
            inner: Mutex::new(StatsInner::default()),
        }
    }

    fn with<R>(&self, f: impl FnOnce(&mut StatsInner) -> R) -> R {
        // Counters stay usable even if a holder panicked mid-update
        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        f(&mut inner)
    }

    /// Record a message that was received but not forwarded
    pub fn add_message_in(&self, bytes: u64) {
        self.with(|s| {
            s.messages_in += 1;
            s.bytes_in += bytes;
        });
    }

    /// Record a message received, forwarded and acknowledged
    pub fn add_request(&self, bytes_in: u64, bytes_out: u64, latency: Duration) {
        self.with(|s| {
            s.messages_in += 1;
            s.messages_out += 1;
            s.bytes_in += bytes_in;
            s.bytes_out += bytes_out;
            s.request_count += 1;
            if s.latencies.len() == LATENCY_WINDOW {
                s.latencies.pop_front();
            }
            s.latencies.push_back(latency);
        });
    }

    pub fn add_connect(&self) {
        self.with(|s| {
            s.connects += 1;
            s.connected = true;
        });
    }

    pub fn add_disconnect(&self) {
        self.with(|s| {
            s.disconnects += 1;
            s.connected = false;
        });
    }

    pub fn snapshot(&self) -> ConnectorStats {
        self.with(|s| {
            let mut sorted: Vec<Duration> = s.latencies.iter().copied().collect();
            sorted.sort_unstable();
            let average = if sorted.is_empty() {
                0.0
            } else {
                sorted.iter().map(|d| micros(*d)).sum::<f64>() / sorted.len() as f64
            };

            ConnectorStats {
                name: self.name.clone(),
                id: self.id.clone(),
                connected: s.connected,
                connects: s.connects,
                disconnects: s.disconnects,
                messages_in: s.messages_in,
                messages_out: s.messages_out,
                bytes_in: s.bytes_in,
                bytes_out: s.bytes_out,
                request_count: s.request_count,
                moving_average_us: average,
                quintile_50_us: quantile(&sorted, 0.50),
                quintile_75_us: quantile(&sorted, 0.75),
                quintile_90_us: quantile(&sorted, 0.90),
                quintile_95_us: quantile(&sorted, 0.95),
            }
        })
    }
}

fn micros(d: Duration) -> f64 {
    d.as_secs_f64() * 1_000_000.0
}

/// Nearest-rank quantile over an ascending slice
fn quantile(sorted: &[Duration], q: f64) -> f64 {
    if sorted.is_empty() {
        return 0.0;
    }
    let rank = (q * sorted.len() as f64 - 1e-9).ceil() as usize;
    let index = rank.clamp(1, sorted.len()) - 1;
    micros(sorted[index])
}

/// Read-only copy of a connector's counters
#[derive(Debug, Clone, Serialize)]
pub struct ConnectorStats {
    pub name: String,
    pub id: String,
    pub connected: bool,
    pub connects: u64,
    pub disconnects: u64,
    pub messages_in: u64,
    pub messages_out: u64,
    pub bytes_in: u64,
    pub bytes_out: u64,
    pub request_count: u64,
    /// Latencies in microseconds over the most recent requests
    pub moving_average_us: f64,
    pub quintile_50_us: f64,
    pub quintile_75_us: f64,
    pub quintile_90_us: f64,
    pub quintile_95_us: f64,
}

/// Bridge-wide report served by the monitoring endpoint
#[derive(Debug, Clone, Serialize)]
pub struct BridgeStats {
    pub start_time: DateTime<Utc>,
    pub server_time: DateTime<Utc>,
    pub uptime_seconds: i64,
    pub connections: Vec<ConnectorStats>,
}

impl BridgeStats {
    pub fn new(start_time: DateTime<Utc>, connections: Vec<ConnectorStats>) -> Self {
        let now = Utc::now();
        Self {
            start_time,
            server_time: now,
            uptime_seconds: (now - start_time).num_seconds(),
            connections,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn test_request_counts_in_and_out() {
        let stats = Stats::new("Stream:a to Stream:b", "id-1");
        stats.add_request(10, 10, Duration::from_millis(2));
        stats.add_message_in(5);

        let snap = stats.snapshot();
        assert_eq!(snap.messages_in, 2);
        assert_eq!(snap.messages_out, 1);
        assert_eq!(snap.request_count, 1);
        assert_eq!(snap.bytes_in, 15);
        assert_eq!(snap.bytes_out, 10);
        assert_eq!(snap.name, "Stream:a to Stream:b");
    }

    #[test]
    fn test_connect_disconnect_keep_message_counts() {
        let stats = Stats::new("c", "id");
        stats.add_connect();
        stats.add_request(1, 1, Duration::from_micros(10));
        stats.add_disconnect();
        stats.add_connect();

        let snap = stats.snapshot();
        assert!(snap.connected);
        assert_eq!(snap.connects, 2);
        assert_eq!(snap.disconnects, 1);
        assert_eq!(snap.request_count, 1);
    }

    #[test]
    fn test_latency_quantiles() {
        let stats = Stats::new("c", "id");
        for ms in 1..=100 {
            stats.add_request(1, 1, Duration::from_millis(ms));
        }

        let snap = stats.snapshot();
        assert_eq!(snap.quintile_50_us, 50_000.0);
        assert_eq!(snap.quintile_90_us, 90_000.0);
        assert_eq!(snap.quintile_95_us, 95_000.0);
        assert!((snap.moving_average_us - 50_500.0).abs() < 1.0);
    }

    #[test]
    fn test_empty_snapshot() {
        let snap = Stats::new("c", "id").snapshot();
        assert_eq!(snap.moving_average_us, 0.0);
        assert_eq!(snap.quintile_50_us, 0.0);
        assert!(!snap.connected);
    }

    #[test]
    fn test_latency_window_is_bounded() {
        let stats = Stats::new("c", "id");
        for _ in 0..(LATENCY_WINDOW + 10) {
            stats.add_request(1, 1, Duration::from_millis(1));
        }
        assert_eq!(stats.with(|s| s.latencies.len()), LATENCY_WINDOW);
        assert_eq!(stats.snapshot().request_count, (LATENCY_WINDOW + 10) as u64);
    }

    #[test]
    fn test_bridge_stats_json() {
        let stats = Stats::new("NATS:a to Stream:b", "route");
        stats.add_connect();
        let report = BridgeStats::new(Utc::now(), vec![stats.snapshot()]);

        let json = serde_json::to_value(&report).unwrap();
        assert!(json["uptime_seconds"].as_i64().unwrap() >= 0);
        assert_eq!(json["connections"][0]["id"], "route");
        assert_eq!(json["connections"][0]["connects"], 1);
        assert_eq!(json["connections"][0]["connected"], true);
        assert!(json["connections"][0]["quintile_95_us"].is_number());
    }

    #[test]
    fn test_concurrent_updates() {
        let stats = Arc::new(Stats::new("c", "id"));
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let stats = Arc::clone(&stats);
                thread::spawn(move || {
                    for _ in 0..1000 {
                        stats.add_request(2, 2, Duration::from_micros(5));
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }

        let snap = stats.snapshot();
        assert_eq!(snap.request_count, 8000);
        assert_eq!(snap.bytes_in, 16000);
    }
}
