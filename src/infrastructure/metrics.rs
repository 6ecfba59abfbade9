//! Metrics collection for stream sessions
//!
//! Lock-free counters updated by the session control task, read by anyone
//! holding the shared handle.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

/// Per-session counters
#[derive(Debug)]
pub struct StreamMetrics {
    /// Text frames received from the connection
    frames_received: AtomicU64,
    /// Decoded messages handed to the consumer
    messages_delivered: AtomicU64,
    /// Control / acknowledgement frames dropped
    control_frames: AtomicU64,
    /// Data frames for channels outside the subscription set
    dropped_unsubscribed: AtomicU64,
    /// (Un)subscribe, auth and heartbeat requests queued
    requests_sent: AtomicU64,
    /// Session-level reconnects
    reconnects: AtomicU64,
    start_time: Instant,
}

/// Point-in-time copy of [`StreamMetrics`]
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MetricsSnapshot {
    pub frames_received: u64,
    pub messages_delivered: u64,
    pub control_frames: u64,
    pub dropped_unsubscribed: u64,
    pub requests_sent: u64,
    pub reconnects: u64,
    pub message_rate: f64, // delivered per second
    pub uptime_seconds: u64,
}

impl StreamMetrics {
    pub fn new() -> Self {
        Self {
            frames_received: AtomicU64::new(0),
            messages_delivered: AtomicU64::new(0),
            control_frames: AtomicU64::new(0),
            dropped_unsubscribed: AtomicU64::new(0),
            requests_sent: AtomicU64::new(0),
            reconnects: AtomicU64::new(0),
            start_time: Instant::now(),
        }
    }

    #[inline]
    pub fn record_frame(&self) {
        self.frames_received.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_delivered(&self) {
        self.messages_delivered.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_control(&self) {
        self.control_frames.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_dropped(&self) {
        self.dropped_unsubscribed.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_requests(&self, n: u64) {
        self.requests_sent.fetch_add(n, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_reconnect(&self) {
        self.reconnects.fetch_add(1, Ordering::Relaxed);
    }

    pub fn uptime(&self) -> Duration {
        self.start_time.elapsed()
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        let uptime = self.uptime();
        let delivered = self.messages_delivered.load(Ordering::Relaxed);
        let secs = uptime.as_secs_f64();
        MetricsSnapshot {
            frames_received: self.frames_received.load(Ordering::Relaxed),
            messages_delivered: delivered,
            control_frames: self.control_frames.load(Ordering::Relaxed),
            dropped_unsubscribed: self.dropped_unsubscribed.load(Ordering::Relaxed),
            requests_sent: self.requests_sent.load(Ordering::Relaxed),
            reconnects: self.reconnects.load(Ordering::Relaxed),
            message_rate: if secs > 0.0 { delivered as f64 / secs } else { 0.0 },
            uptime_seconds: uptime.as_secs(),
        }
    }
}

impl Default for StreamMetrics {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn test_counters() {
        let metrics = StreamMetrics::new();
        metrics.record_frame();
        metrics.record_frame();
        metrics.record_control();
        metrics.record_delivered();
        metrics.record_dropped();
        metrics.record_requests(3);
        metrics.record_reconnect();

        let snap = metrics.snapshot();
        assert_eq!(snap.frames_received, 2);
        assert_eq!(snap.control_frames, 1);
        assert_eq!(snap.messages_delivered, 1);
        assert_eq!(snap.dropped_unsubscribed, 1);
        assert_eq!(snap.requests_sent, 3);
        assert_eq!(snap.reconnects, 1);
    }

    #[test]
    fn test_concurrent_updates() {
        let metrics = Arc::new(StreamMetrics::new());
        let handles: Vec<_> = (0..4)
            .map(|_| {
                let m = Arc::clone(&metrics);
                std::thread::spawn(move || {
                    for _ in 0..1000 {
                        m.record_frame();
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }
        assert_eq!(metrics.snapshot().frames_received, 4000);
    }
}
