//! # Telemetry Collector
//!
//! Ingests the notification stream as observed by a receiver and keeps
//! running totals; [`TelemetryCollector::summarize`] derives the run
//! statistics on demand.
//!
//! Loss is inferred from sequence-number gaps, modulo 2^16 so a counter
//! wraparound does not register as 65k lost packets. The inference is
//! only ever a lower bound: if every remaining packet of a run is dropped,
//! the receiver sees silence and silence is indistinguishable from "no
//! test running". That ambiguity is inherent, not a bug to fix here.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::time::{SystemTime, UNIX_EPOCH};

use ringlink_protocol::wire::{decode_frame, DecodedFrame};

// ─── Records ────────────────────────────────────────────────────────────────

/// One observed frame. Appended, never mutated.
#[derive(Debug, Clone, Serialize)]
pub struct TelemetryRecord {
    /// Sequence number, `None` for frames too short to carry one.
    pub seq: Option<u16>,
    /// Sender timestamp (ms, 16-bit wrap), `None` if truncated away.
    pub timestamp: Option<u16>,
    /// Arrival wall clock.
    pub arrival_time: DateTime<Utc>,
    /// Arrival as seconds since the Unix epoch; drives duration and jitter.
    pub arrival_epoch: f64,
    /// Arrival on the monotonic clock, for latency math immune to NTP steps.
    #[serde(skip)]
    pub arrival_mono: quanta::Instant,
    pub payload_len: usize,
    pub raw_len: usize,
}

/// Derived statistics for one measurement run.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TelemetrySummary {
    pub duration_s: f64,
    pub packets_received: u64,
    /// Lower bound — gaps observed between arrivals only.
    pub estimated_packets_lost: u64,
    pub loss_percent: f64,
    pub throughput_kbps: f64,
    pub notification_rate_per_s: f64,
    pub interarrival_ms_median: f64,
    pub interarrival_ms_p95: f64,
}

// ─── Collector ──────────────────────────────────────────────────────────────

/// Running state for one measurement run (one Start…Stop cycle).
#[derive(Debug)]
pub struct TelemetryCollector {
    records: Vec<TelemetryRecord>,
    clock: quanta::Clock,
    first_epoch: Option<f64>,
    last_epoch: Option<f64>,
    prev_seq: Option<u16>,
    valid_packets: u64,
    lost_packets: u64,
    total_bytes: u64,
}

impl Default for TelemetryCollector {
    fn default() -> Self {
        Self::new()
    }
}

impl TelemetryCollector {
    pub fn new() -> Self {
        TelemetryCollector {
            records: Vec::new(),
            clock: quanta::Clock::new(),
            first_epoch: None,
            last_epoch: None,
            prev_seq: None,
            valid_packets: 0,
            lost_packets: 0,
            total_bytes: 0,
        }
    }

    /// Decode and record one arriving frame, stamped with the current time.
    pub fn ingest(&mut self, data: &[u8]) {
        let decoded = decode_frame(data);
        let epoch = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_secs_f64();
        let mono = self.clock.now();
        self.ingest_at(decoded, Utc::now(), epoch, mono);
    }

    /// Record a decoded frame with an explicit arrival time. The seam the
    /// ingest path and the tests share.
    pub fn ingest_at(
        &mut self,
        decoded: DecodedFrame,
        arrival_time: DateTime<Utc>,
        arrival_epoch: f64,
        arrival_mono: quanta::Instant,
    ) {
        self.first_epoch.get_or_insert(arrival_epoch);
        self.last_epoch = Some(arrival_epoch);
        self.total_bytes += decoded.raw_len as u64;

        // Frames without a sequence number are recorded but can't take part
        // in gap accounting.
        if let Some(seq) = decoded.seq {
            if let Some(prev) = self.prev_seq {
                let gap = seq.wrapping_sub(prev);
                if gap > 1 {
                    self.lost_packets += (gap - 1) as u64;
                }
            }
            self.prev_seq = Some(seq);
            self.valid_packets += 1;
        }

        self.records.push(TelemetryRecord {
            seq: decoded.seq,
            timestamp: decoded.timestamp,
            arrival_time,
            arrival_epoch,
            arrival_mono,
            payload_len: decoded.payload_len,
            raw_len: decoded.raw_len,
        });
    }

    pub fn packet_count(&self) -> usize {
        self.records.len()
    }

    pub fn records(&self) -> &[TelemetryRecord] {
        &self.records
    }

    pub fn into_records(self) -> Vec<TelemetryRecord> {
        self.records
    }

    /// Derive the run summary. Pure — calling it twice on an unmodified
    /// collector yields identical results.
    pub fn summarize(&self) -> TelemetrySummary {
        let duration_s = match (self.first_epoch, self.last_epoch) {
            (Some(first), Some(last)) if last > first => last - first,
            _ => 0.0,
        };

        let (throughput_kbps, notification_rate_per_s) = if duration_s > 0.0 {
            (
                (self.total_bytes as f64 * 8.0 / 1000.0) / duration_s,
                self.records.len() as f64 / duration_s,
            )
        } else {
            (0.0, 0.0)
        };

        let accounted = self.valid_packets + self.lost_packets;
        let loss_percent = if accounted > 0 {
            self.lost_packets as f64 / accounted as f64 * 100.0
        } else {
            0.0
        };

        // Inter-arrival deltas, out-of-order (negative) arrivals excluded.
        let mut deltas_ms: Vec<f64> = self
            .records
            .windows(2)
            .map(|pair| (pair[1].arrival_epoch - pair[0].arrival_epoch) * 1000.0)
            .filter(|delta| *delta >= 0.0)
            .collect();
        deltas_ms.sort_by(|a, b| a.total_cmp(b));

        TelemetrySummary {
            duration_s,
            packets_received: self.records.len() as u64,
            estimated_packets_lost: self.lost_packets,
            loss_percent,
            throughput_kbps,
            notification_rate_per_s,
            interarrival_ms_median: nearest_rank(&deltas_ms, 0.50),
            interarrival_ms_p95: nearest_rank(&deltas_ms, 0.95),
        }
    }
}

/// Nearest-rank percentile of a sorted sample; 0 for an empty one.
fn nearest_rank(sorted: &[f64], pct: f64) -> f64 {
    if sorted.is_empty() {
        return 0.0;
    }
    let rank = (pct * sorted.len() as f64).ceil() as usize;
    sorted[rank.clamp(1, sorted.len()) - 1]
}
