//! # Measurement Workflows
//!
//! Orchestration of one measurement run over any [`RingLink`]: arm the
//! notification stream, probe optional capabilities, drive the
//! Reset → Start → collect → Stop command cycle, and hand back a report.
//!
//! Persistence (CSV/JSON writers) and sweep orchestration live outside
//! this crate; the report exposes the summary and per-frame records they
//! consume.

use std::time::Duration;

use anyhow::Context as _;
use serde::Serialize;
use tracing::{debug, info};

use ringlink_protocol::transport::{Capability, PhyRequest, RingLink};
use ringlink_protocol::wire::{encode_command, Command, CommandSet};

use crate::collector::{TelemetryCollector, TelemetryRecord, TelemetrySummary};
use crate::stream::NotificationStream;

// ─── Parameters ─────────────────────────────────────────────────────────────

/// Knobs for one throughput run.
#[derive(Debug, Clone)]
pub struct RunParams {
    /// Requested frame size; the device clamps it to its own range.
    pub payload_bytes: u8,
    /// Packet budget sent with Start (0 = unbounded, bounded by `duration`).
    pub packet_count: u16,
    /// Wall-clock cap on the collection phase (zero = budget only).
    pub duration: Duration,
    /// MTU to request before the run (0 skips the probe).
    pub mtu_request: u16,
    /// PHY preference to request before the run.
    pub phy_request: PhyRequest,
    /// Opcode set the device answers to.
    pub commands: CommandSet,
    /// Settle delay after Reset before Start.
    pub settle: Duration,
    /// Per-wait timeout while collecting.
    pub wait_timeout: Duration,
    /// Consecutive empty waits after which an unbounded run gives up.
    pub max_idle_waits: u32,
}

impl Default for RunParams {
    fn default() -> Self {
        RunParams {
            payload_bytes: 120,
            packet_count: 0,
            duration: Duration::from_secs(10),
            mtu_request: 247,
            phy_request: PhyRequest::Auto,
            commands: CommandSet::default(),
            settle: Duration::from_millis(100),
            wait_timeout: Duration::from_millis(100),
            max_idle_waits: 50,
        }
    }
}

/// Everything one throughput run produced.
#[derive(Debug, Serialize)]
pub struct RunReport {
    pub summary: TelemetrySummary,
    pub records: Vec<TelemetryRecord>,
    pub mtu_result: Capability<u16>,
    pub phy_result: Capability<PhyRequest>,
    /// Which connection attempt carried this run (from the retry coordinator).
    pub connect_attempts: u32,
}

// ─── Throughput Run ─────────────────────────────────────────────────────────

/// One Start…Stop throughput measurement.
pub struct ThroughputRun {
    params: RunParams,
}

impl ThroughputRun {
    pub fn new(params: RunParams) -> Self {
        ThroughputRun { params }
    }

    pub async fn run<L: RingLink>(
        &self,
        link: &mut L,
        connect_attempts: u32,
    ) -> anyhow::Result<RunReport> {
        let p = &self.params;

        let rx = link.subscribe().await.context("enabling notifications")?;
        let mut stream = NotificationStream::from_receiver(rx);

        let mtu_result = if p.mtu_request > 0 {
            link.request_mtu(p.mtu_request).await
        } else {
            Capability::Skipped
        };
        let phy_result = link.request_phy(p.phy_request).await;
        debug!(?mtu_result, ?phy_result, "capability probes done");

        link.write_command(encode_command(Command::Reset, &p.commands))
            .await
            .context("sending reset")?;
        tokio::time::sleep(p.settle).await;

        link.write_command(encode_command(
            Command::Start {
                payload_bytes: p.payload_bytes,
                packet_count: p.packet_count,
            },
            &p.commands,
        ))
        .await
        .context("sending start")?;

        let mut collector = TelemetryCollector::new();
        let deadline = (p.duration > Duration::ZERO)
            .then(|| tokio::time::Instant::now() + p.duration);
        let mut idle_waits = 0u32;

        loop {
            if p.packet_count > 0 && collector.packet_count() >= p.packet_count as usize {
                break;
            }
            if let Some(deadline) = deadline {
                if tokio::time::Instant::now() >= deadline {
                    break;
                }
            }
            match stream.recv_timeout(p.wait_timeout).await {
                Some(frame) => {
                    collector.ingest(&frame);
                    idle_waits = 0;
                }
                None => {
                    idle_waits += 1;
                    if idle_waits >= p.max_idle_waits {
                        info!(idle_waits, "stream went quiet, ending collection");
                        break;
                    }
                }
            }
        }

        link.write_command(encode_command(Command::Stop, &p.commands))
            .await
            .context("sending stop")?;

        // Straggler frames already queued still belong to the run.
        while let Some(frame) = stream.try_recv() {
            collector.ingest(&frame);
        }
        link.unsubscribe().await.context("disabling notifications")?;

        let summary = collector.summarize();
        info!(
            packets = summary.packets_received,
            lost = summary.estimated_packets_lost,
            kbps = summary.throughput_kbps,
            "throughput run finished"
        );
        Ok(RunReport {
            summary,
            records: collector.into_records(),
            mtu_result,
            phy_result,
            connect_attempts,
        })
    }
}

// ─── Latency Probe ──────────────────────────────────────────────────────────

/// One latency sample: Start(count=1) to first notification.
#[derive(Debug, Clone, Serialize)]
pub struct LatencySample {
    pub iteration: u32,
    /// `None` records a timed-out iteration.
    pub latency_s: Option<f64>,
    pub seq: Option<u16>,
}

/// Aggregate over all latency iterations.
#[derive(Debug, Clone, Serialize)]
pub struct LatencySummary {
    pub samples: u32,
    pub timeouts: u32,
    pub avg_latency_s: Option<f64>,
    pub min_latency_s: Option<f64>,
    pub max_latency_s: Option<f64>,
}

/// Repeated write-to-notify latency measurement.
pub struct LatencyProbe {
    pub iterations: u32,
    pub timeout: Duration,
    pub inter_delay: Duration,
    pub payload_bytes: u8,
    pub settle: Duration,
    pub commands: CommandSet,
}

impl Default for LatencyProbe {
    fn default() -> Self {
        LatencyProbe {
            iterations: 10,
            timeout: Duration::from_secs(2),
            inter_delay: Duration::from_millis(100),
            payload_bytes: 20,
            settle: Duration::from_millis(100),
            commands: CommandSet::default(),
        }
    }
}

impl LatencyProbe {
    pub async fn run<L: RingLink>(
        &self,
        link: &mut L,
    ) -> anyhow::Result<(Vec<LatencySample>, LatencySummary)> {
        let rx = link.subscribe().await.context("enabling notifications")?;
        let mut stream = NotificationStream::from_receiver(rx);
        let mut samples = Vec::with_capacity(self.iterations as usize);

        for iteration in 1..=self.iterations {
            stream.clear();
            link.write_command(encode_command(Command::Reset, &self.commands))
                .await
                .context("sending reset")?;
            tokio::time::sleep(self.settle).await;

            let started = tokio::time::Instant::now();
            link.write_command(encode_command(
                Command::Start {
                    payload_bytes: self.payload_bytes,
                    packet_count: 1,
                },
                &self.commands,
            ))
            .await
            .context("sending start")?;

            let sample = match stream.recv_timeout(self.timeout).await {
                Some(frame) => LatencySample {
                    iteration,
                    latency_s: Some(started.elapsed().as_secs_f64()),
                    seq: ringlink_protocol::wire::decode_frame(&frame).seq,
                },
                None => LatencySample {
                    iteration,
                    latency_s: None,
                    seq: None,
                },
            };
            debug!(iteration, latency_s = ?sample.latency_s, "latency iteration");
            samples.push(sample);

            link.write_command(encode_command(Command::Stop, &self.commands))
                .await
                .context("sending stop")?;
            tokio::time::sleep(self.inter_delay).await;
        }

        link.unsubscribe().await.context("disabling notifications")?;
        let summary = summarize_latency(&samples);
        Ok((samples, summary))
    }
}

fn summarize_latency(samples: &[LatencySample]) -> LatencySummary {
    let valid: Vec<f64> = samples.iter().filter_map(|s| s.latency_s).collect();
    let timeouts = samples.len() as u32 - valid.len() as u32;
    if valid.is_empty() {
        return LatencySummary {
            samples: samples.len() as u32,
            timeouts,
            avg_latency_s: None,
            min_latency_s: None,
            max_latency_s: None,
        };
    }
    let sum: f64 = valid.iter().sum();
    LatencySummary {
        samples: samples.len() as u32,
        timeouts,
        avg_latency_s: Some(sum / valid.len() as f64),
        min_latency_s: valid.iter().copied().reduce(f64::min),
        max_latency_s: valid.iter().copied().reduce(f64::max),
    }
}
