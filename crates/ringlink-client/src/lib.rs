//! # ringlink-client
//!
//! Receiver side of the notification link. The collector reconstructs
//! throughput, loss, and inter-arrival jitter purely from the frames that
//! arrive — it never sees the sender's ground truth, so its loss figure is
//! a lower bound by construction.
//!
//! ## Crate structure
//!
//! - [`collector`] — per-frame telemetry records and derived run summary
//! - [`stream`] — FIFO hand-off from the transport's delivery context
//! - [`runner`] — throughput and latency measurement workflows

pub mod collector;
pub mod runner;
pub mod stream;
