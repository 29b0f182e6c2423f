//! # ringlink-protocol
//!
//! Wire format and transport boundary for the smart-ring notification link.
//!
//! The link exercises a device's notification path: a peripheral streams
//! sequenced, timestamped frames at a controlled cadence, and a client
//! reconstructs throughput/loss/jitter purely from what arrives.
//!
//! ## Crate structure
//!
//! - [`wire`] — Frame and command frame encode/decode
//! - [`transport`] — `RingLink` boundary trait, capability negotiation results
//! - [`retry`] — Bounded-retry connection establishment policy

pub mod retry;
pub mod transport;
pub mod wire;
