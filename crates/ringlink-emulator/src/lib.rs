//! # ringlink-emulator
//!
//! An emulated smart-ring peripheral for exercising the notification link
//! without hardware. A [`session::LinkSession`] answers the Start/Stop/Reset
//! command protocol and paces a stream of framed notifications; every tick
//! consults a [`impairment::ChannelModel`] that degrades the stream the way
//! a real channel would — random and burst loss, jitter, latency spikes,
//! RSSI-linked loss, malformed frames, simulated disconnects, backpressure.
//!
//! ## Crate structure
//!
//! - [`impairment`] — per-tick channel degradation decisions, replay profiles
//! - [`profiles`] — prebaked realism presets (`typical`, `pocket`, ...)
//! - [`session`] — Start/Stop/Reset state machine and deterministic tick
//! - [`loopback`] — in-process `RingLink` backed by a session, for tests

pub mod impairment;
pub mod loopback;
pub mod profiles;
pub mod session;
