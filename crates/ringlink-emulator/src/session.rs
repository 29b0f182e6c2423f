//! # Link Session State Machine
//!
//! Owns the command state (Idle/Streaming), the subscription flag, the
//! sequence counter, and the packet budget for one emulated link.
//!
//! ```text
//!   Idle ──Start──▶ Streaming ──Stop/Reset/budget/disconnect──▶ Idle
//! ```
//!
//! The original device paced itself with a timer that re-armed from inside
//! its own callback. Here each [`LinkSession::tick`] instead *returns* what
//! should happen next — emit-or-not, pause-or-not, re-arm delay or stop —
//! so the whole sequence is deterministic and unit-testable without a
//! timer. [`run_stream`] is the thin async driver that sleeps and loops.

use std::time::{Duration, SystemTime, UNIX_EPOCH};

use bytes::Bytes;
use tokio::sync::mpsc;
use tracing::{info, warn};

use ringlink_protocol::wire::{
    self, Command, CommandSet, MAX_PAYLOAD_BYTES, MIN_PAYLOAD_BYTES,
};

use crate::impairment::{ChannelModel, DisconnectCut};

// ─── Configuration ──────────────────────────────────────────────────────────

/// Static session parameters.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Payload size used when a Start frame omits its length byte.
    pub default_payload: u8,
    /// Base pacing interval between notifications.
    pub base_interval_ms: u64,
    /// Opcodes this session answers to.
    pub commands: CommandSet,
}

impl Default for SessionConfig {
    fn default() -> Self {
        SessionConfig {
            default_payload: 120,
            base_interval_ms: 25, // 40 Hz
            commands: CommandSet::default(),
        }
    }
}

impl SessionConfig {
    /// Derive the pacing interval from a notification rate.
    pub fn with_rate_hz(mut self, hz: u32) -> Self {
        self.base_interval_ms = if hz > 0 { (1000 / hz as u64).max(1) } else { 100 };
        self
    }
}

// ─── States and Outcomes ────────────────────────────────────────────────────

/// Application-level command state, orthogonal to the subscription flag.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandState {
    Idle,
    Streaming,
}

/// Why a tick decided not to re-arm.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    /// No Start received, or a Stop/Reset since.
    NotStreaming,
    /// Notifications are not enabled at the transport.
    NotSubscribed,
    /// The packet budget is satisfied; the session moved to Idle on its own.
    BudgetReached,
    /// Injected disconnect — a test stimulus, not a transport fault.
    SimulatedDisconnect,
}

/// What the driver should do after this tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickNext {
    /// Sleep this long, then tick again.
    Rearm(Duration),
    /// Stop the loop.
    Stop(StopReason),
}

/// Result of one pacing tick.
#[derive(Debug, Clone)]
pub struct TickOutcome {
    /// Frame to hand to the transport, if this tick emitted one.
    pub frame: Option<Bytes>,
    /// Fabricated RSSI for this tick.
    pub rssi_dbm: i16,
    /// Backpressure pause to apply before re-arming (buffer-full emulation).
    pub pause: Option<Duration>,
    /// Re-arm delay or stop reason.
    pub next: TickNext,
}

// ─── Session ────────────────────────────────────────────────────────────────

/// One emulated link session. Owned exclusively by one connection; never
/// shared, so no locking is needed within a session.
#[derive(Debug)]
pub struct LinkSession {
    cfg: SessionConfig,
    channel: ChannelModel,
    command_state: CommandState,
    subscribed: bool,
    seq: u16,
    active_payload: u8,
    packet_budget: u32,
    sent_count: u32,
}

impl LinkSession {
    pub fn new(cfg: SessionConfig, channel: ChannelModel) -> Self {
        let active_payload = wire::clamp_payload(cfg.default_payload);
        LinkSession {
            cfg,
            channel,
            command_state: CommandState::Idle,
            subscribed: false,
            seq: 0,
            active_payload,
            packet_budget: 0,
            sent_count: 0,
        }
    }

    pub fn config(&self) -> &SessionConfig {
        &self.cfg
    }

    pub fn command_state(&self) -> CommandState {
        self.command_state
    }

    pub fn is_subscribed(&self) -> bool {
        self.subscribed
    }

    pub fn active_payload(&self) -> u8 {
        self.active_payload
    }

    pub fn sequence(&self) -> u16 {
        self.seq
    }

    pub fn sent_count(&self) -> u32 {
        self.sent_count
    }

    /// Direct access to the impairment model (tests preload burst state).
    pub fn channel_mut(&mut self) -> &mut ChannelModel {
        &mut self.channel
    }

    /// Notify enable/disable from the transport boundary.
    pub fn set_subscribed(&mut self, enabled: bool) {
        self.subscribed = enabled;
    }

    /// Frames flow only when started *and* subscribed.
    pub fn is_emitting(&self) -> bool {
        self.command_state == CommandState::Streaming && self.subscribed
    }

    /// Handle a raw command frame from the transport.
    ///
    /// A configured command-ignore probability may swallow the command
    /// before any transition — deliberate fault injection. Unknown opcodes
    /// are logged and ignored.
    pub fn handle_command(&mut self, raw: &[u8]) {
        if raw.is_empty() {
            return;
        }
        if self.channel.should_ignore_command() {
            info!("intentionally ignoring command 0x{:02X}", raw[0]);
            return;
        }
        match wire::decode_command(raw, &self.cfg.commands, self.cfg.default_payload) {
            Ok(Command::Start {
                payload_bytes,
                packet_count,
            }) => self.start(payload_bytes as u16, packet_count),
            Ok(Command::Stop) => {
                info!("stop command received");
                self.stop();
            }
            Ok(Command::Reset) => {
                info!("reset command received");
                self.reset();
            }
            Err(unknown) => {
                warn!(opcode = ?unknown.opcode, "unknown command opcode, ignoring");
            }
        }
    }

    /// Begin streaming. Payload size is clamped to the valid range;
    /// `packet_count == 0` means unbounded.
    pub fn start(&mut self, payload_bytes: u16, packet_count: u16) {
        self.active_payload = payload_bytes
            .clamp(MIN_PAYLOAD_BYTES as u16, MAX_PAYLOAD_BYTES as u16)
            as u8;
        self.packet_budget = packet_count as u32;
        self.sent_count = 0;
        self.command_state = CommandState::Streaming;
        info!(
            payload = self.active_payload,
            packet_count, "start command received"
        );
    }

    /// Stop streaming; the sequence counter survives for the next Start.
    pub fn stop(&mut self) {
        self.command_state = CommandState::Idle;
        self.packet_budget = 0;
    }

    /// Stop and zero the sequence and sent counters.
    pub fn reset(&mut self) {
        self.stop();
        self.seq = 0;
        self.sent_count = 0;
    }

    /// One pacing tick. `now_ms` is the sender's wall clock in milliseconds;
    /// the frame timestamp is its low 16 bits.
    pub fn tick(&mut self, now_ms: u64) -> TickOutcome {
        if self.command_state != CommandState::Streaming {
            return self.halted(StopReason::NotStreaming);
        }
        if !self.subscribed {
            return self.halted(StopReason::NotSubscribed);
        }
        if self.packet_budget != 0 && self.sent_count >= self.packet_budget {
            self.stop();
            return self.halted(StopReason::BudgetReached);
        }

        let base_interval = self.cfg.base_interval_ms;
        let decision = self.channel.tick(self.seq, base_interval);

        if decision.disconnect && self.channel.config().disconnect_cut == DisconnectCut::BeforeEmit
        {
            info!("simulating disconnect");
            self.stop();
            return TickOutcome {
                frame: None,
                rssi_dbm: decision.rssi_dbm,
                pause: None,
                next: TickNext::Stop(StopReason::SimulatedDisconnect),
            };
        }

        let mut frame = None;
        let mut pause = None;
        if decision.emit {
            let mut bytes =
                wire::encode_frame(self.seq, (now_ms & 0xFFFF) as u16, self.active_payload as usize);
            if decision.malformed {
                bytes = bytes.slice(..(bytes.len() / 2).max(2));
            }
            if self.channel.note_backlog(bytes.len()) {
                info!(
                    pause_ms = base_interval,
                    "simulated buffer full, pausing notifications"
                );
                pause = Some(Duration::from_millis(base_interval));
            }
            frame = Some(bytes);
        }

        // Sequence and budget advance whether or not the frame survived the
        // channel — the receiver infers the drop from the gap.
        self.seq = self.seq.wrapping_add(1);
        self.sent_count += 1;

        let next = if self.packet_budget != 0 && self.sent_count >= self.packet_budget {
            self.stop();
            TickNext::Stop(StopReason::BudgetReached)
        } else if decision.disconnect {
            info!("simulating disconnect");
            self.stop();
            TickNext::Stop(StopReason::SimulatedDisconnect)
        } else {
            TickNext::Rearm(Duration::from_millis(decision.next_delay_ms))
        };

        TickOutcome {
            frame,
            rssi_dbm: decision.rssi_dbm,
            pause,
            next,
        }
    }

    fn halted(&self, reason: StopReason) -> TickOutcome {
        TickOutcome {
            frame: None,
            rssi_dbm: -1,
            pause: None,
            next: TickNext::Stop(reason),
        }
    }
}

// ─── Async Driver ───────────────────────────────────────────────────────────

/// Drive a streaming session to completion, pushing frames into `out`.
///
/// A single task per session — ticks are never concurrent with themselves.
/// Returns why the stream ended. A dropped receiver ends the stream as an
/// unsubscribe.
pub async fn run_stream(
    session: &mut LinkSession,
    out: &mpsc::UnboundedSender<Bytes>,
) -> StopReason {
    let mut delay = Duration::from_millis(session.config().base_interval_ms);
    loop {
        tokio::time::sleep(delay).await;
        let outcome = session.tick(unix_millis());
        if let Some(frame) = outcome.frame {
            if out.send(frame).is_err() {
                session.set_subscribed(false);
                return StopReason::NotSubscribed;
            }
        }
        if let Some(pause) = outcome.pause {
            tokio::time::sleep(pause).await;
        }
        match outcome.next {
            TickNext::Rearm(d) => delay = d,
            TickNext::Stop(reason) => return reason,
        }
    }
}

pub(crate) fn unix_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::impairment::{ChannelModel, DisconnectCut, ImpairmentConfig};
    use ringlink_protocol::wire::{decode_frame, encode_command, Command};

    fn session_with(cfg: ImpairmentConfig) -> LinkSession {
        let mut s = LinkSession::new(SessionConfig::default(), ChannelModel::new(cfg, 3));
        s.set_subscribed(true);
        s
    }

    fn clean_session() -> LinkSession {
        session_with(ImpairmentConfig::default())
    }

    /// Tick until the session stops, collecting emitted frames.
    fn drain(session: &mut LinkSession) -> (Vec<Bytes>, StopReason) {
        let mut frames = Vec::new();
        for now_ms in 0u64.. {
            let outcome = session.tick(now_ms * 25);
            frames.extend(outcome.frame);
            if let TickNext::Stop(reason) = outcome.next {
                return (frames, reason);
            }
        }
        unreachable!()
    }

    #[test]
    fn start_clamps_payload_high_and_low() {
        let mut s = clean_session();
        s.start(500, 0);
        assert_eq!(s.active_payload(), 244);
        s.start(1, 0);
        assert_eq!(s.active_payload(), 4);
    }

    #[test]
    fn budget_emits_exactly_then_self_stops() {
        let mut s = clean_session();
        s.start(20, 5);
        let (frames, reason) = drain(&mut s);
        assert_eq!(frames.len(), 5);
        assert_eq!(reason, StopReason::BudgetReached);
        assert_eq!(s.command_state(), CommandState::Idle);
        // Frames carry consecutive sequence numbers.
        for (i, frame) in frames.iter().enumerate() {
            assert_eq!(decode_frame(frame).seq, Some(i as u16));
            assert_eq!(frame.len(), 20);
        }
    }

    #[test]
    fn unbounded_start_keeps_rearming() {
        let mut s = clean_session();
        s.start(20, 0);
        for now in 0..1000u64 {
            let outcome = s.tick(now);
            assert!(matches!(outcome.next, TickNext::Rearm(_)));
        }
        assert_eq!(s.sent_count(), 1000);
    }

    #[test]
    fn tick_without_start_stops_quietly() {
        let mut s = clean_session();
        let outcome = s.tick(0);
        assert_eq!(outcome.next, TickNext::Stop(StopReason::NotStreaming));
        assert!(outcome.frame.is_none());
    }

    #[test]
    fn tick_without_subscription_emits_nothing() {
        let mut s = clean_session();
        s.start(20, 0);
        s.set_subscribed(false);
        let outcome = s.tick(0);
        assert_eq!(outcome.next, TickNext::Stop(StopReason::NotSubscribed));
        // State survives; re-subscribing resumes the stream.
        assert_eq!(s.command_state(), CommandState::Streaming);
        s.set_subscribed(true);
        assert!(s.tick(0).frame.is_some());
    }

    #[test]
    fn stop_keeps_sequence_reset_clears_it() {
        let mut s = clean_session();
        s.start(20, 0);
        s.tick(0);
        s.tick(25);
        assert_eq!(s.sequence(), 2);

        s.stop();
        assert_eq!(s.sequence(), 2);
        assert_eq!(s.command_state(), CommandState::Idle);

        s.reset();
        assert_eq!(s.sequence(), 0);
        assert_eq!(s.sent_count(), 0);
    }

    #[test]
    fn sequence_wraps_mod_65536() {
        let mut s = clean_session();
        s.start(20, 0);
        s.seq = 65535;
        let outcome = s.tick(0);
        assert_eq!(decode_frame(outcome.frame.as_ref().unwrap()).seq, Some(65535));
        assert_eq!(s.sequence(), 0);
    }

    #[test]
    fn dropped_ticks_still_advance_sequence() {
        let mut s = session_with(ImpairmentConfig {
            drop_percent: 100.0,
            ..Default::default()
        });
        s.start(20, 3);
        let (frames, reason) = drain(&mut s);
        assert!(frames.is_empty());
        assert_eq!(reason, StopReason::BudgetReached);
        assert_eq!(s.sequence(), 3);
    }

    #[test]
    fn command_ignore_at_full_probability_leaves_idle() {
        let mut s = session_with(ImpairmentConfig {
            command_ignore_percent: 100.0,
            ..Default::default()
        });
        let start = encode_command(
            Command::Start {
                payload_bytes: 20,
                packet_count: 0,
            },
            &CommandSet::default(),
        );
        s.handle_command(&start);
        assert_eq!(s.command_state(), CommandState::Idle);
    }

    #[test]
    fn command_wire_path_starts_and_stops() {
        let set = CommandSet::default();
        let mut s = clean_session();
        s.handle_command(&encode_command(
            Command::Start {
                payload_bytes: 32,
                packet_count: 7,
            },
            &set,
        ));
        assert_eq!(s.command_state(), CommandState::Streaming);
        assert_eq!(s.active_payload(), 32);

        s.handle_command(&encode_command(Command::Stop, &set));
        assert_eq!(s.command_state(), CommandState::Idle);
    }

    #[test]
    fn unknown_opcode_changes_nothing() {
        let mut s = clean_session();
        s.start(20, 0);
        s.handle_command(&[0xEE]);
        assert_eq!(s.command_state(), CommandState::Streaming);
        s.handle_command(&[]);
        assert_eq!(s.command_state(), CommandState::Streaming);
    }

    #[test]
    fn disconnect_before_emit_suppresses_frame() {
        let mut s = session_with(ImpairmentConfig {
            disconnect_percent: 100.0,
            ..Default::default()
        });
        s.start(20, 0);
        let outcome = s.tick(0);
        assert!(outcome.frame.is_none());
        assert_eq!(
            outcome.next,
            TickNext::Stop(StopReason::SimulatedDisconnect)
        );
        assert_eq!(s.command_state(), CommandState::Idle);
        // The suppressed tick never advanced the sequence.
        assert_eq!(s.sequence(), 0);
    }

    #[test]
    fn disconnect_after_emit_sends_last_frame() {
        let mut s = session_with(ImpairmentConfig {
            disconnect_percent: 100.0,
            disconnect_cut: DisconnectCut::AfterEmit,
            ..Default::default()
        });
        s.start(20, 0);
        let outcome = s.tick(0);
        assert!(outcome.frame.is_some());
        assert_eq!(
            outcome.next,
            TickNext::Stop(StopReason::SimulatedDisconnect)
        );
        assert_eq!(s.sequence(), 1);
    }

    #[test]
    fn malformed_frame_truncated_to_half() {
        let mut s = session_with(ImpairmentConfig {
            malformed_percent: 100.0,
            ..Default::default()
        });
        s.start(20, 0);
        let frame = s.tick(0).frame.unwrap();
        assert_eq!(frame.len(), 10);

        // Tiny payloads floor at 2 bytes.
        s.start(4, 0);
        let frame = s.tick(0).frame.unwrap();
        assert_eq!(frame.len(), 2);
    }

    #[test]
    fn backlog_limit_inserts_pause() {
        let mut s = session_with(ImpairmentConfig {
            backlog_limit: 30,
            ..Default::default()
        });
        s.start(20, 0);
        let first = s.tick(0);
        assert!(first.pause.is_none()); // depth 20
        let second = s.tick(25);
        assert_eq!(second.pause, Some(Duration::from_millis(25))); // depth 40 > 30
        let third = s.tick(50);
        assert!(third.pause.is_none()); // depth restarted at 20
    }

    #[test]
    fn frame_timestamp_is_low_16_bits_of_clock() {
        let mut s = clean_session();
        s.start(20, 0);
        let frame = s.tick(0x12345).frame.unwrap();
        assert_eq!(decode_frame(&frame).timestamp, Some(0x2345));
    }

    #[tokio::test(start_paused = true)]
    async fn run_stream_paces_and_stops_on_budget() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut s = clean_session();
        s.start(20, 4);
        let reason = run_stream(&mut s, &tx).await;
        assert_eq!(reason, StopReason::BudgetReached);
        drop(tx);
        let mut count = 0;
        while rx.recv().await.is_some() {
            count += 1;
        }
        assert_eq!(count, 4);
    }
}
