//! # Channel Impairment Model
//!
//! Per-tick degradation decisions for the emulated link. The model is
//! deliberately a bundle of *independent* rolls — base drop, burst start,
//! disconnect, latency spike, malformed frame — rather than one combined
//! probability, so each impairment stays individually tunable and testable.
//!
//! State is limited to rotating cursors into the cyclic replay profiles,
//! the burst countdown, accumulated RSSI drift, and backlog depth. Only
//! [`ChannelModel::tick`] (and the backlog hook) mutate it.

use rand::rngs::StdRng;
use rand::RngExt as _;
use rand::SeedableRng;
use serde::{Deserialize, Serialize};

// ─── Configuration ──────────────────────────────────────────────────────────

/// How the notify interval reacts to simulated PHY changes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PhyProfile {
    /// Interval follows configuration only.
    #[default]
    Fixed,
    /// Every 100th tick slows 1.5x (PHY fallback), every other 10th speeds 0.8x.
    Varying,
}

/// Whether a simulated disconnect cuts before or after this tick's frame.
///
/// Real disconnects land at either point, so both orderings are testable.
/// `BeforeEmit` suppresses the in-flight frame.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DisconnectCut {
    #[default]
    BeforeEmit,
    AfterEmit,
}

/// Immutable snapshot of every configured impairment.
///
/// Percentages are in `0..=100`, replay-profile drop values in `0..=1`;
/// out-of-range configuration is clamped by [`ImpairmentConfig::sanitized`]
/// rather than rejected — a bad knob degrades, it never aborts a run.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ImpairmentConfig {
    /// Base probability (%) of dropping each notification.
    pub drop_percent: f64,
    /// Probability (%) of starting a burst of consecutive drops.
    pub drop_burst_percent: f64,
    /// Length of a drop burst, in ticks.
    pub drop_burst_len: u32,
    /// Uniform jitter (± ms) applied to the notify interval.
    pub interval_jitter_ms: u64,
    /// Probability (%) of truncating an emitted frame to half length.
    pub malformed_percent: f64,
    /// Extra delay added to a tick hit by a latency spike.
    pub latency_spike_ms: u64,
    /// Probability (%) of a latency spike per tick.
    pub latency_spike_percent: f64,
    /// Baseline fabricated RSSI.
    pub rssi_base_dbm: i16,
    /// Uniform RSSI jitter (± dBm).
    pub rssi_variation_dbm: i16,
    /// Linear RSSI drift per tick (dBm, signed).
    pub rssi_drift_dbm: i16,
    /// Amplitude of the slow RSSI wave (dBm, 0 disables).
    pub rssi_wave_amplitude: i16,
    /// Period of the RSSI wave in ticks (0 disables).
    pub rssi_wave_period: u16,
    /// Probability (%) of simulating a disconnect per tick.
    pub disconnect_percent: f64,
    /// Probability (%) of silently ignoring an incoming command.
    pub command_ignore_percent: f64,
    /// RSSI below this threshold adds `rssi_drop_extra_percent` to the drop roll.
    pub rssi_drop_threshold_dbm: i16,
    /// Extra drop probability (%) applied below the RSSI threshold.
    pub rssi_drop_extra_percent: f64,
    /// Simulated output-buffer capacity in bytes (0 = unlimited).
    pub backlog_limit: usize,
    /// Interval reaction to PHY changes.
    pub phy_profile: PhyProfile,
    /// Disconnect cut policy.
    pub disconnect_cut: DisconnectCut,
    /// Cyclic RSSI replay values (dBm); overrides base/jitter/wave when non-empty.
    pub rssi_profile: Vec<i16>,
    /// Cyclic notify-interval replay values (ms); overrides base + spike.
    pub interval_profile: Vec<u64>,
    /// Cyclic drop probabilities (`0..=1`); overrides `drop_percent`.
    pub drop_profile: Vec<f64>,
}

impl Default for ImpairmentConfig {
    fn default() -> Self {
        ImpairmentConfig {
            drop_percent: 0.0,
            drop_burst_percent: 0.0,
            drop_burst_len: 0,
            interval_jitter_ms: 0,
            malformed_percent: 0.0,
            latency_spike_ms: 0,
            latency_spike_percent: 0.0,
            rssi_base_dbm: -55,
            rssi_variation_dbm: 5,
            rssi_drift_dbm: 0,
            rssi_wave_amplitude: 0,
            rssi_wave_period: 0,
            disconnect_percent: 0.0,
            command_ignore_percent: 0.0,
            rssi_drop_threshold_dbm: -80,
            rssi_drop_extra_percent: 5.0,
            backlog_limit: 0,
            phy_profile: PhyProfile::Fixed,
            disconnect_cut: DisconnectCut::BeforeEmit,
            rssi_profile: Vec::new(),
            interval_profile: Vec::new(),
            drop_profile: Vec::new(),
        }
    }
}

impl ImpairmentConfig {
    /// Clamp every knob into its valid range.
    pub fn sanitized(mut self) -> Self {
        for p in [
            &mut self.drop_percent,
            &mut self.drop_burst_percent,
            &mut self.malformed_percent,
            &mut self.latency_spike_percent,
            &mut self.disconnect_percent,
            &mut self.command_ignore_percent,
            &mut self.rssi_drop_extra_percent,
        ] {
            *p = p.clamp(0.0, 100.0);
        }
        self.rssi_variation_dbm = self.rssi_variation_dbm.max(0);
        self.rssi_wave_amplitude = self.rssi_wave_amplitude.max(0);
        for p in &mut self.drop_profile {
            *p = p.clamp(0.0, 1.0);
        }
        for v in &mut self.interval_profile {
            *v = (*v).max(1);
        }
        self
    }
}

// ─── Runtime State ──────────────────────────────────────────────────────────

/// Mutable cursor state, touched only by the tick path.
#[derive(Debug, Clone, Default)]
struct ChannelState {
    burst_remaining: u32,
    rssi_cursor: usize,
    interval_cursor: usize,
    drop_cursor: usize,
    drift_accum_dbm: i32,
    phy_tick: u32,
    backlog_depth: usize,
}

// ─── Tick Decision ──────────────────────────────────────────────────────────

/// Everything the session needs to know about one tick.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TickDecision {
    /// Whether a frame should be emitted (i.e. not dropped).
    pub emit: bool,
    /// Truncate the emitted frame to half length (min 2 bytes).
    pub malformed: bool,
    /// Simulate a link disconnect; the session stops.
    pub disconnect: bool,
    /// Fabricated RSSI for this tick, clamped to `[-127, -1]`.
    pub rssi_dbm: i16,
    /// Latency-spike delay folded into `next_delay_ms`.
    pub extra_delay_ms: u64,
    /// Delay before the next tick, ≥ 1 ms.
    pub next_delay_ms: u64,
}

// ─── Channel Model ──────────────────────────────────────────────────────────

/// Seeded impairment decision engine. One per link session.
#[derive(Debug)]
pub struct ChannelModel {
    cfg: ImpairmentConfig,
    state: ChannelState,
    rng: StdRng,
}

impl ChannelModel {
    pub fn new(cfg: ImpairmentConfig, seed: u64) -> Self {
        ChannelModel {
            cfg: cfg.sanitized(),
            state: ChannelState::default(),
            rng: StdRng::seed_from_u64(seed),
        }
    }

    pub fn config(&self) -> &ImpairmentConfig {
        &self.cfg
    }

    /// Preload the burst countdown, as if a burst just started.
    pub fn force_burst(&mut self, len: u32) {
        self.state.burst_remaining = len;
    }

    /// Roll whether an incoming command is silently swallowed.
    pub fn should_ignore_command(&mut self) -> bool {
        roll(&mut self.rng, self.cfg.command_ignore_percent)
    }

    /// Account emitted bytes against the simulated output buffer.
    /// Returns true when the limit is exceeded; the depth resets and the
    /// session should pause for one base interval.
    pub fn note_backlog(&mut self, bytes: usize) -> bool {
        if self.cfg.backlog_limit == 0 {
            return false;
        }
        self.state.backlog_depth += bytes;
        if self.state.backlog_depth > self.cfg.backlog_limit {
            self.state.backlog_depth = 0;
            return true;
        }
        false
    }

    /// Decide this tick's fate. `seq` is the sequence number about to be
    /// stamped; `base_interval_ms` is the configured pacing interval.
    pub fn tick(&mut self, seq: u16, base_interval_ms: u64) -> TickDecision {
        let rssi_dbm = self.next_rssi(seq);

        let dropped = if self.state.burst_remaining > 0 {
            self.state.burst_remaining -= 1;
            true
        } else {
            let mut drop_percent = cycle(&self.cfg.drop_profile, &mut self.state.drop_cursor)
                .map(|p| p * 100.0)
                .unwrap_or(self.cfg.drop_percent);
            if rssi_dbm < self.cfg.rssi_drop_threshold_dbm {
                drop_percent += self.cfg.rssi_drop_extra_percent;
            }
            let mut dropped = roll(&mut self.rng, drop_percent);
            if !dropped
                && self.cfg.drop_burst_len > 0
                && roll(&mut self.rng, self.cfg.drop_burst_percent)
            {
                // The trigger tick counts as the first drop of the burst.
                self.state.burst_remaining = self.cfg.drop_burst_len;
                dropped = true;
            }
            dropped
        };

        let disconnect = roll(&mut self.rng, self.cfg.disconnect_percent);

        let extra_delay_ms = if self.cfg.latency_spike_ms > 0
            && roll(&mut self.rng, self.cfg.latency_spike_percent)
        {
            self.cfg.latency_spike_ms
        } else {
            0
        };

        let malformed = !dropped && roll(&mut self.rng, self.cfg.malformed_percent);

        let next_delay_ms = self.next_delay(base_interval_ms, extra_delay_ms);

        TickDecision {
            emit: !dropped,
            malformed,
            disconnect,
            rssi_dbm,
            extra_delay_ms,
            next_delay_ms,
        }
    }

    fn next_rssi(&mut self, seq: u16) -> i16 {
        let value = match cycle(&self.cfg.rssi_profile, &mut self.state.rssi_cursor) {
            Some(v) => v as i32,
            None => {
                let mut v = self.cfg.rssi_base_dbm as i32 + self.state.drift_accum_dbm;
                if self.cfg.rssi_variation_dbm > 0 {
                    let var = self.cfg.rssi_variation_dbm;
                    v += self.rng.random_range(-var..=var) as i32;
                }
                if self.cfg.rssi_wave_amplitude > 0 && self.cfg.rssi_wave_period > 0 {
                    let period = self.cfg.rssi_wave_period;
                    let phase = (seq % period) as f64 / period as f64;
                    v += (self.cfg.rssi_wave_amplitude as f64 * (2.0 * phase - 1.0)) as i32;
                }
                v
            }
        };
        self.state.drift_accum_dbm += self.cfg.rssi_drift_dbm as i32;
        value.clamp(-127, -1) as i16
    }

    fn next_delay(&mut self, base_interval_ms: u64, extra_delay_ms: u64) -> u64 {
        let mut delay = match cycle(&self.cfg.interval_profile, &mut self.state.interval_cursor) {
            // A replay profile overrides base interval and spikes alike.
            Some(v) => v as i64,
            None => (base_interval_ms + extra_delay_ms) as i64,
        };
        if self.cfg.interval_jitter_ms > 0 {
            let j = self.cfg.interval_jitter_ms as i64;
            delay = (delay + self.rng.random_range(-j..=j)).max(1);
        }
        if self.cfg.phy_profile == PhyProfile::Varying {
            self.state.phy_tick = (self.state.phy_tick + 1) % 100;
            if self.state.phy_tick == 0 {
                // Simulated PHY fallback: one slow interval.
                delay = (delay as f64 * 1.5) as i64;
            } else if self.state.phy_tick % 10 == 0 {
                delay = ((delay as f64 * 0.8) as i64).max(1);
            }
        }
        delay.max(1) as u64
    }
}

/// Uniform percentage roll. Zero never fires, 100 always does.
fn roll(rng: &mut StdRng, percent: f64) -> bool {
    percent > 0.0 && rng.random::<f64>() * 100.0 < percent
}

/// Take the next value from a cyclic replay list, rotating the cursor.
fn cycle<T: Copy>(list: &[T], cursor: &mut usize) -> Option<T> {
    if list.is_empty() {
        return None;
    }
    let value = list[*cursor % list.len()];
    *cursor = (*cursor + 1) % list.len();
    Some(value)
}
