//! # Realism Presets and Replay Profile Files
//!
//! Prebaked impairment presets modeling where a ring sits relative to the
//! phone (on a desk, across the body, in a pocket), plus loaders for the
//! JSON replay-profile files that make a run reproducible.
//!
//! A malformed profile file degrades to "no profile" with a warning — a
//! configuration fault never kills a run in progress.

use std::path::Path;

use tracing::warn;

use crate::impairment::ImpairmentConfig;

/// Apply a named preset on top of a config. Unknown names leave the config
/// unchanged and log a warning.
pub fn apply_preset(mut cfg: ImpairmentConfig, name: &str) -> ImpairmentConfig {
    match name {
        "best" => {
            cfg.drop_percent = 0.0;
            cfg.drop_burst_percent = 0.0;
            cfg.drop_burst_len = 0;
            cfg.interval_jitter_ms = 0;
            cfg.latency_spike_ms = 0;
            cfg.latency_spike_percent = 0.0;
        }
        "typical" => {
            cfg.drop_percent = 1.0;
            cfg.drop_burst_percent = 1.0;
            cfg.drop_burst_len = 2;
            cfg.interval_jitter_ms = 3;
            cfg.latency_spike_ms = 10;
            cfg.latency_spike_percent = 2.0;
            cfg.rssi_wave_amplitude = 3;
            cfg.rssi_wave_period = 50;
        }
        "body_block" => {
            cfg.drop_percent = 3.0;
            cfg.drop_burst_percent = 5.0;
            cfg.drop_burst_len = 3;
            cfg.interval_jitter_ms = 5;
            cfg.latency_spike_ms = 15;
            cfg.latency_spike_percent = 5.0;
            cfg.rssi_wave_amplitude = 6;
            cfg.rssi_wave_period = 40;
        }
        "pocket" => {
            cfg.drop_percent = 2.0;
            cfg.drop_burst_percent = 3.0;
            cfg.drop_burst_len = 2;
            cfg.interval_jitter_ms = 4;
            cfg.latency_spike_ms = 12;
            cfg.latency_spike_percent = 3.0;
            cfg.rssi_wave_amplitude = 4;
            cfg.rssi_wave_period = 60;
        }
        "worst" => {
            cfg.drop_percent = 5.0;
            cfg.drop_burst_percent = 10.0;
            cfg.drop_burst_len = 4;
            cfg.interval_jitter_ms = 8;
            cfg.latency_spike_ms = 25;
            cfg.latency_spike_percent = 8.0;
            cfg.rssi_wave_amplitude = 8;
            cfg.rssi_wave_period = 30;
            cfg.disconnect_percent = 0.5;
        }
        other => warn!(preset = other, "unknown impairment preset, config unchanged"),
    }
    cfg
}

/// Names accepted by [`apply_preset`].
pub const PRESET_NAMES: &[&str] = &["best", "typical", "body_block", "pocket", "worst"];

// ─── Replay Profile Files ───────────────────────────────────────────────────

fn load_numbers(path: &Path) -> Vec<f64> {
    let text = match std::fs::read_to_string(path) {
        Ok(t) => t,
        Err(err) => {
            warn!(path = %path.display(), %err, "failed to read replay profile file");
            return Vec::new();
        }
    };
    match serde_json::from_str::<Vec<f64>>(&text) {
        Ok(values) => values,
        Err(err) => {
            warn!(path = %path.display(), %err, "malformed replay profile file, ignoring");
            Vec::new()
        }
    }
}

/// Load a cyclic RSSI replay profile (JSON list of dBm values).
pub fn load_rssi_profile(path: &Path) -> Vec<i16> {
    load_numbers(path).into_iter().map(|v| v as i16).collect()
}

/// Load a cyclic notify-interval profile (JSON list of ms, floored at 1).
pub fn load_interval_profile(path: &Path) -> Vec<u64> {
    load_numbers(path)
        .into_iter()
        .map(|v| (v as u64).max(1))
        .collect()
}

/// Load a cyclic drop-probability profile (JSON list, clamped to `0..=1`).
pub fn load_drop_profile(path: &Path) -> Vec<f64> {
    load_numbers(path)
        .into_iter()
        .map(|v| v.clamp(0.0, 1.0))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn worst_preset_is_harsher_than_typical() {
        let typical = apply_preset(ImpairmentConfig::default(), "typical");
        let worst = apply_preset(ImpairmentConfig::default(), "worst");
        assert!(worst.drop_percent > typical.drop_percent);
        assert!(worst.drop_burst_len > typical.drop_burst_len);
        assert!(worst.disconnect_percent > 0.0);
        assert_eq!(typical.disconnect_percent, 0.0);
    }

    #[test]
    fn best_preset_clears_loss_knobs() {
        let dirty = ImpairmentConfig {
            drop_percent: 20.0,
            drop_burst_len: 5,
            latency_spike_ms: 100,
            ..Default::default()
        };
        let best = apply_preset(dirty, "best");
        assert_eq!(best.drop_percent, 0.0);
        assert_eq!(best.drop_burst_len, 0);
        assert_eq!(best.latency_spike_ms, 0);
    }

    #[test]
    fn unknown_preset_leaves_config_alone() {
        let cfg = ImpairmentConfig {
            drop_percent: 7.0,
            ..Default::default()
        };
        let out = apply_preset(cfg.clone(), "underwater");
        assert_eq!(out.drop_percent, cfg.drop_percent);
    }

    #[test]
    fn profile_loaders_degrade_on_bad_input() {
        let dir = std::env::temp_dir().join("ringlink-profile-tests");
        std::fs::create_dir_all(&dir).unwrap();

        let good = dir.join("good.json");
        std::fs::write(&good, "[-40, -60.5, -80]").unwrap();
        assert_eq!(load_rssi_profile(&good), vec![-40, -60, -80]);

        let bad = dir.join("bad.json");
        std::fs::write(&bad, "{not json").unwrap();
        assert!(load_rssi_profile(&bad).is_empty());

        assert!(load_interval_profile(&dir.join("missing.json")).is_empty());
    }

    #[test]
    fn drop_profile_values_are_clamped() {
        let dir = std::env::temp_dir().join("ringlink-profile-tests");
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("drop.json");
        std::fs::write(&path, "[-1.0, 0.25, 3.0]").unwrap();
        assert_eq!(load_drop_profile(&path), vec![0.0, 0.25, 1.0]);
    }

    #[test]
    fn interval_profile_floors_at_one_ms() {
        let dir = std::env::temp_dir().join("ringlink-profile-tests");
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("interval.json");
        std::fs::write(&path, "[0, 15, 40]").unwrap();
        assert_eq!(load_interval_profile(&path), vec![1, 15, 40]);
    }
}
