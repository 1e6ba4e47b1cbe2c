//! Release channels and their rollout policy (spec §3 ReleaseChannel, §4.4
//! channel defaults).

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReleaseChannel {
    Stable,
    Beta,
    Pinned,
}

/// Per-channel gating and rollout policy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChannelConfig {
    pub requires_canary: bool,
    pub canary_threshold: f64,
    /// Strictly increasing, ending at or before 100.
    pub rollout_stages: Vec<u8>,
    pub rollout_delay_hours: u32,
}

impl ChannelConfig {
    /// Defaults from spec §4.4.
    pub fn for_channel(channel: ReleaseChannel) -> Self {
        match channel {
            ReleaseChannel::Stable => Self {
                requires_canary: true,
                canary_threshold: 0.95,
                rollout_stages: vec![1, 10, 50, 100],
                rollout_delay_hours: 24,
            },
            ReleaseChannel::Beta => Self {
                requires_canary: true,
                canary_threshold: 0.80,
                rollout_stages: vec![10, 50, 100],
                rollout_delay_hours: 6,
            },
            ReleaseChannel::Pinned => Self {
                requires_canary: false,
                canary_threshold: 0.0,
                rollout_stages: vec![100],
                rollout_delay_hours: 0,
            },
        }
    }

    /// The first rollout stage percentage.
    pub fn first_stage(&self) -> u8 {
        self.rollout_stages.first().copied().unwrap_or(100)
    }

    /// The stage that follows `current`, if any.
    pub fn next_stage(&self, current: u8) -> Option<u8> {
        let idx = self.rollout_stages.iter().position(|&s| s == current)?;
        self.rollout_stages.get(idx + 1).copied()
    }

    pub fn is_last_stage(&self, current: u8) -> bool {
        self.rollout_stages.last() == Some(&current)
    }
}
