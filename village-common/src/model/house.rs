//! House activity indicators: the data shape, not the debouncing state
//! machine (that lives in `village_pipeline::house_activity`, since it owns
//! timers). Spec §3 HouseActivity / Indicator, §4.7.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::ids::{HouseId, RepoId, VillageId};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IndicatorKind {
    Lights,
    Banner,
    Smoke,
}

impl IndicatorKind {
    pub const ALL: [IndicatorKind; 3] = [IndicatorKind::Lights, IndicatorKind::Banner, IndicatorKind::Smoke];

    /// TTL default in milliseconds (spec §4.7).
    pub fn default_ttl_ms(self) -> i64 {
        match self {
            IndicatorKind::Lights => 90_000,
            IndicatorKind::Banner => 86_400_000,
            IndicatorKind::Smoke => 600_000,
        }
    }

    /// Min-visible default in milliseconds (spec §4.7).
    pub fn default_min_visible_ms(self) -> i64 {
        match self {
            IndicatorKind::Lights => 3_000,
            IndicatorKind::Banner => 2_000,
            IndicatorKind::Smoke => 5_000,
        }
    }
}

/// One of the three indicators on a house.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Indicator {
    pub active: bool,
    pub source: Option<String>,
    pub started_at: Option<DateTime<Utc>>,
    pub min_visible_until: Option<DateTime<Utc>>,
    pub expires_at: Option<DateTime<Utc>>,
    pub pr_number: Option<u64>,
    pub build_status: Option<String>,
}

/// Snapshot of a house's indicators, versioned so broadcasts can never
/// regress (spec §3 invariant: version strictly increases).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HouseActivity {
    pub house_id: Option<HouseId>,
    pub repo_id: Option<RepoId>,
    pub village_id: Option<VillageId>,
    pub version: u64,
    pub lights: Indicator,
    pub banner: Indicator,
    pub smoke: Indicator,
}

impl HouseActivity {
    pub fn new(repo_id: RepoId, village_id: Option<VillageId>) -> Self {
        Self {
            house_id: None,
            repo_id: Some(repo_id),
            village_id,
            version: 0,
            lights: Indicator::default(),
            banner: Indicator::default(),
            smoke: Indicator::default(),
        }
    }

    pub fn indicator(&self, kind: IndicatorKind) -> &Indicator {
        match kind {
            IndicatorKind::Lights => &self.lights,
            IndicatorKind::Banner => &self.banner,
            IndicatorKind::Smoke => &self.smoke,
        }
    }

    pub fn indicator_mut(&mut self, kind: IndicatorKind) -> &mut Indicator {
        match kind {
            IndicatorKind::Lights => &mut self.lights,
            IndicatorKind::Banner => &mut self.banner,
            IndicatorKind::Smoke => &mut self.smoke,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_activity_has_all_indicators_inactive_at_version_zero() {
        let activity = HouseActivity::new(RepoId::from_str("r1"), None);
        assert_eq!(activity.version, 0);
        for kind in IndicatorKind::ALL {
            assert!(!activity.indicator(kind).active);
        }
    }

    #[test]
    fn indicator_defaults_match_spec_table() {
        assert_eq!(IndicatorKind::Lights.default_ttl_ms(), 90_000);
        assert_eq!(IndicatorKind::Banner.default_ttl_ms(), 86_400_000);
        assert_eq!(IndicatorKind::Smoke.default_ttl_ms(), 600_000);
        assert_eq!(IndicatorKind::Lights.default_min_visible_ms(), 3_000);
        assert_eq!(IndicatorKind::Banner.default_min_visible_ms(), 2_000);
        assert_eq!(IndicatorKind::Smoke.default_min_visible_ms(), 5_000);
    }
}
