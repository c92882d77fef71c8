//! Traffic model: per-region, time-of-day duration multipliers.
//!
//! Multipliers scale predicted travel durations (2.0 = twice free-flow).
//! All values are configuration; the defaults below are starting points for
//! Central Asian metros, not canonical constants. Live TRAFFIC events can
//! override a region's multiplier until the override is cleared.

use std::collections::HashMap;

use dashmap::DashMap;
use serde::{Deserialize, Serialize};

/// Hourly duration multipliers for one region (index 0 = midnight).
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct RegionProfile {
    pub hourly_factors: [f64; 24],
}

impl RegionProfile {
    /// Free flow all day.
    pub fn flat() -> Self {
        Self { hourly_factors: [1.0; 24] }
    }

    /// Rush-hour shape: `morning` applies 07–09, `evening` 17–19, midday
    /// runs at the average of the two, nights free-flow.
    pub fn rush_hours(morning: f64, evening: f64) -> Self {
        let mut f = [1.0_f64; 24];
        f[7] = morning;
        f[8] = morning;
        f[9] = morning;
        let midday = (morning + evening) / 2.0 * 0.6;
        for slot in &mut f[10..17] {
            *slot = midday.max(1.0);
        }
        f[17] = evening;
        f[18] = evening;
        f[19] = evening;
        Self { hourly_factors: f }
    }
}

/// Traffic configuration: one profile per region key.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrafficConfig {
    pub regions: HashMap<String, RegionProfile>,
}

impl Default for TrafficConfig {
    fn default() -> Self {
        // Example values; deployments tune these per §config.
        let mut regions = HashMap::new();
        regions.insert("almaty".to_string(), RegionProfile::rush_hours(2.0, 1.8));
        regions.insert("tashkent".to_string(), RegionProfile::rush_hours(1.6, 1.5));
        regions.insert("bishkek".to_string(), RegionProfile::rush_hours(1.4, 1.4));
        Self { regions }
    }
}

/// Runtime traffic lookup: configured profiles plus live overrides fed by
/// TRAFFIC events.
pub struct TrafficModel {
    config: TrafficConfig,
    live: DashMap<String, f64>,
}

impl TrafficModel {
    pub fn new(config: TrafficConfig) -> Self {
        Self {
            config,
            live: DashMap::new(),
        }
    }

    /// Duration multiplier for `region` at `hour` (0–23). Live overrides
    /// win; unknown regions run free-flow.
    pub fn multiplier(&self, region: &str, hour: u32) -> f64 {
        if let Some(live) = self.live.get(region) {
            return *live;
        }
        self.config
            .regions
            .get(region)
            .map(|p| p.hourly_factors[(hour % 24) as usize])
            .unwrap_or(1.0)
    }

    /// Apply a live override from a TRAFFIC event.
    pub fn set_live_multiplier(&self, region: &str, multiplier: f64) {
        self.live.insert(region.to_string(), multiplier.max(0.1));
    }

    /// Drop a live override, returning to the configured profile.
    pub fn clear_live_multiplier(&self, region: &str) {
        self.live.remove(region);
    }
}

impl Default for TrafficModel {
    fn default() -> Self {
        Self::new(TrafficConfig::default())
    }
}
