// Copyright 2025 Chris Custine
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! TCAS-style threat tiers.
//!
//! Classification is a pure function of horizontal distance and vertical
//! separation. Tiers are checked most severe first and the first one whose
//! distance and altitude bounds both hold wins; bounds are inclusive.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Threat tier, ordered from least to most severe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum ThreatTier {
    OtherTraffic,
    Proximate,
    TrafficAdvisory,
    ResolutionAdvisory,
}

impl ThreatTier {
    /// Short label used in tables and logs.
    #[must_use]
    pub fn label(self) -> &'static str {
        match self {
            Self::OtherTraffic => "OTHER",
            Self::Proximate => "PROX",
            Self::TrafficAdvisory => "TA",
            Self::ResolutionAdvisory => "RA",
        }
    }
}

impl fmt::Display for ThreatTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Distance and vertical bounds for one tier.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TierThreshold {
    /// Maximum horizontal distance in nautical miles.
    pub max_distance_nm: f64,
    /// Maximum absolute altitude difference in feet.
    pub max_altitude_diff_ft: f64,
}

impl TierThreshold {
    #[must_use]
    pub const fn new(max_distance_nm: f64, max_altitude_diff_ft: f64) -> Self {
        Self {
            max_distance_nm,
            max_altitude_diff_ft,
        }
    }

    fn contains(&self, distance_nm: f64, altitude_diff_ft: f64) -> bool {
        distance_nm <= self.max_distance_nm && altitude_diff_ft.abs() <= self.max_altitude_diff_ft
    }
}

/// Thresholds for the three non-trivial tiers.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ThreatThresholds {
    pub resolution_advisory: TierThreshold,
    pub traffic_advisory: TierThreshold,
    pub proximate: TierThreshold,
}

impl Default for ThreatThresholds {
    fn default() -> Self {
        Self {
            resolution_advisory: TierThreshold::new(1.0, 300.0),
            traffic_advisory: TierThreshold::new(3.0, 500.0),
            proximate: TierThreshold::new(6.0, 1200.0),
        }
    }
}

impl ThreatThresholds {
    /// Whether each tier's bounds are no larger than the next less severe one.
    ///
    /// Classification still works when this is false, but a target may then
    /// skip a tier as it closes in.
    #[must_use]
    pub fn is_nested(&self) -> bool {
        let ra = &self.resolution_advisory;
        let ta = &self.traffic_advisory;
        let prox = &self.proximate;
        ra.max_distance_nm <= ta.max_distance_nm
            && ta.max_distance_nm <= prox.max_distance_nm
            && ra.max_altitude_diff_ft <= ta.max_altitude_diff_ft
            && ta.max_altitude_diff_ft <= prox.max_altitude_diff_ft
    }
}

/// Stateless classifier over a fixed set of thresholds.
#[derive(Debug, Clone, Copy, Default)]
pub struct ThreatClassifier {
    thresholds: ThreatThresholds,
}

impl ThreatClassifier {
    #[must_use]
    pub fn new(thresholds: ThreatThresholds) -> Self {
        Self { thresholds }
    }

    /// Classify a target by distance (NM) and altitude difference (ft, either sign).
    #[must_use]
    pub fn classify(&self, distance_nm: f64, altitude_diff_ft: f64) -> ThreatTier {
        let t = &self.thresholds;
        if t.resolution_advisory.contains(distance_nm, altitude_diff_ft) {
            ThreatTier::ResolutionAdvisory
        } else if t.traffic_advisory.contains(distance_nm, altitude_diff_ft) {
            ThreatTier::TrafficAdvisory
        } else if t.proximate.contains(distance_nm, altitude_diff_ft) {
            ThreatTier::Proximate
        } else {
            ThreatTier::OtherTraffic
        }
    }
}
