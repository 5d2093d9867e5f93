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

//! Snapshot to target list transform.
//!
//! [`RadarProcessor::process`] is pure: the same snapshot, own-ship, range and
//! clock always give the same list. Entries without a usable fix or beyond the
//! active range are dropped, the rest are classified and sorted most severe
//! first. Sorting is stable, so equal tiers keep feed order.

use adsb_client::geo::{bearing_deg, distance_nm, radar_plane_position, RadarPoint};
use adsb_client::units::{meters_to_feet, mps_to_fpm, mps_to_knots};
use adsb_client::{AircraftSnapshot, AircraftState};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::ownship::OwnShipPosition;
use crate::threat::{ThreatClassifier, ThreatTier};

/// How the target cap interacts with sorting.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SelectionPolicy {
    /// Keep the first `max_targets` in-range entries in feed order, then sort.
    /// A severe target late in the feed can be left out when the cap is hit.
    #[default]
    CapThenSort,
    /// Classify everything in range, sort, then keep the top `max_targets`.
    SortThenCap,
}

/// A classified aircraft relative to own-ship (display units).
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RadarTarget {
    pub icao: String,
    pub callsign: String,
    pub latitude: f64,
    pub longitude: f64,
    pub altitude_ft: f64,
    pub heading_deg: f64,
    pub ground_speed_kt: f64,
    pub vertical_rate_fpm: f64,
    pub on_ground: bool,
    pub distance_nm: f64,
    /// True bearing from own-ship.
    pub bearing_deg: f64,
    /// Target altitude minus own altitude.
    pub relative_altitude_ft: f64,
    pub threat: ThreatTier,
    /// Heading-up radar-plane position.
    pub position: RadarPoint,
    /// Seconds since the feed last heard from the aircraft.
    pub staleness_secs: f64,
}

impl RadarTarget {
    /// Label for display: callsign, or the ICAO address when there is none.
    #[must_use]
    pub fn label(&self) -> &str {
        if self.callsign.is_empty() {
            &self.icao
        } else {
            &self.callsign
        }
    }
}

/// Builds target lists from snapshots.
#[derive(Debug, Clone, Copy, Default)]
pub struct RadarProcessor {
    classifier: ThreatClassifier,
    policy: SelectionPolicy,
}

impl RadarProcessor {
    #[must_use]
    pub fn new(classifier: ThreatClassifier, policy: SelectionPolicy) -> Self {
        Self { classifier, policy }
    }

    /// Build the sorted target list for one refresh.
    ///
    /// Never returns more than `max_targets` entries.
    #[must_use]
    pub fn process(
        &self,
        snapshot: &AircraftSnapshot,
        own: &OwnShipPosition,
        range_nm: f64,
        max_targets: usize,
        now: DateTime<Utc>,
    ) -> Vec<RadarTarget> {
        if max_targets == 0 {
            return Vec::new();
        }

        let in_range = snapshot
            .iter()
            .filter_map(|aircraft| self.to_target(aircraft, own, range_nm, now));

        let mut targets: Vec<RadarTarget> = match self.policy {
            SelectionPolicy::CapThenSort => in_range.take(max_targets).collect(),
            SelectionPolicy::SortThenCap => in_range.collect(),
        };

        // Stable: equal tiers keep feed order
        targets.sort_by(|a, b| b.threat.cmp(&a.threat));
        targets.truncate(max_targets);
        targets
    }

    fn to_target(
        &self,
        aircraft: &AircraftState,
        own: &OwnShipPosition,
        range_nm: f64,
        now: DateTime<Utc>,
    ) -> Option<RadarTarget> {
        if !aircraft.has_position() {
            return None;
        }

        let distance = distance_nm(own.latitude, own.longitude, aircraft.latitude, aircraft.longitude);
        if distance > range_nm {
            return None;
        }

        let bearing = bearing_deg(own.latitude, own.longitude, aircraft.latitude, aircraft.longitude);
        let altitude_ft = meters_to_feet(aircraft.altitude_m);
        let relative_altitude_ft = altitude_ft - own.altitude_ft();
        #[allow(clippy::cast_precision_loss, reason = "staleness is display-only")]
        let staleness_secs = ((now - aircraft.last_update).num_milliseconds() as f64 / 1000.0).max(0.0);

        Some(RadarTarget {
            icao: aircraft.icao.clone(),
            callsign: aircraft.callsign.clone(),
            latitude: aircraft.latitude,
            longitude: aircraft.longitude,
            altitude_ft,
            heading_deg: aircraft.heading_deg,
            ground_speed_kt: mps_to_knots(aircraft.ground_speed_mps),
            vertical_rate_fpm: mps_to_fpm(aircraft.vertical_rate_mps),
            on_ground: aircraft.on_ground,
            distance_nm: distance,
            bearing_deg: bearing,
            relative_altitude_ft,
            threat: self.classifier.classify(distance, relative_altitude_ft),
            position: radar_plane_position(distance, bearing, own.heading_deg, range_nm),
            staleness_secs,
        })
    }
}

/// Distance to the closest aircraft with a usable fix, in any range.
#[must_use]
pub fn nearest_distance_nm(snapshot: &AircraftSnapshot, own: &OwnShipPosition) -> Option<f64> {
    snapshot
        .iter()
        .filter(|a| a.has_position())
        .map(|a| distance_nm(own.latitude, own.longitude, a.latitude, a.longitude))
        .min_by(f64::total_cmp)
}

/// Aircraft `nm` nautical miles due north of `own`, `feet_above` feet above it.
#[cfg(test)]
pub(crate) fn aircraft_north_of(
    icao: &str,
    own: &OwnShipPosition,
    nm: f64,
    feet_above: f64,
) -> AircraftState {
    use adsb_client::units::feet_to_meters;

    // One degree of latitude on the Haversine sphere
    let nm_per_degree = (6371.0_f64 / 1.852).to_radians();
    AircraftState {
        icao: icao.to_string(),
        callsign: String::new(),
        latitude: own.latitude + nm / nm_per_degree,
        longitude: own.longitude,
        altitude_m: own.altitude_m + feet_to_meters(feet_above),
        heading_deg: 0.0,
        ground_speed_mps: 0.0,
        vertical_rate_mps: 0.0,
        on_ground: false,
        last_update: Utc::now(),
    }
}
