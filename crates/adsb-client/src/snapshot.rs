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

//! Aircraft state as delivered by one feed response.
//!
//! A snapshot is built fresh from every successful fetch and replaces the
//! previous one wholesale. Nothing is merged across fetches; the identifier is
//! only a key within a single response.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Normalized aircraft state (SI units).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AircraftState {
    /// ICAO 24-bit address (hex string).
    pub icao: String,
    /// Callsign or registration, possibly empty.
    pub callsign: String,
    /// Latitude in degrees.
    pub latitude: f64,
    /// Longitude in degrees.
    pub longitude: f64,
    /// Barometric altitude in meters (0 when on the ground).
    pub altitude_m: f64,
    /// Track over ground in degrees (0-360, north = 0).
    pub heading_deg: f64,
    /// Ground speed in meters per second.
    pub ground_speed_mps: f64,
    /// Vertical rate in meters per second (positive = climb).
    pub vertical_rate_mps: f64,
    /// Whether the aircraft reported itself on the ground.
    pub on_ground: bool,
    /// When the source last heard from this aircraft.
    pub last_update: DateTime<Utc>,
}

impl AircraftState {
    /// Whether the entry carries a usable position fix.
    ///
    /// Feeds fill missing coordinates with zeros, so exactly (0, 0) counts as
    /// no fix.
    #[must_use]
    pub fn has_position(&self) -> bool {
        self.latitude.is_finite()
            && self.longitude.is_finite()
            && !(self.latitude == 0.0 && self.longitude == 0.0)
    }
}

/// Immutable set of aircraft keyed by ICAO address.
///
/// Iteration follows feed order. A repeated identifier replaces the earlier
/// entry in place, so each key appears once.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AircraftSnapshot {
    aircraft: Vec<AircraftState>,
    index: HashMap<String, usize>,
}

impl AircraftSnapshot {
    /// Create an empty snapshot.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Get a specific aircraft by ICAO address.
    #[must_use]
    pub fn get_by_icao(&self, icao: &str) -> Option<&AircraftState> {
        self.index.get(icao).map(|&i| &self.aircraft[i])
    }

    /// Iterate aircraft in feed order.
    pub fn iter(&self) -> std::slice::Iter<'_, AircraftState> {
        self.aircraft.iter()
    }

    /// All aircraft as a slice, in feed order.
    #[must_use]
    pub fn as_slice(&self) -> &[AircraftState] {
        &self.aircraft
    }

    /// Get the number of aircraft.
    #[must_use]
    pub fn len(&self) -> usize {
        self.aircraft.len()
    }

    /// Check if the snapshot holds no aircraft.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.aircraft.is_empty()
    }

    fn insert(&mut self, state: AircraftState) {
        if let Some(&i) = self.index.get(&state.icao) {
            self.aircraft[i] = state;
        } else {
            self.index.insert(state.icao.clone(), self.aircraft.len());
            self.aircraft.push(state);
        }
    }
}

impl FromIterator<AircraftState> for AircraftSnapshot {
    fn from_iter<I: IntoIterator<Item = AircraftState>>(iter: I) -> Self {
        let mut snapshot = Self::new();
        for state in iter {
            snapshot.insert(state);
        }
        snapshot
    }
}

impl<'a> IntoIterator for &'a AircraftSnapshot {
    type Item = &'a AircraftState;
    type IntoIter = std::slice::Iter<'a, AircraftState>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

#[cfg(test)]
pub(crate) fn test_state(icao: &str, latitude: f64, longitude: f64) -> AircraftState {
    AircraftState {
        icao: icao.to_string(),
        callsign: String::new(),
        latitude,
        longitude,
        altitude_m: 0.0,
        heading_deg: 0.0,
        ground_speed_mps: 0.0,
        vertical_rate_mps: 0.0,
        on_ground: false,
        last_update: Utc::now(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_snapshot_preserves_feed_order() {
        let snapshot: AircraftSnapshot = ["C3", "A1", "B2"]
            .iter()
            .map(|icao| test_state(icao, 34.0, -118.0))
            .collect();

        let order: Vec<_> = snapshot.iter().map(|a| a.icao.as_str()).collect();
        assert_eq!(order, ["C3", "A1", "B2"]);
        assert_eq!(snapshot.len(), 3);
    }

    #[test]
    fn test_snapshot_duplicate_replaces_in_place() {
        let snapshot: AircraftSnapshot = vec![
            test_state("A1", 34.0, -118.0),
            test_state("B2", 35.0, -118.0),
            test_state("A1", 36.0, -119.0),
        ]
        .into_iter()
        .collect();

        assert_eq!(snapshot.len(), 2);
        assert_eq!(snapshot.as_slice()[0].icao, "A1");
        let a1 = snapshot.get_by_icao("A1").unwrap();
        assert!((a1.latitude - 36.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_has_position() {
        assert!(test_state("A1", 34.0, -118.0).has_position());
        assert!(test_state("A1", 0.0, -118.0).has_position());
        assert!(!test_state("A1", 0.0, 0.0).has_position());
        assert!(!test_state("A1", f64::NAN, 10.0).has_position());
    }
}
