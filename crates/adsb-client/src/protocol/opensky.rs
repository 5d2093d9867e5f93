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

//! OpenSky Network `states/all` parser.
//!
//! State vectors are positional JSON arrays:
//! ```text
//! [icao24, callsign, origin_country, time_position, last_contact,
//!  longitude, latitude, baro_altitude, on_ground, velocity,
//!  true_track, vertical_rate, sensors, geo_altitude, squawk, spi, position_source]
//! ```
//! OpenSky already reports meters and meters per second.

use chrono::{DateTime, TimeZone, Utc};
use log::debug;
use serde::Deserialize;
use serde_json::Value;

use super::{FeedRequest, ParseError, Protocol};
use crate::snapshot::AircraftState;

const IDX_ICAO: usize = 0;
const IDX_CALLSIGN: usize = 1;
const IDX_TIME_POSITION: usize = 3;
const IDX_LAST_CONTACT: usize = 4;
const IDX_LONGITUDE: usize = 5;
const IDX_LATITUDE: usize = 6;
const IDX_BARO_ALTITUDE: usize = 7;
const IDX_ON_GROUND: usize = 8;
const IDX_VELOCITY: usize = 9;
const IDX_TRUE_TRACK: usize = 10;
const IDX_VERTICAL_RATE: usize = 11;
const IDX_GEO_ALTITUDE: usize = 13;

/// Bounding box around the reference point, one degree of latitude per 60 NM.
pub(super) fn request_url(base: &str, request: &FeedRequest) -> String {
    let dlat = request.clamped_radius_nm() / 60.0;
    let cos_lat = request.latitude.to_radians().cos().abs().max(0.01);
    let dlon = (dlat / cos_lat).min(180.0);

    format!(
        "{}?lamin={:.4}&lomin={:.4}&lamax={:.4}&lomax={:.4}",
        base,
        (request.latitude - dlat).max(-90.0),
        request.longitude - dlon,
        (request.latitude + dlat).min(90.0),
        request.longitude + dlon
    )
}

#[derive(Debug, Deserialize)]
struct Response {
    time: Option<i64>,
    states: Option<Vec<Value>>,
}

fn number(state: &[Value], idx: usize) -> Option<f64> {
    state.get(idx).and_then(Value::as_f64)
}

#[allow(clippy::cast_possible_truncation, reason = "epoch seconds fit in i64")]
fn timestamp(secs: Option<f64>) -> Option<DateTime<Utc>> {
    secs.and_then(|s| Utc.timestamp_opt(s as i64, 0).single())
}

/// Parser for OpenSky `states/all` responses.
#[derive(Debug)]
pub struct OpenSkyParser {
    received_at: DateTime<Utc>,
}

impl OpenSkyParser {
    /// Create a parser; `received_at` is used when a state has no timestamps.
    #[must_use]
    pub fn new(received_at: DateTime<Utc>) -> Self {
        Self { received_at }
    }

    fn convert(state: &[Value], fallback_time: DateTime<Utc>) -> Option<AircraftState> {
        let icao = state.get(IDX_ICAO)?.as_str()?.trim().to_uppercase();
        if icao.is_empty() {
            return None;
        }
        let latitude = number(state, IDX_LATITUDE)?;
        let longitude = number(state, IDX_LONGITUDE)?;
        let on_ground = state
            .get(IDX_ON_GROUND)
            .and_then(Value::as_bool)
            .unwrap_or(false);

        let altitude_m = if on_ground {
            0.0
        } else {
            number(state, IDX_BARO_ALTITUDE)
                .or_else(|| number(state, IDX_GEO_ALTITUDE))
                .unwrap_or(0.0)
        };

        let last_update = timestamp(number(state, IDX_TIME_POSITION))
            .or_else(|| timestamp(number(state, IDX_LAST_CONTACT)))
            .unwrap_or(fallback_time);

        Some(AircraftState {
            icao,
            callsign: state
                .get(IDX_CALLSIGN)
                .and_then(Value::as_str)
                .map(|c| c.trim().to_string())
                .unwrap_or_default(),
            latitude,
            longitude,
            altitude_m,
            heading_deg: number(state, IDX_TRUE_TRACK).unwrap_or(0.0),
            ground_speed_mps: number(state, IDX_VELOCITY).unwrap_or(0.0),
            vertical_rate_mps: number(state, IDX_VERTICAL_RATE).unwrap_or(0.0),
            on_ground,
            last_update,
        })
    }
}

impl Protocol for OpenSkyParser {
    type Message = Vec<AircraftState>;
    type Error = ParseError;

    fn parse(&mut self, input: &[u8]) -> Result<Vec<AircraftState>, ParseError> {
        let response: Response = serde_json::from_slice(input)?;
        let fallback_time = response
            .time
            .and_then(|t| Utc.timestamp_opt(t, 0).single())
            .unwrap_or(self.received_at);

        // OpenSky sends "states": null when the box is empty
        let Some(states) = response.states else {
            return Ok(Vec::new());
        };

        Ok(states
            .iter()
            .filter_map(|value| {
                let parsed = value
                    .as_array()
                    .and_then(|state| Self::convert(state, fallback_time));
                if parsed.is_none() {
                    debug!("Skipping malformed state vector");
                }
                parsed
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(body: &str) -> Result<Vec<AircraftState>, ParseError> {
        OpenSkyParser::new(Utc::now()).parse(body.as_bytes())
    }

    #[test]
    fn test_parse_state_vector() {
        let body = r#"{"time": 1700000000, "states": [
            ["a1b2c3", "DAL42   ", "United States", 1699999998, 1699999999,
             -84.4, 33.7, 1500.0, false, 120.0, 90.0, -3.5, null, 1550.0, "1200", false, 0]
        ]}"#;
        let aircraft = parse(body).unwrap();
        assert_eq!(aircraft.len(), 1);

        let a = &aircraft[0];
        assert_eq!(a.icao, "A1B2C3");
        assert_eq!(a.callsign, "DAL42");
        assert!((a.latitude - 33.7).abs() < f64::EPSILON);
        assert!((a.longitude + 84.4).abs() < f64::EPSILON);
        assert!((a.altitude_m - 1500.0).abs() < f64::EPSILON);
        assert!((a.ground_speed_mps - 120.0).abs() < f64::EPSILON);
        assert!((a.vertical_rate_mps + 3.5).abs() < f64::EPSILON);
        assert_eq!(a.last_update.timestamp(), 1_699_999_998);
    }

    #[test]
    fn test_on_ground_forces_zero_altitude() {
        let body = r#"{"time": 1700000000, "states": [
            ["abc123", "", "US", null, 1699999999, -84.43, 33.64, null, true, 5.0, 180.0, null]
        ]}"#;
        let a = &parse(body).unwrap()[0];
        assert!(a.on_ground);
        assert!(a.altitude_m.abs() < f64::EPSILON);
        assert_eq!(a.last_update.timestamp(), 1_699_999_999);
    }

    #[test]
    fn test_null_states_is_empty() {
        assert!(parse(r#"{"time": 1700000000, "states": null}"#).unwrap().is_empty());
    }

    #[test]
    fn test_short_vectors_are_skipped() {
        let body = r#"{"time": 1700000000, "states": [
            ["abc123", "X"],
            ["def456", "Y", "US", null, null, -84.0, 33.0, 100.0, false, 1.0, 2.0, 0.0]
        ]}"#;
        let aircraft = parse(body).unwrap();
        assert_eq!(aircraft.len(), 1);
        assert_eq!(aircraft[0].icao, "DEF456");
    }
}
