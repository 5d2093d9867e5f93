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

//! airplanes.live v2 JSON parser.
//!
//! Response format (abridged):
//! ```text
//! { "now": 1700000000000, "ac": [
//!     { "hex": "a1b2c3", "flight": "UAL123  ", "r": "N12345",
//!       "lat": 33.7, "lon": -84.4, "alt_baro": 3500 | "ground",
//!       "gs": 210.5, "track": 270.1, "baro_rate": -640, "seen_pos": 0.4 }
//! ] }
//! ```
//! Altitude is in feet, speed in knots and rates in feet per minute.

use chrono::{DateTime, Duration, TimeZone, Utc};
use log::debug;
use serde::Deserialize;

use super::{FeedRequest, ParseError, Protocol};
use crate::snapshot::AircraftState;
use crate::units::{feet_to_meters, fpm_to_mps, knots_to_mps};

/// Altitude sentinel the feed uses for aircraft on the ground.
const GROUND_SENTINEL: &str = "ground";

pub(super) fn request_url(base: &str, request: &FeedRequest) -> String {
    format!(
        "{}/point/{:.4}/{:.4}/{:.0}",
        base,
        request.latitude,
        request.longitude,
        request.clamped_radius_nm()
    )
}

#[derive(Debug, Deserialize)]
struct Response {
    /// Server time in milliseconds since the epoch.
    now: Option<f64>,
    ac: Option<Vec<serde_json::Value>>,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum RawAltitude {
    Feet(f64),
    Text(String),
}

#[derive(Debug, Deserialize)]
struct RawAircraft {
    hex: Option<String>,
    flight: Option<String>,
    r: Option<String>,
    lat: Option<f64>,
    lon: Option<f64>,
    alt_baro: Option<RawAltitude>,
    gs: Option<f64>,
    track: Option<f64>,
    true_heading: Option<f64>,
    baro_rate: Option<f64>,
    geom_rate: Option<f64>,
    seen_pos: Option<f64>,
    seen: Option<f64>,
}

/// Normalized altitude: meters plus the on-ground flag.
///
/// Unknown or missing altitude reads as 0 m airborne, which is what the feed
/// consumers have always assumed.
fn normalize_altitude(raw: Option<&RawAltitude>) -> (f64, bool) {
    match raw {
        Some(RawAltitude::Feet(feet)) => (feet_to_meters(*feet), false),
        Some(RawAltitude::Text(text)) if text.eq_ignore_ascii_case(GROUND_SENTINEL) => (0.0, true),
        Some(RawAltitude::Text(_)) | None => (0.0, false),
    }
}

/// Parser for airplanes.live `point` responses.
#[derive(Debug)]
pub struct AirplanesLiveParser {
    received_at: DateTime<Utc>,
}

impl AirplanesLiveParser {
    /// Create a parser; `received_at` is used when the response has no `now`.
    #[must_use]
    pub fn new(received_at: DateTime<Utc>) -> Self {
        Self { received_at }
    }

    fn convert(raw: RawAircraft, now: DateTime<Utc>) -> Option<AircraftState> {
        let icao = raw.hex?.trim().to_uppercase();
        if icao.is_empty() {
            return None;
        }
        let latitude = raw.lat?;
        let longitude = raw.lon?;

        let callsign = raw
            .flight
            .map(|f| f.trim().to_string())
            .filter(|f| !f.is_empty())
            .or_else(|| raw.r.map(|r| r.trim().to_string()))
            .unwrap_or_default();

        let (altitude_m, on_ground) = normalize_altitude(raw.alt_baro.as_ref());
        let age_secs = raw.seen_pos.or(raw.seen).unwrap_or(0.0).max(0.0);
        // Float to int casts saturate; an age chrono cannot represent drops the record
        #[allow(clippy::cast_possible_truncation, reason = "saturating cast, range checked below")]
        let age = Duration::try_milliseconds((age_secs * 1000.0) as i64)?;
        let last_update = now.checked_sub_signed(age)?;

        Some(AircraftState {
            icao,
            callsign,
            latitude,
            longitude,
            altitude_m,
            heading_deg: raw.track.or(raw.true_heading).unwrap_or(0.0),
            ground_speed_mps: knots_to_mps(raw.gs.unwrap_or(0.0)),
            vertical_rate_mps: fpm_to_mps(raw.baro_rate.or(raw.geom_rate).unwrap_or(0.0)),
            on_ground,
            last_update,
        })
    }
}

impl Protocol for AirplanesLiveParser {
    type Message = Vec<AircraftState>;
    type Error = ParseError;

    fn parse(&mut self, input: &[u8]) -> Result<Vec<AircraftState>, ParseError> {
        let response: Response = serde_json::from_slice(input)?;
        let records = response.ac.ok_or(ParseError::MissingField("ac"))?;

        #[allow(clippy::cast_possible_truncation, reason = "epoch milliseconds fit in i64")]
        let now = response
            .now
            .and_then(|ms| Utc.timestamp_millis_opt(ms as i64).single())
            .unwrap_or(self.received_at);

        let total = records.len();
        let aircraft: Vec<AircraftState> = records
            .into_iter()
            .filter_map(|value| match serde_json::from_value::<RawAircraft>(value) {
                Ok(raw) => Self::convert(raw, now),
                Err(e) => {
                    debug!("Skipping malformed aircraft record: {}", e);
                    None
                }
            })
            .collect();

        if aircraft.len() < total {
            debug!("Parsed {} of {} aircraft records", aircraft.len(), total);
        }

        Ok(aircraft)
    }
}
