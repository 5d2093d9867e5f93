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

//! Protocol layer for HTTP aircraft feeds.
//!
//! Each protocol knows how to build a request URL around a reference point and
//! how to turn a response body into normalized [`AircraftState`] records.
//! Feed-native units are converted to SI here so nothing downstream has to
//! care which feed the data came from.
//!
//! Malformed individual records are skipped; only a response that cannot be
//! read as a whole fails with a [`ParseError`].

mod airplanes_live;
mod opensky;

pub use airplanes_live::AirplanesLiveParser;
pub use opensky::OpenSkyParser;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::snapshot::AircraftState;

/// Smallest search radius a feed request may ask for, in nautical miles.
pub const MIN_RADIUS_NM: f64 = 1.0;

/// Largest search radius a feed request may ask for, in nautical miles.
pub const MAX_RADIUS_NM: f64 = 250.0;

/// Errors that can occur during response parsing.
#[derive(Debug, Error)]
pub enum ParseError {
    #[error("invalid response format: {0}")]
    InvalidFormat(String),

    #[error("missing required field: {0}")]
    MissingField(&'static str),

    #[error("invalid JSON: {0}")]
    Json(#[from] serde_json::Error),
}

/// Trait for protocol parsers.
///
/// Implement this trait to add support for new feed formats.
pub trait Protocol {
    /// The message type produced by this parser.
    type Message;
    /// The error type for parsing failures.
    type Error;

    /// Parse a complete response body into a message.
    fn parse(&mut self, input: &[u8]) -> Result<Self::Message, Self::Error>;
}

/// Area a feed request is centered on.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FeedRequest {
    /// Reference latitude in degrees.
    pub latitude: f64,
    /// Reference longitude in degrees.
    pub longitude: f64,
    /// Requested search radius in nautical miles (clamped when used).
    pub radius_nm: f64,
}

impl FeedRequest {
    #[must_use]
    pub fn new(latitude: f64, longitude: f64, radius_nm: f64) -> Self {
        Self {
            latitude,
            longitude,
            radius_nm,
        }
    }

    /// Search radius clamped to what feeds accept.
    #[must_use]
    pub fn clamped_radius_nm(&self) -> f64 {
        if self.radius_nm.is_nan() {
            return MAX_RADIUS_NM;
        }
        self.radius_nm.clamp(MIN_RADIUS_NM, MAX_RADIUS_NM)
    }
}

/// Supported feed formats.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProtocolType {
    /// airplanes.live / ADSBExchange v2 style `point` endpoint (default).
    #[default]
    AirplanesLive,
    /// OpenSky Network `states/all` endpoint with a bounding box.
    #[serde(rename = "opensky")]
    OpenSky,
}

impl ProtocolType {
    /// Build the request URL for this protocol.
    #[must_use]
    pub fn request_url(self, base_url: &str, request: &FeedRequest) -> String {
        let base = base_url.trim_end_matches('/');
        match self {
            Self::AirplanesLive => airplanes_live::request_url(base, request),
            Self::OpenSky => opensky::request_url(base, request),
        }
    }

    /// Parse a response body into aircraft states.
    ///
    /// `received_at` stands in for the feed's own clock when the response
    /// does not carry one.
    pub fn parse(
        self,
        body: &[u8],
        received_at: DateTime<Utc>,
    ) -> Result<Vec<AircraftState>, ParseError> {
        if body.iter().all(u8::is_ascii_whitespace) {
            return Err(ParseError::InvalidFormat("empty response body".to_string()));
        }
        match self {
            Self::AirplanesLive => AirplanesLiveParser::new(received_at).parse(body),
            Self::OpenSky => OpenSkyParser::new(received_at).parse(body),
        }
    }

    /// Default public endpoint for this protocol.
    #[must_use]
    pub fn default_base_url(self) -> &'static str {
        match self {
            Self::AirplanesLive => "https://api.airplanes.live/v2",
            Self::OpenSky => "https://opensky-network.org/api/states/all",
        }
    }
}

impl std::fmt::Display for ProtocolType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::AirplanesLive => write!(f, "airplanes.live"),
            Self::OpenSky => write!(f, "OpenSky"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_radius_clamped() {
        assert!((FeedRequest::new(0.0, 0.0, 0.2).clamped_radius_nm() - 1.0).abs() < f64::EPSILON);
        assert!((FeedRequest::new(0.0, 0.0, 40.0).clamped_radius_nm() - 40.0).abs() < f64::EPSILON);
        assert!((FeedRequest::new(0.0, 0.0, 900.0).clamped_radius_nm() - 250.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_request_url_airplanes_live() {
        let request = FeedRequest::new(33.6407, -84.4277, 400.0);
        let url = ProtocolType::AirplanesLive.request_url("https://api.airplanes.live/v2/", &request);
        assert_eq!(url, "https://api.airplanes.live/v2/point/33.6407/-84.4277/250");
    }

    #[test]
    fn test_request_url_opensky_bounding_box() {
        let request = FeedRequest::new(0.0, 10.0, 60.0);
        let url = ProtocolType::OpenSky.request_url("https://opensky-network.org/api/states/all", &request);
        assert!(url.starts_with("https://opensky-network.org/api/states/all?lamin="));
        assert!(url.contains("lamin=-1.0000"));
        assert!(url.contains("lamax=1.0000"));
        assert!(url.contains("lomin=9.0000"));
        assert!(url.contains("lomax=11.0000"));
    }

    #[test]
    fn test_empty_body_is_invalid() {
        let result = ProtocolType::AirplanesLive.parse(b"  \n", Utc::now());
        assert!(matches!(result, Err(ParseError::InvalidFormat(_))));
    }

    #[test]
    fn test_protocol_type_serde_names() {
        let json = serde_json::to_string(&ProtocolType::OpenSky).unwrap();
        assert_eq!(json, "\"opensky\"");
        let parsed: ProtocolType = serde_json::from_str("\"airplanes_live\"").unwrap();
        assert_eq!(parsed, ProtocolType::AirplanesLive);
    }
}
