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

//! ADS-B client library for polling and parsing HTTP aircraft feeds.
//!
//! This library fetches the aircraft around a reference position from public
//! ADS-B aggregators and hands out immutable snapshots of what the feed
//! reported. It is split into layers that can be used independently or
//! composed together:
//!
//! - **Protocol layer**: Request URLs and response parsing (airplanes.live
//!   `point` API, OpenSky `states/all`), normalized to SI units
//! - **Snapshot layer**: Per-response aircraft collections keyed by ICAO address
//! - **Feed layer**: Timed polling with linear backoff, a failure circuit
//!   breaker and an optional disk cache
//! - **Geo helpers**: Great-circle distance, bearing and radar-plane projection
//!
//! # Quick Start
//!
//! Use [`FeedDataSource`] with an [`HttpFetcher`] for full-stack operation:
//!
//! ```no_run
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! use adsb_client::{FeedConfig, FeedDataSource, HttpFetcher};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), adsb_client::FeedError> {
//!     let fetcher = HttpFetcher::new(Duration::from_secs(10))?;
//!     let feed = FeedDataSource::new(
//!         FeedConfig {
//!             reference: (33.9425, -118.4081),
//!             search_radius_nm: 40.0,
//!             ..Default::default()
//!         },
//!         Arc::new(fetcher),
//!     );
//!     feed.start();
//!
//!     // Polling approach
//!     loop {
//!         for aircraft in feed.snapshot().iter() {
//!             println!("{}: {}", aircraft.icao, aircraft.callsign);
//!         }
//!         tokio::time::sleep(Duration::from_secs(5)).await;
//!     }
//! }
//! ```
//!
//! # Using Individual Layers
//!
//! ## Protocol Layer Only
//!
//! ```
//! use adsb_client::protocol::{AirplanesLiveParser, Protocol};
//!
//! let body = br#"{"now": 1700000000000, "ac": [
//!     {"hex": "a1b2c3", "flight": "UAL123 ", "lat": 34.0, "lon": -118.5, "alt_baro": 35000}
//! ]}"#;
//! let mut parser = AirplanesLiveParser::new(chrono::Utc::now());
//! let aircraft = parser.parse(body).unwrap();
//! assert_eq!(aircraft[0].callsign, "UAL123");
//! ```
//!
//! ## Geo Helpers Only
//!
//! ```
//! use adsb_client::geo::{bearing_deg, distance_nm};
//!
//! let nm = distance_nm(33.9425, -118.4081, 40.6413, -73.7781);
//! let brg = bearing_deg(33.9425, -118.4081, 40.6413, -73.7781);
//! println!("LAX to JFK: {nm:.0} NM on {brg:.0}°");
//! ```

pub mod cache;
pub mod feed;
pub mod geo;
pub mod protocol;
pub mod snapshot;
pub mod units;

pub use cache::{CacheError, CachedSnapshot, SnapshotCache};
pub use feed::{
    FeedConfig, FeedDataSource, FeedEndpoint, FeedError, FeedEvent, FeedFetcher, FeedState,
    FetchOutcome, HttpFetcher,
};
pub use protocol::{FeedRequest, ParseError, Protocol, ProtocolType};
pub use snapshot::{AircraftSnapshot, AircraftState};
