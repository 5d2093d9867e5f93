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

//! Application configuration management.
//!
//! This module handles persistent configuration storage using TOML format via
//! `confy`. Every field has a serde default, so a partial or older file loads
//! cleanly and picks up defaults for anything it does not mention.

use std::path::Path;
use std::time::Duration;

use adsb_client::{FeedConfig, FeedEndpoint, ProtocolType, SnapshotCache};
use log::warn;
use serde::{Deserialize, Serialize};

use crate::radar::controller::DEFAULT_RANGE_PRESETS_NM;
use crate::radar::{ControllerConfig, OwnShipPosition, SelectionPolicy};
use crate::threat::ThreatThresholds;

/// Name used for the config file and the cache directory.
pub const APP_NAME: &str = "traffic-radar";

/// Feed polling settings
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct FeedSettings {
    /// Feed response format
    #[serde(default)]
    pub protocol: ProtocolType,

    /// API base URL; the protocol's public endpoint when unset
    #[serde(default)]
    pub base_url: Option<String>,

    /// Retry a failed fetch against a second feed in the same cycle
    #[serde(default = "default_true")]
    pub fallback_enabled: bool,

    /// Response format of the fallback feed
    #[serde(default = "default_fallback_protocol")]
    pub fallback_protocol: ProtocolType,

    /// Fallback API base URL; the fallback protocol's public endpoint when unset
    #[serde(default)]
    pub fallback_base_url: Option<String>,

    /// Seconds between fetches, and the backoff step
    #[serde(default = "default_poll_interval_secs")]
    pub poll_interval_secs: u64,

    /// Upper bound on the backoff delay in seconds
    #[serde(default = "default_max_backoff_secs")]
    pub max_backoff_secs: u64,

    /// Consecutive failures before polling halts (0 = never)
    #[serde(default = "default_max_consecutive_failures")]
    pub max_consecutive_failures: u32,

    /// Per-request timeout in seconds
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,

    /// Search radius in NM when the radar does not forward one
    #[serde(default = "default_search_radius_nm")]
    pub search_radius_nm: f64,

    /// Keep a short-lived disk cache of the last snapshot
    #[serde(default = "default_true")]
    pub cache_enabled: bool,

    /// Cache entries older than this are ignored
    #[serde(default = "default_cache_max_age_secs")]
    pub cache_max_age_secs: u64,
}

/// Radar display and control settings
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct RadarSettings {
    /// Selectable ranges in NM
    #[serde(default = "default_range_presets_nm")]
    pub range_presets_nm: Vec<f64>,

    /// Range at startup in NM
    #[serde(default = "default_initial_range_nm")]
    pub initial_range_nm: f64,

    /// Maximum targets kept per refresh
    #[serde(default = "default_max_targets")]
    pub max_targets: usize,

    /// "cap_then_sort" or "sort_then_cap"
    #[serde(default)]
    pub selection_policy: SelectionPolicy,

    /// Refreshes per second
    #[serde(default = "default_tick_hz")]
    pub tick_hz: f64,

    /// Widen the range when nothing is in view
    #[serde(default = "default_true")]
    pub auto_range: bool,

    /// Margin over the nearest aircraft when auto-ranging
    #[serde(default = "default_nearest_margin")]
    pub nearest_margin: f64,

    /// Margin over the farthest target when fitting
    #[serde(default = "default_fit_margin")]
    pub fit_margin: f64,

    /// Move the feed's reference with own-ship
    #[serde(default = "default_true")]
    pub forward_reference: bool,

    /// Forwarded search radius as a multiple of the active range
    #[serde(default = "default_search_radius_factor")]
    pub search_radius_factor: Option<f64>,
}

/// Application configuration stored in TOML format
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct AppConfig {
    /// Configuration schema version for migrations
    #[serde(default = "default_config_version")]
    pub config_version: u32,

    /// Own-ship latitude (defaults to KATL)
    #[serde(default)]
    pub override_latitude: Option<f64>,

    /// Own-ship longitude (defaults to KATL)
    #[serde(default)]
    pub override_longitude: Option<f64>,

    /// Own-ship altitude in meters
    #[serde(default)]
    pub override_altitude_m: Option<f64>,

    #[serde(default)]
    pub feed: FeedSettings,

    #[serde(default)]
    pub radar: RadarSettings,

    /// Threat tier thresholds, most severe first
    #[serde(default)]
    pub thresholds: ThreatThresholds,
}

// Default value functions for serde
fn default_config_version() -> u32 {
    1 // Current schema version
}

fn default_true() -> bool {
    true
}

fn default_fallback_protocol() -> ProtocolType {
    ProtocolType::OpenSky
}

fn default_poll_interval_secs() -> u64 {
    5
}

fn default_max_backoff_secs() -> u64 {
    300
}

fn default_max_consecutive_failures() -> u32 {
    10
}

fn default_request_timeout_secs() -> u64 {
    10
}

fn default_search_radius_nm() -> f64 {
    40.0
}

fn default_cache_max_age_secs() -> u64 {
    300
}

fn default_range_presets_nm() -> Vec<f64> {
    DEFAULT_RANGE_PRESETS_NM.to_vec()
}

fn default_initial_range_nm() -> f64 {
    40.0
}

fn default_max_targets() -> usize {
    50
}

fn default_tick_hz() -> f64 {
    2.0
}

fn default_nearest_margin() -> f64 {
    0.5
}

fn default_fit_margin() -> f64 {
    0.2
}

#[allow(clippy::unnecessary_wraps, reason = "serde default for an optional field")]
fn default_search_radius_factor() -> Option<f64> {
    Some(1.5)
}

impl Default for FeedSettings {
    fn default() -> Self {
        Self {
            protocol: ProtocolType::default(),
            base_url: None,
            fallback_enabled: true,
            fallback_protocol: default_fallback_protocol(),
            fallback_base_url: None,
            poll_interval_secs: default_poll_interval_secs(),
            max_backoff_secs: default_max_backoff_secs(),
            max_consecutive_failures: default_max_consecutive_failures(),
            request_timeout_secs: default_request_timeout_secs(),
            search_radius_nm: default_search_radius_nm(),
            cache_enabled: true,
            cache_max_age_secs: default_cache_max_age_secs(),
        }
    }
}

impl Default for RadarSettings {
    fn default() -> Self {
        Self {
            range_presets_nm: default_range_presets_nm(),
            initial_range_nm: default_initial_range_nm(),
            max_targets: default_max_targets(),
            selection_policy: SelectionPolicy::default(),
            tick_hz: default_tick_hz(),
            auto_range: true,
            nearest_margin: default_nearest_margin(),
            fit_margin: default_fit_margin(),
            forward_reference: true,
            search_radius_factor: default_search_radius_factor(),
        }
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            config_version: default_config_version(),
            override_latitude: None,
            override_longitude: None,
            override_altitude_m: None,
            feed: FeedSettings::default(),
            radar: RadarSettings::default(),
            thresholds: ThreatThresholds::default(),
        }
    }
}

impl AppConfig {
    /// Load configuration from the platform config directory
    pub fn load() -> Result<Self, confy::ConfyError> {
        confy::load(APP_NAME, "config")
    }

    /// Load configuration from an explicit file, creating it if missing
    pub fn load_from(path: &Path) -> Result<Self, confy::ConfyError> {
        confy::load_path(path)
    }

    /// Get the config file path for display to user
    pub fn get_config_path() -> Result<std::path::PathBuf, confy::ConfyError> {
        confy::get_configuration_file_path(APP_NAME, "config")
    }

    /// Initial own-ship position; unset fields fall back to KATL.
    #[must_use]
    pub fn own_ship(&self) -> OwnShipPosition {
        let default = OwnShipPosition::default();
        OwnShipPosition::new(
            self.override_latitude.unwrap_or(default.latitude),
            self.override_longitude.unwrap_or(default.longitude),
            self.override_altitude_m.unwrap_or(default.altitude_m),
        )
    }

    /// Feed data source configuration.
    ///
    /// A cache that cannot be set up is logged and left out.
    #[must_use]
    pub fn feed_config(&self) -> FeedConfig {
        let feed = &self.feed;
        let own = self.own_ship();

        let cache = if feed.cache_enabled {
            match SnapshotCache::new(APP_NAME, Duration::from_secs(feed.cache_max_age_secs)) {
                Ok(cache) => Some(cache),
                Err(e) => {
                    warn!("Snapshot cache disabled: {}", e);
                    None
                }
            }
        } else {
            None
        };

        let fallback = feed.fallback_enabled.then(|| match &feed.fallback_base_url {
            Some(url) => FeedEndpoint::new(feed.fallback_protocol, url.clone()),
            None => FeedEndpoint::public(feed.fallback_protocol),
        });

        FeedConfig {
            base_url: feed
                .base_url
                .clone()
                .unwrap_or_else(|| feed.protocol.default_base_url().to_string()),
            protocol: feed.protocol,
            fallback,
            reference: (own.latitude, own.longitude),
            search_radius_nm: feed.search_radius_nm,
            poll_interval: Duration::from_secs(feed.poll_interval_secs.max(1)),
            max_backoff: Duration::from_secs(feed.max_backoff_secs),
            max_consecutive_failures: feed.max_consecutive_failures,
            request_timeout: Duration::from_secs(feed.request_timeout_secs.max(1)),
            cache,
            ..FeedConfig::default()
        }
    }

    #[must_use]
    pub fn controller_config(&self) -> ControllerConfig {
        let radar = &self.radar;
        ControllerConfig {
            range_presets_nm: radar.range_presets_nm.clone(),
            initial_range_nm: radar.initial_range_nm,
            max_targets: radar.max_targets,
            selection_policy: radar.selection_policy,
            tick_hz: radar.tick_hz,
            auto_range: radar.auto_range,
            nearest_margin: radar.nearest_margin,
            fit_margin: radar.fit_margin,
            forward_reference: radar.forward_reference,
            search_radius_factor: radar.search_radius_factor,
        }
    }

    /// Check for settings that load fine but behave oddly; each problem is
    /// logged as a warning and returned.
    pub fn validate(&self) -> Vec<String> {
        let mut problems = Vec::new();

        if !self.thresholds.is_nested() {
            problems.push(
                "threat thresholds are not nested; targets may skip tiers as they close".to_string(),
            );
        }
        if self.radar.max_targets == 0 {
            problems.push("radar.max_targets is 0; no targets will be shown".to_string());
        }
        if self.radar.range_presets_nm.iter().any(|r| !r.is_finite() || *r <= 0.0) {
            problems.push("radar.range_presets_nm contains non-positive entries".to_string());
        }
        if self.feed.max_backoff_secs < self.feed.poll_interval_secs {
            problems.push("feed.max_backoff_secs is below the poll interval".to_string());
        }
        if let Some(lat) = self.override_latitude {
            if !(-90.0..=90.0).contains(&lat) {
                problems.push(format!("override_latitude {lat} is out of range"));
            }
        }
        if let Some(lon) = self.override_longitude {
            if !(-180.0..=180.0).contains(&lon) {
                problems.push(format!("override_longitude {lon} is out of range"));
            }
        }

        for problem in &problems {
            warn!("Config: {}", problem);
        }
        problems
    }
}
