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

//! Great-circle geometry for the radar plane.
//!
//! All functions are pure. Callers are responsible for passing finite
//! coordinates; NaN in gives NaN out.

use serde::{Deserialize, Serialize};

use crate::units::KM_PER_NM;

/// Mean Earth radius in kilometers.
const EARTH_RADIUS_KM: f64 = 6371.0;

/// Calculate distance in nautical miles between two lat/lon points using the Haversine formula.
#[must_use]
pub fn distance_nm(lat1: f64, lon1: f64, lat2: f64, lon2: f64) -> f64 {
    let lat1_rad = lat1.to_radians();
    let lat2_rad = lat2.to_radians();
    let delta_lat = (lat2 - lat1).to_radians();
    let delta_lon = (lon2 - lon1).to_radians();

    let a = (delta_lat / 2.0).sin().powi(2)
        + lat1_rad.cos() * lat2_rad.cos() * (delta_lon / 2.0).sin().powi(2);
    let c = 2.0 * a.sqrt().atan2((1.0 - a).sqrt());

    EARTH_RADIUS_KM * c / KM_PER_NM
}

/// Calculate initial bearing from point 1 to point 2 in degrees, normalized to [0, 360).
#[must_use]
pub fn bearing_deg(lat1: f64, lon1: f64, lat2: f64, lon2: f64) -> f64 {
    let lat1_rad = lat1.to_radians();
    let lat2_rad = lat2.to_radians();
    let delta_lon = (lon2 - lon1).to_radians();

    let x = delta_lon.sin() * lat2_rad.cos();
    let y = lat1_rad.cos() * lat2_rad.sin() - lat1_rad.sin() * lat2_rad.cos() * delta_lon.cos();

    normalize_degrees(x.atan2(y).to_degrees())
}

/// Wrap an angle into [0, 360).
#[must_use]
pub fn normalize_degrees(degrees: f64) -> f64 {
    let wrapped = degrees.rem_euclid(360.0);
    // rem_euclid can round up to exactly 360.0 for tiny negative inputs
    if wrapped >= 360.0 {
        0.0
    } else {
        wrapped
    }
}

/// Position on a heading-up circular radar display.
///
/// Both components lie in [-1, 1]; `y` points up (own heading) and `x` to the
/// right, so a target dead ahead at full range sits at (0, 1).
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct RadarPoint {
    pub x: f64,
    pub y: f64,
}

/// Project a target onto the heading-up radar plane.
///
/// The bearing is made relative to own heading, the distance is normalized by
/// the display range and clamped to [0, 1]. Only meant for display layout.
#[must_use]
pub fn radar_plane_position(
    distance_nm: f64,
    bearing_deg: f64,
    own_heading_deg: f64,
    range_nm: f64,
) -> RadarPoint {
    let relative = (bearing_deg - own_heading_deg).to_radians();
    let normalized = if range_nm > 0.0 {
        (distance_nm / range_nm).clamp(0.0, 1.0)
    } else {
        0.0
    };

    RadarPoint {
        x: normalized * relative.sin(),
        y: normalized * relative.cos(),
    }
}
