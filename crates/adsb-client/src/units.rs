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

//! Aviation unit conversions.
//!
//! Feeds report altitude in feet, speed in knots and vertical rate in feet per
//! minute. Everything past the protocol layer works in SI units, and the radar
//! layer converts back for display.

/// Meters per foot.
pub const METERS_PER_FOOT: f64 = 0.3048;

/// Kilometers per nautical mile.
pub const KM_PER_NM: f64 = 1.852;

/// Meters per second in one knot.
pub const MPS_PER_KNOT: f64 = KM_PER_NM * 1000.0 / 3600.0;

/// Meters per second in one foot per minute.
pub const MPS_PER_FPM: f64 = METERS_PER_FOOT / 60.0;

#[must_use]
pub fn feet_to_meters(feet: f64) -> f64 {
    feet * METERS_PER_FOOT
}

#[must_use]
pub fn meters_to_feet(meters: f64) -> f64 {
    meters / METERS_PER_FOOT
}

#[must_use]
pub fn knots_to_mps(knots: f64) -> f64 {
    knots * MPS_PER_KNOT
}

#[must_use]
pub fn mps_to_knots(mps: f64) -> f64 {
    mps / MPS_PER_KNOT
}

#[must_use]
pub fn fpm_to_mps(fpm: f64) -> f64 {
    fpm * MPS_PER_FPM
}

#[must_use]
pub fn mps_to_fpm(mps: f64) -> f64 {
    mps / MPS_PER_FPM
}
