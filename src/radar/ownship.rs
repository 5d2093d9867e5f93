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

use adsb_client::units::{meters_to_feet, mps_to_knots};
use serde::{Deserialize, Serialize};

/// Default reference point: Atlanta Hartsfield-Jackson (KATL).
pub const DEFAULT_LATITUDE: f64 = 33.6407;
pub const DEFAULT_LONGITUDE: f64 = -84.4277;
pub const DEFAULT_ALTITUDE_M: f64 = 313.0;

/// Observer position and motion (SI units).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct OwnShipPosition {
    pub latitude: f64,
    pub longitude: f64,
    /// Altitude in meters.
    pub altitude_m: f64,
    /// True heading in degrees; the radar plane is drawn heading-up.
    pub heading_deg: f64,
    /// Ground speed in meters per second.
    pub ground_speed_mps: f64,
}

impl Default for OwnShipPosition {
    fn default() -> Self {
        Self {
            latitude: DEFAULT_LATITUDE,
            longitude: DEFAULT_LONGITUDE,
            altitude_m: DEFAULT_ALTITUDE_M,
            heading_deg: 0.0,
            ground_speed_mps: 0.0,
        }
    }
}

impl OwnShipPosition {
    /// Stationary observer at a position.
    #[must_use]
    pub fn new(latitude: f64, longitude: f64, altitude_m: f64) -> Self {
        Self {
            latitude,
            longitude,
            altitude_m,
            ..Self::default()
        }
    }

    #[must_use]
    pub fn altitude_ft(&self) -> f64 {
        meters_to_feet(self.altitude_m)
    }

    #[must_use]
    pub fn ground_speed_kt(&self) -> f64 {
        mps_to_knots(self.ground_speed_mps)
    }
}
