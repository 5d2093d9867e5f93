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

//! Console command parsing and target table rendering.

use adsb_client::units::{feet_to_meters, knots_to_mps};
use thiserror::Error;

use crate::radar::{OwnShipPosition, RadarTarget};

pub const HELP: &str = "\
Commands:
  c                      cycle range preset
  + / -                  step range up / down
  r <nm>                 set exact range
  f                      fit range to visible targets
  n                      range to nearest aircraft
  a                      toggle auto-range
  p <lat> <lon> [alt_ft] [hdg] [gs_kt]
                         move own-ship
  t                      show targets
  j                      dump targets as JSON
  s                      show status
  d                      show recent diagnostics
  x                      fetch now
  restart                restart a halted feed
  h                      this help
  q                      quit";

/// A parsed console command.
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    CycleRange,
    RangeUp,
    RangeDown,
    SetRange(f64),
    FitVisible,
    RangeToNearest,
    ToggleAutoRange,
    Position(OwnShipPosition),
    Targets,
    Json,
    Status,
    Diagnostics,
    FetchNow,
    Restart,
    Help,
    Quit,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum CommandError {
    #[error("empty command")]
    Empty,

    #[error("unknown command: {0} (h for help)")]
    Unknown(String),

    #[error("missing argument: {0}")]
    MissingArgument(&'static str),

    #[error("invalid number: {0}")]
    InvalidNumber(String),

    #[error("{0}")]
    OutOfRange(String),
}

fn number(arg: Option<&str>, name: &'static str) -> Result<f64, CommandError> {
    let arg = arg.ok_or(CommandError::MissingArgument(name))?;
    match arg.parse::<f64>() {
        Ok(value) if value.is_finite() => Ok(value),
        _ => Err(CommandError::InvalidNumber(arg.to_string())),
    }
}

fn optional_number(arg: Option<&str>, name: &'static str) -> Result<Option<f64>, CommandError> {
    arg.map(|a| number(Some(a), name)).transpose()
}

/// Parse one input line.
///
/// Own-ship altitude and speed are entered in feet and knots.
pub fn parse_command(line: &str) -> Result<Command, CommandError> {
    let mut words = line.split_whitespace();
    let Some(head) = words.next() else {
        return Err(CommandError::Empty);
    };

    let command = match head.to_ascii_lowercase().as_str() {
        "c" | "cycle" => Command::CycleRange,
        "+" | "up" => Command::RangeUp,
        "-" | "down" => Command::RangeDown,
        "r" | "range" => {
            let range = number(words.next(), "range")?;
            if range <= 0.0 {
                return Err(CommandError::OutOfRange(format!("range must be positive, got {range}")));
            }
            Command::SetRange(range)
        }
        "f" | "fit" => Command::FitVisible,
        "n" | "nearest" => Command::RangeToNearest,
        "a" | "auto" => Command::ToggleAutoRange,
        "p" | "pos" | "position" => {
            let latitude = number(words.next(), "latitude")?;
            let longitude = number(words.next(), "longitude")?;
            if !(-90.0..=90.0).contains(&latitude) || !(-180.0..=180.0).contains(&longitude) {
                return Err(CommandError::OutOfRange(format!(
                    "position {latitude}, {longitude} is not on Earth"
                )));
            }
            let altitude_ft = optional_number(words.next(), "altitude")?;
            let heading = optional_number(words.next(), "heading")?;
            let speed_kt = optional_number(words.next(), "ground speed")?;

            let mut own = OwnShipPosition::new(
                latitude,
                longitude,
                altitude_ft.map_or(OwnShipPosition::default().altitude_m, feet_to_meters),
            );
            own.heading_deg = heading.unwrap_or(0.0);
            own.ground_speed_mps = speed_kt.map_or(0.0, knots_to_mps);
            Command::Position(own)
        }
        "t" | "targets" => Command::Targets,
        "j" | "json" => Command::Json,
        "s" | "status" => Command::Status,
        "d" | "diag" => Command::Diagnostics,
        "x" | "fetch" => Command::FetchNow,
        "restart" => Command::Restart,
        "h" | "help" | "?" => Command::Help,
        "q" | "quit" | "exit" => Command::Quit,
        other => return Err(CommandError::Unknown(other.to_string())),
    };
    Ok(command)
}

/// Render targets as a fixed-width table, most severe first.
#[must_use]
pub fn format_targets(targets: &[RadarTarget]) -> String {
    if targets.is_empty() {
        return "No targets in range".to_string();
    }

    let mut out = format!(
        "{:<5} {:<8} {:>6} {:>5} {:>7} {:>7} {:>5} {:>6} {:>5}\n",
        "TIER", "IDENT", "DIST", "BRG", "ALT", "REL", "GS", "VS", "AGE"
    );
    for t in targets {
        out.push_str(&format!(
            "{:<5} {:<8} {:>6.1} {:>5.0} {:>7} {:>+7.0} {:>5.0} {:>+6.0} {:>5.0}\n",
            t.threat.label(),
            t.label(),
            t.distance_nm,
            t.bearing_deg,
            if t.on_ground {
                "GND".to_string()
            } else {
                format!("{:.0}", t.altitude_ft)
            },
            t.relative_altitude_ft,
            t.ground_speed_kt,
            t.vertical_rate_fpm,
            t.staleness_secs
        ));
    }
    out.pop();
    out
}

#[cfg(test)]
mod tests {
    use adsb_client::geo::RadarPoint;

    use super::*;
    use crate::threat::ThreatTier;

    #[test]
    fn test_simple_commands() {
        assert_eq!(parse_command("c"), Ok(Command::CycleRange));
        assert_eq!(parse_command(" + "), Ok(Command::RangeUp));
        assert_eq!(parse_command("-"), Ok(Command::RangeDown));
        assert_eq!(parse_command("FIT"), Ok(Command::FitVisible));
        assert_eq!(parse_command("restart"), Ok(Command::Restart));
        assert_eq!(parse_command("q"), Ok(Command::Quit));
    }

    #[test]
    fn test_range_command() {
        assert_eq!(parse_command("r 25"), Ok(Command::SetRange(25.0)));
        assert_eq!(parse_command("r"), Err(CommandError::MissingArgument("range")));
        assert_eq!(parse_command("r abc"), Err(CommandError::InvalidNumber("abc".to_string())));
        assert!(matches!(parse_command("r -5"), Err(CommandError::OutOfRange(_))));
        assert!(matches!(parse_command("r inf"), Err(CommandError::InvalidNumber(_))));
    }

    #[test]
    fn test_position_command() {
        let Ok(Command::Position(own)) = parse_command("p 34.0 -84.5 10000 270 250") else {
            panic!("expected position");
        };
        assert!((own.latitude - 34.0).abs() < f64::EPSILON);
        assert!((own.longitude + 84.5).abs() < f64::EPSILON);
        assert!((own.altitude_m - 3048.0).abs() < 1e-9);
        assert!((own.heading_deg - 270.0).abs() < f64::EPSILON);
        assert!((own.ground_speed_kt() - 250.0).abs() < 1e-9);

        let Ok(Command::Position(own)) = parse_command("p 34.0 -84.5") else {
            panic!("expected position");
        };
        assert!((own.altitude_m - 313.0).abs() < f64::EPSILON);

        assert!(matches!(parse_command("p 95 0"), Err(CommandError::OutOfRange(_))));
        assert_eq!(parse_command("p 34"), Err(CommandError::MissingArgument("longitude")));
    }

    #[test]
    fn test_unknown_and_empty() {
        assert_eq!(parse_command("   "), Err(CommandError::Empty));
        assert_eq!(parse_command("zoom"), Err(CommandError::Unknown("zoom".to_string())));
    }

    #[test]
    fn test_format_targets() {
        assert_eq!(format_targets(&[]), "No targets in range");

        let target = RadarTarget {
            icao: "A1B2C3".to_string(),
            callsign: String::new(),
            latitude: 33.65,
            longitude: -84.43,
            altitude_ft: 1200.0,
            heading_deg: 90.0,
            ground_speed_kt: 140.0,
            vertical_rate_fpm: -500.0,
            on_ground: false,
            distance_nm: 0.6,
            bearing_deg: 5.0,
            relative_altitude_ft: 173.0,
            threat: ThreatTier::ResolutionAdvisory,
            position: RadarPoint { x: 0.0, y: 0.06 },
            staleness_secs: 1.0,
        };
        let table = format_targets(&[target]);
        let lines: Vec<_> = table.lines().collect();
        assert_eq!(lines.len(), 2);
        assert!(lines[1].starts_with("RA    A1B2C3"));
        assert!(lines[1].contains("+173"));
    }
}
