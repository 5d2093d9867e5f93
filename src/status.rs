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

//! Feed and radar status board for the console.

use std::collections::VecDeque;

use adsb_client::FeedEvent;
use chrono::{DateTime, Utc};

use crate::radar::RadarEvent;
use crate::threat::ThreatTier;

/// Number of diagnostics kept.
const MAX_DIAGNOSTICS: usize = 50;

/// Connection status for the aircraft feed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionStatus {
    Disconnected,
    Connecting,
    Connected,
    /// Fetches are failing but will be retried
    Error,
    /// Polling stopped after too many failures
    Halted,
}

/// Diagnostic message with timestamp
#[derive(Debug, Clone)]
pub struct DiagnosticMessage {
    pub timestamp: DateTime<Utc>,
    pub level: DiagnosticLevel,
    pub message: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DiagnosticLevel {
    Info,
    Warning,
    Error,
}

/// System status tracking feed health, radar state and diagnostics
#[derive(Debug, Clone)]
pub struct SystemStatus {
    // Feed
    pub feed_name: String,
    pub connection_status: ConnectionStatus,
    pub last_successful_fetch: Option<DateTime<Utc>>,
    pub consecutive_failures: u32,
    pub last_error: Option<String>,
    pub feed_aircraft: usize,
    pub total_fetches: u64,

    // Radar
    pub target_count: usize,
    pub highest_threat: Option<ThreatTier>,
    pub range_nm: f64,

    // Diagnostic messages (keep last 50)
    pub diagnostics: VecDeque<DiagnosticMessage>,
}

impl SystemStatus {
    pub fn new(feed_name: impl Into<String>, range_nm: f64) -> Self {
        Self {
            feed_name: feed_name.into(),
            connection_status: ConnectionStatus::Disconnected,
            last_successful_fetch: None,
            consecutive_failures: 0,
            last_error: None,
            feed_aircraft: 0,
            total_fetches: 0,
            target_count: 0,
            highest_threat: None,
            range_nm,
            diagnostics: VecDeque::with_capacity(MAX_DIAGNOSTICS),
        }
    }

    /// Update connection status
    pub fn set_connection_status(&mut self, status: ConnectionStatus) {
        if self.connection_status == status {
            return;
        }
        self.connection_status = status;

        match status {
            ConnectionStatus::Connecting => {
                self.add_diagnostic(DiagnosticLevel::Info, format!("Polling {}...", self.feed_name));
            }
            ConnectionStatus::Connected => {
                self.add_diagnostic(DiagnosticLevel::Info, format!("Receiving data from {}", self.feed_name));
            }
            ConnectionStatus::Disconnected => {
                self.add_diagnostic(DiagnosticLevel::Warning, format!("Stopped polling {}", self.feed_name));
            }
            ConnectionStatus::Error | ConnectionStatus::Halted => {}
        }
    }

    /// Fold a feed event into the board
    pub fn apply_feed_event(&mut self, event: &FeedEvent) {
        match event {
            FeedEvent::FetchSucceeded { aircraft_count, at } => {
                self.set_connection_status(ConnectionStatus::Connected);
                self.last_successful_fetch = Some(*at);
                self.consecutive_failures = 0;
                self.last_error = None;
                self.feed_aircraft = *aircraft_count;
                self.total_fetches += 1;
            }
            FeedEvent::FetchFailed {
                error,
                consecutive_failures,
                retry_in,
            } => {
                self.connection_status = ConnectionStatus::Error;
                self.consecutive_failures = *consecutive_failures;
                self.last_error = Some(error.clone());
                let message = match retry_in {
                    Some(delay) => format!("Fetch failed ({consecutive_failures}): {error}; retry in {}s", delay.as_secs()),
                    None => format!("Fetch failed ({consecutive_failures}): {error}"),
                };
                self.add_diagnostic(DiagnosticLevel::Warning, message);
            }
            FeedEvent::Halted { consecutive_failures } => {
                self.connection_status = ConnectionStatus::Halted;
                self.add_diagnostic(
                    DiagnosticLevel::Error,
                    format!("Polling halted after {consecutive_failures} consecutive failures"),
                );
            }
            FeedEvent::CacheLoaded {
                aircraft_count,
                saved_at,
            } => {
                self.feed_aircraft = *aircraft_count;
                self.add_diagnostic(
                    DiagnosticLevel::Info,
                    format!(
                        "Loaded {aircraft_count} cached aircraft from {}",
                        saved_at.format("%H:%M:%S")
                    ),
                );
            }
        }
    }

    /// Fold a radar event into the board
    pub fn apply_radar_event(&mut self, event: &RadarEvent) {
        match event {
            RadarEvent::TargetCountChanged { current, .. } => {
                self.target_count = *current;
            }
            RadarEvent::HighestThreatChanged { current, .. } => {
                self.highest_threat = *current;
                if let Some(tier @ (ThreatTier::TrafficAdvisory | ThreatTier::ResolutionAdvisory)) = current {
                    self.add_diagnostic(DiagnosticLevel::Warning, format!("{tier} traffic"));
                }
            }
            RadarEvent::RangeChanged {
                current, reason, ..
            } => {
                self.range_nm = *current;
                self.add_diagnostic(DiagnosticLevel::Info, format!("Range {current} NM ({reason:?})"));
            }
        }
    }

    /// Add a diagnostic message
    pub fn add_diagnostic(&mut self, level: DiagnosticLevel, message: String) {
        self.diagnostics.push_back(DiagnosticMessage {
            timestamp: Utc::now(),
            level,
            message,
        });

        // Keep only the last N messages
        while self.diagnostics.len() > MAX_DIAGNOSTICS {
            self.diagnostics.pop_front();
        }
    }

    /// One-line summary for the console
    #[must_use]
    pub fn summary(&self) -> String {
        let last_fetch = self.last_successful_fetch.map_or_else(
            || "never".to_string(),
            |t| format!("{}s ago", (Utc::now() - t).num_seconds().max(0)),
        );
        let threat = self.highest_threat.map_or("-", ThreatTier::label);

        let mut summary = format!(
            "{} {:?} | fetches {} | last fetch {} | feed {} | targets {} | highest {} | range {} NM",
            self.feed_name,
            self.connection_status,
            self.total_fetches,
            last_fetch,
            self.feed_aircraft,
            self.target_count,
            threat,
            self.range_nm
        );
        if self.consecutive_failures > 0 {
            summary.push_str(&format!(" | {} failures", self.consecutive_failures));
            if let Some(error) = &self.last_error {
                summary.push_str(&format!(": {error}"));
            }
        }
        summary
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::radar::controller::RangeChangeReason;

    #[test]
    fn test_feed_events_update_connection() {
        let mut status = SystemStatus::new("airplanes.live", 40.0);
        status.set_connection_status(ConnectionStatus::Connecting);

        status.apply_feed_event(&FeedEvent::FetchSucceeded {
            aircraft_count: 12,
            at: Utc::now(),
        });
        assert_eq!(status.connection_status, ConnectionStatus::Connected);
        assert_eq!(status.feed_aircraft, 12);

        status.apply_feed_event(&FeedEvent::FetchFailed {
            error: "HTTP error: 503".to_string(),
            consecutive_failures: 1,
            retry_in: Some(Duration::from_secs(5)),
        });
        assert_eq!(status.connection_status, ConnectionStatus::Error);
        assert_eq!(status.last_error.as_deref(), Some("HTTP error: 503"));
        // Previous count is kept
        assert_eq!(status.feed_aircraft, 12);

        status.apply_feed_event(&FeedEvent::Halted { consecutive_failures: 10 });
        assert_eq!(status.connection_status, ConnectionStatus::Halted);
        assert_eq!(
            status.diagnostics.back().map(|d| d.level),
            Some(DiagnosticLevel::Error)
        );
    }

    #[test]
    fn test_radar_events_update_board() {
        let mut status = SystemStatus::new("OpenSky", 40.0);
        status.apply_radar_event(&RadarEvent::TargetCountChanged { previous: 0, current: 3 });
        status.apply_radar_event(&RadarEvent::HighestThreatChanged {
            previous: None,
            current: Some(ThreatTier::ResolutionAdvisory),
        });
        status.apply_radar_event(&RadarEvent::RangeChanged {
            previous: 40.0,
            current: 80.0,
            reason: RangeChangeReason::StepUp,
        });

        assert_eq!(status.target_count, 3);
        assert_eq!(status.highest_threat, Some(ThreatTier::ResolutionAdvisory));
        assert!((status.range_nm - 80.0).abs() < f64::EPSILON);

        let summary = status.summary();
        assert!(summary.contains("targets 3"));
        assert!(summary.contains("highest RA"));
        assert!(summary.contains("range 80 NM"));
    }

    #[test]
    fn test_diagnostics_capped() {
        let mut status = SystemStatus::new("feed", 10.0);
        for i in 0..120 {
            status.add_diagnostic(DiagnosticLevel::Info, format!("message {i}"));
        }
        assert_eq!(status.diagnostics.len(), 50);
        assert_eq!(status.diagnostics.front().map(|d| d.message.as_str()), Some("message 70"));
    }
}
