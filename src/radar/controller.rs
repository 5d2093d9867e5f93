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

//! Radar control loop.
//!
//! [`RadarController`] owns the active range and own-ship position and reruns
//! the processor on every tick against the latest feed snapshot. The tick rate
//! is independent of the feed's poll cadence. Changes in target count, highest
//! threat and range are published as [`RadarEvent`]s once the tick that caused
//! them has finished.

use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use adsb_client::{AircraftSnapshot, FeedDataSource};
use chrono::{DateTime, Utc};
use log::{debug, info, warn};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use super::ownship::OwnShipPosition;
use super::processor::{nearest_distance_nm, RadarProcessor, RadarTarget, SelectionPolicy};
use crate::threat::{ThreatClassifier, ThreatTier};

/// Ranges closer than this are treated as equal.
const RANGE_EPSILON_NM: f64 = 1e-6;

/// Default range presets in nautical miles.
pub const DEFAULT_RANGE_PRESETS_NM: [f64; 5] = [10.0, 20.0, 40.0, 80.0, 150.0];

/// Where the controller reads aircraft from and pushes its reference position to.
pub trait TrafficSource: Send + Sync {
    /// Latest complete snapshot.
    fn snapshot(&self) -> Arc<AircraftSnapshot>;

    /// Move the area the source covers. Does not trigger a fetch.
    fn set_reference(&self, latitude: f64, longitude: f64, radius_nm: Option<f64>);
}

impl TrafficSource for FeedDataSource {
    fn snapshot(&self) -> Arc<AircraftSnapshot> {
        FeedDataSource::snapshot(self)
    }

    fn set_reference(&self, latitude: f64, longitude: f64, radius_nm: Option<f64>) {
        FeedDataSource::set_reference(self, latitude, longitude, radius_nm);
    }
}

/// Controller configuration.
#[derive(Debug, Clone)]
pub struct ControllerConfig {
    /// Selectable ranges in nautical miles.
    pub range_presets_nm: Vec<f64>,
    /// Range at startup.
    pub initial_range_nm: f64,
    /// Maximum number of targets kept per tick.
    pub max_targets: usize,
    pub selection_policy: SelectionPolicy,
    /// Ticks per second.
    pub tick_hz: f64,
    /// Expand the range automatically when nothing is in view.
    pub auto_range: bool,
    /// Margin applied to the nearest aircraft when auto-ranging (0.5 = +50%).
    pub nearest_margin: f64,
    /// Margin applied to the farthest target when fitting (0.2 = +20%).
    pub fit_margin: f64,
    /// Push own position to the traffic source on every update.
    pub forward_reference: bool,
    /// When forwarding, also ask for a search radius of `range × factor`.
    pub search_radius_factor: Option<f64>,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            range_presets_nm: DEFAULT_RANGE_PRESETS_NM.to_vec(),
            initial_range_nm: 40.0,
            max_targets: 50,
            selection_policy: SelectionPolicy::default(),
            tick_hz: 2.0,
            auto_range: true,
            nearest_margin: 0.5,
            fit_margin: 0.2,
            forward_reference: true,
            search_radius_factor: Some(1.5),
        }
    }
}

impl ControllerConfig {
    /// Interval between ticks.
    #[must_use]
    pub fn tick_period(&self) -> Duration {
        let hz = if self.tick_hz.is_finite() && self.tick_hz > 0.0 {
            self.tick_hz.clamp(0.1, 100.0)
        } else {
            1.0
        };
        Duration::from_secs_f64(1.0 / hz)
    }

    /// Presets sorted ascending with invalid and duplicate entries removed.
    fn sanitized_presets(&self) -> Vec<f64> {
        let mut presets: Vec<f64> = self
            .range_presets_nm
            .iter()
            .copied()
            .filter(|r| r.is_finite() && *r > 0.0)
            .collect();
        presets.sort_by(f64::total_cmp);
        presets.dedup_by(|a, b| (*a - *b).abs() < RANGE_EPSILON_NM);

        if presets.is_empty() {
            warn!("No usable range presets configured, using defaults");
            presets = DEFAULT_RANGE_PRESETS_NM.to_vec();
        }
        presets
    }
}

/// Why the range changed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RangeChangeReason {
    Manual,
    Cycle,
    StepUp,
    StepDown,
    AutoNearest,
    FitVisible,
}

/// Change notifications from the controller.
#[derive(Debug, Clone, PartialEq)]
pub enum RadarEvent {
    TargetCountChanged {
        previous: usize,
        current: usize,
    },
    HighestThreatChanged {
        previous: Option<ThreatTier>,
        current: Option<ThreatTier>,
    },
    RangeChanged {
        previous: f64,
        current: f64,
        reason: RangeChangeReason,
    },
}

/// Smallest preset at or above `distance_nm`, or the largest preset.
///
/// `presets` must be sorted ascending.
#[must_use]
pub fn smallest_preset_covering(presets: &[f64], distance_nm: f64) -> f64 {
    presets
        .iter()
        .copied()
        .find(|&p| p >= distance_nm)
        .or_else(|| presets.last().copied())
        .unwrap_or(distance_nm)
}

/// Range selection and periodic target refresh.
pub struct RadarController {
    source: Arc<dyn TrafficSource>,
    processor: RadarProcessor,
    presets: Vec<f64>,
    range_nm: f64,
    max_targets: usize,
    auto_range: bool,
    nearest_margin: f64,
    fit_margin: f64,
    forward_reference: bool,
    search_radius_factor: Option<f64>,
    tick_period: Duration,
    own: OwnShipPosition,
    targets: Vec<RadarTarget>,
    last_count: usize,
    highest_threat: Option<ThreatTier>,
    event_tx: broadcast::Sender<RadarEvent>,
}

impl std::fmt::Debug for RadarController {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RadarController")
            .field("range_nm", &self.range_nm)
            .field("auto_range", &self.auto_range)
            .field("own", &self.own)
            .field("targets", &self.targets.len())
            .field("highest_threat", &self.highest_threat)
            .finish_non_exhaustive()
    }
}

impl RadarController {
    /// Create a controller and push the initial reference to the source.
    #[must_use]
    pub fn new(
        config: &ControllerConfig,
        classifier: ThreatClassifier,
        source: Arc<dyn TrafficSource>,
        own: OwnShipPosition,
    ) -> Self {
        let presets = config.sanitized_presets();
        let range_nm = if config.initial_range_nm.is_finite() && config.initial_range_nm > 0.0 {
            config.initial_range_nm
        } else {
            presets[0]
        };
        let (event_tx, _) = broadcast::channel(64);

        let controller = Self {
            source,
            processor: RadarProcessor::new(classifier, config.selection_policy),
            presets,
            range_nm,
            max_targets: config.max_targets,
            auto_range: config.auto_range,
            nearest_margin: config.nearest_margin.max(0.0),
            fit_margin: config.fit_margin.max(0.0),
            forward_reference: config.forward_reference,
            search_radius_factor: config.search_radius_factor,
            tick_period: config.tick_period(),
            own,
            targets: Vec::new(),
            last_count: 0,
            highest_threat: None,
            event_tx,
        };
        controller.forward_reference();
        controller
    }

    /// Rerun the processor against the latest snapshot.
    ///
    /// When auto-range is on and nothing is in view although the feed has
    /// aircraft, the range is widened to cover the nearest one and the
    /// processor runs again within the same tick. Events go out after the
    /// tick has finished.
    pub fn tick(&mut self, now: DateTime<Utc>) {
        let snapshot = self.source.snapshot();
        let mut pending = Vec::new();

        self.targets = self.run_processor(&snapshot, now);

        if self.auto_range && self.targets.is_empty() && !snapshot.is_empty() {
            if let Some(event) = self
                .nearest_preset(&snapshot)
                .and_then(|range| self.apply_range(range, RangeChangeReason::AutoNearest))
            {
                pending.push(event);
                self.targets = self.run_processor(&snapshot, now);
            }
        }

        let count = self.targets.len();
        if count != self.last_count {
            pending.push(RadarEvent::TargetCountChanged {
                previous: self.last_count,
                current: count,
            });
            self.last_count = count;
        }

        let highest = self.targets.iter().map(|t| t.threat).max();
        if highest != self.highest_threat {
            pending.push(RadarEvent::HighestThreatChanged {
                previous: self.highest_threat,
                current: highest,
            });
            self.highest_threat = highest;
        }

        for event in pending {
            self.publish(event);
        }
    }

    fn run_processor(&self, snapshot: &AircraftSnapshot, now: DateTime<Utc>) -> Vec<RadarTarget> {
        self.processor
            .process(snapshot, &self.own, self.range_nm, self.max_targets, now)
    }

    fn publish(&self, event: RadarEvent) {
        debug!("Radar event: {:?}", event);
        // No subscribers is fine
        let _ = self.event_tx.send(event);
    }

    fn apply_range(&mut self, range_nm: f64, reason: RangeChangeReason) -> Option<RadarEvent> {
        if (range_nm - self.range_nm).abs() < RANGE_EPSILON_NM {
            return None;
        }
        let previous = self.range_nm;
        self.range_nm = range_nm;
        info!("Range {} -> {} NM ({:?})", previous, range_nm, reason);
        self.forward_reference();

        Some(RadarEvent::RangeChanged {
            previous,
            current: range_nm,
            reason,
        })
    }

    fn change_range(&mut self, range_nm: f64, reason: RangeChangeReason) -> f64 {
        if let Some(event) = self.apply_range(range_nm, reason) {
            self.publish(event);
        }
        self.range_nm
    }

    fn nearest_preset(&self, snapshot: &AircraftSnapshot) -> Option<f64> {
        let nearest = nearest_distance_nm(snapshot, &self.own)?;
        Some(smallest_preset_covering(
            &self.presets,
            nearest * (1.0 + self.nearest_margin),
        ))
    }

    fn forward_reference(&self) {
        if !self.forward_reference {
            return;
        }
        let radius = self.search_radius_factor.map(|factor| self.range_nm * factor);
        self.source
            .set_reference(self.own.latitude, self.own.longitude, radius);
    }

    /// Set an exact range. Non-positive or non-finite values are ignored.
    ///
    /// Targets are refreshed on the next tick.
    pub fn set_range(&mut self, range_nm: f64) -> f64 {
        if !range_nm.is_finite() || range_nm <= 0.0 {
            warn!("Ignoring invalid range {}", range_nm);
            return self.range_nm;
        }
        self.change_range(range_nm, RangeChangeReason::Manual)
    }

    /// Advance to the next larger preset, wrapping to the smallest.
    pub fn cycle_range(&mut self) -> f64 {
        let next = self
            .presets
            .iter()
            .copied()
            .find(|&p| p > self.range_nm + RANGE_EPSILON_NM)
            .unwrap_or(self.presets[0]);
        self.change_range(next, RangeChangeReason::Cycle)
    }

    /// Next larger preset; stays put at the largest.
    pub fn step_up(&mut self) -> f64 {
        match self
            .presets
            .iter()
            .copied()
            .find(|&p| p > self.range_nm + RANGE_EPSILON_NM)
        {
            Some(next) => self.change_range(next, RangeChangeReason::StepUp),
            None => self.range_nm,
        }
    }

    /// Next smaller preset; stays put at the smallest.
    pub fn step_down(&mut self) -> f64 {
        match self
            .presets
            .iter()
            .rev()
            .copied()
            .find(|&p| p < self.range_nm - RANGE_EPSILON_NM)
        {
            Some(next) => self.change_range(next, RangeChangeReason::StepDown),
            None => self.range_nm,
        }
    }

    /// Pick the smallest preset covering the nearest aircraft plus margin.
    ///
    /// Runs regardless of the auto-range setting. Returns `None` when the
    /// snapshot has no aircraft with a position.
    pub fn auto_range_to_nearest(&mut self) -> Option<f64> {
        let snapshot = self.source.snapshot();
        let range = self.nearest_preset(&snapshot)?;
        Some(self.change_range(range, RangeChangeReason::AutoNearest))
    }

    /// Pick the smallest preset covering the farthest current target plus margin.
    ///
    /// Returns `None` when there are no targets.
    pub fn fit_visible_targets(&mut self) -> Option<f64> {
        let farthest = self
            .targets
            .iter()
            .map(|t| t.distance_nm)
            .max_by(f64::total_cmp)?;
        let range = smallest_preset_covering(&self.presets, farthest * (1.0 + self.fit_margin));
        Some(self.change_range(range, RangeChangeReason::FitVisible))
    }

    /// Store a new own-ship position and forward it to the source if enabled.
    pub fn update_own_position(&mut self, own: OwnShipPosition) {
        self.own = own;
        self.forward_reference();
    }

    pub fn set_auto_range(&mut self, enabled: bool) {
        self.auto_range = enabled;
        info!("Auto-range {}", if enabled { "enabled" } else { "disabled" });
    }

    #[must_use]
    pub fn auto_range(&self) -> bool {
        self.auto_range
    }

    #[must_use]
    pub fn range_nm(&self) -> f64 {
        self.range_nm
    }

    #[must_use]
    pub fn presets(&self) -> &[f64] {
        &self.presets
    }

    #[must_use]
    pub fn own_position(&self) -> &OwnShipPosition {
        &self.own
    }

    /// Targets from the last tick, most severe first.
    #[must_use]
    pub fn targets(&self) -> &[RadarTarget] {
        &self.targets
    }

    #[must_use]
    pub fn target_count(&self) -> usize {
        self.targets.len()
    }

    #[must_use]
    pub fn highest_threat(&self) -> Option<ThreatTier> {
        self.highest_threat
    }

    #[must_use]
    pub fn tick_period(&self) -> Duration {
        self.tick_period
    }

    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<RadarEvent> {
        self.event_tx.subscribe()
    }
}

/// Tick `controller` at its configured rate until cancelled.
pub fn spawn_ticker(
    controller: Arc<Mutex<RadarController>>,
    cancel_token: CancellationToken,
) -> JoinHandle<()> {
    let period = controller
        .lock()
        .unwrap_or_else(PoisonError::into_inner)
        .tick_period();

    tokio::spawn(async move {
        let mut ticker = interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        info!("Radar ticking every {}ms", period.as_millis());

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    controller
                        .lock()
                        .unwrap_or_else(PoisonError::into_inner)
                        .tick(Utc::now());
                }
                () = cancel_token.cancelled() => {
                    debug!("Radar ticker stopped");
                    return;
                }
            }
        }
    })
}
