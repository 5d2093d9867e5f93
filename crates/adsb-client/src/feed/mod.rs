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

//! Polling data source for HTTP aircraft feeds.
//!
//! [`FeedDataSource`] fetches the area around a reference position on a timer,
//! replaces its snapshot wholesale on every successful response and backs off
//! linearly on failure. After too many consecutive failures it halts instead of
//! hammering a dead endpoint and must be restarted explicitly.
//!
//! ```text
//! Idle ──fetch──▶ Fetching ──ok──▶ Idle (snapshot replaced, failures = 0)
//!                    │
//!                    └──err──▶ Idle (failures += 1, next attempt delayed)
//!                                └─ failures == max ──▶ Halted
//! ```
//!
//! When a fallback endpoint is configured, a failed primary request is retried
//! against it within the same cycle; only a cycle where both fail counts as a
//! failure.
//!
//! Readers get the snapshot as an `Arc` through a watch channel, so they never
//! see a half-updated collection.

mod http;

pub use http::HttpFetcher;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use log::{debug, error, info, warn};
use thiserror::Error;
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use tokio::time::{sleep, timeout};
use tokio_util::sync::CancellationToken;

use crate::cache::SnapshotCache;
use crate::protocol::{FeedRequest, ParseError, ProtocolType};
use crate::snapshot::{AircraftSnapshot, AircraftState};

/// Errors from a single fetch cycle.
#[derive(Debug, Error)]
pub enum FeedError {
    #[error("request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("HTTP error: {0}")]
    Status(u16),

    #[error("request timed out after {}s", .0.as_secs_f64())]
    Timeout(Duration),

    #[error("could not parse response: {0}")]
    Parse(#[from] ParseError),
}

/// Transport used to retrieve a feed response body.
#[async_trait]
pub trait FeedFetcher: Send + Sync {
    /// Fetch the body at `url`.
    async fn fetch(&self, url: &str) -> Result<Vec<u8>, FeedError>;
}

/// A feed API and the format it answers in.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FeedEndpoint {
    pub protocol: ProtocolType,
    pub base_url: String,
}

impl FeedEndpoint {
    #[must_use]
    pub fn new(protocol: ProtocolType, base_url: impl Into<String>) -> Self {
        Self {
            protocol,
            base_url: base_url.into(),
        }
    }

    /// The protocol's public endpoint.
    #[must_use]
    pub fn public(protocol: ProtocolType) -> Self {
        Self::new(protocol, protocol.default_base_url())
    }
}

/// Configuration for a feed data source.
#[derive(Debug, Clone)]
pub struct FeedConfig {
    /// Base URL of the feed API.
    pub base_url: String,
    /// Response format.
    pub protocol: ProtocolType,
    /// Endpoint tried in the same cycle when the primary fails.
    pub fallback: Option<FeedEndpoint>,
    /// Initial reference position (lat, lon).
    pub reference: (f64, f64),
    /// Initial search radius in nautical miles.
    pub search_radius_nm: f64,
    /// Delay between successful fetches, and the backoff step.
    pub poll_interval: Duration,
    /// Upper bound on the backoff delay.
    pub max_backoff: Duration,
    /// Consecutive failures before polling halts (0 = never halt).
    pub max_consecutive_failures: u32,
    /// Timeout applied to every request.
    pub request_timeout: Duration,
    /// Optional snapshot cache.
    pub cache: Option<SnapshotCache>,
    /// Broadcast channel capacity for events.
    pub event_channel_capacity: usize,
}

impl Default for FeedConfig {
    fn default() -> Self {
        Self {
            base_url: ProtocolType::AirplanesLive.default_base_url().to_string(),
            protocol: ProtocolType::AirplanesLive,
            fallback: None,
            reference: (33.6407, -84.4277),
            search_radius_nm: 40.0,
            poll_interval: Duration::from_secs(5),
            max_backoff: Duration::from_secs(300),
            max_consecutive_failures: 10,
            request_timeout: Duration::from_secs(10),
            cache: None,
            event_channel_capacity: 64,
        }
    }
}

/// Fetch cycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FeedState {
    /// Waiting for the next trigger.
    Idle,
    /// A request is in flight.
    Fetching,
    /// Too many consecutive failures; polling stopped until restarted.
    Halted,
}

/// Events emitted by the data source.
#[derive(Debug, Clone)]
pub enum FeedEvent {
    /// A fetch completed and the snapshot was replaced.
    FetchSucceeded {
        aircraft_count: usize,
        at: DateTime<Utc>,
    },
    /// A fetch failed; the previous snapshot is kept.
    FetchFailed {
        error: String,
        consecutive_failures: u32,
        /// Delay before the next scheduled attempt, `None` once halted.
        retry_in: Option<Duration>,
    },
    /// The failure limit was reached and polling stopped.
    Halted { consecutive_failures: u32 },
    /// The snapshot was seeded from the disk cache.
    CacheLoaded {
        aircraft_count: usize,
        saved_at: DateTime<Utc>,
    },
}

/// Result of a single fetch trigger.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchOutcome {
    /// The snapshot was replaced.
    Updated { aircraft_count: usize },
    /// The fetch failed.
    Failed { consecutive_failures: u32 },
    /// Another fetch was already in flight; nothing was done.
    InFlight,
    /// The source is halted; nothing was done.
    Halted,
}

/// Backoff delay after `consecutive_failures` failures: `min(base × n, cap)`.
#[must_use]
pub fn backoff_delay(base: Duration, consecutive_failures: u32, cap: Duration) -> Duration {
    base.saturating_mul(consecutive_failures.max(1)).min(cap)
}

#[derive(Debug, Clone)]
struct FetchStatus {
    state: FeedState,
    consecutive_failures: u32,
    last_success: Option<DateTime<Utc>>,
    last_error: Option<String>,
}

/// Snapshot waiting to be written to disk once the fetch guard is released.
struct CacheWrite {
    request: FeedRequest,
    snapshot: Arc<AircraftSnapshot>,
    saved_at: DateTime<Utc>,
}

/// Clears the in-flight flag on every exit path.
struct InFlightGuard<'a>(&'a AtomicBool);

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

struct Shared {
    primary: FeedEndpoint,
    fallback: Option<FeedEndpoint>,
    poll_interval: Duration,
    max_backoff: Duration,
    max_consecutive_failures: u32,
    request_timeout: Duration,
    cache: Option<SnapshotCache>,
    fetcher: Arc<dyn FeedFetcher>,
    request: RwLock<FeedRequest>,
    status: RwLock<FetchStatus>,
    in_flight: AtomicBool,
    snapshot_tx: watch::Sender<Arc<AircraftSnapshot>>,
    event_tx: broadcast::Sender<FeedEvent>,
}

impl Shared {
    fn status(&self) -> FetchStatus {
        self.status
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn update_status<R>(&self, f: impl FnOnce(&mut FetchStatus) -> R) -> R {
        let mut status = self.status.write().unwrap_or_else(PoisonError::into_inner);
        f(&mut status)
    }

    fn request(&self) -> FeedRequest {
        *self.request.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn next_delay(&self) -> Duration {
        match self.status().consecutive_failures {
            0 => self.poll_interval,
            n => backoff_delay(self.poll_interval, n, self.max_backoff),
        }
    }

    async fn fetch_cycle(&self) -> FetchOutcome {
        let (outcome, cache_write) = self.guarded_fetch().await;
        if let Some(write) = cache_write {
            self.write_cache(write).await;
        }
        outcome
    }

    async fn guarded_fetch(&self) -> (FetchOutcome, Option<CacheWrite>) {
        if self.status().state == FeedState::Halted {
            return (FetchOutcome::Halted, None);
        }
        if self
            .in_flight
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            debug!("Fetch already in progress, skipping trigger");
            return (FetchOutcome::InFlight, None);
        }
        let _guard = InFlightGuard(&self.in_flight);

        self.update_status(|s| s.state = FeedState::Fetching);

        let request = self.request();
        let result = match (self.fetch_and_parse(&self.primary, &request).await, &self.fallback) {
            (Err(e), Some(fallback)) => {
                warn!(
                    "{} fetch failed ({}); trying {}",
                    self.primary.protocol, e, fallback.protocol
                );
                self.fetch_and_parse(fallback, &request).await
            }
            (result, _) => result,
        };

        match result {
            Ok((protocol, aircraft)) => self.on_success(request, protocol, aircraft),
            Err(e) => (self.on_failure(&e), None),
        }
    }

    async fn fetch_and_parse(
        &self,
        endpoint: &FeedEndpoint,
        request: &FeedRequest,
    ) -> Result<(ProtocolType, Vec<AircraftState>), FeedError> {
        let url = endpoint.protocol.request_url(&endpoint.base_url, request);
        debug!("Fetching {}", url);

        let body = match timeout(self.request_timeout, self.fetcher.fetch(&url)).await {
            Ok(result) => result?,
            Err(_elapsed) => return Err(FeedError::Timeout(self.request_timeout)),
        };
        let aircraft = endpoint.protocol.parse(&body, Utc::now())?;
        Ok((endpoint.protocol, aircraft))
    }

    fn on_success(
        &self,
        request: FeedRequest,
        protocol: ProtocolType,
        aircraft: Vec<AircraftState>,
    ) -> (FetchOutcome, Option<CacheWrite>) {
        let now = Utc::now();
        let snapshot: Arc<AircraftSnapshot> = Arc::new(aircraft.into_iter().collect());
        let aircraft_count = snapshot.len();

        self.snapshot_tx.send_replace(Arc::clone(&snapshot));
        self.update_status(|s| {
            s.state = FeedState::Idle;
            s.consecutive_failures = 0;
            s.last_success = Some(now);
            s.last_error = None;
        });

        info!("Fetched {} aircraft from {}", aircraft_count, protocol);
        let _ = self.event_tx.send(FeedEvent::FetchSucceeded {
            aircraft_count,
            at: now,
        });

        let write = self.cache.is_some().then(|| CacheWrite {
            request,
            snapshot,
            saved_at: now,
        });
        (FetchOutcome::Updated { aircraft_count }, write)
    }

    /// Store a snapshot on disk, giving up after the request timeout.
    async fn write_cache(&self, write: CacheWrite) {
        let Some(cache) = &self.cache else {
            return;
        };
        // Keyed by the primary protocol so startup seeding finds it
        let store = cache.store(
            self.primary.protocol,
            write.request.latitude,
            write.request.longitude,
            write.snapshot.as_slice(),
            write.saved_at,
        );
        match timeout(self.request_timeout, store).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => warn!("Failed to write feed cache: {}", e),
            Err(_elapsed) => warn!(
                "Feed cache write timed out after {}s",
                self.request_timeout.as_secs()
            ),
        }
    }

    fn on_failure(&self, err: &FeedError) -> FetchOutcome {
        let message = err.to_string();
        let max = self.max_consecutive_failures;

        let (failures, halted) = self.update_status(|s| {
            s.consecutive_failures = s.consecutive_failures.saturating_add(1);
            s.last_error = Some(message.clone());
            let halted = max > 0 && s.consecutive_failures >= max;
            s.state = if halted { FeedState::Halted } else { FeedState::Idle };
            (s.consecutive_failures, halted)
        });

        let retry_in = (!halted).then(|| backoff_delay(self.poll_interval, failures, self.max_backoff));
        match retry_in {
            Some(delay) => warn!(
                "Feed fetch failed ({} in a row): {}; retrying in {}s",
                failures,
                message,
                delay.as_secs()
            ),
            None => error!("Feed fetch failed ({} in a row): {}", failures, message),
        }

        let _ = self.event_tx.send(FeedEvent::FetchFailed {
            error: message,
            consecutive_failures: failures,
            retry_in,
        });

        if halted {
            error!("Halting feed polling after {} consecutive failures", failures);
            let _ = self.event_tx.send(FeedEvent::Halted {
                consecutive_failures: failures,
            });
        }

        FetchOutcome::Failed {
            consecutive_failures: failures,
        }
    }

    async fn seed_from_cache(&self) -> Option<usize> {
        let cache = self.cache.as_ref()?;
        if self.status().last_success.is_some() || !self.snapshot_tx.borrow().is_empty() {
            return None;
        }

        let request = self.request();
        let entry = match cache
            .load(self.primary.protocol, request.latitude, request.longitude, Utc::now())
            .await
        {
            Ok(Some(entry)) => entry,
            Ok(None) => return None,
            Err(e) => {
                warn!("Failed to read feed cache: {}", e);
                return None;
            }
        };

        // A live fetch may have landed while the cache was being read
        if self.status().last_success.is_some() {
            return None;
        }

        let saved_at = entry.saved_at;
        let snapshot: AircraftSnapshot = entry.aircraft.into_iter().collect();
        let aircraft_count = snapshot.len();
        self.snapshot_tx.send_replace(Arc::new(snapshot));

        info!(
            "Seeded {} aircraft from cache saved at {}",
            aircraft_count,
            saved_at.format("%H:%M:%S")
        );
        let _ = self.event_tx.send(FeedEvent::CacheLoaded {
            aircraft_count,
            saved_at,
        });

        Some(aircraft_count)
    }
}

async fn poll_loop(shared: Arc<Shared>, cancel_token: CancellationToken) {
    shared.seed_from_cache().await;

    loop {
        if cancel_token.is_cancelled() {
            info!("Feed polling stopped");
            return;
        }

        shared.fetch_cycle().await;

        if shared.status().state == FeedState::Halted {
            warn!("Feed polling halted; restart required");
            return;
        }

        let delay = shared.next_delay();
        tokio::select! {
            () = sleep(delay) => {}
            () = cancel_token.cancelled() => {
                info!("Feed polling stopped");
                return;
            }
        }
    }
}

struct Poller {
    cancel_token: CancellationToken,
    handle: JoinHandle<()>,
}

/// Handle to a polled aircraft feed.
///
/// Polling runs in a background task once [`start`](Self::start) is called
/// (a tokio runtime is required). The snapshot and status can be queried at
/// any time from any thread.
pub struct FeedDataSource {
    shared: Arc<Shared>,
    poller: Mutex<Option<Poller>>,
}

impl std::fmt::Debug for FeedDataSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FeedDataSource")
            .field("primary", &self.shared.primary)
            .field("fallback", &self.shared.fallback)
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}

impl FeedDataSource {
    /// Create a data source; nothing is fetched until started or forced.
    #[must_use]
    pub fn new(config: FeedConfig, fetcher: Arc<dyn FeedFetcher>) -> Self {
        let (snapshot_tx, _) = watch::channel(Arc::new(AircraftSnapshot::new()));
        let (event_tx, _) = broadcast::channel(config.event_channel_capacity.max(1));
        let (latitude, longitude) = config.reference;

        let primary = FeedEndpoint::new(config.protocol, config.base_url);
        let fallback = config.fallback.filter(|f| *f != primary);
        let shared = Shared {
            primary,
            fallback,
            poll_interval: config.poll_interval,
            max_backoff: config.max_backoff,
            max_consecutive_failures: config.max_consecutive_failures,
            request_timeout: config.request_timeout,
            cache: config.cache,
            fetcher,
            request: RwLock::new(FeedRequest::new(latitude, longitude, config.search_radius_nm)),
            status: RwLock::new(FetchStatus {
                state: FeedState::Idle,
                consecutive_failures: 0,
                last_success: None,
                last_error: None,
            }),
            in_flight: AtomicBool::new(false),
            snapshot_tx,
            event_tx,
        };

        Self {
            shared: Arc::new(shared),
            poller: Mutex::new(None),
        }
    }

    /// Start polling in the background.
    ///
    /// A halted source is reset (failure counter cleared) and resumes. Calling
    /// this while already polling does nothing.
    pub fn start(&self) {
        let mut poller = self.poller.lock().unwrap_or_else(PoisonError::into_inner);
        let halted = self.state() == FeedState::Halted;

        if let Some(existing) = poller.as_ref() {
            if !halted && !existing.handle.is_finished() {
                debug!("Feed polling already running");
                return;
            }
            existing.cancel_token.cancel();
        }

        if halted {
            info!("Restarting halted feed");
        }
        self.shared.update_status(|s| {
            if s.state == FeedState::Halted {
                s.state = FeedState::Idle;
                s.consecutive_failures = 0;
            }
        });

        let cancel_token = CancellationToken::new();
        let handle = tokio::spawn(poll_loop(Arc::clone(&self.shared), cancel_token.clone()));
        *poller = Some(Poller {
            cancel_token,
            handle,
        });

        match &self.shared.fallback {
            Some(fallback) => info!(
                "Polling {} (fallback {}) every {}s",
                self.shared.primary.protocol,
                fallback.protocol,
                self.shared.poll_interval.as_secs()
            ),
            None => info!(
                "Polling {} every {}s",
                self.shared.primary.protocol,
                self.shared.poll_interval.as_secs()
            ),
        }
    }

    /// Stop polling. An in-flight request is allowed to finish.
    pub fn stop(&self) {
        let mut poller = self.poller.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(existing) = poller.take() {
            existing.cancel_token.cancel();
        }
    }

    /// Whether the background poll loop is running.
    #[must_use]
    pub fn is_polling(&self) -> bool {
        self.poller
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .is_some_and(|p| !p.handle.is_finished() && !p.cancel_token.is_cancelled())
    }

    /// Fetch immediately, bypassing the timer.
    ///
    /// Returns [`FetchOutcome::InFlight`] without doing anything if a fetch is
    /// already running, and [`FetchOutcome::Halted`] if the source is halted.
    pub async fn fetch_now(&self) -> FetchOutcome {
        self.shared.fetch_cycle().await
    }

    /// Seed the snapshot from the cache if nothing has been fetched yet.
    ///
    /// Polling does this automatically on start.
    pub async fn load_cache(&self) -> Option<usize> {
        self.shared.seed_from_cache().await
    }

    /// Move the reference position, and optionally the search radius.
    ///
    /// Takes effect on the next fetch; does not trigger one.
    pub fn set_reference(&self, latitude: f64, longitude: f64, radius_nm: Option<f64>) {
        let mut request = self
            .shared
            .request
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        request.latitude = latitude;
        request.longitude = longitude;
        if let Some(radius) = radius_nm {
            request.radius_nm = radius;
        }
    }

    /// Current reference position and search radius.
    #[must_use]
    pub fn reference(&self) -> FeedRequest {
        self.shared.request()
    }

    /// The current snapshot.
    #[must_use]
    pub fn snapshot(&self) -> Arc<AircraftSnapshot> {
        self.shared.snapshot_tx.borrow().clone()
    }

    /// Receiver notified whenever the snapshot is replaced.
    #[must_use]
    pub fn watch_snapshot(&self) -> watch::Receiver<Arc<AircraftSnapshot>> {
        self.shared.snapshot_tx.subscribe()
    }

    /// Number of aircraft in the current snapshot.
    #[must_use]
    pub fn aircraft_count(&self) -> usize {
        self.shared.snapshot_tx.borrow().len()
    }

    /// Time of the last successful fetch.
    #[must_use]
    pub fn last_success(&self) -> Option<DateTime<Utc>> {
        self.shared.status().last_success
    }

    /// Error message from the most recent failed fetch, cleared on success.
    #[must_use]
    pub fn last_error(&self) -> Option<String> {
        self.shared.status().last_error
    }

    /// Current fetch cycle state.
    #[must_use]
    pub fn state(&self) -> FeedState {
        self.shared.status().state
    }

    /// Number of failures since the last success.
    #[must_use]
    pub fn consecutive_failures(&self) -> u32 {
        self.shared.status().consecutive_failures
    }

    /// Delay the poll loop will wait before its next attempt.
    #[must_use]
    pub fn next_delay(&self) -> Duration {
        self.shared.next_delay()
    }

    /// Protocol of the primary endpoint.
    #[must_use]
    pub fn protocol(&self) -> ProtocolType {
        self.shared.primary.protocol
    }

    /// Endpoint tried when the primary fails, if any.
    #[must_use]
    pub fn fallback(&self) -> Option<&FeedEndpoint> {
        self.shared.fallback.as_ref()
    }

    /// Subscribe to feed events.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<FeedEvent> {
        self.shared.event_tx.subscribe()
    }
}

impl Drop for FeedDataSource {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use std::collections::VecDeque;

    use super::*;

    /// Fetcher that replays canned responses and records requested URLs.
    #[derive(Default)]
    struct ScriptedFetcher {
        responses: Mutex<VecDeque<Result<Vec<u8>, u16>>>,
        urls: Mutex<Vec<String>>,
        delay: Option<Duration>,
    }

    impl ScriptedFetcher {
        fn new(responses: Vec<Result<Vec<u8>, u16>>) -> Self {
            Self {
                responses: Mutex::new(responses.into()),
                ..Default::default()
            }
        }

        fn with_delay(mut self, delay: Duration) -> Self {
            self.delay = Some(delay);
            self
        }

        fn calls(&self) -> usize {
            self.urls.lock().unwrap().len()
        }
    }

    #[async_trait]
    impl FeedFetcher for ScriptedFetcher {
        async fn fetch(&self, url: &str) -> Result<Vec<u8>, FeedError> {
            self.urls.lock().unwrap().push(url.to_string());
            if let Some(delay) = self.delay {
                sleep(delay).await;
            }
            let next = self.responses.lock().unwrap().pop_front();
            match next {
                Some(Ok(body)) => Ok(body),
                Some(Err(status)) => Err(FeedError::Status(status)),
                None => Err(FeedError::Status(503)),
            }
        }
    }

    fn body(ids: &[&str]) -> Vec<u8> {
        let records: Vec<String> = ids
            .iter()
            .enumerate()
            .map(|(i, id)| {
                format!(
                    r#"{{"hex": "{id}", "flight": "TST{i}", "lat": 33.{i}, "lon": -84.4, "alt_baro": 5000}}"#
                )
            })
            .collect();
        format!(r#"{{"ac": [{}]}}"#, records.join(",")).into_bytes()
    }

    fn config() -> FeedConfig {
        FeedConfig {
            base_url: "http://feed.test/v2".to_string(),
            poll_interval: Duration::from_secs(5),
            max_backoff: Duration::from_secs(300),
            max_consecutive_failures: 3,
            ..Default::default()
        }
    }

    fn source(fetcher: &Arc<ScriptedFetcher>, config: FeedConfig) -> FeedDataSource {
        FeedDataSource::new(config, Arc::clone(fetcher) as Arc<dyn FeedFetcher>)
    }

    #[test]
    fn test_backoff_delay() {
        let base = Duration::from_secs(5);
        let cap = Duration::from_secs(300);
        assert_eq!(backoff_delay(base, 1, cap), Duration::from_secs(5));
        assert_eq!(backoff_delay(base, 2, cap), Duration::from_secs(10));
        assert_eq!(backoff_delay(base, 3, cap), Duration::from_secs(15));
        assert_eq!(backoff_delay(base, 60, cap), Duration::from_secs(300));
        assert_eq!(backoff_delay(base, u32::MAX, cap), cap);
    }

    #[tokio::test]
    async fn test_success_replaces_snapshot() {
        let fetcher = Arc::new(ScriptedFetcher::new(vec![
            Ok(body(&["aaaaaa", "bbbbbb"])),
            Ok(body(&["cccccc"])),
        ]));
        let feed = source(&fetcher, config());
        let mut events = feed.subscribe();

        assert_eq!(feed.fetch_now().await, FetchOutcome::Updated { aircraft_count: 2 });
        assert_eq!(feed.aircraft_count(), 2);
        assert!(feed.last_success().is_some());
        assert!(matches!(
            events.try_recv(),
            Ok(FeedEvent::FetchSucceeded { aircraft_count: 2, .. })
        ));

        // No merge: the second response replaces everything
        feed.fetch_now().await;
        let snapshot = feed.snapshot();
        assert_eq!(snapshot.len(), 1);
        assert!(snapshot.get_by_icao("AAAAAA").is_none());
        assert!(snapshot.get_by_icao("CCCCCC").is_some());
        assert_eq!(feed.state(), FeedState::Idle);
    }

    #[tokio::test]
    async fn test_parse_error_keeps_previous_snapshot() {
        let fetcher = Arc::new(ScriptedFetcher::new(vec![
            Ok(body(&["aaaaaa"])),
            Ok(b"{ definitely not json".to_vec()),
        ]));
        let feed = source(&fetcher, config());
        let mut events = feed.subscribe();

        feed.fetch_now().await;
        let outcome = feed.fetch_now().await;

        assert_eq!(outcome, FetchOutcome::Failed { consecutive_failures: 1 });
        assert_eq!(feed.aircraft_count(), 1);
        assert!(feed.last_error().unwrap().contains("parse"));

        assert!(matches!(events.try_recv(), Ok(FeedEvent::FetchSucceeded { .. })));
        assert!(matches!(
            events.try_recv(),
            Ok(FeedEvent::FetchFailed { consecutive_failures: 1, retry_in: Some(_), .. })
        ));
    }

    #[tokio::test]
    async fn test_backoff_grows_with_consecutive_failures() {
        let fetcher = Arc::new(ScriptedFetcher::new(vec![]));
        let feed = source(
            &fetcher,
            FeedConfig {
                max_consecutive_failures: 10,
                ..config()
            },
        );
        assert_eq!(feed.next_delay(), Duration::from_secs(5));

        let mut delays = Vec::new();
        for _ in 0..3 {
            feed.fetch_now().await;
            delays.push(feed.next_delay());
        }
        assert_eq!(
            delays,
            [Duration::from_secs(5), Duration::from_secs(10), Duration::from_secs(15)]
        );
    }

    #[tokio::test]
    async fn test_success_resets_failures() {
        let fetcher = Arc::new(ScriptedFetcher::new(vec![
            Err(500),
            Err(502),
            Ok(body(&["aaaaaa"])),
        ]));
        let feed = source(&fetcher, config());

        feed.fetch_now().await;
        feed.fetch_now().await;
        assert_eq!(feed.consecutive_failures(), 2);
        assert_eq!(feed.last_error().as_deref(), Some("HTTP error: 502"));

        feed.fetch_now().await;
        assert_eq!(feed.consecutive_failures(), 0);
        assert!(feed.last_error().is_none());
        assert_eq!(feed.next_delay(), Duration::from_secs(5));
    }

    #[tokio::test]
    async fn test_circuit_breaker_halts() {
        let fetcher = Arc::new(ScriptedFetcher::new(vec![]));
        let feed = source(&fetcher, config());
        let mut events = feed.subscribe();

        for _ in 0..3 {
            feed.fetch_now().await;
        }
        assert_eq!(feed.state(), FeedState::Halted);
        assert_eq!(feed.fetch_now().await, FetchOutcome::Halted);
        assert_eq!(fetcher.calls(), 3);

        let mut saw_halted = false;
        while let Ok(event) = events.try_recv() {
            if let FeedEvent::FetchFailed { consecutive_failures: 3, retry_in, .. } = &event {
                assert!(retry_in.is_none());
            }
            saw_halted |= matches!(event, FeedEvent::Halted { consecutive_failures: 3 });
        }
        assert!(saw_halted);
    }

    #[tokio::test(start_paused = true)]
    async fn test_poll_loop_halts_and_restarts() {
        let fetcher = Arc::new(ScriptedFetcher::new(vec![]));
        let feed = source(&fetcher, config());
        let mut events = feed.subscribe();

        feed.start();
        loop {
            if let Ok(FeedEvent::Halted { .. }) = events.recv().await {
                break;
            }
        }
        assert_eq!(fetcher.calls(), 3);
        assert_eq!(feed.state(), FeedState::Halted);

        // Restart clears the breaker
        feed.start();
        assert_eq!(feed.state(), FeedState::Idle);
        assert_eq!(feed.consecutive_failures(), 0);
        feed.stop();
    }

    #[tokio::test(start_paused = true)]
    async fn test_poll_loop_stops_on_request() {
        let fetcher = Arc::new(ScriptedFetcher::new(vec![Ok(body(&["aaaaaa"]))]));
        let feed = source(&fetcher, config());
        let mut events = feed.subscribe();

        feed.start();
        assert!(feed.is_polling());
        assert!(matches!(events.recv().await, Ok(FeedEvent::FetchSucceeded { .. })));

        feed.stop();
        assert!(!feed.is_polling());
        sleep(Duration::from_secs(60)).await;
        assert_eq!(fetcher.calls(), 1);
    }

    #[tokio::test]
    async fn test_overlapping_fetches_are_suppressed() {
        let fetcher = Arc::new(
            ScriptedFetcher::new(vec![Ok(body(&["aaaaaa"])), Ok(body(&["bbbbbb"]))])
                .with_delay(Duration::from_millis(50)),
        );
        let feed = source(&fetcher, config());

        let (first, second) = tokio::join!(feed.fetch_now(), feed.fetch_now());
        assert_eq!(first, FetchOutcome::Updated { aircraft_count: 1 });
        assert_eq!(second, FetchOutcome::InFlight);
        assert_eq!(fetcher.calls(), 1);

        // Guard is released afterwards
        assert_eq!(feed.fetch_now().await, FetchOutcome::Updated { aircraft_count: 1 });
    }

    #[tokio::test(start_paused = true)]
    async fn test_request_timeout_counts_as_failure() {
        let fetcher = Arc::new(
            ScriptedFetcher::new(vec![Ok(body(&["aaaaaa"]))]).with_delay(Duration::from_secs(60)),
        );
        let feed = source(
            &fetcher,
            FeedConfig {
                request_timeout: Duration::from_secs(2),
                ..config()
            },
        );

        let outcome = feed.fetch_now().await;
        assert_eq!(outcome, FetchOutcome::Failed { consecutive_failures: 1 });
        assert!(feed.last_error().unwrap().contains("timed out"));
        assert_eq!(feed.state(), FeedState::Idle);
    }

    #[tokio::test]
    async fn test_set_reference_applies_to_next_fetch() {
        let fetcher = Arc::new(ScriptedFetcher::new(vec![Ok(body(&[]))]));
        let feed = source(&fetcher, config());

        feed.set_reference(47.4502, -122.3088, Some(900.0));
        assert_eq!(fetcher.calls(), 0);

        feed.fetch_now().await;
        let urls = fetcher.urls.lock().unwrap().clone();
        assert_eq!(urls, ["http://feed.test/v2/point/47.4502/-122.3088/250"]);

        // Radius is kept when not supplied
        feed.set_reference(1.0, 2.0, None);
        assert!((feed.reference().radius_nm - 900.0).abs() < f64::EPSILON);
    }

    #[tokio::test]
    async fn test_successful_fetch_is_cached_and_reloaded() {
        let dir = tempfile::tempdir().unwrap();
        let cache = SnapshotCache::with_dir(dir.path(), Duration::from_secs(600));

        let fetcher = Arc::new(ScriptedFetcher::new(vec![Ok(body(&["aaaaaa", "bbbbbb"]))]));
        let feed = source(
            &fetcher,
            FeedConfig {
                cache: Some(cache.clone()),
                ..config()
            },
        );
        feed.fetch_now().await;

        // A fresh source at the same reference seeds from disk
        let cold = source(
            &Arc::new(ScriptedFetcher::new(vec![])),
            FeedConfig {
                cache: Some(cache),
                ..config()
            },
        );
        let mut events = cold.subscribe();
        assert_eq!(cold.load_cache().await, Some(2));
        assert_eq!(cold.aircraft_count(), 2);
        assert!(cold.last_success().is_none());
        assert!(matches!(
            events.try_recv(),
            Ok(FeedEvent::CacheLoaded { aircraft_count: 2, .. })
        ));

        // Already populated: no second seed
        assert_eq!(cold.load_cache().await, None);
    }

    fn opensky_body(ids: &[&str]) -> Vec<u8> {
        let states: Vec<String> = ids
            .iter()
            .map(|id| format!(r#"["{id}", "OSK1", "US", null, 1700000000, -84.4, 33.7, 1500.0, false, 120.0, 90.0, 0.0]"#))
            .collect();
        format!(r#"{{"time": 1700000000, "states": [{}]}}"#, states.join(",")).into_bytes()
    }

    fn with_opensky_fallback() -> FeedConfig {
        FeedConfig {
            fallback: Some(FeedEndpoint::new(ProtocolType::OpenSky, "http://fallback.test/states/all")),
            ..config()
        }
    }

    #[tokio::test]
    async fn test_fallback_used_when_primary_fails() {
        let fetcher = Arc::new(ScriptedFetcher::new(vec![
            Err(503),
            Ok(opensky_body(&["a1b2c3", "d4e5f6"])),
        ]));
        let feed = source(&fetcher, with_opensky_fallback());

        assert_eq!(feed.fetch_now().await, FetchOutcome::Updated { aircraft_count: 2 });
        assert_eq!(feed.consecutive_failures(), 0);
        assert!(feed.last_error().is_none());
        assert!(feed.snapshot().get_by_icao("A1B2C3").is_some());

        let urls = fetcher.urls.lock().unwrap().clone();
        assert_eq!(urls.len(), 2);
        assert!(urls[0].starts_with("http://feed.test/v2/point/"));
        assert!(urls[1].starts_with("http://fallback.test/states/all?lamin="));
    }

    #[tokio::test]
    async fn test_fallback_not_tried_when_primary_succeeds() {
        let fetcher = Arc::new(ScriptedFetcher::new(vec![Ok(body(&["aaaaaa"]))]));
        let feed = source(&fetcher, with_opensky_fallback());

        assert_eq!(feed.fetch_now().await, FetchOutcome::Updated { aircraft_count: 1 });
        assert_eq!(fetcher.calls(), 1);
    }

    #[tokio::test]
    async fn test_both_endpoints_failing_counts_once() {
        let fetcher = Arc::new(ScriptedFetcher::new(vec![Err(503), Err(429)]));
        let feed = source(&fetcher, with_opensky_fallback());

        assert_eq!(feed.fetch_now().await, FetchOutcome::Failed { consecutive_failures: 1 });
        assert_eq!(fetcher.calls(), 2);
        assert_eq!(feed.last_error().as_deref(), Some("HTTP error: 429"));
    }

    #[test]
    fn test_fallback_identical_to_primary_is_dropped() {
        let fetcher = Arc::new(ScriptedFetcher::new(vec![]));
        let feed = source(
            &fetcher,
            FeedConfig {
                fallback: Some(FeedEndpoint::new(ProtocolType::AirplanesLive, "http://feed.test/v2")),
                ..config()
            },
        );
        assert!(feed.fallback().is_none());
    }

    #[tokio::test]
    async fn test_cache_written_after_guard_release() {
        let dir = tempfile::tempdir().unwrap();
        let cache = SnapshotCache::with_dir(dir.path(), Duration::from_secs(600));
        let fetcher = Arc::new(ScriptedFetcher::new(vec![Ok(body(&["aaaaaa"]))]));
        let feed = source(
            &fetcher,
            FeedConfig {
                cache: Some(cache),
                ..config()
            },
        );
        let entries = || std::fs::read_dir(dir.path()).unwrap().count();

        let (outcome, write) = feed.shared.guarded_fetch().await;
        assert_eq!(outcome, FetchOutcome::Updated { aircraft_count: 1 });
        assert!(!feed.shared.in_flight.load(Ordering::Acquire));
        assert_eq!(entries(), 0);

        feed.shared.write_cache(write.expect("cache write pending")).await;
        assert_eq!(entries(), 1);
    }

    #[tokio::test]
    async fn test_cache_errors_are_ignored() {
        let dir = tempfile::tempdir().unwrap();
        // A file where the cache directory should be makes every write fail
        let blocked = dir.path().join("blocked");
        std::fs::write(&blocked, b"").unwrap();
        let cache = SnapshotCache::with_dir(&blocked, Duration::from_secs(600));

        let fetcher = Arc::new(ScriptedFetcher::new(vec![Ok(body(&["aaaaaa"]))]));
        let feed = source(
            &fetcher,
            FeedConfig {
                cache: Some(cache),
                ..config()
            },
        );

        assert_eq!(feed.fetch_now().await, FetchOutcome::Updated { aircraft_count: 1 });
        assert_eq!(feed.consecutive_failures(), 0);
    }
}
