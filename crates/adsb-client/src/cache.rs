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

//! Short-lived disk cache for feed snapshots.
//!
//! Each successful fetch is written as JSON under a SHA256-based filename
//! derived from the rounded reference position. On startup a recent entry can
//! seed the snapshot so the radar has something to show before the first live
//! fetch completes. Entries older than the configured max age are ignored.

use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::{DateTime, Utc};
use log::debug;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use thiserror::Error;

use crate::protocol::ProtocolType;
use crate::snapshot::AircraftState;

/// Reference positions are rounded to this many degrees before keying.
const KEY_GRID_DEGREES: f64 = 0.1;

/// Errors from cache reads and writes.
#[derive(Debug, Error)]
pub enum CacheError {
    #[error("could not determine cache directory")]
    NoCacheDir,

    #[error("cache I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("cache entry is not valid JSON: {0}")]
    Json(#[from] serde_json::Error),
}

/// A cached snapshot as stored on disk.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CachedSnapshot {
    /// When the snapshot was fetched.
    pub saved_at: DateTime<Utc>,
    /// Reference latitude the fetch was centered on.
    pub latitude: f64,
    /// Reference longitude the fetch was centered on.
    pub longitude: f64,
    /// Aircraft in feed order.
    pub aircraft: Vec<AircraftState>,
}

/// Disk cache keyed by protocol and rounded reference position.
#[derive(Debug, Clone)]
pub struct SnapshotCache {
    cache_dir: PathBuf,
    max_age: Duration,
}

impl SnapshotCache {
    /// Create a cache in the platform cache directory.
    pub fn new(app_name: &str, max_age: Duration) -> Result<Self, CacheError> {
        let cache_dir = dirs::cache_dir()
            .ok_or(CacheError::NoCacheDir)?
            .join(app_name)
            .join("feed_snapshots");
        Ok(Self::with_dir(cache_dir, max_age))
    }

    /// Create a cache rooted at an explicit directory.
    #[must_use]
    pub fn with_dir(cache_dir: impl Into<PathBuf>, max_age: Duration) -> Self {
        Self {
            cache_dir: cache_dir.into(),
            max_age,
        }
    }

    /// Directory entries are written to.
    #[must_use]
    pub fn dir(&self) -> &Path {
        &self.cache_dir
    }

    /// Maximum age of an entry that may still be loaded.
    #[must_use]
    pub fn max_age(&self) -> Duration {
        self.max_age
    }

    fn key(protocol: ProtocolType, latitude: f64, longitude: f64) -> String {
        let round = |v: f64| (v / KEY_GRID_DEGREES).round() * KEY_GRID_DEGREES;
        format!("{protocol}:{:.1}:{:.1}", round(latitude), round(longitude))
    }

    /// Get cache file path for a reference position.
    fn cache_path(&self, protocol: ProtocolType, latitude: f64, longitude: f64) -> PathBuf {
        // Use SHA256 of the key as filename to avoid filesystem issues
        let mut hasher = Sha256::new();
        hasher.update(Self::key(protocol, latitude, longitude).as_bytes());
        let hash = format!("{:x}", hasher.finalize());

        self.cache_dir.join(format!("{hash}.json"))
    }

    /// Persist a snapshot for a reference position.
    pub async fn store(
        &self,
        protocol: ProtocolType,
        latitude: f64,
        longitude: f64,
        aircraft: &[AircraftState],
        saved_at: DateTime<Utc>,
    ) -> Result<(), CacheError> {
        let entry = CachedSnapshot {
            saved_at,
            latitude,
            longitude,
            aircraft: aircraft.to_vec(),
        };
        let bytes = serde_json::to_vec(&entry)?;

        tokio::fs::create_dir_all(&self.cache_dir).await?;
        let path = self.cache_path(protocol, latitude, longitude);
        tokio::fs::write(&path, bytes).await?;
        debug!("Cached {} aircraft to {}", aircraft.len(), path.display());
        Ok(())
    }

    /// Load the entry for a reference position if one exists and is fresh.
    pub async fn load(
        &self,
        protocol: ProtocolType,
        latitude: f64,
        longitude: f64,
        now: DateTime<Utc>,
    ) -> Result<Option<CachedSnapshot>, CacheError> {
        let path = self.cache_path(protocol, latitude, longitude);
        let bytes = match tokio::fs::read(&path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };

        let entry: CachedSnapshot = serde_json::from_slice(&bytes)?;
        let age = (now - entry.saved_at).to_std().unwrap_or(Duration::ZERO);
        if age > self.max_age {
            debug!(
                "Ignoring cache entry {} ({}s old, max {}s)",
                path.display(),
                age.as_secs(),
                self.max_age.as_secs()
            );
            return Ok(None);
        }

        Ok(Some(entry))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::snapshot::test_state;

    fn cache(dir: &Path) -> SnapshotCache {
        SnapshotCache::with_dir(dir, Duration::from_secs(300))
    }

    #[tokio::test]
    async fn test_store_and_load_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let cache = cache(dir.path());
        let now = Utc::now();
        let aircraft = vec![test_state("A1", 33.7, -84.4), test_state("B2", 33.8, -84.5)];

        cache
            .store(ProtocolType::AirplanesLive, 33.6407, -84.4277, &aircraft, now)
            .await
            .unwrap();

        // Nearby reference rounds to the same key
        let entry = cache
            .load(ProtocolType::AirplanesLive, 33.62, -84.43, now)
            .await
            .unwrap()
            .expect("entry should be found");
        let ids: Vec<_> = entry.aircraft.iter().map(|a| a.icao.as_str()).collect();
        assert_eq!(ids, ["A1", "B2"]);
        assert!((entry.aircraft[0].latitude - 33.7).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_missing_entry_is_none() {
        let dir = tempfile::tempdir().unwrap();
        let result = cache(dir.path())
            .load(ProtocolType::AirplanesLive, 10.0, 10.0, Utc::now())
            .await
            .unwrap();
        assert!(result.is_none());
    }

    #[tokio::test]
    async fn test_stale_entry_is_ignored() {
        let dir = tempfile::tempdir().unwrap();
        let cache = cache(dir.path());
        let saved_at = Utc::now() - chrono::Duration::seconds(600);

        cache
            .store(ProtocolType::AirplanesLive, 33.6, -84.4, &[test_state("A1", 33.7, -84.4)], saved_at)
            .await
            .unwrap();

        let result = cache
            .load(ProtocolType::AirplanesLive, 33.6, -84.4, Utc::now())
            .await
            .unwrap();
        assert!(result.is_none());
    }

    #[tokio::test]
    async fn test_keys_differ_by_protocol_and_position() {
        let dir = tempfile::tempdir().unwrap();
        let cache = cache(dir.path());
        let now = Utc::now();

        cache
            .store(ProtocolType::AirplanesLive, 33.6, -84.4, &[test_state("A1", 33.7, -84.4)], now)
            .await
            .unwrap();

        assert!(cache.load(ProtocolType::OpenSky, 33.6, -84.4, now).await.unwrap().is_none());
        assert!(cache.load(ProtocolType::AirplanesLive, 34.6, -84.4, now).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_corrupt_entry_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let cache = cache(dir.path());
        let path = cache.cache_path(ProtocolType::AirplanesLive, 1.0, 1.0);
        std::fs::write(path, b"not json").unwrap();

        let result = cache.load(ProtocolType::AirplanesLive, 1.0, 1.0, Utc::now()).await;
        assert!(matches!(result, Err(CacheError::Json(_))));
    }
}
