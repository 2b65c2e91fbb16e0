//! City profiles and the load-once profile cache.
//!
//! [`CityProfileCache`] is passed around explicitly (usually behind an `Arc`). The first
//! successful [`CityProfileCache::load`] fills it; afterwards it is read-only for the
//! lifetime of the process. Concurrent loads share a single in-flight request, and a
//! failed load leaves the cache empty so the next caller retries.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::OnceCell;

use crate::error::{DispatchError, DispatchResult};
use crate::geo::{geo_to_grid, grid_to_geo, CityProfile, GeoPoint, GridPoint};
use crate::providers::CityProfileProvider;
use crate::retry::with_timeout;

/// One city as sent by the configuration backend: `{"center": [lon, lat], "scaleFactor": s}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WireCityProfile {
    pub center: Vec<f64>,
    pub scale_factor: f64,
}

/// All known city profiles, keyed by city id.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CityProfileTable {
    profiles: HashMap<String, CityProfile>,
}

impl CityProfileTable {
    pub fn new(profiles: impl IntoIterator<Item = CityProfile>) -> Self {
        Self {
            profiles: profiles
                .into_iter()
                .map(|profile| (profile.city_id.clone(), profile))
                .collect(),
        }
    }

    /// Validate and convert the backend's `{cityId: {center, scaleFactor}}` map.
    pub fn from_wire(wire: BTreeMap<String, WireCityProfile>) -> DispatchResult<Self> {
        let mut profiles = HashMap::with_capacity(wire.len());
        for (city_id, raw) in wire {
            let &[longitude, latitude] = raw.center.as_slice() else {
                return Err(DispatchError::InvalidPayload(format!(
                    "city `{city_id}`: center must be [lon, lat], got {} value(s)",
                    raw.center.len()
                )));
            };
            if !longitude.is_finite() || !latitude.is_finite() {
                return Err(DispatchError::InvalidPayload(format!(
                    "city `{city_id}`: non-finite center"
                )));
            }
            if !raw.scale_factor.is_finite() || raw.scale_factor <= 0.0 {
                return Err(DispatchError::InvalidPayload(format!(
                    "city `{city_id}`: scale factor must be positive, got {}",
                    raw.scale_factor
                )));
            }
            profiles.insert(
                city_id.clone(),
                CityProfile::new(city_id, longitude, latitude, raw.scale_factor),
            );
        }
        Ok(Self { profiles })
    }

    pub fn get(&self, city_id: &str) -> Option<&CityProfile> {
        self.profiles.get(city_id)
    }

    pub fn len(&self) -> usize {
        self.profiles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.profiles.is_empty()
    }

    pub fn city_ids(&self) -> Vec<&str> {
        let mut ids: Vec<&str> = self.profiles.keys().map(String::as_str).collect();
        ids.sort_unstable();
        ids
    }
}

const DEFAULT_LOAD_TIMEOUT: Duration = Duration::from_secs(5);

pub struct CityProfileCache {
    provider: Option<Arc<dyn CityProfileProvider>>,
    table: OnceCell<CityProfileTable>,
    load_timeout: Duration,
}

impl CityProfileCache {
    /// Empty cache that loads lazily from `provider`.
    pub fn new(provider: Arc<dyn CityProfileProvider>) -> Self {
        Self {
            provider: Some(provider),
            table: OnceCell::new(),
            load_timeout: DEFAULT_LOAD_TIMEOUT,
        }
    }

    /// Cache that is already loaded and never talks to a provider.
    pub fn from_profiles(profiles: impl IntoIterator<Item = CityProfile>) -> Self {
        Self {
            provider: None,
            table: OnceCell::new_with(Some(CityProfileTable::new(profiles))),
            load_timeout: DEFAULT_LOAD_TIMEOUT,
        }
    }

    pub fn with_load_timeout(mut self, timeout: Duration) -> Self {
        self.load_timeout = timeout;
        self
    }

    pub fn is_loaded(&self) -> bool {
        self.table.initialized()
    }

    /// Load every profile once. Returns `true` when profiles are available.
    ///
    /// A failure is logged and reported as `false`; nothing is memoized, so calling
    /// again retries against the provider.
    pub async fn load(&self) -> bool {
        match self.try_load().await {
            Ok(_) => true,
            Err(err) => {
                tracing::warn!(error = %err, "city profile load failed");
                false
            }
        }
    }

    /// Like [`load`](Self::load) but surfaces the provider error.
    pub async fn try_load(&self) -> DispatchResult<&CityProfileTable> {
        self.table
            .get_or_try_init(|| async {
                let provider = self.provider.as_ref().ok_or_else(|| {
                    DispatchError::InvalidPayload("no city profile provider configured".into())
                })?;
                let table =
                    with_timeout("load city profiles", self.load_timeout, provider.fetch_profiles())
                        .await?;
                tracing::info!(cities = table.len(), "city profiles loaded");
                Ok(table)
            })
            .await
    }

    /// Profile of a loaded city.
    pub fn profile(&self, city_id: &str) -> DispatchResult<&CityProfile> {
        self.table
            .get()
            .and_then(|table| table.get(city_id))
            .ok_or_else(|| DispatchError::UnknownCity(city_id.to_string()))
    }

    pub fn city_ids(&self) -> Vec<&str> {
        self.table.get().map(CityProfileTable::city_ids).unwrap_or_default()
    }

    pub fn grid_to_geo(&self, grid: GridPoint, city_id: &str) -> DispatchResult<GeoPoint> {
        Ok(grid_to_geo(grid, self.profile(city_id)?))
    }

    pub fn geo_to_grid(&self, geo: GeoPoint, city_id: &str) -> DispatchResult<GridPoint> {
        Ok(geo_to_grid(geo, self.profile(city_id)?))
    }
}

impl std::fmt::Debug for CityProfileCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CityProfileCache")
            .field("loaded", &self.is_loaded())
            .field("cities", &self.city_ids())
            .finish()
    }
}
