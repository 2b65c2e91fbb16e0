//! External collaborators consumed by the engine.
//!
//! The engine never owns orders or vehicles; it reads them through these traits and asks
//! the backend for mutations. Implementations must be `Send + Sync` so they can be shared
//! between the dispatch coordinator and the tracking tasks.
//!
//! - [`CityProfileProvider`]: city centers and scale factors
//! - [`NearestVehicleFinder`]: backend-side nearest idle vehicle search
//! - [`BulkOrderFinder`]: pending orders eligible for auto-assignment
//! - [`VehiclePositionProvider`]: live vehicle snapshots and the moving flag
//! - [`OrderStore`]: order reads and mutation requests

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::city::CityProfileTable;
use crate::error::DispatchResult;
use crate::geo::GridPoint;
use crate::order::{NewOrder, Order, OrderStatus};

/// Coarse vehicle state reported by the backend.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum VehicleStatus {
    Idle,
    Busy,
    Charging,
    Offline,
    #[serde(other)]
    Unknown,
}

/// Point-in-time read of a vehicle. Each poll replaces the previous one.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VehicleSnapshot {
    pub vehicle_id: String,
    #[serde(default)]
    pub plate: String,
    #[serde(default)]
    pub battery_level: f64,
    pub status: VehicleStatus,
    pub location: GridPoint,
    #[serde(default)]
    pub location_name: String,
    /// Explicit trip phase tag, when the backend sends one.
    #[serde(default)]
    pub phase_tag: Option<String>,
}

/// Filters for [`BulkOrderFinder::pending_orders`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderSearch {
    pub city_id: Option<String>,
    pub limit: Option<usize>,
}

#[async_trait]
pub trait CityProfileProvider: Send + Sync {
    /// Fetch every city's profile in one call.
    async fn fetch_profiles(&self) -> DispatchResult<CityProfileTable>;
}

#[async_trait]
pub trait NearestVehicleFinder: Send + Sync {
    /// Best idle vehicle for a pickup, or `None` when nothing is available.
    async fn nearest_vehicle(
        &self,
        city_id: &str,
        pickup: GridPoint,
    ) -> DispatchResult<Option<VehicleSnapshot>>;
}

#[async_trait]
pub trait BulkOrderFinder: Send + Sync {
    async fn pending_orders(&self, search: &OrderSearch) -> DispatchResult<Vec<String>>;
}

#[async_trait]
pub trait VehiclePositionProvider: Send + Sync {
    async fn snapshot(&self, vehicle_id: &str) -> DispatchResult<VehicleSnapshot>;

    async fn is_moving(&self, vehicle_id: &str) -> DispatchResult<bool>;
}

#[async_trait]
pub trait OrderStore: Send + Sync {
    async fn get(&self, order_id: &str) -> DispatchResult<Order>;

    async fn create(&self, order: NewOrder) -> DispatchResult<Order>;

    /// Record the assignment and move the order to `VehicleAssigned`.
    async fn assign(&self, order_id: &str, vehicle_id: &str) -> DispatchResult<Order>;

    async fn update_status(
        &self,
        order_id: &str,
        status: OrderStatus,
        reason: Option<&str>,
    ) -> DispatchResult<Order>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn snapshot_tolerates_missing_optional_fields() {
        let json = r#"{
            "vehicleId": "v-7",
            "status": "BUSY",
            "location": {"x": 120, "y": 640}
        }"#;
        let snapshot: VehicleSnapshot = serde_json::from_str(json).expect("decode");
        assert_eq!(snapshot.vehicle_id, "v-7");
        assert_eq!(snapshot.location, GridPoint::new(120, 640));
        assert_eq!(snapshot.phase_tag, None);
        assert!(snapshot.location_name.is_empty());
    }

    #[test]
    fn unknown_vehicle_status_is_tolerated() {
        let status: VehicleStatus = serde_json::from_str("\"MAINTENANCE\"").expect("decode");
        assert_eq!(status, VehicleStatus::Unknown);
    }
}
