//! Test helpers: in-memory collaborators and fixtures.
//!
//! These stand in for the backend in unit tests, integration tests and benches. They keep
//! just enough state to behave like the real services.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;

use crate::city::CityProfileTable;
use crate::error::{DispatchError, DispatchResult};
use crate::geo::{CityProfile, GeoPoint, GridPoint};
use crate::order::{NewOrder, Order, OrderStatus};
use crate::providers::{
    BulkOrderFinder, CityProfileProvider, NearestVehicleFinder, OrderSearch, OrderStore,
    VehiclePositionProvider, VehicleSnapshot, VehicleStatus,
};

pub const TEST_CITY: &str = "shenyang";

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Shenyang-like profile used across tests: center (123.431406, 41.805699), scale 0.2.
pub fn shenyang_profile() -> CityProfile {
    CityProfile::new(TEST_CITY, 123.431406, 41.805699, 0.2)
}

/// Geographic point of grid cell `(x, y)` in the test city.
pub fn test_geo(x: i32, y: i32) -> GeoPoint {
    crate::geo::grid_to_geo(GridPoint::new(x, y), &shenyang_profile())
}

/// Order in the test city with the given grid endpoints and status.
pub fn test_order(
    order_id: &str,
    pickup: GridPoint,
    dropoff: GridPoint,
    status: OrderStatus,
) -> Order {
    Order {
        order_id: order_id.to_string(),
        pickup: test_geo(pickup.x, pickup.y),
        dropoff: test_geo(dropoff.x, dropoff.y),
        city_id: TEST_CITY.to_string(),
        status,
        assigned_vehicle_id: None,
        created_at: Utc::now(),
    }
}

/// Busy vehicle at `(x, y)` whose location name carries the phase.
pub fn snapshot_at(x: i32, y: i32, location_name: &str) -> VehicleSnapshot {
    VehicleSnapshot {
        vehicle_id: "v-1".to_string(),
        plate: "LN-A1234".to_string(),
        battery_level: 76.0,
        status: VehicleStatus::Busy,
        location: GridPoint::new(x, y),
        location_name: location_name.to_string(),
        phase_tag: None,
    }
}

pub fn idle_vehicle(vehicle_id: &str, x: i32, y: i32) -> VehicleSnapshot {
    VehicleSnapshot {
        vehicle_id: vehicle_id.to_string(),
        status: VehicleStatus::Idle,
        location_name: String::new(),
        ..snapshot_at(x, y, "")
    }
}

/// City profile provider that fails a fixed number of times before succeeding.
#[derive(Debug)]
pub struct FlakyCityProfiles {
    failures_left: AtomicUsize,
    calls: AtomicUsize,
    delay: Duration,
    profiles: Vec<CityProfile>,
}

impl FlakyCityProfiles {
    pub fn failing_first(failures: usize) -> Self {
        Self {
            failures_left: AtomicUsize::new(failures),
            calls: AtomicUsize::new(0),
            delay: Duration::ZERO,
            profiles: vec![shenyang_profile()],
        }
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl CityProfileProvider for FlakyCityProfiles {
    async fn fetch_profiles(&self) -> DispatchResult<CityProfileTable> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        let failed = self
            .failures_left
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |left| left.checked_sub(1))
            .is_ok();
        if failed {
            return Err(DispatchError::Transport("profile service unavailable".into()));
        }
        Ok(CityProfileTable::new(self.profiles.clone()))
    }
}

/// Orders kept in memory, enforcing the same transitions as the real store.
#[derive(Debug, Default)]
pub struct InMemoryOrderStore {
    orders: Mutex<HashMap<String, Order>>,
    next_id: AtomicUsize,
    status_updates: Mutex<Vec<(String, OrderStatus)>>,
}

impl InMemoryOrderStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_orders(orders: impl IntoIterator<Item = Order>) -> Self {
        let store = Self::new();
        for order in orders {
            store.insert(order);
        }
        store
    }

    pub fn insert(&self, order: Order) {
        lock(&self.orders).insert(order.order_id.clone(), order);
    }

    pub fn order(&self, order_id: &str) -> Option<Order> {
        lock(&self.orders).get(order_id).cloned()
    }

    pub fn len(&self) -> usize {
        lock(&self.orders).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Every status change requested through [`OrderStore::update_status`], in order.
    pub fn status_updates(&self) -> Vec<(String, OrderStatus)> {
        lock(&self.status_updates).clone()
    }

    fn transition(&self, order_id: &str, next: OrderStatus) -> DispatchResult<Order> {
        let mut orders = lock(&self.orders);
        let order = orders
            .get_mut(order_id)
            .ok_or_else(|| DispatchError::OrderNotFound(order_id.to_string()))?;
        if !order.status.can_transition_to(next) {
            return Err(DispatchError::InvalidState {
                order_id: order_id.to_string(),
                from: order.status,
                to: next,
            });
        }
        order.status = next;
        Ok(order.clone())
    }
}

#[async_trait]
impl OrderStore for InMemoryOrderStore {
    async fn get(&self, order_id: &str) -> DispatchResult<Order> {
        self.order(order_id)
            .ok_or_else(|| DispatchError::OrderNotFound(order_id.to_string()))
    }

    async fn create(&self, order: NewOrder) -> DispatchResult<Order> {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst) + 1;
        let order = Order {
            order_id: format!("order-{id}"),
            pickup: order.pickup,
            dropoff: order.dropoff,
            city_id: order.city_id,
            status: OrderStatus::PendingAssignment,
            assigned_vehicle_id: None,
            created_at: Utc::now(),
        };
        self.insert(order.clone());
        Ok(order)
    }

    async fn assign(&self, order_id: &str, vehicle_id: &str) -> DispatchResult<Order> {
        self.transition(order_id, OrderStatus::VehicleAssigned)?;
        let mut orders = lock(&self.orders);
        let order = orders
            .get_mut(order_id)
            .ok_or_else(|| DispatchError::OrderNotFound(order_id.to_string()))?;
        order.assigned_vehicle_id = Some(vehicle_id.to_string());
        Ok(order.clone())
    }

    async fn update_status(
        &self,
        order_id: &str,
        status: OrderStatus,
        _reason: Option<&str>,
    ) -> DispatchResult<Order> {
        lock(&self.status_updates).push((order_id.to_string(), status));
        self.transition(order_id, status)
    }
}

/// Nearest-vehicle finder answering from a fixed table keyed by pickup cell.
#[derive(Debug, Default)]
pub struct StaticNearestVehicles {
    by_pickup: HashMap<GridPoint, String>,
    fallback: Option<String>,
    delay: Duration,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
    calls: AtomicUsize,
}

impl StaticNearestVehicles {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_vehicle_at(mut self, pickup: GridPoint, vehicle_id: &str) -> Self {
        self.by_pickup.insert(pickup, vehicle_id.to_string());
        self
    }

    /// Vehicle returned for any pickup not in the table.
    pub fn with_fallback(mut self, vehicle_id: &str) -> Self {
        self.fallback = Some(vehicle_id.to_string());
        self
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Highest number of concurrent lookups observed.
    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl NearestVehicleFinder for StaticNearestVehicles {
    async fn nearest_vehicle(
        &self,
        _city_id: &str,
        pickup: GridPoint,
    ) -> DispatchResult<Option<VehicleSnapshot>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        self.in_flight.fetch_sub(1, Ordering::SeqCst);

        let vehicle_id = self.by_pickup.get(&pickup).or(self.fallback.as_ref());
        Ok(vehicle_id.map(|id| idle_vehicle(id, pickup.x, pickup.y)))
    }
}

/// Bulk order finder returning a fixed id list, truncated to the search limit.
#[derive(Debug, Default)]
pub struct StaticPendingOrders {
    order_ids: Vec<String>,
}

impl StaticPendingOrders {
    pub fn new(order_ids: impl IntoIterator<Item = impl Into<String>>) -> Self {
        Self {
            order_ids: order_ids.into_iter().map(Into::into).collect(),
        }
    }
}

#[async_trait]
impl BulkOrderFinder for StaticPendingOrders {
    async fn pending_orders(&self, search: &OrderSearch) -> DispatchResult<Vec<String>> {
        let limit = search.limit.unwrap_or(usize::MAX);
        Ok(self.order_ids.iter().take(limit).cloned().collect())
    }
}

/// Vehicle position provider that replays a script of snapshots and moving flags.
///
/// Once a script runs out its last entry repeats; the moving flag defaults to `true`.
#[derive(Debug)]
pub struct ScriptedPositions {
    snapshots: Mutex<VecDeque<DispatchResult<VehicleSnapshot>>>,
    last_snapshot: Mutex<Option<DispatchResult<VehicleSnapshot>>>,
    moving: Mutex<VecDeque<bool>>,
    last_moving: Mutex<bool>,
    snapshot_delay: Duration,
    snapshot_calls: AtomicUsize,
    moving_calls: AtomicUsize,
}

impl ScriptedPositions {
    pub fn new(snapshots: Vec<DispatchResult<VehicleSnapshot>>) -> Self {
        Self {
            snapshots: Mutex::new(snapshots.into()),
            last_snapshot: Mutex::new(None),
            moving: Mutex::new(VecDeque::new()),
            last_moving: Mutex::new(true),
            snapshot_delay: Duration::ZERO,
            snapshot_calls: AtomicUsize::new(0),
            moving_calls: AtomicUsize::new(0),
        }
    }

    pub fn with_moving(self, moving: Vec<bool>) -> Self {
        *lock(&self.moving) = moving.into();
        self
    }

    /// Delay every snapshot response, to simulate slow backends.
    pub fn with_snapshot_delay(mut self, delay: Duration) -> Self {
        self.snapshot_delay = delay;
        self
    }

    pub fn snapshot_calls(&self) -> usize {
        self.snapshot_calls.load(Ordering::SeqCst)
    }

    pub fn moving_calls(&self) -> usize {
        self.moving_calls.load(Ordering::SeqCst)
    }

    fn next_snapshot(&self) -> DispatchResult<VehicleSnapshot> {
        let next = lock(&self.snapshots).pop_front();
        let mut last = lock(&self.last_snapshot);
        if let Some(next) = next {
            *last = Some(next);
        }
        last.clone().unwrap_or_else(|| {
            Err(DispatchError::Transport("no scripted snapshot".into()))
        })
    }
}

#[async_trait]
impl VehiclePositionProvider for ScriptedPositions {
    async fn snapshot(&self, _vehicle_id: &str) -> DispatchResult<VehicleSnapshot> {
        self.snapshot_calls.fetch_add(1, Ordering::SeqCst);
        let result = self.next_snapshot();
        if !self.snapshot_delay.is_zero() {
            tokio::time::sleep(self.snapshot_delay).await;
        }
        result
    }

    async fn is_moving(&self, _vehicle_id: &str) -> DispatchResult<bool> {
        self.moving_calls.fetch_add(1, Ordering::SeqCst);
        let next = lock(&self.moving).pop_front();
        let mut last = lock(&self.last_moving);
        if let Some(next) = next {
            *last = next;
        }
        Ok(*last)
    }
}
