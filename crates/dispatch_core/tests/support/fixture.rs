use std::sync::Arc;
use std::time::Duration;

use dispatch_core::city::CityProfileCache;
use dispatch_core::config::DispatchConfig;
use dispatch_core::dispatch::DispatchCoordinator;
use dispatch_core::geo::GridPoint;
use dispatch_core::order::{Order, OrderStatus};
use dispatch_core::providers::VehicleSnapshot;
use dispatch_core::test_helpers::{
    shenyang_profile, test_order, InMemoryOrderStore, ScriptedPositions, StaticNearestVehicles,
    StaticPendingOrders,
};
use dispatch_core::tracking::{TrackingConfig, TrackingRegistry};
use dispatch_core::DispatchResult;

pub const PICKUP: GridPoint = GridPoint { x: 300, y: 400 };
pub const DROPOFF: GridPoint = GridPoint { x: 700, y: 400 };

pub fn tracking_config() -> TrackingConfig {
    TrackingConfig {
        fast_interval: Duration::from_secs(3),
        slow_interval: Duration::from_secs(10),
        request_timeout: Duration::from_secs(1),
    }
}

pub fn pending(order_id: &str) -> Order {
    test_order(order_id, PICKUP, DROPOFF, OrderStatus::PendingAssignment)
}

pub fn pending_at(order_id: &str, pickup: GridPoint) -> Order {
    test_order(order_id, pickup, DROPOFF, OrderStatus::PendingAssignment)
}

/// Builder for a coordinator wired to in-memory collaborators.
pub struct TestDispatchBuilder {
    orders: Vec<Order>,
    finder: StaticNearestVehicles,
    pending_ids: Vec<String>,
    positions: Option<Vec<DispatchResult<VehicleSnapshot>>>,
    config: DispatchConfig,
}

impl Default for TestDispatchBuilder {
    fn default() -> Self {
        Self {
            orders: Vec::new(),
            finder: StaticNearestVehicles::new(),
            pending_ids: Vec::new(),
            positions: None,
            config: DispatchConfig::default(),
        }
    }
}

impl TestDispatchBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_order(mut self, order: Order) -> Self {
        self.orders.push(order);
        self
    }

    pub fn with_finder(mut self, finder: StaticNearestVehicles) -> Self {
        self.finder = finder;
        self
    }

    pub fn with_pending_ids(mut self, ids: &[&str]) -> Self {
        self.pending_ids = ids.iter().map(|id| id.to_string()).collect();
        self
    }

    /// Attach a tracking registry fed by the scripted snapshots.
    pub fn with_tracking(mut self, snapshots: Vec<DispatchResult<VehicleSnapshot>>) -> Self {
        self.positions = Some(snapshots);
        self
    }

    pub fn with_config(mut self, config: DispatchConfig) -> Self {
        self.config = config;
        self
    }

    pub fn build(self) -> TestDispatch {
        let cities = Arc::new(CityProfileCache::from_profiles([shenyang_profile()]));
        let store = Arc::new(InMemoryOrderStore::with_orders(self.orders));
        let finder = Arc::new(self.finder);

        let mut coordinator =
            DispatchCoordinator::new(cities.clone(), store.clone(), finder.clone())
                .with_config(&self.config)
                .with_bulk_finder(Arc::new(StaticPendingOrders::new(self.pending_ids)));

        let mut positions = None;
        let mut tracking = None;
        if let Some(snapshots) = self.positions {
            let scripted = Arc::new(ScriptedPositions::new(snapshots));
            let registry = Arc::new(
                TrackingRegistry::new(scripted.clone(), tracking_config())
                    .with_order_store(store.clone()),
            );
            coordinator = coordinator.with_tracking(registry.clone());
            positions = Some(scripted);
            tracking = Some(registry);
        }

        TestDispatch {
            coordinator,
            cities,
            store,
            finder,
            positions,
            tracking,
        }
    }
}

pub struct TestDispatch {
    pub coordinator: DispatchCoordinator,
    pub cities: Arc<CityProfileCache>,
    pub store: Arc<InMemoryOrderStore>,
    pub finder: Arc<StaticNearestVehicles>,
    pub positions: Option<Arc<ScriptedPositions>>,
    pub tracking: Option<Arc<TrackingRegistry>>,
}

impl TestDispatch {
    pub fn status(&self, order_id: &str) -> OrderStatus {
        self.store
            .order(order_id)
            .map(|order| order.status)
            .expect("order exists")
    }

    pub fn tracking(&self) -> &TrackingRegistry {
        self.tracking.as_deref().expect("tracking attached")
    }
}
