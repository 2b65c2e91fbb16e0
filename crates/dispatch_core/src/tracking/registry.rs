use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tokio::sync::watch;

use crate::providers::{OrderStore, VehiclePositionProvider};

use super::{TrackingConfig, TrackingPoller, TrackingRequest, TrackingSession};

/// Live pollers keyed by order id. Holds at most one poller per order.
pub struct TrackingRegistry {
    positions: Arc<dyn VehiclePositionProvider>,
    orders: Option<Arc<dyn OrderStore>>,
    config: TrackingConfig,
    sessions: Mutex<HashMap<String, TrackingPoller>>,
}

impl TrackingRegistry {
    pub fn new(positions: Arc<dyn VehiclePositionProvider>, config: TrackingConfig) -> Self {
        Self {
            positions,
            orders: None,
            config,
            sessions: Mutex::new(HashMap::new()),
        }
    }

    /// Let pollers push phase-driven status changes to the order store.
    pub fn with_order_store(mut self, orders: Arc<dyn OrderStore>) -> Self {
        self.orders = Some(orders);
        self
    }

    pub fn config(&self) -> TrackingConfig {
        self.config
    }

    fn sessions(&self) -> MutexGuard<'_, HashMap<String, TrackingPoller>> {
        self.sessions.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Start tracking `request.order_id`, replacing (and stopping) any previous poller.
    pub async fn start(&self, request: TrackingRequest) -> TrackingSession {
        let previous = self.sessions().remove(&request.order_id);
        if let Some(previous) = previous {
            previous.stop();
        }
        let order_id = request.order_id.clone();
        let poller = TrackingPoller::start(
            request,
            self.positions.clone(),
            self.orders.clone(),
            self.config,
        )
        .await;
        let session = poller.session();
        let raced = self.sessions().insert(order_id, poller);
        if let Some(raced) = raced {
            raced.stop();
        }
        session
    }

    /// Stop and forget the poller for `order_id`. Returns whether one existed.
    pub fn stop(&self, order_id: &str) -> bool {
        match self.sessions().remove(order_id) {
            Some(poller) => {
                poller.stop();
                true
            }
            None => false,
        }
    }

    pub fn stop_all(&self) {
        for (_, poller) in self.sessions().drain() {
            poller.stop();
        }
    }

    pub fn session(&self, order_id: &str) -> Option<TrackingSession> {
        self.sessions().get(order_id).map(TrackingPoller::session)
    }

    pub fn subscribe(&self, order_id: &str) -> Option<watch::Receiver<TrackingSession>> {
        self.sessions().get(order_id).map(TrackingPoller::subscribe)
    }

    /// Orders whose poller is still running. Finished pollers are pruned on the way.
    pub fn active_orders(&self) -> Vec<String> {
        let mut sessions = self.sessions();
        sessions.retain(|_, poller| !poller.is_stopped());
        let mut orders: Vec<String> = sessions.keys().cloned().collect();
        orders.sort_unstable();
        orders
    }
}

impl Drop for TrackingRegistry {
    fn drop(&mut self) {
        self.stop_all();
    }
}

impl std::fmt::Debug for TrackingRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TrackingRegistry")
            .field("config", &self.config)
            .field("sessions", &self.sessions().len())
            .finish()
    }
}
