//! Live vehicle tracking for assigned orders.
//!
//! - [`TrackingPoller`]: one cancellable polling task per order
//! - [`TripPhase`]: phase classification of vehicle snapshots
//! - [`ProgressTracker`]: straight-line trip progress in percent
//! - [`TrackingRegistry`]: at most one live poller per order
//!
//! A poller moves through `Idle -> Polling(Fast) -> Polling(Slow) -> Stopped`. It only
//! ever demotes itself to the slow cadence; a new assignment starts a fresh fast poller.

mod phase;
mod poller;
mod progress;
mod registry;

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::geo::GridPoint;
use crate::order::OrderStatus;
use crate::providers::VehicleSnapshot;

pub use phase::TripPhase;
pub use poller::{TrackingPoller, TrackingRequest};
pub use progress::ProgressTracker;
pub use registry::TrackingRegistry;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TrackingConfig {
    /// Interval while the vehicle is moving.
    pub fast_interval: Duration,
    /// Interval once the vehicle has stopped.
    pub slow_interval: Duration,
    /// Bound on each snapshot, moving-flag and status call.
    pub request_timeout: Duration,
}

impl Default for TrackingConfig {
    fn default() -> Self {
        Self {
            fast_interval: Duration::from_secs(3),
            slow_interval: Duration::from_secs(10),
            request_timeout: Duration::from_secs(5),
        }
    }
}

impl TrackingConfig {
    pub fn interval(&self, cadence: Cadence) -> Duration {
        match cadence {
            Cadence::Fast => self.fast_interval,
            Cadence::Slow => self.slow_interval,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Cadence {
    Fast,
    Slow,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PollerState {
    Idle,
    Polling(Cadence),
    Stopped,
}

/// Live view of one tracked order, published to observers after every poll.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrackingSession {
    pub order_id: String,
    pub vehicle_id: String,
    pub pickup: GridPoint,
    pub dropoff: GridPoint,
    pub poll_interval_ms: u64,
    pub last_known_location: Option<GridPoint>,
    pub phase: TripPhase,
    /// Trip progress in percent, `0..=100`.
    pub progress: f64,
    pub state: PollerState,
    /// Last order status confirmed by the order store.
    pub order_status: OrderStatus,
    pub last_snapshot: Option<VehicleSnapshot>,
    pub polls_ok: u64,
    pub polls_failed: u64,
    pub last_error: Option<String>,
}

impl TrackingSession {
    pub(crate) fn new(request: &TrackingRequest) -> Self {
        Self {
            order_id: request.order_id.clone(),
            vehicle_id: request.vehicle_id.clone(),
            pickup: request.pickup,
            dropoff: request.dropoff,
            poll_interval_ms: 0,
            last_known_location: None,
            phase: TripPhase::Unknown,
            progress: 0.0,
            state: PollerState::Idle,
            order_status: OrderStatus::VehicleAssigned,
            last_snapshot: None,
            polls_ok: 0,
            polls_failed: 0,
            last_error: None,
        }
    }

    pub fn cadence(&self) -> Option<Cadence> {
        match self.state {
            PollerState::Polling(cadence) => Some(cadence),
            _ => None,
        }
    }

    pub fn is_stopped(&self) -> bool {
        self.state == PollerState::Stopped
    }
}
