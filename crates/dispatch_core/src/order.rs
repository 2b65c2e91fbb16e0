//! Order records and the order status state machine.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::geo::GeoPoint;

/// Lifecycle of a trip order.
///
/// ```text
/// PendingAssignment -> VehicleAssigned -> EnRouteToPickup -> EnRouteToDropoff -> Completed
///         \________________\__________________\_________________\_______-> Cancelled
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OrderStatus {
    PendingAssignment,
    VehicleAssigned,
    EnRouteToPickup,
    EnRouteToDropoff,
    Completed,
    Cancelled,
}

impl OrderStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, OrderStatus::Completed | OrderStatus::Cancelled)
    }

    /// Position along the happy path; `Cancelled` sits outside it.
    fn rank(self) -> Option<u8> {
        match self {
            OrderStatus::PendingAssignment => Some(0),
            OrderStatus::VehicleAssigned => Some(1),
            OrderStatus::EnRouteToPickup => Some(2),
            OrderStatus::EnRouteToDropoff => Some(3),
            OrderStatus::Completed => Some(4),
            OrderStatus::Cancelled => None,
        }
    }

    /// Legal edges of the state machine.
    ///
    /// Trip progress may skip intermediate phases (a vehicle first seen already heading to
    /// the dropoff), but assignment itself is the only way out of `PendingAssignment`.
    pub fn can_transition_to(self, next: OrderStatus) -> bool {
        if self.is_terminal() {
            return false;
        }
        match (self, next) {
            (_, OrderStatus::Cancelled) => true,
            (OrderStatus::PendingAssignment, OrderStatus::VehicleAssigned) => true,
            (OrderStatus::PendingAssignment, _) => false,
            (current, next) => next.is_forward_of(current),
        }
    }

    /// True when `self` lies strictly later than `other` on the happy path.
    pub fn is_forward_of(self, other: OrderStatus) -> bool {
        match (self.rank(), other.rank()) {
            (Some(a), Some(b)) => a > b,
            _ => false,
        }
    }
}

/// A trip request as seen by the dispatch engine. The order store owns the record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Order {
    pub order_id: String,
    pub pickup: GeoPoint,
    pub dropoff: GeoPoint,
    pub city_id: String,
    pub status: OrderStatus,
    #[serde(default)]
    pub assigned_vehicle_id: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// Payload sent to the order store when a rider creates a trip.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewOrder {
    pub pickup: GeoPoint,
    pub dropoff: GeoPoint,
    pub city_id: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    const ALL: [OrderStatus; 6] = [
        OrderStatus::PendingAssignment,
        OrderStatus::VehicleAssigned,
        OrderStatus::EnRouteToPickup,
        OrderStatus::EnRouteToDropoff,
        OrderStatus::Completed,
        OrderStatus::Cancelled,
    ];

    #[test]
    fn terminal_states_have_no_exits() {
        for next in ALL {
            assert!(!OrderStatus::Completed.can_transition_to(next));
            assert!(!OrderStatus::Cancelled.can_transition_to(next));
        }
    }

    #[test]
    fn cancel_reachable_from_every_non_terminal_state() {
        for status in ALL.into_iter().filter(|s| !s.is_terminal()) {
            assert!(status.can_transition_to(OrderStatus::Cancelled), "{status:?}");
        }
    }

    #[test]
    fn pending_only_leaves_through_assignment() {
        let pending = OrderStatus::PendingAssignment;
        assert!(pending.can_transition_to(OrderStatus::VehicleAssigned));
        assert!(!pending.can_transition_to(OrderStatus::EnRouteToPickup));
        assert!(!pending.can_transition_to(OrderStatus::Completed));
        assert!(!pending.can_transition_to(OrderStatus::PendingAssignment));
    }

    #[test]
    fn trip_progress_only_moves_forward() {
        let assigned = OrderStatus::VehicleAssigned;
        assert!(assigned.can_transition_to(OrderStatus::EnRouteToPickup));
        assert!(assigned.can_transition_to(OrderStatus::EnRouteToDropoff));
        assert!(!assigned.can_transition_to(OrderStatus::VehicleAssigned));
        assert!(!OrderStatus::EnRouteToDropoff.can_transition_to(OrderStatus::EnRouteToPickup));
    }

    #[test]
    fn status_uses_screaming_snake_case_on_the_wire() {
        let json = serde_json::to_string(&OrderStatus::EnRouteToPickup).expect("serialize");
        assert_eq!(json, "\"EN_ROUTE_TO_PICKUP\"");
    }
}
