use serde::{Deserialize, Serialize};

use crate::order::OrderStatus;
use crate::providers::VehicleSnapshot;

/// Trip phase as reported by the vehicle backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TripPhase {
    TowardPickup,
    ArrivedAtPickup,
    TowardDropoff,
    ArrivedAtDropoff,
    Unknown,
}

impl TripPhase {
    /// Classify a snapshot: the explicit phase tag wins, the location name is the fallback.
    pub fn classify(snapshot: &VehicleSnapshot) -> Self {
        snapshot
            .phase_tag
            .as_deref()
            .and_then(Self::from_label)
            .or_else(|| Self::from_label(&snapshot.location_name))
            .unwrap_or(TripPhase::Unknown)
    }

    /// Parse labels such as `TOWARD_PICKUP`, `toward dropoff` or `Arrived at pickup point`.
    pub fn from_label(label: &str) -> Option<Self> {
        let normalized = label.trim().to_lowercase().replace(['_', '-'], " ");
        let pickup = normalized.contains("pickup") || normalized.contains("pick up");
        let dropoff = normalized.contains("dropoff")
            || normalized.contains("drop off")
            || normalized.contains("destination");
        let arrived = normalized.contains("arrived") || normalized.starts_with("at ");

        match (pickup, dropoff, arrived) {
            (true, false, true) => Some(TripPhase::ArrivedAtPickup),
            (true, false, false) => Some(TripPhase::TowardPickup),
            (false, true, true) => Some(TripPhase::ArrivedAtDropoff),
            (false, true, false) => Some(TripPhase::TowardDropoff),
            _ => None,
        }
    }

    /// Order status implied by the phase, if any.
    pub fn order_status(self) -> Option<OrderStatus> {
        match self {
            TripPhase::TowardPickup | TripPhase::ArrivedAtPickup => {
                Some(OrderStatus::EnRouteToPickup)
            }
            TripPhase::TowardDropoff => Some(OrderStatus::EnRouteToDropoff),
            TripPhase::ArrivedAtDropoff => Some(OrderStatus::Completed),
            TripPhase::Unknown => None,
        }
    }

    pub fn is_trip_complete(self) -> bool {
        self == TripPhase::ArrivedAtDropoff
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geo::GridPoint;
    use crate::providers::VehicleStatus;

    fn snapshot(tag: Option<&str>, name: &str) -> VehicleSnapshot {
        VehicleSnapshot {
            vehicle_id: "v-1".into(),
            plate: "LN-A1234".into(),
            battery_level: 80.0,
            status: VehicleStatus::Busy,
            location: GridPoint::new(100, 100),
            location_name: name.into(),
            phase_tag: tag.map(str::to_string),
        }
    }

    #[test]
    fn labels_are_classified() {
        assert_eq!(TripPhase::from_label("TOWARD_PICKUP"), Some(TripPhase::TowardPickup));
        assert_eq!(TripPhase::from_label("toward dropoff"), Some(TripPhase::TowardDropoff));
        assert_eq!(
            TripPhase::from_label("Arrived at pickup point"),
            Some(TripPhase::ArrivedAtPickup)
        );
        assert_eq!(
            TripPhase::from_label("arrived-at-destination"),
            Some(TripPhase::ArrivedAtDropoff)
        );
        assert_eq!(TripPhase::from_label("Depot 4"), None);
        assert_eq!(TripPhase::from_label(""), None);
    }

    #[test]
    fn explicit_tag_wins_over_location_name() {
        let snap = snapshot(Some("arrived_at_pickup"), "toward dropoff");
        assert_eq!(TripPhase::classify(&snap), TripPhase::ArrivedAtPickup);
    }

    #[test]
    fn unrecognised_tag_falls_back_to_location_name() {
        let snap = snapshot(Some("en_route"), "Toward pickup");
        assert_eq!(TripPhase::classify(&snap), TripPhase::TowardPickup);
        assert_eq!(TripPhase::classify(&snapshot(None, "Main St")), TripPhase::Unknown);
    }
}
