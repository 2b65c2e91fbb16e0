use crate::geo::{grid_distance, GridPoint};

use super::phase::TripPhase;

/// Share of the whole trip covered by each of the two legs.
const LEG_WEIGHT: f64 = 50.0;

/// Trip progress in percent, derived from straight-line grid distances.
///
/// The trip is two equally weighted legs. Each leg starts at the first location observed
/// in that phase and ends at the pickup or dropoff point.
#[derive(Debug, Clone, Default)]
pub struct ProgressTracker {
    leg: Option<(TripPhase, GridPoint)>,
}

impl ProgressTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Progress for this observation, or `None` when the phase is unknown.
    pub fn observe(
        &mut self,
        phase: TripPhase,
        location: GridPoint,
        pickup: GridPoint,
        dropoff: GridPoint,
    ) -> Option<f64> {
        let progress = match phase {
            TripPhase::TowardPickup => self.leg_ratio(phase, location, pickup) * LEG_WEIGHT,
            TripPhase::ArrivedAtPickup => LEG_WEIGHT,
            TripPhase::TowardDropoff => {
                LEG_WEIGHT + self.leg_ratio(phase, location, dropoff) * LEG_WEIGHT
            }
            TripPhase::ArrivedAtDropoff => 2.0 * LEG_WEIGHT,
            TripPhase::Unknown => return None,
        };
        Some(progress.clamp(0.0, 2.0 * LEG_WEIGHT))
    }

    pub fn leg_start(&self) -> Option<GridPoint> {
        self.leg.map(|(_, start)| start)
    }

    fn leg_ratio(&mut self, phase: TripPhase, location: GridPoint, target: GridPoint) -> f64 {
        let start = match self.leg {
            Some((leg_phase, start)) if leg_phase == phase => start,
            _ => {
                self.leg = Some((phase, location));
                location
            }
        };
        let total = grid_distance(start, target);
        if total <= f64::EPSILON {
            return 1.0;
        }
        (grid_distance(start, location) / total).clamp(0.0, 1.0)
    }
}
