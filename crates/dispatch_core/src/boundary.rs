//! Operating area checks and the renderable boundary polygon.

use std::sync::Arc;

use crate::city::CityProfileCache;
use crate::error::{DispatchError, DispatchResult, Endpoint};
use crate::geo::{GeoPoint, GridPoint, GRID_MAX, GRID_MIN};
use crate::retry::{retry_with_backoff, Attempt, RetryError, RetryPolicy};

/// Grid corners of the operating rectangle, clockwise from the north-west.
pub const BOUNDARY_CORNERS: [GridPoint; 4] = [
    GridPoint { x: GRID_MIN, y: GRID_MIN },
    GridPoint { x: GRID_MAX, y: GRID_MIN },
    GridPoint { x: GRID_MAX, y: GRID_MAX },
    GridPoint { x: GRID_MIN, y: GRID_MAX },
];

/// True when `grid` lies strictly inside the operating area; edge cells are out.
pub fn is_within_operating_area(grid: GridPoint) -> bool {
    grid.x > GRID_MIN && grid.x < GRID_MAX && grid.y > GRID_MIN && grid.y < GRID_MAX
}

#[derive(Debug, Clone)]
pub struct BoundaryValidator {
    cities: Arc<CityProfileCache>,
    retry: RetryPolicy,
}

impl BoundaryValidator {
    pub fn new(cities: Arc<CityProfileCache>) -> Self {
        Self {
            cities,
            retry: RetryPolicy::default(),
        }
    }

    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn cities(&self) -> &Arc<CityProfileCache> {
        &self.cities
    }

    /// Convert one trip endpoint and reject it if it falls outside the operating area.
    pub fn check_endpoint(
        &self,
        geo: GeoPoint,
        city_id: &str,
        endpoint: Endpoint,
    ) -> DispatchResult<GridPoint> {
        let grid = self.cities.geo_to_grid(geo, city_id)?;
        if is_within_operating_area(grid) {
            Ok(grid)
        } else {
            Err(DispatchError::OutOfBounds {
                city: city_id.to_string(),
                endpoint,
                geo,
                grid,
            })
        }
    }

    /// Geographic corners of the operating rectangle for `city_id`.
    pub async fn build_boundary_polygon(&self, city_id: &str) -> DispatchResult<[GeoPoint; 4]> {
        self.cities
            .try_load()
            .await
            .map_err(|err| boundary_error(city_id, 1, &err))?;
        self.corners(city_id)
            .map_err(|err| boundary_error(city_id, 1, &err))
    }

    /// [`build_boundary_polygon`](Self::build_boundary_polygon) with the validator's retry policy.
    ///
    /// Any profile load failure is retried; an unknown city is not. Once attempts run out the
    /// failure is logged and returned; no polygon is produced.
    pub async fn build_boundary_polygon_with_retry(
        &self,
        city_id: &str,
    ) -> DispatchResult<[GeoPoint; 4]> {
        let outcome = retry_with_backoff(&self.retry, "build boundary polygon", |_| async move {
            match self.cities.try_load().await {
                // unknown city after a good load is fatal
                Ok(_) => Attempt::classify(self.corners(city_id)),
                Err(err) => Attempt::Transient(err),
            }
        })
        .await;

        outcome.map_err(|failure| {
            let attempts = failure.attempts();
            let exhausted = matches!(failure, RetryError::Exhausted { .. });
            let err = failure.into_inner();
            tracing::error!(
                city = city_id,
                attempts,
                exhausted,
                error = %err,
                "boundary polygon unavailable"
            );
            boundary_error(city_id, attempts, &err)
        })
    }

    fn corners(&self, city_id: &str) -> DispatchResult<[GeoPoint; 4]> {
        let mut polygon = [GeoPoint::new(0.0, 0.0); 4];
        for (slot, corner) in polygon.iter_mut().zip(BOUNDARY_CORNERS) {
            *slot = self.cities.grid_to_geo(corner, city_id)?;
        }
        Ok(polygon)
    }
}

fn boundary_error(city_id: &str, attempts: u32, cause: &DispatchError) -> DispatchError {
    DispatchError::BoundaryGeneration {
        city: city_id.to_string(),
        attempts,
        reason: cause.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn edges_are_outside_the_operating_area() {
        for edge in [0, 999] {
            for other in [1, 500, 998] {
                assert!(!is_within_operating_area(GridPoint::new(edge, other)));
                assert!(!is_within_operating_area(GridPoint::new(other, edge)));
            }
        }
        assert!(is_within_operating_area(GridPoint::new(500, 500)));
        assert!(is_within_operating_area(GridPoint::new(1, 998)));
    }
}
