//! Coordinate transform between the city-local normalized grid and geographic coordinates.
//!
//! Every city maps its serviceable rectangle onto a `1000 × 1000` integer grid:
//!
//! - **Grid → geo**: continuous, no rounding.
//! - **Geo → grid**: rounded half away from zero, then saturated to `[0, 999]`.
//!
//! The grid's `y` axis grows southwards. Range checks are not done here; a point far
//! outside the city still converts (to an edge cell) and [`crate::boundary`] decides
//! whether it is serviceable.

use serde::{Deserialize, Serialize};

/// Smallest grid coordinate on either axis.
pub const GRID_MIN: i32 = 0;
/// Largest grid coordinate on either axis.
pub const GRID_MAX: i32 = 999;
/// Grid coordinate of a city's center on both axes.
pub const GRID_CENTER: f64 = 500.0;

/// Per-city parameters of the grid ↔ geo mapping.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CityProfile {
    pub city_id: String,
    pub center_longitude: f64,
    pub center_latitude: f64,
    /// Degrees covered by half the grid (500 units) on each axis.
    pub scale_factor: f64,
}

impl CityProfile {
    pub fn new(
        city_id: impl Into<String>,
        center_longitude: f64,
        center_latitude: f64,
        scale_factor: f64,
    ) -> Self {
        Self {
            city_id: city_id.into(),
            center_longitude,
            center_latitude,
            scale_factor,
        }
    }

    pub fn center(&self) -> GeoPoint {
        GeoPoint::new(self.center_latitude, self.center_longitude)
    }
}

/// Integer position in a city's normalized grid.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct GridPoint {
    pub x: i32,
    pub y: i32,
}

impl GridPoint {
    pub fn new(x: i32, y: i32) -> Self {
        Self { x, y }
    }
}

/// Geographic position in degrees.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeoPoint {
    pub latitude: f64,
    pub longitude: f64,
}

impl GeoPoint {
    pub fn new(latitude: f64, longitude: f64) -> Self {
        Self {
            latitude,
            longitude,
        }
    }
}

/// Convert a grid position to geographic coordinates for `city`.
pub fn grid_to_geo(grid: GridPoint, city: &CityProfile) -> GeoPoint {
    let longitude =
        city.center_longitude + (grid.x as f64 - GRID_CENTER) * city.scale_factor / GRID_CENTER;
    let latitude =
        city.center_latitude - (grid.y as f64 - GRID_CENTER) * city.scale_factor / GRID_CENTER;
    GeoPoint::new(latitude, longitude)
}

/// Convert geographic coordinates to the nearest grid cell of `city`, saturating at the edges.
pub fn geo_to_grid(geo: GeoPoint, city: &CityProfile) -> GridPoint {
    let x = GRID_CENTER + (geo.longitude - city.center_longitude) * GRID_CENTER / city.scale_factor;
    let y = GRID_CENTER - (geo.latitude - city.center_latitude) * GRID_CENTER / city.scale_factor;
    GridPoint::new(saturate_axis(x), saturate_axis(y))
}

/// `f64::round` is half-away-from-zero; the final cast saturates infinities and maps NaN to 0.
fn saturate_axis(value: f64) -> i32 {
    value.round().clamp(GRID_MIN as f64, GRID_MAX as f64) as i32
}

/// Straight-line distance between two grid points, in grid units.
pub fn grid_distance(a: GridPoint, b: GridPoint) -> f64 {
    let dx = (a.x - b.x) as f64;
    let dy = (a.y - b.y) as f64;
    dx.hypot(dy)
}
