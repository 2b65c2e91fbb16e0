//! Coordinate transform and dispatch tracking engine.
//!
//! Converts between each city's 0..=999 operating grid and geographic coordinates, gates
//! trip endpoints against the operating area, assigns vehicles to orders and tracks
//! assigned vehicles until the trip completes. Backend services are reached through the
//! traits in [`providers`]; [`http::HttpBackend`] implements them over JSON/HTTP.

pub mod boundary;
pub mod city;
pub mod config;
pub mod dispatch;
pub mod error;
pub mod geo;
#[cfg(feature = "http")]
pub mod http;
pub mod order;
pub mod providers;
pub mod retry;
pub mod tracking;

#[cfg(any(test, feature = "test-helpers"))]
pub mod test_helpers;

pub use boundary::{is_within_operating_area, BoundaryValidator};
pub use city::{CityProfileCache, CityProfileTable};
pub use config::DispatchConfig;
pub use dispatch::{AssignFailure, Assignment, BulkAssignReport, DispatchCoordinator};
pub use error::{DispatchError, DispatchResult, Endpoint};
pub use geo::{geo_to_grid, grid_to_geo, CityProfile, GeoPoint, GridPoint};
pub use order::{NewOrder, Order, OrderStatus};
