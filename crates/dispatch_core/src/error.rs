//! Error taxonomy shared by every engine component.

use std::time::Duration;

use thiserror::Error;

use crate::geo::{GeoPoint, GridPoint};
use crate::order::OrderStatus;

/// Which end of a trip an error refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Endpoint {
    Pickup,
    Dropoff,
}

impl std::fmt::Display for Endpoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Endpoint::Pickup => f.write_str("pickup"),
            Endpoint::Dropoff => f.write_str("dropoff"),
        }
    }
}

#[derive(Debug, Clone, Error)]
pub enum DispatchError {
    #[error("unknown city `{0}`: no loaded profile")]
    UnknownCity(String),

    #[error(
        "{endpoint} ({lon:.6}, {lat:.6}) maps to grid ({x}, {y}), \
         outside the operating area of `{city}`",
        lon = .geo.longitude,
        lat = .geo.latitude,
        x = .grid.x,
        y = .grid.y
    )]
    OutOfBounds {
        city: String,
        endpoint: Endpoint,
        geo: GeoPoint,
        grid: GridPoint,
    },

    #[error(
        "no vehicle available near grid ({}, {}) in `{city}` for order {order_id}",
        .pickup.x,
        .pickup.y
    )]
    NoVehicleAvailable {
        order_id: String,
        city: String,
        pickup: GridPoint,
    },

    #[error("order {order_id} cannot move from {from:?} to {to:?}")]
    InvalidState {
        order_id: String,
        from: OrderStatus,
        to: OrderStatus,
    },

    #[error("failed to build boundary polygon for `{city}` after {attempts} attempt(s): {reason}")]
    BoundaryGeneration {
        city: String,
        attempts: u32,
        reason: String,
    },

    #[error("order {0} not found")]
    OrderNotFound(String),

    #[error("{operation} timed out after {}ms", .timeout.as_millis())]
    Timeout {
        operation: &'static str,
        timeout: Duration,
    },

    #[error("transport error: {0}")]
    Transport(String),

    #[error("backend returned {status}: {message}")]
    Backend { status: u16, message: String },

    #[error("invalid payload: {0}")]
    InvalidPayload(String),
}

impl DispatchError {
    /// Errors worth retrying later: timeouts, connection failures and 5xx responses.
    pub fn is_transient(&self) -> bool {
        match self {
            DispatchError::Timeout { .. } | DispatchError::Transport(_) => true,
            DispatchError::Backend { status, .. } => *status >= 500 || *status == 429,
            _ => false,
        }
    }

    /// Short machine-friendly tag, used in bulk reports and log fields.
    pub fn kind(&self) -> &'static str {
        match self {
            DispatchError::UnknownCity(_) => "unknown_city",
            DispatchError::OutOfBounds { .. } => "out_of_bounds",
            DispatchError::NoVehicleAvailable { .. } => "no_vehicle_available",
            DispatchError::InvalidState { .. } => "invalid_state",
            DispatchError::BoundaryGeneration { .. } => "boundary_generation",
            DispatchError::OrderNotFound(_) => "order_not_found",
            DispatchError::Timeout { .. } => "timeout",
            DispatchError::Transport(_) => "transport",
            DispatchError::Backend { .. } => "backend",
            DispatchError::InvalidPayload(_) => "invalid_payload",
        }
    }
}

pub type DispatchResult<T> = Result<T, DispatchError>;
