//! Order dispatch: creation, manual and nearest-vehicle assignment, bulk runs, cancellation.
//!
//! The coordinator never holds order state itself. Each operation reads the current order
//! from the [`OrderStore`], validates the transition locally and then asks the store to
//! apply it. Every collaborator call is bounded by the request timeout.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use futures::stream::{self, StreamExt};
use serde::{Deserialize, Serialize};

use crate::boundary::BoundaryValidator;
use crate::city::CityProfileCache;
use crate::config::DispatchConfig;
use crate::error::{DispatchError, DispatchResult, Endpoint};
use crate::geo::GeoPoint;
use crate::order::{NewOrder, Order, OrderStatus};
use crate::providers::{BulkOrderFinder, NearestVehicleFinder, OrderSearch, OrderStore};
use crate::retry::with_timeout;
use crate::tracking::{TrackingRegistry, TrackingRequest};

/// A successful vehicle assignment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Assignment {
    pub order_id: String,
    pub vehicle_id: String,
}

/// One order that could not be assigned during a bulk run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AssignFailure {
    pub order_id: String,
    /// Error tag, see [`DispatchError::kind`].
    pub kind: String,
    pub reason: String,
}

/// Outcome of a bulk auto-assign run, in input order.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BulkAssignReport {
    pub succeeded: Vec<Assignment>,
    pub failed: Vec<AssignFailure>,
}

impl BulkAssignReport {
    pub fn total(&self) -> usize {
        self.succeeded.len() + self.failed.len()
    }
}

pub struct DispatchCoordinator {
    validator: BoundaryValidator,
    orders: Arc<dyn OrderStore>,
    finder: Arc<dyn NearestVehicleFinder>,
    bulk_finder: Option<Arc<dyn BulkOrderFinder>>,
    tracking: Option<Arc<TrackingRegistry>>,
    request_timeout: Duration,
    bulk_parallelism: usize,
}

impl DispatchCoordinator {
    pub fn new(
        cities: Arc<CityProfileCache>,
        orders: Arc<dyn OrderStore>,
        finder: Arc<dyn NearestVehicleFinder>,
    ) -> Self {
        let defaults = DispatchConfig::default();
        Self {
            validator: BoundaryValidator::new(cities),
            orders,
            finder,
            bulk_finder: None,
            tracking: None,
            request_timeout: defaults.request_timeout(),
            bulk_parallelism: defaults.bulk_parallelism,
        }
    }

    pub fn with_config(mut self, config: &DispatchConfig) -> Self {
        self.request_timeout = config.request_timeout();
        self.bulk_parallelism = config.bulk_parallelism.max(1);
        self.validator = self
            .validator
            .with_retry_policy(config.boundary_retry_policy());
        self
    }

    pub fn with_bulk_finder(mut self, bulk_finder: Arc<dyn BulkOrderFinder>) -> Self {
        self.bulk_finder = Some(bulk_finder);
        self
    }

    /// Start a tracking session whenever a vehicle is assigned.
    pub fn with_tracking(mut self, tracking: Arc<TrackingRegistry>) -> Self {
        self.tracking = Some(tracking);
        self
    }

    pub fn validator(&self) -> &BoundaryValidator {
        &self.validator
    }

    pub fn tracking(&self) -> Option<&Arc<TrackingRegistry>> {
        self.tracking.as_ref()
    }

    async fn ensure_profiles(&self) -> DispatchResult<()> {
        self.validator.cities().try_load().await.map(|_| ())
    }

    async fn fetch_order(&self, order_id: &str) -> DispatchResult<Order> {
        with_timeout("get order", self.request_timeout, self.orders.get(order_id)).await
    }

    /// Create an order after checking both endpoints lie inside the operating area.
    pub async fn create_order(
        &self,
        pickup: GeoPoint,
        dropoff: GeoPoint,
        city_id: &str,
    ) -> DispatchResult<Order> {
        self.ensure_profiles().await?;
        let pickup_grid = self
            .validator
            .check_endpoint(pickup, city_id, Endpoint::Pickup)?;
        let dropoff_grid = self
            .validator
            .check_endpoint(dropoff, city_id, Endpoint::Dropoff)?;

        let new_order = NewOrder {
            pickup,
            dropoff,
            city_id: city_id.to_string(),
        };
        let order = with_timeout(
            "create order",
            self.request_timeout,
            self.orders.create(new_order),
        )
        .await?;
        tracing::info!(
            order_id = %order.order_id,
            city = city_id,
            pickup_x = pickup_grid.x,
            pickup_y = pickup_grid.y,
            dropoff_x = dropoff_grid.x,
            dropoff_y = dropoff_grid.y,
            "order created"
        );
        Ok(order)
    }

    /// Assign `vehicle_id` to a pending order.
    pub async fn assign_vehicle(&self, order_id: &str, vehicle_id: &str) -> DispatchResult<Order> {
        let order = self.fetch_order(order_id).await?;
        self.assign_loaded(&order, vehicle_id).await
    }

    async fn assign_loaded(&self, order: &Order, vehicle_id: &str) -> DispatchResult<Order> {
        require_transition(order, OrderStatus::VehicleAssigned)?;
        let assigned = with_timeout(
            "assign vehicle",
            self.request_timeout,
            self.orders.assign(&order.order_id, vehicle_id),
        )
        .await?;
        tracing::info!(order_id = %order.order_id, vehicle_id, "vehicle assigned");

        if let Some(tracking) = &self.tracking {
            self.start_tracking(tracking, &assigned, vehicle_id).await;
        }
        Ok(assigned)
    }

    async fn start_tracking(&self, tracking: &TrackingRegistry, order: &Order, vehicle_id: &str) {
        let cities = self.validator.cities();
        let endpoints = cities
            .geo_to_grid(order.pickup, &order.city_id)
            .and_then(|pickup| Ok((pickup, cities.geo_to_grid(order.dropoff, &order.city_id)?)));
        match endpoints {
            Ok((pickup, dropoff)) => {
                tracking
                    .start(TrackingRequest {
                        order_id: order.order_id.clone(),
                        vehicle_id: vehicle_id.to_string(),
                        pickup,
                        dropoff,
                    })
                    .await;
            }
            Err(err) => {
                tracing::warn!(order_id = %order.order_id, error = %err, "cannot track order");
            }
        }
    }

    /// Assign the backend's nearest idle vehicle to a pending order.
    pub async fn auto_assign_nearest(&self, order_id: &str) -> DispatchResult<Assignment> {
        let order = self.fetch_order(order_id).await?;
        require_transition(&order, OrderStatus::VehicleAssigned)?;
        self.ensure_profiles().await?;
        let pickup = self
            .validator
            .cities()
            .geo_to_grid(order.pickup, &order.city_id)?;

        let nearest = with_timeout(
            "nearest vehicle",
            self.request_timeout,
            self.finder.nearest_vehicle(&order.city_id, pickup),
        )
        .await?;
        let Some(vehicle) = nearest else {
            return Err(DispatchError::NoVehicleAvailable {
                order_id: order.order_id,
                city: order.city_id,
                pickup,
            });
        };

        self.assign_loaded(&order, &vehicle.vehicle_id).await?;
        Ok(Assignment {
            order_id: order.order_id,
            vehicle_id: vehicle.vehicle_id,
        })
    }

    /// Auto-assign every order independently. One failure never affects the others.
    ///
    /// Repeated ids are assigned once, in the position of their first occurrence.
    pub async fn bulk_auto_assign(&self, order_ids: &[String]) -> BulkAssignReport {
        let mut seen = HashSet::with_capacity(order_ids.len());
        let unique: Vec<&String> = order_ids
            .iter()
            .filter(|order_id| seen.insert(*order_id))
            .collect();
        if unique.len() < order_ids.len() {
            tracing::debug!(
                duplicates = order_ids.len() - unique.len(),
                "bulk auto-assign dropped repeated order ids"
            );
        }

        let mut outcomes: Vec<(usize, &String, DispatchResult<Assignment>)> =
            stream::iter(unique.into_iter().enumerate())
                .map(|(index, order_id)| async move {
                    (index, order_id, self.auto_assign_nearest(order_id).await)
                })
                .buffer_unordered(self.bulk_parallelism.max(1))
                .collect()
                .await;
        outcomes.sort_by_key(|(index, _, _)| *index);

        let mut report = BulkAssignReport::default();
        for (_, order_id, outcome) in outcomes {
            match outcome {
                Ok(assignment) => report.succeeded.push(assignment),
                Err(err) => {
                    tracing::warn!(
                        order_id = %order_id,
                        kind = err.kind(),
                        error = %err,
                        "bulk assignment skipped order"
                    );
                    report.failed.push(AssignFailure {
                        order_id: order_id.clone(),
                        kind: err.kind().to_string(),
                        reason: err.to_string(),
                    });
                }
            }
        }
        tracing::info!(
            succeeded = report.succeeded.len(),
            failed = report.failed.len(),
            "bulk auto-assign finished"
        );
        report
    }

    /// Look up pending orders matching `search` and bulk auto-assign them.
    pub async fn bulk_auto_assign_pending(
        &self,
        search: &OrderSearch,
    ) -> DispatchResult<BulkAssignReport> {
        let finder = self.bulk_finder.as_ref().ok_or_else(|| {
            DispatchError::InvalidPayload("no bulk order finder configured".into())
        })?;
        let order_ids =
            with_timeout("pending orders", self.request_timeout, finder.pending_orders(search))
                .await?;
        Ok(self.bulk_auto_assign(&order_ids).await)
    }

    /// Cancel a non-terminal order and stop its tracking session.
    pub async fn cancel_order(&self, order_id: &str, reason: &str) -> DispatchResult<Order> {
        let order = self.fetch_order(order_id).await?;
        if let Err(err) = require_transition(&order, OrderStatus::Cancelled) {
            self.stop_tracking(order_id);
            return Err(err);
        }
        let cancelled = with_timeout(
            "cancel order",
            self.request_timeout,
            self.orders
                .update_status(order_id, OrderStatus::Cancelled, Some(reason)),
        )
        .await?;
        self.stop_tracking(order_id);
        tracing::info!(order_id, reason, "order cancelled");
        Ok(cancelled)
    }

    /// Stop tracking `order_id`, if it is tracked.
    pub fn stop_tracking(&self, order_id: &str) -> bool {
        self.tracking
            .as_ref()
            .is_some_and(|tracking| tracking.stop(order_id))
    }
}

fn require_transition(order: &Order, next: OrderStatus) -> DispatchResult<()> {
    let allowed = match next {
        // assignment is only valid from the pending state, never as a re-assignment
        OrderStatus::VehicleAssigned => order.status == OrderStatus::PendingAssignment,
        _ => order.status.can_transition_to(next),
    };
    if allowed {
        Ok(())
    } else {
        Err(DispatchError::InvalidState {
            order_id: order.order_id.clone(),
            from: order.status,
            to: next,
        })
    }
}

impl std::fmt::Debug for DispatchCoordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DispatchCoordinator")
            .field("validator", &self.validator)
            .field("tracking", &self.tracking)
            .field("request_timeout", &self.request_timeout)
            .field("bulk_parallelism", &self.bulk_parallelism)
            .finish()
    }
}
