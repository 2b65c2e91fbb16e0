use std::future::Future;
use std::sync::Arc;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::error::{DispatchError, DispatchResult};
use crate::geo::GridPoint;
use crate::order::OrderStatus;
use crate::providers::{OrderStore, VehiclePositionProvider, VehicleSnapshot};
use crate::retry::with_timeout;

use super::{Cadence, PollerState, ProgressTracker, TrackingConfig, TrackingSession, TripPhase};

/// What to track: the order, its vehicle and both trip endpoints in grid space.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrackingRequest {
    pub order_id: String,
    pub vehicle_id: String,
    pub pickup: GridPoint,
    pub dropoff: GridPoint,
}

/// Handle to a running tracking task.
///
/// Dropping the handle stops the task.
pub struct TrackingPoller {
    order_id: String,
    token: CancellationToken,
    session: Arc<watch::Sender<TrackingSession>>,
    task: Option<JoinHandle<()>>,
}

impl TrackingPoller {
    /// Poll once, then keep polling in the background on the fast cadence.
    ///
    /// The first poll is awaited so observers never see an empty session.
    pub async fn start(
        request: TrackingRequest,
        positions: Arc<dyn VehiclePositionProvider>,
        orders: Option<Arc<dyn OrderStore>>,
        config: TrackingConfig,
    ) -> Self {
        let (session_tx, _) = watch::channel(TrackingSession::new(&request));
        let session = Arc::new(session_tx);
        let token = CancellationToken::new();

        let mut poll_loop = PollLoop {
            request: request.clone(),
            positions,
            orders,
            config,
            token: token.clone(),
            session: session.clone(),
            progress: ProgressTracker::new(),
            cadence: Cadence::Fast,
            rejected: None,
        };
        poll_loop.enter(PollerState::Polling(Cadence::Fast));
        tracing::info!(
            order_id = %request.order_id,
            vehicle_id = %request.vehicle_id,
            "tracking started"
        );
        poll_loop.poll_once().await;

        let task = tokio::spawn(poll_loop.run());
        Self {
            order_id: request.order_id,
            token,
            session,
            task: Some(task),
        }
    }

    /// Current session state.
    pub fn session(&self) -> TrackingSession {
        self.session.borrow().clone()
    }

    /// Receiver that is notified after every poll and state change.
    pub fn subscribe(&self) -> watch::Receiver<TrackingSession> {
        self.session.subscribe()
    }

    pub fn is_stopped(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Stop polling. Any in-flight response is discarded. Calling it again is a no-op.
    pub fn stop(&self) {
        if self.token.is_cancelled() {
            return;
        }
        self.token.cancel();
        self.session.send_if_modified(|session| mark_stopped(session));
        tracing::info!(order_id = %self.order_id, "tracking stopped");
    }

    /// Wait for the background task to finish, through [`stop`](Self::stop), trip completion
    /// or the order closing.
    pub async fn join(mut self) {
        if let Some(task) = self.task.take() {
            if let Err(err) = task.await {
                tracing::warn!(order_id = %self.order_id, error = %err, "tracking task aborted");
            }
        }
    }
}

impl Drop for TrackingPoller {
    fn drop(&mut self) {
        self.token.cancel();
    }
}

impl std::fmt::Debug for TrackingPoller {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TrackingPoller")
            .field("order_id", &self.order_id)
            .field("state", &self.session.borrow().state)
            .finish()
    }
}

fn mark_stopped(session: &mut TrackingSession) -> bool {
    if session.state == PollerState::Stopped {
        return false;
    }
    session.state = PollerState::Stopped;
    true
}

/// State owned by the background task. Polls run one at a time on this value.
struct PollLoop {
    request: TrackingRequest,
    positions: Arc<dyn VehiclePositionProvider>,
    orders: Option<Arc<dyn OrderStore>>,
    config: TrackingConfig,
    token: CancellationToken,
    session: Arc<watch::Sender<TrackingSession>>,
    progress: ProgressTracker,
    cadence: Cadence,
    /// Last status update the order store refused.
    rejected: Option<OrderStatus>,
}

impl PollLoop {
    async fn run(mut self) {
        loop {
            let interval = self.config.interval(self.cadence);
            tokio::select! {
                biased;
                _ = self.token.cancelled() => break,
                _ = tokio::time::sleep(interval) => {}
            }
            self.poll_once().await;
            if self.token.is_cancelled() {
                break;
            }
        }
        self.session.send_if_modified(mark_stopped);
    }

    fn enter(&self, state: PollerState) {
        let interval_ms = match state {
            PollerState::Polling(cadence) => self.config.interval(cadence).as_millis() as u64,
            _ => 0,
        };
        self.session.send_modify(|session| {
            session.state = state;
            session.poll_interval_ms = interval_ms;
        });
    }

    /// Run `call` under the request timeout, or return `None` once tracking is stopped.
    async fn guarded<T>(
        &self,
        operation: &'static str,
        call: impl Future<Output = DispatchResult<T>>,
    ) -> Option<DispatchResult<T>> {
        let result = tokio::select! {
            biased;
            _ = self.token.cancelled() => return None,
            result = with_timeout(operation, self.config.request_timeout, call) => result,
        };
        // a response that lands after stop() must not touch the session
        if self.token.is_cancelled() {
            return None;
        }
        Some(result)
    }

    async fn poll_once(&mut self) {
        let positions = self.positions.clone();
        let vehicle_id = self.request.vehicle_id.clone();

        let polled = self
            .guarded("vehicle snapshot", positions.snapshot(&vehicle_id))
            .await;
        let snapshot = match polled {
            None => return,
            Some(Ok(snapshot)) => snapshot,
            Some(Err(err)) => {
                tracing::warn!(
                    order_id = %self.request.order_id,
                    vehicle_id = %vehicle_id,
                    error = %err,
                    "vehicle poll failed, keeping last known state"
                );
                self.session.send_modify(|session| {
                    session.polls_failed += 1;
                    session.last_error = Some(err.to_string());
                });
                return;
            }
        };

        let phase = self.apply_snapshot(snapshot);
        let order_closed = self.follow_order_status(phase).await;
        if phase.is_trip_complete() {
            tracing::info!(order_id = %self.request.order_id, "trip completed, tracking ends");
            self.finish();
            return;
        }
        if order_closed {
            tracing::info!(order_id = %self.request.order_id, "order closed, tracking ends");
            self.finish();
            return;
        }

        if self.cadence == Cadence::Fast {
            self.check_moving(&vehicle_id).await;
        }
    }

    fn finish(&self) {
        self.token.cancel();
        self.session.send_if_modified(mark_stopped);
    }

    fn apply_snapshot(&mut self, snapshot: VehicleSnapshot) -> TripPhase {
        let phase = TripPhase::classify(&snapshot);
        let location = snapshot.location;
        let progress =
            self.progress
                .observe(phase, location, self.request.pickup, self.request.dropoff);

        self.session.send_modify(|session| {
            session.last_known_location = Some(location);
            if phase != TripPhase::Unknown {
                session.phase = phase;
            }
            if let Some(progress) = progress {
                session.progress = progress;
            }
            session.last_snapshot = Some(snapshot);
            session.polls_ok += 1;
            session.last_error = None;
        });
        tracing::debug!(
            order_id = %self.request.order_id,
            phase = ?phase,
            x = location.x,
            y = location.y,
            progress = ?progress,
            "vehicle polled"
        );
        phase
    }

    /// Ask the order store to move the order forward when the phase implies it.
    ///
    /// Returns `true` once the order is terminal or gone. A rejected target is not sent
    /// again until a later update succeeds.
    async fn follow_order_status(&mut self, phase: TripPhase) -> bool {
        let (Some(orders), Some(target)) = (self.orders.clone(), phase.order_status()) else {
            return false;
        };
        let current = self.session.borrow().order_status;
        if !target.is_forward_of(current) || self.rejected == Some(target) {
            return false;
        }

        let order_id = self.request.order_id.clone();
        let update = self
            .guarded(
                "order status update",
                orders.update_status(&order_id, target, None),
            )
            .await;
        match update {
            None => false,
            Some(Ok(order)) => {
                tracing::info!(
                    order_id = %order_id,
                    status = ?order.status,
                    "order status advanced"
                );
                self.rejected = None;
                self.session
                    .send_modify(|session| session.order_status = order.status);
                order.status.is_terminal()
            }
            Some(Err(DispatchError::OrderNotFound(_))) => {
                tracing::warn!(order_id = %order_id, "order no longer exists");
                true
            }
            Some(Err(err)) if err.is_transient() => {
                tracing::warn!(
                    order_id = %order_id,
                    target = ?target,
                    error = %err,
                    "order status update failed"
                );
                false
            }
            Some(Err(err)) => {
                tracing::warn!(
                    order_id = %order_id,
                    target = ?target,
                    error = %err,
                    "order status update rejected"
                );
                self.rejected = Some(target);
                self.reconcile_order_status(orders.as_ref()).await
            }
        }
    }

    /// Adopt the store's status after a rejected update. Returns `true` when it is terminal.
    async fn reconcile_order_status(&self, orders: &dyn OrderStore) -> bool {
        let lookup = self
            .guarded("get order", orders.get(&self.request.order_id))
            .await;
        match lookup {
            None => false,
            Some(Ok(order)) => {
                let status = order.status;
                self.session
                    .send_modify(|session| session.order_status = status);
                status.is_terminal()
            }
            Some(Err(err)) => {
                tracing::warn!(
                    order_id = %self.request.order_id,
                    error = %err,
                    "order lookup failed"
                );
                matches!(err, DispatchError::OrderNotFound(_))
            }
        }
    }

    async fn check_moving(&mut self, vehicle_id: &str) {
        let positions = self.positions.clone();
        match self.guarded("vehicle moving flag", positions.is_moving(vehicle_id)).await {
            None | Some(Ok(true)) => {}
            Some(Ok(false)) => {
                self.cadence = Cadence::Slow;
                self.enter(PollerState::Polling(Cadence::Slow));
                tracing::info!(
                    order_id = %self.request.order_id,
                    interval_ms = self.config.slow_interval.as_millis() as u64,
                    "vehicle stopped, polling slower"
                );
            }
            Some(Err(err)) => {
                tracing::warn!(
                    order_id = %self.request.order_id,
                    error = %err,
                    "moving flag unavailable, keeping cadence"
                );
            }
        }
    }
}
