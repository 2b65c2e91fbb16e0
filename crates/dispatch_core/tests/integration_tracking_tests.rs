mod support;

use std::sync::Arc;
use std::time::Duration;

use dispatch_core::geo::GridPoint;
use dispatch_core::order::OrderStatus;
use dispatch_core::providers::OrderStore;
use dispatch_core::test_helpers::{snapshot_at, test_order, InMemoryOrderStore, ScriptedPositions};
use dispatch_core::tracking::{
    Cadence, PollerState, TrackingPoller, TrackingRegistry, TrackingRequest, TripPhase,
};
use dispatch_core::DispatchError;
use tokio::time::sleep;

use support::fixture::{pending, tracking_config, TestDispatchBuilder, DROPOFF, PICKUP};

fn request(order_id: &str) -> TrackingRequest {
    TrackingRequest {
        order_id: order_id.into(),
        vehicle_id: "v-1".into(),
        pickup: PICKUP,
        dropoff: DROPOFF,
    }
}

#[tokio::test(start_paused = true)]
async fn stopped_vehicle_demotes_polling_to_slow() {
    let positions = Arc::new(
        ScriptedPositions::new(vec![Ok(snapshot_at(100, 400, "toward pickup"))])
            .with_moving(vec![true, false]),
    );
    let poller =
        TrackingPoller::start(request("o-1"), positions.clone(), None, tracking_config()).await;
    assert_eq!(poller.session().cadence(), Some(Cadence::Fast));

    sleep(Duration::from_millis(3_100)).await;
    assert_eq!(positions.snapshot_calls(), 2);
    let session = poller.session();
    assert_eq!(session.state, PollerState::Polling(Cadence::Slow));
    assert_eq!(session.poll_interval_ms, 10_000);

    sleep(Duration::from_secs(5)).await;
    assert_eq!(positions.snapshot_calls(), 2, "slow cadence waits ten seconds");

    sleep(Duration::from_secs(5)).await;
    assert_eq!(positions.snapshot_calls(), 3);
    assert_eq!(positions.moving_calls(), 2, "slow polling skips the moving flag");
    assert_eq!(poller.session().cadence(), Some(Cadence::Slow));

    poller.stop();
    poller.join().await;
}

#[tokio::test(start_paused = true)]
async fn failed_polls_keep_the_last_known_state() {
    let positions = Arc::new(ScriptedPositions::new(vec![
        Ok(snapshot_at(100, 400, "toward pickup")),
        Err(DispatchError::Transport("connection reset".into())),
        Ok(snapshot_at(200, 400, "toward pickup")),
    ]));
    let poller = TrackingPoller::start(request("o-1"), positions, None, tracking_config()).await;

    sleep(Duration::from_millis(3_100)).await;
    let session = poller.session();
    assert_eq!(session.polls_ok, 1);
    assert_eq!(session.polls_failed, 1);
    assert!(session.last_error.as_deref().is_some_and(|e| e.contains("connection reset")));
    assert_eq!(session.last_known_location, Some(GridPoint::new(100, 400)));
    assert_eq!(session.state, PollerState::Polling(Cadence::Fast));

    sleep(Duration::from_secs(3)).await;
    let session = poller.session();
    assert_eq!(session.polls_ok, 2);
    assert_eq!(session.last_known_location, Some(GridPoint::new(200, 400)));
    assert!(session.last_error.is_none());
    assert!(session.progress > 0.0 && session.progress < 50.0);

    poller.stop();
}

#[tokio::test(start_paused = true)]
async fn slow_snapshots_time_out_without_stopping_the_session() {
    let positions = Arc::new(
        ScriptedPositions::new(vec![Ok(snapshot_at(100, 400, "toward pickup"))])
            .with_snapshot_delay(Duration::from_secs(2)),
    );
    let poller = TrackingPoller::start(request("o-1"), positions, None, tracking_config()).await;

    let session = poller.session();
    assert_eq!(session.polls_failed, 1);
    assert!(session.last_error.as_deref().is_some_and(|e| e.contains("timed out")));
    assert!(!session.is_stopped());
    poller.stop();
}

#[tokio::test(start_paused = true)]
async fn responses_after_stop_are_discarded() {
    let positions = Arc::new(
        ScriptedPositions::new(vec![
            Ok(snapshot_at(100, 400, "toward pickup")),
            Ok(snapshot_at(250, 400, "toward pickup")),
        ])
        .with_snapshot_delay(Duration::from_millis(500)),
    );
    let poller =
        TrackingPoller::start(request("o-1"), positions.clone(), None, tracking_config()).await;
    let mut updates = poller.subscribe();

    // second poll is in flight from t=3.5s until t=4.0s
    sleep(Duration::from_millis(3_200)).await;
    assert_eq!(positions.snapshot_calls(), 2);
    poller.stop();
    let _ = updates.borrow_and_update();

    sleep(Duration::from_secs(2)).await;
    let session = poller.session();
    assert!(session.is_stopped());
    assert_eq!(session.polls_ok, 1);
    assert_eq!(session.last_known_location, Some(GridPoint::new(100, 400)));
    assert!(!updates.has_changed().unwrap_or(false));

    poller.join().await;
    assert_eq!(positions.snapshot_calls(), 2);
}

#[tokio::test(start_paused = true)]
async fn assignment_starts_tracking_and_completion_ends_it() {
    let world = TestDispatchBuilder::new()
        .with_order(pending("o-1"))
        .with_tracking(vec![
            Ok(snapshot_at(100, 400, "toward pickup")),
            Ok(snapshot_at(300, 400, "arrived at pickup")),
            Ok(snapshot_at(400, 400, "toward dropoff")),
            Ok(snapshot_at(700, 400, "arrived at dropoff")),
        ])
        .build();

    world
        .coordinator
        .assign_vehicle("o-1", "v-1")
        .await
        .expect("assigned");

    let session = world.tracking().session("o-1").expect("tracked");
    assert_eq!(session.phase, TripPhase::TowardPickup);
    assert_eq!(session.progress, 0.0);
    assert_eq!(world.status("o-1"), OrderStatus::EnRouteToPickup);
    assert_eq!(world.tracking().active_orders(), vec!["o-1".to_string()]);

    let mut updates = world.tracking().subscribe("o-1").expect("subscribed");
    let finished = updates
        .wait_for(|session| session.is_stopped())
        .await
        .expect("sender alive")
        .clone();

    assert_eq!(finished.phase, TripPhase::ArrivedAtDropoff);
    assert_eq!(finished.progress, 100.0);
    assert_eq!(finished.order_status, OrderStatus::Completed);
    assert_eq!(world.status("o-1"), OrderStatus::Completed);
    assert_eq!(
        world.store.status_updates(),
        vec![
            ("o-1".to_string(), OrderStatus::EnRouteToPickup),
            ("o-1".to_string(), OrderStatus::EnRouteToDropoff),
            ("o-1".to_string(), OrderStatus::Completed),
        ]
    );
    assert!(world.tracking().active_orders().is_empty());
}

#[tokio::test(start_paused = true)]
async fn cancelling_an_order_stops_its_tracking() {
    let world = TestDispatchBuilder::new()
        .with_order(pending("o-1"))
        .with_tracking(vec![Ok(snapshot_at(100, 400, "toward pickup"))])
        .build();
    world
        .coordinator
        .assign_vehicle("o-1", "v-1")
        .await
        .expect("assigned");
    let updates = world.tracking().subscribe("o-1").expect("tracked");

    world
        .coordinator
        .cancel_order("o-1", "rider no-show")
        .await
        .expect("cancelled");

    assert!(updates.borrow().is_stopped());
    assert!(world.tracking().session("o-1").is_none());
    assert!(world.tracking().active_orders().is_empty());
    assert_eq!(world.status("o-1"), OrderStatus::Cancelled);

    let calls = world.positions.as_ref().expect("positions").snapshot_calls();
    sleep(Duration::from_secs(30)).await;
    assert_eq!(
        world.positions.as_ref().expect("positions").snapshot_calls(),
        calls
    );
}

#[tokio::test(start_paused = true)]
async fn order_closed_in_the_store_ends_tracking() {
    let world = TestDispatchBuilder::new()
        .with_order(pending("o-1"))
        .with_tracking(vec![
            Ok(snapshot_at(100, 400, "toward pickup")),
            Ok(snapshot_at(400, 400, "toward dropoff")),
        ])
        .build();
    world
        .coordinator
        .assign_vehicle("o-1", "v-1")
        .await
        .expect("assigned");
    let updates = world.tracking().subscribe("o-1").expect("tracked");

    // cancelled by another client, bypassing the coordinator
    world
        .store
        .insert(test_order("o-1", PICKUP, DROPOFF, OrderStatus::Cancelled));

    sleep(Duration::from_millis(3_100)).await;
    let session = updates.borrow().clone();
    assert!(session.is_stopped());
    assert_eq!(session.order_status, OrderStatus::Cancelled);
    assert!(world.tracking().active_orders().is_empty());

    let positions = world.positions.as_ref().expect("positions");
    let calls = positions.snapshot_calls();
    sleep(Duration::from_secs(60)).await;
    assert_eq!(positions.snapshot_calls(), calls);
    assert_eq!(world.status("o-1"), OrderStatus::Cancelled);
    assert_eq!(
        world.store.status_updates(),
        vec![
            ("o-1".to_string(), OrderStatus::EnRouteToPickup),
            ("o-1".to_string(), OrderStatus::EnRouteToDropoff),
        ]
    );
}

#[tokio::test(start_paused = true)]
async fn rejected_status_update_is_not_resent() {
    let store = Arc::new(InMemoryOrderStore::with_orders(vec![pending("o-1")]));
    let orders: Arc<dyn OrderStore> = store.clone();
    let positions = Arc::new(ScriptedPositions::new(vec![Ok(snapshot_at(
        100,
        400,
        "toward pickup",
    ))]));
    let poller =
        TrackingPoller::start(request("o-1"), positions.clone(), Some(orders), tracking_config())
            .await;

    sleep(Duration::from_millis(9_100)).await;
    assert_eq!(positions.snapshot_calls(), 4);
    assert_eq!(
        store.status_updates(),
        vec![("o-1".to_string(), OrderStatus::EnRouteToPickup)]
    );
    let session = poller.session();
    assert!(!session.is_stopped());
    assert_eq!(session.order_status, OrderStatus::PendingAssignment);
    assert_eq!(session.polls_ok, 4);

    poller.stop();
    poller.join().await;
}

#[tokio::test(start_paused = true)]
async fn restarting_a_session_replaces_the_previous_poller() {
    let positions = Arc::new(
        ScriptedPositions::new(vec![Ok(snapshot_at(100, 400, "toward pickup"))])
            .with_moving(vec![false, true]),
    );
    let registry = TrackingRegistry::new(positions, tracking_config());

    registry.start(request("o-1")).await;
    let first = registry.subscribe("o-1").expect("first session");
    sleep(Duration::from_millis(100)).await;
    assert_eq!(registry.session("o-1").and_then(|s| s.cadence()), Some(Cadence::Slow));

    let restarted = registry.start(request("o-1")).await;
    assert!(first.borrow().is_stopped());
    assert_eq!(registry.active_orders(), vec!["o-1".to_string()]);
    assert!(!restarted.is_stopped());
    assert_eq!(restarted.poll_interval_ms, 3_000, "a new session starts fast");

    assert!(registry.stop("o-1"));
    assert!(!registry.stop("o-1"));
    assert!(registry.active_orders().is_empty());
}
