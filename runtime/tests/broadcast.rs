//! Broadcast effects executed against a recording bus.

#![allow(clippy::unwrap_used, clippy::expect_used)]

use seatsync_core::message_bus::{BusError, MessageBus, Scope};
use seatsync_core::{broadcast, effect::Effect, reducer::Reducer, smallvec, SmallVec};
use seatsync_runtime::Store;
use seatsync_testing::RecordingBus;
use std::sync::Arc;
use std::time::Duration;

#[derive(Clone, Debug, Default)]
struct AnnounceState {
    delivered: u32,
    failures: Vec<String>,
}

#[derive(Clone, Debug, PartialEq)]
enum AnnounceAction {
    Announce(Scope, String),
    AnnounceInOrder(Vec<String>),
    Delivered,
    Failed(String),
}

impl AnnounceAction {
    fn failed(error: &BusError) -> Self {
        Self::Failed(error.to_string())
    }
}

#[derive(Clone)]
struct AnnounceEnv {
    bus: Arc<dyn MessageBus>,
}

#[derive(Clone)]
struct AnnounceReducer;

impl Reducer for AnnounceReducer {
    type State = AnnounceState;
    type Action = AnnounceAction;
    type Environment = AnnounceEnv;

    fn reduce(
        &self,
        state: &mut Self::State,
        action: Self::Action,
        env: &Self::Environment,
    ) -> SmallVec<[Effect<Self::Action>; 4]> {
        match action {
            AnnounceAction::Announce(scope, payload) => smallvec![broadcast! {
                bus: env.bus,
                scope: scope,
                payload: payload,
                on_success: || Some(AnnounceAction::Delivered),
                on_error: |error| Some(AnnounceAction::failed(&error))
            }],
            AnnounceAction::AnnounceInOrder(payloads) => {
                let effects = payloads
                    .into_iter()
                    .map(|payload| {
                        broadcast! {
                            bus: env.bus,
                            scope: Scope::All,
                            payload: payload,
                            on_success: || Some(AnnounceAction::Delivered),
                            on_error: |error| Some(AnnounceAction::failed(&error))
                        }
                    })
                    .collect();
                smallvec![Effect::Sequential(effects)]
            },
            AnnounceAction::Delivered => {
                state.delivered += 1;
                smallvec![Effect::None]
            },
            AnnounceAction::Failed(reason) => {
                state.failures.push(reason);
                smallvec![Effect::None]
            },
        }
    }
}

type AnnounceStore = Store<AnnounceState, AnnounceAction, AnnounceEnv, AnnounceReducer>;

fn store(bus: Arc<RecordingBus>) -> AnnounceStore {
    Store::new(AnnounceState::default(), AnnounceReducer, AnnounceEnv { bus })
}

#[tokio::test]
async fn test_broadcast_reaches_bus_and_reports_success() {
    let bus = Arc::new(RecordingBus::new());
    let _stream = bus.connect().await.unwrap();
    let store = store(Arc::clone(&bus));

    let delivered = store
        .send_and_wait_for(
            AnnounceAction::Announce(Scope::Others, "hello".to_string()),
            |a| matches!(a, AnnounceAction::Delivered),
            Duration::from_secs(1),
        )
        .await;

    assert_eq!(delivered.unwrap(), AnnounceAction::Delivered);
    assert_eq!(bus.sent_to(Scope::Others), vec!["hello".to_string()]);
    assert_eq!(store.state(|s| s.delivered).await, 1);
}

#[tokio::test]
async fn test_failed_send_feeds_error_back() {
    let bus = Arc::new(RecordingBus::new());
    let store = store(Arc::clone(&bus));

    let mut handle = store
        .send(AnnounceAction::Announce(Scope::All, "lost".to_string()))
        .await
        .unwrap();
    handle.wait_with_timeout(Duration::from_secs(1)).await.unwrap();

    let failures = store.state(|s| s.failures.clone()).await;
    assert_eq!(failures.len(), 1);
    assert!(bus.sent().is_empty());
}

#[tokio::test]
async fn test_sequential_broadcasts_keep_order() {
    let bus = Arc::new(RecordingBus::new());
    let _stream = bus.connect().await.unwrap();
    let store = store(Arc::clone(&bus));

    let payloads: Vec<String> = (0..5).map(|n| n.to_string()).collect();
    let mut handle = store
        .send(AnnounceAction::AnnounceInOrder(payloads.clone()))
        .await
        .unwrap();
    handle.wait_with_timeout(Duration::from_secs(1)).await.unwrap();

    assert_eq!(bus.sent_to(Scope::All), payloads);
    assert_eq!(store.state(|s| s.delivered).await, 5);
}
