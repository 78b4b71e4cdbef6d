//! # SeatSync Runtime
//!
//! Runtime for SeatSync replicas.
//!
//! This crate provides the Store runtime that coordinates reducer execution
//! and effect handling for one replica.
//!
//! ## Core Components
//!
//! - **Store**: Owns replica state and executes effects
//! - **Effect Executor**: Executes effect descriptions and feeds actions back to the reducer
//! - **Event Loop**: The action → reducer → effects → action feedback loop
//!
//! ## Example
//!
//! ```ignore
//! use seatsync_runtime::Store;
//!
//! let store = Store::new(initial_state, ReplicaReducer::new(), environment);
//!
//! // Send an action
//! store.send(ReplicaAction::Connected).await?;
//!
//! // Read state
//! let available = store.state(|s| s.available(&flight)).await;
//! ```

use seatsync_core::{effect::Effect, reducer::Reducer};
use std::sync::Arc;
use tokio::sync::RwLock;

/// Prometheus metrics for observability
pub mod metrics;

/// Error types for the Store runtime
pub mod error {
    use thiserror::Error;

    /// Errors that can occur during Store operations
    #[derive(Error, Debug)]
    pub enum StoreError {
        /// Store is shutting down and not accepting new actions
        ///
        /// This error is returned when `send()` is called after shutdown initiated.
        #[error("Store is shutting down")]
        ShutdownInProgress,

        /// Shutdown timed out waiting for effects to complete
        ///
        /// Some effects were still running when the timeout elapsed.
        #[error("Shutdown timed out with {0} effects still running")]
        ShutdownTimeout(usize),

        /// Timeout waiting for terminal action
        ///
        /// Returned by `send_and_wait_for` when the timeout expires before
        /// a matching action is received.
        #[error("Timeout waiting for action")]
        Timeout,

        /// Action broadcast channel closed
        #[error("Action broadcast channel closed")]
        ChannelClosed,
    }
}

pub use error::StoreError;

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;
use tokio::sync::watch;

/// Configuration for Store instances
///
/// # Example
///
/// ```ignore
/// let config = StoreConfig::default().with_shutdown_timeout(Duration::from_secs(5));
///
/// let store = Store::with_config(state, reducer, env, config);
/// ```
#[derive(Debug, Clone)]
pub struct StoreConfig {
    /// Capacity of the action broadcast channel
    pub broadcast_capacity: usize,
    /// Default timeout for graceful shutdown
    pub default_shutdown_timeout: Duration,
}

impl StoreConfig {
    /// Set the default shutdown timeout
    #[must_use]
    pub const fn with_shutdown_timeout(mut self, timeout: Duration) -> Self {
        self.default_shutdown_timeout = timeout;
        self
    }
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            broadcast_capacity: 64,
            default_shutdown_timeout: Duration::from_secs(30),
        }
    }
}

/// Handle for tracking effect completion
///
/// Returned by [`Store::send()`] to allow waiting for the effects of one
/// action to complete. Actions fed back by those effects get their own
/// handles; this one does not wait for them.
///
/// # Example
///
/// ```ignore
/// let mut handle = store.send(ReplicaAction::Submit).await?;
/// handle.wait_with_timeout(Duration::from_secs(5)).await?;
/// // Every SeatHeld broadcast from the submit has left the replica
/// ```
#[derive(Clone)]
pub struct EffectHandle {
    effects: Arc<AtomicUsize>,
    completion: watch::Receiver<()>,
}

impl EffectHandle {
    /// Create a new effect handle and its internal tracking counterpart
    fn new() -> (Self, EffectTracking) {
        let counter = Arc::new(AtomicUsize::new(0));
        let (tx, rx) = watch::channel(());

        let handle = Self {
            effects: Arc::clone(&counter),
            completion: rx,
        };

        let tracking = EffectTracking {
            counter,
            notifier: tx,
        };

        (handle, tracking)
    }

    /// Create a handle that's already complete
    #[must_use]
    pub fn completed() -> Self {
        let (tx, rx) = watch::channel(());
        let _ = tx.send(());

        Self {
            effects: Arc::new(AtomicUsize::new(0)),
            completion: rx,
        }
    }

    /// Number of effects still running
    #[must_use]
    pub fn pending(&self) -> usize {
        self.effects.load(Ordering::SeqCst)
    }

    /// Wait for all effects to complete
    pub async fn wait(&mut self) {
        while self.effects.load(Ordering::SeqCst) > 0 {
            if self.completion.changed().await.is_err() {
                // Every tracker is gone, so nothing can still be running
                break;
            }
        }
    }

    /// Wait for all effects to complete with a timeout
    ///
    /// # Errors
    ///
    /// Returns `Err(())` if the timeout expires before all effects complete.
    pub async fn wait_with_timeout(&mut self, timeout: Duration) -> Result<(), ()> {
        tokio::time::timeout(timeout, self.wait())
            .await
            .map_err(|_| ())
    }
}

impl std::fmt::Debug for EffectHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EffectHandle")
            .field("pending_effects", &self.effects.load(Ordering::SeqCst))
            .finish_non_exhaustive()
    }
}

/// Internal: Effect tracking context passed through effect execution
#[derive(Clone)]
struct EffectTracking {
    counter: Arc<AtomicUsize>,
    notifier: watch::Sender<()>,
}

impl EffectTracking {
    /// Increment the effect counter (effect started)
    fn increment(&self) {
        self.counter.fetch_add(1, Ordering::SeqCst);
    }

    /// Decrement the effect counter (effect completed)
    fn decrement(&self) {
        if self.counter.fetch_sub(1, Ordering::SeqCst) == 1 {
            // Counter reached zero, notify waiters
            let _ = self.notifier.send(());
        }
    }
}

/// Internal: RAII guard that decrements effect counter on drop
///
/// Ensures the effect counter is always decremented, even if the effect panics.
struct DecrementGuard(EffectTracking);

impl Drop for DecrementGuard {
    fn drop(&mut self) {
        self.0.decrement();
    }
}

/// Guard that decrements an atomic counter on drop (for shutdown tracking)
struct AtomicCounterGuard(Arc<AtomicUsize>);

impl Drop for AtomicCounterGuard {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Store runtime for coordinating reducer execution and effect handling.
pub mod store {
    use super::{
        Arc, AtomicBool, AtomicCounterGuard, AtomicUsize, DecrementGuard, Duration, Effect,
        EffectHandle, EffectTracking, Ordering, Reducer, RwLock, StoreConfig, StoreError,
    };
    use seatsync_core::effect::BusOperation;
    use tokio::sync::{broadcast, watch};

    /// The Store - runtime coordinator for one replica
    ///
    /// The Store manages:
    /// 1. State (behind `RwLock`; the reducer runs under the write lock, one action at a time)
    /// 2. Reducer (protocol logic)
    /// 3. Environment (injected dependencies)
    /// 4. Effect execution (with feedback loop)
    ///
    /// # Type Parameters
    ///
    /// - `S`: State type
    /// - `A`: Action type
    /// - `E`: Environment type
    /// - `R`: Reducer implementation
    pub struct Store<S, A, E, R>
    where
        R: Reducer<State = S, Action = A, Environment = E>,
    {
        state: Arc<RwLock<S>>,
        reducer: R,
        environment: E,
        shutdown: Arc<AtomicBool>,
        pending_effects: Arc<AtomicUsize>,
        default_shutdown_timeout: Duration,
        /// Action broadcast channel for observing actions produced by effects.
        action_broadcast: broadcast::Sender<A>,
    }

    impl<S, A, E, R> Store<S, A, E, R>
    where
        R: Reducer<State = S, Action = A, Environment = E> + Send + Sync + 'static,
        A: Send + Clone + 'static,
        S: Send + Sync + 'static,
        E: Send + Sync + 'static,
    {
        /// Create a new store with initial state, reducer, and environment
        #[must_use]
        pub fn new(initial_state: S, reducer: R, environment: E) -> Self {
            Self::with_config(initial_state, reducer, environment, StoreConfig::default())
        }

        /// Create a new Store with custom configuration
        #[must_use]
        pub fn with_config(
            initial_state: S,
            reducer: R,
            environment: E,
            config: StoreConfig,
        ) -> Self {
            let (action_broadcast, _) = broadcast::channel(config.broadcast_capacity.max(1));

            Self {
                state: Arc::new(RwLock::new(initial_state)),
                reducer,
                environment,
                shutdown: Arc::new(AtomicBool::new(false)),
                pending_effects: Arc::new(AtomicUsize::new(0)),
                default_shutdown_timeout: config.default_shutdown_timeout,
                action_broadcast,
            }
        }

        /// The injected environment
        #[must_use]
        pub const fn environment(&self) -> &E {
            &self.environment
        }

        /// Whether `shutdown` has been initiated
        #[must_use]
        pub fn is_shutting_down(&self) -> bool {
            self.shutdown.load(Ordering::Acquire)
        }

        /// Initiate graceful shutdown of the store
        ///
        /// 1. Sets the shutdown flag (rejecting new actions)
        /// 2. Waits for pending effects to complete (with timeout)
        ///
        /// Pending settlement timers count as pending effects, so a replica
        /// shut down mid-reservation reports a timeout rather than waiting
        /// forever.
        ///
        /// # Errors
        ///
        /// Returns [`StoreError::ShutdownTimeout`] if the timeout expires before all
        /// pending effects complete.
        pub async fn shutdown(&self, timeout: Duration) -> Result<(), StoreError> {
            tracing::info!("Initiating graceful shutdown");
            metrics::counter!("store.shutdown.initiated").increment(1);

            self.shutdown.store(true, Ordering::Release);

            let start = std::time::Instant::now();
            let poll_interval = Duration::from_millis(10);

            loop {
                let pending = self.pending_effects.load(Ordering::Acquire);

                if pending == 0 {
                    tracing::info!("All effects completed, shutdown successful");
                    metrics::counter!("store.shutdown.completed").increment(1);
                    return Ok(());
                }

                if start.elapsed() >= timeout {
                    tracing::error!(
                        pending_effects = pending,
                        "Shutdown timeout: {} effects still running", pending
                    );
                    metrics::counter!("store.shutdown.timeout").increment(1);
                    return Err(StoreError::ShutdownTimeout(pending));
                }

                tracing::debug!(
                    pending_effects = pending,
                    elapsed_ms = start.elapsed().as_millis(),
                    "Waiting for effects to complete"
                );

                tokio::time::sleep(poll_interval).await;
            }
        }

        /// Shut down using the timeout from [`StoreConfig`]
        ///
        /// # Errors
        ///
        /// Same as [`Store::shutdown`].
        pub async fn shutdown_default(&self) -> Result<(), StoreError> {
            self.shutdown(self.default_shutdown_timeout).await
        }

        /// Send an action to the store
        ///
        /// 1. Acquires write lock on state
        /// 2. Calls reducer with (state, action, environment)
        /// 3. Starts executing returned effects asynchronously
        ///
        /// Concurrent `send()` calls serialize at the reducer. A caller that
        /// awaits each `send` before issuing the next (the inbound pump does)
        /// gets its actions reduced in exactly that order.
        ///
        /// # Errors
        ///
        /// Returns [`StoreError::ShutdownInProgress`] if the store is shutting down.
        #[tracing::instrument(skip(self, action), name = "store_send")]
        pub async fn send(&self, action: A) -> Result<EffectHandle, StoreError>
        where
            R: Clone,
            E: Clone,
        {
            self.send_internal(action).await
        }

        /// Send an action and wait for a matching result action
        ///
        /// Subscribes to the action broadcast before sending, then returns the
        /// first effect-produced action matching the predicate.
        ///
        /// # Errors
        ///
        /// - [`StoreError::Timeout`]: Timeout expired before matching action received
        /// - [`StoreError::ChannelClosed`]: Action broadcast channel closed
        /// - [`StoreError::ShutdownInProgress`]: Store is shutting down
        pub async fn send_and_wait_for<F>(
            &self,
            action: A,
            predicate: F,
            timeout: Duration,
        ) -> Result<A, StoreError>
        where
            R: Clone,
            E: Clone,
            F: Fn(&A) -> bool,
        {
            // Subscribe BEFORE sending to avoid race condition
            let mut rx = self.action_broadcast.subscribe();

            self.send(action).await?;

            tokio::time::timeout(timeout, async {
                loop {
                    match rx.recv().await {
                        Ok(action) if predicate(&action) => return Ok(action),
                        Ok(_) => {},
                        Err(broadcast::error::RecvError::Lagged(skipped)) => {
                            tracing::warn!(
                                skipped,
                                "Action observer lagged, {} actions skipped",
                                skipped
                            );
                        },
                        Err(broadcast::error::RecvError::Closed) => {
                            return Err(StoreError::ChannelClosed);
                        },
                    }
                }
            })
            .await
            .map_err(|_| StoreError::Timeout)?
        }

        /// Subscribe to all actions produced by effects
        ///
        /// Only effect-produced actions are broadcast (settlement timers,
        /// bus failures), not the actions passed to `send` directly.
        #[must_use]
        pub fn subscribe_actions(&self) -> broadcast::Receiver<A> {
            self.action_broadcast.subscribe()
        }

        /// Internal send implementation
        ///
        /// # Errors
        ///
        /// Returns [`StoreError::ShutdownInProgress`] if the store is shutting down.
        #[tracing::instrument(skip(self, action), name = "store_send_internal")]
        async fn send_internal(&self, action: A) -> Result<EffectHandle, StoreError>
        where
            R: Clone,
            E: Clone,
        {
            if self.shutdown.load(Ordering::Acquire) {
                tracing::warn!("Rejected action: store is shutting down");
                metrics::counter!("store.shutdown.rejected_actions").increment(1);
                return Err(StoreError::ShutdownInProgress);
            }

            tracing::debug!("Processing action");
            metrics::counter!("store.actions.total").increment(1);

            let (handle, tracking) = EffectHandle::new();

            let effects = {
                let mut state = self.state.write().await;
                tracing::trace!("Acquired write lock on state");

                let span = tracing::debug_span!("reducer_execution");
                let _enter = span.enter();

                let start = std::time::Instant::now();
                let effects = self.reducer.reduce(&mut *state, action, &self.environment);
                metrics::histogram!("store.reducer.duration_seconds")
                    .record(start.elapsed().as_secs_f64());

                tracing::trace!("Reducer completed, returned {} effects", effects.len());

                // Note: Precision loss acceptable for metrics (effect counts < 2^52)
                #[allow(clippy::cast_precision_loss)]
                metrics::histogram!("store.effects.count").record(effects.len() as f64);

                effects
            };

            for effect in effects {
                self.execute_effect_internal(effect, tracking.clone());
            }

            Ok(handle)
        }

        /// Read current state via a closure
        ///
        /// ```ignore
        /// let held = store.state(|s| s.seat_map(&flight).map(SeatMap::held_count)).await;
        /// ```
        pub async fn state<F, T>(&self, f: F) -> T
        where
            F: FnOnce(&S) -> T,
        {
            let state = self.state.read().await;
            f(&*state)
        }

        /// Feed an effect-produced action back into the store
        async fn feed_back(&self, action: A)
        where
            R: Clone,
            E: Clone,
        {
            // Broadcast to observers before reducing
            let _ = self.action_broadcast.send(action.clone());

            if let Err(error) = self.send(action).await {
                tracing::debug!(error = %error, "Dropped effect feedback action");
            }
        }

        /// Execute an effect with tracking
        ///
        /// # Effect Types
        ///
        /// - `None`: No-op
        /// - `Future`: Executes async computation, sends resulting action if `Some`
        /// - `Delay`: Waits for duration, then sends action
        /// - `Sequential`: Executes effects in order, waiting for each to complete
        /// - `Broadcast`: Sends a payload through the message bus
        ///
        /// # Error Handling Strategy
        ///
        /// Effects are fire-and-forget. Failures are logged and, when the
        /// effect provides a callback, turned into actions. [`DecrementGuard`]
        /// keeps the tracking counters right even if an effect task panics.
        #[allow(clippy::needless_pass_by_value)] // tracking is cloned into tasks
        #[allow(clippy::too_many_lines)]
        #[tracing::instrument(skip(self, effect, tracking), name = "execute_effect")]
        fn execute_effect_internal(&self, effect: Effect<A>, tracking: EffectTracking)
        where
            R: Clone,
            E: Clone,
        {
            match effect {
                Effect::None => {
                    tracing::trace!("Executing Effect::None (no-op)");
                    metrics::counter!("store.effects.executed", "type" => "none").increment(1);
                },
                Effect::Future(fut) => {
                    tracing::trace!("Executing Effect::Future");
                    metrics::counter!("store.effects.executed", "type" => "future").increment(1);
                    tracking.increment();

                    self.pending_effects.fetch_add(1, Ordering::SeqCst);
                    let pending_guard = AtomicCounterGuard(Arc::clone(&self.pending_effects));

                    let tracking_clone = tracking.clone();
                    let store = self.clone();

                    tokio::spawn(async move {
                        let _guard = DecrementGuard(tracking_clone);
                        let _pending_guard = pending_guard;

                        if let Some(action) = fut.await {
                            tracing::trace!("Effect::Future produced an action, sending to store");
                            store.feed_back(action).await;
                        } else {
                            tracing::trace!("Effect::Future completed with no action");
                        }
                    });
                },
                Effect::Delay { duration, action } => {
                    tracing::trace!("Executing Effect::Delay (duration: {:?})", duration);
                    metrics::counter!("store.effects.executed", "type" => "delay").increment(1);
                    tracking.increment();

                    self.pending_effects.fetch_add(1, Ordering::SeqCst);
                    let pending_guard = AtomicCounterGuard(Arc::clone(&self.pending_effects));

                    let tracking_clone = tracking.clone();
                    let store = self.clone();

                    tokio::spawn(async move {
                        let _guard = DecrementGuard(tracking_clone);
                        let _pending_guard = pending_guard;

                        tokio::time::sleep(duration).await;
                        tracing::trace!("Effect::Delay completed, sending action");
                        store.feed_back(*action).await;
                    });
                },
                Effect::Sequential(effects) => {
                    let effect_count = effects.len();
                    tracing::trace!("Executing Effect::Sequential with {} effects", effect_count);
                    metrics::counter!("store.effects.executed", "type" => "sequential")
                        .increment(1);

                    tracking.increment();

                    self.pending_effects.fetch_add(1, Ordering::SeqCst);
                    let pending_guard = AtomicCounterGuard(Arc::clone(&self.pending_effects));

                    let tracking_clone = tracking.clone();
                    let store = self.clone();

                    tokio::spawn(async move {
                        let _guard = DecrementGuard(tracking_clone);
                        let _pending_guard = pending_guard;

                        for (idx, effect) in effects.into_iter().enumerate() {
                            tracing::trace!(
                                "Executing sequential effect {} of {}",
                                idx + 1,
                                effect_count
                            );

                            let (sub_tx, mut sub_rx) = watch::channel(());
                            let sub_tracking = EffectTracking {
                                counter: Arc::new(AtomicUsize::new(0)),
                                notifier: sub_tx,
                            };

                            store.execute_effect_internal(effect, sub_tracking.clone());

                            // Wait for this effect to complete before continuing
                            while sub_tracking.counter.load(Ordering::SeqCst) > 0 {
                                if sub_rx.changed().await.is_err() {
                                    break;
                                }
                            }
                        }
                        tracing::trace!("Effect::Sequential completed");
                    });
                },
                Effect::Broadcast(op) => {
                    tracing::trace!("Executing Effect::Broadcast");
                    metrics::counter!("store.effects.executed", "type" => "broadcast").increment(1);
                    tracking.increment();

                    self.pending_effects.fetch_add(1, Ordering::SeqCst);
                    let pending_guard = AtomicCounterGuard(Arc::clone(&self.pending_effects));

                    let tracking_clone = tracking.clone();
                    let store = self.clone();

                    tokio::spawn(async move {
                        let _guard = DecrementGuard(tracking_clone);
                        let _pending_guard = pending_guard;

                        let action = match op {
                            BusOperation::Send {
                                bus,
                                scope,
                                payload,
                                on_success,
                                on_error,
                            } => {
                                tracing::debug!(
                                    scope = %scope,
                                    bytes = payload.len(),
                                    "Executing broadcast"
                                );

                                match bus.send(scope, payload).await {
                                    Ok(()) => {
                                        let scope = scope.as_str();
                                        metrics::counter!("store.broadcast.sent", "scope" => scope)
                                            .increment(1);
                                        on_success(())
                                    },
                                    Err(error) => {
                                        tracing::warn!(
                                            scope = %scope,
                                            error = %error,
                                            "broadcast failed"
                                        );
                                        let scope = scope.as_str();
                                        metrics::counter!(
                                            "store.broadcast.failed",
                                            "scope" => scope
                                        )
                                        .increment(1);
                                        on_error(error)
                                    },
                                }
                            },
                        };

                        if let Some(action) = action {
                            tracing::trace!("Broadcast produced an action, sending to store");
                            store.feed_back(action).await;
                        }
                    });
                },
            }
        }
    }

    impl<S, A, E, R> Clone for Store<S, A, E, R>
    where
        R: Reducer<State = S, Action = A, Environment = E> + Clone,
        E: Clone,
    {
        fn clone(&self) -> Self {
            Self {
                state: Arc::clone(&self.state),
                reducer: self.reducer.clone(),
                environment: self.environment.clone(),
                shutdown: Arc::clone(&self.shutdown),
                pending_effects: Arc::clone(&self.pending_effects),
                default_shutdown_timeout: self.default_shutdown_timeout,
                action_broadcast: self.action_broadcast.clone(),
            }
        }
    }
}

// Re-export for convenience
pub use store::Store;

#[cfg(test)]
mod tests {
    use super::*;
    use seatsync_core::{smallvec, SmallVec};

    #[derive(Debug, Clone)]
    struct TestState {
        value: i32,
        log: Vec<i32>,
    }

    #[derive(Debug, Clone, PartialEq)]
    enum TestAction {
        Increment,
        Record(i32),
        ProduceEffect,
        ProduceDelayedAction,
        ProduceSequentialEffects,
        Produced,
    }

    #[derive(Debug, Clone)]
    struct TestEnv;

    #[derive(Debug, Clone)]
    struct TestReducer;

    impl Reducer for TestReducer {
        type State = TestState;
        type Action = TestAction;
        type Environment = TestEnv;

        fn reduce(
            &self,
            state: &mut Self::State,
            action: Self::Action,
            _env: &Self::Environment,
        ) -> SmallVec<[Effect<Self::Action>; 4]> {
            match action {
                TestAction::Increment => {
                    state.value += 1;
                    smallvec![Effect::None]
                },
                TestAction::Record(n) => {
                    state.log.push(n);
                    smallvec![Effect::None]
                },
                TestAction::ProduceEffect => smallvec![Effect::Future(Box::pin(async {
                    Some(TestAction::Produced)
                }))],
                TestAction::ProduceDelayedAction => smallvec![Effect::Delay {
                    duration: Duration::from_millis(10),
                    action: Box::new(TestAction::Produced),
                }],
                TestAction::ProduceSequentialEffects => smallvec![Effect::Sequential(vec![
                    Effect::Future(Box::pin(async {
                        tokio::time::sleep(Duration::from_millis(20)).await;
                        Some(TestAction::Record(1))
                    })),
                    Effect::Future(Box::pin(async { Some(TestAction::Record(2)) })),
                    Effect::Future(Box::pin(async { Some(TestAction::Record(3)) })),
                ])],
                TestAction::Produced => {
                    state.value += 100;
                    smallvec![Effect::None]
                },
            }
        }
    }

    fn test_store() -> Store<TestState, TestAction, TestEnv, TestReducer> {
        Store::new(
            TestState {
                value: 0,
                log: Vec::new(),
            },
            TestReducer,
            TestEnv,
        )
    }

    #[tokio::test]
    async fn test_send_updates_state() {
        let store = test_store();
        let _ = store.send(TestAction::Increment).await;
        assert_eq!(store.state(|s| s.value).await, 1);
    }

    #[tokio::test]
    async fn test_future_feeds_back() {
        let store = test_store();
        let result = store
            .send_and_wait_for(
                TestAction::ProduceEffect,
                |a| matches!(a, TestAction::Produced),
                Duration::from_secs(1),
            )
            .await;
        assert!(matches!(result, Ok(TestAction::Produced)));
    }

    #[tokio::test]
    async fn test_delay_counts_as_pending_effect() {
        let store = test_store();
        let handle = store.send(TestAction::ProduceDelayedAction).await;
        assert!(matches!(handle, Ok(ref h) if h.pending() == 1));

        let Ok(mut handle) = handle else { return };
        assert!(handle.wait_with_timeout(Duration::from_secs(1)).await.is_ok());
        assert_eq!(store.state(|s| s.value).await, 100);
    }

    #[tokio::test]
    async fn test_sequential_preserves_order() {
        let store = test_store();
        let Ok(mut handle) = store.send(TestAction::ProduceSequentialEffects).await else {
            return;
        };
        assert!(handle.wait_with_timeout(Duration::from_secs(1)).await.is_ok());
        assert_eq!(store.state(|s| s.log.clone()).await, vec![1, 2, 3]);
    }

    #[tokio::test]
    async fn test_shutdown_rejects_new_actions() {
        let store = test_store();
        assert!(store.shutdown(Duration::from_secs(1)).await.is_ok());
        assert!(store.is_shutting_down());
        assert!(matches!(
            store.send(TestAction::Increment).await,
            Err(StoreError::ShutdownInProgress)
        ));
    }

    #[tokio::test]
    async fn test_shutdown_times_out_on_pending_delay() {
        let store = test_store();
        let _ = store
            .send(TestAction::ProduceDelayedAction)
            .await;
        let result = store.shutdown(Duration::from_millis(1)).await;
        assert!(matches!(result, Err(StoreError::ShutdownTimeout(1))));
    }

    #[tokio::test]
    async fn test_completed_handle_waits_immediately() {
        let mut handle = EffectHandle::completed();
        assert!(handle.wait_with_timeout(Duration::from_millis(10)).await.is_ok());
    }
}
