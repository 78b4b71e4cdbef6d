//! # SeatSync Core
//!
//! Core traits and types shared by every SeatSync replica.
//!
//! A replica is a small state machine driven by actions. Local user intents
//! and envelopes received from the relay are both actions; the reducer
//! decides what changes and describes the side effects (broadcasts, timers)
//! that the runtime should perform.
//!
//! ## Core Concepts
//!
//! - **State**: The replica's owned data (seat maps, selection, notices)
//! - **Action**: Every input to a reducer (user intents, inbound envelopes, timer firings)
//! - **Reducer**: `(State, Action, Environment) → (State, Effects)`
//! - **Effect**: A description of a side effect, executed by the runtime
//! - **Environment**: Injected dependencies (clock, message bus)
//!
//! ## Example
//!
//! ```ignore
//! use seatsync_core::*;
//!
//! impl Reducer for ReplicaReducer {
//!     type State = ReplicaState;
//!     type Action = ReplicaAction;
//!     type Environment = ReplicaEnvironment;
//!
//!     fn reduce(
//!         &self,
//!         state: &mut ReplicaState,
//!         action: ReplicaAction,
//!         env: &ReplicaEnvironment,
//!     ) -> SmallVec<[Effect<ReplicaAction>; 4]> {
//!         smallvec![Effect::None]
//!     }
//! }
//! ```

// Re-export commonly used types
pub use chrono::{DateTime, Utc};
pub use serde::{Deserialize, Serialize};
pub use smallvec::{smallvec, SmallVec};

/// Message bus contract consumed by replicas
pub mod message_bus;

/// Declarative macros for building effects
pub mod effect_macros;

/// Reducer module - The core trait for replica logic
///
/// Reducers are pure functions: `(State, Action, Environment) → (State, Effects)`
///
/// They contain all protocol logic and are deterministic and testable.
pub mod reducer {
    use super::effect::Effect;
    use smallvec::SmallVec;

    /// The Reducer trait - core abstraction for replica logic
    ///
    /// # Type Parameters
    ///
    /// - `State`: The state this reducer operates on
    /// - `Action`: The action type this reducer processes
    /// - `Environment`: The injected dependencies this reducer needs
    pub trait Reducer {
        /// The state type this reducer operates on
        type State;

        /// The action type this reducer processes
        type Action;

        /// The environment type with injected dependencies
        type Environment;

        /// Reduce an action into state changes and effects
        ///
        /// This is a pure function that:
        /// 1. Validates the action
        /// 2. Updates state in place
        /// 3. Returns effect descriptions to be executed
        ///
        /// Most actions produce a handful of effects, so the return type
        /// keeps up to four inline before spilling to the heap.
        fn reduce(
            &self,
            state: &mut Self::State,
            action: Self::Action,
            env: &Self::Environment,
        ) -> SmallVec<[Effect<Self::Action>; 4]>;
    }
}

/// Effect module - Side effect descriptions
///
/// Effects are values returned by reducers. The runtime executes them and
/// feeds any resulting action back into the reducer.
pub mod effect {
    use crate::message_bus::{BusError, MessageBus, Scope};
    use std::future::Future;
    use std::pin::Pin;
    use std::sync::Arc;
    use std::time::Duration;

    /// Callback turning a bus outcome into an optional follow-up action
    pub type BusCallback<T, Action> = Box<dyn FnOnce(T) -> Option<Action> + Send>;

    /// Operations against the message bus
    pub enum BusOperation<Action> {
        /// Fan a payload out to the given scope
        Send {
            /// Bus to send through
            bus: Arc<dyn MessageBus>,
            /// Fan-out target
            scope: Scope,
            /// Encoded envelope
            payload: String,
            /// Called when the bus accepted the payload
            on_success: BusCallback<(), Action>,
            /// Called when the bus rejected the payload
            on_error: BusCallback<BusError, Action>,
        },
    }

    /// Effect type - describes a side effect to be executed
    ///
    /// Effects are NOT executed immediately. They are descriptions of what should happen,
    /// returned from reducers and executed by the Store runtime.
    pub enum Effect<Action> {
        /// No-op effect
        None,

        /// Run effects sequentially, each one finishing before the next starts
        Sequential(Vec<Effect<Action>>),

        /// Delayed action (settlement timers)
        Delay {
            /// How long to wait
            duration: Duration,
            /// Action to dispatch after delay
            action: Box<Action>,
        },

        /// Arbitrary async computation
        ///
        /// Returns `Option<Action>` - if Some, the action is fed back into the reducer
        Future(Pin<Box<dyn Future<Output = Option<Action>> + Send>>),

        /// Message bus operation
        Broadcast(BusOperation<Action>),
    }

    // Manual Debug implementation since Future and callbacks don't implement Debug
    impl<Action> std::fmt::Debug for Effect<Action>
    where
        Action: std::fmt::Debug,
    {
        fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
            match self {
                Effect::None => write!(f, "Effect::None"),
                Effect::Sequential(effects) => {
                    f.debug_tuple("Effect::Sequential").field(effects).finish()
                },
                Effect::Delay { duration, action } => f
                    .debug_struct("Effect::Delay")
                    .field("duration", duration)
                    .field("action", action)
                    .finish(),
                Effect::Future(_) => write!(f, "Effect::Future(<future>)"),
                Effect::Broadcast(BusOperation::Send { scope, payload, .. }) => f
                    .debug_struct("Effect::Broadcast")
                    .field("scope", scope)
                    .field("payload", payload)
                    .finish_non_exhaustive(),
            }
        }
    }

    impl<Action> Effect<Action> {
        /// Payload and scope if this is a bus send
        #[must_use]
        pub fn as_broadcast(&self) -> Option<(Scope, &str)> {
            match self {
                Effect::Broadcast(BusOperation::Send { scope, payload, .. }) => {
                    Some((*scope, payload.as_str()))
                },
                _ => None,
            }
        }
    }
}

/// Environment module - Dependency injection traits
///
/// All external dependencies are abstracted behind traits and injected
/// via the Environment parameter.
pub mod environment {
    use chrono::{DateTime, Utc};

    /// Clock trait - abstracts time operations for testability
    ///
    /// # Examples
    ///
    /// ```
    /// use seatsync_core::environment::{Clock, SystemClock};
    ///
    /// let clock = SystemClock;
    /// let _now = clock.now();
    /// ```
    pub trait Clock: Send + Sync {
        /// Get the current time
        fn now(&self) -> DateTime<Utc>;
    }

    /// Wall clock used outside of tests
    #[derive(Debug, Clone, Copy, Default)]
    pub struct SystemClock;

    impl Clock for SystemClock {
        fn now(&self) -> DateTime<Utc> {
            Utc::now()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::effect::Effect;
    use std::time::Duration;

    #[derive(Debug, Clone, PartialEq)]
    enum TestAction {
        Tick,
    }

    #[test]
    fn test_debug_formats_delay() {
        let effect = Effect::Delay {
            duration: Duration::from_millis(5),
            action: Box::new(TestAction::Tick),
        };
        let rendered = format!("{effect:?}");
        assert!(rendered.contains("Effect::Delay"));
        assert!(rendered.contains("Tick"));
    }

    #[test]
    fn test_as_broadcast_is_none_for_other_effects() {
        assert!(Effect::<TestAction>::None.as_broadcast().is_none());
    }
}
