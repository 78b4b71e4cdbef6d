//! Declarative macros for ergonomic effect construction
//!
//! These macros reduce boilerplate when creating `Effect` variants, particularly
//! for message bus sends and timers.

/// Create an `Effect::Broadcast` sending a payload to a scope
///
/// # Example
///
/// ```rust,ignore
/// use seatsync_core::broadcast;
///
/// broadcast! {
///     bus: env.bus,
///     scope: Scope::All,
///     payload: encoded_envelope,
///     on_success: || None,
///     on_error: |error| Some(ReplicaAction::BroadcastFailed { reason: error.to_string() })
/// }
/// ```
#[macro_export]
macro_rules! broadcast {
    (
        bus: $bus:expr,
        scope: $scope:expr,
        payload: $payload:expr,
        on_success: || $success_body:expr,
        on_error: |$error_param:ident| $error_body:expr
    ) => {
        $crate::effect::Effect::Broadcast(
            $crate::effect::BusOperation::Send {
                bus: ::std::sync::Arc::clone(&$bus),
                scope: $scope,
                payload: $payload,
                on_success: ::std::boxed::Box::new(move |()| $success_body),
                on_error: ::std::boxed::Box::new(move |$error_param| $error_body),
            }
        )
    };
}

/// Create an `Effect::Future` from an async block
///
/// # Example
///
/// ```rust,ignore
/// use seatsync_core::async_effect;
///
/// async_effect! {
///     Some(ReplicaAction::HoldsSent { reservation_id })
/// }
/// ```
#[macro_export]
macro_rules! async_effect {
    ($($body:tt)*) => {
        $crate::effect::Effect::Future(
            ::std::boxed::Box::pin(async move { $($body)* })
        )
    };
}

/// Create an `Effect::Delay` for scheduling delayed actions
///
/// # Example
///
/// ```rust,ignore
/// use seatsync_core::delay;
/// use std::time::Duration;
///
/// delay! {
///     duration: Duration::from_millis(2500),
///     action: ReplicaAction::SettlementElapsed { reservation_id }
/// }
/// ```
#[macro_export]
macro_rules! delay {
    (
        duration: $duration:expr,
        action: $action:expr
    ) => {
        $crate::effect::Effect::Delay {
            duration: $duration,
            action: ::std::boxed::Box::new($action),
        }
    };
}

#[cfg(test)]
mod tests {
    use crate::effect::Effect;
    use crate::message_bus::{BusError, BusFuture, MessageBus, MessageStream, Scope};
    use std::sync::Arc;
    use std::time::Duration;

    #[derive(Clone, Debug)]
    enum TestAction {
        AsyncResult { value: i32 },
        TimeoutExpired,
        SendFailed,
    }

    struct NullBus;

    impl MessageBus for NullBus {
        fn connect(&self) -> BusFuture<'_, MessageStream> {
            Box::pin(async { Err(BusError::ConnectionFailed("null bus".to_string())) })
        }

        fn send(&self, _scope: Scope, _payload: String) -> BusFuture<'_, ()> {
            Box::pin(async { Ok(()) })
        }

        fn disconnect(&self) {}
    }

    #[test]
    fn test_async_effect_macro() {
        let effect = async_effect! {
            Some(TestAction::AsyncResult { value: 42 })
        };

        assert!(matches!(effect, Effect::Future(_)));
    }

    #[test]
    fn test_delay_macro() {
        let effect = delay! {
            duration: Duration::from_secs(30),
            action: TestAction::TimeoutExpired
        };

        assert!(matches!(effect, Effect::Delay { .. }));
    }

    #[test]
    fn test_broadcast_macro() {
        let bus: Arc<dyn MessageBus> = Arc::new(NullBus);
        let effect: Effect<TestAction> = broadcast! {
            bus: bus,
            scope: Scope::Others,
            payload: "{}".to_string(),
            on_success: || None,
            on_error: |_error| Some(TestAction::SendFailed)
        };

        assert_eq!(effect.as_broadcast(), Some((Scope::Others, "{}")));
    }
}
