//! rstreams: the asynchronous, backpressure-based stream protocol.
//!
//! This crate defines the three roles of the protocol and nothing else:
//! - [`Publisher`]: a source of items that emits only what has been requested
//! - [`Subscriber`]: the consumer receiving items and a terminal signal
//! - [`Subscription`]: the live pairing, used to request demand or cancel
//!
//! It is shared by implementations and by the conformance harness
//! (`rstreams-tck`). Rule numbers mentioned in docs (e.g. "rule 2.5") refer to
//! the clauses of the published protocol text.
//!
//! All callbacks take `&self`: a subscriber may be invoked from any thread,
//! so implementations use interior mutability.

#![deny(unsafe_code)]

use std::fmt;
use std::sync::Arc;

// =============================================================================
// Roles
// =============================================================================

/// Demand and cancellation handle for one Publisher/Subscriber pairing.
pub trait Subscription: Send + Sync {
    /// Request `n` more items. `n == 0` is illegal (rule 3.9).
    fn request(&self, n: u64);

    /// Ask the publisher to stop signalling. Idempotent.
    fn cancel(&self);
}

/// Receiver of a stream of `T`.
pub trait Subscriber<T>: Send + Sync {
    /// Called once per subscription attempt, before any other signal.
    ///
    /// A subscriber that already holds an active subscription must cancel the
    /// new one (rule 2.5).
    fn on_subscribe(&self, subscription: Arc<dyn Subscription>);

    fn on_next(&self, item: T);

    /// Terminal: the stream failed.
    fn on_error(&self, error: StreamError);

    /// Terminal: the stream completed successfully.
    fn on_complete(&self);

    /// Human readable name used in diagnostics.
    fn name(&self) -> &'static str {
        std::any::type_name::<Self>()
    }
}

/// Source of a stream of `T`.
pub trait Publisher<T>: Send + Sync {
    /// Subscribe `subscriber`. The publisher signals `on_subscribe` and then
    /// emits no more than the demand requested through the subscription.
    fn subscribe(&self, subscriber: Arc<dyn Subscriber<T>>);
}

// =============================================================================
// Errors
// =============================================================================

/// Error carried by an `on_error` signal.
///
/// Cheap to clone; clones share the same underlying error, so two handles can
/// be compared for identity with [`StreamError::same_as`].
#[derive(Clone)]
pub struct StreamError(Arc<dyn std::error::Error + Send + Sync + 'static>);

impl StreamError {
    pub fn new<E>(error: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        Self(Arc::new(error))
    }

    /// Returns true if both handles point to the same error instance.
    pub fn same_as(&self, other: &StreamError) -> bool {
        std::ptr::addr_eq(Arc::as_ptr(&self.0), Arc::as_ptr(&other.0))
    }

    /// Returns true if the underlying error is an `E`.
    pub fn is<E: std::error::Error + 'static>(&self) -> bool {
        self.0.is::<E>()
    }

    pub fn downcast_ref<E: std::error::Error + 'static>(&self) -> Option<&E> {
        self.0.downcast_ref::<E>()
    }

    pub fn message(&self) -> String {
        self.0.to_string()
    }
}

impl fmt::Debug for StreamError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "StreamError({:?})", self.0)
    }
}

impl fmt::Display for StreamError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.0, f)
    }
}

impl<E> From<E> for StreamError
where
    E: std::error::Error + Send + Sync + 'static,
{
    fn from(error: E) -> Self {
        Self::new(error)
    }
}

/// Signalled by a publisher when a call sequence is illegal in its current
/// state, e.g. the same subscriber subscribing twice (rule 2.12).
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("illegal state: {0}")]
pub struct IllegalStateError(pub String);

impl IllegalStateError {
    pub fn new(message: impl Into<String>) -> Self {
        Self(message.into())
    }
}

/// Returns true if `a` and `b` are the same subscriber object.
///
/// Publishers use this to detect duplicate subscriptions (rule 2.12).
pub fn same_subscriber<T>(a: &Arc<dyn Subscriber<T>>, b: &Arc<dyn Subscriber<T>>) -> bool {
    std::ptr::addr_eq(Arc::as_ptr(a), Arc::as_ptr(b))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, thiserror::Error)]
    #[error("boom")]
    struct Boom;

    #[test]
    fn test_stream_error_identity() {
        let a = StreamError::new(Boom);
        let b = a.clone();
        let c = StreamError::new(Boom);

        assert!(a.same_as(&b));
        assert!(!a.same_as(&c));
        assert!(a.is::<Boom>());
        assert!(!a.is::<IllegalStateError>());
        assert_eq!(a.to_string(), "boom");
    }

    #[test]
    fn test_illegal_state_message() {
        let err = StreamError::new(IllegalStateError::new("rule 2.12 violated"));
        let inner = err.downcast_ref::<IllegalStateError>().unwrap();
        assert!(inner.0.contains("2.12"));
        assert_eq!(err.message(), "illegal state: rule 2.12 violated");
    }
}
