//! Hand-driven publisher and subscriber.
//!
//! [`ManualPublisher`] stands in for the upstream of the subscriber under
//! test: the test script pushes signals into it and observes the demand and
//! cancellation coming back. [`ManualSubscriber`] pulls elements from the
//! helper publisher one at a time.

use std::sync::Arc;

use parking_lot::Mutex;
use rstreams::{Publisher, StreamError, Subscriber, Subscription};

use crate::reentrancy::{Signal, SignalScope};
use crate::sync::{Latch, Promise, Receptacle};
use crate::{Element, SlotError, TestEnvironment, Violation};

// =============================================================================
// ManualPublisher
// =============================================================================

/// Publisher that accepts a single subscriber and forwards whatever the test
/// script sends.
pub struct ManualPublisher<T> {
    env: TestEnvironment,
    subscriber: Promise<Arc<dyn Subscriber<T>>>,
    requests: Receptacle<u64>,
    cancelled: Latch,
    pending_demand: Mutex<u64>,
}

impl<T: Element> ManualPublisher<T> {
    pub fn new(env: TestEnvironment) -> Self {
        let requests = Receptacle::new(env.config().receptacle_capacity);
        Self {
            env,
            subscriber: Promise::new(),
            requests,
            cancelled: Latch::new(),
            pending_demand: Mutex::new(0),
        }
    }

    pub fn env(&self) -> &TestEnvironment {
        &self.env
    }

    /// The promise resolved by [`Publisher::subscribe`].
    pub fn subscriber_slot(&self) -> &Promise<Arc<dyn Subscriber<T>>> {
        &self.subscriber
    }

    pub fn sub(&self) -> Option<Arc<dyn Subscriber<T>>> {
        self.subscriber.value()
    }

    fn require_sub(&self, action: &str) -> Result<Arc<dyn Subscriber<T>>, Violation> {
        self.sub().ok_or_else(|| {
            Violation::Protocol(format!("Cannot {action} before having a Subscriber"))
        })
    }

    pub fn send_next(&self, element: T) -> Result<(), Violation> {
        let sub = self.require_sub("sendNext")?;
        tracing::debug!(?element, "manual publisher: onNext");
        SignalScope::deliver(Signal::OnNext, || sub.on_next(element));
        Ok(())
    }

    pub fn send_completion(&self) -> Result<(), Violation> {
        let sub = self.require_sub("sendCompletion")?;
        tracing::debug!("manual publisher: onComplete");
        SignalScope::deliver(Signal::OnComplete, || sub.on_complete());
        Ok(())
    }

    pub fn send_error(&self, cause: StreamError) -> Result<(), Violation> {
        let sub = self.require_sub("sendError")?;
        tracing::debug!(%cause, "manual publisher: onError");
        SignalScope::deliver(Signal::OnError, || sub.on_error(cause));
        Ok(())
    }

    /// Demand received through [`ManualPublisher::expect_request`] and
    /// [`ManualPublisher::expect_demand`] so far.
    pub fn pending_demand(&self) -> u64 {
        *self.pending_demand.lock()
    }

    /// Wait for the next `request(n)` call and return `n`.
    pub fn expect_request(&self) -> Result<u64, Violation> {
        let requested = self
            .requests
            .next(self.env.default_timeout(), "Did not receive expected `request` call")?;
        let mut pending = self.pending_demand.lock();
        *pending = pending.saturating_add(requested);
        Ok(requested)
    }

    /// Collect `request` calls until their sum reaches `expected`.
    ///
    /// Demand beyond `expected` is an oversupply.
    pub fn expect_demand(&self, expected: u64) -> Result<u64, Violation> {
        let mut total: u64 = 0;
        while total < expected {
            let requested = self.requests.next(
                self.env.default_timeout(),
                &format!(
                    "Did not receive expected `request` call (expected a total demand of {expected}, got {total})"
                ),
            )?;
            total = total.saturating_add(requested);
        }
        let mut pending = self.pending_demand.lock();
        *pending = pending.saturating_add(total);
        if total > expected {
            return Err(Violation::Oversupply(format!(
                "Expected a total demand of {expected} but the subscriber requested {total}"
            )));
        }
        Ok(total)
    }

    pub fn expect_no_request(&self) -> Result<(), Violation> {
        self.requests
            .expect_none(self.env.default_timeout(), "Received an unexpected call to `request`")
    }

    pub fn expect_cancelling(&self) -> Result<(), Violation> {
        self.cancelled.expect_close(
            self.env.default_timeout(),
            "Did not receive expected cancelling of upstream subscription",
        )
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.is_closed()
    }
}

impl<T: Element> Publisher<T> for ManualPublisher<T> {
    fn subscribe(&self, subscriber: Arc<dyn Subscriber<T>>) {
        if self.subscriber.complete(subscriber.clone()).is_err() {
            self.env.flop(Violation::Protocol(
                "ManualPublisher doesn't support more than one Subscriber".into(),
            ));
            return;
        }
        tracing::debug!(subscriber = subscriber.name(), "manual publisher: subscribe");
        let subscription = Arc::new(ManualSubscription {
            env: self.env.clone(),
            requests: self.requests.clone(),
            cancelled: self.cancelled.clone(),
        });
        SignalScope::deliver(Signal::OnSubscribe, || subscriber.on_subscribe(subscription));
    }
}

struct ManualSubscription {
    env: TestEnvironment,
    requests: Receptacle<u64>,
    cancelled: Latch,
}

impl Subscription for ManualSubscription {
    fn request(&self, n: u64) {
        tracing::debug!(n, "manual subscription: request");
        if n == 0 {
            self.env.flop(Violation::Protocol(
                "Subscriber called `request(0)`, which is illegal according to Rule 3.9".into(),
            ));
            return;
        }
        if let Err(SlotError::Overflow(capacity)) = self.requests.add(n) {
            self.env.flop(Violation::Oversupply(format!(
                "Received more than {capacity} `request` calls that were never expected"
            )));
        }
    }

    fn cancel(&self) {
        tracing::debug!("manual subscription: cancel");
        self.cancelled.close();
    }
}

// =============================================================================
// ManualSubscriber
// =============================================================================

/// Subscriber that only requests what the test script asks for.
///
/// A second `on_subscribe` is answered by cancelling the new subscription.
pub struct ManualSubscriber<T> {
    env: TestEnvironment,
    subscription: Promise<Arc<dyn Subscription>>,
    received: Receptacle<T>,
    error: Promise<StreamError>,
}

impl<T: Element> ManualSubscriber<T> {
    pub fn new(env: TestEnvironment) -> Self {
        let received = Receptacle::new(env.config().receptacle_capacity);
        Self {
            env,
            subscription: Promise::new(),
            received,
            error: Promise::new(),
        }
    }

    pub fn subscription(&self) -> Option<Arc<dyn Subscription>> {
        self.subscription.value()
    }

    pub fn expect_subscription(
        &self,
        timeout: std::time::Duration,
    ) -> Result<Arc<dyn Subscription>, Violation> {
        self.subscription
            .expect_completion(timeout, "Subscriber did not receive expected `onSubscribe`")
    }

    pub fn request(&self, n: u64) -> Result<(), Violation> {
        let subscription = self.subscription().ok_or_else(|| {
            Violation::Protocol(format!("Cannot request({n}) before receiving a Subscription"))
        })?;
        subscription.request(n);
        Ok(())
    }

    pub fn cancel(&self) {
        if let Some(subscription) = self.subscription() {
            subscription.cancel();
        }
    }

    /// Request one element and wait for it.
    pub fn request_next_element(&self) -> Result<T, Violation> {
        self.request(1)?;
        self.received
            .next(self.env.default_timeout(), "Did not receive expected element")
    }

    pub fn expect_none(&self) -> Result<(), Violation> {
        self.received.expect_none(
            self.env.default_timeout(),
            "Did not expect an element but got one",
        )
    }

    pub fn expect_completion(&self) -> Result<(), Violation> {
        self.received
            .expect_completion(self.env.default_timeout(), "Did not receive expected `onComplete`")
    }

    /// Wait for an error of type `E` whose message contains
    /// `required_message_part`.
    pub fn expect_error_with_message<E: std::error::Error + 'static>(
        &self,
        required_message_part: &str,
    ) -> Result<StreamError, Violation> {
        let expected = std::any::type_name::<E>();
        let err = self.error.expect_completion(
            self.env.default_timeout(),
            &format!("Subscriber didn't receive expected `onError({expected})`"),
        )?;
        if !err.is::<E>() {
            return Err(Violation::Mismatch(format!(
                "Expected `onError({expected})` but got `onError({err})`"
            )));
        }
        if !err.message().contains(required_message_part) {
            return Err(Violation::Mismatch(format!(
                "Got expected error {expected} but missing message [{required_message_part}], was: {err}"
            )));
        }
        Ok(err)
    }
}

impl<T: Element> Subscriber<T> for ManualSubscriber<T> {
    fn on_subscribe(&self, subscription: Arc<dyn Subscription>) {
        if self.subscription.complete(subscription.clone()).is_err() {
            tracing::debug!("manual subscriber: cancelling second subscription");
            subscription.cancel();
        }
    }

    fn on_next(&self, item: T) {
        match self.received.add(item) {
            Ok(()) => {}
            Err(SlotError::AlreadyCompleted) => self.env.flop(Violation::Protocol(
                "Received `onNext` after `onComplete`".into(),
            )),
            Err(SlotError::Overflow(capacity)) => self.env.flop(Violation::Oversupply(format!(
                "Received more than {capacity} elements without consuming them"
            ))),
        }
    }

    fn on_error(&self, error: StreamError) {
        if self.error.complete(error).is_err() {
            self.env.flop(Violation::DoubleTerminal(
                "Received `onError` a second time, which is illegal according to Rule 1.7".into(),
            ));
        }
    }

    fn on_complete(&self) {
        if self.received.complete().is_err() {
            self.env.flop(Violation::DoubleTerminal(
                "Received `onComplete` a second time, which is illegal according to Rule 1.7"
                    .into(),
            ));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::TckConfig;
    use std::time::Duration;

    fn env() -> TestEnvironment {
        TestEnvironment::new(TckConfig::default().with_default_timeout(Duration::from_millis(50)))
    }

    #[test]
    fn test_publisher_to_subscriber_roundtrip() {
        let env = env();
        let publisher = ManualPublisher::<u32>::new(env.clone());
        let subscriber = env.new_manual_subscriber(&publisher).unwrap();

        subscriber.request(2).unwrap();
        assert_eq!(publisher.expect_request().unwrap(), 2);
        assert_eq!(publisher.pending_demand(), 2);

        publisher.send_next(7).unwrap();
        publisher.send_completion().unwrap();
        assert_eq!(subscriber.received.next(Duration::from_millis(10), "x").unwrap(), 7);
        subscriber.expect_completion().unwrap();

        subscriber.cancel();
        publisher.expect_cancelling().unwrap();
        env.verify_no_async_errors().unwrap();
    }

    #[test]
    fn test_send_before_subscribe_fails() {
        let publisher = ManualPublisher::<u32>::new(env());
        assert!(matches!(publisher.send_next(1), Err(Violation::Protocol(_))));
        assert!(publisher.send_completion().is_err());
    }

    #[test]
    fn test_second_subscriber_is_flagged() {
        let env = env();
        let publisher = ManualPublisher::<u32>::new(env.clone());
        publisher.subscribe(Arc::new(ManualSubscriber::<u32>::new(env.clone())));
        publisher.subscribe(Arc::new(ManualSubscriber::<u32>::new(env.clone())));
        let errors = env.async_errors();
        assert_eq!(errors.len(), 1);
        assert!(errors[0].to_string().contains("more than one Subscriber"));
    }

    #[test]
    fn test_expect_demand_accumulates_and_detects_oversupply() {
        let env = env();
        let publisher = ManualPublisher::<u32>::new(env.clone());
        let subscriber = env.new_manual_subscriber(&publisher).unwrap();

        subscriber.request(1).unwrap();
        subscriber.request(1).unwrap();
        assert_eq!(publisher.expect_demand(2).unwrap(), 2);
        publisher.expect_no_request().unwrap();

        subscriber.request(u64::MAX).unwrap();
        assert!(matches!(publisher.expect_demand(1), Err(Violation::Oversupply(_))));
        assert_eq!(publisher.pending_demand(), u64::MAX);
    }

    #[test]
    fn test_request_zero_is_flagged() {
        let env = env();
        let publisher = ManualPublisher::<u32>::new(env.clone());
        let subscriber = env.new_manual_subscriber(&publisher).unwrap();
        subscriber.request(0).unwrap();
        assert!(env.async_errors()[0].to_string().contains("Rule 3.9"));
        assert!(publisher.expect_no_request().is_ok());
    }

    #[test]
    fn test_manual_subscriber_cancels_second_subscription() {
        let env = env();
        let first = ManualPublisher::<u32>::new(env.clone());
        let second = ManualPublisher::<u32>::new(env.clone());
        let subscriber = Arc::new(ManualSubscriber::<u32>::new(env.clone()));

        first.subscribe(subscriber.clone());
        second.subscribe(subscriber.clone());

        second.expect_cancelling().unwrap();
        assert!(!first.is_cancelled());
        env.verify_no_async_errors().unwrap();
    }

    #[test]
    fn test_manual_subscriber_error_with_message() {
        let env = env();
        let publisher = ManualPublisher::<u32>::new(env.clone());
        let subscriber = env.new_manual_subscriber(&publisher).unwrap();
        publisher
            .send_error(StreamError::new(rstreams::IllegalStateError::new("rule 2.12 violated")))
            .unwrap();

        subscriber
            .expect_error_with_message::<rstreams::IllegalStateError>("2.12")
            .unwrap();
    }

    #[test]
    fn test_request_next_element_times_out_without_elements() {
        let env = env();
        let publisher = ManualPublisher::<u32>::new(env.clone());
        let subscriber = env.new_manual_subscriber(&publisher).unwrap();
        let err = subscriber.request_next_element().unwrap_err();
        assert!(matches!(err, Violation::Timeout { .. }));
    }
}
