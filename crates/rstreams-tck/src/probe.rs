//! Signal probes and the puppet contract.
//!
//! A subscriber under test reports every signal it receives to a probe.
//! The probe records the signals into the primitives of [`crate::sync`] and
//! lets the test thread assert on them with bounded waits.
//!
//! Whitebox verification additionally requires the subscriber to hand back a
//! [`SubscriberPuppet`] from within `on_subscribe`, through
//! [`SubscriberPuppeteer::register_on_subscribe`]. The test script drives the
//! subscription through that puppet only.

use std::ops::Deref;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use rstreams::{StreamError, Subscriber, Subscription};

use crate::sync::{Promise, Receptacle};
use crate::{Element, SlotError, TestEnvironment, Violation};

// =============================================================================
// Contracts
// =============================================================================

/// Must be informed by the subscriber under test of every signal it receives.
pub trait SubscriberProbe<T>: Send + Sync {
    /// Called when the subscriber received an `on_next`.
    fn register_on_next(&self, element: T);

    /// Called when the subscriber received an `on_complete`.
    fn register_on_complete(&self);

    /// Called when the subscriber received an `on_error`.
    fn register_on_error(&self, cause: StreamError);
}

/// Registration endpoint for the puppet.
pub trait SubscriberPuppeteer: Send + Sync {
    /// Must be called by the subscriber under test from within `on_subscribe`,
    /// once it has accepted the subscription.
    fn register_on_subscribe(&self, puppet: Arc<dyn SubscriberPuppet>);
}

/// Remote control over the subscription held by the subscriber under test.
///
/// Each call must cause exactly one corresponding call on the real
/// subscription.
pub trait SubscriberPuppet: Send + Sync {
    fn trigger_request(&self, elements: u64);

    fn signal_cancel(&self);
}

/// Puppet that forwards straight to a subscription.
pub struct SubscriptionPuppet {
    subscription: Arc<dyn Subscription>,
}

impl SubscriptionPuppet {
    pub fn new(subscription: Arc<dyn Subscription>) -> Self {
        Self { subscription }
    }
}

impl SubscriberPuppet for SubscriptionPuppet {
    fn trigger_request(&self, elements: u64) {
        self.subscription.request(elements);
    }

    fn signal_cancel(&self) {
        self.subscription.cancel();
    }
}

// =============================================================================
// Blackbox probe
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Terminal {
    Complete,
    Error,
}

/// Records `on_next`/`on_complete`/`on_error` and asserts on them.
pub struct BlackboxProbe<T> {
    env: TestEnvironment,
    subscriber: Promise<Arc<dyn Subscriber<T>>>,
    elements: Receptacle<T>,
    error: Promise<StreamError>,
    // Held while a terminal signal is recorded, so exactly one terminal wins.
    terminal: Mutex<Option<Terminal>>,
}

impl<T: Element> BlackboxProbe<T> {
    /// `subscriber` resolves to the subscriber under test once it has been
    /// subscribed; it is only used to name the subject in messages.
    pub fn new(env: TestEnvironment, subscriber: Promise<Arc<dyn Subscriber<T>>>) -> Self {
        let elements = Receptacle::new(env.config().receptacle_capacity);
        Self {
            env,
            subscriber,
            elements,
            error: Promise::new(),
            terminal: Mutex::new(None),
        }
    }

    pub fn env(&self) -> &TestEnvironment {
        &self.env
    }

    pub fn sub(&self) -> Option<Arc<dyn Subscriber<T>>> {
        self.subscriber.value()
    }

    fn sub_name(&self) -> &'static str {
        self.sub().map(|s| s.name()).unwrap_or("<not yet subscribed>")
    }

    pub fn expect_next(&self) -> Result<T, Violation> {
        self.elements.next(
            self.env.default_timeout(),
            &format!("Subscriber {} did not call `registerOnNext(_)`", self.sub_name()),
        )
    }

    pub fn expect_next_element(&self, expected: &T) -> Result<(), Violation> {
        self.expect_next_element_within(expected, self.env.default_timeout())
    }

    pub fn expect_next_element_within(
        &self,
        expected: &T,
        timeout: Duration,
    ) -> Result<(), Violation> {
        let received = self.elements.next(
            timeout,
            &format!(
                "Subscriber {} did not call `registerOnNext({expected:?})`",
                self.sub_name()
            ),
        )?;
        if received != *expected {
            return Err(Violation::Mismatch(format!(
                "Subscriber {} called `registerOnNext({received:?})` rather than `registerOnNext({expected:?})`",
                self.sub_name()
            )));
        }
        Ok(())
    }

    pub fn expect_completion(&self) -> Result<(), Violation> {
        self.expect_completion_within(
            self.env.default_timeout(),
            &format!("Subscriber {} did not call `registerOnComplete()`", self.sub_name()),
        )
    }

    pub fn expect_completion_within(
        &self,
        timeout: Duration,
        message: &str,
    ) -> Result<(), Violation> {
        match self.elements.expect_completion(timeout, message) {
            Err(Violation::Timeout { .. }) if self.error.is_completed() => {
                Err(Violation::Mismatch(format!(
                    "Subscriber {} called `registerOnError({})` rather than `registerOnComplete()`",
                    self.sub_name(),
                    self.error.value().map(|e| e.to_string()).unwrap_or_default()
                )))
            }
            other => other,
        }
    }

    fn await_error(&self, timeout: Duration, expected: &str) -> Result<StreamError, Violation> {
        let message = format!(
            "Subscriber {} did not call `registerOnError({expected})`",
            self.sub_name()
        );
        match self.error.expect_completion(timeout, &message) {
            Err(Violation::Timeout { .. }) if self.elements.is_completed() => {
                Err(Violation::Mismatch(format!(
                    "Subscriber {} called `registerOnComplete()` rather than `registerOnError({expected})`",
                    self.sub_name()
                )))
            }
            other => other,
        }
    }

    /// Expect exactly the `expected` error instance.
    pub fn expect_error(&self, expected: &StreamError) -> Result<(), Violation> {
        self.expect_error_within(expected, self.env.default_timeout())
    }

    pub fn expect_error_within(
        &self,
        expected: &StreamError,
        timeout: Duration,
    ) -> Result<(), Violation> {
        let received = self.await_error(timeout, &expected.to_string())?;
        if !received.same_as(expected) {
            return Err(Violation::Mismatch(format!(
                "Subscriber {} called `registerOnError({received})` rather than `registerOnError({expected})`",
                self.sub_name()
            )));
        }
        Ok(())
    }

    /// Expect an error of type `E`.
    pub fn expect_error_of<E>(&self) -> Result<StreamError, Violation>
    where
        E: std::error::Error + 'static,
    {
        self.expect_error_of_within::<E>(self.env.default_timeout())
    }

    pub fn expect_error_of_within<E: std::error::Error + 'static>(
        &self,
        timeout: Duration,
    ) -> Result<StreamError, Violation> {
        let expected = std::any::type_name::<E>();
        let received = self.await_error(timeout, expected)?;
        if !received.is::<E>() {
            return Err(Violation::Mismatch(format!(
                "Subscriber {} called `registerOnError({received})` rather than `registerOnError({expected})`",
                self.sub_name()
            )));
        }
        Ok(received)
    }

    /// Expect an error of type `E` whose message contains `required_message_part`.
    pub fn expect_error_with_message<E: std::error::Error + 'static>(
        &self,
        required_message_part: &str,
    ) -> Result<StreamError, Violation> {
        let err = self.expect_error_of::<E>()?;
        if !err.message().contains(required_message_part) {
            return Err(Violation::Mismatch(format!(
                "Got expected error {} but missing message [{required_message_part}], was: {err}",
                std::any::type_name::<E>()
            )));
        }
        Ok(err)
    }

    pub fn expect_none(&self) -> Result<(), Violation> {
        self.expect_none_within(self.env.default_timeout())
    }

    pub fn expect_none_within(&self, within: Duration) -> Result<(), Violation> {
        self.elements.expect_none(within, "Expected nothing")
    }
}

impl<T: Element> SubscriberProbe<T> for BlackboxProbe<T> {
    fn register_on_next(&self, element: T) {
        tracing::trace!(?element, "probe: registerOnNext");
        if self.error.is_completed() {
            self.env.flop(Violation::Protocol(format!(
                "Subscriber {} called `registerOnNext({element:?})` after `registerOnError`, which is illegal according to Rule 1.7",
                self.sub_name()
            )));
            return;
        }
        match self.elements.add(element) {
            Ok(()) => {}
            Err(SlotError::AlreadyCompleted) => self.env.flop(Violation::Protocol(format!(
                "Subscriber {} called `registerOnNext` after `registerOnComplete`, which is illegal according to Rule 1.7",
                self.sub_name()
            ))),
            Err(SlotError::Overflow(capacity)) => self.env.flop(Violation::Oversupply(format!(
                "Subscriber {} registered more than {capacity} elements that were never expected",
                self.sub_name()
            ))),
        }
    }

    fn register_on_complete(&self) {
        tracing::debug!("probe: registerOnComplete");
        let mut terminal = self.terminal.lock();
        match *terminal {
            Some(Terminal::Error) => self.env.flop(Violation::DoubleTerminal(
                "subscriber::onComplete was called after onError, which is illegal according to Rule 1.7"
                    .into(),
            )),
            Some(Terminal::Complete) => self.env.flop(Violation::DoubleTerminal(
                "subscriber::onComplete was called a second time, which is illegal according to Rule 1.7"
                    .into(),
            )),
            None => {
                *terminal = Some(Terminal::Complete);
                let _ = self.elements.complete();
            }
        }
    }

    fn register_on_error(&self, cause: StreamError) {
        tracing::debug!(%cause, "probe: registerOnError");
        let mut terminal = self.terminal.lock();
        match *terminal {
            Some(Terminal::Complete) => self.env.flop(Violation::DoubleTerminal(
                "subscriber::onError was called after onComplete, which is illegal according to Rule 1.7"
                    .into(),
            )),
            Some(Terminal::Error) => self.env.flop(Violation::DoubleTerminal(
                "subscriber::onError was called a second time, which is illegal according to Rule 1.7"
                    .into(),
            )),
            None => {
                *terminal = Some(Terminal::Error);
                let _ = self.error.complete(cause);
            }
        }
    }
}

/// Decorator that records signals into a [`BlackboxProbe`] before forwarding
/// them to the wrapped subscriber.
pub struct BlackboxSubscriberProxy<T> {
    probe: BlackboxProbe<T>,
    subscriber: Arc<dyn Subscriber<T>>,
}

impl<T: Element> BlackboxSubscriberProxy<T> {
    pub fn new(env: TestEnvironment, subscriber: Arc<dyn Subscriber<T>>) -> Self {
        let probe = BlackboxProbe::new(env, Promise::completed(subscriber.clone()));
        Self { probe, subscriber }
    }

    pub fn probe(&self) -> &BlackboxProbe<T> {
        &self.probe
    }
}

impl<T: Element> Subscriber<T> for BlackboxSubscriberProxy<T> {
    fn on_subscribe(&self, subscription: Arc<dyn Subscription>) {
        self.subscriber.on_subscribe(subscription);
    }

    fn on_next(&self, item: T) {
        self.probe.register_on_next(item.clone());
        self.subscriber.on_next(item);
    }

    fn on_error(&self, error: StreamError) {
        self.probe.register_on_error(error.clone());
        self.subscriber.on_error(error);
    }

    fn on_complete(&self) {
        self.probe.register_on_complete();
        self.subscriber.on_complete();
    }

    fn name(&self) -> &'static str {
        self.subscriber.name()
    }
}

// =============================================================================
// Whitebox probe
// =============================================================================

/// Blackbox probe plus the puppet registration slot.
pub struct WhiteboxSubscriberProbe<T> {
    blackbox: BlackboxProbe<T>,
    puppet: Promise<Arc<dyn SubscriberPuppet>>,
}

impl<T: Element> WhiteboxSubscriberProbe<T> {
    pub fn new(env: TestEnvironment, subscriber: Promise<Arc<dyn Subscriber<T>>>) -> Self {
        Self {
            blackbox: BlackboxProbe::new(env, subscriber),
            puppet: Promise::new(),
        }
    }

    /// The registered puppet, if any.
    pub fn puppet(&self) -> Option<Arc<dyn SubscriberPuppet>> {
        self.puppet.value()
    }

    pub fn is_registered(&self) -> bool {
        self.puppet.is_completed()
    }

    /// Wait for the subscriber to register its puppet.
    pub fn expect_registration(
        &self,
        timeout: Duration,
    ) -> Result<Arc<dyn SubscriberPuppet>, Violation> {
        self.puppet.expect_completion(
            timeout,
            &format!("Subscriber {} did not `registerOnSubscribe`", self.sub_name()),
        )
    }
}

impl<T> Deref for WhiteboxSubscriberProbe<T> {
    type Target = BlackboxProbe<T>;

    fn deref(&self) -> &Self::Target {
        &self.blackbox
    }
}

impl<T: Element> SubscriberProbe<T> for WhiteboxSubscriberProbe<T> {
    fn register_on_next(&self, element: T) {
        self.blackbox.register_on_next(element);
    }

    fn register_on_complete(&self) {
        self.blackbox.register_on_complete();
    }

    fn register_on_error(&self, cause: StreamError) {
        self.blackbox.register_on_error(cause);
    }
}

impl<T: Element> SubscriberPuppeteer for WhiteboxSubscriberProbe<T> {
    fn register_on_subscribe(&self, puppet: Arc<dyn SubscriberPuppet>) {
        tracing::debug!("probe: registerOnSubscribe");
        if self.puppet.complete(puppet).is_err() {
            self.env().flop(Violation::IllegalResubscription(format!(
                "Subscriber {} illegally accepted a second Subscription",
                self.sub_name()
            )));
        }
    }
}
