//! The whitebox test stage.
//!
//! A stage is the upstream of the subscriber under test. It derefs to its
//! [`ManualPublisher`], so demand and cancellation are asserted directly on
//! the stage (`stage.expect_request()`, `stage.expect_cancelling()`), while
//! elements are pulled from the implementation's helper publisher through a
//! [`ManualSubscriber`] called the tees.

use std::ops::Deref;
use std::sync::Arc;

use rstreams::{Publisher, StreamError, Subscriber, Subscription};

use crate::manual::{ManualPublisher, ManualSubscriber};
use crate::probe::{SubscriberPuppet, WhiteboxSubscriberProbe};
use crate::reentrancy::{Signal, SignalScope};
use crate::{SubscriberWhiteboxVerification, TestEnvironment, Violation};

pub struct WhiteboxTestStage<'a, V: SubscriberWhiteboxVerification> {
    verification: &'a V,
    env: TestEnvironment,
    publisher: ManualPublisher<V::Item>,
    helper: Option<Arc<dyn Publisher<V::Item>>>,
    tees: Option<Arc<ManualSubscriber<V::Item>>>,
    probe: Option<Arc<WhiteboxSubscriberProbe<V::Item>>>,
    last_t: Option<V::Item>,
}

impl<'a, V: SubscriberWhiteboxVerification> WhiteboxTestStage<'a, V> {
    /// Wire a stage: subscribe the tees to an unbounded helper publisher,
    /// subscribe a fresh subject to this stage and wait for its puppet.
    pub fn new(verification: &'a V, env: TestEnvironment) -> Result<Self, Violation> {
        let mut stage = Self::without_setup(verification, env);

        let helper = verification.create_helper_publisher(u64::MAX);
        stage.helper = Some(helper.clone());
        stage.tees = Some(stage.env.new_manual_subscriber(helper.as_ref())?);

        let probe = stage.create_whitebox_subscriber_probe();
        stage.probe = Some(probe.clone());
        let subject = verification.create_subscriber(probe.clone());
        tracing::debug!(subscriber = subject.name(), "stage: subscribing subject");
        stage.publisher.subscribe(subject);

        probe.expect_registration(stage.env.default_timeout())?;
        Ok(stage)
    }

    /// A stage with nothing wired; the scenario drives the subject itself.
    pub fn without_setup(verification: &'a V, env: TestEnvironment) -> Self {
        let publisher = ManualPublisher::new(env.clone());
        Self {
            verification,
            env,
            publisher,
            helper: None,
            tees: None,
            probe: None,
            last_t: None,
        }
    }

    pub fn env(&self) -> &TestEnvironment {
        &self.env
    }

    pub fn probe(&self) -> Result<&Arc<WhiteboxSubscriberProbe<V::Item>>, Violation> {
        self.probe
            .as_ref()
            .ok_or_else(|| Violation::Protocol("stage has no probe (created without setup)".into()))
    }

    pub fn puppet(&self) -> Result<Arc<dyn SubscriberPuppet>, Violation> {
        self.probe()?.puppet().ok_or_else(|| {
            Violation::Protocol(format!(
                "Subscriber {} did not `registerOnSubscribe`",
                self.sub_name()
            ))
        })
    }

    pub fn tees(&self) -> Result<&Arc<ManualSubscriber<V::Item>>, Violation> {
        self.tees
            .as_ref()
            .ok_or_else(|| Violation::Protocol("stage has no tees (created without setup)".into()))
    }

    pub fn helper_publisher(&self) -> Option<&Arc<dyn Publisher<V::Item>>> {
        self.helper.as_ref()
    }

    fn sub_name(&self) -> &'static str {
        self.sub().map(|s| s.name()).unwrap_or("<not yet subscribed>")
    }

    pub fn create_helper_publisher(&self, elements: u64) -> Arc<dyn Publisher<V::Item>> {
        self.verification.create_helper_publisher(elements)
    }

    pub fn create_subscriber(
        &self,
        probe: Arc<WhiteboxSubscriberProbe<V::Item>>,
    ) -> Arc<dyn Subscriber<V::Item>> {
        self.verification.create_subscriber(probe)
    }

    /// A probe naming whatever subscribes to this stage.
    pub fn create_whitebox_subscriber_probe(&self) -> Arc<WhiteboxSubscriberProbe<V::Item>> {
        Arc::new(WhiteboxSubscriberProbe::new(
            self.env.clone(),
            self.publisher.subscriber_slot().clone(),
        ))
    }

    // =========================================================================
    // Script
    // =========================================================================

    /// Pull the next element from the helper publisher.
    pub fn next_t(&mut self) -> Result<V::Item, Violation> {
        let element = self.tees()?.request_next_element()?;
        self.last_t = Some(element.clone());
        Ok(element)
    }

    /// Pull the next element and send it to the subject.
    pub fn signal_next(&mut self) -> Result<V::Item, Violation> {
        let element = self.next_t()?;
        self.publisher.send_next(element.clone())?;
        Ok(element)
    }

    pub fn last_t(&self) -> Option<&V::Item> {
        self.last_t.as_ref()
    }

    pub fn deliver_subscription_to(
        &self,
        subscriber: &dyn Subscriber<V::Item>,
        subscription: Arc<dyn Subscription>,
    ) {
        SignalScope::deliver(Signal::OnSubscribe, || subscriber.on_subscribe(subscription));
    }

    pub fn deliver_completion_to(&self, subscriber: &dyn Subscriber<V::Item>) {
        SignalScope::deliver(Signal::OnComplete, || subscriber.on_complete());
    }

    pub fn deliver_error_to(&self, subscriber: &dyn Subscriber<V::Item>, cause: StreamError) {
        SignalScope::deliver(Signal::OnError, || subscriber.on_error(cause));
    }

    // =========================================================================
    // Assertions
    // =========================================================================

    /// Drain elements registered by the subject until a quiet window of the
    /// default timeout, returning how many were drained.
    ///
    /// Up to `max_on_next_signals_in_test` elements may be drained; the window
    /// after the last of them must be quiet, otherwise the subject is reported
    /// as still receiving.
    pub fn expect_quiescence(&self) -> Result<u64, Violation> {
        let probe = self.probe()?;
        let bound = self.verification.max_on_next_signals_in_test();
        for drained in 0..=bound {
            match probe.expect_none() {
                Ok(()) => return Ok(drained),
                Err(Violation::Oversupply(_)) => continue,
                Err(other) => return Err(other),
            }
        }
        Err(Violation::Protocol(format!(
            "Subscriber {} was still receiving elements after {bound} signals",
            self.sub_name()
        )))
    }

    pub fn verify_no_async_errors(&self) -> Result<(), Violation> {
        self.env.verify_no_async_errors()
    }
}

impl<V: SubscriberWhiteboxVerification> Deref for WhiteboxTestStage<'_, V> {
    type Target = ManualPublisher<V::Item>;

    fn deref(&self) -> &Self::Target {
        &self.publisher
    }
}

impl<V: SubscriberWhiteboxVerification> Drop for WhiteboxTestStage<'_, V> {
    fn drop(&mut self) {
        if let Some(tees) = &self.tees {
            tees.cancel();
        }
    }
}
