//! The rule catalog.
//!
//! Each entry verifies one or more rules of the protocol against a subscriber
//! supplied through [`SubscriberWhiteboxVerification`]. Rules that black-box
//! testing cannot meaningfully verify are listed as [`Disposition::NotVerified`]
//! and have no scenario.

use std::sync::Arc;

use rstreams::{IllegalStateError, Publisher, StreamError, Subscription};
use serde::Serialize;

use crate::manual::ManualSubscriber;
use crate::reentrancy::{ReentrancySentinel, Signal};
use crate::stage::WhiteboxTestStage;
use crate::sync::Latch;
use crate::{SubscriberWhiteboxVerification, TestEnvironment, Violation};

/// Whether an entry is verified.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Disposition {
    Required,
    NotVerified,
}

/// A scenario run on the test thread.
pub type Scenario<V> = fn(&V, &TestEnvironment) -> Result<(), Violation>;

/// A catalog entry.
pub struct Rule<V> {
    /// Stable name, used to select and report the entry.
    pub name: &'static str,
    /// The protocol rules this entry covers.
    pub rules: &'static [&'static str],
    pub description: &'static str,
    pub disposition: Disposition,
    /// `None` for not-verified entries.
    pub run: Option<Scenario<V>>,
}

impl<V> Rule<V> {
    pub fn is_required(&self) -> bool {
        self.disposition == Disposition::Required
    }
}

/// Error signalled by scenarios that need a real error instance.
#[derive(Debug, thiserror::Error)]
#[error("Test exception")]
pub struct TestException;

/// Why an entry is not verified.
pub const NOT_VERIFIED_REASON: &str = "cannot be meaningfully tested";

fn required<V>(
    name: &'static str,
    rules: &'static [&'static str],
    description: &'static str,
    run: Scenario<V>,
) -> Rule<V> {
    Rule {
        name,
        rules,
        description,
        disposition: Disposition::Required,
        run: Some(run),
    }
}

fn not_verified<V>(
    name: &'static str,
    rules: &'static [&'static str],
    description: &'static str,
) -> Rule<V> {
    Rule {
        name,
        rules,
        description,
        disposition: Disposition::NotVerified,
        run: None,
    }
}

/// Every entry, in protocol order.
pub fn catalog<V: SubscriberWhiteboxVerification>() -> Vec<Rule<V>> {
    vec![
        required(
            "required_exercise_whitebox_happy_path",
            &[],
            "request, receive and cancel through the puppet",
            exercise_whitebox_happy_path::<V>,
        ),
        required(
            "required_spec201_must_signal_demand_via_subscription_request",
            &["2.1"],
            "Subscriber must signal demand via Subscription.request",
            spec201_must_signal_demand_via_subscription_request::<V>,
        ),
        not_verified(
            "untested_spec202_should_asynchronously_dispatch",
            &["2.2"],
            "Subscriber should asynchronously dispatch",
        ),
        required(
            "required_spec203_must_not_call_methods_on_subscription_or_publisher_in_on_complete",
            &["2.3"],
            "onComplete must not call Subscription or Publisher methods",
            spec203_must_not_call_methods_on_subscription_or_publisher_in_on_complete::<V>,
        ),
        required(
            "required_spec203_must_not_call_methods_on_subscription_or_publisher_in_on_error",
            &["2.3"],
            "onError must not call Subscription or Publisher methods",
            spec203_must_not_call_methods_on_subscription_or_publisher_in_on_error::<V>,
        ),
        not_verified(
            "untested_spec204_must_consider_the_subscription_as_cancelled_after_on_complete_or_on_error",
            &["2.4"],
            "Subscription is cancelled after onComplete or onError",
        ),
        required(
            "required_spec205_must_call_subscription_cancel_if_it_already_has_a_subscription_and_receives_another_on_subscribe_signal",
            &["2.5"],
            "a second onSubscribe must be answered with cancel",
            spec205_must_call_subscription_cancel_if_it_already_has_a_subscription::<V>,
        ),
        not_verified(
            "untested_spec206_must_call_subscription_cancel_if_it_is_no_longer_valid",
            &["2.6"],
            "Subscriber must cancel a subscription it no longer needs",
        ),
        not_verified(
            "untested_spec207_must_ensure_all_calls_on_its_subscription_take_place_from_the_same_thread_or_take_care_of_synchronization",
            &["2.7"],
            "calls on the subscription are serialized",
        ),
        required(
            "required_spec208_must_be_prepared_to_receive_on_next_signals_after_having_called_subscription_cancel",
            &["2.8"],
            "onNext may still arrive after cancel",
            spec208_must_be_prepared_to_receive_on_next_signals_after_cancel::<V>,
        ),
        required(
            "required_spec209_must_be_prepared_to_receive_an_on_complete_signal_with_preceding_request_call",
            &["2.9"],
            "onComplete after a request",
            spec209_on_complete_with_preceding_request::<V>,
        ),
        required(
            "required_spec209_must_be_prepared_to_receive_an_on_complete_signal_without_preceding_request_call",
            &["2.9"],
            "onComplete without any request",
            spec209_on_complete_without_preceding_request::<V>,
        ),
        required(
            "required_spec210_must_be_prepared_to_receive_an_on_error_signal_with_preceding_request_call",
            &["2.10"],
            "onError after a request",
            spec210_on_error_with_preceding_request::<V>,
        ),
        required(
            "required_spec210_must_be_prepared_to_receive_an_on_error_signal_without_preceding_request_call",
            &["2.10"],
            "onError without any request",
            spec210_on_error_without_preceding_request::<V>,
        ),
        not_verified(
            "untested_spec211_must_make_sure_that_all_calls_on_its_methods_happen_before_the_processing_of_the_respective_events",
            &["2.11"],
            "signal calls happen-before their processing",
        ),
        required(
            "required_spec212_must_not_call_on_subscribe_more_than_once_based_on_object_equality",
            &["2.12"],
            "subscribing the same subscriber twice is rejected",
            spec212_must_not_call_on_subscribe_more_than_once::<V>,
        ),
        not_verified(
            "untested_spec213_failing_on_signal_invocation",
            &["2.13"],
            "signal methods return normally",
        ),
        not_verified(
            "untested_spec301_must_not_be_called_outside_subscriber_context",
            &["3.1"],
            "Subscription methods are only called by its Subscriber",
        ),
        required(
            "required_spec308_request_must_register_given_number_elements_to_be_produced",
            &["3.8"],
            "request(n) registers exactly n elements of demand",
            spec308_request_must_register_given_number_elements_to_be_produced::<V>,
        ),
        not_verified(
            "untested_spec310_request_may_synchronously_call_on_next_on_subscriber",
            &["3.10"],
            "request may call onNext synchronously",
        ),
        not_verified(
            "untested_spec311_request_may_synchronously_call_on_complete_or_on_error",
            &["3.11"],
            "request may call onComplete or onError synchronously",
        ),
        not_verified(
            "untested_spec314_cancel_may_cause_the_publisher_to_shutdown_if_no_other_subscription_exists",
            &["3.14"],
            "cancel may shut the publisher down",
        ),
        not_verified(
            "untested_spec315_cancel_must_not_throw_exception_and_must_signal_on_error",
            &["3.15"],
            "cancel returns normally",
        ),
        not_verified(
            "untested_spec316_request_must_not_throw_exception_and_must_on_error_the_subscriber",
            &["3.16"],
            "request returns normally",
        ),
    ]
}

/// Look up an entry by name.
pub fn find<V: SubscriberWhiteboxVerification>(name: &str) -> Option<Rule<V>> {
    catalog::<V>().into_iter().find(|rule| rule.name == name)
}

// =============================================================================
// Setup verification
// =============================================================================

fn exercise_whitebox_happy_path<V: SubscriberWhiteboxVerification>(
    verification: &V,
    env: &TestEnvironment,
) -> Result<(), Violation> {
    let mut stage = WhiteboxTestStage::new(verification, env.clone())?;
    let puppet = stage.puppet()?;

    puppet.trigger_request(1);
    puppet.trigger_request(1);

    let received_requests = stage.expect_request()?;

    let element = stage.signal_next()?;
    stage.probe()?.expect_next_element(&element)?;

    puppet.trigger_request(1);
    if received_requests == 1 {
        stage.expect_request()?;
    }

    let element = stage.signal_next()?;
    stage.probe()?.expect_next_element(&element)?;

    puppet.signal_cancel();
    stage.expect_cancelling()?;

    stage.verify_no_async_errors()
}

// =============================================================================
// Subscriber rules
// =============================================================================

fn spec201_must_signal_demand_via_subscription_request<V: SubscriberWhiteboxVerification>(
    verification: &V,
    env: &TestEnvironment,
) -> Result<(), Violation> {
    let mut stage = WhiteboxTestStage::new(verification, env.clone())?;
    stage.puppet()?.trigger_request(1);
    stage.expect_request()?;

    stage.signal_next()?;
    Ok(())
}

/// Deliver `on_subscribe` with a sentinel subscription, then the terminal
/// signal, directly on the test thread.
fn terminal_reentrancy<V: SubscriberWhiteboxVerification>(
    verification: &V,
    env: &TestEnvironment,
    terminal: Signal,
) -> Result<(), Violation> {
    let stage = WhiteboxTestStage::without_setup(verification, env.clone());
    let probe = stage.create_whitebox_subscriber_probe();
    let sub = stage.create_subscriber(probe);

    let sentinel: Arc<dyn Subscription> = Arc::new(ReentrancySentinel::new(env.clone(), terminal));
    stage.deliver_subscription_to(sub.as_ref(), sentinel);
    match terminal {
        Signal::OnError => stage.deliver_error_to(sub.as_ref(), StreamError::new(TestException)),
        _ => stage.deliver_completion_to(sub.as_ref()),
    }

    env.verify_no_async_errors()
}

fn spec203_must_not_call_methods_on_subscription_or_publisher_in_on_complete<
    V: SubscriberWhiteboxVerification,
>(
    verification: &V,
    env: &TestEnvironment,
) -> Result<(), Violation> {
    terminal_reentrancy(verification, env, Signal::OnComplete)
}

fn spec203_must_not_call_methods_on_subscription_or_publisher_in_on_error<
    V: SubscriberWhiteboxVerification,
>(
    verification: &V,
    env: &TestEnvironment,
) -> Result<(), Violation> {
    terminal_reentrancy(verification, env, Signal::OnError)
}

/// Subscription that must only ever be cancelled.
struct SecondSubscription {
    env: TestEnvironment,
    subscriber: &'static str,
    cancelled: Latch,
}

impl Subscription for SecondSubscription {
    fn request(&self, n: u64) {
        self.env.flop(Violation::IllegalResubscription(format!(
            "Subscriber {} illegally called `subscription.request({n})`",
            self.subscriber
        )));
    }

    fn cancel(&self) {
        self.cancelled.close();
    }
}

fn spec205_must_call_subscription_cancel_if_it_already_has_a_subscription<
    V: SubscriberWhiteboxVerification,
>(
    verification: &V,
    env: &TestEnvironment,
) -> Result<(), Violation> {
    let stage = WhiteboxTestStage::new(verification, env.clone())?;
    let sub = stage
        .sub()
        .ok_or_else(|| Violation::Protocol("subject was never subscribed".into()))?;

    let cancelled = Latch::new();
    let second = Arc::new(SecondSubscription {
        env: env.clone(),
        subscriber: sub.name(),
        cancelled: cancelled.clone(),
    });
    stage.deliver_subscription_to(sub.as_ref(), second);

    cancelled.expect_close(
        env.default_timeout(),
        "Expected 2nd Subscription given to subscriber to be cancelled, but `Subscription.cancel()` was not called.",
    )?;
    env.verify_no_async_errors()
}

fn spec208_must_be_prepared_to_receive_on_next_signals_after_cancel<
    V: SubscriberWhiteboxVerification,
>(
    verification: &V,
    env: &TestEnvironment,
) -> Result<(), Violation> {
    let mut stage = WhiteboxTestStage::new(verification, env.clone())?;
    let puppet = stage.puppet()?;

    puppet.trigger_request(1);
    puppet.signal_cancel();
    stage.signal_next()?;

    puppet.trigger_request(1);
    puppet.trigger_request(1);

    stage.expect_quiescence()?;
    stage.verify_no_async_errors()
}

fn spec209_on_complete_with_preceding_request<V: SubscriberWhiteboxVerification>(
    verification: &V,
    env: &TestEnvironment,
) -> Result<(), Violation> {
    let stage = WhiteboxTestStage::new(verification, env.clone())?;
    stage.puppet()?.trigger_request(1);
    stage.send_completion()?;
    stage.probe()?.expect_completion()?;

    stage.verify_no_async_errors()
}

fn spec209_on_complete_without_preceding_request<V: SubscriberWhiteboxVerification>(
    verification: &V,
    env: &TestEnvironment,
) -> Result<(), Violation> {
    let stage = WhiteboxTestStage::new(verification, env.clone())?;
    stage.send_completion()?;
    stage.probe()?.expect_completion()?;

    stage.verify_no_async_errors()
}

fn spec210_on_error_with_preceding_request<V: SubscriberWhiteboxVerification>(
    verification: &V,
    env: &TestEnvironment,
) -> Result<(), Violation> {
    let stage = WhiteboxTestStage::new(verification, env.clone())?;
    let puppet = stage.puppet()?;
    puppet.trigger_request(1);
    puppet.trigger_request(1);

    let ex = StreamError::new(TestException);
    stage.send_error(ex.clone())?;
    stage.probe()?.expect_error(&ex)?;

    env.verify_no_async_errors()
}

fn spec210_on_error_without_preceding_request<V: SubscriberWhiteboxVerification>(
    verification: &V,
    env: &TestEnvironment,
) -> Result<(), Violation> {
    let stage = WhiteboxTestStage::new(verification, env.clone())?;
    let ex = StreamError::new(TestException);
    stage.send_error(ex.clone())?;
    stage.probe()?.expect_error(&ex)?;

    env.verify_no_async_errors()
}

fn spec212_must_not_call_on_subscribe_more_than_once<V: SubscriberWhiteboxVerification>(
    verification: &V,
    env: &TestEnvironment,
) -> Result<(), Violation> {
    let publisher = verification.create_helper_publisher(1);
    let tees = Arc::new(ManualSubscriber::<V::Item>::new(env.clone()));

    let result = subscribe_twice(publisher.as_ref(), &tees, env);
    tees.cancel();
    result
}

fn subscribe_twice<T: crate::Element>(
    publisher: &dyn Publisher<T>,
    tees: &Arc<ManualSubscriber<T>>,
    env: &TestEnvironment,
) -> Result<(), Violation> {
    env.subscribe(publisher, tees)?;
    tees.expect_none()?;

    // Not `env.subscribe`: that checks the log before the error arrives.
    publisher.subscribe(tees.clone());
    tees.expect_error_with_message::<IllegalStateError>("2.12")?;
    Ok(())
}

// =============================================================================
// Subscription rules
// =============================================================================

fn spec308_request_must_register_given_number_elements_to_be_produced<
    V: SubscriberWhiteboxVerification,
>(
    verification: &V,
    env: &TestEnvironment,
) -> Result<(), Violation> {
    let mut stage = WhiteboxTestStage::new(verification, env.clone())?;
    let puppet = stage.puppet()?;

    puppet.trigger_request(2);
    stage.expect_demand(2)?;

    let element = stage.signal_next()?;
    stage.probe()?.expect_next_element(&element)?;
    let element = stage.signal_next()?;
    stage.probe()?.expect_next_element(&element)?;

    stage.probe()?.expect_none()?;
    stage.expect_no_request()?;
    puppet.trigger_request(3);

    stage.verify_no_async_errors()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    use rstreams::Subscriber;

    use crate::probe::WhiteboxSubscriberProbe;

    struct Nothing;

    impl SubscriberWhiteboxVerification for Nothing {
        type Item = u32;

        fn create_subscriber(
            &self,
            _probe: Arc<WhiteboxSubscriberProbe<u32>>,
        ) -> Arc<dyn Subscriber<u32>> {
            unreachable!()
        }

        fn create_helper_publisher(&self, _elements: u64) -> Arc<dyn Publisher<u32>> {
            unreachable!()
        }
    }

    #[test]
    fn test_catalog_shape() {
        let catalog = catalog::<Nothing>();
        assert_eq!(catalog.len(), 24);
        assert_eq!(catalog.iter().filter(|r| r.is_required()).count(), 12);

        let names: HashSet<_> = catalog.iter().map(|r| r.name).collect();
        assert_eq!(names.len(), catalog.len());

        for rule in &catalog {
            assert_eq!(rule.run.is_some(), rule.is_required(), "{}", rule.name);
            let prefix = if rule.is_required() { "required_" } else { "untested_" };
            assert!(rule.name.starts_with(prefix), "{}", rule.name);
        }
    }

    #[test]
    fn test_find() {
        let rule = find::<Nothing>(
            "required_spec308_request_must_register_given_number_elements_to_be_produced",
        )
        .unwrap();
        assert_eq!(rule.rules, &["3.8"]);
        assert!(find::<Nothing>("no_such_rule").is_none());
    }
}
