//! Conformance tests using libtest-mimic.
//!
//! Every catalog entry runs against the reference subscriber as its own trial
//! (not-verified entries show up as ignored). A second group checks that each
//! faulty subscriber is caught by the entries covering the rule it breaks, and
//! a third group drives end-to-end scenarios through the harness primitives.

use std::sync::Arc;

use libtest_mimic::{Arguments, Failed, Trial};
use rstreams::{IllegalStateError, Publisher, Subscriber};
use rstreams_tck::{
    ManualPublisher, ManualSubscriber, Outcome, SubscriberWhiteboxVerification, TckConfig,
    TestEnvironment, Violation, WhiteboxSubscriberProbe, WhiteboxTestStage, rules, run_all,
    run_rule,
};
use rstreams_tck_conformance::{RangePublisher, Subject, SubjectSubscriber, Verification};

const HAPPY_PATH: &str = "required_exercise_whitebox_happy_path";
const SPEC203_ON_COMPLETE: &str =
    "required_spec203_must_not_call_methods_on_subscription_or_publisher_in_on_complete";
const SPEC203_ON_ERROR: &str =
    "required_spec203_must_not_call_methods_on_subscription_or_publisher_in_on_error";
const SPEC205: &str = "required_spec205_must_call_subscription_cancel_if_it_already_has_a_subscription_and_receives_another_on_subscribe_signal";
const SPEC308: &str = "required_spec308_request_must_register_given_number_elements_to_be_produced";

/// Faulty subjects must be caught by the entries covering the rule they break.
///
/// `(trial, subject, entry, expected failure substring or None for a pass)`
const EXPECTATIONS: &[(&str, Subject, &str, Option<&str>)] = &[
    ("unbounded_fails_spec308", Subject::Unbounded, SPEC308, Some("total demand of 2")),
    ("unbounded_passes_happy_path", Subject::Unbounded, HAPPY_PATH, None),
    ("echoing_fails_spec308", Subject::Echoing, SPEC308, Some("`request`")),
    (
        "reentrant_fails_spec203_on_complete",
        Subject::Reentrant,
        SPEC203_ON_COMPLETE,
        Some("Rule 2.3"),
    ),
    ("reentrant_fails_spec203_on_error", Subject::Reentrant, SPEC203_ON_ERROR, Some("onError")),
    (
        "deferred_reentrant_passes_spec203_on_complete",
        Subject::DeferredReentrant,
        SPEC203_ON_COMPLETE,
        None,
    ),
    (
        "deferred_reentrant_passes_spec203_on_error",
        Subject::DeferredReentrant,
        SPEC203_ON_ERROR,
        None,
    ),
    ("greedy_fails_spec205", Subject::Greedy, SPEC205, Some("Expected 2nd Subscription")),
    ("silent_fails_happy_path", Subject::Silent, HAPPY_PATH, Some("did not `registerOnSubscribe`")),
];

fn main() {
    let args = Arguments::from_args();

    let reference = Arc::new(Verification::new(Subject::Reference));
    let mut trials: Vec<Trial> = rstreams_tck::trials(reference)
        .into_iter()
        .map(|trial| trial.with_kind("reference"))
        .collect();

    for &(name, subject, entry, failure) in EXPECTATIONS {
        trials.push(
            Trial::test(name, move || expect_outcome(subject, entry, failure)).with_kind("faulty"),
        );
    }

    trials.extend([
        Trial::test("backpressure_ignoring_subscriber_fails_catalog", || {
            let report = run_all(&Verification::new(Subject::Unbounded), "unbounded");
            if report.is_success() {
                return Err(Failed::from("catalog did not catch an unbounded subscriber"));
            }
            Ok(())
        }),
        Trial::test("second_puppet_never_replaces_first", second_puppet_never_replaces_first),
        Trial::test("e2e_request_receive_cancel", e2e_request_receive_cancel),
        Trial::test("e2e_complete_without_request", e2e_complete_without_request),
        Trial::test("e2e_duplicate_subscription", e2e_duplicate_subscription),
        Trial::test("e2e_no_spurious_element", e2e_no_spurious_element),
    ]);

    libtest_mimic::run(&args, trials).exit();
}

fn expect_outcome(subject: Subject, entry: &str, failure: Option<&str>) -> Result<(), Failed> {
    let verification = Verification::new(subject);
    let rule = rules::find::<Verification>(entry)
        .ok_or_else(|| Failed::from(format!("no catalog entry named {entry}")))?;

    match (run_rule(&verification, &rule), failure) {
        (Outcome::Passed, None) => Ok(()),
        (Outcome::Failed(reason), Some(part)) if reason.contains(part) => Ok(()),
        (outcome, expected) => Err(Failed::from(format!(
            "{subject} on {entry}: got {outcome:?}, expected {}",
            expected.map_or("a pass".to_string(), |p| format!("a failure mentioning {p:?}"))
        ))),
    }
}

fn check(condition: bool, message: &str) -> Result<(), Failed> {
    if condition { Ok(()) } else { Err(Failed::from(message)) }
}

fn env() -> TestEnvironment {
    TestEnvironment::new(TckConfig::from_env())
}

fn second_puppet_never_replaces_first() -> Result<(), Failed> {
    let env = env();
    let first = ManualPublisher::<u64>::new(env.clone());
    let second = ManualPublisher::<u64>::new(env.clone());
    let probe = Arc::new(WhiteboxSubscriberProbe::new(
        env.clone(),
        first.subscriber_slot().clone(),
    ));
    let subject: Arc<dyn Subscriber<u64>> =
        Arc::new(SubjectSubscriber::new(Subject::Greedy, probe.clone()));

    first.subscribe(subject.clone());
    second.subscribe(subject);

    let puppet = probe.puppet().ok_or("no puppet registered")?;
    puppet.trigger_request(5);
    check(first.expect_request()? == 5, "request did not reach the first subscription")?;
    second.expect_no_request()?;

    let errors = env.log().drain();
    check(
        errors.len() == 1 && matches!(errors[0], Violation::IllegalResubscription(_)),
        "second registration was not recorded as an illegal resubscription",
    )
}

fn e2e_request_receive_cancel() -> Result<(), Failed> {
    let verification = Verification::new(Subject::Reference);
    let env = TestEnvironment::new(verification.config());
    let mut stage = WhiteboxTestStage::new(&verification, env)?;
    let puppet = stage.puppet()?;

    puppet.trigger_request(1);
    check(stage.expect_request()? == 1, "expected request(1)")?;
    let a = stage.signal_next()?;
    stage.probe()?.expect_next_element(&a)?;

    puppet.trigger_request(1);
    check(stage.expect_request()? == 1, "expected request(1)")?;
    let b = stage.signal_next()?;
    stage.probe()?.expect_next_element(&b)?;
    check(a != b, "helper publisher repeated an element")?;

    puppet.signal_cancel();
    stage.expect_cancelling()?;
    stage.verify_no_async_errors()?;
    Ok(())
}

fn e2e_complete_without_request() -> Result<(), Failed> {
    let verification = Verification::new(Subject::Reference);
    let env = TestEnvironment::new(verification.config());
    let stage = WhiteboxTestStage::new(&verification, env)?;

    stage.send_completion()?;
    // The end marker is only at the front if no element was registered first.
    stage.probe()?.expect_completion()?;
    stage.expect_no_request()?;
    stage.verify_no_async_errors()?;
    Ok(())
}

fn e2e_duplicate_subscription() -> Result<(), Failed> {
    let env = env();
    let publisher = RangePublisher::new(1);
    let observer = Arc::new(ManualSubscriber::<u64>::new(env.clone()));

    env.subscribe(&publisher, &observer)?;
    observer.expect_none()?;

    publisher.subscribe(observer.clone());
    observer.expect_error_with_message::<IllegalStateError>("2.12")?;
    observer.cancel();
    Ok(())
}

fn e2e_no_spurious_element() -> Result<(), Failed> {
    let verification = Verification::new(Subject::Reference);
    let env = TestEnvironment::new(verification.config());
    let mut stage = WhiteboxTestStage::new(&verification, env)?;
    let puppet = stage.puppet()?;

    puppet.trigger_request(2);
    stage.expect_demand(2)?;
    for _ in 0..2 {
        let element = stage.signal_next()?;
        stage.probe()?.expect_next_element(&element)?;
    }

    puppet.trigger_request(1);
    check(stage.expect_request()? == 1, "expected request(1)")?;
    check(stage.expect_quiescence()? == 0, "subscriber registered a spurious element")?;
    stage.verify_no_async_errors()?;
    Ok(())
}
