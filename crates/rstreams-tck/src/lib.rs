//! Whitebox conformance harness for `rstreams` subscribers.
//!
//! An implementation plugs its subscriber in through
//! [`SubscriberWhiteboxVerification`]. The harness then plays the upstream
//! publisher, drives demand through the subscriber's [`SubscriberPuppet`] and
//! observes every received signal through a [`WhiteboxSubscriberProbe`].
//!
//! # Usage
//!
//! ```ignore
//! use std::sync::Arc;
//!
//! fn main() {
//!     let args = libtest_mimic::Arguments::from_args();
//!     let trials = rstreams_tck::trials(Arc::new(MyVerification));
//!     libtest_mimic::run(&args, trials).exit();
//! }
//! ```
//!
//! Violations observed on the test thread fail the running scenario
//! immediately. Violations observed on other threads are collected in the
//! environment's [`ViolationLog`] and fail the scenario at its next
//! checkpoint.

#![deny(unsafe_code)]

pub mod env;
pub mod error;
pub mod manual;
pub mod probe;
pub mod reentrancy;
pub mod report;
pub mod rules;
pub mod stage;
pub mod sync;
pub mod verification;

use std::fmt::Debug;

pub use env::{TckConfig, TestEnvironment, ViolationLog};
pub use error::{SlotError, Violation};
pub use manual::{ManualPublisher, ManualSubscriber};
pub use probe::{
    BlackboxProbe, BlackboxSubscriberProxy, SubscriberProbe, SubscriberPuppet,
    SubscriberPuppeteer, SubscriptionPuppet, WhiteboxSubscriberProbe,
};
pub use reentrancy::{ReentrancySentinel, Signal, SignalScope};
pub use report::{Outcome, RuleReport, RunReport, run_all, run_rule, run_rules, trials};
pub use rules::{Disposition, Rule, TestException, catalog};
pub use stage::WhiteboxTestStage;
pub use sync::{Latch, Promise, Receptacle};
pub use verification::SubscriberWhiteboxVerification;

/// Bounds every element type flowing through the harness.
pub trait Element: Clone + PartialEq + Debug + Send + Sync + 'static {}

impl<T: Clone + PartialEq + Debug + Send + Sync + 'static> Element for T {}
