//! Reference subjects for the rstreams conformance harness.
//!
//! This crate wires a helper publisher and a family of subscribers into
//! [`rstreams_tck`]. The reference subscriber must pass every required entry
//! of the catalog; each faulty subscriber must fail the entries covering the
//! rule it breaks.
//!
//! # Usage
//!
//! ```bash
//! rstreams-tck-conformance --all
//! rstreams-tck-conformance --subject greedy --case required_spec205_must_call_subscription_cancel_if_it_already_has_a_subscription_and_receives_another_on_subscribe_signal
//! ```
//!
//! The binary exits with:
//! - 0: every selected entry passed or was skipped
//! - 1: a required entry failed
//! - 2: usage or internal error

pub mod range;
pub mod subject;

use std::sync::Arc;

use rstreams::{Publisher, Subscriber};
use rstreams_tck::{SubscriberWhiteboxVerification, TckConfig, WhiteboxSubscriberProbe};

pub use range::RangePublisher;
pub use subject::{Subject, SubjectSubscriber};

/// Verification of one [`Subject`] against [`RangePublisher`].
#[derive(Debug, Clone)]
pub struct Verification {
    subject: Subject,
    config: Option<TckConfig>,
}

impl Verification {
    pub fn new(subject: Subject) -> Self {
        Self {
            subject,
            config: None,
        }
    }

    /// Use `config` instead of reading the environment.
    pub fn with_config(mut self, config: TckConfig) -> Self {
        self.config = Some(config);
        self
    }

    pub fn subject(&self) -> Subject {
        self.subject
    }
}

impl SubscriberWhiteboxVerification for Verification {
    type Item = u64;

    fn create_subscriber(
        &self,
        probe: Arc<WhiteboxSubscriberProbe<u64>>,
    ) -> Arc<dyn Subscriber<u64>> {
        Arc::new(SubjectSubscriber::new(self.subject, probe))
    }

    fn create_helper_publisher(&self, elements: u64) -> Arc<dyn Publisher<u64>> {
        Arc::new(RangePublisher::new(elements))
    }

    fn config(&self) -> TckConfig {
        self.config.clone().unwrap_or_else(TckConfig::from_env)
    }
}
