//! The contract an implementation supplies to be verified.

use std::sync::Arc;

use rstreams::{Publisher, Subscriber};

use crate::probe::WhiteboxSubscriberProbe;
use crate::{Element, TckConfig};

/// Factory for the subscriber under test and its helper publisher.
///
/// The subscriber returned by [`create_subscriber`](Self::create_subscriber)
/// must report every signal it receives to the probe, and register a
/// [`SubscriberPuppet`](crate::SubscriberPuppet) from within `on_subscribe`.
pub trait SubscriberWhiteboxVerification: Send + Sync + 'static {
    type Item: Element;

    /// A new instance of the subscriber under test, wired to `probe`.
    fn create_subscriber(
        &self,
        probe: Arc<WhiteboxSubscriberProbe<Self::Item>>,
    ) -> Arc<dyn Subscriber<Self::Item>>;

    /// A publisher emitting exactly `elements` items then completing.
    ///
    /// `0` completes immediately and `u64::MAX` never completes. Subscribing
    /// the same subscriber twice must signal an `IllegalStateError` whose
    /// message contains "2.12".
    fn create_helper_publisher(&self, elements: u64) -> Arc<dyn Publisher<Self::Item>>;

    /// Upper bound on spin iterations when waiting for a subscriber to stop
    /// receiving elements.
    fn max_on_next_signals_in_test(&self) -> u64 {
        100
    }

    fn config(&self) -> TckConfig {
        TckConfig::from_env()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ManualPublisher;
    use crate::TestEnvironment;

    struct Defaults;

    impl SubscriberWhiteboxVerification for Defaults {
        type Item = u8;

        fn create_subscriber(
            &self,
            probe: Arc<WhiteboxSubscriberProbe<u8>>,
        ) -> Arc<dyn Subscriber<u8>> {
            Arc::new(crate::ManualSubscriber::<u8>::new(probe.env().clone()))
        }

        fn create_helper_publisher(&self, _elements: u64) -> Arc<dyn Publisher<u8>> {
            Arc::new(ManualPublisher::<u8>::new(TestEnvironment::default()))
        }
    }

    #[test]
    fn test_default_spin_bound() {
        assert_eq!(Defaults.max_on_next_signals_in_test(), 100);
    }
}
