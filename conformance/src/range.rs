//! Helper publisher emitting `0..n`.
//!
//! Each subscription gets its own emitter thread that waits for demand and
//! signals one element per requested unit. Demand of `u64::MAX` is treated as
//! unbounded, as is an element count of `u64::MAX`.

use std::sync::Arc;
use std::thread;

use parking_lot::{Condvar, Mutex};
use rstreams::{
    IllegalStateError, Publisher, StreamError, Subscriber, Subscription, same_subscriber,
};

/// Signalled when a subscriber requests zero elements (rule 3.9).
#[derive(Debug, thiserror::Error)]
#[error("Rule 3.9: request must be called with a positive number of elements")]
pub struct NonPositiveRequest;

/// Publisher of `0..elements`, then completion.
pub struct RangePublisher {
    elements: u64,
    active: Arc<Mutex<Vec<Arc<dyn Subscriber<u64>>>>>,
}

impl RangePublisher {
    pub fn new(elements: u64) -> Self {
        Self {
            elements,
            active: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Number of subscriptions that have neither terminated nor been cancelled.
    pub fn active_subscriptions(&self) -> usize {
        self.active.lock().len()
    }
}

impl Publisher<u64> for RangePublisher {
    fn subscribe(&self, subscriber: Arc<dyn Subscriber<u64>>) {
        {
            let mut active = self.active.lock();
            if active.iter().any(|s| same_subscriber(s, &subscriber)) {
                drop(active);
                tracing::debug!(subscriber = subscriber.name(), "range: duplicate subscription");
                subscriber.on_subscribe(Arc::new(NoopSubscription));
                subscriber.on_error(StreamError::new(IllegalStateError::new(
                    "Rule 2.12: the same Subscriber must not subscribe more than once",
                )));
                return;
            }
            active.push(subscriber.clone());
        }

        let subscription = Arc::new(RangeSubscription::default());
        subscriber.on_subscribe(subscription.clone());

        let emitter = Emitter {
            elements: self.elements,
            subscriber: subscriber.clone(),
            subscription,
            active: self.active.clone(),
        };
        let spawned = thread::Builder::new()
            .name("range-publisher".into())
            .spawn(move || emitter.run());
        if let Err(e) = spawned {
            tracing::warn!(error = %e, "range: failed to spawn emitter");
            self.active.lock().retain(|s| !same_subscriber(s, &subscriber));
            subscriber.on_error(StreamError::new(e));
        }
    }
}

struct NoopSubscription;

impl Subscription for NoopSubscription {
    fn request(&self, _n: u64) {}

    fn cancel(&self) {}
}

#[derive(Default)]
struct DemandState {
    requested: u64,
    cancelled: bool,
    invalid: bool,
}

#[derive(Default)]
struct RangeSubscription {
    state: Mutex<DemandState>,
    cv: Condvar,
}

impl Subscription for RangeSubscription {
    fn request(&self, n: u64) {
        let mut state = self.state.lock();
        if n == 0 {
            state.invalid = true;
        } else {
            state.requested = state.requested.saturating_add(n);
        }
        self.cv.notify_all();
    }

    fn cancel(&self) {
        self.state.lock().cancelled = true;
        self.cv.notify_all();
    }
}

enum Step {
    Emit,
    Cancelled,
    Invalid,
}

struct Emitter {
    elements: u64,
    subscriber: Arc<dyn Subscriber<u64>>,
    subscription: Arc<RangeSubscription>,
    active: Arc<Mutex<Vec<Arc<dyn Subscriber<u64>>>>>,
}

impl Emitter {
    fn run(self) {
        let mut next: u64 = 0;
        loop {
            if self.elements != u64::MAX && next >= self.elements {
                tracing::debug!(emitted = next, "range: complete");
                self.subscriber.on_complete();
                break;
            }
            match self.await_demand() {
                Step::Emit => {
                    self.subscriber.on_next(next);
                    next += 1;
                }
                Step::Cancelled => {
                    tracing::debug!(emitted = next, "range: cancelled");
                    break;
                }
                Step::Invalid => {
                    self.subscriber.on_error(StreamError::new(NonPositiveRequest));
                    break;
                }
            }
        }
        self.active
            .lock()
            .retain(|s| !same_subscriber(s, &self.subscriber));
    }

    /// Block until one unit of demand can be consumed.
    fn await_demand(&self) -> Step {
        let subscription = &self.subscription;
        let mut state = subscription.state.lock();
        loop {
            if state.cancelled {
                return Step::Cancelled;
            }
            if state.invalid {
                return Step::Invalid;
            }
            if state.requested > 0 {
                if state.requested != u64::MAX {
                    state.requested -= 1;
                }
                return Step::Emit;
            }
            subscription.cv.wait(&mut state);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use rstreams_tck::{TckConfig, TestEnvironment, Violation};

    fn env() -> TestEnvironment {
        TestEnvironment::new(TckConfig::default().with_default_timeout(Duration::from_millis(200)))
    }

    #[test]
    fn test_emits_exactly_n_then_completes() {
        let env = env();
        let publisher = RangePublisher::new(3);
        let sub = env.new_manual_subscriber(&publisher).unwrap();

        sub.request(10).unwrap();
        for expected in 0..3 {
            assert_eq!(sub.request_next_element().unwrap(), expected);
        }
        sub.expect_completion().unwrap();
        env.verify_no_async_errors().unwrap();
    }

    #[test]
    fn test_zero_elements_completes_without_demand() {
        let env = env();
        let publisher = RangePublisher::new(0);
        let sub = env.new_manual_subscriber(&publisher).unwrap();
        sub.expect_completion().unwrap();
    }

    #[test]
    fn test_respects_demand() {
        let env = env();
        let publisher = RangePublisher::new(u64::MAX);
        let sub = env.new_manual_subscriber(&publisher).unwrap();

        sub.expect_none().unwrap();
        assert_eq!(sub.request_next_element().unwrap(), 0);
        sub.expect_none().unwrap();
        sub.cancel();
    }

    #[test]
    fn test_duplicate_subscriber_gets_illegal_state() {
        let env = env();
        let publisher = RangePublisher::new(1);
        let sub = env.new_manual_subscriber(&publisher).unwrap();

        publisher.subscribe(sub.clone());
        let err = sub
            .expect_error_with_message::<IllegalStateError>("2.12")
            .unwrap();
        assert!(err.message().contains("more than once"));
        sub.cancel();
    }

    #[test]
    fn test_request_zero_signals_error() {
        let env = env();
        let publisher = RangePublisher::new(5);
        let sub = env.new_manual_subscriber(&publisher).unwrap();
        sub.request(0).unwrap();
        sub.expect_error_with_message::<NonPositiveRequest>("3.9")
            .unwrap();
        let err = sub.request_next_element().unwrap_err();
        assert!(matches!(err, Violation::Timeout { .. }));
    }
}
