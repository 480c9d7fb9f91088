//! Subscribers under test.
//!
//! [`Subject::Reference`] follows every rule. The other subjects each break
//! one rule on purpose, so the catalog can be checked for catching them.

use std::sync::Arc;
use std::thread;

use parking_lot::Mutex;
use rstreams::{StreamError, Subscriber, Subscription};
use rstreams_tck::{
    SubscriberProbe, SubscriberPuppeteer, SubscriptionPuppet, WhiteboxSubscriberProbe,
};

/// Which subscriber to verify.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, clap::ValueEnum, serde::Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum Subject {
    /// Follows every rule.
    Reference,
    /// Requests unbounded demand as soon as it is subscribed.
    Unbounded,
    /// Requests one more element after every `on_next`.
    Echoing,
    /// Calls `request` and `cancel` synchronously from `on_complete`/`on_error`.
    Reentrant,
    /// Calls `cancel` from `on_complete`/`on_error`, but on another thread.
    DeferredReentrant,
    /// Accepts every subscription it is offered.
    Greedy,
    /// Never registers its puppet.
    Silent,
}

impl Subject {
    pub const ALL: [Subject; 7] = [
        Subject::Reference,
        Subject::Unbounded,
        Subject::Echoing,
        Subject::Reentrant,
        Subject::DeferredReentrant,
        Subject::Greedy,
        Subject::Silent,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Subject::Reference => "reference",
            Subject::Unbounded => "unbounded",
            Subject::Echoing => "echoing",
            Subject::Reentrant => "reentrant",
            Subject::DeferredReentrant => "deferred-reentrant",
            Subject::Greedy => "greedy",
            Subject::Silent => "silent",
        }
    }
}

impl std::fmt::Display for Subject {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Whitebox subscriber reporting to a probe, with the behaviour of `subject`.
pub struct SubjectSubscriber {
    subject: Subject,
    probe: Arc<WhiteboxSubscriberProbe<u64>>,
    subscription: Mutex<Option<Arc<dyn Subscription>>>,
}

impl SubjectSubscriber {
    pub fn new(subject: Subject, probe: Arc<WhiteboxSubscriberProbe<u64>>) -> Self {
        Self {
            subject,
            probe,
            subscription: Mutex::new(None),
        }
    }

    fn current(&self) -> Option<Arc<dyn Subscription>> {
        self.subscription.lock().clone()
    }

    /// Misbehave on a terminal signal, if this subject does.
    fn on_terminal(&self) {
        let Some(subscription) = self.current() else {
            return;
        };
        match self.subject {
            Subject::Reentrant => {
                subscription.request(1);
                subscription.cancel();
            }
            Subject::DeferredReentrant => {
                let handle = thread::spawn(move || subscription.cancel());
                if handle.join().is_err() {
                    tracing::warn!("deferred cancel panicked");
                }
            }
            _ => {}
        }
    }
}

impl Subscriber<u64> for SubjectSubscriber {
    fn on_subscribe(&self, subscription: Arc<dyn Subscription>) {
        {
            let mut current = self.subscription.lock();
            if current.is_some() && self.subject != Subject::Greedy {
                drop(current);
                subscription.cancel();
                return;
            }
            *current = Some(subscription.clone());
        }

        if self.subject == Subject::Unbounded {
            subscription.request(u64::MAX);
        }
        if self.subject != Subject::Silent {
            self.probe
                .register_on_subscribe(Arc::new(SubscriptionPuppet::new(subscription)));
        }
    }

    fn on_next(&self, item: u64) {
        self.probe.register_on_next(item);
        if self.subject == Subject::Echoing {
            if let Some(subscription) = self.current() {
                subscription.request(1);
            }
        }
    }

    fn on_error(&self, error: StreamError) {
        self.probe.register_on_error(error);
        self.on_terminal();
    }

    fn on_complete(&self) {
        self.probe.register_on_complete();
        self.on_terminal();
    }

    fn name(&self) -> &'static str {
        match self.subject {
            Subject::Reference => "ReferenceSubscriber",
            Subject::Unbounded => "UnboundedSubscriber",
            Subject::Echoing => "EchoingSubscriber",
            Subject::Reentrant => "ReentrantSubscriber",
            Subject::DeferredReentrant => "DeferredReentrantSubscriber",
            Subject::Greedy => "GreedySubscriber",
            Subject::Silent => "SilentSubscriber",
        }
    }
}
