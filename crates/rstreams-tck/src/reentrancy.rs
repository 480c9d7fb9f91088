//! Same-thread reentrancy detection.
//!
//! Every signal the harness delivers to a subscriber runs inside a
//! [`SignalScope`], which marks the callback as active on the current thread.
//! A [`ReentrancySentinel`] subscription checks those marks when the subscriber
//! calls back into it. Calls made from another thread are not detected.

use std::cell::RefCell;
use std::fmt;

use rstreams::Subscription;

use crate::{TestEnvironment, Violation};

/// Subscriber callback kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Signal {
    OnSubscribe,
    OnNext,
    OnError,
    OnComplete,
}

impl fmt::Display for Signal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::OnSubscribe => write!(f, "onSubscribe"),
            Self::OnNext => write!(f, "onNext"),
            Self::OnError => write!(f, "onError"),
            Self::OnComplete => write!(f, "onComplete"),
        }
    }
}

thread_local! {
    static ACTIVE: RefCell<Vec<Signal>> = const { RefCell::new(Vec::new()) };
}

/// Marks `signal` as being delivered on this thread until dropped.
#[must_use = "the scope ends when the guard is dropped"]
pub struct SignalScope {
    signal: Signal,
}

impl SignalScope {
    pub fn enter(signal: Signal) -> Self {
        ACTIVE.with(|active| active.borrow_mut().push(signal));
        Self { signal }
    }

    /// Returns true if `signal` is being delivered on the current thread.
    pub fn is_active(signal: Signal) -> bool {
        ACTIVE.with(|active| active.borrow().contains(&signal))
    }

    /// Run `f` inside a scope for `signal`.
    pub fn deliver<R>(signal: Signal, f: impl FnOnce() -> R) -> R {
        let _scope = Self::enter(signal);
        f()
    }
}

impl Drop for SignalScope {
    fn drop(&mut self) {
        ACTIVE.with(|active| {
            let mut active = active.borrow_mut();
            if let Some(pos) = active.iter().rposition(|s| *s == self.signal) {
                active.remove(pos);
            }
        });
    }
}

/// Subscription that flags any `request`/`cancel` made synchronously from
/// within the `forbidden` callback (rule 2.3).
pub struct ReentrancySentinel {
    env: TestEnvironment,
    forbidden: Signal,
}

impl ReentrancySentinel {
    pub fn new(env: TestEnvironment, forbidden: Signal) -> Self {
        Self { env, forbidden }
    }
}

impl Subscription for ReentrancySentinel {
    fn request(&self, n: u64) {
        tracing::debug!(n, forbidden = %self.forbidden, "sentinel: request");
        if SignalScope::is_active(self.forbidden) {
            self.env.flop(Violation::IllegalReentrancy(format!(
                "Subscription::request MUST NOT be called from {} (Rule 2.3)",
                self.forbidden
            )));
        }
    }

    fn cancel(&self) {
        tracing::debug!(forbidden = %self.forbidden, "sentinel: cancel");
        if SignalScope::is_active(self.forbidden) {
            self.env.flop(Violation::IllegalReentrancy(format!(
                "Subscriber::{} MUST NOT call Subscription::cancel (Rule 2.3)",
                self.forbidden
            )));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn test_scope_nesting() {
        assert!(!SignalScope::is_active(Signal::OnComplete));
        {
            let _outer = SignalScope::enter(Signal::OnNext);
            let _inner = SignalScope::enter(Signal::OnComplete);
            assert!(SignalScope::is_active(Signal::OnNext));
            assert!(SignalScope::is_active(Signal::OnComplete));
        }
        assert!(!SignalScope::is_active(Signal::OnNext));
        assert!(!SignalScope::is_active(Signal::OnComplete));
    }

    #[test]
    fn test_sentinel_flags_same_thread_calls() {
        let env = TestEnvironment::default();
        let sentinel = ReentrancySentinel::new(env.clone(), Signal::OnComplete);

        sentinel.request(1);
        env.verify_no_async_errors().unwrap();

        SignalScope::deliver(Signal::OnComplete, || {
            sentinel.request(1);
            sentinel.cancel();
        });
        let errors = env.async_errors();
        assert_eq!(errors.len(), 2);
        assert!(errors.iter().all(|e| matches!(e, Violation::IllegalReentrancy(_))));
        assert!(errors[0].to_string().contains("2.3"));
    }

    #[test]
    fn test_sentinel_ignores_other_threads() {
        let env = TestEnvironment::default();
        let sentinel = std::sync::Arc::new(ReentrancySentinel::new(env.clone(), Signal::OnError));
        SignalScope::deliver(Signal::OnError, || {
            let remote = sentinel.clone();
            thread::spawn(move || remote.cancel()).join().unwrap();
        });
        env.verify_no_async_errors().unwrap();
    }
}
