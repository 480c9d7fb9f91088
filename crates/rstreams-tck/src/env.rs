//! Per-run test environment: configuration and the async violation log.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use rstreams::{Publisher, Subscriber};

use crate::manual::ManualSubscriber;
use crate::sync::DEFAULT_RECEPTACLE_CAPACITY;
use crate::{Element, Violation};

const DEFAULT_TIMEOUT_MS: u64 = 100;

fn env_or<T: std::str::FromStr + PartialOrd + Default>(name: &str, default: T) -> T {
    std::env::var(name)
        .ok()
        .and_then(|v| v.parse::<T>().ok())
        .filter(|v| *v > T::default())
        .unwrap_or(default)
}

// =============================================================================
// Configuration
// =============================================================================

/// Harness configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TckConfig {
    /// Bound for every "expect" wait, and the window of `expect_none`.
    pub default_timeout: Duration,
    /// Capacity of the signal queues.
    pub receptacle_capacity: usize,
}

impl TckConfig {
    /// Read `RSTREAMS_TCK_DEFAULT_TIMEOUT_MS` and
    /// `RSTREAMS_TCK_RECEPTACLE_CAPACITY`, falling back to the defaults for
    /// unset, unparsable or zero values.
    pub fn from_env() -> Self {
        Self {
            default_timeout: Duration::from_millis(env_or(
                "RSTREAMS_TCK_DEFAULT_TIMEOUT_MS",
                DEFAULT_TIMEOUT_MS,
            )),
            receptacle_capacity: env_or(
                "RSTREAMS_TCK_RECEPTACLE_CAPACITY",
                DEFAULT_RECEPTACLE_CAPACITY,
            ),
        }
    }

    pub fn with_default_timeout(mut self, timeout: Duration) -> Self {
        self.default_timeout = timeout;
        self
    }

    pub fn with_receptacle_capacity(mut self, capacity: usize) -> Self {
        self.receptacle_capacity = capacity;
        self
    }
}

impl Default for TckConfig {
    fn default() -> Self {
        Self {
            default_timeout: Duration::from_millis(DEFAULT_TIMEOUT_MS),
            receptacle_capacity: DEFAULT_RECEPTACLE_CAPACITY,
        }
    }
}

// =============================================================================
// Violation log
// =============================================================================

/// Append-only log of violations detected off the test thread.
///
/// Clones share the same log. Only [`ViolationLog::clear`] and
/// [`ViolationLog::drain`] remove entries.
#[derive(Debug, Clone, Default)]
pub struct ViolationLog {
    entries: Arc<Mutex<Vec<Violation>>>,
}

impl ViolationLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&self, violation: Violation) {
        tracing::warn!(kind = violation.kind(), "{violation}");
        self.entries.lock().push(violation);
    }

    /// Remove and return everything recorded so far.
    pub fn drain(&self) -> Vec<Violation> {
        std::mem::take(&mut *self.entries.lock())
    }

    pub fn snapshot(&self) -> Vec<Violation> {
        self.entries.lock().clone()
    }

    /// Fails with [`Violation::Async`] if anything was recorded. Entries are
    /// kept.
    pub fn assert_empty(&self) -> Result<(), Violation> {
        let entries = self.entries.lock();
        if entries.is_empty() {
            Ok(())
        } else {
            Err(Violation::Async(entries.clone()))
        }
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn clear(&self) {
        self.entries.lock().clear();
    }
}

// =============================================================================
// Environment
// =============================================================================

/// Everything one scenario run shares across threads.
///
/// Create one per scenario; clones share the log.
#[derive(Debug, Clone)]
pub struct TestEnvironment {
    config: TckConfig,
    log: ViolationLog,
}

impl TestEnvironment {
    pub fn new(config: TckConfig) -> Self {
        Self {
            config,
            log: ViolationLog::new(),
        }
    }

    pub fn config(&self) -> &TckConfig {
        &self.config
    }

    pub fn default_timeout(&self) -> Duration {
        self.config.default_timeout
    }

    pub fn log(&self) -> &ViolationLog {
        &self.log
    }

    /// Record a violation detected off the test thread.
    pub fn flop(&self, violation: Violation) {
        self.log.record(violation);
    }

    pub fn clear_async_errors(&self) {
        self.log.clear();
    }

    pub fn async_errors(&self) -> Vec<Violation> {
        self.log.snapshot()
    }

    pub fn verify_no_async_errors(&self) -> Result<(), Violation> {
        self.log.assert_empty()
    }

    /// Subscribe `subscriber` to `publisher`, wait for its `on_subscribe` and
    /// check that nothing was flagged meanwhile.
    pub fn subscribe<T>(
        &self,
        publisher: &dyn Publisher<T>,
        subscriber: &Arc<ManualSubscriber<T>>,
    ) -> Result<(), Violation>
    where
        T: Element,
    {
        publisher.subscribe(subscriber.clone() as Arc<dyn Subscriber<T>>);
        subscriber.expect_subscription(self.default_timeout())?;
        self.verify_no_async_errors()
    }

    /// A fresh [`ManualSubscriber`] subscribed to `publisher`.
    pub fn new_manual_subscriber<T>(
        &self,
        publisher: &dyn Publisher<T>,
    ) -> Result<Arc<ManualSubscriber<T>>, Violation>
    where
        T: Element,
    {
        let subscriber = Arc::new(ManualSubscriber::new(self.clone()));
        self.subscribe(publisher, &subscriber)?;
        Ok(subscriber)
    }
}

impl Default for TestEnvironment {
    fn default() -> Self {
        Self::new(TckConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn test_log_is_shared_across_clones_and_threads() {
        let env = TestEnvironment::default();
        let remote = env.clone();
        thread::spawn(move || remote.flop(Violation::Protocol("off thread".into())))
            .join()
            .unwrap();

        let err = env.verify_no_async_errors().unwrap_err();
        assert!(matches!(err, Violation::Async(ref v) if v.len() == 1));
        // assert_empty keeps entries
        assert_eq!(env.log().len(), 1);

        let drained = env.log().drain();
        assert_eq!(drained, vec![Violation::Protocol("off thread".into())]);
        env.verify_no_async_errors().unwrap();
    }

    #[test]
    fn test_environments_are_independent() {
        let a = TestEnvironment::default();
        let b = TestEnvironment::default();
        a.flop(Violation::Mismatch("a".into()));
        assert!(b.verify_no_async_errors().is_ok());
        a.clear_async_errors();
        assert!(a.verify_no_async_errors().is_ok());
    }

    #[test]
    fn test_config_builders() {
        let config = TckConfig::default()
            .with_default_timeout(Duration::from_millis(250))
            .with_receptacle_capacity(8);
        assert_eq!(config.default_timeout, Duration::from_millis(250));
        assert_eq!(config.receptacle_capacity, 8);
    }
}
