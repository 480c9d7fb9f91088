//! Timeout-bounded synchronization primitives.
//!
//! Three small building blocks turn callbacks arriving on arbitrary threads
//! into deterministic assertions on the test thread:
//! - [`Promise`]: a single-assignment cell with a blocking read
//! - [`Latch`]: a one-shot gate
//! - [`Receptacle`]: a bounded queue with an end-of-stream marker
//!
//! Writers never block. Every wait takes a timeout and a message, and fails
//! with [`Violation::Timeout`] when the deadline passes.

use std::collections::VecDeque;
use std::fmt::Debug;
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex, MutexGuard};

use crate::{SlotError, Violation};

/// Block on `cv` until `ready` holds or `timeout` elapses.
///
/// Returns false on timeout.
fn wait_until<S>(
    cv: &Condvar,
    guard: &mut MutexGuard<'_, S>,
    timeout: Duration,
    mut ready: impl FnMut(&S) -> bool,
) -> bool {
    let deadline = Instant::now() + timeout;
    while !ready(&**guard) {
        if cv.wait_until(guard, deadline).timed_out() {
            return ready(&**guard);
        }
    }
    true
}

// =============================================================================
// Promise
// =============================================================================

/// Condvar-guarded state shared by [`Promise`] and [`Latch`].
struct Cell<S> {
    value: Mutex<S>,
    cv: Condvar,
}

/// Single-assignment value. Clones share the same cell.
pub struct Promise<T> {
    cell: Arc<Cell<Option<T>>>,
}

impl<T> Clone for Promise<T> {
    fn clone(&self) -> Self {
        Self {
            cell: self.cell.clone(),
        }
    }
}

impl<T: Clone> Promise<T> {
    pub fn new() -> Self {
        Self {
            cell: Arc::new(Cell {
                value: Mutex::new(None),
                cv: Condvar::new(),
            }),
        }
    }

    /// A promise that is already completed with `value`.
    pub fn completed(value: T) -> Self {
        let promise = Self::new();
        *promise.cell.value.lock() = Some(value);
        promise
    }

    /// Set the value. Fails if a value was already set; the first value wins.
    pub fn complete(&self, value: T) -> Result<(), SlotError> {
        let mut slot = self.cell.value.lock();
        if slot.is_some() {
            return Err(SlotError::AlreadyCompleted);
        }
        *slot = Some(value);
        self.cell.cv.notify_all();
        Ok(())
    }

    pub fn is_completed(&self) -> bool {
        self.cell.value.lock().is_some()
    }

    pub fn value(&self) -> Option<T> {
        self.cell.value.lock().clone()
    }

    /// Wait for the value.
    pub fn expect_completion(&self, timeout: Duration, message: &str) -> Result<T, Violation> {
        let mut slot = self.cell.value.lock();
        if wait_until(&self.cell.cv, &mut slot, timeout, Option::is_some) {
            if let Some(value) = slot.as_ref() {
                return Ok(value.clone());
            }
        }
        Err(Violation::timeout(message, timeout))
    }
}

impl<T: Clone> Default for Promise<T> {
    fn default() -> Self {
        Self::new()
    }
}

// =============================================================================
// Latch
// =============================================================================

/// One-shot gate. Clones share the same gate.
#[derive(Clone)]
pub struct Latch {
    cell: Arc<Cell<bool>>,
}

impl Latch {
    pub fn new() -> Self {
        Self {
            cell: Arc::new(Cell {
                value: Mutex::new(false),
                cv: Condvar::new(),
            }),
        }
    }

    /// Close the gate. Closing twice is harmless.
    pub fn close(&self) {
        *self.cell.value.lock() = true;
        self.cell.cv.notify_all();
    }

    pub fn is_closed(&self) -> bool {
        *self.cell.value.lock()
    }

    pub fn expect_close(&self, timeout: Duration, message: &str) -> Result<(), Violation> {
        let mut closed = self.cell.value.lock();
        if wait_until(&self.cell.cv, &mut closed, timeout, |c| *c) {
            Ok(())
        } else {
            Err(Violation::timeout(message, timeout))
        }
    }

    pub fn assert_open(&self, message: &str) -> Result<(), Violation> {
        if self.is_closed() {
            Err(Violation::Protocol(message.to_string()))
        } else {
            Ok(())
        }
    }
}

impl Default for Latch {
    fn default() -> Self {
        Self::new()
    }
}

// =============================================================================
// Receptacle
// =============================================================================

#[derive(Debug, Clone, PartialEq, Eq)]
enum Entry<T> {
    Element(T),
    End,
}

struct Queue<T> {
    entries: VecDeque<Entry<T>>,
    completed: bool,
}

/// Bounded queue of elements followed by at most one end-of-stream marker.
///
/// The marker is never consumed: once reached, every subsequent read sees it.
pub struct Receptacle<T> {
    queue: Arc<(Mutex<Queue<T>>, Condvar)>,
    capacity: usize,
}

impl<T> Clone for Receptacle<T> {
    fn clone(&self) -> Self {
        Self {
            queue: self.queue.clone(),
            capacity: self.capacity,
        }
    }
}

/// Default receptacle capacity: twice the test buffer size of 16.
pub const DEFAULT_RECEPTACLE_CAPACITY: usize = 32;

impl<T: Debug> Receptacle<T> {
    pub fn new(capacity: usize) -> Self {
        Self {
            queue: Arc::new((
                Mutex::new(Queue {
                    entries: VecDeque::with_capacity(capacity),
                    completed: false,
                }),
                Condvar::new(),
            )),
            capacity,
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Append an element.
    ///
    /// Fails with `Overflow` when full and `AlreadyCompleted` after the
    /// end-of-stream marker.
    pub fn add(&self, value: T) -> Result<(), SlotError> {
        let (lock, cv) = &*self.queue;
        let mut queue = lock.lock();
        if queue.completed {
            return Err(SlotError::AlreadyCompleted);
        }
        if queue.entries.len() >= self.capacity {
            return Err(SlotError::Overflow(self.capacity));
        }
        queue.entries.push_back(Entry::Element(value));
        cv.notify_all();
        Ok(())
    }

    /// Append the end-of-stream marker. Fails if already completed.
    pub fn complete(&self) -> Result<(), SlotError> {
        let (lock, cv) = &*self.queue;
        let mut queue = lock.lock();
        if queue.completed {
            return Err(SlotError::AlreadyCompleted);
        }
        queue.completed = true;
        queue.entries.push_back(Entry::End);
        cv.notify_all();
        Ok(())
    }

    pub fn is_completed(&self) -> bool {
        self.queue.0.lock().completed
    }

    /// Number of queued elements, not counting the end marker.
    pub fn len(&self) -> usize {
        let queue = self.queue.0.lock();
        queue
            .entries
            .iter()
            .filter(|e| matches!(e, Entry::Element(_)))
            .count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Take the next element.
    pub fn next(&self, timeout: Duration, message: &str) -> Result<T, Violation> {
        let (lock, cv) = &*self.queue;
        let mut queue = lock.lock();
        if !wait_until(cv, &mut queue, timeout, |q| !q.entries.is_empty()) {
            return Err(Violation::timeout(message, timeout));
        }
        match queue.entries.front() {
            Some(Entry::End) => Err(Violation::Mismatch(format!(
                "Expected element but got end-of-stream ({message})"
            ))),
            _ => match queue.entries.pop_front() {
                Some(Entry::Element(value)) => Ok(value),
                _ => Err(Violation::timeout(message, timeout)),
            },
        }
    }

    /// Take up to `n` elements, waiting at most `timeout` for each.
    pub fn next_n(&self, n: usize, timeout: Duration, message: &str) -> Result<Vec<T>, Violation> {
        (0..n).map(|_| self.next(timeout, message)).collect()
    }

    /// Wait for the end-of-stream marker.
    ///
    /// An element found in its place is consumed and reported as a mismatch.
    pub fn expect_completion(&self, timeout: Duration, message: &str) -> Result<(), Violation> {
        let (lock, cv) = &*self.queue;
        let mut queue = lock.lock();
        if !wait_until(cv, &mut queue, timeout, |q| !q.entries.is_empty()) {
            return Err(Violation::timeout(message, timeout));
        }
        match queue.entries.front() {
            Some(Entry::End) => Ok(()),
            _ => match queue.entries.pop_front() {
                Some(Entry::Element(value)) => Err(Violation::Mismatch(format!(
                    "Expected end-of-stream but got element [{value:?}] ({message})"
                ))),
                _ => Err(Violation::timeout(message, timeout)),
            },
        }
    }

    /// Assert nothing arrives within `within`. Returns early on arrival.
    pub fn expect_none(&self, within: Duration, message: &str) -> Result<(), Violation> {
        let (lock, cv) = &*self.queue;
        let mut queue = lock.lock();
        if !wait_until(cv, &mut queue, within, |q| {
            q.entries.iter().any(|e| matches!(e, Entry::Element(_))) || q.completed
        }) {
            return Ok(());
        }
        if let Some(pos) = queue
            .entries
            .iter()
            .position(|e| matches!(e, Entry::Element(_)))
        {
            if let Some(Entry::Element(value)) = queue.entries.remove(pos) {
                return Err(Violation::Oversupply(format!(
                    "{message}: expected no element but got [{value:?}]"
                )));
            }
        }
        Err(Violation::Mismatch(format!(
            "{message}: expected no element but got onComplete"
        )))
    }
}
