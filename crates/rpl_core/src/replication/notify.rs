//! Broadcast-once wakeups for log appends.
//!
//! Every append bumps a generation counter and wakes all waiters. A waiter
//! remembers the generation it subscribed at and is ready as soon as the
//! counter moves past it, so an append that races with `subscribe` is never
//! missed and an append that finished before `subscribe` is never reported.

use parking_lot::{Condvar, Mutex};
use std::sync::Arc;
use std::time::{Duration, Instant};

#[derive(Debug, Default)]
struct NotifyState {
    generation: u64,
    closed: bool,
}

#[derive(Debug, Default)]
pub(crate) struct Notifier {
    state: Mutex<NotifyState>,
    cond: Condvar,
}

impl Notifier {
    pub(crate) fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub(crate) fn subscribe(self: &Arc<Self>) -> LogWaiter {
        let generation = self.state.lock().generation;
        LogWaiter {
            notifier: Arc::clone(self),
            generation,
        }
    }

    pub(crate) fn notify(&self) {
        let mut state = self.state.lock();
        state.generation = state.generation.wrapping_add(1);
        self.cond.notify_all();
    }

    /// Wakes every waiter for good; later waits return immediately.
    pub(crate) fn close(&self) {
        let mut state = self.state.lock();
        state.closed = true;
        self.cond.notify_all();
    }
}

/// Subscription returned by [`crate::Replication::wait_log`].
///
/// Ready once at least one log has been appended after the subscription.
#[derive(Debug)]
pub struct LogWaiter {
    notifier: Arc<Notifier>,
    generation: u64,
}

impl LogWaiter {
    /// Returns true if a log was appended since this waiter was created.
    #[must_use]
    pub fn is_ready(&self) -> bool {
        self.notifier.state.lock().generation != self.generation
    }

    /// Blocks until a log is appended.
    ///
    /// Returns `false` if replication was closed first.
    pub fn wait(&self) -> bool {
        let mut state = self.notifier.state.lock();
        while state.generation == self.generation && !state.closed {
            self.notifier.cond.wait(&mut state);
        }
        state.generation != self.generation
    }

    /// Blocks until a log is appended or `timeout` passes.
    ///
    /// Returns `true` if a log was appended.
    pub fn wait_timeout(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut state = self.notifier.state.lock();
        while state.generation == self.generation && !state.closed {
            if self
                .notifier
                .cond
                .wait_until(&mut state, deadline)
                .timed_out()
            {
                break;
            }
        }
        state.generation != self.generation
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn waiter_sees_later_notify_only() {
        let notifier = Notifier::new();
        notifier.notify();

        let waiter = notifier.subscribe();
        assert!(!waiter.is_ready());
        assert!(!waiter.wait_timeout(Duration::from_millis(10)));

        notifier.notify();
        assert!(waiter.is_ready());
        assert!(waiter.wait());
        assert!(waiter.wait_timeout(Duration::ZERO));
    }

    #[test]
    fn one_notify_wakes_every_waiter() {
        let notifier = Notifier::new();
        let handles: Vec<_> = (0..4)
            .map(|_| {
                let waiter = notifier.subscribe();
                thread::spawn(move || waiter.wait_timeout(Duration::from_secs(5)))
            })
            .collect();

        thread::sleep(Duration::from_millis(20));
        notifier.notify();

        for handle in handles {
            assert!(handle.join().unwrap());
        }
    }

    #[test]
    fn close_releases_waiters() {
        let notifier = Notifier::new();
        let waiter = notifier.subscribe();
        let handle = thread::spawn(move || waiter.wait());

        thread::sleep(Duration::from_millis(20));
        notifier.close();
        assert!(!handle.join().unwrap());

        let late = notifier.subscribe();
        assert!(!late.wait());
    }
}
