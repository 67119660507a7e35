//! Background worker threads with deterministic shutdown.

use parking_lot::{Condvar, Mutex};
use std::io;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

#[derive(Debug, Default)]
struct StopSignal {
    stopped: Mutex<bool>,
    cond: Condvar,
}

/// A named thread that runs a job every `tick` until stopped.
///
/// `stop` wakes the thread immediately (it does not wait out the current
/// tick) and joins it, so no job runs after `stop` returns.
#[derive(Debug)]
pub(crate) struct Worker {
    signal: Arc<StopSignal>,
    handle: Option<JoinHandle<()>>,
}

impl Worker {
    /// Spawns the worker thread.
    pub(crate) fn spawn<F>(name: &str, tick: Duration, mut job: F) -> io::Result<Self>
    where
        F: FnMut() + Send + 'static,
    {
        let signal = Arc::new(StopSignal::default());
        let thread_signal = Arc::clone(&signal);

        let handle = thread::Builder::new()
            .name(name.to_string())
            .spawn(move || loop {
                {
                    let mut stopped = thread_signal.stopped.lock();
                    if !*stopped {
                        thread_signal.cond.wait_for(&mut stopped, tick);
                    }
                    if *stopped {
                        return;
                    }
                }
                job();
            })?;

        Ok(Self {
            signal,
            handle: Some(handle),
        })
    }

    /// Signals the thread and waits for it to exit. Idempotent.
    pub(crate) fn stop(&mut self) {
        {
            let mut stopped = self.signal.stopped.lock();
            *stopped = true;
            self.signal.cond.notify_all();
        }

        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

impl Drop for Worker {
    fn drop(&mut self) {
        self.stop();
    }
}
