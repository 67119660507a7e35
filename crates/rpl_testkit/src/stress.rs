//! Stress tests for log stores and the replication driver.
//!
//! These helpers drive heavy and concurrent access and report throughput.

use rpl_core::{Log, LogStore, Replication};
use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

/// Outcome of one stress run: how many records went through and how fast.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StressReport {
    /// Records stored, read or applied without error.
    pub done: usize,
    /// Records whose operation failed.
    pub failed: usize,
    /// Wall time of the run.
    pub elapsed: Duration,
}

impl StressReport {
    fn finish(done: usize, failed: usize, started: Instant) -> Self {
        Self {
            done,
            failed,
            elapsed: started.elapsed(),
        }
    }

    /// Records per second, counting failures too.
    #[must_use]
    pub fn records_per_sec(&self) -> f64 {
        let secs = self.elapsed.as_secs_f64();
        if secs == 0.0 {
            return 0.0;
        }
        (self.done + self.failed) as f64 / secs
    }
}

impl fmt::Display for StressReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} records ({} failed) in {:?}, {:.0} records/s",
            self.done,
            self.failed,
            self.elapsed,
            self.records_per_sec()
        )
    }
}

/// Shape of the load a stress run applies.
#[derive(Debug, Clone, Copy)]
pub struct StressLoad {
    /// Records to append, read or apply.
    pub records: usize,
    /// Reader threads for [`stress_concurrent_reads`].
    pub readers: usize,
    /// Payload bytes per record.
    pub payload_size: usize,
    /// Records per `store_logs` call in [`stress_batched_appends`].
    pub batch_size: usize,
}

impl Default for StressLoad {
    fn default() -> Self {
        Self {
            records: 10_000,
            readers: 4,
            payload_size: 256,
            batch_size: 16,
        }
    }
}

/// Appends `load.records` records in batches after the current last ID.
pub fn stress_batched_appends(store: &dyn LogStore, load: &StressLoad) -> StressReport {
    let data = vec![0xABu8; load.payload_size];
    let batch_size = load.batch_size.max(1);

    let started = Instant::now();
    let mut done = 0usize;
    let mut failed = 0usize;

    let mut next = store.last_id().unwrap_or(0) + 1;
    let mut remaining = load.records;
    while remaining > 0 {
        let len = remaining.min(batch_size);
        let batch: Vec<Log> = (0..len as u64)
            .map(|i| Log::new(next + i, data.clone()))
            .collect();

        match store.store_logs(&batch) {
            Ok(()) => {
                done += len;
                next += len as u64;
            }
            Err(_) => failed += len,
        }
        remaining -= len;
    }

    StressReport::finish(done, failed, started)
}

/// Reads stored IDs from `load.readers` threads at once.
pub fn stress_concurrent_reads(store: Arc<dyn LogStore>, load: &StressLoad) -> StressReport {
    let first = store.first_id().unwrap_or(0);
    let last = store.last_id().unwrap_or(0);
    let span = if first == 0 { 0 } else { last - first + 1 };

    let done = Arc::new(AtomicUsize::new(0));
    let failed = Arc::new(AtomicUsize::new(0));
    let per_reader = load.records / load.readers.max(1);

    let started = Instant::now();

    let handles: Vec<_> = (0..load.readers)
        .map(|t| {
            let store = Arc::clone(&store);
            let done = Arc::clone(&done);
            let failed = Arc::clone(&failed);

            thread::spawn(move || {
                for i in 0..per_reader {
                    if span == 0 {
                        break;
                    }
                    // stride through the range so threads hit different tables
                    let id = first + ((t * per_reader + i) as u64 * 7919) % span;
                    match store.get_log(id) {
                        Ok(log) if log.id == id => {
                            done.fetch_add(1, Ordering::Relaxed);
                        }
                        _ => {
                            failed.fetch_add(1, Ordering::Relaxed);
                        }
                    }
                }
            })
        })
        .collect();

    for handle in handles {
        handle.join().expect("reader thread panicked");
    }

    StressReport::finish(
        done.load(Ordering::Relaxed),
        failed.load(Ordering::Relaxed),
        started,
    )
}

/// One producer appends through [`Replication::log`] while one consumer
/// follows the commit cursor, sleeping on [`Replication::wait_log`].
///
/// The consumer subscribes before draining, so a wait that times out means
/// a wakeup was missed; it is counted as a failure and ends the run.
pub fn stress_producer_consumer(rpl: &Replication, load: &StressLoad) -> StressReport {
    let target = rpl.last_log_id().unwrap_or(0) + load.records as u64;
    let data = vec![0x5Au8; load.payload_size];
    let started = Instant::now();

    thread::scope(|scope| {
        let producer = scope.spawn(|| {
            (0..load.records)
                .filter(|_| rpl.log(&data).is_err())
                .count()
        });

        let mut applied = 0usize;
        let mut failed = 0usize;
        while rpl.last_commit_id().unwrap_or(0) < target {
            let waiter = rpl.wait_log();
            while let Ok(log) = rpl.next_need_commit_log() {
                if rpl.update_commit_id(log.id).is_err() {
                    failed += 1;
                    break;
                }
                applied += 1;
            }
            if rpl.last_commit_id().unwrap_or(0) >= target {
                break;
            }
            if !waiter.wait_timeout(Duration::from_secs(5)) {
                failed += 1;
                break;
            }
        }

        let producer_failed = producer.join().expect("producer thread panicked");
        StressReport::finish(applied, failed + producer_failed, started)
    })
}
