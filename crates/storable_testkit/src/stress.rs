//! Stress tests for Storable.
//!
//! These helpers drive managers under heavy load and concurrent access.
//! Every helper counts failures instead of panicking, so callers assert on
//! the [`StressTestResult`].

use crate::fixtures::User;
use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};
use storable_core::{BackendRegistry, CoreError, CoreResult, Manager, Record};

/// Manager operations the stress helpers issue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum OpKind {
    /// `create`.
    Create,
    /// `fetch` by primary key.
    Fetch,
    /// `patch` by primary key.
    Patch,
    /// `contains` by primary key.
    Contains,
}

/// Outcomes of one operation kind.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct OpTally {
    /// Calls that returned the expected result.
    pub ok: usize,
    /// Calls that failed.
    pub failed: usize,
}

/// Per-kind tallies gathered by one thread.
#[derive(Debug, Clone, Default)]
pub struct OpCounter {
    tallies: BTreeMap<OpKind, OpTally>,
}

impl OpCounter {
    /// Records one call. `NotFound` counts as a success: the stress sets
    /// address keys that may legitimately be gone.
    pub fn record<T>(&mut self, kind: OpKind, result: &CoreResult<T>) {
        let tally = self.tallies.entry(kind).or_default();
        match result {
            Ok(_) | Err(CoreError::NotFound { .. }) => tally.ok += 1,
            Err(_) => tally.failed += 1,
        }
    }

    /// Records `count` calls of `kind` that could not be issued.
    pub fn fail_many(&mut self, kind: OpKind, count: usize) {
        self.tallies.entry(kind).or_default().failed += count;
    }

    /// Adds another counter's tallies to this one.
    pub fn merge(&mut self, other: OpCounter) {
        for (kind, tally) in other.tallies {
            let mine = self.tallies.entry(kind).or_default();
            mine.ok += tally.ok;
            mine.failed += tally.failed;
        }
    }

    /// Freezes the tallies into a result.
    pub fn finish(self, duration: Duration) -> StressTestResult {
        StressTestResult::new(self.tallies, duration)
    }
}

/// Result of a stress test run.
#[derive(Debug, Clone, Serialize)]
pub struct StressTestResult {
    /// Outcomes per operation kind.
    pub per_op: BTreeMap<OpKind, OpTally>,
    /// Calls that succeeded, all kinds together.
    pub successful_ops: usize,
    /// Calls that failed, all kinds together.
    pub failed_ops: usize,
    /// Wall time of the run.
    pub duration: Duration,
    /// Calls per second.
    pub ops_per_second: f64,
}

impl StressTestResult {
    /// Builds a result from per-kind tallies.
    pub fn new(per_op: BTreeMap<OpKind, OpTally>, duration: Duration) -> Self {
        let successful_ops = per_op.values().map(|t| t.ok).sum();
        let failed_ops = per_op.values().map(|t| t.failed).sum();
        let seconds = duration.as_secs_f64();
        let ops_per_second = if seconds > 0.0 {
            (successful_ops + failed_ops) as f64 / seconds
        } else {
            0.0
        };
        Self {
            per_op,
            successful_ops,
            failed_ops,
            duration,
            ops_per_second,
        }
    }

    /// All calls issued.
    pub fn total_ops(&self) -> usize {
        self.successful_ops + self.failed_ops
    }

    /// Tally of one kind; zero if the run never issued it.
    pub fn tally(&self, kind: OpKind) -> OpTally {
        self.per_op.get(&kind).copied().unwrap_or_default()
    }

    /// Renders the result as JSON, for collecting runs across builds.
    pub fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_default()
    }
}

impl fmt::Display for StressTestResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "{} calls in {:?} ({:.0}/s), {} failed",
            self.total_ops(),
            self.duration,
            self.ops_per_second,
            self.failed_ops
        )?;
        for (kind, tally) in &self.per_op {
            writeln!(f, "  {kind:?}: {} ok, {} failed", tally.ok, tally.failed)?;
        }
        Ok(())
    }
}

/// Configuration for stress tests.
#[derive(Debug, Clone)]
pub struct StressConfig {
    /// Number of operations to perform.
    pub operations: usize,
    /// Number of concurrent threads (for concurrent tests).
    pub threads: usize,
    /// Length of each user's display name.
    pub entity_size: usize,
    /// Number of distinct entities.
    pub entity_count: usize,
}

impl Default for StressConfig {
    fn default() -> Self {
        Self {
            operations: 10_000,
            threads: 4,
            entity_size: 256,
            entity_count: 1_000,
        }
    }
}

fn sized_user(handle: String, size: usize) -> User {
    let mut user = User::named(&handle);
    user.name = Some("x".repeat(size));
    user
}

/// Populates `count` users named `user-0..count`, returning how many landed.
fn populate(manager: &Manager, config: &StressConfig) -> usize {
    (0..config.entity_count)
        .filter(|i| manager.create(sized_user(format!("user-{i}"), config.entity_size)).is_ok())
        .count()
}

/// Run a sequential create stress test.
pub fn stress_sequential_creates(manager: &Manager, config: &StressConfig) -> StressTestResult {
    let start = Instant::now();
    let mut counter = OpCounter::default();
    for i in 0..config.operations {
        counter.record(
            OpKind::Create,
            &manager.create(sized_user(format!("seq-{i}"), config.entity_size)),
        );
    }
    counter.finish(start.elapsed())
}

/// Run a mixed fetch / patch / contains stress test over a populated set.
pub fn stress_mixed_operations(manager: &Manager, config: &StressConfig) -> StressTestResult {
    populate(manager, config);

    let start = Instant::now();
    let mut counter = OpCounter::default();
    for i in 0..config.operations {
        let email = format!("user-{}@example.com", i % config.entity_count.max(1));
        let key = [email.as_str()];
        match i % 3 {
            0 => counter.record(OpKind::Fetch, &manager.fetch::<User, _, _>(key)),
            1 => counter.record(
                OpKind::Patch,
                &manager.patch::<User, _, _>(key, Record::new().with("age", i as i32)),
            ),
            _ => counter.record(OpKind::Contains, &manager.contains::<User, _, _>(key)),
        }
    }
    counter.finish(start.elapsed())
}

/// Run a concurrent read stress test, one manager per thread.
pub fn stress_concurrent_reads(registry: Arc<BackendRegistry>, config: &StressConfig) -> StressTestResult {
    let ops_per_thread = config.operations / config.threads.max(1);
    match registry.manager() {
        Ok(manager) => {
            populate(&manager, config);
        }
        Err(_) => {
            let mut counter = OpCounter::default();
            counter.fail_many(OpKind::Fetch, ops_per_thread * config.threads);
            return counter.finish(Duration::ZERO);
        }
    }

    let start = Instant::now();
    let handles: Vec<_> = (0..config.threads)
        .map(|t| {
            let registry = Arc::clone(&registry);
            let entity_count = config.entity_count.max(1);

            thread::spawn(move || {
                let mut counter = OpCounter::default();
                let Ok(manager) = registry.manager() else {
                    counter.fail_many(OpKind::Fetch, ops_per_thread);
                    return counter;
                };
                for i in 0..ops_per_thread {
                    let email = format!("user-{}@example.com", (t * ops_per_thread + i) % entity_count);
                    counter.record(OpKind::Fetch, &manager.fetch::<User, _, _>([email.as_str()]));
                }
                counter
            })
        })
        .collect();

    join_counters(handles).finish(start.elapsed())
}

/// Run a concurrent create stress test, one manager per thread.
///
/// Every thread writes distinct users, so every create should succeed.
pub fn stress_concurrent_creates(registry: Arc<BackendRegistry>, config: &StressConfig) -> StressTestResult {
    let ops_per_thread = config.operations / config.threads.max(1);

    let start = Instant::now();
    let handles: Vec<_> = (0..config.threads)
        .map(|t| {
            let registry = Arc::clone(&registry);
            let size = config.entity_size;

            thread::spawn(move || {
                let mut counter = OpCounter::default();
                let Ok(manager) = registry.manager() else {
                    counter.fail_many(OpKind::Create, ops_per_thread);
                    return counter;
                };
                for i in 0..ops_per_thread {
                    counter.record(OpKind::Create, &manager.create(sized_user(format!("t{t}-{i}"), size)));
                }
                counter
            })
        })
        .collect();

    join_counters(handles).finish(start.elapsed())
}

fn join_counters(handles: Vec<thread::JoinHandle<OpCounter>>) -> OpCounter {
    let mut total = OpCounter::default();
    for handle in handles {
        if let Ok(counter) = handle.join() {
            total.merge(counter);
        }
    }
    total
}

/// Outcome of [`stress_transaction_contention`].
#[derive(Debug, Clone, Default, Serialize)]
pub struct ContentionResult {
    /// `begin` calls that won.
    pub begun: usize,
    /// `begin` calls refused because a transaction was in progress.
    pub refused: usize,
    /// Any other failure.
    pub errors: usize,
    /// Most transactions ever observed in progress at once.
    pub max_concurrent: usize,
}

/// Many threads race to begin a transaction on one shared manager.
///
/// Winners hold the transaction briefly, then commit it. A correct manager
/// never lets `max_concurrent` exceed one.
pub fn stress_transaction_contention(manager: Arc<Manager>, config: &StressConfig) -> ContentionResult {
    let begun = Arc::new(AtomicUsize::new(0));
    let refused = Arc::new(AtomicUsize::new(0));
    let errors = Arc::new(AtomicUsize::new(0));
    let in_progress = Arc::new(AtomicUsize::new(0));
    let max_concurrent = Arc::new(AtomicUsize::new(0));
    let attempts = config.operations / config.threads.max(1);

    let handles: Vec<_> = (0..config.threads)
        .map(|_| {
            let manager = Arc::clone(&manager);
            let begun = Arc::clone(&begun);
            let refused = Arc::clone(&refused);
            let errors = Arc::clone(&errors);
            let in_progress = Arc::clone(&in_progress);
            let max_concurrent = Arc::clone(&max_concurrent);

            thread::spawn(move || {
                for _ in 0..attempts {
                    match manager.begin() {
                        Ok(txn) => {
                            let now = in_progress.fetch_add(1, Ordering::SeqCst) + 1;
                            max_concurrent.fetch_max(now, Ordering::SeqCst);
                            begun.fetch_add(1, Ordering::Relaxed);
                            thread::yield_now();
                            in_progress.fetch_sub(1, Ordering::SeqCst);
                            if manager.commit(&txn).is_err() {
                                errors.fetch_add(1, Ordering::Relaxed);
                            }
                        }
                        Err(CoreError::IllegalState { .. }) => {
                            refused.fetch_add(1, Ordering::Relaxed);
                        }
                        Err(_) => {
                            errors.fetch_add(1, Ordering::Relaxed);
                        }
                    }
                }
            })
        })
        .collect();

    for handle in handles {
        let _ = handle.join();
    }

    ContentionResult {
        begun: begun.load(Ordering::Relaxed),
        refused: refused.load(Ordering::Relaxed),
        errors: errors.load(Ordering::Relaxed),
        max_concurrent: max_concurrent.load(Ordering::SeqCst),
    }
}
