//! Periodic job scheduling seam.
//!
//! The connection manager only arms, re-periods and cancels its jobs; running
//! them is up to the host. [`JobQueue`] is a deadline queue the host drives
//! with explicit timestamps, which keeps it deterministic under test.
//!
//! The queue clock only moves when the host passes it a time, through
//! [`JobQueue::due`] or [`JobQueue::advance`]. Jobs armed in between count
//! their first deadline from the last time the host passed in.

use std::collections::BTreeMap;
use std::time::{Duration, Instant};

/// Deadline used when `from + period` does not fit in an `Instant`.
const FAR_FUTURE: Duration = Duration::from_secs(100 * 365 * 24 * 3600);

/// Periodic jobs owned by the connection manager.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Job {
    /// Live connection check.
    HealthPoll,
    /// Drain inbound module traffic.
    ReceivePump,
    /// Reconnect with backoff.
    Reconnect,
}

impl Job {
    /// Human readable job name.
    pub fn name(self) -> &'static str {
        match self {
            Self::HealthPoll => "LoRaWAN Connection",
            Self::ReceivePump => "LoRaWAN Receive",
            Self::Reconnect => "LoRaWAN Reconnect",
        }
    }
}

/// Periodic callback scheduler.
pub trait Scheduler {
    /// Arm `job` to run every `period`, counted from the scheduler's clock.
    /// Re-arming an armed job replaces its period.
    fn schedule(&mut self, job: Job, period: Duration);

    /// Disarm `job`. Cancelling a job that is not armed is a no-op.
    fn cancel(&mut self, job: Job);

    /// Current period of `job`, `None` when not armed.
    fn period(&self, job: Job) -> Option<Duration>;

    /// Whether `job` is armed.
    fn is_scheduled(&self, job: Job) -> bool {
        self.period(job).is_some()
    }
}

#[derive(Debug, Clone, Copy)]
struct Entry {
    period: Duration,
    next_due: Instant,
}

/// Deadline-based job queue.
#[derive(Debug)]
pub struct JobQueue {
    now: Instant,
    entries: BTreeMap<Job, Entry>,
}

impl Default for JobQueue {
    fn default() -> Self {
        Self::new(Instant::now())
    }
}

impl JobQueue {
    /// Create an empty queue whose clock starts at `now`.
    pub fn new(now: Instant) -> Self {
        Self {
            now,
            entries: BTreeMap::new(),
        }
    }

    /// Queue clock (last time passed to [`due`](Self::due) or
    /// [`advance`](Self::advance)).
    pub fn now(&self) -> Instant {
        self.now
    }

    /// Move the clock forward to `now` without running anything. Call it
    /// before arming jobs outside [`due`](Self::due), e.g. after a blocking
    /// connect.
    pub fn advance(&mut self, now: Instant) {
        if now > self.now {
            self.now = now;
        }
    }

    /// Next deadline of `job`.
    pub fn next_due(&self, job: Job) -> Option<Instant> {
        self.entries.get(&job).map(|e| e.next_due)
    }

    /// Earliest deadline across all armed jobs.
    pub fn next_deadline(&self) -> Option<Instant> {
        self.entries.values().map(|e| e.next_due).min()
    }

    /// Number of armed jobs.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// No job is armed.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Advance the clock to `now` and return the jobs that are due, earliest
    /// deadline first. Each returned job is re-armed one period after `now`.
    pub fn due(&mut self, now: Instant) -> Vec<Job> {
        self.advance(now);

        let mut due: Vec<(Instant, Job)> = self
            .entries
            .iter()
            .filter(|(_, e)| e.next_due <= self.now)
            .map(|(job, e)| (e.next_due, *job))
            .collect();
        due.sort();

        for (_, job) in &due {
            if let Some(entry) = self.entries.get_mut(job) {
                entry.next_due = deadline(self.now, entry.period);
            }
        }

        due.into_iter().map(|(_, job)| job).collect()
    }
}

impl Scheduler for JobQueue {
    fn schedule(&mut self, job: Job, period: Duration) {
        let next_due = deadline(self.now, period);
        self.entries.insert(job, Entry { period, next_due });
    }

    fn cancel(&mut self, job: Job) {
        self.entries.remove(&job);
    }

    fn period(&self, job: Job) -> Option<Duration> {
        self.entries.get(&job).map(|e| e.period)
    }
}

/// `from + period`, clamped for periods past the range of `Instant`.
fn deadline(from: Instant, period: Duration) -> Instant {
    from.checked_add(period)
        .or_else(|| from.checked_add(FAR_FUTURE))
        .unwrap_or(from)
}
