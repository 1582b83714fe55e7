//! Scheduler collaborator contract for async projection dispatch.
//!
//! The core never executes deferred work itself: after a successful
//! append it resolves each registration's temporal context, builds a
//! [`ProjectionJob`], and hands it to the scheduler fire-and-forget.
//! Ordering beyond "enqueued after the triggering fact persisted" is the
//! scheduler's business.

use std::sync::Mutex;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::AppendError;
use crate::fact::{Fact, FactKind};

/// Scheduling options carried opaquely from registration to the
/// scheduler.
///
/// # Examples
///
/// ```
/// use std::time::Duration;
/// use factfold::ScheduleOptions;
///
/// let options = ScheduleOptions::default()
///     .with_queue("reports")
///     .with_wait(Duration::from_secs(300));
///
/// assert_eq!(options.queue.as_deref(), Some("reports"));
/// ```
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ScheduleOptions {
    /// Queue name to enqueue on.
    pub queue: Option<String>,
    /// Delay before the job becomes runnable.
    pub wait: Option<Duration>,
    /// Absolute instant before which the job must not run.
    pub wait_until: Option<DateTime<Utc>>,
}

impl ScheduleOptions {
    /// Set the queue name.
    pub fn with_queue(mut self, queue: impl Into<String>) -> Self {
        self.queue = Some(queue.into());
        self
    }

    /// Set a relative delay.
    pub fn with_wait(mut self, wait: Duration) -> Self {
        self.wait = Some(wait);
        self
    }

    /// Set an absolute earliest run time.
    pub fn with_wait_until(mut self, wait_until: DateTime<Utc>) -> Self {
        self.wait_until = Some(wait_until);
        self
    }
}

/// A deferred materialization request handed to the scheduler.
///
/// Carries the registered projection's name rather than the projection
/// itself; the executor resolves the name against its own registry when
/// the job runs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProjectionJob {
    /// Scheduling options from the registration.
    pub options: ScheduleOptions,
    /// Stream to materialize.
    pub stream_id: String,
    /// Registered projection name.
    pub projection: String,
    /// Knowledge boundary for the executor's stream load; `None` means
    /// "present at execution time".
    pub as_of: Option<DateTime<Utc>>,
    /// Validity-time context for the fold; `None` under the job-time
    /// strategy.
    pub at: Option<DateTime<Utc>>,
}

/// Deferred-task collaborator. Enqueue is fire-and-forget.
pub trait Scheduler: Send + Sync {
    /// Hand off a job for eventual execution.
    fn enqueue(&self, job: ProjectionJob);
}

/// How an async registration resolves the `at` it enqueues with.
pub enum TemporalContext<E> {
    /// The newly appended fact's `occurred_at` (the default).
    LastFactTime,
    /// Leave `at` unset; the executor folds with its own "now".
    JobTime,
    /// A caller-supplied function of the last fact. Returning `None`
    /// fails the append with an argument error.
    FromFact(Box<dyn Fn(&Fact<E>) -> Option<DateTime<Utc>> + Send + Sync>),
}

impl<E> Default for TemporalContext<E> {
    fn default() -> Self {
        TemporalContext::LastFactTime
    }
}

impl<E> std::fmt::Debug for TemporalContext<E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TemporalContext::LastFactTime => f.write_str("LastFactTime"),
            TemporalContext::JobTime => f.write_str("JobTime"),
            TemporalContext::FromFact(_) => f.write_str("FromFact(..)"),
        }
    }
}

impl<E: FactKind> TemporalContext<E> {
    /// Resolve the `at` value to enqueue with, given the fact that
    /// triggered the dispatch.
    ///
    /// # Errors
    ///
    /// [`AppendError::InvalidTemporalContext`] when a
    /// [`FromFact`](TemporalContext::FromFact) function returns no time
    /// value.
    pub(crate) fn resolve(
        &self,
        last_fact: &Fact<E>,
        projection: &str,
    ) -> Result<Option<DateTime<Utc>>, AppendError> {
        match self {
            TemporalContext::LastFactTime => Ok(last_fact.occurred_at()),
            TemporalContext::JobTime => Ok(None),
            TemporalContext::FromFact(f) => match f(last_fact) {
                Some(at) => Ok(Some(at)),
                None => Err(AppendError::InvalidTemporalContext {
                    projection: projection.to_string(),
                }),
            },
        }
    }
}

/// In-memory [`Scheduler`] that records every enqueued job.
///
/// Reference implementation and test double: assertions read the
/// captured jobs back with [`RecordingScheduler::jobs`].
#[derive(Debug, Default)]
pub struct RecordingScheduler {
    jobs: Mutex<Vec<ProjectionJob>>,
}

impl RecordingScheduler {
    /// Create an empty scheduler.
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of all jobs enqueued so far, in order.
    pub fn jobs(&self) -> Vec<ProjectionJob> {
        self.jobs.lock().expect("scheduler lock poisoned").clone()
    }
}

impl Scheduler for RecordingScheduler {
    fn enqueue(&self, job: ProjectionJob) {
        tracing::debug!(
            projection = %job.projection,
            stream_id = %job.stream_id,
            "async projection enqueued"
        );
        self.jobs.lock().expect("scheduler lock poisoned").push(job);
    }
}
