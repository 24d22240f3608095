use std::fmt::{Display, Formatter};
use std::str::FromStr;

use chrono::{DateTime, Utc};
use derive_builder::Builder;
use getset::Getters;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use thiserror::Error;
use uuid::Uuid;

/// Identifier of a job. Generated as a UUIDv7 so ids sort by creation time.
pub type JobId = Uuid;

/// Default ceiling on execution attempts when the producer does not set one.
pub const DEFAULT_MAX_ATTEMPTS: i32 = 3;

/// Lifecycle state of a job.
///
/// The only valid transitions are:
///
/// ```text
/// pending ──lease──▶ processing ──success──▶ completed
///    ▲                  │  │
///    └──retryable fail──┘  └──exhausted / fatal──▶ failed
///    ▲                                               │
///    └───────────────── operator retry ──────────────┘
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    /// Waiting to be leased
    Pending,
    /// Leased by a worker, handler running
    Processing,
    /// Handler succeeded. Terminal.
    Completed,
    /// Attempts exhausted or fatal error. Only an operator can move it back to pending.
    Failed,
}

impl JobStatus {
    pub const ALL: [JobStatus; 4] = [
        JobStatus::Pending,
        JobStatus::Processing,
        JobStatus::Completed,
        JobStatus::Failed,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Pending => "pending",
            JobStatus::Processing => "processing",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
        }
    }

    /// Whether the job will never be picked up again without operator action.
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStatus::Completed | JobStatus::Failed)
    }

    /// Whether `self -> next` is an edge of the state machine.
    ///
    /// `processing -> processing` is the reclaim of an expired lease.
    pub fn can_transition_to(&self, next: JobStatus) -> bool {
        use JobStatus::*;
        matches!(
            (self, next),
            (Pending, Processing)
                | (Processing, Processing)
                | (Processing, Completed)
                | (Processing, Pending)
                | (Processing, Failed)
                | (Failed, Pending)
        )
    }
}

impl Display for JobStatus {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("Unknown job status '{0}'")]
pub struct ParseJobStatusError(pub String);

impl FromStr for JobStatus {
    type Err = ParseJobStatusError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(JobStatus::Pending),
            "processing" => Ok(JobStatus::Processing),
            "completed" => Ok(JobStatus::Completed),
            "failed" => Ok(JobStatus::Failed),
            other => Err(ParseJobStatusError(other.to_string())),
        }
    }
}

impl TryFrom<String> for JobStatus {
    type Error = ParseJobStatusError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

/// A job as stored in the `jobs` table.
#[derive(FromRow, Getters, Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Builder)]
#[getset(get = "pub")]
#[builder(build_fn(private, name = "build_internal"), pattern = "owned")]
pub struct Job {
    /// Unique identifier, immutable
    #[builder(default = "Uuid::now_v7()")]
    id: JobId,
    /// Selects the handler
    #[builder(setter(into))]
    job_type: String,
    /// Handler specific data. Never mutated after insert.
    #[builder(default = "serde_json::json!({})")]
    payload: serde_json::Value,
    #[sqlx(try_from = "String")]
    #[builder(default = "JobStatus::Pending")]
    status: JobStatus,
    /// Number of attempts consumed so far (incremented when a lease is taken)
    #[builder(default)]
    attempts: i32,
    /// Attempts allowed before the job is failed for good
    #[builder(default = "DEFAULT_MAX_ATTEMPTS")]
    max_attempts: i32,
    /// The job is not leased before this instant
    #[builder(default = "Utc::now()")]
    scheduled_for: DateTime<Utc>,
    /// While in the future, the job belongs to `locked_by`
    #[builder(default, setter(strip_option))]
    locked_until: Option<DateTime<Utc>>,
    /// Worker owning the current lease
    #[builder(default, setter(strip_option, into))]
    locked_by: Option<String>,
    /// Most recent failure reason
    #[builder(default, setter(strip_option, into))]
    last_error: Option<String>,
    /// Idempotency key, unique across jobs
    #[builder(default, setter(strip_option, into))]
    key: Option<String>,
    #[builder(default = "Utc::now()")]
    created_at: DateTime<Utc>,
    #[builder(default = "Utc::now()")]
    updated_at: DateTime<Utc>,
    /// Set only when the job completes successfully
    #[builder(default, setter(strip_option))]
    completed_at: Option<DateTime<Utc>>,
}

impl Job {
    pub fn builder() -> JobBuilder {
        JobBuilder::default()
    }

    /// Whether another failure of this job should be retried automatically.
    pub fn has_attempts_left(&self) -> bool {
        self.attempts < self.max_attempts
    }

    /// Whether the job is leased at `now`.
    pub fn is_locked_at(&self, now: DateTime<Utc>) -> bool {
        self.locked_until.is_some_and(|until| until > now)
    }

    /// Whether a worker may lease the job at `now`.
    pub fn is_leasable_at(&self, now: DateTime<Utc>) -> bool {
        if self.status.is_terminal() || self.scheduled_for > now || self.is_locked_at(now) {
            return false;
        }
        match self.status {
            // Expired lease of a crashed worker
            JobStatus::Processing => self.locked_until.is_some() && self.has_attempts_left(),
            _ => true,
        }
    }

    /// Whether the job is owned by `worker_id` and still running.
    pub fn is_owned_by(&self, worker_id: &str) -> bool {
        self.status == JobStatus::Processing && self.locked_by.as_deref() == Some(worker_id)
    }

    /// Moves the job into `processing` for `worker_id` until `locked_until`.
    pub fn lease(&mut self, worker_id: &str, now: DateTime<Utc>, locked_until: DateTime<Utc>) {
        self.set_status(JobStatus::Processing);
        self.attempts += 1;
        self.locked_by = Some(worker_id.to_string());
        self.locked_until = Some(locked_until);
        self.updated_at = now;
    }

    /// `processing -> completed`
    pub fn complete(&mut self, now: DateTime<Utc>) {
        self.set_status(JobStatus::Completed);
        self.locked_by = None;
        self.locked_until = None;
        self.completed_at = Some(now);
        self.updated_at = now;
    }

    /// `processing -> pending`, runnable again at `scheduled_for`.
    pub fn reschedule(&mut self, error: &str, now: DateTime<Utc>, scheduled_for: DateTime<Utc>) {
        self.set_status(JobStatus::Pending);
        self.locked_by = None;
        self.locked_until = None;
        self.last_error = Some(error.to_string());
        self.scheduled_for = scheduled_for;
        self.updated_at = now;
    }

    /// `processing -> failed`
    pub fn fail(&mut self, error: &str, now: DateTime<Utc>) {
        self.set_status(JobStatus::Failed);
        self.locked_by = None;
        self.locked_until = None;
        self.last_error = Some(error.to_string());
        self.updated_at = now;
    }

    /// Operator retry: `failed -> pending`, keeping the attempt count.
    pub fn requeue(&mut self, now: DateTime<Utc>) {
        self.set_status(JobStatus::Pending);
        self.locked_by = None;
        self.locked_until = None;
        self.scheduled_for = now;
        self.updated_at = now;
    }

    fn set_status(&mut self, next: JobStatus) {
        debug_assert!(
            self.status.can_transition_to(next),
            "invalid job transition {} -> {next}",
            self.status
        );
        self.status = next;
    }
}

impl JobBuilder {
    pub fn build(self) -> Job {
        self.build_internal()
            .expect("All fields except job_type have defaults, job_type must be set")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn status_round_trips_through_text() {
        for status in JobStatus::ALL {
            assert_eq!(status.as_str().parse::<JobStatus>(), Ok(status));
        }
        assert_eq!(
            "dead_letter".parse::<JobStatus>(),
            Err(ParseJobStatusError("dead_letter".into()))
        );
    }

    #[test]
    fn completed_is_never_reopened() {
        for next in JobStatus::ALL {
            assert!(!JobStatus::Completed.can_transition_to(next));
        }
        assert!(JobStatus::Failed.can_transition_to(JobStatus::Pending));
        assert!(!JobStatus::Failed.can_transition_to(JobStatus::Completed));
        assert!(!JobStatus::Pending.can_transition_to(JobStatus::Completed));
    }

    #[test]
    fn builder_defaults() {
        let job = Job::builder().job_type("send_offer_email").build();
        assert_eq!(job.status, JobStatus::Pending);
        assert_eq!(job.attempts, 0);
        assert_eq!(job.max_attempts, DEFAULT_MAX_ATTEMPTS);
        assert!(job.locked_until.is_none());
        assert!(job.completed_at.is_none());
    }

    #[test]
    fn leasability() {
        let now = Utc::now();
        let mut job = Job::builder()
            .job_type("t")
            .scheduled_for(now - Duration::seconds(1))
            .build();
        assert!(job.is_leasable_at(now));

        job.lease("w1", now, now + Duration::seconds(30));
        assert_eq!(job.attempts, 1);
        assert!(!job.is_leasable_at(now));
        assert!(job.is_owned_by("w1"));
        assert!(!job.is_owned_by("w2"));

        // Lease expired: reclaimable
        assert!(job.is_leasable_at(now + Duration::seconds(31)));

        let future = Job::builder()
            .job_type("t")
            .scheduled_for(now + Duration::minutes(5))
            .build();
        assert!(!future.is_leasable_at(now));
    }

    #[test]
    fn expired_lease_on_final_attempt_is_not_reclaimable() {
        let now = Utc::now();
        let mut job = Job::builder()
            .job_type("t")
            .max_attempts(1)
            .scheduled_for(now)
            .build();
        job.lease("w1", now, now + Duration::seconds(1));
        assert!(!job.is_leasable_at(now + Duration::seconds(2)));
    }

    #[test]
    fn terminal_jobs_are_not_leasable() {
        let now = Utc::now();
        let mut job = Job::builder()
            .job_type("t")
            .scheduled_for(now - Duration::seconds(1))
            .build();
        job.lease("w1", now, now + Duration::seconds(30));
        job.fail("bounced", now);

        assert!(job.status.is_terminal());
        assert!(!job.is_leasable_at(now + Duration::minutes(1)));
    }

    #[test]
    #[cfg(debug_assertions)]
    #[should_panic(expected = "invalid job transition pending -> completed")]
    fn completing_an_unleased_job_is_rejected() {
        let mut job = Job::builder().job_type("t").build();
        job.complete(Utc::now());
    }

    #[test]
    #[cfg(debug_assertions)]
    #[should_panic(expected = "invalid job transition completed -> pending")]
    fn completed_jobs_cannot_be_requeued() {
        let now = Utc::now();
        let mut job = Job::builder().job_type("t").build();
        job.lease("w1", now, now + Duration::seconds(30));
        job.complete(now);
        job.requeue(now);
    }

    #[test]
    fn reschedule_keeps_error_and_attempts() {
        let now = Utc::now();
        let mut job = Job::builder().job_type("t").build();
        job.lease("w1", now, now + Duration::seconds(30));
        job.reschedule("smtp 503", now, now + Duration::seconds(2));

        assert_eq!(job.status, JobStatus::Pending);
        assert_eq!(job.attempts, 1);
        assert_eq!(job.last_error.as_deref(), Some("smtp 503"));
        assert!(job.locked_until.is_none());
        assert!(job.locked_by.is_none());

        job.lease("w1", now, now + Duration::seconds(30));
        job.complete(now);
        assert_eq!(job.status, JobStatus::Completed);
        assert_eq!(job.last_error.as_deref(), Some("smtp 503"));
        assert_eq!(job.completed_at, Some(now));
    }
}
