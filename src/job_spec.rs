use chrono::{DateTime, Utc};
use derive_builder::Builder;
use getset::Getters;

/// Per-enqueue options.
///
/// ```
/// use chrono::{Duration, Utc};
/// use outbox_worker::JobSpecBuilder;
///
/// let spec = JobSpecBuilder::new()
///     .scheduled_for(Utc::now() + Duration::minutes(10))
///     .max_attempts(5)
///     .job_key("42:spring_reorder:2024-03-01")
///     .build();
/// assert_eq!(*spec.max_attempts(), Some(5));
/// ```
#[derive(Getters, Debug, Default, Clone, PartialEq, Eq, Builder)]
#[getset(get = "pub")]
#[builder(
    build_fn(private, name = "build_internal"),
    setter(strip_option),
    default,
    pattern = "owned"
)]
pub struct JobSpec {
    /// Do not lease the job before this instant. Defaults to now.
    #[builder(setter(into))]
    pub scheduled_for: Option<DateTime<Utc>>,

    /// Attempt ceiling before the job is failed for good. Defaults to 3.
    pub max_attempts: Option<i32>,

    /// Idempotency key. Enqueueing a key that already exists inserts nothing
    /// and hands back the existing job.
    #[builder(setter(into))]
    pub job_key: Option<String>,
}

impl JobSpecBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn build(self) -> JobSpec {
        // Every field has a default
        self.build_internal().unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_builder_is_default_spec() {
        assert_eq!(JobSpecBuilder::new().build(), JobSpec::default());
    }

    #[test]
    fn builder_sets_fields() {
        let spec = JobSpecBuilder::new()
            .max_attempts(1)
            .job_key(String::from("k"))
            .build();
        assert_eq!(spec.max_attempts, Some(1));
        assert_eq!(spec.job_key.as_deref(), Some("k"));
        assert_eq!(spec.scheduled_for, None);
    }
}
