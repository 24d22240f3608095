use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::fmt::{Debug, Formatter};
use std::sync::Arc;

use derive_builder::Builder;
use getset::Getters;
use outbox_worker_job::Job;
use tokio_util::sync::CancellationToken;

/// Collaborators shared by every handler (mail client, CRM client, settings...).
///
/// Values are keyed by type, so register at most one value per type.
#[derive(Clone, Default)]
pub struct Extensions {
    map: HashMap<TypeId, Arc<dyn Any + Send + Sync>>,
}

impl Extensions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `value`, returning `true` if it replaced a value of the same type.
    pub fn insert<T: Send + Sync + 'static>(&mut self, value: T) -> bool {
        self.map
            .insert(TypeId::of::<T>(), Arc::new(value))
            .is_some()
    }

    pub fn get<T: Send + Sync + 'static>(&self) -> Option<&T> {
        self.map
            .get(&TypeId::of::<T>())
            .and_then(|value| value.downcast_ref())
    }

    pub fn len(&self) -> usize {
        self.map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }
}

impl Debug for Extensions {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Extensions")
            .field("len", &self.map.len())
            .finish()
    }
}

/// Everything a handler gets besides its deserialized payload.
#[derive(Getters, Clone, Debug, Builder)]
#[getset(get = "pub")]
#[builder(build_fn(private, name = "build_internal"), pattern = "owned")]
pub struct WorkerContext {
    /// Raw payload of the job
    payload: serde_json::Value,
    /// The leased job, as it was when the lease was taken
    job: Job,
    /// Id of the worker holding the lease
    #[builder(setter(into))]
    worker_id: String,
    #[builder(default)]
    extensions: Extensions,
    /// Cancelled when the worker is shutting down
    #[builder(default)]
    shutdown_token: CancellationToken,
}

impl WorkerContext {
    pub fn builder() -> WorkerContextBuilder {
        WorkerContextBuilder::default()
    }

    /// Shortcut for `ctx.extensions().get::<T>()`.
    pub fn get_ext<T: Send + Sync + 'static>(&self) -> Option<&T> {
        self.extensions.get()
    }
}

impl WorkerContextBuilder {
    pub fn build(self) -> WorkerContext {
        self.build_internal()
            .expect("payload, job and worker_id must be set on WorkerContext")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, PartialEq)]
    struct MailerConfig {
        from: &'static str,
    }

    #[test]
    fn extensions_are_keyed_by_type() {
        let mut ext = Extensions::new();
        assert!(ext.is_empty());
        assert!(!ext.insert(MailerConfig { from: "sales@" }));
        assert!(!ext.insert(5u32));
        assert!(ext.insert(MailerConfig { from: "ops@" }));

        assert_eq!(ext.len(), 2);
        assert_eq!(ext.get::<MailerConfig>(), Some(&MailerConfig { from: "ops@" }));
        assert_eq!(ext.get::<u32>(), Some(&5));
        assert!(ext.get::<String>().is_none());
    }

    #[test]
    fn context_exposes_extensions() {
        let mut ext = Extensions::new();
        ext.insert(MailerConfig { from: "sales@" });
        let job = Job::builder().job_type("send_offer_email").build();

        let ctx = WorkerContext::builder()
            .payload(job.payload().clone())
            .job(job)
            .worker_id("worker_1")
            .extensions(ext)
            .build();

        assert_eq!(ctx.worker_id(), "worker_1");
        assert_eq!(ctx.job().job_type(), "send_offer_email");
        assert_eq!(ctx.get_ext::<MailerConfig>().map(|c| c.from), Some("sales@"));
        assert!(!ctx.shutdown_token().is_cancelled());
    }
}
