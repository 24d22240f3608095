use std::sync::Arc;
use std::time::Duration;

use futures::{stream, Stream};
use outbox_worker_job::Job;
use tokio::time::{Interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::error;

use crate::errors::Result;
use crate::store::JobStore;

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum StreamSource {
    /// First slot of a poll tick
    Polling,
    /// Remaining slots of the same tick
    Refill,
    RunOnce,
}

struct JobSignalStreamData {
    interval: Interval,
    shutdown_token: CancellationToken,
    concurrency: usize,
    remaining: usize,
}

/// Yields `concurrency` slots every `poll_interval` until shutdown.
///
/// Each slot is a chance to lease and run one job. Consumed with
/// `for_each_concurrent(concurrency, ..)` the stream is only polled when a
/// slot frees up, and skipped ticks are not replayed.
pub fn job_signal_stream(
    poll_interval: Duration,
    shutdown_token: CancellationToken,
    concurrency: usize,
) -> impl Stream<Item = StreamSource> {
    let mut interval = tokio::time::interval(poll_interval);
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

    let data = JobSignalStreamData {
        interval,
        shutdown_token,
        concurrency,
        remaining: 0,
    };

    stream::unfold(data, |mut f| async move {
        if f.shutdown_token.is_cancelled() {
            return None;
        }

        if f.remaining > 0 {
            f.remaining -= 1;
            return Some((StreamSource::Refill, f));
        }

        tokio::select! {
            biased;
            _ = f.shutdown_token.cancelled() => None,
            _ = f.interval.tick() => {
                f.remaining = f.concurrency.saturating_sub(1);
                Some((StreamSource::Polling, f))
            }
        }
    })
}

struct JobStreamData {
    store: Arc<dyn JobStore>,
    worker_id: String,
    lease_duration: Duration,
    shutdown_token: CancellationToken,
}

/// Leases due jobs one at a time until there is none left.
///
/// A store error is yielded once and ends the stream. Shutdown stops leasing
/// but never interrupts a lease in flight, so no job is left locked for
/// nothing.
pub fn job_stream(
    store: Arc<dyn JobStore>,
    worker_id: String,
    lease_duration: Duration,
    shutdown_token: CancellationToken,
) -> impl Stream<Item = Result<Job>> {
    let data = JobStreamData {
        store,
        worker_id,
        lease_duration,
        shutdown_token,
    };

    stream::unfold(Some(data), |data| async move {
        let data = data?;
        if data.shutdown_token.is_cancelled() {
            return None;
        }

        match data
            .store
            .lease_jobs(&data.worker_id, 1, data.lease_duration)
            .await
        {
            Ok(mut jobs) => {
                let job = jobs.pop()?;
                Some((Ok(job), Some(data)))
            }
            Err(e) => {
                error!(error = %e, "Could not lease job");
                Some((Err(e), None))
            }
        }
    })
}
