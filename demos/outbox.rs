use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use outbox_worker::producers::{
    enqueue_inbound_lead_alert, enqueue_offer_email, enqueue_reorder_reminders, InboundLeadAlert,
    OfferEmail, ReorderReminder, INBOUND_LEAD_ALERT, SEND_OFFER_EMAIL, SEND_REORDER_REMINDER,
};
use outbox_worker::{BackoffPolicy, MemoryJobStore, TaskError, WorkerContext, WorkerOptions};
use tracing::info;
use tracing_subscriber::{filter::EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

fn enable_logs() {
    let filter_layer = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,outbox_worker=debug,sqlx=warn"));

    tracing_subscriber::registry()
        .with(filter_layer)
        .with(tracing_subscriber::fmt::layer())
        .init();
}

/// Stand-in for an email provider that rejects every third send.
#[derive(Clone, Default)]
struct FlakyMailer {
    sent: Arc<AtomicUsize>,
}

impl FlakyMailer {
    fn send(&self, to: &str, subject: &str) -> Result<(), TaskError> {
        let n = self.sent.fetch_add(1, Ordering::SeqCst) + 1;
        if n % 3 == 0 {
            return Err(TaskError::retryable("provider returned 503"));
        }
        info!(to, subject, "Email sent");
        Ok(())
    }
}

fn mailer(ctx: &WorkerContext) -> Result<&FlakyMailer, TaskError> {
    ctx.get_ext::<FlakyMailer>()
        .ok_or_else(|| TaskError::fatal("mailer not configured"))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    enable_logs();

    let options = WorkerOptions::default()
        .concurrency(4)
        .poll_interval(Duration::from_millis(250))
        .backoff(BackoffPolicy::new(
            Duration::from_millis(500),
            Duration::from_secs(10),
        ))
        .add_extension(FlakyMailer::default())
        .define_raw_job(INBOUND_LEAD_ALERT, |ctx| async move {
            let lead: InboundLeadAlert = serde_json::from_value(ctx.payload().clone())?;
            mailer(&ctx)?.send("sales@example.com", &format!("New lead from {}", lead.email))
        })
        .define_raw_job(SEND_REORDER_REMINDER, |ctx| async move {
            let reminder: ReorderReminder = serde_json::from_value(ctx.payload().clone())?;
            mailer(&ctx)?.send(
                &format!("company-{}@example.com", reminder.company_id),
                &format!("Time to reorder ({})", reminder.campaign_key),
            )
        })
        .define_raw_job(SEND_OFFER_EMAIL, |ctx| async move {
            let offer: OfferEmail = serde_json::from_value(ctx.payload().clone())?;
            mailer(&ctx)?.send(&offer.contact_id, "Your personal offer")
        });

    let options = match std::env::var("DATABASE_URL") {
        Ok(url) => options.database_url(&url),
        Err(_) => {
            info!("DATABASE_URL not set, using an in-memory store");
            options.store(MemoryJobStore::new())
        }
    };
    let worker = options.init().await?;
    let utils = worker.create_utils();

    enqueue_inbound_lead_alert(
        &utils,
        &InboundLeadAlert {
            lead_id: "L1".into(),
            email: "buyer@example.com".into(),
            company_name: Some("Acme".into()),
            message: Some("Do you ship to Norway?".into()),
        },
    )
    .await;
    let today = Utc::now().date_naive();
    enqueue_reorder_reminders(&utils, "spring_reorder", today, &[1, 2, 3]).await?;
    // A second cron firing on the same day enqueues nothing
    enqueue_reorder_reminders(&utils, "spring_reorder", today, &[1, 2, 3]).await?;
    enqueue_offer_email(&utils, "contact-7@example.com", Some(5)).await?;

    worker.run_once().await?;

    let counts = utils.count_jobs_by_status().await?;
    info!(
        pending = counts.pending,
        completed = counts.completed,
        failed = counts.failed,
        "Queue drained, polling until Ctrl-C"
    );

    worker.run().await;
    Ok(())
}
