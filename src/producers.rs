//! Enqueue helpers for the side effects the storefront and back office emit.

use chrono::NaiveDate;
use outbox_worker_job::Job;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::errors::Result;
use crate::worker_utils::WorkerUtils;
use crate::{JobSpec, JobSpecBuilder};

pub const INBOUND_LEAD_ALERT: &str = "inbound_lead_alert";
pub const SEND_REORDER_REMINDER: &str = "send_reorder_reminder";
pub const SEND_OFFER_EMAIL: &str = "send_offer_email";

/// A lead captured by a storefront form, to be brought to staff attention.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InboundLeadAlert {
    pub lead_id: String,
    pub email: String,
    pub company_name: Option<String>,
    pub message: Option<String>,
}

/// One company due for a reorder reminder in a campaign run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReorderReminder {
    pub company_id: i64,
    pub campaign_key: String,
    pub due_on: NaiveDate,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OfferEmail {
    pub contact_id: String,
}

/// Idempotency key of a reminder: one per company, campaign and day.
pub fn reorder_reminder_key(company_id: i64, campaign_key: &str, date: NaiveDate) -> String {
    format!("{company_id}:{campaign_key}:{}", date.format("%Y-%m-%d"))
}

/// Enqueues a staff alert for a new lead.
///
/// The form submission must succeed even when the queue is down, so failures
/// are logged and swallowed.
pub async fn enqueue_inbound_lead_alert(
    utils: &WorkerUtils,
    lead: &InboundLeadAlert,
) -> Option<Job> {
    let payload = match serde_json::to_value(lead) {
        Ok(payload) => payload,
        Err(e) => {
            warn!(lead_id = %lead.lead_id, error = %e, "Could not serialize inbound lead alert");
            return None;
        }
    };

    match utils
        .add_raw_job(INBOUND_LEAD_ALERT, payload, JobSpec::default())
        .await
    {
        Ok(job) => Some(job),
        Err(e) => {
            warn!(lead_id = %lead.lead_id, error = %e, "Could not enqueue inbound lead alert");
            None
        }
    }
}

/// Outcome of a reminder fan-out.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReminderFanOut {
    /// Reminders enqueued by this run
    pub enqueued: usize,
    /// Reminders already enqueued earlier the same day
    pub already_present: usize,
}

/// Cron fan-out: one `send_reorder_reminder` job per company in `company_ids`.
///
/// Keys make the run idempotent per day, so a cron firing twice enqueues
/// nothing the second time.
pub async fn enqueue_reorder_reminders(
    utils: &WorkerUtils,
    campaign_key: &str,
    date: NaiveDate,
    company_ids: &[i64],
) -> Result<ReminderFanOut> {
    let mut fan_out = ReminderFanOut::default();

    for &company_id in company_ids {
        let reminder = ReorderReminder {
            company_id,
            campaign_key: campaign_key.to_string(),
            due_on: date,
        };
        let spec = JobSpecBuilder::new()
            .job_key(reorder_reminder_key(company_id, campaign_key, date))
            .build();

        let inserted = utils
            .insert_raw_job(SEND_REORDER_REMINDER, serde_json::to_value(&reminder)?, spec)
            .await?;
        if inserted.is_created() {
            fan_out.enqueued += 1;
        } else {
            fan_out.already_present += 1;
        }
    }

    info!(
        campaign_key,
        %date,
        enqueued = fan_out.enqueued,
        already_present = fan_out.already_present,
        "Reorder reminders fanned out"
    );

    Ok(fan_out)
}

pub async fn enqueue_offer_email(
    utils: &WorkerUtils,
    contact_id: &str,
    max_attempts: Option<i32>,
) -> Result<Job> {
    let payload = serde_json::to_value(OfferEmail {
        contact_id: contact_id.to_string(),
    })?;
    let spec = JobSpec {
        max_attempts,
        ..JobSpec::default()
    };

    utils.add_raw_job(SEND_OFFER_EMAIL, payload, spec).await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reminder_key_format() {
        let date = NaiveDate::from_ymd_opt(2024, 3, 1).unwrap();
        assert_eq!(
            reorder_reminder_key(42, "spring_reorder", date),
            "42:spring_reorder:2024-03-01"
        );
    }
}
