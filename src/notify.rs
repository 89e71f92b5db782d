use std::time::Duration;
use async_trait::async_trait;
use chrono::{
    DateTime, Utc,
};
use log::info;
use reqwest::header::CONTENT_TYPE;
use serde::Serialize;

use crate::{
    config::NotificationSettings,
    job::{
        Job, JobState,
    },
};

// outbound notices; the supervisor treats every failure here as non-fatal
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify_start(&self, job: &Job) -> anyhow::Result<()>;

    async fn notify_success(&self, job: &Job) -> anyhow::Result<()>;

    async fn notify_failure(&self, job: &Job) -> anyhow::Result<()>;

    async fn notify_failure_to_maintainers(&self, job: &Job) -> anyhow::Result<()>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Event {
    Start,
    Success,
    Failure,
    FailureMaintainers,
}

#[derive(Debug, Serialize)]
struct JobSummary<'a> {
    id: &'a str,
    name: &'a str,
    run_token: Option<&'a str>,
    state: JobState,
    started_at: Option<DateTime<Utc>>,
    finished_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Serialize)]
struct Notice<'a> {
    event: Event,
    recipients: Vec<&'a str>,
    job: JobSummary<'a>,
    // only failures carry the captured error output
    #[serde(skip_serializing_if = "Option::is_none")]
    stderr: Option<&'a str>,
}

impl<'a> Notice<'a> {
    fn new(event: Event, recipients: Vec<&'a str>, job: &'a Job) -> Self {
        let stderr = match event {
            Event::Failure | Event::FailureMaintainers => job.stderr.as_deref(),
            _ => None,
        };
        Self {
            event: event,
            recipients: recipients,
            job: JobSummary {
                id: &job.id,
                name: &job.name,
                run_token: job.run_token.as_deref(),
                state: job.state,
                started_at: job.started_at,
                finished_at: job.finished_at,
            },
            stderr: stderr,
        }
    }
}

// hands notices to a mail relay(or anything else) listening on a webhook
pub struct WebhookNotifier {
    client: reqwest::Client,
    url: String,
    maintainers: Vec<String>,
}

impl WebhookNotifier {
    pub fn new(url: &str, settings: &NotificationSettings) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(settings.timeout_secs))
            .build()?;
        Ok(Self {
            client: client,
            url: url.to_string(),
            maintainers: settings.maintainers.clone(),
        })
    }

    async fn post(&self, notice: &Notice<'_>) -> anyhow::Result<()> {
        let body = serde_json::to_string(notice)?;
        self.client
            .post(&self.url)
            .header(CONTENT_TYPE, "application/json")
            .body(body)
            .send()
            .await?
            .error_for_status()?;
        Ok(())
    }

    async fn to_submitter(&self, event: Event, job: &Job) -> anyhow::Result<()> {
        let Some(email) = job.contact() else {
            return Ok(())
        };
        self.post(&Notice::new(event, vec![email], job)).await
    }
}

#[async_trait]
impl Notifier for WebhookNotifier {
    async fn notify_start(&self, job: &Job) -> anyhow::Result<()> {
        self.to_submitter(Event::Start, job).await
    }

    async fn notify_success(&self, job: &Job) -> anyhow::Result<()> {
        self.to_submitter(Event::Success, job).await
    }

    async fn notify_failure(&self, job: &Job) -> anyhow::Result<()> {
        self.to_submitter(Event::Failure, job).await
    }

    async fn notify_failure_to_maintainers(&self, job: &Job) -> anyhow::Result<()> {
        if self.maintainers.is_empty() {
            return Ok(())
        }
        let recipients = self.maintainers.iter().map(String::as_str).collect();
        self.post(&Notice::new(Event::FailureMaintainers, recipients, job)).await
    }
}

// used when no webhook is configured
#[derive(Debug, Default)]
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn notify_start(&self, job: &Job) -> anyhow::Result<()> {
        info!("Job `{}` has started.", job.id);
        Ok(())
    }

    async fn notify_success(&self, job: &Job) -> anyhow::Result<()> {
        info!("Job `{}` has finished successfully.", job.id);
        Ok(())
    }

    async fn notify_failure(&self, job: &Job) -> anyhow::Result<()> {
        info!("Job `{}` has failed.", job.id);
        Ok(())
    }

    async fn notify_failure_to_maintainers(&self, job: &Job) -> anyhow::Result<()> {
        info!("Job `{}` has failed, maintainers would be told.", job.id);
        Ok(())
    }
}

pub fn from_settings(settings: &NotificationSettings) -> anyhow::Result<Box<dyn Notifier>> {
    Ok(match &settings.webhook_url {
        Some(url) => Box::new(WebhookNotifier::new(url, settings)?),

        None => Box::new(LogNotifier),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn failure_notice_carries_stderr() {
        let mut job = Job::new("r1", "PFA", "/uploads/seq.fasta");
        job.name = "my genome".to_string();
        job.stderr = Some("boom".to_string());
        let json = serde_json::to_value(
            Notice::new(Event::Failure, vec!["me@example.org"], &job)
        ).unwrap();
        assert_eq!(json["event"], "failure");
        assert_eq!(json["stderr"], "boom");
        assert_eq!(json["job"]["name"], "my genome");

        let json = serde_json::to_value(
            Notice::new(Event::Start, vec!["me@example.org"], &job)
        ).unwrap();
        assert_eq!(json["event"], "start");
        assert!(json.get("stderr").is_none());
    }
}
