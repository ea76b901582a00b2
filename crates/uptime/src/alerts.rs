//! Alert fan-out for incident transitions.
//!
//! The dispatcher notifies the monitor owner by email and every channel the
//! owner configured. Each send is isolated: a rejected webhook or bot call is
//! logged and reported but never stops the remaining channels. Only opening
//! alerts that were actually delivered are recorded as `alert-sent` events.

use crate::storage::Storage;
use crate::types::{Channel, ChannelKind, EventType, Incident, Monitor, Owner};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use common::Result;
use serde::Serialize;
use serde_json::{Value, json};
use std::sync::Arc;
use tracing::{debug, info, warn};

const DATETIME_FORMAT: &str = "%d %b %Y at %H:%M %Z";

/// Errors returned by notification senders
#[derive(Debug, thiserror::Error)]
pub enum SenderError {
    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("{service} rejected the notification with status {status}: {body}")]
    Rejected {
        service: &'static str,
        status: u16,
        body: String,
    },

    #[error("Invalid configuration for sender: {0}")]
    InvalidConfiguration(String),
}

/// Email template selector
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EmailTemplate {
    IncidentOpened,
    IncidentResolved,
}

/// Data handed to the incident email templates
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct IncidentEmail {
    pub monitor_name: String,
    pub full_name: String,
    pub monitor_url: String,
    pub incident_url: String,
    pub ack_url: String,
    pub incident_cause: String,
    pub incident_started_at: String,
    pub incident_ended_at: Option<String>,
    pub incident_length: Option<String>,
}

/// Sends templated emails
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait EmailSender: Send + Sync {
    async fn send_template(
        &self,
        template: EmailTemplate,
        recipient: &str,
        data: &IncidentEmail,
    ) -> std::result::Result<(), SenderError>;
}

/// Posts block messages to an incoming webhook
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait WebhookSender: Send + Sync {
    async fn post_blocks(&self, url: &str, message: &Value) -> std::result::Result<(), SenderError>;
}

/// Sends plain text through a chat bot API
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait BotSender: Send + Sync {
    async fn send_text(&self, chat_id: &str, text: &str) -> std::result::Result<(), SenderError>;
}

/// Result of one delivery attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryStatus {
    Sent,
    Failed,
    Skipped,
}

impl DeliveryStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            DeliveryStatus::Sent => "sent",
            DeliveryStatus::Failed => "failed",
            DeliveryStatus::Skipped => "skipped",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Delivery {
    /// `email` or the channel kind
    pub channel: &'static str,
    pub destination: Option<String>,
    pub status: DeliveryStatus,
}

/// Every delivery attempted for one transition
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DispatchReport {
    pub deliveries: Vec<Delivery>,
}

impl DispatchReport {
    fn record(&mut self, channel: &'static str, destination: Option<String>, status: DeliveryStatus) {
        self.deliveries.push(Delivery {
            channel,
            destination,
            status,
        });
    }

    pub fn count(&self, status: DeliveryStatus) -> usize {
        self.deliveries.iter().filter(|d| d.status == status).count()
    }
}

/// Natural-language length of a duration ("3 minutes", "an hour", "2 years")
pub fn humanize(delta: chrono::Duration) -> String {
    let total = delta.num_seconds().unsigned_abs();
    let seconds = total % 86_400;
    let all_days = total / 86_400;
    let years = all_days / 365;
    let days = all_days % 365;
    let months = (days as f64 / 30.5) as u64;

    if years == 0 && days == 0 {
        return match seconds {
            0 => "a moment".to_string(),
            1 => "a second".to_string(),
            2..=59 => format!("{} seconds", seconds),
            60..=119 => "a minute".to_string(),
            120..=3599 => format!("{} minutes", seconds / 60),
            3600..=7199 => "an hour".to_string(),
            _ => format!("{} hours", seconds / 3600),
        };
    }

    match (years, months, days) {
        (0, _, 1) => "a day".to_string(),
        (0, 0, days) => format!("{} days", days),
        (0, 1, _) => "a month".to_string(),
        (0, months, _) => format!("{} months", months),
        (1, 0, 0) => "a year".to_string(),
        (1, 0, 1) => "1 year, 1 day".to_string(),
        (1, 0, days) => format!("1 year, {} days", days),
        (1, 1, _) => "1 year, 1 month".to_string(),
        (1, months, _) => format!("1 year, {} months", months),
        (years, _, _) => format!("{} years", years),
    }
}

fn format_time(at: DateTime<Utc>) -> String {
    at.format(DATETIME_FORMAT).to_string()
}

/// Notifies owners and channels about incident transitions
pub struct AlertDispatcher {
    storage: Arc<dyn Storage>,
    email: Arc<dyn EmailSender>,
    webhook: Arc<dyn WebhookSender>,
    bot: Arc<dyn BotSender>,
    front_base_url: String,
}

impl AlertDispatcher {
    pub fn new(
        storage: Arc<dyn Storage>,
        email: Arc<dyn EmailSender>,
        webhook: Arc<dyn WebhookSender>,
        bot: Arc<dyn BotSender>,
        front_base_url: impl Into<String>,
    ) -> Self {
        Self {
            storage,
            email,
            webhook,
            bot,
            front_base_url: front_base_url.into().trim_end_matches('/').to_string(),
        }
    }

    pub fn incident_url(&self, incident: &Incident) -> String {
        format!("{}/incidents/{}", self.front_base_url, incident.id)
    }

    pub fn ack_url(&self, incident: &Incident) -> String {
        format!("{}/acknowledge", self.incident_url(incident))
    }

    /// Notify everyone about a just-opened or just-closed incident
    pub async fn dispatch(&self, monitor: &Monitor, incident: &Incident) -> Result<DispatchReport> {
        let mut report = DispatchReport::default();
        let opening = incident.is_open();

        if self.storage.get_owner_email_preference(monitor).await? {
            let owner = self.storage.get_owner(monitor.owner_id).await?;
            self.send_email(monitor, incident, &owner, &mut report).await;
        }

        for channel in self.storage.list_owner_channels(monitor.owner_id).await? {
            let (status, destination) = self.send_channel(monitor, incident, &channel).await;
            if opening && status == DeliveryStatus::Sent {
                self.audit_alert(incident, channel.kind.as_str(), destination.clone())
                    .await;
            }
            report.record(channel.kind.as_str(), destination, status);
        }

        info!(
            monitor_id = monitor.id,
            incident_id = incident.id,
            opening,
            sent = report.count(DeliveryStatus::Sent),
            failed = report.count(DeliveryStatus::Failed),
            "Incident alerts dispatched"
        );
        Ok(report)
    }

    async fn send_email(
        &self,
        monitor: &Monitor,
        incident: &Incident,
        owner: &Owner,
        report: &mut DispatchReport,
    ) {
        let template = if incident.is_open() {
            EmailTemplate::IncidentOpened
        } else {
            EmailTemplate::IncidentResolved
        };
        let data = self.email_data(monitor, incident, owner);

        match self.email.send_template(template, &owner.email, &data).await {
            Ok(()) => {
                if incident.is_open() {
                    self.audit_alert(incident, "email", Some(owner.email.clone()))
                        .await;
                }
                report.record("email", Some(owner.email.clone()), DeliveryStatus::Sent);
            }
            Err(e) => {
                warn!(
                    monitor_id = monitor.id,
                    incident_id = incident.id,
                    channel = "email",
                    error = %e,
                    "Failed to send incident email"
                );
                report.record("email", Some(owner.email.clone()), DeliveryStatus::Failed);
            }
        }
    }

    /// Append an `alert-sent` event; a storage failure only costs that entry
    async fn audit_alert(&self, incident: &Incident, channel: &str, destination: Option<String>) {
        if let Err(e) = self
            .storage
            .append_incident_event(
                incident.id,
                EventType::AlertSent,
                Some(channel.to_string()),
                destination,
            )
            .await
        {
            warn!(
                incident_id = incident.id,
                channel,
                error = %e,
                "Failed to record sent alert"
            );
        }
    }

    fn email_data(&self, monitor: &Monitor, incident: &Incident, owner: &Owner) -> IncidentEmail {
        IncidentEmail {
            monitor_name: monitor.name.clone(),
            full_name: owner.full_name.clone(),
            monitor_url: monitor.endpoint.clone(),
            incident_url: self.incident_url(incident),
            ack_url: self.ack_url(incident),
            incident_cause: incident.cause.clone(),
            incident_started_at: format_time(incident.started_at),
            incident_ended_at: incident.ended_at.map(format_time),
            incident_length: incident.length().map(humanize),
        }
    }

    async fn send_channel(
        &self,
        monitor: &Monitor,
        incident: &Incident,
        channel: &Channel,
    ) -> (DeliveryStatus, Option<String>) {
        let (sent, destination) = match &channel.kind {
            ChannelKind::Slack {
                webhook_url,
                channel: slack_channel,
            } => {
                let message = self.slack_message(monitor, incident);
                (
                    self.webhook.post_blocks(webhook_url, &message).await,
                    slack_channel.clone(),
                )
            }
            ChannelKind::Telegram {
                chat_id: Some(chat_id),
                chat_name,
            } => (
                self.bot.send_text(chat_id, &telegram_text(monitor, incident)).await,
                chat_name.clone(),
            ),
            ChannelKind::Telegram { chat_id: None, .. } | ChannelKind::Unsupported => {
                debug!(
                    channel_id = channel.id,
                    kind = channel.kind.as_str(),
                    "Channel not activated, skipping"
                );
                return (DeliveryStatus::Skipped, None);
            }
        };

        match sent {
            Ok(()) => (DeliveryStatus::Sent, destination),
            Err(e) => {
                warn!(
                    monitor_id = monitor.id,
                    incident_id = incident.id,
                    channel_id = channel.id,
                    channel = channel.kind.as_str(),
                    error = %e,
                    "Failed to notify channel"
                );
                (DeliveryStatus::Failed, destination)
            }
        }
    }

    /// Slack block message for an incident
    pub fn slack_message(&self, monitor: &Monitor, incident: &Incident) -> Value {
        let state = if incident.is_open() { "DOWN" } else { "UP" };

        let mut fields = vec![
            mrkdwn(format!("*Monitor endpoint:*\n{}", monitor.endpoint)),
            mrkdwn(format!("*Cause:*\n{}", incident.cause)),
            mrkdwn(format!("*Started At:*\n{}", format_time(incident.started_at))),
        ];
        if let (Some(ended_at), Some(length)) = (incident.ended_at, incident.length()) {
            fields.push(mrkdwn(format!("*Ended At:*\n{}", format_time(ended_at))));
            fields.push(mrkdwn(format!("*Length:*\n{}", humanize(length))));
        }

        let mut buttons = Vec::new();
        if incident.is_open() {
            buttons.push(json!({
                "type": "button",
                "text": { "type": "plain_text", "text": "Acknowledge" },
                "style": "primary",
                "url": self.ack_url(incident),
            }));
        }
        buttons.push(json!({
            "type": "button",
            "text": { "type": "plain_text", "text": "View" },
            "url": self.incident_url(incident),
        }));

        json!({
            "text": "fallback",
            "blocks": [
                {
                    "type": "section",
                    "text": mrkdwn(format!("*Monitor {} is {}*", monitor.name, state)),
                },
                { "type": "section", "fields": fields },
                { "type": "actions", "elements": buttons },
            ],
        })
    }
}

fn mrkdwn(text: String) -> Value {
    json!({ "type": "mrkdwn", "text": text })
}

/// Plain-text bot message for an incident
pub fn telegram_text(monitor: &Monitor, incident: &Incident) -> String {
    match incident.length() {
        Some(length) => format!(
            "Monitor is UP: {}. It has been down for {}.",
            monitor.name,
            humanize(length)
        ),
        None => format!("Monitor is DOWN: {}.", monitor.name),
    }
}
