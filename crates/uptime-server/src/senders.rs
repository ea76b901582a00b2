//! HTTP notification senders.
//!
//! Concrete implementations of the sender traits used by the alert
//! dispatcher: SendGrid dynamic-template emails, Slack incoming webhooks
//! and the Telegram Bot API. Every request shares one `reqwest::Client`
//! with the configured timeout.

use async_trait::async_trait;
use reqwest::{Client, Response};
use serde::Serialize;
use serde_json::{Value, json};
use std::time::Duration;
use uptime::{BotSender, EmailSender, EmailTemplate, IncidentEmail, SenderError, WebhookSender};

pub const SENDGRID_API: &str = "https://api.sendgrid.com";
pub const TELEGRAM_API: &str = "https://api.telegram.org";

/// Build the client shared by all senders
pub fn http_client(timeout: Duration) -> Result<Client, SenderError> {
    Ok(Client::builder().timeout(timeout).build()?)
}

async fn check_status(service: &'static str, response: Response) -> Result<(), SenderError> {
    let status = response.status();
    if status.is_success() {
        return Ok(());
    }

    let body = response
        .text()
        .await
        .unwrap_or_else(|_| "Failed to read error body".to_string());
    Err(SenderError::Rejected {
        service,
        status: status.as_u16(),
        body,
    })
}

/// Sends incident emails through SendGrid dynamic templates
pub struct SendGridSender {
    client: Client,
    api_base: String,
    api_key: Option<String>,
    from: String,
    opened_template: String,
    resolved_template: String,
}

impl SendGridSender {
    pub fn new(
        client: Client,
        api_key: Option<String>,
        from: impl Into<String>,
        opened_template: impl Into<String>,
        resolved_template: impl Into<String>,
    ) -> Self {
        Self {
            client,
            api_base: SENDGRID_API.to_string(),
            api_key,
            from: from.into(),
            opened_template: opened_template.into(),
            resolved_template: resolved_template.into(),
        }
    }

    /// Point the sender at another API host
    pub fn with_api_base(mut self, api_base: impl Into<String>) -> Self {
        self.api_base = api_base.into().trim_end_matches('/').to_string();
        self
    }

    fn template_id(&self, template: EmailTemplate) -> &str {
        match template {
            EmailTemplate::IncidentOpened => &self.opened_template,
            EmailTemplate::IncidentResolved => &self.resolved_template,
        }
    }

    /// Request body of one templated email
    pub fn payload(&self, template: EmailTemplate, recipient: &str, data: &IncidentEmail) -> Value {
        json!({
            "personalizations": [{
                "to": [{ "email": recipient }],
                "dynamic_template_data": data,
            }],
            "from": { "email": self.from },
            "template_id": self.template_id(template),
        })
    }
}

#[async_trait]
impl EmailSender for SendGridSender {
    async fn send_template(
        &self,
        template: EmailTemplate,
        recipient: &str,
        data: &IncidentEmail,
    ) -> Result<(), SenderError> {
        let api_key = self.api_key.as_deref().ok_or_else(|| {
            SenderError::InvalidConfiguration("SendGrid API key is not set".to_string())
        })?;
        if self.template_id(template).is_empty() {
            return Err(SenderError::InvalidConfiguration(format!(
                "no template id configured for {:?}",
                template
            )));
        }

        let response = self
            .client
            .post(format!("{}/v3/mail/send", self.api_base))
            .bearer_auth(api_key)
            .json(&self.payload(template, recipient, data))
            .send()
            .await?;
        check_status("SendGrid", response).await
    }
}

/// Posts block messages to Slack incoming webhooks
pub struct SlackWebhookSender {
    client: Client,
}

impl SlackWebhookSender {
    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl WebhookSender for SlackWebhookSender {
    async fn post_blocks(&self, url: &str, message: &Value) -> Result<(), SenderError> {
        if url.is_empty() {
            return Err(SenderError::InvalidConfiguration(
                "Slack webhook url is empty".to_string(),
            ));
        }

        let response = self.client.post(url).json(message).send().await?;
        check_status("Slack", response).await
    }
}

#[derive(Serialize)]
struct TelegramMessage<'a> {
    chat_id: &'a str,
    text: &'a str,
}

/// Sends plain text messages through the Telegram Bot API
pub struct TelegramBotSender {
    client: Client,
    api_base: String,
    bot_token: Option<String>,
}

impl TelegramBotSender {
    pub fn new(client: Client, bot_token: Option<String>) -> Self {
        Self {
            client,
            api_base: TELEGRAM_API.to_string(),
            bot_token,
        }
    }

    /// Point the sender at another API host
    pub fn with_api_base(mut self, api_base: impl Into<String>) -> Self {
        self.api_base = api_base.into().trim_end_matches('/').to_string();
        self
    }
}

#[async_trait]
impl BotSender for TelegramBotSender {
    async fn send_text(&self, chat_id: &str, text: &str) -> Result<(), SenderError> {
        let bot_token = self.bot_token.as_deref().ok_or_else(|| {
            SenderError::InvalidConfiguration("Telegram bot token is not set".to_string())
        })?;

        let api_url = format!("{}/bot{}/sendMessage", self.api_base, bot_token);
        let response = self
            .client
            .post(&api_url)
            .json(&TelegramMessage { chat_id, text })
            .send()
            .await?;
        check_status("Telegram", response).await
    }
}
