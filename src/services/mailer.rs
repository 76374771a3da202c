use async_trait::async_trait;
use reqwest::Client;
use secrecy::{ExposeSecret, Secret};
use serde::Serialize;
use std::time::Duration;

#[derive(thiserror::Error, Debug)]
pub enum MailError {
    #[error("HTTP request failed: {0}")]
    HttpError(#[from] reqwest::Error),

    #[error("Mail API error (HTTP {status}): {message}")]
    ApiError { status: u16, message: String },

    #[error("Template rendering failed: {0}")]
    Render(#[from] askama::Error),

    #[error("Invalid link: {0}")]
    InvalidLink(#[from] url::ParseError),
}

/// Outbound HTML email
#[derive(Debug, Clone, Serialize)]
pub struct Email {
    pub from: String,
    pub to: String,
    pub subject: String,
    pub html: String,
}

/// Email delivery transport
#[async_trait]
pub trait Mailer: Send + Sync {
    async fn send(&self, email: &Email) -> Result<(), MailError>;
}

#[derive(Debug, Serialize)]
struct SendMailRequest<'a> {
    from: &'a str,
    to: [&'a str; 1],
    subject: &'a str,
    html: &'a str,
}

/// Delivers through a transactional mail HTTP API using a bearer key
pub struct HttpMailer {
    client: Client,
    api_url: String,
    api_key: Secret<String>,
}

impl HttpMailer {
    pub fn new(api_url: &str, api_key: Secret<String>) -> Result<Self, MailError> {
        let client = Client::builder().timeout(Duration::from_secs(10)).build()?;
        Ok(Self {
            client,
            api_url: api_url.trim_end_matches('/').to_string(),
            api_key,
        })
    }
}

#[async_trait]
impl Mailer for HttpMailer {
    #[tracing::instrument(skip(self, email), fields(to = %email.to, subject = %email.subject))]
    async fn send(&self, email: &Email) -> Result<(), MailError> {
        let body = SendMailRequest {
            from: &email.from,
            to: [&email.to],
            subject: &email.subject,
            html: &email.html,
        };

        let response = self
            .client
            .post(&self.api_url)
            .bearer_auth(self.api_key.expose_secret())
            .json(&body)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let message = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_string());
            tracing::error!(status = status, error = %message, "Mail API request failed");
            return Err(MailError::ApiError { status, message });
        }

        tracing::info!("Email sent");
        Ok(())
    }
}

/// Writes emails to the log instead of delivering them
pub struct LogMailer;

#[async_trait]
impl Mailer for LogMailer {
    async fn send(&self, email: &Email) -> Result<(), MailError> {
        tracing::info!(
            from = %email.from,
            to = %email.to,
            subject = %email.subject,
            bytes = email.html.len(),
            "Mail transport not configured, email logged only"
        );
        Ok(())
    }
}
