//! Contact form delivery through the transactional email relay.

use crate::dream::error::SdkError;
use crate::dream::notice::{Language, Toast};
use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{error, info};

const MAX_MESSAGE_CHARS: usize = 5000;

#[derive(Debug, Clone)]
pub struct EmailConfig {
    pub api_url: String,
    pub service_id: String,
    pub template_id: String,
    /// The relay's public key, sent as `user_id`.
    pub public_key: String,
}

impl EmailConfig {
    pub fn new(service_id: String, template_id: String, public_key: String) -> Self {
        Self {
            api_url: "https://api.emailjs.com/api/v1.0/email/send".to_string(),
            service_id,
            template_id,
            public_key,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ContactParams {
    pub name: String,
    pub email: String,
    pub time: String,
    pub message: String,
}

impl ContactParams {
    pub fn new(name: &str, email: &str, message: &str, at: DateTime<Utc>) -> Result<Self, SdkError> {
        let (name, email, message) = (name.trim(), email.trim(), message.trim());
        if name.is_empty() || email.is_empty() || message.is_empty() {
            return Err(SdkError::validation("Please fill in every field"));
        }
        if !email.contains('@') {
            return Err(SdkError::validation("Enter a valid email address"));
        }
        if message.chars().count() > MAX_MESSAGE_CHARS {
            return Err(SdkError::validation("Message is too long"));
        }
        Ok(Self {
            name: name.to_string(),
            email: email.to_string(),
            time: at.format("%Y-%m-%d %H:%M UTC").to_string(),
            message: message.to_string(),
        })
    }
}

#[derive(Debug, Serialize)]
struct SendRequest<'a> {
    service_id: &'a str,
    template_id: &'a str,
    user_id: &'a str,
    template_params: &'a ContactParams,
}

pub struct EmailClient {
    client: reqwest::Client,
    config: EmailConfig,
}

impl EmailClient {
    pub fn new(config: EmailConfig) -> Self {
        Self {
            client: reqwest::Client::new(),
            config,
        }
    }

    pub async fn send(&self, params: &ContactParams) -> Result<()> {
        let body = SendRequest {
            service_id: &self.config.service_id,
            template_id: &self.config.template_id,
            user_id: &self.config.public_key,
            template_params: params,
        };
        let response = self
            .client
            .post(&self.config.api_url)
            .json(&body)
            .send()
            .await
            .context("email relay unreachable")?;

        // The relay answers with plain text, not JSON.
        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            error!("[Email] send failed, status: {}, body: {}", status, text);
            return Err(SdkError::Network(format!("email relay returned {status}")).into());
        }
        info!("[Email] 📧 contact message sent");
        Ok(())
    }

    /// Validate, send, and turn the outcome into a notice.
    pub async fn send_contact(
        &self,
        name: &str,
        email: &str,
        message: &str,
        lang: Language,
    ) -> Toast {
        let result = async {
            let params = ContactParams::new(name, email, message, Utc::now())?;
            self.send(&params).await
        }
        .await;
        match result {
            Ok(()) => Toast::success(match lang {
                Language::En => "Thanks! Your message was sent.",
                Language::Es => "¡Gracias! Tu mensaje fue enviado.",
            }),
            Err(e) => Toast::from_error(&e, lang),
        }
    }
}
