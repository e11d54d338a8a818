//! Telegram bot API transport: multipart `sendDocument` per recipient.

use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;

use crate::config::DeliveryConfig;
use crate::delivery::{DeliveryError, Messenger};
use crate::http::{retry_decision_for_status, retry_delay, RetryDecision, RetryPolicy};
use crate::report::RenderedDocument;

pub struct TelegramMessenger {
    http: reqwest::Client,
    send_document_url: String,
    retry: RetryPolicy,
}

#[derive(Debug, Deserialize)]
struct BotApiResponse {
    #[serde(default)]
    ok: bool,
    #[serde(default)]
    description: Option<String>,
}

impl TelegramMessenger {
    pub fn new(config: &DeliveryConfig) -> Result<Self, DeliveryError> {
        // Document uploads are slower than JSON calls.
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(60))
            .build()?;
        Ok(Self {
            http,
            send_document_url: send_document_url(&config.api_base, &config.bot_token),
            retry: RetryPolicy::default(),
        })
    }

    fn form(
        &self,
        recipient: i64,
        document: &RenderedDocument,
    ) -> Result<reqwest::multipart::Form, DeliveryError> {
        let part = reqwest::multipart::Part::bytes(document.bytes.clone())
            .file_name(document.file_name.clone())
            .mime_str("text/markdown")?;
        Ok(reqwest::multipart::Form::new()
            .text("chat_id", recipient.to_string())
            .text("caption", document.caption.clone())
            .part("document", part))
    }
}

fn send_document_url(api_base: &str, bot_token: &str) -> String {
    format!(
        "{}/bot{}/sendDocument",
        api_base.trim_end_matches('/'),
        bot_token
    )
}

/// Prefer the bot API's human-readable description over the raw body.
fn error_message(body: &str) -> String {
    match serde_json::from_str::<BotApiResponse>(body) {
        Ok(parsed) if !parsed.ok => parsed.description.unwrap_or_else(|| body.to_string()),
        _ => body.to_string(),
    }
}

#[async_trait]
impl Messenger for TelegramMessenger {
    async fn send_document(
        &self,
        recipient: i64,
        document: &RenderedDocument,
    ) -> Result<(), DeliveryError> {
        // Multipart bodies cannot be cloned, so this rebuilds the form per
        // attempt instead of going through the shared retry sender.
        let attempts = self.retry.max_attempts.max(1);
        let mut attempt = 0;
        loop {
            attempt += 1;
            let form = self.form(recipient, document)?;
            let sent = self
                .http
                .post(&self.send_document_url)
                .multipart(form)
                .send()
                .await;

            match sent {
                Ok(resp) => {
                    let status = resp.status();
                    if status.is_success() {
                        return Ok(());
                    }
                    if retry_decision_for_status(status) == RetryDecision::Retryable
                        && attempt < attempts
                    {
                        let delay = retry_delay(
                            attempt,
                            &self.retry,
                            resp.headers().get(reqwest::header::RETRY_AFTER),
                        );
                        log::warn!(
                            "sendDocument retry {}/{} after status {} (sleep {:?})",
                            attempt,
                            attempts,
                            status,
                            delay
                        );
                        tokio::time::sleep(delay).await;
                        continue;
                    }
                    let body = resp.text().await.unwrap_or_default();
                    return Err(DeliveryError::Api {
                        status: status.as_u16(),
                        message: error_message(&body),
                    });
                }
                Err(err) => {
                    if (err.is_timeout() || err.is_connect()) && attempt < attempts {
                        let delay = retry_delay(attempt, &self.retry, None);
                        log::warn!(
                            "sendDocument retry {}/{} after transport error: {} (sleep {:?})",
                            attempt,
                            attempts,
                            err,
                            delay
                        );
                        tokio::time::sleep(delay).await;
                        continue;
                    }
                    return Err(DeliveryError::Http(err));
                }
            }
        }
    }
}
