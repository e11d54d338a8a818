//! Delivery fan-out: one rendered document, many recipients.
//!
//! Sends run concurrently and independently; a failed recipient never stops
//! the rest. Every recipient ends up with an explicit outcome, success is
//! whatever the transport confirmed.

use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;
use tokio::task::JoinSet;

use crate::report::RenderedDocument;

#[derive(Debug, Error)]
pub enum DeliveryError {
    #[error("HTTP: {0}")]
    Http(#[from] reqwest::Error),
    #[error("messenger API error {status}: {message}")]
    Api { status: u16, message: String },
}

impl DeliveryError {
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Http(e) => e.is_timeout() || e.is_connect(),
            Self::Api { status, .. } => matches!(status, 408 | 429) || *status >= 500,
        }
    }
}

/// Transport seam. One recipient per call; the implementation owns its own
/// retry behavior.
#[async_trait]
pub trait Messenger: Send + Sync {
    async fn send_document(
        &self,
        recipient: i64,
        document: &RenderedDocument,
    ) -> Result<(), DeliveryError>;
}

#[derive(Debug)]
pub struct DeliveryOutcome {
    pub recipient: i64,
    pub result: Result<(), DeliveryError>,
}

/// Fan-out summary. Counts are computed from the outcomes, never stored.
#[derive(Debug, Default)]
pub struct FanoutReport {
    pub outcomes: Vec<DeliveryOutcome>,
}

impl FanoutReport {
    pub fn attempted(&self) -> usize {
        self.outcomes.len()
    }

    pub fn sent(&self) -> usize {
        self.outcomes.iter().filter(|o| o.result.is_ok()).count()
    }
}

/// Send `document` to every recipient concurrently. Outcomes come back
/// sorted by recipient id so callers and logs see a stable order.
pub async fn fan_out(
    messenger: Arc<dyn Messenger>,
    document: &RenderedDocument,
    recipients: &[i64],
) -> FanoutReport {
    let document = Arc::new(document.clone());
    let mut tasks = JoinSet::new();

    for &recipient in recipients {
        let messenger = messenger.clone();
        let document = document.clone();
        tasks.spawn(async move {
            let result = messenger.send_document(recipient, &document).await;
            (recipient, result)
        });
    }

    let mut outcomes = Vec::with_capacity(recipients.len());
    while let Some(joined) = tasks.join_next().await {
        match joined {
            Ok((recipient, result)) => {
                match &result {
                    Ok(()) => log::info!("delivered {} to {}", document.file_name, recipient),
                    Err(e) => log::warn!("delivery to {} failed: {}", recipient, e),
                }
                outcomes.push(DeliveryOutcome { recipient, result });
            }
            Err(e) => log::error!("delivery task aborted: {}", e),
        }
    }

    outcomes.sort_by_key(|o| o.recipient);
    FanoutReport { outcomes }
}
