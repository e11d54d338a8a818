//! Error types for the aggregation pipeline
//!
//! Errors are classified by blast radius:
//! - Fatal to the snapshot: the primary CRM leads fetch failing, or a broken
//!   configuration — without leads the snapshot is meaningless.
//! - Recovered locally: optional sources (sheet revenue, sheet/CRM calls,
//!   catalog metadata) degrade to an empty row set and a log line.
//! - Per-recipient: delivery failures never escape the fan-out.

use thiserror::Error;

use crate::crm::CrmError;
use crate::delivery::DeliveryError;
use crate::report::LayoutError;
use crate::subscribers::StoreError;

/// Error type for snapshot/report pipeline runs.
#[derive(Debug, Error)]
pub enum PipelineError {
    // Fatal: leads are the primary source. A snapshot without them is
    // indistinguishable from "no sales happened" and must not be served.
    #[error("CRM leads fetch failed: {0}")]
    Crm(#[from] CrmError),

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Report layout failed: {0}")]
    Layout(#[from] LayoutError),

    // A manual report aimed at a chat id the preference store has never seen.
    // Distinct from a delivery failure: nothing was attempted.
    #[error("No subscriber with chat id {0}")]
    RecipientNotFound(i64),

    #[error("Subscriber store error: {0}")]
    Store(#[from] StoreError),

    // Only raised for single-recipient sends; fan-out keeps per-recipient
    // failures inside the FanoutReport instead.
    #[error("Delivery failed: {0}")]
    Delivery(#[from] DeliveryError),
}

impl PipelineError {
    /// Whether retrying the same run might succeed without operator action.
    pub fn is_retryable(&self) -> bool {
        match self {
            PipelineError::Crm(e) => e.is_retryable(),
            PipelineError::Delivery(e) => e.is_retryable(),
            PipelineError::Configuration(_)
            | PipelineError::Layout(_)
            | PipelineError::RecipientNotFound(_)
            | PipelineError::Store(_) => false,
        }
    }
}

/// Log-and-discard recovery for optional sources (SourceUnavailable and
/// ConfigurationMissing both land here): a failed optional fetch becomes an
/// empty row set so the snapshot still forms from what did arrive.
pub fn recover_optional<T, E: std::fmt::Display>(
    source: &str,
    result: Result<Vec<T>, E>,
) -> Vec<T> {
    match result {
        Ok(rows) => rows,
        Err(e) => {
            log::warn!("{} unavailable, continuing without it: {}", source, e);
            Vec::new()
        }
    }
}

/// Same recovery for catalog lookup maps (users, loss reasons).
pub fn recover_optional_map<K, V, E: std::fmt::Display>(
    source: &str,
    result: Result<std::collections::HashMap<K, V>, E>,
) -> std::collections::HashMap<K, V> {
    match result {
        Ok(map) => map,
        Err(e) => {
            log::warn!("{} unavailable, continuing without it: {}", source, e);
            std::collections::HashMap::new()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn optional_source_failure_recovers_to_empty() {
        let rows: Vec<i32> = recover_optional("revenue sheet", Err::<Vec<i32>, _>("boom"));
        assert!(rows.is_empty());
    }

    #[test]
    fn optional_source_success_passes_through() {
        let rows = recover_optional("revenue sheet", Ok::<_, String>(vec![1, 2, 3]));
        assert_eq!(rows, vec![1, 2, 3]);
    }

    #[test]
    fn recipient_not_found_is_not_retryable() {
        assert!(!PipelineError::RecipientNotFound(42).is_retryable());
    }
}
