//! Call log from the CRM notes endpoint (`call_in` / `call_out` notes).
//! Optional source: callers recover a failed fetch as an empty set.

use chrono::{TimeZone, Utc};
use serde::Deserialize;

use super::{paginate, CrmClient, CrmError, PageOf, PAGE_LIMIT};
use crate::period::Period;
use crate::types::{CallRow, ManagerRef};

// ============================================================================
// Wire types
// ============================================================================

#[derive(Debug, Deserialize)]
struct NotesEnvelope {
    #[serde(rename = "_embedded", default)]
    embedded: Option<NotesEmbedded>,
    #[serde(rename = "_links", default)]
    links: super::Links,
}

#[derive(Debug, Default, Deserialize)]
struct NotesEmbedded {
    #[serde(default)]
    notes: Vec<WireNote>,
}

#[derive(Debug, Deserialize)]
struct WireNote {
    #[serde(default)]
    responsible_user_id: Option<i64>,
    #[serde(default)]
    created_by: Option<i64>,
    #[serde(default)]
    created_at: i64,
    #[serde(default)]
    params: Option<WireCallParams>,
}

/// Call details live in the note's params bag; everything but the duration
/// is ignored.
#[derive(Debug, Default, Deserialize)]
struct WireCallParams {
    #[serde(default)]
    duration: Option<i64>,
}

impl NotesEnvelope {
    fn into_page(self) -> PageOf<WireNote> {
        PageOf {
            items: self.embedded.map(|e| e.notes).unwrap_or_default(),
            has_next: self.links.next.is_some(),
        }
    }
}

// ============================================================================
// Fetch
// ============================================================================

/// Fetch incoming and outgoing call notes created inside the period.
pub async fn fetch_calls(client: &CrmClient, period: &Period) -> Result<Vec<CallRow>, CrmError> {
    let from = period.from.timestamp();
    let to = period.to.timestamp();

    let wire = paginate(|page| async move {
        let query = vec![
            ("page".to_string(), page.to_string()),
            ("limit".to_string(), PAGE_LIMIT.to_string()),
            ("filter[note_type][]".to_string(), "call_in".to_string()),
            ("filter[note_type][]".to_string(), "call_out".to_string()),
            ("filter[created_at][from]".to_string(), from.to_string()),
            ("filter[created_at][to]".to_string(), to.to_string()),
        ];

        match client
            .get_json::<NotesEnvelope>("/api/v4/leads/notes", &query)
            .await?
        {
            Some(envelope) => Ok(envelope.into_page()),
            None => Ok(PageOf::last(Vec::new())),
        }
    })
    .await?;

    let total = wire.len();
    let calls: Vec<CallRow> = wire.into_iter().filter_map(normalize).collect();
    if calls.len() < total {
        log::debug!("crm calls: dropped {} malformed rows", total - calls.len());
    }
    log::info!("crm calls: {} rows for {}", calls.len(), period.label);
    Ok(calls)
}

fn normalize(wire: WireNote) -> Option<CallRow> {
    // Older accounts leave responsible_user_id empty on telephony notes.
    let manager_id = wire.responsible_user_id.or(wire.created_by)?;
    let at = Utc.timestamp_opt(wire.created_at, 0).single()?;
    let duration_sec = wire.params.and_then(|p| p.duration).unwrap_or(0);
    Some(CallRow {
        manager: ManagerRef::CrmUser(manager_id),
        at,
        duration_sec,
        // A zero duration is a call that never connected.
        success: duration_sec > 0,
    })
}

// ============================================================================
// Tests
// ============================================================================
