//! Read-only CRM reference data: users, loss reasons, pipelines with their
//! statuses. Optional sources; a failed part degrades to synthesized labels.

use std::collections::HashMap;

use serde::Deserialize;

use super::{paginate, CrmClient, CrmError, PageOf, PAGE_LIMIT};
use crate::error::recover_optional_map;
use crate::types::CrmCatalog;

// ============================================================================
// Wire types
// ============================================================================

#[derive(Debug, Deserialize)]
struct UsersEnvelope {
    #[serde(rename = "_embedded", default)]
    embedded: Option<UsersEmbedded>,
    #[serde(rename = "_links", default)]
    links: super::Links,
}

#[derive(Debug, Default, Deserialize)]
struct UsersEmbedded {
    #[serde(default)]
    users: Vec<WireNamed>,
}

#[derive(Debug, Deserialize)]
struct ReasonsEnvelope {
    #[serde(rename = "_embedded", default)]
    embedded: Option<ReasonsEmbedded>,
    #[serde(rename = "_links", default)]
    links: super::Links,
}

#[derive(Debug, Default, Deserialize)]
struct ReasonsEmbedded {
    #[serde(default)]
    loss_reasons: Vec<WireNamed>,
}

#[derive(Debug, Deserialize)]
struct WireNamed {
    id: i64,
    #[serde(default)]
    name: String,
}

#[derive(Debug, Deserialize)]
struct PipelinesEnvelope {
    #[serde(rename = "_embedded", default)]
    embedded: Option<PipelinesEmbedded>,
}

#[derive(Debug, Default, Deserialize)]
struct PipelinesEmbedded {
    #[serde(default)]
    pipelines: Vec<WirePipeline>,
}

#[derive(Debug, Deserialize)]
struct WirePipeline {
    id: i64,
    #[serde(default)]
    name: String,
    #[serde(rename = "_embedded", default)]
    embedded: Option<StatusesEmbedded>,
}

#[derive(Debug, Default, Deserialize)]
struct StatusesEmbedded {
    #[serde(default)]
    statuses: Vec<WireNamed>,
}

// ============================================================================
// Public shapes for the operator-facing pipeline listing
// ============================================================================

#[derive(Debug, Clone)]
pub struct PipelineInfo {
    pub id: i64,
    pub name: String,
    pub statuses: Vec<StatusInfo>,
}

#[derive(Debug, Clone)]
pub struct StatusInfo {
    pub id: i64,
    pub name: String,
}

// ============================================================================
// Fetch
// ============================================================================

/// Users keyed by id. Entries with empty names are left out so the catalog
/// fallback synthesizes a label instead of showing a blank.
pub async fn fetch_users(client: &CrmClient) -> Result<HashMap<i64, String>, CrmError> {
    let wire = paginate(|page| async move {
        let query = vec![
            ("page".to_string(), page.to_string()),
            ("limit".to_string(), PAGE_LIMIT.to_string()),
        ];
        match client.get_json::<UsersEnvelope>("/api/v4/users", &query).await? {
            Some(envelope) => Ok(PageOf {
                items: envelope.embedded.map(|e| e.users).unwrap_or_default(),
                has_next: envelope.links.next.is_some(),
            }),
            None => Ok(PageOf::last(Vec::new())),
        }
    })
    .await?;

    Ok(named_map(wire))
}

/// Loss reasons keyed by id.
pub async fn fetch_loss_reasons(client: &CrmClient) -> Result<HashMap<i64, String>, CrmError> {
    let wire = paginate(|page| async move {
        let query = vec![
            ("page".to_string(), page.to_string()),
            ("limit".to_string(), PAGE_LIMIT.to_string()),
        ];
        match client
            .get_json::<ReasonsEnvelope>("/api/v4/leads/loss_reasons", &query)
            .await?
        {
            Some(envelope) => Ok(PageOf {
                items: envelope.embedded.map(|e| e.loss_reasons).unwrap_or_default(),
                has_next: envelope.links.next.is_some(),
            }),
            None => Ok(PageOf::last(Vec::new())),
        }
    })
    .await?;

    Ok(named_map(wire))
}

/// All pipelines with their embedded statuses, single-shot.
pub async fn fetch_pipelines(client: &CrmClient) -> Result<Vec<PipelineInfo>, CrmError> {
    let envelope = client
        .get_json::<PipelinesEnvelope>("/api/v4/leads/pipelines", &[])
        .await?
        .unwrap_or(PipelinesEnvelope { embedded: None });

    let pipelines = envelope
        .embedded
        .map(|e| e.pipelines)
        .unwrap_or_default()
        .into_iter()
        .map(|p| PipelineInfo {
            id: p.id,
            name: p.name,
            statuses: p
                .embedded
                .map(|e| e.statuses)
                .unwrap_or_default()
                .into_iter()
                .map(|s| StatusInfo {
                    id: s.id,
                    name: s.name,
                })
                .collect(),
        })
        .collect();

    Ok(pipelines)
}

/// Users and loss reasons together, each degrading to empty on failure.
pub async fn fetch_catalog(client: &CrmClient) -> CrmCatalog {
    let (users, loss_reasons) = tokio::join!(fetch_users(client), fetch_loss_reasons(client));
    CrmCatalog {
        users: recover_optional_map("crm users", users),
        loss_reasons: recover_optional_map("crm loss reasons", loss_reasons),
    }
}

fn named_map(wire: Vec<WireNamed>) -> HashMap<i64, String> {
    wire.into_iter()
        .filter(|w| !w.name.trim().is_empty())
        .map(|w| (w.id, w.name))
        .collect()
}

// ============================================================================
// Tests
// ============================================================================
