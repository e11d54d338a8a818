//! Leads list — the primary source. Failure here fails the whole
//! aggregation; zero leads and a failed fetch are different states.

use chrono::{TimeZone, Utc};
use serde::Deserialize;

use super::{paginate, CrmClient, CrmError, PageOf, PAGE_LIMIT};
use crate::period::Period;
use crate::types::{CustomFieldValues, Lead};

// ============================================================================
// Wire types
// ============================================================================

#[derive(Debug, Deserialize)]
struct LeadsEnvelope {
    #[serde(rename = "_embedded", default)]
    embedded: Option<LeadsEmbedded>,
    #[serde(rename = "_links", default)]
    links: super::Links,
}

#[derive(Debug, Default, Deserialize)]
struct LeadsEmbedded {
    #[serde(default)]
    leads: Vec<WireLead>,
}

#[derive(Debug, Deserialize)]
struct WireLead {
    id: i64,
    #[serde(default)]
    created_at: i64,
    #[serde(default)]
    status_id: i64,
    #[serde(default)]
    pipeline_id: i64,
    #[serde(default)]
    responsible_user_id: i64,
    #[serde(default)]
    price: Option<f64>,
    #[serde(default)]
    loss_reason_id: Option<i64>,
    // The CRM sends null rather than [] when a lead has no custom fields.
    #[serde(default)]
    custom_fields_values: Option<Vec<CustomFieldValues>>,
}

impl LeadsEnvelope {
    fn into_page(self) -> PageOf<WireLead> {
        PageOf {
            items: self.embedded.map(|e| e.leads).unwrap_or_default(),
            has_next: self.links.next.is_some(),
        }
    }
}

// ============================================================================
// Fetch
// ============================================================================

/// Fetch all leads created inside the period. The created-at filter is
/// server-side; pages accumulate until the next link disappears.
pub async fn fetch_leads(client: &CrmClient, period: &Period) -> Result<Vec<Lead>, CrmError> {
    let from = period.from.timestamp();
    let to = period.to.timestamp();

    let wire = paginate(|page| async move {
        let mut query = vec![
            ("page".to_string(), page.to_string()),
            ("limit".to_string(), PAGE_LIMIT.to_string()),
            ("filter[created_at][from]".to_string(), from.to_string()),
            ("filter[created_at][to]".to_string(), to.to_string()),
        ];
        if let Some(pipeline_id) = client.pipeline_id {
            query.push(("filter[pipeline_id]".to_string(), pipeline_id.to_string()));
        }

        match client
            .get_json::<LeadsEnvelope>("/api/v4/leads", &query)
            .await?
        {
            Some(envelope) => Ok(envelope.into_page()),
            None => Ok(PageOf::last(Vec::new())),
        }
    })
    .await?;

    let total = wire.len();
    let leads: Vec<Lead> = wire.into_iter().filter_map(normalize).collect();
    if leads.len() < total {
        log::debug!("crm leads: dropped {} malformed rows", total - leads.len());
    }
    log::info!("crm leads: {} rows for {}", leads.len(), period.label);
    Ok(leads)
}

fn normalize(wire: WireLead) -> Option<Lead> {
    let created_at = Utc.timestamp_opt(wire.created_at, 0).single()?;
    Some(Lead {
        id: wire.id,
        created_at,
        status_id: wire.status_id,
        pipeline_id: wire.pipeline_id,
        manager_id: wire.responsible_user_id,
        loss_reason_id: wire.loss_reason_id,
        price: wire.price,
        custom_fields: wire.custom_fields_values.unwrap_or_default(),
    })
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    const PAGE_FIXTURE: &str = r#"{
        "_page": 1,
        "_links": {
            "self": { "href": "https://acme.amocrm.ru/api/v4/leads?page=1" },
            "next": { "href": "https://acme.amocrm.ru/api/v4/leads?page=2" }
        },
        "_embedded": {
            "leads": [
                {
                    "id": 31411,
                    "name": "New lead",
                    "price": 500000,
                    "responsible_user_id": 101,
                    "status_id": 142,
                    "pipeline_id": 771,
                    "loss_reason_id": null,
                    "created_at": 1742000000,
                    "custom_fields_values": [
                        { "field_id": 9001, "values": [ { "value": "instagram" } ] },
                        { "field_id": 9002, "values": [ { "value": "Tashkent", "enum_id": 55 } ] }
                    ]
                },
                {
                    "id": 31412,
                    "price": null,
                    "responsible_user_id": 102,
                    "status_id": 143,
                    "pipeline_id": 771,
                    "loss_reason_id": 5,
                    "created_at": 1742000100,
                    "custom_fields_values": null
                }
            ]
        }
    }"#;

    #[test]
    fn envelope_page_parses_and_normalizes() {
        let envelope: LeadsEnvelope = serde_json::from_str(PAGE_FIXTURE).unwrap();
        let page = envelope.into_page();
        assert!(page.has_next);
        assert_eq!(page.items.len(), 2);

        let leads: Vec<Lead> = page.items.into_iter().filter_map(normalize).collect();
        assert_eq!(leads[0].id, 31411);
        assert_eq!(leads[0].manager_id, 101);
        assert_eq!(leads[0].price, Some(500000.0));
        assert_eq!(leads[0].loss_reason_id, None);
        assert_eq!(leads[1].price, None);
        assert_eq!(leads[1].loss_reason_id, Some(5));
        assert_eq!(leads[0].created_at.timestamp(), 1742000000);

        // Custom fields ride along on the normalized lead; a null wire list
        // normalizes to empty.
        assert_eq!(
            leads[0].custom_field_text(9001),
            Some("instagram".to_string())
        );
        assert_eq!(leads[0].custom_field_enum(9002), Some(55));
        assert!(leads[1].custom_fields.is_empty());
    }

    #[test]
    fn final_page_has_no_next_link() {
        let json = r#"{
            "_links": { "self": { "href": "https://acme.amocrm.ru/api/v4/leads?page=3" } },
            "_embedded": { "leads": [] }
        }"#;
        let envelope: LeadsEnvelope = serde_json::from_str(json).unwrap();
        let page = envelope.into_page();
        assert!(!page.has_next);
        assert!(page.items.is_empty());
    }

    #[test]
    fn bare_envelope_is_an_empty_last_page() {
        let envelope: LeadsEnvelope = serde_json::from_str("{}").unwrap();
        let page = envelope.into_page();
        assert!(!page.has_next);
        assert!(page.items.is_empty());
    }

    #[test]
    fn out_of_range_timestamp_drops_the_row() {
        let wire = WireLead {
            id: 1,
            created_at: i64::MAX,
            status_id: 0,
            pipeline_id: 0,
            responsible_user_id: 0,
            price: None,
            loss_reason_id: None,
            custom_fields_values: None,
        };
        assert!(normalize(wire).is_none());
    }
}
