//! Normalized domain rows and the aggregated snapshot.
//!
//! Source adapters translate wire records into these shapes; the aggregator
//! consumes only these. Classification ids stay opaque here, their meaning
//! lives in the configured id sets.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One CRM lead observed inside a period.
#[derive(Debug, Clone, PartialEq)]
pub struct Lead {
    pub id: i64,
    pub created_at: DateTime<Utc>,
    pub status_id: i64,
    pub pipeline_id: i64,
    /// CRM user id of the responsible manager. Display names resolve against
    /// the users catalog at aggregation time.
    pub manager_id: i64,
    pub loss_reason_id: Option<i64>,
    pub price: Option<f64>,
    /// Extensible custom-field list, kept as the CRM sent it. Field meaning
    /// is external configuration; no KPI depends on a particular field id.
    pub custom_fields: Vec<CustomFieldValues>,
}

impl Lead {
    /// First value of a custom field as text.
    pub fn custom_field_text(&self, field_id: i64) -> Option<String> {
        let field = self.custom_fields.iter().find(|f| f.field_id == field_id)?;
        match &field.values.first()?.value {
            serde_json::Value::String(s) => Some(s.clone()),
            serde_json::Value::Number(n) => Some(n.to_string()),
            serde_json::Value::Bool(b) => Some(b.to_string()),
            _ => None,
        }
    }

    /// First enum id of an enumerated custom field.
    pub fn custom_field_enum(&self, field_id: i64) -> Option<i64> {
        self.custom_fields
            .iter()
            .find(|f| f.field_id == field_id)?
            .values
            .first()?
            .enum_id
    }
}

/// One entry of a lead's custom-field list.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct CustomFieldValues {
    pub field_id: i64,
    #[serde(default)]
    pub values: Vec<CustomFieldValue>,
}

/// Two shapes occur on the wire: `{ "value": <scalar> }` for plain fields and
/// `{ "value": <label>, "enum_id": <id> }` for enumerated ones.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct CustomFieldValue {
    #[serde(default)]
    pub value: serde_json::Value,
    #[serde(default)]
    pub enum_id: Option<i64>,
}

/// Manager identity as a source provides it. The CRM keys by numeric user id,
/// spreadsheets by free-text name. The two domains are never merged.
#[derive(Debug, Clone, PartialEq)]
pub enum ManagerRef {
    CrmUser(i64),
    Name(String),
}

/// One call event, from either the CRM call log or the calls spreadsheet.
#[derive(Debug, Clone, PartialEq)]
pub struct CallRow {
    pub manager: ManagerRef,
    pub at: DateTime<Utc>,
    pub duration_sec: i64,
    pub success: bool,
}

/// Course modality tag on a revenue row. Unrecognized tags keep their text
/// and count toward the grand total only.
#[derive(Debug, Clone, PartialEq)]
pub enum CourseKind {
    Online,
    Offline,
    Other(String),
}

impl CourseKind {
    pub fn parse(raw: &str) -> Self {
        let tag = raw.trim();
        match tag.to_lowercase().as_str() {
            "online" => Self::Online,
            "offline" => Self::Offline,
            _ => Self::Other(tag.to_string()),
        }
    }
}

/// One payment row from the revenue spreadsheet.
#[derive(Debug, Clone, PartialEq)]
pub struct RevenueRow {
    pub at: DateTime<Utc>,
    pub amount: f64,
    pub manager_name: String,
    pub course: CourseKind,
    pub payment_type: String,
}

/// Read-only CRM reference data used to resolve display labels.
#[derive(Debug, Clone, Default)]
pub struct CrmCatalog {
    pub users: HashMap<i64, String>,
    pub loss_reasons: HashMap<i64, String>,
}

impl CrmCatalog {
    pub fn user_name(&self, id: i64) -> String {
        self.users
            .get(&id)
            .cloned()
            .unwrap_or_else(|| format!("User {}", id))
    }

    pub fn loss_reason_name(&self, id: i64) -> String {
        self.loss_reasons
            .get(&id)
            .cloned()
            .unwrap_or_else(|| format!("Reason {}", id))
    }
}

/// Complete computed KPI payload for one period. Recomputed fresh per call;
/// row vectors carry a deterministic order so equal inputs give equal
/// snapshots.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DashboardSnapshot {
    pub label: String,
    pub revenue_total: f64,
    pub revenue_online: f64,
    pub revenue_offline: f64,
    pub leads_total: u32,
    pub leads_qualified: u32,
    pub leads_not_qualified: u32,
    pub leads_won: u32,
    pub conversion_from_qualified: f64,
    pub not_qualified_reasons: Vec<ReasonCount>,
    pub manager_sales: Vec<ManagerSalesRow>,
    pub manager_calls: Vec<ManagerCallsRow>,
}

impl DashboardSnapshot {
    /// Structurally valid zeroed snapshot, used when aggregation fails so
    /// presentation layers always receive the full shape.
    pub fn empty(label: &str) -> Self {
        Self {
            label: label.to_string(),
            revenue_total: 0.0,
            revenue_online: 0.0,
            revenue_offline: 0.0,
            leads_total: 0,
            leads_qualified: 0,
            leads_not_qualified: 0,
            leads_won: 0,
            conversion_from_qualified: 0.0,
            not_qualified_reasons: Vec::new(),
            manager_sales: Vec::new(),
            manager_calls: Vec::new(),
        }
    }
}

/// Not-qualified loss reason with its resolved (or synthesized) label.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReasonCount {
    pub reason_id: i64,
    pub name: String,
    pub count: u32,
}

/// Per-manager sales breakdown, keyed by CRM user id. Call columns are
/// populated only when the CRM call log is the active call source; the
/// spreadsheet call path keys by name and cannot join this row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ManagerSalesRow {
    pub manager_id: i64,
    pub manager_name: String,
    pub leads_total: u32,
    pub leads_qualified: u32,
    pub deals_won: u32,
    pub won_amount: f64,
    pub calls_total: u32,
    pub avg_call_seconds: i64,
}

/// Per-manager call breakdown, keyed by display name.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ManagerCallsRow {
    pub manager_name: String,
    pub calls_total: u32,
    pub calls_successful: u32,
    pub total_duration_sec: i64,
    pub avg_duration_sec: i64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn course_kind_parses_case_insensitively() {
        assert_eq!(CourseKind::parse(" Online "), CourseKind::Online);
        assert_eq!(CourseKind::parse("OFFLINE"), CourseKind::Offline);
        assert_eq!(
            CourseKind::parse("hybrid"),
            CourseKind::Other("hybrid".to_string())
        );
    }

    #[test]
    fn custom_field_accessors_handle_both_shapes() {
        let custom_fields: Vec<CustomFieldValues> = serde_json::from_str(
            r#"[
                { "field_id": 9001, "values": [ { "value": "instagram" } ] },
                { "field_id": 9002, "values": [ { "value": "Tashkent", "enum_id": 55 } ] },
                { "field_id": 9003, "values": [ { "value": 42 } ] },
                { "field_id": 9004, "values": [] }
            ]"#,
        )
        .unwrap();
        let lead = Lead {
            id: 1,
            created_at: Utc::now(),
            status_id: 142,
            pipeline_id: 771,
            manager_id: 101,
            loss_reason_id: None,
            price: None,
            custom_fields,
        };

        assert_eq!(lead.custom_field_text(9001), Some("instagram".to_string()));
        assert_eq!(lead.custom_field_text(9002), Some("Tashkent".to_string()));
        assert_eq!(lead.custom_field_text(9003), Some("42".to_string()));
        assert_eq!(lead.custom_field_text(9004), None);
        assert_eq!(lead.custom_field_text(9999), None);

        assert_eq!(lead.custom_field_enum(9002), Some(55));
        assert_eq!(lead.custom_field_enum(9001), None);
    }

    #[test]
    fn catalog_synthesizes_missing_labels() {
        let catalog = CrmCatalog::default();
        assert_eq!(catalog.user_name(7), "User 7");
        assert_eq!(catalog.loss_reason_name(5), "Reason 5");
    }

    #[test]
    fn empty_snapshot_keeps_full_shape() {
        let snapshot = DashboardSnapshot::empty("2025-03-14");
        assert_eq!(snapshot.label, "2025-03-14");
        assert_eq!(snapshot.leads_total, 0);
        assert_eq!(snapshot.conversion_from_qualified, 0.0);

        let json = serde_json::to_value(&snapshot).unwrap();
        assert!(json.get("notQualifiedReasons").unwrap().is_array());
        assert!(json.get("managerSales").unwrap().is_array());
    }
}
