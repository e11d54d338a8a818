//! Call rows from the call-center spreadsheet. Optional source; only active
//! when `callSource` is `sheet`.

use chrono_tz::Tz;

use super::{cell, column_index, parse_amount, parse_flag, parse_sheet_date, SheetsClient, SheetsError};
use crate::config::CallsSheetConfig;
use crate::period::Period;
use crate::types::{CallRow, ManagerRef};

/// Read the configured range once and filter to the period client-side.
/// Success comes from the explicit flag column, not a duration heuristic.
pub async fn fetch_calls(
    client: &SheetsClient,
    config: &CallsSheetConfig,
    period: &Period,
    tz: Tz,
) -> Result<Vec<CallRow>, SheetsError> {
    let values = client
        .fetch_values(&config.spreadsheet_id, &config.range)
        .await?;
    Ok(normalize(&values, config, period, tz))
}

fn normalize(
    values: &[Vec<serde_json::Value>],
    config: &CallsSheetConfig,
    period: &Period,
    tz: Tz,
) -> Vec<CallRow> {
    let date_idx = column_index(&config.date_column);
    let manager_idx = column_index(&config.manager_column);
    let duration_idx = column_index(&config.duration_column);
    let success_idx = column_index(&config.success_column);

    let mut rows = Vec::new();
    for row in values.iter().skip(1) {
        let Some(at) = parse_sheet_date(&cell(row, date_idx), tz) else {
            continue;
        };
        if at < period.from || at > period.to {
            continue;
        }
        let manager_name = cell(row, manager_idx).trim().to_string();
        if manager_name.is_empty() {
            // The breakdown keys by name; an anonymous row cannot land anywhere.
            continue;
        }
        let duration_sec = parse_amount(&cell(row, duration_idx))
            .map(|d| d.round() as i64)
            .unwrap_or(0);
        rows.push(CallRow {
            manager: ManagerRef::Name(manager_name),
            at,
            duration_sec,
            success: parse_flag(&cell(row, success_idx)),
        });
    }
    log::info!("sheet calls: {} rows for {}", rows.len(), period.label);
    rows
}
