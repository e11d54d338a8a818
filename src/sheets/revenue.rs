//! Revenue rows from the payments spreadsheet. Optional source.

use chrono_tz::Tz;

use super::{cell, column_index, parse_amount, parse_sheet_date, SheetsClient, SheetsError};
use crate::config::RevenueSheetConfig;
use crate::period::Period;
use crate::types::{CourseKind, RevenueRow};

/// Read the whole configured range once, then filter to the period
/// client-side. Rows with an unreadable date or amount are excluded, not
/// zero-filled.
pub async fn fetch_revenue(
    client: &SheetsClient,
    config: &RevenueSheetConfig,
    period: &Period,
    tz: Tz,
) -> Result<Vec<RevenueRow>, SheetsError> {
    let values = client
        .fetch_values(&config.spreadsheet_id, &config.range)
        .await?;
    Ok(normalize(&values, config, period, tz))
}

fn normalize(
    values: &[Vec<serde_json::Value>],
    config: &RevenueSheetConfig,
    period: &Period,
    tz: Tz,
) -> Vec<RevenueRow> {
    let date_idx = column_index(&config.date_column);
    let amount_idx = column_index(&config.amount_column);
    let manager_idx = column_index(&config.manager_column);
    let course_idx = column_index(&config.course_column);
    let payment_idx = column_index(&config.payment_column);

    let mut rows = Vec::new();
    for row in values.iter().skip(1) {
        let Some(at) = parse_sheet_date(&cell(row, date_idx), tz) else {
            continue;
        };
        if at < period.from || at > period.to {
            continue;
        }
        let Some(amount) = parse_amount(&cell(row, amount_idx)) else {
            continue;
        };
        rows.push(RevenueRow {
            at,
            amount,
            manager_name: cell(row, manager_idx).trim().to_string(),
            course: CourseKind::parse(&cell(row, course_idx)),
            payment_type: cell(row, payment_idx).trim().to_string(),
        });
    }
    log::info!("sheet revenue: {} rows for {}", rows.len(), period.label);
    rows
}
