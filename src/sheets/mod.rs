//! Spreadsheet source (Sheets-style values API, api key auth).
//!
//! One rectangular read per source. Column semantics come from configured
//! column letters; rows the configured columns cannot be read from are
//! dropped, never zero-filled.

pub mod calls;
pub mod revenue;

use std::time::Duration;

use chrono::{DateTime, NaiveDate, NaiveDateTime, TimeZone, Utc};
use chrono_tz::Tz;
use serde::Deserialize;
use thiserror::Error;

use crate::http::{send_with_retry, RetryPolicy};

#[derive(Debug, Error)]
pub enum SheetsError {
    #[error("HTTP: {0}")]
    Http(#[from] reqwest::Error),
    #[error("Sheets API error {status}: {message}")]
    Api { status: u16, message: String },
}

pub struct SheetsClient {
    http: reqwest::Client,
    api_key: String,
}

#[derive(Debug, Deserialize)]
struct ValuesResponse {
    #[serde(default)]
    values: Vec<Vec<serde_json::Value>>,
}

impl SheetsClient {
    pub fn new(api_key: &str) -> Result<Self, SheetsError> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()?;
        Ok(Self {
            http,
            api_key: api_key.to_string(),
        })
    }

    /// Read the configured rectangle, header row included.
    pub async fn fetch_values(
        &self,
        spreadsheet_id: &str,
        range: &str,
    ) -> Result<Vec<Vec<serde_json::Value>>, SheetsError> {
        let url = format!(
            "https://sheets.googleapis.com/v4/spreadsheets/{}/values/{}",
            spreadsheet_id, range
        );
        let resp = send_with_retry(
            self.http.get(&url).query(&[("key", self.api_key.as_str())]),
            &RetryPolicy::default(),
        )
        .await?;

        let status = resp.status();
        if !status.is_success() {
            let message = resp.text().await.unwrap_or_default();
            return Err(SheetsError::Api {
                status: status.as_u16(),
                message,
            });
        }

        let body: ValuesResponse = resp.json().await?;
        Ok(body.values)
    }
}

// ============================================================================
// Cell helpers shared by both sheet adapters
// ============================================================================

/// Column letter to zero-based index ("A" = 0, "AA" = 26). Anything
/// unparseable maps to column A rather than failing the whole source.
pub fn column_index(letter: &str) -> usize {
    let mut index: usize = 0;
    let mut seen = false;
    for c in letter.trim().chars() {
        if c.is_ascii_alphabetic() {
            seen = true;
            index = index * 26 + (c.to_ascii_uppercase() as usize - 'A' as usize + 1);
        }
    }
    if seen {
        index - 1
    } else {
        0
    }
}

/// Cell as text. Out-of-range cells on short rows read as empty.
pub fn cell(row: &[serde_json::Value], index: usize) -> String {
    match row.get(index) {
        Some(serde_json::Value::String(s)) => s.clone(),
        Some(serde_json::Value::Number(n)) => n.to_string(),
        Some(serde_json::Value::Bool(b)) => b.to_string(),
        _ => String::new(),
    }
}

/// Parse a numeric cell, stripping every kind of whitespace first (amounts
/// arrive as "1 200 000", sometimes with NBSP separators). Empty or
/// non-numeric input is `None`, which excludes the row upstream.
pub fn parse_amount(raw: &str) -> Option<f64> {
    let compact: String = raw.chars().filter(|c| !c.is_whitespace()).collect();
    if compact.is_empty() {
        return None;
    }
    if let Ok(v) = compact.parse::<f64>() {
        return Some(v);
    }
    // Single decimal comma, e.g. "1200,50".
    if compact.matches(',').count() == 1 {
        return compact.replace(',', ".").parse::<f64>().ok();
    }
    None
}

/// Truthiness of an explicit success-flag cell.
pub fn parse_flag(raw: &str) -> bool {
    matches!(
        raw.trim().to_lowercase().as_str(),
        "1" | "true" | "yes" | "y" | "+" | "ok"
    )
}

const DATETIME_FORMATS: &[&str] = &["%Y-%m-%d %H:%M:%S", "%Y-%m-%d %H:%M", "%d.%m.%Y %H:%M"];
const DATE_FORMATS: &[&str] = &["%Y-%m-%d", "%d.%m.%Y", "%d/%m/%Y"];

/// Parse a date or datetime cell in the business timezone. Date-only cells
/// resolve to local midnight so day-granular rows land inside full-day
/// period bounds.
pub fn parse_sheet_date(raw: &str, tz: Tz) -> Option<DateTime<Utc>> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return None;
    }

    for format in DATETIME_FORMATS {
        if let Ok(naive) = NaiveDateTime::parse_from_str(trimmed, format) {
            return tz
                .from_local_datetime(&naive)
                .earliest()
                .map(|dt| dt.with_timezone(&Utc));
        }
    }
    for format in DATE_FORMATS {
        if let Ok(date) = NaiveDate::parse_from_str(trimmed, format) {
            let naive = date.and_hms_opt(0, 0, 0)?;
            return tz
                .from_local_datetime(&naive)
                .earliest()
                .map(|dt| dt.with_timezone(&Utc));
        }
    }
    None
}
