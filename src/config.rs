//! Configuration loaded once from `~/.salespulse/config.json`.
//!
//! The config is an immutable value: derived data (timezone, classification
//! id sets) is computed by methods on demand, never stored back onto the
//! struct, so it cannot drift from the fields it came from.

use std::collections::HashSet;
use std::fs;
use std::path::PathBuf;

use chrono_tz::Tz;
use serde::{Deserialize, Serialize};

/// Fallback when the configured timezone string does not parse.
const DEFAULT_TIMEZONE: Tz = chrono_tz::Asia::Tashkent;

/// Configuration stored in ~/.salespulse/config.json
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Config {
    #[serde(default = "default_timezone")]
    pub timezone: String,
    pub crm: CrmConfig,
    #[serde(default)]
    pub lead_classification: ClassificationConfig,
    /// Which call source is authoritative. An enum, so "never both" holds by
    /// construction.
    #[serde(default)]
    pub call_source: CallSource,
    #[serde(default)]
    pub sheets: SheetsConfig,
    #[serde(default)]
    pub delivery: DeliveryConfig,
    #[serde(default)]
    pub schedules: Schedules,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CrmConfig {
    /// Account base URL, e.g. "https://acme.amocrm.ru".
    pub base_url: String,
    pub access_token: String,
    /// Restrict leads to one pipeline when set; otherwise all pipelines count.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pipeline_id: Option<i64>,
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
}

/// Opaque status / loss-reason id sets. The aggregator only ever tests
/// membership; business meaning lives entirely in this configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClassificationConfig {
    #[serde(default)]
    pub qualified_status_ids: Vec<i64>,
    #[serde(default)]
    pub won_status_ids: Vec<i64>,
    #[serde(default)]
    pub not_qualified_reason_ids: Vec<i64>,
}

/// Derived set form of [`ClassificationConfig`], built per aggregation call.
#[derive(Debug, Clone)]
pub struct LeadClassification {
    pub qualified: HashSet<i64>,
    pub won: HashSet<i64>,
    pub not_qualified_reasons: HashSet<i64>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CallSource {
    #[default]
    Crm,
    Sheet,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SheetsConfig {
    #[serde(default)]
    pub api_key: String,
    /// Absent section = source not configured = skipped with a log line.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub revenue: Option<RevenueSheetConfig>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub calls: Option<CallsSheetConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RevenueSheetConfig {
    pub spreadsheet_id: String,
    /// A1-notation rectangle including the header row, e.g. "Sales!A1:H".
    pub range: String,
    #[serde(default = "col_a")]
    pub date_column: String,
    #[serde(default = "col_b")]
    pub manager_column: String,
    #[serde(default = "col_c")]
    pub amount_column: String,
    #[serde(default = "col_d")]
    pub course_column: String,
    #[serde(default = "col_e")]
    pub payment_column: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CallsSheetConfig {
    pub spreadsheet_id: String,
    pub range: String,
    #[serde(default = "col_a")]
    pub date_column: String,
    #[serde(default = "col_b")]
    pub manager_column: String,
    #[serde(default = "col_c")]
    pub duration_column: String,
    #[serde(default = "col_d")]
    pub success_column: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeliveryConfig {
    #[serde(default)]
    pub bot_token: String,
    #[serde(default = "default_api_base")]
    pub api_base: String,
}

/// Report cadences. Cron expressions are 5-field, evaluated in the business
/// timezone.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Schedules {
    #[serde(default = "ScheduleEntry::default_daily")]
    pub daily: ScheduleEntry,
    #[serde(default = "ScheduleEntry::default_weekly")]
    pub weekly: ScheduleEntry,
    #[serde(default = "ScheduleEntry::default_monthly")]
    pub monthly: ScheduleEntry,
}

impl Default for Schedules {
    fn default() -> Self {
        Self {
            daily: ScheduleEntry::default_daily(),
            weekly: ScheduleEntry::default_weekly(),
            monthly: ScheduleEntry::default_monthly(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScheduleEntry {
    #[serde(default)]
    pub enabled: bool,
    pub cron: String,
}

impl ScheduleEntry {
    pub fn default_daily() -> Self {
        Self {
            enabled: true,
            cron: "0 20 * * *".to_string(),
        }
    }

    pub fn default_weekly() -> Self {
        Self {
            enabled: true,
            cron: "0 9 * * 1".to_string(),
        }
    }

    pub fn default_monthly() -> Self {
        Self {
            enabled: true,
            cron: "0 9 1 * *".to_string(),
        }
    }
}

fn default_timezone() -> String {
    DEFAULT_TIMEZONE.name().to_string()
}

fn default_request_timeout_secs() -> u64 {
    30
}

fn default_api_base() -> String {
    "https://api.telegram.org".to_string()
}

fn col_a() -> String {
    "A".to_string()
}
fn col_b() -> String {
    "B".to_string()
}
fn col_c() -> String {
    "C".to_string()
}
fn col_d() -> String {
    "D".to_string()
}
fn col_e() -> String {
    "E".to_string()
}

impl Config {
    /// Parse the business timezone, falling back to the default on a bad
    /// string rather than failing every period resolution downstream.
    pub fn tz(&self) -> Tz {
        match self.timezone.parse::<Tz>() {
            Ok(tz) => tz,
            Err(_) => {
                log::warn!(
                    "Unknown timezone '{}', falling back to {}",
                    self.timezone,
                    DEFAULT_TIMEZONE.name()
                );
                DEFAULT_TIMEZONE
            }
        }
    }

    /// Build the membership-set view the aggregator consumes.
    pub fn lead_classification(&self) -> LeadClassification {
        LeadClassification {
            qualified: self
                .lead_classification
                .qualified_status_ids
                .iter()
                .copied()
                .collect(),
            won: self.lead_classification.won_status_ids.iter().copied().collect(),
            not_qualified_reasons: self
                .lead_classification
                .not_qualified_reason_ids
                .iter()
                .copied()
                .collect(),
        }
    }
}

/// Get the state directory (~/.salespulse), creating it on first use.
pub fn state_dir() -> Result<PathBuf, String> {
    let home = dirs::home_dir().ok_or("Could not find home directory")?;
    let dir = home.join(".salespulse");
    if !dir.exists() {
        fs::create_dir_all(&dir).map_err(|e| format!("Failed to create state dir: {}", e))?;
    }
    Ok(dir)
}

/// Load configuration from ~/.salespulse/config.json
pub fn load_config() -> Result<Config, String> {
    let home = dirs::home_dir().ok_or("Could not find home directory")?;
    let config_path = home.join(".salespulse").join("config.json");

    if !config_path.exists() {
        return Err(format!(
            "Config file not found at {}. Create it with at least {{ \"crm\": {{ \"baseUrl\": \"...\", \"accessToken\": \"...\" }} }}",
            config_path.display()
        ));
    }

    let content =
        fs::read_to_string(&config_path).map_err(|e| format!("Failed to read config: {}", e))?;
    let config: Config =
        serde_json::from_str(&content).map_err(|e| format!("Failed to parse config: {}", e))?;

    if config.crm.base_url.is_empty() || config.crm.access_token.is_empty() {
        return Err("crm.baseUrl and crm.accessToken must be set".to_string());
    }

    Ok(config)
}
