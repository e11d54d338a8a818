//! End-to-end report pipeline.
//!
//! One logical job per invocation: resolve the period, fetch all sources
//! concurrently, aggregate, render, deliver. Only the CRM leads fetch can
//! fail the job; every other source degrades to an empty set with a log
//! line, including sources that are simply not configured.

use std::sync::Arc;

use chrono::{NaiveDate, Utc};

use crate::aggregate::aggregate;
use crate::config::{CallSource, Config};
use crate::crm::{calls as crm_calls, catalog, leads, CrmClient};
use crate::delivery::{fan_out, FanoutReport, Messenger};
use crate::error::{recover_optional, PipelineError};
use crate::period::{self, Period, UpperBound};
use crate::report::{DocumentLayout, MarkdownLayout, RenderedDocument, ReportContent};
use crate::sheets::{calls as sheet_calls, revenue as sheet_revenue, SheetsClient};
use crate::subscribers::{Cadence, JsonSubscriberStore};
use crate::types::{CallRow, DashboardSnapshot, RevenueRow};

pub struct Pipeline {
    config: Arc<Config>,
    crm: CrmClient,
    sheets: SheetsClient,
}

impl Pipeline {
    pub fn new(config: Arc<Config>) -> Result<Self, PipelineError> {
        let crm = CrmClient::new(&config.crm)?;
        let sheets = SheetsClient::new(&config.sheets.api_key)
            .map_err(|e| PipelineError::Configuration(format!("sheets client: {}", e)))?;
        Ok(Self {
            config,
            crm,
            sheets,
        })
    }

    /// Resolve a period request against the business timezone. A custom
    /// range needs both dates; anything less falls back to today.
    pub fn period_for(
        &self,
        key: &str,
        from: Option<NaiveDate>,
        to: Option<NaiveDate>,
        bound: UpperBound,
    ) -> Period {
        let now = Utc::now();
        let tz = self.config.tz();
        match (from, to) {
            (Some(from), Some(to)) => period::resolve_custom(from, to, now, tz, bound),
            (None, None) => period::resolve_key(key, now, tz, bound),
            _ => {
                log::warn!("custom period needs both --from and --to, using today");
                period::resolve_key("today", now, tz, bound)
            }
        }
    }

    /// Fetch everything for the period and aggregate. Fails only on the
    /// primary (CRM leads) source.
    pub async fn snapshot(&self, period: &Period) -> Result<DashboardSnapshot, PipelineError> {
        let (leads, calls, revenue, catalog) = tokio::join!(
            leads::fetch_leads(&self.crm, period),
            self.fetch_calls(period),
            self.fetch_revenue(period),
            catalog::fetch_catalog(&self.crm),
        );
        let leads = leads?;

        Ok(aggregate(
            &leads,
            &calls,
            &revenue,
            &self.config.lead_classification(),
            &catalog,
            &period.label,
        ))
    }

    /// Presentation-friendly variant: failures come back as one error next
    /// to a structurally valid zeroed snapshot.
    pub async fn snapshot_or_empty(
        &self,
        period: &Period,
    ) -> (DashboardSnapshot, Option<PipelineError>) {
        match self.snapshot(period).await {
            Ok(snapshot) => (snapshot, None),
            Err(e) => {
                log::error!("aggregation failed for {}: {}", period.label, e);
                (DashboardSnapshot::empty(&period.label), Some(e))
            }
        }
    }

    async fn fetch_calls(&self, period: &Period) -> Vec<CallRow> {
        match self.config.call_source {
            CallSource::Crm => recover_optional(
                "crm calls",
                crm_calls::fetch_calls(&self.crm, period).await,
            ),
            CallSource::Sheet => match &self.config.sheets.calls {
                Some(sheet) if !self.config.sheets.api_key.is_empty() => recover_optional(
                    "sheet calls",
                    sheet_calls::fetch_calls(&self.sheets, sheet, period, self.config.tz()).await,
                ),
                _ => {
                    log::info!("sheet calls not configured, skipping");
                    Vec::new()
                }
            },
        }
    }

    async fn fetch_revenue(&self, period: &Period) -> Vec<RevenueRow> {
        match &self.config.sheets.revenue {
            Some(sheet) if !self.config.sheets.api_key.is_empty() => recover_optional(
                "sheet revenue",
                sheet_revenue::fetch_revenue(&self.sheets, sheet, period, self.config.tz()).await,
            ),
            _ => {
                log::info!("sheet revenue not configured, skipping");
                Vec::new()
            }
        }
    }

    pub fn render(&self, snapshot: &DashboardSnapshot) -> Result<RenderedDocument, PipelineError> {
        let content = ReportContent::build(snapshot);
        Ok(MarkdownLayout.render(&content)?)
    }

    pub async fn deliver(
        &self,
        document: &RenderedDocument,
        recipients: &[i64],
    ) -> Result<FanoutReport, PipelineError> {
        if self.config.delivery.bot_token.is_empty() {
            return Err(PipelineError::Configuration(
                "delivery.botToken is not set".to_string(),
            ));
        }
        let messenger: Arc<dyn Messenger> =
            Arc::new(crate::telegram::TelegramMessenger::new(&self.config.delivery)?);
        Ok(fan_out(messenger, document, recipients).await)
    }

    /// Build and deliver one cadence report to its opted-in subscribers.
    pub async fn run_for_cadence(
        &self,
        store: &JsonSubscriberStore,
        cadence: Cadence,
        period: &Period,
    ) -> Result<FanoutReport, PipelineError> {
        let recipients: Vec<i64> = store
            .list_for(cadence)?
            .iter()
            .map(|s| s.chat_id)
            .collect();
        if recipients.is_empty() {
            log::info!("no {} subscribers, skipping {}", cadence, period.label);
            return Ok(FanoutReport::default());
        }

        let snapshot = self.snapshot(period).await?;
        let document = self.render(&snapshot)?;
        let report = self.deliver(&document, &recipients).await?;
        log::info!(
            "{} report {}: delivered {}/{}",
            cadence,
            period.label,
            report.sent(),
            report.attempted()
        );
        Ok(report)
    }

    /// Ad-hoc report for one known subscriber. Unknown chat ids are a
    /// distinct error, not a delivery failure.
    pub async fn run_for_chat(
        &self,
        store: &JsonSubscriberStore,
        chat_id: i64,
        period: &Period,
    ) -> Result<FanoutReport, PipelineError> {
        if store.find(chat_id)?.is_none() {
            return Err(PipelineError::RecipientNotFound(chat_id));
        }
        let snapshot = self.snapshot(period).await?;
        let document = self.render(&snapshot)?;
        self.deliver(&document, &[chat_id]).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_pipeline() -> Pipeline {
        let config: Config = serde_json::from_str(
            r#"{
                "crm": { "baseUrl": "https://acme.amocrm.ru", "accessToken": "token" },
                "delivery": { "botToken": "123:abc" }
            }"#,
        )
        .unwrap();
        Pipeline::new(Arc::new(config)).unwrap()
    }

    fn empty_store(dir: &tempfile::TempDir) -> JsonSubscriberStore {
        JsonSubscriberStore::at(&dir.path().join("subscribers.json"))
    }

    #[tokio::test]
    async fn unknown_chat_is_recipient_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let store = empty_store(&dir);
        let pipeline = test_pipeline();
        let period = pipeline.period_for("today", None, None, UpperBound::Live);

        let err = pipeline
            .run_for_chat(&store, 777, &period)
            .await
            .unwrap_err();
        assert!(matches!(err, PipelineError::RecipientNotFound(777)));
    }

    #[tokio::test]
    async fn cadence_without_subscribers_short_circuits() {
        let dir = tempfile::tempdir().unwrap();
        let store = empty_store(&dir);
        let pipeline = test_pipeline();
        let period = pipeline.period_for("yesterday", None, None, UpperBound::EndOfDay);

        let report = pipeline
            .run_for_cadence(&store, Cadence::Daily, &period)
            .await
            .unwrap();
        assert_eq!(report.attempted(), 0);
    }

    #[test]
    fn half_specified_custom_range_falls_back_to_today() {
        let pipeline = test_pipeline();
        let from = NaiveDate::from_ymd_opt(2025, 3, 1);
        let period = pipeline.period_for("custom", from, None, UpperBound::Live);
        let today = Utc::now()
            .with_timezone(&pipeline.config.tz())
            .date_naive()
            .format("%Y-%m-%d")
            .to_string();
        assert_eq!(period.label, today);
    }

    #[test]
    fn render_produces_markdown_document() {
        let pipeline = test_pipeline();
        let snapshot = DashboardSnapshot::empty("2025-03-14");
        let document = pipeline.render(&snapshot).unwrap();
        assert_eq!(document.file_name, "kpi-2025-03-14.md");
        assert!(!document.bytes.is_empty());
    }
}
