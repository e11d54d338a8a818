//! Report content assembly and document layout.
//!
//! `ReportContent::build` selects and orders what the document shows; the
//! section sequence is part of the contract and tests assert on it. How the
//! sections become bytes is the `DocumentLayout` collaborator's concern;
//! `MarkdownLayout` is the bundled implementation.

use std::fmt::Write as _;

use thiserror::Error;

use crate::types::DashboardSnapshot;

/// How many manager rows the sales section shows, in the aggregator's
/// emission order.
pub const TOP_MANAGERS: usize = 5;

#[derive(Debug, Error)]
pub enum LayoutError {
    #[error("formatting failed: {0}")]
    Format(#[from] std::fmt::Error),
}

/// Abstract draw commands, layout-independent.
#[derive(Debug, Clone, PartialEq)]
pub enum Section {
    Headline(Vec<KpiLine>),
    Table {
        title: String,
        headers: Vec<String>,
        rows: Vec<Vec<String>>,
    },
}

#[derive(Debug, Clone, PartialEq)]
pub struct KpiLine {
    pub label: String,
    pub value: String,
}

/// Ordered content of one report document.
#[derive(Debug, Clone)]
pub struct ReportContent {
    pub title: String,
    pub caption: String,
    pub file_slug: String,
    pub sections: Vec<Section>,
}

/// A laid-out document ready for delivery.
#[derive(Debug, Clone)]
pub struct RenderedDocument {
    pub file_name: String,
    pub bytes: Vec<u8>,
    pub caption: String,
}

pub trait DocumentLayout {
    fn render(&self, content: &ReportContent) -> Result<RenderedDocument, LayoutError>;
}

impl ReportContent {
    /// Fixed section sequence: headline KPIs, then the not-qualified reason
    /// table, then the top manager sales table.
    pub fn build(snapshot: &DashboardSnapshot) -> Self {
        let headline = Section::Headline(vec![
            kpi("Leads", snapshot.leads_total.to_string()),
            kpi("Qualified", snapshot.leads_qualified.to_string()),
            kpi("Not qualified", snapshot.leads_not_qualified.to_string()),
            kpi("Won", snapshot.leads_won.to_string()),
            kpi(
                "Conversion (qualified to won)",
                format_percent(snapshot.conversion_from_qualified),
            ),
            kpi("Revenue", format_amount(snapshot.revenue_total)),
            kpi("Revenue online", format_amount(snapshot.revenue_online)),
            kpi("Revenue offline", format_amount(snapshot.revenue_offline)),
        ]);

        let reasons = Section::Table {
            title: "Not qualified by reason".to_string(),
            headers: vec!["Reason".to_string(), "Count".to_string()],
            rows: snapshot
                .not_qualified_reasons
                .iter()
                .map(|r| vec![r.name.clone(), r.count.to_string()])
                .collect(),
        };

        let sales = Section::Table {
            title: format!("Top {} managers", TOP_MANAGERS),
            headers: vec![
                "Manager".to_string(),
                "Leads".to_string(),
                "Qualified".to_string(),
                "Won".to_string(),
                "Won amount".to_string(),
            ],
            rows: snapshot
                .manager_sales
                .iter()
                .take(TOP_MANAGERS)
                .map(|row| {
                    vec![
                        row.manager_name.clone(),
                        row.leads_total.to_string(),
                        row.leads_qualified.to_string(),
                        row.deals_won.to_string(),
                        format_amount(row.won_amount),
                    ]
                })
                .collect(),
        };

        Self {
            title: format!("KPI report {}", snapshot.label),
            caption: format!(
                "KPI report {}: {} leads, {} won",
                snapshot.label, snapshot.leads_total, snapshot.leads_won
            ),
            file_slug: file_slug(&snapshot.label),
            sections: vec![headline, reasons, sales],
        }
    }
}

fn kpi(label: &str, value: String) -> KpiLine {
    KpiLine {
        label: label.to_string(),
        value,
    }
}

fn file_slug(label: &str) -> String {
    label.replace(" to ", "_")
}

fn format_percent(ratio: f64) -> String {
    format!("{:.1}%", ratio * 100.0)
}

/// Whole-number amount with space-grouped thousands ("1 200 000").
fn format_amount(value: f64) -> String {
    let whole = value.round() as i64;
    let digits = whole.unsigned_abs().to_string();
    let mut grouped = String::with_capacity(digits.len() + digits.len() / 3);
    for (i, c) in digits.chars().enumerate() {
        if i > 0 && (digits.len() - i) % 3 == 0 {
            grouped.push(' ');
        }
        grouped.push(c);
    }
    if whole < 0 {
        format!("-{}", grouped)
    } else {
        grouped
    }
}

// ============================================================================
// Markdown layout
// ============================================================================

#[derive(Debug, Default)]
pub struct MarkdownLayout;

impl DocumentLayout for MarkdownLayout {
    fn render(&self, content: &ReportContent) -> Result<RenderedDocument, LayoutError> {
        let mut out = String::new();
        writeln!(out, "# {}", content.title)?;

        for section in &content.sections {
            match section {
                Section::Headline(lines) => {
                    writeln!(out)?;
                    for line in lines {
                        writeln!(out, "- **{}:** {}", line.label, line.value)?;
                    }
                }
                Section::Table {
                    title,
                    headers,
                    rows,
                } => {
                    writeln!(out)?;
                    writeln!(out, "## {}", title)?;
                    writeln!(out)?;
                    if rows.is_empty() {
                        writeln!(out, "_(none)_")?;
                        continue;
                    }
                    writeln!(out, "| {} |", headers.join(" | "))?;
                    writeln!(
                        out,
                        "|{}|",
                        headers.iter().map(|_| " --- ").collect::<Vec<_>>().join("|")
                    )?;
                    for row in rows {
                        writeln!(out, "| {} |", row.join(" | "))?;
                    }
                }
            }
        }

        Ok(RenderedDocument {
            file_name: format!("kpi-{}.md", content.file_slug),
            bytes: out.into_bytes(),
            caption: content.caption.clone(),
        })
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{ManagerSalesRow, ReasonCount};

    fn sample_snapshot() -> DashboardSnapshot {
        let mut snapshot = DashboardSnapshot::empty("2025-03-10 to 2025-03-16");
        snapshot.leads_total = 24;
        snapshot.leads_qualified = 10;
        snapshot.leads_not_qualified = 6;
        snapshot.leads_won = 5;
        snapshot.conversion_from_qualified = 0.5;
        snapshot.revenue_total = 4_550_000.0;
        snapshot.revenue_online = 3_000_000.0;
        snapshot.revenue_offline = 1_200_000.0;
        snapshot.not_qualified_reasons = vec![
            ReasonCount {
                reason_id: 5,
                name: "Wrong number".to_string(),
                count: 4,
            },
            ReasonCount {
                reason_id: 6,
                name: "Reason 6".to_string(),
                count: 2,
            },
        ];
        snapshot.manager_sales = (1..=7)
            .map(|i| ManagerSalesRow {
                manager_id: i,
                manager_name: format!("Manager {}", i),
                leads_total: 3,
                leads_qualified: 1,
                deals_won: 1,
                won_amount: 100_000.0 * i as f64,
                calls_total: 0,
                avg_call_seconds: 0,
            })
            .collect();
        snapshot
    }

    #[test]
    fn section_order_is_fixed() {
        let content = ReportContent::build(&sample_snapshot());
        assert_eq!(content.sections.len(), 3);
        assert!(matches!(content.sections[0], Section::Headline(_)));
        match &content.sections[1] {
            Section::Table { title, .. } => assert!(title.contains("Not qualified")),
            other => panic!("expected reason table, got {:?}", other),
        }
        match &content.sections[2] {
            Section::Table { title, .. } => assert!(title.contains("managers")),
            other => panic!("expected sales table, got {:?}", other),
        }
    }

    #[test]
    fn sales_table_truncates_to_top_five_in_emission_order() {
        let content = ReportContent::build(&sample_snapshot());
        let Section::Table { rows, .. } = &content.sections[2] else {
            panic!("expected table");
        };
        assert_eq!(rows.len(), 5);
        assert_eq!(rows[0][0], "Manager 1");
        assert_eq!(rows[4][0], "Manager 5");
    }

    #[test]
    fn empty_snapshot_still_builds_all_sections() {
        let content = ReportContent::build(&DashboardSnapshot::empty("2025-03-14"));
        assert_eq!(content.sections.len(), 3);
        let Section::Table { rows, .. } = &content.sections[1] else {
            panic!("expected table");
        };
        assert!(rows.is_empty());
    }

    #[test]
    fn markdown_layout_renders_document() {
        let content = ReportContent::build(&sample_snapshot());
        let document = MarkdownLayout.render(&content).unwrap();

        assert_eq!(document.file_name, "kpi-2025-03-10_2025-03-16.md");
        assert_eq!(
            document.caption,
            "KPI report 2025-03-10 to 2025-03-16: 24 leads, 5 won"
        );

        let text = String::from_utf8(document.bytes).unwrap();
        assert!(text.starts_with("# KPI report 2025-03-10 to 2025-03-16"));
        assert!(text.contains("- **Conversion (qualified to won):** 50.0%"));
        assert!(text.contains("- **Revenue:** 4 550 000"));
        assert!(text.contains("| Reason | Count |"));
        assert!(text.contains("| Wrong number | 4 |"));
        assert!(text.contains("| Manager 1 | 3 | 1 | 1 | 100 000 |"));

        let headline_pos = text.find("**Leads:**").unwrap();
        let reasons_pos = text.find("## Not qualified by reason").unwrap();
        let sales_pos = text.find("## Top 5 managers").unwrap();
        assert!(headline_pos < reasons_pos && reasons_pos < sales_pos);
    }

    #[test]
    fn empty_tables_render_a_placeholder() {
        let content = ReportContent::build(&DashboardSnapshot::empty("2025-03-14"));
        let document = MarkdownLayout.render(&content).unwrap();
        let text = String::from_utf8(document.bytes).unwrap();
        assert!(text.contains("_(none)_"));
        assert_eq!(document.file_name, "kpi-2025-03-14.md");
    }

    #[test]
    fn amounts_group_thousands_with_spaces() {
        assert_eq!(format_amount(1_200_000.0), "1 200 000");
        assert_eq!(format_amount(500.0), "500");
        assert_eq!(format_amount(0.0), "0");
        assert_eq!(format_amount(-42_000.0), "-42 000");
        assert_eq!(format_amount(1_000.49), "1 000");
    }
}
