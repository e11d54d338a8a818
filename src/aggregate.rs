//! KPI aggregation. Pure: normalized rows in, `DashboardSnapshot` out.
//!
//! All lead partitioning is set membership against the configured id sets;
//! no business meaning is hardcoded here. Output ordering is deterministic:
//! manager rows keep first-seen order, the reason histogram sorts by count
//! descending then id ascending, so identical inputs produce identical
//! snapshots.

use std::collections::HashMap;

use crate::config::LeadClassification;
use crate::types::{
    CallRow, CourseKind, CrmCatalog, DashboardSnapshot, Lead, ManagerCallsRow, ManagerRef,
    ManagerSalesRow, ReasonCount, RevenueRow,
};

pub fn aggregate(
    leads: &[Lead],
    calls: &[CallRow],
    revenue: &[RevenueRow],
    classification: &LeadClassification,
    catalog: &CrmCatalog,
    label: &str,
) -> DashboardSnapshot {
    let mut snapshot = DashboardSnapshot::empty(label);

    // Lead buckets and the per-manager sales rows, one pass.
    let mut sales_index: HashMap<i64, usize> = HashMap::new();
    let mut reason_counts: HashMap<i64, u32> = HashMap::new();

    for lead in leads {
        snapshot.leads_total += 1;
        let qualified = classification.qualified.contains(&lead.status_id);
        let won = classification.won.contains(&lead.status_id);
        if qualified {
            snapshot.leads_qualified += 1;
        }
        if won {
            snapshot.leads_won += 1;
        }
        if let Some(reason_id) = lead.loss_reason_id {
            if classification.not_qualified_reasons.contains(&reason_id) {
                snapshot.leads_not_qualified += 1;
                *reason_counts.entry(reason_id).or_insert(0) += 1;
            }
        }

        let row_index = *sales_index.entry(lead.manager_id).or_insert_with(|| {
            snapshot.manager_sales.push(ManagerSalesRow {
                manager_id: lead.manager_id,
                manager_name: catalog.user_name(lead.manager_id),
                leads_total: 0,
                leads_qualified: 0,
                deals_won: 0,
                won_amount: 0.0,
                calls_total: 0,
                avg_call_seconds: 0,
            });
            snapshot.manager_sales.len() - 1
        });
        let row = &mut snapshot.manager_sales[row_index];
        row.leads_total += 1;
        if qualified {
            row.leads_qualified += 1;
        }
        if won {
            row.deals_won += 1;
            row.won_amount += lead.price.unwrap_or(0.0);
        }
    }

    snapshot.conversion_from_qualified = if snapshot.leads_qualified == 0 {
        0.0
    } else {
        (f64::from(snapshot.leads_won) / f64::from(snapshot.leads_qualified)).min(1.0)
    };

    let mut reasons: Vec<ReasonCount> = reason_counts
        .into_iter()
        .map(|(reason_id, count)| ReasonCount {
            reason_id,
            name: catalog.loss_reason_name(reason_id),
            count,
        })
        .collect();
    reasons.sort_by(|a, b| b.count.cmp(&a.count).then(a.reason_id.cmp(&b.reason_id)));
    snapshot.not_qualified_reasons = reasons;

    // Call breakdown keyed by display name, in first-seen order. CRM-keyed
    // calls additionally join the sales rows through the shared numeric id;
    // sheet-keyed calls never do (separate identity domains).
    let mut calls_index: HashMap<String, usize> = HashMap::new();
    let mut calls_by_user: HashMap<i64, (u32, i64)> = HashMap::new();

    for call in calls {
        let name = match &call.manager {
            ManagerRef::CrmUser(id) => {
                let entry = calls_by_user.entry(*id).or_insert((0, 0));
                entry.0 += 1;
                entry.1 += call.duration_sec;
                catalog.user_name(*id)
            }
            ManagerRef::Name(name) => name.clone(),
        };

        let row_index = *calls_index.entry(name.clone()).or_insert_with(|| {
            snapshot.manager_calls.push(ManagerCallsRow {
                manager_name: name,
                calls_total: 0,
                calls_successful: 0,
                total_duration_sec: 0,
                avg_duration_sec: 0,
            });
            snapshot.manager_calls.len() - 1
        });
        let row = &mut snapshot.manager_calls[row_index];
        row.calls_total += 1;
        if call.success {
            row.calls_successful += 1;
        }
        row.total_duration_sec += call.duration_sec;
    }

    // Averages over all calls, connected or not, for both sources.
    for row in &mut snapshot.manager_calls {
        row.avg_duration_sec = round_div(row.total_duration_sec, row.calls_total);
    }
    for row in &mut snapshot.manager_sales {
        if let Some((count, duration)) = calls_by_user.get(&row.manager_id) {
            row.calls_total = *count;
            row.avg_call_seconds = round_div(*duration, *count);
        }
    }

    for row in revenue {
        snapshot.revenue_total += row.amount;
        match row.course {
            CourseKind::Online => snapshot.revenue_online += row.amount,
            CourseKind::Offline => snapshot.revenue_offline += row.amount,
            CourseKind::Other(_) => {}
        }
    }

    snapshot
}

fn round_div(total: i64, count: u32) -> i64 {
    if count == 0 {
        0
    } else {
        (total as f64 / f64::from(count)).round() as i64
    }
}
