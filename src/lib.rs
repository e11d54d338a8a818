//! salespulse: period-scoped sales and call-center KPI briefings.
//!
//! Aggregates leads and calls from a CRM plus optional spreadsheet-backed
//! revenue/call sources into a per-period snapshot, renders it as a document,
//! and delivers it to subscribed chats on daily/weekly/monthly cadences.

pub mod aggregate;
pub mod config;
pub mod crm;
pub mod delivery;
pub mod error;
pub mod http;
pub mod period;
pub mod pipeline;
pub mod report;
pub mod scheduler;
pub mod sheets;
pub mod state;
pub mod subscribers;
pub mod telegram;
pub mod types;
