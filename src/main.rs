//! salespulse CLI: the scheduler loop plus ad-hoc snapshot, report, and
//! subscription commands.

use std::sync::Arc;

use chrono::{NaiveDate, Utc};
use clap::{Parser, Subcommand};
use tokio::sync::mpsc;

use salespulse::config::{load_config, Config};
use salespulse::crm::{catalog, CrmClient};
use salespulse::period::{self, UpperBound};
use salespulse::pipeline::Pipeline;
use salespulse::scheduler::{next_run_time, period_key, Scheduler, SchedulerMessage};
use salespulse::state::{AppState, RunRecord};
use salespulse::subscribers::{Cadence, JsonSubscriberStore};

#[derive(Parser)]
#[command(name = "salespulse")]
#[command(about = "Sales and call-center KPI briefings from your CRM and spreadsheets", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the cadence scheduler loop
    Serve,
    /// Print the aggregated snapshot for a period as JSON
    Snapshot {
        /// today | yesterday | this_week | last_week | this_month | last_month
        #[arg(long, default_value = "today")]
        period: String,
        /// Custom range start (YYYY-MM-DD); needs --to as well
        #[arg(long)]
        from: Option<NaiveDate>,
        #[arg(long)]
        to: Option<NaiveDate>,
    },
    /// Build a report now and deliver it to one chat or a whole cadence
    Report {
        #[arg(long, default_value = "yesterday")]
        period: String,
        #[arg(long)]
        from: Option<NaiveDate>,
        #[arg(long)]
        to: Option<NaiveDate>,
        /// Deliver to one known subscriber
        #[arg(long, conflicts_with = "cadence")]
        chat_id: Option<i64>,
        /// Deliver to every subscriber of this cadence: daily | weekly | monthly
        #[arg(long)]
        cadence: Option<String>,
    },
    /// Opt a chat in (or out, with --off) of a report cadence
    Subscribe {
        #[arg(long)]
        chat_id: i64,
        /// daily | weekly | monthly
        #[arg(long)]
        cadence: String,
        #[arg(long)]
        off: bool,
        #[arg(long)]
        name: Option<String>,
    },
    /// List subscribers and their cadences
    Subscribers,
    /// Print CRM pipelines, statuses, users, and loss reasons as a
    /// configuration aid for the classification id sets
    Catalog,
}

#[tokio::main]
async fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let cli = Cli::parse();

    if let Err(e) = run(cli).await {
        log::error!("{}", e);
        std::process::exit(1);
    }
}

async fn run(cli: Cli) -> Result<(), String> {
    let config = Arc::new(load_config()?);

    match cli.command {
        Commands::Serve => serve(config).await,
        Commands::Snapshot { period, from, to } => {
            let pipeline = Pipeline::new(config).map_err(|e| e.to_string())?;
            let period = pipeline.period_for(&period, from, to, UpperBound::Live);
            let (snapshot, error) = pipeline.snapshot_or_empty(&period).await;
            println!(
                "{}",
                serde_json::to_string_pretty(&snapshot).map_err(|e| e.to_string())?
            );
            match error {
                Some(e) => Err(e.to_string()),
                None => Ok(()),
            }
        }
        Commands::Report {
            period,
            from,
            to,
            chat_id,
            cadence,
        } => {
            let pipeline = Pipeline::new(config).map_err(|e| e.to_string())?;
            let store = JsonSubscriberStore::open_default().map_err(|e| e.to_string())?;
            let period = pipeline.period_for(&period, from, to, UpperBound::EndOfDay);

            let report = match (chat_id, cadence) {
                (Some(chat_id), None) => pipeline
                    .run_for_chat(&store, chat_id, &period)
                    .await
                    .map_err(|e| e.to_string())?,
                (None, Some(cadence)) => {
                    let cadence = Cadence::parse(&cadence)
                        .ok_or_else(|| format!("unknown cadence '{}'", cadence))?;
                    pipeline
                        .run_for_cadence(&store, cadence, &period)
                        .await
                        .map_err(|e| e.to_string())?
                }
                _ => return Err("pass exactly one of --chat-id or --cadence".to_string()),
            };
            println!(
                "Delivered {}/{} for {}.",
                report.sent(),
                report.attempted(),
                period.label
            );
            Ok(())
        }
        Commands::Subscribe {
            chat_id,
            cadence,
            off,
            name,
        } => {
            let cadence =
                Cadence::parse(&cadence).ok_or_else(|| format!("unknown cadence '{}'", cadence))?;
            let store = JsonSubscriberStore::open_default().map_err(|e| e.to_string())?;
            let subscriber = store
                .upsert(chat_id, name.as_deref(), cadence, !off)
                .map_err(|e| e.to_string())?;
            println!(
                "{} {} for chat {}{}.",
                if off { "Disabled" } else { "Enabled" },
                cadence,
                subscriber.chat_id,
                subscriber
                    .name
                    .as_deref()
                    .map(|n| format!(" ({})", n))
                    .unwrap_or_default()
            );
            Ok(())
        }
        Commands::Subscribers => {
            let store = JsonSubscriberStore::open_default().map_err(|e| e.to_string())?;
            let subscribers = store.list().map_err(|e| e.to_string())?;
            if subscribers.is_empty() {
                println!("No subscribers.");
                return Ok(());
            }
            for s in subscribers {
                let cadences: Vec<&str> = [
                    (s.daily, "daily"),
                    (s.weekly, "weekly"),
                    (s.monthly, "monthly"),
                ]
                .iter()
                .filter(|(on, _)| *on)
                .map(|(_, name)| *name)
                .collect();
                println!(
                    "{}  {}  [{}]",
                    s.chat_id,
                    s.name.as_deref().unwrap_or("-"),
                    cadences.join(", ")
                );
            }
            Ok(())
        }
        Commands::Catalog => print_catalog(&config).await,
    }
}

/// Run the scheduler loop, executing cadence reports as they come due.
async fn serve(config: Arc<Config>) -> Result<(), String> {
    let pipeline = Pipeline::new(config.clone()).map_err(|e| e.to_string())?;
    let store = JsonSubscriberStore::open_default().map_err(|e| e.to_string())?;
    let state = Arc::new(AppState::new(config.clone(), store));

    let tz = config.tz();
    for (name, entry) in [
        ("daily", &config.schedules.daily),
        ("weekly", &config.schedules.weekly),
        ("monthly", &config.schedules.monthly),
    ] {
        if entry.enabled {
            match next_run_time(entry, tz) {
                Ok(next) => log::info!("{} report next runs at {}", name, next),
                Err(e) => log::warn!("{} schedule disabled: {}", name, e),
            }
        }
    }

    let (sender, mut receiver) = mpsc::channel::<SchedulerMessage>(8);
    let scheduler = Scheduler::new(state.clone(), sender);
    tokio::spawn(async move { scheduler.run().await });

    while let Some(message) = receiver.recv().await {
        execute_scheduled(&pipeline, &state, message).await;
    }
    Ok(())
}

async fn execute_scheduled(pipeline: &Pipeline, state: &AppState, message: SchedulerMessage) {
    // The period anchors on the scheduled instant so a catch-up run still
    // reports on the day/week/month it was meant for.
    let period = period::resolve(
        period_key(message.cadence),
        message.scheduled_for,
        state.config.tz(),
        UpperBound::EndOfDay,
    );
    log::info!(
        "running {} report for {} ({:?})",
        message.cadence,
        period.label,
        message.trigger
    );

    let mut record = RunRecord::begin(message.cadence, message.trigger, &period.label);
    match pipeline
        .run_for_cadence(&state.store, message.cadence, &period)
        .await
    {
        Ok(report) => {
            record.attempted = report.attempted();
            record.sent = report.sent();
        }
        Err(e) => {
            log::error!("{} report for {} failed: {}", message.cadence, period.label, e);
            record.error = Some(e.to_string());
        }
    }
    record.finished_at = Some(Utc::now());
    state.add_run_record(record);
}

async fn print_catalog(config: &Config) -> Result<(), String> {
    let client = CrmClient::new(&config.crm).map_err(|e| e.to_string())?;

    let pipelines = catalog::fetch_pipelines(&client)
        .await
        .map_err(|e| e.to_string())?;
    println!("Pipelines:");
    for pipeline in pipelines {
        println!("  {}  {}", pipeline.id, pipeline.name);
        for status in pipeline.statuses {
            println!("    {}  {}", status.id, status.name);
        }
    }

    let users = catalog::fetch_users(&client).await.map_err(|e| e.to_string())?;
    let mut users: Vec<_> = users.into_iter().collect();
    users.sort_by_key(|(id, _)| *id);
    println!("Users:");
    for (id, name) in users {
        println!("  {}  {}", id, name);
    }

    let reasons = catalog::fetch_loss_reasons(&client)
        .await
        .map_err(|e| e.to_string())?;
    let mut reasons: Vec<_> = reasons.into_iter().collect();
    reasons.sort_by_key(|(id, _)| *id);
    println!("Loss reasons:");
    for (id, name) in reasons {
        println!("  {}  {}", id, name);
    }

    Ok(())
}
