//! Shared runtime state for the serve loop: the loaded config, the
//! subscriber store, the last-scheduled-run map, and the report run history
//! persisted under the state dir.

use std::collections::HashMap;
use std::fs;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::config::{state_dir, Config};
use crate::subscribers::{Cadence, JsonSubscriberStore};

/// Maximum number of run records kept in history.
const MAX_HISTORY_SIZE: usize = 100;

/// What caused a report run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunTrigger {
    Manual,
    Scheduled,
    /// Caught up after a sleep/wake gap, still within the grace window.
    Missed,
}

/// One report run, scheduled or manual, persisted for operator inspection.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunRecord {
    pub id: String,
    pub cadence: Cadence,
    pub trigger: RunTrigger,
    pub period_label: String,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub attempted: usize,
    #[serde(default)]
    pub sent: usize,
    #[serde(default)]
    pub error: Option<String>,
}

impl RunRecord {
    pub fn begin(cadence: Cadence, trigger: RunTrigger, period_label: &str) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            cadence,
            trigger,
            period_label: period_label.to_string(),
            started_at: Utc::now(),
            finished_at: None,
            attempted: 0,
            sent: 0,
            error: None,
        }
    }
}

pub struct AppState {
    pub config: Arc<Config>,
    pub store: JsonSubscriberStore,
    run_history: Mutex<Vec<RunRecord>>,
    last_scheduled_run: Mutex<HashMap<Cadence, DateTime<Utc>>>,
    history_path: Option<PathBuf>,
}

impl AppState {
    pub fn new(config: Arc<Config>, store: JsonSubscriberStore) -> Self {
        let history_path = match state_dir() {
            Ok(dir) => Some(dir.join("run_history.json")),
            Err(e) => {
                log::warn!("no state dir, run history will not persist: {}", e);
                None
            }
        };
        Self::with_history_path(config, store, history_path)
    }

    pub fn with_history_path(
        config: Arc<Config>,
        store: JsonSubscriberStore,
        history_path: Option<PathBuf>,
    ) -> Self {
        let history = history_path
            .as_deref()
            .map(load_run_history)
            .unwrap_or_default();
        Self {
            config,
            store,
            run_history: Mutex::new(history),
            last_scheduled_run: Mutex::new(HashMap::new()),
            history_path,
        }
    }

    /// Prepend a run record, newest first, trimming to the history cap.
    pub fn add_run_record(&self, record: RunRecord) {
        if let Ok(mut guard) = self.run_history.lock() {
            guard.insert(0, record);
            if guard.len() > MAX_HISTORY_SIZE {
                guard.truncate(MAX_HISTORY_SIZE);
            }
        }
        self.save_run_history();
    }

    pub fn run_history(&self, limit: usize) -> Vec<RunRecord> {
        self.run_history
            .lock()
            .map(|guard| guard.iter().take(limit).cloned().collect())
            .unwrap_or_default()
    }

    pub fn set_last_scheduled_run(&self, cadence: Cadence, time: DateTime<Utc>) {
        if let Ok(mut guard) = self.last_scheduled_run.lock() {
            guard.insert(cadence, time);
        }
    }

    pub fn get_last_scheduled_run(&self, cadence: Cadence) -> Option<DateTime<Utc>> {
        self.last_scheduled_run
            .lock()
            .ok()
            .and_then(|guard| guard.get(&cadence).copied())
    }

    fn save_run_history(&self) {
        let Some(path) = &self.history_path else {
            return;
        };
        let history = match self.run_history.lock() {
            Ok(guard) => guard.clone(),
            Err(_) => return,
        };
        match serde_json::to_string_pretty(&history) {
            Ok(content) => {
                if let Err(e) = fs::write(path, content) {
                    log::warn!("failed to persist run history: {}", e);
                }
            }
            Err(e) => log::warn!("failed to serialize run history: {}", e),
        }
    }
}

fn load_run_history(path: &std::path::Path) -> Vec<RunRecord> {
    if !path.exists() {
        return Vec::new();
    }
    match fs::read_to_string(path).map_err(|e| e.to_string()).and_then(|content| {
        serde_json::from_str::<Vec<RunRecord>>(&content).map_err(|e| e.to_string())
    }) {
        Ok(history) => history,
        Err(e) => {
            log::warn!("failed to load run history, starting fresh: {}", e);
            Vec::new()
        }
    }
}
