//! Subscriber preferences, persisted as JSON under the state dir.
//!
//! Small file, read per operation; no in-memory cache to go stale between
//! chat commands and scheduled runs.

use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::config::state_dir;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("IO: {0}")]
    Io(#[from] std::io::Error),
    #[error("JSON: {0}")]
    Json(#[from] serde_json::Error),
    #[error("{0}")]
    StateDir(String),
}

/// Report cadences a recipient can opt into.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Cadence {
    Daily,
    Weekly,
    Monthly,
}

impl Cadence {
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_lowercase().as_str() {
            "daily" => Some(Self::Daily),
            "weekly" => Some(Self::Weekly),
            "monthly" => Some(Self::Monthly),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Daily => "daily",
            Self::Weekly => "weekly",
            Self::Monthly => "monthly",
        }
    }
}

impl std::fmt::Display for Cadence {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Subscriber {
    pub chat_id: i64,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub daily: bool,
    #[serde(default)]
    pub weekly: bool,
    #[serde(default)]
    pub monthly: bool,
}

impl Subscriber {
    fn new(chat_id: i64) -> Self {
        Self {
            chat_id,
            name: None,
            daily: false,
            weekly: false,
            monthly: false,
        }
    }

    pub fn wants(&self, cadence: Cadence) -> bool {
        match cadence {
            Cadence::Daily => self.daily,
            Cadence::Weekly => self.weekly,
            Cadence::Monthly => self.monthly,
        }
    }

    fn set(&mut self, cadence: Cadence, enabled: bool) {
        match cadence {
            Cadence::Daily => self.daily = enabled,
            Cadence::Weekly => self.weekly = enabled,
            Cadence::Monthly => self.monthly = enabled,
        }
    }
}

/// File-backed store keyed by chat id.
pub struct JsonSubscriberStore {
    path: PathBuf,
}

impl JsonSubscriberStore {
    pub fn open_default() -> Result<Self, StoreError> {
        let dir = state_dir().map_err(StoreError::StateDir)?;
        Ok(Self {
            path: dir.join("subscribers.json"),
        })
    }

    pub fn at(path: &Path) -> Self {
        Self {
            path: path.to_path_buf(),
        }
    }

    pub fn list(&self) -> Result<Vec<Subscriber>, StoreError> {
        if !self.path.exists() {
            return Ok(Vec::new());
        }
        let content = fs::read_to_string(&self.path)?;
        Ok(serde_json::from_str(&content)?)
    }

    pub fn list_for(&self, cadence: Cadence) -> Result<Vec<Subscriber>, StoreError> {
        Ok(self
            .list()?
            .into_iter()
            .filter(|s| s.wants(cadence))
            .collect())
    }

    pub fn find(&self, chat_id: i64) -> Result<Option<Subscriber>, StoreError> {
        Ok(self.list()?.into_iter().find(|s| s.chat_id == chat_id))
    }

    /// Create or update one subscriber's cadence flag. A `name` of `None`
    /// leaves any stored name in place.
    pub fn upsert(
        &self,
        chat_id: i64,
        name: Option<&str>,
        cadence: Cadence,
        enabled: bool,
    ) -> Result<Subscriber, StoreError> {
        let mut subscribers = self.list()?;
        let index = match subscribers.iter().position(|s| s.chat_id == chat_id) {
            Some(i) => i,
            None => {
                subscribers.push(Subscriber::new(chat_id));
                subscribers.len() - 1
            }
        };
        let subscriber = &mut subscribers[index];
        if let Some(name) = name {
            subscriber.name = Some(name.to_string());
        }
        subscriber.set(cadence, enabled);
        let updated = subscriber.clone();

        let content = serde_json::to_string_pretty(&subscribers)?;
        fs::write(&self.path, content)?;
        Ok(updated)
    }
}
