//! Decision recorder.
//!
//! Modules record the choices they make while generating a repository
//! (which CI provider, which base image, which license). At the end of a run
//! the accumulated records are rendered into `docs/DECISIONS.md`.

pub mod render;

use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub use render::{DECISION_LOG_PATH, render_markdown};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase", from = "String")]
pub enum DecisionCategory {
    Architecture,
    Tooling,
    Security,
    Process,
    Other,
}

impl DecisionCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Architecture => "architecture",
            Self::Tooling => "tooling",
            Self::Security => "security",
            Self::Process => "process",
            Self::Other => "other",
        }
    }
}

impl From<String> for DecisionCategory {
    fn from(value: String) -> Self {
        match value.to_lowercase().as_str() {
            "architecture" => Self::Architecture,
            "tooling" => Self::Tooling,
            "security" => Self::Security,
            "process" => Self::Process,
            "other" => Self::Other,
            unknown => {
                tracing::warn!(category = %unknown, "unknown decision category, using 'other'");
                Self::Other
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DecisionRecord {
    pub title: String,
    pub context: String,
    pub decision: String,
    pub rationale: String,
    pub category: DecisionCategory,
    #[serde(default)]
    pub alternatives: Vec<String>,
    #[serde(default)]
    pub consequences: Vec<String>,
    #[serde(default)]
    pub related_files: Vec<String>,
    pub recorded_at: DateTime<Utc>,
}

impl DecisionRecord {
    pub fn new(
        title: impl Into<String>,
        decision: impl Into<String>,
        category: DecisionCategory,
    ) -> Self {
        Self {
            title: title.into(),
            context: String::new(),
            decision: decision.into(),
            rationale: String::new(),
            category,
            alternatives: Vec::new(),
            consequences: Vec::new(),
            related_files: Vec::new(),
            recorded_at: Utc::now(),
        }
    }

    pub fn context(mut self, context: impl Into<String>) -> Self {
        self.context = context.into();
        self
    }

    pub fn rationale(mut self, rationale: impl Into<String>) -> Self {
        self.rationale = rationale.into();
        self
    }

    pub fn alternative(mut self, alternative: impl Into<String>) -> Self {
        self.alternatives.push(alternative.into());
        self
    }

    pub fn consequence(mut self, consequence: impl Into<String>) -> Self {
        self.consequences.push(consequence.into());
        self
    }

    pub fn related_file(mut self, path: impl Into<String>) -> Self {
        self.related_files.push(path.into());
        self
    }
}

/// Shared, append-only collection of decisions for one run.
#[derive(Debug, Clone, Default)]
pub struct DecisionCollector {
    records: Arc<Mutex<Vec<DecisionRecord>>>,
}

impl DecisionCollector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&self, record: DecisionRecord) {
        match self.records.lock() {
            Ok(mut records) => records.push(record),
            Err(poisoned) => poisoned.into_inner().push(record),
        }
    }

    pub fn records(&self) -> Vec<DecisionRecord> {
        match self.records.lock() {
            Ok(records) => records.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    pub fn len(&self) -> usize {
        self.records.lock().map(|r| r.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
