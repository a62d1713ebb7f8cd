//! JSONL trail of what the agent saw, decided and wrote.
//!
//! Three files under the configured directory: `observations.jsonl`,
//! `decisions.jsonl` and `responses.jsonl`. Write failures never reach the
//! cycle.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anima_common::{CandidateItem, Clock};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::metrics::append_json_line;
use crate::persona::EngagementDecision;

pub const OBSERVATIONS_FILE: &str = "observations.jsonl";
pub const DECISIONS_FILE: &str = "decisions.jsonl";
pub const RESPONSES_FILE: &str = "responses.jsonl";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ObservationRecord {
    pub timestamp: DateTime<Utc>,
    pub post_id: String,
    pub author: Option<String>,
    pub text: String,
    pub permalink: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DecisionRecord {
    pub timestamp: DateTime<Utc>,
    pub post_id: String,
    pub should_engage: bool,
    pub reason: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ResponseRecord {
    pub timestamp: DateTime<Utc>,
    pub post_id: String,
    pub post_text: String,
    pub response: Option<String>,
    pub adherence_score: Option<f64>,
    pub refinement_count: u32,
    pub was_posted: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reply_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

pub struct SimulationLogger {
    dir: PathBuf,
    clock: Arc<dyn Clock>,
}

impl SimulationLogger {
    pub fn new(dir: impl Into<PathBuf>, clock: Arc<dyn Clock>) -> Self {
        Self {
            dir: dir.into(),
            clock,
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    async fn append<T: Serialize>(&self, file: &str, record: &T) {
        let path = self.dir.join(file);
        if let Err(e) = append_json_line(&path, record).await {
            warn!(path = %path.display(), error = %e, "Simulation log write failed");
        }
    }

    pub async fn log_observation(&self, item: &CandidateItem) {
        let record = ObservationRecord {
            timestamp: self.now(),
            post_id: item.id.clone(),
            author: item.author.clone(),
            text: item.text.clone(),
            permalink: item.permalink.clone(),
        };
        self.append(OBSERVATIONS_FILE, &record).await;
    }

    pub async fn log_decision(&self, item_id: &str, decision: &EngagementDecision) {
        let record = DecisionRecord {
            timestamp: self.now(),
            post_id: item_id.to_string(),
            should_engage: decision.engage,
            reason: decision.reason.clone(),
        };
        self.append(DECISIONS_FILE, &record).await;
    }

    pub async fn log_response(&self, record: &ResponseRecord) {
        self.append(RESPONSES_FILE, record).await;
    }
}
