//! Per-cycle metrics and the append-only sinks they are written to.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};

use anima_common::{AnimaError, Result};
use anima_memory::MemoryStats;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::io::AsyncWriteExt;

/// One record per completed cycle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CycleMetrics {
    pub timestamp: DateTime<Utc>,
    pub agent: String,
    /// "observe" or "normal"
    pub mode: String,
    pub successful: usize,
    pub attempts: usize,
    pub skipped: usize,
    pub skip_by_reason: BTreeMap<String, usize>,
    pub adherence_avg: Option<f64>,
    pub adherence_count: usize,
    pub refine_count: u32,
    pub interactions_today: u32,
    pub memory: MemoryStats,
}

impl CycleMetrics {
    pub fn new(timestamp: DateTime<Utc>, agent: impl Into<String>, observation_mode: bool) -> Self {
        Self {
            timestamp,
            agent: agent.into(),
            mode: if observation_mode { "observe" } else { "normal" }.to_string(),
            successful: 0,
            attempts: 0,
            skipped: 0,
            skip_by_reason: BTreeMap::new(),
            adherence_avg: None,
            adherence_count: 0,
            refine_count: 0,
            interactions_today: 0,
            memory: MemoryStats::default(),
        }
    }

    pub fn record_skip(&mut self, reason: &str) {
        self.skipped += 1;
        *self.skip_by_reason.entry(reason.to_string()).or_default() += 1;
    }

    /// Fold one final adherence score into the running mean.
    pub fn record_adherence(&mut self, score: f64, refinements: u32) {
        let n = self.adherence_count as f64;
        let mean = self.adherence_avg.unwrap_or(0.0);
        self.adherence_avg = Some((mean * n + score) / (n + 1.0));
        self.adherence_count += 1;
        self.refine_count += refinements;
    }
}

#[async_trait]
pub trait MetricsSink: Send + Sync {
    async fn record(&self, metrics: &CycleMetrics) -> Result<()>;
}

/// Append `value` as one JSON line, creating parent directories.
pub(crate) async fn append_json_line<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
    {
        tokio::fs::create_dir_all(parent).await?;
    }
    let mut line = serde_json::to_vec(value)?;
    line.push(b'\n');
    let mut file = tokio::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .await?;
    file.write_all(&line).await?;
    file.flush().await?;
    Ok(())
}

pub struct JsonlMetricsSink {
    path: PathBuf,
}

impl JsonlMetricsSink {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl MetricsSink for JsonlMetricsSink {
    async fn record(&self, metrics: &CycleMetrics) -> Result<()> {
        append_json_line(&self.path, metrics).await
    }
}

/// Keeps records in memory; can be told to fail.
#[derive(Default)]
pub struct MemoryMetricsSink {
    records: Mutex<Vec<CycleMetrics>>,
    fail: AtomicBool,
}

impl MemoryMetricsSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_fail(&self, fail: bool) {
        self.fail.store(fail, Ordering::SeqCst);
    }

    pub fn records(&self) -> Vec<CycleMetrics> {
        self.records.lock().clone()
    }

    pub fn last(&self) -> Option<CycleMetrics> {
        self.records.lock().last().cloned()
    }
}

#[async_trait]
impl MetricsSink for MemoryMetricsSink {
    async fn record(&self, metrics: &CycleMetrics) -> Result<()> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(AnimaError::Io(std::io::Error::other("metrics sink unavailable")));
        }
        self.records.lock().push(metrics.clone());
        Ok(())
    }
}
