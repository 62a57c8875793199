pub mod codec;
pub mod sqlite;

use std::fmt;
use std::str::FromStr;

use anyhow::{Result, bail};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Lifecycle of a single run attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TraceStatus {
    Pending,
    Completed,
    Failed,
}

impl TraceStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TraceStatus::Pending => "pending",
            TraceStatus::Completed => "completed",
            TraceStatus::Failed => "failed",
        }
    }

    /// `true` once the run has ended, whatever the outcome.
    pub fn is_finished(&self) -> bool {
        !matches!(self, TraceStatus::Pending)
    }
}

impl fmt::Display for TraceStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TraceStatus {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "pending" => Ok(TraceStatus::Pending),
            "completed" => Ok(TraceStatus::Completed),
            "failed" => Ok(TraceStatus::Failed),
            other => bail!("unknown trace status: {other}"),
        }
    }
}

/// The persisted record of one agent run attempt and its evaluation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Trace {
    pub id: String,
    pub agent_id: String,
    pub run_id: String,
    pub status: TraceStatus,
    /// `Value::Null` when nothing (or nothing readable) was stored.
    pub input: Value,
    pub output: Value,
    pub grade: Option<f64>,
    pub feedback: Option<String>,
    pub evaluator: Option<String>,
    pub trace_url: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl Trace {
    /// Whether the run produced something a grader could look at.
    pub fn has_output(&self) -> bool {
        match &self.output {
            Value::Null => false,
            Value::String(s) => !s.trim().is_empty(),
            _ => true,
        }
    }
}

/// Partial update of a trace. `None` fields are left untouched.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TraceUpdate {
    pub status: Option<TraceStatus>,
    /// `Some(None)` clears a previously stored grade.
    pub grade: Option<Option<f64>>,
    pub feedback: Option<String>,
    pub evaluator: Option<String>,
    pub trace_url: Option<String>,
    pub output: Option<Value>,
}

impl TraceUpdate {
    pub fn is_empty(&self) -> bool {
        *self == TraceUpdate::default()
    }
}

/// Identifies a trace of a known agent by id, run id, or both.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TraceSelector {
    pub trace_id: Option<String>,
    pub run_id: Option<String>,
}

impl TraceSelector {
    pub fn by_trace(id: impl Into<String>) -> Self {
        Self {
            trace_id: Some(id.into()),
            run_id: None,
        }
    }

    pub fn by_run(run_id: impl Into<String>) -> Self {
        Self {
            trace_id: None,
            run_id: Some(run_id.into()),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.trace_id.is_none() && self.run_id.is_none()
    }
}

/// Where traces live. Each call is atomic from the caller's point of view.
#[async_trait]
pub trait TraceStore: Send + Sync {
    /// Store a new `pending` trace for a run attempt.
    async fn create_trace(&self, agent_id: &str, run_id: &str, input: &Value) -> Result<Trace>;

    /// Re-arm an existing trace for a new attempt: new run id, back to
    /// `pending`, and the previous output and evaluation cleared.
    async fn update_trace_input(&self, id: &str, run_id: &str, input: &Value) -> Result<Trace>;

    /// Write only the fields present in `update`. Unknown ids are an error.
    async fn complete_trace(&self, id: &str, update: TraceUpdate) -> Result<Trace>;

    async fn get_trace(&self, id: &str) -> Result<Option<Trace>>;

    /// First trace of `agent_id` matching every identifier the selector carries.
    async fn find_trace_for_agent(
        &self,
        agent_id: &str,
        selector: &TraceSelector,
    ) -> Result<Option<Trace>>;

    /// Most recent first, at most `take` entries.
    async fn list_traces_for_agent(&self, agent_id: &str, take: usize) -> Result<Vec<Trace>>;
}
