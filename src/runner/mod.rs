//! Run orchestration: one request in, one traced and evaluated run out.

use anyhow::{Context, Result};
use chrono::Utc;
use rand::RngExt;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::sync::Arc;
use tracing::{debug, error, info, instrument};

use crate::agent::{Agent, AgentDirectory};
use crate::consts::DEFAULT_RUN_INPUT;
use crate::error::RunError;
use crate::grader::{EvalClient, Evaluation};
use crate::synth::{ChatMessage, Role, Synthesizer};
use crate::trace::{Trace, TraceSelector, TraceStatus, TraceStore, TraceUpdate};

/// What a caller asks an agent to do.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RunRequest {
    pub input: Option<String>,
    #[serde(default)]
    pub messages: Vec<ChatMessage>,
    pub metadata: Option<Map<String, Value>>,
}

impl RunRequest {
    pub fn from_input(input: impl Into<String>) -> Self {
        Self {
            input: Some(input.into()),
            ..Self::default()
        }
    }

    fn is_empty(&self) -> bool {
        self.input.as_deref().is_none_or(|i| i.trim().is_empty()) && self.messages.is_empty()
    }
}

/// What the caller gets back from a run.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RunResponse {
    pub run_id: String,
    pub status: TraceStatus,
    pub agent_id: String,
    pub message: String,
    pub transcript: Vec<ChatMessage>,
    pub trace: Trace,
}

/// Result of evaluating an existing trace on demand.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EvaluationReport {
    pub trace_id: String,
    pub evaluation: Option<Evaluation>,
    pub trace: Trace,
}

/// Wires together the agent directory, a synthesizer, the trace store and
/// the evaluation client.
pub struct AgentRunner {
    agents: Arc<dyn AgentDirectory>,
    synthesizer: Arc<dyn Synthesizer>,
    store: Arc<dyn TraceStore>,
    evaluator: Arc<EvalClient>,
}

impl AgentRunner {
    pub fn new(
        agents: Arc<dyn AgentDirectory>,
        synthesizer: Arc<dyn Synthesizer>,
        store: Arc<dyn TraceStore>,
        evaluator: Arc<EvalClient>,
    ) -> Self {
        Self {
            agents,
            synthesizer,
            store,
            evaluator,
        }
    }

    async fn agent(&self, agent_id: &str) -> Result<Agent> {
        self.agents
            .get_agent(agent_id)
            .await?
            .ok_or_else(|| RunError::AgentNotFound(agent_id.to_string()).into())
    }

    /// Run an agent once. Evaluation problems never fail the run; a
    /// synthesizer failure does, after the trace is marked failed.
    #[instrument(skip(self, request))]
    pub async fn run(&self, agent_id: &str, request: RunRequest) -> Result<RunResponse> {
        let agent = self.agent(agent_id).await?;
        self.execute(&agent, request, None).await
    }

    /// Run an agent again on one of its existing traces. The trace gets a
    /// fresh run id and input, and its previous result is discarded.
    #[instrument(skip(self, request))]
    pub async fn rerun(
        &self,
        agent_id: &str,
        trace_id: &str,
        request: RunRequest,
    ) -> Result<RunResponse> {
        let agent = self.agent(agent_id).await?;
        let owned = self
            .store
            .get_trace(trace_id)
            .await?
            .is_some_and(|t| t.agent_id == agent_id);
        if !owned {
            return Err(RunError::TraceNotFound(agent_id.to_string()).into());
        }
        self.execute(&agent, request, Some(trace_id)).await
    }

    async fn execute(
        &self,
        agent: &Agent,
        mut request: RunRequest,
        existing_trace: Option<&str>,
    ) -> Result<RunResponse> {
        let agent_id = agent.id.as_str();
        if request.is_empty() {
            request.input = Some(DEFAULT_RUN_INPUT.to_string());
        }
        if let Some(metadata) = &request.metadata {
            debug!(keys = ?metadata.keys().collect::<Vec<_>>(), "run metadata");
        }

        let messages = normalize_messages(&request, agent.system_instructions());
        let run_id = new_run_id();
        let input = serde_json::to_value(&messages)?;
        let trace = match existing_trace {
            Some(trace_id) => self
                .store
                .update_trace_input(trace_id, &run_id, &input)
                .await
                .context("failed to re-arm trace")?,
            None => self
                .store
                .create_trace(agent_id, &run_id, &input)
                .await
                .context("failed to create trace")?,
        };
        info!(run_id = %run_id, trace_id = %trace.id, "run started");

        let reply = match self.synthesizer.respond(agent, &messages).await {
            Ok(reply) => reply,
            Err(err) => {
                self.mark_failed(&trace.id).await;
                return Err(err.context(format!("agent {agent_id} failed to respond")));
            }
        };

        let mut transcript = messages;
        transcript.push(reply.clone());

        let mut trace = self
            .store
            .complete_trace(
                &trace.id,
                TraceUpdate {
                    status: Some(TraceStatus::Completed),
                    output: Some(serde_json::to_value(&transcript)?),
                    ..TraceUpdate::default()
                },
            )
            .await
            .context("failed to complete trace")?;
        info!(run_id = %run_id, trace_id = %trace.id, "run completed");

        let outcome = self.evaluator.evaluate_trace(&trace.id).await;
        outcome.apply_to(&mut trace);

        Ok(RunResponse {
            run_id,
            status: TraceStatus::Completed,
            agent_id: agent_id.to_string(),
            message: reply.content,
            transcript,
            trace,
        })
    }

    async fn mark_failed(&self, trace_id: &str) {
        let update = TraceUpdate {
            status: Some(TraceStatus::Failed),
            ..TraceUpdate::default()
        };
        if let Err(err) = self.store.complete_trace(trace_id, update).await {
            error!(trace_id, error = %err, "could not mark trace as failed");
        }
    }

    pub async fn list_traces(&self, agent_id: &str, take: usize) -> Result<Vec<Trace>> {
        self.store.list_traces_for_agent(agent_id, take).await
    }

    /// Evaluate an existing trace of `agent_id`, selected by trace id or run id.
    #[instrument(skip(self))]
    pub async fn evaluate(
        &self,
        agent_id: &str,
        selector: &TraceSelector,
    ) -> Result<EvaluationReport> {
        if selector.is_empty() {
            return Err(RunError::MissingTraceSelector.into());
        }

        let existing = match &selector.trace_id {
            Some(trace_id) => self.store.get_trace(trace_id).await?,
            None => self.store.find_trace_for_agent(agent_id, selector).await?,
        };
        let Some(existing) = existing.filter(|t| t.agent_id == agent_id) else {
            return Err(RunError::TraceNotFound(agent_id.to_string()).into());
        };

        let outcome = self.evaluator.evaluate_trace(&existing.id).await;
        let trace = if outcome.was_recorded() {
            self.store
                .get_trace(&existing.id)
                .await?
                .unwrap_or(existing)
        } else {
            existing
        };

        Ok(EvaluationReport {
            trace_id: trace.id.clone(),
            evaluation: outcome.evaluation().cloned(),
            trace,
        })
    }
}

/// Supplied history, then the single input as a trailing user turn, with
/// the agent's instructions in front unless a system turn is already there.
pub fn normalize_messages(request: &RunRequest, instructions: Option<&str>) -> Vec<ChatMessage> {
    let mut messages = request.messages.clone();
    if let Some(input) = request.input.as_deref().filter(|i| !i.trim().is_empty()) {
        messages.push(ChatMessage::user(input));
    }

    let Some(instructions) = instructions else {
        return messages;
    };
    if messages.iter().any(|m| m.role == Role::System) {
        return messages;
    }
    messages.insert(0, ChatMessage::system(instructions));
    messages
}

/// `run_<unix millis>_<8 base36 chars>`.
pub fn new_run_id() -> String {
    const ALPHABET: &[u8] = b"0123456789abcdefghijklmnopqrstuvwxyz";
    let millis = Utc::now().timestamp_millis();
    let mut rng = rand::rng();
    let suffix: String = (0..8)
        .map(|_| ALPHABET[rng.random_range(0..ALPHABET.len())] as char)
        .collect();
    format!("run_{millis}_{suffix}")
}
