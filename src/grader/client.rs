use serde_json::{Map, Value, json};
use std::sync::Arc;
use tracing::{error, info, instrument, warn};

use super::clock::{Clock, TokioClock};
use super::context::extract_run_context;
use super::normalize::normalize_run;
use super::poll::{PollSettings, wait_for_terminal_run};
use super::{
    AbandonReason, EvalOutcome, GradingBackend, GradingService, SkipReason, is_success_status,
    run_status,
};
use crate::agent::AgentDirectory;
use crate::config::{EvalConfig, EvalTemplate};
use crate::consts::{FAILED_EVALUATOR, FAILED_FEEDBACK_PREFIX, UNKNOWN_AGENT_NAME};
use crate::error::EvalError;
use crate::trace::{Trace, TraceStore, TraceUpdate};

/// Requests an automated evaluation of a finished trace and records the
/// outcome on it. Never fails: every error ends up on the trace instead.
pub struct EvalClient {
    backend: GradingBackend,
    template: Option<EvalTemplate>,
    poll: PollSettings,
    store: Arc<dyn TraceStore>,
    agents: Arc<dyn AgentDirectory>,
    clock: Arc<dyn Clock>,
}

impl EvalClient {
    pub fn new(
        backend: GradingBackend,
        config: &EvalConfig,
        store: Arc<dyn TraceStore>,
        agents: Arc<dyn AgentDirectory>,
    ) -> Self {
        Self {
            backend,
            template: config.template.clone(),
            poll: PollSettings {
                interval: config.poll_interval,
                timeout: config.poll_timeout,
            },
            store,
            agents,
            clock: Arc::new(TokioClock::new()),
        }
    }

    /// Replace the time source (tests use a manual clock).
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    #[instrument(name = "evaluate_trace", skip(self))]
    pub async fn evaluate_trace(&self, trace_id: &str) -> EvalOutcome {
        let service = match &self.backend {
            GradingBackend::Disabled => {
                info!("no grading credential configured, skipping evaluation");
                return EvalOutcome::Skipped(SkipReason::NoCredential);
            }
            GradingBackend::Enabled(service) => Arc::clone(service),
        };
        let Some(template) = &self.template else {
            info!("no evaluation template configured, skipping evaluation");
            return EvalOutcome::Skipped(SkipReason::NoTemplate);
        };

        match self.run_evaluation(service.as_ref(), template, trace_id).await {
            Ok(outcome) => outcome,
            Err(err) => self.record_failure(trace_id, &err).await,
        }
    }

    async fn run_evaluation(
        &self,
        service: &dyn GradingService,
        template: &EvalTemplate,
        trace_id: &str,
    ) -> Result<EvalOutcome, EvalError> {
        let Some(trace) = self.store.get_trace(trace_id).await? else {
            warn!("trace not found, skipping evaluation");
            return Ok(EvalOutcome::Skipped(SkipReason::TraceNotFound));
        };
        if !trace.status.is_finished() {
            warn!("trace is still pending, skipping evaluation");
            return Ok(EvalOutcome::Skipped(SkipReason::TraceStillPending));
        }
        if !trace.has_output() {
            warn!("trace has no output to evaluate");
            return Ok(EvalOutcome::Skipped(SkipReason::NoOutput));
        }

        let agent_name = self.agent_name(&trace.agent_id).await?;
        let request = build_request(template, &trace, &agent_name);
        let created = tokio::time::timeout(self.poll.timeout, service.create_eval(&request))
            .await
            .map_err(|_| EvalError::SubmitTimeout {
                timeout_ms: self.poll.timeout.as_millis(),
            })??;

        let Some(context) = extract_run_context(&created) else {
            warn!("grading response names no evaluation and run, abandoning evaluation");
            return Ok(EvalOutcome::Abandoned(AbandonReason::NoRunContext));
        };
        info!(eval_id = %context.eval_id, run_id = %context.run_id, "evaluation submitted");

        let run = wait_for_terminal_run(service, self.clock.as_ref(), &context, self.poll).await?;
        let status = run_status(&run);
        if !is_success_status(status) {
            warn!(run_id = %context.run_id, status, "evaluation run did not complete");
            return Ok(EvalOutcome::Abandoned(AbandonReason::Unsuccessful(
                status.to_string(),
            )));
        }

        let evaluation = normalize_run(&run);
        self.store
            .complete_trace(
                trace_id,
                TraceUpdate {
                    grade: Some(evaluation.grade),
                    feedback: Some(evaluation.feedback.clone()),
                    evaluator: Some(evaluation.evaluator.clone()),
                    ..TraceUpdate::default()
                },
            )
            .await?;

        info!(
            grade = ?evaluation.grade,
            evaluator = %evaluation.evaluator,
            "evaluation completed"
        );
        Ok(EvalOutcome::Graded(evaluation))
    }

    async fn agent_name(&self, agent_id: &str) -> Result<String, EvalError> {
        Ok(self
            .agents
            .get_agent(agent_id)
            .await?
            .map(|agent| agent.name)
            .unwrap_or_else(|| UNKNOWN_AGENT_NAME.to_string()))
    }

    async fn record_failure(&self, trace_id: &str, err: &EvalError) -> EvalOutcome {
        error!(error = %err, "evaluation failed");
        let feedback = format!("{FAILED_FEEDBACK_PREFIX}: {err}");
        let update = TraceUpdate {
            grade: Some(None),
            evaluator: Some(FAILED_EVALUATOR.to_string()),
            feedback: Some(feedback.clone()),
            ..TraceUpdate::default()
        };
        if let Err(store_err) = self.store.complete_trace(trace_id, update).await {
            error!(error = %store_err, "could not record evaluation failure");
        }
        EvalOutcome::Failed { feedback }
    }
}

/// The evaluation request for one trace: the template's fields, merged
/// metadata, and a single input item.
pub fn build_request(template: &EvalTemplate, trace: &Trace, agent_name: &str) -> Value {
    let mut request: Map<String, Value> = template.clone();

    let mut metadata = match template.get("metadata") {
        Some(Value::Object(existing)) => existing.clone(),
        _ => Map::new(),
    };
    metadata.insert("traceId".to_string(), json!(trace.id));
    metadata.insert("agentId".to_string(), json!(trace.agent_id));
    metadata.insert("agentName".to_string(), json!(agent_name));
    let metadata = Value::Object(metadata);

    request.insert(
        "inputs".to_string(),
        json!([{
            "input": trace.input,
            "output": trace.output,
            "metadata": metadata,
        }]),
    );
    request.insert("metadata".to_string(), metadata);
    Value::Object(request)
}
