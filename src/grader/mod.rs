//! Automated evaluation of finished traces by an external grading service.
//!
//! The flow is: submit a request built from the configured template
//! ([`client`]), resolve which run to follow ([`context`]), poll it until it
//! reaches a terminal status ([`poll`]), then turn whatever shape the run
//! came back in into an [`Evaluation`] ([`normalize`]).

pub mod client;
pub mod clock;
pub mod context;
pub mod mock;
pub mod normalize;
pub mod openai;
pub mod poll;

pub use client::EvalClient;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;

use crate::consts::FAILED_EVALUATOR;
use crate::error::EvalError;
use crate::trace::Trace;

/// The grading service, as consumed. Payloads stay untyped: the service's
/// response shapes vary and are probed by [`context`] and [`normalize`].
#[async_trait]
pub trait GradingService: Send + Sync {
    /// Submit an evaluation request; returns the raw creation response.
    async fn create_eval(&self, request: &Value) -> Result<Value, EvalError>;

    /// Fetch the current state of one evaluation run.
    async fn retrieve_run(&self, eval_id: &str, run_id: &str) -> Result<Value, EvalError>;
}

/// Whether a grading service is configured at all.
#[derive(Clone)]
pub enum GradingBackend {
    Disabled,
    Enabled(Arc<dyn GradingService>),
}

impl GradingBackend {
    pub fn enabled(service: impl GradingService + 'static) -> Self {
        GradingBackend::Enabled(Arc::new(service))
    }

    pub fn is_enabled(&self) -> bool {
        matches!(self, GradingBackend::Enabled(_))
    }
}

/// Normalized result of a successful evaluation run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Evaluation {
    /// In [0, 1]. `None` when the grader reported no usable number.
    pub grade: Option<f64>,
    pub feedback: String,
    pub evaluator: String,
}

/// Why an evaluation was not attempted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    NoCredential,
    NoTemplate,
    TraceNotFound,
    TraceStillPending,
    NoOutput,
}

/// Why an attempted evaluation produced nothing to store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AbandonReason {
    /// The creation response named no evaluation id and run id pair.
    NoRunContext,
    /// The run ended in a terminal status other than `completed`.
    Unsuccessful(String),
}

/// Terminal outcome of [`EvalClient::evaluate_trace`].
#[derive(Debug, Clone, PartialEq)]
pub enum EvalOutcome {
    Graded(Evaluation),
    Skipped(SkipReason),
    Abandoned(AbandonReason),
    /// An error was caught and recorded on the trace.
    Failed { feedback: String },
}

impl EvalOutcome {
    pub fn evaluation(&self) -> Option<&Evaluation> {
        match self {
            EvalOutcome::Graded(evaluation) => Some(evaluation),
            _ => None,
        }
    }

    /// Whether this outcome wrote evaluation fields to the trace.
    pub fn was_recorded(&self) -> bool {
        matches!(self, EvalOutcome::Graded(_) | EvalOutcome::Failed { .. })
    }

    /// Reflect what was persisted onto an in-memory trace snapshot.
    pub fn apply_to(&self, trace: &mut Trace) {
        match self {
            EvalOutcome::Graded(evaluation) => {
                trace.grade = evaluation.grade;
                trace.feedback = Some(evaluation.feedback.clone());
                trace.evaluator = Some(evaluation.evaluator.clone());
            }
            EvalOutcome::Failed { feedback } => {
                trace.grade = None;
                trace.feedback = Some(feedback.clone());
                trace.evaluator = Some(FAILED_EVALUATOR.to_string());
            }
            EvalOutcome::Skipped(_) | EvalOutcome::Abandoned(_) => {}
        }
    }
}

/// Statuses after which a run makes no further progress. Both spellings of
/// cancelled are accepted.
const TERMINAL_STATUSES: &[&str] = &["completed", "failed", "cancelled", "canceled"];

pub fn is_terminal_status(status: &str) -> bool {
    TERMINAL_STATUSES
        .iter()
        .any(|terminal| status.trim().eq_ignore_ascii_case(terminal))
}

pub fn is_success_status(status: &str) -> bool {
    status.trim().eq_ignore_ascii_case("completed")
}

/// The `status` field of a run payload, empty when absent.
pub fn run_status(run: &Value) -> &str {
    run.get("status").and_then(Value::as_str).unwrap_or("")
}
