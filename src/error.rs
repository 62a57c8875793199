//! Typed errors for the run and evaluation phases.

use thiserror::Error;

/// Failures while talking to the grading service or polling one of its runs.
///
/// None of these escape [`EvalClient::evaluate_trace`](crate::grader::EvalClient::evaluate_trace);
/// they are turned into a failure record on the trace.
#[derive(Error, Debug)]
pub enum EvalError {
    /// Transport-level failure (connection refused, TLS, body decoding).
    #[error("grading request failed: {0}")]
    Http(#[from] reqwest::Error),

    /// The grading service answered with a non-success status.
    #[error("grading service returned {status}: {message}")]
    Api { status: u16, message: String },

    /// The run never reached a terminal status before the deadline.
    #[error("evaluation run {run_id} timed out after {timeout_ms} ms ({attempts} polls)")]
    Timeout {
        run_id: String,
        timeout_ms: u128,
        attempts: usize,
    },

    /// Submitting the evaluation did not finish before the deadline.
    #[error("evaluation submission timed out after {timeout_ms} ms")]
    SubmitTimeout { timeout_ms: u128 },

    /// The grading service returned something that is not usable at all.
    #[error("malformed grading payload: {0}")]
    Malformed(String),

    /// Reading or writing the trace failed.
    #[error("trace store failed: {0:#}")]
    Store(#[from] anyhow::Error),
}

/// Failures surfaced to the caller of the run orchestrator.
#[derive(Error, Debug, PartialEq, Eq)]
pub enum RunError {
    #[error("agent not found: {0}")]
    AgentNotFound(String),

    #[error("trace not found for agent {0}")]
    TraceNotFound(String),

    #[error("a trace id or run id is required to evaluate a trace")]
    MissingTraceSelector,
}
