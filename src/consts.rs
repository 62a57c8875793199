//! Project-wide constants.

use std::path::PathBuf;

pub const AUTHOR: &str = env!("CARGO_PKG_AUTHORS");
pub const REPO: &str = env!("CARGO_PKG_REPOSITORY");

/// Instruction used when a run request carries neither input nor messages.
pub const DEFAULT_RUN_INPUT: &str = "Run the default analysis";

/// Number of traces returned by a listing when the caller gives no bound.
pub const DEFAULT_TRACE_TAKE: usize = 20;

/// Delay between two fetches of an evaluation run.
pub const DEFAULT_POLL_INTERVAL_MS: u64 = 2_000;

/// Deadline for the whole polling phase of one evaluation.
pub const DEFAULT_POLL_TIMEOUT_MS: u64 = 120_000;

/// Feedback stored when the grader returned no usable comment.
pub const NO_FEEDBACK: &str = "No comments";

/// Evaluator name stored when the grader did not name itself.
pub const DEFAULT_EVALUATOR: &str = "openai-evals";

/// Evaluator tag stored alongside a failed evaluation.
pub const FAILED_EVALUATOR: &str = "auto-eval";

/// Prefix of the feedback stored alongside a failed evaluation.
pub const FAILED_FEEDBACK_PREFIX: &str = "Automatic evaluation failed";

/// Agent name sent to the grader when the agent cannot be resolved.
pub const UNKNOWN_AGENT_NAME: &str = "Unknown";

/// Default grading API base URL.
pub const DEFAULT_GRADER_BASE_URL: &str = "https://api.openai.com/v1";

/// Default database path: `~/.tracegrade/tracegrade.db`.
/// Single DB for agents and traces.
pub fn default_db_path() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(std::env::temp_dir)
        .join(".tracegrade")
        .join("tracegrade.db")
}
