use serde_json::Value;
use std::time::Duration;
use tracing::{debug, warn};

use super::clock::Clock;
use super::context::RunContext;
use super::{GradingService, is_terminal_status, run_status};
use crate::error::EvalError;

/// How often and for how long to poll a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollSettings {
    pub interval: Duration,
    pub timeout: Duration,
}

/// Follow a run until it reaches a terminal status.
///
/// An embedded run that is already terminal is returned without any fetch.
/// Otherwise the first fetch happens immediately and every later one after
/// sleeping `interval`. The deadline is wall-clock, checked after each
/// non-terminal fetch, and a single fetch may only use the time left before
/// it.
pub async fn wait_for_terminal_run(
    service: &dyn GradingService,
    clock: &dyn Clock,
    context: &RunContext,
    settings: PollSettings,
) -> Result<Value, EvalError> {
    if let Some(run) = &context.run
        && is_terminal_status(run_status(run))
    {
        debug!(run_id = %context.run_id, status = run_status(run), "run already terminal");
        return Ok(run.clone());
    }

    let started = clock.elapsed();
    let mut attempts = 0usize;
    loop {
        if attempts > 0 {
            clock.sleep(settings.interval).await;
        }
        attempts += 1;

        let remaining = settings
            .timeout
            .saturating_sub(clock.elapsed().saturating_sub(started));
        let fetch = service.retrieve_run(&context.eval_id, &context.run_id);
        let Ok(run) = tokio::time::timeout(remaining, fetch).await else {
            warn!(run_id = %context.run_id, attempt = attempts, "run fetch outlived the deadline");
            return Err(timed_out(context, settings, attempts));
        };
        let run = run?;
        let status = run_status(&run);
        debug!(run_id = %context.run_id, attempt = attempts, status, "polled evaluation run");
        if is_terminal_status(status) {
            return Ok(run);
        }

        if clock.elapsed().saturating_sub(started) >= settings.timeout {
            return Err(timed_out(context, settings, attempts));
        }
    }
}

fn timed_out(context: &RunContext, settings: PollSettings, attempts: usize) -> EvalError {
    EvalError::Timeout {
        run_id: context.run_id.clone(),
        timeout_ms: settings.timeout.as_millis(),
        attempts,
    }
}
