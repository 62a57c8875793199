//! Resolve which evaluation run a creation response refers to.

use serde_json::Value;

/// The ids needed to follow an evaluation run, plus the run itself when the
/// creation response embedded one.
#[derive(Debug, Clone, PartialEq)]
pub struct RunContext {
    pub eval_id: String,
    pub run_id: String,
    pub run: Option<Value>,
}

type Probe = for<'a> fn(&'a Value) -> Option<&'a Value>;

const EVAL_ID_PROBES: [Probe; 3] = [
    |r| r.get("id"),
    |r| r.get("eval_id"),
    |r| r.pointer("/evaluation/id"),
];

const EMBEDDED_RUN_PROBES: [Probe; 3] = [
    |r| r.get("run"),
    |r| r.get("latest_run"),
    |r| r.pointer("/runs/0"),
];

const BARE_RUN_ID_PROBES: [Probe; 2] = [|r| r.get("run_id"), |r| r.get("latest_run_id")];

/// Extract the run context from a creation response.
///
/// Each location is tried in priority order. Returns `None` unless both an
/// evaluation id and a run id resolve.
pub fn extract_run_context(response: &Value) -> Option<RunContext> {
    let eval_id = EVAL_ID_PROBES
        .iter()
        .find_map(|probe| probe(response).and_then(as_id))?;

    let run = EMBEDDED_RUN_PROBES
        .iter()
        .find_map(|probe| probe(response).filter(|v| v.is_object()))
        .cloned();

    let run_id = run
        .as_ref()
        .and_then(|run| run.get("id"))
        .and_then(as_id)
        .or_else(|| {
            BARE_RUN_ID_PROBES
                .iter()
                .find_map(|probe| probe(response).and_then(as_id))
        })?;

    Some(RunContext {
        eval_id,
        run_id,
        run,
    })
}

/// Ids arrive as strings, occasionally as numbers.
fn as_id(value: &Value) -> Option<String> {
    match value {
        Value::String(s) if !s.trim().is_empty() => Some(s.trim().to_string()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}
