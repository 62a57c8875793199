//! Turn a finished evaluation run, whatever its shape, into an [`Evaluation`].
//!
//! Each extracted field has an ordered list of probes; the first probe that
//! yields a usable value wins. A missing field anywhere is never an error.

use serde_json::Value;

use super::Evaluation;
use crate::consts::{DEFAULT_EVALUATOR, NO_FEEDBACK};

/// A run together with its "first result", the entry most graders put
/// per-criterion details in.
#[derive(Clone, Copy)]
struct RunView<'a> {
    run: &'a Value,
    /// The run's own `result` object.
    result: Option<&'a Value>,
    first: Option<&'a Value>,
}

impl<'a> RunView<'a> {
    fn new(run: &'a Value) -> Self {
        Self {
            run,
            result: run.get("result").filter(|v| v.is_object()),
            first: first_result(run),
        }
    }
}

type ValueProbe = for<'a> fn(RunView<'a>) -> Option<&'a Value>;
type TextProbe = for<'a> fn(RunView<'a>) -> Option<String>;

const GRADE_PROBES: [ValueProbe; 8] = [
    |v| v.run.get("grade"),
    |v| v.run.get("score"),
    |v| v.run.pointer("/metrics/grade"),
    |v| v.run.pointer("/metrics/score"),
    |v| v.result.and_then(|r| r.get("grade")),
    |v| v.result.and_then(|r| r.get("score")),
    |v| v.first.and_then(|r| r.get("grade")),
    |v| v.first.and_then(|r| r.get("score")),
];

const FEEDBACK_PROBES: [TextProbe; 5] = [
    |v| text(v.run.get("feedback")),
    |v| text(v.result.and_then(|r| r.get("feedback"))),
    |v| text(v.first.and_then(|r| r.get("feedback"))),
    |v| v.first.and_then(|r| r.get("sample")).and_then(sample_feedback),
    |v| v.result.and_then(|r| r.get("sample")).and_then(sample_feedback),
];

const EVALUATOR_PROBES: [ValueProbe; 6] = [
    |v| v.run.get("evaluator"),
    |v| v.result.and_then(|r| r.get("evaluator")),
    |v| v.result.and_then(|r| r.get("grader")),
    |v| v.first.and_then(|r| r.get("evaluator")),
    |v| v.first.and_then(|r| r.get("grader")),
    |v| v.first.and_then(|r| r.get("name")),
];

/// First defined value across `probes`, after `accept` filters candidates.
fn first_defined<'a, T>(
    view: RunView<'a>,
    probes: &[ValueProbe],
    accept: impl Fn(&'a Value) -> Option<T>,
) -> Option<T> {
    probes
        .iter()
        .find_map(|probe| probe(view).and_then(&accept))
}

/// The run's first result: `results[0]`, else `result`, else `output[0]`.
pub fn first_result(run: &Value) -> Option<&Value> {
    run.pointer("/results/0")
        .or_else(|| run.get("result").filter(|v| v.is_object()))
        .or_else(|| run.pointer("/output/0"))
}

/// Grade in [0, 1], or `None` when no candidate is a finite number.
pub fn extract_grade(run: &Value) -> Option<f64> {
    first_defined(RunView::new(run), &GRADE_PROBES, as_number).map(|g| g.clamp(0.0, 1.0))
}

/// Grader feedback, or the fixed "no comments" text.
pub fn extract_feedback(run: &Value) -> String {
    let view = RunView::new(run);
    FEEDBACK_PROBES
        .iter()
        .find_map(|probe| probe(view))
        .unwrap_or_else(|| NO_FEEDBACK.to_string())
}

/// Name of whoever graded the run, or the grading subsystem's default name.
pub fn extract_evaluator(run: &Value) -> String {
    first_defined(RunView::new(run), &EVALUATOR_PROBES, |v| text(Some(v)))
        .unwrap_or_else(|| DEFAULT_EVALUATOR.to_string())
}

pub fn normalize_run(run: &Value) -> Evaluation {
    Evaluation {
        grade: extract_grade(run),
        feedback: extract_feedback(run),
        evaluator: extract_evaluator(run),
    }
}

/// Feedback carried by a grader sample: `feedback`, else the text inside
/// `output`, else `output_text`, else `reason`.
pub fn sample_feedback(sample: &Value) -> Option<String> {
    text(sample.get("feedback"))
        .or_else(|| sample.get("output").and_then(output_text))
        .or_else(|| text(sample.get("output_text")))
        .or_else(|| text(sample.get("reason")))
}

/// Collect the text of an output list. Items may be plain strings, objects
/// with string `content`, or objects whose `content` is a list of chunks
/// carrying `text`. Pieces are trimmed and joined with a newline.
fn output_text(output: &Value) -> Option<String> {
    let items = output.as_array()?;
    let mut pieces: Vec<&str> = Vec::new();
    for item in items {
        match item {
            Value::String(s) => pieces.push(s),
            Value::Object(obj) => match obj.get("content") {
                Some(Value::String(s)) => pieces.push(s),
                Some(Value::Array(chunks)) => pieces.extend(
                    chunks
                        .iter()
                        .filter_map(|chunk| chunk.get("text").and_then(Value::as_str)),
                ),
                _ => {}
            },
            _ => {}
        }
    }
    let joined = pieces
        .iter()
        .map(|p| p.trim())
        .filter(|p| !p.is_empty())
        .collect::<Vec<_>>()
        .join("\n");
    (!joined.is_empty()).then_some(joined)
}

/// Trimmed non-empty string.
fn text(value: Option<&Value>) -> Option<String> {
    let s = value?.as_str()?.trim();
    (!s.is_empty()).then(|| s.to_string())
}

/// Finite number, or a string that parses as one.
fn as_number(value: &Value) -> Option<f64> {
    let n = match value {
        Value::Number(n) => n.as_f64()?,
        Value::String(s) => s.trim().parse::<f64>().ok()?,
        _ => return None,
    };
    n.is_finite().then_some(n)
}
