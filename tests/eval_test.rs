mod common;

use serde_json::json;

use std::time::Duration;

use common::{harness, harness_with, test_config, tokio_time_harness};
use tracegrade::grader::mock::ScriptedGradingService;
use tracegrade::grader::{AbandonReason, EvalOutcome, Evaluation, SkipReason};
use tracegrade::trace::{TraceStore, TraceUpdate};

fn no_runs() -> ScriptedGradingService {
    ScriptedGradingService::new(json!({}), vec![])
}

#[tokio::test]
async fn polls_until_completed_and_records_grade() {
    let service = ScriptedGradingService::new(
        json!({"id": "eval-1", "run": {"id": "run-1", "status": "queued"}}),
        vec![
            json!({"id": "run-1", "status": "running"}),
            json!({
                "id": "run-1",
                "status": "completed",
                "grade": 0.87,
                "feedback": "Muy buen resumen",
                "evaluator": "grader-enacom"
            }),
        ],
    );
    let h = harness(service, Some("tmpl_123"));
    let trace = h
        .store
        .seed_finished("agent-1", json!("Pregunta original"), json!("Respuesta final"))
        .await;

    let outcome = h.client.evaluate_trace(&trace.id).await;

    let expected = Evaluation {
        grade: Some(0.87),
        feedback: "Muy buen resumen".to_string(),
        evaluator: "grader-enacom".to_string(),
    };
    assert_eq!(outcome, EvalOutcome::Graded(expected));

    let requests = h.service.requests();
    assert_eq!(requests.len(), 1);
    assert_eq!(requests[0]["evaluation_template_id"], "tmpl_123");
    assert_eq!(requests[0]["inputs"][0]["input"], "Pregunta original");
    assert_eq!(requests[0]["inputs"][0]["output"], "Respuesta final");
    assert_eq!(requests[0]["metadata"]["agentName"], "Analista ENACOM");
    assert_eq!(requests[0]["metadata"]["traceId"], trace.id.as_str());

    assert_eq!(
        h.service.retrievals(),
        vec![
            ("eval-1".to_string(), "run-1".to_string()),
            ("eval-1".to_string(), "run-1".to_string()),
        ]
    );
    assert_eq!(h.clock.sleeps(), 1);

    assert_eq!(
        h.store.updates(),
        vec![(
            trace.id.clone(),
            TraceUpdate {
                grade: Some(Some(0.87)),
                feedback: Some("Muy buen resumen".to_string()),
                evaluator: Some("grader-enacom".to_string()),
                ..TraceUpdate::default()
            }
        )]
    );
    let stored = h.store.get_trace(&trace.id).await.unwrap().unwrap();
    assert_eq!(stored.grade, Some(0.87));
    assert_eq!(stored.evaluator.as_deref(), Some("grader-enacom"));
}

#[tokio::test]
async fn uses_grader_results_from_embedded_run() {
    let service = ScriptedGradingService::new(
        json!({
            "id": "eval-2",
            "run": {
                "id": "run-2",
                "status": "completed",
                "results": [{
                    "name": "grader",
                    "score": 0.42,
                    "sample": {"output": [{"content": "Necesita más detalle"}]}
                }]
            }
        }),
        vec![],
    );
    let h = harness(service, Some("tmpl_123"));
    let trace = h
        .store
        .seed_finished("agent-2", json!("Consulta"), json!("Salida generada"))
        .await;

    let outcome = h.client.evaluate_trace(&trace.id).await;

    assert_eq!(
        outcome.evaluation(),
        Some(&Evaluation {
            grade: Some(0.42),
            feedback: "Necesita más detalle".to_string(),
            evaluator: "grader".to_string(),
        })
    );
    assert_eq!(h.service.retrieve_calls(), 0);
    assert_eq!(h.clock.sleeps(), 0);
    // agent-2 is not in the directory
    assert_eq!(h.service.requests()[0]["metadata"]["agentName"], "Unknown");

    let updates = h.store.updates();
    assert_eq!(updates.len(), 1);
    assert_eq!(updates[0].1.grade, Some(Some(0.42)));
    assert_eq!(updates[0].1.feedback.as_deref(), Some("Necesita más detalle"));
    assert_eq!(updates[0].1.evaluator.as_deref(), Some("grader"));
}

#[tokio::test]
async fn skipped_without_credential() {
    let h = harness_with(no_runs(), test_config(Some("tmpl_123")), false);
    let trace = h.store.seed_finished("agent-1", json!("q"), json!("a")).await;

    let outcome = h.client.evaluate_trace(&trace.id).await;

    assert_eq!(outcome, EvalOutcome::Skipped(SkipReason::NoCredential));
    assert!(h.service.requests().is_empty());
    assert!(h.store.updates().is_empty());
}

#[tokio::test]
async fn skipped_without_template() {
    let h = harness(no_runs(), None);
    let trace = h.store.seed_finished("agent-1", json!("q"), json!("a")).await;

    let outcome = h.client.evaluate_trace(&trace.id).await;

    assert_eq!(outcome, EvalOutcome::Skipped(SkipReason::NoTemplate));
    assert!(h.service.requests().is_empty());
    assert!(h.store.updates().is_empty());
}

#[tokio::test]
async fn skipped_when_output_is_blank() {
    let h = harness(no_runs(), Some("tmpl_123"));
    let trace = h.store.seed_finished("agent-1", json!("q"), json!("   ")).await;

    let outcome = h.client.evaluate_trace(&trace.id).await;

    assert_eq!(outcome, EvalOutcome::Skipped(SkipReason::NoOutput));
    assert!(h.service.requests().is_empty());
    assert!(h.store.updates().is_empty());
}

#[tokio::test]
async fn skipped_when_trace_is_missing_or_pending() {
    let h = harness(no_runs(), Some("tmpl_123"));

    assert_eq!(
        h.client.evaluate_trace("missing").await,
        EvalOutcome::Skipped(SkipReason::TraceNotFound)
    );

    let pending = h.store.create_trace("agent-1", "run_1", &json!("q")).await.unwrap();
    assert_eq!(
        h.client.evaluate_trace(&pending.id).await,
        EvalOutcome::Skipped(SkipReason::TraceStillPending)
    );

    assert!(h.service.requests().is_empty());
    assert!(h.store.updates().is_empty());
}

#[tokio::test]
async fn timeout_records_a_single_failure() {
    let service = ScriptedGradingService::new(
        json!({"id": "eval-1", "run_id": "run-1"}),
        vec![json!({"id": "run-1", "status": "running"})],
    );
    let h = harness(service, Some("tmpl_123"));
    let trace = h.store.seed_finished("agent-1", json!("q"), json!("a")).await;

    let outcome = h.client.evaluate_trace(&trace.id).await;

    let EvalOutcome::Failed { feedback } = &outcome else {
        panic!("expected a failure, got {outcome:?}");
    };
    assert!(feedback.starts_with("Automatic evaluation failed"));
    assert!(feedback.contains("timed out"));

    let fetches = h.service.retrieve_calls();
    assert!((9..=11).contains(&fetches), "fetched {fetches} times");

    let updates = h.store.updates();
    assert_eq!(updates.len(), 1);
    assert_eq!(updates[0].1.evaluator.as_deref(), Some("auto-eval"));
    assert_eq!(updates[0].1.feedback.as_ref(), Some(feedback));
    assert_eq!(updates[0].1.grade, Some(None));
    assert!(updates[0].1.status.is_none());
}

#[tokio::test]
async fn unsuccessful_run_is_abandoned_silently() {
    let service = ScriptedGradingService::new(
        json!({"id": "eval-1", "run": {"id": "run-1", "status": "queued"}}),
        vec![json!({"id": "run-1", "status": "failed", "error": {"message": "grader crashed"}})],
    );
    let h = harness(service, Some("tmpl_123"));
    let trace = h.store.seed_finished("agent-1", json!("q"), json!("a")).await;

    let outcome = h.client.evaluate_trace(&trace.id).await;

    assert_eq!(
        outcome,
        EvalOutcome::Abandoned(AbandonReason::Unsuccessful("failed".to_string()))
    );
    assert_eq!(h.service.retrieve_calls(), 1);
    assert!(h.store.updates().is_empty());
}

#[tokio::test]
async fn response_without_run_is_abandoned() {
    let service = ScriptedGradingService::new(json!({"id": "eval-1", "object": "eval"}), vec![]);
    let h = harness(service, Some("tmpl_123"));
    let trace = h.store.seed_finished("agent-1", json!("q"), json!("a")).await;

    let outcome = h.client.evaluate_trace(&trace.id).await;

    assert_eq!(outcome, EvalOutcome::Abandoned(AbandonReason::NoRunContext));
    assert_eq!(h.service.retrieve_calls(), 0);
    assert!(h.store.updates().is_empty());
}

#[tokio::test]
async fn submission_error_is_recorded_on_trace() {
    let h = harness(no_runs().failing_create("quota exceeded"), Some("tmpl_123"));
    let trace = h.store.seed_finished("agent-1", json!("q"), json!("a")).await;

    let outcome = h.client.evaluate_trace(&trace.id).await;

    assert!(matches!(outcome, EvalOutcome::Failed { .. }));
    let stored = h.store.get_trace(&trace.id).await.unwrap().unwrap();
    assert_eq!(stored.evaluator.as_deref(), Some("auto-eval"));
    let feedback = stored.feedback.unwrap();
    assert!(feedback.contains("quota exceeded"), "{feedback}");
    assert!(stored.grade.is_none());
}

#[tokio::test]
async fn fetch_error_is_recorded_on_trace() {
    let service = ScriptedGradingService::new(
        json!({"id": "eval-1", "run": {"id": "run-1", "status": "queued"}}),
        vec![],
    )
    .failing_retrieve("upstream unavailable");
    let h = harness(service, Some("tmpl_123"));
    let trace = h.store.seed_finished("agent-1", json!("q"), json!("a")).await;

    let outcome = h.client.evaluate_trace(&trace.id).await;

    let EvalOutcome::Failed { feedback } = outcome else {
        panic!("expected a failure");
    };
    assert!(feedback.contains("upstream unavailable"));
    assert_eq!(h.store.updates().len(), 1);
}

#[tokio::test]
async fn template_object_fields_reach_the_request() {
    let service = ScriptedGradingService::new(
        json!({"id": "eval-1", "run": {"id": "run-1", "status": "completed", "score": "0.5"}}),
        vec![],
    );
    let h = harness(
        service,
        Some(r#"{"name": "quality", "metadata": {"team": "eval"}}"#),
    );
    let trace = h.store.seed_finished("agent-1", json!("q"), json!("a")).await;

    let outcome = h.client.evaluate_trace(&trace.id).await;

    let request = &h.service.requests()[0];
    assert_eq!(request["name"], "quality");
    assert_eq!(request["metadata"]["team"], "eval");
    assert_eq!(request["metadata"]["agentId"], "agent-1");
    assert!(request.get("evaluation_template_id").is_none());

    let evaluation = outcome.evaluation().unwrap();
    assert_eq!(evaluation.grade, Some(0.5));
    assert_eq!(evaluation.feedback, "No comments");
    assert_eq!(evaluation.evaluator, "openai-evals");
}

#[tokio::test(start_paused = true)]
async fn stalled_run_fetch_ends_at_the_deadline() {
    let service = ScriptedGradingService::new(
        json!({"id": "eval-1", "run": {"id": "run-1", "status": "queued"}}),
        vec![],
    )
    .stalling_retrieve();
    let h = tokio_time_harness(service, Some("tmpl_123"));
    let trace = h.store.seed_finished("agent-1", json!("q"), json!("a")).await;

    let outcome = tokio::time::timeout(Duration::from_secs(3600), h.client.evaluate_trace(&trace.id))
        .await
        .expect("evaluation must not hang");

    let EvalOutcome::Failed { feedback } = outcome else {
        panic!("expected a failure");
    };
    assert!(feedback.contains("timed out"), "{feedback}");
    assert_eq!(h.service.retrieve_calls(), 1);

    let updates = h.store.updates();
    assert_eq!(updates.len(), 1);
    assert_eq!(updates[0].1.evaluator.as_deref(), Some("auto-eval"));
}

#[tokio::test(start_paused = true)]
async fn stalled_submission_ends_at_the_deadline() {
    let h = tokio_time_harness(no_runs().stalling_create(), Some("tmpl_123"));
    let trace = h.store.seed_finished("agent-1", json!("q"), json!("a")).await;

    let outcome = tokio::time::timeout(Duration::from_secs(3600), h.client.evaluate_trace(&trace.id))
        .await
        .expect("evaluation must not hang");

    let EvalOutcome::Failed { feedback } = outcome else {
        panic!("expected a failure");
    };
    assert!(feedback.contains("submission timed out"), "{feedback}");
    assert_eq!(h.service.requests().len(), 1);
    assert_eq!(h.service.retrieve_calls(), 0);

    let stored = h.store.get_trace(&trace.id).await.unwrap().unwrap();
    assert_eq!(stored.evaluator.as_deref(), Some("auto-eval"));
}

async fn grade_earlier(h: &common::EvalHarness, trace_id: &str) {
    h.store
        .complete_trace(
            trace_id,
            TraceUpdate {
                grade: Some(Some(0.9)),
                feedback: Some("Great".to_string()),
                evaluator: Some("rubric".to_string()),
                ..TraceUpdate::default()
            },
        )
        .await
        .unwrap();
}

#[tokio::test]
async fn failed_reevaluation_clears_earlier_grade() {
    let h = harness(no_runs().failing_create("quota exceeded"), Some("tmpl_123"));
    let trace = h.store.seed_finished("agent-1", json!("q"), json!("a")).await;
    grade_earlier(&h, &trace.id).await;

    let outcome = h.client.evaluate_trace(&trace.id).await;

    assert!(matches!(outcome, EvalOutcome::Failed { .. }));
    let stored = h.store.get_trace(&trace.id).await.unwrap().unwrap();
    assert_eq!(stored.grade, None);
    assert_eq!(stored.evaluator.as_deref(), Some("auto-eval"));
    assert!(stored.feedback.unwrap().contains("quota exceeded"));
}

#[tokio::test]
async fn ungraded_reevaluation_clears_earlier_grade() {
    let service = ScriptedGradingService::new(
        json!({"id": "eval-1", "run": {"id": "run-1", "status": "completed", "feedback": "Could not score"}}),
        vec![],
    );
    let h = harness(service, Some("tmpl_123"));
    let trace = h.store.seed_finished("agent-1", json!("q"), json!("a")).await;
    grade_earlier(&h, &trace.id).await;

    let outcome = h.client.evaluate_trace(&trace.id).await;

    assert_eq!(outcome.evaluation().map(|e| e.grade), Some(None));
    let stored = h.store.get_trace(&trace.id).await.unwrap().unwrap();
    assert_eq!(stored.grade, None);
    assert_eq!(stored.feedback.as_deref(), Some("Could not score"));
    assert_eq!(stored.evaluator.as_deref(), Some("openai-evals"));
}
