#![allow(dead_code)]

use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use serde_json::Value;

use tracegrade::agent::sqlite::SqliteAgentDirectory;
use tracegrade::agent::{Agent, AgentDirectory};
use tracegrade::config::{EvalConfig, parse_template};
use tracegrade::grader::clock::ManualClock;
use tracegrade::grader::mock::ScriptedGradingService;
use tracegrade::grader::{EvalClient, GradingBackend};
use tracegrade::trace::sqlite::SqliteTraceStore;
use tracegrade::trace::{Trace, TraceSelector, TraceStatus, TraceStore, TraceUpdate};

/// In-memory trace store that remembers every partial update it applied.
pub struct RecordingStore {
    inner: SqliteTraceStore,
    updates: Mutex<Vec<(String, TraceUpdate)>>,
}

impl RecordingStore {
    pub fn new() -> Self {
        Self {
            inner: SqliteTraceStore::in_memory().unwrap(),
            updates: Mutex::new(Vec::new()),
        }
    }

    pub fn updates(&self) -> Vec<(String, TraceUpdate)> {
        self.updates.lock().unwrap().clone()
    }

    /// Store a trace that already finished, without recording the writes.
    pub async fn seed_finished(&self, agent_id: &str, input: Value, output: Value) -> Trace {
        let trace = self
            .inner
            .create_trace(agent_id, "run_seed", &input)
            .await
            .unwrap();
        self.inner
            .complete_trace(
                &trace.id,
                TraceUpdate {
                    status: Some(TraceStatus::Completed),
                    output: Some(output),
                    ..TraceUpdate::default()
                },
            )
            .await
            .unwrap()
    }
}

#[async_trait]
impl TraceStore for RecordingStore {
    async fn create_trace(&self, agent_id: &str, run_id: &str, input: &Value) -> Result<Trace> {
        self.inner.create_trace(agent_id, run_id, input).await
    }

    async fn update_trace_input(&self, id: &str, run_id: &str, input: &Value) -> Result<Trace> {
        self.inner.update_trace_input(id, run_id, input).await
    }

    async fn complete_trace(&self, id: &str, update: TraceUpdate) -> Result<Trace> {
        self.updates
            .lock()
            .unwrap()
            .push((id.to_string(), update.clone()));
        self.inner.complete_trace(id, update).await
    }

    async fn get_trace(&self, id: &str) -> Result<Option<Trace>> {
        self.inner.get_trace(id).await
    }

    async fn find_trace_for_agent(
        &self,
        agent_id: &str,
        selector: &TraceSelector,
    ) -> Result<Option<Trace>> {
        self.inner.find_trace_for_agent(agent_id, selector).await
    }

    async fn list_traces_for_agent(&self, agent_id: &str, take: usize) -> Result<Vec<Trace>> {
        self.inner.list_traces_for_agent(agent_id, take).await
    }
}

/// Agent directory holding the given agents.
pub fn directory(agents: &[Agent]) -> Arc<SqliteAgentDirectory> {
    let dir = SqliteAgentDirectory::open(":memory:").unwrap();
    for agent in agents {
        dir.upsert(agent).unwrap();
    }
    Arc::new(dir)
}

/// Config with a credential, the given template, 5 ms interval and 50 ms deadline.
pub fn test_config(template: Option<&str>) -> EvalConfig {
    EvalConfig {
        api_key: Some("test-key".to_string()),
        template: template.and_then(parse_template),
        poll_interval: Duration::from_millis(5),
        poll_timeout: Duration::from_millis(50),
        ..EvalConfig::default()
    }
}

/// Everything an evaluation test needs to inspect afterwards.
pub struct EvalHarness {
    pub client: EvalClient,
    pub store: Arc<RecordingStore>,
    pub service: Arc<ScriptedGradingService>,
    pub clock: Arc<ManualClock>,
}

pub fn harness(service: ScriptedGradingService, template: Option<&str>) -> EvalHarness {
    harness_with(service, test_config(template), true)
}

pub fn harness_with(
    service: ScriptedGradingService,
    config: EvalConfig,
    enabled: bool,
) -> EvalHarness {
    build_harness(service, config, enabled, true)
}

/// Like [`harness`], but polling sleeps on Tokio time; `clock` is unused.
pub fn tokio_time_harness(service: ScriptedGradingService, template: Option<&str>) -> EvalHarness {
    build_harness(service, test_config(template), true, false)
}

fn build_harness(
    service: ScriptedGradingService,
    config: EvalConfig,
    enabled: bool,
    manual_clock: bool,
) -> EvalHarness {
    let store = Arc::new(RecordingStore::new());
    let service = Arc::new(service);
    let clock = Arc::new(ManualClock::new());
    let backend = if enabled {
        GradingBackend::Enabled(service.clone())
    } else {
        GradingBackend::Disabled
    };
    let agents: Arc<dyn AgentDirectory> = directory(&[Agent::new("agent-1", "Analista ENACOM")]);
    let mut client = EvalClient::new(backend, &config, store.clone(), agents);
    if manual_clock {
        client = client.with_clock(clock.clone());
    }
    EvalHarness {
        client,
        store,
        service,
        clock,
    }
}
