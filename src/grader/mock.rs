use async_trait::async_trait;
use serde_json::Value;
use std::sync::Mutex;

use super::GradingService;
use crate::error::EvalError;

/// A scripted grading service for tests.
///
/// `create_eval` always answers with the same response. `retrieve_run`
/// walks through the scripted runs and keeps repeating the last one.
pub struct ScriptedGradingService {
    created: Value,
    runs: Vec<Value>,
    create_error: Option<String>,
    retrieve_error: Option<String>,
    stall_create: bool,
    stall_retrieve: bool,
    requests: Mutex<Vec<Value>>,
    retrievals: Mutex<Vec<(String, String)>>,
}

impl ScriptedGradingService {
    pub fn new(created: Value, runs: Vec<Value>) -> Self {
        Self {
            created,
            runs,
            create_error: None,
            retrieve_error: None,
            stall_create: false,
            stall_retrieve: false,
            requests: Mutex::new(Vec::new()),
            retrievals: Mutex::new(Vec::new()),
        }
    }

    /// Make every submission fail with a 500 carrying `message`.
    pub fn failing_create(mut self, message: &str) -> Self {
        self.create_error = Some(message.to_string());
        self
    }

    /// Make every run fetch fail with a 500 carrying `message`.
    pub fn failing_retrieve(mut self, message: &str) -> Self {
        self.retrieve_error = Some(message.to_string());
        self
    }

    /// Make every submission hang forever.
    pub fn stalling_create(mut self) -> Self {
        self.stall_create = true;
        self
    }

    /// Make every run fetch hang forever.
    pub fn stalling_retrieve(mut self) -> Self {
        self.stall_retrieve = true;
        self
    }

    /// Submitted request bodies, in order.
    pub fn requests(&self) -> Vec<Value> {
        self.requests.lock().map(|r| r.clone()).unwrap_or_default()
    }

    /// `(eval_id, run_id)` of every fetch, in order.
    pub fn retrievals(&self) -> Vec<(String, String)> {
        self.retrievals.lock().map(|r| r.clone()).unwrap_or_default()
    }

    pub fn retrieve_calls(&self) -> usize {
        self.retrievals().len()
    }
}

#[async_trait]
impl GradingService for ScriptedGradingService {
    async fn create_eval(&self, request: &Value) -> Result<Value, EvalError> {
        if let Ok(mut requests) = self.requests.lock() {
            requests.push(request.clone());
        }
        if self.stall_create {
            std::future::pending::<()>().await;
        }
        if let Some(message) = &self.create_error {
            return Err(EvalError::Api {
                status: 500,
                message: message.clone(),
            });
        }
        Ok(self.created.clone())
    }

    async fn retrieve_run(&self, eval_id: &str, run_id: &str) -> Result<Value, EvalError> {
        let index = match self.retrievals.lock() {
            Ok(mut retrievals) => {
                retrievals.push((eval_id.to_string(), run_id.to_string()));
                retrievals.len() - 1
            }
            Err(_) => 0,
        };
        if self.stall_retrieve {
            std::future::pending::<()>().await;
        }
        if let Some(message) = &self.retrieve_error {
            return Err(EvalError::Api {
                status: 500,
                message: message.clone(),
            });
        }
        self.runs
            .get(index)
            .or_else(|| self.runs.last())
            .cloned()
            .ok_or_else(|| EvalError::Malformed("no scripted runs left".to_string()))
    }
}
