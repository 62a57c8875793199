use async_trait::async_trait;
use reqwest::Url;
use serde_json::Value;
use std::time::Duration;

use super::GradingService;
use crate::error::EvalError;

/// Grading service reached over the OpenAI evals HTTP API.
pub struct OpenAiGradingService {
    api_key: String,
    base_url: Url,
    client: reqwest::Client,
}

impl OpenAiGradingService {
    /// `request_timeout` bounds every single HTTP exchange.
    pub fn new(
        api_key: String,
        base_url: &str,
        request_timeout: Duration,
    ) -> Result<Self, EvalError> {
        let base_url = Url::parse(base_url.trim_end_matches('/'))
            .map_err(|e| EvalError::Malformed(format!("invalid grading base url {base_url}: {e}")))?;
        if base_url.cannot_be_a_base() {
            return Err(EvalError::Malformed(format!(
                "grading base url cannot carry a path: {base_url}"
            )));
        }
        let client = reqwest::Client::builder()
            .timeout(request_timeout)
            .build()?;
        Ok(Self {
            api_key,
            base_url,
            client,
        })
    }

    /// Base URL with `segments` appended, each one percent-encoded.
    fn url(&self, segments: &[&str]) -> Url {
        let mut url = self.base_url.clone();
        if let Ok(mut path) = url.path_segments_mut() {
            path.pop_if_empty().extend(segments);
        }
        url
    }

    async fn send(&self, req: reqwest::RequestBuilder) -> Result<Value, EvalError> {
        let resp = req.bearer_auth(&self.api_key).send().await?;
        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(EvalError::Api {
                status: status.as_u16(),
                message: api_error_message(&body),
            });
        }
        Ok(resp.json().await?)
    }
}

#[async_trait]
impl GradingService for OpenAiGradingService {
    async fn create_eval(&self, request: &Value) -> Result<Value, EvalError> {
        let url = self.url(&["evals"]);
        self.send(self.client.post(url).json(request)).await
    }

    async fn retrieve_run(&self, eval_id: &str, run_id: &str) -> Result<Value, EvalError> {
        let url = self.url(&["evals", eval_id, "runs", run_id]);
        self.send(self.client.get(url)).await
    }
}

/// The service's own error message (`error.message`) when the body has one,
/// otherwise the raw body.
fn api_error_message(body: &str) -> String {
    let from_json = serde_json::from_str::<Value>(body).ok().and_then(|v| {
        v.pointer("/error/message")
            .and_then(Value::as_str)
            .map(str::to_string)
    });
    match from_json {
        Some(message) if !message.trim().is_empty() => message,
        _ if body.trim().is_empty() => "empty response body".to_string(),
        _ => body.trim().to_string(),
    }
}
