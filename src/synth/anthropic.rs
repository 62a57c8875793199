use anyhow::{Result, bail};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::{ChatMessage, Role, Synthesizer};
use crate::agent::Agent;

const API_URL: &str = "https://api.anthropic.com/v1/messages";
const API_VERSION: &str = "2023-06-01";
const DEFAULT_MODEL: &str = "claude-sonnet-4-20250514";
const MAX_TOKENS: u32 = 4096;

/// A synthesizer that calls the Anthropic Messages API.
pub struct AnthropicSynthesizer {
    api_key: String,
    model: String,
    client: reqwest::Client,
}

impl AnthropicSynthesizer {
    /// `model` is the fallback when the agent does not pin one.
    pub fn new(api_key: String, model: Option<String>) -> Self {
        Self {
            api_key,
            model: model.unwrap_or_else(|| DEFAULT_MODEL.to_string()),
            client: reqwest::Client::new(),
        }
    }

    /// Split the conversation into the API's `system` string and turn list.
    /// System messages are concatenated in order; empty turns are dropped.
    fn build_request<'a>(
        model: &'a str,
        messages: &[ChatMessage],
    ) -> Result<ApiRequest<'a>> {
        let system = messages
            .iter()
            .filter(|m| m.role == Role::System)
            .map(|m| m.content.trim())
            .filter(|c| !c.is_empty())
            .collect::<Vec<_>>()
            .join("\n\n");

        let turns: Vec<Message> = messages
            .iter()
            .filter(|m| m.role != Role::System && !m.content.trim().is_empty())
            .map(|m| Message {
                role: m.role.to_string(),
                content: m.content.clone(),
            })
            .collect();

        if turns.is_empty() {
            bail!("conversation has no user or assistant turns");
        }

        Ok(ApiRequest {
            model,
            max_tokens: MAX_TOKENS,
            system: (!system.is_empty()).then_some(system),
            messages: turns,
        })
    }

    fn extract_text(response: &ApiResponse) -> Result<String> {
        let text: String = response
            .content
            .iter()
            .filter_map(|block| {
                if block.content_type == "text" {
                    block.text.as_deref()
                } else {
                    None
                }
            })
            .collect::<Vec<_>>()
            .join("");

        if text.trim().is_empty() {
            bail!("Anthropic API returned empty response");
        }
        Ok(text)
    }
}

#[async_trait]
impl Synthesizer for AnthropicSynthesizer {
    async fn respond(&self, agent: &Agent, messages: &[ChatMessage]) -> Result<ChatMessage> {
        let model = agent.model.as_deref().unwrap_or(&self.model);
        let body = Self::build_request(model, messages)?;

        let resp = self
            .client
            .post(API_URL)
            .header("anthropic-version", API_VERSION)
            .header("content-type", "application/json")
            .header("x-api-key", &self.api_key)
            .json(&body)
            .send()
            .await?;

        if !resp.status().is_success() {
            let status = resp.status();
            let text = resp.text().await.unwrap_or_default();
            bail!("Anthropic API error ({}): {}", status, text);
        }

        let api_resp: ApiResponse = resp.json().await?;
        if let Some(usage) = &api_resp.usage {
            debug!(
                agent_id = %agent.id,
                input_tokens = usage.input_tokens,
                output_tokens = usage.output_tokens,
                "synthesizer token usage"
            );
        }

        Ok(ChatMessage::assistant(Self::extract_text(&api_resp)?))
    }
}

// --- API types ---

#[derive(Serialize)]
struct ApiRequest<'a> {
    model: &'a str,
    max_tokens: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    system: Option<String>,
    messages: Vec<Message>,
}

#[derive(Serialize, Deserialize)]
struct Message {
    role: String,
    content: String,
}

#[derive(Deserialize)]
struct ApiResponse {
    content: Vec<ContentBlock>,
    usage: Option<Usage>,
}

#[derive(Deserialize)]
struct ContentBlock {
    #[serde(rename = "type")]
    content_type: String,
    text: Option<String>,
}

#[derive(Deserialize)]
struct Usage {
    input_tokens: u64,
    output_tokens: u64,
}
