use anyhow::Result;
use async_trait::async_trait;

use super::{ChatMessage, Synthesizer};
use crate::agent::Agent;

/// Answers with a fixed self-introduction. Used in development, where no
/// model is wired in.
pub struct SimulatedSynthesizer;

#[async_trait]
impl Synthesizer for SimulatedSynthesizer {
    async fn respond(&self, agent: &Agent, _messages: &[ChatMessage]) -> Result<ChatMessage> {
        let area = match agent.area.as_deref().map(str::trim) {
            Some(area) if !area.is_empty() => format!(", specialized in {area}"),
            _ => String::new(),
        };
        Ok(ChatMessage::assistant(format!(
            "Hi, I am {}{area}. This is a simulated response generated by the development environment.",
            agent.name
        )))
    }
}
