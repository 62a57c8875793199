pub mod sqlite;

use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// What the runner needs to know about an agent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Agent {
    pub id: String,
    pub name: String,
    pub area: Option<String>,
    /// System instructions prepended to every conversation.
    pub instructions: Option<String>,
    /// Model override for synthesizers that talk to an LLM.
    pub model: Option<String>,
}

impl Agent {
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            area: None,
            instructions: None,
            model: None,
        }
    }

    /// Instructions, if any non-blank ones are set.
    pub fn system_instructions(&self) -> Option<&str> {
        self.instructions
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty())
    }
}

/// Read-only agent lookup.
#[async_trait]
pub trait AgentDirectory: Send + Sync {
    async fn get_agent(&self, id: &str) -> Result<Option<Agent>>;
}
