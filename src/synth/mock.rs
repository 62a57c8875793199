use anyhow::{Result, anyhow};
use async_trait::async_trait;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};

use super::{ChatMessage, Synthesizer};
use crate::agent::Agent;

/// A scripted synthesizer for tests. Returns pre-defined replies in order;
/// `Err` entries become failures.
pub struct MockSynthesizer {
    replies: Vec<Result<String, String>>,
    index: AtomicUsize,
    seen: Mutex<Vec<Vec<ChatMessage>>>,
}

impl MockSynthesizer {
    pub fn new(replies: Vec<Result<String, String>>) -> Self {
        Self {
            replies,
            index: AtomicUsize::new(0),
            seen: Mutex::new(Vec::new()),
        }
    }

    /// Always answers with the same text.
    pub fn replying(text: &str) -> Self {
        Self::new(vec![Ok(text.to_string())])
    }

    /// Fails on the first call.
    pub fn failing(message: &str) -> Self {
        Self::new(vec![Err(message.to_string())])
    }

    /// Histories received so far, one entry per call.
    pub fn seen(&self) -> Vec<Vec<ChatMessage>> {
        self.seen.lock().map(|s| s.clone()).unwrap_or_default()
    }
}

#[async_trait]
impl Synthesizer for MockSynthesizer {
    async fn respond(&self, _agent: &Agent, messages: &[ChatMessage]) -> Result<ChatMessage> {
        if let Ok(mut seen) = self.seen.lock() {
            seen.push(messages.to_vec());
        }
        let i = self.index.fetch_add(1, Ordering::SeqCst);
        // A single scripted reply repeats forever.
        let reply = if self.replies.len() == 1 {
            self.replies.first()
        } else {
            self.replies.get(i)
        };
        match reply {
            Some(Ok(text)) => Ok(ChatMessage::assistant(text.clone())),
            Some(Err(message)) => Err(anyhow!("{message}")),
            None => Err(anyhow!(
                "MockSynthesizer: no more replies (called {} times)",
                i + 1
            )),
        }
    }
}
