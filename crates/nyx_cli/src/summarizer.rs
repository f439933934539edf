//! [`DreamSummarizer`] wiring (§4.8 consolidate phase): asks the LLM
//! gateway to weave a batch of episodic fragments into one consolidated
//! memory, or reply `SKIP` if nothing useful can be distilled. Grounded on
//! `nyx_orchestrator::persist::LlmSummarizer`'s prompt-then-forward shape.

use async_trait::async_trait;
use nyx_llm::{request, ChatMessage, LlmGateway, QueryClass};
use nyx_memory::DreamSummarizer;
use std::sync::Arc;

pub struct LlmDreamSummarizer {
    gateway: Arc<LlmGateway>,
    model: String,
}

impl LlmDreamSummarizer {
    pub fn new(gateway: Arc<LlmGateway>, model: impl Into<String>) -> Self {
        Self { gateway, model: model.into() }
    }
}

#[async_trait]
impl DreamSummarizer for LlmDreamSummarizer {
    async fn summarize(&self, fragments: &[String]) -> anyhow::Result<String> {
        let system = "Weave the following scattered memory fragments about a single user into one \
                      short, coherent consolidated memory (2-3 sentences). If there is nothing worth \
                      keeping — pure noise, no durable facts — reply with exactly SKIP and nothing else."
            .to_string();
        let body = fragments.iter().map(|f| format!("- {f}")).collect::<Vec<_>>().join("\n");
        let messages = vec![ChatMessage::system(system), ChatMessage::user(body)];
        let response = self.gateway.invoke(request(&self.model, messages, 0.4, QueryClass::MemoryExtraction)).await?;
        Ok(response.text.trim().to_string())
    }
}
