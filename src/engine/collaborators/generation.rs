// Text generation against an OpenAI-compatible `/chat/completions` endpoint.
// Non-streaming: the answer goes out as one WhatsApp message anyway.

use crate::atoms::error::{EngineError, EngineResult};
use crate::atoms::traits::TextGenerator;
use crate::engine::http::{pinned_client, send_checked};
use async_trait::async_trait;
use log::debug;
use reqwest::Client;
use serde_json::{json, Value};

/// Cap on generated answer length.
const MAX_TOKENS: u32 = 400;

pub struct OpenAiGenerator {
    client: Client,
    base_url: String,
    api_key: String,
    model: String,
}

impl OpenAiGenerator {
    pub fn new(base_url: &str, api_key: &str, model: &str) -> Self {
        Self {
            client: pinned_client(),
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key: api_key.to_string(),
            model: model.to_string(),
        }
    }

    fn body(&self, system: &str, prompt: &str) -> Value {
        json!({
            "model": self.model,
            "max_tokens": MAX_TOKENS,
            "messages": [
                { "role": "system", "content": system },
                { "role": "user", "content": prompt },
            ],
        })
    }
}

/// First choice's message content.
fn answer_text(resp: &Value) -> EngineResult<String> {
    resp["choices"][0]["message"]["content"]
        .as_str()
        .map(str::to_string)
        .ok_or_else(|| EngineError::collaborator("generation", "response has no message content", false))
}

#[async_trait]
impl TextGenerator for OpenAiGenerator {
    async fn generate(&self, system: &str, prompt: &str) -> EngineResult<String> {
        if self.api_key.is_empty() {
            return Err(EngineError::collaborator("generation", "no API key configured", false));
        }
        let url = format!("{}/chat/completions", self.base_url);
        debug!("[generation] POST {} ({})", url, self.model);
        let req = self
            .client
            .post(&url)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .json(&self.body(system, prompt));
        let resp: Value = send_checked("generation", req).await?.json().await?;
        answer_text(&resp)
    }
}
