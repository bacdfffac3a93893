//! [`LanguageModel`] backed by an OpenAI-compatible chat-completions endpoint.

use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use roamreader_core::{Intent, QueryPlan, QueryRows};
use roamreader_store_sqlite::TableSchema;
use serde::Deserialize;
use serde_json::json;

use crate::prompts::{describe_prompt, plan_prompt};
use crate::shell::LanguageModel;

pub const DEFAULT_ENDPOINT: &str = "https://api.openai.com/v1/chat/completions";
pub const DEFAULT_MODEL: &str = "gpt-3.5-turbo";

const PLAN_MAX_TOKENS: u32 = 200;
const DESCRIBE_MAX_TOKENS: u32 = 150;
const REQUEST_TIMEOUT: Duration = Duration::from_secs(60);

#[derive(Debug, Clone)]
pub struct ChatCompletionsModel {
    agent: ureq::Agent,
    endpoint: String,
    api_key: String,
    model: String,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatMessage,
}

#[derive(Debug, Deserialize)]
struct ChatMessage {
    #[serde(default)]
    content: String,
}

impl ChatCompletionsModel {
    #[must_use]
    pub fn new(endpoint: impl Into<String>, api_key: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            agent: ureq::AgentBuilder::new().timeout(REQUEST_TIMEOUT).build(),
            endpoint: endpoint.into(),
            api_key: api_key.into(),
            model: model.into(),
        }
    }

    fn complete(&self, prompt: &str, max_tokens: u32) -> Result<String> {
        let body = json!({
            "model": self.model,
            "messages": [{"role": "user", "content": prompt}],
            "max_tokens": max_tokens,
            "temperature": 0,
        });

        let response: ChatResponse = self
            .agent
            .post(&self.endpoint)
            .set("Authorization", &format!("Bearer {}", self.api_key))
            .send_json(body)
            .with_context(|| format!("chat completion request to {} failed", self.endpoint))?
            .into_json()
            .context("chat completion response is not valid JSON")?;

        response
            .choices
            .into_iter()
            .next()
            .map(|choice| choice.message.content.trim().to_string())
            .ok_or_else(|| anyhow!("chat completion returned no choices"))
    }
}

impl LanguageModel for ChatCompletionsModel {
    fn plan(&self, question: &str, schema: &[TableSchema]) -> Result<QueryPlan> {
        let reply = self.complete(&plan_prompt(question, schema), PLAN_MAX_TOKENS)?;
        tracing::debug!(%reply, "model plan reply");
        parse_plan(&reply)
    }

    fn describe(&self, question: &str, rows: &QueryRows) -> Result<String> {
        self.complete(&describe_prompt(question, rows), DESCRIBE_MAX_TOKENS)
    }
}

/// Interpret a planning reply: a JSON intent object, or otherwise SQL.
///
/// # Errors
/// Returns an error when the reply is empty.
pub fn parse_plan(reply: &str) -> Result<QueryPlan> {
    let text = strip_code_fence(reply);
    if text.is_empty() {
        return Err(anyhow!("model returned an empty plan"));
    }
    if text.starts_with('{') {
        if let Ok(intent) = serde_json::from_str::<Intent>(text) {
            return Ok(QueryPlan::Intent(intent));
        }
    }
    Ok(QueryPlan::Sql(text.to_string()))
}

fn strip_code_fence(reply: &str) -> &str {
    let trimmed = reply.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    let body = rest.split_once('\n').map_or("", |(_, body)| body);
    body.trim_end().strip_suffix("```").unwrap_or(body).trim()
}
