use std::thread;
use std::time::Duration;

use serde_json::{Value, json};
use tracing::{debug, info, warn};

use crate::analysis::{self, AnalysisResult, SCHEMA_NAME};
use crate::config::Config;
use crate::error::{Error, Result};
use crate::prompts::{AnalysisRequest, PromptEngine};

const MAX_ATTEMPTS: u32 = 2;
const INITIAL_BACKOFF_MS: u64 = 1000;

/// A generative model endpoint that returns schema-conformant JSON.
pub trait ModelClient: Send + Sync {
    fn complete(&self, payload: &str, schema: &Value) -> Result<Value>;
}

/// Resolve the model API key from the configured environment variable.
fn resolve_api_key(api_key_env: &str) -> Result<String> {
    match std::env::var(api_key_env) {
        Ok(key) if !key.trim().is_empty() => Ok(key),
        _ => Err(Error::Model(format!(
            "model API key not found in ${api_key_env}"
        ))),
    }
}

/// OpenAI-compatible chat completions client with strict structured output.
pub struct OpenAiClient {
    agent: ureq::Agent,
    endpoint: String,
    model: String,
    api_key: String,
    backoff_ms: u64,
}

impl OpenAiClient {
    pub fn new(config: &Config) -> Result<Self> {
        let api_key = resolve_api_key(&config.api_key_env)?;
        let agent = ureq::AgentBuilder::new()
            .timeout(Duration::from_secs(config.model_timeout))
            .build();
        Ok(Self {
            agent,
            endpoint: config.model_endpoint.clone(),
            model: config.model.clone(),
            api_key,
            backoff_ms: INITIAL_BACKOFF_MS,
        })
    }

    fn request_body(&self, payload: &str, schema: &Value) -> Value {
        json!({
            "model": self.model,
            "messages": [
                { "role": "user", "content": payload }
            ],
            "response_format": {
                "type": "json_schema",
                "json_schema": {
                    "name": SCHEMA_NAME,
                    "strict": true,
                    "schema": schema,
                }
            }
        })
    }
}

impl ModelClient for OpenAiClient {
    fn complete(&self, payload: &str, schema: &Value) -> Result<Value> {
        let body = self.request_body(payload, schema);

        let mut backoff_ms = self.backoff_ms;
        for attempt in 1..=MAX_ATTEMPTS {
            match self
                .agent
                .post(&self.endpoint)
                .set("Authorization", &format!("Bearer {}", self.api_key))
                .set("Content-Type", "application/json")
                .send_json(&body)
            {
                Ok(response) => {
                    let json: Value = response
                        .into_json()
                        .map_err(|e| Error::Model(format!("failed to read model response: {e}")))?;
                    return extract_content(&json);
                }
                Err(ref e) if attempt < MAX_ATTEMPTS && is_retryable(e) => {
                    warn!(
                        attempt,
                        error = %e,
                        backoff_ms,
                        "retrying model request after transient error"
                    );
                    thread::sleep(Duration::from_millis(backoff_ms));
                    backoff_ms *= 2;
                }
                Err(ureq::Error::Status(code, _)) if code == 401 || code == 403 => {
                    return Err(Error::Model(format!(
                        "model endpoint rejected credentials (HTTP {code})"
                    )));
                }
                Err(e) => {
                    return Err(Error::Model(format!("model request failed: {e}")));
                }
            }
        }
        Err(Error::Model("model request exhausted retries".into()))
    }
}

/// Only rate limits (429) and server errors (5xx) are retried. Timeouts and
/// connection failures go straight to the caller.
fn is_retryable(err: &ureq::Error) -> bool {
    match err {
        ureq::Error::Status(code, _) => *code == 429 || *code >= 500,
        ureq::Error::Transport(_) => false,
    }
}

/// Pull the structured reply out of a chat completions response.
fn extract_content(response: &Value) -> Result<Value> {
    let choice = response
        .get("choices")
        .and_then(|c| c.get(0))
        .ok_or_else(|| Error::Model("response has no choices".into()))?;
    let message = choice
        .get("message")
        .ok_or_else(|| Error::Model("response choice has no message".into()))?;

    if let Some(refusal) = message.get("refusal").and_then(Value::as_str) {
        return Err(Error::Model(format!("model refused: {refusal}")));
    }
    if choice.get("finish_reason").and_then(Value::as_str) == Some("length") {
        return Err(Error::Model("model reply was cut off".into()));
    }

    let content = message
        .get("content")
        .and_then(Value::as_str)
        .ok_or_else(|| Error::Model("response message has no content".into()))?;
    serde_json::from_str(content)
        .map_err(|e| Error::Model(format!("model content is not JSON: {e}")))
}

/// Ask the model for a checklist. Every failure is logged and collapses to
/// `None`; a returned result has passed schema validation.
pub fn request_analysis(
    client: &dyn ModelClient,
    prompts: &PromptEngine,
    request: &AnalysisRequest,
) -> Option<AnalysisResult> {
    let number = request.change.number;
    match try_request(client, prompts, request) {
        Ok(result) => {
            info!(
                number,
                items = result.items.len(),
                "model returned checklist"
            );
            Some(result)
        }
        Err(e) => {
            warn!(number, error = %e, "analysis failed");
            None
        }
    }
}

fn try_request(
    client: &dyn ModelClient,
    prompts: &PromptEngine,
    request: &AnalysisRequest,
) -> Result<AnalysisResult> {
    let rule_ids = request.rule_ids();
    let payload = prompts.render_analysis(request)?;
    let schema = analysis::response_schema(&rule_ids);
    debug!(
        number = request.change.number,
        payload_chars = payload.chars().count(),
        rules = rule_ids.len(),
        "sending analysis request"
    );
    let reply = client.complete(&payload, &schema)?;
    analysis::validate_result(reply, &rule_ids)
}
