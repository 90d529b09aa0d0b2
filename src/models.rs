use async_trait::async_trait;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::{Arc, LazyLock};
use tracing::{debug, warn};

use crate::session::{Message, Role, SequenceStep};
use crate::settings::{AppConfig, ProviderSettings};

pub const KEY_MISSING_REPLY: &str = "API key not configured. Please set an API key for the selected provider.";
pub const PROVIDER_FAILED_REPLY: &str = "Failed to generate response. Please try again.";
const SEQUENCE_SYSTEM_PROMPT: &str =
    "You are an expert recruiter. Create effective, professional recruiting outreach sequences. Always format your response exactly as requested.";
const SEQUENCE_MAX_TOKENS: u32 = 1500;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ChatTurn {
    pub role: String,
    pub content: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ModelRequest {
    pub model: String,
    pub system: Option<String>,
    pub messages: Vec<ChatTurn>,
    pub temperature: Option<f32>,
    pub max_tokens: Option<u32>,
    /// Ask the provider for a JSON object when it supports that.
    pub json_output: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ModelResponse {
    pub content: String,
    pub model: String,
}

#[async_trait]
pub trait LanguageModel: Send + Sync {
    fn has_credentials(&self) -> bool;
    async fn generate(&self, req: ModelRequest) -> anyhow::Result<ModelResponse>;
}

#[derive(Clone)]
pub struct OpenAICompatible {
    pub base_url: String,
    pub api_key: Option<String>,
    http: reqwest::Client,
}

impl OpenAICompatible {
    pub fn new(base_url: impl Into<String>, api_key: Option<String>) -> Self {
        Self { base_url: base_url.into(), api_key, http: reqwest::Client::new() }
    }
}

#[derive(Debug, Serialize)]
struct OaiChatRequest<'a> {
    model: &'a str,
    messages: Vec<Value>,
    #[serde(skip_serializing_if = "Option::is_none")] temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")] max_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")] response_format: Option<Value>,
}

#[derive(Debug, Deserialize)]
struct OaiChatResponse {
    choices: Vec<OaiChoice>,
    #[serde(default)]
    model: String,
}

#[derive(Debug, Deserialize)]
struct OaiChoice { message: OaiMessage }

#[derive(Debug, Deserialize)]
struct OaiMessage { #[serde(default)] content: Option<String> }

#[async_trait]
impl LanguageModel for OpenAICompatible {
    fn has_credentials(&self) -> bool {
        self.api_key.as_deref().is_some_and(|k| !k.is_empty())
    }

    async fn generate(&self, req: ModelRequest) -> anyhow::Result<ModelResponse> {
        let url = format!("{}/chat/completions", self.base_url.trim_end_matches('/'));
        let mut messages = Vec::with_capacity(req.messages.len() + 1);
        if let Some(system) = &req.system {
            messages.push(serde_json::json!({"role": "system", "content": system}));
        }
        messages.extend(req.messages.iter().map(|m| serde_json::json!({"role": m.role, "content": m.content})));
        let body = OaiChatRequest {
            model: &req.model,
            messages,
            temperature: req.temperature,
            max_tokens: req.max_tokens,
            response_format: req.json_output.then(|| serde_json::json!({"type": "json_object"})),
        };
        let mut rb = self.http.post(url).json(&body);
        if let Some(key) = &self.api_key {
            rb = rb.bearer_auth(key);
        }
        let resp = rb.send().await?;
        if !resp.status().is_success() {
            anyhow::bail!("model call failed: {}", resp.status());
        }
        let v: OaiChatResponse = resp.json().await?;
        let content = v.choices.first().and_then(|c| c.message.content.clone()).unwrap_or_default();
        Ok(ModelResponse { content, model: v.model })
    }
}

#[derive(Clone)]
pub struct AnthropicMessages {
    pub base_url: String,
    pub api_key: Option<String>,
    http: reqwest::Client,
}

impl AnthropicMessages {
    pub fn new(base_url: impl Into<String>, api_key: Option<String>) -> Self {
        Self { base_url: base_url.into(), api_key, http: reqwest::Client::new() }
    }
}

#[derive(Debug, Deserialize)]
struct AnthropicResponse {
    content: Vec<AnthropicBlock>,
    #[serde(default)]
    model: String,
}

#[derive(Debug, Deserialize)]
struct AnthropicBlock {
    #[serde(default)]
    text: Option<String>,
}

#[async_trait]
impl LanguageModel for AnthropicMessages {
    fn has_credentials(&self) -> bool {
        self.api_key.as_deref().is_some_and(|k| !k.is_empty())
    }

    async fn generate(&self, req: ModelRequest) -> anyhow::Result<ModelResponse> {
        let url = format!("{}/messages", self.base_url.trim_end_matches('/'));
        // the messages API only takes user/assistant turns
        let messages: Vec<Value> = req
            .messages
            .iter()
            .map(|m| {
                let role = if m.role == "assistant" { "assistant" } else { "user" };
                serde_json::json!({"role": role, "content": m.content})
            })
            .collect();
        let mut body = serde_json::json!({
            "model": req.model,
            "messages": messages,
            "max_tokens": req.max_tokens.unwrap_or(1000),
        });
        if let Some(system) = &req.system {
            body["system"] = Value::String(system.clone());
        }
        if let Some(t) = req.temperature {
            body["temperature"] = serde_json::json!(t);
        }
        let resp = self
            .http
            .post(url)
            .header("x-api-key", self.api_key.clone().unwrap_or_default())
            .header("anthropic-version", "2023-06-01")
            .json(&body)
            .send()
            .await?;
        if !resp.status().is_success() {
            anyhow::bail!("model call failed: {}", resp.status());
        }
        let v: AnthropicResponse = resp.json().await?;
        let content = v.content.into_iter().find_map(|b| b.text).unwrap_or_default();
        Ok(ModelResponse { content, model: v.model })
    }
}

/// Direct-to-provider path used when the backend is disabled or fails.
#[derive(Clone)]
pub struct LlmFallback {
    model: Arc<dyn LanguageModel>,
    settings: ProviderSettings,
}

impl LlmFallback {
    pub fn new(model: Arc<dyn LanguageModel>, settings: ProviderSettings) -> Self {
        Self { model, settings }
    }

    pub fn from_config(config: &AppConfig) -> Self {
        if config.features.use_anthropic {
            let s = config.anthropic.clone();
            Self::new(Arc::new(AnthropicMessages::new(s.api_url.clone(), s.api_key.clone())), s)
        } else {
            let s = config.openai.clone();
            Self::new(Arc::new(OpenAICompatible::new(s.api_url.clone(), s.api_key.clone())), s)
        }
    }

    /// Free-form reply to the conversation so far. Failures come back as text.
    pub async fn generate_completion(&self, history: &[Message]) -> String {
        if !self.model.has_credentials() {
            warn!("generate_completion: provider key missing");
            return KEY_MISSING_REPLY.into();
        }
        let messages = history
            .iter()
            .filter(|m| m.role != Role::System && !m.is_welcome())
            .map(|m| ChatTurn { role: m.role.as_str().into(), content: m.content.clone() })
            .collect();
        let req = ModelRequest {
            model: self.settings.model.clone(),
            system: Some(self.settings.system_message.clone()),
            messages,
            temperature: Some(self.settings.temperature),
            max_tokens: Some(self.settings.max_tokens),
            json_output: false,
        };
        match self.model.generate(req).await {
            Ok(resp) if !resp.content.trim().is_empty() => resp.content,
            Ok(_) => PROVIDER_FAILED_REPLY.into(),
            Err(e) => {
                warn!(error = %e, "generate_completion: provider failed");
                PROVIDER_FAILED_REPLY.into()
            }
        }
    }

    /// Steps generated by the provider; empty on any failure.
    pub async fn generate_sequence(&self, position: &str, details: &str) -> Vec<SequenceStep> {
        if !self.model.has_credentials() {
            warn!("generate_sequence: provider key missing");
            return Vec::new();
        }
        let prompt = format!(
            "Create a 3-step recruiting outreach sequence for a {position} position. Additional details: {details}.\n\n\
             Respond with JSON of the form {{\"steps\": [{{\"title\": \"Initial Outreach\", \"content\": \"...\"}}, \
             {{\"title\": \"Follow-up\", \"content\": \"...\"}}, {{\"title\": \"Final Attempt\", \"content\": \"...\"}}]}}"
        );
        let req = ModelRequest {
            model: self.settings.model.clone(),
            system: Some(SEQUENCE_SYSTEM_PROMPT.into()),
            messages: vec![ChatTurn { role: "user".into(), content: prompt }],
            temperature: Some(self.settings.temperature),
            max_tokens: Some(SEQUENCE_MAX_TOKENS),
            json_output: true,
        };
        match self.model.generate(req).await {
            Ok(resp) => {
                let steps = parse_steps(&resp.content);
                debug!(count = steps.len(), "generate_sequence: parsed steps");
                steps
            }
            Err(e) => {
                warn!(error = %e, "generate_sequence: provider failed");
                Vec::new()
            }
        }
    }
}

static JSON_ARRAY: LazyLock<Option<Regex>> = LazyLock::new(|| Regex::new(r"\[[\s\S]*\]").ok());

/// Accepts `{"steps": [...]}` or the first `[...]` array embedded in prose.
pub fn parse_steps(content: &str) -> Vec<SequenceStep> {
    let items = match serde_json::from_str::<Value>(content.trim()) {
        Ok(Value::Object(obj)) => obj.get("steps").and_then(Value::as_array).cloned(),
        Ok(Value::Array(items)) => Some(items),
        _ => None,
    }
    .or_else(|| {
        let re = JSON_ARRAY.as_ref()?;
        let m = re.find(content)?;
        serde_json::from_str::<Vec<Value>>(m.as_str()).ok()
    })
    .unwrap_or_default();

    items
        .iter()
        .enumerate()
        .map(|(i, step)| {
            let title = step
                .get("title")
                .and_then(Value::as_str)
                .filter(|t| !t.is_empty())
                .map(str::to_string)
                .unwrap_or_else(|| format!("Step {}", i + 1));
            let content = step.get("content").and_then(Value::as_str).unwrap_or_default();
            SequenceStep::new(title, content)
        })
        .collect()
}

/// Last-resort content when neither the backend nor a provider produced steps.
pub fn template_steps(position: &str) -> Vec<SequenceStep> {
    vec![
        SequenceStep::new(
            "Initial Outreach",
            format!(
                "Hi {{first_name}},\n\nI came across your background and think you could be a great fit for our {position} role. \
                 Would you be open to a quick chat this week?"
            ),
        ),
        SequenceStep::new(
            "Follow-up",
            format!(
                "Hi {{first_name}},\n\nFollowing up on my earlier note about the {position} opening. \
                 Happy to share more about the team and what we are building."
            ),
        ),
        SequenceStep::new(
            "Final Attempt",
            format!(
                "Hi {{first_name}},\n\nI don't want to crowd your inbox, so this is my last note about the {position} role. \
                 If the timing is ever right, my door is open."
            ),
        ),
    ]
}
