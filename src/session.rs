use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub const WELCOME_ID: &str = "welcome";
pub const WELCOME_TEXT: &str = "Hi, I'm Helix, your recruiting assistant. How can I help you today?";

pub fn new_id() -> String {
    Uuid::new_v4().to_string()
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
    System,
}

impl Role {
    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "user" => Some(Role::User),
            "assistant" => Some(Role::Assistant),
            "system" => Some(Role::System),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Role::User => "user",
            Role::Assistant => "assistant",
            Role::System => "system",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ToolCall {
    pub name: String,
    #[serde(default)]
    pub arguments: serde_json::Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<serde_json::Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Message {
    pub id: String,
    pub role: Role,
    pub content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_calls: Option<Vec<ToolCall>>,
}

impl Message {
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Self { id: new_id(), role, content: content.into(), tool_calls: None }
    }

    pub fn welcome() -> Self {
        Self {
            id: WELCOME_ID.into(),
            role: Role::Assistant,
            content: WELCOME_TEXT.into(),
            tool_calls: None,
        }
    }

    pub fn is_welcome(&self) -> bool {
        self.id == WELCOME_ID
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SequenceStep {
    #[serde(default = "new_id")]
    pub id: String,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub content: String,
    /// Workspace-only marker for a step the assistant just edited.
    #[serde(default, skip_serializing)]
    pub highlight: bool,
}

impl SequenceStep {
    pub fn new(title: impl Into<String>, content: impl Into<String>) -> Self {
        Self { id: new_id(), title: title.into(), content: content.into(), highlight: false }
    }
}

/// A server-owned sequence record.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Sequence {
    pub id: String,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub position: String,
    #[serde(default)]
    pub user_id: String,
    #[serde(default)]
    pub steps: Vec<SequenceStep>,
    #[serde(default, deserialize_with = "crate::shapes::de_timestamp")]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(default, deserialize_with = "crate::shapes::de_timestamp")]
    pub updated_at: Option<DateTime<Utc>>,
}

/// The editable draft held by the sequence store.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct SequenceDraft {
    pub id: Option<String>,
    pub title: String,
    pub position: String,
    pub steps: Vec<SequenceStep>,
}

impl SequenceDraft {
    pub fn is_empty(&self) -> bool {
        self.id.is_none() && self.steps.is_empty() && self.title.is_empty() && self.position.is_empty()
    }
}

impl From<Sequence> for SequenceDraft {
    fn from(s: Sequence) -> Self {
        Self { id: Some(s.id), title: s.title, position: s.position, steps: s.steps }
    }
}
