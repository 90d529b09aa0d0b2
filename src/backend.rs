use async_trait::async_trait;
use reqwest::Method;
use serde::Serialize;
use serde_json::Value;
use tracing::debug;

use crate::error::{ClientError, ClientResult};
use crate::session::{Message, Sequence, SequenceStep};
use crate::shapes::{self, ChatReply};
use crate::transport::Transport;

#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ChatRequest {
    pub message: String,
    pub user_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sequence_id: Option<String>,
}

/// Body of `POST /sequences/generate`. With `steps` set it creates the
/// sequence as given instead of generating new content.
#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct GenerateRequest {
    pub title: String,
    pub position: String,
    pub user_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub additional_info: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub steps: Option<Vec<SequenceStep>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub client_token: Option<String>,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct UpdateRequest {
    pub sequence_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub position: Option<String>,
    pub steps: Vec<SequenceStep>,
    pub user_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub client_token: Option<String>,
}

/// The REST surface the stores depend on.
#[async_trait]
pub trait Backend: Send + Sync {
    async fn send_message(&self, req: ChatRequest) -> ClientResult<ChatReply>;
    async fn history(&self, user_id: &str) -> ClientResult<Vec<Message>>;
    async fn generate(&self, req: GenerateRequest) -> ClientResult<Sequence>;
    async fn update(&self, req: UpdateRequest) -> ClientResult<Sequence>;
    async fn get_sequence(&self, id: &str) -> ClientResult<Sequence>;
    async fn list_sequences(&self, user_id: &str) -> ClientResult<Vec<Sequence>>;
    async fn delete_sequence(&self, id: &str) -> ClientResult<bool>;
}

#[derive(Clone)]
pub struct HttpBackend {
    transport: Transport,
}

impl HttpBackend {
    pub fn new(transport: Transport) -> Self {
        Self { transport }
    }

    async fn call(&self, endpoint: &str, method: Method, body: Option<Value>) -> ClientResult<Value> {
        self.transport.request(endpoint, method, body.as_ref()).await.into_result()
    }
}

fn to_body<T: Serialize>(req: &T) -> ClientResult<Option<Value>> {
    Ok(Some(serde_json::to_value(req)?))
}

#[async_trait]
impl Backend for HttpBackend {
    async fn send_message(&self, req: ChatRequest) -> ClientResult<ChatReply> {
        debug!(user_id = %req.user_id, sequence_id = ?req.sequence_id, "send_message: called");
        let body = self.call("/chat/message", Method::POST, to_body(&req)?).await?;
        shapes::decode_chat_reply(body)
    }

    async fn history(&self, user_id: &str) -> ClientResult<Vec<Message>> {
        let body = self.call(&format!("/chat/history/{}", user_id), Method::GET, None).await?;
        shapes::decode_history(body)
    }

    async fn generate(&self, req: GenerateRequest) -> ClientResult<Sequence> {
        debug!(position = %req.position, with_steps = req.steps.is_some(), "generate: called");
        let body = self.call("/sequences/generate", Method::POST, to_body(&req)?).await?;
        shapes::decode_sequence(body)
    }

    async fn update(&self, req: UpdateRequest) -> ClientResult<Sequence> {
        debug!(sequence_id = %req.sequence_id, steps = req.steps.len(), "update: called");
        let body = self.call("/sequences/update", Method::PUT, to_body(&req)?).await?;
        shapes::decode_sequence(body)
    }

    async fn get_sequence(&self, id: &str) -> ClientResult<Sequence> {
        let body = self.call(&format!("/sequences/{}", id), Method::GET, None).await?;
        shapes::decode_sequence(body)
    }

    async fn list_sequences(&self, user_id: &str) -> ClientResult<Vec<Sequence>> {
        let body = self.call(&format!("/sequences/user/{}", user_id), Method::GET, None).await?;
        shapes::decode_sequence_list(body)
    }

    async fn delete_sequence(&self, id: &str) -> ClientResult<bool> {
        let body = self.call(&format!("/sequences/{}", id), Method::DELETE, None).await?;
        match shapes::unwrap_envelope(body)? {
            Value::Bool(flag) => Ok(flag),
            Value::Object(obj) => Ok(obj.get("deleted").and_then(Value::as_bool).unwrap_or(true)),
            Value::Null => Ok(true),
            other => Err(ClientError::Decode(format!("unexpected delete reply {}", other))),
        }
    }
}
