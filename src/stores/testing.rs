//! In-memory backend shared by the store tests.

use async_trait::async_trait;
use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;

use crate::backend::{Backend, ChatRequest, GenerateRequest, UpdateRequest};
use crate::error::{ClientError, ClientResult};
use crate::session::{Message, Sequence, SequenceStep};
use crate::shapes::ChatReply;

#[derive(Default)]
struct State {
    calls: usize,
    next_id: usize,
    chat_requests: Vec<ChatRequest>,
    chat_replies: VecDeque<ClientResult<ChatReply>>,
    history: Vec<Message>,
    history_error: Option<String>,
    history_calls: usize,
    generated: Vec<GenerateRequest>,
    updated: Vec<UpdateRequest>,
    deleted: Vec<String>,
    sequences: HashMap<String, Sequence>,
    fail_generate: Option<String>,
    fail_get: Option<String>,
    fail_list: Option<String>,
}

#[derive(Default)]
pub struct FakeBackend {
    state: Mutex<State>,
}

impl FakeBackend {
    pub fn sequence(id: &str, steps: usize) -> Sequence {
        Sequence {
            id: id.into(),
            title: format!("{} title", id),
            position: "Backend Engineer".into(),
            user_id: "demo-user-123".into(),
            steps: (0..steps)
                .map(|i| SequenceStep {
                    id: format!("{}-s{}", id, i),
                    title: format!("Step {}", i + 1),
                    content: format!("content {}", i),
                    highlight: false,
                })
                .collect(),
            created_at: None,
            updated_at: None,
        }
    }

    fn with<R>(&self, f: impl FnOnce(&mut State) -> R) -> R {
        f(&mut self.state.lock().unwrap())
    }

    pub fn insert(&self, seq: Sequence) {
        self.with(|s| s.sequences.insert(seq.id.clone(), seq));
    }

    pub fn reply(&self, reply: ClientResult<ChatReply>) {
        self.with(|s| s.chat_replies.push_back(reply));
    }

    pub fn set_history(&self, history: Vec<Message>) {
        self.with(|s| s.history = history);
    }

    pub fn fail_history(&self, message: &str) {
        self.with(|s| s.history_error = Some(message.into()));
    }

    pub fn fail_generate(&self, message: &str) {
        self.with(|s| s.fail_generate = Some(message.into()));
    }

    pub fn fail_get(&self, message: &str) {
        self.with(|s| s.fail_get = Some(message.into()));
    }

    pub fn fail_list(&self, message: &str) {
        self.with(|s| s.fail_list = Some(message.into()));
    }

    pub fn call_count(&self) -> usize {
        self.with(|s| s.calls)
    }

    pub fn history_calls(&self) -> usize {
        self.with(|s| s.history_calls)
    }

    pub fn chat_requests(&self) -> Vec<ChatRequest> {
        self.with(|s| s.chat_requests.clone())
    }

    pub fn generated(&self) -> Vec<GenerateRequest> {
        self.with(|s| s.generated.clone())
    }

    pub fn updated(&self) -> Vec<UpdateRequest> {
        self.with(|s| s.updated.clone())
    }

    pub fn deleted(&self) -> Vec<String> {
        self.with(|s| s.deleted.clone())
    }
}

#[async_trait]
impl Backend for FakeBackend {
    async fn send_message(&self, req: ChatRequest) -> ClientResult<ChatReply> {
        self.with(|s| {
            s.calls += 1;
            s.chat_requests.push(req);
            s.chat_replies
                .pop_front()
                .unwrap_or_else(|| Ok(ChatReply { content: "ok".into(), tool_calls: Vec::new() }))
        })
    }

    async fn history(&self, _user_id: &str) -> ClientResult<Vec<Message>> {
        self.with(|s| {
            s.calls += 1;
            s.history_calls += 1;
            match &s.history_error {
                Some(e) => Err(ClientError::Network(e.clone())),
                None => Ok(s.history.clone()),
            }
        })
    }

    async fn generate(&self, req: GenerateRequest) -> ClientResult<Sequence> {
        self.with(|s| {
            s.calls += 1;
            s.generated.push(req.clone());
            if let Some(e) = &s.fail_generate {
                return Err(ClientError::api(e.clone()));
            }
            s.next_id += 1;
            let id = format!("seq-{}", s.next_id);
            let mut seq = Self::sequence(&id, 2);
            seq.title = req.title;
            seq.position = req.position;
            seq.user_id = req.user_id;
            if let Some(steps) = req.steps {
                seq.steps = steps;
            }
            s.sequences.insert(id, seq.clone());
            Ok(seq)
        })
    }

    async fn update(&self, req: UpdateRequest) -> ClientResult<Sequence> {
        self.with(|s| {
            s.calls += 1;
            s.updated.push(req.clone());
            let seq = s
                .sequences
                .get_mut(&req.sequence_id)
                .ok_or_else(|| ClientError::NotFound(req.sequence_id.clone()))?;
            seq.steps = req.steps;
            if let Some(title) = req.title {
                seq.title = title;
            }
            Ok(seq.clone())
        })
    }

    async fn get_sequence(&self, id: &str) -> ClientResult<Sequence> {
        self.with(|s| {
            s.calls += 1;
            if let Some(e) = &s.fail_get {
                return Err(ClientError::Network(e.clone()));
            }
            s.sequences.get(id).cloned().ok_or_else(|| ClientError::NotFound(id.into()))
        })
    }

    async fn list_sequences(&self, user_id: &str) -> ClientResult<Vec<Sequence>> {
        self.with(|s| {
            s.calls += 1;
            if let Some(e) = &s.fail_list {
                return Err(ClientError::api(e.clone()));
            }
            Ok(s.sequences.values().filter(|q| q.user_id == user_id).cloned().collect())
        })
    }

    async fn delete_sequence(&self, id: &str) -> ClientResult<bool> {
        self.with(|s| {
            s.calls += 1;
            s.deleted.push(id.into());
            Ok(s.sequences.remove(id).is_some())
        })
    }
}
