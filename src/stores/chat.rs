//! Conversation history, tool-call bookkeeping and push filtering.

use regex::Regex;
use std::sync::{Arc, LazyLock};
use tracing::{debug, info, warn};

use crate::backend::{Backend, ChatRequest};
use crate::models::LlmFallback;
use crate::realtime::{EchoGuard, PushEvent};
use crate::session::{Message, Role, Sequence, SequenceStep, ToolCall};
use crate::stores::sequence::{Forwarded, IncomingPayload, SequencePayload};
use crate::tools::{self, ToolOutcome};

pub const EMPTY_REPLY_FALLBACK: &str =
    "I'm here to help with your recruiting needs. Could you provide more details about what you're looking for?";
pub const APOLOGY: &str = "I'm having trouble connecting to the AI service. Please try again later.";

static THINKING: LazyLock<Option<Regex>> = LazyLock::new(|| Regex::new(r"(?s)<thinking>.*?</thinking>").ok());
static MARKUP: LazyLock<Option<Regex>> = LazyLock::new(|| Regex::new(r"<.*?>").ok());

/// Drop model reasoning blocks and stray tags from an assistant reply.
pub fn clean_reply(raw: &str) -> String {
    let mut text = raw.to_string();
    for re in [&*THINKING, &*MARKUP].into_iter().flatten() {
        text = re.replace_all(&text, "").into_owned();
    }
    text.trim().to_string()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncMode {
    Live,
    Polling,
}

/// What the sequence store looked like when a message was sent.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct SendContext {
    pub sequence_id: Option<String>,
    pub generation: u64,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct ChatOutcome {
    pub succeeded: bool,
    pub forwards: Vec<Forwarded>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum PushDisposition {
    /// Echo of our own save.
    Suppressed,
    Ignored,
    Refresh(Sequence),
}

pub struct ConversationStore {
    backend: Arc<dyn Backend>,
    fallback: Option<LlmFallback>,
    echo: EchoGuard,
    user_id: String,
    use_backend: bool,
    messages: Vec<Message>,
    loading: bool,
    active_tool: Option<String>,
    mode: SyncMode,
}

impl ConversationStore {
    pub fn new(
        backend: Arc<dyn Backend>,
        fallback: Option<LlmFallback>,
        echo: EchoGuard,
        user_id: impl Into<String>,
        use_backend: bool,
    ) -> Self {
        Self {
            backend,
            fallback,
            echo,
            user_id: user_id.into(),
            use_backend,
            messages: vec![Message::welcome()],
            loading: false,
            active_tool: None,
            mode: SyncMode::Live,
        }
    }

    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    pub fn is_loading(&self) -> bool {
        self.loading
    }

    pub fn active_tool(&self) -> Option<&str> {
        self.active_tool.as_deref()
    }

    pub fn mode(&self) -> SyncMode {
        self.mode
    }

    pub fn user_id(&self) -> &str {
        &self.user_id
    }

    pub fn add_message(&mut self, role: Role, content: impl Into<String>) -> &Message {
        self.messages.push(Message::new(role, content));
        &self.messages[self.messages.len() - 1]
    }

    /// A system line, e.g. about a change made outside the chat.
    pub fn push_notice(&mut self, text: impl Into<String>) {
        self.add_message(Role::System, text);
    }

    /// Empty the conversation, welcome message included.
    pub fn clear(&mut self) {
        self.messages.clear();
    }

    fn contains(&self, m: &Message) -> bool {
        self.messages
            .iter()
            .any(|e| e.id == m.id || (e.role == m.role && e.content == m.content))
    }

    /// Load prior history behind the welcome message. Failures leave the
    /// conversation untouched.
    pub async fn hydrate(&mut self) -> usize {
        let history = match self.backend.history(&self.user_id).await {
            Ok(h) => h,
            Err(e) => {
                warn!(user_id = %self.user_id, error = %e, "hydrate: history unavailable");
                return 0;
            }
        };
        let count = history.len();
        let (head, local): (Vec<Message>, Vec<Message>) =
            std::mem::take(&mut self.messages).into_iter().partition(Message::is_welcome);
        self.messages = head;
        self.messages.extend(history);
        for m in local {
            if !self.contains(&m) {
                self.messages.push(m);
            }
        }
        info!(count, "hydrate: merged history");
        count
    }

    pub async fn set_user(&mut self, user_id: impl Into<String>) {
        let user_id = user_id.into();
        if user_id == self.user_id {
            return;
        }
        self.user_id = user_id;
        self.messages = vec![Message::welcome()];
        self.hydrate().await;
    }

    pub async fn send_user_message(&mut self, text: &str, ctx: SendContext) -> ChatOutcome {
        self.add_message(Role::User, text);
        self.loading = true;
        let outcome = self.exchange(text, &ctx).await;
        self.loading = false;
        outcome
    }

    async fn exchange(&mut self, text: &str, ctx: &SendContext) -> ChatOutcome {
        if !self.use_backend {
            let reply = match &self.fallback {
                Some(fb) => fb.generate_completion(&self.messages).await,
                None => APOLOGY.to_string(),
            };
            self.add_message(Role::Assistant, reply);
            return ChatOutcome { succeeded: true, forwards: vec![Forwarded::text(text)] };
        }

        let req = ChatRequest {
            message: text.to_string(),
            user_id: self.user_id.clone(),
            sequence_id: ctx.sequence_id.clone(),
        };
        match self.backend.send_message(req).await {
            Ok(reply) => {
                let content = clean_reply(&reply.content);
                let content = if content.is_empty() { EMPTY_REPLY_FALLBACK.to_string() } else { content };
                self.add_message(Role::Assistant, content);
                let forwards = self.process_tool_calls(&reply.tool_calls, ctx).await;
                ChatOutcome { succeeded: true, forwards }
            }
            Err(e) => {
                warn!(error = %e, "exchange: chat request failed");
                self.add_message(Role::Assistant, APOLOGY);
                ChatOutcome { succeeded: false, forwards: Vec::new() }
            }
        }
    }

    /// Narrate each tool call in order and collect what the sequence store
    /// should adopt.
    pub async fn process_tool_calls(&mut self, calls: &[ToolCall], ctx: &SendContext) -> Vec<Forwarded> {
        let mut forwards = Vec::new();
        for call in calls {
            self.active_tool = Some(call.name.clone());
            self.add_message(Role::System, tools::using_message(&call.name));
            let outcome = ToolOutcome::classify(call);
            debug!(tool = outcome.name(), "process_tool_calls: classified");
            match outcome {
                ToolOutcome::Failed { name, error } => {
                    warn!(tool = %name, %error, "process_tool_calls: tool failed");
                    self.add_message(Role::System, tools::failed_message(&name, &error));
                }
                ToolOutcome::GenerateSequence { call, payload } => {
                    self.add_message(Role::System, tools::completed_message(&call.name));
                    match IncomingPayload::from_value(payload) {
                        Ok(payload) => forwards.push(Forwarded { payload, tool: Some(call.name), observed: None }),
                        Err(e) => warn!(error = %e, "process_tool_calls: generated sequence unreadable"),
                    }
                }
                ToolOutcome::RefineSequenceStep { call, step } => {
                    self.add_message(Role::System, tools::completed_message(&call.name));
                    let payload = self.refined_payload(step, ctx).await;
                    forwards.push(Forwarded { payload, tool: Some(call.name), observed: Some(ctx.generation) });
                }
                ToolOutcome::Other { name } => {
                    self.add_message(Role::System, tools::completed_message(&name));
                }
            }
        }
        self.active_tool = None;
        forwards
    }

    async fn refined_payload(&self, step: SequenceStep, ctx: &SendContext) -> IncomingPayload {
        let Some(id) = ctx.sequence_id.as_deref() else {
            return IncomingPayload::StepRevision(step);
        };
        match self.backend.get_sequence(id).await {
            Ok(mut seq) => {
                for s in &mut seq.steps {
                    s.highlight = s.id == step.id;
                }
                IncomingPayload::Prebuilt(SequencePayload::from(seq))
            }
            Err(e) => {
                warn!(sequence_id = %id, error = %e, "refined_payload: full fetch failed, using step");
                IncomingPayload::StepRevision(step)
            }
        }
    }

    /// Decide what a pushed event means for the open draft. Never adds a message.
    pub fn filter_push(&self, ev: &PushEvent, current_id: Option<&str>) -> PushDisposition {
        let PushEvent::SequenceUpdated { sequence, origin } = ev else {
            return PushDisposition::Ignored;
        };
        if current_id != Some(sequence.id.as_str()) {
            return PushDisposition::Ignored;
        }
        if self.echo.should_drop(origin.as_deref()) {
            debug!(id = %sequence.id, "filter_push: own save echoed back");
            return PushDisposition::Suppressed;
        }
        PushDisposition::Refresh(sequence.clone())
    }

    pub fn fallback_to_polling(&mut self) {
        if self.mode != SyncMode::Polling {
            warn!("fallback_to_polling: live updates unavailable");
            self.mode = SyncMode::Polling;
        }
    }

    /// Append history entries not yet shown.
    pub async fn poll_history(&mut self) -> usize {
        let history = match self.backend.history(&self.user_id).await {
            Ok(h) => h,
            Err(e) => {
                debug!(error = %e, "poll_history: skipped");
                return 0;
            }
        };
        let mut added = 0;
        for m in history {
            if !self.contains(&m) {
                self.messages.push(m);
                added += 1;
            }
        }
        added
    }
}
