//! The current outreach-sequence draft.

use serde::Deserialize;
use serde_json::Value;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::backend::{Backend, GenerateRequest, UpdateRequest};
use crate::error::{ClientError, ClientResult};
use crate::intent::{self, GENERIC_POSITION};
use crate::models::{self, LlmFallback};
use crate::notify::Notifier;
use crate::realtime::EchoGuard;
use crate::session::{Sequence, SequenceDraft, SequenceStep};

pub const NEW_STEP_CONTENT: &str = "New message content goes here.";
pub const UNTITLED: &str = "Untitled Sequence";

/// A pre-built sequence, as produced by a tool call or pasted as JSON.
#[derive(Debug, Clone, Deserialize, PartialEq, Default)]
pub struct SequencePayload {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub position: Option<String>,
    pub steps: Vec<SequenceStep>,
}

impl From<Sequence> for SequencePayload {
    fn from(s: Sequence) -> Self {
        Self { id: Some(s.id), title: Some(s.title), position: Some(s.position), steps: s.steps }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum IncomingPayload {
    Prebuilt(SequencePayload),
    /// One step revised elsewhere; patched into the draft by id.
    StepRevision(SequenceStep),
    Text(String),
}

impl IncomingPayload {
    /// A JSON object carrying a `steps` array is a pre-built sequence; anything
    /// else is chat text.
    pub fn parse(raw: &str) -> Self {
        if let Ok(v @ Value::Object(_)) = serde_json::from_str::<Value>(raw.trim())
            && v.get("steps").is_some_and(Value::is_array)
            && let Ok(payload) = serde_json::from_value::<SequencePayload>(v)
        {
            return IncomingPayload::Prebuilt(payload);
        }
        IncomingPayload::Text(raw.to_string())
    }

    pub fn from_value(v: Value) -> ClientResult<Self> {
        Ok(IncomingPayload::Prebuilt(serde_json::from_value(v)?))
    }
}

/// A payload handed over by the conversation store.
#[derive(Debug, Clone, PartialEq)]
pub struct Forwarded {
    pub payload: IncomingPayload,
    /// Tool call the payload came from.
    pub tool: Option<String>,
    /// Generation the payload was derived from; a mismatch means the draft
    /// moved on and the payload is discarded.
    pub observed: Option<u64>,
}

impl Forwarded {
    pub fn text(text: impl Into<String>) -> Self {
        Self { payload: IncomingPayload::Text(text.into()), tool: None, observed: None }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepSource {
    Backend,
    Provider,
    Template,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ApplyOutcome {
    Adopted,
    StepRevised { step_id: String },
    Generated { position: String, source: StepSource },
    NotTriggered,
    Stale,
}

impl ApplyOutcome {
    /// Assistant lines the page appends to the conversation.
    pub fn chat_lines(&self) -> Vec<String> {
        match self {
            ApplyOutcome::Generated { position, source } => {
                let mut lines = vec![format!("Generating a recruiting sequence for {}...", position)];
                if *source == StepSource::Template {
                    lines.push(format!(
                        "I couldn't reach the AI service, so I started a template sequence for {}. Edit any step in the workspace.",
                        position
                    ));
                } else {
                    lines.push(format!(
                        "I've created a draft recruiting sequence for {}. You can edit any step directly in the workspace, or let me know what changes you'd like to make.",
                        position
                    ));
                }
                lines
            }
            _ => Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RemoteOutcome {
    Applied,
    /// Unsaved local edits were kept.
    HeldBack,
    Ignored,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DraftState {
    Empty,
    Generating,
    Unsaved,
    Saving,
    Saved,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SaveOutcome {
    pub id: String,
    pub created: bool,
}

pub struct SequenceStore {
    backend: Arc<dyn Backend>,
    fallback: Option<LlmFallback>,
    notifier: Notifier,
    echo: EchoGuard,
    user_id: String,
    use_backend: bool,
    draft: SequenceDraft,
    generation: u64,
    dirty: bool,
    generating: bool,
    saving: bool,
}

impl SequenceStore {
    pub fn new(
        backend: Arc<dyn Backend>,
        fallback: Option<LlmFallback>,
        notifier: Notifier,
        echo: EchoGuard,
        user_id: impl Into<String>,
        use_backend: bool,
    ) -> Self {
        Self {
            backend,
            fallback,
            notifier,
            echo,
            user_id: user_id.into(),
            use_backend,
            draft: SequenceDraft::default(),
            generation: 0,
            dirty: false,
            generating: false,
            saving: false,
        }
    }

    pub fn draft(&self) -> &SequenceDraft {
        &self.draft
    }

    pub fn steps(&self) -> &[SequenceStep] {
        &self.draft.steps
    }

    pub fn id(&self) -> Option<&str> {
        self.draft.id.as_deref()
    }

    pub fn title(&self) -> &str {
        &self.draft.title
    }

    pub fn position(&self) -> &str {
        &self.draft.position
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    pub fn is_generating(&self) -> bool {
        self.generating
    }

    pub fn is_saving(&self) -> bool {
        self.saving
    }

    pub fn state(&self) -> DraftState {
        if self.generating {
            DraftState::Generating
        } else if self.saving {
            DraftState::Saving
        } else if self.draft.is_empty() {
            DraftState::Empty
        } else if self.draft.id.is_some() && !self.dirty {
            DraftState::Saved
        } else {
            DraftState::Unsaved
        }
    }

    pub fn set_user(&mut self, user_id: impl Into<String>) {
        self.user_id = user_id.into();
    }

    fn touch(&mut self) {
        self.generation += 1;
        self.dirty = true;
    }

    /// Replace the whole draft at once.
    fn adopt(&mut self, payload: SequencePayload) {
        let position = payload.position.unwrap_or_default();
        let title = payload
            .title
            .filter(|t| !t.is_empty())
            .unwrap_or_else(|| if position.is_empty() { String::new() } else { format!("{} Outreach", position) });
        if payload.id != self.draft.id {
            info!(from = ?self.draft.id, to = ?payload.id, "adopt: switching draft");
        }
        self.dirty = payload.id.is_none();
        self.draft = SequenceDraft { id: payload.id, title, position, steps: payload.steps };
        self.generation += 1;
    }

    /// Hydrate from a persisted record (directory selection or route).
    pub fn load(&mut self, sequence: Sequence) {
        self.adopt(sequence.into());
    }

    pub async fn apply_forwarded(&mut self, fwd: Forwarded) -> ApplyOutcome {
        if let Some(observed) = fwd.observed
            && observed != self.generation
        {
            warn!(observed, current = self.generation, tool = ?fwd.tool, "apply_forwarded: stale payload discarded");
            return ApplyOutcome::Stale;
        }
        self.apply_incoming(fwd.payload).await
    }

    pub async fn apply_incoming(&mut self, payload: IncomingPayload) -> ApplyOutcome {
        match payload {
            IncomingPayload::Prebuilt(p) => {
                debug!(id = ?p.id, steps = p.steps.len(), "apply_incoming: pre-built sequence");
                self.adopt(p);
                ApplyOutcome::Adopted
            }
            IncomingPayload::StepRevision(step) => {
                let step_id = step.id.clone();
                self.revise_step(step);
                ApplyOutcome::StepRevised { step_id }
            }
            IncomingPayload::Text(text) => self.generate_from_text(&text).await,
        }
    }

    fn revise_step(&mut self, mut step: SequenceStep) {
        for s in &mut self.draft.steps {
            s.highlight = false;
        }
        step.highlight = true;
        match self.draft.steps.iter_mut().find(|s| s.id == step.id) {
            Some(existing) => *existing = step,
            None => self.draft.steps.push(step),
        }
        self.generation += 1;
    }

    pub async fn generate_from_text(&mut self, text: &str) -> ApplyOutcome {
        let Some(found) = intent::detect(text) else {
            debug!("generate_from_text: no generation intent");
            return ApplyOutcome::NotTriggered;
        };
        self.generating = true;
        let outcome = self.generate(&found.title, &found.position, &found.details).await;
        self.generating = false;
        outcome
    }

    async fn generate(&mut self, title: &str, position: &str, details: &str) -> ApplyOutcome {
        info!(%position, "generate: called");
        if self.use_backend {
            let req = GenerateRequest {
                title: title.to_string(),
                position: position.to_string(),
                user_id: self.user_id.clone(),
                additional_info: Some(details.to_string()),
                steps: None,
                client_token: None,
            };
            match self.backend.generate(req).await {
                Ok(seq) => {
                    let mut payload = SequencePayload::from(seq);
                    if payload.position.as_deref().is_none_or(str::is_empty) {
                        payload.position = Some(position.to_string());
                    }
                    self.adopt(payload);
                    return ApplyOutcome::Generated { position: position.to_string(), source: StepSource::Backend };
                }
                Err(e) => warn!(error = %e, "generate: backend failed, using provider"),
            }
        }

        let mut steps = match &self.fallback {
            Some(fb) => fb.generate_sequence(position, details).await,
            None => Vec::new(),
        };
        let source = if steps.is_empty() {
            steps = models::template_steps(position);
            StepSource::Template
        } else {
            StepSource::Provider
        };
        self.adopt(SequencePayload {
            id: None,
            title: Some(title.to_string()),
            position: Some(position.to_string()),
            steps,
        });
        ApplyOutcome::Generated { position: position.to_string(), source }
    }

    /// Local edit; persisted on the next save.
    pub fn update_step(&mut self, index: usize, step: SequenceStep) -> ClientResult<()> {
        let slot = self
            .draft
            .steps
            .get_mut(index)
            .ok_or_else(|| ClientError::NotFound(format!("step {}", index)))?;
        *slot = step;
        // a manual edit retires the assistant's marker
        self.clear_highlights();
        self.touch();
        Ok(())
    }

    pub fn add_step(&mut self) -> String {
        let step = SequenceStep::new(format!("Step {}", self.draft.steps.len() + 1), NEW_STEP_CONTENT);
        let id = step.id.clone();
        self.draft.steps.push(step);
        self.touch();
        id
    }

    pub fn remove_step(&mut self, id: &str) -> bool {
        let before = self.draft.steps.len();
        self.draft.steps.retain(|s| s.id != id);
        let removed = self.draft.steps.len() != before;
        if removed {
            self.touch();
        }
        removed
    }

    pub fn set_title(&mut self, title: impl Into<String>) {
        self.draft.title = title.into();
        self.touch();
    }

    pub fn set_position(&mut self, position: impl Into<String>) {
        self.draft.position = position.into();
        self.touch();
    }

    pub fn clear_highlights(&mut self) {
        for s in &mut self.draft.steps {
            s.highlight = false;
        }
    }

    /// Persist the draft: create on first save, update by id afterwards.
    pub async fn save(&mut self) -> ClientResult<SaveOutcome> {
        if self.draft.steps.is_empty() {
            self.notifier.error("Add at least one step before saving");
            return Err(ClientError::EmptySequence);
        }
        let token = self.echo.arm();
        self.saving = true;
        let title = if self.draft.title.is_empty() { UNTITLED.to_string() } else { self.draft.title.clone() };
        let position =
            if self.draft.position.is_empty() { GENERIC_POSITION.to_string() } else { self.draft.position.clone() };
        let steps = self.draft.steps.clone();

        let result = match self.draft.id.clone() {
            Some(id) => self
                .backend
                .update(UpdateRequest {
                    sequence_id: id.clone(),
                    title: Some(title),
                    position: Some(position),
                    steps,
                    user_id: self.user_id.clone(),
                    client_token: Some(token.clone()),
                })
                .await
                .map(|_| SaveOutcome { id, created: false }),
            None => self
                .backend
                .generate(GenerateRequest {
                    title,
                    position,
                    user_id: self.user_id.clone(),
                    additional_info: None,
                    steps: Some(steps),
                    client_token: Some(token.clone()),
                })
                .await
                .map(|seq| SaveOutcome { id: seq.id, created: true }),
        };
        self.saving = false;

        match result {
            Ok(outcome) => {
                if outcome.created {
                    info!(id = %outcome.id, "save: draft bound to server id");
                    self.draft.id = Some(outcome.id.clone());
                }
                self.dirty = false;
                self.notifier.success("Sequence saved");
                Ok(outcome)
            }
            Err(e) => {
                self.echo.disarm(&token);
                warn!(error = %e, "save: failed");
                self.notifier.error(format!("Failed to save sequence: {}", e));
                Err(e)
            }
        }
    }

    /// A silent refresh pushed by the server for the current draft.
    pub fn apply_remote(&mut self, sequence: Sequence) -> RemoteOutcome {
        if self.draft.id.as_deref() != Some(sequence.id.as_str()) {
            return RemoteOutcome::Ignored;
        }
        if self.dirty {
            info!(id = %sequence.id, "apply_remote: keeping unsaved local edits");
            self.notifier.info("This sequence changed elsewhere; save to keep your edits or reset to reload");
            return RemoteOutcome::HeldBack;
        }
        self.load(sequence);
        RemoteOutcome::Applied
    }

    /// Forget the server id, e.g. after the record was deleted.
    pub fn unbind(&mut self) {
        self.draft.id = None;
        self.dirty = !self.draft.steps.is_empty();
        self.generation += 1;
    }

    pub fn reset(&mut self) {
        self.draft = SequenceDraft::default();
        self.dirty = false;
        self.generating = false;
        self.saving = false;
        self.generation += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::notify::{self, NoticeLevel};
    use crate::stores::testing::FakeBackend;
    use serde_json::json;
    use std::time::Duration;

    fn store(backend: Arc<FakeBackend>) -> (SequenceStore, tokio::sync::mpsc::UnboundedReceiver<notify::Notice>, EchoGuard) {
        let (notifier, rx) = Notifier::channel();
        let echo = EchoGuard::new(Duration::from_secs(3));
        (SequenceStore::new(backend, None, notifier, echo.clone(), "demo-user-123", true), rx, echo)
    }

    #[tokio::test]
    async fn prebuilt_payload_is_adopted_wholesale() {
        let (mut s, _rx, _) = store(Arc::new(FakeBackend::default()));
        let payload = IncomingPayload::parse(
            &json!({"steps": [{"title": "Initial Outreach", "content": "Hi"}], "position": "Software Engineer", "id": "seq-1"})
                .to_string(),
        );
        assert_eq!(s.apply_incoming(payload).await, ApplyOutcome::Adopted);
        assert_eq!(s.id(), Some("seq-1"));
        assert_eq!(s.position(), "Software Engineer");
        assert_eq!(s.steps().len(), 1);
        assert_eq!(s.steps()[0].title, "Initial Outreach");
        assert_eq!(s.title(), "Software Engineer Outreach");
        assert_eq!(s.state(), DraftState::Saved);
    }

    #[test]
    fn plain_text_and_stepless_json_are_text() {
        assert!(matches!(IncomingPayload::parse("draft an email"), IncomingPayload::Text(_)));
        assert!(matches!(IncomingPayload::parse(r#"{"title": "x"}"#), IncomingPayload::Text(_)));
        assert!(matches!(IncomingPayload::parse("[1,2]"), IncomingPayload::Text(_)));
    }

    #[tokio::test]
    async fn text_intent_generates_through_backend() {
        let backend = Arc::new(FakeBackend::default());
        let (mut s, _rx, _) = store(backend.clone());
        let outcome = s.apply_incoming(IncomingPayload::Text("Please draft a recruiting email for a Backend Engineer".into())).await;
        assert_eq!(outcome, ApplyOutcome::Generated { position: "Backend Engineer".into(), source: StepSource::Backend });
        let generated = backend.generated();
        assert_eq!(generated.len(), 1);
        assert_eq!(generated[0].position, "Backend Engineer");
        assert_eq!(generated[0].title, "Backend Engineer Outreach");
        assert!(generated[0].steps.is_none());
        assert!(s.id().is_some());
        assert!(!s.is_generating());
        assert_eq!(outcome.chat_lines().len(), 2);
    }

    #[tokio::test]
    async fn backend_failure_falls_back_to_template_without_provider() {
        let backend = Arc::new(FakeBackend::default());
        backend.fail_generate("down");
        let (mut s, _rx, _) = store(backend);
        let outcome = s.generate_from_text("create an outreach sequence for a Product Designer").await;
        assert_eq!(outcome, ApplyOutcome::Generated { position: "Product Designer".into(), source: StepSource::Template });
        assert_eq!(s.steps().len(), 3);
        assert_eq!(s.id(), None);
        assert_eq!(s.state(), DraftState::Unsaved);
    }

    #[tokio::test]
    async fn chit_chat_does_not_generate() {
        let backend = Arc::new(FakeBackend::default());
        let (mut s, _rx, _) = store(backend.clone());
        assert_eq!(s.generate_from_text("hello there").await, ApplyOutcome::NotTriggered);
        assert!(backend.generated().is_empty());
        assert_eq!(s.state(), DraftState::Empty);
    }

    #[tokio::test]
    async fn add_then_remove_restores_steps() {
        let (mut s, _rx, _) = store(Arc::new(FakeBackend::default()));
        s.load(FakeBackend::sequence("seq-1", 2));
        let before = s.steps().to_vec();
        let id = s.add_step();
        assert_eq!(s.steps().len(), 3);
        assert_eq!(s.steps()[2].title, "Step 3");
        assert!(s.remove_step(&id));
        assert_eq!(s.steps(), before.as_slice());
        assert!(!s.remove_step("missing"));
    }

    #[tokio::test]
    async fn update_step_is_local_only() {
        let backend = Arc::new(FakeBackend::default());
        let (mut s, _rx, _) = store(backend.clone());
        s.load(FakeBackend::sequence("seq-1", 2));
        let mut step = s.steps()[1].clone();
        step.content = "edited".into();
        s.update_step(1, step).unwrap();
        assert_eq!(s.steps()[1].content, "edited");
        assert!(s.is_dirty());
        assert!(backend.updated().is_empty());
        assert!(s.update_step(5, SequenceStep::new("x", "y")).is_err());
    }

    #[tokio::test]
    async fn manual_edit_clears_assistant_highlight() {
        let (mut s, _rx, _) = store(Arc::new(FakeBackend::default()));
        s.load(FakeBackend::sequence("seq-1", 2));
        let mut revised = s.steps()[1].clone();
        revised.content = "from the assistant".into();
        s.apply_incoming(IncomingPayload::StepRevision(revised)).await;
        assert!(s.steps()[1].highlight);

        let mut step = s.steps()[0].clone();
        step.content = "mine".into();
        s.update_step(0, step).unwrap();
        assert!(s.steps().iter().all(|st| !st.highlight));

        s.set_position("Staff Engineer");
        assert_eq!(s.position(), "Staff Engineer");
        assert_eq!(s.state(), DraftState::Unsaved);
    }

    #[tokio::test]
    async fn empty_save_makes_no_call() {
        let backend = Arc::new(FakeBackend::default());
        let (mut s, mut rx, echo) = store(backend.clone());
        assert_eq!(s.save().await, Err(ClientError::EmptySequence));
        assert_eq!(backend.call_count(), 0);
        assert!(!echo.is_armed());
        let notices = notify::drain(&mut rx);
        assert_eq!(notices[0].level, NoticeLevel::Error);
    }

    #[tokio::test]
    async fn second_save_updates_the_first_id() {
        let backend = Arc::new(FakeBackend::default());
        let (mut s, mut rx, echo) = store(backend.clone());
        s.add_step();
        s.set_title("Backend Outreach");

        let first = s.save().await.unwrap();
        assert!(first.created);
        assert!(echo.is_armed());
        assert_eq!(s.id(), Some(first.id.as_str()));
        assert_eq!(s.state(), DraftState::Saved);

        s.add_step();
        let second = s.save().await.unwrap();
        assert!(!second.created);
        assert_eq!(second.id, first.id);

        assert_eq!(backend.generated().len(), 1);
        let updates = backend.updated();
        assert_eq!(updates.len(), 1);
        assert_eq!(updates[0].sequence_id, first.id);
        assert_eq!(updates[0].steps.len(), 2);
        assert!(updates[0].client_token.is_some());
        let levels: Vec<_> = notify::drain(&mut rx).into_iter().map(|n| n.level).collect();
        assert_eq!(levels, [NoticeLevel::Success, NoticeLevel::Success]);
    }

    #[tokio::test]
    async fn failed_save_disarms_echo_guard() {
        let backend = Arc::new(FakeBackend::default());
        backend.fail_generate("boom");
        let (mut s, _rx, echo) = store(backend);
        s.add_step();
        assert!(s.save().await.is_err());
        assert!(!echo.is_armed());
        assert!(s.id().is_none());
        assert!(!s.is_saving());
    }

    #[tokio::test]
    async fn stale_forward_is_discarded() {
        let (mut s, _rx, _) = store(Arc::new(FakeBackend::default()));
        s.load(FakeBackend::sequence("seq-1", 2));
        let observed = s.generation();
        let mut revised = s.steps()[0].clone();
        revised.content = "from the assistant".into();
        s.add_step(); // user keeps editing meanwhile
        let fwd = Forwarded { payload: IncomingPayload::StepRevision(revised.clone()), tool: None, observed: Some(observed) };
        assert_eq!(s.apply_forwarded(fwd).await, ApplyOutcome::Stale);
        assert_ne!(s.steps()[0].content, "from the assistant");

        let fwd = Forwarded { payload: IncomingPayload::StepRevision(revised), tool: None, observed: Some(s.generation()) };
        assert!(matches!(s.apply_forwarded(fwd).await, ApplyOutcome::StepRevised { .. }));
        assert!(s.steps()[0].highlight);
        assert_eq!(s.steps()[0].content, "from the assistant");
    }

    #[tokio::test]
    async fn remote_refresh_respects_unsaved_edits() {
        let (mut s, mut rx, _) = store(Arc::new(FakeBackend::default()));
        s.load(FakeBackend::sequence("seq-1", 1));
        let mut remote = FakeBackend::sequence("seq-1", 3);
        assert_eq!(s.apply_remote(FakeBackend::sequence("other", 1)), RemoteOutcome::Ignored);
        assert_eq!(s.apply_remote(remote.clone()), RemoteOutcome::Applied);
        assert_eq!(s.steps().len(), 3);

        s.set_title("local edit");
        remote.steps.truncate(1);
        assert_eq!(s.apply_remote(remote), RemoteOutcome::HeldBack);
        assert_eq!(s.steps().len(), 3);
        assert_eq!(notify::drain(&mut rx)[0].level, NoticeLevel::Info);
    }

    #[tokio::test]
    async fn reset_and_unbind() {
        let (mut s, _rx, _) = store(Arc::new(FakeBackend::default()));
        s.load(FakeBackend::sequence("seq-1", 2));
        s.unbind();
        assert!(s.id().is_none());
        assert_eq!(s.steps().len(), 2);
        assert_eq!(s.state(), DraftState::Unsaved);
        s.reset();
        assert_eq!(s.state(), DraftState::Empty);
        assert!(s.title().is_empty());
    }
}
