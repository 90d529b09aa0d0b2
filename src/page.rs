//! Routes and the page that wires the three stores together.

use std::sync::Arc;
use tracing::{debug, info};

use crate::backend::Backend;
use crate::error::ClientResult;
use crate::models::LlmFallback;
use crate::notify::Notifier;
use crate::realtime::{EchoGuard, PushEvent};
use crate::session::Role;
use crate::settings::AppConfig;
use crate::stores::chat::{ConversationStore, PushDisposition, SendContext, SyncMode};
use crate::stores::directory::{DirectoryChange, SequenceDirectory};
use crate::stores::sequence::{ApplyOutcome, IncomingPayload, RemoteOutcome, SequenceStore};

pub const DRAFT_DELETED_NOTICE: &str =
    "This sequence was deleted. Your steps are still in the workspace; save to create a new copy.";
pub const PASTED_NOTICE: &str = "Loaded the pasted sequence into the workspace";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Route {
    Home,
    Sequence(String),
    /// Legacy singular path; carries the canonical target.
    Redirect(String),
    NotFound,
}

impl Route {
    pub fn parse(path: &str) -> Self {
        let path = path.split(['?', '#']).next().unwrap_or_default();
        let parts: Vec<&str> = path.split('/').filter(|p| !p.is_empty()).collect();
        match parts.as_slice() {
            [] => Route::Home,
            ["sequences", id] => Route::Sequence((*id).to_string()),
            ["sequence", id] => Route::Redirect(format!("/sequences/{}", id)),
            _ => Route::NotFound,
        }
    }

    pub fn path(&self) -> String {
        match self {
            Route::Home => "/".into(),
            Route::Sequence(id) => format!("/sequences/{}", id),
            Route::Redirect(to) => to.clone(),
            Route::NotFound => "/404".into(),
        }
    }
}

/// What one push did to the page.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PushReport {
    pub directory: DirectoryChange,
    pub draft: Option<RemoteOutcome>,
    pub suppressed: bool,
}

pub struct Page {
    pub chat: ConversationStore,
    pub sequence: SequenceStore,
    pub directory: SequenceDirectory,
    user_id: String,
    route: Route,
}

impl Page {
    pub fn new(config: &AppConfig, backend: Arc<dyn Backend>, notifier: Notifier) -> Self {
        let echo = EchoGuard::new(config.realtime.echo_window());
        let fallback = LlmFallback::from_config(config);
        let use_backend = config.features.use_backend_api;
        Self {
            chat: ConversationStore::new(
                backend.clone(),
                Some(fallback.clone()),
                echo.clone(),
                config.user_id.clone(),
                use_backend,
            ),
            sequence: SequenceStore::new(
                backend.clone(),
                Some(fallback),
                notifier.clone(),
                echo,
                config.user_id.clone(),
                use_backend,
            ),
            directory: SequenceDirectory::new(backend, notifier),
            user_id: config.user_id.clone(),
            route: Route::Home,
        }
    }

    pub fn route(&self) -> &Route {
        &self.route
    }

    pub fn user_id(&self) -> &str {
        &self.user_id
    }

    /// Mount: load history and the user's sequences.
    pub async fn start(&mut self) {
        self.chat.hydrate().await;
        self.directory.list_for_user(&self.user_id).await;
    }

    pub async fn set_user(&mut self, user_id: &str) {
        if user_id == self.user_id {
            return;
        }
        info!(%user_id, "set_user: switching identity");
        self.user_id = user_id.to_string();
        self.sequence.reset();
        self.sequence.set_user(user_id);
        self.directory.clear_selection();
        self.route = Route::Home;
        self.chat.set_user(user_id).await;
        self.directory.list_for_user(user_id).await;
    }

    /// Navigate, following the legacy redirect. Returns the route shown.
    pub async fn open(&mut self, route: Route) -> Route {
        let route = match route {
            Route::Redirect(to) => {
                debug!(%to, "open: redirecting");
                Route::parse(&to)
            }
            other => other,
        };
        if let Route::Sequence(id) = &route
            && self.sequence.id() != Some(id.as_str())
            && let Some(seq) = self.directory.select(id).await
        {
            self.sequence.load(seq);
        }
        self.route = route.clone();
        route
    }

    pub async fn select(&mut self, id: &str) -> bool {
        match self.directory.select(id).await {
            Some(seq) => {
                self.sequence.load(seq);
                self.route = Route::Sequence(id.to_string());
                true
            }
            None => false,
        }
    }

    /// Pasted sequence JSON goes straight to the workspace; anything else is chat.
    pub async fn submit(&mut self, text: &str) -> Vec<ApplyOutcome> {
        let text = text.trim();
        if text.is_empty() {
            return Vec::new();
        }
        if let payload @ IncomingPayload::Prebuilt(_) = IncomingPayload::parse(text) {
            let outcome = self.sequence.apply_incoming(payload).await;
            self.chat.push_notice(PASTED_NOTICE);
            return vec![outcome];
        }

        let ctx = SendContext {
            sequence_id: self.sequence.id().map(str::to_string),
            generation: self.sequence.generation(),
        };
        let sent_at = ctx.generation;
        let reply = self.chat.send_user_message(text, ctx).await;
        // checked once for the whole reply; later forwards build on earlier ones
        let fresh = self.sequence.generation() == sent_at;
        let mut applied = Vec::with_capacity(reply.forwards.len());
        for mut fwd in reply.forwards {
            if fresh && fwd.observed.is_some() {
                fwd.observed = Some(self.sequence.generation());
            }
            let outcome = self.sequence.apply_forwarded(fwd).await;
            for line in outcome.chat_lines() {
                self.chat.add_message(Role::Assistant, line);
            }
            applied.push(outcome);
        }
        if let Some(id) = self.sequence.id() {
            self.route = Route::Sequence(id.to_string());
        }
        applied
    }

    pub async fn save(&mut self) -> ClientResult<String> {
        let saved = self.sequence.save().await?;
        self.route = Route::Sequence(saved.id.clone());
        Ok(saved.id)
    }

    pub async fn delete(&mut self, id: &str) -> ClientResult<bool> {
        let existed = self.directory.delete(id).await?;
        self.draft_deleted(id);
        Ok(existed)
    }

    fn draft_deleted(&mut self, id: &str) {
        if self.sequence.id() == Some(id) {
            info!(%id, "draft_deleted: unbinding draft");
            self.sequence.unbind();
            self.chat.push_notice(DRAFT_DELETED_NOTICE);
            self.route = Route::Home;
        }
    }

    pub fn handle_push(&mut self, ev: &PushEvent) -> PushReport {
        let directory = self.directory.handle_push(ev);
        if let PushEvent::SequenceDeleted { id } = ev {
            self.draft_deleted(id);
        }
        let (draft, suppressed) = match self.chat.filter_push(ev, self.sequence.id()) {
            PushDisposition::Refresh(seq) => (Some(self.sequence.apply_remote(seq)), false),
            PushDisposition::Suppressed => (None, true),
            PushDisposition::Ignored => (None, false),
        };
        PushReport { directory, draft, suppressed }
    }

    pub fn feed_degraded(&mut self) {
        self.chat.fallback_to_polling();
    }

    pub async fn poll(&mut self) -> usize {
        if self.chat.mode() != SyncMode::Polling {
            return 0;
        }
        self.chat.poll_history().await
    }
}
