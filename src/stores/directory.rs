//! Persisted sequences owned by the current user.

use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::backend::Backend;
use crate::error::ClientResult;
use crate::notify::Notifier;
use crate::realtime::PushEvent;
use crate::session::Sequence;

pub const DELETED_WHILE_VIEWING: &str = "The sequence you were viewing has been deleted";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DirectoryChange {
    Upserted(String),
    Removed(String),
    /// The selected sequence was deleted elsewhere.
    SelectedDeleted(String),
    Unchanged,
}

pub struct SequenceDirectory {
    backend: Arc<dyn Backend>,
    notifier: Notifier,
    sequences: HashMap<String, Sequence>,
    loading: bool,
    selected: Option<String>,
    current: Option<Sequence>,
}

impl SequenceDirectory {
    pub fn new(backend: Arc<dyn Backend>, notifier: Notifier) -> Self {
        Self {
            backend,
            notifier,
            sequences: HashMap::new(),
            loading: false,
            selected: None,
            current: None,
        }
    }

    pub fn is_loading(&self) -> bool {
        self.loading
    }

    pub fn selected(&self) -> Option<&str> {
        self.selected.as_deref()
    }

    pub fn current(&self) -> Option<&Sequence> {
        self.current.as_ref()
    }

    pub fn get(&self, id: &str) -> Option<&Sequence> {
        self.sequences.get(id)
    }

    pub fn len(&self) -> usize {
        self.sequences.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sequences.is_empty()
    }

    /// Newest first by `updatedAt`, then `createdAt`.
    pub fn entries(&self) -> Vec<&Sequence> {
        let mut out: Vec<&Sequence> = self.sequences.values().collect();
        out.sort_by(|a, b| {
            (b.updated_at, b.created_at)
                .cmp(&(a.updated_at, a.created_at))
                .then_with(|| a.id.cmp(&b.id))
        });
        out
    }

    pub async fn list_for_user(&mut self, user_id: &str) -> usize {
        debug!(%user_id, "list_for_user: called");
        self.loading = true;
        let result = self.backend.list_sequences(user_id).await;
        self.loading = false;
        match result {
            Ok(list) => {
                self.sequences = list.into_iter().map(|s| (s.id.clone(), s)).collect();
                self.sequences.len()
            }
            Err(e) => {
                warn!(%user_id, error = %e, "list_for_user: failed");
                self.notifier.error("Failed to load your sequences");
                0
            }
        }
    }

    pub async fn fetch_sequence(&mut self, id: &str) -> ClientResult<Sequence> {
        let seq = self.backend.get_sequence(id).await?;
        self.sequences.insert(seq.id.clone(), seq.clone());
        Ok(seq)
    }

    /// Select and fully load one sequence for adoption by the draft.
    pub async fn select(&mut self, id: &str) -> Option<Sequence> {
        self.selected = Some(id.to_string());
        self.loading = true;
        let result = self.fetch_sequence(id).await;
        self.loading = false;
        match result {
            Ok(seq) => {
                self.current = Some(seq.clone());
                Some(seq)
            }
            Err(e) => {
                warn!(%id, error = %e, "select: failed");
                self.notifier.error("Failed to load sequence");
                None
            }
        }
    }

    pub fn clear_selection(&mut self) {
        self.selected = None;
        self.current = None;
    }

    pub async fn delete(&mut self, id: &str) -> ClientResult<bool> {
        match self.backend.delete_sequence(id).await {
            Ok(existed) => {
                self.sequences.remove(id);
                if self.selected.as_deref() == Some(id) {
                    self.clear_selection();
                }
                info!(%id, existed, "delete: removed");
                self.notifier.success("Sequence deleted");
                Ok(existed)
            }
            Err(e) => {
                warn!(%id, error = %e, "delete: failed");
                self.notifier.error("Failed to delete sequence");
                Err(e)
            }
        }
    }

    pub fn handle_push(&mut self, ev: &PushEvent) -> DirectoryChange {
        match ev {
            PushEvent::SequenceUpdated { sequence, .. } => {
                if self.selected.as_deref() == Some(sequence.id.as_str()) {
                    self.current = Some(sequence.clone());
                }
                self.sequences.insert(sequence.id.clone(), sequence.clone());
                DirectoryChange::Upserted(sequence.id.clone())
            }
            PushEvent::SequenceDeleted { id } => {
                let removed = self.sequences.remove(id).is_some();
                if self.selected.as_deref() == Some(id.as_str()) {
                    self.clear_selection();
                    self.notifier.info(DELETED_WHILE_VIEWING);
                    return DirectoryChange::SelectedDeleted(id.clone());
                }
                if removed { DirectoryChange::Removed(id.clone()) } else { DirectoryChange::Unchanged }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::notify::{self, NoticeLevel};
    use crate::stores::testing::FakeBackend;
    use chrono::{TimeZone, Utc};

    fn directory(backend: Arc<FakeBackend>) -> (SequenceDirectory, tokio::sync::mpsc::UnboundedReceiver<notify::Notice>) {
        let (notifier, rx) = Notifier::channel();
        (SequenceDirectory::new(backend, notifier), rx)
    }

    #[tokio::test]
    async fn lists_and_orders_newest_first() {
        let backend = Arc::new(FakeBackend::default());
        let mut old = FakeBackend::sequence("old", 1);
        old.updated_at = Some(Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap());
        let mut new = FakeBackend::sequence("new", 1);
        new.updated_at = Some(Utc.with_ymd_and_hms(2024, 6, 1, 0, 0, 0).unwrap());
        let mut foreign = FakeBackend::sequence("foreign", 1);
        foreign.user_id = "someone-else".into();
        backend.insert(old);
        backend.insert(new);
        backend.insert(foreign);

        let (mut dir, _rx) = directory(backend);
        assert_eq!(dir.list_for_user("demo-user-123").await, 2);
        let ids: Vec<_> = dir.entries().iter().map(|s| s.id.as_str()).collect();
        assert_eq!(ids, ["new", "old"]);
        assert!(!dir.is_loading());
    }

    #[tokio::test]
    async fn list_failure_notifies_and_keeps_entries() {
        let backend = Arc::new(FakeBackend::default());
        backend.insert(FakeBackend::sequence("seq-1", 1));
        let (mut dir, mut rx) = directory(backend.clone());
        dir.list_for_user("demo-user-123").await;
        backend.fail_list("boom");
        assert_eq!(dir.list_for_user("demo-user-123").await, 0);
        assert_eq!(dir.len(), 1);
        assert_eq!(notify::drain(&mut rx)[0].level, NoticeLevel::Error);
    }

    #[tokio::test]
    async fn select_then_delete_clears_current() {
        let backend = Arc::new(FakeBackend::default());
        backend.insert(FakeBackend::sequence("seq-1", 2));
        let (mut dir, _rx) = directory(backend.clone());
        let seq = dir.select("seq-1").await.unwrap();
        assert_eq!(seq.steps.len(), 2);
        assert_eq!(dir.current().map(|s| s.id.as_str()), Some("seq-1"));

        assert!(dir.delete("seq-1").await.unwrap());
        assert!(dir.selected().is_none());
        assert!(dir.current().is_none());
        assert!(dir.get("seq-1").is_none());
        assert_eq!(backend.deleted(), ["seq-1"]);
    }

    #[tokio::test]
    async fn select_missing_returns_none() {
        let (mut dir, mut rx) = directory(Arc::new(FakeBackend::default()));
        assert!(dir.select("nope").await.is_none());
        assert!(dir.current().is_none());
        assert_eq!(notify::drain(&mut rx).len(), 1);
    }

    #[tokio::test]
    async fn push_events_upsert_and_remove() {
        let backend = Arc::new(FakeBackend::default());
        backend.insert(FakeBackend::sequence("seq-1", 1));
        let (mut dir, mut rx) = directory(backend);
        dir.select("seq-1").await;

        let fresh = FakeBackend::sequence("seq-2", 1);
        let ev = PushEvent::SequenceUpdated { sequence: fresh, origin: None };
        assert_eq!(dir.handle_push(&ev), DirectoryChange::Upserted("seq-2".into()));
        let replaced = PushEvent::SequenceUpdated { sequence: FakeBackend::sequence("seq-1", 4), origin: None };
        dir.handle_push(&replaced);
        assert_eq!(dir.len(), 2);
        assert_eq!(dir.current().unwrap().steps.len(), 4);

        let gone = PushEvent::SequenceDeleted { id: "seq-2".into() };
        assert_eq!(dir.handle_push(&gone), DirectoryChange::Removed("seq-2".into()));
        assert_eq!(dir.handle_push(&gone), DirectoryChange::Unchanged);

        let selected = PushEvent::SequenceDeleted { id: "seq-1".into() };
        assert_eq!(dir.handle_push(&selected), DirectoryChange::SelectedDeleted("seq-1".into()));
        assert!(dir.is_empty());
        let notices = notify::drain(&mut rx);
        assert_eq!(notices.last().unwrap().text, DELETED_WHILE_VIEWING);
    }
}
