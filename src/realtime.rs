//! Server push: named SSE events, a reconnecting supervisor, and echo suppression.

use async_trait::async_trait;
use futures::StreamExt;
use reqwest_eventsource::{Event, EventSource};
use serde_json::Value;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::error::{ClientError, ClientResult};
use crate::session::Sequence;
use crate::shapes;

pub const SEQUENCE_UPDATED: &str = "sequence_updated";
pub const SEQUENCE_DELETED: &str = "sequence_deleted";

const INITIAL_BACKOFF_MS: u64 = 500;
const MAX_BACKOFF_MS: u64 = 30_000;

/// Delay before the next connect after `failures` consecutive failures.
fn backoff(failures: u32) -> Duration {
    let factor = 2u64.saturating_pow(failures.saturating_sub(1));
    Duration::from_millis(INITIAL_BACKOFF_MS.saturating_mul(factor).min(MAX_BACKOFF_MS))
}

#[derive(Debug, Clone, PartialEq)]
pub enum PushEvent {
    SequenceUpdated { sequence: Sequence, origin: Option<String> },
    SequenceDeleted { id: String },
}

impl PushEvent {
    /// Decode one named event. Unknown names yield `None`.
    pub fn decode(name: &str, data: &str) -> ClientResult<Option<Self>> {
        match name {
            SEQUENCE_UPDATED => {
                let payload: Value = serde_json::from_str(data)?;
                let (sequence, origin) = shapes::decode_push_sequence(payload)?;
                Ok(Some(PushEvent::SequenceUpdated { sequence, origin }))
            }
            SEQUENCE_DELETED => {
                let payload: Value = serde_json::from_str(data)?;
                let id = payload
                    .get("id")
                    .and_then(Value::as_str)
                    .ok_or_else(|| ClientError::Decode("sequence_deleted without id".into()))?;
                Ok(Some(PushEvent::SequenceDeleted { id: id.to_string() }))
            }
            _ => Ok(None),
        }
    }

    pub fn sequence_id(&self) -> &str {
        match self {
            PushEvent::SequenceUpdated { sequence, .. } => &sequence.id,
            PushEvent::SequenceDeleted { id } => id,
        }
    }
}

#[async_trait]
pub trait UpdateFeed: Send + Sync {
    /// Open one connection. The receiver closes when the connection drops.
    async fn connect(&self) -> ClientResult<mpsc::Receiver<PushEvent>>;
}

pub struct SseFeed {
    url: String,
    http: reqwest::Client,
}

impl SseFeed {
    pub fn new(url: impl Into<String>, http: reqwest::Client) -> Self {
        Self { url: url.into(), http }
    }
}

#[async_trait]
impl UpdateFeed for SseFeed {
    async fn connect(&self) -> ClientResult<mpsc::Receiver<PushEvent>> {
        debug!(url = %self.url, "connect: called");
        let mut es = EventSource::new(self.http.get(&self.url)).map_err(|e| ClientError::Network(e.to_string()))?;
        match es.next().await {
            Some(Ok(Event::Open)) => {}
            Some(Ok(Event::Message(_))) => warn!("connect: message before open"),
            Some(Err(e)) => {
                es.close();
                return Err(ClientError::Network(e.to_string()));
            }
            None => return Err(ClientError::Network("event stream ended".into())),
        }

        let (tx, rx) = mpsc::channel(64);
        tokio::spawn(async move {
            while let Some(event) = es.next().await {
                match event {
                    Ok(Event::Open) => {}
                    Ok(Event::Message(msg)) => match PushEvent::decode(&msg.event, &msg.data) {
                        Ok(Some(ev)) => {
                            if tx.send(ev).await.is_err() {
                                break;
                            }
                        }
                        Ok(None) => debug!(event = %msg.event, "feed: ignoring event"),
                        Err(e) => warn!(event = %msg.event, error = %e, "feed: undecodable payload"),
                    },
                    Err(e) => {
                        warn!(error = %e, "feed: connection lost");
                        break;
                    }
                }
            }
            es.close();
        });
        Ok(rx)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FeedStatus {
    Connected,
    /// Retry budget exhausted; the page should poll from here on.
    Degraded,
}

pub struct Subscription {
    events: broadcast::Sender<PushEvent>,
    handle: JoinHandle<()>,
}

impl Subscription {
    /// Keep `feed` connected, fanning events out to every subscriber. After
    /// `max_attempts` consecutive failures `Degraded` is reported and the task ends.
    pub fn spawn(
        feed: Arc<dyn UpdateFeed>,
        max_attempts: u32,
    ) -> (Self, mpsc::UnboundedReceiver<FeedStatus>) {
        let (events, _) = broadcast::channel(128);
        let (status_tx, status_rx) = mpsc::unbounded_channel();
        let fanout = events.clone();
        let handle = tokio::spawn(async move {
            let mut failures: u32 = 0;
            loop {
                match feed.connect().await {
                    Ok(mut rx) => {
                        failures = 0;
                        info!("subscription: connected");
                        let _ = status_tx.send(FeedStatus::Connected);
                        while let Some(ev) = rx.recv().await {
                            let _ = fanout.send(ev);
                        }
                        warn!("subscription: disconnected");
                    }
                    Err(e) => warn!(error = %e, attempt = failures + 1, "subscription: connect failed"),
                }
                failures += 1;
                if failures >= max_attempts {
                    warn!(failures, "subscription: giving up, switching to polling");
                    let _ = status_tx.send(FeedStatus::Degraded);
                    break;
                }
                tokio::time::sleep(backoff(failures)).await;
            }
        });
        (Self { events, handle }, status_rx)
    }

    pub fn subscribe(&self) -> broadcast::Receiver<PushEvent> {
        self.events.subscribe()
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

struct Armed {
    token: String,
    deadline: Instant,
}

/// Drops the push that echoes our own save.
///
/// A push carrying the armed token is always ours. A push without a token is
/// taken as ours only inside the window.
#[derive(Clone)]
pub struct EchoGuard {
    window: Duration,
    armed: Arc<Mutex<Option<Armed>>>,
}

impl EchoGuard {
    pub fn new(window: Duration) -> Self {
        Self { window, armed: Arc::default() }
    }

    fn slot(&self) -> std::sync::MutexGuard<'_, Option<Armed>> {
        self.armed.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Arm for a save about to start; returns its correlation token.
    pub fn arm(&self) -> String {
        let token = Uuid::new_v4().to_string();
        *self.slot() = Some(Armed { token: token.clone(), deadline: Instant::now() + self.window });
        token
    }

    pub fn disarm(&self, token: &str) {
        let mut slot = self.slot();
        if slot.as_ref().is_some_and(|a| a.token == token) {
            *slot = None;
        }
    }

    pub fn is_armed(&self) -> bool {
        self.slot().is_some()
    }

    pub fn should_drop(&self, origin: Option<&str>) -> bool {
        let mut slot = self.slot();
        let Some(armed) = slot.as_ref() else {
            return false;
        };
        match origin {
            Some(o) if o == armed.token => {
                *slot = None;
                true
            }
            Some(_) => false,
            None => {
                let within = Instant::now() < armed.deadline;
                *slot = None;
                within
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[test]
    fn decode_named_events() {
        let ev = PushEvent::decode(SEQUENCE_UPDATED, r#"{"result":{"id":"seq-1","steps":[]}}"#).unwrap().unwrap();
        assert_eq!(ev.sequence_id(), "seq-1");
        let ev = PushEvent::decode(SEQUENCE_DELETED, r#"{"id":"seq-2"}"#).unwrap().unwrap();
        assert_eq!(ev, PushEvent::SequenceDeleted { id: "seq-2".into() });
        assert!(PushEvent::decode("new_message", "{}").unwrap().is_none());
        assert!(PushEvent::decode(SEQUENCE_DELETED, "{}").is_err());
    }

    #[test]
    fn backoff_doubles_up_to_cap() {
        assert_eq!(backoff(1), Duration::from_millis(500));
        assert_eq!(backoff(3), Duration::from_millis(2_000));
        assert_eq!(backoff(64), Duration::from_millis(MAX_BACKOFF_MS));
        assert_eq!(backoff(u32::MAX), Duration::from_millis(MAX_BACKOFF_MS));
    }

    #[tokio::test(start_paused = true)]
    async fn echo_guard_window() {
        let guard = EchoGuard::new(Duration::from_millis(3_000));
        assert!(!guard.should_drop(None));

        guard.arm();
        tokio::time::advance(Duration::from_millis(1_000)).await;
        assert!(guard.should_drop(None));
        // one drop per save
        assert!(!guard.should_drop(None));

        guard.arm();
        tokio::time::advance(Duration::from_millis(3_500)).await;
        assert!(!guard.should_drop(None));
    }

    #[tokio::test(start_paused = true)]
    async fn echo_guard_token_outlives_window() {
        let guard = EchoGuard::new(Duration::from_millis(100));
        let token = guard.arm();
        assert!(!guard.should_drop(Some("someone-else")));
        tokio::time::advance(Duration::from_secs(10)).await;
        assert!(guard.should_drop(Some(&token)));
        assert!(!guard.is_armed());

        let token = guard.arm();
        guard.disarm(&token);
        assert!(!guard.should_drop(None));
    }

    struct Flaky {
        attempts: AtomicU32,
    }

    #[async_trait]
    impl UpdateFeed for Flaky {
        async fn connect(&self) -> ClientResult<mpsc::Receiver<PushEvent>> {
            let n = self.attempts.fetch_add(1, Ordering::SeqCst);
            if n == 0 {
                let (tx, rx) = mpsc::channel(4);
                tx.send(PushEvent::SequenceDeleted { id: "gone".into() }).await.unwrap();
                Ok(rx)
            } else {
                Err(ClientError::Network("refused".into()))
            }
        }
    }

    #[tokio::test(start_paused = true)]
    async fn subscription_fans_out_then_degrades() {
        let feed = Arc::new(Flaky { attempts: AtomicU32::new(0) });
        let (sub, mut status) = Subscription::spawn(feed.clone(), 3);
        let mut a = sub.subscribe();
        let mut b = sub.subscribe();

        assert_eq!(status.recv().await, Some(FeedStatus::Connected));
        assert_eq!(a.recv().await.unwrap().sequence_id(), "gone");
        assert_eq!(b.recv().await.unwrap().sequence_id(), "gone");
        assert_eq!(status.recv().await, Some(FeedStatus::Degraded));
        // the dropped connection counts against the budget too

        assert_eq!(feed.attempts.load(Ordering::SeqCst), 3);
    }
}
