//! Per-client session state shared by the network transports.
//!
//! A session owns a broadcast channel of server events plus a bounded
//! backlog so that reconnecting clients can resume after `Last-Event-ID`.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::response::sse::{Event, KeepAlive};
use dashmap::DashMap;
use futures::{future, Stream, StreamExt};
use serde_json::Value;
use tokio::sync::{broadcast, Mutex};
use tokio_stream::wrappers::{errors::BroadcastStreamRecvError, BroadcastStream};
use uuid::Uuid;

const CHANNEL_CAPACITY: usize = 64;
const MAX_BACKLOG: usize = 256;

/// Comment body of keep-alive frames; axum adds the leading colon
pub(crate) const KEEP_ALIVE_TEXT: &str = "keep-alive";
const KEEP_ALIVE_INTERVAL: Duration = Duration::from_secs(20);

/// Live events as delivered to a resumed stream
pub type LiveEvents = std::pin::Pin<
    Box<dyn Stream<Item = Result<ServerEvent, BroadcastStreamRecvError>> + Send>,
>;

/// Session manager storing per-client state for SSE delivery.
#[derive(Default)]
pub struct SessionManager {
    sessions: DashMap<String, Arc<Session>>,
}

impl SessionManager {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn create_session(&self, protocol_version: impl Into<String>) -> Arc<Session> {
        let id = Uuid::new_v4().to_string();
        let (tx, _rx) = broadcast::channel(CHANNEL_CAPACITY);
        let session = Arc::new(Session::new(id.clone(), protocol_version.into(), tx));
        self.sessions.insert(id, session.clone());
        tracing::debug!("Created session {}", session.id);
        session
    }

    pub fn get_session(&self, id: &str) -> Option<Arc<Session>> {
        self.sessions.get(id).map(|entry| Arc::clone(entry.value()))
    }

    pub fn remove_session(&self, id: &str) -> bool {
        let removed = self.sessions.remove(id).is_some();
        if removed {
            tracing::debug!("Removed session {}", id);
        }
        removed
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }
}

/// Removes a session when the owning stream is dropped
pub struct SessionGuard {
    manager: Arc<SessionManager>,
    id: String,
}

impl SessionGuard {
    pub fn new(manager: Arc<SessionManager>, id: impl Into<String>) -> Self {
        Self {
            manager,
            id: id.into(),
        }
    }
}

impl Drop for SessionGuard {
    fn drop(&mut self) {
        self.manager.remove_session(&self.id);
    }
}

/// Per-session SSE state.
pub struct Session {
    pub id: String,
    pub protocol_version: String,
    pub created_at: Instant,
    tx: broadcast::Sender<ServerEvent>,
    backlog: Mutex<VecDeque<ServerEvent>>,
    next_event_id: AtomicU64,
}

impl Session {
    fn new(id: String, protocol_version: String, tx: broadcast::Sender<ServerEvent>) -> Self {
        Self {
            id,
            protocol_version,
            created_at: Instant::now(),
            tx,
            backlog: Mutex::new(VecDeque::new()),
            next_event_id: AtomicU64::new(1),
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ServerEvent> {
        self.tx.subscribe()
    }

    pub async fn backlog_since(&self, last_event: Option<u64>) -> Vec<ServerEvent> {
        let backlog = self.backlog.lock().await;
        backlog
            .iter()
            .filter(|event| last_event.map(|id| event.id > id).unwrap_or(true))
            .cloned()
            .collect()
    }

    /// Backlog after `last_event` followed by the live feed.
    ///
    /// The subscription is taken before the backlog is read, so live events
    /// already replayed from the backlog are skipped.
    pub async fn resume(&self, last_event: Option<u64>) -> (Vec<ServerEvent>, LiveEvents) {
        let receiver = self.subscribe();
        self.replay(receiver, last_event).await
    }

    async fn replay(
        &self,
        receiver: broadcast::Receiver<ServerEvent>,
        last_event: Option<u64>,
    ) -> (Vec<ServerEvent>, LiveEvents) {
        let backlog = self.backlog_since(last_event).await;
        let replayed_up_to = backlog.last().map(|event| event.id).unwrap_or(0);
        let live = BroadcastStream::new(receiver).filter(move |received| {
            future::ready(!matches!(received, Ok(event) if event.id <= replayed_up_to))
        });
        (backlog, Box::pin(live))
    }

    /// Record `payload` in the backlog and push it to live subscribers
    pub async fn publish(&self, event: Option<&'static str>, payload: Value) {
        let id = self.next_event_id.fetch_add(1, Ordering::Relaxed);
        let event = ServerEvent { id, event, payload };
        {
            let mut backlog = self.backlog.lock().await;
            backlog.push_back(event.clone());
            if backlog.len() > MAX_BACKLOG {
                backlog.pop_front();
            }
        }
        // No subscriber yet is fine, the backlog keeps the event
        let _ = self.tx.send(event);
    }
}

#[derive(Debug, Clone)]
pub struct ServerEvent {
    pub id: u64,
    pub event: Option<&'static str>,
    pub payload: Value,
}

pub fn keep_alive() -> KeepAlive {
    KeepAlive::new()
        .interval(KEEP_ALIVE_INTERVAL)
        .text(KEEP_ALIVE_TEXT)
}

pub fn event_to_sse(event: ServerEvent) -> Event {
    let payload = serde_json::to_string(&event.payload).unwrap_or_else(|_| "{}".to_string());
    let sse = Event::default().id(event.id.to_string()).data(payload);
    match event.event {
        Some(name) => sse.event(name),
        None => sse,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_backlog_replay_after_last_event_id() {
        let manager = SessionManager::new();
        let session = manager.create_session("2025-06-18");

        session.publish(None, json!({"n": 1})).await;
        session.publish(None, json!({"n": 2})).await;
        session.publish(Some("message"), json!({"n": 3})).await;

        let all = session.backlog_since(None).await;
        assert_eq!(all.len(), 3);

        let after_first = session.backlog_since(Some(1)).await;
        assert_eq!(after_first.len(), 2);
        assert_eq!(after_first[0].payload["n"], 2);
        assert_eq!(after_first[1].event, Some("message"));
    }

    #[tokio::test]
    async fn test_live_subscribers_receive_events() {
        let manager = SessionManager::new();
        let session = manager.create_session("2025-06-18");
        let mut rx = session.subscribe();

        session.publish(Some("message"), json!({"ok": true})).await;
        let event = rx.recv().await.unwrap();
        assert_eq!(event.payload["ok"], true);
    }

    #[tokio::test]
    async fn test_resume_skips_events_already_in_the_backlog() {
        let manager = SessionManager::new();
        let session = manager.create_session("2025-06-18");
        session.publish(None, json!({"n": 1})).await;

        // Published after subscribing but before the backlog is read
        let receiver = session.subscribe();
        session.publish(None, json!({"n": 2})).await;

        let (backlog, mut live) = session.replay(receiver, None).await;
        assert_eq!(
            backlog.iter().map(|e| e.id).collect::<Vec<_>>(),
            vec![1, 2]
        );

        session.publish(None, json!({"n": 3})).await;
        let next = live.next().await.unwrap().unwrap();
        assert_eq!(next.id, 3);
        assert_eq!(next.payload["n"], 3);
    }

    #[tokio::test]
    async fn test_resume_after_last_event_id() {
        let manager = SessionManager::new();
        let session = manager.create_session("2025-06-18");
        session.publish(None, json!({"n": 1})).await;
        session.publish(None, json!({"n": 2})).await;

        let (backlog, mut live) = session.resume(Some(1)).await;
        assert_eq!(backlog.len(), 1);
        assert_eq!(backlog[0].id, 2);

        session.publish(None, json!({"n": 3})).await;
        assert_eq!(live.next().await.unwrap().unwrap().id, 3);
    }

    #[test]
    fn test_keep_alive_text_has_no_comment_prefix() {
        assert!(!KEEP_ALIVE_TEXT.starts_with(':'));
        assert!(!KEEP_ALIVE_TEXT.is_empty());
    }

    #[test]
    fn test_guard_removes_session() {
        let manager = Arc::new(SessionManager::new());
        let session = manager.create_session("2025-06-18");
        assert!(manager.get_session(&session.id).is_some());

        drop(SessionGuard::new(manager.clone(), session.id.clone()));
        assert!(manager.get_session(&session.id).is_none());
        assert!(manager.is_empty());
    }
}
