//! On-demand capture dispatcher.
//!
//! Correlates outbound `capture_command` frames with inbound
//! `capture_result` frames by command id. Waiters suspend on oneshot
//! channels; timeouts remove the waiter and late results are dropped and
//! counted. Multiple commands per session stay in flight concurrently.

use crate::error::{BridgeError, ErrorKind};
use crate::ingest::protocol::{CaptureKind, ServerMessage};
use crate::ingest::queue::OutboundQueue;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::oneshot;

/// Default deadline for heavy capture commands.
pub const DEFAULT_CAPTURE_TIMEOUT: Duration = Duration::from_secs(8);

pub type CaptureResponse = Result<Value, BridgeError>;

struct SessionLink {
    queue: Arc<OutboundQueue>,
    pending: HashMap<u64, oneshot::Sender<CaptureResponse>>,
}

/// Pending-waiter table keyed by session, guarded by one short-lived lock.
#[derive(Default)]
pub struct CaptureDispatcher {
    sessions: Mutex<HashMap<String, SessionLink>>,
    next_command_id: AtomicU64,
    late_results_dropped: AtomicU64,
}

impl CaptureDispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bind a session to a connection's outbound queue.
    ///
    /// A session has at most one live binding; re-binding resolves any
    /// waiters left from the previous connection with `connection_lost`.
    pub fn bind(&self, session_id: &str, queue: Arc<OutboundQueue>) {
        let mut sessions = self.lock_sessions();
        if let Some(old) = sessions.insert(
            session_id.to_string(),
            SessionLink {
                queue,
                pending: HashMap::new(),
            },
        ) {
            resolve_all(old, ErrorKind::ConnectionLost);
        }
    }

    /// Remove a session binding when its connection goes away.
    ///
    /// The queue pointer guards against a reconnect race: a newer binding
    /// for the same session is left untouched.
    pub fn unbind(&self, session_id: &str, queue: &Arc<OutboundQueue>) {
        let mut sessions = self.lock_sessions();
        let matches = sessions
            .get(session_id)
            .map(|link| Arc::ptr_eq(&link.queue, queue))
            .unwrap_or(false);
        if matches {
            if let Some(link) = sessions.remove(session_id) {
                resolve_all(link, ErrorKind::ConnectionLost);
            }
        }
    }

    /// Whether a live connection is bound to the session.
    pub fn is_bound(&self, session_id: &str) -> bool {
        self.lock_sessions().contains_key(session_id)
    }

    /// Number of sessions currently bound.
    pub fn bound_count(&self) -> usize {
        self.lock_sessions().len()
    }

    /// Late capture results dropped after their waiter timed out.
    pub fn late_results_dropped(&self) -> u64 {
        self.late_results_dropped.load(Ordering::Relaxed)
    }

    /// Issue a capture command and await its result.
    pub async fn request_capture(
        &self,
        session_id: &str,
        kind: CaptureKind,
        payload: Value,
        timeout: Duration,
    ) -> CaptureResponse {
        let (tx, rx) = oneshot::channel();

        let command_id = {
            let mut sessions = self.lock_sessions();
            let Some(link) = sessions.get_mut(session_id) else {
                return Err(BridgeError::new(
                    ErrorKind::NoLiveConnection,
                    format!("no agent connection bound to session {session_id}"),
                ));
            };
            let command_id = self.next_command_id.fetch_add(1, Ordering::Relaxed);
            link.pending.insert(command_id, tx);
            link.queue.push(ServerMessage::CaptureCommand {
                command_id,
                session_id: session_id.to_string(),
                kind,
                payload,
            });
            command_id
        };

        match tokio::time::timeout(timeout, rx).await {
            Ok(Ok(response)) => response,
            // Sender dropped without a result: the binding was torn down
            Ok(Err(_)) => Err(BridgeError::new(
                ErrorKind::ConnectionLost,
                "agent connection lost while waiting for capture result",
            )),
            Err(_) => {
                let mut sessions = self.lock_sessions();
                if let Some(link) = sessions.get_mut(session_id) {
                    link.pending.remove(&command_id);
                }
                Err(BridgeError::new(
                    ErrorKind::Timeout,
                    format!("capture {kind} timed out after {} ms", timeout.as_millis()),
                ))
            }
        }
    }

    /// Route an inbound `capture_result` to its waiter.
    ///
    /// A result with no waiter (timed out or cancelled) is dropped and
    /// counted.
    pub fn handle_result(
        &self,
        session_id: &str,
        command_id: u64,
        ok: bool,
        data: Option<Value>,
        error: Option<String>,
    ) {
        let waiter = {
            let mut sessions = self.lock_sessions();
            sessions
                .get_mut(session_id)
                .and_then(|link| link.pending.remove(&command_id))
        };

        let Some(waiter) = waiter else {
            self.late_results_dropped.fetch_add(1, Ordering::Relaxed);
            tracing::debug!(session_id, command_id, "dropped late capture result");
            return;
        };

        let response = if ok {
            Ok(data.unwrap_or(Value::Null))
        } else {
            Err(BridgeError::new(
                ErrorKind::Internal,
                error.unwrap_or_else(|| "agent reported capture failure".to_string()),
            ))
        };
        // The waiter may have been cancelled between removal and send
        let _ = waiter.send(response);
    }

    /// Resolve every outstanding waiter with `cancelled` (request-level
    /// cancellation).
    pub fn cancel_all(&self) {
        self.resolve_all_pending(ErrorKind::Cancelled);
    }

    /// Resolve every outstanding waiter with the given kind. Shutdown on
    /// stdin close uses `connection_lost`.
    pub fn resolve_all_pending(&self, kind: ErrorKind) {
        let mut sessions = self.lock_sessions();
        for (_, link) in sessions.drain() {
            resolve_all(link, kind);
        }
    }

    fn lock_sessions(&self) -> std::sync::MutexGuard<'_, HashMap<String, SessionLink>> {
        self.sessions
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }
}

fn resolve_all(link: SessionLink, kind: ErrorKind) {
    for (_, waiter) in link.pending {
        let _ = waiter.send(Err(BridgeError::new(kind, "capture waiter resolved")));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn bound_dispatcher() -> (Arc<CaptureDispatcher>, Arc<OutboundQueue>) {
        let dispatcher = Arc::new(CaptureDispatcher::new());
        let queue = Arc::new(OutboundQueue::default());
        dispatcher.bind("s1", queue.clone());
        (dispatcher, queue)
    }

    #[tokio::test]
    async fn unbound_session_fails_immediately() {
        let dispatcher = CaptureDispatcher::new();
        let err = dispatcher
            .request_capture(
                "nope",
                CaptureKind::DomSubtree,
                json!({}),
                Duration::from_secs(1),
            )
            .await
            .unwrap_err();
        assert_eq!(err.kind, ErrorKind::NoLiveConnection);
    }

    #[tokio::test]
    async fn result_resolves_waiter() {
        let (dispatcher, queue) = bound_dispatcher();

        let request = {
            let dispatcher = dispatcher.clone();
            tokio::spawn(async move {
                dispatcher
                    .request_capture(
                        "s1",
                        CaptureKind::DomSubtree,
                        json!({"selector": "#app"}),
                        Duration::from_secs(5),
                    )
                    .await
            })
        };

        // The command shows up on the outbound queue
        let command_id = match queue.pop().await.unwrap() {
            ServerMessage::CaptureCommand { command_id, .. } => command_id,
            other => panic!("unexpected message: {other:?}"),
        };

        dispatcher.handle_result("s1", command_id, true, Some(json!({"html": "<div/>"})), None);
        let result = request.await.unwrap().unwrap();
        assert_eq!(result["html"], "<div/>");
    }

    #[tokio::test]
    async fn timeout_removes_waiter_and_late_result_is_counted() {
        let (dispatcher, queue) = bound_dispatcher();

        let err = dispatcher
            .request_capture(
                "s1",
                CaptureKind::LayoutMetrics,
                json!({}),
                Duration::from_millis(20),
            )
            .await
            .unwrap_err();
        assert_eq!(err.kind, ErrorKind::Timeout);

        let command_id = match queue.pop().await.unwrap() {
            ServerMessage::CaptureCommand { command_id, .. } => command_id,
            other => panic!("unexpected message: {other:?}"),
        };

        dispatcher.handle_result("s1", command_id, true, Some(json!({})), None);
        assert_eq!(dispatcher.late_results_dropped(), 1);
    }

    #[tokio::test]
    async fn unbind_resolves_with_connection_lost() {
        let (dispatcher, queue) = bound_dispatcher();

        let request = {
            let dispatcher = dispatcher.clone();
            tokio::spawn(async move {
                dispatcher
                    .request_capture(
                        "s1",
                        CaptureKind::UiSnapshot,
                        json!({}),
                        Duration::from_secs(5),
                    )
                    .await
            })
        };
        // Wait for the command to be enqueued before tearing down
        let _ = queue.pop().await.unwrap();

        dispatcher.unbind("s1", &queue);
        let err = request.await.unwrap().unwrap_err();
        assert_eq!(err.kind, ErrorKind::ConnectionLost);
        assert!(!dispatcher.is_bound("s1"));
    }

    #[tokio::test]
    async fn stale_unbind_leaves_new_binding() {
        let (dispatcher, old_queue) = bound_dispatcher();
        let new_queue = Arc::new(OutboundQueue::default());
        dispatcher.bind("s1", new_queue.clone());

        dispatcher.unbind("s1", &old_queue);
        assert!(dispatcher.is_bound("s1"));

        dispatcher.unbind("s1", &new_queue);
        assert!(!dispatcher.is_bound("s1"));
    }

    #[tokio::test]
    async fn concurrent_commands_do_not_serialize() {
        let (dispatcher, queue) = bound_dispatcher();

        let first = {
            let dispatcher = dispatcher.clone();
            tokio::spawn(async move {
                dispatcher
                    .request_capture("s1", CaptureKind::DomSubtree, json!({}), Duration::from_secs(5))
                    .await
            })
        };
        let second = {
            let dispatcher = dispatcher.clone();
            tokio::spawn(async move {
                dispatcher
                    .request_capture("s1", CaptureKind::ComputedStyles, json!({}), Duration::from_secs(5))
                    .await
            })
        };

        let id_a = match queue.pop().await.unwrap() {
            ServerMessage::CaptureCommand { command_id, .. } => command_id,
            other => panic!("unexpected message: {other:?}"),
        };
        let id_b = match queue.pop().await.unwrap() {
            ServerMessage::CaptureCommand { command_id, .. } => command_id,
            other => panic!("unexpected message: {other:?}"),
        };
        assert_ne!(id_a, id_b);

        // Resolve out of order: results match by command id, not arrival
        dispatcher.handle_result("s1", id_b, true, Some(json!({"which": "b"})), None);
        dispatcher.handle_result("s1", id_a, true, Some(json!({"which": "a"})), None);

        let (ra, rb) = (first.await.unwrap(), second.await.unwrap());
        assert!(ra.is_ok() && rb.is_ok());
    }

    #[tokio::test]
    async fn cancel_all_resolves_with_cancelled() {
        let (dispatcher, queue) = bound_dispatcher();
        let request = {
            let dispatcher = dispatcher.clone();
            tokio::spawn(async move {
                dispatcher
                    .request_capture("s1", CaptureKind::DomDocument, json!({}), Duration::from_secs(5))
                    .await
            })
        };
        let _ = queue.pop().await.unwrap();

        dispatcher.cancel_all();
        let err = request.await.unwrap().unwrap_err();
        assert_eq!(err.kind, ErrorKind::Cancelled);
    }
}
