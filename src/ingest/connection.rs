// Per-connection ingest state machine
// One reader loop and one writer task per WebSocket; they share a bounded
// outbound queue. Phases: Handshake -> Bound -> Closing -> Closed

use super::protocol::{
    decode_frame, encode_frame, AgentMessage, ServerMessage, SnapshotWire, MISSED_PONG_LIMIT,
    PING_INTERVAL_SECS,
};
use super::queue::OutboundQueue;
use super::snapshots::{process_snapshot, DomLimitMode, SnapshotIngest};
use super::AppState;
use crate::fingerprint;
use crate::redact::apply_safe_mode;
use crate::store::{NewEvent, NewSession, SessionRow, StoreError, StoreResult};
use axum::extract::ws::{Message, WebSocket};
use futures::{SinkExt, StreamExt};
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

/// Grace window after transport loss before the session is closed. A
/// re-bind of the same session inside the window cancels the close.
pub const CLOSE_GRACE_SECS: u64 = 30;

/// Backoff schedule for transient store failures before the connection
/// closes with `persistence_failed`.
const RETRY_BACKOFF_MS: [u64; 3] = [100, 300, 900];

enum Flow {
    Continue,
    Close,
}

struct Connection {
    state: Arc<AppState>,
    queue: Arc<OutboundQueue>,
    /// Session row cached at bind time; refreshed on session_update
    bound: Option<SessionRow>,
}

/// Drive one accepted WebSocket until it closes.
pub async fn run_connection(state: Arc<AppState>, socket: WebSocket) {
    state.metrics.active_connections.fetch_add(1, Ordering::Relaxed);
    state.metrics.total_connections.fetch_add(1, Ordering::Relaxed);

    let (mut sender, mut receiver) = socket.split();
    let queue = Arc::new(OutboundQueue::default());

    let writer = {
        let queue = queue.clone();
        tokio::spawn(async move {
            while let Some(msg) = queue.pop().await {
                let Ok(text) = encode_frame(&msg) else {
                    continue;
                };
                if sender.send(Message::Text(text.into())).await.is_err() {
                    break;
                }
            }
            let _ = sender.send(Message::Close(None)).await;
        })
    };

    let mut conn = Connection {
        state: state.clone(),
        queue: queue.clone(),
        bound: None,
    };

    let mut heartbeat = tokio::time::interval(Duration::from_secs(PING_INTERVAL_SECS));
    heartbeat.tick().await; // immediate first tick
    let mut pending_pongs: u32 = 0;

    loop {
        tokio::select! {
            _ = heartbeat.tick() => {
                if pending_pongs >= MISSED_PONG_LIMIT {
                    tracing::debug!("closing connection after missed pongs");
                    break;
                }
                conn.queue.push(ServerMessage::Ping);
                pending_pongs += 1;
            }

            msg = receiver.next() => {
                match msg {
                    Some(Ok(Message::Text(text))) => {
                        state.metrics.frames_received.fetch_add(1, Ordering::Relaxed);
                        match decode_frame::<AgentMessage>(text.as_str()) {
                            Ok(AgentMessage::Pong) => {
                                pending_pongs = 0;
                            }
                            Ok(AgentMessage::Ping) => {
                                conn.queue.push(ServerMessage::Pong);
                            }
                            Ok(frame) => {
                                if let Flow::Close = conn.handle_frame(frame).await {
                                    break;
                                }
                            }
                            Err(detail) => {
                                conn.queue
                                    .push(ServerMessage::error("malformed_frame", Some(detail)));
                            }
                        }
                    }
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Ok(_)) => {} // binary and ws-level ping/pong frames
                    Some(Err(err)) => {
                        tracing::debug!(error = %err, "websocket read error");
                        break;
                    }
                }
            }
        }
    }

    conn.teardown();
    queue.close();
    let _ = writer.await;
    state.metrics.active_connections.fetch_sub(1, Ordering::Relaxed);
}

impl Connection {
    async fn handle_frame(&mut self, frame: AgentMessage) -> Flow {
        match frame {
            AgentMessage::SessionStart {
                session_id,
                created_at,
                url,
                safe_mode,
                allowlist,
                snapshot_config,
            } => {
                let allowlist = allowlist
                    .map(|a| a.to_allowlist().patterns().to_vec())
                    .unwrap_or_default();
                let new = NewSession {
                    session_id: session_id.clone(),
                    created_at,
                    url,
                    safe_mode,
                    allowlist,
                    snapshot_config,
                };
                if let Err(err) = self.state.store.upsert_session(&new) {
                    tracing::warn!(error = %err, session_id, "failed to persist session start");
                    self.queue
                        .push(ServerMessage::error("persistence_failed", None));
                    return Flow::Close;
                }
                // Cache the row the store now holds
                match self.state.store.get_session(&session_id) {
                    Ok(Some(row)) => {
                        self.state.dispatcher.bind(&session_id, self.queue.clone());
                        self.bound = Some(row);
                        self.queue.push(ServerMessage::Ack {
                            kind: "session_start".to_string(),
                            inserted: None,
                        });
                        Flow::Continue
                    }
                    _ => {
                        self.queue
                            .push(ServerMessage::error("persistence_failed", None));
                        Flow::Close
                    }
                }
            }

            AgentMessage::SessionUpdate {
                session_id,
                url,
                safe_mode,
                allowlist,
            } => {
                let Some(bound) = self.require_bound(&session_id) else {
                    return Flow::Continue;
                };
                let patterns = allowlist.map(|a| a.to_allowlist().patterns().to_vec());
                let result = self.state.store.update_session(
                    &bound,
                    url.as_deref(),
                    safe_mode,
                    patterns.as_deref(),
                );
                match result {
                    Ok(_) => {
                        if let Ok(Some(row)) = self.state.store.get_session(&bound) {
                            self.bound = Some(row);
                        }
                        Flow::Continue
                    }
                    Err(err) => self.persistence_error(err),
                }
            }

            AgentMessage::SessionEnd { session_id } => {
                let Some(bound) = self.require_bound(&session_id) else {
                    return Flow::Continue;
                };
                let now = chrono::Utc::now().timestamp_millis();
                if let Err(err) = self.state.store.close_session(&bound, now) {
                    return self.persistence_error(err);
                }
                self.state.dispatcher.unbind(&bound, &self.queue);
                self.bound = None;
                Flow::Close
            }

            AgentMessage::EventBatch { session_id, events } => {
                let Some(bound) = self.require_bound(&session_id) else {
                    return Flow::Continue;
                };
                let session = self.bound.clone();
                let events = self.apply_event_policy(session.as_ref(), events);
                self.record_fingerprints(&bound, &events);

                let store = self.state.store.clone();
                let result = persist_with_retry(|| store.insert_events_batch(&bound, &events)).await;
                self.finish_batch("event_batch", result)
            }

            AgentMessage::NetworkBatch {
                session_id,
                records,
            } => {
                let Some(bound) = self.require_bound(&session_id) else {
                    return Flow::Continue;
                };
                let store = self.state.store.clone();
                let result =
                    persist_with_retry(|| store.insert_network_batch(&bound, &records)).await;
                self.finish_batch("network_batch", result)
            }

            AgentMessage::Snapshot {
                session_id,
                snapshot,
            } => {
                if self.require_bound(&session_id).is_none() {
                    return Flow::Continue;
                }
                self.handle_snapshot(snapshot)
            }

            AgentMessage::CaptureResult {
                command_id,
                ok,
                data,
                error,
            } => {
                let Some(bound) = self.bound.as_ref().map(|s| s.session_id.clone()) else {
                    self.queue.push(ServerMessage::error("unbound", None));
                    return Flow::Continue;
                };
                self.state
                    .dispatcher
                    .handle_result(&bound, command_id, ok, data, error);
                Flow::Continue
            }

            // Ping/Pong are handled before dispatch
            AgentMessage::Ping | AgentMessage::Pong => Flow::Continue,
        }
    }

    /// Messages before Bound are rejected with reason `unbound`; a frame for
    /// a different session than the bound one is rejected as a mismatch.
    fn require_bound(&mut self, session_id: &str) -> Option<String> {
        match self.bound.as_ref() {
            None => {
                self.queue.push(ServerMessage::error("unbound", None));
                None
            }
            Some(session) if session.session_id != session_id => {
                self.queue.push(ServerMessage::error(
                    "session_mismatch",
                    Some(format!(
                        "connection is bound to {}, frame names {}",
                        session.session_id, session_id
                    )),
                ));
                None
            }
            Some(session) => Some(session.session_id.clone()),
        }
    }

    /// Safe-mode policy: drop whole categories, mask sensitive fields.
    fn apply_event_policy(
        &self,
        session: Option<&SessionRow>,
        events: Vec<NewEvent>,
    ) -> Vec<NewEvent> {
        let safe_mode = session.map(|s| s.safe_mode).unwrap_or(false);
        if !safe_mode {
            return events;
        }
        let mut kept = Vec::with_capacity(events.len());
        for mut event in events {
            let category = event
                .data
                .get("category")
                .and_then(|v| v.as_str())
                .unwrap_or(&event.event_type)
                .to_string();
            match apply_safe_mode(&category, &event.data) {
                Some(masked) => {
                    event.data = masked;
                    kept.push(event);
                }
                None => {
                    self.state
                        .metrics
                        .events_dropped_safe_mode
                        .fetch_add(1, Ordering::Relaxed);
                }
            }
        }
        kept
    }

    /// Aggregate error events into fingerprints alongside the raw rows.
    fn record_fingerprints(&self, session_id: &str, events: &[NewEvent]) {
        for event in events.iter().filter(|e| e.event_type == "error") {
            let message = event
                .data
                .get("message")
                .and_then(|v| v.as_str())
                .unwrap_or_default();
            let stack = event
                .data
                .get("stack")
                .and_then(|v| v.as_str())
                .unwrap_or_default();
            if message.is_empty() && stack.is_empty() {
                continue;
            }
            let hash = fingerprint::fingerprint(message, stack);
            if let Err(err) = self.state.store.upsert_fingerprint(
                session_id,
                &hash,
                message,
                stack,
                event.timestamp,
                1,
            ) {
                tracing::warn!(error = %err, "failed to upsert error fingerprint");
            }
        }
    }

    fn handle_snapshot(&mut self, wire: SnapshotWire) -> Flow {
        let Some(session) = self.bound.clone() else {
            return Flow::Continue;
        };
        match process_snapshot(&self.state.store, &session, wire, DomLimitMode::Substitute) {
            Ok(SnapshotIngest::Stored { .. }) => {
                self.state
                    .metrics
                    .batches_persisted
                    .fetch_add(1, Ordering::Relaxed);
                self.queue.push(ServerMessage::Ack {
                    kind: "snapshot".to_string(),
                    inserted: Some(1),
                });
                Flow::Continue
            }
            Ok(SnapshotIngest::Rejected { error }) => {
                self.queue
                    .push(ServerMessage::error("snapshot_rejected", Some(error)));
                Flow::Continue
            }
            Err(err) => self.persistence_error(err),
        }
    }

    fn finish_batch(&self, kind: &str, result: Result<usize, StoreError>) -> Flow {
        match result {
            Ok(inserted) => {
                self.state
                    .metrics
                    .batches_persisted
                    .fetch_add(1, Ordering::Relaxed);
                self.queue.push(ServerMessage::Ack {
                    kind: kind.to_string(),
                    inserted: Some(inserted as u64),
                });
                Flow::Continue
            }
            Err(err) => self.persistence_error(err),
        }
    }

    fn persistence_error(&self, err: StoreError) -> Flow {
        tracing::warn!(error = %err, "store failure; closing connection");
        self.queue
            .push(ServerMessage::error("persistence_failed", None));
        Flow::Close
    }

    /// Unbind and schedule the grace-window close.
    fn teardown(&mut self) {
        self.state
            .metrics
            .outbound_dropped
            .fetch_add(self.queue.dropped_total(), Ordering::Relaxed);

        let Some(session) = self.bound.take() else {
            return;
        };
        self.state
            .dispatcher
            .unbind(&session.session_id, &self.queue);

        let state = self.state.clone();
        let session_id = session.session_id;
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(CLOSE_GRACE_SECS)).await;
            if state.dispatcher.is_bound(&session_id) {
                return; // the agent reconnected inside the window
            }
            let now = chrono::Utc::now().timestamp_millis();
            if let Err(err) = state.store.close_session(&session_id, now) {
                tracing::warn!(error = %err, session_id, "failed to close session after grace window");
            }
        });
    }
}

/// Run a store operation, retrying transient failures on the fixed backoff
/// schedule before giving up.
async fn persist_with_retry<T>(mut op: impl FnMut() -> StoreResult<T>) -> StoreResult<T> {
    let mut attempt = 0;
    loop {
        match op() {
            Ok(value) => return Ok(value),
            Err(err) if err.is_transient() && attempt < RETRY_BACKOFF_MS.len() => {
                let delay = RETRY_BACKOFF_MS[attempt];
                attempt += 1;
                tracing::debug!(attempt, delay_ms = delay, "retrying store batch");
                tokio::time::sleep(Duration::from_millis(delay)).await;
            }
            Err(err) => return Err(err),
        }
    }
}
