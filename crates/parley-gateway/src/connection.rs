use std::fmt::Debug;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use axum::extract::ws::{CloseFrame, Message, WebSocket, close_code};
use chrono::Utc;
use futures_util::{Sink, SinkExt, Stream, StreamExt};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use parley_types::events::{ClientFrame, ServerEvent};

use crate::Gateway;
use crate::error::{AuthError, GatewayError};
use crate::presence::PresenceTracker;
use crate::registry::ConnectionHandle;

/// Handle one upgraded WebSocket for its whole lifetime.
pub async fn handle_connection(socket: WebSocket, gateway: Gateway, token: String) {
    let (sink, stream) = socket.split();
    serve_connection(sink, stream, gateway, token).await;
}

/// Transport-agnostic body of [`handle_connection`]: authenticate, admit,
/// run the frame loop, and always clean up.
pub async fn serve_connection<W, R, E>(mut sink: W, mut stream: R, gateway: Gateway, token: String)
where
    W: Sink<Message> + Unpin + Send + 'static,
    W::Error: Debug,
    R: Stream<Item = Result<Message, E>> + Unpin,
    E: Debug,
{
    let identity = match authenticate(&gateway, token).await {
        Ok(identity) => identity,
        Err(e) => {
            warn!("rejecting gateway connection: {}", e);
            let _ = sink.send(close(close_code::POLICY, "authentication failed")).await;
            return;
        }
    };
    let user_id = identity.id;
    let config = gateway.config().clone();

    let (handle, outbound_rx) = ConnectionHandle::channel(user_id, config.outbound_queue);
    let conn_id = handle.conn_id;
    let connected_at = handle.connected_at;
    let closer = handle.close_signal();

    info!(user_id, %conn_id, "connected to gateway");

    // Pong tracking shared between the writer (pings) and the reader (pongs)
    let pong_received = Arc::new(AtomicBool::new(true));

    let writer = tokio::spawn(write_loop(
        sink,
        outbound_rx,
        closer.clone(),
        pong_received.clone(),
        config.heartbeat_interval,
        config.write_timeout,
    ));

    let guard = PresenceGuard::new(gateway.presence().clone(), user_id, conn_id);
    gateway.presence().on_connect(handle).await;

    loop {
        let msg = tokio::select! {
            _ = closer.cancelled() => break,
            msg = stream.next() => msg,
        };

        let msg = match msg {
            Some(Ok(msg)) => msg,
            Some(Err(e)) => {
                debug!(user_id, "socket read failed: {:?}", e);
                break;
            }
            None => break,
        };

        match msg {
            Message::Text(text) => {
                if let Err(e) = handle_text(&gateway, user_id, text.as_str()).await {
                    log_frame_error(user_id, &e, text.as_str());
                }
            }
            Message::Binary(data) => {
                warn!(user_id, "ignoring {} byte binary frame", data.len());
            }
            Message::Pong(_) => {
                pong_received.store(true, Ordering::Release);
            }
            Message::Close(_) => break,
            Message::Ping(_) => {}
        }
    }

    // Stop the writer; it sends the closing frame on its way out.
    closer.cancel();
    if let Err(e) = writer.await {
        error!(user_id, "writer task failed: {}", e);
    }

    guard.release().await;
    info!(
        user_id,
        %conn_id,
        online_secs = (Utc::now() - connected_at).num_seconds(),
        "disconnected from gateway"
    );
}

async fn authenticate(
    gateway: &Gateway,
    token: String,
) -> Result<parley_types::models::UserIdentity, GatewayError> {
    let authenticator = gateway.authenticator().clone();
    let identity = tokio::task::spawn_blocking(move || authenticator.authenticate(&token))
        .await
        .map_err(|e| AuthError::Lookup(format!("spawn_blocking join error: {}", e)))??;
    Ok(identity)
}

async fn handle_text(gateway: &Gateway, user_id: i64, text: &str) -> Result<(), GatewayError> {
    let frame = ClientFrame::parse(text)?;
    gateway.relay().handle_frame(user_id, frame).await
}

/// Frame-level failures never end the connection.
fn log_frame_error(user_id: i64, err: &GatewayError, raw: &str) {
    match err {
        GatewayError::MalformedFrame(_) => {
            warn!(user_id, "bad frame: {} -- raw: {}", err, &raw[..floor_char_boundary(raw, 200)]);
        }
        GatewayError::StorageFailure(_) => {
            // already logged by the relay
        }
        _ => warn!(user_id, "frame dropped: {}", err),
    }
}

fn floor_char_boundary(s: &str, max: usize) -> usize {
    if s.len() <= max {
        return s.len();
    }
    (0..=max).rev().find(|&i| s.is_char_boundary(i)).unwrap_or(0)
}

/// Drains the outbound queue into the socket and pings on a fixed interval.
/// Exits on cancellation, write failure or timeout, or two missed pongs, and
/// cancels `closer` on the way out so the reader stops too.
async fn write_loop<W>(
    mut sink: W,
    mut outbound_rx: mpsc::Receiver<ServerEvent>,
    closer: CancellationToken,
    pong_received: Arc<AtomicBool>,
    heartbeat_interval: Duration,
    write_timeout: Duration,
) where
    W: Sink<Message> + Unpin + Send + 'static,
    W::Error: Debug,
{
    let mut heartbeat = tokio::time::interval(heartbeat_interval);
    heartbeat.tick().await;
    let mut missed_heartbeats: u8 = 0;

    loop {
        let outgoing = tokio::select! {
            biased;
            _ = closer.cancelled() => {
                let _ = tokio::time::timeout(
                    write_timeout,
                    sink.send(close(close_code::NORMAL, "")),
                )
                .await;
                break;
            }
            event = outbound_rx.recv() => {
                let Some(event) = event else { break };
                match serde_json::to_string(&event) {
                    Ok(text) => Message::Text(text.into()),
                    Err(e) => {
                        error!("failed to serialize {} event: {}", event.kind(), e);
                        continue;
                    }
                }
            }
            _ = heartbeat.tick() => {
                if pong_received.swap(false, Ordering::Acquire) {
                    missed_heartbeats = 0;
                } else {
                    missed_heartbeats += 1;
                    if missed_heartbeats >= 2 {
                        warn!("Heartbeat timeout (missed {} pongs), dropping connection", missed_heartbeats);
                        break;
                    }
                }
                Message::Ping(Default::default())
            }
        };

        match tokio::time::timeout(write_timeout, sink.send(outgoing)).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                debug!("socket write failed: {:?}", e);
                break;
            }
            Err(_) => {
                warn!("socket write timed out after {:?}, dropping connection", write_timeout);
                break;
            }
        }
    }

    closer.cancel();
}

fn close(code: u16, reason: &'static str) -> Message {
    Message::Close(Some(CloseFrame {
        code,
        reason: reason.into(),
    }))
}

/// Runs the disconnect path exactly once per connection. `release` is the
/// normal route; if the connection future is dropped first, `Drop` hands the
/// cleanup to the runtime instead.
struct PresenceGuard {
    presence: PresenceTracker,
    user_id: i64,
    conn_id: Uuid,
    armed: bool,
}

impl PresenceGuard {
    fn new(presence: PresenceTracker, user_id: i64, conn_id: Uuid) -> Self {
        Self {
            presence,
            user_id,
            conn_id,
            armed: true,
        }
    }

    /// Disarms first and runs the cleanup on its own task, so cancelling the
    /// caller part-way cannot leave the user evicted but never announced.
    async fn release(mut self) {
        self.armed = false;
        let cleanup = tokio::spawn(disconnect(self.presence.clone(), self.user_id, self.conn_id));
        if let Err(e) = cleanup.await {
            error!(user_id = self.user_id, conn_id = %self.conn_id, "disconnect cleanup failed: {}", e);
        }
    }
}

async fn disconnect(presence: PresenceTracker, user_id: i64, conn_id: Uuid) -> bool {
    presence.on_disconnect(user_id, conn_id).await
}

impl Drop for PresenceGuard {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        let (user_id, conn_id) = (self.user_id, self.conn_id);
        match tokio::runtime::Handle::try_current() {
            Ok(rt) => {
                rt.spawn(disconnect(self.presence.clone(), user_id, conn_id));
            }
            Err(_) => error!(user_id, %conn_id, "no runtime to run disconnect cleanup"),
        }
    }
}
