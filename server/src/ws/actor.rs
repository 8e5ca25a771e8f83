use axum::extract::ws::{CloseFrame, Message, WebSocket};
use futures_util::{SinkExt, StreamExt};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::{interval, timeout};

use crate::bus::{new_connection_id, ConnectionId, ConnectionSender, GroupName, SharedBus};
use crate::db::models::UserRef;
use crate::state::AppState;
use crate::ws::protocol::{self, ServerFrame};

/// Ping interval: server sends WebSocket ping every 30 seconds.
const PING_INTERVAL: Duration = Duration::from_secs(30);

/// Pong timeout: if pong not received within 10 seconds after ping, close.
const PONG_TIMEOUT: Duration = Duration::from_secs(10);

/// Keepalive timing for live connections.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Heartbeat {
    pub ping_interval: Duration,
    pub pong_timeout: Duration,
}

impl Default for Heartbeat {
    fn default() -> Self {
        Self {
            ping_interval: PING_INTERVAL,
            pong_timeout: PONG_TIMEOUT,
        }
    }
}

/// Lifecycle of one connection. Frames are only handled through an
/// [`OpenConnection`], which exists only between join and leave.
pub enum ConnectionState {
    /// Authenticated, not yet registered on the bus
    Connecting { user: UserRef },
    Open(OpenConnection),
    Closed,
}

impl ConnectionState {
    /// Connecting -> Open: join the user's group. Other states are unchanged.
    pub fn open(self, bus: SharedBus, tx: ConnectionSender) -> Self {
        match self {
            ConnectionState::Connecting { user } => {
                ConnectionState::Open(OpenConnection::join(bus, user, tx))
            }
            other => other,
        }
    }

    /// Any state -> Closed. Leaving the group happens when the open
    /// connection is dropped.
    pub fn close(self) -> Self {
        ConnectionState::Closed
    }

    pub fn as_open(&self) -> Option<&OpenConnection> {
        match self {
            ConnectionState::Open(conn) => Some(conn),
            _ => None,
        }
    }
}

/// A connection registered in its user's group.
pub struct OpenConnection {
    pub user: UserRef,
    pub group: GroupName,
    pub connection_id: ConnectionId,
    tx: ConnectionSender,
    bus: SharedBus,
}

impl OpenConnection {
    fn join(bus: SharedBus, user: UserRef, tx: ConnectionSender) -> Self {
        let group = GroupName::for_user(user.id);
        let connection_id = new_connection_id();
        bus.join(&group, connection_id, tx.clone());

        Self {
            user,
            group,
            connection_id,
            tx,
            bus,
        }
    }

    /// Reply on this connection only.
    pub fn send(&self, frame: &ServerFrame) {
        if let Some(msg) = frame.to_ws_message() {
            let _ = self.tx.send(msg);
        }
    }
}

impl Drop for OpenConnection {
    // Runs on every exit path, including an aborted actor task
    fn drop(&mut self) {
        self.bus.leave(&self.group, self.connection_id);
    }
}

/// Run the actor-per-connection pattern for an authenticated WebSocket.
///
/// Splits the WebSocket into reader and writer halves:
/// - Writer task: owns the sink, forwards messages from an mpsc channel
/// - Reader loop: handles one inbound frame to completion before the next
///
/// The group bus holds a clone of the channel sender, so events published to
/// the user's group reach the writer without passing through the reader.
pub async fn run_connection(socket: WebSocket, state: AppState, user: UserRef) {
    let (ws_sender, mut ws_receiver) = socket.split();
    let (tx, rx) = mpsc::unbounded_channel::<Message>();

    let user_id = user.id;
    let mut conn_state = ConnectionState::Connecting { user }.open(state.bus.clone(), tx.clone());

    if let Some(conn) = conn_state.as_open() {
        tracing::info!(
            user_id = user_id,
            connection_id = %conn.connection_id,
            group = %conn.group,
            "WebSocket actor started"
        );
    }

    let writer_handle = tokio::spawn(writer_task(ws_sender, rx));

    // Track pong reception
    let (pong_tx, mut pong_rx) = mpsc::unbounded_channel::<()>();
    // Raised once when the peer stops answering pings
    let (dead_tx, mut dead_rx) = mpsc::channel::<()>(1);

    let heartbeat = state.heartbeat;
    let ping_tx = tx.clone();
    let ping_handle = tokio::spawn(async move {
        let mut ping_timer = interval(heartbeat.ping_interval);
        // Skip the first immediate tick
        ping_timer.tick().await;

        loop {
            ping_timer.tick().await;

            if ping_tx.send(Message::Ping(vec![1, 2, 3, 4].into())).is_err() {
                break;
            }

            match timeout(heartbeat.pong_timeout, pong_rx.recv()).await {
                Ok(Some(())) => {}
                _ => {
                    tracing::warn!(user_id = user_id, "Pong timeout, closing connection");
                    let _ = ping_tx.send(Message::Close(Some(CloseFrame {
                        code: 1001,
                        reason: "Pong timeout".into(),
                    })));
                    let _ = dead_tx.try_send(());
                    break;
                }
            }
        }
    });

    loop {
        // A silent peer never sends its close reply, so the reader cannot
        // wait on the socket alone
        let next = tokio::select! {
            next = ws_receiver.next() => next,
            Some(()) = dead_rx.recv() => {
                tracing::info!(user_id = user_id, "Dropping unresponsive connection");
                break;
            }
        };

        match next {
            Some(Ok(msg)) => match msg {
                Message::Text(text) => {
                    if let Some(conn) = conn_state.as_open() {
                        protocol::handle_text_message(text.as_str(), conn, &state).await;
                    }
                }
                Message::Binary(_) => {
                    tracing::debug!(user_id = user_id, "Ignoring binary frame");
                }
                Message::Pong(_) => {
                    let _ = pong_tx.send(());
                }
                Message::Ping(data) => {
                    let _ = tx.send(Message::Pong(data));
                }
                Message::Close(frame) => {
                    tracing::info!(
                        user_id = user_id,
                        reason = ?frame,
                        "Client initiated close"
                    );
                    break;
                }
            },
            Some(Err(e)) => {
                tracing::warn!(user_id = user_id, error = %e, "WebSocket receive error");
                break;
            }
            None => {
                tracing::info!(user_id = user_id, "WebSocket stream ended");
                break;
            }
        }
    }

    // Leave the group before tearing down the writer
    conn_state = conn_state.close();
    debug_assert!(conn_state.as_open().is_none());

    writer_handle.abort();
    ping_handle.abort();

    tracing::info!(user_id = user_id, "WebSocket actor stopped");
}

/// Writer task: receives messages from mpsc channel and forwards them to the WebSocket sink.
async fn writer_task(
    mut ws_sender: futures_util::stream::SplitSink<WebSocket, Message>,
    mut rx: mpsc::UnboundedReceiver<Message>,
) {
    while let Some(msg) = rx.recv().await {
        if ws_sender.send(msg).await.is_err() {
            break;
        }
    }
}
