//! Shared harness: a full router on 127.0.0.1:0 over a temp data dir, with
//! direct store access for seeding users, properties and contracts.

#![allow(dead_code)]

use futures_util::stream::{SplitSink, SplitStream};
use futures_util::StreamExt;
use serde_json::Value;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};

use rentals_server::bus::memory::MemoryBus;
use rentals_server::bus::{GroupBus, SharedBus};
use rentals_server::db::DbPool;
use rentals_server::notifications::push::DisabledGateway;
use rentals_server::state::AppState;
use rentals_server::ws::actor::Heartbeat;

pub type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;
pub type WsWrite = SplitSink<WsStream, Message>;
pub type WsRead = SplitStream<WsStream>;

pub struct TestServer {
    pub base_url: String,
    pub addr: SocketAddr,
    pub db: DbPool,
    pub bus: SharedBus,
    pub client: reqwest::Client,
    jwt_secret: Vec<u8>,
    _data_dir: tempfile::TempDir,
}

impl TestServer {
    /// Start the server on a random port.
    pub async fn start() -> Self {
        Self::start_with(Duration::from_secs(5), Heartbeat::default()).await
    }

    /// Start with custom handshake and keepalive timing.
    pub async fn start_with(auth_timeout: Duration, heartbeat: Heartbeat) -> Self {
        let tmp_dir = tempfile::tempdir().expect("Failed to create temp dir");
        let data_dir = tmp_dir.path().to_str().unwrap().to_string();

        let db = rentals_server::db::init_db(&data_dir).expect("Failed to init DB");
        let jwt_secret = rentals_server::auth::jwt::load_or_generate_jwt_secret(&data_dir)
            .expect("Failed to generate JWT secret");
        let bus: SharedBus = Arc::new(MemoryBus::new());

        let state = AppState::new(
            db.clone(),
            jwt_secret.clone(),
            bus.clone(),
            Arc::new(DisabledGateway),
            auth_timeout,
        )
        .with_heartbeat(heartbeat);

        let app = rentals_server::routes::build_router(state);
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        tokio::spawn(async move {
            axum::serve(
                listener,
                app.into_make_service_with_connect_info::<SocketAddr>(),
            )
            .await
            .unwrap();
        });

        Self {
            base_url: format!("http://{}", addr),
            addr,
            db,
            bus,
            client: reqwest::Client::new(),
            jwt_secret,
            _data_dir: tmp_dir,
        }
    }

    pub fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    pub fn create_user(&self, name: &str) -> i64 {
        let conn = self.db.lock().unwrap();
        rentals_server::users::create_user(&conn, name, None).unwrap()
    }

    pub fn create_property(&self, owner_id: i64, title: &str, price_cents: i64) -> i64 {
        let conn = self.db.lock().unwrap();
        rentals_server::properties::create_property(&conn, owner_id, title, price_cents).unwrap()
    }

    pub fn create_contract(&self, property_id: i64, requester_id: i64) -> i64 {
        let conn = self.db.lock().unwrap();
        rentals_server::contracts::create_contract(&conn, property_id, requester_id).unwrap()
    }

    pub fn token(&self, user_id: i64) -> String {
        rentals_server::auth::jwt::issue_access_token(&self.jwt_secret, user_id).unwrap()
    }

    pub fn ws_url(&self, token: &str) -> String {
        format!("ws://{}/ws?token={}", self.addr, token)
    }

    pub fn message_count(&self) -> i64 {
        let conn = self.db.lock().unwrap();
        conn.query_row("SELECT COUNT(*) FROM messages", [], |row| row.get(0))
            .unwrap()
    }

    pub fn conversation_count(&self) -> i64 {
        let conn = self.db.lock().unwrap();
        conn.query_row("SELECT COUNT(*) FROM conversations", [], |row| row.get(0))
            .unwrap()
    }

    pub fn notification_count(&self, user_id: i64) -> i64 {
        let conn = self.db.lock().unwrap();
        conn.query_row(
            "SELECT COUNT(*) FROM notifications WHERE user_id = ?1",
            rusqlite::params![user_id],
            |row| row.get(0),
        )
        .unwrap()
    }

    /// Poll until `user_id` has at least `expected` notifications.
    /// Notifications are written by a background task.
    pub async fn wait_for_notifications(&self, user_id: i64, expected: i64) -> i64 {
        let mut count = 0;
        for _ in 0..50 {
            count = self.notification_count(user_id);
            if count >= expected {
                break;
            }
            tokio::time::sleep(Duration::from_millis(40)).await;
        }
        count
    }

    /// Open an authenticated WebSocket for `user_id`.
    pub async fn connect(&self, user_id: i64) -> (WsWrite, WsRead) {
        let (ws, _) = tokio_tungstenite::connect_async(self.ws_url(&self.token(user_id)))
            .await
            .expect("WebSocket connect failed");
        ws.split()
    }
}

/// Next JSON text frame, skipping control frames. `None` on timeout.
pub async fn next_json(read: &mut WsRead, wait: Duration) -> Option<Value> {
    let deadline = tokio::time::Instant::now() + wait;
    loop {
        let remaining = deadline.saturating_duration_since(tokio::time::Instant::now());
        match tokio::time::timeout(remaining, read.next()).await {
            Ok(Some(Ok(Message::Text(text)))) => {
                return Some(serde_json::from_str(text.as_str()).expect("frame is JSON"));
            }
            Ok(Some(Ok(Message::Ping(_)))) | Ok(Some(Ok(Message::Pong(_)))) => continue,
            _ => return None,
        }
    }
}

/// Wait until the server has registered `count` connections for `user_id`.
pub async fn wait_for_members(server: &TestServer, user_id: i64, count: usize) {
    let group = rentals_server::bus::GroupName::for_user(user_id);
    for _ in 0..50 {
        if server.bus.registry().member_count(&group) == count {
            return;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    panic!(
        "user {} has {} connections, expected {}",
        user_id,
        server.bus.registry().member_count(&group),
        count
    );
}
