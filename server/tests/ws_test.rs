//! Integration tests for the chat WebSocket: handshake auth, group
//! membership, message fan-out and frame validation.

mod common;

use common::{next_json, wait_for_members, TestServer};
use futures_util::SinkExt;
use rentals_server::bus::{BusEvent, GroupBus, GroupName};
use rentals_server::ws::actor::Heartbeat;
use serde_json::json;
use std::time::Duration;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::Message;

const WAIT: Duration = Duration::from_secs(2);
const QUIET: Duration = Duration::from_millis(300);

fn frame(value: serde_json::Value) -> Message {
    Message::Text(value.to_string().into())
}

/// HTTP status of a refused handshake.
async fn handshake_status<R>(request: R) -> u16
where
    R: IntoClientRequest + Unpin,
{
    match tokio_tungstenite::connect_async(request).await {
        Err(tokio_tungstenite::tungstenite::Error::Http(response)) => response.status().as_u16(),
        Err(e) => panic!("unexpected handshake error: {}", e),
        Ok(_) => panic!("handshake should have been refused"),
    }
}

#[tokio::test]
async fn test_ws_rejects_missing_and_invalid_token() {
    let server = TestServer::start().await;
    let user = server.create_user("Ana");

    let no_token = format!("ws://{}/ws", server.addr);
    assert!(tokio_tungstenite::connect_async(no_token).await.is_err());

    assert!(tokio_tungstenite::connect_async(server.ws_url("not-a-jwt"))
        .await
        .is_err());

    // Never joined, so nothing to leave either
    assert_eq!(
        server.bus.registry().member_count(&GroupName::for_user(user)),
        0
    );
}

#[tokio::test]
async fn test_ws_malformed_query_refused_as_unauthorized() {
    let server = TestServer::start().await;
    let user = server.create_user("Ana");
    let token = server.token(user);

    let repeated = format!("ws://{}/ws?token={}&token={}", server.addr, token, token);
    assert_eq!(handshake_status(repeated.clone()).await, 401);

    // The header still authenticates when the query cannot be read
    let mut request = repeated.into_client_request().unwrap();
    request.headers_mut().insert(
        "Authorization",
        format!("Bearer {}", token).parse().unwrap(),
    );
    let (_ws, _) = tokio_tungstenite::connect_async(request)
        .await
        .expect("bearer header should authenticate");
    wait_for_members(&server, user, 1).await;
}

#[tokio::test]
async fn test_ws_auth_timeout_refuses_upgrade() {
    let server = TestServer::start_with(Duration::from_millis(200), Heartbeat::default()).await;
    let user = server.create_user("Ana");

    // Stall the user lookup behind the store lock
    let db = server.db.clone();
    let (locked_tx, locked_rx) = tokio::sync::oneshot::channel();
    let holder = tokio::task::spawn_blocking(move || {
        let _guard = db.lock().unwrap();
        locked_tx.send(()).unwrap();
        std::thread::sleep(Duration::from_secs(1));
    });
    locked_rx.await.unwrap();

    assert_eq!(handshake_status(server.ws_url(&server.token(user))).await, 401);

    holder.await.unwrap();
    tokio::time::sleep(QUIET).await;
    assert_eq!(
        server.bus.registry().member_count(&GroupName::for_user(user)),
        0
    );
}

#[tokio::test]
async fn test_ws_rejects_token_for_unknown_user() {
    let server = TestServer::start().await;
    let token = server.token(4242);

    assert!(tokio_tungstenite::connect_async(server.ws_url(&token))
        .await
        .is_err());
    assert_eq!(
        server.bus.registry().member_count(&GroupName::for_user(4242)),
        0
    );
}

#[tokio::test]
async fn test_ws_accepts_bearer_header() {
    let server = TestServer::start().await;
    let user = server.create_user("Ana");

    let mut request = format!("ws://{}/ws", server.addr)
        .into_client_request()
        .unwrap();
    request.headers_mut().insert(
        "Authorization",
        format!("Bearer {}", server.token(user)).parse().unwrap(),
    );

    let (_ws, _) = tokio_tungstenite::connect_async(request)
        .await
        .expect("bearer header should authenticate");
    wait_for_members(&server, user, 1).await;
}

#[tokio::test]
async fn test_message_delivered_to_recipient_and_confirmed_to_sender() {
    let server = TestServer::start().await;
    let ana = server.create_user("Ana");
    let bruno = server.create_user("Bruno");

    let (mut ana_write, mut ana_read) = server.connect(ana).await;
    let (_bruno_write, mut bruno_read) = server.connect(bruno).await;
    wait_for_members(&server, bruno, 1).await;

    ana_write
        .send(frame(json!({"type": "message", "to": bruno, "text": "hi"})))
        .await
        .unwrap();

    let sent = next_json(&mut ana_read, WAIT).await.expect("message_sent");
    assert_eq!(sent["type"], "message_sent");
    assert_eq!(sent["message"]["text"], "hi");
    assert_eq!(sent["message"]["type"], "text");
    assert_eq!(sent["message"]["sender"]["id"], ana);
    assert_eq!(sent["message"]["sender"]["name"], "Ana");
    assert_eq!(sent["message"]["recipient"]["id"], bruno);

    let received = next_json(&mut bruno_read, WAIT).await.expect("message");
    assert_eq!(received["type"], "message");
    assert_eq!(received["message"], sent["message"]);

    // The sender is not in the recipient's group
    assert!(next_json(&mut ana_read, QUIET).await.is_none());

    // Conversation {ana, bruno} now holds the message
    let conversation = sent["message"]["conversation"].as_i64().unwrap();
    let history: Vec<serde_json::Value> = server
        .client
        .get(server.url(&format!("/api/messages?with_user={}", ana)))
        .bearer_auth(server.token(bruno))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(history.len(), 1);
    assert_eq!(history[0]["conversation"], conversation);

    // Recipient gets a notification whether or not they are connected
    assert_eq!(server.wait_for_notifications(bruno, 1).await, 1);
}

#[tokio::test]
async fn test_every_connection_of_recipient_receives_message() {
    let server = TestServer::start().await;
    let ana = server.create_user("Ana");
    let bruno = server.create_user("Bruno");

    let (mut ana_write, _ana_read) = server.connect(ana).await;
    let (_phone_write, mut phone_read) = server.connect(bruno).await;
    let (_laptop_write, mut laptop_read) = server.connect(bruno).await;
    wait_for_members(&server, bruno, 2).await;

    ana_write
        .send(frame(json!({"type": "message", "to": bruno, "text": "both devices"})))
        .await
        .unwrap();

    for read in [&mut phone_read, &mut laptop_read] {
        let received = next_json(read, WAIT).await.expect("message on each device");
        assert_eq!(received["message"]["text"], "both devices");
    }
}

#[tokio::test]
async fn test_messages_arrive_in_send_order() {
    let server = TestServer::start().await;
    let ana = server.create_user("Ana");
    let bruno = server.create_user("Bruno");

    let (mut ana_write, mut ana_read) = server.connect(ana).await;
    let (_bruno_write, mut bruno_read) = server.connect(bruno).await;
    wait_for_members(&server, bruno, 1).await;

    for i in 0..5 {
        ana_write
            .send(frame(json!({"type": "message", "to": bruno, "text": format!("m{}", i)})))
            .await
            .unwrap();
    }

    for i in 0..5 {
        let received = next_json(&mut bruno_read, WAIT).await.expect("message");
        assert_eq!(received["message"]["text"], format!("m{}", i));
        let sent = next_json(&mut ana_read, WAIT).await.expect("confirmation");
        assert_eq!(sent["message"]["text"], format!("m{}", i));
    }
}

#[tokio::test]
async fn test_invalid_frames_dropped_without_reply() {
    let server = TestServer::start().await;
    let ana = server.create_user("Ana");
    let bruno = server.create_user("Bruno");

    let (mut ana_write, mut ana_read) = server.connect(ana).await;
    wait_for_members(&server, ana, 1).await;

    // Missing recipient, empty text, unknown type, not JSON, binary
    ana_write
        .send(frame(json!({"type": "message", "text": "nobody"})))
        .await
        .unwrap();
    ana_write
        .send(frame(json!({"type": "message", "to": bruno, "text": ""})))
        .await
        .unwrap();
    ana_write
        .send(frame(json!({"type": "typing", "to": bruno})))
        .await
        .unwrap();
    ana_write
        .send(Message::Text("not json".into()))
        .await
        .unwrap();
    ana_write
        .send(Message::Binary(vec![1, 2, 3].into()))
        .await
        .unwrap();

    assert!(next_json(&mut ana_read, QUIET).await.is_none());
    assert_eq!(server.message_count(), 0);

    // Connection is still usable
    ana_write
        .send(frame(json!({"type": "message", "to": bruno, "text": "still here"})))
        .await
        .unwrap();
    let sent = next_json(&mut ana_read, WAIT).await.expect("message_sent");
    assert_eq!(sent["type"], "message_sent");
}

#[tokio::test]
async fn test_unknown_property_answered_with_error_to_sender_only() {
    let server = TestServer::start().await;
    let ana = server.create_user("Ana");
    let bruno = server.create_user("Bruno");

    let (mut ana_write, mut ana_read) = server.connect(ana).await;
    let (_bruno_write, mut bruno_read) = server.connect(bruno).await;
    wait_for_members(&server, bruno, 1).await;

    ana_write
        .send(frame(json!({
            "type": "message",
            "to": bruno,
            "message_type": "imovel",
            "data": {"imovel_id": 999}
        })))
        .await
        .unwrap();

    let reply = next_json(&mut ana_read, WAIT).await.expect("error frame");
    assert_eq!(reply["type"], "error");
    assert_eq!(reply["message"], "property not found");

    assert!(next_json(&mut bruno_read, QUIET).await.is_none());
    assert_eq!(server.message_count(), 0);
}

#[tokio::test]
async fn test_shared_property_message() {
    let server = TestServer::start().await;
    let ana = server.create_user("Ana");
    let bruno = server.create_user("Bruno");
    let property = server.create_property(ana, "Beach house", 250000);

    let (mut ana_write, mut ana_read) = server.connect(ana).await;
    ana_write
        .send(frame(json!({
            "type": "message",
            "to": bruno,
            "message_type": "imovel",
            "data": {"imovel_id": property}
        })))
        .await
        .unwrap();

    let sent = next_json(&mut ana_read, WAIT).await.expect("message_sent");
    assert_eq!(sent["type"], "message_sent");
    assert_eq!(sent["message"]["type"], "imovel");
    assert_eq!(sent["message"]["text"], "");
    assert_eq!(sent["message"]["data"]["imovel_id"], property);
}

#[tokio::test]
async fn test_disconnect_leaves_group() {
    let server = TestServer::start().await;
    let bruno = server.create_user("Bruno");
    let group = GroupName::for_user(bruno);

    let (mut write, read) = server.connect(bruno).await;
    wait_for_members(&server, bruno, 1).await;

    write.send(Message::Close(None)).await.unwrap();
    drop(write);
    drop(read);
    wait_for_members(&server, bruno, 0).await;

    // Publishing to the group now reaches nobody
    let delivered = server.bus.registry().deliver(
        &group,
        &BusEvent::Notification {
            notification: rentals_server::db::models::Notification {
                id: 1,
                user: bruno,
                property: None,
                message: "after close".to_string(),
                read: false,
                created_at: "2024-01-01T00:00:00.000000Z".to_string(),
            },
        },
    );
    assert_eq!(delivered, 0);
}

#[tokio::test]
async fn test_unresponsive_connection_leaves_group() {
    let heartbeat = Heartbeat {
        ping_interval: Duration::from_millis(100),
        pong_timeout: Duration::from_millis(200),
    };
    let server = TestServer::start_with(Duration::from_secs(5), heartbeat).await;
    let bruno = server.create_user("Bruno");

    // Both halves stay alive but the read half is never polled, so pings
    // are never answered and the close handshake never completes
    let (_write, _read) = server.connect(bruno).await;
    wait_for_members(&server, bruno, 1).await;

    tokio::time::sleep(Duration::from_millis(500)).await;
    wait_for_members(&server, bruno, 0).await;
}

#[tokio::test]
async fn test_storage_failure_answered_with_error_frame() {
    let server = TestServer::start().await;
    let ana = server.create_user("Ana");
    let bruno = server.create_user("Bruno");

    server
        .db
        .lock()
        .unwrap()
        .execute_batch(
            "CREATE TRIGGER reject_messages BEFORE INSERT ON messages
             BEGIN SELECT RAISE(ABORT, 'disk full'); END;",
        )
        .unwrap();

    let (mut ana_write, mut ana_read) = server.connect(ana).await;
    let (_bruno_write, mut bruno_read) = server.connect(bruno).await;
    wait_for_members(&server, bruno, 1).await;

    ana_write
        .send(frame(json!({"type": "message", "to": bruno, "text": "lost"})))
        .await
        .unwrap();

    let reply = next_json(&mut ana_read, WAIT).await.expect("error frame");
    assert_eq!(reply, json!({"type": "error", "message": "storage failure"}));
    assert!(next_json(&mut bruno_read, QUIET).await.is_none());

    // The conversation insert was rolled back with the message
    assert_eq!(server.conversation_count(), 0);
    assert_eq!(server.message_count(), 0);
    assert_eq!(server.notification_count(bruno), 0);
}

#[tokio::test]
async fn test_http_send_reaches_live_connection() {
    let server = TestServer::start().await;
    let ana = server.create_user("Ana");
    let bruno = server.create_user("Bruno");

    let (_bruno_write, mut bruno_read) = server.connect(bruno).await;
    wait_for_members(&server, bruno, 1).await;

    let resp = server
        .client
        .post(server.url("/api/messages"))
        .bearer_auth(server.token(ana))
        .json(&json!({"to": bruno, "text": "from http"}))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 201);

    let received = next_json(&mut bruno_read, WAIT).await.expect("message");
    assert_eq!(received["type"], "message");
    assert_eq!(received["message"]["text"], "from http");
}
