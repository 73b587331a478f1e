use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::anyhow;
use axum::{
    body::Body,
    http::{
        header::{AUTHORIZATION, CONTENT_TYPE},
        Method, Request, StatusCode,
    },
    response::Response,
    Router,
};
use futures_util::{SinkExt, StreamExt};
use http_body_util::BodyExt;
use serde_json::{json, Value};
use souk_auth::Authenticator;
use souk_config::{AuthConfig, DatabaseConfig, MessagingConfig};
use souk_conversations::{ConversationServices, SqliteConversationStore};
use souk_database::initialize_database;
use souk_gateway::{build_router, GatewayState};
use souk_realtime::{ChatHub, Principal, RoomMultiplexer, ServerEvent, SessionRegistry};
use sqlx::SqlitePool;
use tempfile::TempDir;
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio_tungstenite::{
    connect_async, tungstenite::Message as WsFrame, MaybeTlsStream, WebSocketStream,
};
use tower::ServiceExt;

type TestResult<T = ()> = anyhow::Result<T>;
type WsClient = WebSocketStream<MaybeTlsStream<TcpStream>>;

struct TestUser {
    principal: Principal,
    token: String,
}

struct TestContext {
    _temp_dir: TempDir,
    pool: SqlitePool,
    state: GatewayState,
    buyer: TestUser,
    owner: TestUser,
}

impl TestContext {
    async fn new() -> TestResult<Self> {
        Self::with_messaging(MessagingConfig::default()).await
    }

    async fn with_messaging(messaging: MessagingConfig) -> TestResult<Self> {
        let temp_dir = TempDir::new()?;
        let database = DatabaseConfig {
            url: format!("sqlite://{}", temp_dir.path().join("gateway.db").display()),
            max_connections: 4,
        };
        let pool = initialize_database(&database).await?;

        let authenticator = Authenticator::new(pool.clone(), AuthConfig::default());
        let buyer = create_user(&authenticator, "buyer@example.com").await?;
        let owner = create_user(&authenticator, "owner@example.com").await?;

        sqlx::query(
            "INSERT INTO listings (public_id, owner_id, title, price_cents, created_at, updated_at)
             VALUES ('bike', ?, 'Road bike', 45000, '2024-01-01T00:00:00Z', '2024-01-01T00:00:00Z')",
        )
        .bind(owner.principal.user_id)
        .execute(&pool)
        .await?;

        let store = Arc::new(SqliteConversationStore::new(pool.clone()));
        let services = ConversationServices::new(store, &messaging);
        let hub = ChatHub::new(
            services,
            SessionRegistry::new(RoomMultiplexer::new()),
            &messaging,
        );
        let state = GatewayState::new(authenticator, hub);

        Ok(Self {
            _temp_dir: temp_dir,
            pool,
            state,
            buyer,
            owner,
        })
    }

    fn router(&self) -> Router {
        build_router(self.state.clone())
    }

    async fn request(
        &self,
        method: Method,
        uri: &str,
        token: Option<&str>,
        body: Option<Value>,
    ) -> TestResult<Response> {
        let mut builder = Request::builder().method(method).uri(uri);
        if let Some(token) = token {
            builder = builder.header(AUTHORIZATION, format!("Bearer {token}"));
        }

        let request = match body {
            Some(body) => builder
                .header(CONTENT_TYPE, "application/json")
                .body(Body::from(body.to_string()))?,
            None => builder.body(Body::empty())?,
        };

        Ok(self.router().oneshot(request).await?)
    }

    async fn start_as_buyer(&self, message: &str) -> TestResult<Value> {
        let response = self
            .request(
                Method::POST,
                "/api/conversations",
                Some(&self.buyer.token),
                Some(json!({ "listing_id": "bike", "message": message })),
            )
            .await?;
        assert_eq!(response.status(), StatusCode::CREATED);
        read_json(response).await
    }

    async fn serve(&self) -> TestResult<SocketAddr> {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await?;
        let addr = listener.local_addr()?;
        let router = self.router();
        tokio::spawn(async move {
            let _ = axum::serve(listener, router).await;
        });
        Ok(addr)
    }
}

async fn create_user(authenticator: &Authenticator, email: &str) -> TestResult<TestUser> {
    let user = authenticator.create_user(email, Some("Tester")).await?;
    let session = authenticator.issue_session(user.id).await?;
    Ok(TestUser {
        principal: Principal {
            user_id: user.id,
            public_id: user.public_id,
        },
        token: session.token,
    })
}

async fn read_json(response: Response) -> TestResult<Value> {
    let bytes = response.into_body().collect().await?.to_bytes();
    Ok(serde_json::from_slice(&bytes)?)
}

async fn open_socket(addr: SocketAddr, token: &str) -> TestResult<WsClient> {
    let (socket, _) = connect_async(format!("ws://{addr}/ws?token={token}")).await?;
    Ok(socket)
}

async fn next_event(socket: &mut WsClient) -> TestResult<Value> {
    loop {
        let frame = tokio::time::timeout(Duration::from_secs(2), socket.next())
            .await?
            .ok_or_else(|| anyhow!("socket closed"))??;
        if let WsFrame::Text(text) = frame {
            return Ok(serde_json::from_str(&text)?);
        }
    }
}

async fn send_event(socket: &mut WsClient, event: Value) -> TestResult {
    socket.send(WsFrame::Text(event.to_string())).await?;
    Ok(())
}

#[tokio::test]
async fn health_reports_live_connections() -> TestResult {
    let ctx = TestContext::new().await?;

    let response = ctx.request(Method::GET, "/health", None, None).await?;
    assert_eq!(response.status(), StatusCode::OK);

    let body = read_json(response).await?;
    assert_eq!(body["status"], "ok");
    assert_eq!(body["connections"], 0);
    Ok(())
}

#[tokio::test]
async fn api_requires_a_valid_bearer_token() -> TestResult {
    let ctx = TestContext::new().await?;

    let missing = ctx
        .request(Method::GET, "/api/conversations", None, None)
        .await?;
    assert_eq!(missing.status(), StatusCode::UNAUTHORIZED);
    let body = read_json(missing).await?;
    assert_eq!(body["error"], "unauthorized");

    let invalid = ctx
        .request(Method::GET, "/api/conversations", Some("not-a-token"), None)
        .await?;
    assert_eq!(invalid.status(), StatusCode::UNAUTHORIZED);
    Ok(())
}

#[tokio::test]
async fn starting_twice_reuses_the_conversation() -> TestResult {
    let ctx = TestContext::new().await?;

    let first = ctx.start_as_buyer("Is this available?").await?;
    assert_eq!(first["created"], true);
    assert_eq!(first["message"]["content"], "Is this available?");
    assert_eq!(first["message"]["sender_id"], ctx.buyer.principal.public_id);
    assert_eq!(first["message"]["read"], false);

    let second = ctx.start_as_buyer("Still there?").await?;
    assert_eq!(second["created"], false);
    assert_eq!(second["conversation_id"], first["conversation_id"]);

    let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM conversations")
        .fetch_one(&ctx.pool)
        .await?;
    assert_eq!(count, 1);
    Ok(())
}

#[tokio::test]
async fn start_errors_map_to_status_codes() -> TestResult {
    let ctx = TestContext::new().await?;

    let own = ctx
        .request(
            Method::POST,
            "/api/conversations",
            Some(&ctx.owner.token),
            Some(json!({ "listing_id": "bike", "message": "Mine" })),
        )
        .await?;
    assert_eq!(own.status(), StatusCode::FORBIDDEN);
    assert_eq!(read_json(own).await?["error"], "forbidden");

    let unknown = ctx
        .request(
            Method::POST,
            "/api/conversations",
            Some(&ctx.buyer.token),
            Some(json!({ "listing_id": "missing", "message": "Hello" })),
        )
        .await?;
    assert_eq!(unknown.status(), StatusCode::NOT_FOUND);

    let empty = ctx
        .request(
            Method::POST,
            "/api/conversations",
            Some(&ctx.buyer.token),
            Some(json!({ "listing_id": "bike", "message": "   " })),
        )
        .await?;
    assert_eq!(empty.status(), StatusCode::BAD_REQUEST);
    assert_eq!(read_json(empty).await?["error"], "validation");

    let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM conversations")
        .fetch_one(&ctx.pool)
        .await?;
    assert_eq!(count, 0);
    Ok(())
}

#[tokio::test]
async fn rest_post_reaches_live_connections() -> TestResult {
    let ctx = TestContext::new().await?;
    let started = ctx.start_as_buyer("Is this available?").await?;
    let conversation_id = started["conversation_id"].as_str().unwrap_or_default().to_string();

    let (tx, mut inbox) = mpsc::channel(16);
    let buyer_connection = ctx.state.hub().connect(&ctx.buyer.principal, tx).await;
    assert!(matches!(inbox.recv().await, Some(ServerEvent::Hello { .. })));

    let response = ctx
        .request(
            Method::POST,
            &format!("/api/conversations/{conversation_id}/messages"),
            Some(&ctx.owner.token),
            Some(json!({ "content": "Yes, still available" })),
        )
        .await?;
    assert_eq!(response.status(), StatusCode::CREATED);
    let message = read_json(response).await?;
    assert_eq!(message["conversation_id"], conversation_id.as_str());

    match inbox.recv().await {
        Some(ServerEvent::MessageNotification {
            conversation_id: notified,
            message,
        }) => {
            assert_eq!(notified, conversation_id);
            assert_eq!(message.content, "Yes, still available");
        }
        other => panic!("expected a notification, got {other:?}"),
    }

    ctx.state.hub().disconnect(&buyer_connection).await;
    Ok(())
}

#[tokio::test]
async fn history_fetch_marks_incoming_messages_read() -> TestResult {
    let ctx = TestContext::new().await?;
    let started = ctx.start_as_buyer("Is this available?").await?;
    let conversation_id = started["conversation_id"].as_str().unwrap_or_default().to_string();

    let listed = read_json(
        ctx.request(Method::GET, "/api/conversations", Some(&ctx.owner.token), None)
            .await?,
    )
    .await?;
    let summary = &listed["conversations"][0];
    assert_eq!(summary["conversation_id"], conversation_id.as_str());
    assert_eq!(summary["listing"]["title"], "Road bike");
    assert_eq!(summary["other_participant"]["id"], ctx.buyer.principal.public_id);
    assert_eq!(summary["unread_count"], 1);

    let unread = read_json(
        ctx.request(Method::GET, "/api/conversations/unread", Some(&ctx.owner.token), None)
            .await?,
    )
    .await?;
    assert_eq!(unread["unread"], 1);

    let history = read_json(
        ctx.request(
            Method::GET,
            &format!("/api/conversations/{conversation_id}/messages?page=1"),
            Some(&ctx.owner.token),
            None,
        )
        .await?,
    )
    .await?;
    assert_eq!(history["page"], 1);
    assert_eq!(history["has_more"], false);
    assert_eq!(history["messages"][0]["content"], "Is this available?");
    assert_eq!(history["messages"][0]["read"], true);

    let unread = read_json(
        ctx.request(Method::GET, "/api/conversations/unread", Some(&ctx.owner.token), None)
            .await?,
    )
    .await?;
    assert_eq!(unread["unread"], 0);
    Ok(())
}

#[tokio::test]
async fn explicit_read_mark_is_idempotent_when_fetch_does_not_mark() -> TestResult {
    let ctx = TestContext::with_messaging(MessagingConfig {
        mark_read_on_fetch: false,
        ..MessagingConfig::default()
    })
    .await?;
    let started = ctx.start_as_buyer("Is this available?").await?;
    let conversation_id = started["conversation_id"].as_str().unwrap_or_default().to_string();
    let uri = format!("/api/conversations/{conversation_id}/read");

    let history = read_json(
        ctx.request(
            Method::GET,
            &format!("/api/conversations/{conversation_id}/messages"),
            Some(&ctx.owner.token),
            None,
        )
        .await?,
    )
    .await?;
    assert_eq!(history["messages"][0]["read"], false);

    let first = read_json(
        ctx.request(Method::PATCH, &uri, Some(&ctx.owner.token), None)
            .await?,
    )
    .await?;
    assert_eq!(first["conversation_id"], conversation_id.as_str());
    assert_eq!(first["updated"], 1);

    let second = read_json(
        ctx.request(Method::PATCH, &uri, Some(&ctx.owner.token), None)
            .await?,
    )
    .await?;
    assert_eq!(second["updated"], 0);
    Ok(())
}

#[tokio::test]
async fn outsiders_and_bad_pages_are_rejected() -> TestResult {
    let ctx = TestContext::new().await?;
    let started = ctx.start_as_buyer("Is this available?").await?;
    let conversation_id = started["conversation_id"].as_str().unwrap_or_default().to_string();
    let outsider = create_user(ctx.state.authenticator(), "outsider@example.com").await?;

    let forbidden = ctx
        .request(
            Method::POST,
            &format!("/api/conversations/{conversation_id}/messages"),
            Some(&outsider.token),
            Some(json!({ "content": "Let me in" })),
        )
        .await?;
    assert_eq!(forbidden.status(), StatusCode::FORBIDDEN);

    let messages: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM messages")
        .fetch_one(&ctx.pool)
        .await?;
    assert_eq!(messages, 1);

    let page_zero = ctx
        .request(
            Method::GET,
            &format!("/api/conversations/{conversation_id}/messages?page=0"),
            Some(&ctx.buyer.token),
            None,
        )
        .await?;
    assert_eq!(page_zero.status(), StatusCode::BAD_REQUEST);

    let missing = ctx
        .request(
            Method::PATCH,
            "/api/conversations/nope/read",
            Some(&ctx.buyer.token),
            None,
        )
        .await?;
    assert_eq!(missing.status(), StatusCode::NOT_FOUND);
    Ok(())
}

#[cfg(debug_assertions)]
#[tokio::test]
async fn openapi_document_is_served_in_debug_builds() -> TestResult {
    let ctx = TestContext::new().await?;

    let response = ctx
        .request(Method::GET, "/api-docs/openapi.json", None, None)
        .await?;
    assert_eq!(response.status(), StatusCode::OK);

    let document = read_json(response).await?;
    assert!(document["paths"]["/api/conversations"].is_object());
    Ok(())
}

#[tokio::test]
async fn websocket_rejects_missing_token_before_upgrade() -> TestResult {
    let ctx = TestContext::new().await?;
    let addr = ctx.serve().await?;

    match connect_async(format!("ws://{addr}/ws")).await {
        Err(tokio_tungstenite::tungstenite::Error::Http(response)) => {
            assert_eq!(response.status().as_u16(), 401);
        }
        Err(other) => panic!("unexpected handshake error: {other}"),
        Ok(_) => panic!("handshake without a token must fail"),
    }

    match connect_async(format!("ws://{addr}/ws?token=bogus")).await {
        Err(tokio_tungstenite::tungstenite::Error::Http(response)) => {
            assert_eq!(response.status().as_u16(), 401);
        }
        Err(other) => panic!("unexpected handshake error: {other}"),
        Ok(_) => panic!("handshake with an unknown token must fail"),
    }
    Ok(())
}

#[tokio::test]
async fn websocket_session_starts_a_conversation_and_notifies_owner() -> TestResult {
    let ctx = TestContext::new().await?;
    let addr = ctx.serve().await?;

    let mut owner = open_socket(addr, &ctx.owner.token).await?;
    let hello = next_event(&mut owner).await?;
    assert_eq!(hello["type"], "hello");
    assert_eq!(hello["user_id"], ctx.owner.principal.public_id);

    let mut buyer = open_socket(addr, &ctx.buyer.token).await?;
    assert_eq!(next_event(&mut buyer).await?["type"], "hello");

    send_event(&mut buyer, json!({ "type": "ping" })).await?;
    assert_eq!(next_event(&mut buyer).await?["type"], "pong");

    send_event(&mut buyer, json!({ "type": "shout" })).await?;
    let invalid = next_event(&mut buyer).await?;
    assert_eq!(invalid["type"], "error");
    assert_eq!(invalid["code"], "invalid_event");

    send_event(
        &mut buyer,
        json!({ "type": "send_message", "listing_id": "bike", "content": "Is this available?" }),
    )
    .await?;

    let joined = next_event(&mut buyer).await?;
    assert_eq!(joined["type"], "joined");
    let conversation_id = joined["conversation_id"].clone();

    let echoed = next_event(&mut buyer).await?;
    assert_eq!(echoed["type"], "new_message");
    assert_eq!(echoed["message"]["conversation_id"], conversation_id);

    let notification = next_event(&mut owner).await?;
    assert_eq!(notification["type"], "message_notification");
    assert_eq!(notification["conversation_id"], conversation_id);
    assert_eq!(notification["message"]["content"], "Is this available?");

    send_event(
        &mut owner,
        json!({ "type": "typing", "conversation_id": conversation_id }),
    )
    .await?;
    let denied = next_event(&mut owner).await?;
    assert_eq!(denied["type"], "error");
    assert_eq!(denied["code"], "forbidden");

    send_event(
        &mut owner,
        json!({ "type": "join_conversation", "conversation_id": conversation_id }),
    )
    .await?;
    assert_eq!(next_event(&mut owner).await?["type"], "joined");

    send_event(
        &mut owner,
        json!({ "type": "mark_read", "conversation_id": conversation_id }),
    )
    .await?;
    let read = next_event(&mut buyer).await?;
    assert_eq!(read["type"], "messages_read");
    assert_eq!(read["read_by"], ctx.owner.principal.public_id);

    send_event(
        &mut owner,
        json!({ "type": "typing", "conversation_id": conversation_id }),
    )
    .await?;
    let typing = next_event(&mut buyer).await?;
    assert_eq!(typing["type"], "user_typing");
    assert_eq!(typing["user_id"], ctx.owner.principal.public_id);

    Ok(())
}

#[tokio::test]
async fn closing_a_socket_unregisters_the_session() -> TestResult {
    let ctx = TestContext::new().await?;
    let addr = ctx.serve().await?;

    let mut buyer = open_socket(addr, &ctx.buyer.token).await?;
    assert_eq!(next_event(&mut buyer).await?["type"], "hello");
    assert_eq!(ctx.state.hub().registry().session_count().await, 1);

    buyer.close(None).await?;

    let registry = ctx.state.hub().registry().clone();
    let mut remaining = 1;
    for _ in 0..50 {
        remaining = registry.session_count().await;
        if remaining == 0 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    assert_eq!(remaining, 0);
    Ok(())
}
