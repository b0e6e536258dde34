//! Web server for the dashboard.
//!
//! Read-only REST endpoints over the message store plus a WebSocket that
//! relays newly stored messages as they arrive.

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        Path, Query, State,
    },
    http::StatusCode,
    response::{IntoResponse, Json, Response},
    routing::get,
    Router,
};
use chrono::{Duration, Utc};
use futures::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::broadcast;
use tower_http::cors::{Any, CorsLayer};
use tower_http::services::ServeDir;
use tracing::{debug, error, info, warn};

use crate::storage::{MessageQuery, MessageStore, StoreError, StoredMessage};

const CONVERSATION_PAGE: u32 = 200;
const SEARCH_LIMIT: u32 = 100;
const STATS_DAYS: i64 = 7;
const RANKING_LIMIT: u32 = 10;

/// Shared application state
pub struct AppState {
    pub store: MessageStore,
    /// Messages persisted by the ingestor, for live subscribers
    pub live_tx: broadcast::Sender<StoredMessage>,
    pub static_dir: Option<PathBuf>,
}

impl AppState {
    pub fn new(
        store: MessageStore,
        live_tx: broadcast::Sender<StoredMessage>,
        static_dir: Option<PathBuf>,
    ) -> Arc<Self> {
        Arc::new(Self {
            store,
            live_tx,
            static_dir,
        })
    }
}

/// Events sent to WebSocket clients
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum LiveEvent {
    NewMessage { message: StoredMessage },
}

#[derive(Debug, Deserialize)]
struct SearchParams {
    #[serde(default)]
    q: String,
}

pub fn create_router(state: Arc<AppState>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let static_dir = state.static_dir.clone();

    let router = Router::new()
        // API routes
        .route("/api/sessions", get(get_sessions))
        .route("/api/messages/:chat_id", get(get_messages))
        .route("/api/search", get(search_messages))
        .route("/api/stats/daily_frequency", get(daily_frequency))
        .route("/api/stats/user_ranking", get(user_ranking))
        .route(
            "/api/stats/message_type_distribution",
            get(message_type_distribution),
        )
        .route("/api/stats/hourly_activity", get(hourly_activity))
        .route("/api/stats/weekly_activity", get(weekly_activity))
        // WebSocket
        .route("/ws", get(websocket_handler));

    // Serve the dashboard's static files when configured
    let router = match static_dir {
        Some(dir) => router.fallback_service(ServeDir::new(dir)),
        None => router,
    };

    router.layer(cors).with_state(state)
}

/// Start the web server
pub async fn start_server(state: Arc<AppState>, host: &str, port: u16) -> anyhow::Result<()> {
    let addr: SocketAddr = format!("{}:{}", host, port).parse()?;
    let router = create_router(state);

    info!("Web server running at http://{}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, router).await?;

    Ok(())
}

fn store_error(what: &str, e: StoreError) -> Response {
    error!("Failed to {}: {}", what, e);
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(serde_json::json!({ "error": e.to_string() })),
    )
        .into_response()
}

fn respond<T: Serialize>(what: &str, result: Result<T, StoreError>) -> Response {
    match result {
        Ok(value) => Json(value).into_response(),
        Err(e) => store_error(what, e),
    }
}

// API Handlers

async fn get_sessions(State(state): State<Arc<AppState>>) -> Response {
    respond("list sessions", state.store.list_conversations())
}

async fn get_messages(
    State(state): State<Arc<AppState>>,
    Path(chat_id): Path<i64>,
) -> Response {
    respond(
        "get messages",
        state
            .store
            .query(&MessageQuery::chat(chat_id, CONVERSATION_PAGE)),
    )
}

async fn search_messages(
    State(state): State<Arc<AppState>>,
    Query(params): Query<SearchParams>,
) -> Response {
    if params.q.is_empty() {
        return (
            StatusCode::BAD_REQUEST,
            Json(serde_json::json!({ "error": "Query parameter 'q' is required" })),
        )
            .into_response();
    }

    respond("search messages", state.store.search(&params.q, SEARCH_LIMIT))
}

async fn daily_frequency(State(state): State<Arc<AppState>>) -> Response {
    let since = Utc::now() - Duration::days(STATS_DAYS);
    respond("get daily frequency", state.store.daily_counts(since))
}

async fn user_ranking(State(state): State<Arc<AppState>>) -> Response {
    let since = Utc::now() - Duration::days(STATS_DAYS);
    respond(
        "get user ranking",
        state.store.top_senders(since, RANKING_LIMIT),
    )
}

async fn message_type_distribution(State(state): State<Arc<AppState>>) -> Response {
    respond(
        "get message type distribution",
        state.store.media_distribution(),
    )
}

async fn hourly_activity(State(state): State<Arc<AppState>>) -> Response {
    respond("get hourly activity", state.store.hourly_activity())
}

async fn weekly_activity(State(state): State<Arc<AppState>>) -> Response {
    respond("get weekly activity", state.store.weekly_activity())
}

// WebSocket handler

async fn websocket_handler(
    ws: WebSocketUpgrade,
    State(state): State<Arc<AppState>>,
) -> impl IntoResponse {
    ws.on_upgrade(|socket| handle_websocket(socket, state))
}

async fn handle_websocket(socket: WebSocket, state: Arc<AppState>) {
    let (mut sender, mut receiver) = socket.split();

    // Subscribe to newly stored messages
    let mut rx = state.live_tx.subscribe();

    loop {
        tokio::select! {
            event = rx.recv() => {
                let message = match event {
                    Ok(message) => message,
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        warn!("WebSocket client lagged, skipped {} messages", skipped);
                        continue;
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                };

                let event = LiveEvent::NewMessage { message };
                if let Ok(json) = serde_json::to_string(&event) {
                    if sender.send(Message::Text(json)).await.is_err() {
                        break;
                    }
                }
            }

            msg = receiver.next() => {
                match msg {
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Ok(Message::Ping(data))) => {
                        let _ = sender.send(Message::Pong(data)).await;
                    }
                    _ => {}
                }
            }
        }
    }

    debug!("WebSocket client disconnected");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::tests::record;
    use axum::body::{to_bytes, Body};
    use axum::http::Request;
    use tower::ServiceExt;

    fn state() -> Arc<AppState> {
        let store = MessageStore::open_in_memory().unwrap();
        store.save(&record(100, 1, "hello world")).unwrap();
        store.save(&record(100, 2, "second")).unwrap();
        store.save(&record(200, 1, "other chat")).unwrap();
        let (live_tx, _) = broadcast::channel(16);
        AppState::new(store, live_tx, None)
    }

    async fn get_json(state: Arc<AppState>, uri: &str) -> (StatusCode, serde_json::Value) {
        let response = create_router(state)
            .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
            .await
            .unwrap();
        let status = response.status();
        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        (status, serde_json::from_slice(&body).unwrap())
    }

    #[tokio::test]
    async fn test_sessions() {
        let (status, body) = get_json(state(), "/api/sessions").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(
            body,
            serde_json::json!([
                { "id": 100, "title": "Chat 100" },
                { "id": 200, "title": "Chat 200" }
            ])
        );
    }

    #[tokio::test]
    async fn test_messages_for_chat() {
        let (status, body) = get_json(state(), "/api/messages/100").await;
        assert_eq!(status, StatusCode::OK);

        let messages = body.as_array().unwrap();
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0]["text"], "hello world");
        assert_eq!(messages[1]["text"], "second");
        assert_eq!(messages[0]["chat_id"], 100);
    }

    #[tokio::test]
    async fn test_search_requires_query() {
        let (status, body) = get_json(state(), "/api/search").await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(body["error"].is_string());

        let (status, _) = get_json(state(), "/api/search?q=").await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_search_matches() {
        let (status, body) = get_json(state(), "/api/search?q=chat").await;
        assert_eq!(status, StatusCode::OK);
        let results = body.as_array().unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0]["text"], "other chat");
    }

    #[tokio::test]
    async fn test_stats_endpoints_respond() {
        let (status, body) = get_json(state(), "/api/stats/message_type_distribution").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, serde_json::json!([{ "name": "Text", "value": 3 }]));

        let (status, body) = get_json(state(), "/api/stats/weekly_activity").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["counts"].as_array().unwrap().len(), 7);

        for uri in [
            "/api/stats/daily_frequency",
            "/api/stats/user_ranking",
            "/api/stats/hourly_activity",
        ] {
            let (status, body) = get_json(state(), uri).await;
            assert_eq!(status, StatusCode::OK, "{}", uri);
            assert!(body.is_array(), "{}", uri);
        }
    }

    #[test]
    fn test_live_event_shape() {
        let store = MessageStore::open_in_memory().unwrap();
        let id = store.save(&record(100, 1, "hello")).unwrap();
        let message = store.get_by_id(id).unwrap();

        let json = serde_json::to_value(LiveEvent::NewMessage { message }).unwrap();
        assert_eq!(json["type"], "new_message");
        assert_eq!(json["message"]["text"], "hello");
        assert_eq!(json["message"]["id"], id);
    }
}
