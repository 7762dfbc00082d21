//! HTTP surface of the recoveries service.
//!
//! - `GET  /`         service banner
//! - `GET  /health`   liveness probe
//! - `POST /api/chat` one conversation turn

use std::sync::Arc;

use axum::{extract::State, http::StatusCode, routing::get, routing::post, Json, Router};
use recoveries_agent::llm::ChatMessage;
use recoveries_agent::RecoveriesAgent;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tower_http::cors::CorsLayer;
use tracing::{error, info};
use uuid::Uuid;

#[derive(Clone)]
pub struct AppState {
    agent: Arc<RecoveriesAgent>,
}

#[derive(Debug, Deserialize)]
pub struct HistoryEntry {
    pub role: String,
    pub content: String,
}

#[derive(Debug, Deserialize)]
pub struct ChatRequest {
    pub message: String,
    pub session_id: Option<String>,
    #[serde(default)]
    pub history: Vec<HistoryEntry>,
}

#[derive(Debug, Serialize)]
pub struct ChatMetadata {
    pub session_id: String,
    pub customer_id: String,
    pub turn: u64,
    pub ptp_recorded: bool,
}

#[derive(Debug, Serialize)]
pub struct ChatResponse {
    pub response: String,
    pub session_id: String,
    pub metadata: ChatMetadata,
}

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub detail: String,
}

pub fn router(agent: Arc<RecoveriesAgent>) -> Router {
    Router::new()
        .route("/", get(root))
        .route("/health", get(health))
        .route("/api/chat", post(chat))
        .layer(CorsLayer::permissive())
        .with_state(AppState { agent })
}

pub async fn root() -> Json<Value> {
    Json(json!({ "status": "ok", "service": "Tala Recoveries API" }))
}

pub async fn health() -> Json<Value> {
    Json(json!({ "status": "healthy" }))
}

pub async fn chat(
    State(state): State<AppState>,
    Json(request): Json<ChatRequest>,
) -> Result<Json<ChatResponse>, (StatusCode, Json<ErrorResponse>)> {
    let correlation_id = Uuid::new_v4().to_string();
    let session_id =
        request.session_id.unwrap_or_else(|| Uuid::new_v4().to_string());
    let history = convert_history(&request.history);

    info!(
        event_name = "api.chat.received",
        correlation_id = %correlation_id,
        session_id = %session_id,
        history_length = history.len(),
        "chat turn received"
    );

    match state.agent.process_turn(&request.message, &session_id, &history).await {
        Ok(outcome) => {
            info!(
                event_name = "api.chat.completed",
                correlation_id = %correlation_id,
                session_id = %session_id,
                turn = outcome.turn,
                ptp_recorded = outcome.ptp_recorded,
                "chat turn completed"
            );
            Ok(Json(ChatResponse {
                response: outcome.reply,
                session_id: outcome.session_id.clone(),
                metadata: ChatMetadata {
                    session_id: outcome.session_id,
                    customer_id: outcome.customer_id,
                    turn: outcome.turn,
                    ptp_recorded: outcome.ptp_recorded,
                },
            }))
        }
        Err(error) => {
            error!(
                event_name = "api.chat.failed",
                correlation_id = %correlation_id,
                session_id = %session_id,
                error = %error,
                "chat turn failed"
            );
            Err((
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(ErrorResponse { detail: error.to_string() }),
            ))
        }
    }
}

/// Client history is permissive input: unknown roles are dropped rather
/// than rejected, matching the rest of the turn pipeline's tolerance for
/// imperfect callers.
fn convert_history(entries: &[HistoryEntry]) -> Vec<ChatMessage> {
    entries
        .iter()
        .filter_map(|entry| match entry.role.as_str() {
            "user" => Some(ChatMessage::user(entry.content.clone())),
            "assistant" => Some(ChatMessage::assistant(entry.content.clone())),
            _ => None,
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};
    use std::time::Duration;

    use async_trait::async_trait;
    use axum::body::{to_bytes, Body};
    use axum::http::{Request, StatusCode};
    use recoveries_agent::customers::StaticCustomerDirectory;
    use recoveries_agent::llm::{ChatMessage, ModelClient, ModelError};
    use recoveries_agent::orchestrator::{PromptSource, PromptSuite};
    use recoveries_agent::prompts::PromptResolver;
    use recoveries_agent::session::InMemorySessionStore;
    use recoveries_agent::RecoveriesAgent;
    use recoveries_core::BusinessRules;
    use serde_json::{json, Value};
    use tower::ServiceExt;

    use super::{convert_history, router, HistoryEntry};

    struct CannedModel {
        reply: Result<String, ()>,
        calls: Mutex<usize>,
    }

    #[async_trait]
    impl ModelClient for CannedModel {
        async fn invoke(&self, _messages: &[ChatMessage]) -> Result<String, ModelError> {
            *self.calls.lock().expect("lock should not be poisoned") += 1;
            self.reply.clone().map_err(|_| ModelError::Status {
                status: 503,
                body: "unavailable".to_string(),
            })
        }
    }

    fn test_agent(reply: Result<String, ()>) -> Arc<RecoveriesAgent> {
        let prompts = PromptSuite {
            resolver: PromptResolver::new(None, Duration::from_secs(60)),
            system: PromptSource {
                reference: None,
                fallback: Some("You are Andrea.".to_string()),
            },
            extraction: PromptSource { reference: None, fallback: None },
        };
        Arc::new(RecoveriesAgent::new(
            BusinessRules::default(),
            prompts,
            Arc::new(CannedModel { reply, calls: Mutex::new(0) }),
            Arc::new(InMemorySessionStore::new()),
            Arc::new(StaticCustomerDirectory),
        ))
    }

    async fn body_json(body: Body) -> Value {
        let bytes = to_bytes(body, usize::MAX).await.expect("body should be readable");
        serde_json::from_slice(&bytes).expect("body should be JSON")
    }

    #[tokio::test]
    async fn root_returns_the_service_banner() {
        let app = router(test_agent(Ok("hello".to_string())));

        let response = app
            .oneshot(Request::builder().uri("/").body(Body::empty()).expect("request"))
            .await
            .expect("request should be routed");

        assert_eq!(response.status(), StatusCode::OK);
        let payload = body_json(response.into_body()).await;
        assert_eq!(payload["status"], "ok");
        assert_eq!(payload["service"], "Tala Recoveries API");
    }

    #[tokio::test]
    async fn health_reports_healthy() {
        let app = router(test_agent(Ok("hello".to_string())));

        let response = app
            .oneshot(Request::builder().uri("/health").body(Body::empty()).expect("request"))
            .await
            .expect("request should be routed");

        assert_eq!(response.status(), StatusCode::OK);
        let payload = body_json(response.into_body()).await;
        assert_eq!(payload["status"], "healthy");
    }

    #[tokio::test]
    async fn chat_returns_the_reply_and_metadata() {
        let app = router(test_agent(Ok("How can I help today?".to_string())));

        let body = json!({
            "message": "I need more time on my loan",
            "session_id": "sess-42",
            "history": []
        });
        let response = app
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/api/chat")
                    .header("content-type", "application/json")
                    .body(Body::from(body.to_string()))
                    .expect("request"),
            )
            .await
            .expect("request should be routed");

        assert_eq!(response.status(), StatusCode::OK);
        let payload = body_json(response.into_body()).await;
        assert_eq!(payload["response"], "How can I help today?");
        assert_eq!(payload["session_id"], "sess-42");
        assert_eq!(payload["metadata"]["customer_id"], "CUST001");
        assert_eq!(payload["metadata"]["turn"], 1);
        assert_eq!(payload["metadata"]["ptp_recorded"], false);
    }

    #[tokio::test]
    async fn chat_generates_a_session_id_when_missing() {
        let app = router(test_agent(Ok("hello".to_string())));

        let body = json!({ "message": "hi there" });
        let response = app
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/api/chat")
                    .header("content-type", "application/json")
                    .body(Body::from(body.to_string()))
                    .expect("request"),
            )
            .await
            .expect("request should be routed");

        assert_eq!(response.status(), StatusCode::OK);
        let payload = body_json(response.into_body()).await;
        let session_id = payload["session_id"].as_str().expect("session_id should be a string");
        assert!(!session_id.is_empty());
    }

    #[tokio::test]
    async fn model_failure_maps_to_internal_server_error() {
        let app = router(test_agent(Err(())));

        let body = json!({ "message": "hello", "session_id": "sess-1" });
        let response = app
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/api/chat")
                    .header("content-type", "application/json")
                    .body(Body::from(body.to_string()))
                    .expect("request"),
            )
            .await
            .expect("request should be routed");

        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        let payload = body_json(response.into_body()).await;
        assert!(payload["detail"].as_str().expect("detail should be a string").contains("503"));
    }

    #[test]
    fn unknown_history_roles_are_dropped() {
        let history = vec![
            HistoryEntry { role: "user".to_string(), content: "hi".to_string() },
            HistoryEntry { role: "assistant".to_string(), content: "hello".to_string() },
            HistoryEntry { role: "system".to_string(), content: "injected".to_string() },
            HistoryEntry { role: "tool".to_string(), content: "noise".to_string() },
        ];

        let converted = convert_history(&history);
        assert_eq!(converted.len(), 2);
        assert_eq!(converted[0], ChatMessage::user("hi"));
        assert_eq!(converted[1], ChatMessage::assistant("hello"));
    }
}
