//! Inbound message endpoint. Channel adapters post one message per request and
//! deliver whatever reply comes back.

use std::sync::Arc;

use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::post,
    Json, Router,
};
use fixdesk_agent::ConversationService;
use fixdesk_core::domain::reply::Reply;
use fixdesk_core::errors::InterfaceError;
use serde::{Deserialize, Serialize};
use tracing::error;
use uuid::Uuid;

#[derive(Clone)]
pub struct TurnState {
    service: Arc<ConversationService>,
}

#[derive(Clone, Debug, Deserialize)]
pub struct InboundMessage {
    pub channel: String,
    pub contact_handle: String,
    #[serde(default)]
    pub text: String,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct TurnResponse {
    pub conversation_id: String,
    pub reply: Option<Reply>,
    /// Plain rendering for channels without structured prompts.
    pub reply_text: Option<String>,
    pub paused: bool,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct ErrorBody {
    pub error: &'static str,
    pub correlation_id: String,
}

pub struct TurnError(InterfaceError);

impl IntoResponse for TurnError {
    fn into_response(self) -> Response {
        let status = match &self.0 {
            InterfaceError::BadRequest { .. } => StatusCode::BAD_REQUEST,
            InterfaceError::ServiceUnavailable { .. } => StatusCode::SERVICE_UNAVAILABLE,
            InterfaceError::Internal { .. } => StatusCode::INTERNAL_SERVER_ERROR,
        };
        let body = ErrorBody {
            error: self.0.user_message(),
            correlation_id: self.0.correlation_id().to_owned(),
        };
        (status, Json(body)).into_response()
    }
}

pub fn router(service: Arc<ConversationService>) -> Router {
    Router::new().route("/v1/turns", post(handle_turn)).with_state(TurnState { service })
}

pub async fn handle_turn(
    State(state): State<TurnState>,
    Json(message): Json<InboundMessage>,
) -> Result<Json<TurnResponse>, TurnError> {
    let correlation_id = Uuid::new_v4().to_string();
    let channel = message.channel.trim();
    let contact_handle = message.contact_handle.trim();
    if channel.is_empty() || contact_handle.is_empty() {
        return Err(TurnError(InterfaceError::BadRequest {
            message: "channel and contact_handle are required".to_owned(),
            correlation_id,
        }));
    }

    let outcome = state
        .service
        .handle_inbound(channel, contact_handle, &message.text)
        .await
        .map_err(|failure| {
            error!(
                event_name = "ingress.turn_failed",
                correlation_id = %correlation_id,
                channel,
                error = ?failure,
                "inbound message could not be handled"
            );
            TurnError(InterfaceError::ServiceUnavailable {
                message: failure.to_string(),
                correlation_id: correlation_id.clone(),
            })
        })?;

    Ok(Json(TurnResponse {
        conversation_id: outcome.conversation_id.0,
        reply_text: outcome.reply.as_ref().map(Reply::render_plain),
        reply: outcome.reply,
        paused: outcome.paused,
    }))
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use axum::body::{to_bytes, Body};
    use axum::http::{Request, StatusCode};
    use fixdesk_agent::{AgentRuntime, Collaborators, ConversationService, RuntimeSettings, Services};
    use fixdesk_core::lexicon::Lexicon;
    use fixdesk_db::InMemorySessionRepository;
    use serde_json::{json, Value};
    use tower::ServiceExt;

    use super::router;

    fn app() -> axum::Router {
        let services = Services::new(
            Arc::new(Lexicon::default()),
            RuntimeSettings::default().without_llm(),
            Collaborators::offline(),
        )
        .expect("services");
        let service = ConversationService::new(
            Arc::new(InMemorySessionRepository::default()),
            Arc::new(AgentRuntime::new(services)),
        );
        router(Arc::new(service))
    }

    async fn post(app: axum::Router, body: Value) -> (StatusCode, Value) {
        let response = app
            .oneshot(
                Request::post("/v1/turns")
                    .header("content-type", "application/json")
                    .body(Body::from(body.to_string()))
                    .expect("request"),
            )
            .await
            .expect("response");
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.expect("body");
        (status, serde_json::from_slice(&bytes).expect("json body"))
    }

    #[tokio::test]
    async fn replies_to_an_inbound_message() {
        let (status, body) = post(
            app(),
            json!({ "channel": "web", "contact_handle": "5511977776666", "text": "hello" }),
        )
        .await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["paused"], false);
        assert!(body["reply_text"].is_string());
        assert!(!body["conversation_id"].as_str().unwrap_or_default().is_empty());
    }

    #[tokio::test]
    async fn empty_text_yields_no_reply() {
        let (status, body) =
            post(app(), json!({ "channel": "web", "contact_handle": "c-1", "text": "   " })).await;

        assert_eq!(status, StatusCode::OK);
        assert!(body["reply"].is_null());
        assert!(body["reply_text"].is_null());
    }

    #[tokio::test]
    async fn rejects_blank_contact_handle() {
        let (status, body) =
            post(app(), json!({ "channel": "web", "contact_handle": " ", "text": "hi" })).await;

        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(body["correlation_id"].is_string());
        assert!(body["error"].as_str().unwrap_or_default().contains("Check inputs"));
    }

    #[tokio::test]
    async fn human_request_pauses_the_conversation() {
        let (status, body) = post(
            app(),
            json!({ "channel": "web", "contact_handle": "c-2", "text": "talk to a human" }),
        )
        .await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["paused"], true);
    }
}
