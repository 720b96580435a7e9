//! HTTP clients for the collaborators, and the wiring that falls back to the
//! local implementations when one is not configured.

use std::sync::Arc;

use anyhow::{anyhow, bail, Context, Result};
use async_trait::async_trait;
use reqwest::{Client, RequestBuilder, Response, StatusCode};
use secrecy::{ExposeSecret, SecretString};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::{json, Value};
use tracing::warn;

use fixdesk_agent::collaborators::{
    ConfirmRequest, ConfirmResponse, ConfirmStatus, CustomerContext, HandoffNotice,
    NotificationSink, QuotingService, SchedulingService, SlotOffer, NOTIFICATION, QUOTING,
    SCHEDULING,
};
use fixdesk_agent::knowledge::TermOverlapLookup;
use fixdesk_agent::llm::{ChatMessage, ChatRole, CompletionConfig, LlmClient};
use fixdesk_agent::offline::{
    LogNotificationSink, OfflineSchedulingService, StaticQuotingService,
};
use fixdesk_agent::Collaborators;
use fixdesk_core::audit::TracingAuditSink;
use fixdesk_core::config::{AppConfig, LlmProvider};
use fixdesk_core::domain::quote::{QuoteRequest, QuoteResponse};
use fixdesk_core::errors::CollaboratorError;

const OPENAI_BASE_URL: &str = "https://api.openai.com";
const ANTHROPIC_BASE_URL: &str = "https://api.anthropic.com";
const ANTHROPIC_API_VERSION: &str = "2023-06-01";

fn endpoint(base_url: &str, path: &str) -> String {
    format!("{}/{}", base_url.trim_end_matches('/'), path.trim_start_matches('/'))
}

fn authorized(request: RequestBuilder, api_key: Option<&SecretString>) -> RequestBuilder {
    match api_key {
        Some(key) => request.bearer_auth(key.expose_secret()),
        None => request,
    }
}

async fn decode<T: DeserializeOwned>(collaborator: &'static str, response: Response) -> Result<T, CollaboratorError> {
    response
        .json::<T>()
        .await
        .map_err(|error| CollaboratorError::malformed(collaborator, error.to_string()))
}

async fn post_json<B: Serialize + ?Sized>(
    client: &Client,
    collaborator: &'static str,
    url: &str,
    api_key: Option<&SecretString>,
    body: &B,
) -> Result<Response, CollaboratorError> {
    authorized(client.post(url), api_key)
        .json(body)
        .send()
        .await
        .map_err(|error| CollaboratorError::unavailable(collaborator, error.to_string()))
}

fn unexpected_status(collaborator: &'static str, status: StatusCode) -> CollaboratorError {
    CollaboratorError::unavailable(collaborator, format!("unexpected status {status}"))
}

/// Chat completion over the provider's native API.
pub struct HttpCompletionClient {
    client: Client,
    provider: LlmProvider,
    base_url: String,
    api_key: Option<SecretString>,
    max_retries: u32,
}

impl HttpCompletionClient {
    pub fn new(client: Client, config: &AppConfig) -> Self {
        let llm = &config.llm;
        let default_base = match llm.provider {
            LlmProvider::OpenAi => OPENAI_BASE_URL,
            LlmProvider::Anthropic => ANTHROPIC_BASE_URL,
            LlmProvider::Ollama => "http://localhost:11434",
        };
        Self {
            client,
            provider: llm.provider,
            base_url: llm.base_url.clone().unwrap_or_else(|| default_base.to_owned()),
            api_key: llm.api_key.clone(),
            max_retries: llm.max_retries,
        }
    }

    fn request(&self, config: &CompletionConfig, messages: &[ChatMessage]) -> RequestBuilder {
        match self.provider {
            LlmProvider::OpenAi => {
                let mut body = json!({
                    "model": config.model,
                    "messages": messages,
                    "temperature": config.temperature,
                    "max_tokens": config.max_tokens,
                });
                if config.json_output {
                    body["response_format"] = json!({ "type": "json_object" });
                }
                authorized(
                    self.client.post(endpoint(&self.base_url, "v1/chat/completions")),
                    self.api_key.as_ref(),
                )
                .json(&body)
            }
            LlmProvider::Anthropic => {
                let system: Vec<&str> = messages
                    .iter()
                    .filter(|message| message.role == ChatRole::System)
                    .map(|message| message.content.as_str())
                    .collect();
                let conversation: Vec<&ChatMessage> =
                    messages.iter().filter(|message| message.role != ChatRole::System).collect();
                let body = json!({
                    "model": config.model,
                    "max_tokens": config.max_tokens,
                    "temperature": config.temperature,
                    "system": system.join("\n\n"),
                    "messages": conversation,
                });
                let mut request = self
                    .client
                    .post(endpoint(&self.base_url, "v1/messages"))
                    .header("anthropic-version", ANTHROPIC_API_VERSION);
                if let Some(key) = &self.api_key {
                    request = request.header("x-api-key", key.expose_secret());
                }
                request.json(&body)
            }
            LlmProvider::Ollama => {
                let mut body = json!({
                    "model": config.model,
                    "messages": messages,
                    "stream": false,
                    "options": { "temperature": config.temperature },
                });
                if config.json_output {
                    body["format"] = json!("json");
                }
                self.client.post(endpoint(&self.base_url, "api/chat")).json(&body)
            }
        }
    }

    fn content(&self, payload: &Value) -> Option<String> {
        let text = match self.provider {
            LlmProvider::OpenAi => payload.pointer("/choices/0/message/content")?.as_str()?.to_owned(),
            LlmProvider::Anthropic => payload
                .get("content")?
                .as_array()?
                .iter()
                .filter(|block| block.get("type").and_then(Value::as_str) == Some("text"))
                .filter_map(|block| block.get("text").and_then(Value::as_str))
                .collect::<Vec<_>>()
                .join(""),
            LlmProvider::Ollama => payload.pointer("/message/content")?.as_str()?.to_owned(),
        };
        Some(text)
    }
}

#[async_trait]
impl LlmClient for HttpCompletionClient {
    async fn complete(&self, config: &CompletionConfig, messages: &[ChatMessage]) -> Result<String> {
        let mut attempt = 0;
        loop {
            let outcome = self.request(config, messages).send().await;
            let retryable = match &outcome {
                Ok(response) => response.status().is_server_error(),
                Err(error) => error.is_connect() || error.is_timeout(),
            };
            if retryable && attempt < self.max_retries {
                attempt += 1;
                warn!(
                    event_name = "collaborator.completion_retry",
                    attempt,
                    "retrying completion request"
                );
                continue;
            }

            let response = outcome.context("completion request failed")?;
            let status = response.status();
            if !status.is_success() {
                bail!("completion endpoint returned {status}");
            }
            let payload: Value =
                response.json().await.context("failed to decode completion response")?;
            return self
                .content(&payload)
                .filter(|text| !text.trim().is_empty())
                .ok_or_else(|| anyhow!("completion response carried no text"));
        }
    }
}

/// `POST {base}/quotes`; a 404 means no price for this input.
pub struct HttpQuotingService {
    client: Client,
    base_url: String,
    api_key: Option<SecretString>,
}

impl HttpQuotingService {
    pub fn new(client: Client, base_url: String, api_key: Option<SecretString>) -> Self {
        Self { client, base_url, api_key }
    }
}

#[async_trait]
impl QuotingService for HttpQuotingService {
    async fn build_quote(
        &self,
        request: &QuoteRequest,
    ) -> Result<Option<QuoteResponse>, CollaboratorError> {
        let url = endpoint(&self.base_url, "quotes");
        let response = post_json(&self.client, QUOTING, &url, self.api_key.as_ref(), request).await?;
        match response.status() {
            StatusCode::NOT_FOUND => Ok(None),
            status if status.is_success() => {
                let quote: QuoteResponse = decode(QUOTING, response).await?;
                Ok(quote.found.then_some(quote))
            }
            status => Err(unexpected_status(QUOTING, status)),
        }
    }
}

/// `POST {base}/slots/offer` and `POST {base}/slots/confirm`; a 409 on confirm is a
/// repeat of an earlier confirmation.
pub struct HttpSchedulingService {
    client: Client,
    base_url: String,
    api_key: Option<SecretString>,
}

impl HttpSchedulingService {
    pub fn new(client: Client, base_url: String, api_key: Option<SecretString>) -> Self {
        Self { client, base_url, api_key }
    }
}

#[async_trait]
impl SchedulingService for HttpSchedulingService {
    async fn offer_slots(&self, customer: &CustomerContext) -> Result<SlotOffer, CollaboratorError> {
        let url = endpoint(&self.base_url, "slots/offer");
        let response = post_json(&self.client, SCHEDULING, &url, self.api_key.as_ref(), customer).await?;
        let status = response.status();
        if !status.is_success() {
            return Err(unexpected_status(SCHEDULING, status));
        }
        decode(SCHEDULING, response).await
    }

    async fn confirm(&self, request: &ConfirmRequest) -> Result<ConfirmResponse, CollaboratorError> {
        let url = endpoint(&self.base_url, "slots/confirm");
        let response = post_json(&self.client, SCHEDULING, &url, self.api_key.as_ref(), request).await?;
        match response.status() {
            StatusCode::CONFLICT => {
                Ok(ConfirmResponse { status: ConfirmStatus::Duplicate, message: String::new() })
            }
            StatusCode::UNPROCESSABLE_ENTITY => {
                let message = response.text().await.unwrap_or_default();
                Ok(ConfirmResponse { status: ConfirmStatus::Rejected, message })
            }
            status if status.is_success() => decode(SCHEDULING, response).await,
            status => Err(unexpected_status(SCHEDULING, status)),
        }
    }
}

/// Posts handoff notices to a webhook.
pub struct WebhookNotificationSink {
    client: Client,
    url: String,
}

impl WebhookNotificationSink {
    pub fn new(client: Client, url: String) -> Self {
        Self { client, url }
    }
}

#[async_trait]
impl NotificationSink for WebhookNotificationSink {
    async fn notify(&self, notice: &HandoffNotice) -> Result<(), CollaboratorError> {
        let response = post_json(&self.client, NOTIFICATION, &self.url, None, notice).await?;
        let status = response.status();
        if !status.is_success() {
            return Err(unexpected_status(NOTIFICATION, status));
        }
        Ok(())
    }
}

/// HTTP clients for what is configured, local implementations for the rest.
pub fn collaborators_from_config(config: &AppConfig) -> Collaborators {
    let client = Client::new();
    let mut collaborators = Collaborators::offline();
    collaborators.audit = Arc::new(TracingAuditSink);
    collaborators.knowledge = Arc::new(TermOverlapLookup);
    collaborators.llm = Arc::new(HttpCompletionClient::new(client.clone(), config));

    collaborators.quoting = match &config.quoting.base_url {
        Some(base_url) => Arc::new(HttpQuotingService::new(
            client.clone(),
            base_url.clone(),
            config.quoting.api_key.clone(),
        )),
        None => {
            warn!(
                event_name = "system.bootstrap.offline_collaborator",
                collaborator = QUOTING,
                "quoting.base_url is not set, using the built-in price table"
            );
            Arc::new(StaticQuotingService)
        }
    };

    collaborators.scheduling = match &config.scheduling.base_url {
        Some(base_url) => Arc::new(HttpSchedulingService::new(
            client.clone(),
            base_url.clone(),
            config.scheduling.api_key.clone(),
        )),
        None => {
            warn!(
                event_name = "system.bootstrap.offline_collaborator",
                collaborator = SCHEDULING,
                "scheduling.base_url is not set, offering generated slots"
            );
            Arc::new(OfflineSchedulingService::default())
        }
    };

    collaborators.notifications = match &config.notification.webhook_url {
        Some(url) => Arc::new(WebhookNotificationSink::new(client, url.clone())),
        None => {
            warn!(
                event_name = "system.bootstrap.offline_collaborator",
                collaborator = NOTIFICATION,
                "notification.webhook_url is not set, handoffs are only logged"
            );
            Arc::new(LogNotificationSink)
        }
    };

    collaborators
}
