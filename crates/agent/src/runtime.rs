use anyhow::Result;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use fixdesk_core::audit::{AuditCategory, AuditContext, AuditOutcome};
use fixdesk_core::domain::reply::Reply;
use fixdesk_core::domain::session::{ConversationId, SessionState};
use fixdesk_core::lexicon::MatchText;

use crate::context::{Services, TurnContext};
use crate::funnel::next_question;
use crate::guardrails::{sanitize_reply, GuardrailDecision};
use crate::pipeline::Pipeline;

/// Shown when a turn fails outright; the prior state is kept.
pub const CLARIFYING_FALLBACK: &str = "Sorry, I didn't quite get that. Could you tell me which \
                                       appliance needs service and what is happening with it?";

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TurnResult {
    pub reply: Option<Reply>,
    pub next_state: SessionState,
    /// Gate that produced the reply, if any.
    pub gate: Option<&'static str>,
}

pub struct AgentRuntime {
    services: Services,
    pipeline: Pipeline,
}

impl AgentRuntime {
    pub fn new(services: Services) -> Self {
        Self::with_pipeline(services, Pipeline::default())
    }

    pub fn with_pipeline(services: Services, pipeline: Pipeline) -> Self {
        Self { services, pipeline }
    }

    pub fn services(&self) -> &Services {
        &self.services
    }

    /// Single entry point for one inbound message.
    pub async fn process_turn(
        &self,
        conversation_id: &ConversationId,
        contact_handle: &str,
        text: &str,
        prior: &SessionState,
    ) -> TurnResult {
        let audit = AuditContext::new(
            Some(conversation_id.clone()),
            None,
            Uuid::new_v4().to_string(),
            "agent",
        );
        self.process_turn_at(&audit, contact_handle, text, prior, Utc::now()).await
    }

    /// Same as [`AgentRuntime::process_turn`] with an explicit clock and audit context.
    pub async fn process_turn_at(
        &self,
        audit: &AuditContext,
        contact_handle: &str,
        text: &str,
        prior: &SessionState,
        now: DateTime<Utc>,
    ) -> TurnResult {
        let match_text = MatchText::new(text);
        if match_text.is_empty() {
            return TurnResult { reply: None, next_state: prior.clone(), gate: None };
        }

        let mut turn = TurnContext {
            services: &self.services,
            audit,
            contact_handle,
            raw_text: text,
            text: match_text,
            prior,
            state: prior.clone(),
            now,
        };

        let result = match self.run(&mut turn).await {
            Ok(result) => result,
            Err(error) => {
                tracing::error!(
                    event_name = "turn.failed",
                    correlation_id = %audit.correlation_id,
                    conversation_id = conversation_label(audit),
                    error = ?error,
                    "turn failed, replying with the clarifying fallback"
                );
                self.services.collaborators.audit.emit(
                    audit
                        .event("turn.failed", AuditCategory::System, AuditOutcome::Failed)
                        .with_metadata("error", error.to_string()),
                );
                TurnResult {
                    reply: Some(Reply::text(CLARIFYING_FALLBACK)),
                    next_state: prior.clone(),
                    gate: None,
                }
            }
        };

        self.services.collaborators.audit.emit(
            audit
                .event("turn.completed", AuditCategory::Ingress, AuditOutcome::Success)
                .with_metadata("gate", result.gate.unwrap_or("none")),
        );
        result
    }

    async fn run(&self, turn: &mut TurnContext<'_>) -> Result<TurnResult> {
        let outcome = self.pipeline.run(turn).await?;
        let turn: &TurnContext<'_> = turn;
        let next_state = turn.state.clone();

        let reply = outcome.reply.map(|reply| {
            let fallback = || {
                next_question(turn, &next_state)
                    .map(|(question, _)| question)
                    .unwrap_or_else(|| Reply::text(CLARIFYING_FALLBACK))
            };
            match sanitize_reply(&reply, &next_state, turn.lexicon(), fallback) {
                GuardrailDecision::Allow => reply,
                GuardrailDecision::Replace { reason_code, reply: replacement } => {
                    tracing::warn!(
                        event_name = "guardrail.reply_replaced",
                        correlation_id = %turn.audit.correlation_id,
                        conversation_id = conversation_label(turn.audit),
                        reason_code,
                        "outgoing reply replaced"
                    );
                    replacement
                }
            }
        });

        Ok(TurnResult { reply, next_state, gate: outcome.gate })
    }
}

fn conversation_label(audit: &AuditContext) -> &str {
    audit.conversation_id.as_ref().map(|id| id.0.as_str()).unwrap_or("-")
}
