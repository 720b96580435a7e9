//! Catch-all routing for messages no deterministic gate handled.
//!
//! The completion service classifies the message into a [`RoutingDecision`]; a
//! reply that is not valid JSON for that schema is discarded and the keyword
//! heuristics decide instead. Either way the decision is carried out through the
//! same handoff, scheduling and funnel helpers the other gates use.

use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use fixdesk_core::domain::reply::Reply;
use fixdesk_core::domain::session::{FlagKey, SessionState, SlotKey, StateChange, StatePatch};
use fixdesk_core::errors::CollaboratorError;
use fixdesk_core::lexicon::{Lexicon, MatchText};

use crate::collaborators::{bounded, KnowledgeContext, COMPLETION};
use crate::context::TurnContext;
use crate::funnel::next_question;
use crate::handoff::{self, with_text};
use crate::llm::{extract_json_object, ChatMessage, CompletionConfig};
use crate::personal_data::ask_missing;
use crate::pipeline::{Gate, GateOutcome};
use crate::quote::QUOTE_CTA;
use crate::scheduling::{self, slot_prompt};

pub const MAX_ANSWER_CHARS: usize = 600;
const KNOWLEDGE_LIMIT: usize = 3;
const CLOSING_QUESTION: &str = "Is there anything else I can help you with?";

const ROUTING_PROMPT: &str = "You route messages for the virtual assistant of an appliance \
repair and installation company. Classify the customer's last message and reply with one JSON \
object. Allowed shapes:
{\"action\": \"ask_next_question\"} when the message is about the service but needs no answer,
{\"action\": \"answer_question\", \"answer\": \"...\"} for a question about the service you can \
answer from the reference material (at most 600 characters, never quote prices or promise dates),
{\"action\": \"schedule\"} when the customer wants to book,
{\"action\": \"greeting\"} for a plain greeting,
{\"action\": \"request_human\"} when the customer asks for a person,
{\"action\": \"off_topic\"} for anything unrelated to appliance repair or installation.
Never ask for personal data.";

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum RoutingDecision {
    AskNextQuestion,
    AnswerQuestion { answer: String },
    OffTopic,
    RequestHuman,
    Schedule,
    Greeting,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum DecisionError {
    #[error("completion did not contain a JSON object")]
    MissingJson,
    #[error("decision does not match the schema: {0}")]
    Schema(String),
    #[error("answer must have between 1 and 600 characters")]
    InvalidAnswer,
}

pub fn parse_decision(raw: &str) -> Result<RoutingDecision, DecisionError> {
    let json = extract_json_object(raw).ok_or(DecisionError::MissingJson)?;
    let decision: RoutingDecision =
        serde_json::from_str(json).map_err(|error| DecisionError::Schema(error.to_string()))?;
    if let RoutingDecision::AnswerQuestion { answer } = &decision {
        let length = answer.trim().chars().count();
        if length == 0 || length > MAX_ANSWER_CHARS {
            return Err(DecisionError::InvalidAnswer);
        }
    }
    Ok(decision)
}

fn is_domain_related(lexicon: &Lexicon, text: &MatchText) -> bool {
    lexicon.family(text).is_some()
        || lexicon.symptom(text).is_some()
        || lexicon.brand(text).is_some()
        || lexicon.mount(text).is_some()
        || lexicon.is_generic_complaint(text)
        || lexicon.mentions_installation(text)
}

/// Keyword-only routing used when the completion path is disabled or fails.
pub fn heuristic_decision(lexicon: &Lexicon, text: &MatchText) -> RoutingDecision {
    if lexicon.is_human_request(text) {
        RoutingDecision::RequestHuman
    } else if lexicon.mentions_scheduling(text) {
        RoutingDecision::Schedule
    } else if lexicon.is_greeting(text) {
        RoutingDecision::Greeting
    } else if text.word_count() <= 2 || is_domain_related(lexicon, text) {
        RoutingDecision::AskNextQuestion
    } else {
        RoutingDecision::OffTopic
    }
}

/// Known non-personal facts, so the model never sees customer data.
fn state_summary(state: &SessionState) -> String {
    let value = |key: SlotKey| state.slots.value(key).unwrap_or("unknown");
    format!(
        "equipment: {}\nbrand: {}\nproblem: {}\nquote delivered: {}\nservice accepted: {}",
        state.equipment().map(|equipment| equipment.label()).unwrap_or_else(|| "unknown".to_owned()),
        value(SlotKey::Brand),
        value(SlotKey::Problem),
        state.flags.quote_delivered,
        state.flags.accepted_service,
    )
}

async fn ai_decision(turn: &TurnContext<'_>) -> Option<RoutingDecision> {
    let settings = turn.settings();
    let collaborators = turn.collaborators();
    let blocks = collaborators.knowledge.find_relevant_blocks(
        &collaborators.knowledge_blocks,
        turn.raw_text,
        &KnowledgeContext {
            equipment: turn.state.slots.value(SlotKey::Equipment).map(str::to_owned),
            limit: KNOWLEDGE_LIMIT,
        },
    );

    let mut system = format!("{ROUTING_PROMPT}\n\nWhat we know so far:\n{}", state_summary(&turn.state));
    if !blocks.is_empty() {
        system.push_str("\n\nReference material:");
        for block in &blocks {
            system.push_str(&format!("\n## {}\n{}", block.title, block.content));
        }
    }
    let config = CompletionConfig::json(settings.llm_model.clone(), 400);
    let messages = [ChatMessage::system(system), ChatMessage::user(turn.raw_text)];

    let raw = bounded(COMPLETION, settings.llm_timeout, async {
        collaborators
            .llm
            .complete(&config, &messages)
            .await
            .map_err(|error| CollaboratorError::unavailable(COMPLETION, error.to_string()))
    })
    .await
    .ok()?;

    match parse_decision(&raw) {
        Ok(decision) => Some(decision),
        Err(error) => {
            tracing::warn!(
                event_name = "routing.decision_rejected",
                correlation_id = %turn.audit.correlation_id,
                error = %error,
                "falling back to heuristic routing"
            );
            None
        }
    }
}

/// What to say next to move the conversation forward from `state`.
pub fn next_prompt(turn: &TurnContext<'_>, state: &SessionState) -> Reply {
    if let Some((reply, _)) = next_question(turn, state) {
        return reply;
    }
    if state.flags.quote_delivered && !state.flags.accepted_service {
        return Reply::text(format!("Would you like to book the service? {QUOTE_CTA}"));
    }
    if state.flags.accepted_service {
        let missing = state.slots.missing_personal();
        if !missing.is_empty() {
            return ask_missing(&missing, false);
        }
    }
    if state.flags.pending_time_selection && !state.offered_slots.is_empty() {
        return slot_prompt(
            "Which of these times works best for you? Reply with the number.",
            &state.offered_slots,
        );
    }
    Reply::text(CLOSING_QUESTION)
}

async fn execute(turn: &TurnContext<'_>, decision: &RoutingDecision) -> Result<GateOutcome> {
    let state = &turn.state;
    match decision {
        RoutingDecision::RequestHuman => handoff::request_human(turn),
        RoutingDecision::OffTopic => handoff::off_topic(turn),
        RoutingDecision::Greeting => {
            let prompt = next_prompt(turn, state);
            let text = format!("Hello! {}", prompt.body());
            Ok(GateOutcome::Reply(with_text(prompt, text), StatePatch::new()))
        }
        RoutingDecision::AskNextQuestion => {
            Ok(GateOutcome::Reply(next_prompt(turn, state), StatePatch::new()))
        }
        RoutingDecision::AnswerQuestion { answer } => {
            let prompt = next_prompt(turn, state);
            let text = format!("{}\n\n{}", answer.trim(), prompt.body());
            Ok(GateOutcome::Reply(with_text(prompt, text), StatePatch::new()))
        }
        RoutingDecision::Schedule => Ok(schedule(turn).await),
    }
}

async fn schedule(turn: &TurnContext<'_>) -> GateOutcome {
    let state = &turn.state;
    let mut patch = StatePatch::new();
    if state.flags.quote_delivered && !state.flags.accepted_service {
        patch.push(StatePatch::set_flag(FlagKey::AcceptedService, true));
    }
    let working = state.apply(&patch, turn.now);

    if scheduling::ready_to_offer(&working) {
        let offered = scheduling::offer(turn, &working).await;
        patch.extend(offered.patch);
        return GateOutcome::Reply(offered.reply, patch);
    }
    if working.flags.accepted_service {
        let missing = working.slots.missing_personal();
        if let Some(first) = missing.first() {
            patch.push(StatePatch::set_flag(FlagKey::CollectingPersonalData, true));
            patch.push(StateChange::SetAwaiting(Some(*first)));
            return GateOutcome::Reply(ask_missing(&missing, false), patch);
        }
    }

    let prompt = next_prompt(turn, &working);
    let reply = if next_question(turn, &working).is_some() {
        let text = format!("Happy to schedule! First I need a couple of details. {}", prompt.body());
        with_text(prompt, text)
    } else {
        prompt
    };
    GateOutcome::Reply(reply, patch)
}

pub struct AiRoutingGate;

#[async_trait]
impl Gate for AiRoutingGate {
    fn name(&self) -> &'static str {
        "ai_routing"
    }

    async fn evaluate(&self, turn: &TurnContext<'_>) -> Result<GateOutcome> {
        let inferred = if turn.settings().routing_enabled { ai_decision(turn).await } else { None };
        let source = if inferred.is_some() { "completion" } else { "heuristic" };
        let decision = inferred.unwrap_or_else(|| heuristic_decision(turn.lexicon(), &turn.text));
        tracing::debug!(
            event_name = "routing.decided",
            correlation_id = %turn.audit.correlation_id,
            source,
            decision = ?decision,
            "routing decision made"
        );

        let outcome = execute(turn, &decision).await?;
        if decision == RoutingDecision::OffTopic || turn.state.flags.off_topic_count == 0 {
            return Ok(outcome);
        }
        Ok(match outcome {
            GateOutcome::Continue(patch) => {
                GateOutcome::Continue(patch.with(StateChange::ResetOffTopic))
            }
            GateOutcome::Reply(reply, patch) => {
                GateOutcome::Reply(reply, patch.with(StateChange::ResetOffTopic))
            }
        })
    }
}
