//! Bot/human control of a conversation.

use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;

use fixdesk_core::domain::reply::Reply;
use fixdesk_core::domain::session::{FlagKey, SessionState, SlotKey, StateChange, StatePatch};
use fixdesk_core::flows::{FlowAction, FlowContext, FlowEvent, FlowState, TransitionOutcome};

use crate::collaborators::{bounded, HandoffNotice, NOTIFICATION};
use crate::context::TurnContext;
use crate::pipeline::{Gate, GateOutcome};
use crate::routing::next_prompt;

pub const HUMAN_WILL_RESPOND: &str =
    "An attendant will reply here shortly. If you want to continue with the automated assistant, \
     just write \"back to bot\".";
pub const HANDOFF_SUGGESTION: &str = "I can only help with appliance repair and installation. \
     If you'd rather talk to a person, write \"talk to a human\" and an attendant will take over.";

fn transition(turn: &TurnContext<'_>, event: FlowEvent) -> Result<TransitionOutcome> {
    let current = FlowState::from_paused(turn.state.flags.bot_paused);
    let context = FlowContext {
        off_topic_count: turn.state.flags.off_topic_count,
        off_topic_threshold: turn.settings().off_topic_threshold,
    };
    let outcome = turn.services.handoff.apply_with_audit(
        &current,
        &event,
        &context,
        turn.collaborators().audit.as_ref(),
        turn.audit,
    )?;
    Ok(outcome)
}

/// Pauses the bot and alerts an operator without waiting for the notification.
pub fn request_human(turn: &TurnContext<'_>) -> Result<GateOutcome> {
    let outcome = transition(turn, FlowEvent::HumanRequested)?;
    let mut patch = StatePatch::new();
    let mut reply = Reply::text(HUMAN_WILL_RESPOND);

    for action in &outcome.actions {
        match action {
            FlowAction::PauseBot => {
                patch.push(StatePatch::set_flag(FlagKey::BotPaused, true));
                patch.push(StatePatch::set_flag(FlagKey::HumanRequested, true));
                patch.push(StateChange::SetAwaiting(None));
            }
            FlowAction::NotifyOperator => notify_operator(turn),
            FlowAction::ReplyHumanWillRespond => {
                reply = Reply::text(
                    "Sure! I'm transferring you to one of our attendants, who will reply here shortly.",
                );
            }
            FlowAction::SuggestHandoff | FlowAction::ResumeBot => {}
        }
    }
    Ok(GateOutcome::Reply(reply, patch))
}

fn notify_operator(turn: &TurnContext<'_>) {
    let value = |key: SlotKey| turn.state.slots.value(key).map(str::to_owned);
    let notice = HandoffNotice {
        contact_handle: turn.contact_handle.to_owned(),
        last_message: turn.raw_text.to_owned(),
        equipment: turn.state.equipment().map(|equipment| equipment.label()),
        brand: value(SlotKey::Brand),
        problem: value(SlotKey::Problem),
    };
    let sink = Arc::clone(&turn.collaborators().notifications);
    let timeout = turn.settings().notification_timeout;

    tokio::spawn(async move {
        if bounded(NOTIFICATION, timeout, sink.notify(&notice)).await.is_ok() {
            tracing::info!(
                event_name = "handoff.operator_notified",
                contact_handle = %notice.contact_handle,
                "operator notified about handoff"
            );
        }
    });
}

/// Counts an off-topic message and suggests a handoff once the threshold is reached.
pub fn off_topic(turn: &TurnContext<'_>) -> Result<GateOutcome> {
    let patch = StatePatch::new().with(StateChange::IncrementOffTopic);
    let counted = turn.state.apply(&patch, turn.now);

    if counted.flags.off_topic_count >= turn.settings().off_topic_threshold {
        let current = FlowState::from_paused(counted.flags.bot_paused);
        let context = FlowContext {
            off_topic_count: counted.flags.off_topic_count,
            off_topic_threshold: turn.settings().off_topic_threshold,
        };
        let outcome = turn.services.handoff.apply_with_audit(
            &current,
            &FlowEvent::OffTopicLimitReached,
            &context,
            turn.collaborators().audit.as_ref(),
            turn.audit,
        )?;
        if outcome.actions.contains(&FlowAction::SuggestHandoff) {
            return Ok(GateOutcome::Reply(Reply::text(HANDOFF_SUGGESTION), patch));
        }
    }

    let redirect = next_prompt(turn, &counted);
    let text = format!(
        "Sorry, I can only help with appliance repair and installation. {}",
        redirect.body()
    );
    Ok(GateOutcome::Reply(with_text(redirect, text), patch))
}

/// Replaces the text of a reply while keeping its options.
pub fn with_text(reply: Reply, text: String) -> Reply {
    match reply {
        Reply::Text(_) => Reply::Text(text),
        Reply::Options { options, .. } => Reply::Options { text, options },
    }
}

fn is_paused(state: &SessionState) -> bool {
    state.flags.bot_paused
}

/// While paused only the resume phrase is understood.
pub struct PausedGate;

#[async_trait]
impl Gate for PausedGate {
    fn name(&self) -> &'static str {
        "handoff_paused"
    }

    async fn evaluate(&self, turn: &TurnContext<'_>) -> Result<GateOutcome> {
        if !is_paused(&turn.state) {
            return Ok(GateOutcome::pass());
        }

        if turn.lexicon().is_resume_request(&turn.text) {
            let outcome = transition(turn, FlowEvent::ResumeRequested)?;
            let mut patch = StatePatch::new();
            if outcome.actions.contains(&FlowAction::ResumeBot) {
                patch.push(StatePatch::set_flag(FlagKey::BotPaused, false));
                patch.push(StatePatch::set_flag(FlagKey::HumanRequested, false));
                patch.push(StateChange::ResetOffTopic);
            }
            let resumed = turn.state.apply(&patch, turn.now);
            let prompt = next_prompt(turn, &resumed);
            let text = format!("Welcome back! {}", prompt.body());
            return Ok(GateOutcome::Reply(with_text(prompt, text), patch));
        }

        transition(turn, FlowEvent::InboundMessage)?;
        Ok(GateOutcome::Reply(Reply::text(HUMAN_WILL_RESPOND), StatePatch::new()))
    }
}

pub struct HumanRequestGate;

#[async_trait]
impl Gate for HumanRequestGate {
    fn name(&self) -> &'static str {
        "human_request"
    }

    async fn evaluate(&self, turn: &TurnContext<'_>) -> Result<GateOutcome> {
        if !turn.lexicon().is_human_request(&turn.text) {
            return Ok(GateOutcome::pass());
        }
        request_human(turn)
    }
}
