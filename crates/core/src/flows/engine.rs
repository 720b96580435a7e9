use thiserror::Error;

use crate::audit::{AuditCategory, AuditContext, AuditOutcome, AuditSink};
use crate::flows::states::{
    FlowAction, FlowContext, FlowEvent, FlowState, FlowType, TransitionOutcome,
};

pub trait FlowDefinition {
    fn flow_type(&self) -> FlowType;
    fn initial_state(&self) -> FlowState;
    fn transition(
        &self,
        current: &FlowState,
        event: &FlowEvent,
        context: &FlowContext,
    ) -> Result<TransitionOutcome, FlowTransitionError>;
}

/// Bot/human control of a conversation.
#[derive(Clone, Debug, Default)]
pub struct HandoffFlow;

impl FlowDefinition for HandoffFlow {
    fn flow_type(&self) -> FlowType {
        FlowType::Handoff
    }

    fn initial_state(&self) -> FlowState {
        FlowState::Active
    }

    fn transition(
        &self,
        current: &FlowState,
        event: &FlowEvent,
        context: &FlowContext,
    ) -> Result<TransitionOutcome, FlowTransitionError> {
        transition_handoff(current, event, context)
    }
}

pub struct FlowEngine<F> {
    flow: F,
}

impl<F> FlowEngine<F>
where
    F: FlowDefinition,
{
    pub fn new(flow: F) -> Self {
        Self { flow }
    }

    pub fn flow_type(&self) -> FlowType {
        self.flow.flow_type()
    }

    pub fn initial_state(&self) -> FlowState {
        self.flow.initial_state()
    }

    pub fn apply(
        &self,
        current: &FlowState,
        event: &FlowEvent,
        context: &FlowContext,
    ) -> Result<TransitionOutcome, FlowTransitionError> {
        self.flow.transition(current, event, context)
    }

    pub fn apply_with_audit<S>(
        &self,
        current: &FlowState,
        event: &FlowEvent,
        context: &FlowContext,
        sink: &S,
        audit: &AuditContext,
    ) -> Result<TransitionOutcome, FlowTransitionError>
    where
        S: AuditSink + ?Sized,
    {
        let result = self.apply(current, event, context);
        match &result {
            Ok(outcome) => {
                sink.emit(
                    audit
                        .event(
                            "handoff.transition_applied",
                            AuditCategory::Handoff,
                            AuditOutcome::Success,
                        )
                        .with_metadata("from", format!("{:?}", outcome.from))
                        .with_metadata("to", format!("{:?}", outcome.to))
                        .with_metadata("event", format!("{:?}", outcome.event)),
                );
            }
            Err(error) => {
                sink.emit(
                    audit
                        .event(
                            "handoff.transition_rejected",
                            AuditCategory::Handoff,
                            AuditOutcome::Rejected,
                        )
                        .with_metadata("error", error.to_string()),
                );
            }
        }
        result
    }
}

impl Default for FlowEngine<HandoffFlow> {
    fn default() -> Self {
        Self::new(HandoffFlow)
    }
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum FlowTransitionError {
    #[error("off-topic count {count} is below the handoff threshold {threshold}")]
    GuardNotSatisfied { count: u32, threshold: u32 },
    #[error("invalid transition from {state:?} using event {event:?}")]
    InvalidTransition { state: FlowState, event: FlowEvent },
}

fn transition_handoff(
    current: &FlowState,
    event: &FlowEvent,
    context: &FlowContext,
) -> Result<TransitionOutcome, FlowTransitionError> {
    use FlowAction::{NotifyOperator, PauseBot, ReplyHumanWillRespond, ResumeBot, SuggestHandoff};
    use FlowEvent::{HumanRequested, InboundMessage, OffTopicLimitReached, ResumeRequested};
    use FlowState::{Active, Paused};

    let (to, actions) = match (current, event) {
        (Active, HumanRequested) => {
            (Paused, vec![PauseBot, NotifyOperator, ReplyHumanWillRespond])
        }
        (Paused, HumanRequested) | (Paused, InboundMessage) => {
            (Paused, vec![ReplyHumanWillRespond])
        }
        (Active, OffTopicLimitReached) => {
            if context.off_topic_count < context.off_topic_threshold {
                return Err(FlowTransitionError::GuardNotSatisfied {
                    count: context.off_topic_count,
                    threshold: context.off_topic_threshold,
                });
            }
            // Suggestion only; the customer still has to ask for a human.
            (Active, vec![SuggestHandoff])
        }
        (Paused, ResumeRequested) => (Active, vec![ResumeBot]),
        (Active, InboundMessage) => (Active, Vec::new()),
        _ => {
            return Err(FlowTransitionError::InvalidTransition {
                state: current.clone(),
                event: event.clone(),
            });
        }
    };

    Ok(TransitionOutcome { from: current.clone(), to, event: event.clone(), actions })
}

#[cfg(test)]
mod tests {
    use crate::audit::{AuditContext, InMemoryAuditSink};
    use crate::domain::session::ConversationId;
    use crate::flows::engine::{FlowDefinition, FlowEngine, FlowTransitionError, HandoffFlow};
    use crate::flows::states::{FlowAction, FlowContext, FlowEvent, FlowState, FlowType};

    #[test]
    fn human_request_pauses_and_notifies() {
        let engine = FlowEngine::new(HandoffFlow);
        let outcome = engine
            .apply(&engine.initial_state(), &FlowEvent::HumanRequested, &FlowContext::default())
            .expect("active -> paused");

        assert_eq!(outcome.to, FlowState::Paused);
        assert_eq!(
            outcome.actions,
            vec![FlowAction::PauseBot, FlowAction::NotifyOperator, FlowAction::ReplyHumanWillRespond]
        );
    }

    #[test]
    fn paused_conversation_only_resumes_on_explicit_request() {
        let engine = FlowEngine::default();
        let context = FlowContext::default();

        let inbound = engine
            .apply(&FlowState::Paused, &FlowEvent::InboundMessage, &context)
            .expect("paused stays paused");
        assert_eq!(inbound.to, FlowState::Paused);
        assert_eq!(inbound.actions, vec![FlowAction::ReplyHumanWillRespond]);

        let resumed = engine
            .apply(&FlowState::Paused, &FlowEvent::ResumeRequested, &context)
            .expect("paused -> active");
        assert_eq!(resumed.to, FlowState::Active);
        assert_eq!(resumed.actions, vec![FlowAction::ResumeBot]);
    }

    #[test]
    fn off_topic_limit_suggests_without_pausing() {
        let engine = FlowEngine::default();
        let outcome = engine
            .apply(
                &FlowState::Active,
                &FlowEvent::OffTopicLimitReached,
                &FlowContext { off_topic_count: 3, off_topic_threshold: 3 },
            )
            .expect("threshold met");

        assert_eq!(outcome.to, FlowState::Active);
        assert_eq!(outcome.actions, vec![FlowAction::SuggestHandoff]);
    }

    #[test]
    fn off_topic_guard_rejects_below_threshold() {
        let engine = FlowEngine::default();
        let error = engine
            .apply(
                &FlowState::Active,
                &FlowEvent::OffTopicLimitReached,
                &FlowContext { off_topic_count: 2, off_topic_threshold: 3 },
            )
            .expect_err("below threshold");

        assert_eq!(error, FlowTransitionError::GuardNotSatisfied { count: 2, threshold: 3 });
    }

    #[test]
    fn resume_while_active_is_invalid() {
        let engine = FlowEngine::default();
        let error = engine
            .apply(&FlowState::Active, &FlowEvent::ResumeRequested, &FlowContext::default())
            .expect_err("nothing to resume");

        assert!(matches!(error, FlowTransitionError::InvalidTransition { .. }));
        assert_eq!(engine.flow_type(), FlowType::Handoff);
        assert_eq!(HandoffFlow.flow_type(), FlowType::Handoff);
    }

    #[test]
    fn flow_transition_emits_audit_event() {
        let engine = FlowEngine::default();
        let sink = InMemoryAuditSink::default();

        let _ = engine
            .apply_with_audit(
                &FlowState::Active,
                &FlowEvent::HumanRequested,
                &FlowContext::default(),
                &sink,
                &AuditContext::new(
                    Some(ConversationId("conv-9".to_owned())),
                    Some("whatsapp".to_owned()),
                    "req-42",
                    "handoff-controller",
                ),
            )
            .expect("transition should succeed");

        let events = sink.events();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].correlation_id, "req-42");
        assert_eq!(events[0].event_type, "handoff.transition_applied");
        assert_eq!(events[0].metadata.get("to").map(String::as_str), Some("Paused"));
    }
}
