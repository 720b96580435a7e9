use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};

use fixdesk_core::domain::reply::Reply;
use fixdesk_core::domain::session::{SessionState, SlotKey, StateChange, StatePatch};
use fixdesk_core::lexicon::{Lexicon, MatchText};

use crate::context::TurnContext;
use crate::pipeline::{Gate, GateOutcome};

fn has_scheduling_progress(state: &SessionState) -> bool {
    let flags = &state.flags;
    flags.accepted_service
        || flags.collecting_personal_data
        || flags.pending_time_selection
        || flags.quote_delivered
        || !state.offered_slots.is_empty()
}

/// Drops stale scheduling progress when the customer starts over.
///
/// Fires when progress exists, the message looks like a fresh conversation start
/// (greeting, equipment mention or generic complaint) without scheduling words,
/// and brand plus problem are not both known. The funnel then asks for them again.
pub fn reconcile(
    prior: &SessionState,
    text: &MatchText,
    lexicon: &Lexicon,
    now: DateTime<Utc>,
    ttl: Duration,
) -> Option<StatePatch> {
    if !has_scheduling_progress(prior) {
        return None;
    }
    let fresh_start = lexicon.is_greeting(text)
        || lexicon.family(text).is_some()
        || lexicon.is_generic_complaint(text);
    if !fresh_start || lexicon.mentions_scheduling(text) {
        return None;
    }
    let funnel_complete = prior.fresh_value(SlotKey::Brand, now, ttl).is_some()
        && prior.fresh_value(SlotKey::Problem, now, ttl).is_some();
    if funnel_complete {
        return None;
    }

    Some(
        StatePatch::new()
            .with(StateChange::ResetSchedulingProgress)
            .with(StateChange::SetAwaiting(None)),
    )
}

pub struct StateConsistencyGate;

#[async_trait]
impl Gate for StateConsistencyGate {
    fn name(&self) -> &'static str {
        "state_consistency"
    }

    async fn evaluate(&self, turn: &TurnContext<'_>) -> Result<GateOutcome> {
        let patch =
            reconcile(&turn.state, &turn.text, turn.lexicon(), turn.now, turn.settings().slot_ttl);
        Ok(match patch {
            Some(patch) => {
                tracing::info!(
                    event_name = "guardrail.scheduling_progress_reset",
                    correlation_id = %turn.audit.correlation_id,
                    "cleared stale scheduling progress"
                );
                GateOutcome::Continue(patch)
            }
            None => GateOutcome::pass(),
        })
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum GuardrailDecision {
    Allow,
    Replace { reason_code: &'static str, reply: Reply },
}

/// Last check on the outgoing reply: nothing may ask for personal data before the
/// customer accepted the service.
pub fn sanitize_reply(
    reply: &Reply,
    state: &SessionState,
    lexicon: &Lexicon,
    fallback: impl FnOnce() -> Reply,
) -> GuardrailDecision {
    if state.flags.accepted_service || state.flags.collecting_personal_data {
        return GuardrailDecision::Allow;
    }
    if !lexicon.requests_personal_data(&MatchText::new(reply.body())) {
        return GuardrailDecision::Allow;
    }
    GuardrailDecision::Replace { reason_code: "personal_data_before_acceptance", reply: fallback() }
}

#[cfg(test)]
mod tests {
    use chrono::{DateTime, Duration, TimeZone, Utc};

    use fixdesk_core::domain::reply::Reply;
    use fixdesk_core::domain::session::{FlagKey, SessionState, SlotKey, StateChange, StatePatch};
    use fixdesk_core::lexicon::{Lexicon, MatchText};

    use super::{reconcile, sanitize_reply, GuardrailDecision};

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 2, 10, 0, 0).single().expect("timestamp")
    }

    fn ttl() -> Duration {
        Duration::minutes(30)
    }

    fn accepted_without_brand() -> SessionState {
        let patch = StatePatch::new()
            .with(StateChange::SwitchEquipment("dishwasher".to_owned()))
            .with(StatePatch::set_flag(FlagKey::QuoteDelivered, true))
            .with(StatePatch::set_flag(FlagKey::AcceptedService, true))
            .with(StatePatch::set_flag(FlagKey::PendingTimeSelection, true));
        SessionState::default().apply(&patch, now())
    }

    fn run(state: &SessionState, text: &str) -> Option<StatePatch> {
        reconcile(state, &MatchText::new(text), &Lexicon::default(), now(), ttl())
    }

    #[test]
    fn greeting_over_stale_progress_resets_it_once() {
        let state = accepted_without_brand();
        let patch = run(&state, "oi, bom dia").expect("reset");
        let reset = state.apply(&patch, now());

        assert!(!reset.flags.accepted_service);
        assert!(!reset.flags.pending_time_selection);
        assert!(!reset.flags.quote_delivered);
        assert_eq!(run(&reset, "oi, bom dia"), None);
    }

    #[test]
    fn scheduling_words_keep_progress() {
        assert_eq!(run(&accepted_without_brand(), "hi, I want to schedule"), None);
    }

    #[test]
    fn complete_funnel_keeps_progress() {
        let state = accepted_without_brand().apply(
            &StatePatch::new()
                .with(StatePatch::set_slot(SlotKey::Brand, "Brastemp"))
                .with(StatePatch::set_slot(SlotKey::Problem, "leaking")),
            now(),
        );
        assert_eq!(run(&state, "hello"), None);
    }

    #[test]
    fn non_start_messages_are_ignored() {
        assert_eq!(run(&accepted_without_brand(), "2"), None);
        assert_eq!(run(&SessionState::default(), "hello"), None);
    }

    #[test]
    fn personal_data_request_before_acceptance_is_replaced() {
        let lexicon = Lexicon::default();
        let leaked = Reply::text("Great, please send your full name and CPF.");
        let decision = sanitize_reply(&leaked, &SessionState::default(), &lexicon, || {
            Reply::text("Which appliance needs service?")
        });

        assert_eq!(
            decision,
            GuardrailDecision::Replace {
                reason_code: "personal_data_before_acceptance",
                reply: Reply::text("Which appliance needs service?"),
            }
        );

        let accepted = accepted_without_brand();
        assert_eq!(
            sanitize_reply(&leaked, &accepted, &lexicon, || Reply::text("unused")),
            GuardrailDecision::Allow
        );
    }
}
