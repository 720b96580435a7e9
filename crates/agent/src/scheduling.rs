//! Appointment offers, choice resolution and idempotent confirmation.

use anyhow::Result;
use async_trait::async_trait;
use regex::Regex;

use fixdesk_core::audit::{AuditCategory, AuditOutcome};
use fixdesk_core::domain::reply::{Reply, ReplyOption};
use fixdesk_core::domain::scheduling::{ConfirmedBooking, OfferedSlot, MAX_OFFERED_SLOTS};
use fixdesk_core::domain::session::{FlagKey, SessionState, StateChange, StatePatch};
use fixdesk_core::lexicon::{Lexicon, MatchText};

use crate::collaborators::{bounded, ConfirmRequest, CustomerContext, SCHEDULING};
use crate::context::TurnContext;
use crate::personal_data::ask_missing;
use crate::pipeline::{Gate, GateOutcome};

const OFFER_FALLBACK: &str = "I couldn't load the available times right now. Our team will \
                              contact you shortly to schedule, or you can write \"schedule\" \
                              again in a few minutes.";
const CONFIRM_FALLBACK: &str = "I couldn't confirm the booking right now. Please send your \
                                choice again in a moment.";

/// Maps a reply such as "2", "the second one", "afternoon" or "14h" to an offered slot.
#[derive(Clone, Debug)]
pub struct SlotChoiceResolver {
    time: Regex,
}

impl SlotChoiceResolver {
    pub fn new() -> Result<Self, regex::Error> {
        Ok(Self { time: Regex::new(r"\b([01]?\d|2[0-3])\s*(?::|h)\s*([0-5]\d)?\b")? })
    }

    /// Number, then ordinal, then period of day, then the nearest explicit time. A bare
    /// yes takes the first slot only when none of those is present. Greeting phrases are
    /// ignored, so "boa tarde" never picks the afternoon.
    pub fn resolve<'s>(
        &self,
        lexicon: &Lexicon,
        raw: &str,
        text: &MatchText,
        offered: &'s [OfferedSlot],
    ) -> Option<&'s OfferedSlot> {
        let by_index = |index: usize| offered.iter().find(|slot| usize::from(slot.index) == index);
        let text = lexicon.without_greetings(text);

        if let Some(number) = lexicon.option_number(&text) {
            return by_index(number);
        }
        if let Some(ordinal) = lexicon.ordinal(&text) {
            return by_index(usize::from(ordinal));
        }
        if let Some(period) = lexicon.period(&text) {
            return by_index(usize::from(period.slot_index()));
        }
        if let Some(slot) = self.nearest_by_time(raw, offered) {
            return Some(slot);
        }
        if lexicon.is_yes(&text) {
            return by_index(1);
        }
        None
    }

    fn nearest_by_time<'s>(&self, raw: &str, offered: &'s [OfferedSlot]) -> Option<&'s OfferedSlot> {
        let lowered = raw.to_lowercase();
        let captures = self.time.captures(&lowered)?;
        let hour: u32 = captures.get(1)?.as_str().parse().ok()?;
        let minute: u32 = captures.get(2).and_then(|minute| minute.as_str().parse().ok()).unwrap_or(0);
        let wanted = hour * 60 + minute;

        offered
            .iter()
            .filter_map(|slot| slot.minutes_of_day().map(|minutes| (minutes.abs_diff(wanted), slot)))
            .min_by_key(|(distance, slot)| (*distance, slot.index))
            .map(|(_, slot)| slot)
    }
}

pub struct Offer {
    pub reply: Reply,
    pub patch: StatePatch,
}

/// True once everything needed for an appointment is known and no newer booking exists.
pub fn ready_to_offer(state: &SessionState) -> bool {
    let booked_after_quote = match (&state.booking, &state.last_quote) {
        (Some(booking), Some(quote)) => booking.confirmed_at >= quote.quoted_at,
        (Some(_), None) => true,
        (None, _) => false,
    };
    state.flags.accepted_service
        && state.slots.missing_personal().is_empty()
        && !state.flags.pending_time_selection
        && state.offered_slots.is_empty()
        && !booked_after_quote
}

pub async fn offer(turn: &TurnContext<'_>, state: &SessionState) -> Offer {
    let collaborators = turn.collaborators();
    let customer = CustomerContext::from_state(turn.contact_handle, state);
    let result = bounded(
        SCHEDULING,
        turn.settings().scheduling_timeout,
        collaborators.scheduling.offer_slots(&customer),
    )
    .await;

    match result {
        Ok(offer) if !offer.slots.is_empty() => {
            let slots: Vec<OfferedSlot> = offer
                .slots
                .into_iter()
                .take(MAX_OFFERED_SLOTS)
                .enumerate()
                .map(|(position, slot)| OfferedSlot {
                    index: u8::try_from(position + 1).unwrap_or(u8::MAX),
                    ..slot
                })
                .collect();

            let intro = if offer.message.trim().is_empty() {
                "These are the next available times:"
            } else {
                offer.message.trim()
            };
            let reply = slot_prompt(
                &format!("{intro}\nReply with the number of the option that suits you best."),
                &slots,
            );

            collaborators.audit.emit(
                turn.audit
                    .event("scheduling.slots_offered", AuditCategory::Scheduling, AuditOutcome::Success)
                    .with_metadata("count", slots.len().to_string()),
            );

            let patch = StatePatch::new()
                .with(StateChange::ReplaceOfferedSlots(slots))
                .with(StatePatch::set_flag(FlagKey::PendingTimeSelection, true))
                .with(StatePatch::set_flag(FlagKey::CollectingPersonalData, false))
                .with(StateChange::SetAwaiting(None));
            Offer { reply, patch }
        }
        _ => {
            collaborators.audit.emit(turn.audit.event(
                "scheduling.offer_failed",
                AuditCategory::Scheduling,
                AuditOutcome::Failed,
            ));
            Offer { reply: Reply::text(OFFER_FALLBACK), patch: StatePatch::new() }
        }
    }
}

pub fn slot_prompt(text: &str, slots: &[OfferedSlot]) -> Reply {
    Reply::Options {
        text: text.to_owned(),
        options: slots
            .iter()
            .map(|slot| ReplyOption { id: slot.index.to_string(), text: slot.display() })
            .collect(),
    }
}

/// Same wording for a first confirmation and for any repeat of it.
fn confirmation_text(state: &SessionState, slot: &OfferedSlot) -> String {
    let service = state
        .last_quote
        .as_ref()
        .map(|quote| quote.service_type.label())
        .unwrap_or("service visit");
    format!(
        "All set! Your {service} is booked for {}. Our team will contact you on this number \
         before arriving. Thank you for choosing us!",
        slot.display()
    )
}

pub async fn confirm(turn: &TurnContext<'_>, slot: &OfferedSlot) -> GateOutcome {
    let state = &turn.state;
    let missing = state.slots.missing_personal();
    if let Some(first) = missing.first() {
        tracing::warn!(
            event_name = "scheduling.confirm_missing_data",
            correlation_id = %turn.audit.correlation_id,
            missing = missing.len(),
            "confirmation requested before personal data was complete"
        );
        let patch = StatePatch::new()
            .with(StatePatch::set_flag(FlagKey::AcceptedService, true))
            .with(StatePatch::set_flag(FlagKey::CollectingPersonalData, true))
            .with(StatePatch::set_flag(FlagKey::PendingTimeSelection, false))
            .with(StateChange::ReplaceOfferedSlots(Vec::new()))
            .with(StateChange::SetAwaiting(Some(*first)));
        return GateOutcome::Reply(ask_missing(&missing, false), patch);
    }

    let collaborators = turn.collaborators();
    let request = ConfirmRequest {
        phone: turn.contact_handle.to_owned(),
        choice: slot.index,
        starts_at: slot.starts_at,
        customer: CustomerContext::from_state(turn.contact_handle, state),
    };
    let result = bounded(
        SCHEDULING,
        turn.settings().scheduling_timeout,
        collaborators.scheduling.confirm(&request),
    )
    .await;

    match result {
        Ok(response) if response.status.is_success() => {
            let confirmation = confirmation_text(state, slot);
            collaborators.audit.emit(
                turn.audit
                    .event("scheduling.confirmed", AuditCategory::Scheduling, AuditOutcome::Success)
                    .with_metadata("choice", slot.index.to_string())
                    .with_metadata("status", format!("{:?}", response.status)),
            );
            let booking = ConfirmedBooking {
                slot_label: slot.display(),
                starts_at: slot.starts_at,
                confirmation: confirmation.clone(),
                confirmed_at: turn.now,
            };
            let patch = StatePatch::new()
                .with(StatePatch::set_flag(FlagKey::PendingTimeSelection, false))
                .with(StatePatch::set_flag(FlagKey::CollectingPersonalData, false))
                .with(StateChange::ReplaceOfferedSlots(Vec::new()))
                .with(StateChange::SetBooking(Some(booking)))
                .with(StateChange::SetAwaiting(None));
            GateOutcome::Reply(Reply::text(confirmation), patch)
        }
        Ok(response) => {
            collaborators.audit.emit(
                turn.audit
                    .event("scheduling.rejected", AuditCategory::Scheduling, AuditOutcome::Rejected)
                    .with_metadata("choice", slot.index.to_string())
                    .with_metadata("message", response.message),
            );
            let cleared = StatePatch::new()
                .with(StatePatch::set_flag(FlagKey::PendingTimeSelection, false))
                .with(StateChange::ReplaceOfferedSlots(Vec::new()));
            let working = state.apply(&cleared, turn.now);
            let reoffer = offer(turn, &working).await;
            let reply = match reoffer.reply {
                Reply::Options { text, options } => Reply::Options {
                    text: format!("That time is no longer available. {text}"),
                    options,
                },
                other => other,
            };
            let mut patch = cleared;
            patch.extend(reoffer.patch);
            GateOutcome::Reply(reply, patch)
        }
        Err(_) => GateOutcome::Reply(Reply::text(CONFIRM_FALLBACK), StatePatch::new()),
    }
}

/// Confirms a slot choice while offers are pending and answers questions about an
/// existing booking.
pub struct SchedulingChoiceGate;

#[async_trait]
impl Gate for SchedulingChoiceGate {
    fn name(&self) -> &'static str {
        "scheduling_choice"
    }

    async fn evaluate(&self, turn: &TurnContext<'_>) -> Result<GateOutcome> {
        let state = &turn.state;
        let lexicon = turn.lexicon();

        if state.flags.pending_time_selection && !state.offered_slots.is_empty() {
            let chosen = turn.services.slot_choice.resolve(
                lexicon,
                turn.raw_text,
                &turn.text,
                &state.offered_slots,
            );
            return Ok(match chosen {
                Some(slot) => confirm(turn, slot).await,
                None => GateOutcome::pass(),
            });
        }

        if let Some(booking) = &state.booking {
            let repeated_choice = state.offered_slots.is_empty()
                && !state.flags.pending_time_selection
                && lexicon.option_number(&turn.text).is_some_and(|number| number <= MAX_OFFERED_SLOTS);
            if lexicon.asks_visit_status(&turn.text) || repeated_choice {
                return Ok(GateOutcome::Reply(
                    Reply::text(booking.confirmation.clone()),
                    StatePatch::new(),
                ));
            }
        }

        Ok(GateOutcome::pass())
    }
}

/// Offers appointment times once the customer accepted and all data is known.
pub struct SchedulingOfferGate;

#[async_trait]
impl Gate for SchedulingOfferGate {
    fn name(&self) -> &'static str {
        "scheduling_offer"
    }

    async fn evaluate(&self, turn: &TurnContext<'_>) -> Result<GateOutcome> {
        if !ready_to_offer(&turn.state) {
            return Ok(GateOutcome::pass());
        }
        let offered = offer(turn, &turn.state).await;
        Ok(GateOutcome::Reply(offered.reply, offered.patch))
    }
}

#[cfg(test)]
mod tests {
    use chrono::DateTime;

    use fixdesk_core::domain::scheduling::OfferedSlot;
    use fixdesk_core::lexicon::{Lexicon, MatchText};

    use super::SlotChoiceResolver;

    fn offered() -> Vec<OfferedSlot> {
        ["09:00", "14:00", "19:00"]
            .iter()
            .enumerate()
            .map(|(position, time)| OfferedSlot {
                index: position as u8 + 1,
                starts_at: Some(
                    DateTime::parse_from_rfc3339(&format!("2026-03-03T{time}:00-03:00"))
                        .expect("timestamp"),
                ),
                label: None,
            })
            .collect()
    }

    fn resolve(raw: &str) -> Option<u8> {
        let lexicon = Lexicon::default();
        let resolver = SlotChoiceResolver::new().expect("pattern compiles");
        let slots = offered();
        resolver.resolve(&lexicon, raw, &MatchText::new(raw), &slots).map(|slot| slot.index)
    }

    #[test]
    fn number_period_and_time_all_pick_the_afternoon_slot() {
        assert_eq!(resolve("2"), Some(2));
        assert_eq!(resolve("opção 2"), Some(2));
        assert_eq!(resolve("afternoon"), Some(2));
        assert_eq!(resolve("14h"), Some(2));
        assert_eq!(resolve("can it be at 15:30?"), Some(2));
        assert_eq!(resolve("I want the afternoon"), Some(2));
        assert_eq!(resolve("pode ser à tarde"), Some(2));
        assert_eq!(resolve("sim, às 14h"), Some(2));
    }

    #[test]
    fn yes_with_a_period_takes_the_period() {
        assert_eq!(resolve("quero de noite"), Some(3));
        assert_eq!(resolve("yes, evening please"), Some(3));
        assert_eq!(resolve("pode ser"), Some(1));
    }

    #[test]
    fn greetings_do_not_pick_a_slot() {
        assert_eq!(resolve("boa tarde, tudo bem?"), None);
        assert_eq!(resolve("good evening"), None);
        assert_eq!(resolve("boa noite! pode ser de manhã"), Some(1));
    }

    #[test]
    fn ordinals_and_yes_words_resolve() {
        assert_eq!(resolve("the third one"), Some(3));
        assert_eq!(resolve("sim"), Some(1));
        assert_eq!(resolve("à noite"), Some(3));
    }

    #[test]
    fn equidistant_time_prefers_the_earlier_slot() {
        assert_eq!(resolve("11:30"), Some(1));
    }

    #[test]
    fn unrelated_text_and_out_of_range_numbers_do_not_resolve() {
        assert_eq!(resolve("what does the technician bring?"), None);
        assert_eq!(resolve("5"), None);
    }
}
