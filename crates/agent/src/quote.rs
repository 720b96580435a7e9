//! Quote composition and the acceptance step that follows it.

use anyhow::Result;
use async_trait::async_trait;

use fixdesk_core::audit::{AuditCategory, AuditOutcome};
use fixdesk_core::domain::equipment::{Equipment, Mount, Symptom};
use fixdesk_core::domain::quote::{CachedQuote, QuoteRequest, ServiceType};
use fixdesk_core::domain::reply::Reply;
use fixdesk_core::domain::session::{FlagKey, SessionState, SlotKey, StateChange, StatePatch};
use fixdesk_core::lexicon::MatchText;
use fixdesk_core::quoting::{possible_causes, ServicePolicyInput};

use crate::collaborators::{bounded, QUOTING};
use crate::context::TurnContext;
use crate::funnel::next_question;
use crate::pipeline::{Gate, GateOutcome};

pub const QUOTE_CTA: &str = "Reply yes to schedule.";
const HOLD_MESSAGE: &str = "No problem! The quote stays available for a while. Whenever you \
                            want to go ahead, just reply \"schedule\".";

/// Delivers a quote once the funnel is complete and handles the yes/no that follows.
pub struct QuoteGate;

#[async_trait]
impl Gate for QuoteGate {
    fn name(&self) -> &'static str {
        "quote"
    }

    async fn evaluate(&self, turn: &TurnContext<'_>) -> Result<GateOutcome> {
        let state = &turn.state;
        if state.flags.quote_delivered {
            return Ok(acceptance(turn));
        }
        if state.installation.as_ref().is_some_and(|progress| !progress.complete) {
            return Ok(GateOutcome::pass());
        }
        if next_question(turn, state).is_some() {
            return Ok(GateOutcome::pass());
        }
        let Some(request) = build_request(turn, state) else {
            return Ok(GateOutcome::pass());
        };

        let settings = turn.settings();
        if let Some(cached) = state
            .last_quote
            .as_ref()
            .filter(|quote| quote.is_valid_for(&request, turn.now, settings.quote_cache_ttl))
        {
            tracing::debug!(
                event_name = "quote.cache_hit",
                correlation_id = %turn.audit.correlation_id,
                equipment = %request.equipment,
                "re-presenting cached quote"
            );
            let patch = StatePatch::new()
                .with(StatePatch::set_flag(FlagKey::QuoteDelivered, true))
                .with(StateChange::SetAwaiting(None));
            return Ok(GateOutcome::Reply(quote_reply(turn, state, cached), patch));
        }

        Ok(request_quote(turn, state, request).await)
    }
}

fn acceptance(turn: &TurnContext<'_>) -> GateOutcome {
    let state = &turn.state;
    let lexicon = turn.lexicon();
    if state.flags.accepted_service {
        return GateOutcome::pass();
    }

    if lexicon.is_no(&turn.text) {
        return GateOutcome::Reply(Reply::text(HOLD_MESSAGE), StatePatch::new());
    }
    // A question about the quote is not an acceptance, whatever words it contains.
    if turn.raw_text.trim_end().ends_with('?') {
        return GateOutcome::pass();
    }
    if !lexicon.is_yes(&turn.text) && !lexicon.mentions_scheduling(&turn.text) {
        return GateOutcome::pass();
    }

    turn.collaborators().audit.emit(turn.audit.event(
        "quote.accepted",
        AuditCategory::Quoting,
        AuditOutcome::Success,
    ));
    GateOutcome::Continue(
        StatePatch::new()
            .with(StatePatch::set_flag(FlagKey::AcceptedService, true))
            .with(StatePatch::set_flag(FlagKey::CollectingPersonalData, true)),
    )
}

fn build_request(turn: &TurnContext<'_>, state: &SessionState) -> Option<QuoteRequest> {
    let equipment = state.equipment()?;
    let brand = turn.fresh(state, SlotKey::Brand)?.to_owned();
    let problem = turn.fresh(state, SlotKey::Problem)?.to_owned();
    let mount = state.slots.value(SlotKey::Mount).and_then(|value| value.parse::<Mount>().ok());
    let burner_count =
        state.slots.value(SlotKey::BurnerCount).and_then(|value| value.parse::<u8>().ok());
    let installation = state.installation.as_ref().is_some_and(|progress| progress.complete);
    let symptom = turn.lexicon().symptom(&MatchText::new(&problem)).unwrap_or(Symptom::Other);

    let service_type = turn.services.policy.service_type(&ServicePolicyInput {
        equipment,
        mount,
        burner_count,
        installation,
    });

    Some(QuoteRequest {
        equipment,
        brand,
        problem,
        symptom,
        mount,
        burner_count,
        power_type: state.slots.value(SlotKey::PowerType).map(str::to_owned),
        service_type,
    })
}

async fn request_quote(
    turn: &TurnContext<'_>,
    state: &SessionState,
    request: QuoteRequest,
) -> GateOutcome {
    let collaborators = turn.collaborators();
    let result = bounded(
        QUOTING,
        turn.settings().quoting_timeout,
        collaborators.quoting.build_quote(&request),
    )
    .await;

    let response = match result {
        Ok(Some(response)) => response,
        Ok(None) | Err(_) => return clarify(turn, state, &request),
    };
    let Some(amount) = response.amount() else {
        return clarify(turn, state, &request);
    };

    let installation = request.service_type == ServiceType::Installation
        || response.service_type == ServiceType::Installation;
    let causes = if installation {
        Vec::new()
    } else {
        let table = possible_causes(request.equipment.family, request.symptom);
        if table.is_empty() {
            response.causes.clone()
        } else {
            table
        }
    };
    let cached = CachedQuote {
        equipment: request.equipment.to_string(),
        brand: request.brand.clone(),
        symptom: request.symptom,
        amount,
        service_type: response.service_type,
        causes,
        quoted_at: turn.now,
    };

    collaborators.audit.emit(
        turn.audit
            .event("quote.delivered", AuditCategory::Quoting, AuditOutcome::Success)
            .with_metadata("equipment", cached.equipment.clone())
            .with_metadata("service_type", format!("{:?}", cached.service_type)),
    );

    let reply = quote_reply(turn, state, &cached);
    let patch = StatePatch::new()
        .with(StateChange::CacheQuote(cached))
        .with(StatePatch::set_flag(FlagKey::QuoteDelivered, true))
        .with(StateChange::SetAwaiting(None));
    GateOutcome::Reply(reply, patch)
}

fn clarify(turn: &TurnContext<'_>, state: &SessionState, request: &QuoteRequest) -> GateOutcome {
    turn.collaborators().audit.emit(
        turn.audit
            .event("quote.unavailable", AuditCategory::Quoting, AuditOutcome::Failed)
            .with_metadata("equipment", request.equipment.to_string()),
    );
    let label = state.equipment().map(|equipment| equipment.label()).unwrap_or_default();
    let reply = Reply::text(format!(
        "To give you an accurate price I need a bit more detail. What exactly happens with \
         your {label}? For example: does it turn on, make a noise or show an error code?"
    ));
    GateOutcome::Reply(reply, StatePatch::new().with(StateChange::SetAwaiting(Some(SlotKey::Problem))))
}

pub fn quote_reply(turn: &TurnContext<'_>, state: &SessionState, quote: &CachedQuote) -> Reply {
    let settings = turn.settings();
    let label = quote
        .equipment
        .parse::<Equipment>()
        .map(|equipment| equipment.label())
        .unwrap_or_else(|_| quote.equipment.clone());
    let brand = state.slots.value(SlotKey::Brand).map(|brand| format!("{brand} ")).unwrap_or_default();

    let mut lines = vec![
        format!("Here is the quote for your {brand}{label}:"),
        format!("- Service: {}", quote.service_type.label()),
        format!("- Price: {}", quote.amount.render(&settings.currency_symbol)),
    ];
    if !quote.causes.is_empty() {
        lines.push(format!("- Possible causes: {}", quote.causes.join("; ")));
    }
    lines.push(format!("- {}-day guarantee on the service", settings.guarantee_days));
    lines.push(String::new());
    lines.push(format!("Would you like to book it? {QUOTE_CTA}"));
    Reply::text(lines.join("\n"))
}
