//! Funnel tracking: equipment, brand and problem.
//!
//! The heuristic extractor runs first; the completion-backed extractor only fills
//! fields the heuristics left empty. Values already collected are never replaced by
//! inference unless the customer is answering that exact question or corrects
//! themselves.

use anyhow::Result;
use async_trait::async_trait;
use serde::Deserialize;

use fixdesk_core::ambiguity::{AmbiguityOutcome, EquipmentAmbiguityResolver};
use fixdesk_core::domain::equipment::{Equipment, EquipmentFamily, Mount};
use fixdesk_core::domain::reply::{Reply, ReplyOption};
use fixdesk_core::domain::session::{SessionState, SlotKey, StateChange, StatePatch};
use fixdesk_core::errors::CollaboratorError;
use fixdesk_core::lexicon::{Lexicon, MatchText};

use crate::collaborators::{bounded, COMPLETION};
use crate::context::TurnContext;
use crate::extractor::{problem_text, ExtractedSlots};
use crate::handoff::with_text;
use crate::llm::{extract_json_object, ChatMessage, CompletionConfig};
use crate::pipeline::{Gate, GateOutcome};
use crate::routing::next_prompt;

const GREETING: &str = "Hello! I'm the virtual assistant for appliance repair and installation.";
const EQUIPMENT_QUESTION: &str = "Which appliance needs service? We work with stoves, cooktops, \
                                  ovens, microwaves, range hoods, dishwashers, washing machines, \
                                  dryers, refrigerators and freezers.";
const MAX_FREE_BRAND_WORDS: usize = 3;
const MAX_FREE_BRAND_CHARS: usize = 40;

const EXTRACTION_PROMPT: &str = "You extract facts from a customer message sent to an appliance \
repair company. Reply with a single JSON object with the keys \"equipment\", \"brand\" and \
\"problem\". Use null for anything the message does not state. \"equipment\" is the appliance \
type in plain English, \"brand\" is the manufacturer exactly as written and \"problem\" is a \
short description of the defect. Do not guess.";

/// Runs the ambiguity resolver and turns its outcome into a gate decision.
pub struct EquipmentAmbiguityGate;

#[async_trait]
impl Gate for EquipmentAmbiguityGate {
    fn name(&self) -> &'static str {
        "equipment_ambiguity"
    }

    async fn evaluate(&self, turn: &TurnContext<'_>) -> Result<GateOutcome> {
        let resolver = EquipmentAmbiguityResolver::new(
            turn.lexicon(),
            turn.settings().disambiguation_cooldown,
        );
        let Some(outcome) = resolver.resolve(&turn.text, &turn.state, turn.now) else {
            return Ok(GateOutcome::pass());
        };

        Ok(match outcome {
            AmbiguityOutcome::Prompt { reply, mut patch } => {
                // Keep brand and problem given alongside the bare family.
                let family = turn.lexicon().family(&turn.text);
                let same_appliance = match (turn.state.equipment(), family) {
                    (None, _) => true,
                    (Some(known), Some(mentioned)) => known.family == mentioned,
                    (Some(_), None) => false,
                };
                if same_appliance {
                    let extracted = turn.services.extractor.extract(
                        turn.lexicon(),
                        turn.raw_text,
                        &turn.text,
                    );
                    if let Some(brand) = extracted.brand {
                        patch.push(StatePatch::set_slot(SlotKey::Brand, brand));
                    }
                    if let Some(problem) = extracted.problem {
                        patch.push(StatePatch::set_slot(SlotKey::Problem, problem));
                    }
                }
                patch.push(StateChange::SetAwaiting(Some(SlotKey::Equipment)));
                GateOutcome::Reply(reply, patch)
            }
            AmbiguityOutcome::Decline { reply } => GateOutcome::Reply(reply, StatePatch::new()),
            AmbiguityOutcome::Resolved { equipment, patch } => {
                tracing::debug!(
                    event_name = "ambiguity.resolved",
                    correlation_id = %turn.audit.correlation_id,
                    equipment = %equipment,
                    "equipment sub-type resolved"
                );
                GateOutcome::Continue(patch)
            }
            AmbiguityOutcome::Abandoned { patch } => GateOutcome::Continue(patch),
        })
    }
}

/// Merges extracted slots into state and asks the next unmet funnel question.
pub struct FunnelGate;

#[async_trait]
impl Gate for FunnelGate {
    fn name(&self) -> &'static str {
        "funnel"
    }

    async fn evaluate(&self, turn: &TurnContext<'_>) -> Result<GateOutcome> {
        let lexicon = turn.lexicon();
        let state = &turn.state;
        let mut patch = StatePatch::new();

        if let Some(target) = state.flags.pending_equipment_switch.clone() {
            match lexicon.affirmation(&turn.text) {
                Some(true) => {
                    patch.push(StateChange::SwitchEquipment(target));
                    let working = state.apply(&patch, turn.now);
                    return Ok(ask_or_continue(turn, &working, patch));
                }
                Some(false) => {
                    patch.push(StateChange::SetPendingEquipmentSwitch(None));
                    let working = state.apply(&patch, turn.now);
                    let current = state
                        .equipment()
                        .map(|equipment| equipment.label())
                        .unwrap_or_else(|| "appliance".to_owned());
                    let prompt = next_prompt(turn, &working);
                    let text = format!(
                        "No problem, we'll continue with your {current}. {}",
                        prompt.body()
                    );
                    return Ok(GateOutcome::Reply(with_text(prompt, text), patch));
                }
                None => patch.push(StateChange::SetPendingEquipmentSwitch(None)),
            }
        }

        let mut extracted = turn.services.extractor.extract(lexicon, turn.raw_text, &turn.text);
        if turn.settings().extraction_enabled && has_gaps(turn, &extracted) {
            if let Some(inferred) = ai_extract(turn).await {
                extracted.fill_missing(inferred);
            }
        }

        if let Some(candidate) = extracted.equipment() {
            if let Some(confirm) = merge_equipment(turn, candidate, &mut patch) {
                return Ok(GateOutcome::Reply(confirm, patch));
            }
        }

        let working = state.apply(&patch, turn.now);
        write_slots(turn, &working, &extracted, &mut patch);
        let before_reconfirm = patch.changes.len();
        reconfirm_stale(turn, &working, &extracted, &mut patch);
        if patch.changes.len() == before_reconfirm && extracted.is_empty() {
            take_awaited_free_text(turn, &working, &mut patch);
        }

        let working = state.apply(&patch, turn.now);
        invalidate_quote_on_change(state, &working, &mut patch);
        let working = state.apply(&patch, turn.now);

        let engaged = !extracted.is_empty()
            || lexicon.is_greeting(&turn.text)
            || lexicon.is_generic_complaint(&turn.text)
            || working != *turn.prior;
        if !engaged {
            return Ok(GateOutcome::Continue(patch));
        }
        Ok(ask_or_continue(turn, &working, patch))
    }
}

fn ask_or_continue(turn: &TurnContext<'_>, working: &SessionState, mut patch: StatePatch) -> GateOutcome {
    match next_question(turn, working) {
        Some((reply, key)) => {
            patch.push(StateChange::SetAwaiting(Some(key)));
            GateOutcome::Reply(reply, patch)
        }
        None => {
            if working.awaiting.is_some_and(|key| !key.is_personal()) {
                patch.push(StateChange::SetAwaiting(None));
            }
            GateOutcome::Continue(patch)
        }
    }
}

fn has_gaps(turn: &TurnContext<'_>, extracted: &ExtractedSlots) -> bool {
    if turn.text.word_count() < 2 || turn.lexicon().affirmation(&turn.text).is_some() {
        return false;
    }
    let state = &turn.state;
    (extracted.family.is_none() && state.equipment().is_none())
        || (extracted.brand.is_none() && turn.fresh(state, SlotKey::Brand).is_none())
        || (extracted.problem.is_none() && turn.fresh(state, SlotKey::Problem).is_none())
}

#[derive(Debug, Default, Deserialize)]
struct InferredSlots {
    #[serde(default)]
    equipment: Option<String>,
    #[serde(default)]
    brand: Option<String>,
    #[serde(default)]
    problem: Option<String>,
}

fn meaningful(value: Option<String>) -> Option<String> {
    value.map(|value| value.trim().to_owned()).filter(|value| {
        !value.is_empty()
            && !matches!(value.to_lowercase().as_str(), "null" | "none" | "unknown" | "n/a")
    })
}

/// Completion-backed extraction. Any failure just means no extra slots this turn.
async fn ai_extract(turn: &TurnContext<'_>) -> Option<ExtractedSlots> {
    let settings = turn.settings();
    let llm = &turn.collaborators().llm;
    let config = CompletionConfig::json(settings.llm_model.clone(), 200);
    let messages = [ChatMessage::system(EXTRACTION_PROMPT), ChatMessage::user(turn.raw_text)];

    let raw = bounded(COMPLETION, settings.llm_timeout, async {
        llm.complete(&config, &messages)
            .await
            .map_err(|error| CollaboratorError::unavailable(COMPLETION, error.to_string()))
    })
    .await
    .ok()?;

    let parsed: InferredSlots = match extract_json_object(&raw).map(serde_json::from_str::<InferredSlots>) {
        Some(Ok(parsed)) => parsed,
        Some(Err(error)) => {
            tracing::warn!(
                event_name = "funnel.extraction_rejected",
                correlation_id = %turn.audit.correlation_id,
                error = %error,
                "completion extraction did not match the expected shape"
            );
            return None;
        }
        None => return None,
    };

    Some(inferred_slots(turn.lexicon(), parsed))
}

fn inferred_slots(lexicon: &Lexicon, parsed: InferredSlots) -> ExtractedSlots {
    let mut slots = ExtractedSlots::default();
    if let Some(equipment) = meaningful(parsed.equipment) {
        let text = MatchText::new(&equipment);
        slots.family = lexicon.family(&text);
        slots.variant = slots.family.and_then(|family| lexicon.variant(&text, family));
    }
    if let Some(brand) = meaningful(parsed.brand) {
        slots.brand = lexicon
            .brand(&MatchText::new(&brand))
            .or_else(|| (brand.chars().count() <= MAX_FREE_BRAND_CHARS).then_some(brand));
    }
    if let Some(problem) = meaningful(parsed.problem) {
        slots.symptom = lexicon.symptom(&MatchText::new(&problem));
        slots.problem = Some(problem_text(&problem));
    }
    slots
}

/// Applies the equipment candidate. Returns a confirmation question when the switch
/// must be confirmed first.
fn merge_equipment(
    turn: &TurnContext<'_>,
    candidate: Equipment,
    patch: &mut StatePatch,
) -> Option<Reply> {
    let lexicon = turn.lexicon();
    let Some(current) = turn.state.equipment() else {
        patch.push(StateChange::SwitchEquipment(candidate.to_string()));
        return None;
    };

    if current.family == candidate.family {
        let explicit = lexicon.variant(&turn.text, current.family);
        let variant = match (explicit, current.variant) {
            (Some(explicit), known) if known != Some(explicit) => Some(explicit),
            (None, None) => candidate.variant,
            _ => None,
        };
        if let Some(variant) = variant {
            let refined = Equipment::with_variant(current.family, variant);
            patch.push(StateChange::SwitchEquipment(refined.to_string()));
        }
        return None;
    }

    if turn.state.flags.quote_delivered && !lexicon.has_correction_marker(&turn.text) {
        patch.push(StateChange::SetPendingEquipmentSwitch(Some(candidate.to_string())));
        return Some(Reply::text(format!(
            "Just to confirm: do you want to change the service from your {} to a {}? \
             Reply yes or no.",
            current.label(),
            candidate.label()
        )));
    }

    tracing::info!(
        event_name = "funnel.equipment_switched",
        correlation_id = %turn.audit.correlation_id,
        from = %current,
        to = %candidate,
        "equipment family changed"
    );
    patch.push(StateChange::SwitchEquipment(candidate.to_string()));
    None
}

fn write_slots(
    turn: &TurnContext<'_>,
    working: &SessionState,
    extracted: &ExtractedSlots,
    patch: &mut StatePatch,
) {
    let lexicon = turn.lexicon();
    let awaiting = working.awaiting;
    let correcting = lexicon.has_correction_marker(&turn.text);
    let replaceable = |key: SlotKey| {
        turn.fresh(working, key).is_none() || awaiting == Some(key) || correcting
    };
    let fillable = |key: SlotKey| !working.slots.has(key) || awaiting == Some(key);

    if let Some(brand) = &extracted.brand {
        if replaceable(SlotKey::Brand) {
            patch.push(StatePatch::set_slot(SlotKey::Brand, brand.clone()));
        }
    }
    if let Some(problem) = &extracted.problem {
        if replaceable(SlotKey::Problem) {
            patch.push(StatePatch::set_slot(SlotKey::Problem, problem.clone()));
        }
    }

    let mount = extracted.mount.or_else(|| {
        (awaiting == Some(SlotKey::Mount))
            .then(|| lexicon.option_number(&turn.text))
            .flatten()
            .and_then(mount_option)
    });
    if let Some(mount) = mount {
        if fillable(SlotKey::Mount) {
            patch.push(StatePatch::set_slot(SlotKey::Mount, mount.key()));
        }
    }
    if let Some(count) = extracted.burner_count {
        if fillable(SlotKey::BurnerCount) {
            patch.push(StatePatch::set_slot(SlotKey::BurnerCount, count.to_string()));
        }
    }
    if let Some(power) = &extracted.power_type {
        if fillable(SlotKey::PowerType) {
            patch.push(StatePatch::set_slot(SlotKey::PowerType, power.clone()));
        }
    }
}

const MOUNT_OPTIONS: [Mount; 2] = [Mount::BuiltIn, Mount::Countertop];

fn mount_option(number: usize) -> Option<Mount> {
    number.checked_sub(1).and_then(|index| MOUNT_OPTIONS.get(index).copied())
}

/// A yes keeps a stale brand or problem, a no drops it.
fn reconfirm_stale(
    turn: &TurnContext<'_>,
    working: &SessionState,
    extracted: &ExtractedSlots,
    patch: &mut StatePatch,
) {
    let Some(key) = working.awaiting else {
        return;
    };
    let supplied = match key {
        SlotKey::Brand => extracted.brand.is_some(),
        SlotKey::Problem => extracted.problem.is_some(),
        _ => return,
    };
    if supplied || turn.stale(working, key).is_none() {
        return;
    }
    match turn.lexicon().affirmation(&turn.text) {
        Some(true) => patch.push(StateChange::TouchSlot(key)),
        Some(false) => patch.push(StateChange::ClearSlot(key)),
        None => {}
    }
}

/// Unrecognised text answering a brand or problem question is taken as the answer.
fn take_awaited_free_text(turn: &TurnContext<'_>, working: &SessionState, patch: &mut StatePatch) {
    let lexicon = turn.lexicon();
    let text = &turn.text;
    let raw = turn.raw_text.trim();
    if raw.is_empty()
        || raw.ends_with('?')
        || lexicon.affirmation(text).is_some()
        || lexicon.is_greeting(text)
        || lexicon.mentions_scheduling(text)
        || lexicon.option_number(text).is_some()
    {
        return;
    }

    let words = text.word_count();
    let problem_missing = turn.fresh(working, SlotKey::Problem).is_none();
    match working.awaiting {
        Some(SlotKey::Brand) if words <= MAX_FREE_BRAND_WORDS => {
            if !lexicon.is_generic_complaint(text) && raw.chars().count() <= MAX_FREE_BRAND_CHARS {
                patch.push(StatePatch::set_slot(SlotKey::Brand, raw));
            }
        }
        Some(SlotKey::Brand) if problem_missing => {
            patch.push(StatePatch::set_slot(SlotKey::Problem, problem_text(raw)));
        }
        Some(SlotKey::Problem) => {
            patch.push(StatePatch::set_slot(SlotKey::Problem, problem_text(raw)));
        }
        _ => {}
    }
}

/// New product facts after a quote make that quote and its acceptance obsolete.
fn invalidate_quote_on_change(prior: &SessionState, working: &SessionState, patch: &mut StatePatch) {
    if !working.flags.quote_delivered {
        return;
    }
    let changed = [SlotKey::Equipment, SlotKey::Brand, SlotKey::Problem]
        .into_iter()
        .any(|key| prior.slots.value(key) != working.slots.value(key));
    if changed {
        patch.push(StateChange::ResetSchedulingProgress);
        patch.push(StateChange::ClearQuote);
    }
}

/// The next unmet funnel question and the slot it fills, or `None` once the funnel
/// is complete.
pub fn next_question(turn: &TurnContext<'_>, state: &SessionState) -> Option<(Reply, SlotKey)> {
    let Some(equipment) = state.equipment() else {
        let text = if turn.lexicon().is_greeting(&turn.text) {
            format!("{GREETING} {EQUIPMENT_QUESTION}")
        } else {
            EQUIPMENT_QUESTION.to_owned()
        };
        return Some((Reply::text(text), SlotKey::Equipment));
    };
    let label = equipment.label();
    let brand = turn.fresh(state, SlotKey::Brand);
    let problem = turn.fresh(state, SlotKey::Problem);

    if brand.is_none() {
        if let Some(stale) = turn.stale(state, SlotKey::Brand) {
            let text = format!("Is your {label} still a {stale}? Reply yes or tell me the brand.");
            return Some((Reply::text(text), SlotKey::Brand));
        }
        let text = match (problem, turn.stale(state, SlotKey::Problem)) {
            (Some(_), _) => {
                format!("Got it, I've noted the problem with your {label}. Which brand is it?")
            }
            (None, Some(_)) => format!("What's the brand of your {label}?"),
            (None, None) => format!(
                "What's the brand of your {label}, and what problem is it having?"
            ),
        };
        return Some((Reply::text(text), SlotKey::Brand));
    }

    if problem.is_none() {
        let text = match turn.stale(state, SlotKey::Problem) {
            Some(stale) => format!(
                "Last time you told me: \"{stale}\". Is that still the problem with your {label}? \
                 Reply yes or describe what's happening."
            ),
            None => format!(
                "What's happening with your {} {label}? Describe the problem in a few words.",
                brand.unwrap_or_default()
            ),
        };
        return Some((Reply::text(text), SlotKey::Problem));
    }

    if needs_mount(state, equipment) {
        let options = MOUNT_OPTIONS
            .iter()
            .enumerate()
            .map(|(position, mount)| ReplyOption {
                id: (position + 1).to_string(),
                text: capitalize(mount.label()),
            })
            .collect();
        let reply = Reply::Options {
            text: format!("Is your {label} built-in or countertop? Reply with the number."),
            options,
        };
        return Some((reply, SlotKey::Mount));
    }

    None
}

fn needs_mount(state: &SessionState, equipment: Equipment) -> bool {
    matches!(equipment.family, EquipmentFamily::Microwave | EquipmentFamily::Oven)
        && equipment.variant.is_none()
        && !state.slots.has(SlotKey::Mount)
        && state.installation.is_none()
}

fn capitalize(text: &str) -> String {
    let mut characters = text.chars();
    match characters.next() {
        Some(first) => first.to_uppercase().chain(characters).collect(),
        None => String::new(),
    }
}
