//! Installation requests follow their own checklist instead of the repair funnel.
//!
//! The checklist depends on the appliance family and on earlier answers (a built-in
//! mount adds the niche question). An answer that cannot be read leaves the item open
//! and the question is asked again. Once every item has an answer the progress is
//! marked complete and the turn falls through to the regular quote path with the
//! installation service type.

use anyhow::Result;
use async_trait::async_trait;

use fixdesk_core::audit::{AuditCategory, AuditOutcome};
use fixdesk_core::domain::equipment::{Equipment, EquipmentFamily, Mount, Variant};
use fixdesk_core::domain::reply::{Reply, ReplyOption};
use fixdesk_core::domain::session::{
    InstallationProgress, SessionState, SlotKey, StateChange, StatePatch,
};
use fixdesk_core::lexicon::{Lexicon, MatchText};

use crate::context::TurnContext;
use crate::pipeline::{Gate, GateOutcome};

const INSTALLATION_PROBLEM: &str = "installation";

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ChecklistItem {
    Mount,
    GasType,
    PowerType,
    NicheDimensions,
    Duct,
    WaterPoints,
    Clearance,
}

impl ChecklistItem {
    const ALL: [Self; 7] = [
        Self::Mount,
        Self::GasType,
        Self::PowerType,
        Self::NicheDimensions,
        Self::Duct,
        Self::WaterPoints,
        Self::Clearance,
    ];

    pub fn key(&self) -> &'static str {
        match self {
            Self::Mount => "mount",
            Self::GasType => "gas_type",
            Self::PowerType => "power_type",
            Self::NicheDimensions => "niche_dimensions",
            Self::Duct => "duct",
            Self::WaterPoints => "water_points",
            Self::Clearance => "clearance",
        }
    }

    fn from_key(key: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|item| item.key() == key)
    }
}

fn mount_choices(family: EquipmentFamily) -> &'static [Mount] {
    match family {
        EquipmentFamily::RangeHood => &[Mount::Wall, Mount::Island],
        EquipmentFamily::Dishwasher => &[Mount::BuiltIn, Mount::Freestanding],
        _ => &[Mount::BuiltIn, Mount::Countertop],
    }
}

fn is_electric_cooking(equipment: Equipment) -> bool {
    matches!(equipment.variant, Some(Variant::Induction | Variant::Electric))
}

/// Items that apply to `equipment` given the answers so far, in asking order.
pub fn checklist(equipment: Equipment, progress: &InstallationProgress) -> Vec<ChecklistItem> {
    use EquipmentFamily as F;

    let family = equipment.family;
    let built_in = equipment.variant == Some(Variant::BuiltIn)
        || progress.answers.get(ChecklistItem::Mount.key()).map(String::as_str)
            == Some(Mount::BuiltIn.key());

    ChecklistItem::ALL
        .into_iter()
        .filter(|item| match item {
            ChecklistItem::Mount => {
                matches!(family, F::Cooktop | F::Oven | F::Microwave | F::RangeHood | F::Dishwasher)
                    && equipment.variant != Some(Variant::BuiltIn)
                    && equipment.variant != Some(Variant::Countertop)
            }
            ChecklistItem::GasType => {
                matches!(family, F::Stove | F::Cooktop) && !is_electric_cooking(equipment)
            }
            ChecklistItem::PowerType => {
                (matches!(family, F::Stove | F::Cooktop) && is_electric_cooking(equipment))
                    || matches!(family, F::Oven | F::Dryer)
            }
            ChecklistItem::NicheDimensions => built_in,
            ChecklistItem::Duct => matches!(family, F::RangeHood | F::Dryer),
            ChecklistItem::WaterPoints => family.is_wet(),
            ChecklistItem::Clearance => family.is_refrigeration(),
        })
        .collect()
}

fn question(item: ChecklistItem, equipment: Equipment) -> Reply {
    let label = equipment.label();
    match item {
        ChecklistItem::Mount => Reply::Options {
            text: format!("How will the {label} be installed? Reply with the number."),
            options: mount_choices(equipment.family)
                .iter()
                .enumerate()
                .map(|(position, mount)| ReplyOption {
                    id: (position + 1).to_string(),
                    text: mount.label().to_owned(),
                })
                .collect(),
        },
        ChecklistItem::GasType => Reply::text(
            "Will it run on natural (piped) gas or on a bottled LPG cylinder? If it's electric \
             or induction, just tell me.",
        ),
        ChecklistItem::PowerType => {
            Reply::text("What is the voltage at the installation point: 110/127V or 220V?")
        }
        ChecklistItem::NicheDimensions => Reply::text(
            "What are the niche dimensions (width x height x depth, in cm)?",
        ),
        ChecklistItem::Duct => Reply::text(format!(
            "Is there already a duct or exhaust outlet where the {label} will go?"
        )),
        ChecklistItem::WaterPoints => Reply::text(
            "Are the water inlet and drain points already in place near the installation spot?",
        ),
        ChecklistItem::Clearance => Reply::text(
            "Is there at least 10 cm of free space around the back and sides for ventilation?",
        ),
    }
}

/// Parsed answer plus any state change it implies.
#[derive(Debug, PartialEq, Eq)]
pub struct Answer {
    pub value: String,
    pub change: Option<StateChange>,
}

impl Answer {
    fn plain(value: impl Into<String>) -> Self {
        Self { value: value.into(), change: None }
    }
}

pub fn parse_answer(
    lexicon: &Lexicon,
    item: ChecklistItem,
    equipment: Equipment,
    raw: &str,
    text: &MatchText,
) -> Option<Answer> {
    let yes_no = || lexicon.affirmation(text).map(|yes| if yes { "yes" } else { "no" });
    match item {
        ChecklistItem::Mount => {
            let by_number = lexicon
                .option_number(text)
                .and_then(|number| number.checked_sub(1))
                .and_then(|index| mount_choices(equipment.family).get(index).copied());
            by_number.or_else(|| lexicon.mount(text)).map(|mount| Answer {
                value: mount.key().to_owned(),
                change: Some(StatePatch::set_slot(SlotKey::Mount, mount.key())),
            })
        }
        ChecklistItem::GasType => match lexicon.variant(text, equipment.family) {
            Some(variant @ (Variant::Induction | Variant::Electric)) => Some(Answer {
                value: variant.key().to_owned(),
                change: Some(StateChange::SwitchEquipment(
                    Equipment::with_variant(equipment.family, variant).to_string(),
                )),
            }),
            _ => lexicon.gas_type(text).map(Answer::plain),
        },
        ChecklistItem::PowerType => lexicon.power_type(text).map(|power| Answer {
            change: Some(StatePatch::set_slot(SlotKey::PowerType, power.clone())),
            value: power,
        }),
        // Free text, as long as it carries at least one measurement.
        ChecklistItem::NicheDimensions => {
            let trimmed = raw.trim();
            trimmed.chars().any(|character| character.is_ascii_digit()).then(|| Answer::plain(trimmed))
        }
        ChecklistItem::Duct | ChecklistItem::WaterPoints | ChecklistItem::Clearance => {
            yes_no().map(Answer::plain)
        }
    }
}

fn is_active(state: &SessionState, lexicon: &Lexicon, text: &MatchText) -> bool {
    match &state.installation {
        Some(progress) => !progress.complete,
        None => lexicon.mentions_installation(text),
    }
}

pub struct InstallationGate;

#[async_trait]
impl Gate for InstallationGate {
    fn name(&self) -> &'static str {
        "installation"
    }

    async fn evaluate(&self, turn: &TurnContext<'_>) -> Result<GateOutcome> {
        let state = &turn.state;
        let lexicon = turn.lexicon();
        if !is_active(state, lexicon, &turn.text) {
            return Ok(GateOutcome::pass());
        }

        let starting = state.installation.is_none();
        let mut patch = StatePatch::new();
        let extracted = turn.services.extractor.extract(lexicon, turn.raw_text, &turn.text);

        if let Some(candidate) = extracted.equipment() {
            let known = state.equipment();
            if known.map(|known| known.family) != Some(candidate.family)
                || (candidate.variant.is_some() && known.and_then(|known| known.variant).is_none())
            {
                patch.push(StateChange::SwitchEquipment(candidate.to_string()));
            }
        }
        let working = state.apply(&patch, turn.now);
        let equipment = working.equipment();

        let mut progress = match working.installation.clone() {
            Some(progress) if progress.family == equipment.map(|equipment| equipment.family) => {
                progress
            }
            // A family switch drops earlier answers.
            _ => InstallationProgress::new(equipment.map(|equipment| equipment.family)),
        };
        if starting || working.slots.value(SlotKey::Problem) != Some(INSTALLATION_PROBLEM) {
            patch.push(StatePatch::set_slot(SlotKey::Problem, INSTALLATION_PROBLEM));
        }
        if let Some(brand) = extracted.brand {
            if !working.slots.has(SlotKey::Brand) {
                patch.push(StatePatch::set_slot(SlotKey::Brand, brand));
            }
        }
        if starting {
            turn.collaborators().audit.emit(
                turn.audit
                    .event("installation.started", AuditCategory::Flow, AuditOutcome::Success)
                    .with_metadata(
                        "equipment",
                        equipment.map(|equipment| equipment.to_string()).unwrap_or_default(),
                    ),
            );
        }

        let Some(mut equipment) = equipment else {
            progress.asked = None;
            patch.push(StateChange::SetInstallation(Some(progress)));
            patch.push(StateChange::SetAwaiting(Some(SlotKey::Equipment)));
            return Ok(GateOutcome::Reply(
                Reply::text(
                    "Great, we also do installations! Which appliance do you need installed?",
                ),
                patch,
            ));
        };

        let mut unanswered = None;
        if !starting {
            if let Some(item) = progress.asked.take().as_deref().and_then(ChecklistItem::from_key) {
                unanswered = Some(item);
                if let Some(answer) =
                    parse_answer(lexicon, item, equipment, turn.raw_text, &turn.text)
                {
                    unanswered = None;
                    if let Some(change) = answer.change {
                        if let StateChange::SwitchEquipment(canonical) = &change {
                            if let Ok(refined) = canonical.parse::<Equipment>() {
                                equipment = refined;
                            }
                        }
                        patch.push(change);
                    }
                    progress.answers.insert(item.key().to_owned(), answer.value);
                }
            }
        }
        // Slots collected earlier answer their checklist items.
        if let Some(mount) = working.slots.value(SlotKey::Mount) {
            progress.answers.entry(ChecklistItem::Mount.key().to_owned()).or_insert_with(|| mount.to_owned());
        }
        if let Some(power) = working.slots.value(SlotKey::PowerType) {
            progress
                .answers
                .entry(ChecklistItem::PowerType.key().to_owned())
                .or_insert_with(|| power.to_owned());
        }

        let pending = checklist(equipment, &progress)
            .into_iter()
            .find(|item| !progress.answers.contains_key(item.key()));

        match pending {
            Some(item) => {
                progress.asked = Some(item.key().to_owned());
                patch.push(StateChange::SetInstallation(Some(progress)));
                patch.push(StateChange::SetAwaiting(None));
                let reply = question(item, equipment);
                let reply = if starting {
                    prefixed(reply, "Great, we also do installations! A few quick questions first.")
                } else if unanswered == Some(item) {
                    prefixed(reply, "Sorry, I didn't catch that.")
                } else {
                    reply
                };
                Ok(GateOutcome::Reply(reply, patch))
            }
            None => {
                progress.asked = None;
                progress.complete = true;
                tracing::info!(
                    event_name = "installation.checklist_complete",
                    correlation_id = %turn.audit.correlation_id,
                    equipment = %equipment,
                    answers = progress.answers.len(),
                    "installation checklist satisfied"
                );
                patch.push(StateChange::SetInstallation(Some(progress)));
                Ok(GateOutcome::Continue(patch))
            }
        }
    }
}

fn prefixed(reply: Reply, prefix: &str) -> Reply {
    match reply {
        Reply::Text(text) => Reply::Text(format!("{prefix} {text}")),
        Reply::Options { text, options } => Reply::Options { text: format!("{prefix} {text}"), options },
    }
}
