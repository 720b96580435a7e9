//! Equipment ambiguity detection and resolution.
//!
//! A customer who writes "my stove is broken" has not said which kind of stove,
//! and the service policy depends on it. This module detects such under-specified
//! mentions, builds the numbered clarification prompt and interprets the answer
//! on the following turn.

use chrono::{DateTime, Duration, Utc};

use crate::domain::equipment::{Equipment, EquipmentFamily, Variant};
use crate::domain::reply::{Reply, ReplyOption};
use crate::domain::session::{SessionState, StateChange, StatePatch};
use crate::lexicon::{Lexicon, MatchText};

/// Maximum number of options shown in a clarification prompt.
pub const MAX_PROMPT_OPTIONS: usize = 3;

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum AmbiguityOutcome {
    /// Ask which sub-type the customer has.
    Prompt { reply: Reply, patch: StatePatch },
    /// The appliance is outside the serviced catalogue.
    Decline { reply: Reply },
    /// A pending prompt was answered.
    Resolved { equipment: Equipment, patch: StatePatch },
    /// A pending prompt was not answered; the marker is dropped and the turn continues.
    Abandoned { patch: StatePatch },
}

pub struct EquipmentAmbiguityResolver<'a> {
    lexicon: &'a Lexicon,
    cooldown: Duration,
}

impl<'a> EquipmentAmbiguityResolver<'a> {
    pub fn new(lexicon: &'a Lexicon, cooldown: Duration) -> Self {
        Self { lexicon, cooldown }
    }

    pub fn resolve(
        &self,
        text: &MatchText,
        state: &SessionState,
        now: DateTime<Utc>,
    ) -> Option<AmbiguityOutcome> {
        if let Some(appliance) = self.lexicon.unsupported_appliance(text) {
            return Some(AmbiguityOutcome::Decline { reply: decline_reply(appliance) });
        }

        if let Some(family) = state.flags.pending_equipment_type {
            if let Some(outcome) = self.resolve_pending(text, state, family) {
                return Some(outcome);
            }
        }

        self.detect(text, state, now)
    }

    fn resolve_pending(
        &self,
        text: &MatchText,
        state: &SessionState,
        family: EquipmentFamily,
    ) -> Option<AmbiguityOutcome> {
        let choices = prompt_variants(family);
        let by_number = self
            .lexicon
            .option_number(text)
            .or_else(|| self.lexicon.ordinal(text).map(usize::from))
            .and_then(|number| number.checked_sub(1))
            .and_then(|index| choices.get(index).copied());
        let by_keyword = self.lexicon.variant(text, family);

        if let Some(variant) = by_number.or(by_keyword) {
            let equipment = Equipment::with_variant(family, variant);
            let patch = StatePatch::new()
                .with(StateChange::SwitchEquipment(equipment.to_string()))
                .with(StateChange::SetPendingEquipmentType(None));
            return Some(AmbiguityOutcome::Resolved { equipment, patch });
        }

        // Naming another family restarts detection for that family.
        if self.lexicon.family(text).is_some_and(|mentioned| mentioned != family) {
            return None;
        }

        let mut patch = StatePatch::new().with(StateChange::SetPendingEquipmentType(None));
        if state.equipment().map(|equipment| equipment.family) != Some(family) {
            patch.push(StateChange::SwitchEquipment(Equipment::new(family).to_string()));
        }
        Some(AmbiguityOutcome::Abandoned { patch })
    }

    fn detect(
        &self,
        text: &MatchText,
        state: &SessionState,
        now: DateTime<Utc>,
    ) -> Option<AmbiguityOutcome> {
        let family = self.lexicon.family(text)?;
        let candidate = Equipment::new(family);
        if !candidate.needs_disambiguation() {
            return None;
        }
        // Industrial and other explicit qualifiers go straight to the funnel.
        if self.lexicon.variant(text, family).is_some() {
            return None;
        }
        if self
            .lexicon
            .symptom(text)
            .and_then(|symptom| symptom.implied_variant(family))
            .is_some()
        {
            return None;
        }
        if state
            .equipment()
            .is_some_and(|known| known.family == family && known.variant.is_some())
        {
            return None;
        }
        if state.last_disambiguation_at.is_some_and(|asked| now - asked < self.cooldown) {
            tracing::debug!(
                event_name = "ambiguity.cooldown_active",
                family = family.key(),
                "skipping disambiguation prompt inside cooldown"
            );
            return None;
        }

        let patch = StatePatch::new()
            .with(StateChange::SetPendingEquipmentType(Some(family)))
            .with(StateChange::MarkDisambiguationAsked);
        Some(AmbiguityOutcome::Prompt { reply: prompt_reply(family), patch })
    }
}

fn prompt_variants(family: EquipmentFamily) -> Vec<Variant> {
    family.disambiguation_variants().iter().copied().take(MAX_PROMPT_OPTIONS).collect()
}

pub fn prompt_reply(family: EquipmentFamily) -> Reply {
    let options = prompt_variants(family)
        .into_iter()
        .enumerate()
        .map(|(position, variant)| ReplyOption {
            id: (position + 1).to_string(),
            text: capitalize(&Equipment::with_variant(family, variant).label()),
        })
        .collect();
    Reply::Options {
        text: format!("Which type of {} do you have? Reply with the number.", family.label()),
        options,
    }
}

fn decline_reply(appliance: &str) -> Reply {
    Reply::text(format!(
        "Sorry, we don't service small appliances such as {appliance}. We repair and install \
         stoves, cooktops, ovens, microwaves, range hoods, dishwashers, washing machines, \
         dryers, refrigerators and freezers."
    ))
}

fn capitalize(text: &str) -> String {
    let mut characters = text.chars();
    match characters.next() {
        Some(first) => first.to_uppercase().chain(characters).collect(),
        None => String::new(),
    }
}
