use std::collections::BTreeMap;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::domain::equipment::{Equipment, EquipmentFamily};
use crate::domain::quote::CachedQuote;
use crate::domain::scheduling::{ConfirmedBooking, OfferedSlot, MAX_OFFERED_SLOTS};

#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ConversationId(pub String);

impl ConversationId {
    pub fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SlotKey {
    Equipment,
    Brand,
    Problem,
    Mount,
    BurnerCount,
    PowerType,
    Name,
    Address,
    Complement,
    Email,
    TaxId,
}

impl SlotKey {
    /// Required personal fields, in the order they are requested.
    pub const REQUIRED_PERSONAL: [Self; 4] = [Self::Name, Self::Address, Self::Email, Self::TaxId];

    pub fn key(&self) -> &'static str {
        match self {
            Self::Equipment => "equipment",
            Self::Brand => "brand",
            Self::Problem => "problem",
            Self::Mount => "mount",
            Self::BurnerCount => "burner_count",
            Self::PowerType => "power_type",
            Self::Name => "name",
            Self::Address => "address",
            Self::Complement => "complement",
            Self::Email => "email",
            Self::TaxId => "tax_id",
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Self::Equipment => "appliance",
            Self::Brand => "brand",
            Self::Problem => "defect description",
            Self::Mount => "mount type",
            Self::BurnerCount => "number of burners",
            Self::PowerType => "power type",
            Self::Name => "full name",
            Self::Address => "full address",
            Self::Complement => "address complement",
            Self::Email => "e-mail",
            Self::TaxId => "CPF or CNPJ",
        }
    }

    pub fn is_personal(&self) -> bool {
        matches!(self, Self::Name | Self::Address | Self::Complement | Self::Email | Self::TaxId)
    }

    /// Slots whose values expire and must be re-confirmed.
    pub fn expires(&self) -> bool {
        matches!(self, Self::Brand | Self::Problem)
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SlotValue {
    pub value: String,
    pub updated_at: DateTime<Utc>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CollectedSlots {
    pub equipment: Option<SlotValue>,
    pub brand: Option<SlotValue>,
    pub problem: Option<SlotValue>,
    pub mount: Option<SlotValue>,
    pub burner_count: Option<SlotValue>,
    pub power_type: Option<SlotValue>,
    pub name: Option<SlotValue>,
    pub address: Option<SlotValue>,
    pub complement: Option<SlotValue>,
    pub email: Option<SlotValue>,
    pub tax_id: Option<SlotValue>,
}

impl CollectedSlots {
    pub fn get(&self, key: SlotKey) -> Option<&SlotValue> {
        match key {
            SlotKey::Equipment => self.equipment.as_ref(),
            SlotKey::Brand => self.brand.as_ref(),
            SlotKey::Problem => self.problem.as_ref(),
            SlotKey::Mount => self.mount.as_ref(),
            SlotKey::BurnerCount => self.burner_count.as_ref(),
            SlotKey::PowerType => self.power_type.as_ref(),
            SlotKey::Name => self.name.as_ref(),
            SlotKey::Address => self.address.as_ref(),
            SlotKey::Complement => self.complement.as_ref(),
            SlotKey::Email => self.email.as_ref(),
            SlotKey::TaxId => self.tax_id.as_ref(),
        }
    }

    fn slot_mut(&mut self, key: SlotKey) -> &mut Option<SlotValue> {
        match key {
            SlotKey::Equipment => &mut self.equipment,
            SlotKey::Brand => &mut self.brand,
            SlotKey::Problem => &mut self.problem,
            SlotKey::Mount => &mut self.mount,
            SlotKey::BurnerCount => &mut self.burner_count,
            SlotKey::PowerType => &mut self.power_type,
            SlotKey::Name => &mut self.name,
            SlotKey::Address => &mut self.address,
            SlotKey::Complement => &mut self.complement,
            SlotKey::Email => &mut self.email,
            SlotKey::TaxId => &mut self.tax_id,
        }
    }

    pub fn value(&self, key: SlotKey) -> Option<&str> {
        self.get(key).map(|slot| slot.value.as_str())
    }

    pub fn has(&self, key: SlotKey) -> bool {
        self.value(key).is_some_and(|value| !value.trim().is_empty())
    }

    pub fn equipment(&self) -> Option<Equipment> {
        self.value(SlotKey::Equipment).and_then(|value| value.parse().ok())
    }

    pub fn missing_personal(&self) -> Vec<SlotKey> {
        SlotKey::REQUIRED_PERSONAL.into_iter().filter(|key| !self.has(*key)).collect()
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionFlags {
    pub accepted_service: bool,
    pub collecting_personal_data: bool,
    pub quote_delivered: bool,
    pub pending_time_selection: bool,
    pub bot_paused: bool,
    pub human_requested: bool,
    pub off_topic_count: u32,
    pub pending_equipment_type: Option<EquipmentFamily>,
    /// Canonical equipment string awaiting a yes/no switch confirmation.
    pub pending_equipment_switch: Option<String>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FlagKey {
    AcceptedService,
    CollectingPersonalData,
    QuoteDelivered,
    PendingTimeSelection,
    BotPaused,
    HumanRequested,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstallationProgress {
    /// Unknown until the customer names the appliance to install.
    #[serde(default)]
    pub family: Option<EquipmentFamily>,
    /// Answers keyed by checklist question.
    #[serde(default)]
    pub answers: BTreeMap<String, String>,
    #[serde(default)]
    pub asked: Option<String>,
    #[serde(default)]
    pub complete: bool,
}

impl InstallationProgress {
    pub fn new(family: Option<EquipmentFamily>) -> Self {
        Self { family, answers: BTreeMap::new(), asked: None, complete: false }
    }
}

/// Whole conversation state. Each turn produces a new value through [`SessionState::apply`].
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionState {
    pub slots: CollectedSlots,
    pub flags: SessionFlags,
    pub offered_slots: Vec<OfferedSlot>,
    pub last_quote: Option<CachedQuote>,
    pub installation: Option<InstallationProgress>,
    pub last_disambiguation_at: Option<DateTime<Utc>>,
    pub awaiting: Option<SlotKey>,
    pub booking: Option<ConfirmedBooking>,
}

impl SessionState {
    /// Value that is present and, for expiring slots, still inside `ttl`.
    pub fn fresh_value(&self, key: SlotKey, now: DateTime<Utc>, ttl: Duration) -> Option<&str> {
        let slot = self.slots.get(key)?;
        if slot.value.trim().is_empty() {
            return None;
        }
        if key.expires() && now - slot.updated_at > ttl {
            return None;
        }
        Some(slot.value.as_str())
    }

    /// Value that is present but expired; still shown as already known.
    pub fn stale_value(&self, key: SlotKey, now: DateTime<Utc>, ttl: Duration) -> Option<&str> {
        match self.fresh_value(key, now, ttl) {
            Some(_) => None,
            None => self.slots.value(key).filter(|value| !value.trim().is_empty()),
        }
    }

    pub fn equipment(&self) -> Option<Equipment> {
        self.slots.equipment()
    }

    pub fn flag(&self, flag: FlagKey) -> bool {
        match flag {
            FlagKey::AcceptedService => self.flags.accepted_service,
            FlagKey::CollectingPersonalData => self.flags.collecting_personal_data,
            FlagKey::QuoteDelivered => self.flags.quote_delivered,
            FlagKey::PendingTimeSelection => self.flags.pending_time_selection,
            FlagKey::BotPaused => self.flags.bot_paused,
            FlagKey::HumanRequested => self.flags.human_requested,
        }
    }

    /// Pure reducer: folds `patch` over a copy of this state.
    pub fn apply(&self, patch: &StatePatch, now: DateTime<Utc>) -> SessionState {
        let mut next = self.clone();
        for change in &patch.changes {
            next.apply_change(change, now);
        }
        next
    }

    fn apply_change(&mut self, change: &StateChange, now: DateTime<Utc>) {
        match change {
            StateChange::SetSlot { key, value } => {
                let value = value.trim();
                if value.is_empty() {
                    return;
                }
                if key.is_personal() && !self.flags.accepted_service {
                    tracing::debug!(
                        event_name = "session.personal_write_blocked",
                        slot = key.key(),
                        "personal data ignored before acceptance"
                    );
                    return;
                }
                *self.slots.slot_mut(*key) =
                    Some(SlotValue { value: value.to_owned(), updated_at: now });
            }
            StateChange::TouchSlot(key) => {
                if let Some(slot) = self.slots.slot_mut(*key).as_mut() {
                    slot.updated_at = now;
                }
            }
            StateChange::ClearSlot(key) => *self.slots.slot_mut(*key) = None,
            StateChange::SetFlag { flag, value } => self.set_flag(*flag, *value),
            StateChange::IncrementOffTopic => {
                self.flags.off_topic_count = self.flags.off_topic_count.saturating_add(1);
            }
            StateChange::ResetOffTopic => self.flags.off_topic_count = 0,
            StateChange::SetPendingEquipmentType(family) => {
                self.flags.pending_equipment_type = *family;
            }
            StateChange::SetPendingEquipmentSwitch(target) => {
                self.flags.pending_equipment_switch = target.clone();
            }
            StateChange::MarkDisambiguationAsked => self.last_disambiguation_at = Some(now),
            StateChange::ReplaceOfferedSlots(slots) => {
                self.offered_slots = slots.iter().take(MAX_OFFERED_SLOTS).cloned().collect();
            }
            StateChange::CacheQuote(quote) => self.last_quote = Some(quote.clone()),
            StateChange::ClearQuote => self.last_quote = None,
            StateChange::SetInstallation(progress) => self.installation = progress.clone(),
            StateChange::SetAwaiting(key) => self.awaiting = *key,
            StateChange::SetBooking(booking) => self.booking = booking.clone(),
            StateChange::ResetSchedulingProgress => self.reset_scheduling_progress(),
            StateChange::SwitchEquipment(canonical) => self.switch_equipment(canonical, now),
        }
    }

    fn set_flag(&mut self, flag: FlagKey, value: bool) {
        match flag {
            FlagKey::AcceptedService => self.flags.accepted_service = value,
            FlagKey::CollectingPersonalData => self.flags.collecting_personal_data = value,
            FlagKey::QuoteDelivered => self.flags.quote_delivered = value,
            FlagKey::PendingTimeSelection => self.flags.pending_time_selection = value,
            FlagKey::BotPaused => self.flags.bot_paused = value,
            FlagKey::HumanRequested => self.flags.human_requested = value,
        }
    }

    fn reset_scheduling_progress(&mut self) {
        self.flags.accepted_service = false;
        self.flags.collecting_personal_data = false;
        self.flags.pending_time_selection = false;
        self.flags.quote_delivered = false;
        self.offered_slots.clear();
    }

    fn switch_equipment(&mut self, canonical: &str, now: DateTime<Utc>) {
        let next_family = canonical.parse::<Equipment>().ok().map(|equipment| equipment.family);
        let current_family = self.equipment().map(|equipment| equipment.family);
        let family_changed = current_family.is_some() && current_family != next_family;

        if family_changed {
            for key in [
                SlotKey::Brand,
                SlotKey::Problem,
                SlotKey::Mount,
                SlotKey::BurnerCount,
                SlotKey::PowerType,
            ] {
                *self.slots.slot_mut(key) = None;
            }
            self.last_quote = None;
            self.installation = None;
            self.awaiting = None;
            self.reset_scheduling_progress();
        }
        self.flags.pending_equipment_switch = None;
        self.slots.equipment = Some(SlotValue { value: canonical.to_owned(), updated_at: now });
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum StateChange {
    SetSlot { key: SlotKey, value: String },
    /// Re-confirms an existing value without changing it.
    TouchSlot(SlotKey),
    ClearSlot(SlotKey),
    SetFlag { flag: FlagKey, value: bool },
    IncrementOffTopic,
    ResetOffTopic,
    SetPendingEquipmentType(Option<EquipmentFamily>),
    SetPendingEquipmentSwitch(Option<String>),
    MarkDisambiguationAsked,
    ReplaceOfferedSlots(Vec<OfferedSlot>),
    CacheQuote(CachedQuote),
    ClearQuote,
    SetInstallation(Option<InstallationProgress>),
    SetAwaiting(Option<SlotKey>),
    SetBooking(Option<ConfirmedBooking>),
    ResetSchedulingProgress,
    /// Writes the equipment slot; a different family also drops the product-specific data.
    SwitchEquipment(String),
}

/// Ordered list of changes produced by one or more gates within a turn.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatePatch {
    pub changes: Vec<StateChange>,
}

impl StatePatch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, change: StateChange) -> Self {
        self.changes.push(change);
        self
    }

    pub fn push(&mut self, change: StateChange) {
        self.changes.push(change);
    }

    pub fn extend(&mut self, other: StatePatch) {
        self.changes.extend(other.changes);
    }

    pub fn is_empty(&self) -> bool {
        self.changes.is_empty()
    }

    pub fn set_slot(key: SlotKey, value: impl Into<String>) -> StateChange {
        StateChange::SetSlot { key, value: value.into() }
    }

    pub fn set_flag(flag: FlagKey, value: bool) -> StateChange {
        StateChange::SetFlag { flag, value }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionRecord {
    pub id: ConversationId,
    pub channel: String,
    pub contact_handle: String,
    pub state: SessionState,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl SessionRecord {
    pub fn new(
        channel: impl Into<String>,
        contact_handle: impl Into<String>,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: ConversationId::generate(),
            channel: channel.into(),
            contact_handle: contact_handle.into(),
            state: SessionState::default(),
            created_at: now,
            updated_at: now,
        }
    }
}
