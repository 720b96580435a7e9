//! Customer identification data, collected only after the quote was accepted.

use anyhow::Result;
use async_trait::async_trait;
use regex::Regex;

use fixdesk_core::domain::reply::Reply;
use fixdesk_core::domain::session::{FlagKey, SessionState, SlotKey, StateChange, StatePatch};
use fixdesk_core::lexicon::Lexicon;

use crate::context::TurnContext;
use crate::pipeline::{Gate, GateOutcome};
use crate::scheduling;

const LABELLED_SLOTS: [SlotKey; 5] =
    [SlotKey::Name, SlotKey::Address, SlotKey::Complement, SlotKey::Email, SlotKey::TaxId];

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ParsedPersonalData {
    pub name: Option<String>,
    pub address: Option<String>,
    pub complement: Option<String>,
    pub email: Option<String>,
    pub tax_id: Option<String>,
    /// A CPF/CNPJ-shaped number whose check digits did not verify.
    pub invalid_tax_id: bool,
}

impl ParsedPersonalData {
    pub fn is_empty(&self) -> bool {
        self.name.is_none()
            && self.address.is_none()
            && self.complement.is_none()
            && self.email.is_none()
            && self.tax_id.is_none()
    }

    fn slot_mut(&mut self, key: SlotKey) -> Option<&mut Option<String>> {
        match key {
            SlotKey::Name => Some(&mut self.name),
            SlotKey::Address => Some(&mut self.address),
            SlotKey::Complement => Some(&mut self.complement),
            SlotKey::Email => Some(&mut self.email),
            SlotKey::TaxId => Some(&mut self.tax_id),
            _ => None,
        }
    }

    pub fn changes(&self) -> Vec<StateChange> {
        [
            (SlotKey::Name, &self.name),
            (SlotKey::Address, &self.address),
            (SlotKey::Complement, &self.complement),
            (SlotKey::Email, &self.email),
            (SlotKey::TaxId, &self.tax_id),
        ]
        .into_iter()
        .filter_map(|(key, value)| value.as_ref().map(|value| StatePatch::set_slot(key, value.clone())))
        .collect()
    }
}

#[derive(Clone, Debug)]
pub struct PersonalDataParser {
    email: Regex,
    tax_id: Regex,
    labelled: Vec<(SlotKey, Regex)>,
}

impl PersonalDataParser {
    pub fn new(lexicon: &Lexicon) -> Result<Self, regex::Error> {
        let mut labelled = Vec::new();
        for key in LABELLED_SLOTS {
            let mut labels: Vec<String> =
                lexicon.labels_for(key).iter().map(|label| regex::escape(label.trim())).collect();
            if labels.is_empty() {
                continue;
            }
            labels.sort_by_key(|label| std::cmp::Reverse(label.len()));
            let pattern = format!(r"(?i)^\s*(?:{})\s*[:=\-]\s*(.+?)\s*$", labels.join("|"));
            labelled.push((key, Regex::new(&pattern)?));
        }

        Ok(Self {
            email: Regex::new(r"[A-Za-z0-9._%+\-]+@[A-Za-z0-9.\-]+\.[A-Za-z]{2,}")?,
            tax_id: Regex::new(r"\d[\d./\-]{9,18}\d")?,
            labelled,
        })
    }

    /// Cheap check used to divert a message to the collector before the funnel sees it.
    pub fn looks_like_personal_data(&self, raw: &str, awaiting: Option<SlotKey>) -> bool {
        if self.email.is_match(raw) || self.tax_id_candidate(raw).is_some() {
            return true;
        }
        if raw.lines().filter(|line| !line.trim().is_empty()).count() >= 2 {
            return true;
        }
        if raw.lines().any(|line| self.labelled.iter().any(|(_, pattern)| pattern.is_match(line))) {
            return true;
        }
        awaiting.is_some_and(|key| key.is_personal() && plausible_for(key, raw.trim()))
    }

    /// Labelled lines first, then e-mail and tax id anywhere, then the first two
    /// unlabelled lines as name and address. A single unlabelled line only fills
    /// the field that was asked for.
    pub fn parse(&self, raw: &str, awaiting: Option<SlotKey>) -> ParsedPersonalData {
        let mut parsed = ParsedPersonalData::default();
        let mut free_lines = Vec::new();

        for line in raw.lines().map(str::trim).filter(|line| !line.is_empty()) {
            let labelled = self.labelled.iter().find_map(|(key, pattern)| {
                pattern
                    .captures(line)
                    .and_then(|captures| captures.get(1))
                    .map(|value| (*key, value.as_str().trim().to_owned()))
            });
            match labelled {
                Some((key, value)) => self.assign(&mut parsed, key, &value),
                None => free_lines.push(line),
            }
        }

        if parsed.email.is_none() {
            parsed.email = self.email.find(raw).map(|found| found.as_str().to_owned());
        }
        if parsed.tax_id.is_none() && !parsed.invalid_tax_id {
            if let Some(digits) = self.tax_id_candidate(raw) {
                if is_valid_tax_id(&digits) {
                    parsed.tax_id = Some(digits);
                } else {
                    parsed.invalid_tax_id = true;
                }
            }
        }

        let free_lines: Vec<&str> = free_lines
            .into_iter()
            .filter(|line| !self.email.is_match(line) && self.tax_id_candidate(line).is_none())
            .collect();

        match free_lines.as_slice() {
            [] => {}
            [single] => {
                if let Some(key) = awaiting.filter(|key| key.is_personal()) {
                    if plausible_for(key, single) {
                        if let Some(slot) = parsed.slot_mut(key) {
                            slot.get_or_insert_with(|| (*single).to_owned());
                        }
                    }
                }
            }
            [first, second, ..] => {
                parsed.name.get_or_insert_with(|| (*first).to_owned());
                parsed.address.get_or_insert_with(|| (*second).to_owned());
            }
        }

        parsed
    }

    fn assign(&self, parsed: &mut ParsedPersonalData, key: SlotKey, value: &str) {
        match key {
            SlotKey::Email => {
                parsed.email = self.email.find(value).map(|found| found.as_str().to_owned());
            }
            SlotKey::TaxId => {
                let digits: String = value.chars().filter(char::is_ascii_digit).collect();
                if is_valid_tax_id(&digits) {
                    parsed.tax_id = Some(digits);
                } else {
                    parsed.invalid_tax_id = true;
                }
            }
            other => {
                if let Some(slot) = parsed.slot_mut(other) {
                    *slot = Some(value.to_owned());
                }
            }
        }
    }

    /// Digits of the first 11- or 14-digit number in the text.
    fn tax_id_candidate(&self, raw: &str) -> Option<String> {
        self.tax_id.find_iter(raw).find_map(|found| {
            let digits: String = found.as_str().chars().filter(char::is_ascii_digit).collect();
            matches!(digits.len(), 11 | 14).then_some(digits)
        })
    }
}

fn plausible_for(key: SlotKey, value: &str) -> bool {
    let words = value.split_whitespace().count();
    match key {
        SlotKey::Name => {
            (2..=6).contains(&words)
                && value.chars().all(|character| character.is_alphabetic() || " .'-".contains(character))
        }
        SlotKey::Address => words >= 3 || value.chars().any(|character| character.is_ascii_digit()),
        SlotKey::Complement => !value.is_empty(),
        _ => false,
    }
}

pub fn is_valid_tax_id(digits: &str) -> bool {
    let numbers: Vec<u32> = digits.chars().filter_map(|character| character.to_digit(10)).collect();
    if numbers.len() != digits.len() {
        return false;
    }
    match numbers.len() {
        11 => valid_cpf(&numbers),
        14 => valid_cnpj(&numbers),
        _ => false,
    }
}

fn valid_cpf(numbers: &[u32]) -> bool {
    if numbers.iter().all(|number| *number == numbers[0]) {
        return false;
    }
    let check = |length: usize| {
        let sum: u32 = numbers[..length]
            .iter()
            .zip((2..=length as u32 + 1).rev())
            .map(|(number, weight)| number * weight)
            .sum();
        (sum * 10) % 11 % 10
    };
    check(9) == numbers[9] && check(10) == numbers[10]
}

fn valid_cnpj(numbers: &[u32]) -> bool {
    if numbers.iter().all(|number| *number == numbers[0]) {
        return false;
    }
    const FIRST: [u32; 12] = [5, 4, 3, 2, 9, 8, 7, 6, 5, 4, 3, 2];
    const SECOND: [u32; 13] = [6, 5, 4, 3, 2, 9, 8, 7, 6, 5, 4, 3, 2];
    let check = |weights: &[u32]| {
        let sum: u32 = numbers.iter().zip(weights).map(|(number, weight)| number * weight).sum();
        match sum % 11 {
            0 | 1 => 0,
            remainder => 11 - remainder,
        }
    };
    check(&FIRST) == numbers[12] && check(&SECOND) == numbers[13]
}

/// Asks for every missing required field in one message.
pub fn ask_missing(missing: &[SlotKey], invalid_tax_id: bool) -> Reply {
    let labels: Vec<&str> = missing.iter().map(SlotKey::label).collect();
    let list = match labels.as_slice() {
        [] => String::new(),
        [only] => (*only).to_owned(),
        [init @ .., last] => format!("{} and {last}", init.join(", ")),
    };
    let prefix = if invalid_tax_id {
        "The CPF/CNPJ you sent doesn't look valid, please check the numbers. "
    } else {
        ""
    };
    let closing = if missing.len() > 1 {
        " You can send everything in one message, one item per line."
    } else {
        ""
    };
    Reply::text(format!("{prefix}To book the service I still need your {list}.{closing}"))
}

/// Writes what the message carries and either asks for the rest or moves on to
/// the appointment offer.
pub async fn collect(turn: &TurnContext<'_>) -> Result<GateOutcome> {
    let parser = &turn.services.personal_data;
    let parsed = parser.parse(turn.raw_text, turn.state.awaiting);

    let mut patch = StatePatch::new();
    if !turn.state.flags.accepted_service {
        patch.push(StatePatch::set_flag(FlagKey::AcceptedService, true));
    }
    for change in parsed.changes() {
        patch.push(change);
    }

    let working = turn.state.apply(&patch, turn.now);
    let missing = working.slots.missing_personal();
    if let Some(first) = missing.first() {
        patch.push(StatePatch::set_flag(FlagKey::CollectingPersonalData, true));
        patch.push(StateChange::SetAwaiting(Some(*first)));
        return Ok(GateOutcome::Reply(ask_missing(&missing, parsed.invalid_tax_id), patch));
    }

    patch.push(StatePatch::set_flag(FlagKey::CollectingPersonalData, false));
    patch.push(StateChange::SetAwaiting(None));
    let working = turn.state.apply(&patch, turn.now);
    if scheduling::ready_to_offer(&working) {
        let offer = scheduling::offer(turn, &working).await;
        patch.extend(offer.patch);
        return Ok(GateOutcome::Reply(offer.reply, patch));
    }
    Ok(GateOutcome::Continue(patch))
}

fn is_collecting(state: &SessionState) -> bool {
    state.flags.accepted_service || state.flags.collecting_personal_data
}

/// Accepted customers who send something data-shaped skip the funnel.
pub struct PersonalDataFastPathGate;

#[async_trait]
impl Gate for PersonalDataFastPathGate {
    fn name(&self) -> &'static str {
        "personal_data_fast_path"
    }

    async fn evaluate(&self, turn: &TurnContext<'_>) -> Result<GateOutcome> {
        if !is_collecting(&turn.state) || turn.state.slots.missing_personal().is_empty() {
            return Ok(GateOutcome::pass());
        }
        if !turn.services.personal_data.looks_like_personal_data(turn.raw_text, turn.state.awaiting) {
            return Ok(GateOutcome::pass());
        }
        collect(turn).await
    }
}

/// Asks for whatever required field is still missing once the service was accepted.
pub struct PersonalDataGate;

#[async_trait]
impl Gate for PersonalDataGate {
    fn name(&self) -> &'static str {
        "personal_data"
    }

    async fn evaluate(&self, turn: &TurnContext<'_>) -> Result<GateOutcome> {
        if !turn.state.flags.accepted_service || turn.state.slots.missing_personal().is_empty() {
            return Ok(GateOutcome::pass());
        }
        collect(turn).await
    }
}
