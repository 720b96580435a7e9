//! Language data used by every heuristic in the funnel.
//!
//! All keyword lists live here as plain data so a deployment can swap the
//! vocabulary through a TOML file without touching gate logic. Matching is
//! case- and accent-insensitive and only hits whole words or whole phrases.

use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use unicode_normalization::{char::is_combining_mark, UnicodeNormalization};

use crate::domain::equipment::{EquipmentFamily, Mount, Symptom, Variant};
use crate::domain::scheduling::DayPeriod;
use crate::domain::session::SlotKey;

#[derive(Debug, Error)]
pub enum LexiconError {
    #[error("failed to read lexicon file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse lexicon: {0}")]
    Parse(String),
}

/// Lowercases, strips accents and collapses everything that is not a letter or digit
/// into single spaces.
pub fn normalize_text(text: &str) -> String {
    let folded: String = text
        .nfd()
        .filter(|character| !is_combining_mark(*character))
        .flat_map(char::to_lowercase)
        .map(|character| if character.is_alphanumeric() { character } else { ' ' })
        .collect();
    folded.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Normalized text padded for whole-phrase lookups.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MatchText {
    normalized: String,
    padded: String,
}

impl MatchText {
    pub fn new(raw: &str) -> Self {
        let normalized = normalize_text(raw);
        let padded = format!(" {normalized} ");
        Self { normalized, padded }
    }

    pub fn as_str(&self) -> &str {
        &self.normalized
    }

    pub fn is_empty(&self) -> bool {
        self.normalized.is_empty()
    }

    pub fn word_count(&self) -> usize {
        self.normalized.split(' ').filter(|word| !word.is_empty()).count()
    }

    /// Byte offset of `phrase` in the normalized text, if present as a whole phrase.
    pub fn position(&self, phrase: &str) -> Option<usize> {
        let phrase = normalize_text(phrase);
        if phrase.is_empty() {
            return None;
        }
        self.padded.find(&format!(" {phrase} "))
    }

    pub fn contains(&self, phrase: &str) -> bool {
        self.position(phrase).is_some()
    }

    pub fn contains_any(&self, phrases: &[String]) -> bool {
        phrases.iter().any(|phrase| self.contains(phrase))
    }

    pub fn first_position(&self, phrases: &[String]) -> Option<usize> {
        phrases.iter().filter_map(|phrase| self.position(phrase)).min()
    }

    /// Copy with every whole-phrase occurrence of `phrases` removed, longest first.
    pub fn without(&self, phrases: &[String]) -> MatchText {
        let mut normalized: Vec<String> = phrases.iter().map(|phrase| normalize_text(phrase)).collect();
        normalized.sort_by_key(|phrase| std::cmp::Reverse(phrase.len()));

        let mut padded = self.padded.clone();
        for phrase in normalized.iter().filter(|phrase| !phrase.is_empty()) {
            let needle = format!(" {phrase} ");
            while let Some(at) = padded.find(&needle) {
                padded.replace_range(at..at + needle.len(), " ");
            }
        }
        MatchText::new(&padded)
    }

    /// Longest matching phrase, so "range hood" beats "range".
    pub fn longest_match<'a>(&self, phrases: &'a [String]) -> Option<&'a str> {
        phrases
            .iter()
            .filter(|phrase| self.contains(phrase))
            .max_by_key(|phrase| normalize_text(phrase).len())
            .map(String::as_str)
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeywordGroup<T> {
    pub target: T,
    pub keywords: Vec<String>,
}

impl<T> KeywordGroup<T> {
    fn new(target: T, keywords: &[&str]) -> Self {
        Self { target, keywords: words(keywords) }
    }
}

fn words(list: &[&str]) -> Vec<String> {
    list.iter().map(|word| (*word).to_owned()).collect()
}

/// Best group by longest keyword hit.
fn best_group<T: Clone>(text: &MatchText, groups: &[KeywordGroup<T>]) -> Option<T> {
    groups
        .iter()
        .filter_map(|group| {
            text.longest_match(&group.keywords)
                .map(|hit| (normalize_text(hit).len(), group.target.clone()))
        })
        .max_by_key(|(length, _)| *length)
        .map(|(_, target)| target)
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Lexicon {
    pub greetings: Vec<String>,
    pub generic_complaints: Vec<String>,
    pub human_request: Vec<String>,
    pub resume_bot: Vec<String>,
    pub yes_words: Vec<String>,
    pub no_words: Vec<String>,
    pub scheduling_words: Vec<String>,
    pub correction_markers: Vec<String>,
    pub installation_words: Vec<String>,
    pub visit_status: Vec<String>,
    pub unsupported_appliances: Vec<String>,
    pub brands: Vec<String>,
    pub burner_words: Vec<String>,
    pub option_words: Vec<String>,
    pub personal_data_requests: Vec<String>,
    pub families: Vec<KeywordGroup<EquipmentFamily>>,
    pub variants: Vec<KeywordGroup<Variant>>,
    pub mounts: Vec<KeywordGroup<Mount>>,
    pub symptoms: Vec<KeywordGroup<Symptom>>,
    pub ordinals: Vec<KeywordGroup<u8>>,
    pub periods: Vec<KeywordGroup<DayPeriod>>,
    pub field_labels: Vec<KeywordGroup<SlotKey>>,
    pub gas_types: Vec<KeywordGroup<String>>,
    pub power_types: Vec<KeywordGroup<String>>,
}

impl Lexicon {
    pub fn load(path: &Path) -> Result<Self, LexiconError> {
        let contents = fs::read_to_string(path)
            .map_err(|source| LexiconError::Io { path: path.to_path_buf(), source })?;
        Self::from_toml_str(&contents)
    }

    /// Lists present in the document replace the built-in ones; absent lists keep defaults.
    pub fn from_toml_str(contents: &str) -> Result<Self, LexiconError> {
        toml::from_str(contents).map_err(|error| LexiconError::Parse(error.to_string()))
    }

    pub fn is_greeting(&self, text: &MatchText) -> bool {
        text.contains_any(&self.greetings)
    }

    /// The text with greeting phrases removed, so "boa tarde" is not read as a period.
    pub fn without_greetings(&self, text: &MatchText) -> MatchText {
        text.without(&self.greetings)
    }

    pub fn is_generic_complaint(&self, text: &MatchText) -> bool {
        text.contains_any(&self.generic_complaints)
    }

    pub fn is_human_request(&self, text: &MatchText) -> bool {
        text.contains_any(&self.human_request)
    }

    pub fn is_resume_request(&self, text: &MatchText) -> bool {
        text.contains_any(&self.resume_bot)
    }

    /// `Some(true)` for yes, `Some(false)` for no; when both appear the earliest wins.
    pub fn affirmation(&self, text: &MatchText) -> Option<bool> {
        match (text.first_position(&self.yes_words), text.first_position(&self.no_words)) {
            (Some(_), None) => Some(true),
            (None, Some(_)) => Some(false),
            (Some(yes), Some(no)) => Some(yes < no),
            (None, None) => None,
        }
    }

    pub fn is_yes(&self, text: &MatchText) -> bool {
        self.affirmation(text) == Some(true)
    }

    pub fn is_no(&self, text: &MatchText) -> bool {
        self.affirmation(text) == Some(false)
    }

    pub fn mentions_scheduling(&self, text: &MatchText) -> bool {
        text.contains_any(&self.scheduling_words)
    }

    pub fn has_correction_marker(&self, text: &MatchText) -> bool {
        text.contains_any(&self.correction_markers)
    }

    pub fn mentions_installation(&self, text: &MatchText) -> bool {
        text.contains_any(&self.installation_words)
    }

    pub fn asks_visit_status(&self, text: &MatchText) -> bool {
        text.contains_any(&self.visit_status)
    }

    pub fn requests_personal_data(&self, text: &MatchText) -> bool {
        text.contains_any(&self.personal_data_requests)
    }

    pub fn unsupported_appliance<'a>(&'a self, text: &MatchText) -> Option<&'a str> {
        text.longest_match(&self.unsupported_appliances)
    }

    pub fn family(&self, text: &MatchText) -> Option<EquipmentFamily> {
        best_group(text, &self.families)
    }

    /// Variant qualifier valid for `family`, if the text carries one.
    pub fn variant(&self, text: &MatchText, family: EquipmentFamily) -> Option<Variant> {
        let allowed: Vec<KeywordGroup<Variant>> =
            self.variants.iter().filter(|group| family.allows(group.target)).cloned().collect();
        best_group(text, &allowed)
    }

    pub fn mount(&self, text: &MatchText) -> Option<Mount> {
        best_group(text, &self.mounts)
    }

    pub fn symptom(&self, text: &MatchText) -> Option<Symptom> {
        best_group(text, &self.symptoms)
    }

    /// Brand as spelled in the lexicon.
    pub fn brand(&self, text: &MatchText) -> Option<String> {
        text.longest_match(&self.brands).map(str::to_owned)
    }

    pub fn ordinal(&self, text: &MatchText) -> Option<u8> {
        best_group(text, &self.ordinals)
    }

    pub fn period(&self, text: &MatchText) -> Option<DayPeriod> {
        best_group(text, &self.periods)
    }

    pub fn gas_type(&self, text: &MatchText) -> Option<String> {
        best_group(text, &self.gas_types)
    }

    pub fn power_type(&self, text: &MatchText) -> Option<String> {
        best_group(text, &self.power_types)
    }

    /// "2", "option 2" or "opção 2".
    pub fn option_number(&self, text: &MatchText) -> Option<usize> {
        let tokens: Vec<&str> = text.as_str().split(' ').collect();
        let number = match tokens.as_slice() {
            [number] => *number,
            [word, number] if self.option_words.iter().any(|option| normalize_text(option) == *word) => {
                *number
            }
            _ => return None,
        };
        number.parse().ok()
    }

    pub fn labels_for(&self, slot: SlotKey) -> Vec<String> {
        self.field_labels
            .iter()
            .filter(|group| group.target == slot)
            .flat_map(|group| group.keywords.iter().cloned())
            .collect()
    }
}

impl Default for Lexicon {
    fn default() -> Self {
        use EquipmentFamily as F;

        Self {
            greetings: words(&[
                "hi", "hello", "hey", "good morning", "good afternoon", "good evening", "oi",
                "ola", "bom dia", "boa tarde", "boa noite", "e ai",
            ]),
            generic_complaints: words(&[
                "not working", "stopped working", "doesn t work", "does not work", "broken",
                "broke", "problem", "issue", "defect", "faulty", "nao funciona",
                "parou de funcionar", "quebrou", "quebrado", "quebrada", "com defeito",
                "defeito", "problema", "estragou",
            ]),
            human_request: words(&[
                "talk to a human", "speak to a human", "talk to a person", "speak to a person",
                "real person", "human", "attendant", "operator", "falar com atendente",
                "falar com um atendente", "falar com humano", "falar com uma pessoa",
                "atendente", "humano",
            ]),
            resume_bot: words(&[
                "back to bot", "back to the bot", "resume bot", "talk to the bot",
                "voltar para o bot", "voltar ao bot", "falar com o bot", "voltar ao robo",
            ]),
            yes_words: words(&[
                "yes", "yeah", "yep", "sure", "ok", "okay", "of course", "go ahead",
                "let s do it", "sim", "claro", "pode ser", "isso", "bora", "fechado",
                "perfeito", "com certeza",
            ]),
            no_words: words(&[
                "no", "nope", "not now", "no thanks", "nao", "agora nao", "nao obrigado",
                "deixa pra la",
            ]),
            scheduling_words: words(&[
                "schedule", "scheduling", "appointment", "book", "booking", "available times",
                "time slot", "when can", "agendar", "agendamento", "agenda", "marcar",
                "horario", "horarios", "disponibilidade",
            ]),
            correction_markers: words(&[
                "actually", "in fact", "i meant", "sorry i meant", "on second thought",
                "it s my", "it is my", "na verdade", "quis dizer", "corrigindo", "e minha",
                "e meu", "me enganei",
            ]),
            installation_words: words(&[
                "install", "installation", "installing", "set up", "instalar", "instalacao",
                "instalando", "montagem",
            ]),
            visit_status: words(&[
                "when is the technician coming", "my appointment", "my booking",
                "visit confirmed", "what time is the visit", "quando vem o tecnico",
                "meu agendamento", "minha visita", "que horas vem",
            ]),
            unsupported_appliances: words(&[
                "blender", "toaster", "coffee maker", "coffee machine", "air fryer", "mixer",
                "iron", "hair dryer", "vacuum cleaner", "kettle", "liquidificador",
                "torradeira", "cafeteira", "airfryer", "batedeira", "ferro de passar",
                "secador de cabelo", "aspirador", "chaleira",
            ]),
            brands: words(&[
                "Brastemp", "Consul", "Electrolux", "Continental", "Dako", "Atlas", "Esmaltec",
                "Mueller", "Fischer", "Tramontina", "Philco", "Midea", "LG", "Samsung",
                "Panasonic", "Bosch", "Whirlpool", "GE", "Britania", "Suggar", "Nardelli",
                "Cadence", "Mondial", "Franke", "Fogatti",
            ]),
            burner_words: words(&["burner", "burners", "boca", "bocas", "queimador", "queimadores"]),
            option_words: words(&["option", "number", "opcao", "numero", "n"]),
            personal_data_requests: words(&[
                "your full name", "your name", "your address", "your e mail", "your email",
                "your cpf", "your tax id", "cpf", "cnpj", "seu nome", "nome completo",
                "seu endereco", "seu e mail", "seu email", "seu cpf",
            ]),
            families: vec![
                KeywordGroup::new(F::Stove, &["stove", "range", "fogao", "fogoes"]),
                KeywordGroup::new(F::Cooktop, &["cooktop", "cook top", "hob"]),
                KeywordGroup::new(F::Oven, &["oven", "forno"]),
                KeywordGroup::new(
                    F::Microwave,
                    &["microwave", "microwave oven", "microondas", "micro ondas"],
                ),
                KeywordGroup::new(
                    F::RangeHood,
                    &["range hood", "hood", "cooker hood", "extractor hood", "coifa", "depurador"],
                ),
                KeywordGroup::new(
                    F::Dishwasher,
                    &["dishwasher", "dish washer", "lava loucas", "lava louca", "lavalouca"],
                ),
                KeywordGroup::new(
                    F::WashingMachine,
                    &[
                        "washing machine", "washer", "lavadora", "maquina de lavar",
                        "lava e seca", "lavar roupa",
                    ],
                ),
                KeywordGroup::new(F::Dryer, &["dryer", "tumble dryer", "secadora"]),
                KeywordGroup::new(
                    F::Refrigerator,
                    &["refrigerator", "fridge", "geladeira", "refrigerador"],
                ),
                KeywordGroup::new(F::Freezer, &["freezer", "congelador"]),
            ],
            variants: vec![
                KeywordGroup::new(Variant::Gas, &["gas", "a gas"]),
                KeywordGroup::new(Variant::Induction, &["induction", "inducao", "por inducao"]),
                KeywordGroup::new(
                    Variant::Electric,
                    &["electric", "electrical", "eletrico", "eletrica", "eletricidade"],
                ),
                KeywordGroup::new(
                    Variant::Countertop,
                    &["countertop", "counter top", "freestanding", "portable", "bancada", "de bancada", "de mesa"],
                ),
                KeywordGroup::new(
                    Variant::BuiltIn,
                    &["built in", "builtin", "integrated", "embutir", "de embutir", "embutido", "embutida"],
                ),
                KeywordGroup::new(
                    Variant::Industrial,
                    &["industrial", "commercial", "restaurant", "comercial", "de restaurante"],
                ),
            ],
            mounts: vec![
                KeywordGroup::new(Mount::BuiltIn, &["built in", "builtin", "embutir", "embutido", "embutida"]),
                KeywordGroup::new(Mount::Countertop, &["countertop", "bancada", "de bancada"]),
                KeywordGroup::new(Mount::Wall, &["wall", "wall mounted", "parede", "de parede"]),
                KeywordGroup::new(Mount::Island, &["island", "ilha", "de ilha"]),
                KeywordGroup::new(Mount::Freestanding, &["freestanding", "floor", "de piso", "piso"]),
            ],
            symptoms: vec![
                KeywordGroup::new(
                    Symptom::NoIgnition,
                    &[
                        "won t light", "wont light", "not lighting", "doesn t light",
                        "does not light", "won t ignite", "no ignition", "ignition",
                        "nao acende", "nao ascende", "acendimento", "nao esta acendendo",
                    ],
                ),
                KeywordGroup::new(
                    Symptom::GasSmell,
                    &[
                        "gas smell", "smells like gas", "smell of gas", "gas leak",
                        "cheiro de gas", "vazando gas", "vazamento de gas",
                    ],
                ),
                KeywordGroup::new(
                    Symptom::NotHeating,
                    &[
                        "not heating", "doesn t heat", "won t heat", "no heat",
                        "not getting hot", "nao esquenta", "nao aquece", "nao esta esquentando",
                    ],
                ),
                KeywordGroup::new(
                    Symptom::NotCooling,
                    &[
                        "not cooling", "doesn t cool", "won t cool", "not cold", "warm inside",
                        "nao gela", "nao esta gelando", "nao congela", "parou de gelar",
                    ],
                ),
                KeywordGroup::new(
                    Symptom::Leaking,
                    &[
                        "leaking", "leak", "leaks", "water on the floor", "vazando",
                        "vazamento", "pingando",
                    ],
                ),
                KeywordGroup::new(
                    Symptom::Noise,
                    &["noise", "noisy", "loud", "barulho", "ruido", "barulhento", "barulhenta"],
                ),
                KeywordGroup::new(
                    Symptom::NotTurningOn,
                    &[
                        "won t turn on", "doesn t turn on", "not turning on", "no power",
                        "dead", "nao liga", "nao ligou", "nao esta ligando", "sem energia",
                    ],
                ),
                KeywordGroup::new(
                    Symptom::NotDraining,
                    &[
                        "not draining", "won t drain", "doesn t drain", "water stays",
                        "nao drena", "nao escoa", "agua parada", "nao esvazia",
                    ],
                ),
                KeywordGroup::new(
                    Symptom::NotSpinning,
                    &["not spinning", "won t spin", "doesn t spin", "nao centrifuga", "nao gira", "nao bate"],
                ),
                KeywordGroup::new(
                    Symptom::Sparking,
                    &["sparking", "sparks", "spark", "faisca", "faiscando", "soltando faisca"],
                ),
                KeywordGroup::new(
                    Symptom::Door,
                    &["door", "door won t close", "seal", "porta", "trava da porta", "vedacao", "borracha"],
                ),
                KeywordGroup::new(
                    Symptom::Display,
                    &[
                        "display", "panel", "error code", "buttons", "painel", "visor",
                        "codigo de erro", "botoes",
                    ],
                ),
            ],
            ordinals: vec![
                KeywordGroup::new(1, &["first", "1st", "first one", "primeiro", "primeira"]),
                KeywordGroup::new(2, &["second", "2nd", "second one", "segundo", "segunda opcao"]),
                KeywordGroup::new(3, &["third", "3rd", "third one", "terceiro", "terceira"]),
            ],
            periods: vec![
                KeywordGroup::new(DayPeriod::Morning, &["morning", "manha", "de manha", "pela manha"]),
                KeywordGroup::new(DayPeriod::Afternoon, &["afternoon", "tarde", "a tarde", "pela tarde"]),
                KeywordGroup::new(DayPeriod::Evening, &["evening", "night", "noite", "a noite"]),
            ],
            field_labels: vec![
                KeywordGroup::new(SlotKey::Name, &["name", "full name", "nome", "nome completo"]),
                KeywordGroup::new(SlotKey::Address, &["address", "endereço", "endereco"]),
                KeywordGroup::new(
                    SlotKey::Complement,
                    &["complement", "apt", "apartment", "complemento", "apto", "bloco"],
                ),
                KeywordGroup::new(SlotKey::Email, &["email", "e-mail"]),
                KeywordGroup::new(SlotKey::TaxId, &["cpf", "cnpj", "tax id", "documento", "document"]),
            ],
            gas_types: vec![
                KeywordGroup::new(
                    "natural gas".to_owned(),
                    &["natural gas", "piped gas", "gas natural", "gas encanado", "encanado", "gas de rua"],
                ),
                KeywordGroup::new(
                    "bottled LPG".to_owned(),
                    &["lpg", "bottled", "cylinder", "propane", "glp", "botijao", "bujao"],
                ),
            ],
            power_types: vec![
                KeywordGroup::new("110/127V".to_owned(), &["110", "110v", "127", "127v"]),
                KeywordGroup::new("220V".to_owned(), &["220", "220v"]),
                KeywordGroup::new("bivolt".to_owned(), &["bivolt", "dual voltage"]),
            ],
        }
    }
}
