use regex::Regex;

use fixdesk_core::domain::equipment::{Equipment, EquipmentFamily, Mount, Symptom, Variant};
use fixdesk_core::lexicon::{normalize_text, Lexicon, MatchText};

/// Longest problem description kept in the session.
pub const MAX_PROBLEM_CHARS: usize = 160;

/// Slot candidates found in one message. Nothing here has been merged into state yet.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ExtractedSlots {
    pub family: Option<EquipmentFamily>,
    pub variant: Option<Variant>,
    pub brand: Option<String>,
    pub symptom: Option<Symptom>,
    pub problem: Option<String>,
    pub mount: Option<Mount>,
    pub burner_count: Option<u8>,
    pub power_type: Option<String>,
}

impl ExtractedSlots {
    pub fn equipment(&self) -> Option<Equipment> {
        let family = self.family?;
        Some(match self.variant {
            Some(variant) => Equipment::with_variant(family, variant),
            None => Equipment::new(family),
        })
    }

    pub fn is_empty(&self) -> bool {
        self == &Self::default()
    }

    /// Fills only the fields that are still empty.
    pub fn fill_missing(&mut self, other: ExtractedSlots) {
        if self.family.is_none() {
            self.family = other.family;
            self.variant = self.variant.or(other.variant);
        }
        self.brand = self.brand.take().or(other.brand);
        self.symptom = self.symptom.or(other.symptom);
        self.problem = self.problem.take().or(other.problem);
        self.mount = self.mount.or(other.mount);
        self.burner_count = self.burner_count.or(other.burner_count);
        self.power_type = self.power_type.take().or(other.power_type);
    }
}

/// Keyword and pattern based slot filling.
#[derive(Clone, Debug)]
pub struct HeuristicExtractor {
    burners: Regex,
}

impl HeuristicExtractor {
    pub fn new(lexicon: &Lexicon) -> Result<Self, regex::Error> {
        let mut words: Vec<String> = lexicon
            .burner_words
            .iter()
            .map(|word| normalize_text(word))
            .filter(|word| !word.is_empty())
            .map(|word| regex::escape(&word))
            .collect();
        words.sort_by_key(|word| std::cmp::Reverse(word.len()));
        let alternation = if words.is_empty() { "burners".to_owned() } else { words.join("|") };
        let burners = Regex::new(&format!(r"\b(\d{{1,2}})\s*(?:{alternation})\b"))?;
        Ok(Self { burners })
    }

    pub fn extract(&self, lexicon: &Lexicon, raw: &str, text: &MatchText) -> ExtractedSlots {
        let family = lexicon.family(text);
        let symptom = lexicon.symptom(text);
        let variant = family.and_then(|family| {
            lexicon
                .variant(text, family)
                .or_else(|| symptom.and_then(|symptom| symptom.implied_variant(family)))
        });

        ExtractedSlots {
            family,
            variant,
            brand: lexicon.brand(text),
            symptom,
            problem: symptom.map(|_| problem_text(raw)),
            mount: lexicon.mount(text),
            burner_count: self.burner_count(text),
            power_type: lexicon.power_type(text),
        }
    }

    fn burner_count(&self, text: &MatchText) -> Option<u8> {
        self.burners
            .captures(text.as_str())
            .and_then(|captures| captures.get(1))
            .and_then(|count| count.as_str().parse::<u8>().ok())
            .filter(|count| (1..=12).contains(count))
    }
}

/// Customer wording, trimmed to the stored length.
pub fn problem_text(raw: &str) -> String {
    let collapsed = raw.split_whitespace().collect::<Vec<_>>().join(" ");
    collapsed.chars().take(MAX_PROBLEM_CHARS).collect()
}

#[cfg(test)]
mod tests {
    use fixdesk_core::domain::equipment::{
        Equipment, EquipmentFamily, Mount, Symptom, Variant,
    };
    use fixdesk_core::lexicon::{Lexicon, MatchText};

    use super::{problem_text, ExtractedSlots, HeuristicExtractor, MAX_PROBLEM_CHARS};

    fn extract(raw: &str) -> ExtractedSlots {
        let lexicon = Lexicon::default();
        let extractor = HeuristicExtractor::new(&lexicon).expect("patterns compile");
        extractor.extract(&lexicon, raw, &MatchText::new(raw))
    }

    #[test]
    fn ignition_complaint_fills_family_variant_and_problem() {
        let slots = extract("My stove won't light");

        assert_eq!(slots.equipment(), Some(Equipment::with_variant(EquipmentFamily::Stove, Variant::Gas)));
        assert_eq!(slots.symptom, Some(Symptom::NoIgnition));
        assert_eq!(slots.problem.as_deref(), Some("My stove won't light"));
        assert_eq!(slots.brand, None);
    }

    #[test]
    fn brand_burners_and_voltage_are_picked_up() {
        let slots = extract("Fogão Dako de 5 bocas, 220v");

        assert_eq!(slots.family, Some(EquipmentFamily::Stove));
        assert_eq!(slots.brand.as_deref(), Some("Dako"));
        assert_eq!(slots.burner_count, Some(5));
        assert_eq!(slots.power_type.as_deref(), Some("220V"));
        assert_eq!(slots.problem, None);
    }

    #[test]
    fn mount_is_extracted_for_microwaves() {
        let slots = extract("it's a built-in microwave");
        assert_eq!(slots.mount, Some(Mount::BuiltIn));
        assert_eq!(slots.variant, Some(Variant::BuiltIn));
    }

    #[test]
    fn greeting_extracts_nothing() {
        assert!(extract("good morning!").is_empty());
    }

    #[test]
    fn secondary_extraction_only_fills_gaps() {
        let mut primary = extract("Brastemp dishwasher");
        primary.fill_missing(ExtractedSlots {
            family: Some(EquipmentFamily::Oven),
            brand: Some("Consul".to_owned()),
            problem: Some("leaks water".to_owned()),
            ..ExtractedSlots::default()
        });

        assert_eq!(primary.family, Some(EquipmentFamily::Dishwasher));
        assert_eq!(primary.brand.as_deref(), Some("Brastemp"));
        assert_eq!(primary.problem.as_deref(), Some("leaks water"));
    }

    #[test]
    fn long_problem_text_is_truncated() {
        let raw = "noise ".repeat(60);
        assert_eq!(problem_text(&raw).chars().count(), MAX_PROBLEM_CHARS);
    }
}
