use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::errors::DomainError;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EquipmentFamily {
    Stove,
    Cooktop,
    Oven,
    Microwave,
    RangeHood,
    Dishwasher,
    WashingMachine,
    Dryer,
    Refrigerator,
    Freezer,
}

impl EquipmentFamily {
    pub const ALL: [Self; 10] = [
        Self::Stove,
        Self::Cooktop,
        Self::Oven,
        Self::Microwave,
        Self::RangeHood,
        Self::Dishwasher,
        Self::WashingMachine,
        Self::Dryer,
        Self::Refrigerator,
        Self::Freezer,
    ];

    pub fn key(&self) -> &'static str {
        match self {
            Self::Stove => "stove",
            Self::Cooktop => "cooktop",
            Self::Oven => "oven",
            Self::Microwave => "microwave",
            Self::RangeHood => "range_hood",
            Self::Dishwasher => "dishwasher",
            Self::WashingMachine => "washing_machine",
            Self::Dryer => "dryer",
            Self::Refrigerator => "refrigerator",
            Self::Freezer => "freezer",
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Self::Stove => "stove",
            Self::Cooktop => "cooktop",
            Self::Oven => "oven",
            Self::Microwave => "microwave",
            Self::RangeHood => "range hood",
            Self::Dishwasher => "dishwasher",
            Self::WashingMachine => "washing machine",
            Self::Dryer => "dryer",
            Self::Refrigerator => "refrigerator",
            Self::Freezer => "freezer",
        }
    }

    /// Sub-types offered when the customer names the family without a qualifier.
    /// Families returning an empty slice never need disambiguation.
    pub fn disambiguation_variants(&self) -> &'static [Variant] {
        match self {
            Self::Stove => &[Variant::Gas, Variant::Induction, Variant::Electric],
            Self::Microwave => &[Variant::Countertop, Variant::BuiltIn],
            Self::Oven => &[Variant::BuiltIn, Variant::Countertop, Variant::Industrial],
            _ => &[],
        }
    }

    pub fn allows(&self, variant: Variant) -> bool {
        match self {
            Self::Stove | Self::Cooktop => matches!(
                variant,
                Variant::Gas | Variant::Induction | Variant::Electric | Variant::Industrial
            ),
            Self::Oven | Self::Microwave => {
                matches!(variant, Variant::BuiltIn | Variant::Countertop | Variant::Industrial)
            }
            _ => false,
        }
    }

    pub fn is_wet(&self) -> bool {
        matches!(self, Self::Dishwasher | Self::WashingMachine)
    }

    pub fn is_refrigeration(&self) -> bool {
        matches!(self, Self::Refrigerator | Self::Freezer)
    }
}

impl FromStr for EquipmentFamily {
    type Err = DomainError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let normalized = value.trim().to_ascii_lowercase();
        Self::ALL.into_iter().find(|family| family.key() == normalized).ok_or_else(|| {
            DomainError::InvariantViolation(format!("unknown equipment family `{value}`"))
        })
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Variant {
    Gas,
    Induction,
    Electric,
    Countertop,
    BuiltIn,
    Industrial,
}

impl Variant {
    pub const ALL: [Self; 6] = [
        Self::Gas,
        Self::Induction,
        Self::Electric,
        Self::Countertop,
        Self::BuiltIn,
        Self::Industrial,
    ];

    pub fn key(&self) -> &'static str {
        match self {
            Self::Gas => "gas",
            Self::Induction => "induction",
            Self::Electric => "electric",
            Self::Countertop => "countertop",
            Self::BuiltIn => "built_in",
            Self::Industrial => "industrial",
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Self::Gas => "gas",
            Self::Induction => "induction",
            Self::Electric => "electric",
            Self::Countertop => "countertop",
            Self::BuiltIn => "built-in",
            Self::Industrial => "industrial",
        }
    }
}

impl FromStr for Variant {
    type Err = DomainError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let normalized = value.trim().to_ascii_lowercase();
        Self::ALL
            .into_iter()
            .find(|variant| variant.key() == normalized)
            .ok_or_else(|| DomainError::InvariantViolation(format!("unknown variant `{value}`")))
    }
}

/// Fully or partially qualified equipment. Stored in the `equipment` slot using its
/// canonical `family[:variant]` form.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Equipment {
    pub family: EquipmentFamily,
    pub variant: Option<Variant>,
}

impl Equipment {
    pub fn new(family: EquipmentFamily) -> Self {
        Self { family, variant: None }
    }

    pub fn with_variant(family: EquipmentFamily, variant: Variant) -> Self {
        Self { family, variant: family.allows(variant).then_some(variant) }
    }

    pub fn needs_disambiguation(&self) -> bool {
        self.variant.is_none() && !self.family.disambiguation_variants().is_empty()
    }

    pub fn is_industrial(&self) -> bool {
        self.variant == Some(Variant::Industrial)
    }

    /// Human-readable name such as "gas stove" or "built-in microwave".
    pub fn label(&self) -> String {
        match self.variant {
            Some(variant) => format!("{} {}", variant.label(), self.family.label()),
            None => self.family.label().to_string(),
        }
    }
}

impl fmt::Display for Equipment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.variant {
            Some(variant) => write!(f, "{}:{}", self.family.key(), variant.key()),
            None => write!(f, "{}", self.family.key()),
        }
    }
}

impl FromStr for Equipment {
    type Err = DomainError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let (family, variant) = match value.split_once(':') {
            Some((family, variant)) => (family, Some(variant)),
            None => (value, None),
        };
        let family = family.parse::<EquipmentFamily>()?;
        match variant {
            Some(variant) => {
                let variant = variant.parse::<Variant>()?;
                if !family.allows(variant) {
                    return Err(DomainError::InvariantViolation(format!(
                        "variant `{}` is not valid for `{}`",
                        variant.key(),
                        family.key()
                    )));
                }
                Ok(Self::with_variant(family, variant))
            }
            None => Ok(Self::new(family)),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Mount {
    BuiltIn,
    Countertop,
    Wall,
    Island,
    Freestanding,
}

impl Mount {
    pub const ALL: [Self; 5] =
        [Self::BuiltIn, Self::Countertop, Self::Wall, Self::Island, Self::Freestanding];

    pub fn key(&self) -> &'static str {
        match self {
            Self::BuiltIn => "built_in",
            Self::Countertop => "countertop",
            Self::Wall => "wall",
            Self::Island => "island",
            Self::Freestanding => "freestanding",
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Self::BuiltIn => "built-in",
            Self::Countertop => "countertop",
            Self::Wall => "wall-mounted",
            Self::Island => "island",
            Self::Freestanding => "freestanding",
        }
    }
}

impl FromStr for Mount {
    type Err = DomainError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let normalized = value.trim().to_ascii_lowercase();
        Self::ALL
            .into_iter()
            .find(|mount| mount.key() == normalized)
            .ok_or_else(|| DomainError::InvariantViolation(format!("unknown mount `{value}`")))
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Symptom {
    NoIgnition,
    GasSmell,
    NotHeating,
    NotCooling,
    Leaking,
    Noise,
    NotTurningOn,
    NotDraining,
    NotSpinning,
    Sparking,
    Door,
    Display,
    #[default]
    Other,
}

impl Symptom {
    /// Ignition and gas-smell complaints only make sense on gas cooking surfaces.
    pub fn implied_variant(&self, family: EquipmentFamily) -> Option<Variant> {
        match (self, family) {
            (Self::NoIgnition | Self::GasSmell, EquipmentFamily::Stove | EquipmentFamily::Cooktop) => {
                Some(Variant::Gas)
            }
            _ => None,
        }
    }
}
