use chrono::{DateTime, Duration, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::domain::equipment::{Equipment, Mount, Symptom};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ServiceType {
    OnSiteVisit,
    PickupForDiagnosis,
    PickupForRepair,
    Installation,
}

impl ServiceType {
    pub fn label(&self) -> &'static str {
        match self {
            Self::OnSiteVisit => "on-site technical visit",
            Self::PickupForDiagnosis => "pickup for workshop diagnosis",
            Self::PickupForRepair => "pickup for workshop repair",
            Self::Installation => "installation visit",
        }
    }
}

/// Input handed to the quoting collaborator.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuoteRequest {
    pub equipment: Equipment,
    pub brand: String,
    pub problem: String,
    pub symptom: Symptom,
    pub mount: Option<Mount>,
    pub burner_count: Option<u8>,
    pub power_type: Option<String>,
    pub service_type: ServiceType,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuoteResponse {
    pub found: bool,
    #[serde(default)]
    pub value: Option<Decimal>,
    #[serde(default)]
    pub min: Option<Decimal>,
    #[serde(default)]
    pub max: Option<Decimal>,
    pub service_type: ServiceType,
    #[serde(default)]
    pub causes: Vec<String>,
}

impl QuoteResponse {
    /// A fixed value wins over a range; a half-open range is not a usable price.
    pub fn amount(&self) -> Option<QuoteAmount> {
        if !self.found {
            return None;
        }
        match (self.value, self.min, self.max) {
            (Some(value), _, _) if value > Decimal::ZERO => Some(QuoteAmount::Fixed(value)),
            (_, Some(min), Some(max)) if min > Decimal::ZERO && max >= min => {
                Some(QuoteAmount::Range { min, max })
            }
            _ => None,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum QuoteAmount {
    Fixed(Decimal),
    Range { min: Decimal, max: Decimal },
}

impl QuoteAmount {
    pub fn render(&self, currency_symbol: &str) -> String {
        match self {
            Self::Fixed(value) => format!("{currency_symbol} {}", value.round_dp(2)),
            Self::Range { min, max } => format!(
                "between {currency_symbol} {} and {currency_symbol} {}",
                min.round_dp(2),
                max.round_dp(2)
            ),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CachedQuote {
    /// Canonical equipment string the quote was produced for.
    pub equipment: String,
    #[serde(default)]
    pub brand: String,
    #[serde(default)]
    pub symptom: Symptom,
    pub amount: QuoteAmount,
    pub service_type: ServiceType,
    pub causes: Vec<String>,
    pub quoted_at: DateTime<Utc>,
}

impl CachedQuote {
    /// Reusable only for the same equipment, brand, symptom and service type, within `ttl`.
    pub fn is_valid_for(&self, request: &QuoteRequest, now: DateTime<Utc>, ttl: Duration) -> bool {
        self.equipment == request.equipment.to_string()
            && self.brand.trim().eq_ignore_ascii_case(request.brand.trim())
            && self.symptom == request.symptom
            && self.service_type == request.service_type
            && now - self.quoted_at <= ttl
    }
}
