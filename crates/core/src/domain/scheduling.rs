use chrono::{DateTime, FixedOffset, Timelike, Utc};
use serde::{Deserialize, Serialize};

/// Maximum number of appointment offers kept in state.
pub const MAX_OFFERED_SLOTS: usize = 3;

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct OfferedSlot {
    /// 1-based position as presented to the customer.
    pub index: u8,
    #[serde(default)]
    pub starts_at: Option<DateTime<FixedOffset>>,
    #[serde(default)]
    pub label: Option<String>,
}

impl OfferedSlot {
    pub fn display(&self) -> String {
        match (&self.label, self.starts_at) {
            (Some(label), _) => label.clone(),
            (None, Some(starts_at)) => starts_at.format("%d/%m %H:%M").to_string(),
            (None, None) => format!("option {}", self.index),
        }
    }

    pub fn minutes_of_day(&self) -> Option<u32> {
        self.starts_at.map(|starts_at| starts_at.hour() * 60 + starts_at.minute())
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DayPeriod {
    Morning,
    Afternoon,
    Evening,
}

impl DayPeriod {
    /// Offers are always presented morning, afternoon, evening.
    pub fn slot_index(&self) -> u8 {
        match self {
            Self::Morning => 1,
            Self::Afternoon => 2,
            Self::Evening => 3,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfirmedBooking {
    pub slot_label: String,
    #[serde(default)]
    pub starts_at: Option<DateTime<FixedOffset>>,
    pub confirmation: String,
    pub confirmed_at: DateTime<Utc>,
}
