pub mod ambiguity;
pub mod audit;
pub mod config;
pub mod domain;
pub mod errors;
pub mod flows;
pub mod lexicon;
pub mod quoting;

pub use ambiguity::{AmbiguityOutcome, EquipmentAmbiguityResolver};
pub use domain::equipment::{Equipment, EquipmentFamily, Mount, Symptom, Variant};
pub use domain::quote::{CachedQuote, QuoteAmount, QuoteRequest, QuoteResponse, ServiceType};
pub use domain::reply::{Reply, ReplyOption};
pub use domain::scheduling::{ConfirmedBooking, DayPeriod, OfferedSlot};
pub use domain::session::{
    ConversationId, FlagKey, SessionRecord, SessionState, SlotKey, StateChange, StatePatch,
};
pub use errors::{ApplicationError, CollaboratorError, DomainError, InterfaceError};
pub use lexicon::{Lexicon, MatchText};
