//! Dialogue orchestration for the repair and installation funnel.
//!
//! Every inbound message goes through [`runtime::AgentRuntime::process_turn`], which
//! runs an ordered chain of gates ([`pipeline::default_gates`]) over an immutable
//! session snapshot and returns the reply together with the next state. Callers that
//! share a session store should go through [`service::ConversationService`] so turns
//! for one conversation never overlap.
//!
//! The completion model is only ever used to classify a message or fill funnel gaps.
//! Prices, slots and bookings always come from the collaborators.

pub mod collaborators;
pub mod context;
pub mod extractor;
pub mod funnel;
pub mod guardrails;
pub mod handoff;
pub mod installation;
pub mod knowledge;
pub mod llm;
pub mod offline;
pub mod personal_data;
pub mod pipeline;
pub mod quote;
pub mod routing;
pub mod runtime;
pub mod scheduling;
pub mod service;

pub use context::{Collaborators, RuntimeSettings, Services, TurnContext};
pub use pipeline::{Gate, GateOutcome, Pipeline};
pub use runtime::{AgentRuntime, TurnResult};
pub use service::{ConversationService, InboundOutcome};
