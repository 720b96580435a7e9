//! Ordered chain of gates evaluated over one inbound message.
//!
//! A gate either passes with a (possibly empty) patch, which later gates see
//! already applied, or replies and ends the turn. The order of [`default_gates`]
//! is the precedence of the conversation rules.

use anyhow::{Context, Result};
use async_trait::async_trait;

use fixdesk_core::domain::reply::Reply;
use fixdesk_core::domain::session::StatePatch;

use crate::context::TurnContext;
use crate::funnel::{EquipmentAmbiguityGate, FunnelGate};
use crate::guardrails::StateConsistencyGate;
use crate::handoff::{HumanRequestGate, PausedGate};
use crate::installation::InstallationGate;
use crate::personal_data::{PersonalDataFastPathGate, PersonalDataGate};
use crate::quote::QuoteGate;
use crate::routing::AiRoutingGate;
use crate::scheduling::{SchedulingChoiceGate, SchedulingOfferGate};

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum GateOutcome {
    Continue(StatePatch),
    Reply(Reply, StatePatch),
}

impl GateOutcome {
    pub fn pass() -> Self {
        Self::Continue(StatePatch::new())
    }
}

#[async_trait]
pub trait Gate: Send + Sync {
    fn name(&self) -> &'static str;
    async fn evaluate(&self, turn: &TurnContext<'_>) -> Result<GateOutcome>;
}

pub fn default_gates() -> Vec<Box<dyn Gate>> {
    vec![
        Box::new(PausedGate),
        Box::new(HumanRequestGate),
        Box::new(StateConsistencyGate),
        Box::new(InstallationGate),
        Box::new(SchedulingChoiceGate),
        Box::new(EquipmentAmbiguityGate),
        Box::new(PersonalDataFastPathGate),
        Box::new(FunnelGate),
        Box::new(QuoteGate),
        Box::new(PersonalDataGate),
        Box::new(SchedulingOfferGate),
        Box::new(AiRoutingGate),
    ]
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PipelineResult {
    pub reply: Option<Reply>,
    /// Every change made during the turn, in order.
    pub patch: StatePatch,
    pub gate: Option<&'static str>,
}

pub struct Pipeline {
    gates: Vec<Box<dyn Gate>>,
}

impl Default for Pipeline {
    fn default() -> Self {
        Self::new(default_gates())
    }
}

impl Pipeline {
    pub fn new(gates: Vec<Box<dyn Gate>>) -> Self {
        Self { gates }
    }

    pub fn gate_names(&self) -> Vec<&'static str> {
        self.gates.iter().map(|gate| gate.name()).collect()
    }

    /// Runs the gates in order. `turn.state` is advanced after each pass so every
    /// gate sees the effects of the ones before it.
    pub async fn run(&self, turn: &mut TurnContext<'_>) -> Result<PipelineResult> {
        let mut accumulated = StatePatch::new();

        for gate in &self.gates {
            let outcome = gate
                .evaluate(turn)
                .await
                .with_context(|| format!("gate `{}` failed", gate.name()))?;

            match outcome {
                GateOutcome::Continue(patch) => {
                    if !patch.is_empty() {
                        turn.state = turn.state.apply(&patch, turn.now);
                        accumulated.extend(patch);
                    }
                }
                GateOutcome::Reply(reply, patch) => {
                    tracing::debug!(
                        event_name = "turn.gate_replied",
                        correlation_id = %turn.audit.correlation_id,
                        gate = gate.name(),
                        "gate produced the reply"
                    );
                    turn.state = turn.state.apply(&patch, turn.now);
                    accumulated.extend(patch);
                    return Ok(PipelineResult {
                        reply: Some(reply),
                        patch: accumulated,
                        gate: Some(gate.name()),
                    });
                }
            }
        }

        Ok(PipelineResult { reply: None, patch: accumulated, gate: None })
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use anyhow::{bail, Result};
    use async_trait::async_trait;
    use chrono::Utc;

    use fixdesk_core::audit::AuditContext;
    use fixdesk_core::domain::reply::Reply;
    use fixdesk_core::domain::session::{SessionState, SlotKey, StatePatch};
    use fixdesk_core::lexicon::{Lexicon, MatchText};

    use super::{Gate, GateOutcome, Pipeline};
    use crate::context::{Collaborators, RuntimeSettings, Services, TurnContext};

    struct SetBrand;

    #[async_trait]
    impl Gate for SetBrand {
        fn name(&self) -> &'static str {
            "set_brand"
        }

        async fn evaluate(&self, _turn: &TurnContext<'_>) -> Result<GateOutcome> {
            let patch = StatePatch::new().with(StatePatch::set_slot(SlotKey::Brand, "Electrolux"));
            Ok(GateOutcome::Continue(patch))
        }
    }

    struct EchoBrand;

    #[async_trait]
    impl Gate for EchoBrand {
        fn name(&self) -> &'static str {
            "echo_brand"
        }

        async fn evaluate(&self, turn: &TurnContext<'_>) -> Result<GateOutcome> {
            let brand = turn.state.slots.value(SlotKey::Brand).unwrap_or("none").to_owned();
            Ok(GateOutcome::Reply(Reply::text(brand), StatePatch::new()))
        }
    }

    struct Failing;

    #[async_trait]
    impl Gate for Failing {
        fn name(&self) -> &'static str {
            "failing"
        }

        async fn evaluate(&self, _turn: &TurnContext<'_>) -> Result<GateOutcome> {
            bail!("boom")
        }
    }

    fn services() -> Services {
        Services::new(
            Arc::new(Lexicon::default()),
            RuntimeSettings::default().without_llm(),
            Collaborators::offline(),
        )
        .expect("services")
    }

    async fn run(pipeline: &Pipeline) -> Result<super::PipelineResult> {
        let services = services();
        let audit = AuditContext::new(None, None, "corr-1".to_owned(), "test");
        let prior = SessionState::default();
        let mut turn = TurnContext {
            services: &services,
            audit: &audit,
            contact_handle: "contact",
            raw_text: "hello",
            text: MatchText::new("hello"),
            prior: &prior,
            state: prior.clone(),
            now: Utc::now(),
        };
        pipeline.run(&mut turn).await
    }

    #[tokio::test]
    async fn later_gates_see_earlier_patches_and_reply_short_circuits() {
        let pipeline =
            Pipeline::new(vec![Box::new(SetBrand), Box::new(EchoBrand), Box::new(Failing)]);

        let result = run(&pipeline).await.expect("pipeline result");

        assert_eq!(result.reply, Some(Reply::text("Electrolux")));
        assert_eq!(result.gate, Some("echo_brand"));
        assert_eq!(
            result.patch,
            StatePatch::new().with(StatePatch::set_slot(SlotKey::Brand, "Electrolux"))
        );
    }

    #[tokio::test]
    async fn gate_errors_name_the_gate() {
        let pipeline = Pipeline::new(vec![Box::new(SetBrand), Box::new(Failing)]);

        let error = run(&pipeline).await.expect_err("failing gate");

        assert!(error.to_string().contains("failing"));
    }

    #[tokio::test]
    async fn no_reply_when_every_gate_passes() {
        let result = run(&Pipeline::new(vec![Box::new(SetBrand)])).await.expect("result");

        assert_eq!(result.reply, None);
        assert_eq!(result.gate, None);
    }

    #[test]
    fn default_order_starts_with_handoff_and_ends_with_routing() {
        let names = Pipeline::default().gate_names();

        assert_eq!(names.len(), 12);
        assert_eq!(&names[..3], &["handoff_paused", "human_request", "state_consistency"]);
        assert_eq!(names.last().copied(), Some("ai_routing"));
    }
}
