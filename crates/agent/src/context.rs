//! Shared per-turn inputs: tuned settings, wired collaborators and the state a gate sees.

use std::sync::Arc;
use std::time::Duration as StdDuration;

use chrono::{DateTime, Duration, Utc};

use fixdesk_core::audit::{AuditContext, AuditSink, TracingAuditSink};
use fixdesk_core::config::AppConfig;
use fixdesk_core::domain::session::{SessionState, SlotKey};
use fixdesk_core::flows::{FlowEngine, HandoffFlow};
use fixdesk_core::lexicon::{Lexicon, MatchText};
use fixdesk_core::quoting::{DeterministicServicePolicy, ServicePolicy};

use crate::collaborators::{
    KnowledgeBlock, KnowledgeLookup, NotificationSink, QuotingService, SchedulingService,
};
use crate::extractor::HeuristicExtractor;
use crate::knowledge::{load_blocks, TermOverlapLookup};
use crate::llm::LlmClient;
use crate::offline::{
    DisabledLlm, LogNotificationSink, OfflineSchedulingService, StaticQuotingService,
};
use crate::personal_data::PersonalDataParser;
use crate::scheduling::SlotChoiceResolver;

#[derive(Clone, Debug, PartialEq)]
pub struct RuntimeSettings {
    pub slot_ttl: Duration,
    pub disambiguation_cooldown: Duration,
    pub quote_cache_ttl: Duration,
    pub off_topic_threshold: u32,
    pub quoting_timeout: StdDuration,
    pub scheduling_timeout: StdDuration,
    pub notification_timeout: StdDuration,
    pub llm_timeout: StdDuration,
    pub llm_model: String,
    pub routing_enabled: bool,
    pub extraction_enabled: bool,
    pub currency_symbol: String,
    pub guarantee_days: u32,
}

impl Default for RuntimeSettings {
    fn default() -> Self {
        Self::from_config(&AppConfig::default())
    }
}

impl RuntimeSettings {
    pub fn from_config(config: &AppConfig) -> Self {
        Self {
            slot_ttl: config.funnel.slot_ttl(),
            disambiguation_cooldown: config.funnel.disambiguation_cooldown(),
            quote_cache_ttl: config.funnel.quote_cache_ttl(),
            off_topic_threshold: config.funnel.off_topic_threshold,
            quoting_timeout: StdDuration::from_secs(config.quoting.timeout_secs),
            scheduling_timeout: StdDuration::from_secs(config.scheduling.timeout_secs),
            notification_timeout: StdDuration::from_secs(config.notification.timeout_secs),
            llm_timeout: StdDuration::from_secs(config.llm.timeout_secs),
            llm_model: config.llm.model.clone(),
            routing_enabled: config.llm.routing_enabled,
            extraction_enabled: config.llm.extraction_enabled,
            currency_symbol: config.quoting.currency_symbol.clone(),
            guarantee_days: config.quoting.guarantee_days,
        }
    }

    /// Turns off every completion call; used when no completion provider is wired.
    pub fn without_llm(mut self) -> Self {
        self.routing_enabled = false;
        self.extraction_enabled = false;
        self
    }
}

/// External systems the funnel talks to.
#[derive(Clone)]
pub struct Collaborators {
    pub llm: Arc<dyn LlmClient>,
    pub quoting: Arc<dyn QuotingService>,
    pub scheduling: Arc<dyn SchedulingService>,
    pub notifications: Arc<dyn NotificationSink>,
    pub knowledge: Arc<dyn KnowledgeLookup>,
    pub knowledge_blocks: Arc<Vec<KnowledgeBlock>>,
    pub audit: Arc<dyn AuditSink>,
}

impl Collaborators {
    /// Local implementations only; nothing leaves the process.
    pub fn offline() -> Self {
        Self {
            llm: Arc::new(DisabledLlm),
            quoting: Arc::new(StaticQuotingService),
            scheduling: Arc::new(OfflineSchedulingService::default()),
            notifications: Arc::new(LogNotificationSink),
            knowledge: Arc::new(TermOverlapLookup),
            knowledge_blocks: Arc::new(Vec::new()),
            audit: Arc::new(TracingAuditSink),
        }
    }
}

/// Everything a gate may consult. Built once and shared by every turn.
pub struct Services {
    pub lexicon: Arc<Lexicon>,
    pub settings: RuntimeSettings,
    pub collaborators: Collaborators,
    pub policy: Arc<dyn ServicePolicy>,
    pub handoff: FlowEngine<HandoffFlow>,
    pub extractor: HeuristicExtractor,
    pub personal_data: PersonalDataParser,
    pub slot_choice: SlotChoiceResolver,
}

impl Services {
    pub fn new(
        lexicon: Arc<Lexicon>,
        settings: RuntimeSettings,
        collaborators: Collaborators,
    ) -> Result<Self, regex::Error> {
        Ok(Self {
            extractor: HeuristicExtractor::new(&lexicon)?,
            personal_data: PersonalDataParser::new(&lexicon)?,
            slot_choice: SlotChoiceResolver::new()?,
            lexicon,
            settings,
            collaborators,
            policy: Arc::new(DeterministicServicePolicy),
            handoff: FlowEngine::default(),
        })
    }

    /// Settings, lexicon and knowledge blocks as configured. The built-in lexicon is
    /// used when no lexicon file is set.
    pub fn from_config(config: &AppConfig, mut collaborators: Collaborators) -> anyhow::Result<Self> {
        let lexicon = match &config.lexicon.path {
            Some(path) => Lexicon::load(path)?,
            None => Lexicon::default(),
        };
        if let Some(path) = &config.lexicon.knowledge_path {
            let blocks = load_blocks(path)?;
            tracing::info!(
                event_name = "system.knowledge.loaded",
                blocks = blocks.len(),
                path = %path.display(),
                "knowledge blocks loaded"
            );
            collaborators.knowledge_blocks = Arc::new(blocks);
        }
        Ok(Self::new(Arc::new(lexicon), RuntimeSettings::from_config(config), collaborators)?)
    }
}

/// One inbound message as seen by a gate. `state` already carries the changes of
/// the gates that passed before it.
pub struct TurnContext<'a> {
    pub services: &'a Services,
    pub audit: &'a AuditContext,
    pub contact_handle: &'a str,
    pub raw_text: &'a str,
    pub text: MatchText,
    pub prior: &'a SessionState,
    pub state: SessionState,
    pub now: DateTime<Utc>,
}

impl<'a> TurnContext<'a> {
    pub fn lexicon(&self) -> &Lexicon {
        &self.services.lexicon
    }

    pub fn settings(&self) -> &RuntimeSettings {
        &self.services.settings
    }

    pub fn collaborators(&self) -> &Collaborators {
        &self.services.collaborators
    }

    pub fn fresh<'s>(&self, state: &'s SessionState, key: SlotKey) -> Option<&'s str> {
        state.fresh_value(key, self.now, self.settings().slot_ttl)
    }

    pub fn stale<'s>(&self, state: &'s SessionState, key: SlotKey) -> Option<&'s str> {
        state.stale_value(key, self.now, self.settings().slot_ttl)
    }
}
