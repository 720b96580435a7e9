use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum FlowType {
    Handoff,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum FlowState {
    Active,
    Paused,
}

impl FlowState {
    pub fn from_paused(paused: bool) -> Self {
        if paused {
            Self::Paused
        } else {
            Self::Active
        }
    }

    pub fn is_paused(&self) -> bool {
        matches!(self, Self::Paused)
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum FlowEvent {
    HumanRequested,
    OffTopicLimitReached,
    ResumeRequested,
    InboundMessage,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct FlowContext {
    pub off_topic_count: u32,
    pub off_topic_threshold: u32,
}

impl Default for FlowContext {
    fn default() -> Self {
        Self { off_topic_count: 0, off_topic_threshold: 3 }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum FlowAction {
    PauseBot,
    NotifyOperator,
    ReplyHumanWillRespond,
    SuggestHandoff,
    ResumeBot,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransitionOutcome {
    pub from: FlowState,
    pub to: FlowState,
    pub event: FlowEvent,
    pub actions: Vec<FlowAction>,
}
