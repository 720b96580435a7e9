//! End-to-end conversations driven through `AgentRuntime` with scripted collaborators
//! and a fixed clock.

use std::sync::{Arc, Mutex};
use std::time::Duration as StdDuration;

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use chrono::{DateTime, Duration, FixedOffset, TimeZone, Utc};

use fixdesk_agent::collaborators::{
    ConfirmRequest, ConfirmResponse, ConfirmStatus, CustomerContext, HandoffNotice,
    NotificationSink, QuotingService, SchedulingService, SlotOffer, QUOTING,
};
use fixdesk_agent::knowledge::TermOverlapLookup;
use fixdesk_agent::llm::{ChatMessage, CompletionConfig, LlmClient};
use fixdesk_agent::offline::{DisabledLlm, StaticQuotingService};
use fixdesk_agent::{AgentRuntime, Collaborators, RuntimeSettings, Services, TurnResult};
use fixdesk_core::audit::{AuditContext, InMemoryAuditSink};
use fixdesk_core::domain::quote::{QuoteRequest, QuoteResponse, ServiceType};
use fixdesk_core::domain::reply::Reply;
use fixdesk_core::domain::scheduling::OfferedSlot;
use fixdesk_core::domain::session::{ConversationId, SessionState, SlotKey};
use fixdesk_core::errors::CollaboratorError;
use fixdesk_core::lexicon::Lexicon;

const CONTACT: &str = "+5511999990000";

fn start() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 3, 2, 13, 0, 0).single().expect("timestamp")
}

#[derive(Default)]
struct ScriptedScheduling {
    confirmed: Mutex<Vec<ConfirmRequest>>,
}

impl ScriptedScheduling {
    fn confirmations(&self) -> usize {
        self.confirmed.lock().expect("lock").len()
    }
}

#[async_trait]
impl SchedulingService for ScriptedScheduling {
    async fn offer_slots(&self, _customer: &CustomerContext) -> Result<SlotOffer, CollaboratorError> {
        let offset = FixedOffset::west_opt(3 * 3600).expect("offset");
        let slots = [9, 14, 19]
            .into_iter()
            .enumerate()
            .map(|(position, hour)| OfferedSlot {
                index: position as u8 + 1,
                starts_at: offset.with_ymd_and_hms(2026, 3, 3, hour, 0, 0).single(),
                label: None,
            })
            .collect();
        Ok(SlotOffer { message: "These are the next available times:".to_owned(), slots })
    }

    async fn confirm(&self, request: &ConfirmRequest) -> Result<ConfirmResponse, CollaboratorError> {
        let mut confirmed = self.confirmed.lock().expect("lock");
        let repeated = confirmed
            .iter()
            .any(|earlier| earlier.phone == request.phone && earlier.choice == request.choice);
        confirmed.push(request.clone());
        let status = if repeated { ConfirmStatus::Duplicate } else { ConfirmStatus::Confirmed };
        Ok(ConfirmResponse { status, message: String::new() })
    }
}

#[derive(Default)]
struct RecordingNotifications {
    notices: Mutex<Vec<HandoffNotice>>,
}

#[async_trait]
impl NotificationSink for RecordingNotifications {
    async fn notify(&self, notice: &HandoffNotice) -> Result<(), CollaboratorError> {
        self.notices.lock().expect("lock").push(notice.clone());
        Ok(())
    }
}

struct NoQuote;

#[async_trait]
impl QuotingService for NoQuote {
    async fn build_quote(
        &self,
        _request: &QuoteRequest,
    ) -> Result<Option<QuoteResponse>, CollaboratorError> {
        Ok(None)
    }
}

struct SlowQuote;

#[async_trait]
impl QuotingService for SlowQuote {
    async fn build_quote(
        &self,
        _request: &QuoteRequest,
    ) -> Result<Option<QuoteResponse>, CollaboratorError> {
        tokio::time::sleep(StdDuration::from_millis(500)).await;
        Err(CollaboratorError::unavailable(QUOTING, "never answers in time"))
    }
}

struct ScriptedLlm {
    response: String,
}

#[async_trait]
impl LlmClient for ScriptedLlm {
    async fn complete(&self, _config: &CompletionConfig, _messages: &[ChatMessage]) -> Result<String> {
        if self.response.is_empty() {
            return Err(anyhow!("scripted failure"));
        }
        Ok(self.response.clone())
    }
}

struct Harness {
    runtime: AgentRuntime,
    audit: Arc<InMemoryAuditSink>,
    scheduling: Arc<ScriptedScheduling>,
    notifications: Arc<RecordingNotifications>,
}

struct HarnessBuilder {
    settings: RuntimeSettings,
    quoting: Arc<dyn QuotingService>,
    llm: Arc<dyn LlmClient>,
}

impl HarnessBuilder {
    fn new() -> Self {
        Self {
            settings: RuntimeSettings::default().without_llm(),
            quoting: Arc::new(StaticQuotingService),
            llm: Arc::new(DisabledLlm),
        }
    }

    fn quoting(mut self, quoting: Arc<dyn QuotingService>) -> Self {
        self.quoting = quoting;
        self
    }

    fn routing_llm(mut self, response: &str) -> Self {
        self.settings.routing_enabled = true;
        self.llm = Arc::new(ScriptedLlm { response: response.to_owned() });
        self
    }

    fn settings(mut self, adjust: impl FnOnce(&mut RuntimeSettings)) -> Self {
        adjust(&mut self.settings);
        self
    }

    fn build(self) -> Harness {
        let audit = Arc::new(InMemoryAuditSink::default());
        let scheduling = Arc::new(ScriptedScheduling::default());
        let notifications = Arc::new(RecordingNotifications::default());
        let collaborators = Collaborators {
            llm: self.llm,
            quoting: self.quoting,
            scheduling: scheduling.clone(),
            notifications: notifications.clone(),
            knowledge: Arc::new(TermOverlapLookup),
            knowledge_blocks: Arc::new(Vec::new()),
            audit: audit.clone(),
        };
        let services = Services::new(Arc::new(Lexicon::default()), self.settings, collaborators)
            .expect("services");
        Harness { runtime: AgentRuntime::new(services), audit, scheduling, notifications }
    }
}

/// One customer talking to the runtime; the state is threaded between turns.
struct Conversation<'h> {
    harness: &'h Harness,
    state: SessionState,
    now: DateTime<Utc>,
}

impl<'h> Conversation<'h> {
    fn new(harness: &'h Harness) -> Self {
        Self { harness, state: SessionState::default(), now: start() }
    }

    fn wait(&mut self, minutes: i64) {
        self.now += Duration::minutes(minutes);
    }

    async fn send(&mut self, text: &str) -> TurnResult {
        let result = self.turn_from(&self.state, text).await;
        self.state = result.next_state.clone();
        result
    }

    /// Runs a turn against `state` without advancing the conversation.
    async fn turn_from(&self, state: &SessionState, text: &str) -> TurnResult {
        let audit = AuditContext::new(None, Some("test".to_owned()), "corr-test", "agent");
        self.harness.runtime.process_turn_at(&audit, CONTACT, text, state, self.now).await
    }

    async fn say(&mut self, text: &str) -> String {
        body(&self.send(text).await)
    }
}

fn body(result: &TurnResult) -> String {
    result.reply.as_ref().map(Reply::render_plain).unwrap_or_default()
}

fn mentions_personal_data(text: &str) -> bool {
    let lowered = text.to_lowercase();
    ["full name", "your name", "address", "e-mail", "email", "cpf", "cnpj"]
        .iter()
        .any(|needle| lowered.contains(needle))
}

/// Runs the conversation up to the appointment offer.
async fn reach_offer(conversation: &mut Conversation<'_>) {
    conversation.say("My stove won't light").await;
    conversation.say("Brastemp").await;
    conversation.say("yes").await;
    conversation
        .say("Maria Silva\nRua das Flores, 123\nmaria.silva@example.com\n529.982.247-25")
        .await;
    assert!(conversation.state.flags.pending_time_selection);
}

#[tokio::test]
async fn full_repair_conversation_ends_in_a_booking() {
    let harness = HarnessBuilder::new().build();
    let mut conversation = Conversation::new(&harness);

    let reply = conversation.say("My stove won't light").await;
    assert_eq!(reply, "Got it, I've noted the problem with your gas stove. Which brand is it?");
    assert_eq!(conversation.state.awaiting, Some(SlotKey::Brand));

    let quote = conversation.say("Brastemp").await;
    assert!(quote.starts_with("Here is the quote for your Brastemp gas stove:"), "{quote}");
    assert!(quote.contains("- Service: on-site technical visit"));
    assert!(quote.contains("- Price: R$ 180"));
    assert!(quote.contains("- Possible causes:"));
    assert!(quote.contains("90-day guarantee"));
    assert!(quote.ends_with("Reply yes to schedule."));
    assert!(conversation.state.flags.quote_delivered);
    assert!(!conversation.state.flags.accepted_service);

    let ask = conversation.say("yes").await;
    assert_eq!(
        ask,
        "To book the service I still need your full name, full address, e-mail and CPF or CNPJ. \
         You can send everything in one message, one item per line."
    );
    assert!(conversation.state.flags.accepted_service);
    assert_eq!(conversation.state.awaiting, Some(SlotKey::Name));

    let offer = conversation
        .send("Maria Silva\nRua das Flores, 123\nmaria.silva@example.com\n529.982.247-25")
        .await;
    match offer.reply {
        Some(Reply::Options { ref options, .. }) => assert_eq!(options.len(), 3),
        ref other => panic!("expected slot options, got {other:?}"),
    }
    assert_eq!(conversation.state.slots.value(SlotKey::TaxId), Some("52998224725"));
    assert!(conversation.state.flags.pending_time_selection);

    let confirmation = conversation.say("2").await;
    assert!(confirmation.starts_with("All set! Your on-site technical visit is booked for 03/03 14:00."));
    assert!(conversation.state.booking.is_some());
    assert!(conversation.state.offered_slots.is_empty());
    assert_eq!(harness.scheduling.confirmations(), 1);

    let events: Vec<String> =
        harness.audit.events().into_iter().map(|event| event.event_type).collect();
    for expected in ["quote.delivered", "quote.accepted", "scheduling.slots_offered", "scheduling.confirmed"] {
        assert!(events.iter().any(|event| event == expected), "missing {expected}");
    }
    assert_eq!(events.iter().filter(|event| *event == "turn.completed").count(), 5);
}

#[tokio::test]
async fn repeated_confirmation_gets_the_same_reply() {
    let harness = HarnessBuilder::new().build();
    let mut conversation = Conversation::new(&harness);
    reach_offer(&mut conversation).await;
    let offered = conversation.state.clone();

    let first = conversation.turn_from(&offered, "2").await;
    let retried = conversation.turn_from(&offered, "2").await;

    assert_eq!(harness.scheduling.confirmations(), 2);
    assert_eq!(body(&first), body(&retried));
    assert!(body(&retried).starts_with("All set!"));

    // A repeated choice after the booking repeats the stored confirmation.
    let again = conversation.turn_from(&first.next_state, "2").await;
    assert_eq!(body(&again), body(&first));
    assert_eq!(harness.scheduling.confirmations(), 2);
}

#[tokio::test]
async fn slot_choice_accepts_number_period_and_time() {
    let harness = HarnessBuilder::new().build();
    let mut conversation = Conversation::new(&harness);
    reach_offer(&mut conversation).await;
    let offered = conversation.state.clone();

    for choice in ["2", "afternoon", "14h", "I want the afternoon", "pode ser à tarde"] {
        let result = conversation.turn_from(&offered, choice).await;
        let booking = result.next_state.booking.expect("booking recorded");
        assert_eq!(booking.slot_label, "03/03 14:00", "choice {choice}");
    }

    let evening = conversation.turn_from(&offered, "quero de noite").await;
    assert_eq!(evening.next_state.booking.expect("booking recorded").slot_label, "03/03 19:00");
}

#[tokio::test]
async fn greeting_while_times_are_offered_books_nothing() {
    let harness = HarnessBuilder::new().build();
    let mut conversation = Conversation::new(&harness);
    reach_offer(&mut conversation).await;

    let reply = conversation.say("boa tarde, tudo bem?").await;

    assert!(!reply.starts_with("All set!"), "{reply}");
    assert!(conversation.state.booking.is_none());
    assert_eq!(harness.scheduling.confirmations(), 0);
}

#[tokio::test]
async fn bare_stove_asks_for_the_type_and_gas_stove_does_not() {
    let harness = HarnessBuilder::new().build();

    let mut bare = Conversation::new(&harness);
    let result = bare.send("stove").await;
    match result.reply {
        Some(Reply::Options { ref options, .. }) => {
            let labels: Vec<&str> = options.iter().map(|option| option.text.as_str()).collect();
            assert_eq!(labels, vec!["Gas stove", "Induction stove", "Electric stove"]);
        }
        ref other => panic!("expected a structured prompt, got {other:?}"),
    }
    assert_eq!(result.gate, Some("equipment_ambiguity"));

    let answered = bare.say("2").await;
    assert_eq!(answered, "What's the brand of your induction stove, and what problem is it having?");
    assert_eq!(bare.state.slots.value(SlotKey::Equipment), Some("stove:induction"));
    assert_eq!(bare.state.flags.pending_equipment_type, None);

    let mut specific = Conversation::new(&harness);
    let result = specific.send("gas stove").await;
    assert!(matches!(result.reply, Some(Reply::Text(_))));
    assert_eq!(result.gate, Some("funnel"));
    assert_eq!(body(&result), "What's the brand of your gas stove, and what problem is it having?");
}

#[tokio::test]
async fn stale_brand_is_reconfirmed_before_quoting() {
    let harness = HarnessBuilder::new().build();
    let mut conversation = Conversation::new(&harness);

    let reply = conversation.say("dishwasher Brastemp").await;
    assert_eq!(reply, "What's happening with your Brastemp dishwasher? Describe the problem in a few words.");

    conversation.wait(31);
    let reply = conversation.say("it's leaking").await;
    assert_eq!(reply, "Is your dishwasher still a Brastemp? Reply yes or tell me the brand.");
    assert!(!conversation.state.flags.quote_delivered);

    let quote = conversation.say("yes").await;
    assert!(quote.starts_with("Here is the quote for your Brastemp dishwasher:"), "{quote}");
}

#[tokio::test]
async fn correction_after_quote_switches_equipment_and_resets_progress() {
    let harness = HarnessBuilder::new().build();
    let mut conversation = Conversation::new(&harness);
    conversation.say("My stove won't light").await;
    conversation.say("Brastemp").await;
    assert!(conversation.state.flags.quote_delivered);

    let reply = conversation.say("actually it's my dishwasher").await;

    assert_eq!(reply, "What's the brand of your dishwasher, and what problem is it having?");
    let state = &conversation.state;
    assert_eq!(state.slots.value(SlotKey::Equipment), Some("dishwasher"));
    assert_eq!(state.slots.value(SlotKey::Brand), None);
    assert_eq!(state.slots.value(SlotKey::Problem), None);
    assert!(state.last_quote.is_none());
    assert!(!state.flags.quote_delivered);
    assert!(!state.flags.accepted_service);
}

#[tokio::test]
async fn switch_without_correction_marker_is_confirmed_first() {
    let harness = HarnessBuilder::new().build();
    let mut conversation = Conversation::new(&harness);
    conversation.say("My stove won't light").await;
    conversation.say("Brastemp").await;

    let question = conversation.say("what about my dishwasher").await;
    assert!(question.starts_with("Just to confirm:"), "{question}");
    assert_eq!(conversation.state.slots.value(SlotKey::Equipment), Some("stove:gas"));
    assert!(conversation.state.flags.quote_delivered);

    let reply = conversation.say("yes").await;
    assert_eq!(reply, "What's the brand of your dishwasher, and what problem is it having?");
    assert!(!conversation.state.flags.accepted_service);
    assert_eq!(conversation.state.flags.pending_equipment_switch, None);
}

#[tokio::test]
async fn personal_data_is_never_requested_before_acceptance() {
    let harness = HarnessBuilder::new().build();
    let mut conversation = Conversation::new(&harness);

    for text in ["hi", "my fridge is not cooling", "Electrolux", "how much is it?", "no"] {
        let reply = conversation.say(text).await;
        assert!(!conversation.state.flags.accepted_service);
        assert!(!mentions_personal_data(&reply), "{text:?} produced {reply:?}");
    }
}

#[tokio::test]
async fn questions_after_the_quote_do_not_accept_it() {
    let harness = HarnessBuilder::new().build();
    let mut conversation = Conversation::new(&harness);
    conversation.say("My stove won't light").await;
    conversation.say("Brastemp").await;
    assert!(conversation.state.flags.quote_delivered);

    for text in [
        "I want to know if the visit fee is deducted from the repair",
        "quero saber se a visita é descontada",
        "pode ser no sábado?",
    ] {
        let reply = conversation.say(text).await;
        assert!(!conversation.state.flags.accepted_service, "{text:?} accepted the quote");
        assert!(!conversation.state.flags.collecting_personal_data);
        assert!(!mentions_personal_data(&reply), "{text:?} produced {reply:?}");
    }

    conversation.say("yes").await;
    assert!(conversation.state.flags.accepted_service);
}

#[tokio::test]
async fn installation_checklist_hands_back_to_the_quote() {
    let harness = HarnessBuilder::new().build();
    let mut conversation = Conversation::new(&harness);

    let first = conversation.send("I need to install my new dishwasher").await;
    assert_eq!(first.gate, Some("installation"));
    match first.reply {
        Some(Reply::Options { ref text, ref options }) => {
            assert!(text.starts_with("Great, we also do installations!"), "{text}");
            assert_eq!(options.len(), 2);
        }
        ref other => panic!("expected the mount options, got {other:?}"),
    }
    assert_eq!(conversation.state.slots.value(SlotKey::Equipment), Some("dishwasher"));

    let water = conversation.say("2").await;
    assert!(water.starts_with("Are the water inlet and drain points"), "{water}");
    assert_eq!(conversation.state.slots.value(SlotKey::Mount), Some("freestanding"));

    let again = conversation.say("let me check").await;
    assert!(again.starts_with("Sorry, I didn't catch that. Are the water inlet"), "{again}");
    let progress = conversation.state.installation.as_ref().expect("installation progress");
    assert!(!progress.answers.contains_key("water_points"));
    assert!(!progress.complete);

    let brand_question = conversation.send("yes").await;
    assert_eq!(brand_question.gate, Some("funnel"));
    assert!(body(&brand_question).contains("Which brand is it?"), "{}", body(&brand_question));
    let progress = conversation.state.installation.as_ref().expect("installation progress");
    assert!(progress.complete);
    assert_eq!(progress.answers.get("water_points").map(String::as_str), Some("yes"));

    let quote = conversation.say("Brastemp").await;
    assert!(quote.starts_with("Here is the quote for your Brastemp dishwasher:"), "{quote}");
    assert!(quote.contains("- Service: installation visit"));
    assert!(quote.contains("- Price: R$ 220"));
    assert!(!quote.contains("Possible causes"), "{quote}");
    let cached = conversation.state.last_quote.as_ref().expect("cached quote");
    assert_eq!(cached.service_type, ServiceType::Installation);

    let ask = conversation.say("yes").await;
    assert!(conversation.state.flags.accepted_service);
    assert!(mentions_personal_data(&ask), "{ask}");
}

#[tokio::test]
async fn audit_events_carry_the_conversation_id() {
    let harness = HarnessBuilder::new().build();
    let id = ConversationId("conv-42".to_owned());

    let result = harness
        .runtime
        .process_turn(&id, CONTACT, "my fridge is not cooling", &SessionState::default())
        .await;

    assert!(result.reply.is_some());
    let events = harness.audit.events();
    assert!(events.iter().any(|event| event.event_type == "turn.completed"));
    assert!(events.iter().all(|event| event.conversation_id.as_ref() == Some(&id)));
}

#[tokio::test]
async fn human_request_pauses_until_the_resume_phrase() {
    let harness = HarnessBuilder::new().build();
    let mut conversation = Conversation::new(&harness);
    conversation.say("My stove won't light").await;

    let handoff = conversation.say("I want to talk to a human").await;
    assert!(handoff.contains("attendants"), "{handoff}");
    assert!(conversation.state.flags.bot_paused);

    let paused = conversation.say("Brastemp").await;
    assert!(paused.starts_with("An attendant will reply here shortly."));
    assert_eq!(conversation.state.slots.value(SlotKey::Brand), None);

    let resumed = conversation.say("back to bot").await;
    assert!(resumed.starts_with("Welcome back!"), "{resumed}");
    assert!(!conversation.state.flags.bot_paused);

    // The operator notice is delivered in the background.
    for _ in 0..50 {
        if !harness.notifications.notices.lock().expect("lock").is_empty() {
            break;
        }
        tokio::time::sleep(StdDuration::from_millis(10)).await;
    }
    let notices = harness.notifications.notices.lock().expect("lock");
    assert_eq!(notices.len(), 1);
    assert_eq!(notices[0].contact_handle, CONTACT);
    assert_eq!(notices[0].equipment.as_deref(), Some("gas stove"));
    assert_eq!(notices[0].last_message, "I want to talk to a human");
}

#[tokio::test]
async fn repeated_off_topic_messages_suggest_a_handoff() {
    let harness = HarnessBuilder::new().build();
    let mut conversation = Conversation::new(&harness);

    let first = conversation.say("who won the football game last night").await;
    assert!(first.starts_with("Sorry, I can only help with appliance repair and installation."));
    conversation.say("who won the football game last night").await;
    let third = conversation.say("who won the football game last night").await;

    assert!(third.contains("talk to a human"), "{third}");
    assert_eq!(conversation.state.flags.off_topic_count, 3);
    assert!(!conversation.state.flags.bot_paused);
}

#[tokio::test]
async fn missing_quote_falls_back_to_a_clarifying_question() {
    let harness = HarnessBuilder::new().quoting(Arc::new(NoQuote)).build();
    let mut conversation = Conversation::new(&harness);
    conversation.say("My stove won't light").await;

    let result = conversation.send("Brastemp").await;
    assert_eq!(result.gate, Some("quote"));
    assert!(body(&result).starts_with("To give you an accurate price"));
    assert!(!conversation.state.flags.quote_delivered);
    assert_eq!(conversation.state.awaiting, Some(SlotKey::Problem));
}

#[tokio::test]
async fn slow_quoting_service_is_cut_off() {
    let harness = HarnessBuilder::new()
        .quoting(Arc::new(SlowQuote))
        .settings(|settings| settings.quoting_timeout = StdDuration::from_millis(20))
        .build();
    let mut conversation = Conversation::new(&harness);
    conversation.say("My stove won't light").await;

    let reply = conversation.say("Brastemp").await;
    assert!(reply.starts_with("To give you an accurate price"));
}

#[tokio::test]
async fn completion_routing_answers_questions_and_falls_back_on_bad_output() {
    let answering = HarnessBuilder::new()
        .routing_llm(r#"{"action": "answer_question", "answer": "Yes, we also work on Saturdays."}"#)
        .build();
    let mut conversation = Conversation::new(&answering);
    let reply = conversation.say("do you also work on weekends").await;
    assert!(reply.starts_with("Yes, we also work on Saturdays.\n\nWhich appliance needs service?"), "{reply}");

    let confused = HarnessBuilder::new().routing_llm("I think this is off topic").build();
    let mut conversation = Conversation::new(&confused);
    let reply = conversation.say("who won the football game last night").await;
    assert!(reply.starts_with("Sorry, I can only help with appliance repair and installation."));
}

#[tokio::test]
async fn empty_message_produces_no_reply() {
    let harness = HarnessBuilder::new().build();
    let conversation = Conversation::new(&harness);

    let result = conversation.turn_from(&SessionState::default(), "  ?! ").await;
    assert_eq!(result.reply, None);
    assert_eq!(result.next_state, SessionState::default());
    assert!(harness.audit.events().is_empty());
}
