//! Local stand-ins for collaborators that are not configured. They keep the
//! funnel usable in development and make conversation tests deterministic.

use std::collections::HashSet;
use std::sync::Mutex;

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use chrono::{Datelike, Duration, FixedOffset, NaiveDate, Utc, Weekday};
use rust_decimal::Decimal;

use fixdesk_core::domain::quote::{QuoteRequest, QuoteResponse, ServiceType};
use fixdesk_core::domain::scheduling::OfferedSlot;
use fixdesk_core::errors::CollaboratorError;

use crate::collaborators::{
    ConfirmRequest, ConfirmResponse, ConfirmStatus, CustomerContext, HandoffNotice,
    NotificationSink, QuotingService, SchedulingService, SlotOffer, QUOTING, SCHEDULING,
};
use crate::llm::{ChatMessage, CompletionConfig, LlmClient};

/// Price table keyed by service type.
#[derive(Clone, Debug, Default)]
pub struct StaticQuotingService;

#[async_trait]
impl QuotingService for StaticQuotingService {
    async fn build_quote(
        &self,
        request: &QuoteRequest,
    ) -> Result<Option<QuoteResponse>, CollaboratorError> {
        if request.brand.trim().is_empty() || request.problem.trim().is_empty() {
            return Err(CollaboratorError::malformed(QUOTING, "brand and problem are required"));
        }

        let surcharge = if request.equipment.is_industrial() { 100 } else { 0 };
        let (value, min, max) = match request.service_type {
            ServiceType::OnSiteVisit => (Some(180 + surcharge), None, None),
            ServiceType::PickupForDiagnosis => (Some(120 + surcharge), None, None),
            ServiceType::PickupForRepair => (None, Some(150 + surcharge), Some(250 + surcharge)),
            ServiceType::Installation => (Some(220 + surcharge), None, None),
        };

        Ok(Some(QuoteResponse {
            found: true,
            value: value.map(Decimal::from),
            min: min.map(Decimal::from),
            max: max.map(Decimal::from),
            service_type: request.service_type,
            causes: Vec::new(),
        }))
    }
}

const SLOT_HOURS: [(u32, &str); 3] = [(9, "morning"), (14, "afternoon"), (19, "evening")];

/// Offers morning, afternoon and evening on the next working day and remembers
/// confirmations so a repeated confirm reports a duplicate.
#[derive(Debug, Default)]
pub struct OfflineSchedulingService {
    start_date: Option<NaiveDate>,
    confirmed: Mutex<HashSet<String>>,
}

impl OfflineSchedulingService {
    pub fn starting_on(date: NaiveDate) -> Self {
        Self { start_date: Some(date), confirmed: Mutex::new(HashSet::new()) }
    }

    fn offset() -> Result<FixedOffset, CollaboratorError> {
        FixedOffset::west_opt(3 * 3600)
            .ok_or_else(|| CollaboratorError::malformed(SCHEDULING, "invalid local offset"))
    }

    fn visit_date(&self, offset: FixedOffset) -> NaiveDate {
        let mut date = self
            .start_date
            .unwrap_or_else(|| (Utc::now().with_timezone(&offset) + Duration::days(1)).date_naive());
        while date.weekday() == Weekday::Sun {
            date += Duration::days(1);
        }
        date
    }
}

#[async_trait]
impl SchedulingService for OfflineSchedulingService {
    async fn offer_slots(&self, _customer: &CustomerContext) -> Result<SlotOffer, CollaboratorError> {
        let offset = Self::offset()?;
        let date = self.visit_date(offset);

        let mut slots = Vec::with_capacity(SLOT_HOURS.len());
        for (position, (hour, period)) in SLOT_HOURS.iter().enumerate() {
            let starts_at = date
                .and_hms_opt(*hour, 0, 0)
                .and_then(|naive| naive.and_local_timezone(offset).single())
                .ok_or_else(|| CollaboratorError::malformed(SCHEDULING, "invalid slot time"))?;
            slots.push(OfferedSlot {
                index: u8::try_from(position + 1).unwrap_or(u8::MAX),
                starts_at: Some(starts_at),
                label: Some(format!("{} at {:02}:00 ({period})", date.format("%a %d/%m"), hour)),
            });
        }

        Ok(SlotOffer { message: "These are the next available times:".to_owned(), slots })
    }

    async fn confirm(&self, request: &ConfirmRequest) -> Result<ConfirmResponse, CollaboratorError> {
        let key = format!(
            "{}:{}:{}",
            request.phone,
            request.choice,
            request.starts_at.map(|starts_at| starts_at.to_rfc3339()).unwrap_or_default()
        );
        let inserted = match self.confirmed.lock() {
            Ok(mut confirmed) => confirmed.insert(key),
            Err(poisoned) => poisoned.into_inner().insert(key),
        };

        let status = if inserted { ConfirmStatus::Confirmed } else { ConfirmStatus::Duplicate };
        Ok(ConfirmResponse { status, message: "booking registered".to_owned() })
    }
}

/// Writes handoff notices to the log.
#[derive(Clone, Debug, Default)]
pub struct LogNotificationSink;

#[async_trait]
impl NotificationSink for LogNotificationSink {
    async fn notify(&self, notice: &HandoffNotice) -> Result<(), CollaboratorError> {
        tracing::info!(
            event_name = "handoff.notified",
            contact_handle = %notice.contact_handle,
            equipment = notice.equipment.as_deref().unwrap_or("-"),
            brand = notice.brand.as_deref().unwrap_or("-"),
            problem = notice.problem.as_deref().unwrap_or("-"),
            "conversation handed off to an operator"
        );
        Ok(())
    }
}

/// Completion client used when no provider is configured; every call fails.
#[derive(Clone, Debug, Default)]
pub struct DisabledLlm;

#[async_trait]
impl LlmClient for DisabledLlm {
    async fn complete(&self, _config: &CompletionConfig, _messages: &[ChatMessage]) -> Result<String> {
        Err(anyhow!("completion service is not configured"))
    }
}

#[cfg(test)]
mod tests {
    use chrono::{NaiveDate, Timelike};

    use fixdesk_core::domain::equipment::{Equipment, EquipmentFamily, Symptom, Variant};
    use fixdesk_core::domain::quote::{QuoteAmount, QuoteRequest, ServiceType};

    use super::{OfflineSchedulingService, StaticQuotingService};
    use crate::collaborators::{
        ConfirmRequest, ConfirmStatus, CustomerContext, QuotingService, SchedulingService,
    };

    #[tokio::test]
    async fn static_quotes_are_deterministic() {
        let request = QuoteRequest {
            equipment: Equipment::with_variant(EquipmentFamily::Stove, Variant::Gas),
            brand: "Brastemp".to_owned(),
            problem: "won't light".to_owned(),
            symptom: Symptom::NoIgnition,
            mount: None,
            burner_count: Some(4),
            power_type: None,
            service_type: ServiceType::OnSiteVisit,
        };

        let first = StaticQuotingService.build_quote(&request).await.expect("quote");
        let second = StaticQuotingService.build_quote(&request).await.expect("quote");

        assert_eq!(first, second);
        assert_eq!(
            first.and_then(|response| response.amount()),
            Some(QuoteAmount::Fixed(180.into()))
        );
    }

    #[tokio::test]
    async fn offline_schedule_skips_sunday_and_offers_three_periods() {
        let sunday = NaiveDate::from_ymd_opt(2026, 3, 1).expect("date");
        let service = OfflineSchedulingService::starting_on(sunday);
        let offer = service.offer_slots(&CustomerContext::default()).await.expect("offer");

        let hours: Vec<u32> = offer
            .slots
            .iter()
            .filter_map(|slot| slot.starts_at.map(|starts_at| starts_at.hour()))
            .collect();
        assert_eq!(hours, vec![9, 14, 19]);
        assert!(offer.slots[0].label.as_deref().is_some_and(|label| label.starts_with("Mon 02/03")));
    }

    #[tokio::test]
    async fn repeated_confirm_reports_duplicate() {
        let service = OfflineSchedulingService::default();
        let request = ConfirmRequest {
            phone: "+5511999990000".to_owned(),
            choice: 2,
            starts_at: None,
            customer: CustomerContext::default(),
        };

        let first = service.confirm(&request).await.expect("confirm");
        let second = service.confirm(&request).await.expect("confirm again");

        assert_eq!(first.status, ConfirmStatus::Confirmed);
        assert_eq!(second.status, ConfirmStatus::Duplicate);
    }
}
