//! Narrow interfaces to the systems the funnel depends on but does not own.
//!
//! Every call goes through [`bounded`], so a slow collaborator degrades to a
//! deterministic fallback instead of holding the turn.

use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, FixedOffset};
use serde::{Deserialize, Serialize};

use fixdesk_core::domain::quote::{QuoteRequest, QuoteResponse, ServiceType};
use fixdesk_core::domain::scheduling::OfferedSlot;
use fixdesk_core::domain::session::{SessionState, SlotKey};
use fixdesk_core::errors::CollaboratorError;

pub const QUOTING: &str = "quoting";
pub const SCHEDULING: &str = "scheduling";
pub const NOTIFICATION: &str = "notification";
pub const COMPLETION: &str = "completion";

#[async_trait]
pub trait QuotingService: Send + Sync {
    /// `Ok(None)` means the service has no price for this input.
    async fn build_quote(
        &self,
        request: &QuoteRequest,
    ) -> Result<Option<QuoteResponse>, CollaboratorError>;
}

/// What the scheduling side needs to know about the customer.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CustomerContext {
    pub contact_handle: String,
    pub name: Option<String>,
    pub address: Option<String>,
    pub complement: Option<String>,
    pub email: Option<String>,
    pub tax_id: Option<String>,
    pub equipment: Option<String>,
    pub brand: Option<String>,
    pub problem: Option<String>,
    pub service_type: Option<ServiceType>,
}

impl CustomerContext {
    pub fn from_state(contact_handle: &str, state: &SessionState) -> Self {
        let value = |key: SlotKey| state.slots.value(key).map(str::to_owned);
        Self {
            contact_handle: contact_handle.to_owned(),
            name: value(SlotKey::Name),
            address: value(SlotKey::Address),
            complement: value(SlotKey::Complement),
            email: value(SlotKey::Email),
            tax_id: value(SlotKey::TaxId),
            equipment: value(SlotKey::Equipment),
            brand: value(SlotKey::Brand),
            problem: value(SlotKey::Problem),
            service_type: state.last_quote.as_ref().map(|quote| quote.service_type),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SlotOffer {
    pub message: String,
    #[serde(default)]
    pub slots: Vec<OfferedSlot>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfirmRequest {
    pub phone: String,
    pub choice: u8,
    pub starts_at: Option<DateTime<FixedOffset>>,
    pub customer: CustomerContext,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConfirmStatus {
    Confirmed,
    AlreadyInProgress,
    Duplicate,
    Rejected,
}

impl ConfirmStatus {
    /// Repeated confirmations count as success for the customer.
    pub fn is_success(&self) -> bool {
        !matches!(self, Self::Rejected)
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfirmResponse {
    pub status: ConfirmStatus,
    #[serde(default)]
    pub message: String,
}

#[async_trait]
pub trait SchedulingService: Send + Sync {
    async fn offer_slots(&self, customer: &CustomerContext) -> Result<SlotOffer, CollaboratorError>;

    /// Must be safe to retry with the same arguments.
    async fn confirm(&self, request: &ConfirmRequest) -> Result<ConfirmResponse, CollaboratorError>;
}

/// Triage context sent to the operator when a conversation is handed off.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct HandoffNotice {
    pub contact_handle: String,
    pub last_message: String,
    pub equipment: Option<String>,
    pub brand: Option<String>,
    pub problem: Option<String>,
}

#[async_trait]
pub trait NotificationSink: Send + Sync {
    async fn notify(&self, notice: &HandoffNotice) -> Result<(), CollaboratorError>;
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct KnowledgeBlock {
    pub id: String,
    pub title: String,
    pub content: String,
    #[serde(default)]
    pub tags: Vec<String>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct KnowledgeContext {
    pub equipment: Option<String>,
    pub limit: usize,
}

/// Read-only ranked lookup over knowledge blocks.
pub trait KnowledgeLookup: Send + Sync {
    fn find_relevant_blocks(
        &self,
        blocks: &[KnowledgeBlock],
        text: &str,
        context: &KnowledgeContext,
    ) -> Vec<KnowledgeBlock>;
}

/// Runs a collaborator call under `timeout`, mapping expiry to [`CollaboratorError::Timeout`].
pub async fn bounded<T, F>(
    collaborator: &'static str,
    timeout: Duration,
    call: F,
) -> Result<T, CollaboratorError>
where
    F: Future<Output = Result<T, CollaboratorError>>,
{
    match tokio::time::timeout(timeout, call).await {
        Ok(result) => {
            if let Err(error) = &result {
                tracing::warn!(
                    event_name = "collaborator.failed",
                    collaborator,
                    error = %error,
                    "collaborator call failed"
                );
            }
            result
        }
        Err(_) => {
            let timeout_ms = u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX);
            tracing::warn!(
                event_name = "collaborator.timeout",
                collaborator,
                timeout_ms,
                "collaborator call timed out"
            );
            Err(CollaboratorError::Timeout { collaborator: collaborator.to_owned(), timeout_ms })
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use fixdesk_core::errors::CollaboratorError;

    use super::{bounded, ConfirmStatus};

    #[tokio::test]
    async fn bounded_call_times_out() {
        let result: Result<(), CollaboratorError> =
            bounded("quoting", Duration::from_millis(10), async {
                tokio::time::sleep(Duration::from_millis(200)).await;
                Ok(())
            })
            .await;

        assert!(matches!(
            result,
            Err(CollaboratorError::Timeout { ref collaborator, timeout_ms: 10 }) if collaborator == "quoting"
        ));
    }

    #[tokio::test]
    async fn bounded_call_passes_results_through() {
        let result = bounded("scheduling", Duration::from_secs(1), async { Ok(7) }).await;
        assert_eq!(result.ok(), Some(7));
    }

    #[test]
    fn duplicate_confirmations_are_successes() {
        assert!(ConfirmStatus::Duplicate.is_success());
        assert!(ConfirmStatus::AlreadyInProgress.is_success());
        assert!(!ConfirmStatus::Rejected.is_success());
    }
}
