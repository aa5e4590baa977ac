use chrono::{DateTime, Utc};
use serde_json::Value as JsonValue;

use kedai_company::{Company, CompanyCommand, CompanyEvent, DocumentKind, ReserveDocumentNumber, company_stream_id};
use kedai_core::TenantId;
use kedai_events::{EventBus, EventEnvelope};

use crate::command_dispatcher::{CommandDispatcher, DispatchError};
use crate::event_store::EventStore;
use crate::retry::{RetryPolicy, retry_on_conflict};

/// Sequential document numbers from the tenant's company stream.
///
/// Two concurrent reservations race on the stream version; the loser is
/// re-run and gets the next sequence.
pub struct DocumentNumbers<'a, S, B> {
    dispatcher: &'a CommandDispatcher<S, B>,
    retry: RetryPolicy,
}

impl<'a, S, B> DocumentNumbers<'a, S, B>
where
    S: EventStore,
    B: EventBus<EventEnvelope<JsonValue>>,
{
    pub fn new(dispatcher: &'a CommandDispatcher<S, B>) -> Self {
        Self {
            dispatcher,
            retry: RetryPolicy::default(),
        }
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// `INV-000042` and friends.
    #[tracing::instrument(skip(self), err)]
    pub async fn reserve(
        &self,
        tenant_id: TenantId,
        kind: DocumentKind,
        at: DateTime<Utc>,
    ) -> Result<String, DispatchError> {
        let command = CompanyCommand::ReserveNumber(ReserveDocumentNumber {
            tenant_id,
            kind,
            occurred_at: at,
        });
        let events = retry_on_conflict(self.retry, || {
            self.dispatcher
                .send::<Company>(tenant_id, company_stream_id(tenant_id), command.clone())
        })
        .await?;

        events
            .into_iter()
            .find_map(|e| match e {
                CompanyEvent::DocumentNumberReserved { number, .. } => Some(number),
                _ => None,
            })
            .ok_or_else(|| DispatchError::InvariantViolation("no document number was reserved".to_string()))
    }
}
