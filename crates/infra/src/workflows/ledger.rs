use chrono::{DateTime, Utc};
use serde_json::Value as JsonValue;
use tracing::debug;
use uuid::Uuid;

use kedai_accounting::{InitializeChart, JournalCommand, JournalLine, Ledger, LedgerId, PostJournalEntry};
use kedai_core::TenantId;
use kedai_events::{EventBus, EventEnvelope};

use crate::command_dispatcher::{CommandDispatcher, DispatchError};
use crate::event_store::EventStore;
use crate::retry::{RetryPolicy, retry_on_conflict};

/// Posts journal entries to the tenant's ledger.
///
/// Entry ids are deterministic per source document and purpose, so posting
/// the same effect twice is a no-op. The chart is created on first use.
pub struct LedgerPoster<'a, S, B> {
    dispatcher: &'a CommandDispatcher<S, B>,
    retry: RetryPolicy,
}

impl<'a, S, B> LedgerPoster<'a, S, B>
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

    pub async fn ledger(&self, tenant_id: TenantId) -> Result<Ledger, DispatchError> {
        self.dispatcher
            .load(tenant_id, LedgerId::for_tenant(tenant_id).0)
            .await
    }

    /// Creates the default chart unless it exists. Losing the race to
    /// another initializer is fine.
    pub async fn ensure_chart(&self, tenant_id: TenantId, at: DateTime<Utc>) -> Result<(), DispatchError> {
        let ledger_id = LedgerId::for_tenant(tenant_id);
        if self.ledger(tenant_id).await?.is_initialized() {
            return Ok(());
        }
        let command = JournalCommand::InitializeChart(InitializeChart {
            tenant_id,
            ledger_id,
            occurred_at: at,
        });
        match self.dispatcher.send::<Ledger>(tenant_id, ledger_id.0, command).await {
            Ok(_) | Err(DispatchError::Conflict(_)) | Err(DispatchError::Concurrency(_)) => Ok(()),
            Err(err) => Err(err),
        }
    }

    /// Posts `lines` under `entry_id`. Returns `false` when there was
    /// nothing to post or the entry was already there.
    #[tracing::instrument(skip(self, lines, description, source, at), fields(lines = lines.len()), err)]
    pub async fn post(
        &self,
        tenant_id: TenantId,
        entry_id: Uuid,
        lines: Vec<JournalLine>,
        description: &str,
        source: Option<&str>,
        at: DateTime<Utc>,
    ) -> Result<bool, DispatchError> {
        if lines.is_empty() {
            return Ok(false);
        }
        self.ensure_chart(tenant_id, at).await?;

        let ledger_id = LedgerId::for_tenant(tenant_id);
        let command = JournalCommand::PostJournalEntry(PostJournalEntry {
            tenant_id,
            ledger_id,
            entry_id,
            lines,
            description: description.to_string(),
            source: source.map(str::to_string),
            occurred_at: at,
        });

        let outcome = retry_on_conflict(self.retry, || {
            let command = command.clone();
            async move {
                if self.ledger(tenant_id).await?.has_posted(entry_id) {
                    return Ok(false);
                }
                self.dispatcher.send::<Ledger>(tenant_id, ledger_id.0, command).await?;
                Ok(true)
            }
        })
        .await;

        match outcome {
            Err(DispatchError::Conflict(msg)) => {
                if self.ledger(tenant_id).await?.has_posted(entry_id) {
                    debug!(%entry_id, "journal entry already posted");
                    Ok(false)
                } else {
                    Err(DispatchError::Conflict(msg))
                }
            }
            other => other,
        }
    }

    /// Posts the mirror image of entry `original` under `reversal_id`.
    /// An original that was never posted has nothing to reverse.
    pub async fn reverse(
        &self,
        tenant_id: TenantId,
        original: Uuid,
        reversal_id: Uuid,
        description: &str,
        source: Option<&str>,
        at: DateTime<Utc>,
    ) -> Result<bool, DispatchError> {
        let ledger = self.ledger(tenant_id).await?;
        let Some(lines) = ledger.entry(original) else {
            return Ok(false);
        };
        let lines = kedai_accounting::posting::reverse(lines);
        self.post(tenant_id, reversal_id, lines, description, source, at).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::workflows::test_support::backend;
    use kedai_accounting::{codes, posting};
    use kedai_core::Money;

    #[tokio::test]
    async fn first_post_initializes_the_chart() {
        let d = backend();
        let tenant = TenantId::new();
        let poster = LedgerPoster::new(&d);
        let entry = Uuid::now_v7();

        let posted = poster
            .post(
                tenant,
                entry,
                posting::invoice_sent(Money::from_sen(10_000), Money::from_sen(800)),
                "Invoice INV-000001",
                Some("INV-000001"),
                Utc::now(),
            )
            .await
            .unwrap();
        assert!(posted);

        let ledger = poster.ledger(tenant).await.unwrap();
        assert!(ledger.is_initialized());
        assert!(ledger.account(codes::ROUNDING).is_some());
        assert_eq!(ledger.entry(entry).map(<[JournalLine]>::len), Some(3));
    }

    #[tokio::test]
    async fn posting_twice_is_a_no_op() {
        let d = backend();
        let tenant = TenantId::new();
        let poster = LedgerPoster::new(&d);
        let entry = Uuid::now_v7();
        let lines = posting::payment_received(Money::from_sen(500), true);

        assert!(poster.post(tenant, entry, lines.clone(), "Payment", None, Utc::now()).await.unwrap());
        assert!(!poster.post(tenant, entry, lines, "Payment", None, Utc::now()).await.unwrap());
        assert!(!poster.post(tenant, Uuid::now_v7(), vec![], "Nothing", None, Utc::now()).await.unwrap());
    }

    #[tokio::test]
    async fn reversal_mirrors_the_original_and_skips_unknown_entries() {
        let d = backend();
        let tenant = TenantId::new();
        let poster = LedgerPoster::new(&d);
        let original = Uuid::now_v7();
        let reversal = Uuid::now_v7();
        poster
            .post(tenant, original, posting::cost_of_sales(Money::from_sen(300)), "COGS", None, Utc::now())
            .await
            .unwrap();

        assert!(poster.reverse(tenant, original, reversal, "COGS reversed", None, Utc::now()).await.unwrap());
        let ledger = poster.ledger(tenant).await.unwrap();
        let (orig, rev) = (ledger.entry(original).unwrap(), ledger.entry(reversal).unwrap());
        assert_eq!(posting::reverse(orig), rev);

        assert!(!poster
            .reverse(tenant, Uuid::now_v7(), Uuid::now_v7(), "nothing", None, Utc::now())
            .await
            .unwrap());
    }
}
