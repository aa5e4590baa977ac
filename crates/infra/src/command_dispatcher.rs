//! Command execution pipeline for event-sourced aggregates.
//!
//! ```text
//! command
//!   -> load stream (tenant-scoped)
//!   -> validate stream (tenant, aggregate, monotonic sequence)
//!   -> rehydrate
//!   -> handle (pure)
//!   -> append with ExpectedVersion::Exact(loaded revision)
//!   -> publish committed envelopes
//! ```
//!
//! Nothing is published unless the append succeeded. A publication failure
//! is returned to the caller even though the events are stored; consumers
//! are idempotent so a retry only duplicates deliveries.

use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value as JsonValue;
use thiserror::Error;
use uuid::Uuid;

use kedai_core::{Aggregate, AggregateId, DomainError, ExpectedVersion, TenantId};
use kedai_events::{Event, EventBus, EventEnvelope};

use crate::event_store::{EventStore, EventStoreError, StoredEvent, UncommittedEvent};
use crate::streams::StreamAggregate;

#[derive(Debug, Error)]
pub enum DispatchError {
    /// The stream moved between load and append. Safe to retry.
    #[error("concurrency conflict: {0}")]
    Concurrency(String),

    /// Business-level conflict (duplicate creation, entry already posted).
    #[error("conflict: {0}")]
    Conflict(String),

    #[error("tenant isolation violation: {0}")]
    TenantIsolation(String),

    #[error("validation failed: {0}")]
    Validation(String),

    #[error("invariant violated: {0}")]
    InvariantViolation(String),

    #[error("unauthorized")]
    Unauthorized,

    #[error("not found")]
    NotFound,

    /// A stored payload no longer decodes into the aggregate's event type.
    #[error("failed to decode stored event: {0}")]
    Deserialize(String),

    #[error(transparent)]
    Store(EventStoreError),

    #[error("event publication failed: {0}")]
    Publish(String),
}

impl DispatchError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, DispatchError::Concurrency(_))
    }
}

impl From<EventStoreError> for DispatchError {
    fn from(value: EventStoreError) -> Self {
        match value {
            EventStoreError::Concurrency(msg) => DispatchError::Concurrency(msg),
            EventStoreError::TenantIsolation(msg) => DispatchError::TenantIsolation(msg),
            EventStoreError::Publish(msg) => DispatchError::Publish(msg),
            other => DispatchError::Store(other),
        }
    }
}

impl From<DomainError> for DispatchError {
    fn from(value: DomainError) -> Self {
        match value {
            DomainError::Validation(msg) => DispatchError::Validation(msg),
            DomainError::InvariantViolation(msg) => DispatchError::InvariantViolation(msg),
            DomainError::Conflict(msg) => DispatchError::Conflict(msg),
            DomainError::Unauthorized => DispatchError::Unauthorized,
            DomainError::NotFound => DispatchError::NotFound,
            DomainError::InvalidId(msg) => DispatchError::Validation(msg),
        }
    }
}

/// Runs commands against aggregates persisted in `S`, publishing to `B`.
#[derive(Debug)]
pub struct CommandDispatcher<S, B> {
    store: S,
    bus: B,
}

impl<S, B> CommandDispatcher<S, B> {
    pub fn new(store: S, bus: B) -> Self {
        Self { store, bus }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn bus(&self) -> &B {
        &self.bus
    }
}

impl<S, B> CommandDispatcher<S, B>
where
    S: EventStore,
    B: EventBus<EventEnvelope<JsonValue>>,
{
    /// Full pipeline for one command. `make_aggregate` builds the blank
    /// aggregate the history is folded into.
    ///
    /// Returns the committed events; an empty vector when the command
    /// decided nothing.
    #[tracing::instrument(skip(self, aggregate_type, command, make_aggregate), fields(aggregate_type = tracing::field::Empty), err)]
    pub async fn dispatch<A>(
        &self,
        tenant_id: TenantId,
        aggregate_id: AggregateId,
        aggregate_type: impl Into<String>,
        command: A::Command,
        make_aggregate: impl FnOnce(TenantId, AggregateId) -> A,
    ) -> Result<Vec<StoredEvent>, DispatchError>
    where
        A: Aggregate<Error = DomainError>,
        A::Event: Event + Serialize + DeserializeOwned,
    {
        let aggregate_type = aggregate_type.into();
        tracing::Span::current().record("aggregate_type", aggregate_type.as_str());

        let history = self.store.load_stream(tenant_id, aggregate_id).await?;
        validate_loaded_stream(tenant_id, aggregate_id, &history)?;
        let expected = ExpectedVersion::Exact(stream_version(&history));

        let mut aggregate = make_aggregate(tenant_id, aggregate_id);
        apply_history(&mut aggregate, &history)?;

        let decided = aggregate.handle(&command)?;
        if decided.is_empty() {
            return Ok(vec![]);
        }

        let uncommitted = decided
            .iter()
            .map(|ev| {
                UncommittedEvent::from_typed(
                    tenant_id,
                    aggregate_id,
                    aggregate_type.clone(),
                    Uuid::now_v7(),
                    ev,
                )
            })
            .collect::<Result<Vec<_>, _>>()?;

        let committed = self.store.append(uncommitted, expected).await?;

        for stored in &committed {
            self.bus
                .publish(stored.to_envelope())
                .map_err(|e| DispatchError::Publish(format!("{e:?}")))?;
        }

        Ok(committed)
    }

    /// [`dispatch`](Self::dispatch) for aggregates that know their stream
    /// type. Returns the committed events decoded back into domain events.
    pub async fn send<A>(
        &self,
        tenant_id: TenantId,
        aggregate_id: AggregateId,
        command: A::Command,
    ) -> Result<Vec<A::Event>, DispatchError>
    where
        A: StreamAggregate,
        A::Event: Event + Serialize + DeserializeOwned,
    {
        let committed = self
            .dispatch(tenant_id, aggregate_id, A::AGGREGATE_TYPE, command, A::blank)
            .await?;
        decode_events::<A>(&committed)
    }

    /// Rehydrates an aggregate without handling anything. A stream that
    /// does not exist yields the blank aggregate.
    pub async fn load<A>(&self, tenant_id: TenantId, aggregate_id: AggregateId) -> Result<A, DispatchError>
    where
        A: StreamAggregate,
        A::Event: DeserializeOwned,
    {
        let history = self.store.load_stream(tenant_id, aggregate_id).await?;
        validate_loaded_stream(tenant_id, aggregate_id, &history)?;
        let mut aggregate = A::blank(tenant_id, aggregate_id);
        apply_history(&mut aggregate, &history)?;
        Ok(aggregate)
    }
}

/// Decodes stored payloads into the aggregate's event type.
pub fn decode_events<A>(stored: &[StoredEvent]) -> Result<Vec<A::Event>, DispatchError>
where
    A: Aggregate,
    A::Event: DeserializeOwned,
{
    stored
        .iter()
        .map(|e| {
            serde_json::from_value(e.payload.clone()).map_err(|err| DispatchError::Deserialize(err.to_string()))
        })
        .collect()
}

fn stream_version(stream: &[StoredEvent]) -> u64 {
    stream.last().map(|e| e.sequence_number).unwrap_or(0)
}

/// Rejects streams a misbehaving backend could hand back: foreign tenant or
/// aggregate, or sequence numbers that are zero or not increasing.
fn validate_loaded_stream(
    tenant_id: TenantId,
    aggregate_id: AggregateId,
    stream: &[StoredEvent],
) -> Result<(), DispatchError> {
    let mut last = 0u64;
    for (idx, e) in stream.iter().enumerate() {
        if e.tenant_id != tenant_id {
            return Err(DispatchError::TenantIsolation(format!(
                "loaded stream contains wrong tenant_id at index {idx}"
            )));
        }
        if e.aggregate_id != aggregate_id {
            return Err(DispatchError::TenantIsolation(format!(
                "loaded stream contains wrong aggregate_id at index {idx}"
            )));
        }
        if e.sequence_number <= last {
            return Err(DispatchError::Store(EventStoreError::InvalidAppend(format!(
                "non-monotonic sequence_number in loaded stream (last={last}, found={})",
                e.sequence_number
            ))));
        }
        last = e.sequence_number;
    }
    Ok(())
}

fn apply_history<A>(aggregate: &mut A, history: &[StoredEvent]) -> Result<(), DispatchError>
where
    A: Aggregate,
    A::Event: DeserializeOwned,
{
    for ev in decode_events::<A>(history)? {
        aggregate.apply(&ev);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event_store::InMemoryEventStore;
    use chrono::Utc;
    use kedai_core::{BasisPoints, Money};
    use kedai_events::InMemoryEventBus;
    use kedai_products::{CreateProduct, Product, ProductCommand, ProductDetails, ProductEvent, ProductId};
    use std::sync::Arc;
    use std::time::Duration;

    fn details(sku: &str) -> ProductDetails {
        ProductDetails {
            sku: sku.to_string(),
            name: "Teh tarik".to_string(),
            description: None,
            unit: "cup".to_string(),
            unit_price: Money::from_sen(350),
            cost_price: Money::from_sen(120),
            tax_rate: BasisPoints::zero(),
            classification_code: None,
            low_stock_threshold: 0,
        }
    }

    fn create(tenant_id: TenantId, product_id: ProductId) -> ProductCommand {
        ProductCommand::CreateProduct(CreateProduct {
            tenant_id,
            product_id,
            details: details("TEH-01"),
            track_stock: true,
            initial_stock: 10,
            occurred_at: Utc::now(),
        })
    }

    type Dispatcher = CommandDispatcher<Arc<InMemoryEventStore>, Arc<InMemoryEventBus<EventEnvelope<JsonValue>>>>;

    fn dispatcher() -> Dispatcher {
        CommandDispatcher::new(Arc::new(InMemoryEventStore::new()), Arc::new(InMemoryEventBus::new()))
    }

    #[tokio::test]
    async fn persists_then_publishes() {
        let d = dispatcher();
        let sub = d.bus().subscribe();
        let tenant = TenantId::new();
        let id = ProductId::generate();

        let events = d.send::<Product>(tenant, id.0, create(tenant, id)).await.unwrap();
        assert!(matches!(events.as_slice(), [ProductEvent::ProductCreated(_)]));

        let envelope = sub.recv_timeout(Duration::from_secs(1)).unwrap();
        assert_eq!(envelope.tenant_id(), tenant);
        assert_eq!(envelope.aggregate_type(), "products.product");
        assert_eq!(envelope.sequence_number(), 1);

        let product: Product = d.load(tenant, id.0).await.unwrap();
        assert_eq!(product.stock(), 10);
    }

    #[tokio::test]
    async fn domain_conflict_is_not_a_concurrency_error() {
        let d = dispatcher();
        let tenant = TenantId::new();
        let id = ProductId::generate();
        d.send::<Product>(tenant, id.0, create(tenant, id)).await.unwrap();

        let err = d.send::<Product>(tenant, id.0, create(tenant, id)).await.unwrap_err();
        assert!(matches!(err, DispatchError::Conflict(_)));
        assert!(!err.is_retryable());
    }

    #[tokio::test]
    async fn other_tenants_see_a_blank_stream() {
        let d = dispatcher();
        let tenant = TenantId::new();
        let id = ProductId::generate();
        d.send::<Product>(tenant, id.0, create(tenant, id)).await.unwrap();

        let foreign: Product = d.load(TenantId::new(), id.0).await.unwrap();
        assert!(!foreign.exists());
    }

    #[test]
    fn store_concurrency_maps_to_retryable() {
        let err = DispatchError::from(EventStoreError::Concurrency("moved".into()));
        assert!(err.is_retryable());
    }
}
