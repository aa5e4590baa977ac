use std::collections::HashMap;
use std::sync::RwLock;

use kedai_core::{AggregateId, ExpectedVersion, TenantId};
use uuid::Uuid;

use super::query::{EventFilter, EventQuery, EventQueryResult, Pagination};
use super::r#trait::{batch_stream, EventStore, EventStoreError, StoredEvent, UncommittedEvent};

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
struct StreamKey {
    tenant_id: TenantId,
    aggregate_id: AggregateId,
}

#[derive(Debug, Default)]
struct Inner {
    streams: HashMap<StreamKey, Vec<StoredEvent>>,
    /// Global append order across all streams.
    log: Vec<StoredEvent>,
}

/// In-memory append-only event store for tests and development.
#[derive(Debug, Default)]
pub struct InMemoryEventStore {
    inner: RwLock<Inner>,
}

impl InMemoryEventStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn current_version(stream: &[StoredEvent]) -> u64 {
        stream.last().map(|e| e.sequence_number).unwrap_or(0)
    }

    fn poisoned() -> EventStoreError {
        EventStoreError::Storage("lock poisoned".to_string())
    }
}

#[async_trait::async_trait]
impl EventStore for InMemoryEventStore {
    async fn append(
        &self,
        events: Vec<UncommittedEvent>,
        expected_version: ExpectedVersion,
    ) -> Result<Vec<StoredEvent>, EventStoreError> {
        let Some((tenant_id, aggregate_id, aggregate_type)) = batch_stream(&events)? else {
            return Ok(vec![]);
        };

        let key = StreamKey {
            tenant_id,
            aggregate_id,
        };

        let mut inner = self.inner.write().map_err(|_| Self::poisoned())?;
        let Inner { streams, log } = &mut *inner;

        let stream = streams.entry(key).or_default();
        let current = Self::current_version(stream);

        if !expected_version.matches(current) {
            return Err(EventStoreError::Concurrency(format!(
                "expected {expected_version:?}, found {current}"
            )));
        }

        if let Some(existing) = stream.first() {
            if existing.aggregate_type != aggregate_type {
                return Err(EventStoreError::AggregateTypeMismatch(format!(
                    "stream aggregate_type is '{}', attempted append with '{}'",
                    existing.aggregate_type, aggregate_type
                )));
            }
        }

        let mut next = current + 1;
        let mut committed = Vec::with_capacity(events.len());
        for e in events {
            let stored = StoredEvent {
                event_id: e.event_id,
                tenant_id: e.tenant_id,
                aggregate_id: e.aggregate_id,
                aggregate_type: e.aggregate_type,
                sequence_number: next,
                event_type: e.event_type,
                event_version: e.event_version,
                occurred_at: e.occurred_at,
                payload: e.payload,
            };
            next += 1;
            stream.push(stored.clone());
            log.push(stored.clone());
            committed.push(stored);
        }

        Ok(committed)
    }

    async fn load_stream(
        &self,
        tenant_id: TenantId,
        aggregate_id: AggregateId,
    ) -> Result<Vec<StoredEvent>, EventStoreError> {
        let key = StreamKey {
            tenant_id,
            aggregate_id,
        };

        let inner = self.inner.read().map_err(|_| Self::poisoned())?;
        Ok(inner.streams.get(&key).cloned().unwrap_or_default())
    }

    async fn load_all(&self) -> Result<Vec<StoredEvent>, EventStoreError> {
        let inner = self.inner.read().map_err(|_| Self::poisoned())?;
        Ok(inner.log.clone())
    }
}

#[async_trait::async_trait]
impl EventQuery for InMemoryEventStore {
    async fn query_events(
        &self,
        tenant_id: TenantId,
        filter: EventFilter,
        pagination: Pagination,
    ) -> Result<EventQueryResult, EventStoreError> {
        let inner = self.inner.read().map_err(|_| Self::poisoned())?;

        let mut matching: Vec<&StoredEvent> = inner
            .log
            .iter()
            .filter(|e| e.tenant_id == tenant_id && filter.matches(e))
            .collect();
        // Newest first; stable sort keeps stream order for equal timestamps.
        matching.sort_by(|a, b| b.occurred_at.cmp(&a.occurred_at));

        Ok(EventQueryResult::page(matching.into_iter().cloned(), pagination))
    }

    async fn get_aggregate_events(
        &self,
        tenant_id: TenantId,
        aggregate_id: AggregateId,
        pagination: Option<Pagination>,
    ) -> Result<EventQueryResult, EventStoreError> {
        let stream = self.load_stream(tenant_id, aggregate_id).await?;
        Ok(EventQueryResult::page(stream, pagination.unwrap_or_default()))
    }

    async fn get_event_by_id(
        &self,
        tenant_id: TenantId,
        event_id: Uuid,
    ) -> Result<Option<StoredEvent>, EventStoreError> {
        let inner = self.inner.read().map_err(|_| Self::poisoned())?;
        Ok(inner
            .log
            .iter()
            .find(|e| e.tenant_id == tenant_id && e.event_id == event_id)
            .cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use serde_json::json;

    fn event(tenant_id: TenantId, aggregate_id: AggregateId, kind: &str) -> UncommittedEvent {
        UncommittedEvent {
            event_id: Uuid::now_v7(),
            tenant_id,
            aggregate_id,
            aggregate_type: "products.product".to_string(),
            event_type: kind.to_string(),
            event_version: 1,
            occurred_at: Utc::now(),
            payload: json!({ "kind": kind }),
        }
    }

    #[tokio::test]
    async fn assigns_sequence_numbers_and_checks_expected_version() {
        let store = InMemoryEventStore::new();
        let tenant = TenantId::new();
        let id = AggregateId::new();

        let first = store
            .append(vec![event(tenant, id, "a"), event(tenant, id, "b")], ExpectedVersion::Exact(0))
            .await
            .unwrap();
        assert_eq!(first.iter().map(|e| e.sequence_number).collect::<Vec<_>>(), vec![1, 2]);

        let stale = store.append(vec![event(tenant, id, "c")], ExpectedVersion::Exact(1)).await;
        assert!(matches!(stale, Err(EventStoreError::Concurrency(_))));

        store.append(vec![event(tenant, id, "c")], ExpectedVersion::Exact(2)).await.unwrap();
        assert_eq!(store.load_stream(tenant, id).await.unwrap().len(), 3);
    }

    #[tokio::test]
    async fn streams_are_tenant_scoped() {
        let store = InMemoryEventStore::new();
        let (a, b) = (TenantId::new(), TenantId::new());
        let id = AggregateId::new();

        store.append(vec![event(a, id, "x")], ExpectedVersion::Any).await.unwrap();
        assert!(store.load_stream(b, id).await.unwrap().is_empty());

        let mixed = store
            .append(vec![event(a, id, "x"), event(b, id, "y")], ExpectedVersion::Any)
            .await;
        assert!(matches!(mixed, Err(EventStoreError::TenantIsolation(_))));
    }

    #[tokio::test]
    async fn stream_keeps_its_aggregate_type() {
        let store = InMemoryEventStore::new();
        let tenant = TenantId::new();
        let id = AggregateId::new();
        store.append(vec![event(tenant, id, "x")], ExpectedVersion::Any).await.unwrap();

        let mut other = event(tenant, id, "y");
        other.aggregate_type = "customers.customer".to_string();
        let res = store.append(vec![other], ExpectedVersion::Any).await;
        assert!(matches!(res, Err(EventStoreError::AggregateTypeMismatch(_))));
    }

    #[tokio::test]
    async fn load_all_follows_append_order_and_query_filters() {
        let store = InMemoryEventStore::new();
        let tenant = TenantId::new();
        let (p, q) = (AggregateId::new(), AggregateId::new());
        store.append(vec![event(tenant, p, "one")], ExpectedVersion::Any).await.unwrap();
        store.append(vec![event(tenant, q, "two")], ExpectedVersion::Any).await.unwrap();
        store.append(vec![event(tenant, p, "three")], ExpectedVersion::Any).await.unwrap();

        let all = store.load_all().await.unwrap();
        let kinds: Vec<_> = all.iter().map(|e| e.event_type.as_str()).collect();
        assert_eq!(kinds, vec!["one", "two", "three"]);

        let page = store
            .get_aggregate_events(tenant, p, Some(Pagination::new(Some(1), None)))
            .await
            .unwrap();
        assert_eq!(page.total, 2);
        assert_eq!(page.events.len(), 1);
        assert!(page.has_more);

        let filtered = store
            .query_events(
                tenant,
                EventFilter {
                    event_type: Some("two".to_string()),
                    ..Default::default()
                },
                Pagination::default(),
            )
            .await
            .unwrap();
        assert_eq!(filtered.total, 1);

        let found = store.get_event_by_id(tenant, all[1].event_id).await.unwrap();
        assert_eq!(found.map(|e| e.aggregate_id), Some(q));
        assert!(store.get_event_by_id(TenantId::new(), all[1].event_id).await.unwrap().is_none());
    }
}
