use std::collections::HashMap;
use std::sync::RwLock;

use serde_json::Value as JsonValue;

use kedai_core::{AggregateId, TenantId};
use kedai_events::EventEnvelope;

use super::ProjectionError;

/// Last applied sequence number per stream, for at-least-once delivery.
#[derive(Debug, Default)]
pub struct StreamCursors {
    cursors: RwLock<HashMap<(TenantId, AggregateId), u64>>,
}

impl StreamCursors {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, tenant_id: TenantId, aggregate_id: AggregateId) -> u64 {
        match self.cursors.read() {
            Ok(cursors) => cursors.get(&(tenant_id, aggregate_id)).copied().unwrap_or(0),
            Err(_) => 0,
        }
    }

    /// `Ok(true)` when the envelope is the next one for its stream,
    /// `Ok(false)` for a redelivery. A gap after the first applied event is
    /// an error.
    pub fn admit(&self, envelope: &EventEnvelope<JsonValue>) -> Result<bool, ProjectionError> {
        let seq = envelope.sequence_number();
        let last = self.get(envelope.tenant_id(), envelope.aggregate_id());
        if seq == 0 {
            return Err(ProjectionError::NonMonotonicSequence { last, found: seq });
        }
        if seq <= last {
            return Ok(false);
        }
        if last != 0 && seq != last + 1 {
            return Err(ProjectionError::NonMonotonicSequence { last, found: seq });
        }
        Ok(true)
    }

    pub fn advance(&self, envelope: &EventEnvelope<JsonValue>) {
        if let Ok(mut cursors) = self.cursors.write() {
            cursors.insert(
                (envelope.tenant_id(), envelope.aggregate_id()),
                envelope.sequence_number(),
            );
        }
    }

    pub fn clear_tenant(&self, tenant_id: TenantId) {
        if let Ok(mut cursors) = self.cursors.write() {
            cursors.retain(|(t, _), _| *t != tenant_id);
        }
    }
}
