use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value as JsonValue;

use kedai_core::TenantId;
use kedai_events::EventEnvelope;
use kedai_invoicing::{DocumentStatus, EInvoiceDocument, EInvoiceDocumentId, EInvoiceEvent, InvoiceId};

use super::{decode, ensure_scope, Projection, ProjectionError, StreamCursors};
use crate::read_model::{InMemoryTenantStore, TenantStore};
use crate::streams::StreamAggregate;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EInvoiceDocumentReadModel {
    pub document_id: EInvoiceDocumentId,
    pub invoice_id: InvoiceId,
    pub invoice_number: String,
    pub status: DocumentStatus,
    pub payload: JsonValue,
    pub submission_uid: Option<String>,
    pub uuid: Option<String>,
    pub long_id: Option<String>,
    pub errors: Vec<String>,
    pub cancel_reason: Option<String>,
    pub prepared_at: DateTime<Utc>,
    pub validated_at: Option<DateTime<Utc>>,
    pub updated_at: DateTime<Utc>,
}

pub struct EInvoiceDocumentsProjection<S = InMemoryTenantStore<EInvoiceDocumentId, EInvoiceDocumentReadModel>> {
    store: S,
    cursors: StreamCursors,
}

impl EInvoiceDocumentsProjection {
    pub fn in_memory() -> Self {
        Self::new(InMemoryTenantStore::new())
    }
}

impl<S> EInvoiceDocumentsProjection<S>
where
    S: TenantStore<EInvoiceDocumentId, EInvoiceDocumentReadModel>,
{
    pub fn new(store: S) -> Self {
        Self {
            store,
            cursors: StreamCursors::new(),
        }
    }

    pub fn get(&self, tenant_id: TenantId, document_id: &EInvoiceDocumentId) -> Option<EInvoiceDocumentReadModel> {
        self.store.get(tenant_id, document_id)
    }

    /// Most recently prepared first.
    pub fn list(&self, tenant_id: TenantId) -> Vec<EInvoiceDocumentReadModel> {
        let mut all = self.store.list(tenant_id);
        all.sort_by(|a, b| b.prepared_at.cmp(&a.prepared_at));
        all
    }

    pub fn for_invoice(&self, tenant_id: TenantId, invoice_id: InvoiceId) -> Vec<EInvoiceDocumentReadModel> {
        self.list(tenant_id)
            .into_iter()
            .filter(|d| d.invoice_id == invoice_id)
            .collect()
    }

    /// The latest submission of an invoice that is not rejected or cancelled.
    pub fn current_for_invoice(&self, tenant_id: TenantId, invoice_id: InvoiceId) -> Option<EInvoiceDocumentReadModel> {
        self.for_invoice(tenant_id, invoice_id)
            .into_iter()
            .find(|d| !matches!(d.status, DocumentStatus::Invalid | DocumentStatus::Cancelled))
    }

    fn update(&self, tenant_id: TenantId, document_id: EInvoiceDocumentId, at: DateTime<Utc>, f: impl FnOnce(&mut EInvoiceDocumentReadModel)) {
        if let Some(mut rm) = self.store.get(tenant_id, &document_id) {
            f(&mut rm);
            rm.updated_at = at;
            self.store.upsert(tenant_id, document_id, rm);
        }
    }
}

impl<S> Projection for EInvoiceDocumentsProjection<S>
where
    S: TenantStore<EInvoiceDocumentId, EInvoiceDocumentReadModel>,
{
    fn name(&self) -> &'static str {
        "einvoice_documents"
    }

    fn apply_envelope(&self, envelope: &EventEnvelope<JsonValue>) -> Result<(), ProjectionError> {
        if envelope.aggregate_type() != EInvoiceDocument::AGGREGATE_TYPE {
            return Ok(());
        }
        if !self.cursors.admit(envelope)? {
            return Ok(());
        }

        let ev: EInvoiceEvent = decode(envelope)?;
        let tenant_id = ev.tenant_id();
        let document_id = ev.document_id();
        ensure_scope(envelope, tenant_id, document_id.0)?;

        match ev {
            EInvoiceEvent::Prepared {
                invoice_id,
                invoice_number,
                payload,
                occurred_at,
                ..
            } => {
                self.store.upsert(
                    tenant_id,
                    document_id,
                    EInvoiceDocumentReadModel {
                        document_id,
                        invoice_id,
                        invoice_number,
                        status: DocumentStatus::Prepared,
                        payload,
                        submission_uid: None,
                        uuid: None,
                        long_id: None,
                        errors: Vec::new(),
                        cancel_reason: None,
                        prepared_at: occurred_at,
                        validated_at: None,
                        updated_at: occurred_at,
                    },
                );
            }
            EInvoiceEvent::Submitted {
                submission_uid,
                occurred_at,
                ..
            } => self.update(tenant_id, document_id, occurred_at, |rm| {
                rm.status = DocumentStatus::Submitted;
                rm.submission_uid = Some(submission_uid);
            }),
            EInvoiceEvent::Validated {
                uuid,
                long_id,
                occurred_at,
                ..
            } => self.update(tenant_id, document_id, occurred_at, |rm| {
                rm.status = DocumentStatus::Valid;
                rm.uuid = Some(uuid);
                rm.long_id = long_id;
                rm.errors.clear();
                rm.validated_at = Some(occurred_at);
            }),
            EInvoiceEvent::Rejected {
                errors, occurred_at, ..
            } => self.update(tenant_id, document_id, occurred_at, |rm| {
                rm.status = DocumentStatus::Invalid;
                rm.errors = errors;
            }),
            EInvoiceEvent::Cancelled {
                reason, occurred_at, ..
            } => self.update(tenant_id, document_id, occurred_at, |rm| {
                rm.status = DocumentStatus::Cancelled;
                rm.cancel_reason = Some(reason);
            }),
        }

        self.cursors.advance(envelope);
        Ok(())
    }

    fn clear_tenant(&self, tenant_id: TenantId) {
        self.store.clear_tenant(tenant_id);
        self.cursors.clear_tenant(tenant_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::projections::test_support::envelope;
    use chrono::Duration;
    use serde_json::json;

    #[test]
    fn rejected_submission_is_not_current() {
        let p = EInvoiceDocumentsProjection::in_memory();
        let tenant = TenantId::new();
        let invoice_id = InvoiceId::generate();
        let t0 = Utc::now();

        let first = EInvoiceDocumentId::generate();
        let second = EInvoiceDocumentId::generate();
        let prepared = |id: EInvoiceDocumentId, at: DateTime<Utc>| EInvoiceEvent::Prepared {
            tenant_id: tenant,
            document_id: id,
            invoice_id,
            invoice_number: "INV-000009".to_string(),
            payload: json!({ "invoice": { "number": "INV-000009" } }),
            occurred_at: at,
        };

        let stream = [
            (first, prepared(first, t0)),
            (
                first,
                EInvoiceEvent::Submitted {
                    tenant_id: tenant,
                    document_id: first,
                    submission_uid: "SUB-1".to_string(),
                    occurred_at: t0,
                },
            ),
            (
                first,
                EInvoiceEvent::Rejected {
                    tenant_id: tenant,
                    document_id: first,
                    errors: vec!["buyer TIN not found".to_string()],
                    occurred_at: t0,
                },
            ),
        ];
        for (seq, (id, ev)) in stream.iter().enumerate() {
            p.apply_envelope(&envelope(tenant, id.0, "invoicing.einvoice", seq as u64 + 1, ev))
                .unwrap();
        }
        assert!(p.current_for_invoice(tenant, invoice_id).is_none());
        assert_eq!(p.get(tenant, &first).unwrap().errors.len(), 1);

        let retry = prepared(second, t0 + Duration::minutes(5));
        p.apply_envelope(&envelope(tenant, second.0, "invoicing.einvoice", 1, &retry))
            .unwrap();
        let current = p.current_for_invoice(tenant, invoice_id).unwrap();
        assert_eq!(current.document_id, second);
        assert_eq!(p.for_invoice(tenant, invoice_id).len(), 2);
    }
}
