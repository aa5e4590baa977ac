use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value as JsonValue;

use kedai_company::{company_stream_id, CompanyEvent, CompanyProfile, DocumentPrefixes, Subscription};
use kedai_core::TenantId;
use kedai_events::EventEnvelope;

use super::{decode, ensure_scope, Projection, ProjectionError, StreamCursors};
use crate::read_model::{InMemoryTenantStore, TenantStore};
use crate::streams::StreamAggregate;

/// The tenant's company as shown on settings pages and documents.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CompanyReadModel {
    pub tenant_id: TenantId,
    pub profile: CompanyProfile,
    pub prefixes: DocumentPrefixes,
    pub subscription: Subscription,
    /// Last number reserved per document kind.
    pub last_invoice_number: Option<String>,
    pub last_receipt_number: Option<String>,
    pub last_order_number: Option<String>,
    pub registered_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// One record per tenant.
pub struct CompaniesProjection<S = InMemoryTenantStore<(), CompanyReadModel>> {
    store: S,
    cursors: StreamCursors,
}

impl CompaniesProjection {
    pub fn in_memory() -> Self {
        Self::new(InMemoryTenantStore::new())
    }
}

impl<S> CompaniesProjection<S>
where
    S: TenantStore<(), CompanyReadModel>,
{
    pub fn new(store: S) -> Self {
        Self {
            store,
            cursors: StreamCursors::new(),
        }
    }

    pub fn get(&self, tenant_id: TenantId) -> Option<CompanyReadModel> {
        self.store.get(tenant_id, &())
    }
}

impl<S> Projection for CompaniesProjection<S>
where
    S: TenantStore<(), CompanyReadModel>,
{
    fn name(&self) -> &'static str {
        "companies"
    }

    fn apply_envelope(&self, envelope: &EventEnvelope<JsonValue>) -> Result<(), ProjectionError> {
        if envelope.aggregate_type() != kedai_company::Company::AGGREGATE_TYPE {
            return Ok(());
        }
        if !self.cursors.admit(envelope)? {
            return Ok(());
        }

        let ev: CompanyEvent = decode(envelope)?;
        let tenant_id = ev.tenant_id();
        ensure_scope(envelope, tenant_id, company_stream_id(tenant_id))?;

        match ev {
            CompanyEvent::Registered {
                profile,
                prefixes,
                occurred_at,
                ..
            } => {
                self.store.upsert(
                    tenant_id,
                    (),
                    CompanyReadModel {
                        tenant_id,
                        profile,
                        prefixes,
                        subscription: Subscription::default(),
                        last_invoice_number: None,
                        last_receipt_number: None,
                        last_order_number: None,
                        registered_at: occurred_at,
                        updated_at: occurred_at,
                    },
                );
            }
            CompanyEvent::ProfileUpdated {
                profile,
                prefixes,
                occurred_at,
                ..
            } => {
                if let Some(mut rm) = self.store.get(tenant_id, &()) {
                    rm.profile = profile;
                    rm.prefixes = prefixes;
                    rm.updated_at = occurred_at;
                    self.store.upsert(tenant_id, (), rm);
                }
            }
            CompanyEvent::DocumentNumberReserved { kind, number, .. } => {
                if let Some(mut rm) = self.store.get(tenant_id, &()) {
                    let slot = match kind {
                        kedai_company::DocumentKind::Invoice => &mut rm.last_invoice_number,
                        kedai_company::DocumentKind::Receipt => &mut rm.last_receipt_number,
                        kedai_company::DocumentKind::PosOrder => &mut rm.last_order_number,
                    };
                    *slot = Some(number);
                    self.store.upsert(tenant_id, (), rm);
                }
            }
            CompanyEvent::SubscriptionChanged {
                subscription,
                occurred_at,
                ..
            } => {
                if let Some(mut rm) = self.store.get(tenant_id, &()) {
                    rm.subscription = subscription;
                    rm.updated_at = occurred_at;
                    self.store.upsert(tenant_id, (), rm);
                }
            }
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
    use kedai_company::{DocumentKind, SubscriptionStatus};

    fn registered(tenant_id: TenantId) -> CompanyEvent {
        CompanyEvent::Registered {
            tenant_id,
            profile: CompanyProfile {
                name: "Kedai Runcit Ah Seng".to_string(),
                ..Default::default()
            },
            prefixes: DocumentPrefixes::default(),
            occurred_at: Utc::now(),
        }
    }

    #[test]
    fn tracks_numbers_and_subscription() {
        let p = CompaniesProjection::in_memory();
        let tenant = TenantId::new();
        let stream = company_stream_id(tenant);
        let ty = "company.profile";

        p.apply_envelope(&envelope(tenant, stream, ty, 1, &registered(tenant))).unwrap();
        let reserved = CompanyEvent::DocumentNumberReserved {
            tenant_id: tenant,
            kind: DocumentKind::Invoice,
            sequence: 1,
            number: "INV-000001".to_string(),
            occurred_at: Utc::now(),
        };
        p.apply_envelope(&envelope(tenant, stream, ty, 2, &reserved)).unwrap();
        let changed = CompanyEvent::SubscriptionChanged {
            tenant_id: tenant,
            subscription: Subscription {
                plan: "pro".to_string(),
                status: SubscriptionStatus::PastDue,
                stripe_customer_id: Some("cus_123".to_string()),
                stripe_subscription_id: None,
                current_period_end: None,
            },
            occurred_at: Utc::now(),
        };
        p.apply_envelope(&envelope(tenant, stream, ty, 3, &changed)).unwrap();

        let rm = p.get(tenant).unwrap();
        assert_eq!(rm.last_invoice_number.as_deref(), Some("INV-000001"));
        assert_eq!(rm.subscription.status, SubscriptionStatus::PastDue);
        assert!(p.get(TenantId::new()).is_none());
    }

    #[test]
    fn rejects_foreign_stream() {
        let p = CompaniesProjection::in_memory();
        let tenant = TenantId::new();
        let other = TenantId::new();
        let env = envelope(other, company_stream_id(other), "company.profile", 1, &registered(tenant));
        assert!(matches!(p.apply_envelope(&env), Err(ProjectionError::TenantIsolation(_))));
    }
}
