use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

use kedai_core::TenantId;
use kedai_events::EventEnvelope;
use kedai_products::{Product, ProductDetails, ProductEvent, ProductId, ProductStatus};

use super::{decode, ensure_scope, Projection, ProjectionError, StreamCursors};
use crate::read_model::page::matches_search;
use crate::read_model::{InMemoryTenantStore, Page, PageRequest, TenantStore};
use crate::streams::StreamAggregate;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProductReadModel {
    pub product_id: ProductId,
    #[serde(flatten)]
    pub details: ProductDetails,
    pub track_stock: bool,
    /// Always 0 for untracked products.
    pub stock: i64,
    pub status: ProductStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl ProductReadModel {
    pub fn is_low_stock(&self) -> bool {
        self.track_stock && self.stock <= self.details.low_stock_threshold
    }
}

/// `GET /products` query.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ProductFilter {
    /// Matches SKU or name.
    pub search: Option<String>,
    pub status: Option<ProductStatus>,
    #[serde(default)]
    pub low_stock: bool,
}

pub struct ProductsProjection<S = InMemoryTenantStore<ProductId, ProductReadModel>> {
    store: S,
    cursors: StreamCursors,
}

impl ProductsProjection {
    pub fn in_memory() -> Self {
        Self::new(InMemoryTenantStore::new())
    }
}

impl<S> ProductsProjection<S>
where
    S: TenantStore<ProductId, ProductReadModel>,
{
    pub fn new(store: S) -> Self {
        Self {
            store,
            cursors: StreamCursors::new(),
        }
    }

    pub fn get(&self, tenant_id: TenantId, product_id: &ProductId) -> Option<ProductReadModel> {
        self.store.get(tenant_id, product_id)
    }

    pub fn find_by_sku(&self, tenant_id: TenantId, sku: &str) -> Option<ProductReadModel> {
        self.store
            .list(tenant_id)
            .into_iter()
            .find(|p| p.details.sku.eq_ignore_ascii_case(sku))
    }

    /// Sorted by SKU.
    pub fn list(&self, tenant_id: TenantId) -> Vec<ProductReadModel> {
        let mut all = self.store.list(tenant_id);
        all.sort_by(|a, b| a.details.sku.cmp(&b.details.sku));
        all
    }

    pub fn query(&self, tenant_id: TenantId, filter: &ProductFilter, page: PageRequest) -> Page<ProductReadModel> {
        let matching = self
            .list(tenant_id)
            .into_iter()
            .filter(|p| filter.status.is_none_or(|s| p.status == s))
            .filter(|p| !filter.low_stock || p.is_low_stock())
            .filter(|p| matches_search(filter.search.as_deref(), &[&p.details.sku, &p.details.name]))
            .collect();
        Page::slice(matching, page)
    }

    /// Active tracked products at or below their threshold, lowest first.
    pub fn low_stock(&self, tenant_id: TenantId) -> Vec<ProductReadModel> {
        let mut low: Vec<_> = self
            .store
            .list(tenant_id)
            .into_iter()
            .filter(|p| p.status == ProductStatus::Active && p.is_low_stock())
            .collect();
        low.sort_by(|a, b| a.stock.cmp(&b.stock).then_with(|| a.details.sku.cmp(&b.details.sku)));
        low
    }

    fn update(&self, tenant_id: TenantId, product_id: ProductId, f: impl FnOnce(&mut ProductReadModel)) {
        if let Some(mut rm) = self.store.get(tenant_id, &product_id) {
            f(&mut rm);
            self.store.upsert(tenant_id, product_id, rm);
        }
    }
}

impl<S> Projection for ProductsProjection<S>
where
    S: TenantStore<ProductId, ProductReadModel>,
{
    fn name(&self) -> &'static str {
        "products"
    }

    fn apply_envelope(&self, envelope: &EventEnvelope<JsonValue>) -> Result<(), ProjectionError> {
        if envelope.aggregate_type() != Product::AGGREGATE_TYPE {
            return Ok(());
        }
        if !self.cursors.admit(envelope)? {
            return Ok(());
        }

        let ev: ProductEvent = decode(envelope)?;
        let tenant_id = ev.tenant_id();
        let product_id = ev.product_id();
        ensure_scope(envelope, tenant_id, product_id.0)?;

        match ev {
            ProductEvent::ProductCreated(e) => {
                self.store.upsert(
                    tenant_id,
                    product_id,
                    ProductReadModel {
                        product_id,
                        details: e.details,
                        track_stock: e.track_stock,
                        stock: if e.track_stock { e.initial_stock } else { 0 },
                        status: ProductStatus::Active,
                        created_at: e.occurred_at,
                        updated_at: e.occurred_at,
                    },
                );
            }
            ProductEvent::ProductUpdated(e) => self.update(tenant_id, product_id, |rm| {
                rm.details = e.details;
                rm.track_stock = e.track_stock;
                if !e.track_stock {
                    rm.stock = 0;
                }
                rm.updated_at = e.occurred_at;
            }),
            ProductEvent::StockAdjusted(e) => self.update(tenant_id, product_id, |rm| {
                rm.stock = e.new_stock;
                rm.updated_at = e.occurred_at;
            }),
            ProductEvent::ProductActivated(e) => self.update(tenant_id, product_id, |rm| {
                rm.status = ProductStatus::Active;
                rm.updated_at = e.occurred_at;
            }),
            ProductEvent::ProductArchived(e) => self.update(tenant_id, product_id, |rm| {
                rm.status = ProductStatus::Archived;
                rm.updated_at = e.occurred_at;
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
    use kedai_core::{BasisPoints, Money};
    use kedai_products::{ProductCreated, StockAdjusted, StockReason};

    fn details(sku: &str, name: &str, threshold: i64) -> ProductDetails {
        ProductDetails {
            sku: sku.to_string(),
            name: name.to_string(),
            description: None,
            unit: "unit".to_string(),
            unit_price: Money::from_sen(850),
            cost_price: Money::from_sen(400),
            tax_rate: BasisPoints::new(600),
            classification_code: None,
            low_stock_threshold: threshold,
        }
    }

    fn create(p: &ProductsProjection, tenant: TenantId, sku: &str, stock: i64) -> ProductId {
        let id = ProductId::generate();
        let ev = ProductEvent::ProductCreated(ProductCreated {
            tenant_id: tenant,
            product_id: id,
            details: details(sku, sku, 5),
            track_stock: true,
            initial_stock: stock,
            occurred_at: Utc::now(),
        });
        p.apply_envelope(&envelope(tenant, id.0, "products.product", 1, &ev)).unwrap();
        id
    }

    fn adjust(tenant: TenantId, id: ProductId, seq: u64, delta: i64, new_stock: i64) -> EventEnvelope<JsonValue> {
        let ev = ProductEvent::StockAdjusted(StockAdjusted {
            tenant_id: tenant,
            product_id: id,
            delta,
            new_stock,
            reason: StockReason::Sale,
            reference: Some("RCT-000001".to_string()),
            occurred_at: Utc::now(),
        });
        envelope(tenant, id.0, "products.product", seq, &ev)
    }

    #[test]
    fn stock_follows_adjustments_and_redelivery_is_skipped() {
        let p = ProductsProjection::in_memory();
        let tenant = TenantId::new();
        let id = create(&p, tenant, "TEH-TARIK", 20);

        let sale = adjust(tenant, id, 2, -16, 4);
        p.apply_envelope(&sale).unwrap();
        p.apply_envelope(&sale).unwrap();

        let rm = p.get(tenant, &id).unwrap();
        assert_eq!(rm.stock, 4);
        assert!(rm.is_low_stock());
        assert_eq!(p.low_stock(tenant).len(), 1);
    }

    #[test]
    fn sequence_gap_is_rejected() {
        let p = ProductsProjection::in_memory();
        let tenant = TenantId::new();
        let id = create(&p, tenant, "NASI-LEMAK", 10);
        let err = p.apply_envelope(&adjust(tenant, id, 3, -1, 9)).unwrap_err();
        assert!(matches!(err, ProjectionError::NonMonotonicSequence { last: 1, found: 3 }));
    }

    #[test]
    fn filter_by_search_and_low_stock() {
        let p = ProductsProjection::in_memory();
        let tenant = TenantId::new();
        create(&p, tenant, "KOPI-O", 50);
        create(&p, tenant, "ROTI-CANAI", 2);
        create(&p, TenantId::new(), "ROTI-BOM", 1);

        let roti = p.query(
            tenant,
            &ProductFilter {
                search: Some("roti".to_string()),
                ..Default::default()
            },
            PageRequest::default(),
        );
        assert_eq!(roti.total, 1);

        let low = p.query(
            tenant,
            &ProductFilter {
                low_stock: true,
                ..Default::default()
            },
            PageRequest::default(),
        );
        assert_eq!(low.items[0].details.sku, "ROTI-CANAI");
        assert!(p.find_by_sku(tenant, "kopi-o").is_some());
    }
}
