//! Command -> event store -> bus -> projections, end to end.

#[cfg(test)]
mod tests {
    use std::time::{Duration, Instant};

    use chrono::{NaiveDate, Utc};

    use kedai_core::{BasisPoints, Money, TenantId};
    use kedai_customers::CustomerId;
    use kedai_invoicing::{InvoiceLine, InvoiceStatus, PaymentMethod};
    use kedai_products::{Product, ProductCommand, ProductId, StockReason};

    use crate::command_dispatcher::DispatchError;
    use crate::dashboard::Dashboard;
    use crate::event_store::EventStore;
    use crate::projections::ReadModels;
    use crate::workers::{ProjectionWorker, WorkerHandle};
    use crate::workflows::test_support::{
        TestDispatcher, backend, create_product, register_company, register_customer,
    };
    use crate::workflows::{InvoiceDraft, InvoiceWorkflow};

    fn wire(d: &TestDispatcher) -> (ReadModels, WorkerHandle) {
        let read_models = ReadModels::in_memory();
        let worker = ProjectionWorker::spawn_projections(d.bus(), read_models.projections(), |_| {})
            .expect("spawn projection worker");
        (read_models, worker)
    }

    fn eventually(mut check: impl FnMut() -> bool) {
        let deadline = Instant::now() + Duration::from_secs(2);
        while !check() {
            assert!(Instant::now() < deadline, "read model did not catch up");
            std::thread::sleep(Duration::from_millis(10));
        }
    }

    fn draft(customer_id: CustomerId, product_id: ProductId, qty: i64) -> InvoiceDraft {
        let day = NaiveDate::from_ymd_opt(2026, 5, 4).unwrap();
        InvoiceDraft {
            customer_id,
            issue_date: day,
            due_date: day,
            lines: vec![InvoiceLine {
                line_no: 1,
                product_id: Some(product_id),
                description: "Beras 10kg".to_string(),
                quantity: qty,
                unit_price: Money::from_sen(3_000),
                discount_rate: BasisPoints::zero(),
                tax_rate: BasisPoints::zero(),
                classification_code: None,
            }],
            notes: None,
        }
    }

    #[tokio::test]
    async fn invoice_lifecycle_reaches_every_read_model() {
        let d = backend();
        let (read_models, worker) = wire(&d);
        let tenant = TenantId::new();
        register_company(&d, tenant).await;
        let customer = register_customer(&d, tenant, "Restoran Selera").await;
        let beras = create_product(&d, tenant, "BERAS", Some(10), 1_500).await;

        let invoices = InvoiceWorkflow::new(&d);
        let invoice = invoices.create(tenant, draft(customer, beras, 4), Utc::now()).await.unwrap();
        let invoice_id = invoice.id_typed();
        invoices.send(tenant, invoice_id, Utc::now()).await.unwrap();
        invoices
            .record_payment(
                tenant,
                invoice_id,
                Money::from_sen(5_000),
                PaymentMethod::BankTransfer,
                None,
                Utc::now(),
                Utc::now(),
            )
            .await
            .unwrap();

        eventually(|| {
            read_models
                .invoices
                .get(tenant, &invoice_id)
                .is_some_and(|i| i.status == InvoiceStatus::Partial)
        });
        let view = read_models.invoices.get(tenant, &invoice_id).unwrap();
        assert_eq!(view.number, "INV-000001");
        assert_eq!(view.balance_due, Money::from_sen(7_000));

        eventually(|| read_models.products.get(tenant, &beras).is_some_and(|p| p.stock == 6));
        eventually(|| {
            read_models
                .ledger
                .balance(tenant, "1200")
                .is_some_and(|b| b.balance == Money::from_sen(7_000))
        });
        assert!(read_models.ledger.trial_balance(tenant).balanced);

        worker.shutdown();
    }

    #[tokio::test]
    async fn tenants_never_see_each_other() {
        let d = backend();
        let (read_models, worker) = wire(&d);
        let (a, b) = (TenantId::new(), TenantId::new());
        register_company(&d, a).await;
        register_company(&d, b).await;
        let product = create_product(&d, a, "TEH", Some(5), 100).await;

        eventually(|| read_models.products.get(a, &product).is_some());
        assert!(read_models.products.get(b, &product).is_none());
        assert!(read_models.products.list(b).is_empty());

        // Streams are keyed by tenant: the product does not exist for `b`.
        let err = d
            .send::<Product>(
                b,
                product.0,
                ProductCommand::AdjustStock(kedai_products::AdjustStock {
                    tenant_id: b,
                    product_id: product,
                    delta: 1,
                    reason: StockReason::Restock,
                    reference: None,
                    occurred_at: Utc::now(),
                }),
            )
            .await;
        assert!(matches!(err, Err(DispatchError::NotFound)));

        worker.shutdown();
    }

    #[tokio::test]
    async fn read_models_rebuild_from_the_event_log() {
        let d = backend();
        let tenant = TenantId::new();
        register_company(&d, tenant).await;
        let customer = register_customer(&d, tenant, "Kedai Makan Siti").await;
        let gula = create_product(&d, tenant, "GULA", Some(8), 200).await;
        let invoices = InvoiceWorkflow::new(&d);
        let invoice = invoices.create(tenant, draft(customer, gula, 3), Utc::now()).await.unwrap();
        invoices.send(tenant, invoice.id_typed(), Utc::now()).await.unwrap();

        let envelopes: Vec<_> = d
            .store()
            .load_all()
            .await
            .unwrap()
            .iter()
            .map(|e| e.to_envelope())
            .collect();
        let read_models = ReadModels::in_memory();
        read_models.projections().rebuild(&envelopes).unwrap();

        assert_eq!(read_models.products.get(tenant, &gula).unwrap().stock, 5);
        let view = read_models.invoices.get(tenant, &invoice.id_typed()).unwrap();
        assert_eq!(view.status, InvoiceStatus::Sent);

        let dashboard = Dashboard::new(read_models.clone(), Duration::from_secs(60));
        let summary = dashboard.summary(tenant, view.issue_date);
        assert_eq!(summary.outstanding_receivables, Money::from_sen(9_000));
        assert_eq!(summary.invoice_counts.get("SENT"), Some(&1));
    }
}
