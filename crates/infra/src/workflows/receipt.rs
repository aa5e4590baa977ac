use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use tracing::info;

use kedai_accounting::{entry_id_for, posting};
use kedai_company::DocumentKind;
use kedai_core::{Money, TenantId};
use kedai_customers::CustomerId;
use kedai_events::{EventBus, EventEnvelope};
use kedai_invoicing::{LineItem, PaymentMethod};
use kedai_products::StockReason;
use kedai_sales::{IssueReceipt, PosOrderId, Receipt, ReceiptCommand, ReceiptId, VoidReceipt};

use crate::command_dispatcher::{CommandDispatcher, DispatchError};
use crate::event_store::EventStore;
use crate::retry::RetryPolicy;

use super::{
    DocumentNumbers, LedgerPoster, StockEffects, WorkflowError, describe, dry_run, ensure_customer, ensure_products,
    incomplete, restock_moves, sale_moves,
};

const ISSUED: &str = "receipt.issued";
const COGS: &str = "receipt.cogs";
const VOIDED: &str = "receipt.voided";
const COGS_VOIDED: &str = "receipt.cogs_voided";

/// What the counter rings up.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReceiptDraft {
    #[serde(default)]
    pub customer_id: Option<CustomerId>,
    #[serde(default)]
    pub pos_order_id: Option<PosOrderId>,
    pub lines: Vec<LineItem>,
    pub payment_method: PaymentMethod,
    #[serde(default)]
    pub amount_tendered: Option<Money>,
}

/// Counter sales with their stock and ledger effects.
pub struct ReceiptWorkflow<'a, S, B> {
    dispatcher: &'a CommandDispatcher<S, B>,
    retry: RetryPolicy,
}

impl<'a, S, B> ReceiptWorkflow<'a, S, B>
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

    async fn load(&self, tenant_id: TenantId, receipt_id: ReceiptId) -> Result<Receipt, DispatchError> {
        let receipt: Receipt = self.dispatcher.load(tenant_id, receipt_id.0).await?;
        if receipt.exists() {
            Ok(receipt)
        } else {
            Err(DispatchError::NotFound)
        }
    }

    /// Issues receipt `receipt_id` under the next receipt number.
    #[tracing::instrument(skip(self, draft, at), err)]
    pub async fn issue(
        &self,
        tenant_id: TenantId,
        receipt_id: ReceiptId,
        draft: ReceiptDraft,
        at: DateTime<Utc>,
    ) -> Result<Receipt, WorkflowError> {
        if let Some(customer_id) = draft.customer_id {
            ensure_customer(self.dispatcher, tenant_id, customer_id).await?;
        }
        ensure_products(self.dispatcher, tenant_id, &draft.lines).await?;

        let mut issue = IssueReceipt {
            tenant_id,
            receipt_id,
            number: "PENDING".to_string(),
            customer_id: draft.customer_id,
            pos_order_id: draft.pos_order_id,
            lines: draft.lines,
            payment_method: draft.payment_method,
            amount_tendered: draft.amount_tendered,
            stock_out: Vec::new(),
            issued_at: at,
        };
        dry_run::<Receipt, _, _>(
            self.dispatcher,
            tenant_id,
            receipt_id.0,
            &ReceiptCommand::Issue(issue.clone()),
        )
        .await?;

        issue.number = DocumentNumbers::new(self.dispatcher)
            .with_retry(self.retry)
            .reserve(tenant_id, DocumentKind::Receipt, at)
            .await?;
        let number = issue.number.clone();

        let stock = StockEffects::new(self.dispatcher).with_retry(self.retry);
        let applied = stock
            .apply(tenant_id, &sale_moves(&issue.lines), StockReason::Sale, &number, at)
            .await?;
        issue.stock_out = applied.stock_out();

        if let Err(err) = self
            .dispatcher
            .send::<Receipt>(tenant_id, receipt_id.0, ReceiptCommand::Issue(issue))
            .await
        {
            stock.compensate(tenant_id, &applied, at).await;
            return Err(err.into());
        }

        let receipt = self.load(tenant_id, receipt_id).await?;
        let totals = receipt.totals();
        let rounding = receipt.settlement().map(|s| s.rounding).unwrap_or_default();
        let document = describe("Receipt", &number);

        let ledger = LedgerPoster::new(self.dispatcher).with_retry(self.retry);
        ledger
            .post(
                tenant_id,
                entry_id_for(receipt_id.0, ISSUED),
                posting::receipt_issued(
                    totals.subtotal,
                    totals.tax_total,
                    rounding,
                    receipt.payment_method().is_cash(),
                ),
                &document,
                Some(&number),
                at,
            )
            .await
            .map_err(|err| incomplete(&document, "sales posting", err))?;
        ledger
            .post(
                tenant_id,
                entry_id_for(receipt_id.0, COGS),
                posting::cost_of_sales(applied.cost()),
                &format!("Cost of sales, {document}"),
                Some(&number),
                at,
            )
            .await
            .map_err(|err| incomplete(&document, "cost of sales posting", err))?;

        info!(%tenant_id, receipt = %number, total = %totals.total, "receipt issued");
        Ok(receipt)
    }

    /// Voids an issued receipt: stock back in, entries reversed.
    #[tracing::instrument(skip(self, reason, at), err)]
    pub async fn void(
        &self,
        tenant_id: TenantId,
        receipt_id: ReceiptId,
        reason: Option<String>,
        at: DateTime<Utc>,
    ) -> Result<Receipt, WorkflowError> {
        let command = ReceiptCommand::Void(VoidReceipt {
            tenant_id,
            receipt_id,
            reason,
            occurred_at: at,
        });
        let (receipt, _) = dry_run::<Receipt, _, _>(self.dispatcher, tenant_id, receipt_id.0, &command).await?;
        let number = receipt.number().to_string();

        let stock = StockEffects::new(self.dispatcher).with_retry(self.retry);
        let applied = stock
            .apply(
                tenant_id,
                &restock_moves(receipt.stock_out()),
                StockReason::SaleReversal,
                &number,
                at,
            )
            .await?;

        if let Err(err) = self.dispatcher.send::<Receipt>(tenant_id, receipt_id.0, command).await {
            stock.compensate(tenant_id, &applied, at).await;
            return Err(err.into());
        }

        let document = describe("Receipt", &number);
        let ledger = LedgerPoster::new(self.dispatcher).with_retry(self.retry);
        ledger
            .reverse(
                tenant_id,
                entry_id_for(receipt_id.0, ISSUED),
                entry_id_for(receipt_id.0, VOIDED),
                &format!("Void, {document}"),
                Some(&number),
                at,
            )
            .await
            .map_err(|err| incomplete(&document, "sales reversal", err))?;
        ledger
            .reverse(
                tenant_id,
                entry_id_for(receipt_id.0, COGS),
                entry_id_for(receipt_id.0, COGS_VOIDED),
                &format!("Cost of sales reversal, {document}"),
                Some(&number),
                at,
            )
            .await
            .map_err(|err| incomplete(&document, "cost of sales reversal", err))?;

        Ok(self.load(tenant_id, receipt_id).await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::workflows::test_support::{backend, create_product, register_company, start_tracking};
    use kedai_accounting::{Ledger, LedgerId, codes};
    use kedai_core::BasisPoints;
    use kedai_products::{Product, ProductId};
    use kedai_sales::ReceiptStatus;

    fn line(no: u32, product_id: Option<ProductId>, qty: i64, price_sen: i64) -> LineItem {
        LineItem {
            line_no: no,
            product_id,
            description: format!("Item {no}"),
            quantity: qty,
            unit_price: Money::from_sen(price_sen),
            discount_rate: BasisPoints::zero(),
            tax_rate: BasisPoints::zero(),
            classification_code: None,
        }
    }

    fn cash(lines: Vec<LineItem>, tendered_sen: i64) -> ReceiptDraft {
        ReceiptDraft {
            customer_id: None,
            pos_order_id: None,
            lines,
            payment_method: PaymentMethod::Cash,
            amount_tendered: Some(Money::from_sen(tendered_sen)),
        }
    }

    #[tokio::test]
    async fn cash_sale_posts_rounding_and_deducts_stock() {
        let d = backend();
        let tenant = TenantId::new();
        register_company(&d, tenant).await;
        let roti = create_product(&d, tenant, "ROTI", Some(10), 80).await;

        // 2 x 1.51 = 3.02, collected 3.00.
        let receipt = ReceiptWorkflow::new(&d)
            .issue(tenant, ReceiptId::generate(), cash(vec![line(1, Some(roti), 2, 151)], 500), Utc::now())
            .await
            .unwrap();
        assert_eq!(receipt.number(), "RCT-000001");
        assert_eq!(receipt.settlement().unwrap().rounding, Money::from_sen(-2));

        let product: Product = d.load(tenant, roti.0).await.unwrap();
        assert_eq!(product.stock(), 8);

        let ledger: Ledger = d.load(tenant, LedgerId::for_tenant(tenant).0).await.unwrap();
        let sale = ledger.entry(entry_id_for(receipt.id_typed().0, ISSUED)).unwrap();
        assert_eq!(posting::imbalance(sale), Money::zero());
        assert!(sale
            .iter()
            .any(|l| l.account_code == codes::ROUNDING && l.is_debit && l.amount == Money::from_sen(2)));
        assert!(sale
            .iter()
            .any(|l| l.account_code == codes::CASH && l.amount == Money::from_sen(300)));
    }

    #[tokio::test]
    async fn short_tender_burns_no_number_and_moves_no_stock() {
        let d = backend();
        let tenant = TenantId::new();
        register_company(&d, tenant).await;
        let teh = create_product(&d, tenant, "TEH", Some(3), 50).await;
        let flow = ReceiptWorkflow::new(&d);

        let err = flow
            .issue(tenant, ReceiptId::generate(), cash(vec![line(1, Some(teh), 1, 320)], 300), Utc::now())
            .await
            .unwrap_err();
        assert!(matches!(err, WorkflowError::Dispatch(DispatchError::Validation(_))));

        let product: Product = d.load(tenant, teh.0).await.unwrap();
        assert_eq!(product.stock(), 3);

        let receipt = flow
            .issue(tenant, ReceiptId::generate(), cash(vec![line(1, Some(teh), 1, 320)], 500), Utc::now())
            .await
            .unwrap();
        assert_eq!(receipt.number(), "RCT-000001");
    }

    #[tokio::test]
    async fn void_restores_stock_once() {
        let d = backend();
        let tenant = TenantId::new();
        register_company(&d, tenant).await;
        let nasi = create_product(&d, tenant, "NASI", Some(5), 300).await;
        let flow = ReceiptWorkflow::new(&d);
        let receipt_id = ReceiptId::generate();

        flow.issue(tenant, receipt_id, cash(vec![line(1, Some(nasi), 2, 650)], 1_300), Utc::now())
            .await
            .unwrap();
        let voided = flow
            .void(tenant, receipt_id, Some("customer changed mind".into()), Utc::now())
            .await
            .unwrap();
        assert_eq!(voided.status(), ReceiptStatus::Voided);

        let err = flow.void(tenant, receipt_id, None, Utc::now()).await.unwrap_err();
        assert!(matches!(err, WorkflowError::Dispatch(DispatchError::Conflict(_))));

        let product: Product = d.load(tenant, nasi.0).await.unwrap();
        assert_eq!(product.stock(), 5);

        let ledger: Ledger = d.load(tenant, LedgerId::for_tenant(tenant).0).await.unwrap();
        let cogs = ledger.entry(entry_id_for(receipt_id.0, COGS)).unwrap();
        let reversed = ledger.entry(entry_id_for(receipt_id.0, COGS_VOIDED)).unwrap();
        assert_eq!(posting::reverse(cogs), reversed);
    }

    #[tokio::test]
    async fn void_puts_back_what_issue_took_out() {
        let d = backend();
        let tenant = TenantId::new();
        register_company(&d, tenant).await;
        let cuci = create_product(&d, tenant, "CUCI-KERETA", None, 500).await;
        let flow = ReceiptWorkflow::new(&d);
        let receipt_id = ReceiptId::generate();

        let receipt = flow
            .issue(tenant, receipt_id, cash(vec![line(1, Some(cuci), 3, 1_500)], 5_000), Utc::now())
            .await
            .unwrap();
        assert!(receipt.stock_out().is_empty());

        start_tracking(&d, tenant, cuci).await;
        flow.void(tenant, receipt_id, None, Utc::now()).await.unwrap();

        let product: Product = d.load(tenant, cuci.0).await.unwrap();
        assert_eq!(product.stock(), 0);
    }

    #[tokio::test]
    async fn unknown_receipt_is_not_found() {
        let d = backend();
        let err = ReceiptWorkflow::new(&d)
            .void(TenantId::new(), ReceiptId::generate(), None, Utc::now())
            .await
            .unwrap_err();
        assert!(matches!(err, WorkflowError::Dispatch(DispatchError::NotFound)));
    }
}
