use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use kedai_core::{Aggregate, AggregateRoot, BasisPoints, DomainError, Money, TenantId};
use kedai_events::Event;
use kedai_invoicing::{DocumentTotals, LineItem, PaymentMethod};
use kedai_products::ProductId;

use crate::receipt::{ReceiptId, settle};

kedai_core::typed_id!(PosOrderId, "PosOrderId");
kedai_core::typed_id!(OrderItemId, "OrderItemId");

/// POS order status lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PosOrderStatus {
    Open,
    Preparing,
    Served,
    Completed,
    Cancelled,
}

impl PosOrderStatus {
    pub fn is_active(&self) -> bool {
        matches!(
            self,
            PosOrderStatus::Open | PosOrderStatus::Preparing | PosOrderStatus::Served
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum OrderType {
    DineIn { table: String },
    Takeaway,
    Delivery,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderItem {
    pub item_id: OrderItemId,
    pub product_id: Option<ProductId>,
    pub name: String,
    pub quantity: i64,
    pub unit_price: Money,
    pub tax_rate: BasisPoints,
    pub note: Option<String>,
}

/// Order items as document lines, numbered in order. A kitchen note is
/// appended to the description.
pub fn order_lines(items: &[OrderItem]) -> Vec<LineItem> {
    items
        .iter()
        .enumerate()
        .map(|(i, item)| LineItem {
            line_no: i as u32 + 1,
            product_id: item.product_id,
            description: match &item.note {
                Some(note) => format!("{} ({note})", item.name),
                None => item.name.clone(),
            },
            quantity: item.quantity,
            unit_price: item.unit_price,
            discount_rate: BasisPoints::zero(),
            tax_rate: item.tax_rate,
            classification_code: None,
        })
        .collect()
}

/// Aggregate root: PosOrder.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PosOrder {
    id: PosOrderId,
    tenant_id: Option<TenantId>,
    number: String,
    order_type: OrderType,
    items: Vec<OrderItem>,
    status: PosOrderStatus,
    receipt_id: Option<ReceiptId>,
    opened_at: Option<DateTime<Utc>>,
    version: u64,
    created: bool,
}

impl PosOrder {
    pub fn empty(id: PosOrderId) -> Self {
        Self {
            id,
            tenant_id: None,
            number: String::new(),
            order_type: OrderType::Takeaway,
            items: Vec::new(),
            status: PosOrderStatus::Open,
            receipt_id: None,
            opened_at: None,
            version: 0,
            created: false,
        }
    }

    pub fn id_typed(&self) -> PosOrderId {
        self.id
    }

    pub fn tenant_id(&self) -> Option<TenantId> {
        self.tenant_id
    }

    pub fn number(&self) -> &str {
        &self.number
    }

    pub fn order_type(&self) -> &OrderType {
        &self.order_type
    }

    pub fn items(&self) -> &[OrderItem] {
        &self.items
    }

    pub fn status(&self) -> PosOrderStatus {
        self.status
    }

    pub fn receipt_id(&self) -> Option<ReceiptId> {
        self.receipt_id
    }

    pub fn exists(&self) -> bool {
        self.created
    }

    /// Items as document lines, numbered in order.
    pub fn lines(&self) -> Vec<LineItem> {
        order_lines(&self.items)
    }

    pub fn totals(&self) -> DocumentTotals {
        DocumentTotals::from_lines(&self.lines()).unwrap_or_default()
    }
}

impl AggregateRoot for PosOrder {
    type Id = PosOrderId;

    fn id(&self) -> &Self::Id {
        &self.id
    }

    fn version(&self) -> u64 {
        self.version
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum PosOrderCommand {
    OpenOrder {
        tenant_id: TenantId,
        order_id: PosOrderId,
        number: String,
        order_type: OrderType,
        opened_at: DateTime<Utc>,
    },
    AddItem {
        tenant_id: TenantId,
        order_id: PosOrderId,
        item: OrderItem,
        occurred_at: DateTime<Utc>,
    },
    /// Quantity 0 removes the item.
    ChangeItemQuantity {
        tenant_id: TenantId,
        order_id: PosOrderId,
        item_id: OrderItemId,
        quantity: i64,
        occurred_at: DateTime<Utc>,
    },
    RemoveItem {
        tenant_id: TenantId,
        order_id: PosOrderId,
        item_id: OrderItemId,
        occurred_at: DateTime<Utc>,
    },
    SendToKitchen {
        tenant_id: TenantId,
        order_id: PosOrderId,
        occurred_at: DateTime<Utc>,
    },
    MarkServed {
        tenant_id: TenantId,
        order_id: PosOrderId,
        occurred_at: DateTime<Utc>,
    },
    CompleteOrder {
        tenant_id: TenantId,
        order_id: PosOrderId,
        receipt_id: ReceiptId,
        payment_method: PaymentMethod,
        amount_tendered: Option<Money>,
        occurred_at: DateTime<Utc>,
    },
    CancelOrder {
        tenant_id: TenantId,
        order_id: PosOrderId,
        reason: Option<String>,
        occurred_at: DateTime<Utc>,
    },
}

impl PosOrderCommand {
    fn target(&self) -> (TenantId, PosOrderId) {
        match self {
            PosOrderCommand::OpenOrder { tenant_id, order_id, .. }
            | PosOrderCommand::AddItem { tenant_id, order_id, .. }
            | PosOrderCommand::ChangeItemQuantity { tenant_id, order_id, .. }
            | PosOrderCommand::RemoveItem { tenant_id, order_id, .. }
            | PosOrderCommand::SendToKitchen { tenant_id, order_id, .. }
            | PosOrderCommand::MarkServed { tenant_id, order_id, .. }
            | PosOrderCommand::CompleteOrder { tenant_id, order_id, .. }
            | PosOrderCommand::CancelOrder { tenant_id, order_id, .. } => (*tenant_id, *order_id),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum PosOrderEvent {
    Opened {
        tenant_id: TenantId,
        order_id: PosOrderId,
        number: String,
        order_type: OrderType,
        occurred_at: DateTime<Utc>,
    },
    ItemAdded {
        tenant_id: TenantId,
        order_id: PosOrderId,
        item: OrderItem,
        occurred_at: DateTime<Utc>,
    },
    ItemQuantityChanged {
        tenant_id: TenantId,
        order_id: PosOrderId,
        item_id: OrderItemId,
        quantity: i64,
        occurred_at: DateTime<Utc>,
    },
    ItemRemoved {
        tenant_id: TenantId,
        order_id: PosOrderId,
        item_id: OrderItemId,
        occurred_at: DateTime<Utc>,
    },
    SentToKitchen {
        tenant_id: TenantId,
        order_id: PosOrderId,
        occurred_at: DateTime<Utc>,
    },
    Served {
        tenant_id: TenantId,
        order_id: PosOrderId,
        occurred_at: DateTime<Utc>,
    },
    Completed {
        tenant_id: TenantId,
        order_id: PosOrderId,
        receipt_id: ReceiptId,
        payment_method: PaymentMethod,
        totals: DocumentTotals,
        occurred_at: DateTime<Utc>,
    },
    Cancelled {
        tenant_id: TenantId,
        order_id: PosOrderId,
        reason: Option<String>,
        occurred_at: DateTime<Utc>,
    },
}

impl PosOrderEvent {
    pub fn order_id(&self) -> PosOrderId {
        match self {
            PosOrderEvent::Opened { order_id, .. }
            | PosOrderEvent::ItemAdded { order_id, .. }
            | PosOrderEvent::ItemQuantityChanged { order_id, .. }
            | PosOrderEvent::ItemRemoved { order_id, .. }
            | PosOrderEvent::SentToKitchen { order_id, .. }
            | PosOrderEvent::Served { order_id, .. }
            | PosOrderEvent::Completed { order_id, .. }
            | PosOrderEvent::Cancelled { order_id, .. } => *order_id,
        }
    }

    pub fn tenant_id(&self) -> TenantId {
        match self {
            PosOrderEvent::Opened { tenant_id, .. }
            | PosOrderEvent::ItemAdded { tenant_id, .. }
            | PosOrderEvent::ItemQuantityChanged { tenant_id, .. }
            | PosOrderEvent::ItemRemoved { tenant_id, .. }
            | PosOrderEvent::SentToKitchen { tenant_id, .. }
            | PosOrderEvent::Served { tenant_id, .. }
            | PosOrderEvent::Completed { tenant_id, .. }
            | PosOrderEvent::Cancelled { tenant_id, .. } => *tenant_id,
        }
    }
}

impl Event for PosOrderEvent {
    fn event_type(&self) -> &'static str {
        match self {
            PosOrderEvent::Opened { .. } => "sales.pos_order.opened",
            PosOrderEvent::ItemAdded { .. } => "sales.pos_order.item_added",
            PosOrderEvent::ItemQuantityChanged { .. } => "sales.pos_order.item_quantity_changed",
            PosOrderEvent::ItemRemoved { .. } => "sales.pos_order.item_removed",
            PosOrderEvent::SentToKitchen { .. } => "sales.pos_order.sent_to_kitchen",
            PosOrderEvent::Served { .. } => "sales.pos_order.served",
            PosOrderEvent::Completed { .. } => "sales.pos_order.completed",
            PosOrderEvent::Cancelled { .. } => "sales.pos_order.cancelled",
        }
    }

    fn version(&self) -> u32 {
        1
    }

    fn occurred_at(&self) -> DateTime<Utc> {
        match self {
            PosOrderEvent::Opened { occurred_at, .. }
            | PosOrderEvent::ItemAdded { occurred_at, .. }
            | PosOrderEvent::ItemQuantityChanged { occurred_at, .. }
            | PosOrderEvent::ItemRemoved { occurred_at, .. }
            | PosOrderEvent::SentToKitchen { occurred_at, .. }
            | PosOrderEvent::Served { occurred_at, .. }
            | PosOrderEvent::Completed { occurred_at, .. }
            | PosOrderEvent::Cancelled { occurred_at, .. } => *occurred_at,
        }
    }
}

impl Aggregate for PosOrder {
    type Command = PosOrderCommand;
    type Event = PosOrderEvent;
    type Error = DomainError;

    fn apply(&mut self, event: &Self::Event) {
        match event {
            PosOrderEvent::Opened {
                tenant_id,
                order_id,
                number,
                order_type,
                occurred_at,
            } => {
                self.id = *order_id;
                self.tenant_id = Some(*tenant_id);
                self.number = number.clone();
                self.order_type = order_type.clone();
                self.opened_at = Some(*occurred_at);
                self.status = PosOrderStatus::Open;
                self.created = true;
            }
            PosOrderEvent::ItemAdded { item, .. } => self.items.push(item.clone()),
            PosOrderEvent::ItemQuantityChanged { item_id, quantity, .. } => {
                if let Some(item) = self.items.iter_mut().find(|i| i.item_id == *item_id) {
                    item.quantity = *quantity;
                }
            }
            PosOrderEvent::ItemRemoved { item_id, .. } => self.items.retain(|i| i.item_id != *item_id),
            PosOrderEvent::SentToKitchen { .. } => self.status = PosOrderStatus::Preparing,
            PosOrderEvent::Served { .. } => self.status = PosOrderStatus::Served,
            PosOrderEvent::Completed { receipt_id, .. } => {
                self.receipt_id = Some(*receipt_id);
                self.status = PosOrderStatus::Completed;
            }
            PosOrderEvent::Cancelled { .. } => self.status = PosOrderStatus::Cancelled,
        }
        self.version += 1;
    }

    fn handle(&self, command: &Self::Command) -> Result<Vec<Self::Event>, Self::Error> {
        let (tenant_id, order_id) = command.target();
        if let PosOrderCommand::OpenOrder {
            number,
            order_type,
            opened_at,
            ..
        } = command
        {
            return self.handle_open(tenant_id, order_id, number, order_type, *opened_at);
        }
        self.ensure_existing(tenant_id, order_id)?;

        match command {
            PosOrderCommand::OpenOrder { .. } => Err(DomainError::conflict("order already exists")),
            PosOrderCommand::AddItem { item, occurred_at, .. } => {
                self.ensure_editable()?;
                let name = kedai_core::validate::required("name", &item.name)?;
                if item.quantity <= 0 {
                    return Err(DomainError::validation("quantity must be positive"));
                }
                if item.unit_price.is_negative() {
                    return Err(DomainError::validation("unit_price cannot be negative"));
                }
                if self.items.iter().any(|i| i.item_id == item.item_id) {
                    return Err(DomainError::conflict("item already on order"));
                }
                Ok(vec![PosOrderEvent::ItemAdded {
                    tenant_id,
                    order_id,
                    item: OrderItem {
                        name,
                        tax_rate: item.tax_rate.validate_percent("tax_rate")?,
                        note: kedai_core::validate::optional(item.note.as_deref()),
                        ..item.clone()
                    },
                    occurred_at: *occurred_at,
                }])
            }
            PosOrderCommand::ChangeItemQuantity {
                item_id,
                quantity,
                occurred_at,
                ..
            } => {
                self.ensure_editable()?;
                self.ensure_item(*item_id)?;
                match *quantity {
                    q if q < 0 => Err(DomainError::validation("quantity cannot be negative")),
                    0 => Ok(vec![PosOrderEvent::ItemRemoved {
                        tenant_id,
                        order_id,
                        item_id: *item_id,
                        occurred_at: *occurred_at,
                    }]),
                    q => Ok(vec![PosOrderEvent::ItemQuantityChanged {
                        tenant_id,
                        order_id,
                        item_id: *item_id,
                        quantity: q,
                        occurred_at: *occurred_at,
                    }]),
                }
            }
            PosOrderCommand::RemoveItem {
                item_id, occurred_at, ..
            } => {
                self.ensure_editable()?;
                self.ensure_item(*item_id)?;
                Ok(vec![PosOrderEvent::ItemRemoved {
                    tenant_id,
                    order_id,
                    item_id: *item_id,
                    occurred_at: *occurred_at,
                }])
            }
            PosOrderCommand::SendToKitchen { occurred_at, .. } => {
                if self.status != PosOrderStatus::Open {
                    return Err(DomainError::invariant("only open orders can be sent to the kitchen"));
                }
                if self.items.is_empty() {
                    return Err(DomainError::validation("order has no items"));
                }
                Ok(vec![PosOrderEvent::SentToKitchen {
                    tenant_id,
                    order_id,
                    occurred_at: *occurred_at,
                }])
            }
            PosOrderCommand::MarkServed { occurred_at, .. } => {
                if self.status != PosOrderStatus::Preparing {
                    return Err(DomainError::invariant("only preparing orders can be served"));
                }
                Ok(vec![PosOrderEvent::Served {
                    tenant_id,
                    order_id,
                    occurred_at: *occurred_at,
                }])
            }
            PosOrderCommand::CompleteOrder {
                receipt_id,
                payment_method,
                amount_tendered,
                occurred_at,
                ..
            } => {
                self.ensure_editable()?;
                let totals = DocumentTotals::from_lines(&self.lines())
                    .map_err(|_| DomainError::validation("order has no items"))?;
                settle(totals.total, *payment_method, *amount_tendered)?;
                Ok(vec![PosOrderEvent::Completed {
                    tenant_id,
                    order_id,
                    receipt_id: *receipt_id,
                    payment_method: *payment_method,
                    totals,
                    occurred_at: *occurred_at,
                }])
            }
            PosOrderCommand::CancelOrder {
                reason, occurred_at, ..
            } => {
                if !self.status.is_active() {
                    return Err(DomainError::invariant(format!(
                        "cannot cancel a {:?} order",
                        self.status
                    )));
                }
                Ok(vec![PosOrderEvent::Cancelled {
                    tenant_id,
                    order_id,
                    reason: kedai_core::validate::optional(reason.as_deref()),
                    occurred_at: *occurred_at,
                }])
            }
        }
    }
}

impl PosOrder {
    fn handle_open(
        &self,
        tenant_id: TenantId,
        order_id: PosOrderId,
        number: &str,
        order_type: &OrderType,
        opened_at: DateTime<Utc>,
    ) -> Result<Vec<PosOrderEvent>, DomainError> {
        if self.created {
            return Err(DomainError::conflict("order already exists"));
        }
        let number = kedai_core::validate::required("number", number)?;
        let order_type = match order_type {
            OrderType::DineIn { table } => OrderType::DineIn {
                table: kedai_core::validate::required("table", table)?,
            },
            other => other.clone(),
        };
        Ok(vec![PosOrderEvent::Opened {
            tenant_id,
            order_id,
            number,
            order_type,
            occurred_at: opened_at,
        }])
    }

    fn ensure_existing(&self, tenant_id: TenantId, order_id: PosOrderId) -> Result<(), DomainError> {
        if !self.created {
            return Err(DomainError::not_found());
        }
        if self.tenant_id != Some(tenant_id) {
            return Err(DomainError::invariant("tenant mismatch"));
        }
        if self.id != order_id {
            return Err(DomainError::invariant("order_id mismatch"));
        }
        Ok(())
    }

    fn ensure_editable(&self) -> Result<(), DomainError> {
        if !self.status.is_active() {
            return Err(DomainError::invariant(format!(
                "order is {:?} and can no longer change",
                self.status
            )));
        }
        Ok(())
    }

    fn ensure_item(&self, item_id: OrderItemId) -> Result<(), DomainError> {
        if self.items.iter().any(|i| i.item_id == item_id) {
            Ok(())
        } else {
            Err(DomainError::validation(format!("item {item_id} is not on this order")))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kedai_events::execute;

    fn open(order_type: OrderType) -> (TenantId, PosOrder) {
        let tenant_id = TenantId::new();
        let order_id = PosOrderId::generate();
        let mut order = PosOrder::empty(order_id);
        execute(
            &mut order,
            &PosOrderCommand::OpenOrder {
                tenant_id,
                order_id,
                number: "ORD-000001".into(),
                order_type,
                opened_at: Utc::now(),
            },
        )
        .unwrap();
        (tenant_id, order)
    }

    fn add(order: &mut PosOrder, tenant_id: TenantId, name: &str, qty: i64, price: i64) -> OrderItemId {
        let item_id = OrderItemId::generate();
        let order_id = order.id_typed();
        execute(
            order,
            &PosOrderCommand::AddItem {
                tenant_id,
                order_id,
                item: OrderItem {
                    item_id,
                    product_id: None,
                    name: name.into(),
                    quantity: qty,
                    unit_price: Money::from_sen(price),
                    tax_rate: BasisPoints::zero(),
                    note: None,
                },
                occurred_at: Utc::now(),
            },
        )
        .unwrap();
        item_id
    }

    fn simple(tenant_id: TenantId, order: &PosOrder, f: fn(TenantId, PosOrderId, DateTime<Utc>) -> PosOrderCommand) -> PosOrderCommand {
        f(tenant_id, order.id_typed(), Utc::now())
    }

    fn kitchen(tenant_id: TenantId, order_id: PosOrderId, occurred_at: DateTime<Utc>) -> PosOrderCommand {
        PosOrderCommand::SendToKitchen {
            tenant_id,
            order_id,
            occurred_at,
        }
    }

    fn served(tenant_id: TenantId, order_id: PosOrderId, occurred_at: DateTime<Utc>) -> PosOrderCommand {
        PosOrderCommand::MarkServed {
            tenant_id,
            order_id,
            occurred_at,
        }
    }

    #[test]
    fn dine_in_needs_a_table() {
        let order_id = PosOrderId::generate();
        let err = PosOrder::empty(order_id)
            .handle(&PosOrderCommand::OpenOrder {
                tenant_id: TenantId::new(),
                order_id,
                number: "ORD-000002".into(),
                order_type: OrderType::DineIn { table: " ".into() },
                opened_at: Utc::now(),
            })
            .unwrap_err();
        assert!(err.to_string().contains("table"));
    }

    #[test]
    fn kitchen_flow() {
        let (tenant_id, mut order) = open(OrderType::DineIn { table: "T4".into() });
        assert!(order.handle(&simple(tenant_id, &order, kitchen)).is_err());
        add(&mut order, tenant_id, "Mee goreng", 2, 850);
        assert!(order.handle(&simple(tenant_id, &order, served)).is_err());
        let cmd = simple(tenant_id, &order, kitchen);
        execute(&mut order, &cmd).unwrap();
        let cmd = simple(tenant_id, &order, served);
        execute(&mut order, &cmd).unwrap();
        assert_eq!(order.status(), PosOrderStatus::Served);
    }

    #[test]
    fn zero_quantity_removes_item() {
        let (tenant_id, mut order) = open(OrderType::Takeaway);
        let item_id = add(&mut order, tenant_id, "Roti canai", 2, 150);
        let order_id = order.id_typed();
        let events = execute(
            &mut order,
            &PosOrderCommand::ChangeItemQuantity {
                tenant_id,
                order_id,
                item_id,
                quantity: 0,
                occurred_at: Utc::now(),
            },
        )
        .unwrap();
        assert!(matches!(events[0], PosOrderEvent::ItemRemoved { .. }));
        assert!(order.items().is_empty());
    }

    #[test]
    fn complete_totals_items_and_locks_order() {
        let (tenant_id, mut order) = open(OrderType::Delivery);
        add(&mut order, tenant_id, "Nasi lemak", 2, 650);
        add(&mut order, tenant_id, "Kopi O", 1, 230);
        let receipt_id = ReceiptId::generate();
        let order_id = order.id_typed();
        let events = execute(
            &mut order,
            &PosOrderCommand::CompleteOrder {
                tenant_id,
                order_id,
                receipt_id,
                payment_method: PaymentMethod::Cash,
                amount_tendered: Some(Money::from_sen(2_000)),
                occurred_at: Utc::now(),
            },
        )
        .unwrap();
        match &events[0] {
            PosOrderEvent::Completed { totals, .. } => assert_eq!(totals.total, Money::from_sen(1_530)),
            other => panic!("unexpected {other:?}"),
        }
        assert_eq!(order.receipt_id(), Some(receipt_id));
        assert_eq!(order.lines().len(), 2);

        let err = order
            .handle(&PosOrderCommand::CancelOrder {
                tenant_id,
                order_id: order.id_typed(),
                reason: None,
                occurred_at: Utc::now(),
            })
            .unwrap_err();
        assert!(matches!(err, DomainError::InvariantViolation(_)));
    }

    #[test]
    fn short_cash_tender_blocks_completion() {
        let (tenant_id, mut order) = open(OrderType::Takeaway);
        add(&mut order, tenant_id, "Teh ais", 1, 320);
        let err = order
            .handle(&PosOrderCommand::CompleteOrder {
                tenant_id,
                order_id: order.id_typed(),
                receipt_id: ReceiptId::generate(),
                payment_method: PaymentMethod::Cash,
                amount_tendered: Some(Money::from_sen(300)),
                occurred_at: Utc::now(),
            })
            .unwrap_err();
        assert!(matches!(err, DomainError::Validation(_)));
    }
}
