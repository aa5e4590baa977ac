use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use kedai_core::validate::{optional, required};
use kedai_core::{Aggregate, AggregateRoot, BasisPoints, DomainError, Money, TenantId};
use kedai_events::Event;

kedai_core::typed_id!(ProductId, "ProductId");

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProductStatus {
    Active,
    Archived,
}

/// Why on-hand stock moved.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StockReason {
    Sale,
    SaleReversal,
    Restock,
    Correction,
}

/// Catalog data of a product.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProductDetails {
    pub sku: String,
    pub name: String,
    pub description: Option<String>,
    /// Unit of measure shown on documents ("pcs", "kg", "hour").
    pub unit: String,
    pub unit_price: Money,
    /// Purchase cost per unit; drives cost of goods sold.
    pub cost_price: Money,
    pub tax_rate: BasisPoints,
    /// MyInvois product classification code (3 digits).
    pub classification_code: Option<String>,
    pub low_stock_threshold: i64,
}

impl ProductDetails {
    fn validated(&self) -> Result<Self, DomainError> {
        let sku = required("sku", &self.sku)?;
        if sku.len() > 50
            || !sku
                .bytes()
                .all(|b| b.is_ascii_alphanumeric() || b == b'-' || b == b'_')
        {
            return Err(DomainError::validation(
                "sku must be 1-50 letters, digits, '-' or '_'",
            ));
        }
        let name = required("name", &self.name)?;
        if name.chars().count() > 200 {
            return Err(DomainError::validation("name cannot exceed 200 characters"));
        }
        if self.unit_price.is_negative() {
            return Err(DomainError::validation("unit_price cannot be negative"));
        }
        if self.cost_price.is_negative() {
            return Err(DomainError::validation("cost_price cannot be negative"));
        }
        let classification_code = optional(self.classification_code.as_deref());
        if let Some(code) = &classification_code {
            if code.len() != 3 || !code.bytes().all(|b| b.is_ascii_digit()) {
                return Err(DomainError::validation("classification_code must be 3 digits"));
            }
        }
        if self.low_stock_threshold < 0 {
            return Err(DomainError::validation("low_stock_threshold cannot be negative"));
        }
        let unit = optional(Some(&self.unit)).unwrap_or_else(|| "pcs".to_string());

        Ok(Self {
            sku: sku.to_ascii_uppercase(),
            name,
            description: optional(self.description.as_deref()),
            unit,
            unit_price: self.unit_price,
            cost_price: self.cost_price,
            tax_rate: self.tax_rate.validate_percent("tax_rate")?,
            classification_code,
            low_stock_threshold: self.low_stock_threshold,
        })
    }
}

/// Aggregate root: Product.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Product {
    id: ProductId,
    tenant_id: Option<TenantId>,
    details: Option<ProductDetails>,
    track_stock: bool,
    stock: i64,
    status: ProductStatus,
    version: u64,
    created: bool,
}

impl Product {
    pub fn empty(id: ProductId) -> Self {
        Self {
            id,
            tenant_id: None,
            details: None,
            track_stock: false,
            stock: 0,
            status: ProductStatus::Active,
            version: 0,
            created: false,
        }
    }

    pub fn id_typed(&self) -> ProductId {
        self.id
    }

    pub fn tenant_id(&self) -> Option<TenantId> {
        self.tenant_id
    }

    pub fn details(&self) -> Option<&ProductDetails> {
        self.details.as_ref()
    }

    pub fn name(&self) -> &str {
        self.details.as_ref().map(|d| d.name.as_str()).unwrap_or("")
    }

    pub fn cost_price(&self) -> Money {
        self.details.as_ref().map(|d| d.cost_price).unwrap_or_default()
    }

    pub fn tracks_stock(&self) -> bool {
        self.track_stock
    }

    pub fn stock(&self) -> i64 {
        self.stock
    }

    pub fn status(&self) -> ProductStatus {
        self.status
    }

    pub fn exists(&self) -> bool {
        self.created
    }

    pub fn can_be_sold(&self) -> bool {
        self.created && self.status == ProductStatus::Active
    }

    /// Enough stock for `quantity` units (always true when untracked).
    pub fn can_fulfil(&self, quantity: i64) -> bool {
        !self.track_stock || self.stock >= quantity
    }

    pub fn is_low_stock(&self) -> bool {
        match &self.details {
            Some(d) => self.track_stock && self.stock <= d.low_stock_threshold,
            None => false,
        }
    }
}

impl AggregateRoot for Product {
    type Id = ProductId;

    fn id(&self) -> &Self::Id {
        &self.id
    }

    fn version(&self) -> u64 {
        self.version
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreateProduct {
    pub tenant_id: TenantId,
    pub product_id: ProductId,
    pub details: ProductDetails,
    pub track_stock: bool,
    pub initial_stock: i64,
    pub occurred_at: DateTime<Utc>,
}

/// Fields left `None` keep their current value.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProductPatch {
    pub sku: Option<String>,
    pub name: Option<String>,
    pub description: Option<String>,
    pub unit: Option<String>,
    pub unit_price: Option<Money>,
    pub cost_price: Option<Money>,
    pub tax_rate: Option<BasisPoints>,
    pub classification_code: Option<String>,
    pub low_stock_threshold: Option<i64>,
    pub track_stock: Option<bool>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpdateProduct {
    pub tenant_id: TenantId,
    pub product_id: ProductId,
    pub patch: ProductPatch,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AdjustStock {
    pub tenant_id: TenantId,
    pub product_id: ProductId,
    pub delta: i64,
    pub reason: StockReason,
    /// Source document number (invoice, receipt) or free text.
    pub reference: Option<String>,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActivateProduct {
    pub tenant_id: TenantId,
    pub product_id: ProductId,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArchiveProduct {
    pub tenant_id: TenantId,
    pub product_id: ProductId,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ProductCommand {
    CreateProduct(CreateProduct),
    UpdateProduct(UpdateProduct),
    AdjustStock(AdjustStock),
    ActivateProduct(ActivateProduct),
    ArchiveProduct(ArchiveProduct),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProductCreated {
    pub tenant_id: TenantId,
    pub product_id: ProductId,
    pub details: ProductDetails,
    pub track_stock: bool,
    pub initial_stock: i64,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProductUpdated {
    pub tenant_id: TenantId,
    pub product_id: ProductId,
    pub details: ProductDetails,
    pub track_stock: bool,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StockAdjusted {
    pub tenant_id: TenantId,
    pub product_id: ProductId,
    pub delta: i64,
    pub new_stock: i64,
    pub reason: StockReason,
    pub reference: Option<String>,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProductActivated {
    pub tenant_id: TenantId,
    pub product_id: ProductId,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProductArchived {
    pub tenant_id: TenantId,
    pub product_id: ProductId,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ProductEvent {
    ProductCreated(ProductCreated),
    ProductUpdated(ProductUpdated),
    StockAdjusted(StockAdjusted),
    ProductActivated(ProductActivated),
    ProductArchived(ProductArchived),
}

impl ProductEvent {
    pub fn tenant_id(&self) -> TenantId {
        match self {
            ProductEvent::ProductCreated(e) => e.tenant_id,
            ProductEvent::ProductUpdated(e) => e.tenant_id,
            ProductEvent::StockAdjusted(e) => e.tenant_id,
            ProductEvent::ProductActivated(e) => e.tenant_id,
            ProductEvent::ProductArchived(e) => e.tenant_id,
        }
    }

    pub fn product_id(&self) -> ProductId {
        match self {
            ProductEvent::ProductCreated(e) => e.product_id,
            ProductEvent::ProductUpdated(e) => e.product_id,
            ProductEvent::StockAdjusted(e) => e.product_id,
            ProductEvent::ProductActivated(e) => e.product_id,
            ProductEvent::ProductArchived(e) => e.product_id,
        }
    }
}

impl Event for ProductEvent {
    fn event_type(&self) -> &'static str {
        match self {
            ProductEvent::ProductCreated(_) => "products.product.created",
            ProductEvent::ProductUpdated(_) => "products.product.updated",
            ProductEvent::StockAdjusted(_) => "products.product.stock_adjusted",
            ProductEvent::ProductActivated(_) => "products.product.activated",
            ProductEvent::ProductArchived(_) => "products.product.archived",
        }
    }

    fn version(&self) -> u32 {
        1
    }

    fn occurred_at(&self) -> DateTime<Utc> {
        match self {
            ProductEvent::ProductCreated(e) => e.occurred_at,
            ProductEvent::ProductUpdated(e) => e.occurred_at,
            ProductEvent::StockAdjusted(e) => e.occurred_at,
            ProductEvent::ProductActivated(e) => e.occurred_at,
            ProductEvent::ProductArchived(e) => e.occurred_at,
        }
    }
}

impl Aggregate for Product {
    type Command = ProductCommand;
    type Event = ProductEvent;
    type Error = DomainError;

    fn apply(&mut self, event: &Self::Event) {
        match event {
            ProductEvent::ProductCreated(e) => {
                self.id = e.product_id;
                self.tenant_id = Some(e.tenant_id);
                self.details = Some(e.details.clone());
                self.track_stock = e.track_stock;
                self.stock = e.initial_stock;
                self.status = ProductStatus::Active;
                self.created = true;
            }
            ProductEvent::ProductUpdated(e) => {
                self.details = Some(e.details.clone());
                self.track_stock = e.track_stock;
            }
            ProductEvent::StockAdjusted(e) => self.stock = e.new_stock,
            ProductEvent::ProductActivated(_) => self.status = ProductStatus::Active,
            ProductEvent::ProductArchived(_) => self.status = ProductStatus::Archived,
        }
        self.version += 1;
    }

    fn handle(&self, command: &Self::Command) -> Result<Vec<Self::Event>, Self::Error> {
        match command {
            ProductCommand::CreateProduct(cmd) => self.handle_create(cmd),
            ProductCommand::UpdateProduct(cmd) => self.handle_update(cmd),
            ProductCommand::AdjustStock(cmd) => self.handle_adjust(cmd),
            ProductCommand::ActivateProduct(cmd) => self.handle_activate(cmd),
            ProductCommand::ArchiveProduct(cmd) => self.handle_archive(cmd),
        }
    }
}

impl Product {
    fn ensure_existing(&self, tenant_id: TenantId, product_id: ProductId) -> Result<&ProductDetails, DomainError> {
        let Some(details) = self.details.as_ref().filter(|_| self.created) else {
            return Err(DomainError::not_found());
        };
        if self.tenant_id != Some(tenant_id) {
            return Err(DomainError::invariant("tenant mismatch"));
        }
        if self.id != product_id {
            return Err(DomainError::invariant("product_id mismatch"));
        }
        Ok(details)
    }

    fn handle_create(&self, cmd: &CreateProduct) -> Result<Vec<ProductEvent>, DomainError> {
        if self.created {
            return Err(DomainError::conflict("product already exists"));
        }
        let details = cmd.details.validated()?;
        if cmd.initial_stock < 0 {
            return Err(DomainError::validation("initial_stock cannot be negative"));
        }
        if !cmd.track_stock && cmd.initial_stock != 0 {
            return Err(DomainError::validation(
                "initial_stock requires stock tracking",
            ));
        }

        Ok(vec![ProductEvent::ProductCreated(ProductCreated {
            tenant_id: cmd.tenant_id,
            product_id: cmd.product_id,
            details,
            track_stock: cmd.track_stock,
            initial_stock: cmd.initial_stock,
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_update(&self, cmd: &UpdateProduct) -> Result<Vec<ProductEvent>, DomainError> {
        let current = self.ensure_existing(cmd.tenant_id, cmd.product_id)?;
        let p = &cmd.patch;

        let details = ProductDetails {
            sku: p.sku.clone().unwrap_or_else(|| current.sku.clone()),
            name: p.name.clone().unwrap_or_else(|| current.name.clone()),
            description: match &p.description {
                Some(d) => Some(d.clone()),
                None => current.description.clone(),
            },
            unit: p.unit.clone().unwrap_or_else(|| current.unit.clone()),
            unit_price: p.unit_price.unwrap_or(current.unit_price),
            cost_price: p.cost_price.unwrap_or(current.cost_price),
            tax_rate: p.tax_rate.unwrap_or(current.tax_rate),
            classification_code: match &p.classification_code {
                Some(c) => Some(c.clone()),
                None => current.classification_code.clone(),
            },
            low_stock_threshold: p.low_stock_threshold.unwrap_or(current.low_stock_threshold),
        }
        .validated()?;

        let track_stock = p.track_stock.unwrap_or(self.track_stock);
        if self.track_stock && !track_stock && self.stock != 0 {
            return Err(DomainError::invariant(
                "cannot stop tracking stock while units are on hand",
            ));
        }

        if &details == current && track_stock == self.track_stock {
            return Ok(vec![]);
        }

        Ok(vec![ProductEvent::ProductUpdated(ProductUpdated {
            tenant_id: cmd.tenant_id,
            product_id: cmd.product_id,
            details,
            track_stock,
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_adjust(&self, cmd: &AdjustStock) -> Result<Vec<ProductEvent>, DomainError> {
        self.ensure_existing(cmd.tenant_id, cmd.product_id)?;
        if !self.track_stock {
            return Err(DomainError::invariant(format!(
                "product {} does not track stock",
                self.name()
            )));
        }
        if cmd.delta == 0 {
            return Err(DomainError::validation("stock adjustment cannot be zero"));
        }

        let new_stock = self
            .stock
            .checked_add(cmd.delta)
            .ok_or_else(|| DomainError::invariant("stock overflow"))?;
        if new_stock < 0 {
            return Err(DomainError::invariant(format!(
                "insufficient stock for {} (on hand {}, requested {})",
                self.name(),
                self.stock,
                -cmd.delta
            )));
        }

        Ok(vec![ProductEvent::StockAdjusted(StockAdjusted {
            tenant_id: cmd.tenant_id,
            product_id: cmd.product_id,
            delta: cmd.delta,
            new_stock,
            reason: cmd.reason,
            reference: cmd.reference.clone(),
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_activate(&self, cmd: &ActivateProduct) -> Result<Vec<ProductEvent>, DomainError> {
        self.ensure_existing(cmd.tenant_id, cmd.product_id)?;
        if self.status == ProductStatus::Active {
            return Err(DomainError::conflict("product is already active"));
        }
        Ok(vec![ProductEvent::ProductActivated(ProductActivated {
            tenant_id: cmd.tenant_id,
            product_id: cmd.product_id,
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_archive(&self, cmd: &ArchiveProduct) -> Result<Vec<ProductEvent>, DomainError> {
        self.ensure_existing(cmd.tenant_id, cmd.product_id)?;
        if self.status == ProductStatus::Archived {
            return Err(DomainError::conflict("product is already archived"));
        }
        Ok(vec![ProductEvent::ProductArchived(ProductArchived {
            tenant_id: cmd.tenant_id,
            product_id: cmd.product_id,
            occurred_at: cmd.occurred_at,
        })])
    }
}
