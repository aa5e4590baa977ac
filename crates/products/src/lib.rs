//! Products domain module (event-sourced).
//!
//! Catalog entries with their selling price, cost, SST rate and (optionally)
//! on-hand stock. Stock lives on the product itself; untracked products
//! (services, made-to-order food) never carry a quantity.

pub mod product;

pub use product::{
    ActivateProduct, AdjustStock, ArchiveProduct, CreateProduct, Product, ProductActivated,
    ProductArchived, ProductCommand, ProductCreated, ProductDetails, ProductEvent, ProductId,
    ProductPatch, ProductStatus, ProductUpdated, StockAdjusted, StockReason, UpdateProduct,
};
