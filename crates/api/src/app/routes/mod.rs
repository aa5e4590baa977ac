use axum::{Router, routing::get};

pub mod audit;
pub mod auth;
pub mod billing;
pub mod common;
pub mod company;
pub mod customers;
pub mod dashboard;
pub mod einvoice;
pub mod invoices;
pub mod ledger;
pub mod pos;
pub mod products;
pub mod receipts;
pub mod system;
pub mod users;

/// Router for all authenticated (tenant-scoped) endpoints.
pub fn router() -> Router {
    Router::new()
        .route("/whoami", get(system::whoami))
        .route("/stream", get(system::stream))
        .route("/billing/subscription", get(billing::subscription))
        .nest("/company", company::router())
        .nest("/users", users::router())
        .nest("/customers", customers::router())
        .nest("/products", products::router())
        .nest("/invoices", invoices::router())
        .nest("/receipts", receipts::router())
        .nest("/pos/orders", pos::router())
        .nest("/accounts", ledger::accounts_router())
        .nest("/ledger", ledger::router())
        .nest("/dashboard", dashboard::router())
        .nest("/einvoice", einvoice::router())
        .nest("/audit", audit::router())
}
