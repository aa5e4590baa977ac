//! HTTP API for Kedai: session auth, tenant-scoped routes and the Stripe
//! webhook.

pub mod app;
pub mod authz;
pub mod context;
pub mod middleware;
pub mod stripe;
