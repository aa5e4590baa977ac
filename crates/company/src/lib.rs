//! Company (tenant) profile domain module (event-sourced).
//!
//! One `Company` stream exists per tenant. It holds the legal identity used
//! on invoices and e-invoices, the document numbering counters, and the
//! subscription state mirrored from Stripe.

pub mod company;

pub use company::{
    ChangeSubscription, Company, CompanyCommand, CompanyEvent, CompanyProfile, DocumentKind,
    DocumentPrefixes, ProfilePatch, RegisterCompany, ReserveDocumentNumber, Subscription,
    SubscriptionStatus, UpdateCompanyProfile, company_stream_id,
};
