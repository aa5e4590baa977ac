//! Customers domain module (event-sourced).
//!
//! Buyers that invoices and receipts are issued to, with the tax identity
//! needed for e-invoicing and a WhatsApp deep-link helper.

pub mod customer;
pub mod whatsapp;

pub use customer::{
    ArchiveCustomer, ContactInfo, Customer, CustomerCommand, CustomerDetails, CustomerEvent, CustomerId,
    CustomerPatch, CustomerStatus, IdType, RegisterCustomer, RestoreCustomer, TaxIdentity,
    UpdateCustomer,
};
pub use whatsapp::whatsapp_link;
