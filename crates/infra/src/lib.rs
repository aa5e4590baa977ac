//! Infrastructure for the Kedai backend: event storage, command dispatch,
//! read models, workflows over several aggregates, dashboard aggregation,
//! CSV export and configuration.

pub mod cache;
pub mod command_dispatcher;
pub mod config;
pub mod dashboard;
pub mod event_store;
pub mod export;
pub mod projections;
pub mod read_model;
pub mod retry;
pub mod streams;
pub mod workers;
pub mod workflows;

pub use command_dispatcher::{CommandDispatcher, DispatchError};
pub use retry::{RetryPolicy, retry_on_conflict};
pub use streams::StreamAggregate;

#[cfg(test)]
mod integration_tests;
