use chrono::{DateTime, Utc};

/// A fact recorded in an aggregate stream.
///
/// Events are immutable once appended. `event_type` is the stable name used
/// in storage and on the wire (`"invoicing.invoice.sent"`), `version` is its
/// schema revision.
pub trait Event: Clone + core::fmt::Debug + Send + Sync + 'static {
    fn event_type(&self) -> &'static str;

    fn version(&self) -> u32;

    /// Business time of the fact, not the append time.
    fn occurred_at(&self) -> DateTime<Utc>;
}
