//! Sales domain module (event-sourced).
//!
//! Over-the-counter sales: receipts (with Malaysian cash rounding) and POS
//! orders for dine-in, takeaway and delivery.

pub mod pos_order;
pub mod receipt;

pub use pos_order::{
    OrderItem, OrderItemId, OrderType, PosOrder, PosOrderCommand, PosOrderEvent, PosOrderId,
    PosOrderStatus, order_lines,
};
pub use receipt::{
    IssueReceipt, Receipt, ReceiptCommand, ReceiptEvent, ReceiptId, ReceiptStatus, Settlement,
    VoidReceipt, settle,
};
