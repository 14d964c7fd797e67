//! sea-orm entities.
//!
//! Every business table is scoped by `company_id`. Sales document headers
//! (quotes, orders, invoices and the fulfilment documents) share the same
//! totals columns so the documents service can treat them uniformly; their
//! product lines live in one polymorphic `document_line_items` table keyed by
//! [`document_line_item::DocumentKind`].

pub mod account;
pub mod company;
pub mod contact;
pub mod delivery_order;
pub mod document_line_item;
pub mod invoice;
pub mod invoice_payment;
pub mod lead;
pub mod opportunity;
pub mod payment_setting;
pub mod plan;
pub mod product;
pub mod project;
pub mod project_task;
pub mod purchase_order;
pub mod quote;
pub mod receipt_order;
pub mod return_order;
pub mod sales_order;
pub mod tax;
pub mod user;

pub use document_line_item::{DiscountType, DocumentKind};
