//! Tenantdesk core library
//!
//! Multi-tenant business records: sequentially numbered sales documents,
//! line-item totals, invoice payment reconciliation, encrypted payment
//! gateway settings, and the CRM, project and plan data they hang off.
#![forbid(unsafe_code)]
#![deny(rust_2018_idioms)]
#![allow(elided_lifetimes_in_paths)]
#![warn(clippy::all, clippy::perf, clippy::dbg_macro)]

// Pure domain logic
pub mod numbering;
pub mod plan_limits;
pub mod progress;
pub mod reconciliation;
pub mod totals;

// Infrastructure
pub mod commands;
pub mod config;
pub mod crypto;
pub mod db;
pub mod entities;
pub mod errors;
pub mod events;
pub mod migrator;
pub mod services;

use std::sync::Arc;

use crate::{
    config::AppConfig,
    crypto::SettingsCipher,
    db::DbPool,
    errors::ServiceError,
    events::EventSender,
    services::{
        crm::CrmService, documents::DocumentService, fulfillment::FulfillmentService,
        invoicing::InvoiceService, payment_settings::PaymentSettingsService,
        payments::PaymentService, plans::PlanService, projects::ProjectService,
        purchase_orders::PurchaseOrderService, quotes::QuoteService,
        sales_orders::SalesOrderService,
    },
};

/// Every service wired to one pool, one event channel and one configuration.
#[derive(Clone)]
pub struct AppServices {
    pub documents: DocumentService,
    pub quotes: QuoteService,
    pub sales_orders: SalesOrderService,
    pub purchase_orders: PurchaseOrderService,
    pub fulfillment: FulfillmentService,
    pub invoices: InvoiceService,
    pub payments: PaymentService,
    pub payment_settings: PaymentSettingsService,
    pub crm: CrmService,
    pub projects: ProjectService,
    pub plans: PlanService,
}

impl AppServices {
    /// Builds the container. Fails only when the settings cipher cannot be
    /// derived from the configured key.
    pub fn new(
        config: &AppConfig,
        db_pool: Arc<DbPool>,
        event_sender: Option<Arc<EventSender>>,
    ) -> Result<Self, ServiceError> {
        let cipher = Arc::new(SettingsCipher::from_secret(&config.settings_encryption_key)?);
        let numbering = config.numbering.clone();
        let documents = DocumentService::new(
            db_pool.clone(),
            event_sender.clone(),
            numbering.max_attempts,
        );

        Ok(Self {
            quotes: QuoteService::new(documents.clone(), numbering.clone()),
            sales_orders: SalesOrderService::new(documents.clone(), numbering.clone()),
            purchase_orders: PurchaseOrderService::new(documents.clone(), numbering.clone()),
            fulfillment: FulfillmentService::new(documents.clone(), numbering.clone()),
            invoices: InvoiceService::new(documents.clone(), numbering),
            payments: PaymentService::new(db_pool.clone(), event_sender.clone()),
            payment_settings: PaymentSettingsService::new(
                db_pool.clone(),
                cipher,
                event_sender.clone(),
            ),
            crm: CrmService::new(db_pool.clone(), documents.clone(), event_sender.clone()),
            projects: ProjectService::new(db_pool.clone(), event_sender.clone()),
            plans: PlanService::new(db_pool, event_sender, config.default_currency.clone()),
            documents,
        })
    }
}

pub mod prelude {
    pub use crate::config::{AppConfig, NumberingConfig};
    pub use crate::db::DbPool;
    pub use crate::entities::{DiscountType, DocumentKind};
    pub use crate::errors::ServiceError;
    pub use crate::events::{Event, EventSender};
    pub use crate::reconciliation::{PaymentType, PaymentValidation};
    pub use crate::services::documents::LineItemInput;
    pub use crate::AppServices;
}
