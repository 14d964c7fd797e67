use std::sync::Arc;

use tracing::warn;

use crate::events::{Event, EventSender};

// Sales documents
pub mod documents;
pub mod fulfillment;
pub mod purchase_orders;
pub mod quotes;
pub mod sales_orders;

// Financial services
pub mod invoicing;
pub mod payment_settings;
pub mod payments;

// Customer management
pub mod crm;

// Projects
pub mod projects;

// Tenancy and subscription plans
pub mod plans;

/// Default page size for list operations.
pub const DEFAULT_PAGE_SIZE: u64 = 50;

/// Sends `event` if a channel is attached. Delivery is best-effort: a closed
/// or full channel is logged and never fails the committed operation.
pub(crate) async fn publish(sender: &Option<Arc<EventSender>>, event: Event) {
    if let Some(sender) = sender {
        let name = event.name();
        if let Err(e) = sender.send(event).await {
            warn!(event = name, error = %e, "Failed to publish event");
        }
    }
}

/// Page numbers are 1-based; anything below 1 is treated as the first page.
pub(crate) fn page_index(page: u64) -> u64 {
    page.saturating_sub(1)
}

/// A zero page size means "use the default".
pub(crate) fn page_size(limit: u64) -> u64 {
    if limit == 0 {
        DEFAULT_PAGE_SIZE
    } else {
        limit
    }
}
