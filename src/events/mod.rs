use async_trait::async_trait;
use chrono::{DateTime, Utc};
use metrics::counter;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, error, info};

use crate::entities::document_line_item::DocumentKind;
use crate::entities::invoice::InvoiceStatus;

#[derive(Debug, Clone)]
pub struct EventSender {
    sender: mpsc::Sender<Event>,
}

impl EventSender {
    /// Creates a new EventSender
    pub fn new(sender: mpsc::Sender<Event>) -> Self {
        Self { sender }
    }

    /// Creates a sender together with its bounded receiving end
    pub fn channel(capacity: usize) -> (Self, mpsc::Receiver<Event>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (Self::new(tx), rx)
    }

    /// Sends an event asynchronously
    pub async fn send(&self, event: Event) -> Result<(), String> {
        self.sender
            .send(event)
            .await
            .map_err(|e| format!("Failed to send event: {}", e))
    }
}

/// Domain events emitted after a business operation commits.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Event {
    // Sales document events
    DocumentCreated {
        kind: DocumentKind,
        id: i32,
        number: Option<String>,
    },
    DocumentStatusChanged {
        kind: DocumentKind,
        id: i32,
        old_status: String,
        new_status: String,
    },
    DocumentTotalsRecalculated {
        kind: DocumentKind,
        id: i32,
        total_amount: Decimal,
    },
    QuoteConverted {
        quote_id: i32,
        sales_order_id: i32,
    },
    InvoiceCreatedFromSalesOrder {
        sales_order_id: i32,
        invoice_id: i32,
    },

    // Payment events
    PaymentRecorded {
        invoice_id: i32,
        payment_id: i32,
        amount: Decimal,
        payment_method: String,
    },
    PaymentFailed {
        invoice_id: i32,
        payment_method: String,
        transaction_id: Option<String>,
    },
    InvoiceStatusChanged {
        invoice_id: i32,
        old_status: InvoiceStatus,
        new_status: InvoiceStatus,
    },
    PaymentSettingsUpdated {
        company_id: i32,
        keys: Vec<String>,
    },

    // CRM events
    LeadConverted {
        lead_id: i32,
        account_id: i32,
        contact_id: i32,
        opportunity_id: Option<i32>,
    },

    // Project events
    ProjectProgressUpdated {
        project_id: i32,
        progress: i32,
    },

    // Plan events
    PlanAssigned {
        company_id: i32,
        plan_id: i32,
        expires_at: Option<DateTime<Utc>>,
    },

    Generic {
        message: String,
        timestamp: DateTime<Utc>,
        metadata: serde_json::Value,
    },
}

impl Event {
    /// Create a generic event with string data
    pub fn with_data(data: String) -> Self {
        Event::Generic {
            message: data,
            timestamp: Utc::now(),
            metadata: serde_json::Value::Null,
        }
    }

    /// Stable snake_case name, used as the metrics label.
    pub fn name(&self) -> &'static str {
        match self {
            Event::DocumentCreated { .. } => "document_created",
            Event::DocumentStatusChanged { .. } => "document_status_changed",
            Event::DocumentTotalsRecalculated { .. } => "document_totals_recalculated",
            Event::QuoteConverted { .. } => "quote_converted",
            Event::InvoiceCreatedFromSalesOrder { .. } => "invoice_created_from_sales_order",
            Event::PaymentRecorded { .. } => "payment_recorded",
            Event::PaymentFailed { .. } => "payment_failed",
            Event::InvoiceStatusChanged { .. } => "invoice_status_changed",
            Event::PaymentSettingsUpdated { .. } => "payment_settings_updated",
            Event::LeadConverted { .. } => "lead_converted",
            Event::ProjectProgressUpdated { .. } => "project_progress_updated",
            Event::PlanAssigned { .. } => "plan_assigned",
            Event::Generic { .. } => "generic",
        }
    }
}

// Handlers implementing this trait process events asynchronously.
#[async_trait]
pub trait EventHandler: Send + Sync {
    async fn handle_event(&self, event: Event) -> Result<(), String>;
}

/// Drains the channel, logging every event.
pub async fn process_events(rx: mpsc::Receiver<Event>) {
    process_events_with_handlers(rx, Vec::new()).await
}

/// Drains the channel and hands each event to every registered handler.
/// A failing handler is logged and does not stop the loop.
pub async fn process_events_with_handlers(
    mut rx: mpsc::Receiver<Event>,
    handlers: Vec<Arc<dyn EventHandler>>,
) {
    info!("Starting event processing loop");

    while let Some(event) = rx.recv().await {
        let name = event.name();
        counter!("tenantdesk_events_processed_total", 1, "event" => name);

        match &event {
            Event::PaymentRecorded {
                invoice_id,
                payment_id,
                amount,
                payment_method,
            } => info!(
                invoice_id,
                payment_id,
                amount = %amount,
                payment_method = %payment_method,
                "Payment recorded"
            ),
            Event::InvoiceStatusChanged {
                invoice_id,
                old_status,
                new_status,
            } => info!(
                invoice_id,
                old_status = %old_status,
                new_status = %new_status,
                "Invoice status changed"
            ),
            Event::PaymentFailed {
                invoice_id,
                payment_method,
                ..
            } => info!(invoice_id, payment_method = %payment_method, "Payment failed"),
            other => debug!(event = ?other, "Received event"),
        }

        for handler in &handlers {
            if let Err(e) = handler.handle_event(event.clone()).await {
                error!(event = name, error = %e, "Event handler failed");
            }
        }
    }

    info!("Event channel closed; stopping event processing");
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    struct Recorder(Mutex<Vec<&'static str>>);

    #[async_trait]
    impl EventHandler for Recorder {
        async fn handle_event(&self, event: Event) -> Result<(), String> {
            self.0.lock().unwrap().push(event.name());
            Ok(())
        }
    }

    struct Failing;

    #[async_trait]
    impl EventHandler for Failing {
        async fn handle_event(&self, _event: Event) -> Result<(), String> {
            Err("nope".into())
        }
    }

    #[tokio::test]
    async fn handlers_see_every_event_even_after_a_failure() {
        let (sender, rx) = EventSender::channel(8);
        let recorder = Arc::new(Recorder(Mutex::new(Vec::new())));

        sender
            .send(Event::QuoteConverted {
                quote_id: 1,
                sales_order_id: 2,
            })
            .await
            .unwrap();
        sender
            .send(Event::ProjectProgressUpdated {
                project_id: 1,
                progress: 50,
            })
            .await
            .unwrap();
        drop(sender);

        process_events_with_handlers(rx, vec![Arc::new(Failing), recorder.clone()]).await;

        assert_eq!(
            *recorder.0.lock().unwrap(),
            vec!["quote_converted", "project_progress_updated"]
        );
    }

    #[tokio::test]
    async fn send_fails_once_receiver_is_gone() {
        let (sender, rx) = EventSender::channel(1);
        drop(rx);
        assert!(sender.send(Event::with_data("x".into())).await.is_err());
    }
}
