use async_trait::async_trait;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{info, instrument};
use validator::Validate;

use crate::{
    commands::Command,
    db::DbPool,
    errors::ServiceError,
    events::EventSender,
    reconciliation::PaymentType,
    services::payments::{NewPayment, PaymentService, RecordedPayment},
};

#[derive(Debug, Serialize, Deserialize, Validate)]
pub struct RecordInvoicePaymentCommand {
    pub invoice_id: i32,
    pub amount: Decimal,
    pub payment_type: Option<PaymentType>,
    #[validate(length(min = 1, max = 64))]
    pub payment_method: String,
    #[validate(length(min = 1, max = 191))]
    pub transaction_id: Option<String>,
    #[validate(length(max = 2000))]
    pub notes: Option<String>,
    pub created_by: Option<i32>,
}

#[async_trait]
impl Command for RecordInvoicePaymentCommand {
    type Result = RecordedPayment;

    #[instrument(skip(self, db_pool, event_sender), fields(invoice_id = self.invoice_id))]
    async fn execute(
        &self,
        db_pool: Arc<DbPool>,
        event_sender: Arc<EventSender>,
    ) -> Result<Self::Result, ServiceError> {
        self.validate()
            .map_err(|e| ServiceError::ValidationError(e.to_string()))?;

        let service = PaymentService::new(db_pool, Some(event_sender));
        let recorded = service
            .store_payment(NewPayment {
                invoice_id: self.invoice_id,
                amount: self.amount,
                payment_type: self.payment_type,
                payment_method: self.payment_method.clone(),
                transaction_id: self.transaction_id.clone(),
                notes: self.notes.clone(),
                created_by: self.created_by,
            })
            .await?;

        info!(
            payment_id = recorded.payment.id,
            remaining = %recorded.summary.remaining,
            duplicate = recorded.duplicate,
            "Invoice payment recorded"
        );
        Ok(recorded)
    }
}
