//! Invoice payments and gateway callbacks.
//!
//! A completed payment is inserted and the invoice status reconciled in one
//! transaction. `(payment_method, transaction_id)` is unique, so a gateway
//! that delivers the same callback twice credits the invoice once.

use chrono::Utc;
use metrics::counter;
use rust_decimal::Decimal;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, ConnectionTrait, EntityTrait, IntoActiveModel, QueryFilter,
    Set, TransactionTrait,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use strum::{Display, EnumIter, EnumString};
use tracing::{info, instrument, warn};
use validator::Validate;

use crate::{
    db::DbPool,
    entities::invoice_payment::{self, PaymentStatus},
    errors::{is_unique_violation, ServiceError},
    events::{Event, EventSender},
    reconciliation::PaymentType,
    totals::round_money,
};

use super::documents::validate_positive;
use super::invoicing::{ledger_in, load_invoice, reconcile_in, PaymentSummary};
use super::publish;

/// Payment processors whose callbacks can be reconciled.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString, EnumIter,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case", ascii_case_insensitive)]
pub enum Gateway {
    Stripe,
    Paypal,
    Razorpay,
    Paystack,
    Flutterwave,
    Paytabs,
    Skrill,
    Coingate,
    Payfast,
    Tap,
    Xendit,
    Paytr,
    Mollie,
    Toyyibpay,
    Paymentwall,
    Sspay,
    Benefit,
    Iyzipay,
    Aamarpay,
    Midtrans,
    Yookassa,
    Nepalste,
    Cinetpay,
    Payhere,
    Fedapay,
    AuthorizeNet,
    Khalti,
    Easebuzz,
    Ozow,
    Cashfree,
    MercadoPago,
    Hitpay,
}

impl Gateway {
    /// Value stored in `invoice_payments.payment_method`.
    pub fn method_name(&self) -> String {
        self.to_string()
    }

    /// Vendors that report outcomes as numeric codes rather than words.
    fn numeric_status(&self, code: &str) -> Option<PaymentStatus> {
        let status = match (self, code) {
            (Gateway::Payhere, "2") => PaymentStatus::Completed,
            (Gateway::Payhere, "0") => PaymentStatus::Pending,
            (Gateway::Payhere, "-1" | "-2" | "-3") => PaymentStatus::Failed,
            (Gateway::Skrill, "2") => PaymentStatus::Completed,
            (Gateway::Skrill, "0") => PaymentStatus::Pending,
            (Gateway::Skrill, "-1" | "-2" | "-3") => PaymentStatus::Failed,
            (Gateway::Toyyibpay, "1") => PaymentStatus::Completed,
            (Gateway::Toyyibpay, "2") => PaymentStatus::Pending,
            (Gateway::Toyyibpay, "3") => PaymentStatus::Failed,
            (Gateway::AuthorizeNet, "1") => PaymentStatus::Completed,
            (Gateway::AuthorizeNet, "4") => PaymentStatus::Pending,
            (Gateway::AuthorizeNet, "2" | "3") => PaymentStatus::Failed,
            (Gateway::Cinetpay, "00") => PaymentStatus::Completed,
            (Gateway::Paymentwall, "0") => PaymentStatus::Completed,
            (Gateway::Paymentwall, "2") => PaymentStatus::Failed,
            _ => return None,
        };
        Some(status)
    }

    /// Maps a vendor status string onto a payment status. Unrecognised values
    /// are treated as pending so they never credit an invoice.
    pub fn normalize_status(&self, raw: &str) -> PaymentStatus {
        let code = raw.trim();
        if let Some(status) = self.numeric_status(code) {
            return status;
        }
        match code.to_ascii_lowercase().as_str() {
            "succeeded" | "success" | "successful" | "paid" | "complete" | "completed"
            | "captured" | "capture" | "settled" | "settlement" | "approved" | "accepted"
            | "charged" => PaymentStatus::Completed,
            "failed" | "failure" | "fail" | "declined" | "deny" | "denied" | "cancelled"
            | "canceled" | "cancel" | "usercancelled" | "expired" | "expire" | "error"
            | "rejected" | "refused" | "invalid" | "voided" | "abandoned" => PaymentStatus::Failed,
            _ => PaymentStatus::Pending,
        }
    }
}

/// A payment to apply to an invoice.
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct NewPayment {
    pub invoice_id: i32,
    #[validate(custom = "validate_positive")]
    pub amount: Decimal,
    /// Inferred from the remaining balance when omitted
    pub payment_type: Option<PaymentType>,
    #[validate(length(min = 1, max = 64))]
    pub payment_method: String,
    #[validate(length(min = 1, max = 191))]
    pub transaction_id: Option<String>,
    #[validate(length(max = 2000))]
    pub notes: Option<String>,
    pub created_by: Option<i32>,
}

/// Normalised gateway notification.
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct GatewayCallback {
    pub gateway: Gateway,
    pub invoice_id: i32,
    #[validate(custom = "validate_positive")]
    pub amount: Decimal,
    /// Vendor status string, passed through [`Gateway::normalize_status`]
    pub status: String,
    #[validate(length(min = 1, max = 191))]
    pub transaction_id: Option<String>,
}

impl GatewayCallback {
    pub fn normalized_status(&self) -> PaymentStatus {
        self.gateway.normalize_status(&self.status)
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct RecordedPayment {
    pub payment: invoice_payment::Model,
    pub summary: PaymentSummary,
    /// The transaction had already been recorded; nothing changed
    pub duplicate: bool,
}

async fn find_transaction<C: ConnectionTrait>(
    db: &C,
    payment_method: &str,
    transaction_id: Option<&str>,
) -> Result<Option<invoice_payment::Model>, ServiceError> {
    let Some(transaction_id) = transaction_id else {
        return Ok(None);
    };
    Ok(invoice_payment::Entity::find()
        .filter(invoice_payment::Column::PaymentMethod.eq(payment_method))
        .filter(invoice_payment::Column::TransactionId.eq(transaction_id))
        .one(db)
        .await?)
}

fn same_invoice(
    existing: &invoice_payment::Model,
    invoice_id: i32,
) -> Result<(), ServiceError> {
    if existing.invoice_id != invoice_id {
        return Err(ServiceError::Conflict(format!(
            "Transaction {} is already recorded against invoice {}",
            existing.transaction_id.as_deref().unwrap_or_default(),
            existing.invoice_id
        )));
    }
    Ok(())
}

#[derive(Clone)]
pub struct PaymentService {
    db_pool: Arc<DbPool>,
    event_sender: Option<Arc<EventSender>>,
}

impl PaymentService {
    pub fn new(db_pool: Arc<DbPool>, event_sender: Option<Arc<EventSender>>) -> Self {
        Self {
            db_pool,
            event_sender,
        }
    }

    /// Records a completed payment and reconciles the invoice.
    ///
    /// The amount is checked against the remaining balance; a rejected amount
    /// is reported as a validation error carrying the ledger's message.
    #[instrument(skip(self, input), fields(invoice_id = input.invoice_id, method = %input.payment_method))]
    pub async fn store_payment(&self, input: NewPayment) -> Result<RecordedPayment, ServiceError> {
        input.validate()?;
        let method = input.payment_method.trim().to_ascii_lowercase();
        let amount = round_money(input.amount);

        let txn = self.db_pool.begin().await?;
        let invoice = load_invoice(&txn, input.invoice_id).await?;

        let existing = find_transaction(&txn, &method, input.transaction_id.as_deref()).await?;
        if let Some(existing) = &existing {
            same_invoice(existing, invoice.id)?;
            if existing.status == PaymentStatus::Completed {
                let ledger = ledger_in(&txn, &invoice).await?;
                txn.commit().await?;
                info!(payment_id = existing.id, "Payment already recorded");
                return Ok(RecordedPayment {
                    payment: existing.clone(),
                    summary: PaymentSummary::from_parts(&invoice, &ledger),
                    duplicate: true,
                });
            }
        }

        if !invoice.status.accepts_payments() {
            return Err(ServiceError::InvalidStatus(format!(
                "Invoice {} is {} and does not accept payments",
                invoice.number, invoice.status
            )));
        }

        let ledger = ledger_in(&txn, &invoice).await?;
        let payment_type = input
            .payment_type
            .unwrap_or_else(|| ledger.infer_payment_type(amount));
        let verdict = ledger.validate_payment_amount(amount, payment_type);
        if !verdict.valid {
            counter!("tenantdesk_payments_rejected_total", 1, "method" => method.clone());
            return Err(ServiceError::ValidationError(
                verdict.message.unwrap_or_else(|| "Invalid payment amount".into()),
            ));
        }

        let now = Utc::now();
        let saved = match existing {
            // A pending or failed attempt for the same transaction completes in place.
            Some(attempt) => {
                let mut active = attempt.into_active_model();
                active.amount = Set(amount);
                active.payment_type = Set(payment_type.to_string());
                active.status = Set(PaymentStatus::Completed);
                active.paid_at = Set(Some(now));
                if input.notes.is_some() {
                    active.notes = Set(input.notes.clone());
                }
                active.update(&txn).await
            }
            None => {
                invoice_payment::ActiveModel {
                    company_id: Set(invoice.company_id),
                    invoice_id: Set(invoice.id),
                    amount: Set(amount),
                    payment_type: Set(payment_type.to_string()),
                    payment_method: Set(method.clone()),
                    transaction_id: Set(input.transaction_id.clone()),
                    status: Set(PaymentStatus::Completed),
                    notes: Set(input.notes.clone()),
                    paid_at: Set(Some(now)),
                    created_by: Set(input.created_by),
                    created_at: Set(now),
                    ..Default::default()
                }
                .insert(&txn)
                .await
            }
        };

        let payment = match saved {
            Ok(payment) => payment,
            Err(err) if is_unique_violation(&err) => {
                // Lost a race with a concurrent delivery of the same callback.
                txn.rollback().await?;
                return self.already_recorded(&method, &input).await;
            }
            Err(err) => return Err(err.into()),
        };

        let reconciled = reconcile_in(&txn, invoice.id).await?;
        txn.commit().await?;

        counter!("tenantdesk_payments_recorded_total", 1, "method" => method.clone());
        info!(
            payment_id = payment.id,
            amount = %amount,
            status = %reconciled.invoice.status,
            "Payment recorded"
        );

        publish(
            &self.event_sender,
            Event::PaymentRecorded {
                invoice_id: invoice.id,
                payment_id: payment.id,
                amount,
                payment_method: method,
            },
        )
        .await;
        if reconciled.changed() {
            publish(
                &self.event_sender,
                Event::InvoiceStatusChanged {
                    invoice_id: invoice.id,
                    old_status: reconciled.old_status,
                    new_status: reconciled.invoice.status,
                },
            )
            .await;
        }

        Ok(RecordedPayment {
            payment,
            summary: PaymentSummary::from_parts(&reconciled.invoice, &reconciled.ledger),
            duplicate: false,
        })
    }

    async fn already_recorded(
        &self,
        method: &str,
        input: &NewPayment,
    ) -> Result<RecordedPayment, ServiceError> {
        let db = &*self.db_pool;
        let existing = find_transaction(db, method, input.transaction_id.as_deref())
            .await?
            .ok_or_else(|| {
                ServiceError::Conflict("Payment transaction collided and vanished".into())
            })?;
        same_invoice(&existing, input.invoice_id)?;
        if existing.status != PaymentStatus::Completed {
            return Err(ServiceError::Conflict(format!(
                "Transaction {} is being recorded concurrently",
                existing.transaction_id.as_deref().unwrap_or_default()
            )));
        }
        let invoice = load_invoice(db, input.invoice_id).await?;
        let ledger = ledger_in(db, &invoice).await?;
        Ok(RecordedPayment {
            payment: existing,
            summary: PaymentSummary::from_parts(&invoice, &ledger),
            duplicate: true,
        })
    }

    /// Records a pending or failed attempt. Such rows never count towards the
    /// paid amount. A transaction that already completed is left untouched.
    #[instrument(skip(self, callback), fields(gateway = %callback.gateway, invoice_id = callback.invoice_id))]
    async fn record_attempt(
        &self,
        callback: &GatewayCallback,
        status: PaymentStatus,
    ) -> Result<RecordedPayment, ServiceError> {
        let method = callback.gateway.method_name();
        let txn = self.db_pool.begin().await?;
        let invoice = load_invoice(&txn, callback.invoice_id).await?;
        let ledger = ledger_in(&txn, &invoice).await?;
        let existing =
            find_transaction(&txn, &method, callback.transaction_id.as_deref()).await?;

        let (payment, duplicate) = match existing {
            Some(existing) => {
                same_invoice(&existing, invoice.id)?;
                if existing.status == PaymentStatus::Completed || existing.status == status {
                    (existing, true)
                } else {
                    let mut active = existing.into_active_model();
                    active.status = Set(status);
                    (active.update(&txn).await?, false)
                }
            }
            None => {
                let amount = round_money(callback.amount);
                let payment = invoice_payment::ActiveModel {
                    company_id: Set(invoice.company_id),
                    invoice_id: Set(invoice.id),
                    amount: Set(amount),
                    payment_type: Set(ledger.infer_payment_type(amount).to_string()),
                    payment_method: Set(method.clone()),
                    transaction_id: Set(callback.transaction_id.clone()),
                    status: Set(status),
                    notes: Set(Some(format!("Gateway reported status '{}'", callback.status))),
                    paid_at: Set(None),
                    created_by: Set(None),
                    created_at: Set(Utc::now()),
                    ..Default::default()
                }
                .insert(&txn)
                .await?;
                (payment, false)
            }
        };
        txn.commit().await?;

        if status == PaymentStatus::Failed && !duplicate {
            counter!("tenantdesk_payments_failed_total", 1, "method" => method.clone());
            warn!(transaction_id = ?callback.transaction_id, "Gateway reported a failed payment");
            publish(
                &self.event_sender,
                Event::PaymentFailed {
                    invoice_id: invoice.id,
                    payment_method: method,
                    transaction_id: callback.transaction_id.clone(),
                },
            )
            .await;
        }

        Ok(RecordedPayment {
            payment,
            summary: PaymentSummary::from_parts(&invoice, &ledger),
            duplicate,
        })
    }

    /// Applies a gateway notification. Completed payments go through
    /// [`Self::store_payment`] with the payment type inferred from the
    /// remaining balance; anything else is kept as an attempt.
    #[instrument(skip(self, callback), fields(gateway = %callback.gateway, invoice_id = callback.invoice_id))]
    pub async fn handle_gateway_callback(
        &self,
        callback: GatewayCallback,
    ) -> Result<RecordedPayment, ServiceError> {
        callback.validate()?;
        let status = callback.normalized_status();
        info!(raw_status = %callback.status, status = %status, "Gateway callback received");

        match status {
            PaymentStatus::Completed => {
                self.store_payment(NewPayment {
                    invoice_id: callback.invoice_id,
                    amount: callback.amount,
                    payment_type: None,
                    payment_method: callback.gateway.method_name(),
                    transaction_id: callback.transaction_id.clone(),
                    notes: None,
                    created_by: None,
                })
                .await
            }
            PaymentStatus::Pending | PaymentStatus::Failed => {
                self.record_attempt(&callback, status).await
            }
        }
    }
}
