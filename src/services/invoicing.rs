use chrono::{NaiveDate, Utc};
use rust_decimal::Decimal;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, ConnectionTrait, EntityTrait, IntoActiveModel, PaginatorTrait,
    QueryFilter, QueryOrder, QuerySelect, Set, TransactionTrait,
};
use serde::{Deserialize, Serialize};
use tracing::{info, instrument};
use validator::Validate;

use crate::{
    config::NumberingConfig,
    entities::{
        company,
        invoice::{self, InvoiceStatus},
        invoice_payment::{self, PaymentStatus},
    },
    errors::ServiceError,
    events::Event,
    reconciliation::{PaymentLedger, PaymentType, PaymentValidation},
};

use super::crm::ensure_party;
use super::documents::{validate_non_negative, DocumentService, LineItemInput, LineSource};
use super::{page_index, page_size};

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct NewInvoice {
    pub company_id: i32,
    pub created_by: i32,
    pub account_id: Option<i32>,
    pub contact_id: Option<i32>,
    /// Defaults to today
    pub issue_date: Option<NaiveDate>,
    pub due_date: Option<NaiveDate>,
    /// Defaults to the company's currency
    #[validate(length(equal = 3))]
    pub currency: Option<String>,
    #[serde(default)]
    #[validate(custom = "validate_non_negative")]
    pub shipping_amount: Decimal,
    #[validate(length(max = 5000))]
    pub notes: Option<String>,
    #[serde(default)]
    #[validate]
    pub items: Vec<LineItemInput>,
}

/// Paid position of one invoice.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PaymentSummary {
    pub invoice_id: i32,
    pub number: String,
    pub status: InvoiceStatus,
    pub total_amount: Decimal,
    pub total_paid: Decimal,
    pub remaining: Decimal,
    pub is_fully_paid: bool,
    pub is_partially_paid: bool,
}

impl PaymentSummary {
    pub(crate) fn from_parts(invoice: &invoice::Model, ledger: &PaymentLedger) -> Self {
        Self {
            invoice_id: invoice.id,
            number: invoice.number.clone(),
            status: invoice.status,
            total_amount: invoice.total_amount,
            total_paid: ledger.total_paid(),
            remaining: ledger.remaining(),
            is_fully_paid: ledger.is_fully_paid(),
            is_partially_paid: ledger.is_partially_paid(),
        }
    }
}

/// Sum of completed payments for an invoice. Amounts are added in Rust so
/// the result does not depend on the backend's decimal aggregation.
pub(crate) async fn ledger_in<C: ConnectionTrait>(
    db: &C,
    invoice: &invoice::Model,
) -> Result<PaymentLedger, ServiceError> {
    let amounts: Vec<Decimal> = invoice_payment::Entity::find()
        .select_only()
        .column(invoice_payment::Column::Amount)
        .filter(invoice_payment::Column::InvoiceId.eq(invoice.id))
        .filter(invoice_payment::Column::Status.eq(PaymentStatus::Completed))
        .into_tuple()
        .all(db)
        .await?;
    Ok(PaymentLedger::new(invoice.total_amount, amounts))
}

pub(crate) async fn load_invoice<C: ConnectionTrait>(
    db: &C,
    invoice_id: i32,
) -> Result<invoice::Model, ServiceError> {
    invoice::Entity::find_by_id(invoice_id)
        .one(db)
        .await?
        .ok_or_else(|| ServiceError::not_found("Invoice", invoice_id))
}

/// Outcome of reconciling an invoice against its payments.
#[derive(Debug, Clone)]
pub(crate) struct Reconciled {
    pub invoice: invoice::Model,
    pub ledger: PaymentLedger,
    pub old_status: InvoiceStatus,
}

impl Reconciled {
    pub fn changed(&self) -> bool {
        self.old_status != self.invoice.status
    }
}

/// Derives the invoice status from its completed payments and stores it
/// when it changed.
pub(crate) async fn reconcile_in<C: ConnectionTrait>(
    db: &C,
    invoice_id: i32,
) -> Result<Reconciled, ServiceError> {
    let invoice = load_invoice(db, invoice_id).await?;
    let ledger = ledger_in(db, &invoice).await?;
    let old_status = invoice.status;
    let new_status = ledger.derive_status(old_status);

    let invoice = if new_status != old_status {
        let mut active = invoice.into_active_model();
        active.status = Set(new_status);
        active.updated_at = Set(Some(Utc::now()));
        active.update(db).await?
    } else {
        invoice
    };

    Ok(Reconciled {
        invoice,
        ledger,
        old_status,
    })
}

#[derive(Clone)]
pub struct InvoiceService {
    documents: DocumentService,
    numbering: NumberingConfig,
}

impl InvoiceService {
    pub fn new(documents: DocumentService, numbering: NumberingConfig) -> Self {
        Self {
            documents,
            numbering,
        }
    }

    /// Creates an invoice numbered `INV-<year>-<seq>`.
    #[instrument(skip(self, input), fields(company_id = input.company_id))]
    pub async fn create_invoice(&self, input: NewInvoice) -> Result<invoice::Model, ServiceError> {
        input.validate()?;
        let db = self.documents.db();
        ensure_party(db, input.company_id, input.account_id, input.contact_id).await?;

        let currency = match input.currency.clone() {
            Some(currency) => currency.to_uppercase(),
            None => {
                company::Entity::find_by_id(input.company_id)
                    .one(db)
                    .await?
                    .ok_or_else(|| ServiceError::not_found("Company", input.company_id))?
                    .currency
            }
        };

        let now = Utc::now();
        let NewInvoice {
            company_id,
            created_by,
            account_id,
            contact_id,
            issue_date,
            due_date,
            shipping_amount,
            notes,
            items,
            ..
        } = input;

        self.documents
            .create_document::<invoice::Entity, _, _>(
                &self.numbering.invoice(),
                move |number| invoice::ActiveModel {
                    company_id: Set(company_id),
                    number: Set(number),
                    status: Set(InvoiceStatus::Draft),
                    account_id: Set(account_id),
                    contact_id: Set(contact_id),
                    sales_order_id: Set(None),
                    issue_date: Set(issue_date.unwrap_or_else(|| now.date_naive())),
                    due_date: Set(due_date),
                    currency: Set(currency.clone()),
                    shipping_amount: Set(shipping_amount),
                    notes: Set(notes.clone()),
                    created_by: Set(created_by),
                    created_at: Set(now),
                    updated_at: Set(None),
                    ..Default::default()
                },
                LineSource::Items(items),
            )
            .await
    }

    pub async fn get_invoice(&self, id: i32) -> Result<invoice::Model, ServiceError> {
        load_invoice(self.documents.db(), id).await
    }

    #[instrument(skip(self))]
    pub async fn list_invoices(
        &self,
        company_id: i32,
        status: Option<InvoiceStatus>,
        page: u64,
        limit: u64,
    ) -> Result<(Vec<invoice::Model>, u64), ServiceError> {
        let mut query = invoice::Entity::find().filter(invoice::Column::CompanyId.eq(company_id));
        if let Some(status) = status {
            query = query.filter(invoice::Column::Status.eq(status));
        }
        let paginator = query
            .order_by_desc(invoice::Column::Id)
            .paginate(self.documents.db(), page_size(limit));
        let total = paginator.num_items().await?;
        let invoices = paginator.fetch_page(page_index(page)).await?;
        Ok((invoices, total))
    }

    /// Manual status changes. `paid` and `partially_paid` follow from the
    /// recorded payments and cannot be set here; a paid invoice is final.
    #[instrument(skip(self))]
    pub async fn update_status(
        &self,
        invoice_id: i32,
        new_status: InvoiceStatus,
    ) -> Result<invoice::Model, ServiceError> {
        if new_status.is_payment_status() {
            return Err(ServiceError::InvalidStatus(format!(
                "Invoice status {} is derived from payments",
                new_status
            )));
        }

        let txn = self.documents.db().begin().await?;
        let invoice = load_invoice(&txn, invoice_id).await?;
        let old_status = invoice.status;
        if old_status == new_status {
            return Ok(invoice);
        }
        if old_status == InvoiceStatus::Paid {
            return Err(ServiceError::InvalidStatus(format!(
                "Invoice {} is paid",
                invoice.number
            )));
        }
        if new_status == InvoiceStatus::Cancelled && !ledger_in(&txn, &invoice).await?.paid.is_zero()
        {
            return Err(ServiceError::InvalidOperation(format!(
                "Invoice {} has completed payments and cannot be cancelled",
                invoice.number
            )));
        }

        let mut active = invoice.into_active_model();
        active.status = Set(new_status);
        active.updated_at = Set(Some(Utc::now()));
        let updated = active.update(&txn).await?;
        txn.commit().await?;

        info!(invoice_id, old_status = %old_status, new_status = %new_status, "Invoice status updated");
        self.documents
            .emit(Event::InvoiceStatusChanged {
                invoice_id,
                old_status,
                new_status,
            })
            .await;
        Ok(updated)
    }

    #[instrument(skip(self))]
    pub async fn payment_summary(&self, invoice_id: i32) -> Result<PaymentSummary, ServiceError> {
        let db = self.documents.db();
        let invoice = load_invoice(db, invoice_id).await?;
        let ledger = ledger_in(db, &invoice).await?;
        Ok(PaymentSummary::from_parts(&invoice, &ledger))
    }

    /// Re-derives the status from completed payments. Safe to call any number
    /// of times.
    #[instrument(skip(self))]
    pub async fn update_payment_status(
        &self,
        invoice_id: i32,
    ) -> Result<PaymentSummary, ServiceError> {
        let txn = self.documents.db().begin().await?;
        let reconciled = reconcile_in(&txn, invoice_id).await?;
        txn.commit().await?;

        if reconciled.changed() {
            self.documents
                .emit(Event::InvoiceStatusChanged {
                    invoice_id,
                    old_status: reconciled.old_status,
                    new_status: reconciled.invoice.status,
                })
                .await;
        }
        Ok(PaymentSummary::from_parts(&reconciled.invoice, &reconciled.ledger))
    }

    /// Checks a prospective payment against the remaining balance. The
    /// verdict is returned as data.
    pub async fn validate_payment_amount(
        &self,
        invoice_id: i32,
        amount: Decimal,
        payment_type: PaymentType,
    ) -> Result<PaymentValidation, ServiceError> {
        let db = self.documents.db();
        let invoice = load_invoice(db, invoice_id).await?;
        let ledger = ledger_in(db, &invoice).await?;
        Ok(ledger.validate_payment_amount(amount, payment_type))
    }

    /// Completed and attempted payments for an invoice, oldest first.
    pub async fn payments(
        &self,
        invoice_id: i32,
    ) -> Result<Vec<invoice_payment::Model>, ServiceError> {
        let db = self.documents.db();
        load_invoice(db, invoice_id).await?;
        Ok(invoice_payment::Entity::find()
            .filter(invoice_payment::Column::InvoiceId.eq(invoice_id))
            .order_by_asc(invoice_payment::Column::Id)
            .all(db)
            .await?)
    }
}
