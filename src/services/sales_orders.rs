use chrono::{NaiveDate, Utc};
use rust_decimal::Decimal;
use sea_orm::sea_query::Expr;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, EntityTrait, IntoActiveModel, PaginatorTrait, QueryFilter,
    QueryOrder, Set,
};
use serde::{Deserialize, Serialize};
use tracing::{info, instrument};
use validator::Validate;

use crate::{
    config::NumberingConfig,
    entities::{
        company,
        document_line_item::DocumentKind,
        invoice::{self, InvoiceStatus},
        sales_order::{self, SalesOrderStatus},
    },
    errors::ServiceError,
    events::Event,
};

use super::crm::ensure_party;
use super::documents::{
    copy_line_items, recalculate_in, validate_non_negative, DocumentService, LineItemInput,
    LineSource,
};
use super::{page_index, page_size};

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct NewSalesOrder {
    pub company_id: i32,
    pub created_by: i32,
    pub account_id: Option<i32>,
    pub contact_id: Option<i32>,
    /// Defaults to today
    pub order_date: Option<NaiveDate>,
    #[validate(length(max = 1000))]
    pub shipping_address: Option<String>,
    #[serde(default)]
    #[validate(custom = "validate_non_negative")]
    pub shipping_amount: Decimal,
    #[validate(length(max = 5000))]
    pub notes: Option<String>,
    #[serde(default)]
    #[validate]
    pub items: Vec<LineItemInput>,
}

/// Dates for an invoice raised from a sales order.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct InvoiceFromOrder {
    pub created_by: i32,
    /// Defaults to today
    pub issue_date: Option<NaiveDate>,
    pub due_date: Option<NaiveDate>,
}

#[derive(Clone)]
pub struct SalesOrderService {
    documents: DocumentService,
    numbering: NumberingConfig,
}

impl SalesOrderService {
    pub fn new(documents: DocumentService, numbering: NumberingConfig) -> Self {
        Self {
            documents,
            numbering,
        }
    }

    #[instrument(skip(self, input), fields(company_id = input.company_id))]
    pub async fn create_sales_order(
        &self,
        input: NewSalesOrder,
    ) -> Result<sales_order::Model, ServiceError> {
        input.validate()?;
        ensure_party(
            self.documents.db(),
            input.company_id,
            input.account_id,
            input.contact_id,
        )
        .await?;

        let now = Utc::now();
        let NewSalesOrder {
            company_id,
            created_by,
            account_id,
            contact_id,
            order_date,
            shipping_address,
            shipping_amount,
            notes,
            items,
        } = input;

        self.documents
            .create_document::<sales_order::Entity, _, _>(
                &self.numbering.sales_order(),
                move |number| sales_order::ActiveModel {
                    company_id: Set(company_id),
                    number: Set(number),
                    status: Set(SalesOrderStatus::Draft),
                    account_id: Set(account_id),
                    contact_id: Set(contact_id),
                    quote_id: Set(None),
                    order_date: Set(order_date.unwrap_or_else(|| now.date_naive())),
                    shipping_address: Set(shipping_address.clone()),
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

    pub async fn get_sales_order(&self, id: i32) -> Result<sales_order::Model, ServiceError> {
        self.documents.fetch::<sales_order::Entity>(id).await
    }

    #[instrument(skip(self))]
    pub async fn list_sales_orders(
        &self,
        company_id: i32,
        status: Option<SalesOrderStatus>,
        page: u64,
        limit: u64,
    ) -> Result<(Vec<sales_order::Model>, u64), ServiceError> {
        let mut query =
            sales_order::Entity::find().filter(sales_order::Column::CompanyId.eq(company_id));
        if let Some(status) = status {
            query = query.filter(sales_order::Column::Status.eq(status));
        }
        let paginator = query
            .order_by_desc(sales_order::Column::Id)
            .paginate(self.documents.db(), page_size(limit));
        let total = paginator.num_items().await?;
        let orders = paginator.fetch_page(page_index(page)).await?;
        Ok((orders, total))
    }

    /// `invoiced` is set by [`Self::create_invoice_from_sales_order`] only, and
    /// a cancelled order stays cancelled.
    #[instrument(skip(self))]
    pub async fn update_status(
        &self,
        order_id: i32,
        new_status: SalesOrderStatus,
    ) -> Result<sales_order::Model, ServiceError> {
        if new_status == SalesOrderStatus::Invoiced {
            return Err(ServiceError::InvalidStatus(
                "Sales orders become invoiced when an invoice is created from them".into(),
            ));
        }

        let order = self.get_sales_order(order_id).await?;
        let old_status = order.status;
        if old_status == new_status {
            return Ok(order);
        }
        if matches!(
            old_status,
            SalesOrderStatus::Cancelled | SalesOrderStatus::Invoiced
        ) {
            return Err(ServiceError::InvalidStatus(format!(
                "Sales order {} is {} and its status is final",
                order.number, old_status
            )));
        }

        let mut active = order.into_active_model();
        active.status = Set(new_status);
        active.updated_at = Set(Some(Utc::now()));
        let updated = active.update(self.documents.db()).await?;

        info!(order_id, old_status = %old_status, new_status = %new_status, "Sales order status updated");
        self.documents
            .status_changed::<sales_order::Entity>(order_id, old_status, new_status)
            .await;
        Ok(updated)
    }

    /// Raises an invoice with the order's lines, shipping and order discount,
    /// and marks the order invoiced. An order is invoiced at most once.
    #[instrument(skip(self, input))]
    pub async fn create_invoice_from_sales_order(
        &self,
        order_id: i32,
        input: InvoiceFromOrder,
    ) -> Result<invoice::Model, ServiceError> {
        let db = self.documents.db();
        let order = self.get_sales_order(order_id).await?;
        match order.status {
            SalesOrderStatus::Invoiced => {
                return Err(ServiceError::Conflict(format!(
                    "Sales order {} has already been invoiced",
                    order.number
                )))
            }
            SalesOrderStatus::Cancelled => {
                return Err(ServiceError::InvalidStatus(format!(
                    "Sales order {} is cancelled",
                    order.number
                )))
            }
            _ => {}
        }

        let currency = company::Entity::find_by_id(order.company_id)
            .one(db)
            .await?
            .map(|c| c.currency)
            .ok_or_else(|| ServiceError::not_found("Company", order.company_id))?;

        let now = Utc::now();
        let source = order.clone();
        let invoice = self
            .documents
            .insert_numbered_with::<invoice::Entity, _, _, _>(
                &self.numbering.invoice(),
                move |number| invoice::ActiveModel {
                    company_id: Set(source.company_id),
                    number: Set(number),
                    status: Set(InvoiceStatus::Draft),
                    account_id: Set(source.account_id),
                    contact_id: Set(source.contact_id),
                    sales_order_id: Set(Some(source.id)),
                    issue_date: Set(input.issue_date.unwrap_or_else(|| now.date_naive())),
                    due_date: Set(input.due_date),
                    currency: Set(currency.clone()),
                    notes: Set(source.notes.clone()),
                    shipping_amount: Set(source.shipping_amount),
                    order_discount_type: Set(source.order_discount_type.clone()),
                    order_discount_value: Set(source.order_discount_value),
                    created_by: Set(input.created_by),
                    created_at: Set(now),
                    updated_at: Set(None),
                    ..Default::default()
                },
                move |txn, invoice| {
                    let invoice_id = invoice.id;
                    Box::pin(async move {
                        copy_line_items(
                            txn,
                            (DocumentKind::SalesOrder, order_id),
                            (DocumentKind::Invoice, invoice_id),
                        )
                        .await?;
                        recalculate_in::<invoice::Entity, _>(txn, invoice_id).await?;

                        let marked = sales_order::Entity::update_many()
                            .col_expr(
                                sales_order::Column::Status,
                                Expr::value(SalesOrderStatus::Invoiced),
                            )
                            .col_expr(sales_order::Column::UpdatedAt, Expr::value(Utc::now()))
                            .filter(sales_order::Column::Id.eq(order_id))
                            .filter(sales_order::Column::Status.is_not_in([
                                SalesOrderStatus::Invoiced,
                                SalesOrderStatus::Cancelled,
                            ]))
                            .exec(txn)
                            .await?;
                        if marked.rows_affected != 1 {
                            return Err(ServiceError::Conflict(format!(
                                "Sales order {} was invoiced concurrently",
                                order_id
                            )));
                        }
                        Ok(())
                    })
                },
            )
            .await?;

        info!(order_id, invoice_id = invoice.id, number = %invoice.number, "Invoice created from sales order");

        self.documents
            .document_created::<invoice::Entity>(invoice.id)
            .await?;
        self.documents
            .status_changed::<sales_order::Entity>(
                order_id,
                order.status,
                SalesOrderStatus::Invoiced,
            )
            .await;
        self.documents
            .emit(Event::InvoiceCreatedFromSalesOrder {
                sales_order_id: order_id,
                invoice_id: invoice.id,
            })
            .await;

        self.documents.fetch::<invoice::Entity>(invoice.id).await
    }
}
