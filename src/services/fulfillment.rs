//! Delivery, return and receipt orders.
//!
//! Each can be created from a source document (a sales order, an invoice or
//! a purchase order). When the caller passes no lines of its own, the
//! source's lines are copied onto the new document.

use chrono::{NaiveDate, Utc};
use rust_decimal::Decimal;
use sea_orm::sea_query::Expr;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, EntityTrait, IntoActiveModel, PaginatorTrait, QueryFilter,
    QueryOrder, Set,
};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, instrument};
use validator::Validate;

use crate::{
    config::NumberingConfig,
    entities::{
        delivery_order::{self, DeliveryOrderStatus},
        document_line_item::DocumentKind,
        invoice,
        purchase_order::{self, PurchaseOrderStatus},
        receipt_order::{self, ReceiptOrderStatus},
        return_order::{self, ReturnOrderStatus},
        sales_order::{self, SalesOrderStatus},
    },
    errors::ServiceError,
};

use super::documents::{
    owned_header, validate_non_negative, DocumentService, LineItemInput, LineSource,
};
use super::{page_index, page_size};

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct NewDeliveryOrder {
    pub company_id: i32,
    pub created_by: i32,
    pub sales_order_id: Option<i32>,
    pub delivery_date: Option<NaiveDate>,
    /// Defaults to the sales order's shipping address
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

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct NewReturnOrder {
    pub company_id: i32,
    pub created_by: i32,
    pub sales_order_id: Option<i32>,
    /// Takes precedence over the sales order as the source of lines
    pub invoice_id: Option<i32>,
    #[validate(length(max = 1000))]
    pub reason: Option<String>,
    #[validate(length(max = 5000))]
    pub notes: Option<String>,
    #[serde(default)]
    #[validate]
    pub items: Vec<LineItemInput>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct NewReceiptOrder {
    pub company_id: i32,
    pub created_by: i32,
    pub purchase_order_id: Option<i32>,
    pub received_date: Option<NaiveDate>,
    #[validate(length(max = 5000))]
    pub notes: Option<String>,
    #[serde(default)]
    #[validate]
    pub items: Vec<LineItemInput>,
}

fn line_source(items: Vec<LineItemInput>, source: Option<(DocumentKind, i32)>) -> LineSource {
    match source {
        Some((kind, id)) if items.is_empty() => LineSource::CopyFrom(kind, id),
        _ => LineSource::Items(items),
    }
}

#[derive(Clone)]
pub struct FulfillmentService {
    documents: DocumentService,
    numbering: NumberingConfig,
}

impl FulfillmentService {
    pub fn new(documents: DocumentService, numbering: NumberingConfig) -> Self {
        Self {
            documents,
            numbering,
        }
    }

    // Delivery orders

    #[instrument(skip(self, input), fields(company_id = input.company_id))]
    pub async fn create_delivery_order(
        &self,
        input: NewDeliveryOrder,
    ) -> Result<delivery_order::Model, ServiceError> {
        input.validate()?;
        let db = self.documents.db();

        let mut shipping_address = input.shipping_address.clone();
        if let Some(order_id) = input.sales_order_id {
            let header =
                owned_header::<sales_order::Entity, _>(db, input.company_id, order_id).await?;
            if header.status == SalesOrderStatus::Cancelled.to_string() {
                return Err(ServiceError::InvalidStatus(format!(
                    "Sales order {} is cancelled",
                    order_id
                )));
            }
            if shipping_address.is_none() {
                shipping_address = self
                    .documents
                    .fetch::<sales_order::Entity>(order_id)
                    .await?
                    .shipping_address;
            }
        }

        let now = Utc::now();
        let source = input
            .sales_order_id
            .map(|id| (DocumentKind::SalesOrder, id));
        let NewDeliveryOrder {
            company_id,
            created_by,
            sales_order_id,
            delivery_date,
            shipping_amount,
            notes,
            items,
            ..
        } = input;

        self.documents
            .create_document::<delivery_order::Entity, _, _>(
                &self.numbering.delivery_order(),
                move |number| delivery_order::ActiveModel {
                    company_id: Set(company_id),
                    number: Set(number),
                    status: Set(DeliveryOrderStatus::Pending),
                    sales_order_id: Set(sales_order_id),
                    delivery_date: Set(delivery_date),
                    shipping_address: Set(shipping_address.clone()),
                    shipping_amount: Set(shipping_amount),
                    notes: Set(notes.clone()),
                    created_by: Set(created_by),
                    created_at: Set(now),
                    updated_at: Set(None),
                    ..Default::default()
                },
                line_source(items, source),
            )
            .await
    }

    pub async fn get_delivery_order(
        &self,
        id: i32,
    ) -> Result<delivery_order::Model, ServiceError> {
        self.documents.fetch::<delivery_order::Entity>(id).await
    }

    pub async fn list_delivery_orders(
        &self,
        company_id: i32,
        page: u64,
        limit: u64,
    ) -> Result<(Vec<delivery_order::Model>, u64), ServiceError> {
        let paginator = delivery_order::Entity::find()
            .filter(delivery_order::Column::CompanyId.eq(company_id))
            .order_by_desc(delivery_order::Column::Id)
            .paginate(self.documents.db(), page_size(limit));
        let total = paginator.num_items().await?;
        let orders = paginator.fetch_page(page_index(page)).await?;
        Ok((orders, total))
    }

    /// Delivering an order also marks its sales order delivered, unless the
    /// sales order was already invoiced or cancelled.
    #[instrument(skip(self))]
    pub async fn update_delivery_status(
        &self,
        id: i32,
        new_status: DeliveryOrderStatus,
    ) -> Result<delivery_order::Model, ServiceError> {
        let order = self.get_delivery_order(id).await?;
        let old_status = order.status;
        if old_status == new_status {
            return Ok(order);
        }
        if matches!(
            old_status,
            DeliveryOrderStatus::Delivered | DeliveryOrderStatus::Cancelled
        ) {
            return Err(ServiceError::InvalidStatus(format!(
                "Delivery order {} is already {}",
                order.number, old_status
            )));
        }

        let db = self.documents.db();
        let sales_order_id = order.sales_order_id;
        let mut active = order.into_active_model();
        active.status = Set(new_status);
        if new_status == DeliveryOrderStatus::Delivered {
            active.delivery_date = Set(Some(Utc::now().date_naive()));
        }
        active.updated_at = Set(Some(Utc::now()));
        let updated = active.update(db).await?;

        if let (DeliveryOrderStatus::Delivered, Some(order_id)) = (new_status, sales_order_id) {
            let result = sales_order::Entity::update_many()
                .col_expr(
                    sales_order::Column::Status,
                    Expr::value(SalesOrderStatus::Delivered),
                )
                .col_expr(sales_order::Column::UpdatedAt, Expr::value(Utc::now()))
                .filter(sales_order::Column::Id.eq(order_id))
                .filter(sales_order::Column::Status.is_in([
                    SalesOrderStatus::Confirmed,
                    SalesOrderStatus::Processing,
                    SalesOrderStatus::Shipped,
                ]))
                .exec(db)
                .await?;
            debug!(order_id, rows = result.rows_affected, "Sales order delivery propagated");
        }

        info!(id, old_status = %old_status, new_status = %new_status, "Delivery order status updated");
        self.documents
            .status_changed::<delivery_order::Entity>(id, old_status, new_status)
            .await;
        Ok(updated)
    }

    // Return orders

    #[instrument(skip(self, input), fields(company_id = input.company_id))]
    pub async fn create_return_order(
        &self,
        input: NewReturnOrder,
    ) -> Result<return_order::Model, ServiceError> {
        input.validate()?;
        let db = self.documents.db();

        if let Some(order_id) = input.sales_order_id {
            owned_header::<sales_order::Entity, _>(db, input.company_id, order_id).await?;
        }
        if let Some(invoice_id) = input.invoice_id {
            owned_header::<invoice::Entity, _>(db, input.company_id, invoice_id).await?;
        }

        let now = Utc::now();
        let source = input
            .invoice_id
            .map(|id| (DocumentKind::Invoice, id))
            .or_else(|| input.sales_order_id.map(|id| (DocumentKind::SalesOrder, id)));
        let NewReturnOrder {
            company_id,
            created_by,
            sales_order_id,
            invoice_id,
            reason,
            notes,
            items,
        } = input;

        self.documents
            .create_document::<return_order::Entity, _, _>(
                &self.numbering.return_order(),
                move |number| return_order::ActiveModel {
                    company_id: Set(company_id),
                    number: Set(number),
                    status: Set(ReturnOrderStatus::Requested),
                    sales_order_id: Set(sales_order_id),
                    invoice_id: Set(invoice_id),
                    reason: Set(reason.clone()),
                    notes: Set(notes.clone()),
                    created_by: Set(created_by),
                    created_at: Set(now),
                    updated_at: Set(None),
                    ..Default::default()
                },
                line_source(items, source),
            )
            .await
    }

    pub async fn get_return_order(&self, id: i32) -> Result<return_order::Model, ServiceError> {
        self.documents.fetch::<return_order::Entity>(id).await
    }

    pub async fn list_return_orders(
        &self,
        company_id: i32,
        page: u64,
        limit: u64,
    ) -> Result<(Vec<return_order::Model>, u64), ServiceError> {
        let paginator = return_order::Entity::find()
            .filter(return_order::Column::CompanyId.eq(company_id))
            .order_by_desc(return_order::Column::Id)
            .paginate(self.documents.db(), page_size(limit));
        let total = paginator.num_items().await?;
        let orders = paginator.fetch_page(page_index(page)).await?;
        Ok((orders, total))
    }

    /// Refunded and rejected returns are final.
    #[instrument(skip(self))]
    pub async fn update_return_status(
        &self,
        id: i32,
        new_status: ReturnOrderStatus,
    ) -> Result<return_order::Model, ServiceError> {
        let order = self.get_return_order(id).await?;
        let old_status = order.status;
        if old_status == new_status {
            return Ok(order);
        }
        if matches!(
            old_status,
            ReturnOrderStatus::Refunded | ReturnOrderStatus::Rejected
        ) {
            return Err(ServiceError::InvalidStatus(format!(
                "Return order {} is already {}",
                order.number, old_status
            )));
        }

        let mut active = order.into_active_model();
        active.status = Set(new_status);
        active.updated_at = Set(Some(Utc::now()));
        let updated = active.update(self.documents.db()).await?;

        info!(id, old_status = %old_status, new_status = %new_status, "Return order status updated");
        self.documents
            .status_changed::<return_order::Entity>(id, old_status, new_status)
            .await;
        Ok(updated)
    }

    // Receipt orders

    #[instrument(skip(self, input), fields(company_id = input.company_id))]
    pub async fn create_receipt_order(
        &self,
        input: NewReceiptOrder,
    ) -> Result<receipt_order::Model, ServiceError> {
        input.validate()?;
        let db = self.documents.db();

        if let Some(po_id) = input.purchase_order_id {
            let header =
                owned_header::<purchase_order::Entity, _>(db, input.company_id, po_id).await?;
            if header.status == PurchaseOrderStatus::Cancelled.to_string() {
                return Err(ServiceError::InvalidStatus(format!(
                    "Purchase order {} is cancelled",
                    po_id
                )));
            }
        }

        let now = Utc::now();
        let source = input
            .purchase_order_id
            .map(|id| (DocumentKind::PurchaseOrder, id));
        let NewReceiptOrder {
            company_id,
            created_by,
            purchase_order_id,
            received_date,
            notes,
            items,
        } = input;

        self.documents
            .create_document::<receipt_order::Entity, _, _>(
                &self.numbering.receipt_order(),
                move |number| receipt_order::ActiveModel {
                    company_id: Set(company_id),
                    number: Set(number),
                    status: Set(ReceiptOrderStatus::Pending),
                    purchase_order_id: Set(purchase_order_id),
                    received_date: Set(received_date),
                    notes: Set(notes.clone()),
                    created_by: Set(created_by),
                    created_at: Set(now),
                    updated_at: Set(None),
                    ..Default::default()
                },
                line_source(items, source),
            )
            .await
    }

    pub async fn get_receipt_order(&self, id: i32) -> Result<receipt_order::Model, ServiceError> {
        self.documents.fetch::<receipt_order::Entity>(id).await
    }

    pub async fn list_receipt_orders(
        &self,
        company_id: i32,
        page: u64,
        limit: u64,
    ) -> Result<(Vec<receipt_order::Model>, u64), ServiceError> {
        let paginator = receipt_order::Entity::find()
            .filter(receipt_order::Column::CompanyId.eq(company_id))
            .order_by_desc(receipt_order::Column::Id)
            .paginate(self.documents.db(), page_size(limit));
        let total = paginator.num_items().await?;
        let orders = paginator.fetch_page(page_index(page)).await?;
        Ok((orders, total))
    }

    /// Receiving goods marks the linked purchase order received.
    #[instrument(skip(self))]
    pub async fn update_receipt_status(
        &self,
        id: i32,
        new_status: ReceiptOrderStatus,
    ) -> Result<receipt_order::Model, ServiceError> {
        let order = self.get_receipt_order(id).await?;
        let old_status = order.status;
        if old_status == new_status {
            return Ok(order);
        }
        if old_status != ReceiptOrderStatus::Pending {
            return Err(ServiceError::InvalidStatus(format!(
                "Receipt order {} is already {}",
                order.number, old_status
            )));
        }

        let db = self.documents.db();
        let purchase_order_id = order.purchase_order_id;
        let mut active = order.into_active_model();
        active.status = Set(new_status);
        if new_status == ReceiptOrderStatus::Received {
            active.received_date = Set(Some(Utc::now().date_naive()));
        }
        active.updated_at = Set(Some(Utc::now()));
        let updated = active.update(db).await?;

        if let (ReceiptOrderStatus::Received, Some(po_id)) = (new_status, purchase_order_id) {
            purchase_order::Entity::update_many()
                .col_expr(
                    purchase_order::Column::Status,
                    Expr::value(PurchaseOrderStatus::Received),
                )
                .col_expr(purchase_order::Column::UpdatedAt, Expr::value(Utc::now()))
                .filter(purchase_order::Column::Id.eq(po_id))
                .filter(purchase_order::Column::Status.is_in([
                    PurchaseOrderStatus::Sent,
                    PurchaseOrderStatus::Confirmed,
                ]))
                .exec(db)
                .await?;
        }

        info!(id, old_status = %old_status, new_status = %new_status, "Receipt order status updated");
        self.documents
            .status_changed::<receipt_order::Entity>(id, old_status, new_status)
            .await;
        Ok(updated)
    }
}
