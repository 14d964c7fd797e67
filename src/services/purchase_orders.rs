use chrono::{NaiveDate, Utc};
use rust_decimal::Decimal;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, EntityTrait, IntoActiveModel, PaginatorTrait, QueryFilter,
    QueryOrder, Set,
};
use serde::{Deserialize, Serialize};
use tracing::{info, instrument};
use validator::Validate;

use crate::{
    config::NumberingConfig,
    entities::purchase_order::{self, PurchaseOrderStatus},
    errors::ServiceError,
};

use super::documents::{validate_non_negative, DocumentService, LineItemInput, LineSource};
use super::{page_index, page_size};

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct NewPurchaseOrder {
    pub company_id: i32,
    pub created_by: i32,
    #[validate(length(min = 1, max = 255))]
    pub vendor_name: String,
    pub expected_date: Option<NaiveDate>,
    #[serde(default)]
    #[validate(custom = "validate_non_negative")]
    pub shipping_amount: Decimal,
    #[validate(length(max = 5000))]
    pub notes: Option<String>,
    #[serde(default)]
    #[validate]
    pub items: Vec<LineItemInput>,
}

#[derive(Clone)]
pub struct PurchaseOrderService {
    documents: DocumentService,
    numbering: NumberingConfig,
}

impl PurchaseOrderService {
    pub fn new(documents: DocumentService, numbering: NumberingConfig) -> Self {
        Self {
            documents,
            numbering,
        }
    }

    #[instrument(skip(self, input), fields(company_id = input.company_id))]
    pub async fn create_purchase_order(
        &self,
        input: NewPurchaseOrder,
    ) -> Result<purchase_order::Model, ServiceError> {
        input.validate()?;

        let now = Utc::now();
        let NewPurchaseOrder {
            company_id,
            created_by,
            vendor_name,
            expected_date,
            shipping_amount,
            notes,
            items,
        } = input;

        self.documents
            .create_document::<purchase_order::Entity, _, _>(
                &self.numbering.purchase_order(),
                move |number| purchase_order::ActiveModel {
                    company_id: Set(company_id),
                    number: Set(number),
                    status: Set(PurchaseOrderStatus::Draft),
                    vendor_name: Set(vendor_name.clone()),
                    expected_date: Set(expected_date),
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

    pub async fn get_purchase_order(
        &self,
        id: i32,
    ) -> Result<purchase_order::Model, ServiceError> {
        self.documents.fetch::<purchase_order::Entity>(id).await
    }

    #[instrument(skip(self))]
    pub async fn list_purchase_orders(
        &self,
        company_id: i32,
        page: u64,
        limit: u64,
    ) -> Result<(Vec<purchase_order::Model>, u64), ServiceError> {
        let paginator = purchase_order::Entity::find()
            .filter(purchase_order::Column::CompanyId.eq(company_id))
            .order_by_desc(purchase_order::Column::Id)
            .paginate(self.documents.db(), page_size(limit));
        let total = paginator.num_items().await?;
        let orders = paginator.fetch_page(page_index(page)).await?;
        Ok((orders, total))
    }

    /// Received and cancelled purchase orders are final.
    #[instrument(skip(self))]
    pub async fn update_status(
        &self,
        order_id: i32,
        new_status: PurchaseOrderStatus,
    ) -> Result<purchase_order::Model, ServiceError> {
        let order = self.get_purchase_order(order_id).await?;
        let old_status = order.status;
        if old_status == new_status {
            return Ok(order);
        }
        if matches!(
            old_status,
            PurchaseOrderStatus::Received | PurchaseOrderStatus::Cancelled
        ) {
            return Err(ServiceError::InvalidStatus(format!(
                "Purchase order {} is already {}",
                order.number, old_status
            )));
        }

        let mut active = order.into_active_model();
        active.status = Set(new_status);
        active.updated_at = Set(Some(Utc::now()));
        let updated = active.update(self.documents.db()).await?;

        info!(order_id, old_status = %old_status, new_status = %new_status, "Purchase order status updated");
        self.documents
            .status_changed::<purchase_order::Entity>(order_id, old_status, new_status)
            .await;
        Ok(updated)
    }
}
