use chrono::{NaiveDate, Utc};
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
        document_line_item::DocumentKind,
        quote::{self, QuoteStatus},
        sales_order::{self, SalesOrderStatus},
    },
    errors::ServiceError,
    events::Event,
};

use super::crm::ensure_party;
use super::documents::{copy_line_items, recalculate_in, DocumentService, LineItemInput, LineSource};
use super::{page_index, page_size};

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct NewQuote {
    pub company_id: i32,
    pub created_by: i32,
    pub account_id: Option<i32>,
    pub contact_id: Option<i32>,
    pub opportunity_id: Option<i32>,
    pub valid_until: Option<NaiveDate>,
    #[validate(length(max = 5000))]
    pub notes: Option<String>,
    #[serde(default)]
    #[validate]
    pub items: Vec<LineItemInput>,
}

/// Result of turning a quote into a sales order.
#[derive(Debug, Clone, Serialize)]
pub struct QuoteConversion {
    pub quote: quote::Model,
    pub sales_order: sales_order::Model,
}

/// Quotes and their conversion into sales orders
#[derive(Clone)]
pub struct QuoteService {
    documents: DocumentService,
    numbering: NumberingConfig,
}

impl QuoteService {
    pub fn new(documents: DocumentService, numbering: NumberingConfig) -> Self {
        Self {
            documents,
            numbering,
        }
    }

    #[instrument(skip(self, input), fields(company_id = input.company_id))]
    pub async fn create_quote(&self, input: NewQuote) -> Result<quote::Model, ServiceError> {
        input.validate()?;
        ensure_party(
            self.documents.db(),
            input.company_id,
            input.account_id,
            input.contact_id,
        )
        .await?;

        let now = Utc::now();
        let NewQuote {
            company_id,
            created_by,
            account_id,
            contact_id,
            opportunity_id,
            valid_until,
            notes,
            items,
        } = input;

        self.documents
            .create_document::<quote::Entity, _, _>(
                &self.numbering.quote(),
                move |number| quote::ActiveModel {
                    company_id: Set(company_id),
                    number: Set(number),
                    status: Set(QuoteStatus::Draft),
                    account_id: Set(account_id),
                    contact_id: Set(contact_id),
                    opportunity_id: Set(opportunity_id),
                    valid_until: Set(valid_until),
                    converted_sales_order_id: Set(None),
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

    pub async fn get_quote(&self, id: i32) -> Result<quote::Model, ServiceError> {
        self.documents.fetch::<quote::Entity>(id).await
    }

    /// Lists a company's quotes, newest first.
    #[instrument(skip(self))]
    pub async fn list_quotes(
        &self,
        company_id: i32,
        status: Option<QuoteStatus>,
        page: u64,
        limit: u64,
    ) -> Result<(Vec<quote::Model>, u64), ServiceError> {
        let mut query = quote::Entity::find().filter(quote::Column::CompanyId.eq(company_id));
        if let Some(status) = status {
            query = query.filter(quote::Column::Status.eq(status));
        }
        let paginator = query
            .order_by_desc(quote::Column::Id)
            .paginate(self.documents.db(), page_size(limit));
        let total = paginator.num_items().await?;
        let quotes = paginator.fetch_page(page_index(page)).await?;
        Ok((quotes, total))
    }

    /// Moves a quote to `new_status`. `converted` is only reachable through
    /// [`Self::convert_to_sales_order`] and a converted quote is final.
    #[instrument(skip(self))]
    pub async fn update_status(
        &self,
        quote_id: i32,
        new_status: QuoteStatus,
    ) -> Result<quote::Model, ServiceError> {
        if new_status == QuoteStatus::Converted {
            return Err(ServiceError::InvalidStatus(
                "Quotes are marked converted by converting them to a sales order".into(),
            ));
        }

        let quote = self.get_quote(quote_id).await?;
        let old_status = quote.status;
        if old_status == QuoteStatus::Converted {
            return Err(ServiceError::InvalidStatus(format!(
                "Quote {} has already been converted",
                quote.number
            )));
        }
        if old_status == new_status {
            return Ok(quote);
        }

        let mut active = quote.into_active_model();
        active.status = Set(new_status);
        active.updated_at = Set(Some(Utc::now()));
        let updated = active.update(self.documents.db()).await?;

        info!(quote_id, old_status = %old_status, new_status = %new_status, "Quote status updated");
        self.documents
            .status_changed::<quote::Entity>(quote_id, old_status, new_status)
            .await;
        Ok(updated)
    }

    /// Creates a sales order carrying the quote's lines and order discount,
    /// then marks the quote converted. Both happen in one transaction; a
    /// quote can be converted only once.
    #[instrument(skip(self))]
    pub async fn convert_to_sales_order(
        &self,
        quote_id: i32,
        converted_by: i32,
    ) -> Result<QuoteConversion, ServiceError> {
        let quote = self.get_quote(quote_id).await?;
        match quote.status {
            QuoteStatus::Converted => {
                return Err(ServiceError::Conflict(format!(
                    "Quote {} has already been converted",
                    quote.number
                )))
            }
            QuoteStatus::Rejected | QuoteStatus::Expired => {
                return Err(ServiceError::InvalidStatus(format!(
                    "A {} quote cannot be converted",
                    quote.status
                )))
            }
            _ => {}
        }

        let now = Utc::now();
        let source = quote.clone();
        let sales_order = self
            .documents
            .insert_numbered_with::<sales_order::Entity, _, _, _>(
                &self.numbering.sales_order(),
                move |number| sales_order::ActiveModel {
                    company_id: Set(source.company_id),
                    number: Set(number),
                    status: Set(SalesOrderStatus::Draft),
                    account_id: Set(source.account_id),
                    contact_id: Set(source.contact_id),
                    quote_id: Set(Some(source.id)),
                    order_date: Set(now.date_naive()),
                    shipping_address: Set(None),
                    notes: Set(source.notes.clone()),
                    order_discount_type: Set(source.order_discount_type.clone()),
                    order_discount_value: Set(source.order_discount_value),
                    created_by: Set(converted_by),
                    created_at: Set(now),
                    updated_at: Set(None),
                    ..Default::default()
                },
                move |txn, order| {
                    let order_id = order.id;
                    Box::pin(async move {
                        copy_line_items(
                            txn,
                            (DocumentKind::Quote, quote_id),
                            (DocumentKind::SalesOrder, order_id),
                        )
                        .await?;
                        recalculate_in::<sales_order::Entity, _>(txn, order_id).await?;

                        let marked = quote::Entity::update_many()
                            .col_expr(quote::Column::Status, Expr::value(QuoteStatus::Converted))
                            .col_expr(
                                quote::Column::ConvertedSalesOrderId,
                                Expr::value(Some(order_id)),
                            )
                            .col_expr(quote::Column::UpdatedAt, Expr::value(Utc::now()))
                            .filter(quote::Column::Id.eq(quote_id))
                            .filter(quote::Column::Status.ne(QuoteStatus::Converted))
                            .exec(txn)
                            .await?;
                        if marked.rows_affected != 1 {
                            return Err(ServiceError::Conflict(format!(
                                "Quote {} was converted concurrently",
                                quote_id
                            )));
                        }
                        Ok(())
                    })
                },
            )
            .await?;

        info!(quote_id, sales_order_id = sales_order.id, number = %sales_order.number, "Quote converted");

        self.documents
            .document_created::<sales_order::Entity>(sales_order.id)
            .await?;
        self.documents
            .status_changed::<quote::Entity>(quote_id, quote.status, QuoteStatus::Converted)
            .await;
        self.documents
            .emit(Event::QuoteConverted {
                quote_id,
                sales_order_id: sales_order.id,
            })
            .await;

        Ok(QuoteConversion {
            quote: self.get_quote(quote_id).await?,
            sales_order: self
                .documents
                .fetch::<sales_order::Entity>(sales_order.id)
                .await?,
        })
    }
}
