//! Behaviour shared by every sales document header: numbering on insert,
//! product lines and the totals roll-up.
//!
//! Header tables use identical column names, so one macro implements
//! [`DocumentEntity`] (and [`NumberedDocument`] where a `number` column
//! exists) for each of them. Lines for every kind live in
//! `document_line_items`, keyed by `(document_kind, document_id)`.

use async_trait::async_trait;
use chrono::{Datelike, Utc};
use futures::future::BoxFuture;
use metrics::counter;
use rust_decimal::Decimal;
use sea_orm::sea_query::Expr;
use sea_orm::{
    ActiveModelBehavior, ActiveModelTrait, ColumnTrait, ConnectionTrait, DatabaseTransaction,
    DbErr, EntityTrait, IntoActiveModel, QueryFilter, QueryOrder, QuerySelect, Set,
    TransactionTrait,
};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info, instrument, warn};
use validator::{Validate, ValidationError};

use crate::{
    db::DbPool,
    entities::{
        delivery_order,
        document_line_item::{self, DiscountType, DocumentKind},
        invoice, opportunity, product, purchase_order, quote, receipt_order, return_order,
        sales_order, tax,
    },
    errors::{is_unique_violation, ServiceError},
    events::{Event, EventSender},
    numbering::{next_from_max_id, next_yearly_sequence, NumberingScheme, NumberingStrategy},
    totals::{
        compute_document, compute_line, DocumentTotals, LineInput, LineTotals, OrderDiscount,
        TotalsPolicy,
    },
};

use super::invoicing::reconcile_in;
use super::publish;

/// Header fields the totals engine reads and writes.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DocumentHeader {
    pub kind: DocumentKind,
    pub id: i32,
    pub company_id: i32,
    pub number: Option<String>,
    pub status: String,
    pub shipping_amount: Decimal,
    pub order_discount: OrderDiscount,
    pub totals: DocumentTotals,
}

/// A header table whose rows own product lines and stored totals.
#[async_trait]
pub trait DocumentEntity: EntityTrait {
    const KIND: DocumentKind;
    const LABEL: &'static str;
    const POLICY: TotalsPolicy;

    fn model_id(model: &Self::Model) -> i32;

    async fn find_model<C: ConnectionTrait>(db: &C, id: i32) -> Result<Option<Self::Model>, DbErr>;

    async fn header<C: ConnectionTrait>(db: &C, id: i32) -> Result<Option<DocumentHeader>, DbErr>;

    async fn store_totals<C: ConnectionTrait>(
        db: &C,
        id: i32,
        totals: &DocumentTotals,
    ) -> Result<(), DbErr>;

    async fn store_adjustments<C: ConnectionTrait>(
        db: &C,
        id: i32,
        shipping: Decimal,
        discount: &OrderDiscount,
    ) -> Result<(), DbErr>;
}

/// A header table with a unique, generated `number` column.
#[async_trait]
pub trait NumberedDocument: DocumentEntity {
    async fn max_id<C: ConnectionTrait>(db: &C) -> Result<Option<i32>, DbErr>;

    async fn numbers_with_prefix<C: ConnectionTrait>(
        db: &C,
        prefix: &str,
    ) -> Result<Vec<String>, DbErr>;
}

macro_rules! document_entity {
    ($module:ident, $kind:ident, $label:literal, $policy:expr, number = $number:expr) => {
        #[async_trait]
        impl DocumentEntity for $module::Entity {
            const KIND: DocumentKind = DocumentKind::$kind;
            const LABEL: &'static str = $label;
            const POLICY: TotalsPolicy = $policy;

            fn model_id(model: &$module::Model) -> i32 {
                model.id
            }

            async fn find_model<C: ConnectionTrait>(
                db: &C,
                id: i32,
            ) -> Result<Option<$module::Model>, DbErr> {
                $module::Entity::find_by_id(id).one(db).await
            }

            async fn header<C: ConnectionTrait>(
                db: &C,
                id: i32,
            ) -> Result<Option<DocumentHeader>, DbErr> {
                let number = $number;
                Ok($module::Entity::find_by_id(id)
                    .one(db)
                    .await?
                    .map(|m| DocumentHeader {
                        kind: DocumentKind::$kind,
                        id: m.id,
                        company_id: m.company_id,
                        number: number(&m),
                        status: m.status.to_string(),
                        shipping_amount: m.shipping_amount,
                        order_discount: OrderDiscount {
                            discount_type: m.order_discount_type.clone(),
                            value: m.order_discount_value,
                        },
                        totals: DocumentTotals {
                            subtotal: m.subtotal,
                            discount_amount: m.discount_amount,
                            tax_amount: m.tax_amount,
                            shipping_amount: m.shipping_amount,
                            total_amount: m.total_amount,
                        },
                    }))
            }

            async fn store_totals<C: ConnectionTrait>(
                db: &C,
                id: i32,
                totals: &DocumentTotals,
            ) -> Result<(), DbErr> {
                $module::Entity::update_many()
                    .col_expr($module::Column::Subtotal, Expr::value(totals.subtotal))
                    .col_expr(
                        $module::Column::DiscountAmount,
                        Expr::value(totals.discount_amount),
                    )
                    .col_expr($module::Column::TaxAmount, Expr::value(totals.tax_amount))
                    .col_expr(
                        $module::Column::ShippingAmount,
                        Expr::value(totals.shipping_amount),
                    )
                    .col_expr($module::Column::TotalAmount, Expr::value(totals.total_amount))
                    .col_expr($module::Column::UpdatedAt, Expr::value(Utc::now()))
                    .filter($module::Column::Id.eq(id))
                    .exec(db)
                    .await?;
                Ok(())
            }

            async fn store_adjustments<C: ConnectionTrait>(
                db: &C,
                id: i32,
                shipping: Decimal,
                discount: &OrderDiscount,
            ) -> Result<(), DbErr> {
                $module::Entity::update_many()
                    .col_expr($module::Column::ShippingAmount, Expr::value(shipping))
                    .col_expr(
                        $module::Column::OrderDiscountType,
                        Expr::value(discount.discount_type.clone()),
                    )
                    .col_expr(
                        $module::Column::OrderDiscountValue,
                        Expr::value(discount.value),
                    )
                    .col_expr($module::Column::UpdatedAt, Expr::value(Utc::now()))
                    .filter($module::Column::Id.eq(id))
                    .exec(db)
                    .await?;
                Ok(())
            }
        }
    };
}

macro_rules! numbered_document {
    ($module:ident, $kind:ident, $label:literal, $policy:expr) => {
        document_entity!(
            $module,
            $kind,
            $label,
            $policy,
            number = |m: &$module::Model| Some(m.number.clone())
        );

        #[async_trait]
        impl NumberedDocument for $module::Entity {
            async fn max_id<C: ConnectionTrait>(db: &C) -> Result<Option<i32>, DbErr> {
                let max = $module::Entity::find()
                    .select_only()
                    .column_as($module::Column::Id.max(), "max_id")
                    .into_tuple::<Option<i32>>()
                    .one(db)
                    .await?;
                Ok(max.flatten())
            }

            async fn numbers_with_prefix<C: ConnectionTrait>(
                db: &C,
                prefix: &str,
            ) -> Result<Vec<String>, DbErr> {
                $module::Entity::find()
                    .select_only()
                    .column($module::Column::Number)
                    .filter($module::Column::Number.starts_with(prefix))
                    .into_tuple::<String>()
                    .all(db)
                    .await
            }
        }
    };
}

numbered_document!(
    quote,
    Quote,
    "Quote",
    TotalsPolicy {
        shipping: false,
        order_discount: true
    }
);
numbered_document!(
    sales_order,
    SalesOrder,
    "Sales order",
    TotalsPolicy {
        shipping: true,
        order_discount: true
    }
);
numbered_document!(
    purchase_order,
    PurchaseOrder,
    "Purchase order",
    TotalsPolicy {
        shipping: true,
        order_discount: false
    }
);
numbered_document!(
    invoice,
    Invoice,
    "Invoice",
    TotalsPolicy {
        shipping: true,
        order_discount: true
    }
);
numbered_document!(
    delivery_order,
    DeliveryOrder,
    "Delivery order",
    TotalsPolicy {
        shipping: true,
        order_discount: false
    }
);
numbered_document!(return_order, ReturnOrder, "Return order", TotalsPolicy::LINES_ONLY);
numbered_document!(receipt_order, ReceiptOrder, "Receipt order", TotalsPolicy::LINES_ONLY);
document_entity!(
    opportunity,
    Opportunity,
    "Opportunity",
    TotalsPolicy::LINES_ONLY,
    number = |_: &opportunity::Model| None
);

/// Totals policy for a document kind.
pub fn policy_for(kind: DocumentKind) -> TotalsPolicy {
    match kind {
        DocumentKind::Quote => <quote::Entity as DocumentEntity>::POLICY,
        DocumentKind::SalesOrder => <sales_order::Entity as DocumentEntity>::POLICY,
        DocumentKind::PurchaseOrder => <purchase_order::Entity as DocumentEntity>::POLICY,
        DocumentKind::Invoice => <invoice::Entity as DocumentEntity>::POLICY,
        DocumentKind::DeliveryOrder => <delivery_order::Entity as DocumentEntity>::POLICY,
        DocumentKind::ReturnOrder => <return_order::Entity as DocumentEntity>::POLICY,
        DocumentKind::ReceiptOrder => <receipt_order::Entity as DocumentEntity>::POLICY,
        DocumentKind::Opportunity => <opportunity::Entity as DocumentEntity>::POLICY,
    }
}

/// Statuses after which a document's lines, shipping and order discount are
/// frozen.
pub fn is_closed(kind: DocumentKind, status: &str) -> bool {
    let closed: &[&str] = match kind {
        DocumentKind::Quote => &["converted"],
        DocumentKind::SalesOrder => &["invoiced", "cancelled"],
        DocumentKind::PurchaseOrder => &["received", "cancelled"],
        DocumentKind::Invoice => &["paid", "cancelled"],
        DocumentKind::DeliveryOrder => &["delivered", "cancelled"],
        DocumentKind::ReturnOrder => &["refunded", "rejected"],
        DocumentKind::ReceiptOrder => &["received", "cancelled"],
        DocumentKind::Opportunity => &[],
    };
    closed.contains(&status)
}

fn ensure_open<E: DocumentEntity>(header: &DocumentHeader) -> Result<(), ServiceError> {
    if !is_closed(E::KIND, &header.status) {
        return Ok(());
    }
    let name = header
        .number
        .clone()
        .unwrap_or_else(|| format!("#{}", header.id));
    Err(ServiceError::InvalidStatus(format!(
        "{} {} is {} and can no longer be changed",
        E::LABEL,
        name,
        header.status
    )))
}

pub(crate) fn validate_positive(value: &Decimal) -> Result<(), ValidationError> {
    if *value > Decimal::ZERO {
        Ok(())
    } else {
        Err(ValidationError::new("must_be_positive"))
    }
}

pub(crate) fn validate_non_negative(value: &Decimal) -> Result<(), ValidationError> {
    if *value >= Decimal::ZERO {
        Ok(())
    } else {
        Err(ValidationError::new("must_not_be_negative"))
    }
}

/// A product line to attach to a document.
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct LineItemInput {
    pub product_id: i32,
    pub description: Option<String>,
    #[validate(custom = "validate_positive")]
    pub quantity: Decimal,
    /// Defaults to the product's list price
    #[validate(custom = "validate_non_negative")]
    pub unit_price: Option<Decimal>,
    #[serde(default)]
    pub discount_type: DiscountType,
    #[serde(default)]
    #[validate(custom = "validate_non_negative")]
    pub discount_value: Decimal,
}

impl LineItemInput {
    pub fn new(product_id: i32, quantity: Decimal) -> Self {
        Self {
            product_id,
            description: None,
            quantity,
            unit_price: None,
            discount_type: DiscountType::None,
            discount_value: Decimal::ZERO,
        }
    }

    pub fn with_unit_price(mut self, unit_price: Decimal) -> Self {
        self.unit_price = Some(unit_price);
        self
    }

    pub fn with_discount(mut self, discount_type: DiscountType, value: Decimal) -> Self {
        self.discount_type = discount_type;
        self.discount_value = value;
        self
    }
}

fn validate_discount(discount_type: &DiscountType, value: Decimal) -> Result<(), ServiceError> {
    if value < Decimal::ZERO {
        return Err(ServiceError::ValidationError(
            "Discount value must not be negative".to_string(),
        ));
    }
    if *discount_type == DiscountType::Percentage && value > Decimal::ONE_HUNDRED {
        return Err(ServiceError::ValidationError(
            "Percentage discount must not exceed 100".to_string(),
        ));
    }
    Ok(())
}

/// Computes the next number for `E` under `scheme`. `offset` skips ahead on
/// retries so a number taken outside the sequence cannot block inserts.
pub async fn next_number<E, C>(
    db: &C,
    scheme: &NumberingScheme,
    year: i32,
    offset: u64,
) -> Result<String, DbErr>
where
    E: NumberedDocument,
    C: ConnectionTrait,
{
    let sequence = match scheme.strategy {
        NumberingStrategy::MaxIdPlusOne => next_from_max_id(E::max_id(db).await?),
        NumberingStrategy::YearlySequence => {
            let prefix = scheme.prefix_for(year);
            let existing = E::numbers_with_prefix(db, &prefix).await?;
            next_yearly_sequence(existing.iter().map(String::as_str), &prefix)
        }
    };
    Ok(scheme.render(year, sequence + offset))
}

pub(crate) async fn load_header<E, C>(db: &C, id: i32) -> Result<DocumentHeader, ServiceError>
where
    E: DocumentEntity,
    C: ConnectionTrait,
{
    E::header(db, id)
        .await?
        .ok_or_else(|| ServiceError::not_found(E::LABEL, id))
}

/// Loads a header and checks that it belongs to `company_id`. Documents of
/// other tenants are reported as missing.
pub(crate) async fn owned_header<E, C>(
    db: &C,
    company_id: i32,
    id: i32,
) -> Result<DocumentHeader, ServiceError>
where
    E: DocumentEntity,
    C: ConnectionTrait,
{
    let header = load_header::<E, _>(db, id).await?;
    if header.company_id != company_id {
        return Err(ServiceError::not_found(E::LABEL, id));
    }
    Ok(header)
}

pub(crate) async fn lines_of<C: ConnectionTrait>(
    db: &C,
    kind: DocumentKind,
    document_id: i32,
) -> Result<Vec<document_line_item::Model>, DbErr> {
    document_line_item::Entity::find()
        .filter(document_line_item::Column::DocumentKind.eq(kind))
        .filter(document_line_item::Column::DocumentId.eq(document_id))
        .order_by_asc(document_line_item::Column::Id)
        .all(db)
        .await
}

/// Tax rate (percent) per product id; products without a tax map to `None`.
async fn tax_rates<C: ConnectionTrait>(
    db: &C,
    product_ids: Vec<i32>,
) -> Result<HashMap<i32, Option<Decimal>>, DbErr> {
    if product_ids.is_empty() {
        return Ok(HashMap::new());
    }
    let rows = product::Entity::find()
        .filter(product::Column::Id.is_in(product_ids))
        .find_also_related(tax::Entity)
        .all(db)
        .await?;
    Ok(rows
        .into_iter()
        .map(|(p, t)| (p.id, t.map(|t| t.rate)))
        .collect())
}

/// Recomputes line snapshots and header totals for one document inside `db`.
pub(crate) async fn recalculate_in<E, C>(db: &C, id: i32) -> Result<DocumentTotals, ServiceError>
where
    E: DocumentEntity,
    C: ConnectionTrait,
{
    let header = load_header::<E, _>(db, id).await?;
    let lines = lines_of(db, E::KIND, id).await?;
    let rates = tax_rates(db, lines.iter().map(|l| l.product_id).collect()).await?;

    let mut computed: Vec<LineTotals> = Vec::with_capacity(lines.len());
    for line in lines {
        let tax_rate = rates.get(&line.product_id).copied().flatten();
        let totals = compute_line(&LineInput {
            quantity: line.quantity,
            unit_price: line.unit_price,
            discount_type: line.discount_type.clone(),
            discount_value: line.discount_value,
            tax_rate,
        });
        let rate = tax_rate.unwrap_or(Decimal::ZERO);

        if line.discount_amount != totals.discount_amount
            || line.tax_rate != rate
            || line.tax_amount != totals.tax_amount
            || line.total_price != totals.net
        {
            let mut active = line.into_active_model();
            active.discount_amount = Set(totals.discount_amount);
            active.tax_rate = Set(rate);
            active.tax_amount = Set(totals.tax_amount);
            active.total_price = Set(totals.net);
            active.updated_at = Set(Some(Utc::now()));
            active.update(db).await?;
        }
        computed.push(totals);
    }

    let totals = compute_document(
        &computed,
        header.shipping_amount,
        &header.order_discount,
        E::POLICY,
    );
    if totals != header.totals {
        E::store_totals(db, id, &totals).await?;
    }
    Ok(totals)
}

/// Inserts one product line on an existing document inside `db`. The
/// product must belong to the document's company. Totals are not refreshed.
pub(crate) async fn insert_line_in<E, C>(
    db: &C,
    document_id: i32,
    input: LineItemInput,
) -> Result<document_line_item::Model, ServiceError>
where
    E: DocumentEntity,
    C: ConnectionTrait,
{
    input.validate()?;
    validate_discount(&input.discount_type, input.discount_value)?;

    let header = load_header::<E, _>(db, document_id).await?;
    let product = product::Entity::find_by_id(input.product_id)
        .one(db)
        .await?
        .filter(|p| p.company_id == header.company_id)
        .ok_or_else(|| ServiceError::not_found("Product", input.product_id))?;

    let unit_price = input.unit_price.unwrap_or(product.price);
    let line = document_line_item::ActiveModel {
        document_kind: Set(E::KIND),
        document_id: Set(document_id),
        product_id: Set(product.id),
        description: Set(input.description.or(product.description)),
        quantity: Set(input.quantity),
        unit_price: Set(unit_price),
        discount_type: Set(input.discount_type),
        discount_value: Set(input.discount_value),
        discount_amount: Set(Decimal::ZERO),
        tax_rate: Set(Decimal::ZERO),
        tax_amount: Set(Decimal::ZERO),
        total_price: Set(Decimal::ZERO),
        created_at: Set(Utc::now()),
        updated_at: Set(None),
        ..Default::default()
    }
    .insert(db)
    .await?;

    Ok(line)
}

/// Where the lines of a freshly created document come from.
#[derive(Debug, Clone, Default)]
pub enum LineSource {
    #[default]
    Empty,
    Items(Vec<LineItemInput>),
    /// Copy the lines of an existing document.
    CopyFrom(DocumentKind, i32),
}

pub(crate) async fn fill_lines<E, C>(db: &C, id: i32, source: LineSource) -> Result<(), ServiceError>
where
    E: DocumentEntity,
    C: ConnectionTrait,
{
    match source {
        LineSource::Empty => {}
        LineSource::Items(items) => {
            for item in items {
                insert_line_in::<E, _>(db, id, item).await?;
            }
        }
        LineSource::CopyFrom(kind, source_id) => {
            copy_line_items(db, (kind, source_id), (E::KIND, id)).await?;
        }
    }
    recalculate_in::<E, _>(db, id).await?;
    Ok(())
}

/// Copies every line of one document onto another. Returns the number of
/// lines copied. Snapshots are refreshed by the next recalculation.
pub(crate) async fn copy_line_items<C: ConnectionTrait>(
    db: &C,
    from: (DocumentKind, i32),
    to: (DocumentKind, i32),
) -> Result<usize, DbErr> {
    let lines = lines_of(db, from.0, from.1).await?;
    let now = Utc::now();
    let count = lines.len();
    for line in lines {
        document_line_item::ActiveModel {
            document_kind: Set(to.0),
            document_id: Set(to.1),
            product_id: Set(line.product_id),
            description: Set(line.description),
            quantity: Set(line.quantity),
            unit_price: Set(line.unit_price),
            discount_type: Set(line.discount_type),
            discount_value: Set(line.discount_value),
            discount_amount: Set(line.discount_amount),
            tax_rate: Set(line.tax_rate),
            tax_amount: Set(line.tax_amount),
            total_price: Set(line.total_price),
            created_at: Set(now),
            updated_at: Set(None),
            ..Default::default()
        }
        .insert(db)
        .await?;
    }
    debug!(from = ?from, to = ?to, count, "Copied line items");
    Ok(count)
}

/// Product lines, totals and numbering for every document kind.
#[derive(Clone)]
pub struct DocumentService {
    db_pool: Arc<DbPool>,
    event_sender: Option<Arc<EventSender>>,
    max_attempts: u32,
}

impl DocumentService {
    pub fn new(
        db_pool: Arc<DbPool>,
        event_sender: Option<Arc<EventSender>>,
        max_attempts: u32,
    ) -> Self {
        Self {
            db_pool,
            event_sender,
            max_attempts: max_attempts.max(1),
        }
    }

    /// Inserts a numbered header. The number is computed and the row inserted
    /// in one transaction; a unique-index collision rolls back and retries.
    pub async fn insert_numbered<E, A, F>(
        &self,
        scheme: &NumberingScheme,
        build: F,
    ) -> Result<E::Model, ServiceError>
    where
        E: NumberedDocument,
        A: ActiveModelTrait<Entity = E> + ActiveModelBehavior + Send,
        E::Model: IntoActiveModel<A>,
        F: Fn(String) -> A + Send + Sync,
    {
        self.insert_numbered_with(scheme, build, |_, _| Box::pin(async { Ok(()) }))
            .await
    }

    /// Like [`Self::insert_numbered`], running `after` in the same transaction
    /// once the header row exists. Lines, conversions and back-references
    /// therefore commit or roll back together with the number.
    #[instrument(skip(self, scheme, build, after), fields(kind = %E::KIND))]
    pub async fn insert_numbered_with<E, A, F, G>(
        &self,
        scheme: &NumberingScheme,
        build: F,
        after: G,
    ) -> Result<E::Model, ServiceError>
    where
        E: NumberedDocument,
        A: ActiveModelTrait<Entity = E> + ActiveModelBehavior + Send,
        E::Model: IntoActiveModel<A>,
        F: Fn(String) -> A + Send + Sync,
        G: for<'c> Fn(
                &'c DatabaseTransaction,
                &'c E::Model,
            ) -> BoxFuture<'c, Result<(), ServiceError>>
            + Send
            + Sync,
    {
        let db = &*self.db_pool;
        let year = Utc::now().year();

        for attempt in 1..=self.max_attempts {
            let txn = db.begin().await?;
            let number =
                next_number::<E, _>(&txn, scheme, year, u64::from(attempt - 1)).await?;

            match build(number.clone()).insert(&txn).await {
                Ok(model) => {
                    after(&txn, &model).await?;
                    txn.commit().await?;
                    counter!("tenantdesk_documents_created_total", 1, "kind" => E::KIND.to_string());
                    info!(number = %number, attempt, "Document number assigned");
                    return Ok(model);
                }
                Err(err) if is_unique_violation(&err) => {
                    txn.rollback().await?;
                    counter!("tenantdesk_numbering_retries_total", 1, "kind" => E::KIND.to_string());
                    warn!(number = %number, attempt, "Document number collision; retrying");
                }
                Err(err) => return Err(err.into()),
            }
        }

        Err(ServiceError::Conflict(format!(
            "Could not assign a unique {} number after {} attempts",
            E::LABEL.to_lowercase(),
            self.max_attempts
        )))
    }

    /// Creates a numbered document together with its lines and totals.
    pub async fn create_document<E, A, F>(
        &self,
        scheme: &NumberingScheme,
        build: F,
        lines: LineSource,
    ) -> Result<E::Model, ServiceError>
    where
        E: NumberedDocument,
        A: ActiveModelTrait<Entity = E> + ActiveModelBehavior + Send,
        E::Model: IntoActiveModel<A>,
        F: Fn(String) -> A + Send + Sync,
    {
        if let LineSource::Items(items) = &lines {
            for item in items {
                item.validate()?;
            }
        }

        let created = self
            .insert_numbered_with::<E, A, F, _>(scheme, build, |txn, model| {
                let id = E::model_id(model);
                let lines = lines.clone();
                Box::pin(async move { fill_lines::<E, _>(txn, id, lines).await })
            })
            .await?;

        let id = E::model_id(&created);
        self.document_created::<E>(id).await?;
        self.fetch::<E>(id).await
    }

    /// Loads a header row by id.
    pub async fn fetch<E: DocumentEntity>(&self, id: i32) -> Result<E::Model, ServiceError> {
        E::find_model(&*self.db_pool, id)
            .await?
            .ok_or_else(|| ServiceError::not_found(E::LABEL, id))
    }

    /// Publishes a creation event carrying the assigned number.
    pub(crate) async fn document_created<E: DocumentEntity>(
        &self,
        id: i32,
    ) -> Result<(), ServiceError> {
        let header = self.header::<E>(id).await?;
        publish(
            &self.event_sender,
            Event::DocumentCreated {
                kind: E::KIND,
                id,
                number: header.number,
            },
        )
        .await;
        Ok(())
    }

    pub(crate) async fn status_changed<E: DocumentEntity>(
        &self,
        id: i32,
        old_status: impl ToString,
        new_status: impl ToString,
    ) {
        publish(
            &self.event_sender,
            Event::DocumentStatusChanged {
                kind: E::KIND,
                id,
                old_status: old_status.to_string(),
                new_status: new_status.to_string(),
            },
        )
        .await;
    }

    pub(crate) async fn emit(&self, event: Event) {
        publish(&self.event_sender, event).await;
    }

    pub fn db(&self) -> &DbPool {
        &self.db_pool
    }

    pub async fn header<E: DocumentEntity>(&self, id: i32) -> Result<DocumentHeader, ServiceError> {
        load_header::<E, _>(&*self.db_pool, id).await
    }

    pub async fn line_items<E: DocumentEntity>(
        &self,
        document_id: i32,
    ) -> Result<Vec<document_line_item::Model>, ServiceError> {
        let db = &*self.db_pool;
        load_header::<E, _>(db, document_id).await?;
        Ok(lines_of(db, E::KIND, document_id).await?)
    }

    #[instrument(skip(self, input), fields(kind = %E::KIND, product_id = input.product_id))]
    pub async fn add_line_item<E: DocumentEntity>(
        &self,
        document_id: i32,
        input: LineItemInput,
    ) -> Result<document_line_item::Model, ServiceError> {
        let txn = self.db_pool.begin().await?;
        ensure_open::<E>(&load_header::<E, _>(&txn, document_id).await?)?;
        let line = insert_line_in::<E, _>(&txn, document_id, input).await?;
        let (totals, status_event) = self.apply_change_in::<E>(&txn, document_id).await?;
        let line = self.owned_line::<E, _>(&txn, document_id, line.id).await?;
        txn.commit().await?;

        info!(line_id = line.id, total_amount = %totals.total_amount, "Line item added");
        self.changes_committed::<E>(document_id, &totals, status_event).await;
        Ok(line)
    }

    #[instrument(skip(self, input), fields(kind = %E::KIND))]
    pub async fn update_line_item<E: DocumentEntity>(
        &self,
        document_id: i32,
        line_id: i32,
        input: LineItemInput,
    ) -> Result<document_line_item::Model, ServiceError> {
        input.validate()?;
        validate_discount(&input.discount_type, input.discount_value)?;

        let txn = self.db_pool.begin().await?;
        ensure_open::<E>(&load_header::<E, _>(&txn, document_id).await?)?;
        let line = self.owned_line::<E, _>(&txn, document_id, line_id).await?;
        if line.product_id != input.product_id {
            return Err(ServiceError::InvalidInput(
                "A line item's product cannot be changed; remove it and add a new line".into(),
            ));
        }

        let mut active = line.clone().into_active_model();
        active.quantity = Set(input.quantity);
        active.unit_price = Set(input.unit_price.unwrap_or(line.unit_price));
        active.discount_type = Set(input.discount_type);
        active.discount_value = Set(input.discount_value);
        if input.description.is_some() {
            active.description = Set(input.description);
        }
        active.updated_at = Set(Some(Utc::now()));
        active.update(&txn).await?;

        let (totals, status_event) = self.apply_change_in::<E>(&txn, document_id).await?;
        let line = self.owned_line::<E, _>(&txn, document_id, line_id).await?;
        txn.commit().await?;

        self.changes_committed::<E>(document_id, &totals, status_event).await;
        Ok(line)
    }

    #[instrument(skip(self), fields(kind = %E::KIND))]
    pub async fn remove_line_item<E: DocumentEntity>(
        &self,
        document_id: i32,
        line_id: i32,
    ) -> Result<DocumentTotals, ServiceError> {
        let txn = self.db_pool.begin().await?;
        ensure_open::<E>(&load_header::<E, _>(&txn, document_id).await?)?;
        let line = self.owned_line::<E, _>(&txn, document_id, line_id).await?;
        document_line_item::Entity::delete_by_id(line.id)
            .exec(&txn)
            .await?;
        let (totals, status_event) = self.apply_change_in::<E>(&txn, document_id).await?;
        txn.commit().await?;

        info!(document_id, line_id, "Line item removed");
        self.changes_committed::<E>(document_id, &totals, status_event).await;
        Ok(totals)
    }

    /// [`Self::calculate_totals`] for a kind only known at runtime.
    pub async fn calculate_totals_for(
        &self,
        kind: DocumentKind,
        document_id: i32,
    ) -> Result<DocumentTotals, ServiceError> {
        match kind {
            DocumentKind::Quote => self.calculate_totals::<quote::Entity>(document_id).await,
            DocumentKind::SalesOrder => {
                self.calculate_totals::<sales_order::Entity>(document_id).await
            }
            DocumentKind::PurchaseOrder => {
                self.calculate_totals::<purchase_order::Entity>(document_id).await
            }
            DocumentKind::Invoice => self.calculate_totals::<invoice::Entity>(document_id).await,
            DocumentKind::DeliveryOrder => {
                self.calculate_totals::<delivery_order::Entity>(document_id).await
            }
            DocumentKind::ReturnOrder => {
                self.calculate_totals::<return_order::Entity>(document_id).await
            }
            DocumentKind::ReceiptOrder => {
                self.calculate_totals::<receipt_order::Entity>(document_id).await
            }
            DocumentKind::Opportunity => {
                self.calculate_totals::<opportunity::Entity>(document_id).await
            }
        }
    }

    /// Recomputes and persists a document's totals. Calling it twice without
    /// intervening changes yields the same result and writes nothing. Closed
    /// documents keep their stored totals.
    #[instrument(skip(self), fields(kind = %E::KIND))]
    pub async fn calculate_totals<E: DocumentEntity>(
        &self,
        document_id: i32,
    ) -> Result<DocumentTotals, ServiceError> {
        let txn = self.db_pool.begin().await?;
        let header = load_header::<E, _>(&txn, document_id).await?;
        if is_closed(E::KIND, &header.status) {
            debug!(status = %header.status, "Totals frozen on closed document");
            return Ok(header.totals);
        }
        let (totals, status_event) = self.apply_change_in::<E>(&txn, document_id).await?;
        txn.commit().await?;

        debug!(
            subtotal = %totals.subtotal,
            tax_amount = %totals.tax_amount,
            total_amount = %totals.total_amount,
            "Totals calculated"
        );
        self.changes_committed::<E>(document_id, &totals, status_event).await;
        Ok(totals)
    }

    #[instrument(skip(self), fields(kind = %E::KIND))]
    pub async fn set_shipping<E: DocumentEntity>(
        &self,
        document_id: i32,
        amount: Decimal,
    ) -> Result<DocumentTotals, ServiceError> {
        if !E::POLICY.shipping {
            return Err(ServiceError::InvalidOperation(format!(
                "{} documents do not carry a shipping charge",
                E::LABEL
            )));
        }
        if amount < Decimal::ZERO {
            return Err(ServiceError::ValidationError(
                "Shipping amount must not be negative".to_string(),
            ));
        }

        let txn = self.db_pool.begin().await?;
        let header = load_header::<E, _>(&txn, document_id).await?;
        ensure_open::<E>(&header)?;
        E::store_adjustments(&txn, document_id, amount, &header.order_discount).await?;
        let (totals, status_event) = self.apply_change_in::<E>(&txn, document_id).await?;
        txn.commit().await?;

        self.changes_committed::<E>(document_id, &totals, status_event).await;
        Ok(totals)
    }

    #[instrument(skip(self, discount), fields(kind = %E::KIND))]
    pub async fn set_order_discount<E: DocumentEntity>(
        &self,
        document_id: i32,
        discount: OrderDiscount,
    ) -> Result<DocumentTotals, ServiceError> {
        if !E::POLICY.order_discount {
            return Err(ServiceError::InvalidOperation(format!(
                "{} documents do not accept an order-level discount",
                E::LABEL
            )));
        }
        validate_discount(&discount.discount_type, discount.value)?;

        let txn = self.db_pool.begin().await?;
        let header = load_header::<E, _>(&txn, document_id).await?;
        ensure_open::<E>(&header)?;
        E::store_adjustments(&txn, document_id, header.shipping_amount, &discount).await?;
        let (totals, status_event) = self.apply_change_in::<E>(&txn, document_id).await?;
        txn.commit().await?;

        self.changes_committed::<E>(document_id, &totals, status_event).await;
        Ok(totals)
    }

    async fn owned_line<E: DocumentEntity, C: ConnectionTrait>(
        &self,
        db: &C,
        document_id: i32,
        line_id: i32,
    ) -> Result<document_line_item::Model, ServiceError> {
        document_line_item::Entity::find_by_id(line_id)
            .one(db)
            .await?
            .filter(|l| l.document_kind == E::KIND && l.document_id == document_id)
            .ok_or_else(|| ServiceError::not_found("Line item", line_id))
    }

    /// Recalculates after an edit. An invoice's payment status is derived
    /// again from the new total, which may not drop below what is paid.
    async fn apply_change_in<E: DocumentEntity>(
        &self,
        txn: &DatabaseTransaction,
        document_id: i32,
    ) -> Result<(DocumentTotals, Option<Event>), ServiceError> {
        let totals = recalculate_in::<E, _>(txn, document_id).await?;
        if E::KIND != DocumentKind::Invoice {
            return Ok((totals, None));
        }

        let reconciled = reconcile_in(txn, document_id).await?;
        if reconciled.ledger.total_paid() > totals.total_amount {
            return Err(ServiceError::InvalidOperation(format!(
                "Invoice {} total {} would fall below the {} already paid",
                reconciled.invoice.number,
                totals.total_amount,
                reconciled.ledger.total_paid()
            )));
        }
        let status_event = reconciled.changed().then(|| Event::InvoiceStatusChanged {
            invoice_id: document_id,
            old_status: reconciled.old_status,
            new_status: reconciled.invoice.status,
        });
        Ok((totals, status_event))
    }

    async fn changes_committed<E: DocumentEntity>(
        &self,
        id: i32,
        totals: &DocumentTotals,
        status_event: Option<Event>,
    ) {
        self.totals_changed::<E>(id, totals).await;
        if let Some(event) = status_event {
            publish(&self.event_sender, event).await;
        }
    }

    async fn totals_changed<E: DocumentEntity>(&self, id: i32, totals: &DocumentTotals) {
        publish(
            &self.event_sender,
            Event::DocumentTotalsRecalculated {
                kind: E::KIND,
                id,
                total_amount: totals.total_amount,
            },
        )
        .await;
    }
}
