mod common;

use assert_matches::assert_matches;
use chrono::{Datelike, Utc};
use sea_orm::sea_query::Expr;
use sea_orm::{ColumnTrait, EntityTrait, QueryFilter};
use tenantdesk::{
    entities::{invoice, quote},
    errors::ServiceError,
    services::quotes::NewQuote,
};

use common::TestApp;

fn quote_input(company_id: i32, created_by: i32) -> NewQuote {
    NewQuote {
        company_id,
        created_by,
        account_id: None,
        contact_id: None,
        opportunity_id: None,
        valid_until: None,
        notes: None,
        items: Vec::new(),
    }
}

#[tokio::test]
async fn invoices_are_numbered_per_year() {
    let app = TestApp::new().await;
    let company = app.company("Acme").await;
    let year = Utc::now().year();

    let first = app
        .services
        .invoices
        .create_invoice(TestApp::invoice_input(company.id, 1))
        .await
        .unwrap();
    let second = app
        .services
        .invoices
        .create_invoice(TestApp::invoice_input(company.id, 1))
        .await
        .unwrap();

    assert_eq!(first.number, format!("INV-{}-000001", year));
    assert_eq!(second.number, format!("INV-{}-000002", year));
}

#[tokio::test]
async fn yearly_sequence_ignores_other_years() {
    let app = TestApp::new().await;
    let company = app.company("Acme").await;
    let year = Utc::now().year();

    let first = app
        .services
        .invoices
        .create_invoice(TestApp::invoice_input(company.id, 1))
        .await
        .unwrap();
    invoice::Entity::update_many()
        .col_expr(
            invoice::Column::Number,
            Expr::value(format!("INV-{}-000041", year - 1)),
        )
        .filter(invoice::Column::Id.eq(first.id))
        .exec(&*app.db)
        .await
        .unwrap();

    let next = app
        .services
        .invoices
        .create_invoice(TestApp::invoice_input(company.id, 1))
        .await
        .unwrap();
    assert_eq!(next.number, format!("INV-{}-000001", year));
}

#[tokio::test]
async fn quotes_use_max_id_plus_one() {
    let app = TestApp::new().await;
    let company = app.company("Acme").await;

    let numbers: Vec<String> = {
        let mut out = Vec::new();
        for _ in 0..3 {
            let quote = app
                .services
                .quotes
                .create_quote(quote_input(company.id, 1))
                .await
                .unwrap();
            out.push(quote.number);
        }
        out
    };

    assert_eq!(numbers, vec!["QUO-000001", "QUO-000002", "QUO-000003"]);
}

#[tokio::test]
async fn colliding_number_is_retried_with_the_next_one() {
    let app = TestApp::new().await;
    let company = app.company("Acme").await;

    let first = app
        .services
        .quotes
        .create_quote(quote_input(company.id, 1))
        .await
        .unwrap();
    // occupy the number the next insert will compute
    quote::Entity::update_many()
        .col_expr(quote::Column::Number, Expr::value("QUO-000002"))
        .filter(quote::Column::Id.eq(first.id))
        .exec(&*app.db)
        .await
        .unwrap();

    let second = app
        .services
        .quotes
        .create_quote(quote_input(company.id, 1))
        .await
        .unwrap();
    assert_eq!(second.number, "QUO-000003");
}

#[tokio::test]
async fn exhausted_retries_report_a_conflict() {
    let app = TestApp::with_config(|cfg| cfg.numbering.max_attempts = 1).await;
    let company = app.company("Acme").await;

    let first = app
        .services
        .quotes
        .create_quote(quote_input(company.id, 1))
        .await
        .unwrap();
    quote::Entity::update_many()
        .col_expr(quote::Column::Number, Expr::value("QUO-000002"))
        .filter(quote::Column::Id.eq(first.id))
        .exec(&*app.db)
        .await
        .unwrap();

    let result = app
        .services
        .quotes
        .create_quote(quote_input(company.id, 1))
        .await;
    assert_matches!(result, Err(ServiceError::Conflict(_)));

    // the failed attempt left nothing behind
    let count = quote::Entity::find().all(&*app.db).await.unwrap().len();
    assert_eq!(count, 1);
}

#[tokio::test]
async fn custom_prefix_and_width_apply() {
    let app = TestApp::with_config(|cfg| {
        cfg.numbering.sales_order_prefix = "ORD/".to_string();
        cfg.numbering.width = 4;
    })
    .await;
    let company = app.company("Acme").await;

    let order = app
        .services
        .sales_orders
        .create_sales_order(tenantdesk::services::sales_orders::NewSalesOrder {
            company_id: company.id,
            created_by: 1,
            account_id: None,
            contact_id: None,
            order_date: None,
            shipping_address: None,
            shipping_amount: Default::default(),
            notes: None,
            items: Vec::new(),
        })
        .await
        .unwrap();
    assert_eq!(order.number, "ORD/0001");
}
