mod common;

use assert_matches::assert_matches;
use rust_decimal_macros::dec;
use tenantdesk::{
    entities::{
        delivery_order, invoice, quote::QuoteStatus, sales_order::SalesOrderStatus, DiscountType,
        DocumentKind,
    },
    errors::ServiceError,
    services::{
        documents::LineItemInput,
        fulfillment::NewDeliveryOrder,
        quotes::NewQuote,
        sales_orders::{InvoiceFromOrder, NewSalesOrder},
    },
    totals::OrderDiscount,
};

use common::TestApp;

#[tokio::test]
async fn quote_converts_into_a_sales_order_once() {
    let app = TestApp::new().await;
    let company = app.company("Acme").await;
    let vat = app.tax(company.id, dec!(10)).await;
    let widget = app.product(company.id, "Widget", dec!(50), Some(vat.id)).await;

    let quote = app
        .services
        .quotes
        .create_quote(NewQuote {
            company_id: company.id,
            created_by: 1,
            account_id: None,
            contact_id: None,
            opportunity_id: None,
            valid_until: None,
            notes: Some("Spring offer".into()),
            items: vec![LineItemInput::new(widget.id, dec!(2))],
        })
        .await
        .unwrap();
    app.services
        .documents
        .set_order_discount::<tenantdesk::entities::quote::Entity>(
            quote.id,
            OrderDiscount {
                discount_type: DiscountType::Fixed,
                value: dec!(10),
            },
        )
        .await
        .unwrap();

    let conversion = app
        .services
        .quotes
        .convert_to_sales_order(quote.id, 1)
        .await
        .unwrap();

    assert_eq!(conversion.quote.status, QuoteStatus::Converted);
    assert_eq!(
        conversion.quote.converted_sales_order_id,
        Some(conversion.sales_order.id)
    );
    let order = &conversion.sales_order;
    assert_eq!(order.quote_id, Some(quote.id));
    assert_eq!(order.status, SalesOrderStatus::Draft);
    assert_eq!(order.subtotal, dec!(100));
    assert_eq!(order.tax_amount, dec!(10));
    assert_eq!(order.discount_amount, dec!(10));
    assert_eq!(order.total_amount, dec!(100));

    let lines = app
        .services
        .documents
        .line_items::<tenantdesk::entities::sales_order::Entity>(order.id)
        .await
        .unwrap();
    assert_eq!(lines.len(), 1);
    assert_eq!(lines[0].document_kind, DocumentKind::SalesOrder);
    assert_eq!(lines[0].quantity, dec!(2));

    let again = app.services.quotes.convert_to_sales_order(quote.id, 1).await;
    assert_matches!(again, Err(ServiceError::Conflict(_)));

    app.settle().await;
    assert!(app.events.names().contains(&"quote_converted"));
}

#[tokio::test]
async fn rejected_quote_cannot_be_converted() {
    let app = TestApp::new().await;
    let company = app.company("Acme").await;
    let quote = app
        .services
        .quotes
        .create_quote(NewQuote {
            company_id: company.id,
            created_by: 1,
            account_id: None,
            contact_id: None,
            opportunity_id: None,
            valid_until: None,
            notes: None,
            items: Vec::new(),
        })
        .await
        .unwrap();
    app.services
        .quotes
        .update_status(quote.id, QuoteStatus::Rejected)
        .await
        .unwrap();

    let result = app.services.quotes.convert_to_sales_order(quote.id, 1).await;
    assert_matches!(result, Err(ServiceError::InvalidStatus(_)));

    let manual = app
        .services
        .quotes
        .update_status(quote.id, QuoteStatus::Converted)
        .await;
    assert_matches!(manual, Err(ServiceError::InvalidStatus(_)));
}

#[tokio::test]
async fn sales_order_is_invoiced_once() {
    let app = TestApp::new().await;
    let company = app.company("Acme").await;
    let gadget = app.product(company.id, "Gadget", dec!(30), None).await;

    let order = app
        .services
        .sales_orders
        .create_sales_order(NewSalesOrder {
            company_id: company.id,
            created_by: 1,
            account_id: None,
            contact_id: None,
            order_date: None,
            shipping_address: Some("1 Harbour Road".into()),
            shipping_amount: dec!(5),
            notes: None,
            items: vec![LineItemInput::new(gadget.id, dec!(3))],
        })
        .await
        .unwrap();
    assert_eq!(order.total_amount, dec!(95));

    let invoice = app
        .services
        .sales_orders
        .create_invoice_from_sales_order(
            order.id,
            InvoiceFromOrder {
                created_by: 1,
                ..Default::default()
            },
        )
        .await
        .unwrap();

    assert_eq!(invoice.sales_order_id, Some(order.id));
    assert_eq!(invoice.shipping_amount, dec!(5));
    assert_eq!(invoice.total_amount, dec!(95));
    assert_eq!(invoice.currency, company.currency);
    let lines = app
        .services
        .documents
        .line_items::<invoice::Entity>(invoice.id)
        .await
        .unwrap();
    assert_eq!(lines.len(), 1);

    let order = app.services.sales_orders.get_sales_order(order.id).await.unwrap();
    assert_eq!(order.status, SalesOrderStatus::Invoiced);

    let again = app
        .services
        .sales_orders
        .create_invoice_from_sales_order(
            order.id,
            InvoiceFromOrder {
                created_by: 1,
                ..Default::default()
            },
        )
        .await;
    assert_matches!(again, Err(ServiceError::Conflict(_)));

    // an invoiced order cannot be walked back to be invoiced a second time
    let reopened = app
        .services
        .sales_orders
        .update_status(order.id, SalesOrderStatus::Confirmed)
        .await;
    assert_matches!(reopened, Err(ServiceError::InvalidStatus(_)));
    let order = app.services.sales_orders.get_sales_order(order.id).await.unwrap();
    assert_eq!(order.status, SalesOrderStatus::Invoiced);
    let third = app
        .services
        .sales_orders
        .create_invoice_from_sales_order(
            order.id,
            InvoiceFromOrder {
                created_by: 1,
                ..Default::default()
            },
        )
        .await;
    assert_matches!(third, Err(ServiceError::Conflict(_)));
}

#[tokio::test]
async fn delivery_order_copies_sales_order_lines() {
    let app = TestApp::new().await;
    let company = app.company("Acme").await;
    let gadget = app.product(company.id, "Gadget", dec!(30), None).await;

    let order = app
        .services
        .sales_orders
        .create_sales_order(NewSalesOrder {
            company_id: company.id,
            created_by: 1,
            account_id: None,
            contact_id: None,
            order_date: None,
            shipping_address: Some("1 Harbour Road".into()),
            shipping_amount: dec!(0),
            notes: None,
            items: vec![LineItemInput::new(gadget.id, dec!(2))],
        })
        .await
        .unwrap();

    let delivery = app
        .services
        .fulfillment
        .create_delivery_order(NewDeliveryOrder {
            company_id: company.id,
            created_by: 1,
            sales_order_id: Some(order.id),
            delivery_date: None,
            shipping_address: None,
            shipping_amount: dec!(7),
            notes: None,
            items: Vec::new(),
        })
        .await
        .unwrap();

    assert_eq!(delivery.shipping_address.as_deref(), Some("1 Harbour Road"));
    assert_eq!(delivery.subtotal, dec!(60));
    assert_eq!(delivery.total_amount, dec!(67));
    let lines = app
        .services
        .documents
        .line_items::<delivery_order::Entity>(delivery.id)
        .await
        .unwrap();
    assert_eq!(lines.len(), 1);
    assert_eq!(lines[0].product_id, gadget.id);
}

#[tokio::test]
async fn delivery_order_rejects_foreign_sales_order() {
    let app = TestApp::new().await;
    let company = app.company("Acme").await;
    let other = app.company("Other").await;

    let order = app
        .services
        .sales_orders
        .create_sales_order(NewSalesOrder {
            company_id: other.id,
            created_by: 1,
            account_id: None,
            contact_id: None,
            order_date: None,
            shipping_address: None,
            shipping_amount: dec!(0),
            notes: None,
            items: Vec::new(),
        })
        .await
        .unwrap();

    let result = app
        .services
        .fulfillment
        .create_delivery_order(NewDeliveryOrder {
            company_id: company.id,
            created_by: 1,
            sales_order_id: Some(order.id),
            delivery_date: None,
            shipping_address: None,
            shipping_amount: dec!(0),
            notes: None,
            items: Vec::new(),
        })
        .await;
    assert_matches!(result, Err(ServiceError::NotFound(_)));
}
