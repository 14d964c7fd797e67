mod common;

use assert_matches::assert_matches;
use rust_decimal_macros::dec;
use tenantdesk::{
    commands::{payments::HandleGatewayCallbackCommand, payments::RecordInvoicePaymentCommand, Command},
    entities::{
        invoice::{self, InvoiceStatus},
        invoice_payment::PaymentStatus,
        DiscountType,
    },
    errors::ServiceError,
    reconciliation::PaymentType,
    services::{
        documents::LineItemInput,
        payments::{Gateway, GatewayCallback, NewPayment},
    },
    totals::OrderDiscount,
};

use common::TestApp;

/// An invoice totalling exactly 100.
async fn hundred_invoice(app: &TestApp) -> i32 {
    let company = app.company("Acme").await;
    let service = app.product(company.id, "Consulting", dec!(100), None).await;
    let mut input = TestApp::invoice_input(company.id, 1);
    input.items = vec![LineItemInput::new(service.id, dec!(1))];
    let invoice = app.services.invoices.create_invoice(input).await.unwrap();
    assert_eq!(invoice.total_amount, dec!(100));
    invoice.id
}

fn manual(invoice_id: i32, amount: rust_decimal::Decimal) -> NewPayment {
    NewPayment {
        invoice_id,
        amount,
        payment_type: None,
        payment_method: "manual".into(),
        transaction_id: None,
        notes: None,
        created_by: Some(1),
    }
}

#[tokio::test]
async fn partial_then_final_payment_settles_invoice() {
    let app = TestApp::new().await;
    let invoice_id = hundred_invoice(&app).await;

    let first = app
        .services
        .payments
        .store_payment(manual(invoice_id, dec!(60)))
        .await
        .unwrap();
    assert!(!first.duplicate);
    assert_eq!(first.payment.payment_type, "partial");
    assert_eq!(first.summary.status, InvoiceStatus::PartiallyPaid);
    assert_eq!(first.summary.total_paid, dec!(60));
    assert_eq!(first.summary.remaining, dec!(40));
    assert!(first.summary.is_partially_paid);

    let second = app
        .services
        .payments
        .store_payment(manual(invoice_id, dec!(40)))
        .await
        .unwrap();
    assert_eq!(second.payment.payment_type, "full");
    assert_eq!(second.summary.status, InvoiceStatus::Paid);
    assert_eq!(second.summary.remaining, dec!(0));
    assert!(second.summary.is_fully_paid);

    let payments = app.services.invoices.payments(invoice_id).await.unwrap();
    assert_eq!(payments.len(), 2);

    app.settle().await;
    let names = app.events.names();
    assert_eq!(names.iter().filter(|n| **n == "payment_recorded").count(), 2);
    assert_eq!(
        names.iter().filter(|n| **n == "invoice_status_changed").count(),
        2
    );
}

#[tokio::test]
async fn overpayment_is_rejected() {
    let app = TestApp::new().await;
    let invoice_id = hundred_invoice(&app).await;
    app.services
        .payments
        .store_payment(manual(invoice_id, dec!(60)))
        .await
        .unwrap();

    let result = app
        .services
        .payments
        .store_payment(manual(invoice_id, dec!(50)))
        .await;
    assert_matches!(result, Err(ServiceError::ValidationError(msg)) if msg.contains("40"));

    let summary = app.services.invoices.payment_summary(invoice_id).await.unwrap();
    assert_eq!(summary.total_paid, dec!(60));
}

#[tokio::test]
async fn full_payment_must_match_the_balance() {
    let app = TestApp::new().await;
    let invoice_id = hundred_invoice(&app).await;

    let mut payment = manual(invoice_id, dec!(30));
    payment.payment_type = Some(PaymentType::Full);
    let result = app.services.payments.store_payment(payment).await;
    assert_matches!(result, Err(ServiceError::ValidationError(_)));

    let verdict = app
        .services
        .invoices
        .validate_payment_amount(invoice_id, dec!(30), PaymentType::Full)
        .await
        .unwrap();
    assert!(!verdict.valid);
    assert!(verdict.message.is_some());

    let verdict = app
        .services
        .invoices
        .validate_payment_amount(invoice_id, dec!(30), PaymentType::Partial)
        .await
        .unwrap();
    assert!(verdict.valid);

    let verdict = app
        .services
        .invoices
        .validate_payment_amount(invoice_id, dec!(100), PaymentType::Full)
        .await
        .unwrap();
    assert!(verdict.valid);
}

#[tokio::test]
async fn repeated_transaction_is_credited_once() {
    let app = TestApp::new().await;
    let invoice_id = hundred_invoice(&app).await;

    let mut payment = manual(invoice_id, dec!(25));
    payment.payment_method = "Stripe".into();
    payment.transaction_id = Some("ch_001".into());

    let first = app.services.payments.store_payment(payment.clone()).await.unwrap();
    let second = app.services.payments.store_payment(payment).await.unwrap();

    assert!(!first.duplicate);
    assert!(second.duplicate);
    assert_eq!(first.payment.id, second.payment.id);
    assert_eq!(first.payment.payment_method, "stripe");
    assert_eq!(second.summary.total_paid, dec!(25));
}

#[tokio::test]
async fn failed_callback_is_upgraded_when_the_charge_completes() {
    let app = TestApp::new().await;
    let invoice_id = hundred_invoice(&app).await;
    let callback = |status: &str| GatewayCallback {
        gateway: Gateway::Stripe,
        invoice_id,
        amount: dec!(100),
        status: status.to_string(),
        transaction_id: Some("pi_777".into()),
    };

    let failed = app
        .services
        .payments
        .handle_gateway_callback(callback("failed"))
        .await
        .unwrap();
    assert_eq!(failed.payment.status, PaymentStatus::Failed);
    assert_eq!(failed.summary.total_paid, dec!(0));
    assert_eq!(failed.summary.status, InvoiceStatus::Draft);

    let completed = app
        .services
        .payments
        .handle_gateway_callback(callback("succeeded"))
        .await
        .unwrap();
    assert_eq!(completed.payment.id, failed.payment.id);
    assert_eq!(completed.payment.status, PaymentStatus::Completed);
    assert_eq!(completed.summary.status, InvoiceStatus::Paid);

    // a late duplicate changes nothing
    let replay = app
        .services
        .payments
        .handle_gateway_callback(callback("succeeded"))
        .await
        .unwrap();
    assert!(replay.duplicate);
    assert_eq!(replay.summary.total_paid, dec!(100));

    app.settle().await;
    assert!(app.events.names().contains(&"payment_failed"));
}

#[tokio::test]
async fn unknown_gateway_status_is_kept_pending() {
    let app = TestApp::new().await;
    let invoice_id = hundred_invoice(&app).await;

    let command = HandleGatewayCallbackCommand {
        callback: GatewayCallback {
            gateway: Gateway::Xendit,
            invoice_id,
            amount: dec!(100),
            status: "awaiting_review".into(),
            transaction_id: Some("x-1".into()),
        },
    };
    let recorded = command
        .execute(app.db.clone(), app.event_sender.clone())
        .await
        .unwrap();

    assert_eq!(recorded.payment.status, PaymentStatus::Pending);
    let summary = app.services.invoices.payment_summary(invoice_id).await.unwrap();
    assert_eq!(summary.total_paid, dec!(0));
    assert_eq!(summary.remaining, dec!(100));
}

#[tokio::test]
async fn paid_and_cancelled_invoices_refuse_payments() {
    let app = TestApp::new().await;
    let invoice_id = hundred_invoice(&app).await;
    app.services
        .payments
        .store_payment(manual(invoice_id, dec!(100)))
        .await
        .unwrap();

    let result = app
        .services
        .payments
        .store_payment(manual(invoice_id, dec!(1)))
        .await;
    assert_matches!(result, Err(ServiceError::InvalidStatus(_)));

    let other = TestApp::invoice_input(
        app.services.invoices.get_invoice(invoice_id).await.unwrap().company_id,
        1,
    );
    let empty = app.services.invoices.create_invoice(other).await.unwrap();
    app.services
        .invoices
        .update_status(empty.id, InvoiceStatus::Cancelled)
        .await
        .unwrap();
    let result = app
        .services
        .payments
        .store_payment(manual(empty.id, dec!(1)))
        .await;
    assert_matches!(result, Err(ServiceError::InvalidStatus(_)));
}

#[tokio::test]
async fn payment_statuses_cannot_be_set_by_hand() {
    let app = TestApp::new().await;
    let invoice_id = hundred_invoice(&app).await;

    let result = app
        .services
        .invoices
        .update_status(invoice_id, InvoiceStatus::Paid)
        .await;
    assert_matches!(result, Err(ServiceError::InvalidStatus(_)));

    app.services
        .invoices
        .update_status(invoice_id, InvoiceStatus::Sent)
        .await
        .unwrap();
    app.services
        .payments
        .store_payment(manual(invoice_id, dec!(10)))
        .await
        .unwrap();

    let result = app
        .services
        .invoices
        .update_status(invoice_id, InvoiceStatus::Cancelled)
        .await;
    assert_matches!(result, Err(ServiceError::InvalidOperation(_)));
}

#[tokio::test]
async fn reconciliation_is_idempotent() {
    let app = TestApp::new().await;
    let invoice_id = hundred_invoice(&app).await;
    app.services
        .payments
        .store_payment(manual(invoice_id, dec!(60)))
        .await
        .unwrap();

    let first = app
        .services
        .invoices
        .update_payment_status(invoice_id)
        .await
        .unwrap();
    let second = app
        .services
        .invoices
        .update_payment_status(invoice_id)
        .await
        .unwrap();
    assert_eq!(first, second);
    assert_eq!(second.status, InvoiceStatus::PartiallyPaid);
}

#[tokio::test]
async fn record_payment_command_applies_the_payment() {
    let app = TestApp::new().await;
    let invoice_id = hundred_invoice(&app).await;

    let command = RecordInvoicePaymentCommand {
        invoice_id,
        amount: dec!(100),
        payment_type: Some(PaymentType::Full),
        payment_method: "bank_transfer".into(),
        transaction_id: Some("wire-42".into()),
        notes: Some("March retainer".into()),
        created_by: Some(1),
    };
    let recorded = command
        .execute(app.db.clone(), app.event_sender.clone())
        .await
        .unwrap();

    assert_eq!(recorded.summary.status, InvoiceStatus::Paid);
    assert_eq!(recorded.payment.notes.as_deref(), Some("March retainer"));

    let invalid = RecordInvoicePaymentCommand {
        payment_method: String::new(),
        ..command
    };
    let result = invalid
        .execute(app.db.clone(), app.event_sender.clone())
        .await;
    assert_matches!(result, Err(ServiceError::ValidationError(_)));
}

#[tokio::test]
async fn paid_invoice_lines_and_adjustments_are_frozen() {
    let app = TestApp::new().await;
    let invoice_id = hundred_invoice(&app).await;
    let company_id = app.services.invoices.get_invoice(invoice_id).await.unwrap().company_id;
    let extra = app.product(company_id, "Support", dec!(50), None).await;
    app.services
        .payments
        .store_payment(manual(invoice_id, dec!(100)))
        .await
        .unwrap();

    let documents = &app.services.documents;
    assert_matches!(
        documents
            .add_line_item::<invoice::Entity>(invoice_id, LineItemInput::new(extra.id, dec!(1)))
            .await,
        Err(ServiceError::InvalidStatus(_))
    );
    assert_matches!(
        documents.set_shipping::<invoice::Entity>(invoice_id, dec!(10)).await,
        Err(ServiceError::InvalidStatus(_))
    );
    let line = documents.line_items::<invoice::Entity>(invoice_id).await.unwrap()[0].clone();
    assert_matches!(
        documents.remove_line_item::<invoice::Entity>(invoice_id, line.id).await,
        Err(ServiceError::InvalidStatus(_))
    );
    assert_eq!(
        documents.calculate_totals::<invoice::Entity>(invoice_id).await.unwrap().total_amount,
        dec!(100)
    );

    let summary = app.services.invoices.payment_summary(invoice_id).await.unwrap();
    assert_eq!(summary.status, InvoiceStatus::Paid);
    assert_eq!(summary.total_amount, dec!(100));
    assert!(summary.is_fully_paid);
}

#[tokio::test]
async fn editing_an_open_invoice_rederives_its_payment_status() {
    let app = TestApp::new().await;
    let invoice_id = hundred_invoice(&app).await;
    let company_id = app.services.invoices.get_invoice(invoice_id).await.unwrap().company_id;
    let extra = app.product(company_id, "Support", dec!(50), None).await;
    app.services
        .payments
        .store_payment(manual(invoice_id, dec!(60)))
        .await
        .unwrap();
    let documents = &app.services.documents;

    // a discount that would leave the invoice overpaid is refused and rolled back
    let overshoot = documents
        .set_order_discount::<invoice::Entity>(
            invoice_id,
            OrderDiscount {
                discount_type: DiscountType::Fixed,
                value: dec!(50),
            },
        )
        .await;
    assert_matches!(overshoot, Err(ServiceError::InvalidOperation(_)));
    let summary = app.services.invoices.payment_summary(invoice_id).await.unwrap();
    assert_eq!(summary.total_amount, dec!(100));
    assert_eq!(summary.status, InvoiceStatus::PartiallyPaid);

    // raising the total keeps it partially paid with a larger balance
    let line = documents
        .add_line_item::<invoice::Entity>(invoice_id, LineItemInput::new(extra.id, dec!(1)))
        .await
        .unwrap();
    let summary = app.services.invoices.payment_summary(invoice_id).await.unwrap();
    assert_eq!(summary.status, InvoiceStatus::PartiallyPaid);
    assert_eq!(summary.remaining, dec!(90));

    // cutting it to exactly what was paid settles the invoice
    documents
        .remove_line_item::<invoice::Entity>(invoice_id, line.id)
        .await
        .unwrap();
    documents
        .set_order_discount::<invoice::Entity>(
            invoice_id,
            OrderDiscount {
                discount_type: DiscountType::Fixed,
                value: dec!(40),
            },
        )
        .await
        .unwrap();
    let summary = app.services.invoices.payment_summary(invoice_id).await.unwrap();
    assert_eq!(summary.total_amount, dec!(60));
    assert_eq!(summary.remaining, dec!(0));
    assert_eq!(summary.status, InvoiceStatus::Paid);

    app.settle().await;
    let changes = app
        .events
        .names()
        .iter()
        .filter(|n| **n == "invoice_status_changed")
        .count();
    // draft -> partially_paid on payment, partially_paid -> paid on the discount
    assert_eq!(changes, 2);
}
