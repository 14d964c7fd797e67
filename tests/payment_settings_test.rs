mod common;

use std::collections::BTreeMap;

use assert_matches::assert_matches;
use chrono::Utc;
use sea_orm::{ActiveModelTrait, ColumnTrait, EntityTrait, QueryFilter, Set};
use tenantdesk::{
    crypto::SettingsCipher, entities::payment_setting, errors::ServiceError,
};

use common::{TestApp, TEST_SETTINGS_KEY};

async fn stored_value(app: &TestApp, company_id: i32, key: &str) -> String {
    payment_setting::Entity::find()
        .filter(payment_setting::Column::CompanyId.eq(company_id))
        .filter(payment_setting::Column::Key.eq(key))
        .one(&*app.db)
        .await
        .unwrap()
        .expect("setting row")
        .value
}

#[tokio::test]
async fn sensitive_values_are_encrypted_at_rest() {
    let app = TestApp::new().await;
    let company = app.company("Acme").await;
    let settings = &app.services.payment_settings;

    settings
        .set_setting(company.id, "stripe_secret", "sk_test_51H8abc")
        .await
        .unwrap();

    let raw = stored_value(&app, company.id, "stripe_secret").await;
    assert_ne!(raw, "sk_test_51H8abc");
    let cipher = SettingsCipher::from_secret(TEST_SETTINGS_KEY).unwrap();
    assert_eq!(cipher.decrypt(&raw).unwrap(), "sk_test_51H8abc");

    let read = settings.get_setting(company.id, "stripe_secret").await.unwrap();
    assert_eq!(read.as_deref(), Some("sk_test_51H8abc"));
}

#[tokio::test]
async fn flags_and_public_values_stay_plain() {
    let app = TestApp::new().await;
    let company = app.company("Acme").await;
    let settings = &app.services.payment_settings;

    settings
        .set_setting(company.id, "is_stripe_enabled", "on")
        .await
        .unwrap();
    settings
        .set_setting(company.id, "currency_symbol", "$")
        .await
        .unwrap();
    // boolean literal under a sensitive key is not worth encrypting
    settings
        .set_setting(company.id, "stripe_key", "false")
        .await
        .unwrap();

    assert_eq!(stored_value(&app, company.id, "is_stripe_enabled").await, "on");
    assert_eq!(stored_value(&app, company.id, "currency_symbol").await, "$");
    assert_eq!(stored_value(&app, company.id, "stripe_key").await, "false");
}

#[tokio::test]
async fn legacy_plaintext_reads_back_unchanged() {
    let app = TestApp::new().await;
    let company = app.company("Acme").await;

    payment_setting::ActiveModel {
        company_id: Set(company.id),
        key: Set("paypal_secret_key".to_string()),
        value: Set("legacy-plain-secret".to_string()),
        created_at: Set(Utc::now()),
        updated_at: Set(None),
        ..Default::default()
    }
    .insert(&*app.db)
    .await
    .unwrap();

    let value = app
        .services
        .payment_settings
        .get_setting(company.id, "paypal_secret_key")
        .await
        .unwrap();
    assert_eq!(value.as_deref(), Some("legacy-plain-secret"));
}

#[tokio::test]
async fn bulk_update_is_atomic_and_decrypted_on_listing() {
    let app = TestApp::new().await;
    let company = app.company("Acme").await;
    let settings = &app.services.payment_settings;

    let mut values = BTreeMap::new();
    values.insert("razorpay_public_key".to_string(), "rzp_live_1".to_string());
    values.insert("razorpay_secret_key".to_string(), "rzp_secret".to_string());
    values.insert("is_razorpay_enabled".to_string(), "true".to_string());
    settings.set_settings(company.id, values.clone()).await.unwrap();

    let listed = settings.all_settings(company.id).await.unwrap();
    assert_eq!(listed, values);

    let mut bad = BTreeMap::new();
    bad.insert("razorpay_secret_key".to_string(), "rotated".to_string());
    bad.insert("Not A Key".to_string(), "x".to_string());
    let result = settings.set_settings(company.id, bad).await;
    assert_matches!(result, Err(ServiceError::ValidationError(_)));

    let secret = settings
        .get_setting(company.id, "razorpay_secret_key")
        .await
        .unwrap();
    assert_eq!(secret.as_deref(), Some("rzp_secret"));

    app.settle().await;
    assert_eq!(
        app.events
            .names()
            .iter()
            .filter(|n| **n == "payment_settings_updated")
            .count(),
        1
    );
}

#[tokio::test]
async fn overwrite_delete_and_tenant_isolation() {
    let app = TestApp::new().await;
    let acme = app.company("Acme").await;
    let globex = app.company("Globex").await;
    let settings = &app.services.payment_settings;

    settings
        .set_setting(acme.id, "mollie_api_key", "live_first")
        .await
        .unwrap();
    settings
        .set_setting(acme.id, "mollie_api_key", "live_second")
        .await
        .unwrap();
    settings
        .set_setting(globex.id, "mollie_api_key", "globex_key")
        .await
        .unwrap();

    assert_eq!(
        settings.get_setting(acme.id, "mollie_api_key").await.unwrap().as_deref(),
        Some("live_second")
    );
    assert_eq!(settings.all_settings(acme.id).await.unwrap().len(), 1);

    assert!(settings.delete_setting(acme.id, "mollie_api_key").await.unwrap());
    assert!(!settings.delete_setting(acme.id, "mollie_api_key").await.unwrap());
    assert_eq!(settings.get_setting(acme.id, "mollie_api_key").await.unwrap(), None);
    assert_eq!(
        settings.get_setting(globex.id, "mollie_api_key").await.unwrap().as_deref(),
        Some("globex_key")
    );
}

#[tokio::test]
async fn other_key_cannot_read_the_ciphertext() {
    let app = TestApp::with_config(|cfg| {
        cfg.settings_encryption_key = "another-deployment-key-0123456789abcdef".to_string();
    })
    .await;
    let company = app.company("Acme").await;
    app.services
        .payment_settings
        .set_setting(company.id, "tap_secret_key", "sk_tap")
        .await
        .unwrap();

    let raw = stored_value(&app, company.id, "tap_secret_key").await;
    let cipher = SettingsCipher::from_secret(TEST_SETTINGS_KEY).unwrap();
    assert_matches!(cipher.decrypt(&raw), Err(ServiceError::EncryptionError(_)));
}
