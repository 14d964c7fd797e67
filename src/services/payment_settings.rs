//! Per-company payment gateway settings.
//!
//! Values of the keys listed in [`crate::crypto::SENSITIVE_KEYS`] are sealed
//! with the settings cipher before they reach the database and opened again
//! on read. Rows written before encryption was introduced still read back as
//! their raw value.

use chrono::Utc;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, ConnectionTrait, EntityTrait, IntoActiveModel, QueryFilter,
    QueryOrder, Set, TransactionTrait,
};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, info, instrument};

use crate::{
    crypto::{is_sensitive, SettingsCipher},
    db::DbPool,
    entities::payment_setting,
    errors::ServiceError,
    events::{Event, EventSender},
};

use super::publish;

const MAX_KEY_LEN: usize = 191;

fn validate_key(key: &str) -> Result<(), ServiceError> {
    let valid = !key.is_empty()
        && key.len() <= MAX_KEY_LEN
        && key
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_');
    if valid {
        Ok(())
    } else {
        Err(ServiceError::ValidationError(format!(
            "Invalid setting key '{}': use 1-{} lowercase letters, digits or underscores",
            key, MAX_KEY_LEN
        )))
    }
}

#[derive(Clone)]
pub struct PaymentSettingsService {
    db_pool: Arc<DbPool>,
    cipher: Arc<SettingsCipher>,
    event_sender: Option<Arc<EventSender>>,
}

impl PaymentSettingsService {
    pub fn new(
        db_pool: Arc<DbPool>,
        cipher: Arc<SettingsCipher>,
        event_sender: Option<Arc<EventSender>>,
    ) -> Self {
        Self {
            db_pool,
            cipher,
            event_sender,
        }
    }

    async fn upsert<C: ConnectionTrait>(
        &self,
        db: &C,
        company_id: i32,
        key: &str,
        value: &str,
    ) -> Result<payment_setting::Model, ServiceError> {
        validate_key(key)?;
        let stored = self.cipher.seal_for_key(key, value)?;
        let now = Utc::now();

        let existing = payment_setting::Entity::find()
            .filter(payment_setting::Column::CompanyId.eq(company_id))
            .filter(payment_setting::Column::Key.eq(key))
            .one(db)
            .await?;

        let model = match existing {
            Some(row) => {
                let mut active = row.into_active_model();
                active.value = Set(stored);
                active.updated_at = Set(Some(now));
                active.update(db).await?
            }
            None => {
                payment_setting::ActiveModel {
                    company_id: Set(company_id),
                    key: Set(key.to_string()),
                    value: Set(stored),
                    created_at: Set(now),
                    updated_at: Set(None),
                    ..Default::default()
                }
                .insert(db)
                .await?
            }
        };
        debug!(key, encrypted = is_sensitive(key), "Payment setting stored");
        Ok(model)
    }

    #[instrument(skip(self, value))]
    pub async fn set_setting(
        &self,
        company_id: i32,
        key: &str,
        value: &str,
    ) -> Result<(), ServiceError> {
        let txn = self.db_pool.begin().await?;
        self.upsert(&txn, company_id, key, value).await?;
        txn.commit().await?;

        publish(
            &self.event_sender,
            Event::PaymentSettingsUpdated {
                company_id,
                keys: vec![key.to_string()],
            },
        )
        .await;
        Ok(())
    }

    /// Stores several settings atomically; one invalid key rejects them all.
    #[instrument(skip(self, values), fields(count = values.len()))]
    pub async fn set_settings(
        &self,
        company_id: i32,
        values: BTreeMap<String, String>,
    ) -> Result<(), ServiceError> {
        for key in values.keys() {
            validate_key(key)?;
        }

        let txn = self.db_pool.begin().await?;
        for (key, value) in &values {
            self.upsert(&txn, company_id, key, value).await?;
        }
        txn.commit().await?;

        let keys: Vec<String> = values.into_keys().collect();
        info!(company_id, count = keys.len(), "Payment settings updated");
        publish(
            &self.event_sender,
            Event::PaymentSettingsUpdated { company_id, keys },
        )
        .await;
        Ok(())
    }

    /// Plaintext value of one setting.
    #[instrument(skip(self))]
    pub async fn get_setting(
        &self,
        company_id: i32,
        key: &str,
    ) -> Result<Option<String>, ServiceError> {
        let row = payment_setting::Entity::find()
            .filter(payment_setting::Column::CompanyId.eq(company_id))
            .filter(payment_setting::Column::Key.eq(key))
            .one(&*self.db_pool)
            .await?;
        Ok(row.map(|r| self.cipher.open_for_key(&r.key, &r.value)))
    }

    /// Every setting of a company, decrypted.
    #[instrument(skip(self))]
    pub async fn all_settings(
        &self,
        company_id: i32,
    ) -> Result<BTreeMap<String, String>, ServiceError> {
        let rows = payment_setting::Entity::find()
            .filter(payment_setting::Column::CompanyId.eq(company_id))
            .order_by_asc(payment_setting::Column::Key)
            .all(&*self.db_pool)
            .await?;
        Ok(rows
            .into_iter()
            .map(|r| {
                let value = self.cipher.open_for_key(&r.key, &r.value);
                (r.key, value)
            })
            .collect())
    }

    /// Returns whether a row was removed.
    #[instrument(skip(self))]
    pub async fn delete_setting(&self, company_id: i32, key: &str) -> Result<bool, ServiceError> {
        let result = payment_setting::Entity::delete_many()
            .filter(payment_setting::Column::CompanyId.eq(company_id))
            .filter(payment_setting::Column::Key.eq(key))
            .exec(&*self.db_pool)
            .await?;
        Ok(result.rows_affected > 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keys_are_snake_case_identifiers() {
        assert!(validate_key("stripe_secret").is_ok());
        assert!(validate_key("is_stripe_enabled").is_ok());
        assert!(validate_key("").is_err());
        assert!(validate_key("Stripe-Secret").is_err());
        assert!(validate_key(&"k".repeat(MAX_KEY_LEN + 1)).is_err());
    }
}
