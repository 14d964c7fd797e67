//! At-rest encryption for payment gateway secrets.
//!
//! Values are sealed with ChaCha20-Poly1305 under a key derived from the
//! configured secret via HKDF-SHA256 and stored as `base64(nonce || ciphertext)`.
//! Rows written before encryption was introduced are still plaintext, so reads
//! fall back to the raw value when it does not decode or authenticate.

use base64::{engine::general_purpose::STANDARD, Engine as _};
use chacha20poly1305::{
    aead::{Aead, AeadCore, KeyInit, OsRng},
    ChaCha20Poly1305, Nonce,
};
use hkdf::Hkdf;
use sha2::Sha256;
use tracing::debug;

use crate::errors::ServiceError;

const KEY_INFO: &[u8] = b"tenantdesk-payment-settings-v1";
const NONCE_LEN: usize = 12;

/// Setting keys holding gateway credentials. Values under these keys are
/// never persisted in plaintext.
pub const SENSITIVE_KEYS: &[&str] = &[
    "stripe_key",
    "stripe_secret",
    "paypal_client_id",
    "paypal_secret_key",
    "razorpay_public_key",
    "razorpay_secret_key",
    "mercado_access_token",
    "paystack_public_key",
    "paystack_secret_key",
    "flutterwave_public_key",
    "flutterwave_secret_key",
    "paytabs_server_key",
    "skrill_email",
    "coingate_auth_token",
    "payfast_merchant_key",
    "payfast_salt_passphrase",
    "tap_secret_key",
    "xendit_api_key",
    "paytr_merchant_key",
    "paytr_merchant_salt",
    "mollie_api_key",
    "toyyibpay_secret_key",
    "paymentwall_private_key",
    "sspay_secret_key",
    "benefit_secret_key",
    "iyzipay_secret_key",
    "aamarpay_signature_key",
    "midtrans_secret_key",
    "yookassa_secret_key",
    "nepalste_secret_key",
    "cinetpay_api_key",
    "payhere_merchant_secret",
    "fedapay_secret_key",
    "authorizenet_transaction_key",
    "khalti_secret_key",
    "easebuzz_salt_key",
    "ozow_private_key",
    "cashfree_secret_key",
    "hitpay_api_key",
    "hitpay_salt",
];

pub fn is_sensitive(key: &str) -> bool {
    SENSITIVE_KEYS.contains(&key)
}

/// Boolean literals and blank values are stored as-is.
pub fn should_encrypt(key: &str, value: &str) -> bool {
    let trimmed = value.trim();
    if !is_sensitive(key) || trimmed.is_empty() {
        return false;
    }
    !matches!(
        trimmed.to_ascii_lowercase().as_str(),
        "true" | "false" | "on" | "off"
    )
}

#[derive(Clone)]
pub struct SettingsCipher {
    cipher: ChaCha20Poly1305,
}

impl std::fmt::Debug for SettingsCipher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SettingsCipher").finish_non_exhaustive()
    }
}

impl SettingsCipher {
    pub fn from_secret(secret: &str) -> Result<Self, ServiceError> {
        let hk = Hkdf::<Sha256>::new(None, secret.as_bytes());
        let mut key = [0u8; 32];
        hk.expand(KEY_INFO, &mut key)
            .map_err(|e| ServiceError::EncryptionError(format!("Key derivation failed: {}", e)))?;
        let cipher = ChaCha20Poly1305::new_from_slice(&key)
            .map_err(|e| ServiceError::EncryptionError(format!("Cipher creation failed: {}", e)))?;
        Ok(Self { cipher })
    }

    pub fn encrypt(&self, plaintext: &str) -> Result<String, ServiceError> {
        let nonce = ChaCha20Poly1305::generate_nonce(&mut OsRng);
        let ciphertext = self
            .cipher
            .encrypt(&nonce, plaintext.as_bytes())
            .map_err(|e| ServiceError::EncryptionError(format!("Encryption failed: {}", e)))?;

        let mut sealed = Vec::with_capacity(NONCE_LEN + ciphertext.len());
        sealed.extend_from_slice(&nonce);
        sealed.extend_from_slice(&ciphertext);
        Ok(STANDARD.encode(sealed))
    }

    pub fn decrypt(&self, stored: &str) -> Result<String, ServiceError> {
        let sealed = STANDARD
            .decode(stored.trim())
            .map_err(|e| ServiceError::EncryptionError(format!("Invalid encoding: {}", e)))?;
        if sealed.len() <= NONCE_LEN {
            return Err(ServiceError::EncryptionError("Ciphertext too short".into()));
        }
        let (nonce, ciphertext) = sealed.split_at(NONCE_LEN);
        let plaintext = self
            .cipher
            .decrypt(Nonce::from_slice(nonce), ciphertext)
            .map_err(|e| ServiceError::EncryptionError(format!("Decryption failed: {}", e)))?;
        String::from_utf8(plaintext)
            .map_err(|e| ServiceError::EncryptionError(format!("Invalid UTF-8: {}", e)))
    }

    /// Decrypts `stored`, returning it unchanged when it is not our ciphertext.
    pub fn decrypt_or_raw(&self, stored: &str) -> String {
        match self.decrypt(stored) {
            Ok(plain) => plain,
            Err(err) => {
                debug!(error = %err, "stored setting is not ciphertext; returning raw value");
                stored.to_string()
            }
        }
    }

    /// Value to persist for `key`.
    pub fn seal_for_key(&self, key: &str, value: &str) -> Result<String, ServiceError> {
        if should_encrypt(key, value) {
            self.encrypt(value)
        } else {
            Ok(value.to_string())
        }
    }

    /// Value to hand back to callers for a stored row.
    pub fn open_for_key(&self, key: &str, stored: &str) -> String {
        if is_sensitive(key) && !stored.trim().is_empty() {
            self.decrypt_or_raw(stored)
        } else {
            stored.to_string()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cipher() -> SettingsCipher {
        SettingsCipher::from_secret("unit-test-secret-with-plenty-of-characters").unwrap()
    }

    #[test]
    fn encrypts_with_fresh_nonce_each_time() {
        let c = cipher();
        let a = c.encrypt("sk_live_123").unwrap();
        let b = c.encrypt("sk_live_123").unwrap();
        assert_ne!(a, b);
        assert_eq!(c.decrypt(&a).unwrap(), "sk_live_123");
        assert_eq!(c.decrypt(&b).unwrap(), "sk_live_123");
    }

    #[test]
    fn legacy_plaintext_falls_back_to_raw() {
        let c = cipher();
        assert_eq!(c.decrypt_or_raw("sk_test_legacy"), "sk_test_legacy");
        // valid base64 but not our ciphertext
        assert_eq!(
            c.decrypt_or_raw("aGVsbG8gd29ybGQgdGhpcyBpcyBub3QgY2lwaGVydGV4dA=="),
            "aGVsbG8gd29ybGQgdGhpcyBpcyBub3QgY2lwaGVydGV4dA=="
        );
    }

    #[test]
    fn different_secret_cannot_open() {
        let sealed = cipher().encrypt("value").unwrap();
        let other = SettingsCipher::from_secret("a-completely-different-secret-value!!").unwrap();
        assert!(other.decrypt(&sealed).is_err());
        assert_eq!(other.decrypt_or_raw(&sealed), sealed);
    }

    #[test]
    fn only_sensitive_non_boolean_values_are_sealed() {
        let c = cipher();
        assert_eq!(c.seal_for_key("currency", "USD").unwrap(), "USD");
        assert_eq!(c.seal_for_key("stripe_secret", "").unwrap(), "");
        assert_eq!(c.seal_for_key("stripe_secret", "on").unwrap(), "on");

        let sealed = c.seal_for_key("stripe_secret", "sk_live_abc").unwrap();
        assert_ne!(sealed, "sk_live_abc");
        assert_eq!(c.open_for_key("stripe_secret", &sealed), "sk_live_abc");
    }

    #[test]
    fn sensitive_key_list_has_no_duplicates() {
        let unique: std::collections::HashSet<_> = SENSITIVE_KEYS.iter().collect();
        assert_eq!(unique.len(), SENSITIVE_KEYS.len());
        assert!(SENSITIVE_KEYS.len() >= 35);
    }
}
