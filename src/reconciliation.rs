//! Invoice payment reconciliation.
//!
//! The ledger compares the cumulative amount of completed payments with the
//! invoice total. Validation results are returned as data, never as errors,
//! so callers can surface the message unchanged.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

use crate::entities::invoice::InvoiceStatus;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display, EnumString)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case", ascii_case_insensitive)]
pub enum PaymentType {
    Full,
    Partial,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaymentValidation {
    pub valid: bool,
    pub message: Option<String>,
}

impl PaymentValidation {
    pub fn ok() -> Self {
        Self {
            valid: true,
            message: None,
        }
    }

    pub fn rejected(message: impl Into<String>) -> Self {
        Self {
            valid: false,
            message: Some(message.into()),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaymentLedger {
    pub total_amount: Decimal,
    /// Sum of completed payments
    pub paid: Decimal,
}

impl PaymentLedger {
    pub fn new(total_amount: Decimal, completed: impl IntoIterator<Item = Decimal>) -> Self {
        Self {
            total_amount,
            paid: completed.into_iter().sum(),
        }
    }

    pub fn total_paid(&self) -> Decimal {
        self.paid
    }

    pub fn remaining(&self) -> Decimal {
        (self.total_amount - self.paid).max(Decimal::ZERO)
    }

    pub fn is_fully_paid(&self) -> bool {
        self.paid >= self.total_amount
    }

    pub fn is_partially_paid(&self) -> bool {
        self.paid > Decimal::ZERO && self.paid < self.total_amount
    }

    pub fn validate_payment_amount(
        &self,
        amount: Decimal,
        payment_type: PaymentType,
    ) -> PaymentValidation {
        let remaining = self.remaining();

        if amount <= Decimal::ZERO {
            return PaymentValidation::rejected("Payment amount must be greater than zero");
        }
        if amount > remaining {
            return PaymentValidation::rejected(format!(
                "Payment amount exceeds remaining balance of {}",
                remaining
            ));
        }
        if payment_type == PaymentType::Full && amount != remaining {
            return PaymentValidation::rejected(format!(
                "Full payment must equal the remaining balance of {}",
                remaining
            ));
        }

        PaymentValidation::ok()
    }

    /// Payment type implied by paying `amount` against this ledger.
    pub fn infer_payment_type(&self, amount: Decimal) -> PaymentType {
        if amount == self.remaining() {
            PaymentType::Full
        } else {
            PaymentType::Partial
        }
    }

    /// Status the invoice should carry after reconciliation. A ledger with
    /// no completed payments leaves the current status untouched.
    pub fn derive_status(&self, current: InvoiceStatus) -> InvoiceStatus {
        if self.paid > Decimal::ZERO && self.is_fully_paid() {
            InvoiceStatus::Paid
        } else if self.is_partially_paid() {
            InvoiceStatus::PartiallyPaid
        } else {
            current
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use rust_decimal_macros::dec;

    #[test]
    fn sixty_then_forty_settles_a_hundred() {
        let ledger = PaymentLedger::new(dec!(100), [dec!(60)]);
        assert_eq!(ledger.remaining(), dec!(40));
        assert_eq!(ledger.derive_status(InvoiceStatus::Sent), InvoiceStatus::PartiallyPaid);

        let ledger = PaymentLedger::new(dec!(100), [dec!(60), dec!(40)]);
        assert_eq!(ledger.remaining(), Decimal::ZERO);
        assert!(ledger.is_fully_paid());
        assert_eq!(ledger.derive_status(InvoiceStatus::PartiallyPaid), InvoiceStatus::Paid);
    }

    #[test]
    fn no_payments_leaves_status_unchanged() {
        let ledger = PaymentLedger::new(dec!(100), []);
        assert_eq!(ledger.derive_status(InvoiceStatus::Draft), InvoiceStatus::Draft);
        assert_eq!(ledger.derive_status(InvoiceStatus::Overdue), InvoiceStatus::Overdue);
    }

    #[test]
    fn rejects_non_positive_amounts() {
        let ledger = PaymentLedger::new(dec!(100), []);
        assert!(!ledger.validate_payment_amount(Decimal::ZERO, PaymentType::Partial).valid);
        assert!(!ledger.validate_payment_amount(dec!(-5), PaymentType::Partial).valid);
    }

    #[test]
    fn rejects_amount_above_remaining() {
        let ledger = PaymentLedger::new(dec!(100), [dec!(70)]);
        let result = ledger.validate_payment_amount(dec!(31), PaymentType::Partial);
        assert!(!result.valid);
        assert!(result.message.unwrap().contains("30"));
    }

    #[test]
    fn full_payment_must_match_remaining() {
        let ledger = PaymentLedger::new(dec!(100), [dec!(70)]);
        assert!(!ledger.validate_payment_amount(dec!(20), PaymentType::Full).valid);
        assert!(ledger.validate_payment_amount(dec!(30), PaymentType::Full).valid);
        assert!(ledger.validate_payment_amount(dec!(20), PaymentType::Partial).valid);
    }

    #[test]
    fn payment_type_inferred_from_remaining() {
        let ledger = PaymentLedger::new(dec!(100), [dec!(25)]);
        assert_eq!(ledger.infer_payment_type(dec!(75)), PaymentType::Full);
        assert_eq!(ledger.infer_payment_type(dec!(10)), PaymentType::Partial);
    }

    #[test]
    fn payment_type_parses_case_insensitively() {
        assert_eq!("FULL".parse::<PaymentType>().unwrap(), PaymentType::Full);
        assert_eq!("partial".parse::<PaymentType>().unwrap(), PaymentType::Partial);
        assert_eq!(PaymentType::Partial.to_string(), "partial");
    }

    proptest! {
        #[test]
        fn ledger_invariants(total_cents in 0i64..10_000_000, payments in proptest::collection::vec(0i64..5_000_000, 0..8)) {
            let total = Decimal::new(total_cents, 2);
            let ledger = PaymentLedger::new(total, payments.iter().map(|c| Decimal::new(*c, 2)));

            prop_assert_eq!(ledger.remaining(), (total - ledger.total_paid()).max(Decimal::ZERO));
            prop_assert_eq!(ledger.is_fully_paid(), ledger.total_paid() >= total);
            prop_assert!(!(ledger.is_fully_paid() && ledger.is_partially_paid()));
        }
    }
}
