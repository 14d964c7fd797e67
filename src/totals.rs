//! Line-item and document total arithmetic.
//!
//! Every sales document aggregates its product lines the same way:
//! `total = subtotal + tax + shipping - discount`. Document kinds only differ
//! in whether a shipping charge and an order-level discount are accepted.

use rust_decimal::{Decimal, RoundingStrategy};
use serde::{Deserialize, Serialize};

use crate::entities::document_line_item::DiscountType;

const HUNDRED: Decimal = Decimal::ONE_HUNDRED;

pub fn round_money(value: Decimal) -> Decimal {
    value.round_dp_with_strategy(2, RoundingStrategy::MidpointAwayFromZero)
}

/// Applies a discount to `base`, clamped to `[0, base]`.
pub fn discount_for(base: Decimal, discount_type: &DiscountType, value: Decimal) -> Decimal {
    if base <= Decimal::ZERO || value <= Decimal::ZERO {
        return Decimal::ZERO;
    }
    let raw = match discount_type {
        DiscountType::None => Decimal::ZERO,
        DiscountType::Percentage => base * value.min(HUNDRED) / HUNDRED,
        DiscountType::Fixed => value,
    };
    round_money(raw.min(base))
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LineInput {
    pub quantity: Decimal,
    pub unit_price: Decimal,
    pub discount_type: DiscountType,
    pub discount_value: Decimal,
    /// Percentage rate of the product's tax, if one is attached
    pub tax_rate: Option<Decimal>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct LineTotals {
    pub gross: Decimal,
    pub discount_amount: Decimal,
    pub net: Decimal,
    pub tax_amount: Decimal,
}

pub fn compute_line(line: &LineInput) -> LineTotals {
    let gross = round_money(line.quantity * line.unit_price).max(Decimal::ZERO);
    let discount_amount = discount_for(gross, &line.discount_type, line.discount_value);
    let net = gross - discount_amount;
    let tax_amount = match line.tax_rate {
        Some(rate) if rate > Decimal::ZERO => round_money(net * rate / HUNDRED),
        _ => Decimal::ZERO,
    };

    LineTotals {
        gross,
        discount_amount,
        net,
        tax_amount,
    }
}

/// Which header-level adjustments a document kind accepts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct TotalsPolicy {
    pub shipping: bool,
    pub order_discount: bool,
}

impl TotalsPolicy {
    pub const LINES_ONLY: TotalsPolicy = TotalsPolicy {
        shipping: false,
        order_discount: false,
    };
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderDiscount {
    pub discount_type: DiscountType,
    pub value: Decimal,
}

impl OrderDiscount {
    pub fn none() -> Self {
        Self {
            discount_type: DiscountType::None,
            value: Decimal::ZERO,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct DocumentTotals {
    pub subtotal: Decimal,
    pub discount_amount: Decimal,
    pub tax_amount: Decimal,
    pub shipping_amount: Decimal,
    pub total_amount: Decimal,
}

/// Aggregates lines into header totals. Adjustments the policy does not
/// accept are ignored.
pub fn compute_document(
    lines: &[LineTotals],
    shipping: Decimal,
    order_discount: &OrderDiscount,
    policy: TotalsPolicy,
) -> DocumentTotals {
    let subtotal: Decimal = lines.iter().map(|l| l.gross).sum();
    let line_discounts: Decimal = lines.iter().map(|l| l.discount_amount).sum();
    let tax_amount: Decimal = lines.iter().map(|l| l.tax_amount).sum();

    let shipping_amount = if policy.shipping {
        round_money(shipping.max(Decimal::ZERO))
    } else {
        Decimal::ZERO
    };

    // the order-level discount applies after tax and never drives the total below zero
    let payable = subtotal - line_discounts + tax_amount + shipping_amount;
    let order_discount_amount = if policy.order_discount {
        discount_for(
            subtotal - line_discounts,
            &order_discount.discount_type,
            order_discount.value,
        )
        .min(payable.max(Decimal::ZERO))
    } else {
        Decimal::ZERO
    };

    let discount_amount = line_discounts + order_discount_amount;

    DocumentTotals {
        subtotal,
        discount_amount,
        tax_amount,
        shipping_amount,
        total_amount: subtotal + tax_amount + shipping_amount - discount_amount,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use rust_decimal_macros::dec;

    fn line(qty: Decimal, price: Decimal) -> LineInput {
        LineInput {
            quantity: qty,
            unit_price: price,
            discount_type: DiscountType::None,
            discount_value: Decimal::ZERO,
            tax_rate: None,
        }
    }

    #[test]
    fn line_without_tax_or_discount() {
        let totals = compute_line(&line(dec!(5), dec!(19.99)));
        assert_eq!(totals.gross, dec!(99.95));
        assert_eq!(totals.net, dec!(99.95));
        assert_eq!(totals.tax_amount, Decimal::ZERO);
    }

    #[test]
    fn percentage_discount_then_tax_on_net() {
        let mut input = line(dec!(2), dec!(100));
        input.discount_type = DiscountType::Percentage;
        input.discount_value = dec!(10);
        input.tax_rate = Some(dec!(8));

        let totals = compute_line(&input);
        assert_eq!(totals.gross, dec!(200));
        assert_eq!(totals.discount_amount, dec!(20));
        assert_eq!(totals.net, dec!(180));
        assert_eq!(totals.tax_amount, dec!(14.40));
    }

    #[test]
    fn fixed_discount_is_clamped_to_gross() {
        let mut input = line(dec!(1), dec!(30));
        input.discount_type = DiscountType::Fixed;
        input.discount_value = dec!(45);
        let totals = compute_line(&input);
        assert_eq!(totals.discount_amount, dec!(30));
        assert_eq!(totals.net, Decimal::ZERO);
    }

    #[test]
    fn shipping_ignored_unless_policy_allows() {
        let lines = [compute_line(&line(dec!(1), dec!(50)))];
        let none = compute_document(&lines, dec!(10), &OrderDiscount::none(), TotalsPolicy::LINES_ONLY);
        assert_eq!(none.total_amount, dec!(50));
        assert_eq!(none.shipping_amount, Decimal::ZERO);

        let with_shipping = compute_document(
            &lines,
            dec!(10),
            &OrderDiscount::none(),
            TotalsPolicy {
                shipping: true,
                order_discount: false,
            },
        );
        assert_eq!(with_shipping.shipping_amount, dec!(10));
        assert_eq!(with_shipping.total_amount, dec!(60));
    }

    #[test]
    fn order_discount_never_makes_total_negative() {
        let lines = [compute_line(&line(dec!(1), dec!(20)))];
        let discount = OrderDiscount {
            discount_type: DiscountType::Fixed,
            value: dec!(500),
        };
        let totals = compute_document(
            &lines,
            Decimal::ZERO,
            &discount,
            TotalsPolicy {
                shipping: false,
                order_discount: true,
            },
        );
        assert_eq!(totals.total_amount, Decimal::ZERO);
        assert_eq!(totals.discount_amount, dec!(20));
    }

    #[test]
    fn empty_document_totals_to_zero() {
        let totals = compute_document(&[], dec!(5), &OrderDiscount::none(), TotalsPolicy::LINES_ONLY);
        assert_eq!(totals, DocumentTotals::default());
    }

    fn money() -> impl Strategy<Value = Decimal> {
        (0i64..10_000_000).prop_map(|cents| Decimal::new(cents, 2))
    }

    fn discount_type() -> impl Strategy<Value = DiscountType> {
        prop_oneof![
            Just(DiscountType::None),
            Just(DiscountType::Percentage),
            Just(DiscountType::Fixed),
        ]
    }

    fn line_input() -> impl Strategy<Value = LineInput> {
        (
            1i64..500,
            money(),
            discount_type(),
            money(),
            proptest::option::of((0i64..3000).prop_map(|bp| Decimal::new(bp, 2))),
        )
            .prop_map(|(qty, price, dt, dv, tax)| LineInput {
                quantity: Decimal::from(qty),
                unit_price: price,
                discount_type: dt,
                discount_value: dv,
                tax_rate: tax,
            })
    }

    proptest! {
        #[test]
        fn total_identity_holds(
            inputs in proptest::collection::vec(line_input(), 0..12),
            shipping in money(),
            order_discount_type in discount_type(),
            order_discount_value in money(),
            ship in any::<bool>(),
            disc in any::<bool>(),
        ) {
            let lines: Vec<LineTotals> = inputs.iter().map(compute_line).collect();
            let policy = TotalsPolicy { shipping: ship, order_discount: disc };
            let order_discount = OrderDiscount { discount_type: order_discount_type, value: order_discount_value };
            let totals = compute_document(&lines, shipping, &order_discount, policy);

            prop_assert_eq!(
                totals.total_amount,
                totals.subtotal + totals.tax_amount + totals.shipping_amount - totals.discount_amount
            );
            prop_assert!(totals.total_amount >= Decimal::ZERO);
            prop_assert!(totals.discount_amount <= totals.subtotal + totals.tax_amount + totals.shipping_amount);

            let again = compute_document(&lines, shipping, &order_discount, policy);
            prop_assert_eq!(totals, again);
        }
    }
}
