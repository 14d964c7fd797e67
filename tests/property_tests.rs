//! Property-based tests for the pure building blocks: progress roll-up,
//! settings encryption and plan limits.

use proptest::prelude::*;
use rust_decimal::Decimal;
use tenantdesk::{
    crypto::{should_encrypt, SettingsCipher},
    plan_limits::{LimitedResource, PlanLimits},
    progress::{project_progress, rollup, would_create_cycle, TaskNode},
    reconciliation::{PaymentLedger, PaymentType},
};

/// A forest where every task's parent has a smaller id, so no cycles.
fn forest_strategy() -> impl Strategy<Value = Vec<TaskNode>> {
    prop::collection::vec((any::<prop::sample::Index>(), 0i32..=100, any::<bool>(), any::<bool>()), 1..25)
        .prop_map(|specs| {
            specs
                .into_iter()
                .enumerate()
                .map(|(i, (parent, progress, has_parent, done))| {
                    let id = i as i32 + 1;
                    let parent_id = if has_parent && i > 0 {
                        Some(parent.index(i) as i32 + 1)
                    } else {
                        None
                    };
                    TaskNode {
                        id,
                        parent_id,
                        progress,
                        done,
                    }
                })
                .collect()
        })
}

fn limit_strategy() -> impl Strategy<Value = i32> {
    prop_oneof![Just(-1), 0i32..50]
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(300))]

    #[test]
    fn rolled_up_progress_stays_a_percentage(tasks in forest_strategy()) {
        let rolled = rollup(&tasks);
        prop_assert_eq!(rolled.len(), tasks.len());
        for value in rolled.values() {
            prop_assert!((0..=100).contains(value));
        }
        let overall = project_progress(&tasks);
        prop_assert!((0..=100).contains(&overall));
    }

    #[test]
    fn done_tasks_always_count_as_complete(tasks in forest_strategy()) {
        let rolled = rollup(&tasks);
        for task in tasks.iter().filter(|t| t.done) {
            prop_assert_eq!(rolled[&task.id], 100);
        }
    }

    #[test]
    fn a_task_can_never_move_under_its_descendant(tasks in forest_strategy(), pick in any::<prop::sample::Index>()) {
        let task = &tasks[pick.index(tasks.len())];
        // every ancestor chain ends at a root, so each descendant is rejected
        for candidate in &tasks {
            let mut cursor = candidate.parent_id;
            let mut below = candidate.id == task.id;
            while let Some(parent) = cursor {
                if parent == task.id {
                    below = true;
                    break;
                }
                cursor = tasks.iter().find(|t| t.id == parent).and_then(|t| t.parent_id);
            }
            prop_assert_eq!(would_create_cycle(&tasks, task.id, candidate.id), below);
        }
    }

    #[test]
    fn limits_allow_exactly_up_to_the_maximum(limit in limit_strategy(), current in 0u64..100) {
        let limits = PlanLimits { max_users: limit, max_projects: limit, max_accounts: limit };
        let allowed = limits.allows_another(LimitedResource::Accounts, current);
        if limit < 0 {
            prop_assert!(allowed);
        } else {
            prop_assert_eq!(allowed, current < limit as u64);
        }
    }

    #[test]
    fn accepted_payments_never_overshoot(
        total in (0i64..1_000_000).prop_map(|c| Decimal::new(c, 2)),
        amounts in prop::collection::vec((1i64..200_000).prop_map(|c| Decimal::new(c, 2)), 0..10),
    ) {
        let mut paid = Vec::new();
        for amount in amounts {
            let ledger = PaymentLedger::new(total, paid.clone());
            let verdict = ledger.validate_payment_amount(amount, PaymentType::Partial);
            prop_assert_eq!(verdict.valid, amount <= ledger.remaining());
            if verdict.valid {
                paid.push(amount);
            }
        }
        let ledger = PaymentLedger::new(total, paid);
        prop_assert!(ledger.total_paid() <= total);
        prop_assert!(ledger.remaining() >= Decimal::ZERO);
    }
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn sealed_values_open_with_the_same_key(secret in "[ -~]{1,80}") {
        let cipher = SettingsCipher::from_secret("property-test-key").unwrap();
        let sealed = cipher.seal_for_key("stripe_secret", &secret).unwrap();
        if should_encrypt("stripe_secret", &secret) {
            prop_assert_ne!(&sealed, &secret);
        }
        prop_assert_eq!(cipher.open_for_key("stripe_secret", &sealed), secret);
    }

    #[test]
    fn non_sensitive_keys_are_stored_verbatim(value in "[ -~]{0,40}") {
        let cipher = SettingsCipher::from_secret("property-test-key").unwrap();
        prop_assert_eq!(cipher.seal_for_key("currency_symbol", &value).unwrap(), value);
    }
}
