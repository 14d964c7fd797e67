use chrono::{DateTime, Months, Utc};
use rust_decimal::Decimal;
use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

use crate::plan_limits::PlanLimits;

#[derive(
    Clone, Copy, Debug, PartialEq, Eq, EnumIter, DeriveActiveEnum, Serialize, Deserialize, strum::Display, strum::EnumString,
)]
#[sea_orm(rs_type = "String", db_type = "String(StringLen::N(16))")]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case", ascii_case_insensitive)]
pub enum PlanDuration {
    #[sea_orm(string_value = "monthly")]
    Monthly,
    #[sea_orm(string_value = "yearly")]
    Yearly,
    #[sea_orm(string_value = "lifetime")]
    Lifetime,
}

impl PlanDuration {
    /// Expiry for a subscription starting at `from`, in calendar months and
    /// clamped to the last day of a shorter month. Lifetime plans never expire.
    pub fn expiry_from(&self, from: DateTime<Utc>) -> Option<DateTime<Utc>> {
        let months = match self {
            PlanDuration::Monthly => Months::new(1),
            PlanDuration::Yearly => Months::new(12),
            PlanDuration::Lifetime => return None,
        };
        Some(from.checked_add_months(months).unwrap_or(DateTime::<Utc>::MAX_UTC))
    }
}

/// Subscription tier. Limits of `-1` are unlimited.
#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "plans")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i32,
    #[sea_orm(unique)]
    pub name: String,
    pub price: Decimal,
    pub duration: PlanDuration,
    pub max_users: i32,
    pub max_projects: i32,
    pub max_accounts: i32,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: Option<DateTime<Utc>>,
}

impl Model {
    pub fn limits(&self) -> PlanLimits {
        PlanLimits {
            max_users: self.max_users,
            max_projects: self.max_projects,
            max_accounts: self.max_accounts,
        }
    }
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(has_many = "super::company::Entity")]
    Companies,
}

impl Related<super::company::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Companies.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn expiry_follows_the_calendar() {
        let at = |y, m, d| Utc.with_ymd_and_hms(y, m, d, 9, 30, 0).unwrap();
        assert_eq!(
            PlanDuration::Monthly.expiry_from(at(2024, 1, 31)),
            Some(at(2024, 2, 29))
        );
        assert_eq!(
            PlanDuration::Monthly.expiry_from(at(2023, 3, 15)),
            Some(at(2023, 4, 15))
        );
        assert_eq!(
            PlanDuration::Yearly.expiry_from(at(2024, 2, 29)),
            Some(at(2025, 2, 28))
        );
        assert_eq!(PlanDuration::Lifetime.expiry_from(at(2024, 1, 1)), None);
    }
}
