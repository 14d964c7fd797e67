//! Subscription plan resource limits. A limit of `-1` means unlimited.

use serde::{Deserialize, Serialize};
use strum::Display;

pub const UNLIMITED: i32 = -1;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display)]
#[strum(serialize_all = "snake_case")]
pub enum LimitedResource {
    Users,
    Projects,
    Accounts,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlanLimits {
    pub max_users: i32,
    pub max_projects: i32,
    pub max_accounts: i32,
}

impl PlanLimits {
    pub fn unlimited() -> Self {
        Self {
            max_users: UNLIMITED,
            max_projects: UNLIMITED,
            max_accounts: UNLIMITED,
        }
    }

    pub fn limit_for(&self, resource: LimitedResource) -> i32 {
        match resource {
            LimitedResource::Users => self.max_users,
            LimitedResource::Projects => self.max_projects,
            LimitedResource::Accounts => self.max_accounts,
        }
    }

    /// Whether one more `resource` may be created when `current` already exist.
    pub fn allows_another(&self, resource: LimitedResource, current: u64) -> bool {
        let limit = self.limit_for(resource);
        limit < 0 || current < limit as u64
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unlimited_always_allows() {
        let limits = PlanLimits::unlimited();
        assert!(limits.allows_another(LimitedResource::Projects, 1_000_000));
    }

    #[test]
    fn limit_is_exclusive_upper_bound() {
        let limits = PlanLimits {
            max_users: 3,
            max_projects: 0,
            max_accounts: UNLIMITED,
        };
        assert!(limits.allows_another(LimitedResource::Users, 2));
        assert!(!limits.allows_another(LimitedResource::Users, 3));
        assert!(!limits.allows_another(LimitedResource::Projects, 0));
        assert!(limits.allows_another(LimitedResource::Accounts, 99));
    }

    #[test]
    fn resource_names_are_snake_case() {
        assert_eq!(LimitedResource::Projects.to_string(), "projects");
    }
}
