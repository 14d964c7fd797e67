use chrono::Utc;
use rust_decimal::Decimal;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, ConnectionTrait, EntityTrait, IntoActiveModel, PaginatorTrait,
    QueryFilter, QueryOrder, Set, TransactionTrait,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{info, instrument, warn};
use validator::Validate;

use crate::{
    db::DbPool,
    entities::{
        account, company,
        plan::{self, PlanDuration},
        project,
        user::{self, UserRole},
    },
    errors::ServiceError,
    events::{Event, EventSender},
    plan_limits::{LimitedResource, PlanLimits},
};

use super::documents::validate_non_negative;
use super::publish;

/// Limits of `-1` are unlimited.
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct NewPlan {
    #[validate(length(min = 1, max = 100))]
    pub name: String,
    #[validate(custom = "validate_non_negative")]
    pub price: Decimal,
    pub duration: PlanDuration,
    #[validate(range(min = -1))]
    pub max_users: i32,
    #[validate(range(min = -1))]
    pub max_projects: i32,
    #[validate(range(min = -1))]
    pub max_accounts: i32,
}

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct NewCompany {
    #[validate(length(min = 1, max = 255))]
    pub name: String,
    #[validate(email)]
    pub email: Option<String>,
    /// Defaults to the configured currency
    #[validate(length(equal = 3))]
    pub currency: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct NewUser {
    pub company_id: i32,
    #[validate(length(min = 1, max = 255))]
    pub name: String,
    #[validate(email)]
    pub email: String,
    pub role: UserRole,
}

/// Current resource counts of a company next to its plan limits.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PlanUsage {
    pub company_id: i32,
    pub plan_id: Option<i32>,
    pub limits: PlanLimits,
    pub users: u64,
    pub projects: u64,
    pub accounts: u64,
}

async fn count_resource<C: ConnectionTrait>(
    db: &C,
    company_id: i32,
    resource: LimitedResource,
) -> Result<u64, ServiceError> {
    let count = match resource {
        LimitedResource::Users => {
            user::Entity::find()
                .filter(user::Column::CompanyId.eq(company_id))
                .count(db)
                .await?
        }
        LimitedResource::Projects => {
            project::Entity::find()
                .filter(project::Column::CompanyId.eq(company_id))
                .count(db)
                .await?
        }
        LimitedResource::Accounts => {
            account::Entity::find()
                .filter(account::Column::CompanyId.eq(company_id))
                .count(db)
                .await?
        }
    };
    Ok(count)
}

/// Limits that apply to a company right now. A company without a plan is
/// not metered; an expired plan allows nothing new.
async fn effective_limits<C: ConnectionTrait>(
    db: &C,
    company: &company::Model,
) -> Result<PlanLimits, ServiceError> {
    let Some(plan_id) = company.plan_id else {
        return Ok(PlanLimits::unlimited());
    };
    if !company.has_active_plan(Utc::now()) {
        return Err(ServiceError::PlanLimitExceeded(format!(
            "The plan of company {} has expired",
            company.id
        )));
    }
    let plan = plan::Entity::find_by_id(plan_id)
        .one(db)
        .await?
        .ok_or_else(|| ServiceError::not_found("Plan", plan_id))?;
    Ok(plan.limits())
}

pub(crate) async fn load_company<C: ConnectionTrait>(
    db: &C,
    company_id: i32,
) -> Result<company::Model, ServiceError> {
    company::Entity::find_by_id(company_id)
        .one(db)
        .await?
        .ok_or_else(|| ServiceError::not_found("Company", company_id))
}

/// Fails with `PlanLimitExceeded` when the company may not create another
/// `resource`. Run it in the transaction that performs the insert.
pub(crate) async fn ensure_within_limit_in<C: ConnectionTrait>(
    db: &C,
    company_id: i32,
    resource: LimitedResource,
) -> Result<(), ServiceError> {
    let company = load_company(db, company_id).await?;
    let limits = effective_limits(db, &company).await?;
    let current = count_resource(db, company_id, resource).await?;
    if !limits.allows_another(resource, current) {
        warn!(company_id, %resource, current, "Plan limit reached");
        return Err(ServiceError::PlanLimitExceeded(format!(
            "Company {} has reached its limit of {} {}",
            company_id,
            limits.limit_for(resource),
            resource
        )));
    }
    Ok(())
}

#[derive(Clone)]
pub struct PlanService {
    db_pool: Arc<DbPool>,
    event_sender: Option<Arc<EventSender>>,
    default_currency: String,
}

impl PlanService {
    pub fn new(
        db_pool: Arc<DbPool>,
        event_sender: Option<Arc<EventSender>>,
        default_currency: String,
    ) -> Self {
        Self {
            db_pool,
            event_sender,
            default_currency,
        }
    }

    #[instrument(skip(self, input), fields(name = %input.name))]
    pub async fn create_plan(&self, input: NewPlan) -> Result<plan::Model, ServiceError> {
        input.validate()?;
        let plan = plan::ActiveModel {
            name: Set(input.name.clone()),
            price: Set(input.price),
            duration: Set(input.duration),
            max_users: Set(input.max_users),
            max_projects: Set(input.max_projects),
            max_accounts: Set(input.max_accounts),
            is_active: Set(true),
            created_at: Set(Utc::now()),
            updated_at: Set(None),
            ..Default::default()
        }
        .insert(&*self.db_pool)
        .await
        .map_err(|e| {
            let err = ServiceError::from(e);
            if err.is_unique_violation() {
                ServiceError::Conflict(format!("A plan named '{}' already exists", input.name))
            } else {
                err
            }
        })?;

        info!(plan_id = plan.id, "Plan created");
        Ok(plan)
    }

    pub async fn get_plan(&self, plan_id: i32) -> Result<plan::Model, ServiceError> {
        plan::Entity::find_by_id(plan_id)
            .one(&*self.db_pool)
            .await?
            .ok_or_else(|| ServiceError::not_found("Plan", plan_id))
    }

    pub async fn list_plans(&self, active_only: bool) -> Result<Vec<plan::Model>, ServiceError> {
        let mut query = plan::Entity::find();
        if active_only {
            query = query.filter(plan::Column::IsActive.eq(true));
        }
        Ok(query
            .order_by_asc(plan::Column::Price)
            .all(&*self.db_pool)
            .await?)
    }

    #[instrument(skip(self, input), fields(name = %input.name))]
    pub async fn create_company(&self, input: NewCompany) -> Result<company::Model, ServiceError> {
        input.validate()?;
        let company = company::ActiveModel {
            name: Set(input.name),
            email: Set(input.email),
            currency: Set(input
                .currency
                .unwrap_or_else(|| self.default_currency.clone())
                .to_uppercase()),
            plan_id: Set(None),
            plan_expires_at: Set(None),
            created_at: Set(Utc::now()),
            updated_at: Set(None),
            ..Default::default()
        }
        .insert(&*self.db_pool)
        .await?;

        info!(company_id = company.id, "Company created");
        Ok(company)
    }

    pub async fn get_company(&self, company_id: i32) -> Result<company::Model, ServiceError> {
        load_company(&*self.db_pool, company_id).await
    }

    /// Subscribes a company to a plan starting now. A plan whose limits the
    /// company already exceeds is refused.
    #[instrument(skip(self))]
    pub async fn assign_plan(
        &self,
        company_id: i32,
        plan_id: i32,
    ) -> Result<company::Model, ServiceError> {
        let txn = self.db_pool.begin().await?;
        let company = load_company(&txn, company_id).await?;
        let plan = plan::Entity::find_by_id(plan_id)
            .one(&txn)
            .await?
            .ok_or_else(|| ServiceError::not_found("Plan", plan_id))?;
        if !plan.is_active {
            return Err(ServiceError::InvalidOperation(format!(
                "Plan '{}' is not available",
                plan.name
            )));
        }

        let limits = plan.limits();
        for resource in [
            LimitedResource::Users,
            LimitedResource::Projects,
            LimitedResource::Accounts,
        ] {
            let current = count_resource(&txn, company_id, resource).await?;
            let limit = limits.limit_for(resource);
            if limit >= 0 && current > limit as u64 {
                return Err(ServiceError::PlanLimitExceeded(format!(
                    "Company {} has {} {}, more than plan '{}' allows ({})",
                    company_id, current, resource, plan.name, limit
                )));
            }
        }

        let now = Utc::now();
        let expires_at = plan.duration.expiry_from(now);
        let mut active = company.into_active_model();
        active.plan_id = Set(Some(plan.id));
        active.plan_expires_at = Set(expires_at);
        active.updated_at = Set(Some(now));
        let company = active.update(&txn).await?;
        txn.commit().await?;

        info!(company_id, plan_id, expires_at = ?expires_at, "Plan assigned");
        publish(
            &self.event_sender,
            Event::PlanAssigned {
                company_id,
                plan_id,
                expires_at,
            },
        )
        .await;
        Ok(company)
    }

    pub async fn ensure_within_limit(
        &self,
        company_id: i32,
        resource: LimitedResource,
    ) -> Result<(), ServiceError> {
        ensure_within_limit_in(&*self.db_pool, company_id, resource).await
    }

    pub async fn usage(&self, company_id: i32) -> Result<PlanUsage, ServiceError> {
        let db = &*self.db_pool;
        let company = load_company(db, company_id).await?;
        let limits = match company.plan_id {
            Some(plan_id) => self.get_plan(plan_id).await?.limits(),
            None => PlanLimits::unlimited(),
        };
        Ok(PlanUsage {
            company_id,
            plan_id: company.plan_id,
            limits,
            users: count_resource(db, company_id, LimitedResource::Users).await?,
            projects: count_resource(db, company_id, LimitedResource::Projects).await?,
            accounts: count_resource(db, company_id, LimitedResource::Accounts).await?,
        })
    }

    /// Adds a user to a company within its plan's user limit.
    #[instrument(skip(self, input), fields(company_id = input.company_id))]
    pub async fn create_user(&self, input: NewUser) -> Result<user::Model, ServiceError> {
        input.validate()?;
        let txn = self.db_pool.begin().await?;
        ensure_within_limit_in(&txn, input.company_id, LimitedResource::Users).await?;

        let email = input.email.trim().to_lowercase();
        let user = user::ActiveModel {
            company_id: Set(input.company_id),
            name: Set(input.name),
            email: Set(email.clone()),
            role: Set(input.role),
            is_active: Set(true),
            created_at: Set(Utc::now()),
            updated_at: Set(None),
            ..Default::default()
        }
        .insert(&txn)
        .await
        .map_err(|e| {
            let err = ServiceError::from(e);
            if err.is_unique_violation() {
                ServiceError::Conflict(format!("A user with email {} already exists", email))
            } else {
                err
            }
        })?;
        txn.commit().await?;

        info!(user_id = user.id, "User created");
        Ok(user)
    }

    pub async fn get_user(&self, user_id: i32) -> Result<user::Model, ServiceError> {
        user::Entity::find_by_id(user_id)
            .one(&*self.db_pool)
            .await?
            .ok_or_else(|| ServiceError::not_found("User", user_id))
    }
}
