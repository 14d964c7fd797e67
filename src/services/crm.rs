//! Accounts, contacts, leads and opportunities.
//!
//! Every record belongs to one company. References between records (a
//! contact's account, an assignee, a document's party) must stay inside
//! that company; a reference to another tenant's row reads as not found.

use chrono::{NaiveDate, Utc};
use sea_orm::{
    ActiveModelTrait, ColumnTrait, ConnectionTrait, EntityTrait, IntoActiveModel, PaginatorTrait,
    QueryFilter, QueryOrder, Set, TransactionTrait,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{info, instrument};
use validator::Validate;

use crate::{
    db::DbPool,
    entities::{
        account, contact,
        lead::{self, LeadStatus},
        opportunity::{self, OpportunityStage},
        user,
    },
    errors::ServiceError,
    events::{Event, EventSender},
    plan_limits::LimitedResource,
};

use super::documents::{fill_lines, DocumentService, LineItemInput, LineSource};
use super::plans::ensure_within_limit_in;
use super::{page_index, page_size, publish};

/// Checks that an optional account and contact belong to `company_id`, and
/// that the contact (when it has one) belongs to the given account.
pub(crate) async fn ensure_party<C: ConnectionTrait>(
    db: &C,
    company_id: i32,
    account_id: Option<i32>,
    contact_id: Option<i32>,
) -> Result<(), ServiceError> {
    if let Some(account_id) = account_id {
        load_account(db, company_id, account_id).await?;
    }
    if let Some(contact_id) = contact_id {
        let contact = load_contact(db, company_id, contact_id).await?;
        if let (Some(expected), Some(actual)) = (account_id, contact.account_id) {
            if expected != actual {
                return Err(ServiceError::InvalidInput(format!(
                    "Contact {} does not belong to account {}",
                    contact_id, expected
                )));
            }
        }
    }
    Ok(())
}

async fn load_account<C: ConnectionTrait>(
    db: &C,
    company_id: i32,
    account_id: i32,
) -> Result<account::Model, ServiceError> {
    account::Entity::find_by_id(account_id)
        .one(db)
        .await?
        .filter(|a| a.company_id == company_id)
        .ok_or_else(|| ServiceError::not_found("Account", account_id))
}

async fn load_contact<C: ConnectionTrait>(
    db: &C,
    company_id: i32,
    contact_id: i32,
) -> Result<contact::Model, ServiceError> {
    contact::Entity::find_by_id(contact_id)
        .one(db)
        .await?
        .filter(|c| c.company_id == company_id)
        .ok_or_else(|| ServiceError::not_found("Contact", contact_id))
}

async fn ensure_member<C: ConnectionTrait>(
    db: &C,
    company_id: i32,
    user_id: Option<i32>,
) -> Result<(), ServiceError> {
    if let Some(user_id) = user_id {
        user::Entity::find_by_id(user_id)
            .one(db)
            .await?
            .filter(|u| u.company_id == company_id)
            .ok_or_else(|| ServiceError::not_found("User", user_id))?;
    }
    Ok(())
}

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct NewAccount {
    pub company_id: i32,
    pub created_by: i32,
    #[validate(length(min = 1, max = 255))]
    pub name: String,
    #[validate(email)]
    pub email: Option<String>,
    #[validate(length(max = 50))]
    pub phone: Option<String>,
    #[validate(url)]
    pub website: Option<String>,
    #[validate(length(max = 1000))]
    pub billing_address: Option<String>,
    pub assigned_to: Option<i32>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct NewContact {
    pub company_id: i32,
    pub created_by: i32,
    pub account_id: Option<i32>,
    #[validate(length(min = 1, max = 255))]
    pub name: String,
    #[validate(email)]
    pub email: Option<String>,
    #[validate(length(max = 50))]
    pub phone: Option<String>,
    #[validate(length(max = 100))]
    pub title: Option<String>,
    pub assigned_to: Option<i32>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct NewLead {
    pub company_id: i32,
    pub created_by: i32,
    #[validate(length(min = 1, max = 255))]
    pub name: String,
    #[validate(email)]
    pub email: Option<String>,
    #[validate(length(max = 50))]
    pub phone: Option<String>,
    #[validate(length(max = 255))]
    pub organization: Option<String>,
    #[validate(length(max = 100))]
    pub source: Option<String>,
    pub assigned_to: Option<i32>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct NewOpportunity {
    pub company_id: i32,
    pub created_by: i32,
    #[validate(length(min = 1, max = 255))]
    pub name: String,
    pub account_id: Option<i32>,
    pub contact_id: Option<i32>,
    /// Defaults to `prospecting`
    pub stage: Option<OpportunityStage>,
    #[validate(range(min = 0, max = 100))]
    pub probability: Option<i32>,
    pub expected_close_date: Option<NaiveDate>,
    pub assigned_to: Option<i32>,
    #[serde(default)]
    #[validate]
    pub items: Vec<LineItemInput>,
}

/// What to create when a lead is converted.
#[derive(Debug, Clone, Default, Serialize, Deserialize, Validate)]
pub struct LeadConversion {
    pub converted_by: i32,
    /// Name of an opportunity to open for the new account, if any
    #[validate(length(min = 1, max = 255))]
    pub opportunity_name: Option<String>,
    pub expected_close_date: Option<NaiveDate>,
}

/// Records created by [`CrmService::convert_lead`].
#[derive(Debug, Clone, Serialize)]
pub struct ConvertedLead {
    pub lead: lead::Model,
    pub account: account::Model,
    pub contact: contact::Model,
    pub opportunity: Option<opportunity::Model>,
}

#[derive(Clone)]
pub struct CrmService {
    db_pool: Arc<DbPool>,
    documents: DocumentService,
    event_sender: Option<Arc<EventSender>>,
}

impl CrmService {
    pub fn new(
        db_pool: Arc<DbPool>,
        documents: DocumentService,
        event_sender: Option<Arc<EventSender>>,
    ) -> Self {
        Self {
            db_pool,
            documents,
            event_sender,
        }
    }

    // Accounts

    /// Creates an account within the company's plan limit.
    #[instrument(skip(self, input), fields(company_id = input.company_id))]
    pub async fn create_account(&self, input: NewAccount) -> Result<account::Model, ServiceError> {
        input.validate()?;
        let txn = self.db_pool.begin().await?;
        ensure_within_limit_in(&txn, input.company_id, LimitedResource::Accounts).await?;
        ensure_member(&txn, input.company_id, input.assigned_to).await?;

        let account = account::ActiveModel {
            company_id: Set(input.company_id),
            name: Set(input.name),
            email: Set(input.email),
            phone: Set(input.phone),
            website: Set(input.website),
            billing_address: Set(input.billing_address),
            assigned_to: Set(input.assigned_to),
            created_by: Set(input.created_by),
            created_at: Set(Utc::now()),
            updated_at: Set(None),
            ..Default::default()
        }
        .insert(&txn)
        .await?;
        txn.commit().await?;

        info!(account_id = account.id, "Account created");
        Ok(account)
    }

    pub async fn get_account(
        &self,
        company_id: i32,
        account_id: i32,
    ) -> Result<account::Model, ServiceError> {
        load_account(&*self.db_pool, company_id, account_id).await
    }

    pub async fn list_accounts(
        &self,
        company_id: i32,
        page: u64,
        limit: u64,
    ) -> Result<(Vec<account::Model>, u64), ServiceError> {
        let paginator = account::Entity::find()
            .filter(account::Column::CompanyId.eq(company_id))
            .order_by_asc(account::Column::Name)
            .paginate(&*self.db_pool, page_size(limit));
        let total = paginator.num_items().await?;
        let accounts = paginator.fetch_page(page_index(page)).await?;
        Ok((accounts, total))
    }

    /// Hands an account to a user of the same company, or clears the
    /// assignment with `None`.
    #[instrument(skip(self))]
    pub async fn assign_account(
        &self,
        company_id: i32,
        account_id: i32,
        user_id: Option<i32>,
    ) -> Result<account::Model, ServiceError> {
        let db = &*self.db_pool;
        let account = load_account(db, company_id, account_id).await?;
        ensure_member(db, company_id, user_id).await?;

        let mut active = account.into_active_model();
        active.assigned_to = Set(user_id);
        active.updated_at = Set(Some(Utc::now()));
        Ok(active.update(db).await?)
    }

    // Contacts

    #[instrument(skip(self, input), fields(company_id = input.company_id))]
    pub async fn create_contact(&self, input: NewContact) -> Result<contact::Model, ServiceError> {
        input.validate()?;
        let db = &*self.db_pool;
        ensure_party(db, input.company_id, input.account_id, None).await?;
        ensure_member(db, input.company_id, input.assigned_to).await?;

        let contact = contact::ActiveModel {
            company_id: Set(input.company_id),
            account_id: Set(input.account_id),
            name: Set(input.name),
            email: Set(input.email),
            phone: Set(input.phone),
            title: Set(input.title),
            assigned_to: Set(input.assigned_to),
            created_by: Set(input.created_by),
            created_at: Set(Utc::now()),
            updated_at: Set(None),
            ..Default::default()
        }
        .insert(db)
        .await?;

        info!(contact_id = contact.id, "Contact created");
        Ok(contact)
    }

    pub async fn get_contact(
        &self,
        company_id: i32,
        contact_id: i32,
    ) -> Result<contact::Model, ServiceError> {
        load_contact(&*self.db_pool, company_id, contact_id).await
    }

    /// Contacts of a company, optionally narrowed to one account.
    pub async fn list_contacts(
        &self,
        company_id: i32,
        account_id: Option<i32>,
        page: u64,
        limit: u64,
    ) -> Result<(Vec<contact::Model>, u64), ServiceError> {
        let mut query = contact::Entity::find().filter(contact::Column::CompanyId.eq(company_id));
        if let Some(account_id) = account_id {
            query = query.filter(contact::Column::AccountId.eq(account_id));
        }
        let paginator = query
            .order_by_asc(contact::Column::Name)
            .paginate(&*self.db_pool, page_size(limit));
        let total = paginator.num_items().await?;
        let contacts = paginator.fetch_page(page_index(page)).await?;
        Ok((contacts, total))
    }

    #[instrument(skip(self))]
    pub async fn assign_contact(
        &self,
        company_id: i32,
        contact_id: i32,
        user_id: Option<i32>,
    ) -> Result<contact::Model, ServiceError> {
        let db = &*self.db_pool;
        let contact = load_contact(db, company_id, contact_id).await?;
        ensure_member(db, company_id, user_id).await?;

        let mut active = contact.into_active_model();
        active.assigned_to = Set(user_id);
        active.updated_at = Set(Some(Utc::now()));
        Ok(active.update(db).await?)
    }

    // Leads

    #[instrument(skip(self, input), fields(company_id = input.company_id))]
    pub async fn create_lead(&self, input: NewLead) -> Result<lead::Model, ServiceError> {
        input.validate()?;
        let db = &*self.db_pool;
        ensure_member(db, input.company_id, input.assigned_to).await?;

        let lead = lead::ActiveModel {
            company_id: Set(input.company_id),
            name: Set(input.name),
            email: Set(input.email),
            phone: Set(input.phone),
            organization: Set(input.organization),
            source: Set(input.source),
            status: Set(LeadStatus::New),
            assigned_to: Set(input.assigned_to),
            created_by: Set(input.created_by),
            converted_account_id: Set(None),
            converted_contact_id: Set(None),
            converted_opportunity_id: Set(None),
            converted_at: Set(None),
            created_at: Set(Utc::now()),
            updated_at: Set(None),
            ..Default::default()
        }
        .insert(db)
        .await?;

        info!(lead_id = lead.id, "Lead created");
        Ok(lead)
    }

    pub async fn get_lead(&self, company_id: i32, lead_id: i32) -> Result<lead::Model, ServiceError> {
        load_lead(&*self.db_pool, company_id, lead_id).await
    }

    pub async fn list_leads(
        &self,
        company_id: i32,
        status: Option<LeadStatus>,
        page: u64,
        limit: u64,
    ) -> Result<(Vec<lead::Model>, u64), ServiceError> {
        let mut query = lead::Entity::find().filter(lead::Column::CompanyId.eq(company_id));
        if let Some(status) = status {
            query = query.filter(lead::Column::Status.eq(status));
        }
        let paginator = query
            .order_by_desc(lead::Column::Id)
            .paginate(&*self.db_pool, page_size(limit));
        let total = paginator.num_items().await?;
        let leads = paginator.fetch_page(page_index(page)).await?;
        Ok((leads, total))
    }

    /// `converted` is only reachable through [`Self::convert_lead`], and a
    /// converted lead keeps its status.
    #[instrument(skip(self))]
    pub async fn update_lead_status(
        &self,
        company_id: i32,
        lead_id: i32,
        new_status: LeadStatus,
    ) -> Result<lead::Model, ServiceError> {
        if new_status == LeadStatus::Converted {
            return Err(ServiceError::InvalidStatus(
                "Leads are marked converted by converting them".to_string(),
            ));
        }
        let db = &*self.db_pool;
        let lead = load_lead(db, company_id, lead_id).await?;
        if lead.status == LeadStatus::Converted {
            return Err(ServiceError::InvalidStatus(format!(
                "Lead {} is already converted",
                lead_id
            )));
        }

        let old_status = lead.status;
        let mut active = lead.into_active_model();
        active.status = Set(new_status);
        active.updated_at = Set(Some(Utc::now()));
        let lead = active.update(db).await?;
        info!(lead_id, old_status = %old_status, new_status = %new_status, "Lead status updated");
        Ok(lead)
    }

    #[instrument(skip(self))]
    pub async fn assign_lead(
        &self,
        company_id: i32,
        lead_id: i32,
        user_id: Option<i32>,
    ) -> Result<lead::Model, ServiceError> {
        let db = &*self.db_pool;
        let lead = load_lead(db, company_id, lead_id).await?;
        ensure_member(db, company_id, user_id).await?;

        let mut active = lead.into_active_model();
        active.assigned_to = Set(user_id);
        active.updated_at = Set(Some(Utc::now()));
        Ok(active.update(db).await?)
    }

    /// Turns a lead into an account with one contact, plus an opportunity
    /// when `opportunity_name` is given. Everything commits together; the
    /// lead keeps references to what it became.
    #[instrument(skip(self, input))]
    pub async fn convert_lead(
        &self,
        company_id: i32,
        lead_id: i32,
        input: LeadConversion,
    ) -> Result<ConvertedLead, ServiceError> {
        input.validate()?;
        let txn = self.db_pool.begin().await?;
        let lead = load_lead(&txn, company_id, lead_id).await?;
        if lead.status == LeadStatus::Converted {
            return Err(ServiceError::Conflict(format!(
                "Lead {} is already converted",
                lead_id
            )));
        }
        ensure_within_limit_in(&txn, company_id, LimitedResource::Accounts).await?;

        let now = Utc::now();
        let account = account::ActiveModel {
            company_id: Set(company_id),
            name: Set(lead
                .organization
                .clone()
                .filter(|o| !o.trim().is_empty())
                .unwrap_or_else(|| lead.name.clone())),
            email: Set(lead.email.clone()),
            phone: Set(lead.phone.clone()),
            website: Set(None),
            billing_address: Set(None),
            assigned_to: Set(lead.assigned_to),
            created_by: Set(input.converted_by),
            created_at: Set(now),
            updated_at: Set(None),
            ..Default::default()
        }
        .insert(&txn)
        .await?;

        let contact = contact::ActiveModel {
            company_id: Set(company_id),
            account_id: Set(Some(account.id)),
            name: Set(lead.name.clone()),
            email: Set(lead.email.clone()),
            phone: Set(lead.phone.clone()),
            title: Set(None),
            assigned_to: Set(lead.assigned_to),
            created_by: Set(input.converted_by),
            created_at: Set(now),
            updated_at: Set(None),
            ..Default::default()
        }
        .insert(&txn)
        .await?;

        let opportunity = match input.opportunity_name {
            Some(name) => Some(
                opportunity::ActiveModel {
                    company_id: Set(company_id),
                    name: Set(name),
                    account_id: Set(Some(account.id)),
                    contact_id: Set(Some(contact.id)),
                    status: Set(OpportunityStage::Prospecting),
                    probability: Set(OpportunityStage::Prospecting.default_probability()),
                    expected_close_date: Set(input.expected_close_date),
                    assigned_to: Set(lead.assigned_to),
                    created_by: Set(input.converted_by),
                    created_at: Set(now),
                    updated_at: Set(None),
                    ..Default::default()
                }
                .insert(&txn)
                .await?,
            ),
            None => None,
        };

        let mut active = lead.into_active_model();
        active.status = Set(LeadStatus::Converted);
        active.converted_account_id = Set(Some(account.id));
        active.converted_contact_id = Set(Some(contact.id));
        active.converted_opportunity_id = Set(opportunity.as_ref().map(|o| o.id));
        active.converted_at = Set(Some(now));
        active.updated_at = Set(Some(now));
        let lead = active.update(&txn).await?;
        txn.commit().await?;

        info!(lead_id, account_id = account.id, contact_id = contact.id, "Lead converted");
        publish(
            &self.event_sender,
            Event::LeadConverted {
                lead_id,
                account_id: account.id,
                contact_id: contact.id,
                opportunity_id: opportunity.as_ref().map(|o| o.id),
            },
        )
        .await;

        Ok(ConvertedLead {
            lead,
            account,
            contact,
            opportunity,
        })
    }

    // Opportunities

    /// Creates an opportunity with optional product lines; totals are
    /// computed before the transaction commits.
    #[instrument(skip(self, input), fields(company_id = input.company_id))]
    pub async fn create_opportunity(
        &self,
        input: NewOpportunity,
    ) -> Result<opportunity::Model, ServiceError> {
        input.validate()?;
        let txn = self.db_pool.begin().await?;
        ensure_party(&txn, input.company_id, input.account_id, input.contact_id).await?;
        ensure_member(&txn, input.company_id, input.assigned_to).await?;

        let stage = input.stage.unwrap_or(OpportunityStage::Prospecting);
        let created = opportunity::ActiveModel {
            company_id: Set(input.company_id),
            name: Set(input.name),
            account_id: Set(input.account_id),
            contact_id: Set(input.contact_id),
            status: Set(stage),
            probability: Set(input
                .probability
                .unwrap_or_else(|| stage.default_probability())),
            expected_close_date: Set(input.expected_close_date),
            assigned_to: Set(input.assigned_to),
            created_by: Set(input.created_by),
            created_at: Set(Utc::now()),
            updated_at: Set(None),
            ..Default::default()
        }
        .insert(&txn)
        .await?;

        fill_lines::<opportunity::Entity, _>(&txn, created.id, LineSource::Items(input.items))
            .await?;
        txn.commit().await?;

        info!(opportunity_id = created.id, "Opportunity created");
        self.documents.document_created::<opportunity::Entity>(created.id).await?;
        self.documents.fetch::<opportunity::Entity>(created.id).await
    }

    pub async fn get_opportunity(
        &self,
        company_id: i32,
        opportunity_id: i32,
    ) -> Result<opportunity::Model, ServiceError> {
        load_opportunity(&*self.db_pool, company_id, opportunity_id).await
    }

    pub async fn list_opportunities(
        &self,
        company_id: i32,
        stage: Option<OpportunityStage>,
        page: u64,
        limit: u64,
    ) -> Result<(Vec<opportunity::Model>, u64), ServiceError> {
        let mut query =
            opportunity::Entity::find().filter(opportunity::Column::CompanyId.eq(company_id));
        if let Some(stage) = stage {
            query = query.filter(opportunity::Column::Status.eq(stage));
        }
        let paginator = query
            .order_by_desc(opportunity::Column::Id)
            .paginate(&*self.db_pool, page_size(limit));
        let total = paginator.num_items().await?;
        let opportunities = paginator.fetch_page(page_index(page)).await?;
        Ok((opportunities, total))
    }

    /// Moves an opportunity through the pipeline. Closing it pins the
    /// probability to 100 (won) or 0 (lost).
    #[instrument(skip(self))]
    pub async fn update_stage(
        &self,
        company_id: i32,
        opportunity_id: i32,
        stage: OpportunityStage,
    ) -> Result<opportunity::Model, ServiceError> {
        let db = &*self.db_pool;
        let current = load_opportunity(db, company_id, opportunity_id).await?;
        let old_stage = current.status;
        if old_stage == stage {
            return Ok(current);
        }

        let mut active = current.into_active_model();
        active.status = Set(stage);
        if stage.is_closed() {
            active.probability = Set(stage.default_probability());
        }
        active.updated_at = Set(Some(Utc::now()));
        let updated = active.update(db).await?;

        self.documents
            .status_changed::<opportunity::Entity>(opportunity_id, old_stage, stage)
            .await;
        Ok(updated)
    }

    #[instrument(skip(self))]
    pub async fn assign_opportunity(
        &self,
        company_id: i32,
        opportunity_id: i32,
        user_id: Option<i32>,
    ) -> Result<opportunity::Model, ServiceError> {
        let db = &*self.db_pool;
        let current = load_opportunity(db, company_id, opportunity_id).await?;
        ensure_member(db, company_id, user_id).await?;

        let mut active = current.into_active_model();
        active.assigned_to = Set(user_id);
        active.updated_at = Set(Some(Utc::now()));
        Ok(active.update(db).await?)
    }
}

async fn load_lead<C: ConnectionTrait>(
    db: &C,
    company_id: i32,
    lead_id: i32,
) -> Result<lead::Model, ServiceError> {
    lead::Entity::find_by_id(lead_id)
        .one(db)
        .await?
        .filter(|l| l.company_id == company_id)
        .ok_or_else(|| ServiceError::not_found("Lead", lead_id))
}

async fn load_opportunity<C: ConnectionTrait>(
    db: &C,
    company_id: i32,
    opportunity_id: i32,
) -> Result<opportunity::Model, ServiceError> {
    opportunity::Entity::find_by_id(opportunity_id)
        .one(db)
        .await?
        .filter(|o| o.company_id == company_id)
        .ok_or_else(|| ServiceError::not_found("Opportunity", opportunity_id))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn conversion_rejects_blank_opportunity_name() {
        let input = LeadConversion {
            converted_by: 1,
            opportunity_name: Some(String::new()),
            expected_close_date: None,
        };
        assert!(input.validate().is_err());
        assert!(LeadConversion::default().validate().is_ok());
    }

    #[test]
    fn probability_is_a_percentage() {
        let input = NewOpportunity {
            company_id: 1,
            created_by: 1,
            name: "Renewal".into(),
            account_id: None,
            contact_id: None,
            stage: None,
            probability: Some(120),
            expected_close_date: None,
            assigned_to: None,
            items: Vec::new(),
        };
        assert!(input.validate().is_err());
    }
}
