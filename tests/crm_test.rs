mod common;

use assert_matches::assert_matches;
use rust_decimal_macros::dec;
use tenantdesk::{
    entities::{lead::LeadStatus, opportunity::OpportunityStage},
    errors::ServiceError,
    services::{
        crm::{LeadConversion, NewAccount, NewContact, NewLead, NewOpportunity},
        documents::LineItemInput,
    },
};

use common::TestApp;

fn lead_input(company_id: i32, organization: Option<&str>) -> NewLead {
    NewLead {
        company_id,
        created_by: 1,
        name: "Dana Reyes".into(),
        email: Some("dana@northwind.test".into()),
        phone: Some("+1 555 0100".into()),
        organization: organization.map(str::to_string),
        source: Some("webinar".into()),
        assigned_to: None,
    }
}

fn account_input(company_id: i32, name: &str) -> NewAccount {
    NewAccount {
        company_id,
        created_by: 1,
        name: name.into(),
        email: None,
        phone: None,
        website: None,
        billing_address: None,
        assigned_to: None,
    }
}

fn opportunity_input(company_id: i32) -> NewOpportunity {
    NewOpportunity {
        company_id,
        created_by: 1,
        name: "Annual licence".into(),
        account_id: None,
        contact_id: None,
        stage: None,
        probability: None,
        expected_close_date: None,
        assigned_to: None,
        items: Vec::new(),
    }
}

#[tokio::test]
async fn converting_a_lead_creates_account_contact_and_opportunity() {
    let app = TestApp::new().await;
    let company = app.company("Acme").await;
    let crm = &app.services.crm;
    let lead = crm
        .create_lead(lead_input(company.id, Some("Northwind Traders")))
        .await
        .unwrap();
    assert_eq!(lead.status, LeadStatus::New);

    let converted = crm
        .convert_lead(
            company.id,
            lead.id,
            LeadConversion {
                converted_by: 1,
                opportunity_name: Some("Northwind rollout".into()),
                expected_close_date: None,
            },
        )
        .await
        .unwrap();

    assert_eq!(converted.account.name, "Northwind Traders");
    assert_eq!(converted.contact.name, "Dana Reyes");
    assert_eq!(converted.contact.account_id, Some(converted.account.id));
    let opportunity = converted.opportunity.as_ref().unwrap();
    assert_eq!(opportunity.status, OpportunityStage::Prospecting);
    assert_eq!(opportunity.account_id, Some(converted.account.id));
    assert_eq!(opportunity.contact_id, Some(converted.contact.id));

    assert_eq!(converted.lead.status, LeadStatus::Converted);
    assert_eq!(converted.lead.converted_account_id, Some(converted.account.id));
    assert_eq!(converted.lead.converted_contact_id, Some(converted.contact.id));
    assert_eq!(converted.lead.converted_opportunity_id, Some(opportunity.id));
    assert!(converted.lead.converted_at.is_some());

    let again = crm
        .convert_lead(company.id, lead.id, LeadConversion::default())
        .await;
    assert_matches!(again, Err(ServiceError::Conflict(_)));

    app.settle().await;
    assert!(app.events.names().contains(&"lead_converted"));
}

#[tokio::test]
async fn lead_without_organization_names_the_account_after_the_person() {
    let app = TestApp::new().await;
    let company = app.company("Acme").await;
    let crm = &app.services.crm;
    let lead = crm.create_lead(lead_input(company.id, None)).await.unwrap();

    let converted = crm
        .convert_lead(company.id, lead.id, LeadConversion::default())
        .await
        .unwrap();

    assert_eq!(converted.account.name, "Dana Reyes");
    assert!(converted.opportunity.is_none());
    assert_eq!(converted.lead.converted_opportunity_id, None);
}

#[tokio::test]
async fn converted_lead_status_is_final() {
    let app = TestApp::new().await;
    let company = app.company("Acme").await;
    let crm = &app.services.crm;
    let lead = crm.create_lead(lead_input(company.id, None)).await.unwrap();

    crm.update_lead_status(company.id, lead.id, LeadStatus::Qualified)
        .await
        .unwrap();
    let manual = crm
        .update_lead_status(company.id, lead.id, LeadStatus::Converted)
        .await;
    assert_matches!(manual, Err(ServiceError::InvalidStatus(_)));

    crm.convert_lead(company.id, lead.id, LeadConversion::default())
        .await
        .unwrap();
    let reopen = crm
        .update_lead_status(company.id, lead.id, LeadStatus::Contacted)
        .await;
    assert_matches!(reopen, Err(ServiceError::InvalidStatus(_)));

    let (converted, total) = crm
        .list_leads(company.id, Some(LeadStatus::Converted), 1, 10)
        .await
        .unwrap();
    assert_eq!(total, 1);
    assert_eq!(converted[0].id, lead.id);
}

#[tokio::test]
async fn records_of_another_company_are_invisible() {
    let app = TestApp::new().await;
    let acme = app.company("Acme").await;
    let globex = app.company("Globex").await;
    let crm = &app.services.crm;

    let foreign_account = crm
        .create_account(account_input(globex.id, "Globex Retail"))
        .await
        .unwrap();
    let foreign_contact = crm
        .create_contact(NewContact {
            company_id: globex.id,
            created_by: 1,
            account_id: Some(foreign_account.id),
            name: "Hank".into(),
            email: None,
            phone: None,
            title: None,
            assigned_to: None,
        })
        .await
        .unwrap();

    assert_matches!(
        crm.get_account(acme.id, foreign_account.id).await,
        Err(ServiceError::NotFound(_))
    );

    let mut opportunity = opportunity_input(acme.id);
    opportunity.contact_id = Some(foreign_contact.id);
    assert_matches!(
        crm.create_opportunity(opportunity).await,
        Err(ServiceError::NotFound(_))
    );

    let contact = NewContact {
        company_id: acme.id,
        created_by: 1,
        account_id: Some(foreign_account.id),
        name: "Mallory".into(),
        email: None,
        phone: None,
        title: None,
        assigned_to: None,
    };
    assert_matches!(
        crm.create_contact(contact).await,
        Err(ServiceError::NotFound(_))
    );

    let outsider = app.user(globex.id, "outsider@globex.test").await;
    let own_account = crm
        .create_account(account_input(acme.id, "Acme Direct"))
        .await
        .unwrap();
    assert_matches!(
        crm.assign_account(acme.id, own_account.id, Some(outsider.id)).await,
        Err(ServiceError::NotFound(_))
    );
}

#[tokio::test]
async fn contact_must_belong_to_the_given_account() {
    let app = TestApp::new().await;
    let company = app.company("Acme").await;
    let crm = &app.services.crm;
    let first = crm
        .create_account(account_input(company.id, "First"))
        .await
        .unwrap();
    let second = crm
        .create_account(account_input(company.id, "Second"))
        .await
        .unwrap();
    let contact = crm
        .create_contact(NewContact {
            company_id: company.id,
            created_by: 1,
            account_id: Some(first.id),
            name: "Ada".into(),
            email: Some("ada@first.test".into()),
            phone: None,
            title: Some("CTO".into()),
            assigned_to: None,
        })
        .await
        .unwrap();

    let mut opportunity = opportunity_input(company.id);
    opportunity.account_id = Some(second.id);
    opportunity.contact_id = Some(contact.id);
    assert_matches!(
        crm.create_opportunity(opportunity).await,
        Err(ServiceError::InvalidInput(_))
    );

    let (contacts, total) = crm
        .list_contacts(company.id, Some(first.id), 1, 10)
        .await
        .unwrap();
    assert_eq!(total, 1);
    assert_eq!(contacts[0].id, contact.id);
}

#[tokio::test]
async fn opportunity_lines_carry_totals() {
    let app = TestApp::new().await;
    let company = app.company("Acme").await;
    let vat = app.tax(company.id, dec!(20)).await;
    let seat = app.product(company.id, "Seat", dec!(40), Some(vat.id)).await;

    let mut input = opportunity_input(company.id);
    input.stage = Some(OpportunityStage::Proposal);
    input.items = vec![LineItemInput::new(seat.id, dec!(5))];
    let opportunity = app.services.crm.create_opportunity(input).await.unwrap();

    assert_eq!(opportunity.probability, 50);
    assert_eq!(opportunity.subtotal, dec!(200));
    assert_eq!(opportunity.tax_amount, dec!(40));
    assert_eq!(opportunity.total_amount, dec!(240));
}

#[tokio::test]
async fn closing_an_opportunity_pins_probability() {
    let app = TestApp::new().await;
    let company = app.company("Acme").await;
    let crm = &app.services.crm;

    let mut input = opportunity_input(company.id);
    input.probability = Some(35);
    let opportunity = crm.create_opportunity(input).await.unwrap();
    assert_eq!(opportunity.probability, 35);

    let negotiating = crm
        .update_stage(company.id, opportunity.id, OpportunityStage::Negotiation)
        .await
        .unwrap();
    assert_eq!(negotiating.probability, 35);

    let won = crm
        .update_stage(company.id, opportunity.id, OpportunityStage::ClosedWon)
        .await
        .unwrap();
    assert_eq!(won.status, OpportunityStage::ClosedWon);
    assert_eq!(won.probability, 100);

    let lost = crm
        .update_stage(company.id, opportunity.id, OpportunityStage::ClosedLost)
        .await
        .unwrap();
    assert_eq!(lost.probability, 0);
}

#[tokio::test]
async fn invalid_contact_details_are_rejected() {
    let app = TestApp::new().await;
    let company = app.company("Acme").await;
    let mut account = account_input(company.id, "Acme Direct");
    account.email = Some("not-an-email".into());

    let result = app.services.crm.create_account(account).await;
    assert_matches!(result, Err(ServiceError::ValidationError(_)));
}
