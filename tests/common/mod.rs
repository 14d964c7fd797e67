#![allow(dead_code)]

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::Utc;
use rust_decimal::Decimal;
use sea_orm::{ActiveModelTrait, Set};
use tenantdesk::{
    config::AppConfig,
    db::{self, DbPool},
    entities::{company, product, tax, user::UserRole},
    events::{self, Event, EventHandler, EventSender},
    services::{
        invoicing::NewInvoice,
        plans::{NewCompany, NewUser},
    },
    AppServices,
};

pub const TEST_SETTINGS_KEY: &str = "test-settings-key-for-integration-runs-0123456789";

/// Collects the names of every event published while a test runs.
#[derive(Default)]
pub struct EventLog(Mutex<Vec<Event>>);

impl EventLog {
    pub fn names(&self) -> Vec<&'static str> {
        self.0.lock().unwrap().iter().map(Event::name).collect()
    }

    pub fn events(&self) -> Vec<Event> {
        self.0.lock().unwrap().clone()
    }
}

#[async_trait]
impl EventHandler for EventLog {
    async fn handle_event(&self, event: Event) -> Result<(), String> {
        self.0.lock().unwrap().push(event);
        Ok(())
    }
}

/// Services over a freshly migrated in-memory SQLite database.
pub struct TestApp {
    pub config: AppConfig,
    pub db: Arc<DbPool>,
    pub services: AppServices,
    pub event_sender: Arc<EventSender>,
    pub events: Arc<EventLog>,
    _event_task: tokio::task::JoinHandle<()>,
}

impl TestApp {
    pub async fn new() -> Self {
        Self::with_config(|_| {}).await
    }

    /// Like [`TestApp::new`], letting the test adjust the configuration
    /// before services are built.
    pub async fn with_config(adjust: impl FnOnce(&mut AppConfig)) -> Self {
        let mut cfg = AppConfig::new(
            "sqlite::memory:".to_string(),
            TEST_SETTINGS_KEY.to_string(),
            "test".to_string(),
        );
        cfg.database.max_connections = 1;
        cfg.database.min_connections = 1;
        adjust(&mut cfg);

        let pool = db::establish_connection_from_app_config(&cfg)
            .await
            .expect("failed to create test database");
        db::run_migrations(&pool)
            .await
            .expect("failed to run migrations in tests");
        let db = Arc::new(pool);

        let (event_sender, event_rx) = EventSender::channel(256);
        let event_sender = Arc::new(event_sender);
        let log = Arc::new(EventLog::default());
        let handler: Arc<dyn EventHandler> = log.clone();
        let event_task = tokio::spawn(events::process_events_with_handlers(
            event_rx,
            vec![handler],
        ));

        let services = AppServices::new(&cfg, db.clone(), Some(event_sender.clone()))
            .expect("services should build");

        Self {
            config: cfg,
            db,
            services,
            event_sender,
            events: log,
            _event_task: event_task,
        }
    }

    /// Lets the event loop catch up before a test inspects [`EventLog`].
    pub async fn settle(&self) {
        for _ in 0..10 {
            tokio::task::yield_now().await;
        }
    }

    pub async fn company(&self, name: &str) -> company::Model {
        self.services
            .plans
            .create_company(NewCompany {
                name: name.to_string(),
                email: None,
                currency: None,
            })
            .await
            .expect("company")
    }

    pub async fn user(&self, company_id: i32, email: &str) -> tenantdesk::entities::user::Model {
        self.services
            .plans
            .create_user(NewUser {
                company_id,
                name: email.split('@').next().unwrap_or("user").to_string(),
                email: email.to_string(),
                role: UserRole::Staff,
            })
            .await
            .expect("user")
    }

    pub async fn tax(&self, company_id: i32, rate: Decimal) -> tax::Model {
        tax::ActiveModel {
            company_id: Set(company_id),
            name: Set(format!("VAT {}%", rate)),
            rate: Set(rate),
            created_at: Set(Utc::now()),
            ..Default::default()
        }
        .insert(&*self.db)
        .await
        .expect("tax")
    }

    pub async fn product(
        &self,
        company_id: i32,
        name: &str,
        price: Decimal,
        tax_id: Option<i32>,
    ) -> product::Model {
        product::ActiveModel {
            company_id: Set(company_id),
            name: Set(name.to_string()),
            sku: Set(None),
            description: Set(None),
            price: Set(price),
            tax_id: Set(tax_id),
            is_active: Set(true),
            created_at: Set(Utc::now()),
            updated_at: Set(None),
            ..Default::default()
        }
        .insert(&*self.db)
        .await
        .expect("product")
    }

    /// Invoice with an empty body, ready for lines.
    pub fn invoice_input(company_id: i32, created_by: i32) -> NewInvoice {
        NewInvoice {
            company_id,
            created_by,
            account_id: None,
            contact_id: None,
            issue_date: None,
            due_date: None,
            currency: None,
            shipping_amount: Decimal::ZERO,
            notes: None,
            items: Vec::new(),
        }
    }
}
