//! Shared fixtures for billing-engine integration tests.
#![allow(dead_code)]

use billing_engine::clock::{Clock, FixedClock};
use billing_engine::config::EngineConfig;
use billing_engine::models::{
    Bill, BillingCycle, Client, CreateBill, CreatePlan, CreateService, Discount, LineItem, Plan,
    Service,
};
use billing_engine::services::{MemoryStore, Repositories};
use billing_engine::startup::{AppState, Application};
use chrono::NaiveDate;
use rust_decimal::Decimal;
use std::sync::Arc;
use uuid::Uuid;

pub fn date(y: i32, m: u32, d: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(y, m, d).expect("valid date")
}

pub fn dec(s: &str) -> Decimal {
    s.parse().expect("valid decimal")
}

pub fn test_config() -> EngineConfig {
    let mut config = EngineConfig::default();
    config.common.host = "127.0.0.1".to_string();
    config.common.port = 0;
    config.scheduler.enabled = false;
    config.pricing.subscription_tax_percentage = Decimal::from(18);
    config.pricing.default_bill_tax_rate = Decimal::ZERO;
    config
}

/// Services wired over an in-memory store and a clock the test controls.
pub struct Harness {
    pub state: AppState,
    pub store: Arc<MemoryStore>,
    pub clock: Arc<FixedClock>,
    pub company_id: Uuid,
    pub operator_id: Uuid,
}

impl Harness {
    pub fn new(today: NaiveDate) -> Self {
        let store = Arc::new(MemoryStore::new());
        let clock = Arc::new(FixedClock::at_date(today));
        let repos = Repositories::from_store(store.clone());
        Self::with_repos(repos, store, clock)
    }

    pub fn with_repos(repos: Repositories, store: Arc<MemoryStore>, clock: Arc<FixedClock>) -> Self {
        let state = AppState::new(test_config(), repos, clock.clone());
        Self {
            state,
            store,
            clock,
            company_id: Uuid::new_v4(),
            operator_id: Uuid::new_v4(),
        }
    }

    pub async fn client(&self) -> Client {
        self.state
            .subscriptions
            .upsert_client(Client {
                id: Uuid::new_v4(),
                company_id: self.company_id,
                user_id: Uuid::new_v4(),
                name: "Acme Traders".to_string(),
                email: Some("accounts@acme.test".to_string()),
                is_active: true,
                plan_id: None,
                plan_end_date: None,
                updated_utc: self.state.clock.now(),
            })
            .await
            .expect("client upsert")
    }

    pub async fn service(&self, name: &str, price: &str, cycles: &[BillingCycle]) -> Service {
        self.state
            .catalog
            .create_service(CreateService {
                company_id: self.company_id,
                name: name.to_string(),
                description: None,
                base_price: dec(price),
                allowed_cycles: cycles.iter().copied().collect(),
                features: vec![format!("{} access", name)],
                created_by: self.operator_id,
            })
            .await
            .expect("service create")
    }

    pub async fn plan(&self, name: &str, services: &[&Service]) -> Plan {
        self.state
            .catalog
            .create_plan(CreatePlan {
                company_id: self.company_id,
                name: name.to_string(),
                description: None,
                service_ids: services.iter().map(|s| s.id).collect(),
                custom_prices: vec![],
                override_price: None,
                discount: None,
                created_by: self.operator_id,
            })
            .await
            .expect("plan create")
    }

    pub async fn bill(
        &self,
        client_id: Uuid,
        items: Vec<LineItem>,
        due_date: NaiveDate,
        tax_rate: Option<Decimal>,
        discount: Option<Discount>,
    ) -> Bill {
        self.state
            .bills
            .create(CreateBill {
                company_id: self.company_id,
                client_id,
                items,
                due_date,
                tax_rate,
                discount,
                notes: None,
                created_by: self.operator_id,
            })
            .await
            .expect("bill create")
    }

    /// A single-line bill for `amount` with no tax.
    pub async fn simple_bill(&self, client_id: Uuid, amount: &str, due_date: NaiveDate) -> Bill {
        self.bill(
            client_id,
            vec![LineItem::new("Consulting", Decimal::ONE, dec(amount))],
            due_date,
            Some(Decimal::ZERO),
            None,
        )
        .await
    }
}

/// The HTTP application on a random port over an in-memory store.
pub struct TestApp {
    pub address: String,
    pub port: u16,
    pub company_id: Uuid,
    pub operator_id: Uuid,
    pub http: reqwest::Client,
    pub clock: Arc<FixedClock>,
    pub state: AppState,
}

impl TestApp {
    pub async fn spawn(today: NaiveDate) -> Self {
        let store = Arc::new(MemoryStore::new());
        let clock = Arc::new(FixedClock::at_date(today));
        let app = Application::build_with(
            test_config(),
            Repositories::from_store(store),
            clock.clone(),
        )
        .await
        .expect("Failed to build test application");

        let port = app.port();
        let address = format!("http://127.0.0.1:{}", port);
        let state = app.state().clone();

        tokio::spawn(async move {
            app.run_until_stopped().await.ok();
        });

        let http = reqwest::Client::new();
        let health_url = format!("{}/health", address);
        for _ in 0..50 {
            if http.get(&health_url).send().await.is_ok() {
                break;
            }
            tokio::time::sleep(tokio::time::Duration::from_millis(20)).await;
        }

        TestApp {
            address,
            port,
            company_id: Uuid::new_v4(),
            operator_id: Uuid::new_v4(),
            http,
            clock,
            state,
        }
    }

    pub fn url(&self, path: &str) -> String {
        format!("{}{}", self.address, path)
    }

    /// Request builder carrying operator caller headers.
    pub fn as_operator(&self, method: reqwest::Method, path: &str) -> reqwest::RequestBuilder {
        self.http
            .request(method, self.url(path))
            .header("X-Company-ID", self.company_id.to_string())
            .header("X-User-ID", self.operator_id.to_string())
            .header("X-Role", "operator")
    }

    /// Request builder carrying client caller headers.
    pub fn as_client(
        &self,
        client: &Client,
        method: reqwest::Method,
        path: &str,
    ) -> reqwest::RequestBuilder {
        self.http
            .request(method, self.url(path))
            .header("X-Company-ID", self.company_id.to_string())
            .header("X-User-ID", client.user_id.to_string())
            .header("X-Role", "client")
            .header("X-Client-ID", client.id.to_string())
    }

    pub async fn register_client(&self) -> Client {
        let id = Uuid::new_v4();
        let response = self
            .as_operator(reqwest::Method::PUT, &format!("/clients/{}", id))
            .json(&serde_json::json!({
                "userId": Uuid::new_v4(),
                "name": "Globex Ltd",
                "email": "billing@globex.test",
            }))
            .send()
            .await
            .expect("request failed");
        assert_eq!(response.status(), 200);
        response.json().await.expect("client body")
    }
}
