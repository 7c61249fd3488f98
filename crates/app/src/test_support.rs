use std::{
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
    },
    time::Duration,
};

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};

use admin_service_bus::{BusError, InMemoryBus, MessageBus, Receipt, Subscription};
use admin_service_core::types::{ApplicationCreate, Domain, DomainCreate};
use admin_service_storage::Database;

use crate::application_service::ApplicationService;
use crate::auth::TokenValidator;
use crate::domain_service::DomainService;
use crate::notifier::Notifier;
use crate::router::{AppState, ServiceOptions};
use crate::service::Clock;
use crate::telemetry;

pub const TEST_SECRET: &[u8] = b"test-secret";

/// Bus whose publish always fails.
#[derive(Default)]
pub struct FailingBus {
    attempts: AtomicUsize,
}

impl FailingBus {
    pub fn attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl MessageBus for FailingBus {
    async fn publish(&self, _topic: &str, _key: &str, _payload: Vec<u8>) -> Result<Receipt, BusError> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        Err(BusError::Publish("broker unavailable".to_string()))
    }

    async fn subscribe(&self, _topic: &str) -> Result<Box<dyn Subscription>, BusError> {
        Err(BusError::Closed)
    }

    async fn close(&self) {}
}

pub struct TestContext {
    database: Database,
    bus: InMemoryBus,
    notifier: Notifier,
    now: DateTime<Utc>,
}

impl TestContext {
    pub async fn new() -> Self {
        let bus = InMemoryBus::new("localhost:9092", "test");
        let notifier = Notifier::new(Arc::new(bus.clone()));
        Self::build(bus, notifier, "sqlite::memory:").await
    }

    pub async fn with_failing_bus() -> Self {
        let bus = InMemoryBus::new("localhost:9092", "test");
        let notifier = Notifier::new(Arc::new(FailingBus::default()));
        Self::build(bus, notifier, "sqlite::memory:").await
    }

    /// Context backed by a database file, for tests that need real
    /// cross-connection locking.
    pub async fn with_database_url(url: &str) -> Self {
        let bus = InMemoryBus::new("localhost:9092", "test");
        let notifier = Notifier::new(Arc::new(bus.clone()));
        Self::build(bus, notifier, url).await
    }

    async fn build(bus: InMemoryBus, notifier: Notifier, url: &str) -> Self {
        let database = Database::connect(url)
            .await
            .expect("connect database");
        database.run_migrations().await.expect("run migrations");
        Self {
            database,
            bus,
            notifier,
            now: Utc.with_ymd_and_hms(2024, 1, 1, 12, 0, 0).unwrap(),
        }
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.now
    }

    pub fn bus(&self) -> &InMemoryBus {
        &self.bus
    }

    pub fn clock(&self) -> Clock {
        fixed_clock(self.now)
    }

    pub fn domains(&self) -> DomainService {
        self.domains_at(self.now)
    }

    pub fn domains_at(&self, now: DateTime<Utc>) -> DomainService {
        DomainService::new(
            self.database.clone(),
            self.notifier.clone(),
            fixed_clock(now),
            Duration::from_secs(5),
        )
    }

    pub fn applications(&self) -> ApplicationService {
        self.application_service(false)
    }

    pub fn applications_notifying(&self) -> ApplicationService {
        self.application_service(true)
    }

    fn application_service(&self, notify_created: bool) -> ApplicationService {
        ApplicationService::new(
            self.database.clone(),
            self.notifier.clone(),
            self.clock(),
            Duration::from_secs(5),
            notify_created,
        )
    }

    pub fn state(&self) -> AppState {
        let metrics = telemetry::init_metrics().expect("metrics");
        AppState::with_clock(
            metrics,
            self.database.clone(),
            self.notifier.clone(),
            test_validator(),
            ServiceOptions {
                operation_timeout: Duration::from_secs(5),
                notify_application_created: false,
            },
            "http://auth-service:8000/api/v1/auth/token".to_string(),
            self.clock(),
        )
    }
}

pub fn fixed_clock(now: DateTime<Utc>) -> Clock {
    Arc::new(move || now)
}

pub fn test_validator() -> TokenValidator {
    TokenValidator::new(TEST_SECRET, jsonwebtoken::Algorithm::HS256, Duration::from_secs(1800))
}

pub fn bearer_token(subject: &str) -> String {
    test_validator()
        .issue(subject, Utc::now())
        .expect("issue token")
}

pub fn domain_input(name: &str, code: &str) -> DomainCreate {
    DomainCreate {
        domain_name: name.to_string(),
        domain_code: code.to_string(),
        description: None,
        status: true,
        action: None,
    }
}

pub fn application_input(name: &str, code: &str, domain_name: &str) -> ApplicationCreate {
    ApplicationCreate {
        application_name: name.to_string(),
        application_code: code.to_string(),
        description: None,
        status: true,
        action: None,
        domain_name: domain_name.to_string(),
        config: None,
    }
}

pub fn sample_domain(id: i64, name: &str) -> Domain {
    Domain {
        id,
        domain_name: name.to_string(),
        domain_code: name.to_uppercase(),
        description: None,
        status: true,
        action: None,
        created_at: Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap(),
        updated_at: None,
    }
}
