use std::time::Duration;

use tracing::info;

use admin_service_core::types::{Domain, DomainCreate, DomainId, DomainUpdate, Page};
use admin_service_storage::Database;

use crate::notifier::Notifier;
use crate::service::{
    commit, with_deadline, Clock, ServiceError, DOMAIN_CODE_TAKEN, DOMAIN_NAME_TAKEN,
    DOMAIN_NOT_FOUND,
};

#[derive(Clone)]
pub struct DomainService {
    database: Database,
    notifier: Notifier,
    clock: Clock,
    deadline: Duration,
}

impl DomainService {
    pub fn new(database: Database, notifier: Notifier, clock: Clock, deadline: Duration) -> Self {
        Self {
            database,
            notifier,
            clock,
            deadline,
        }
    }

    pub async fn create(&self, input: DomainCreate) -> Result<Domain, ServiceError> {
        let domain = with_deadline("create_domain", self.deadline, async {
            let repo = self.database.domains();
            let mut tx = self.database.begin().await?;
            if repo.find_by_name(&mut tx, &input.domain_name).await?.is_some() {
                return Err(ServiceError::Conflict(DOMAIN_NAME_TAKEN));
            }
            if repo.find_by_code(&mut tx, &input.domain_code).await?.is_some() {
                return Err(ServiceError::Conflict(DOMAIN_CODE_TAKEN));
            }
            let domain = repo.insert(&mut tx, &input, (self.clock)()).await?;
            commit(tx).await?;
            Ok(domain)
        })
        .await?;

        info!(
            stage = "service",
            domain_id = domain.id,
            domain_name = %domain.domain_name,
            "domain created"
        );
        self.notifier.domain_created(&domain).await;
        Ok(domain)
    }

    pub async fn get(&self, id: DomainId) -> Result<Domain, ServiceError> {
        with_deadline("get_domain", self.deadline, async {
            let mut tx = self.database.begin_read().await?;
            let domain = self.database.domains().find_by_id(&mut tx, id).await?;
            commit(tx).await?;
            domain.ok_or(ServiceError::NotFound(DOMAIN_NOT_FOUND))
        })
        .await
    }

    pub async fn list(&self, page: Page) -> Result<Vec<Domain>, ServiceError> {
        with_deadline("list_domains", self.deadline, async {
            let mut tx = self.database.begin_read().await?;
            let domains = self.database.domains().list(&mut tx, page).await?;
            commit(tx).await?;
            Ok(domains)
        })
        .await
    }

    pub async fn update(&self, id: DomainId, update: DomainUpdate) -> Result<Domain, ServiceError> {
        let domain = with_deadline("update_domain", self.deadline, async {
            let repo = self.database.domains();
            let mut tx = self.database.begin().await?;
            let mut domain = repo
                .find_by_id(&mut tx, id)
                .await?
                .ok_or(ServiceError::NotFound(DOMAIN_NOT_FOUND))?;

            if let Some(name) = update.domain_name.as_deref() {
                if name != domain.domain_name && repo.find_by_name(&mut tx, name).await?.is_some() {
                    return Err(ServiceError::Conflict(DOMAIN_NAME_TAKEN));
                }
            }
            if let Some(code) = update.domain_code.as_deref() {
                if code != domain.domain_code && repo.find_by_code(&mut tx, code).await?.is_some() {
                    return Err(ServiceError::Conflict(DOMAIN_CODE_TAKEN));
                }
            }

            domain.apply(&update, (self.clock)());
            let domain = repo.update(&mut tx, &domain).await?;
            commit(tx).await?;
            Ok(domain)
        })
        .await?;

        info!(stage = "service", domain_id = domain.id, "domain updated");
        Ok(domain)
    }

    /// Removes the domain together with every application registered under it.
    pub async fn delete(&self, id: DomainId) -> Result<(), ServiceError> {
        let removed = with_deadline("delete_domain", self.deadline, async {
            let repo = self.database.domains();
            let mut tx = self.database.begin().await?;
            let domain = repo
                .find_by_id(&mut tx, id)
                .await?
                .ok_or(ServiceError::NotFound(DOMAIN_NOT_FOUND))?;
            let removed = repo.delete_cascade(&mut tx, &domain).await?;
            commit(tx).await?;
            Ok(removed)
        })
        .await?;

        info!(
            stage = "service",
            domain_id = id,
            applications_removed = removed,
            "domain deleted"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{application_input, domain_input, TestContext};
    use admin_service_bus::{MessageBus, Subscription};
    use admin_service_core::events::DOMAIN_EVENTS_TOPIC;
    use chrono::{TimeZone, Utc};

    #[tokio::test]
    async fn create_rejects_duplicate_name_then_code() {
        let ctx = TestContext::new().await;
        let service = ctx.domains();

        let created = service.create(domain_input("billing", "BIL")).await.unwrap();
        assert_eq!(created.domain_name, "billing");
        assert!(created.status);
        assert_eq!(created.created_at, ctx.now());
        assert!(created.updated_at.is_none());

        let err = service
            .create(domain_input("billing", "BIL2"))
            .await
            .unwrap_err();
        assert!(matches!(err, ServiceError::Conflict(DOMAIN_NAME_TAKEN)));

        let err = service
            .create(domain_input("billing-eu", "BIL"))
            .await
            .unwrap_err();
        assert!(matches!(err, ServiceError::Conflict(DOMAIN_CODE_TAKEN)));

        // Both taken: the name is reported first.
        let err = service
            .create(domain_input("billing", "BIL"))
            .await
            .unwrap_err();
        assert!(matches!(err, ServiceError::Conflict(DOMAIN_NAME_TAKEN)));
    }

    #[tokio::test]
    async fn create_publishes_notification_after_commit() {
        let ctx = TestContext::new().await;
        let mut sub = ctx.bus().subscribe(DOMAIN_EVENTS_TOPIC).await.unwrap();

        let created = ctx
            .domains()
            .create(domain_input("billing", "BIL"))
            .await
            .unwrap();

        let batch = sub
            .poll(std::time::Duration::from_millis(200))
            .await
            .unwrap();
        assert_eq!(batch.len(), 1);
        assert_eq!(batch[0].key, created.id.to_string());
    }

    #[tokio::test]
    async fn create_succeeds_when_publish_fails() {
        let ctx = TestContext::with_failing_bus().await;

        let created = ctx
            .domains()
            .create(domain_input("billing", "BIL"))
            .await
            .unwrap();

        let fetched = ctx.domains().get(created.id).await.unwrap();
        assert_eq!(fetched, created);
    }

    #[tokio::test]
    async fn get_missing_domain_is_not_found() {
        let ctx = TestContext::new().await;
        let err = ctx.domains().get(404).await.unwrap_err();
        assert!(matches!(err, ServiceError::NotFound(DOMAIN_NOT_FOUND)));
    }

    #[tokio::test]
    async fn adjacent_pages_are_disjoint_and_concatenate() {
        let ctx = TestContext::new().await;
        let service = ctx.domains();
        for idx in 0..7 {
            service
                .create(domain_input(&format!("domain-{idx}"), &format!("CODE{idx}")))
                .await
                .unwrap();
        }

        let ids = |domains: Vec<Domain>| domains.into_iter().map(|d| d.id).collect::<Vec<_>>();
        let first = ids(service.list(Page::new(1, 3)).await.unwrap());
        let second = ids(service.list(Page::new(4, 3)).await.unwrap());
        let both = ids(service.list(Page::new(1, 6)).await.unwrap());

        assert_eq!(first.len(), 3);
        assert!(first.iter().all(|id| !second.contains(id)));
        assert_eq!([first, second].concat(), both);
        assert!(service.list(Page::new(50, 10)).await.unwrap().is_empty());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn parallel_creates_end_in_success_or_conflict() {
        let dir = tempfile::tempdir().expect("tempdir");
        let url = format!("sqlite://{}?mode=rwc", dir.path().join("admin.db").display());
        let ctx = TestContext::with_database_url(&url).await;

        for round in 0..10 {
            let mut tasks = Vec::new();
            for i in 0..5 {
                let service = ctx.domains();
                // Same name every round, distinct codes within it.
                let input = domain_input(&format!("shared-{round}"), &format!("R{round}C{i}"));
                tasks.push(tokio::spawn(async move { service.create(input).await }));
            }
            let mut created = 0;
            for task in tasks {
                match task.await.expect("join") {
                    Ok(_) => created += 1,
                    Err(ServiceError::Conflict(DOMAIN_NAME_TAKEN)) => {}
                    Err(other) => panic!("unexpected error: {other:?}"),
                }
            }
            assert_eq!(created, 1, "round {round}");
        }

        let mut tasks = Vec::new();
        for i in 0..5 {
            let service = ctx.domains();
            let input = domain_input(&format!("distinct-{i}"), &format!("DST{i}"));
            tasks.push(tokio::spawn(async move { service.create(input).await }));
        }
        for task in tasks {
            task.await.expect("join").expect("distinct create succeeds");
        }
        let all = ctx.domains().list(Page::new(0, 100)).await.unwrap();
        assert_eq!(all.len(), 15);
    }

    #[tokio::test]
    async fn empty_update_only_touches_timestamp() {
        let ctx = TestContext::new().await;
        let created = ctx
            .domains()
            .create(domain_input("billing", "BIL"))
            .await
            .unwrap();

        let later = Utc.with_ymd_and_hms(2024, 2, 1, 0, 0, 0).unwrap();
        let service = ctx.domains_at(later);
        let updated = service
            .update(created.id, DomainUpdate::default())
            .await
            .unwrap();

        assert_eq!(updated.updated_at, Some(later));
        assert_eq!(
            Domain {
                updated_at: None,
                ..updated
            },
            created
        );
    }

    #[tokio::test]
    async fn update_checks_uniqueness_only_on_change() {
        let ctx = TestContext::new().await;
        let service = ctx.domains();
        let billing = service.create(domain_input("billing", "BIL")).await.unwrap();
        service.create(domain_input("payments", "PAY")).await.unwrap();

        let same = DomainUpdate {
            domain_name: Some("billing".into()),
            domain_code: Some("BIL".into()),
            ..DomainUpdate::default()
        };
        assert!(service.update(billing.id, same).await.is_ok());

        let taken_name = DomainUpdate {
            domain_name: Some("payments".into()),
            ..DomainUpdate::default()
        };
        let err = service.update(billing.id, taken_name).await.unwrap_err();
        assert!(matches!(err, ServiceError::Conflict(DOMAIN_NAME_TAKEN)));

        let taken_code = DomainUpdate {
            domain_code: Some("PAY".into()),
            ..DomainUpdate::default()
        };
        let err = service.update(billing.id, taken_code).await.unwrap_err();
        assert!(matches!(err, ServiceError::Conflict(DOMAIN_CODE_TAKEN)));

        let err = service
            .update(999, DomainUpdate::default())
            .await
            .unwrap_err();
        assert!(matches!(err, ServiceError::NotFound(DOMAIN_NOT_FOUND)));
    }

    #[tokio::test]
    async fn update_can_clear_nullable_fields() {
        let ctx = TestContext::new().await;
        let mut input = domain_input("billing", "BIL");
        input.description = Some("money".into());
        let created = ctx.domains().create(input).await.unwrap();

        let update = DomainUpdate {
            description: Some(None),
            status: Some(false),
            ..DomainUpdate::default()
        };
        let updated = ctx.domains().update(created.id, update).await.unwrap();
        assert_eq!(updated.description, None);
        assert!(!updated.status);
    }

    #[tokio::test]
    async fn rename_carries_applications_along() {
        let ctx = TestContext::new().await;
        let billing = ctx
            .domains()
            .create(domain_input("billing", "BIL"))
            .await
            .unwrap();
        let app = ctx
            .applications()
            .create(application_input("invoice-svc", "INV", "billing"))
            .await
            .unwrap();

        let rename = DomainUpdate {
            domain_name: Some("invoicing".into()),
            ..DomainUpdate::default()
        };
        ctx.domains().update(billing.id, rename).await.unwrap();

        let moved = ctx.applications().get(app.id).await.unwrap();
        assert_eq!(moved.domain_name, "invoicing");
    }

    #[tokio::test]
    async fn delete_cascades_to_applications() {
        let ctx = TestContext::new().await;
        let billing = ctx
            .domains()
            .create(domain_input("billing", "BIL"))
            .await
            .unwrap();
        ctx.domains()
            .create(domain_input("payments", "PAY"))
            .await
            .unwrap();
        let first = ctx
            .applications()
            .create(application_input("invoice-svc", "INV", "billing"))
            .await
            .unwrap();
        let second = ctx
            .applications()
            .create(application_input("ledger", "LED", "billing"))
            .await
            .unwrap();
        let survivor = ctx
            .applications()
            .create(application_input("gateway", "GTW", "payments"))
            .await
            .unwrap();

        ctx.domains().delete(billing.id).await.unwrap();

        for id in [first.id, second.id] {
            let err = ctx.applications().get(id).await.unwrap_err();
            assert!(matches!(err, ServiceError::NotFound(_)));
        }
        assert!(ctx.applications().get(survivor.id).await.is_ok());
        let err = ctx.domains().delete(billing.id).await.unwrap_err();
        assert!(matches!(err, ServiceError::NotFound(DOMAIN_NOT_FOUND)));
    }
}
