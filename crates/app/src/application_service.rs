use std::time::Duration;

use tracing::info;

use admin_service_core::types::{
    Application, ApplicationCreate, ApplicationId, ApplicationUpdate, Page,
};
use admin_service_storage::{Database, Tx};

use crate::notifier::Notifier;
use crate::service::{
    commit, with_deadline, Clock, ServiceError, APPLICATION_CODE_TAKEN, APPLICATION_NAME_TAKEN,
    APPLICATION_NOT_FOUND, DOMAIN_NOT_FOUND,
};

#[derive(Clone)]
pub struct ApplicationService {
    database: Database,
    notifier: Notifier,
    clock: Clock,
    deadline: Duration,
    notify_created: bool,
}

impl ApplicationService {
    pub fn new(
        database: Database,
        notifier: Notifier,
        clock: Clock,
        deadline: Duration,
        notify_created: bool,
    ) -> Self {
        Self {
            database,
            notifier,
            clock,
            deadline,
            notify_created,
        }
    }

    pub async fn create(&self, input: ApplicationCreate) -> Result<Application, ServiceError> {
        let (application, domain_id) = with_deadline("create_application", self.deadline, async {
            let mut tx = self.database.begin().await?;
            let domain = self
                .database
                .domains()
                .find_by_name(&mut tx, &input.domain_name)
                .await?
                .ok_or(ServiceError::NotFound(DOMAIN_NOT_FOUND))?;

            if self
                .name_taken(&mut tx, &input.domain_name, &input.application_name, None)
                .await?
            {
                return Err(ServiceError::Conflict(APPLICATION_NAME_TAKEN));
            }
            let apps = self.database.applications();
            if apps
                .find_by_code(&mut tx, &input.application_code)
                .await?
                .is_some()
            {
                return Err(ServiceError::Conflict(APPLICATION_CODE_TAKEN));
            }

            let application = apps.insert(&mut tx, &input, (self.clock)()).await?;
            commit(tx).await?;
            Ok((application, domain.id))
        })
        .await?;

        info!(
            stage = "service",
            application_id = application.id,
            application_name = %application.application_name,
            domain_name = %application.domain_name,
            "application created"
        );
        if self.notify_created {
            self.notifier
                .application_created(&application, domain_id)
                .await;
        }
        Ok(application)
    }

    pub async fn get(&self, id: ApplicationId) -> Result<Application, ServiceError> {
        with_deadline("get_application", self.deadline, async {
            let mut tx = self.database.begin_read().await?;
            let application = self.database.applications().find_by_id(&mut tx, id).await?;
            commit(tx).await?;
            application.ok_or(ServiceError::NotFound(APPLICATION_NOT_FOUND))
        })
        .await
    }

    pub async fn list(&self, page: Page) -> Result<Vec<Application>, ServiceError> {
        with_deadline("list_applications", self.deadline, async {
            let mut tx = self.database.begin_read().await?;
            let applications = self.database.applications().list(&mut tx, page).await?;
            commit(tx).await?;
            Ok(applications)
        })
        .await
    }

    /// Applications registered under `domain_name`. An empty result is not
    /// an error here.
    pub async fn list_by_domain(
        &self,
        domain_name: &str,
        application_name: Option<&str>,
        page: Page,
    ) -> Result<Vec<Application>, ServiceError> {
        with_deadline("list_applications_by_domain", self.deadline, async {
            let mut tx = self.database.begin_read().await?;
            let applications = self
                .database
                .applications()
                .list_by_domain(&mut tx, domain_name, application_name, page)
                .await?;
            commit(tx).await?;
            Ok(applications)
        })
        .await
    }

    pub async fn update(
        &self,
        id: ApplicationId,
        update: ApplicationUpdate,
    ) -> Result<Application, ServiceError> {
        let application = with_deadline("update_application", self.deadline, async {
            let apps = self.database.applications();
            let mut tx = self.database.begin().await?;
            let mut application = apps
                .find_by_id(&mut tx, id)
                .await?
                .ok_or(ServiceError::NotFound(APPLICATION_NOT_FOUND))?;

            if let Some(domain_name) = update.domain_name.as_deref() {
                self.database
                    .domains()
                    .find_by_name(&mut tx, domain_name)
                    .await?
                    .ok_or(ServiceError::NotFound(DOMAIN_NOT_FOUND))?;
            }

            let domain_name = update
                .domain_name
                .as_deref()
                .unwrap_or(&application.domain_name);
            let name = update
                .application_name
                .as_deref()
                .unwrap_or(&application.application_name);
            let moved = domain_name != application.domain_name;
            let renamed = name != application.application_name;
            if (moved || renamed)
                && self
                    .name_taken(&mut tx, domain_name, name, Some(application.id))
                    .await?
            {
                return Err(ServiceError::Conflict(APPLICATION_NAME_TAKEN));
            }

            if let Some(code) = update.application_code.as_deref() {
                if code != application.application_code
                    && apps.find_by_code(&mut tx, code).await?.is_some()
                {
                    return Err(ServiceError::Conflict(APPLICATION_CODE_TAKEN));
                }
            }

            application.apply(&update, (self.clock)());
            let application = apps.update(&mut tx, &application).await?;
            commit(tx).await?;
            Ok(application)
        })
        .await?;

        info!(
            stage = "service",
            application_id = application.id,
            "application updated"
        );
        Ok(application)
    }

    pub async fn delete(&self, id: ApplicationId) -> Result<(), ServiceError> {
        with_deadline("delete_application", self.deadline, async {
            let mut tx = self.database.begin().await?;
            if !self.database.applications().delete(&mut tx, id).await? {
                return Err(ServiceError::NotFound(APPLICATION_NOT_FOUND));
            }
            commit(tx).await
        })
        .await?;

        info!(stage = "service", application_id = id, "application deleted");
        Ok(())
    }

    /// Whether another application already uses `name` inside `domain_name`.
    async fn name_taken(
        &self,
        tx: &mut Tx,
        domain_name: &str,
        name: &str,
        except: Option<ApplicationId>,
    ) -> Result<bool, ServiceError> {
        let existing = self
            .database
            .applications()
            .list_by_domain(tx, domain_name, Some(name), Page::new(0, 2))
            .await?;
        Ok(existing.iter().any(|app| Some(app.id) != except))
    }
}
