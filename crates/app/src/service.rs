use std::{future::Future, sync::Arc, time::Duration};

use chrono::{DateTime, Utc};
use metrics::histogram;
use thiserror::Error;
use tokio::time::Instant;

use admin_service_core::ValidationError;
use admin_service_storage::{RepositoryError, StorageError, Tx};

pub type Clock = Arc<dyn Fn() -> DateTime<Utc> + Send + Sync>;

pub const DOMAIN_NOT_FOUND: &str = "Domain not found";
pub const APPLICATION_NOT_FOUND: &str = "Application not found";
pub const DOMAIN_NAME_TAKEN: &str = "Domain name already registered";
pub const DOMAIN_CODE_TAKEN: &str = "Domain code already registered";
pub const APPLICATION_NAME_TAKEN: &str = "Application name already exists in this domain";
pub const APPLICATION_CODE_TAKEN: &str = "Application code already registered";

#[derive(Debug, Error)]
pub enum ServiceError {
    #[error("{0}")]
    NotFound(&'static str),
    #[error("{0}")]
    Conflict(&'static str),
    #[error(transparent)]
    Validation(#[from] ValidationError),
    #[error("operation {0} timed out")]
    Timeout(&'static str),
    #[error(transparent)]
    Storage(#[from] StorageError),
    #[error(transparent)]
    Repository(RepositoryError),
}

impl From<RepositoryError> for ServiceError {
    fn from(err: RepositoryError) -> Self {
        if err.is_unique_on("domains.domain_name") {
            return Self::Conflict(DOMAIN_NAME_TAKEN);
        }
        if err.is_unique_on("domains.domain_code") {
            return Self::Conflict(DOMAIN_CODE_TAKEN);
        }
        if err.is_unique_on("applications.application_code") {
            return Self::Conflict(APPLICATION_CODE_TAKEN);
        }
        if err.is_unique_on("applications.application_name") {
            return Self::Conflict(APPLICATION_NAME_TAKEN);
        }
        match err {
            // Only applications.domain_name carries a foreign key.
            RepositoryError::MissingReference => Self::NotFound(DOMAIN_NOT_FOUND),
            other => Self::Repository(other),
        }
    }
}

impl ServiceError {
    /// Label used for the `result` dimension of request metrics.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::NotFound(_) => "not_found",
            Self::Conflict(_) => "conflict",
            Self::Validation(_) => "invalid",
            Self::Timeout(_) => "timeout",
            Self::Storage(_) | Self::Repository(_) => "error",
        }
    }
}

/// Runs `work` under the per-operation deadline and records its duration.
/// A timed out unit of work is dropped, which rolls its transaction back.
pub(crate) async fn with_deadline<T, F>(
    op: &'static str,
    deadline: Duration,
    work: F,
) -> Result<T, ServiceError>
where
    F: Future<Output = Result<T, ServiceError>>,
{
    let started = Instant::now();
    let result = tokio::time::timeout(deadline, work)
        .await
        .unwrap_or(Err(ServiceError::Timeout(op)));
    histogram!("service_operation_seconds", "op" => op).record(started.elapsed().as_secs_f64());
    result
}

pub(crate) async fn commit(tx: Tx) -> Result<(), ServiceError> {
    tx.commit()
        .await
        .map_err(|err| ServiceError::Storage(StorageError::Database(err)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{application_input, domain_input};
    use admin_service_storage::Database;

    #[tokio::test]
    async fn deadline_passes_through_results() {
        let value = with_deadline("test_op", Duration::from_secs(1), async {
            Ok::<_, ServiceError>(7)
        })
        .await
        .unwrap();
        assert_eq!(value, 7);
    }

    #[tokio::test]
    async fn deadline_reports_timeout() {
        let err = with_deadline("slow_op", Duration::from_millis(10), async {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok::<_, ServiceError>(())
        })
        .await
        .unwrap_err();
        assert!(matches!(err, ServiceError::Timeout("slow_op")));
        assert_eq!(err.kind(), "timeout");
    }

    fn unique(columns: &[&str]) -> RepositoryError {
        RepositoryError::UniqueViolation {
            columns: columns.iter().map(|c| c.to_string()).collect(),
        }
    }

    #[test]
    fn unique_violations_map_to_conflicts() {
        let cases = [
            (unique(&["domains.domain_name"]), DOMAIN_NAME_TAKEN),
            (unique(&["domains.domain_code"]), DOMAIN_CODE_TAKEN),
            (unique(&["applications.application_code"]), APPLICATION_CODE_TAKEN),
            (
                unique(&["applications.domain_name", "applications.application_name"]),
                APPLICATION_NAME_TAKEN,
            ),
        ];
        for (err, expected) in cases {
            let mapped = ServiceError::from(err);
            assert!(
                matches!(mapped, ServiceError::Conflict(message) if message == expected),
                "{mapped:?}"
            );
            assert_eq!(mapped.kind(), "conflict");
        }

        let unknown = ServiceError::from(unique(&["other.column"]));
        assert!(matches!(unknown, ServiceError::Repository(_)));
    }

    #[tokio::test]
    async fn constraint_hit_without_precheck_is_a_conflict() {
        let db = Database::connect("sqlite::memory:").await.unwrap();
        db.run_migrations().await.unwrap();
        let domain = domain_input("billing", "BIL");
        let mut tx = db.begin().await.unwrap();
        db.domains().insert(&mut tx, &domain, Utc::now()).await.unwrap();
        db.applications()
            .insert(&mut tx, &application_input("invoice-svc", "INV", "billing"), Utc::now())
            .await
            .unwrap();

        let err = db
            .domains()
            .insert(&mut tx, &domain_input("billing", "BIL2"), Utc::now())
            .await
            .unwrap_err();
        assert!(matches!(ServiceError::from(err), ServiceError::Conflict(DOMAIN_NAME_TAKEN)));

        let err = db
            .applications()
            .insert(&mut tx, &application_input("invoice-svc", "INV2", "billing"), Utc::now())
            .await
            .unwrap_err();
        assert!(matches!(
            ServiceError::from(err),
            ServiceError::Conflict(APPLICATION_NAME_TAKEN)
        ));

        let err = db
            .applications()
            .insert(&mut tx, &application_input("ledger", "INV", "billing"), Utc::now())
            .await
            .unwrap_err();
        assert!(matches!(
            ServiceError::from(err),
            ServiceError::Conflict(APPLICATION_CODE_TAKEN)
        ));
    }

    #[test]
    fn missing_reference_maps_to_domain_not_found() {
        let err = ServiceError::from(RepositoryError::MissingReference);
        assert!(matches!(err, ServiceError::NotFound(DOMAIN_NOT_FOUND)));
    }
}
