use std::{str::FromStr, time::Duration};

use chrono::{DateTime, SecondsFormat, Utc};
use sqlx::{
    migrate::MigrateError,
    sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteSynchronous},
    Sqlite, SqlitePool, Transaction,
};
use thiserror::Error;
use tracing::info;

use admin_service_core::types::{
    Application, ApplicationCreate, ApplicationId, Domain, DomainCreate, DomainId, Page,
};

/// Unit of work handed to repository calls. Dropping it without
/// [`Transaction::commit`] rolls every statement back.
pub type Tx = Transaction<'static, Sqlite>;

/// Top-level database handle. Reads share a pool; write units of work go
/// through a single-connection writer so SQLite never has to upgrade a
/// deferred read lock while another connection holds the write lock.
#[derive(Clone)]
pub struct Database {
    pool: SqlitePool,
    writer: SqlitePool,
}

impl Database {
    /// Establishes the reader and writer pools for the provided connection string.
    pub async fn connect(database_url: &str) -> Result<Self, StorageError> {
        let options = connect_options(database_url).map_err(StorageError::Connect)?;
        let writer = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(options.clone())
            .await
            .map_err(StorageError::Connect)?;
        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await
            .map_err(StorageError::Connect)?;

        info!(stage = "storage", "database pool ready");
        Ok(Self { pool, writer })
    }

    /// Applies migrations located under `migrations/`.
    pub async fn run_migrations(&self) -> Result<(), StorageError> {
        sqlx::migrate!("../../migrations")
            .run(&self.writer)
            .await
            .map_err(StorageError::Migration)?;
        Ok(())
    }

    /// Opens a write transaction scoped to a single service operation.
    /// Write transactions are serialized on the writer connection.
    pub async fn begin(&self) -> Result<Tx, StorageError> {
        self.writer.begin().await.map_err(StorageError::Database)
    }

    /// Opens a read-only unit of work on the shared reader pool.
    pub async fn begin_read(&self) -> Result<Tx, StorageError> {
        self.pool.begin().await.map_err(StorageError::Database)
    }

    /// Returns a handle for the `domains` table.
    pub fn domains(&self) -> DomainRepository {
        DomainRepository { _private: () }
    }

    /// Returns a handle for the `applications` table.
    pub fn applications(&self) -> ApplicationRepository {
        ApplicationRepository { _private: () }
    }

    /// Exposes the reader pool when lower level access is required.
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Waits for checked-out connections and closes both pools.
    pub async fn close(&self) {
        self.pool.close().await;
        self.writer.close().await;
    }
}

// Foreign keys must be enabled on every pooled connection for the
// applications -> domains cascade to fire.
fn connect_options(database_url: &str) -> Result<SqliteConnectOptions, sqlx::Error> {
    Ok(SqliteConnectOptions::from_str(database_url)?
        .foreign_keys(true)
        .journal_mode(SqliteJournalMode::Wal)
        .synchronous(SqliteSynchronous::Normal)
        .busy_timeout(Duration::from_secs(5)))
}

/// General storage level errors.
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("failed to connect to sqlite: {0}")]
    Connect(sqlx::Error),
    #[error("failed to run database migrations: {0}")]
    Migration(MigrateError),
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}

/// Errors raised by repository statements.
#[derive(Debug, Error)]
pub enum RepositoryError {
    #[error("unique constraint failed on {}", .columns.join(", "))]
    UniqueViolation { columns: Vec<String> },
    #[error("referenced row does not exist")]
    MissingReference,
    #[error("database error: {0}")]
    Database(sqlx::Error),
}

impl RepositoryError {
    /// Returns `true` when the violated unique constraint covers `column`
    /// (qualified as `table.column`).
    pub fn is_unique_on(&self, column: &str) -> bool {
        match self {
            Self::UniqueViolation { columns } => columns.iter().any(|c| c == column),
            _ => false,
        }
    }
}

impl From<sqlx::Error> for RepositoryError {
    fn from(err: sqlx::Error) -> Self {
        if let sqlx::Error::Database(db_err) = &err {
            match db_err.code().as_deref() {
                // SQLITE_CONSTRAINT_UNIQUE, SQLITE_CONSTRAINT_PRIMARYKEY
                Some("2067") | Some("1555") => {
                    return Self::UniqueViolation {
                        columns: constraint_columns(db_err.message()),
                    };
                }
                // SQLITE_CONSTRAINT_FOREIGNKEY
                Some("787") => return Self::MissingReference,
                _ => {}
            }
        }
        Self::Database(err)
    }
}

/// Extracts `table.column` pairs from "UNIQUE constraint failed: a.b, a.c".
fn constraint_columns(message: &str) -> Vec<String> {
    message
        .split_once(':')
        .map(|(_, rest)| rest)
        .unwrap_or_default()
        .split(',')
        .map(|column| column.trim().to_string())
        .filter(|column| !column.is_empty())
        .collect()
}

const DOMAIN_COLUMNS: &str =
    "id, domain_name, domain_code, description, status, action, created_at, updated_at";

/// Repository for the `domains` table.
#[derive(Clone)]
pub struct DomainRepository {
    _private: (),
}

impl DomainRepository {
    pub async fn find_by_id(
        &self,
        tx: &mut Tx,
        id: DomainId,
    ) -> Result<Option<Domain>, RepositoryError> {
        let row = sqlx::query_as::<_, DomainRow>(&format!(
            "SELECT {DOMAIN_COLUMNS} FROM domains WHERE id = ?"
        ))
        .bind(id)
        .fetch_optional(&mut **tx)
        .await?;
        Ok(row.map(DomainRow::into_domain))
    }

    pub async fn find_by_name(
        &self,
        tx: &mut Tx,
        domain_name: &str,
    ) -> Result<Option<Domain>, RepositoryError> {
        let row = sqlx::query_as::<_, DomainRow>(&format!(
            "SELECT {DOMAIN_COLUMNS} FROM domains WHERE domain_name = ?"
        ))
        .bind(domain_name)
        .fetch_optional(&mut **tx)
        .await?;
        Ok(row.map(DomainRow::into_domain))
    }

    pub async fn find_by_code(
        &self,
        tx: &mut Tx,
        domain_code: &str,
    ) -> Result<Option<Domain>, RepositoryError> {
        let row = sqlx::query_as::<_, DomainRow>(&format!(
            "SELECT {DOMAIN_COLUMNS} FROM domains WHERE domain_code = ?"
        ))
        .bind(domain_code)
        .fetch_optional(&mut **tx)
        .await?;
        Ok(row.map(DomainRow::into_domain))
    }

    /// Lists domains in insertion order.
    pub async fn list(&self, tx: &mut Tx, page: Page) -> Result<Vec<Domain>, RepositoryError> {
        let rows = sqlx::query_as::<_, DomainRow>(&format!(
            "SELECT {DOMAIN_COLUMNS} FROM domains ORDER BY id ASC LIMIT ? OFFSET ?"
        ))
        .bind(page.limit)
        .bind(page.offset)
        .fetch_all(&mut **tx)
        .await?;
        Ok(rows.into_iter().map(DomainRow::into_domain).collect())
    }

    pub async fn insert(
        &self,
        tx: &mut Tx,
        input: &DomainCreate,
        created_at: DateTime<Utc>,
    ) -> Result<Domain, RepositoryError> {
        let row = sqlx::query_as::<_, DomainRow>(&format!(
            "INSERT INTO domains (domain_name, domain_code, description, status, action, created_at) \
             VALUES (?, ?, ?, ?, ?, ?) \
             RETURNING {DOMAIN_COLUMNS}"
        ))
        .bind(&input.domain_name)
        .bind(&input.domain_code)
        .bind(&input.description)
        .bind(input.status)
        .bind(&input.action)
        .bind(to_rfc3339(created_at))
        .fetch_one(&mut **tx)
        .await?;
        Ok(row.into_domain())
    }

    /// Writes every mutable column of `domain`. A renamed domain carries its
    /// applications along through `ON UPDATE CASCADE`.
    pub async fn update(&self, tx: &mut Tx, domain: &Domain) -> Result<Domain, RepositoryError> {
        let row = sqlx::query_as::<_, DomainRow>(&format!(
            "UPDATE domains \
             SET domain_name = ?, domain_code = ?, description = ?, status = ?, action = ?, updated_at = ? \
             WHERE id = ? \
             RETURNING {DOMAIN_COLUMNS}"
        ))
        .bind(&domain.domain_name)
        .bind(&domain.domain_code)
        .bind(&domain.description)
        .bind(domain.status)
        .bind(&domain.action)
        .bind(domain.updated_at.map(to_rfc3339))
        .bind(domain.id)
        .fetch_one(&mut **tx)
        .await?;
        Ok(row.into_domain())
    }

    /// Deletes the domain and every application registered under its name,
    /// returning the number of applications removed.
    pub async fn delete_cascade(
        &self,
        tx: &mut Tx,
        domain: &Domain,
    ) -> Result<u64, RepositoryError> {
        let applications = sqlx::query("DELETE FROM applications WHERE domain_name = ?")
            .bind(&domain.domain_name)
            .execute(&mut **tx)
            .await?
            .rows_affected();

        sqlx::query("DELETE FROM domains WHERE id = ?")
            .bind(domain.id)
            .execute(&mut **tx)
            .await?;

        Ok(applications)
    }
}

#[derive(Debug, sqlx::FromRow)]
struct DomainRow {
    id: i64,
    domain_name: String,
    domain_code: String,
    description: Option<String>,
    status: bool,
    action: Option<String>,
    created_at: DateTime<Utc>,
    updated_at: Option<DateTime<Utc>>,
}

impl DomainRow {
    fn into_domain(self) -> Domain {
        Domain {
            id: self.id,
            domain_name: self.domain_name,
            domain_code: self.domain_code,
            description: self.description,
            status: self.status,
            action: self.action,
            created_at: self.created_at,
            updated_at: self.updated_at,
        }
    }
}

const APPLICATION_COLUMNS: &str = "id, application_name, application_code, description, status, \
     action, domain_name, config, created_at, updated_at";

/// Repository for the `applications` table.
#[derive(Clone)]
pub struct ApplicationRepository {
    _private: (),
}

impl ApplicationRepository {
    pub async fn find_by_id(
        &self,
        tx: &mut Tx,
        id: ApplicationId,
    ) -> Result<Option<Application>, RepositoryError> {
        let row = sqlx::query_as::<_, ApplicationRow>(&format!(
            "SELECT {APPLICATION_COLUMNS} FROM applications WHERE id = ?"
        ))
        .bind(id)
        .fetch_optional(&mut **tx)
        .await?;
        Ok(row.map(ApplicationRow::into_domain))
    }

    pub async fn find_by_code(
        &self,
        tx: &mut Tx,
        application_code: &str,
    ) -> Result<Option<Application>, RepositoryError> {
        let row = sqlx::query_as::<_, ApplicationRow>(&format!(
            "SELECT {APPLICATION_COLUMNS} FROM applications WHERE application_code = ?"
        ))
        .bind(application_code)
        .fetch_optional(&mut **tx)
        .await?;
        Ok(row.map(ApplicationRow::into_domain))
    }

    /// Lists every application in insertion order.
    pub async fn list(
        &self,
        tx: &mut Tx,
        page: Page,
    ) -> Result<Vec<Application>, RepositoryError> {
        let rows = sqlx::query_as::<_, ApplicationRow>(&format!(
            "SELECT {APPLICATION_COLUMNS} FROM applications ORDER BY id ASC LIMIT ? OFFSET ?"
        ))
        .bind(page.limit)
        .bind(page.offset)
        .fetch_all(&mut **tx)
        .await?;
        Ok(rows.into_iter().map(ApplicationRow::into_domain).collect())
    }

    /// Lists applications registered under `domain_name`, optionally
    /// restricted to an exact application name.
    pub async fn list_by_domain(
        &self,
        tx: &mut Tx,
        domain_name: &str,
        application_name: Option<&str>,
        page: Page,
    ) -> Result<Vec<Application>, RepositoryError> {
        let rows = sqlx::query_as::<_, ApplicationRow>(&format!(
            "SELECT {APPLICATION_COLUMNS} FROM applications \
             WHERE domain_name = ? AND (? IS NULL OR application_name = ?) \
             ORDER BY id ASC LIMIT ? OFFSET ?"
        ))
        .bind(domain_name)
        .bind(application_name)
        .bind(application_name)
        .bind(page.limit)
        .bind(page.offset)
        .fetch_all(&mut **tx)
        .await?;
        Ok(rows.into_iter().map(ApplicationRow::into_domain).collect())
    }

    pub async fn insert(
        &self,
        tx: &mut Tx,
        input: &ApplicationCreate,
        created_at: DateTime<Utc>,
    ) -> Result<Application, RepositoryError> {
        let row = sqlx::query_as::<_, ApplicationRow>(&format!(
            "INSERT INTO applications \
             (application_name, application_code, description, status, action, domain_name, config, created_at) \
             VALUES (?, ?, ?, ?, ?, ?, ?, ?) \
             RETURNING {APPLICATION_COLUMNS}"
        ))
        .bind(&input.application_name)
        .bind(&input.application_code)
        .bind(&input.description)
        .bind(input.status)
        .bind(&input.action)
        .bind(&input.domain_name)
        .bind(&input.config)
        .bind(to_rfc3339(created_at))
        .fetch_one(&mut **tx)
        .await?;
        Ok(row.into_domain())
    }

    pub async fn update(
        &self,
        tx: &mut Tx,
        application: &Application,
    ) -> Result<Application, RepositoryError> {
        let row = sqlx::query_as::<_, ApplicationRow>(&format!(
            "UPDATE applications \
             SET application_name = ?, application_code = ?, description = ?, status = ?, \
                 action = ?, domain_name = ?, config = ?, updated_at = ? \
             WHERE id = ? \
             RETURNING {APPLICATION_COLUMNS}"
        ))
        .bind(&application.application_name)
        .bind(&application.application_code)
        .bind(&application.description)
        .bind(application.status)
        .bind(&application.action)
        .bind(&application.domain_name)
        .bind(&application.config)
        .bind(application.updated_at.map(to_rfc3339))
        .bind(application.id)
        .fetch_one(&mut **tx)
        .await?;
        Ok(row.into_domain())
    }

    /// Returns `false` when no row matched `id`.
    pub async fn delete(&self, tx: &mut Tx, id: ApplicationId) -> Result<bool, RepositoryError> {
        let result = sqlx::query("DELETE FROM applications WHERE id = ?")
            .bind(id)
            .execute(&mut **tx)
            .await?;
        Ok(result.rows_affected() > 0)
    }
}

#[derive(Debug, sqlx::FromRow)]
struct ApplicationRow {
    id: i64,
    application_name: String,
    application_code: String,
    description: Option<String>,
    status: bool,
    action: Option<String>,
    domain_name: String,
    config: Option<String>,
    created_at: DateTime<Utc>,
    updated_at: Option<DateTime<Utc>>,
}

impl ApplicationRow {
    fn into_domain(self) -> Application {
        Application {
            id: self.id,
            application_name: self.application_name,
            application_code: self.application_code,
            description: self.description,
            status: self.status,
            action: self.action,
            domain_name: self.domain_name,
            config: self.config,
            created_at: self.created_at,
            updated_at: self.updated_at,
        }
    }
}

fn to_rfc3339(value: DateTime<Utc>) -> String {
    value.to_rfc3339_opts(SecondsFormat::Millis, true)
}
