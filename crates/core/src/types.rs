use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};

pub type DomainId = i64;
pub type ApplicationId = i64;

pub const DEFAULT_PAGE_LIMIT: i64 = 100;

/// Organizational grouping that owns applications.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Domain {
    pub id: DomainId,
    pub domain_name: String,
    pub domain_code: String,
    pub description: Option<String>,
    pub status: bool,
    pub action: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: Option<DateTime<Utc>>,
}

impl Domain {
    /// Copies the fields present in `update` and stamps the update time.
    pub fn apply(&mut self, update: &DomainUpdate, now: DateTime<Utc>) {
        if let Some(name) = &update.domain_name {
            self.domain_name = name.clone();
        }
        if let Some(code) = &update.domain_code {
            self.domain_code = code.clone();
        }
        if let Some(description) = &update.description {
            self.description = description.clone();
        }
        if let Some(status) = update.status {
            self.status = status;
        }
        if let Some(action) = &update.action {
            self.action = action.clone();
        }
        self.updated_at = Some(now);
    }
}

/// Unit of functionality registered under exactly one domain.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Application {
    pub id: ApplicationId,
    pub application_name: String,
    pub application_code: String,
    pub description: Option<String>,
    pub status: bool,
    pub action: Option<String>,
    pub domain_name: String,
    pub config: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: Option<DateTime<Utc>>,
}

impl Application {
    /// Copies the fields present in `update` and stamps the update time.
    pub fn apply(&mut self, update: &ApplicationUpdate, now: DateTime<Utc>) {
        if let Some(name) = &update.application_name {
            self.application_name = name.clone();
        }
        if let Some(code) = &update.application_code {
            self.application_code = code.clone();
        }
        if let Some(description) = &update.description {
            self.description = description.clone();
        }
        if let Some(status) = update.status {
            self.status = status;
        }
        if let Some(action) = &update.action {
            self.action = action.clone();
        }
        if let Some(domain_name) = &update.domain_name {
            self.domain_name = domain_name.clone();
        }
        if let Some(config) = &update.config {
            self.config = config.clone();
        }
        self.updated_at = Some(now);
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DomainCreate {
    pub domain_name: String,
    pub domain_code: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default = "default_status")]
    pub status: bool,
    #[serde(default)]
    pub action: Option<String>,
}

/// Partial domain update.
///
/// Outer `None` means the field was omitted. For nullable columns the inner
/// `None` means the caller explicitly sent `null` to clear the value.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct DomainUpdate {
    #[serde(default)]
    pub domain_name: Option<String>,
    #[serde(default)]
    pub domain_code: Option<String>,
    #[serde(default, deserialize_with = "present")]
    pub description: Option<Option<String>>,
    #[serde(default)]
    pub status: Option<bool>,
    #[serde(default, deserialize_with = "present")]
    pub action: Option<Option<String>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApplicationCreate {
    pub application_name: String,
    pub application_code: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default = "default_status")]
    pub status: bool,
    #[serde(default)]
    pub action: Option<String>,
    pub domain_name: String,
    #[serde(default)]
    pub config: Option<String>,
}

/// Partial application update, same presence rules as [`DomainUpdate`].
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct ApplicationUpdate {
    #[serde(default)]
    pub application_name: Option<String>,
    #[serde(default)]
    pub application_code: Option<String>,
    #[serde(default, deserialize_with = "present")]
    pub description: Option<Option<String>>,
    #[serde(default)]
    pub status: Option<bool>,
    #[serde(default, deserialize_with = "present")]
    pub action: Option<Option<String>>,
    #[serde(default)]
    pub domain_name: Option<String>,
    #[serde(default, deserialize_with = "present")]
    pub config: Option<Option<String>>,
}

/// Offset/limit window over an insertion-ordered listing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Page {
    pub offset: i64,
    pub limit: i64,
}

impl Page {
    /// Clamps both values to be non-negative. No upper bound is applied.
    pub fn new(offset: i64, limit: i64) -> Self {
        Self {
            offset: offset.max(0),
            limit: limit.max(0),
        }
    }

    pub fn from_query(skip: Option<i64>, limit: Option<i64>) -> Self {
        Self::new(skip.unwrap_or(0), limit.unwrap_or(DEFAULT_PAGE_LIMIT))
    }
}

impl Default for Page {
    fn default() -> Self {
        Self::new(0, DEFAULT_PAGE_LIMIT)
    }
}

fn default_status() -> bool {
    true
}

fn present<'de, D, T>(deserializer: D) -> Result<Option<Option<T>>, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de>,
{
    Option::<T>::deserialize(deserializer).map(Some)
}
