use serde::{Deserialize, Serialize};

use crate::types::{ApplicationId, DomainId};

pub const DOMAIN_EVENTS_TOPIC: &str = "domain-events";
pub const APPLICATION_EVENTS_TOPIC: &str = "application-events";

pub const DOMAIN_CREATED: &str = "domain_created";
pub const APPLICATION_CREATED: &str = "application_created";

/// Entity-created notification carried over the message bus.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event_type", rename_all = "snake_case")]
pub enum Notification {
    DomainCreated {
        domain_id: DomainId,
        domain_name: String,
    },
    ApplicationCreated {
        application_id: ApplicationId,
        application_name: String,
        domain_id: DomainId,
    },
}

impl Notification {
    pub fn event_type(&self) -> &'static str {
        match self {
            Self::DomainCreated { .. } => DOMAIN_CREATED,
            Self::ApplicationCreated { .. } => APPLICATION_CREATED,
        }
    }

    pub fn topic(&self) -> &'static str {
        match self {
            Self::DomainCreated { .. } => DOMAIN_EVENTS_TOPIC,
            Self::ApplicationCreated { .. } => APPLICATION_EVENTS_TOPIC,
        }
    }

    /// Message key: the entity identifier rendered as text.
    pub fn key(&self) -> String {
        match self {
            Self::DomainCreated { domain_id, .. } => domain_id.to_string(),
            Self::ApplicationCreated { application_id, .. } => application_id.to_string(),
        }
    }

    pub fn to_payload(&self) -> Result<Vec<u8>, serde_json::Error> {
        serde_json::to_vec(self)
    }
}
