use thiserror::Error;

use crate::types::{ApplicationCreate, ApplicationUpdate, DomainCreate, DomainUpdate};

const NAME_MIN: usize = 3;
const NAME_MAX: usize = 100;
const CODE_MIN: usize = 3;
const CODE_MAX: usize = 50;

/// Field level rejection reported before a request reaches the services.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{field}: {message}")]
pub struct ValidationError {
    pub field: &'static str,
    pub message: String,
}

pub trait Validate {
    fn validate(&self) -> Result<(), ValidationError>;
}

fn check_length(
    field: &'static str,
    value: &str,
    min: usize,
    max: usize,
) -> Result<(), ValidationError> {
    let len = value.chars().count();
    if len < min {
        return Err(ValidationError {
            field,
            message: format!("must be at least {min} characters (got {len})"),
        });
    }
    if len > max {
        return Err(ValidationError {
            field,
            message: format!("must be at most {max} characters (got {len})"),
        });
    }
    Ok(())
}

fn check_optional(
    field: &'static str,
    value: Option<&String>,
    min: usize,
    max: usize,
) -> Result<(), ValidationError> {
    match value {
        Some(value) => check_length(field, value, min, max),
        None => Ok(()),
    }
}

impl Validate for DomainCreate {
    fn validate(&self) -> Result<(), ValidationError> {
        check_length("domain_name", &self.domain_name, NAME_MIN, NAME_MAX)?;
        check_length("domain_code", &self.domain_code, CODE_MIN, CODE_MAX)
    }
}

impl Validate for DomainUpdate {
    fn validate(&self) -> Result<(), ValidationError> {
        check_optional("domain_name", self.domain_name.as_ref(), NAME_MIN, NAME_MAX)?;
        check_optional("domain_code", self.domain_code.as_ref(), CODE_MIN, CODE_MAX)
    }
}

impl Validate for ApplicationCreate {
    fn validate(&self) -> Result<(), ValidationError> {
        check_length(
            "application_name",
            &self.application_name,
            NAME_MIN,
            NAME_MAX,
        )?;
        check_length(
            "application_code",
            &self.application_code,
            CODE_MIN,
            CODE_MAX,
        )?;
        check_length("domain_name", &self.domain_name, NAME_MIN, NAME_MAX)
    }
}

impl Validate for ApplicationUpdate {
    fn validate(&self) -> Result<(), ValidationError> {
        check_optional(
            "application_name",
            self.application_name.as_ref(),
            NAME_MIN,
            NAME_MAX,
        )?;
        check_optional(
            "application_code",
            self.application_code.as_ref(),
            CODE_MIN,
            CODE_MAX,
        )?;
        check_optional("domain_name", self.domain_name.as_ref(), NAME_MIN, NAME_MAX)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn domain(name: &str, code: &str) -> DomainCreate {
        DomainCreate {
            domain_name: name.to_string(),
            domain_code: code.to_string(),
            description: None,
            status: true,
            action: None,
        }
    }

    #[test]
    fn accepts_bounds() {
        assert!(domain("abc", "XYZ").validate().is_ok());
        assert!(domain(&"n".repeat(100), &"c".repeat(50)).validate().is_ok());
    }

    #[test]
    fn rejects_short_and_long_values() {
        let err = domain("ab", "XYZ").validate().unwrap_err();
        assert_eq!(err.field, "domain_name");

        let err = domain("billing", &"c".repeat(51)).validate().unwrap_err();
        assert_eq!(err.field, "domain_code");
        assert!(err.message.contains("at most 50"));
    }

    #[test]
    fn counts_characters_not_bytes() {
        assert!(domain("été", "ÅÄÖ").validate().is_ok());
    }

    #[test]
    fn update_checks_only_present_fields() {
        assert!(ApplicationUpdate::default().validate().is_ok());

        let update = ApplicationUpdate {
            domain_name: Some("x".into()),
            ..ApplicationUpdate::default()
        };
        assert_eq!(update.validate().unwrap_err().field, "domain_name");
    }

    #[test]
    fn application_create_checks_domain_reference() {
        let input = ApplicationCreate {
            application_name: "invoice-svc".into(),
            application_code: "INV".into(),
            description: None,
            status: true,
            action: None,
            domain_name: "bi".into(),
            config: None,
        };
        assert_eq!(input.validate().unwrap_err().field, "domain_name");
    }
}
