//! Entity types, request inputs, validation rules and bus notifications
//! shared by the storage layer and the HTTP service.

pub mod events;
pub mod types;
pub mod validation;

pub use validation::{Validate, ValidationError};
