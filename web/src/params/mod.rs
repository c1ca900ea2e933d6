//! Typed query parameters for the bridge endpoints.
//!
//! Each struct mirrors one endpoint's query string. Deserialization catches missing and
//! mistyped values; the conversion methods catch values that parse but make no sense (empty
//! entity names, a zero prefetch) and turn the rest into the domain's target types.

pub(crate) mod receive;
pub(crate) mod send;

use domain::error::{Error as DomainError, RequestErrorKind};

use crate::Error;

/// Rejects empty or whitespace-only entity names.
pub(crate) fn required(field: &str, value: &str) -> Result<String, Error> {
    if value.trim().is_empty() {
        return Err(invalid(format!("{field} must not be empty")));
    }
    Ok(value.to_string())
}

/// Empty query values count as absent.
pub(crate) fn optional(value: Option<&str>) -> Option<&str> {
    value.filter(|value| !value.is_empty())
}

pub(crate) fn invalid(detail: String) -> Error {
    DomainError::request(RequestErrorKind::InvalidParameters(detail)).into()
}
