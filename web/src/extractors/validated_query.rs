use crate::Error;
use axum::{
    extract::{FromRequestParts, Query},
    http::request::Parts,
};
use domain::error::{Error as DomainError, RequestErrorKind};
use log::*;
use serde::de::DeserializeOwned;

/// Query string extractor whose rejection is the bridge's own 400 envelope instead of axum's
/// plain-text rejection.
pub(crate) struct ValidatedQuery<T>(pub T);

impl<T, S> FromRequestParts<S> for ValidatedQuery<T>
where
    T: DeserializeOwned,
    S: Send + Sync,
{
    type Rejection = Error;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        match Query::<T>::try_from_uri(&parts.uri) {
            Ok(Query(params)) => Ok(ValidatedQuery(params)),
            Err(rejection) => {
                debug!(
                    "Could not deserialize query {:?}: {}",
                    parts.uri.query(),
                    rejection.body_text()
                );
                Err(DomainError::request(RequestErrorKind::InvalidParameters(
                    rejection.body_text(),
                ))
                .into())
            }
        }
    }
}
