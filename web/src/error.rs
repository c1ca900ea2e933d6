use std::error::Error as StdError;

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};

use domain::error::{DomainErrorKind, Error as DomainError, RequestErrorKind};
use log::*;
use serde_json::Value;

use crate::response::respond;

pub type Result<T> = core::result::Result<T, Error>;

#[derive(Debug)]
pub struct Error(DomainError);

impl StdError for Error {}

impl std::fmt::Display for Error {
    fn fmt(&self, fmt: &mut std::fmt::Formatter) -> core::result::Result<(), std::fmt::Error> {
        write!(fmt, "{}", self.0)
    }
}

// Caller mistakes are client errors; anything the broker or the bridge itself failed at is a
// server error that carries the failure text back to the caller.
impl IntoResponse for Error {
    fn into_response(self) -> Response {
        match &self.0.error_kind {
            DomainErrorKind::Request(kind) => {
                info!("Rejecting request: {kind}");
                let message = match kind {
                    RequestErrorKind::InvalidBody => kind.to_string(),
                    _ => format!("invalid parameter values: {kind}"),
                };
                respond(StatusCode::BAD_REQUEST, Value::String(message))
            }
            DomainErrorKind::Internal(_) | DomainErrorKind::External(_) => {
                error!("Request failed: {:?}", self.0);
                respond(
                    StatusCode::INTERNAL_SERVER_ERROR,
                    Value::String(self.0.to_string()),
                )
            }
        }
    }
}

impl<E> From<E> for Error
where
    E: Into<DomainError>,
{
    fn from(err: E) -> Self {
        Self(err.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::to_bytes;
    use domain::error::BrokerErrorKind;
    use serde_json::json;

    async fn body_of(response: Response) -> Value {
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn test_request_errors_are_bad_requests() {
        let err = Error::from(DomainError::request(RequestErrorKind::UnknownConnection(
            "nope".to_string(),
        )));
        let response = err.into_response();

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(
            body_of(response).await,
            json!({"success": false, "message": "invalid parameter values: unknown connection key 'nope'"})
        );
    }

    #[tokio::test]
    async fn test_broker_errors_are_server_errors_with_text() {
        let err = Error::from(DomainError::broker(BrokerErrorKind::EntityNotFound(
            "queue 'orders'".to_string(),
        )));
        let response = err.into_response();

        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(
            body_of(response).await,
            json!({"success": false, "message": "messaging entity queue 'orders' could not be found"})
        );
    }
}
