//! Error types for the `domain` layer.
use std::error::Error as StdError;
use std::fmt;

/// Top-level domain error type.
/// Errors are modeled as a tree with `domain::error::Error` at the root holding an
/// `error_kind` that classifies the failure, plus the original error as `source`.
/// `web` turns the kind into an HTTP status: request kinds become client errors,
/// everything else is reported as a server error carrying this error's text.
#[derive(Debug)]
pub struct Error {
    pub source: Option<Box<dyn StdError + Send + Sync>>,
    pub error_kind: DomainErrorKind,
}

/// Enum representing the major categories of errors that can occur in the `domain` layer.
#[derive(Debug, PartialEq)]
pub enum DomainErrorKind {
    Request(RequestErrorKind),
    Internal(InternalErrorKind),
    External(ExternalErrorKind),
}

/// Problems with what the caller asked for, detected before talking to a broker.
#[derive(Debug, PartialEq)]
pub enum RequestErrorKind {
    InvalidParameters(String),
    UnknownConnection(String),
    InvalidBody,
}

#[derive(Debug, PartialEq)]
pub enum InternalErrorKind {
    Other(String),
}

#[derive(Debug, PartialEq)]
pub enum ExternalErrorKind {
    Network,
    Broker(BrokerErrorKind),
}

/// Failures reported by, or while addressing, a message broker.
#[derive(Debug, PartialEq)]
pub enum BrokerErrorKind {
    InvalidConnectionString(String),
    EntityNotFound(String),
    Unauthorized,
    Unsupported(String),
    Rejected(String),
}

impl Error {
    pub fn request(kind: RequestErrorKind) -> Self {
        Error {
            source: None,
            error_kind: DomainErrorKind::Request(kind),
        }
    }

    pub fn broker(kind: BrokerErrorKind) -> Self {
        Error {
            source: None,
            error_kind: DomainErrorKind::External(ExternalErrorKind::Broker(kind)),
        }
    }

    pub fn is_request_error(&self) -> bool {
        matches!(self.error_kind, DomainErrorKind::Request(_))
    }
}

impl fmt::Display for RequestErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            RequestErrorKind::InvalidParameters(detail) => write!(f, "{detail}"),
            RequestErrorKind::UnknownConnection(key) => write!(f, "unknown connection key '{key}'"),
            RequestErrorKind::InvalidBody => write!(f, "request body is not valid JSON"),
        }
    }
}

impl fmt::Display for BrokerErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            BrokerErrorKind::InvalidConnectionString(detail) => {
                write!(f, "invalid connection string: {detail}")
            }
            BrokerErrorKind::EntityNotFound(entity) => write!(f, "messaging entity {entity} could not be found"),
            BrokerErrorKind::Unauthorized => write!(f, "broker rejected the supplied credentials"),
            BrokerErrorKind::Unsupported(detail) => write!(f, "unsupported broker operation: {detail}"),
            BrokerErrorKind::Rejected(detail) => write!(f, "broker rejected the request: {detail}"),
        }
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match &self.error_kind {
            DomainErrorKind::Request(kind) => write!(f, "{kind}"),
            DomainErrorKind::Internal(InternalErrorKind::Other(detail)) => write!(f, "{detail}"),
            DomainErrorKind::External(ExternalErrorKind::Broker(kind)) => write!(f, "{kind}"),
            DomainErrorKind::External(ExternalErrorKind::Network) => match &self.source {
                Some(source) => write!(f, "broker could not be reached: {source}"),
                None => write!(f, "broker could not be reached"),
            },
        }
    }
}

impl StdError for Error {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        self.source
            .as_ref()
            .map(|e| e.as_ref() as &(dyn StdError + 'static))
    }
}

impl From<reqwest::Error> for Error {
    fn from(err: reqwest::Error) -> Self {
        // Errors that result from issues building the reqwest::Client instance. This
        // type of error will occur prior to any network calls being made.
        if err.is_builder() {
            Error {
                source: Some(Box::new(err)),
                error_kind: DomainErrorKind::Internal(InternalErrorKind::Other(
                    "Failed to build broker HTTP client".to_string(),
                )),
            }
        // Errors that result from issues with the network call itself.
        } else {
            Error {
                source: Some(Box::new(err)),
                error_kind: DomainErrorKind::External(ExternalErrorKind::Network),
            }
        }
    }
}

impl From<url::ParseError> for Error {
    fn from(err: url::ParseError) -> Self {
        Error {
            error_kind: DomainErrorKind::External(ExternalErrorKind::Broker(
                BrokerErrorKind::InvalidConnectionString(err.to_string()),
            )),
            source: Some(Box::new(err)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_errors_are_flagged() {
        let err = Error::request(RequestErrorKind::UnknownConnection("orders".to_string()));
        assert!(err.is_request_error());
        assert_eq!(err.to_string(), "unknown connection key 'orders'");
    }

    #[test]
    fn test_broker_errors_display_their_detail() {
        let err = Error::broker(BrokerErrorKind::EntityNotFound("queue 'orders'".to_string()));
        assert!(!err.is_request_error());
        assert_eq!(
            err.to_string(),
            "messaging entity queue 'orders' could not be found"
        );
    }

    #[test]
    fn test_url_parse_error_maps_to_invalid_connection_string() {
        let err: Error = url::Url::parse("memory://bad host").unwrap_err().into();
        assert!(matches!(
            err.error_kind,
            DomainErrorKind::External(ExternalErrorKind::Broker(
                BrokerErrorKind::InvalidConnectionString(_)
            ))
        ));
        assert!(err.source().is_some());
    }
}
