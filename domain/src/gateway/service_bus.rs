//! Azure Service Bus over its HTTPS REST interface.
//!
//! Connection strings use the portal format:
//! `Endpoint=sb://<namespace>.servicebus.windows.net/;SharedAccessKeyName=<name>;SharedAccessKey=<key>`.
//! Requests are signed with a Shared Access Signature derived from the key. An
//! `http://` or `https://` endpoint is used as given, which is how emulators are addressed.
//!
//! The REST interface cannot lock sessions, so session-bound receivers are opened over
//! AMQP by [`super::service_bus_session`].
use crate::broker::{
    OpenedReceiver, ReceiveSource, Receiver, ReceiverClient, ReceiverSettings, SendTarget,
    SenderClient, SessionRequest,
};
use crate::error::{BrokerErrorKind, Error};
use crate::message::{InboundMessage, OutboundMessage, SendOutcome};
use super::service_bus_session;
use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use hmac::{Hmac, Mac};
use log::*;
use reqwest::header::{HeaderValue, AUTHORIZATION, CONTENT_TYPE, LOCATION};
use reqwest::{Method, StatusCode};
use serde::Deserialize;
use sha2::Sha256;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use url::Url;

type HmacSha256 = Hmac<Sha256>;

const BROKER_PROPERTIES: &str = "BrokerProperties";

/// Lifetime of generated SAS tokens.
const TOKEN_TTL_SECS: i64 = 3600;

#[derive(Debug, Clone, PartialEq)]
enum Credentials {
    SharedAccessKey { key_name: String, key: String },
    SharedAccessSignature(String),
}

/// A parsed Service Bus connection string.
#[derive(Debug, Clone, PartialEq)]
pub struct ServiceBusConnection {
    connection_string: String,
    endpoint: Url,
    credentials: Credentials,
}

impl ServiceBusConnection {
    pub fn parse(connection_string: &str) -> Result<Self, Error> {
        let fields: HashMap<String, &str> = connection_string
            .split(';')
            .map(str::trim)
            .filter(|field| !field.is_empty())
            .filter_map(|field| field.split_once('='))
            .map(|(name, value)| (name.trim().to_ascii_lowercase(), value.trim()))
            .collect();

        let endpoint = fields.get("endpoint").ok_or_else(|| invalid("Endpoint is missing"))?;
        let endpoint = Self::https_endpoint(endpoint)?;

        let credentials = match (
            fields.get("sharedaccesskeyname"),
            fields.get("sharedaccesskey"),
            fields.get("sharedaccesssignature"),
        ) {
            (Some(key_name), Some(key), _) => Credentials::SharedAccessKey {
                key_name: key_name.to_string(),
                key: key.to_string(),
            },
            (_, _, Some(signature)) => Credentials::SharedAccessSignature(signature.to_string()),
            _ => {
                return Err(invalid(
                    "SharedAccessKeyName and SharedAccessKey (or SharedAccessSignature) are required",
                ))
            }
        };

        Ok(Self {
            connection_string: connection_string.trim().to_string(),
            endpoint,
            credentials,
        })
    }

    /// Service Bus endpoints are published as `sb://host/`; REST calls go to `https://host/`.
    fn https_endpoint(endpoint: &str) -> Result<Url, Error> {
        let parsed = Url::parse(endpoint)?;
        let mut url = match parsed.scheme() {
            "http" | "https" => parsed,
            "sb" => {
                let host = parsed
                    .host_str()
                    .ok_or_else(|| invalid("Endpoint has no host"))?;
                Url::parse(&format!("https://{host}/"))?
            }
            other => return Err(invalid(&format!("unsupported endpoint scheme '{other}'"))),
        };
        if !url.path().ends_with('/') {
            let path = format!("{}/", url.path());
            url.set_path(&path);
        }
        Ok(url)
    }

    pub fn endpoint(&self) -> &Url {
        &self.endpoint
    }

    /// The connection string as configured, for clients that parse it themselves.
    pub fn connection_string(&self) -> &str {
        &self.connection_string
    }

    fn entity_url(&self, entity_path: &str, suffix: &str) -> Result<Url, Error> {
        Ok(self.endpoint.join(&format!("{entity_path}/{suffix}"))?)
    }

    /// Authorization header value valid until `expiry` (unix seconds).
    pub fn authorization(&self, expiry: i64) -> Result<String, Error> {
        match &self.credentials {
            Credentials::SharedAccessSignature(signature) => Ok(signature.clone()),
            Credentials::SharedAccessKey { key_name, key } => {
                let resource = urlencoding::encode(self.endpoint.as_str()).into_owned();
                let mut mac = HmacSha256::new_from_slice(key.as_bytes()).map_err(|_| {
                    invalid("SharedAccessKey cannot be used as an HMAC key")
                })?;
                mac.update(format!("{resource}\n{expiry}").as_bytes());
                let signature = BASE64.encode(mac.finalize().into_bytes());
                Ok(format!(
                    "SharedAccessSignature sr={resource}&sig={}&se={expiry}&skn={key_name}",
                    urlencoding::encode(&signature)
                ))
            }
        }
    }

    fn authorization_header(&self) -> Result<HeaderValue, Error> {
        let expiry = chrono::Utc::now().timestamp() + TOKEN_TTL_SECS;
        let mut value = HeaderValue::from_str(&self.authorization(expiry)?).map_err(|err| {
            warn!("Failed to create authorization header value: {err:?}");
            invalid("credentials contain characters that cannot be sent in a header")
        })?;
        value.set_sensitive(true);
        Ok(value)
    }
}

fn invalid(detail: &str) -> Error {
    Error::broker(BrokerErrorKind::InvalidConnectionString(detail.to_string()))
}

/// Maps statuses that mean "this whole operation cannot work" to errors.
fn fatal_status(status: StatusCode, entity: &str) -> Option<Error> {
    match status {
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
            Some(Error::broker(BrokerErrorKind::Unauthorized))
        }
        StatusCode::NOT_FOUND => Some(Error::broker(BrokerErrorKind::EntityNotFound(
            entity.to_string(),
        ))),
        _ => None,
    }
}

/// Properties Service Bus returns with a peek-locked message.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct BrokerProperties {
    lock_token: String,
    #[serde(default)]
    sequence_number: i64,
    #[serde(default)]
    delivery_count: u32,
    session_id: Option<String>,
}

pub(crate) struct ServiceBusSender {
    http: reqwest::Client,
    connection: Arc<ServiceBusConnection>,
    target: SendTarget,
}

impl ServiceBusSender {
    pub(crate) fn new(
        http: reqwest::Client,
        connection: Arc<ServiceBusConnection>,
        target: &SendTarget,
    ) -> Self {
        Self {
            http,
            connection,
            target: target.clone(),
        }
    }
}

#[async_trait]
impl SenderClient for ServiceBusSender {
    async fn send(
        &self,
        messages: &[OutboundMessage],
        session_id: Option<&str>,
    ) -> Result<Vec<SendOutcome>, Error> {
        let url = self
            .connection
            .entity_url(&self.target.entity_path(), "messages")?;
        let authorization = self.connection.authorization_header()?;
        let broker_properties = session_id
            .map(|id| serde_json::json!({ "SessionId": id }).to_string());

        let mut outcomes = Vec::with_capacity(messages.len());
        for message in messages {
            let mut request = self
                .http
                .post(url.clone())
                .header(AUTHORIZATION, authorization.clone())
                .header(CONTENT_TYPE, "application/json")
                .body(message.body().to_vec());
            if let Some(properties) = &broker_properties {
                request = request.header(BROKER_PROPERTIES, properties.as_str());
            }

            let response = request.send().await?;
            let status = response.status();
            if status.is_success() {
                outcomes.push(SendOutcome::sent());
                continue;
            }
            if let Some(err) = fatal_status(status, &self.target.to_string()) {
                return Err(err);
            }
            let detail = response.text().await.unwrap_or_default();
            outcomes.push(SendOutcome::failed(format!("{status}: {detail}")));
        }
        Ok(outcomes)
    }
}

pub(crate) struct ServiceBusReceiverClient {
    http: reqwest::Client,
    connection: Arc<ServiceBusConnection>,
    source: ReceiveSource,
}

impl ServiceBusReceiverClient {
    pub(crate) fn new(
        http: reqwest::Client,
        connection: Arc<ServiceBusConnection>,
        source: &ReceiveSource,
    ) -> Self {
        Self {
            http,
            connection,
            source: source.clone(),
        }
    }
}

#[async_trait]
impl ReceiverClient for ServiceBusReceiverClient {
    async fn open_receiver(
        &self,
        session: &SessionRequest,
        settings: &ReceiverSettings,
    ) -> Result<OpenedReceiver, Error> {
        if *session != SessionRequest::None {
            return service_bus_session::open_session_receiver(
                self.connection.connection_string(),
                &self.source,
                session,
                settings,
            )
            .await;
        }
        Ok(OpenedReceiver::Ready(Box::new(ServiceBusReceiver {
            http: self.http.clone(),
            connection: Arc::clone(&self.connection),
            source: self.source.clone(),
            settings: *settings,
            last_activity: Instant::now(),
            held_locks: HashMap::new(),
        })))
    }
}

struct ServiceBusReceiver {
    http: reqwest::Client,
    connection: Arc<ServiceBusConnection>,
    source: ReceiveSource,
    settings: ReceiverSettings,
    last_activity: Instant,
    /// Lock token to the lock location used to complete or unlock the message.
    held_locks: HashMap<String, Url>,
}

impl ServiceBusReceiver {
    /// Peek-locks the message at the head of the entity, if one arrives within `wait`.
    async fn lock_head(&mut self, wait: Duration) -> Result<Option<InboundMessage>, Error> {
        let mut url = self
            .connection
            .entity_url(&self.source.entity_path(), "messages/head")?;
        url.query_pairs_mut()
            .append_pair("timeout", &wait.as_secs().max(1).to_string());

        let response = self
            .http
            .post(url)
            .header(AUTHORIZATION, self.connection.authorization_header()?)
            .send()
            .await?;

        let status = response.status();
        if status == StatusCode::NO_CONTENT {
            return Ok(None);
        }
        if let Some(err) = fatal_status(status, &self.source.to_string()) {
            return Err(err);
        }
        if !status.is_success() {
            let detail = response.text().await.unwrap_or_default();
            return Err(Error::broker(BrokerErrorKind::Rejected(format!(
                "{status}: {detail}"
            ))));
        }

        let properties: BrokerProperties = response
            .headers()
            .get(BROKER_PROPERTIES)
            .and_then(|value| value.to_str().ok())
            .and_then(|value| serde_json::from_str(value).ok())
            .ok_or_else(|| {
                Error::broker(BrokerErrorKind::Rejected(
                    "locked message is missing its BrokerProperties".to_string(),
                ))
            })?;
        let location = response
            .headers()
            .get(LOCATION)
            .and_then(|value| value.to_str().ok())
            .map(|value| self.connection.endpoint().join(value))
            .transpose()?
            .ok_or_else(|| {
                Error::broker(BrokerErrorKind::Rejected(
                    "locked message is missing its lock location".to_string(),
                ))
            })?;
        let body = response.bytes().await?;

        self.held_locks
            .insert(properties.lock_token.clone(), location);
        Ok(Some(InboundMessage::new(
            properties.lock_token,
            properties.sequence_number,
            properties.session_id,
            properties.delivery_count,
            vec![body.to_vec()],
        )))
    }

    async fn settle(&self, method: Method, location: Url) -> Result<StatusCode, Error> {
        let response = self
            .http
            .request(method, location)
            .header(AUTHORIZATION, self.connection.authorization_header()?)
            .send()
            .await?;
        Ok(response.status())
    }
}

#[async_trait]
impl Receiver for ServiceBusReceiver {
    fn session_id(&self) -> Option<&str> {
        None
    }

    async fn fetch_next(
        &mut self,
        max_batch_size: Option<usize>,
        wait: Duration,
    ) -> Result<Vec<InboundMessage>, Error> {
        let idle_timeout = self.settings.idle_timeout;
        if !idle_timeout.is_zero() && self.last_activity.elapsed() >= idle_timeout {
            debug!("Receiver on {} idled out", self.source);
            return Ok(Vec::new());
        }

        // The REST interface hands out one message per call, so "all available" is
        // capped by the receiver's prefetch.
        let limit = max_batch_size.unwrap_or(self.settings.prefetch).max(1);
        let mut batch = Vec::new();
        while batch.len() < limit {
            match self.lock_head(wait).await? {
                Some(message) => batch.push(message),
                None => break,
            }
        }
        if !batch.is_empty() {
            self.last_activity = Instant::now();
        }
        Ok(batch)
    }

    async fn complete(&mut self, message: &InboundMessage) -> Result<(), Error> {
        let location = self.held_locks.remove(&message.lock_token).ok_or_else(|| {
            Error::broker(BrokerErrorKind::Rejected(format!(
                "message {} was not received by this receiver",
                message.sequence_number
            )))
        })?;
        let status = self.settle(Method::DELETE, location).await?;
        if status.is_success() {
            Ok(())
        } else {
            Err(Error::broker(BrokerErrorKind::Rejected(format!(
                "completing message {} failed with {status}",
                message.sequence_number
            ))))
        }
    }

    async fn close(mut self: Box<Self>) -> Result<(), Error> {
        for (lock_token, location) in std::mem::take(&mut self.held_locks) {
            match self.settle(Method::PUT, location).await {
                Ok(status) if status.is_success() => {}
                Ok(status) => warn!("Unlocking message {lock_token} returned {status}"),
                Err(err) => warn!("Unlocking message {lock_token} failed: {err}"),
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mockito::Matcher;

    const KEY: &str = "c2VjcmV0LWtleS1mb3ItdGVzdHM=";

    fn connection(endpoint: &str) -> Arc<ServiceBusConnection> {
        Arc::new(
            ServiceBusConnection::parse(&format!(
                "Endpoint={endpoint};SharedAccessKeyName=RootManageSharedAccessKey;SharedAccessKey={KEY}"
            ))
            .unwrap(),
        )
    }

    fn orders() -> ReceiveSource {
        ReceiveSource::Queue {
            queue_name: "orders".to_string(),
        }
    }

    #[test]
    fn test_parse_converts_sb_endpoint_to_https() {
        let connection = connection("sb://acme.servicebus.windows.net/");
        assert_eq!(
            connection.endpoint().as_str(),
            "https://acme.servicebus.windows.net/"
        );
    }

    #[test]
    fn test_parse_keeps_padding_in_key() {
        let parsed = ServiceBusConnection::parse(
            "Endpoint=sb://acme.servicebus.windows.net/;SharedAccessKeyName=send;SharedAccessKey=abc==",
        )
        .unwrap();
        assert_eq!(
            parsed.credentials,
            Credentials::SharedAccessKey {
                key_name: "send".to_string(),
                key: "abc==".to_string()
            }
        );
    }

    #[test]
    fn test_parse_rejects_incomplete_connection_strings() {
        assert!(ServiceBusConnection::parse("SharedAccessKeyName=a;SharedAccessKey=b").is_err());
        assert!(ServiceBusConnection::parse("Endpoint=sb://acme/;SharedAccessKeyName=a").is_err());
        assert!(ServiceBusConnection::parse("Endpoint=ftp://acme/;SharedAccessSignature=x").is_err());
    }

    #[test]
    fn test_authorization_is_a_signed_sas_token() {
        let connection = connection("sb://acme.servicebus.windows.net/");
        let token = connection.authorization(1_700_000_000).unwrap();

        let resource = urlencoding::encode("https://acme.servicebus.windows.net/").into_owned();
        let mut mac = HmacSha256::new_from_slice(KEY.as_bytes()).unwrap();
        mac.update(format!("{resource}\n1700000000").as_bytes());
        let signature = BASE64.encode(mac.finalize().into_bytes());

        assert_eq!(
            token,
            format!(
                "SharedAccessSignature sr={resource}&sig={}&se=1700000000&skn=RootManageSharedAccessKey",
                urlencoding::encode(&signature)
            )
        );
    }

    #[test]
    fn test_explicit_signature_is_used_verbatim() {
        let parsed = ServiceBusConnection::parse(
            "Endpoint=sb://acme.servicebus.windows.net/;SharedAccessSignature=SharedAccessSignature sr=x&sig=y&se=1&skn=z",
        )
        .unwrap();
        assert_eq!(
            parsed.authorization(0).unwrap(),
            "SharedAccessSignature sr=x&sig=y&se=1&skn=z"
        );
    }

    #[tokio::test]
    async fn test_send_reports_each_message() {
        let mut server = mockito::Server::new_async().await;
        let accepted = server
            .mock("POST", "/orders/messages")
            .match_header("BrokerProperties", r#"{"SessionId":"s1"}"#)
            .match_body(Matcher::Exact(r#"{"a":1}"#.to_string()))
            .with_status(201)
            .create_async()
            .await;
        let refused = server
            .mock("POST", "/orders/messages")
            .match_body(Matcher::Exact(r#"{"b":2}"#.to_string()))
            .with_status(400)
            .with_body("message too large")
            .create_async()
            .await;

        let sender = ServiceBusSender::new(
            reqwest::Client::new(),
            connection(&server.url()),
            &SendTarget::Queue {
                queue_name: "orders".to_string(),
            },
        );
        let messages = [
            OutboundMessage::from_json(&serde_json::json!({"a": 1})),
            OutboundMessage::from_json(&serde_json::json!({"b": 2})),
        ];
        let outcomes = sender.send(&messages, Some("s1")).await.unwrap();

        assert_eq!(outcomes.len(), 2);
        assert!(outcomes[0].is_success());
        assert!(!outcomes[1].is_success());
        assert!(outcomes[1].diagnostic().unwrap().contains("message too large"));
        accepted.assert_async().await;
        refused.assert_async().await;
    }

    #[tokio::test]
    async fn test_send_to_missing_entity_is_an_error() {
        let mut server = mockito::Server::new_async().await;
        let _missing = server
            .mock("POST", "/nowhere/messages")
            .with_status(404)
            .create_async()
            .await;

        let sender = ServiceBusSender::new(
            reqwest::Client::new(),
            connection(&server.url()),
            &SendTarget::Topic {
                topic_name: "nowhere".to_string(),
            },
        );
        let messages = [OutboundMessage::from_json(&serde_json::json!({}))];
        let err = sender.send(&messages, None).await.unwrap_err();
        assert!(err.to_string().contains("could not be found"));
    }

    #[tokio::test]
    async fn test_receive_locks_and_completes_head_message() {
        let mut server = mockito::Server::new_async().await;
        let head = server
            .mock("POST", "/orders/messages/head")
            .match_query(Matcher::UrlEncoded("timeout".into(), "1".into()))
            .with_status(201)
            .with_header(
                "BrokerProperties",
                r#"{"LockToken":"lock-1","SequenceNumber":31,"DeliveryCount":1,"MessageId":"m1"}"#,
            )
            .with_header("Location", &format!("{}/orders/messages/m1/lock-1", server.url()))
            .with_body(r#"{"a":1}"#)
            .expect(1)
            .create_async()
            .await;
        let complete = server
            .mock("DELETE", "/orders/messages/m1/lock-1")
            .with_status(200)
            .create_async()
            .await;

        let client =
            ServiceBusReceiverClient::new(reqwest::Client::new(), connection(&server.url()), &orders());
        let OpenedReceiver::Ready(mut receiver) = client
            .open_receiver(&SessionRequest::None, &ReceiverSettings::new(30, 1))
            .await
            .unwrap()
        else {
            panic!("expected a receiver");
        };

        let batch = receiver
            .fetch_next(Some(1), Duration::from_secs(1))
            .await
            .unwrap();
        assert_eq!(batch.len(), 1);
        assert_eq!(batch[0].body(), br#"{"a":1}"#.to_vec());
        assert_eq!(batch[0].sequence_number, 31);

        receiver.complete(&batch[0]).await.unwrap();
        receiver.close().await.unwrap();
        head.assert_async().await;
        complete.assert_async().await;
    }

    #[tokio::test]
    async fn test_close_unlocks_uncompleted_messages() {
        let mut server = mockito::Server::new_async().await;
        let _head = server
            .mock("POST", "/orders/messages/head")
            .match_query(Matcher::Any)
            .with_status(201)
            .with_header("BrokerProperties", r#"{"LockToken":"lock-2","SequenceNumber":5}"#)
            .with_header("Location", "/orders/messages/m2/lock-2")
            .with_body("not json")
            .create_async()
            .await;
        let unlock = server
            .mock("PUT", "/orders/messages/m2/lock-2")
            .with_status(200)
            .expect(1)
            .create_async()
            .await;

        let client =
            ServiceBusReceiverClient::new(reqwest::Client::new(), connection(&server.url()), &orders());
        let OpenedReceiver::Ready(mut receiver) = client
            .open_receiver(&SessionRequest::None, &ReceiverSettings::new(30, 1))
            .await
            .unwrap()
        else {
            panic!("expected a receiver");
        };
        let batch = receiver
            .fetch_next(Some(1), Duration::from_secs(1))
            .await
            .unwrap();
        assert_eq!(batch.len(), 1);

        receiver.close().await.unwrap();
        unlock.assert_async().await;
    }

    #[tokio::test]
    async fn test_empty_entity_yields_empty_batch() {
        let mut server = mockito::Server::new_async().await;
        let _head = server
            .mock("POST", "/orders/messages/head")
            .match_query(Matcher::Any)
            .with_status(204)
            .create_async()
            .await;

        let client =
            ServiceBusReceiverClient::new(reqwest::Client::new(), connection(&server.url()), &orders());
        let OpenedReceiver::Ready(mut receiver) = client
            .open_receiver(&SessionRequest::None, &ReceiverSettings::new(30, 10))
            .await
            .unwrap()
        else {
            panic!("expected a receiver");
        };
        let batch = receiver
            .fetch_next(None, Duration::from_secs(1))
            .await
            .unwrap();
        assert!(batch.is_empty());
        receiver.close().await.unwrap();
    }

    #[test]
    fn test_parse_keeps_connection_string_for_session_clients() {
        let raw = format!(
            " Endpoint=sb://acme.servicebus.windows.net/;SharedAccessKeyName=RootManageSharedAccessKey;SharedAccessKey={KEY} "
        );
        let connection = ServiceBusConnection::parse(&raw).unwrap();
        assert_eq!(connection.connection_string(), raw.trim());
    }
}
