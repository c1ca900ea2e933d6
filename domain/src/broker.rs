//! Broker client abstraction.
//!
//! A [`Broker`] turns a connection string plus an entity name into a handle that can
//! send messages or open receivers. Concrete transports live under [`crate::gateway`].
use crate::error::Error;
use crate::message::{InboundMessage, OutboundMessage, SendOutcome};
use async_trait::async_trait;
use std::fmt;
use std::time::Duration;

/// Session id value that asks the broker for whichever session is available next.
pub const NEXT_AVAILABLE_SESSION: &str = "*";

/// Where outbound messages are delivered.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SendTarget {
    Topic { topic_name: String },
    Queue { queue_name: String },
}

impl SendTarget {
    pub fn entity_path(&self) -> String {
        match self {
            SendTarget::Topic { topic_name } => topic_name.clone(),
            SendTarget::Queue { queue_name } => queue_name.clone(),
        }
    }
}

impl fmt::Display for SendTarget {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            SendTarget::Topic { topic_name } => write!(f, "topic '{topic_name}'"),
            SendTarget::Queue { queue_name } => write!(f, "queue '{queue_name}'"),
        }
    }
}

/// Where pending messages are fetched from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReceiveSource {
    Subscription {
        topic_name: String,
        subscription_name: String,
    },
    Queue {
        queue_name: String,
    },
}

impl ReceiveSource {
    pub fn entity_path(&self) -> String {
        match self {
            ReceiveSource::Subscription {
                topic_name,
                subscription_name,
            } => format!("{topic_name}/subscriptions/{subscription_name}"),
            ReceiveSource::Queue { queue_name } => queue_name.clone(),
        }
    }
}

impl fmt::Display for ReceiveSource {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            ReceiveSource::Subscription {
                topic_name,
                subscription_name,
            } => write!(f, "subscription '{subscription_name}' of topic '{topic_name}'"),
            ReceiveSource::Queue { queue_name } => write!(f, "queue '{queue_name}'"),
        }
    }
}

/// Which session a receiver should be bound to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionRequest {
    /// Plain receiver, only sees messages sent without a session id.
    None,
    Id(String),
    NextAvailable,
}

impl SessionRequest {
    /// Interprets the optional `session_id` query value. Empty values count as absent.
    pub fn from_param(session_id: Option<&str>) -> Self {
        match session_id {
            None | Some("") => SessionRequest::None,
            Some(NEXT_AVAILABLE_SESSION) => SessionRequest::NextAvailable,
            Some(id) => SessionRequest::Id(id.to_string()),
        }
    }

    pub fn is_next_available(&self) -> bool {
        matches!(self, SessionRequest::NextAvailable)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReceiverSettings {
    /// How long a receiver may go without receiving anything before it reports itself
    /// drained. Zero disables the idle timeout.
    pub idle_timeout: Duration,
    /// Upper bound on the first fetch of each receiver.
    pub prefetch: usize,
}

impl ReceiverSettings {
    pub fn new(idle_timeout_secs: u64, prefetch: u32) -> Self {
        Self {
            idle_timeout: Duration::from_secs(idle_timeout_secs),
            prefetch: prefetch as usize,
        }
    }
}

/// Outcome of asking for a receiver. `NoActiveSession` is the broker saying that no
/// session is waiting to be consumed, which ends a next-available drain.
pub enum OpenedReceiver {
    Ready(Box<dyn Receiver>),
    NoActiveSession,
}

impl fmt::Debug for OpenedReceiver {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            OpenedReceiver::Ready(receiver) => f
                .debug_tuple("Ready")
                .field(&receiver.session_id())
                .finish(),
            OpenedReceiver::NoActiveSession => write!(f, "NoActiveSession"),
        }
    }
}

/// Factory for entity-scoped clients, selected by connection string.
#[async_trait]
pub trait Broker: Send + Sync {
    /// Builds a client bound to a topic or queue that can send messages.
    async fn sender(
        &self,
        connection_string: &str,
        target: &SendTarget,
    ) -> Result<Box<dyn SenderClient>, Error>;

    /// Builds a client bound to a subscription or queue that can open receivers.
    async fn receiver_client(
        &self,
        connection_string: &str,
        source: &ReceiveSource,
    ) -> Result<Box<dyn ReceiverClient>, Error>;
}

#[async_trait]
pub trait SenderClient: Send + Sync {
    /// Sends all messages as one batch. Returns exactly one outcome per message, in
    /// order. A message the broker refuses is reported in its outcome; `Err` is kept
    /// for failures that prevent the batch from being attempted at all.
    async fn send(
        &self,
        messages: &[OutboundMessage],
        session_id: Option<&str>,
    ) -> Result<Vec<SendOutcome>, Error>;
}

#[async_trait]
pub trait ReceiverClient: Send + Sync {
    async fn open_receiver(
        &self,
        session: &SessionRequest,
        settings: &ReceiverSettings,
    ) -> Result<OpenedReceiver, Error>;
}

/// A peek-lock receiver. Every receiver must be closed with [`Receiver::close`], which
/// releases the locks of messages that were fetched but not completed.
#[async_trait]
pub trait Receiver: Send {
    /// Session this receiver is bound to, if any.
    fn session_id(&self) -> Option<&str>;

    /// Fetches up to `max_batch_size` messages (all available when `None`), waiting at
    /// most `wait` for the first one to arrive. An empty batch means drained.
    async fn fetch_next(
        &mut self,
        max_batch_size: Option<usize>,
        wait: Duration,
    ) -> Result<Vec<InboundMessage>, Error>;

    /// Removes a fetched message from the broker.
    async fn complete(&mut self, message: &InboundMessage) -> Result<(), Error>;

    async fn close(self: Box<Self>) -> Result<(), Error>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_session_request_from_param() {
        assert_eq!(SessionRequest::from_param(None), SessionRequest::None);
        assert_eq!(SessionRequest::from_param(Some("")), SessionRequest::None);
        assert_eq!(
            SessionRequest::from_param(Some("*")),
            SessionRequest::NextAvailable
        );
        assert_eq!(
            SessionRequest::from_param(Some("s1")),
            SessionRequest::Id("s1".to_string())
        );
    }

    #[test]
    fn test_entity_paths() {
        let subscription = ReceiveSource::Subscription {
            topic_name: "events".to_string(),
            subscription_name: "audit".to_string(),
        };
        assert_eq!(subscription.entity_path(), "events/subscriptions/audit");

        let queue = SendTarget::Queue {
            queue_name: "orders".to_string(),
        };
        assert_eq!(queue.entity_path(), "orders");
        assert_eq!(queue.to_string(), "queue 'orders'");
    }

    #[test]
    fn test_receiver_settings_from_request_values() {
        let settings = ReceiverSettings::new(30, 10);
        assert_eq!(settings.idle_timeout, Duration::from_secs(30));
        assert_eq!(settings.prefetch, 10);
    }
}
