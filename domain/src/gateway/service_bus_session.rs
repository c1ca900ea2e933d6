//! Session-bound Azure Service Bus receivers, opened over AMQP.
//!
//! Every receiver gets its own AMQP connection, which is closed together with the
//! receiver. Accepting a session locks it until the receiver is closed.
use crate::broker::{OpenedReceiver, ReceiveSource, Receiver, ReceiverSettings, SessionRequest};
use crate::error::{BrokerErrorKind, Error};
use crate::message::InboundMessage;
use async_trait::async_trait;
use azservicebus::prelude::*;
use log::*;
use std::collections::HashMap;
use std::fmt::Display;
use std::future::Future;
use std::time::Duration;
use tokio::time::Instant;

/// How long the broker gets to hand over an unlocked session before the entity is
/// considered to have no active sessions.
pub const ACCEPT_NEXT_SESSION_WAIT: Duration = Duration::from_secs(5);

/// Cap on a fetch that asks for everything available.
const MAX_BATCH_SIZE: u32 = 1000;

pub(crate) async fn open_session_receiver(
    connection_string: &str,
    source: &ReceiveSource,
    session: &SessionRequest,
    settings: &ReceiverSettings,
) -> Result<OpenedReceiver, Error> {
    let mut client = ServiceBusClient::new_from_connection_string(
        connection_string,
        ServiceBusClientOptions::default(),
    )
    .await
    .map_err(amqp_error)?;
    let options = ServiceBusSessionReceiverOptions::default();

    let receiver = match (session, source) {
        (SessionRequest::None, _) => {
            return Err(Error::broker(BrokerErrorKind::Unsupported(
                "a session receiver needs a session id".to_string(),
            )))
        }
        (SessionRequest::Id(session_id), ReceiveSource::Queue { queue_name }) => client
            .accept_session_for_queue(queue_name.as_str(), session_id.as_str(), options)
            .await
            .map_err(amqp_error)?,
        (
            SessionRequest::Id(session_id),
            ReceiveSource::Subscription {
                topic_name,
                subscription_name,
            },
        ) => client
            .accept_session_for_subscription(
                topic_name.as_str(),
                subscription_name.as_str(),
                session_id.as_str(),
                options,
            )
            .await
            .map_err(amqp_error)?,
        (SessionRequest::NextAvailable, ReceiveSource::Queue { queue_name }) => {
            let accept = client.accept_next_session_for_queue(queue_name.as_str(), options);
            match accept_or_none(accept, ACCEPT_NEXT_SESSION_WAIT).await? {
                Some(receiver) => receiver,
                None => return Ok(OpenedReceiver::NoActiveSession),
            }
        }
        (
            SessionRequest::NextAvailable,
            ReceiveSource::Subscription {
                topic_name,
                subscription_name,
            },
        ) => {
            let accept = client.accept_next_session_for_subscription(
                topic_name.as_str(),
                subscription_name.as_str(),
                options,
            );
            match accept_or_none(accept, ACCEPT_NEXT_SESSION_WAIT).await? {
                Some(receiver) => receiver,
                None => return Ok(OpenedReceiver::NoActiveSession),
            }
        }
    };

    let session_id = receiver.session_id().to_string();
    debug!("Accepted session '{session_id}' on {source}");
    Ok(OpenedReceiver::Ready(Box::new(SessionReceiver {
        _client: client,
        receiver,
        session_id,
        source: source.clone(),
        settings: *settings,
        last_activity: Instant::now(),
        held_messages: HashMap::new(),
    })))
}

/// Waits at most `wait` for a session to be accepted. Running out of time, or the
/// broker reporting a timeout of its own, means no session is waiting.
async fn accept_or_none<R, E: Display>(
    accept: impl Future<Output = Result<R, E>>,
    wait: Duration,
) -> Result<Option<R>, Error> {
    match tokio::time::timeout(wait, accept).await {
        Err(_) => Ok(None),
        Ok(Ok(receiver)) => Ok(Some(receiver)),
        Ok(Err(err)) if is_timeout(&err) => {
            debug!("Accepting the next session timed out: {err}");
            Ok(None)
        }
        Ok(Err(err)) => Err(amqp_error(err)),
    }
}

fn is_timeout(err: &impl Display) -> bool {
    let text = err.to_string().to_ascii_lowercase();
    text.contains("timeout") || text.contains("timed out")
}

fn amqp_error(err: impl Display) -> Error {
    Error::broker(BrokerErrorKind::Rejected(err.to_string()))
}

/// Holds on to the client so its connection lives as long as the receiver.
struct SessionReceiver<C> {
    _client: C,
    receiver: ServiceBusSessionReceiver,
    session_id: String,
    source: ReceiveSource,
    settings: ReceiverSettings,
    last_activity: Instant,
    /// Lock token handed out in [`InboundMessage`] to the message it settles.
    held_messages: HashMap<String, ServiceBusReceivedMessage>,
}

#[async_trait]
impl<C: Send> Receiver for SessionReceiver<C> {
    fn session_id(&self) -> Option<&str> {
        Some(&self.session_id)
    }

    async fn fetch_next(
        &mut self,
        max_batch_size: Option<usize>,
        wait: Duration,
    ) -> Result<Vec<InboundMessage>, Error> {
        let idle_timeout = self.settings.idle_timeout;
        if !idle_timeout.is_zero() && self.last_activity.elapsed() >= idle_timeout {
            debug!("Session '{}' on {} idled out", self.session_id, self.source);
            return Ok(Vec::new());
        }

        let limit = max_batch_size
            .map(|size| u32::try_from(size).unwrap_or(MAX_BATCH_SIZE))
            .unwrap_or(MAX_BATCH_SIZE)
            .clamp(1, MAX_BATCH_SIZE);
        let received = self
            .receiver
            .receive_messages_with_max_wait_time(limit, Some(wait))
            .await
            .map_err(amqp_error)?;

        let mut batch = Vec::with_capacity(received.len());
        for message in received {
            let lock_token = uuid::Uuid::new_v4().to_string();
            batch.push(InboundMessage::new(
                lock_token.clone(),
                message.sequence_number(),
                Some(self.session_id.clone()),
                message.delivery_count().unwrap_or_default(),
                vec![message.body().map_err(amqp_error)?.to_vec()],
            ));
            self.held_messages.insert(lock_token, message);
        }
        if !batch.is_empty() {
            self.last_activity = Instant::now();
        }
        Ok(batch)
    }

    async fn complete(&mut self, message: &InboundMessage) -> Result<(), Error> {
        let received = self
            .held_messages
            .remove(&message.lock_token)
            .ok_or_else(|| {
                Error::broker(BrokerErrorKind::Rejected(format!(
                    "message {} was not received by this receiver",
                    message.sequence_number
                )))
            })?;
        self.receiver
            .complete_message(&received)
            .await
            .map_err(amqp_error)
    }

    async fn close(self: Box<Self>) -> Result<(), Error> {
        let this = *self;
        if !this.held_messages.is_empty() {
            debug!(
                "Releasing session '{}' with {} uncompleted message(s)",
                this.session_id,
                this.held_messages.len()
            );
        }
        // Closing the session link releases its lock, which also unlocks its messages.
        this.receiver.dispose().await.map_err(amqp_error)
    }
}
