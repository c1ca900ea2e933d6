//! Draining pending messages from a subscription or queue into one JSON array.
use crate::broker::{Broker, OpenedReceiver, ReceiveSource, Receiver, ReceiverSettings, SessionRequest};
use crate::error::Error;
use crate::message::InboundMessage;
use log::*;
use serde::de::IgnoredAny;
use std::time::Duration;

/// How long each fetch waits for messages to arrive.
pub const FETCH_WAIT: Duration = Duration::from_secs(1);

/// Builds a JSON array out of already-serialized JSON documents.
#[derive(Debug)]
pub struct JsonArrayWriter {
    buffer: Vec<u8>,
    count: usize,
}

impl Default for JsonArrayWriter {
    fn default() -> Self {
        Self::new()
    }
}

impl JsonArrayWriter {
    pub fn new() -> Self {
        Self {
            buffer: vec![b'['],
            count: 0,
        }
    }

    /// Appends one element. `document` must be a complete, valid JSON text.
    pub fn push_raw(&mut self, document: &[u8]) {
        if self.count > 0 {
            self.buffer.push(b',');
        }
        self.buffer.extend_from_slice(document);
        self.count += 1;
    }

    pub fn len(&self) -> usize {
        self.count
    }

    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    pub fn finish(mut self) -> Vec<u8> {
        self.buffer.push(b']');
        self.buffer
    }
}

/// Fetches every pending message from `source` and returns the ones whose bodies are valid
/// JSON as a JSON array, in fetch order. Those messages are completed; the rest stay on
/// the broker for redelivery. With [`SessionRequest::NextAvailable`] sessions are drained
/// one after another until the broker has none left.
pub async fn drain_messages(
    broker: &dyn Broker,
    connection_string: &str,
    source: &ReceiveSource,
    session: &SessionRequest,
    settings: &ReceiverSettings,
) -> Result<Vec<u8>, Error> {
    let client = broker.receiver_client(connection_string, source).await?;
    let mut output = JsonArrayWriter::new();

    loop {
        let mut receiver = match client.open_receiver(session, settings).await? {
            OpenedReceiver::Ready(receiver) => receiver,
            OpenedReceiver::NoActiveSession => {
                debug!("No more active sessions on {source}");
                break;
            }
        };
        debug!(
            "Draining {source} (session {:?})",
            receiver.session_id().unwrap_or("none")
        );

        let drained = drain_receiver(receiver.as_mut(), settings.prefetch, &mut output).await;
        let closed = receiver.close().await;
        drained?;
        closed?;

        if !session.is_next_available() {
            break;
        }
    }

    info!("Drained {} message(s) from {source}", output.len());
    Ok(output.finish())
}

/// Fetch and acknowledge until the receiver comes back empty.
async fn drain_receiver(
    receiver: &mut dyn Receiver,
    prefetch: usize,
    output: &mut JsonArrayWriter,
) -> Result<(), Error> {
    let mut batch = receiver.fetch_next(Some(prefetch), FETCH_WAIT).await?;
    while !batch.is_empty() {
        for message in &batch {
            accept_if_json(receiver, message, output).await?;
        }
        batch = receiver.fetch_next(None, FETCH_WAIT).await?;
    }
    Ok(())
}

async fn accept_if_json(
    receiver: &mut dyn Receiver,
    message: &InboundMessage,
    output: &mut JsonArrayWriter,
) -> Result<(), Error> {
    let body = message.body();
    match serde_json::from_slice::<IgnoredAny>(&body) {
        Ok(_) => {
            receiver.complete(message).await?;
            output.push_raw(&body);
        }
        Err(err) => warn!(
            "Leaving message {} on the broker, its body is not valid JSON: {err}",
            message.sequence_number
        ),
    }
    Ok(())
}
