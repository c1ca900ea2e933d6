use crate::broker::{Broker, SendTarget};
use crate::error::{DomainErrorKind, Error, InternalErrorKind};
use crate::message::{OutboundMessage, SendOutcome};
use log::*;
use serde_json::Value;

/// Sends `body` to `target` as one batch: an object is one message, an array is one
/// message per element. Returns the broker's outcome for every message, in order.
/// Individual failures are logged and reported, never retried.
pub async fn send_messages(
    broker: &dyn Broker,
    connection_string: &str,
    target: &SendTarget,
    body: &Value,
    session_id: Option<&str>,
) -> Result<Vec<SendOutcome>, Error> {
    let sender = broker.sender(connection_string, target).await?;

    let messages = OutboundMessage::batch_from_body(body);
    if messages.is_empty() {
        return Ok(Vec::new());
    }

    debug!(
        "Sending {} message(s) to {target} (session {:?})",
        messages.len(),
        session_id
    );
    let outcomes = sender.send(&messages, session_id).await?;
    if outcomes.len() != messages.len() {
        return Err(Error {
            source: None,
            error_kind: DomainErrorKind::Internal(InternalErrorKind::Other(format!(
                "broker returned {} outcomes for {} messages",
                outcomes.len(),
                messages.len()
            ))),
        });
    }

    for (index, (message, outcome)) in messages.iter().zip(&outcomes).enumerate() {
        if !outcome.is_success() {
            warn!(
                "Failed to send message {} (index {index}) to {target}: {}",
                message.body_lossy(),
                outcome.diagnostic().unwrap_or("no diagnostic")
            );
        }
    }

    Ok(outcomes)
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::broker::{ReceiveSource, ReceiverClient, SenderClient};
    use crate::error::BrokerErrorKind;
    use crate::gateway::Gateway;
    use async_trait::async_trait;
    use serde_json::json;

    /// Broker whose every operation fails, as an unreachable namespace would.
    pub(crate) struct UnreachableBroker;

    #[async_trait]
    impl Broker for UnreachableBroker {
        async fn sender(
            &self,
            _connection_string: &str,
            _target: &SendTarget,
        ) -> Result<Box<dyn SenderClient>, Error> {
            Err(Error::broker(BrokerErrorKind::Rejected(
                "namespace unreachable".to_string(),
            )))
        }

        async fn receiver_client(
            &self,
            _connection_string: &str,
            _source: &ReceiveSource,
        ) -> Result<Box<dyn ReceiverClient>, Error> {
            Err(Error::broker(BrokerErrorKind::Rejected(
                "namespace unreachable".to_string(),
            )))
        }
    }

    fn orders() -> SendTarget {
        SendTarget::Queue {
            queue_name: "orders".to_string(),
        }
    }

    #[tokio::test]
    async fn test_array_yields_one_outcome_per_element() {
        let gateway = Gateway::new().unwrap();
        let outcomes = send_messages(
            &gateway,
            "memory://send-array?queues=orders",
            &orders(),
            &json!([{"a": 1}, {"b": 2}, {"c": 3}]),
            None,
        )
        .await
        .unwrap();

        assert_eq!(outcomes, vec![SendOutcome::sent(); 3]);
        let namespace = gateway.memory().namespace("memory://send-array").unwrap();
        let queue = ReceiveSource::Queue {
            queue_name: "orders".to_string(),
        };
        assert_eq!(namespace.pending_count(&queue).unwrap(), 3);
    }

    #[tokio::test]
    async fn test_object_yields_single_outcome() {
        let gateway = Gateway::new().unwrap();
        let outcomes = send_messages(
            &gateway,
            "memory://send-object?queues=orders",
            &orders(),
            &json!({"a": 1}),
            Some("s1"),
        )
        .await
        .unwrap();
        assert_eq!(outcomes.len(), 1);
    }

    #[tokio::test]
    async fn test_failed_message_does_not_abort_batch() {
        let gateway = Gateway::new().unwrap();
        let too_big = "x".repeat(crate::gateway::memory::MAX_MESSAGE_BYTES);
        let outcomes = send_messages(
            &gateway,
            "memory://send-partial?queues=orders",
            &orders(),
            &json!([{"a": 1}, too_big, {"c": 3}]),
            None,
        )
        .await
        .unwrap();

        let flags: Vec<bool> = outcomes.iter().map(SendOutcome::is_success).collect();
        assert_eq!(flags, vec![true, false, true]);
    }

    #[tokio::test]
    async fn test_non_container_body_sends_nothing() {
        let gateway = Gateway::new().unwrap();
        for body in [json!(null), json!("text"), json!(5)] {
            let outcomes = send_messages(
                &gateway,
                "memory://send-nothing?queues=orders",
                &orders(),
                &body,
                None,
            )
            .await
            .unwrap();
            assert!(outcomes.is_empty());
        }
    }

    #[tokio::test]
    async fn test_broker_failure_is_an_error() {
        let result = send_messages(
            &UnreachableBroker,
            "memory://anything",
            &orders(),
            &json!({"a": 1}),
            None,
        )
        .await;
        assert!(result.is_err());
    }
}
