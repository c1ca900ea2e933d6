//! Messages as the bridge sees them on the way into and out of a broker.
use log::*;
use serde::Serialize;
use serde_json::Value;

/// One message about to be sent. The body is the JSON text of a single payload.
#[derive(Debug, Clone, PartialEq)]
pub struct OutboundMessage {
    body: Vec<u8>,
}

impl OutboundMessage {
    pub fn from_json(value: &Value) -> Self {
        Self {
            // Serializing a `Value` cannot fail: its map keys are always strings.
            body: serde_json::to_vec(value).unwrap_or_default(),
        }
    }

    pub fn body(&self) -> &[u8] {
        &self.body
    }

    pub fn body_lossy(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }

    /// Splits a request body into outbound messages: an object is one message, an
    /// array is one message per element, anything else produces nothing.
    pub fn batch_from_body(body: &Value) -> Vec<OutboundMessage> {
        match body {
            Value::Object(_) => vec![OutboundMessage::from_json(body)],
            Value::Array(items) => items.iter().map(OutboundMessage::from_json).collect(),
            other => {
                debug!("Request body is neither an object nor an array ({other}), nothing to send");
                Vec::new()
            }
        }
    }
}

/// Result of sending one message: whether the broker accepted it, and why not if it didn't.
/// Serializes as a two element array, e.g. `[true, null]` or `[false, "too large"]`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SendOutcome(pub bool, pub Option<String>);

impl SendOutcome {
    pub fn sent() -> Self {
        SendOutcome(true, None)
    }

    pub fn failed(diagnostic: impl Into<String>) -> Self {
        SendOutcome(false, Some(diagnostic.into()))
    }

    pub fn is_success(&self) -> bool {
        self.0
    }

    pub fn diagnostic(&self) -> Option<&str> {
        self.1.as_deref()
    }
}

/// A peek-locked message handed out by a receiver. It stays on the broker until completed.
#[derive(Debug, Clone, PartialEq)]
pub struct InboundMessage {
    pub lock_token: String,
    pub sequence_number: i64,
    pub session_id: Option<String>,
    pub delivery_count: u32,
    fragments: Vec<Vec<u8>>,
}

impl InboundMessage {
    pub fn new(
        lock_token: String,
        sequence_number: i64,
        session_id: Option<String>,
        delivery_count: u32,
        fragments: Vec<Vec<u8>>,
    ) -> Self {
        Self {
            lock_token,
            sequence_number,
            session_id,
            delivery_count,
            fragments,
        }
    }

    /// The complete body, reassembled from its fragments in order.
    pub fn body(&self) -> Vec<u8> {
        self.fragments.concat()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_object_body_is_a_single_message() {
        let batch = OutboundMessage::batch_from_body(&json!({"order": 7}));
        assert_eq!(batch.len(), 1);
        assert_eq!(batch[0].body(), br#"{"order":7}"#);
    }

    #[test]
    fn test_array_body_is_one_message_per_element_in_order() {
        let batch = OutboundMessage::batch_from_body(&json!([{"a": 1}, "two", 3, [4]]));
        let bodies: Vec<String> = batch.iter().map(OutboundMessage::body_lossy).collect();
        assert_eq!(bodies, vec![r#"{"a":1}"#, r#""two""#, "3", "[4]"]);
    }

    #[test]
    fn test_scalar_and_null_bodies_produce_nothing() {
        assert!(OutboundMessage::batch_from_body(&json!(null)).is_empty());
        assert!(OutboundMessage::batch_from_body(&json!("text")).is_empty());
        assert!(OutboundMessage::batch_from_body(&json!(42)).is_empty());
        assert!(OutboundMessage::batch_from_body(&json!([])).is_empty());
    }

    #[test]
    fn test_send_outcome_serializes_as_pair() {
        assert_eq!(
            serde_json::to_value(SendOutcome::sent()).unwrap(),
            json!([true, null])
        );
        assert_eq!(
            serde_json::to_value(SendOutcome::failed("too large")).unwrap(),
            json!([false, "too large"])
        );
    }

    #[test]
    fn test_inbound_body_concatenates_fragments() {
        let message = InboundMessage::new(
            "lock".to_string(),
            1,
            None,
            1,
            vec![b"{\"a\"".to_vec(), b":1}".to_vec()],
        );
        assert_eq!(message.body(), br#"{"a":1}"#.to_vec());
    }
}
