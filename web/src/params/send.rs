use domain::SendTarget;
use serde::Deserialize;
use utoipa::IntoParams;

use super::{optional, required};
use crate::Error;

#[derive(Debug, Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
pub(crate) struct SendToTopicParams {
    /// Key into the configured connection list
    pub(crate) connection_key: String,
    pub(crate) topic_name: String,
    /// Session every message in the batch is stamped with
    pub(crate) session_id: Option<String>,
}

impl SendToTopicParams {
    pub(crate) fn target(&self) -> Result<SendTarget, Error> {
        Ok(SendTarget::Topic {
            topic_name: required("topic_name", &self.topic_name)?,
        })
    }

    pub(crate) fn session_id(&self) -> Option<&str> {
        optional(self.session_id.as_deref())
    }
}

#[derive(Debug, Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
pub(crate) struct SendToQueueParams {
    /// Key into the configured connection list
    pub(crate) connection_key: String,
    pub(crate) queue_name: String,
    /// Session every message in the batch is stamped with
    pub(crate) session_id: Option<String>,
}

impl SendToQueueParams {
    pub(crate) fn target(&self) -> Result<SendTarget, Error> {
        Ok(SendTarget::Queue {
            queue_name: required("queue_name", &self.queue_name)?,
        })
    }

    pub(crate) fn session_id(&self) -> Option<&str> {
        optional(self.session_id.as_deref())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_topic_params_build_topic_target() {
        let params = SendToTopicParams {
            connection_key: "local".to_string(),
            topic_name: "events".to_string(),
            session_id: Some(String::new()),
        };
        assert_eq!(
            params.target().unwrap(),
            SendTarget::Topic {
                topic_name: "events".to_string()
            }
        );
        assert_eq!(params.session_id(), None);
    }

    #[test]
    fn test_empty_queue_name_is_rejected() {
        let params = SendToQueueParams {
            connection_key: "local".to_string(),
            queue_name: String::new(),
            session_id: Some("s1".to_string()),
        };
        assert!(params.target().is_err());
        assert_eq!(params.session_id(), Some("s1"));
    }
}
