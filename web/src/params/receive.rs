use domain::{ReceiveSource, ReceiverSettings, SessionRequest};
use serde::Deserialize;
use service::config::Config;
use utoipa::IntoParams;

use super::{invalid, required};
use crate::Error;

#[derive(Debug, Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
pub(crate) struct ReceiveSubscriptionParams {
    /// Key into the configured connection list
    pub(crate) connection_key: String,
    pub(crate) topic_name: String,
    pub(crate) sub_name: String,
    /// Session to drain; `*` drains every session with pending messages
    pub(crate) session_id: Option<String>,
    /// Seconds the receiver may stay idle, defaults to the server setting
    pub(crate) idle_timeout: Option<u64>,
    /// Size of the first fetch, defaults to the server setting
    pub(crate) prefetch: Option<u32>,
}

impl ReceiveSubscriptionParams {
    pub(crate) fn source(&self) -> Result<ReceiveSource, Error> {
        Ok(ReceiveSource::Subscription {
            topic_name: required("topic_name", &self.topic_name)?,
            subscription_name: required("sub_name", &self.sub_name)?,
        })
    }

    pub(crate) fn session(&self) -> SessionRequest {
        SessionRequest::from_param(self.session_id.as_deref())
    }

    pub(crate) fn settings(&self, config: &Config) -> Result<ReceiverSettings, Error> {
        receiver_settings(self.idle_timeout, self.prefetch, config)
    }
}

#[derive(Debug, Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
pub(crate) struct ReceiveQueueParams {
    /// Key into the configured connection list
    pub(crate) connection_key: String,
    pub(crate) queue_name: String,
    /// Session to drain; `*` drains every session with pending messages
    pub(crate) session_id: Option<String>,
    /// Seconds the receiver may stay idle, defaults to the server setting
    pub(crate) idle_timeout: Option<u64>,
    /// Size of the first fetch, defaults to the server setting
    pub(crate) prefetch: Option<u32>,
}

impl ReceiveQueueParams {
    pub(crate) fn source(&self) -> Result<ReceiveSource, Error> {
        Ok(ReceiveSource::Queue {
            queue_name: required("queue_name", &self.queue_name)?,
        })
    }

    pub(crate) fn session(&self) -> SessionRequest {
        SessionRequest::from_param(self.session_id.as_deref())
    }

    pub(crate) fn settings(&self, config: &Config) -> Result<ReceiverSettings, Error> {
        receiver_settings(self.idle_timeout, self.prefetch, config)
    }
}

fn receiver_settings(
    idle_timeout: Option<u64>,
    prefetch: Option<u32>,
    config: &Config,
) -> Result<ReceiverSettings, Error> {
    let prefetch = prefetch.unwrap_or(config.default_prefetch);
    if prefetch == 0 {
        return Err(invalid("prefetch must be at least 1".to_string()));
    }
    Ok(ReceiverSettings::new(
        idle_timeout.unwrap_or(config.default_idle_timeout),
        prefetch,
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn queue_params(idle_timeout: Option<u64>, prefetch: Option<u32>) -> ReceiveQueueParams {
        ReceiveQueueParams {
            connection_key: "local".to_string(),
            queue_name: "orders".to_string(),
            session_id: None,
            idle_timeout,
            prefetch,
        }
    }

    #[test]
    fn test_settings_fall_back_to_config_defaults() {
        let config = Config::from_env();
        let settings = queue_params(None, None).settings(&config).unwrap();
        assert_eq!(
            settings.idle_timeout,
            Duration::from_secs(config.default_idle_timeout)
        );
        assert_eq!(settings.prefetch, config.default_prefetch as usize);
    }

    #[test]
    fn test_explicit_settings_win() {
        let config = Config::from_env();
        let settings = queue_params(Some(5), Some(2)).settings(&config).unwrap();
        assert_eq!(settings.idle_timeout, Duration::from_secs(5));
        assert_eq!(settings.prefetch, 2);
    }

    #[test]
    fn test_zero_prefetch_is_rejected() {
        let config = Config::from_env();
        assert!(queue_params(None, Some(0)).settings(&config).is_err());
    }

    #[test]
    fn test_subscription_source_and_session() {
        let params = ReceiveSubscriptionParams {
            connection_key: "local".to_string(),
            topic_name: "events".to_string(),
            sub_name: "audit".to_string(),
            session_id: Some("*".to_string()),
            idle_timeout: None,
            prefetch: None,
        };
        assert_eq!(
            params.source().unwrap(),
            ReceiveSource::Subscription {
                topic_name: "events".to_string(),
                subscription_name: "audit".to_string()
            }
        );
        assert_eq!(params.session(), SessionRequest::NextAvailable);
    }

    #[test]
    fn test_blank_subscription_name_is_rejected() {
        let params = ReceiveSubscriptionParams {
            connection_key: "local".to_string(),
            topic_name: "events".to_string(),
            sub_name: " ".to_string(),
            session_id: None,
            idle_timeout: None,
            prefetch: None,
        };
        assert!(params.source().is_err());
    }
}
