//! Client configuration.
//!
//! [`ClientConfig`] can be built in code, through the
//! [`ClientBuilder`](crate::ClientBuilder) setters, or loaded from JSON.
//! Missing JSON fields take their defaults.
//!
//! ```
//! use mqttsn_client::ClientConfig;
//!
//! let config = ClientConfig::from_json(r#"{ "retry_period_secs": 5 }"#).unwrap();
//! assert_eq!(config.retry_period_secs, 5);
//! assert_eq!(config.retry_count, 3);
//! ```

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::dispatch::DispatchStrategy;
use crate::engine::RetryPolicy;
use crate::error::{MqttsnError, Result};
use crate::protocol::MAX_TOPIC_ID;

/// Default seconds between retransmissions.
pub const DEFAULT_RETRY_PERIOD_SECS: u16 = 15;

/// Default number of retransmissions after the initial send.
pub const DEFAULT_RETRY_COUNT: u32 = 3;

/// Default SEARCHGW broadcast radius (0 = all hops).
pub const DEFAULT_BROADCAST_RADIUS: u8 = 0;

/// Configuration for a [`Client`](crate::Client).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    /// Seconds to wait for a response before retransmitting.
    pub retry_period_secs: u16,
    /// Retransmissions after the initial send before giving up.
    pub retry_count: u32,
    /// Radius field of SEARCHGW broadcasts.
    pub broadcast_radius: u8,
    /// Search for gateways at start and while none is known.
    pub search_gw_enabled: bool,
    /// Lookup strategy of the inbound message factory.
    pub dispatch: DispatchStrategy,
    /// Topic names provisioned with fixed ids on the gateway.
    pub predefined_topics: HashMap<String, u16>,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            retry_period_secs: DEFAULT_RETRY_PERIOD_SECS,
            retry_count: DEFAULT_RETRY_COUNT,
            broadcast_radius: DEFAULT_BROADCAST_RADIUS,
            search_gw_enabled: true,
            dispatch: DispatchStrategy::default(),
            predefined_topics: HashMap::new(),
        }
    }
}

impl ClientConfig {
    /// Parse a configuration from JSON.
    pub fn from_json(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Serialize to pretty-printed JSON.
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Check value ranges.
    pub fn validate(&self) -> Result<()> {
        if self.retry_period_secs == 0 {
            return Err(MqttsnError::BadParameter(
                "retry period must be at least one second".into(),
            ));
        }
        for (name, id) in &self.predefined_topics {
            if name.is_empty() {
                return Err(MqttsnError::BadParameter("empty predefined topic name".into()));
            }
            if *id > MAX_TOPIC_ID {
                return Err(MqttsnError::BadParameter(format!(
                    "predefined topic '{}' uses reserved id {:#06x}",
                    name, id
                )));
            }
        }
        Ok(())
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(self.retry_period_secs, self.retry_count)
    }

    /// Id of a predefined topic.
    pub fn predefined_id(&self, name: &str) -> Option<u16> {
        self.predefined_topics.get(name).copied()
    }

    /// Name of a predefined topic id.
    pub fn predefined_name(&self, id: u16) -> Option<&str> {
        self.predefined_topics
            .iter()
            .find(|(_, v)| **v == id)
            .map(|(k, _)| k.as_str())
    }
}
