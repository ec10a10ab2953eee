//! Pooling properties.
//!
//! Every key is looked up as `pooling.<controller>.<key>` first and then as
//! `pooling.<key>`, so one file can hold defaults plus per-controller
//! overrides:
//!
//! ```text
//! pooling.enabled=true
//! pooling.topic=POOLING
//! pooling.usecases.topic=POOLING-USECASES
//! ```

use pdpd_core::error::ConfigError;
use pdpd_core::properties::Properties;
use pdpd_core::topic::CommInfrastructure;
use std::time::Duration;

use crate::error::PoolingResult;

pub const PREFIX: &str = "pooling";

pub const ENABLED: &str = "enabled";
pub const TOPIC: &str = "topic";
pub const OFFLINE_QUEUE_LIMIT: &str = "offline.queue.limit";
pub const OFFLINE_QUEUE_AGE_MS: &str = "offline.queue.age.milliseconds";
pub const OFFLINE_PUBLISH_WAIT_MS: &str = "offline.publish.wait.milliseconds";
pub const START_HEARTBEAT_MS: &str = "start.heartbeat.milliseconds";
pub const REACTIVATE_MS: &str = "reactivate.milliseconds";
pub const IDENTIFICATION_MS: &str = "identification.milliseconds";
pub const ACTIVE_HEARTBEAT_MS: &str = "active.heartbeat.milliseconds";
pub const INTER_HEARTBEAT_MS: &str = "inter.heartbeat.milliseconds";
pub const REQUEST_ID_PATH: &str = "request.id.path";

/// Typed pooling settings of one controller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PoolingProperties {
    /// Controller the settings belong to
    pub controller: String,

    pub enabled: bool,

    /// Topic shared by every host of the pool
    pub topic: String,

    /// Forwards kept while no assignments are known
    pub offline_queue_limit: usize,

    /// Queued forwards older than this are discarded
    pub offline_queue_age: Duration,

    /// Upper bound on waiting for in-flight publishes when stopping
    pub offline_publish_wait: Duration,

    /// Time allowed for a host to see its own start heartbeat
    pub start_heartbeat: Duration,

    /// Delay before an inactive host tries to rejoin
    pub reactivate: Duration,

    /// Length of a query round
    pub identification: Duration,

    /// Time allowed between heartbeats from the ring successor
    pub active_heartbeat: Duration,

    /// Period of the ring heartbeat and the leader's re-broadcast
    pub inter_heartbeat: Duration,

    /// Dotted path of the request id inside an event
    pub request_id_path: String,
}

impl PoolingProperties {
    pub fn from_properties(controller: &str, props: &Properties) -> PoolingResult<Self> {
        let lookup = Lookup { controller, props };

        let enabled = lookup.get_bool(ENABLED)?.unwrap_or(false);
        let topic = match lookup.get(TOPIC) {
            Some(topic) => topic.to_string(),
            None if enabled => {
                return Err(ConfigError::missing_field(lookup.key(TOPIC)).into());
            }
            None => String::new(),
        };

        let offline_queue_limit = lookup.get_u64(OFFLINE_QUEUE_LIMIT)?.unwrap_or(1000);
        if offline_queue_limit == 0 {
            return Err(ConfigError::invalid_value(
                lookup.key(OFFLINE_QUEUE_LIMIT),
                "must be greater than zero",
            )
            .into());
        }

        Ok(Self {
            controller: controller.to_string(),
            enabled,
            topic,
            offline_queue_limit: offline_queue_limit as usize,
            offline_queue_age: lookup.millis(OFFLINE_QUEUE_AGE_MS, 60_000)?,
            offline_publish_wait: lookup.millis(OFFLINE_PUBLISH_WAIT_MS, 3_000)?,
            start_heartbeat: lookup.positive_millis(START_HEARTBEAT_MS, 100_000)?,
            reactivate: lookup.positive_millis(REACTIVATE_MS, 50_000)?,
            identification: lookup.positive_millis(IDENTIFICATION_MS, 50_000)?,
            active_heartbeat: lookup.positive_millis(ACTIVE_HEARTBEAT_MS, 50_000)?,
            inter_heartbeat: lookup.positive_millis(INTER_HEARTBEAT_MS, 15_000)?,
            request_id_path: lookup.get(REQUEST_ID_PATH).unwrap_or("requestId").to_string(),
        })
    }

    /// Endpoint properties that make the topic provider create the pooling
    /// topic's source and sink.
    pub fn endpoint_properties(&self) -> Properties {
        let infra = CommInfrastructure::Noop;
        Properties::new()
            .with(infra.source_topics_key(), &self.topic)
            .with(infra.sink_topics_key(), &self.topic)
    }
}

struct Lookup<'a> {
    controller: &'a str,
    props: &'a Properties,
}

impl Lookup<'_> {
    fn scoped(&self, key: &str) -> String {
        format!("{}.{}.{}", PREFIX, self.controller, key)
    }

    fn global(&self, key: &str) -> String {
        format!("{}.{}", PREFIX, key)
    }

    /// The key that supplied the value, for error messages.
    fn key(&self, key: &str) -> String {
        let scoped = self.scoped(key);
        if self.props.get(&scoped).is_some() {
            scoped
        } else {
            self.global(key)
        }
    }

    fn get(&self, key: &str) -> Option<&str> {
        self.props
            .get(&self.scoped(key))
            .or_else(|| self.props.get(&self.global(key)))
    }

    fn get_bool(&self, key: &str) -> Result<Option<bool>, ConfigError> {
        self.props.get_bool(&self.key(key))
    }

    fn get_u64(&self, key: &str) -> Result<Option<u64>, ConfigError> {
        self.props.get_u64(&self.key(key))
    }

    fn millis(&self, key: &str, default: u64) -> Result<Duration, ConfigError> {
        Ok(Duration::from_millis(self.get_u64(key)?.unwrap_or(default)))
    }

    fn positive_millis(&self, key: &str, default: u64) -> Result<Duration, ConfigError> {
        let value = self.millis(key, default)?;
        if value.is_zero() {
            return Err(ConfigError::invalid_value(self.key(key), "must be greater than zero"));
        }
        Ok(value)
    }
}
