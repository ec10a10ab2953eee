//! Pooling topic access.
//!
//! Wraps the source and sink of the pool's topic. The consumer side registers
//! the manager's listener; the publisher side counts in-flight sends so that
//! stopping can wait, up to a bound, for the last messages (typically the
//! `Offline` notice) to leave.

use parking_lot::{Condvar, Mutex};
use pdpd_core::properties::Properties;
use pdpd_core::topic::{TopicEndpointProvider, TopicListener, TopicSink, TopicSource};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

use crate::error::{PoolingError, PoolingResult};

#[derive(Debug, Default)]
struct PublisherState {
    running: bool,
    in_flight: usize,
}

pub struct DmaapManager {
    topic: String,
    source: Arc<dyn TopicSource>,
    sink: Arc<dyn TopicSink>,
    publisher: Mutex<PublisherState>,
    drained: Condvar,
    consumer: Mutex<Option<Arc<dyn TopicListener>>>,
}

impl DmaapManager {
    /// Locates the source and sink of `topic` among the endpoints created
    /// from `endpoint_props`.
    pub fn new(
        topic: &str,
        endpoint_props: &Properties,
        endpoints: &dyn TopicEndpointProvider,
    ) -> PoolingResult<Self> {
        let sources = endpoints.add_topic_sources(endpoint_props);
        if sources.is_empty() {
            return Err(PoolingError::protocol(format!("no sources for pooling topic {}", topic)));
        }
        let source = sources
            .into_iter()
            .find(|s| s.topic() == topic)
            .ok_or_else(|| PoolingError::protocol(format!("missing source for topic {}", topic)))?;

        let sinks = endpoints.add_topic_sinks(endpoint_props);
        if sinks.is_empty() {
            return Err(PoolingError::protocol(format!("no sinks for pooling topic {}", topic)));
        }
        let sink = sinks
            .into_iter()
            .find(|s| s.topic() == topic)
            .ok_or_else(|| PoolingError::protocol(format!("missing sink for topic {}", topic)))?;

        Ok(Self {
            topic: topic.to_string(),
            source,
            sink,
            publisher: Mutex::new(PublisherState::default()),
            drained: Condvar::new(),
            consumer: Mutex::new(None),
        })
    }

    pub fn topic(&self) -> &str {
        &self.topic
    }

    pub fn start_publisher(&self) -> PoolingResult<()> {
        let mut publisher = self.publisher.lock();
        if publisher.running {
            return Ok(());
        }
        if !self.sink.start() {
            return Err(PoolingError::publish(&self.topic, "sink did not start"));
        }
        publisher.running = true;
        info!(topic = %self.topic, "Pooling publisher started");
        Ok(())
    }

    /// Stops publishing after in-flight sends finish or `wait` elapses,
    /// whichever comes first.
    pub fn stop_publisher(&self, wait: Duration) {
        let mut publisher = self.publisher.lock();
        if !publisher.running {
            return;
        }
        publisher.running = false;

        let deadline = Instant::now() + wait;
        while publisher.in_flight > 0 {
            if self.drained.wait_until(&mut publisher, deadline).timed_out() {
                warn!(topic = %self.topic, in_flight = publisher.in_flight, "Stopping publisher with sends in flight");
                break;
            }
        }
        drop(publisher);

        // the sink stays up: controllers may share it
        info!(topic = %self.topic, "Pooling publisher stopped");
    }

    pub fn is_publishing(&self) -> bool {
        self.publisher.lock().running
    }

    pub fn start_consumer(&self, listener: Arc<dyn TopicListener>) -> PoolingResult<()> {
        let mut consumer = self.consumer.lock();
        if consumer.is_some() {
            return Ok(());
        }
        self.source.register(Arc::clone(&listener));
        if !self.source.start() {
            self.source.unregister(&listener);
            return Err(PoolingError::protocol(format!(
                "source for topic {} did not start",
                self.topic
            )));
        }
        *consumer = Some(listener);
        info!(topic = %self.topic, "Pooling consumer started");
        Ok(())
    }

    pub fn stop_consumer(&self) {
        if let Some(listener) = self.consumer.lock().take() {
            self.source.unregister(&listener);
            info!(topic = %self.topic, "Pooling consumer stopped");
        }
    }

    pub fn is_consuming(&self) -> bool {
        self.consumer.lock().is_some()
    }

    /// Sends one message on the pooling topic.
    pub fn publish(&self, message: &str) -> PoolingResult<()> {
        {
            let mut publisher = self.publisher.lock();
            if !publisher.running {
                return Err(PoolingError::publish(&self.topic, "publisher is not running"));
            }
            publisher.in_flight += 1;
        }

        let sent = self.sink.send(message);

        {
            let mut publisher = self.publisher.lock();
            publisher.in_flight -= 1;
            if publisher.in_flight == 0 {
                self.drained.notify_all();
            }
        }

        if sent {
            debug!(topic = %self.topic, "Pooling message published");
            Ok(())
        } else {
            Err(PoolingError::publish(&self.topic, "sink refused the message"))
        }
    }
}

impl std::fmt::Debug for DmaapManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DmaapManager")
            .field("topic", &self.topic)
            .field("publishing", &self.is_publishing())
            .field("consuming", &self.is_consuming())
            .finish()
    }
}
