//! In-process topic transport.
//!
//! A [`MemoryBroker`] is the shared medium; each host gets its own
//! [`MemoryTopicEndpoints`] connected to the broker, so several hosts in one
//! process behave like separate processes on a real bus. Every started source
//! runs a dispatcher thread, so listeners never run on the publisher's thread.

use dashmap::DashMap;
use flume::Sender;
use parking_lot::{Mutex, RwLock};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use tracing::{debug, trace, warn};

use super::{
    same_listener, CommInfrastructure, TopicEndpoint, TopicEndpointProvider, TopicListener,
    TopicSink, TopicSource,
};
use crate::properties::Properties;

/// Shared publish/subscribe medium.
#[derive(Default)]
pub struct MemoryBroker {
    subscribers: DashMap<String, Vec<Weak<MemorySource>>>,
    published: AtomicU64,
}

impl MemoryBroker {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    fn subscribe(&self, source: &Arc<MemorySource>) {
        let mut subs = self.subscribers.entry(source.topic.clone()).or_default();
        subs.retain(|w| w.strong_count() > 0);
        subs.push(Arc::downgrade(source));
    }

    /// Delivers `message` to every started source of `topic`.
    pub fn publish(&self, topic: &str, message: &str) -> usize {
        self.published.fetch_add(1, Ordering::Relaxed);
        let targets: Vec<Arc<MemorySource>> = match self.subscribers.get(topic) {
            Some(subs) => subs.iter().filter_map(Weak::upgrade).collect(),
            None => Vec::new(),
        };

        targets
            .iter()
            .filter(|source| source.enqueue(message))
            .count()
    }

    /// Total messages published through this broker.
    pub fn published(&self) -> u64 {
        self.published.load(Ordering::Relaxed)
    }
}

/// Inbound endpoint backed by a broker subscription.
pub struct MemorySource {
    topic: String,
    infra: CommInfrastructure,
    listeners: Arc<RwLock<Vec<Arc<dyn TopicListener>>>>,
    dispatcher: Mutex<Option<Sender<String>>>,
}

impl MemorySource {
    fn new(topic: String, infra: CommInfrastructure) -> Self {
        Self {
            topic,
            infra,
            listeners: Arc::new(RwLock::new(Vec::new())),
            dispatcher: Mutex::new(None),
        }
    }

    fn enqueue(&self, message: &str) -> bool {
        match self.dispatcher.lock().as_ref() {
            Some(tx) => tx.send(message.to_string()).is_ok(),
            None => false,
        }
    }

    /// Delivers an event as if it had arrived from the bus.
    pub fn inject(&self, message: &str) -> bool {
        self.enqueue(message)
    }

    pub fn listener_count(&self) -> usize {
        self.listeners.read().len()
    }
}

impl TopicEndpoint for MemorySource {
    fn topic(&self) -> &str {
        &self.topic
    }

    fn infrastructure(&self) -> CommInfrastructure {
        self.infra
    }

    fn start(&self) -> bool {
        let mut dispatcher = self.dispatcher.lock();
        if dispatcher.is_some() {
            return true;
        }

        let (tx, rx) = flume::unbounded::<String>();
        let listeners = Arc::clone(&self.listeners);
        let topic = self.topic.clone();
        let infra = self.infra;
        let spawned = std::thread::Builder::new()
            .name(format!("source-{}", topic))
            .spawn(move || {
                while let Ok(event) = rx.recv() {
                    let snapshot: Vec<_> = listeners.read().clone();
                    trace!(topic = %topic, listeners = snapshot.len(), "Dispatching event");
                    for listener in snapshot {
                        listener.on_topic_event(infra, &topic, &event);
                    }
                }
                debug!(topic = %topic, "Source dispatcher exited");
            });

        match spawned {
            Ok(_) => {
                *dispatcher = Some(tx);
                true
            }
            Err(e) => {
                warn!(topic = %self.topic, error = %e, "Cannot start source dispatcher");
                false
            }
        }
    }

    fn stop(&self) -> bool {
        // dropping the sender ends the dispatcher once queued events drain
        self.dispatcher.lock().take();
        true
    }

    fn is_alive(&self) -> bool {
        self.dispatcher.lock().is_some()
    }
}

impl TopicSource for MemorySource {
    fn register(&self, listener: Arc<dyn TopicListener>) {
        let mut listeners = self.listeners.write();
        if !listeners.iter().any(|l| same_listener(l, &listener)) {
            listeners.push(listener);
        }
    }

    fn unregister(&self, listener: &Arc<dyn TopicListener>) {
        self.listeners.write().retain(|l| !same_listener(l, listener));
    }
}

/// Outbound endpoint publishing into a broker.
pub struct MemorySink {
    topic: String,
    infra: CommInfrastructure,
    broker: Arc<MemoryBroker>,
    alive: AtomicBool,
    sent: AtomicU64,
}

impl MemorySink {
    pub fn sent(&self) -> u64 {
        self.sent.load(Ordering::Relaxed)
    }
}

impl TopicEndpoint for MemorySink {
    fn topic(&self) -> &str {
        &self.topic
    }

    fn infrastructure(&self) -> CommInfrastructure {
        self.infra
    }

    fn start(&self) -> bool {
        self.alive.store(true, Ordering::SeqCst);
        true
    }

    fn stop(&self) -> bool {
        self.alive.store(false, Ordering::SeqCst);
        true
    }

    fn is_alive(&self) -> bool {
        self.alive.load(Ordering::SeqCst)
    }
}

impl TopicSink for MemorySink {
    fn send(&self, message: &str) -> bool {
        if !self.is_alive() {
            debug!(topic = %self.topic, "Send on stopped sink refused");
            return false;
        }
        self.sent.fetch_add(1, Ordering::Relaxed);
        self.broker.publish(&self.topic, message);
        true
    }
}

/// Per-host endpoint provider over a shared broker.
pub struct MemoryTopicEndpoints {
    broker: Arc<MemoryBroker>,
    sources: DashMap<String, Arc<MemorySource>>,
    sinks: DashMap<String, Arc<MemorySink>>,
}

impl MemoryTopicEndpoints {
    pub fn new(broker: Arc<MemoryBroker>) -> Self {
        Self {
            broker,
            sources: DashMap::new(),
            sinks: DashMap::new(),
        }
    }

    pub fn broker(&self) -> &Arc<MemoryBroker> {
        &self.broker
    }

    /// Concrete source lookup, for injecting events in tests and tools.
    pub fn memory_source(&self, topic: &str) -> Option<Arc<MemorySource>> {
        self.sources.get(topic).map(|s| Arc::clone(&s))
    }

    pub fn memory_sink(&self, topic: &str) -> Option<Arc<MemorySink>> {
        self.sinks.get(topic).map(|s| Arc::clone(&s))
    }

    fn source_for(&self, topic: &str, infra: CommInfrastructure) -> Arc<MemorySource> {
        if let Some(existing) = self.sources.get(topic) {
            return Arc::clone(&existing);
        }
        let source = Arc::new(MemorySource::new(topic.to_string(), infra));
        self.broker.subscribe(&source);
        self.sources
            .entry(topic.to_string())
            .or_insert(source)
            .clone()
    }

    fn sink_for(&self, topic: &str, infra: CommInfrastructure) -> Arc<MemorySink> {
        self.sinks
            .entry(topic.to_string())
            .or_insert_with(|| {
                Arc::new(MemorySink {
                    topic: topic.to_string(),
                    infra,
                    broker: Arc::clone(&self.broker),
                    alive: AtomicBool::new(false),
                    sent: AtomicU64::new(0),
                })
            })
            .clone()
    }
}

impl TopicEndpointProvider for MemoryTopicEndpoints {
    fn add_topic_sources(&self, props: &Properties) -> Vec<Arc<dyn TopicSource>> {
        let mut out: Vec<Arc<dyn TopicSource>> = Vec::new();
        for infra in CommInfrastructure::ALL {
            for topic in props.get_list(&infra.source_topics_key()) {
                out.push(self.source_for(&topic, infra));
            }
        }
        out
    }

    fn add_topic_sinks(&self, props: &Properties) -> Vec<Arc<dyn TopicSink>> {
        let mut out: Vec<Arc<dyn TopicSink>> = Vec::new();
        for infra in CommInfrastructure::ALL {
            for topic in props.get_list(&infra.sink_topics_key()) {
                out.push(self.sink_for(&topic, infra));
            }
        }
        out
    }

    fn get_topic_source(&self, topic: &str) -> Option<Arc<dyn TopicSource>> {
        self.sources
            .get(topic)
            .map(|s| Arc::clone(&s) as Arc<dyn TopicSource>)
    }

    fn get_topic_sink(&self, topic: &str) -> Option<Arc<dyn TopicSink>> {
        self.sinks
            .get(topic)
            .map(|s| Arc::clone(&s) as Arc<dyn TopicSink>)
    }
}
