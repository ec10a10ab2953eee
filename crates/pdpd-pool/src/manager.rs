//! Per-controller pooling manager.
//!
//! Drives one host's membership in a pool through the states
//!
//! ```text
//! Idle ──start──▶ Start ──own heartbeat──▶ Query ──round ends──▶ Active
//!                   │                        ▲                    │
//!                   └──timeout──▶ Inactive ──┘◀──no buckets───────┘
//! ```
//!
//! and routes inbound events to the host owning their bucket. State changes
//! from scheduled timers and from inbound messages are serialized by one
//! mutex; every timer carries the generation it was armed in and does nothing
//! once the manager has moved on.

use arc_swap::ArcSwapOption;
use parking_lot::Mutex;
use pdpd_controller::PolicyController;
use pdpd_core::scheduler::{ScheduledTask, Scheduler};
use pdpd_core::topic::{CommInfrastructure, TopicEndpointProvider, TopicListener};
use pdpd_core::types::now_millis;
use serde_json::Value;
use std::collections::BTreeSet;
use std::fmt;
use std::ops::Bound;
use std::sync::{Arc, Weak};
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::assignments::{BucketAssignments, DEFAULT_BUCKETS};
use crate::config::PoolingProperties;
use crate::dmaap::DmaapManager;
use crate::error::{PoolingError, PoolingResult};
use crate::event_queue::EventQueue;
use crate::message::{
    Forward, Heartbeat, Identification, Leader, Message, Offline, Query, Serializer, ADMIN,
    MAX_HOPS,
};
use crate::metrics::{PoolingMetrics, PoolingStats};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PoolState {
    /// Not distributing
    Idle,
    /// Waiting for the echo of our own heartbeat
    Start,
    /// Collecting identifications from peers
    Query,
    /// Owning buckets
    Active,
    /// Running without buckets, waiting to rejoin
    Inactive,
}

impl fmt::Display for PoolState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            PoolState::Idle => "Idle",
            PoolState::Start => "Start",
            PoolState::Query => "Query",
            PoolState::Active => "Active",
            PoolState::Inactive => "Inactive",
        };
        f.write_str(name)
    }
}

type TimerAction = fn(&PoolingManager, &mut Inner);

struct Inner {
    state: PoolState,
    generation: u64,
    timers: Vec<ScheduledTask>,
    queue: EventQueue,
    /// Timestamp of the heartbeat sent on entering Start
    start_timestamp: Option<i64>,
    /// Hosts heard from during the current query round, ourselves included
    alive: BTreeSet<String>,
    /// Assignments offered by a peer during the query round
    candidate: Option<BucketAssignments>,
    successor_seen: bool,
    /// Queued forwards to process once the lock is released
    replay: Vec<Forward>,
}

/// Hands pooling-topic messages to the manager without keeping it alive.
struct PoolListener {
    manager: Weak<PoolingManager>,
}

impl TopicListener for PoolListener {
    fn on_topic_event(&self, _infra: CommInfrastructure, _topic: &str, event: &str) {
        if let Some(manager) = self.manager.upgrade() {
            manager.on_message(event);
        }
    }
}

pub struct PoolingManager {
    host: String,
    controller_name: String,
    controller: Weak<PolicyController>,
    props: PoolingProperties,
    dmaap: DmaapManager,
    scheduler: Scheduler,
    serializer: Serializer,
    assignments: ArcSwapOption<BucketAssignments>,
    inner: Mutex<Inner>,
    metrics: PoolingMetrics,
    listener: Arc<dyn TopicListener>,
    weak_self: Weak<PoolingManager>,
}

impl PoolingManager {
    /// Builds an idle manager for `controller`. Fails with a protocol fault
    /// when the pooling topic has no source or sink.
    pub fn new(
        host: &str,
        controller: &Arc<PolicyController>,
        props: PoolingProperties,
        endpoints: &dyn TopicEndpointProvider,
    ) -> PoolingResult<Arc<Self>> {
        if host.trim().is_empty() {
            return Err(PoolingError::protocol("host id must not be blank"));
        }
        if props.topic.trim().is_empty() {
            return Err(PoolingError::protocol(format!(
                "no pooling topic for controller {}",
                controller.name()
            )));
        }

        let dmaap = DmaapManager::new(&props.topic, &props.endpoint_properties(), endpoints)?;
        let scheduler = Scheduler::new(format!("pool-{}", controller.name()))?;
        let queue = EventQueue::new(props.offline_queue_limit, props.offline_queue_age);

        Ok(Arc::new_cyclic(|weak: &Weak<PoolingManager>| Self {
            host: host.to_string(),
            controller_name: controller.name().to_string(),
            controller: Arc::downgrade(controller),
            metrics: PoolingMetrics::new(controller.name()),
            props,
            dmaap,
            scheduler,
            serializer: Serializer,
            assignments: ArcSwapOption::empty(),
            inner: Mutex::new(Inner {
                state: PoolState::Idle,
                generation: 0,
                timers: Vec::new(),
                queue,
                start_timestamp: None,
                alive: BTreeSet::new(),
                candidate: None,
                successor_seen: false,
                replay: Vec::new(),
            }),
            listener: Arc::new(PoolListener {
                manager: weak.clone(),
            }),
            weak_self: weak.clone(),
        }))
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn controller_name(&self) -> &str {
        &self.controller_name
    }

    pub fn topic(&self) -> &str {
        self.dmaap.topic()
    }

    pub fn properties(&self) -> &PoolingProperties {
        &self.props
    }

    pub fn state(&self) -> PoolState {
        self.inner.lock().state
    }

    /// Current published assignments.
    pub fn assignments(&self) -> Option<Arc<BucketAssignments>> {
        self.assignments.load_full()
    }

    pub fn stats(&self) -> PoolingStats {
        self.metrics.snapshot()
    }

    /// Forwards waiting for assignments.
    pub fn queued_events(&self) -> usize {
        self.inner.lock().queue.size()
    }

    // controller hooks

    /// Connects to the pooling topic.
    pub fn before_start(&self) {
        if let Err(e) = self.dmaap.start_publisher() {
            warn!(controller = %self.controller_name, error = %e, "Cannot start pooling publisher");
        }
        if let Err(e) = self.dmaap.start_consumer(Arc::clone(&self.listener)) {
            warn!(controller = %self.controller_name, error = %e, "Cannot start pooling consumer");
        }
    }

    /// Begins distributing once the controller runs.
    pub fn after_start(&self) {
        let mut inner = self.inner.lock();
        if inner.state == PoolState::Idle {
            self.go_start(&mut inner);
        }
    }

    /// Announces departure and stops distributing.
    pub fn before_stop(&self) {
        let mut inner = self.inner.lock();
        self.leave(&mut inner);
    }

    /// Disconnects from the pooling topic, giving in-flight publishes a
    /// bounded time to finish.
    pub fn after_stop(&self) {
        self.dmaap.stop_consumer();
        self.dmaap.stop_publisher(self.props.offline_publish_wait);
    }

    /// Stops distributing while the controller is locked. The topic
    /// connections stay open.
    pub fn before_lock(&self) {
        let mut inner = self.inner.lock();
        self.leave(&mut inner);
    }

    /// Rejoins the pool if the controller is still running.
    pub fn after_unlock(&self, controller: &PolicyController) {
        let mut inner = self.inner.lock();
        if controller.is_alive() {
            if inner.state == PoolState::Idle {
                self.go_start(&mut inner);
            }
        } else {
            self.go_idle(&mut inner);
        }
    }

    /// Routes a decoded event. Returns true when the event was forwarded to
    /// another host and must not be processed here.
    pub fn before_insert(
        &self,
        controller: &PolicyController,
        topic: &str,
        event: &str,
        fact: &Value,
    ) -> bool {
        let Some(request_id) = extract_request_id(fact, &self.props.request_id_path) else {
            debug!(controller = %self.controller_name, topic, "Event has no request id, processing locally");
            self.metrics.record_local();
            return false;
        };

        // only members taking part in the pool route; Inactive passes through
        if !matches!(self.state(), PoolState::Active | PoolState::Query) {
            self.metrics.record_local();
            return false;
        }

        let Some(assignments) = self.assignments.load_full() else {
            self.metrics.record_local();
            return false;
        };

        match assignments.assigned_host(&request_id) {
            Some(owner) if owner != self.host => {
                let forward = Forward {
                    source: self.host.clone(),
                    channel: owner.to_string(),
                    protocol: infrastructure_of(controller, topic),
                    topic: topic.to_string(),
                    payload: event.to_string(),
                    request_id: request_id.clone(),
                    create_time_ms: now_millis(),
                    num_hops: 0,
                };
                match self.publish(&Message::Forward(forward)) {
                    Ok(()) => {
                        debug!(controller = %self.controller_name, request_id = %request_id, owner, "Event forwarded");
                        self.metrics.record_forwarded();
                        true
                    }
                    Err(e) => {
                        warn!(controller = %self.controller_name, error = %e, "Forward failed, processing locally");
                        self.metrics.record_local();
                        false
                    }
                }
            }
            _ => {
                self.metrics.record_local();
                false
            }
        }
    }

    /// Leaves the pool and releases the topic and the scheduler.
    pub fn shutdown(&self) {
        {
            let mut inner = self.inner.lock();
            self.leave(&mut inner);
        }
        self.dmaap.stop_consumer();
        self.dmaap.stop_publisher(Duration::ZERO);
        self.scheduler.shutdown();
    }

    // inbound messages

    fn on_message(&self, text: &str) {
        let message = match self.serializer.decode(text) {
            Ok(message) => message,
            Err(e) => {
                warn!(controller = %self.controller_name, error = %e, "Discarding pooling message");
                return;
            }
        };

        let channel = message.channel();
        if channel != ADMIN && channel != self.host {
            return;
        }

        if let Message::Forward(forward) = message {
            self.handle_forward(forward);
            return;
        }

        let replay = {
            let mut inner = self.inner.lock();
            match message {
                Message::Heartbeat(heartbeat) => self.on_heartbeat(&mut inner, heartbeat),
                Message::Offline(offline) => self.on_offline(&mut inner, offline),
                Message::Query(query) => self.on_query(&mut inner, query),
                Message::Identification(ident) => self.on_identification(&mut inner, ident),
                Message::Leader(leader) => self.on_leader(&mut inner, leader),
                Message::Forward(_) => {}
            }
            std::mem::take(&mut inner.replay)
        };

        for forward in replay {
            self.handle_forward(forward);
        }
    }

    fn on_heartbeat(&self, inner: &mut Inner, heartbeat: Heartbeat) {
        match inner.state {
            PoolState::Start => {
                if heartbeat.source == self.host
                    && inner.start_timestamp == Some(heartbeat.timestamp_ms)
                {
                    self.go_query(inner);
                }
            }
            PoolState::Active => {
                if heartbeat.source != self.host {
                    inner.successor_seen = true;
                }
            }
            _ => {}
        }
    }

    fn on_query(&self, inner: &mut Inner, query: Query) {
        if query.source == self.host {
            return;
        }
        match inner.state {
            PoolState::Idle | PoolState::Start => {}
            PoolState::Query => {
                inner.alive.insert(query.source);
                self.identify();
            }
            PoolState::Active | PoolState::Inactive => {
                self.identify();
                self.go_query(inner);
                inner.alive.insert(query.source);
            }
        }
    }

    fn on_identification(&self, inner: &mut Inner, ident: Identification) {
        if ident.source == self.host || inner.state != PoolState::Query {
            return;
        }
        inner.alive.insert(ident.source);
        if inner.candidate.is_none() {
            inner.candidate = ident.assignments;
        }
    }

    fn on_leader(&self, inner: &mut Inner, leader: Leader) {
        if leader.source == self.host {
            return;
        }
        match inner.state {
            PoolState::Idle | PoolState::Start => {
                debug!(controller = %self.controller_name, leader = %leader.source, "Ignoring assignments before query");
            }
            // the round's own timeout settles the state
            PoolState::Query => self.adopt(inner, leader.assignments),
            PoolState::Active | PoolState::Inactive => {
                self.adopt(inner, leader.assignments);
                self.settle(inner);
            }
        }
    }

    fn on_offline(&self, inner: &mut Inner, offline: Offline) {
        if offline.source == self.host {
            return;
        }
        if matches!(inner.state, PoolState::Idle | PoolState::Start) {
            return;
        }
        inner.alive.remove(&offline.source);

        let Some(current) = self.assignments.load_full() else {
            return;
        };
        if !current.has_assignment(&offline.source) {
            return;
        }

        info!(controller = %self.controller_name, host = %offline.source, "Pool member went offline");
        let reduced = current.without_host(&offline.source);
        if reduced.is_leader(&self.host) {
            let next = reduced.rebalance(&reduced.all_hosts(), DEFAULT_BUCKETS);
            self.broadcast_assignments(&next);
            self.adopt(inner, next);
        } else {
            // unassigned buckets are processed wherever they arrive until the
            // leader publishes
            self.adopt(inner, reduced);
        }
        if inner.state != PoolState::Query {
            self.settle(inner);
        }
    }

    /// Handles an event relayed by a peer: queue it, process it here, or relay
    /// it again if its bucket has moved.
    fn handle_forward(&self, forward: Forward) {
        let assignments = {
            let mut inner = self.inner.lock();
            if inner.state == PoolState::Idle {
                debug!(controller = %self.controller_name, request_id = %forward.request_id, "Dropping forward while idle");
                self.metrics.record_dropped();
                return;
            }
            match self.assignments.load_full() {
                Some(assignments) => assignments,
                None => {
                    if inner.queue.add(forward).is_some() {
                        self.metrics.record_dropped();
                    }
                    self.metrics.record_queued();
                    return;
                }
            }
        };

        match assignments.assigned_host(&forward.request_id) {
            Some(owner) if owner != self.host => {
                if forward.num_hops >= MAX_HOPS {
                    warn!(controller = %self.controller_name, request_id = %forward.request_id, hops = forward.num_hops, "Dropping forward after too many hops");
                    self.metrics.record_dropped();
                    return;
                }
                let relay = forward.relay(&self.host, owner);
                match self.publish(&Message::Forward(relay)) {
                    Ok(()) => self.metrics.record_forwarded(),
                    Err(e) => {
                        warn!(controller = %self.controller_name, error = %e, "Relay failed, processing locally");
                        self.deliver_local(&forward);
                    }
                }
            }
            _ => self.deliver_local(&forward),
        }
    }

    fn deliver_local(&self, forward: &Forward) {
        let delivered = self
            .controller
            .upgrade()
            .is_some_and(|controller| controller.deliver(&forward.topic, &forward.payload));
        if delivered {
            self.metrics.record_local();
        } else {
            debug!(controller = %self.controller_name, request_id = %forward.request_id, "Forwarded event not accepted");
            self.metrics.record_dropped();
        }
    }

    // state transitions

    fn transition(&self, inner: &mut Inner, next: PoolState) {
        for timer in inner.timers.drain(..) {
            timer.cancel();
        }
        inner.generation += 1;
        inner.start_timestamp = None;
        inner.alive.clear();
        inner.candidate = None;
        inner.successor_seen = false;

        if inner.state != next {
            info!(controller = %self.controller_name, host = %self.host, from = %inner.state, to = %next, "Pooling state changed");
        }
        inner.state = next;
    }

    fn go_idle(&self, inner: &mut Inner) {
        self.transition(inner, PoolState::Idle);
        self.assignments.store(None);
        inner.queue.clear();
    }

    fn go_start(&self, inner: &mut Inner) {
        self.transition(inner, PoolState::Start);

        let timestamp = now_millis();
        inner.start_timestamp = Some(timestamp);
        self.publish_quietly(&Message::Heartbeat(Heartbeat {
            source: self.host.clone(),
            channel: self.host.clone(),
            timestamp_ms: timestamp,
        }));

        self.arm(inner, self.props.start_heartbeat, |manager, inner| {
            warn!(controller = %manager.controller_name, "Own heartbeat never arrived");
            manager.go_inactive(inner);
        });
    }

    fn go_query(&self, inner: &mut Inner) {
        self.transition(inner, PoolState::Query);
        inner.alive.insert(self.host.clone());

        self.publish_quietly(&Message::Query(Query {
            source: self.host.clone(),
            channel: ADMIN.to_string(),
        }));

        self.arm(inner, self.props.identification, PoolingManager::end_query);
    }

    fn go_active(&self, inner: &mut Inner) {
        self.transition(inner, PoolState::Active);
        let inter = self.props.inter_heartbeat;
        let active = self.props.active_heartbeat;
        self.arm_periodic(inner, inter, PoolingManager::ring_heartbeat);
        self.arm_periodic(inner, active, PoolingManager::check_successor);
    }

    fn go_inactive(&self, inner: &mut Inner) {
        self.transition(inner, PoolState::Inactive);
        self.arm(inner, self.props.reactivate, |manager, inner| {
            let running = manager
                .controller
                .upgrade()
                .is_some_and(|c| c.is_alive() && !c.is_locked());
            if running {
                manager.go_start(inner);
            } else {
                manager.go_idle(inner);
            }
        });
    }

    /// Publishes `Offline` if the host was taking part, then goes idle.
    fn leave(&self, inner: &mut Inner) {
        if inner.state != PoolState::Idle {
            self.publish_quietly(&Message::Offline(Offline {
                source: self.host.clone(),
                channel: ADMIN.to_string(),
            }));
        }
        self.go_idle(inner);
    }

    /// End of a query round. The smallest live host rebalances and publishes;
    /// everyone else keeps what it has until the leader's broadcast arrives.
    fn end_query(&self, inner: &mut Inner) {
        let leader = inner.alive.iter().next().cloned();
        if leader.as_deref() == Some(self.host.as_str()) {
            let base = self
                .assignments
                .load_full()
                .map(|current| (*current).clone())
                .or_else(|| inner.candidate.take())
                .unwrap_or_default();
            let hosts = std::mem::take(&mut inner.alive);
            let next = base.rebalance(&hosts, DEFAULT_BUCKETS);
            info!(controller = %self.controller_name, hosts = hosts.len(), buckets = next.len(), "Publishing bucket assignments");
            self.broadcast_assignments(&next);
            self.adopt(inner, next);
        }
        self.settle(inner);
    }

    fn ring_heartbeat(&self, _inner: &mut Inner) {
        let Some(assignments) = self.assignments.load_full() else {
            return;
        };
        if let Some(predecessor) = predecessor(&assignments.all_hosts(), &self.host) {
            self.publish_quietly(&Message::Heartbeat(Heartbeat {
                source: self.host.clone(),
                channel: predecessor,
                timestamp_ms: now_millis(),
            }));
        }
        if assignments.is_leader(&self.host) {
            self.broadcast_assignments(&assignments);
        }
    }

    fn check_successor(&self, inner: &mut Inner) {
        let members = self
            .assignments
            .load_full()
            .map_or(0, |a| a.all_hosts().len());
        if members > 1 && !inner.successor_seen {
            warn!(controller = %self.controller_name, "Missed heartbeat from ring successor");
            self.go_query(inner);
            return;
        }
        inner.successor_seen = false;
    }

    /// Swaps in new assignments and schedules queued forwards for replay.
    fn adopt(&self, inner: &mut Inner, next: BucketAssignments) {
        let changed = self.assignments.load_full().as_deref() != Some(&next);
        if changed {
            info!(
                controller = %self.controller_name,
                host = %self.host,
                owned = next.bucket_count(&self.host),
                buckets = next.len(),
                "Bucket assignments updated"
            );
            self.assignments.store(Some(Arc::new(next)));
        }
        let queued = inner.queue.drain();
        inner.replay.extend(queued);
    }

    /// Active when this host owns a bucket, Inactive otherwise.
    fn settle(&self, inner: &mut Inner) {
        let owns = self
            .assignments
            .load_full()
            .is_some_and(|a| a.has_assignment(&self.host));
        match (owns, inner.state) {
            (true, PoolState::Active) | (false, PoolState::Inactive) => {}
            (true, _) => self.go_active(inner),
            (false, _) => self.go_inactive(inner),
        }
    }

    // timers

    fn arm(&self, inner: &mut Inner, delay: Duration, action: TimerAction) {
        let generation = inner.generation;
        let weak = self.weak_self.clone();
        let task = self.scheduler.schedule(delay, move || {
            if let Some(manager) = weak.upgrade() {
                manager.fire(generation, action);
            }
        });
        inner.timers.push(task);
    }

    fn arm_periodic(&self, inner: &mut Inner, period: Duration, action: TimerAction) {
        let generation = inner.generation;
        let weak = self.weak_self.clone();
        let task = self.scheduler.schedule_at_fixed_rate(period, period, move || {
            if let Some(manager) = weak.upgrade() {
                manager.fire(generation, action);
            }
        });
        inner.timers.push(task);
    }

    fn fire(&self, generation: u64, action: TimerAction) {
        let replay = {
            let mut inner = self.inner.lock();
            if inner.generation != generation {
                return;
            }
            action(self, &mut inner);
            std::mem::take(&mut inner.replay)
        };
        for forward in replay {
            self.handle_forward(forward);
        }
    }

    // publishing

    fn publish(&self, message: &Message) -> PoolingResult<()> {
        let text = self
            .serializer
            .encode(message)
            .map_err(|e| PoolingError::publish(self.dmaap.topic(), e.to_string()))?;
        self.dmaap.publish(&text)
    }

    fn publish_quietly(&self, message: &Message) {
        if let Err(e) = self.publish(message) {
            warn!(controller = %self.controller_name, kind = message.kind(), error = %e, "Pooling publish failed");
        }
    }

    fn identify(&self) {
        self.publish_quietly(&Message::Identification(Identification {
            source: self.host.clone(),
            channel: ADMIN.to_string(),
            assignments: self.assignments.load_full().map(|a| (*a).clone()),
        }));
    }

    fn broadcast_assignments(&self, assignments: &BucketAssignments) {
        self.publish_quietly(&Message::Leader(Leader {
            source: self.host.clone(),
            channel: ADMIN.to_string(),
            assignments: assignments.clone(),
        }));
    }
}

impl Drop for PoolingManager {
    fn drop(&mut self) {
        self.dmaap.stop_consumer();
    }
}

impl fmt::Debug for PoolingManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PoolingManager")
            .field("host", &self.host)
            .field("controller", &self.controller_name)
            .field("topic", &self.dmaap.topic())
            .field("state", &self.state())
            .finish()
    }
}

/// Follows a dotted path through nested objects. Strings and numbers are
/// accepted as ids; blank strings are not.
pub fn extract_request_id(fact: &Value, path: &str) -> Option<String> {
    let mut node = fact;
    for segment in path.split('.') {
        node = node.get(segment)?;
    }
    match node {
        Value::String(s) if !s.trim().is_empty() => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

/// The host before `host` in the sorted ring, wrapping around. `None` when
/// `host` is not a member or is alone.
fn predecessor(hosts: &BTreeSet<String>, host: &str) -> Option<String> {
    if hosts.len() < 2 || !hosts.contains(host) {
        return None;
    }
    hosts
        .range::<str, _>((Bound::Unbounded, Bound::Excluded(host)))
        .next_back()
        .or_else(|| hosts.iter().next_back())
        .cloned()
}

fn infrastructure_of(controller: &PolicyController, topic: &str) -> CommInfrastructure {
    controller
        .topic_sources()
        .iter()
        .find(|source| source.topic() == topic)
        .map_or(CommInfrastructure::Noop, |source| source.infrastructure())
}
