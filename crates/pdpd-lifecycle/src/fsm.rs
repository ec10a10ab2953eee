//! PDP lifecycle state machine.
//!
//! The [`LifecycleFsm`] owns the PDP state, the active policy set and the
//! policy-type registry. PAP requests arrive on the PAP topic source; status
//! heartbeats leave on the PAP topic sink, periodically and after every
//! request. All state lives behind one mutex, so requests from the topic
//! dispatcher and tasks on the FSM scheduler never interleave.
//!
//! Controller feature hooks report controller changes through
//! [`LifecycleFsm::controller_changed`], which defers the registry refresh to
//! the scheduler so that a hook fired while the FSM itself is reconciling does
//! not re-enter the lock.

use parking_lot::Mutex;
use pdpd_controller::{PolicyController, PolicyControllerFactory};
use pdpd_core::config::PdpConfig;
use pdpd_core::error::TopicError;
use pdpd_core::policy::{
    ToscaConceptIdentifier, ToscaPolicy, NATIVE_ARTIFACT_TYPE, NATIVE_CONTROLLER_TYPE,
};
use pdpd_core::scheduler::{ScheduledTask, Scheduler};
use pdpd_core::topic::{
    CommInfrastructure, TopicEndpointProvider, TopicListener, TopicSink, TopicSource,
};
use pdpd_core::types::{
    PdpMessage, PdpResponseDetails, PdpResponseStatus, PdpState, PdpStateChange, PdpStatus,
    PdpUpdate,
};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Arc, Weak};
use std::time::Duration;
use tracing::{debug, info, trace, warn};

use crate::error::{LifecycleError, LifecycleResult};
use crate::feature::LifecycleFeature;
use crate::handlers::{
    DroolsPolicyHandler, NativeArtifactHandler, NativeControllerHandler, PolicyTypeHandler,
};
use crate::reconcile::{self, PolicySet};
use crate::state::{self, Operation};

type TypeRegistry = BTreeMap<ToscaConceptIdentifier, Arc<dyn PolicyTypeHandler>>;

struct FsmInner {
    state: PdpState,
    group: Option<String>,
    subgroup: Option<String>,
    interval: Duration,
    status_task: Option<ScheduledTask>,
    source: Option<Arc<dyn TopicSource>>,
    sink: Option<Arc<dyn TopicSink>>,
    active: PolicySet,
    types: TypeRegistry,
}

/// Lifecycle state machine of one PDP.
pub struct LifecycleFsm {
    name: String,
    pdp_type: String,
    pap_topic: String,
    default_interval: Duration,
    factory: Arc<PolicyControllerFactory>,
    endpoints: Arc<dyn TopicEndpointProvider>,
    scheduler: Scheduler,
    native_controller: Arc<dyn PolicyTypeHandler>,
    native_artifact: Arc<dyn PolicyTypeHandler>,
    listener: Arc<dyn TopicListener>,
    self_ref: Weak<LifecycleFsm>,
    inner: Mutex<FsmInner>,
}

/// Feeds PAP topic events into the state machine.
struct PapListener {
    fsm: Weak<LifecycleFsm>,
}

impl TopicListener for PapListener {
    fn on_topic_event(&self, _infra: CommInfrastructure, _topic: &str, event: &str) {
        if let Some(fsm) = self.fsm.upgrade() {
            fsm.on_message(event);
        }
    }
}

impl LifecycleFsm {
    /// Creates a TERMINATED state machine and registers its controller hooks
    /// with the factory.
    pub fn new(
        config: &PdpConfig,
        factory: Arc<PolicyControllerFactory>,
        endpoints: Arc<dyn TopicEndpointProvider>,
    ) -> LifecycleResult<Arc<Self>> {
        config.validate()?;
        let scheduler = Scheduler::new("pdp-lifecycle")?;
        let name = config.resolve_name();

        let native_controller: Arc<dyn PolicyTypeHandler> =
            Arc::new(NativeControllerHandler::new(Arc::clone(&factory)));
        let native_artifact: Arc<dyn PolicyTypeHandler> =
            Arc::new(NativeArtifactHandler::new(Arc::clone(&factory)));

        let fsm = Arc::new_cyclic(|weak: &Weak<LifecycleFsm>| Self {
            name,
            pdp_type: config.pdp_type.clone(),
            pap_topic: config.pap_topic.clone(),
            default_interval: config.status_interval(),
            factory: Arc::clone(&factory),
            endpoints,
            scheduler,
            native_controller,
            native_artifact,
            listener: Arc::new(PapListener { fsm: weak.clone() }),
            self_ref: weak.clone(),
            inner: Mutex::new(FsmInner {
                state: PdpState::Terminated,
                group: config.group.clone(),
                subgroup: config.subgroup.clone(),
                interval: config.status_interval(),
                status_task: None,
                source: None,
                sink: None,
                active: PolicySet::new(),
                types: TypeRegistry::new(),
            }),
        });

        {
            let mut inner = fsm.inner.lock();
            fsm.sync_types(&mut inner);
        }
        factory
            .features()
            .register(Arc::new(LifecycleFeature::new(&fsm)));

        info!(pdp = %fsm.name, pdp_type = %fsm.pdp_type, "Lifecycle state machine created");
        Ok(fsm)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn pdp_type(&self) -> &str {
        &self.pdp_type
    }

    pub fn state(&self) -> PdpState {
        self.inner.lock().state
    }

    pub fn group(&self) -> Option<String> {
        self.inner.lock().group.clone()
    }

    pub fn subgroup(&self) -> Option<String> {
        self.inner.lock().subgroup.clone()
    }

    pub fn is_alive(&self) -> bool {
        state::is_alive(self.state())
    }

    /// Current status heartbeat period.
    pub fn heartbeat_interval(&self) -> Duration {
        self.inner.lock().interval
    }

    pub fn factory(&self) -> &Arc<PolicyControllerFactory> {
        &self.factory
    }

    /// Allocates the PAP topic endpoints, starts the status heartbeat and
    /// enters PASSIVE. Returns false when already running.
    pub fn start(&self) -> LifecycleResult<bool> {
        let mut inner = self.inner.lock();
        state::ensure_allowed(inner.state, Operation::Start)?;
        if state::is_alive(inner.state) {
            return Ok(false);
        }
        if self.scheduler.is_shutdown() {
            return Err(LifecycleError::Scheduler(format!(
                "{} is shut down",
                self.scheduler.name()
            )));
        }

        let source = self
            .endpoints
            .get_topic_source(&self.pap_topic)
            .ok_or_else(|| TopicError::UnknownTopic {
                topic: self.pap_topic.clone(),
            })?;
        let sink = self
            .endpoints
            .get_topic_sink(&self.pap_topic)
            .ok_or_else(|| TopicError::UnknownTopic {
                topic: self.pap_topic.clone(),
            })?;

        source.register(Arc::clone(&self.listener));
        if !source.start() {
            source.unregister(&self.listener);
            return Err(TopicError::NotStarted {
                topic: self.pap_topic.clone(),
            }
            .into());
        }
        if !sink.start() {
            source.unregister(&self.listener);
            source.stop();
            return Err(TopicError::NotStarted {
                topic: self.pap_topic.clone(),
            }
            .into());
        }

        inner.source = Some(source);
        inner.sink = Some(sink);
        inner.state = PdpState::Passive;
        self.schedule_status(&mut inner, Duration::ZERO);

        info!(pdp = %self.name, topic = %self.pap_topic, "PDP started in PASSIVE state");
        Ok(true)
    }

    /// Cancels the heartbeat, publishes a final TERMINATED status and
    /// releases the PAP topic endpoints.
    pub fn stop(&self) -> LifecycleResult<bool> {
        let mut inner = self.inner.lock();
        state::ensure_allowed(inner.state, Operation::Stop)?;
        if inner.state == PdpState::Terminated {
            return Ok(true);
        }

        if let Some(task) = inner.status_task.take() {
            task.cancel();
        }
        inner.state = PdpState::Terminated;
        self.publish_status(&inner, None);

        if let Some(source) = inner.source.take() {
            source.unregister(&self.listener);
            source.stop();
        }
        if let Some(sink) = inner.sink.take() {
            sink.stop();
        }

        info!(pdp = %self.name, "PDP stopped");
        Ok(true)
    }

    /// Stops the PDP and releases the scheduler. Safe to call repeatedly.
    pub fn shutdown(&self) {
        if let Err(e) = self.stop() {
            warn!(pdp = %self.name, error = %e, "Stop during shutdown failed");
        }
        self.scheduler.shutdown();
    }

    /// Publishes a status heartbeat now. Returns false when the message was
    /// not sent or the mandatory policy types are missing.
    pub fn status(&self) -> LifecycleResult<bool> {
        let inner = self.inner.lock();
        state::ensure_allowed(inner.state, Operation::Status)?;
        let sent = self.publish_status(&inner, None);
        Ok(sent && Self::compliant(&inner.types))
    }

    /// Applies a policy update. Returns true only if every requested deploy
    /// and undeploy succeeded; partial results are kept either way.
    pub fn update(&self, update: &PdpUpdate) -> LifecycleResult<bool> {
        let mut inner = self.inner.lock();
        state::ensure_allowed(inner.state, Operation::Update)?;

        if !update.applies_to(&self.name, inner.group.as_deref(), inner.subgroup.as_deref()) {
            debug!(pdp = %self.name, request = %update.request_id, "Update not addressed to this PDP");
            return Ok(false);
        }

        if let Some(group) = &update.pdp_group {
            inner.group = Some(group.clone());
        }
        if let Some(subgroup) = &update.pdp_subgroup {
            inner.subgroup = Some(subgroup.clone());
        }
        if let Some(ms) = update.pdp_heartbeat_interval_ms {
            let interval = if ms == 0 {
                self.default_interval
            } else {
                Duration::from_millis(ms)
            };
            if interval != inner.interval {
                info!(pdp = %self.name, interval_ms = interval.as_millis() as u64, "Status interval changed");
                inner.interval = interval;
                self.schedule_status(&mut inner, interval);
            }
        }

        let success = self.reconcile(
            &mut inner,
            &update.policies_to_be_deployed,
            &update.policies_to_be_undeployed,
        );

        let response = if success {
            PdpResponseDetails::new(&update.request_id, PdpResponseStatus::Success, None)
        } else {
            PdpResponseDetails::new(
                &update.request_id,
                PdpResponseStatus::Fail,
                Some("some policies could not be applied".to_string()),
            )
        };
        self.publish_status(&inner, Some(response));

        Ok(success)
    }

    /// Applies a state change request addressed to this PDP.
    pub fn state_change(&self, change: &PdpStateChange) -> LifecycleResult<bool> {
        let mut inner = self.inner.lock();
        state::ensure_allowed(inner.state, Operation::StateChange)?;

        if !change.applies_to(&self.name, inner.group.as_deref(), inner.subgroup.as_deref()) {
            debug!(pdp = %self.name, request = %change.request_id, "State change not addressed to this PDP");
            return Ok(false);
        }

        let from = inner.state;
        let to = change.state;
        if !state::can_transition(from, to) {
            return Err(LifecycleError::unsupported(format!("transition to {}", to), from));
        }

        if from != to {
            match to {
                PdpState::Terminated => {
                    drop(inner);
                    info!(pdp = %self.name, "PDP terminating on request");
                    self.shutdown();
                    return Ok(true);
                }
                PdpState::Active => {
                    inner.state = PdpState::Active;
                    self.start_controllers();
                }
                PdpState::Passive => {
                    inner.state = PdpState::Passive;
                    self.stop_controllers();
                }
                PdpState::Safe => {
                    return Err(LifecycleError::unsupported("transition to SAFE", from));
                }
            }
            info!(pdp = %self.name, from = %from, to = %to, "PDP state changed");
        }

        let response =
            PdpResponseDetails::new(&change.request_id, PdpResponseStatus::Success, None);
        self.publish_status(&inner, Some(response));
        Ok(true)
    }

    /// Every tracked policy, enabled or not.
    pub fn active_policies(&self) -> Vec<ToscaPolicy> {
        self.inner.lock().active.values().cloned().collect()
    }

    /// Tracked policies currently enacted.
    pub fn enabled_policies(&self) -> Vec<ToscaPolicy> {
        let inner = self.inner.lock();
        inner
            .active
            .values()
            .filter(|p| self.is_enabled(&inner, p))
            .cloned()
            .collect()
    }

    /// Tracked policies that have no handler or no brained controller to
    /// hold them right now.
    pub fn disabled_policies(&self) -> Vec<ToscaPolicy> {
        let inner = self.inner.lock();
        inner
            .active
            .values()
            .filter(|p| !self.is_enabled(&inner, p))
            .cloned()
            .collect()
    }

    /// Registered policy types.
    pub fn policy_types(&self) -> Vec<ToscaConceptIdentifier> {
        self.inner.lock().types.keys().cloned().collect()
    }

    pub fn is_mandatory_policy_types_compliant(&self) -> bool {
        Self::compliant(&self.inner.lock().types)
    }

    /// Schedules a registry refresh after a controller was created, rebound
    /// or destroyed.
    pub fn controller_changed(&self, controller: &str) {
        let weak = self.self_ref.clone();
        let name = controller.to_string();
        self.scheduler.execute(move || {
            if let Some(fsm) = weak.upgrade() {
                debug!(pdp = %fsm.name, controller = %name, "Refreshing policy types");
                let mut inner = fsm.inner.lock();
                fsm.sync_types(&mut inner);
            }
        });
    }

    fn on_message(&self, text: &str) {
        let message = match PdpMessage::decode(text) {
            Ok(m) => m,
            Err(e) => {
                warn!(pdp = %self.name, error = %e, "Dropping undecodable PAP message");
                return;
            }
        };

        let result = match &message {
            PdpMessage::Status(_) => {
                trace!(pdp = %self.name, "Ignoring status message");
                return;
            }
            PdpMessage::Update(update) => self.update(update),
            PdpMessage::StateChange(change) => self.state_change(change),
        };

        match result {
            Ok(accepted) => {
                debug!(pdp = %self.name, message = message.message_name(), accepted, "PAP message handled")
            }
            Err(e) => {
                warn!(pdp = %self.name, message = message.message_name(), error = %e, "PAP message rejected")
            }
        }
    }

    fn reconcile(
        &self,
        inner: &mut FsmInner,
        deploy: &[ToscaPolicy],
        undeploy: &[ToscaConceptIdentifier],
    ) -> bool {
        let plan = reconcile::plan(&inner.active, deploy, undeploy);
        if plan.is_empty() {
            debug!(pdp = %self.name, "Policies already up to date");
            return true;
        }

        info!(
            pdp = %self.name,
            undeploy = plan.undeploy.len(),
            deploy = plan.deploy.len(),
            "Reconciling policies"
        );

        let mut success = true;
        for policy in &plan.undeploy {
            let id = policy.identifier();
            if self.undeploy_policy(inner, policy) {
                if inner.active.get(&id) == Some(policy) {
                    inner.active.remove(&id);
                }
            } else {
                success = false;
            }
        }

        for policy in &plan.deploy {
            if self.deploy_policy(inner, policy) {
                inner.active.insert(policy.identifier(), policy.clone());
            } else {
                success = false;
            }
        }

        if inner.state == PdpState::Active {
            self.start_controllers();
        }
        success
    }

    fn deploy_policy(&self, inner: &mut FsmInner, policy: &ToscaPolicy) -> bool {
        let Some(handler) = inner.types.get(&policy.type_identifier()).cloned() else {
            warn!(
                pdp = %self.name,
                policy = %policy.identifier(),
                policy_type = %policy.type_identifier(),
                "No handler for policy type"
            );
            return false;
        };

        let deployed = handler.deploy(policy);
        if deployed {
            info!(pdp = %self.name, policy = %policy.identifier(), "Policy deployed");
        } else {
            warn!(pdp = %self.name, policy = %policy.identifier(), "Policy deploy failed");
        }

        if policy.is_native() {
            self.sync_types(inner);
        }
        deployed
    }

    fn undeploy_policy(&self, inner: &mut FsmInner, policy: &ToscaPolicy) -> bool {
        let Some(handler) = inner.types.get(&policy.type_identifier()).cloned() else {
            debug!(pdp = %self.name, policy = %policy.identifier(), "Undeploying disabled policy");
            return true;
        };

        let undeployed = handler.undeploy(policy);
        if undeployed {
            info!(pdp = %self.name, policy = %policy.identifier(), "Policy undeployed");
        } else {
            warn!(pdp = %self.name, policy = %policy.identifier(), "Policy undeploy failed");
        }

        if policy.is_native() {
            self.sync_types(inner);
        }
        undeployed
    }

    /// Rebuilds the type registry from the brained controllers and re-enacts
    /// tracked policies whose type is registered.
    fn sync_types(&self, inner: &mut FsmInner) {
        let mut supported: BTreeMap<ToscaConceptIdentifier, Vec<Arc<PolicyController>>> =
            BTreeMap::new();
        for controller in self.factory.inventory() {
            if !controller.is_brained() {
                continue;
            }
            for type_id in controller.policy_types() {
                if type_id.name == NATIVE_CONTROLLER_TYPE || type_id.name == NATIVE_ARTIFACT_TYPE {
                    continue;
                }
                supported
                    .entry(type_id)
                    .or_default()
                    .push(Arc::clone(&controller));
            }
        }

        let mut types = self.mandatory_types();
        for (type_id, controllers) in supported {
            types.insert(
                type_id.clone(),
                Arc::new(DroolsPolicyHandler::new(type_id, controllers)),
            );
        }

        let before: BTreeSet<_> = inner.types.keys().cloned().collect();
        let after: BTreeSet<_> = types.keys().cloned().collect();
        for added in after.difference(&before) {
            info!(pdp = %self.name, policy_type = %added, "Policy type registered");
        }
        for removed in before.difference(&after) {
            info!(pdp = %self.name, policy_type = %removed, "Policy type unregistered");
        }
        inner.types = types;

        for policy in inner.active.values().filter(|p| !p.is_native()) {
            if let Some(handler) = inner.types.get(&policy.type_identifier()) {
                if !handler.deploy(policy) {
                    warn!(pdp = %self.name, policy = %policy.identifier(), "Cannot re-enact policy");
                }
            }
        }
    }

    /// A non-native policy needs a brained controller supporting its type:
    /// the one it names, or any one when it names none.
    fn is_enabled(&self, inner: &FsmInner, policy: &ToscaPolicy) -> bool {
        let type_id = policy.type_identifier();
        if !inner.types.contains_key(&type_id) {
            return false;
        }
        if policy.is_native() {
            return true;
        }

        let holds = |controller: &PolicyController| {
            controller.is_brained() && controller.policy_types().contains(&type_id)
        };
        match policy.controller_name() {
            Some(name) => self.factory.get(name).is_ok_and(|c| holds(&c)),
            None => self.factory.inventory().iter().any(|c| holds(c)),
        }
    }

    fn mandatory_types(&self) -> TypeRegistry {
        let mut types = TypeRegistry::new();
        types.insert(
            self.native_controller.policy_type().clone(),
            Arc::clone(&self.native_controller),
        );
        types.insert(
            self.native_artifact.policy_type().clone(),
            Arc::clone(&self.native_artifact),
        );
        types
    }

    fn compliant(types: &TypeRegistry) -> bool {
        types.contains_key(&ToscaConceptIdentifier::native_controller())
            && types.contains_key(&ToscaConceptIdentifier::native_artifact())
    }

    fn start_controllers(&self) {
        for controller in self.factory.inventory() {
            if controller.is_alive() {
                continue;
            }
            if let Err(e) = controller.start() {
                warn!(pdp = %self.name, controller = %controller.name(), error = %e, "Cannot start controller");
            }
        }
    }

    fn stop_controllers(&self) {
        for controller in self.factory.inventory() {
            if !controller.stop() {
                warn!(pdp = %self.name, controller = %controller.name(), "Cannot stop controller");
            }
        }
    }

    fn schedule_status(&self, inner: &mut FsmInner, delay: Duration) {
        if let Some(task) = inner.status_task.take() {
            task.cancel();
        }
        let weak = self.self_ref.clone();
        inner.status_task = Some(self.scheduler.schedule_at_fixed_rate(
            delay,
            inner.interval,
            move || {
                if let Some(fsm) = weak.upgrade() {
                    fsm.heartbeat();
                }
            },
        ));
    }

    fn heartbeat(&self) {
        let inner = self.inner.lock();
        if state::is_alive(inner.state) {
            self.publish_status(&inner, None);
        }
    }

    fn build_status(&self, inner: &FsmInner, response: Option<PdpResponseDetails>) -> PdpStatus {
        PdpStatus {
            request_id: pdpd_core::types::new_request_id(),
            timestamp_ms: pdpd_core::types::now_millis(),
            name: self.name.clone(),
            pdp_type: self.pdp_type.clone(),
            state: inner.state,
            healthy: Self::compliant(&inner.types).into(),
            pdp_group: inner.group.clone(),
            pdp_subgroup: inner.subgroup.clone(),
            description: None,
            policies: inner.active.keys().cloned().collect(),
            response,
        }
    }

    fn publish_status(&self, inner: &FsmInner, response: Option<PdpResponseDetails>) -> bool {
        let Some(sink) = inner.sink.as_ref() else {
            debug!(pdp = %self.name, "No status sink");
            return false;
        };

        let status = self.build_status(inner, response);
        let text = match PdpMessage::Status(status).encode() {
            Ok(t) => t,
            Err(e) => {
                warn!(pdp = %self.name, error = %e, "Cannot encode status");
                return false;
            }
        };

        let sent = sink.send(&text);
        if !sent {
            warn!(pdp = %self.name, topic = %sink.topic(), "Status not sent");
        }
        sent
    }
}

impl std::fmt::Debug for LifecycleFsm {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LifecycleFsm")
            .field("name", &self.name)
            .field("state", &self.state())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pdpd_controller::FeatureRegistry;
    use pdpd_core::properties::Properties;
    use pdpd_core::topic::{MemoryBroker, MemoryTopicEndpoints, TopicEndpoint};
    use serde_json::{json, Value};
    use std::time::Instant;

    const PAP: &str = "POLICY-PDP-PAP";
    const OP_TYPE: &str = "onap.policies.controlloop.operational.common.Drools";

    struct Fixture {
        fsm: Arc<LifecycleFsm>,
        factory: Arc<PolicyControllerFactory>,
        statuses: Arc<Mutex<Vec<PdpStatus>>>,
        pap: MemoryTopicEndpoints,
    }

    struct StatusCollector(Arc<Mutex<Vec<PdpStatus>>>);

    impl TopicListener for StatusCollector {
        fn on_topic_event(&self, _infra: CommInfrastructure, _topic: &str, event: &str) {
            if let Ok(PdpMessage::Status(status)) = PdpMessage::decode(event) {
                self.0.lock().push(status);
            }
        }
    }

    fn fixture() -> Fixture {
        let broker = MemoryBroker::new();
        let endpoints = Arc::new(MemoryTopicEndpoints::new(Arc::clone(&broker)));
        let topics = Properties::new()
            .with("noop.source.topics", PAP)
            .with("noop.sink.topics", PAP);
        endpoints.add_topic_sources(&topics);
        endpoints.add_topic_sinks(&topics);

        // the PAP side, watching status messages
        let pap = MemoryTopicEndpoints::new(broker);
        let statuses = Arc::new(Mutex::new(Vec::new()));
        let source = pap
            .add_topic_sources(&Properties::new().with("noop.source.topics", PAP))
            .remove(0);
        source.register(Arc::new(StatusCollector(Arc::clone(&statuses))));
        source.start();
        pap.add_topic_sinks(&Properties::new().with("noop.sink.topics", PAP))[0].start();

        let factory = Arc::new(PolicyControllerFactory::new(
            endpoints.clone(),
            FeatureRegistry::new(),
        ));
        let config = PdpConfig {
            name: Some("pdp-1".to_string()),
            group: Some("defaultGroup".to_string()),
            subgroup: Some("drools".to_string()),
            ..PdpConfig::default()
        };
        let fsm = LifecycleFsm::new(&config, Arc::clone(&factory), endpoints).unwrap();
        Fixture {
            fsm,
            factory,
            statuses,
            pap,
        }
    }

    fn wait_until(timeout: Duration, predicate: impl Fn() -> bool) -> bool {
        let deadline = Instant::now() + timeout;
        while Instant::now() < deadline {
            if predicate() {
                return true;
            }
            std::thread::sleep(Duration::from_millis(10));
        }
        predicate()
    }

    fn policy(name: &str, type_id: ToscaConceptIdentifier, props: Value) -> ToscaPolicy {
        let Value::Object(map) = props else {
            panic!("properties must be an object");
        };
        ToscaPolicy::new(name, "1.0.0", &type_id, map)
    }

    fn controller_policy() -> ToscaPolicy {
        policy(
            "example.controller",
            ToscaConceptIdentifier::native_controller(),
            json!({
                "controllerName": "lifecycle",
                "sourceTopics": [{"topicName": "DCAE_TOPIC", "events": []}],
                "sinkTopics": [],
                "customConfig": {"controller.policy.types": format!("{}:1.0.0", OP_TYPE)}
            }),
        )
    }

    fn artifact_policy() -> ToscaPolicy {
        policy(
            "example.artifact",
            ToscaConceptIdentifier::native_artifact(),
            json!({
                "rulesArtifact": {"groupId": "org.onap.policy", "artifactId": "lifecycle", "version": "1.0.0"},
                "controller": {"name": "lifecycle"}
            }),
        )
    }

    fn op_policy(name: &str) -> ToscaPolicy {
        policy(
            name,
            ToscaConceptIdentifier::new(OP_TYPE, "1.0.0"),
            json!({"id": "ControlLoop-vCPE", "timeout": 60}),
        )
    }

    fn update(deploy: Vec<ToscaPolicy>, undeploy: Vec<ToscaConceptIdentifier>) -> PdpUpdate {
        PdpUpdate::for_pdp("pdp-1").deploy(deploy).undeploy(undeploy)
    }

    #[test]
    fn test_start_enters_passive_and_heartbeats() {
        let f = fixture();
        assert_eq!(f.fsm.state(), PdpState::Terminated);
        assert!(f.fsm.start().unwrap());
        assert!(!f.fsm.start().unwrap());
        assert_eq!(f.fsm.state(), PdpState::Passive);
        assert!(f.fsm.is_mandatory_policy_types_compliant());

        assert!(wait_until(Duration::from_secs(2), || !f.statuses.lock().is_empty()));
        let first = f.statuses.lock()[0].clone();
        assert_eq!(first.state, PdpState::Passive);
        assert_eq!(first.name, "pdp-1");
        assert_eq!(first.pdp_group.as_deref(), Some("defaultGroup"));

        assert!(f.fsm.status().unwrap());
        f.fsm.shutdown();
    }

    #[test]
    fn test_start_without_topics_stays_terminated() {
        let endpoints = Arc::new(MemoryTopicEndpoints::new(MemoryBroker::new()));
        let factory = Arc::new(PolicyControllerFactory::new(
            endpoints.clone(),
            FeatureRegistry::new(),
        ));
        let fsm = LifecycleFsm::new(&PdpConfig::default(), factory, endpoints).unwrap();
        assert!(matches!(fsm.start(), Err(LifecycleError::Topic(_))));
        assert_eq!(fsm.state(), PdpState::Terminated);
    }

    /// Endpoints whose PAP sink never starts.
    struct DeadSinkEndpoints {
        inner: MemoryTopicEndpoints,
    }

    struct DeadSink;

    impl TopicEndpoint for DeadSink {
        fn topic(&self) -> &str {
            PAP
        }

        fn infrastructure(&self) -> CommInfrastructure {
            CommInfrastructure::Noop
        }

        fn start(&self) -> bool {
            false
        }

        fn stop(&self) -> bool {
            true
        }

        fn is_alive(&self) -> bool {
            false
        }
    }

    impl TopicSink for DeadSink {
        fn send(&self, _message: &str) -> bool {
            false
        }
    }

    impl TopicEndpointProvider for DeadSinkEndpoints {
        fn add_topic_sources(&self, props: &Properties) -> Vec<Arc<dyn TopicSource>> {
            self.inner.add_topic_sources(props)
        }

        fn add_topic_sinks(&self, _props: &Properties) -> Vec<Arc<dyn TopicSink>> {
            vec![Arc::new(DeadSink)]
        }

        fn get_topic_source(&self, topic: &str) -> Option<Arc<dyn TopicSource>> {
            self.inner.get_topic_source(topic)
        }

        fn get_topic_sink(&self, _topic: &str) -> Option<Arc<dyn TopicSink>> {
            Some(Arc::new(DeadSink))
        }
    }

    #[test]
    fn test_sink_failure_releases_source() {
        let endpoints = Arc::new(DeadSinkEndpoints {
            inner: MemoryTopicEndpoints::new(MemoryBroker::new()),
        });
        endpoints.add_topic_sources(&Properties::new().with("noop.source.topics", PAP));
        let factory = Arc::new(PolicyControllerFactory::new(
            endpoints.clone(),
            FeatureRegistry::new(),
        ));
        let fsm = LifecycleFsm::new(&PdpConfig::default(), factory, endpoints.clone()).unwrap();

        assert!(matches!(fsm.start(), Err(LifecycleError::Topic(_))));
        assert_eq!(fsm.state(), PdpState::Terminated);

        let source = endpoints.inner.memory_source(PAP).unwrap();
        assert!(!source.is_alive());
        assert_eq!(source.listener_count(), 0);
        fsm.shutdown();
    }

    #[test]
    fn test_terminated_rejects_update_and_status() {
        let f = fixture();
        assert!(matches!(
            f.fsm.update(&update(vec![], vec![])),
            Err(LifecycleError::Unsupported { .. })
        ));
        assert!(matches!(f.fsm.status(), Err(LifecycleError::Unsupported { .. })));
        assert!(f.fsm.stop().unwrap());
    }

    #[test]
    fn test_state_change_to_active_and_back() {
        let f = fixture();
        f.fsm.start().unwrap();
        assert!(f.fsm.update(&update(vec![controller_policy()], vec![])).unwrap());
        let controller = f.factory.get("lifecycle").unwrap();
        assert!(!controller.is_alive());

        let change = PdpStateChange::for_pdp("pdp-1", PdpState::Active);
        assert!(f.fsm.state_change(&change).unwrap());
        assert_eq!(f.fsm.state(), PdpState::Active);
        assert!(controller.is_alive());
        assert!(wait_until(Duration::from_secs(2), || {
            f.statuses.lock().iter().any(|s| s.state == PdpState::Active)
        }));

        let back = PdpStateChange::for_pdp("pdp-1", PdpState::Passive);
        assert!(f.fsm.state_change(&back).unwrap());
        assert!(!controller.is_alive());
        f.fsm.shutdown();
    }

    #[test]
    fn test_state_change_for_other_pdp_ignored() {
        let f = fixture();
        f.fsm.start().unwrap();
        let change = PdpStateChange::for_pdp("someone-else", PdpState::Active);
        assert!(!f.fsm.state_change(&change).unwrap());
        assert_eq!(f.fsm.state(), PdpState::Passive);
        f.fsm.shutdown();
    }

    #[test]
    fn test_safe_is_rejected() {
        let f = fixture();
        f.fsm.start().unwrap();
        let change = PdpStateChange::for_pdp("pdp-1", PdpState::Safe);
        assert!(matches!(
            f.fsm.state_change(&change),
            Err(LifecycleError::Unsupported { .. })
        ));
        assert_eq!(f.fsm.state(), PdpState::Passive);
        f.fsm.shutdown();
    }

    #[test]
    fn test_terminate_request_shuts_down() {
        let f = fixture();
        f.fsm.start().unwrap();
        let change = PdpStateChange::for_pdp("pdp-1", PdpState::Terminated);
        assert!(f.fsm.state_change(&change).unwrap());
        assert_eq!(f.fsm.state(), PdpState::Terminated);
        assert!(wait_until(Duration::from_secs(2), || {
            f.statuses.lock().iter().any(|s| s.state == PdpState::Terminated)
        }));
        // scheduler is gone, so the PDP cannot come back
        assert!(f.fsm.start().is_err());
        f.fsm.shutdown();
    }

    #[test]
    fn test_controller_artifact_operational_scenario() {
        let f = fixture();
        f.fsm.start().unwrap();
        let op = op_policy("op.1");

        assert!(f.fsm.update(&update(vec![controller_policy()], vec![])).unwrap());
        assert!(f.fsm.update(&update(vec![artifact_policy()], vec![])).unwrap());
        assert!(f
            .fsm
            .policy_types()
            .contains(&ToscaConceptIdentifier::new(OP_TYPE, "1.0.0")));
        assert!(f.fsm.update(&update(vec![op.clone()], vec![])).unwrap());

        let controller = f.factory.get("lifecycle").unwrap();
        assert!(controller.is_brained());
        assert_eq!(controller.drools().policies(), vec![op.clone()]);

        // unloading the artifact disables the operational policy
        assert!(f
            .fsm
            .update(&update(vec![], vec![artifact_policy().identifier()]))
            .unwrap());
        assert!(!controller.is_brained());
        assert!(controller.drools().policies().is_empty());
        assert!(f.fsm.active_policies().contains(&op));
        assert_eq!(f.fsm.disabled_policies(), vec![op.clone()]);

        // reloading it re-enacts the policy
        assert!(f.fsm.update(&update(vec![artifact_policy()], vec![])).unwrap());
        assert_eq!(controller.drools().policies(), vec![op.clone()]);
        assert!(f.fsm.disabled_policies().is_empty());
        f.fsm.shutdown();
    }

    #[test]
    fn test_changed_controller_policy_keeps_rules() {
        let f = fixture();
        f.fsm.start().unwrap();
        let op = op_policy("op.1");
        let all = vec![controller_policy(), artifact_policy(), op.clone()];
        assert!(f.fsm.update(&update(all, vec![])).unwrap());

        // same identifier, one more sink topic
        let mut changed = controller_policy();
        changed
            .properties
            .insert("sinkTopics".into(), json!([{"topicName": "APPC-CL", "events": []}]));
        assert!(f.fsm.update(&update(vec![changed.clone()], vec![])).unwrap());

        let controller = f.factory.get("lifecycle").unwrap();
        assert!(controller.is_brained());
        assert_eq!(controller.drools().policies(), vec![op]);
        assert!(f.fsm.disabled_policies().is_empty());
        assert!(f.fsm.active_policies().contains(&changed));
        f.fsm.shutdown();
    }

    #[test]
    fn test_policy_for_absent_controller_is_disabled() {
        let f = fixture();
        f.fsm.start().unwrap();
        let all = vec![controller_policy(), artifact_policy()];
        assert!(f.fsm.update(&update(all, vec![])).unwrap());

        let mut targeted = op_policy("op.elsewhere");
        targeted
            .properties
            .insert("controllerName".into(), json!("absent"));
        let shared = op_policy("op.shared");
        assert!(f
            .fsm
            .update(&update(vec![targeted.clone(), shared.clone()], vec![]))
            .unwrap());

        assert!(f.fsm.active_policies().contains(&targeted));
        assert_eq!(f.fsm.disabled_policies(), vec![targeted.clone()]);
        assert!(!f.fsm.enabled_policies().contains(&targeted));
        assert!(f.fsm.enabled_policies().contains(&shared));

        let controller = f.factory.get("lifecycle").unwrap();
        assert_eq!(controller.drools().policies(), vec![shared]);
        f.fsm.shutdown();
    }

    #[test]
    fn test_single_update_orders_dependencies() {
        let f = fixture();
        f.fsm.start().unwrap();
        let op = op_policy("op.1");

        // reverse of the required order in one message
        let all = vec![op.clone(), artifact_policy(), controller_policy()];
        assert!(f.fsm.update(&update(all.clone(), vec![])).unwrap());
        assert_eq!(f.fsm.active_policies().len(), 3);

        // applying it again changes nothing and duplicates nothing
        assert!(f.fsm.update(&update(all, vec![])).unwrap());
        assert_eq!(f.fsm.active_policies().len(), 3);
        let controller = f.factory.get("lifecycle").unwrap();
        assert_eq!(controller.drools().policies(), vec![op]);

        // removing everything tears the controller down
        let ids: Vec<_> = f.fsm.active_policies().iter().map(|p| p.identifier()).collect();
        assert!(f.fsm.update(&update(vec![], ids)).unwrap());
        assert!(f.fsm.active_policies().is_empty());
        assert!(f.factory.get("lifecycle").is_err());
        f.fsm.shutdown();
    }

    #[test]
    fn test_unknown_type_fails_without_tracking() {
        let f = fixture();
        f.fsm.start().unwrap();
        let op = op_policy("op.1");
        assert!(!f.fsm.update(&update(vec![op], vec![])).unwrap());
        assert!(f.fsm.active_policies().is_empty());

        assert!(wait_until(Duration::from_secs(2), || {
            f.statuses.lock().iter().any(|s| {
                s.response
                    .as_ref()
                    .is_some_and(|r| r.response_status == PdpResponseStatus::Fail)
            })
        }));
        f.fsm.shutdown();
    }

    #[test]
    fn test_artifact_without_controller_fails() {
        let f = fixture();
        f.fsm.start().unwrap();
        assert!(!f.fsm.update(&update(vec![artifact_policy()], vec![])).unwrap());
        assert!(f.fsm.active_policies().is_empty());
        f.fsm.shutdown();
    }

    #[test]
    fn test_update_addressing_and_group() {
        let f = fixture();
        f.fsm.start().unwrap();

        let other = PdpUpdate::for_pdp("other");
        assert!(!f.fsm.update(&other).unwrap());

        let moved = PdpUpdate::for_pdp("pdp-1").with_group("g2", "s2");
        assert!(f.fsm.update(&moved).unwrap());
        assert_eq!(f.fsm.group().as_deref(), Some("g2"));
        assert_eq!(f.fsm.subgroup().as_deref(), Some("s2"));

        // group-addressed update without a name
        let mut by_group = PdpUpdate::for_pdp("x").with_group("g2", "s2");
        by_group.name = None;
        assert!(f.fsm.update(&by_group).unwrap());
        by_group.pdp_group = Some("g3".to_string());
        assert!(!f.fsm.update(&by_group).unwrap());
        f.fsm.shutdown();
    }

    #[test]
    fn test_heartbeat_interval_update() {
        let f = fixture();
        f.fsm.start().unwrap();
        let default = f.fsm.heartbeat_interval();

        let mut faster = PdpUpdate::for_pdp("pdp-1");
        faster.pdp_heartbeat_interval_ms = Some(50);
        f.fsm.update(&faster).unwrap();
        assert_eq!(f.fsm.heartbeat_interval(), Duration::from_millis(50));

        let before = f.statuses.lock().len();
        assert!(wait_until(Duration::from_secs(2), || f.statuses.lock().len() >= before + 3));

        let mut reset = PdpUpdate::for_pdp("pdp-1");
        reset.pdp_heartbeat_interval_ms = Some(0);
        f.fsm.update(&reset).unwrap();
        assert_eq!(f.fsm.heartbeat_interval(), default);
        f.fsm.shutdown();
    }

    #[test]
    fn test_messages_from_topic() {
        let f = fixture();
        f.fsm.start().unwrap();

        let sink = f.pap.memory_sink(PAP).unwrap();
        let change = PdpMessage::StateChange(PdpStateChange::for_pdp("pdp-1", PdpState::Active));
        assert!(sink.send(&change.encode().unwrap()));
        assert!(sink.send("garbage"));

        assert!(wait_until(Duration::from_secs(2), || f.fsm.state() == PdpState::Active));
        f.fsm.shutdown();
    }

    #[test]
    fn test_controller_brained_outside_reconciliation() {
        let f = fixture();
        f.fsm.start().unwrap();
        let op = op_policy("op.1");

        assert!(f.fsm.update(&update(vec![controller_policy(), artifact_policy(), op.clone()], vec![])).unwrap());
        let controller = f.factory.get("lifecycle").unwrap();

        // made brainless behind the state machine's back
        f.factory
            .patch("lifecycle", pdpd_controller::DroolsConfiguration::brainless())
            .unwrap();
        assert!(wait_until(Duration::from_secs(2), || f.fsm.disabled_policies() == vec![op.clone()]));

        f.factory
            .patch(
                "lifecycle",
                pdpd_controller::DroolsConfiguration::new("org.onap.policy", "lifecycle", "1.0.1"),
            )
            .unwrap();
        assert!(wait_until(Duration::from_secs(2), || {
            controller.drools().policies() == vec![op.clone()]
        }));
        f.fsm.shutdown();
    }
}
