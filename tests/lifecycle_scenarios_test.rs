//! End-to-end PDP scenarios driven over the PAP topic

mod common;

use common::{fast_pooling, wait_until, Host, Recorder, EVENT_TOPIC, PAP_TOPIC};
use pdpd_core::config::PdpConfig;
use pdpd_core::policy::{ToscaConceptIdentifier, ToscaPolicy};
use pdpd_core::properties::Properties;
use pdpd_core::topic::{
    MemoryBroker, MemoryTopicEndpoints, TopicEndpointProvider, TopicSink, TopicSource,
};
use pdpd_core::types::{PdpMessage, PdpResponseStatus, PdpState, PdpStateChange, PdpUpdate};
use pdpd_lifecycle::LifecycleFsm;
use pdpd_pool::PoolState;
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;

const PDP: &str = "pdp-1";
const OP_TYPE: &str = "onap.policies.controlloop.operational.common.Drools";

struct Scenario {
    host: Host,
    fsm: Arc<LifecycleFsm>,
    pap_sink: Arc<dyn TopicSink>,
    recorder: Arc<Recorder>,
    // keeps the PAP side subscribed
    _pap: MemoryTopicEndpoints,
}

impl Scenario {
    fn new() -> Self {
        let broker = MemoryBroker::new();
        let host = Host::new(PDP, &broker, fast_pooling());
        let pap_topics = Properties::new()
            .with("noop.source.topics", PAP_TOPIC)
            .with("noop.sink.topics", PAP_TOPIC);
        let provider = host.provider();
        provider.add_topic_sources(&pap_topics);
        provider.add_topic_sinks(&pap_topics);

        let pap = MemoryTopicEndpoints::new(broker);
        let recorder = Recorder::new();
        let source = pap.add_topic_sources(&pap_topics).remove(0);
        source.register(recorder.clone());
        source.start();
        let pap_sink = pap.add_topic_sinks(&pap_topics).remove(0);
        pap_sink.start();

        let config = PdpConfig {
            name: Some(PDP.to_string()),
            group: Some("defaultGroup".to_string()),
            subgroup: Some("drools".to_string()),
            ..PdpConfig::default()
        };
        let fsm = LifecycleFsm::new(&config, Arc::clone(&host.factory), provider).unwrap();

        Self {
            host,
            fsm,
            pap_sink,
            recorder,
            _pap: pap,
        }
    }

    fn send(&self, message: PdpMessage) {
        let text = message.encode().unwrap();
        assert!(self.pap_sink.send(&text));
    }

    fn response_to(&self, request_id: &str) -> Option<PdpResponseStatus> {
        self.recorder.statuses().iter().find_map(|s| {
            s.response
                .as_ref()
                .filter(|r| r.response_to == request_id)
                .map(|r| r.response_status)
        })
    }

    fn update(&self, update: PdpUpdate) -> PdpResponseStatus {
        let request_id = update.request_id.clone();
        self.send(PdpMessage::Update(update));
        assert!(wait_until(Duration::from_secs(5), || self
            .response_to(&request_id)
            .is_some()));
        self.response_to(&request_id).unwrap()
    }

    fn change_state(&self, state: PdpState) -> PdpResponseStatus {
        let change = PdpStateChange::for_pdp(PDP, state);
        let request_id = change.request_id.clone();
        self.send(PdpMessage::StateChange(change));
        assert!(wait_until(Duration::from_secs(5), || self
            .response_to(&request_id)
            .is_some()));
        self.response_to(&request_id).unwrap()
    }
}

fn policy(name: &str, type_id: ToscaConceptIdentifier, props: Value) -> ToscaPolicy {
    let Value::Object(map) = props else {
        panic!("properties must be an object");
    };
    ToscaPolicy::new(name, "1.0.0", &type_id, map)
}

fn controller_policy() -> ToscaPolicy {
    policy(
        "usecases.controller",
        ToscaConceptIdentifier::native_controller(),
        json!({
            "controllerName": "usecases",
            "sourceTopics": [{"topicName": EVENT_TOPIC, "events": []}],
            "sinkTopics": [],
            "customConfig": {
                "controller.policy.types": format!("{}:1.0.0", OP_TYPE),
                "pooling.usecases.enabled": "true"
            }
        }),
    )
}

fn artifact_policy() -> ToscaPolicy {
    policy(
        "usecases.artifact",
        ToscaConceptIdentifier::native_artifact(),
        json!({
            "rulesArtifact": {"groupId": "org.onap.policy", "artifactId": "usecases", "version": "1.0.0"},
            "controller": {"name": "usecases"}
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

#[test]
fn test_full_pdp_lifecycle_over_topic() {
    let s = Scenario::new();
    assert!(s.fsm.start().unwrap());
    assert!(wait_until(Duration::from_secs(2), || s
        .recorder
        .statuses()
        .iter()
        .any(|st| st.state == PdpState::Passive)));

    // controller and rules in one message, listed in reverse order
    let status = s.update(PdpUpdate::for_pdp(PDP).deploy(vec![artifact_policy(), controller_policy()]));
    assert_eq!(status, PdpResponseStatus::Success);
    let controller = s.host.factory.get("usecases").unwrap();
    assert!(controller.is_brained());
    assert!(!controller.is_alive());
    let manager = s.host.pooling.manager("usecases").expect("pooling enabled");
    assert_eq!(manager.state(), PoolState::Idle);

    // activation starts the controller and its pool
    assert_eq!(s.change_state(PdpState::Active), PdpResponseStatus::Success);
    assert_eq!(s.fsm.state(), PdpState::Active);
    assert!(controller.is_alive());
    assert!(wait_until(Duration::from_secs(5), || manager.state() == PoolState::Active));

    // events on the controller's topic reach the rules
    let source = s.host.endpoints.memory_source(EVENT_TOPIC).unwrap();
    assert!(source.inject(&json!({"requestId": "req-1"}).to_string()));
    assert!(wait_until(Duration::from_secs(2), || controller.drools().events().len() == 1));

    // operational policies are offered to the running rules
    let op = op_policy("op.vcpe");
    let status = s.update(PdpUpdate::for_pdp(PDP).deploy(vec![op.clone()]));
    assert_eq!(status, PdpResponseStatus::Success);
    assert_eq!(controller.drools().policies(), vec![op.clone()]);
    assert_eq!(s.fsm.active_policies().len(), 3);

    // passive stops the controller and takes it out of the pool
    assert_eq!(s.change_state(PdpState::Passive), PdpResponseStatus::Success);
    assert!(!controller.is_alive());
    assert_eq!(manager.state(), PoolState::Idle);

    // termination is acknowledged with a final TERMINATED status
    s.send(PdpMessage::StateChange(PdpStateChange::for_pdp(PDP, PdpState::Terminated)));
    assert!(wait_until(Duration::from_secs(5), || s
        .recorder
        .statuses()
        .iter()
        .any(|st| st.state == PdpState::Terminated)));
    assert_eq!(s.fsm.state(), PdpState::Terminated);
    s.fsm.shutdown();
    s.host.factory.destroy_all();
}

#[test]
fn test_operational_policy_waits_for_rules() {
    let s = Scenario::new();
    s.fsm.start().unwrap();

    let status = s.update(PdpUpdate::for_pdp(PDP).deploy(vec![controller_policy()]));
    assert_eq!(status, PdpResponseStatus::Success);

    // the controller supports the type only once its rules are loaded
    let op = op_policy("op.early");
    assert_eq!(
        s.update(PdpUpdate::for_pdp(PDP).deploy(vec![op.clone()])),
        PdpResponseStatus::Fail
    );
    assert!(!s.fsm.active_policies().contains(&op));

    let status = s.update(PdpUpdate::for_pdp(PDP).deploy(vec![artifact_policy(), op.clone()]));
    assert_eq!(status, PdpResponseStatus::Success);
    assert!(s.fsm.active_policies().contains(&op));
    let controller = s.host.factory.get("usecases").unwrap();
    assert_eq!(controller.drools().policies(), vec![op]);

    s.fsm.shutdown();
    s.host.factory.destroy_all();
}

#[test]
fn test_undeploy_everything_removes_controller_and_pool() {
    let s = Scenario::new();
    s.fsm.start().unwrap();

    let deployed = vec![controller_policy(), artifact_policy()];
    s.update(PdpUpdate::for_pdp(PDP).deploy(deployed.clone()));
    assert!(s.host.pooling.manager("usecases").is_some());

    let ids: Vec<ToscaConceptIdentifier> = deployed.iter().map(|p| p.identifier()).collect();
    let status = s.update(PdpUpdate::for_pdp(PDP).undeploy(ids));
    assert_eq!(status, PdpResponseStatus::Success);
    assert!(s.fsm.active_policies().is_empty());
    assert!(s.host.factory.get("usecases").is_err());
    assert!(s.host.pooling.manager("usecases").is_none());

    s.fsm.shutdown();
}

#[test]
fn test_messages_for_other_pdps_are_ignored() {
    let s = Scenario::new();
    s.fsm.start().unwrap();

    s.send(PdpMessage::StateChange(PdpStateChange::for_pdp(
        "someone-else",
        PdpState::Active,
    )));
    s.send(PdpMessage::Update(
        PdpUpdate::for_pdp("someone-else").deploy(vec![controller_policy()]),
    ));

    // a later message of ours is answered, so the earlier ones were seen
    assert_eq!(
        s.update(PdpUpdate::for_pdp(PDP)),
        PdpResponseStatus::Success
    );
    assert_eq!(s.fsm.state(), PdpState::Passive);
    assert!(s.host.factory.get("usecases").is_err());

    s.fsm.shutdown();
}
