//! End-to-end scenarios across the whole tier graph

use std::collections::BTreeSet;
use std::sync::{Arc, Barrier};
use std::thread;

use parking_lot::Mutex;
use proptest::prelude::*;

use meshwork_core::{
    Credentials, Envelope, Identity, Lifecycle, LinkAddress, LogEntry, LogLevel, MeshworkError,
    NodeAddress, PartAddress, PartKey, Phase, Policy, PolicyDirective, TierState, Uri,
};
use meshwork_runtime::{
    log_lane, same_tier, unwrap_part, HttpLane, HttpLaneView, HttpRequest, HttpResponse, Kernel,
    LaneBinding, LinkContext, LinkLayer, LinkProxy, LocalDownlink, MeshBinding, MeshTable,
    NodeBinding, NodeModel, PartBinding, PartInfo, PartPredicate, PartProxy, PartTable,
    PushOutcome, PushRequest, Respond, RuntimeConfig, SupplyLane, PARTS_LANE,
};

use crate::clock::ManualStage;
use crate::fixture::{room_factory, EdgeFixture};
use crate::probe::{Probe, ProbeKernel, ProbePartLayer};

struct DenyAnonymous;

impl Policy for DenyAnonymous {
    fn authenticate(&self, credentials: &Credentials) -> PolicyDirective<Identity> {
        match credentials.claims.get("subject") {
            Some(subject) => PolicyDirective::Allow(Identity::authenticated(subject.clone())),
            None => PolicyDirective::Deny("anonymous".to_string()),
        }
    }
}

/// Kernel recording every part it creates
#[derive(Default)]
struct TrackingKernel {
    created: Mutex<Vec<Arc<PartTable>>>,
}

impl Kernel for TrackingKernel {
    fn priority(&self) -> f64 {
        1.0
    }

    fn create_part(&self, address: &PartAddress) -> Option<Arc<dyn PartBinding>> {
        let part = PartTable::new(address.part_key.clone(), PartPredicate::Any);
        self.created.lock().push(part.clone());
        Some(part)
    }
}

#[test]
fn test_push_reaches_command_lane() {
    let (fixture, said) = EdgeFixture::rooms();
    assert_eq!(fixture.command("/rooms/1", "say", "hello"), Some(PushOutcome::Accepted));
    assert_eq!(fixture.command("/rooms/2", "say", "again"), Some(PushOutcome::Accepted));
    assert_eq!(*said.lock(), vec!["hello".to_string(), "again".to_string()]);

    let mesh = fixture.edge.mesh(&Uri::empty()).unwrap();
    let gateway = mesh.gateway().unwrap();
    let host = gateway.master().unwrap();
    assert_eq!(host.nodes().len(), 2);
    assert!(host.is_started());
}

#[test]
fn test_missing_lane_and_node_decline() {
    let (fixture, _) = EdgeFixture::rooms();
    assert_eq!(
        fixture.command("/rooms/1", "shout", "x"),
        Some(PushOutcome::Declined(MeshworkError::LaneNotFound {
            node: Uri::parse("/rooms/1"),
            lane: Uri::parse("shout"),
        }))
    );
    assert_eq!(
        fixture.command("/hall", "say", "x"),
        Some(PushOutcome::Declined(MeshworkError::NodeNotFound(Uri::parse("/hall"))))
    );
}

#[test]
fn test_concurrent_open_part_publishes_one_winner() {
    let kernel = Arc::new(TrackingKernel::default());
    let (builder, schedule) = EdgeFixture::builder();
    let fixture = EdgeFixture::start(builder.kernel(kernel.clone()), schedule);
    let mesh = fixture.edge.open_mesh(&Uri::empty());

    let threads = 8;
    let barrier = Arc::new(Barrier::new(threads));
    let handles: Vec<_> = (0..threads)
        .map(|i| {
            let mesh = mesh.clone();
            let barrier = barrier.clone();
            thread::spawn(move || {
                barrier.wait();
                mesh.open_part(&Uri::parse(&format!("/rooms/{i}")))
            })
        })
        .collect();
    let opened: Vec<Arc<dyn PartBinding>> = handles
        .into_iter()
        .map(|handle| handle.join().unwrap().unwrap())
        .collect();

    let winner = mesh.gateway().unwrap();
    assert!(opened.iter().all(|part| same_tier(part, &winner)));
    assert_eq!(mesh.parts().len(), 1);

    let created = kernel.created.lock();
    let live: Vec<_> = created.iter().filter(|part| !part.is_closed()).collect();
    assert_eq!(live.len(), 1);
    assert!(same_tier(live[0], &winner));
    assert!(winner.is_started());
}

#[test]
fn test_concurrent_distinct_parts_all_land() {
    let mesh = MeshTable::new(Uri::empty());
    mesh.start().unwrap();
    let barrier = Arc::new(Barrier::new(6));
    let handles: Vec<_> = (0..6)
        .map(|i| {
            let mesh = mesh.clone();
            let barrier = barrier.clone();
            thread::spawn(move || {
                barrier.wait();
                let name = format!("p{i}");
                let part = PartTable::new(PartKey::named(name.clone()), PartPredicate::node_prefix(format!("/{name}/")));
                mesh.add_part(PartKey::named(name), part);
            })
        })
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }
    assert_eq!(mesh.parts().len(), 6);
    assert!(mesh.parts().iter().all(|part| part.is_started()));
    assert_eq!(
        mesh.get_part(&Uri::parse("/p3/x")).map(|part| part.part_key()),
        Some(PartKey::named("p3"))
    );
}

#[derive(Clone, Debug)]
enum MembershipOp {
    Add(u8),
    Close(u8),
}

fn membership_op() -> impl Strategy<Value = MembershipOp> {
    prop_oneof![
        (0u8..5).prop_map(MembershipOp::Add),
        (0u8..5).prop_map(MembershipOp::Close),
    ]
}

proptest! {
    #[test]
    fn test_membership_matches_model(ops in proptest::collection::vec(membership_op(), 1..40)) {
        let mesh = MeshTable::new(Uri::empty());
        mesh.start().unwrap();
        let mut model = BTreeSet::new();
        for op in ops {
            match op {
                MembershipOp::Add(key) => {
                    let part_key = PartKey::named(format!("k{key}"));
                    let offered = PartTable::new(part_key.clone(), PartPredicate::node_prefix(format!("/k{key}/")));
                    let kept = mesh.add_part(part_key, offered.clone());
                    if model.insert(key) {
                        prop_assert!(same_tier(&kept, &offered));
                        prop_assert!(offered.is_started());
                    } else {
                        prop_assert!(!same_tier(&kept, &offered));
                        prop_assert!(offered.is_closed());
                    }
                }
                MembershipOp::Close(key) => {
                    let part_key = PartKey::named(format!("k{key}"));
                    let before = mesh.get_part_by_key(&part_key);
                    mesh.close_part(&part_key);
                    prop_assert_eq!(before.is_some(), model.remove(&key));
                    if let Some(part) = before {
                        prop_assert!(part.is_closed());
                    }
                }
            }
            let keys: BTreeSet<PartKey> = mesh.parts().iter().map(|part| part.part_key()).collect();
            let expected: BTreeSet<PartKey> = model.iter().map(|key| PartKey::named(format!("k{key}"))).collect();
            prop_assert_eq!(keys, expected);
        }
    }
}

#[test]
fn test_downlink_receives_supply_and_closes() {
    let lanes: Arc<Mutex<Vec<Arc<SupplyLane>>>> = Arc::new(Mutex::new(Vec::new()));
    let registry = lanes.clone();
    let (builder, schedule) = EdgeFixture::builder();
    let builder = builder.route("/feeds/", move |address: &NodeAddress| {
        let node = NodeModel::new(address.node_uri.clone());
        let lane = SupplyLane::new(Uri::parse("feed"));
        node.open_lane(Uri::parse("feed"), lane.clone());
        registry.lock().push(lane);
        node as Arc<dyn NodeBinding>
    });
    let fixture = EdgeFixture::start(builder, schedule);

    let (link, events) = fixture.downlink("/feeds/news", "feed");
    assert!(link.is_open());
    let lane = lanes.lock()[0].clone();
    assert_eq!(lane.uplink_count(), 1);

    lane.push("first");
    lane.push("second");
    assert_eq!(*events.lock(), vec!["first".to_string(), "second".to_string()]);

    link.close();
    assert!(link.is_closed());
    assert_eq!(lane.uplink_count(), 0);
    lane.push("late");
    assert_eq!(events.lock().len(), 2);
}

#[test]
fn test_downlink_to_unknown_lane_is_rejected() {
    let (fixture, _) = EdgeFixture::rooms();
    let (link, _) = fixture.downlink("/rooms/1", "missing");
    assert_eq!(
        link.error(),
        Some(MeshworkError::LaneNotFound {
            node: Uri::parse("/rooms/1"),
            lane: Uri::parse("missing"),
        })
    );
}

/// Link layer that queues one more command from inside the first push up
#[derive(Default)]
struct ReentrantCommand {
    link: Mutex<Option<Arc<LocalDownlink>>>,
}

impl LinkLayer for ReentrantCommand {
    fn push_up(&self, context: &dyn LinkContext, envelope: Envelope) {
        let pending = self.link.lock().take();
        if let Some(link) = pending {
            link.command("b");
        }
        context.push_up(envelope);
    }
}

#[test]
fn test_command_queued_during_push_up_is_delivered() {
    let (fixture, said) = EdgeFixture::rooms();
    let downlink = LocalDownlink::new(
        LinkAddress::new(Uri::parse("/rooms/1"), Uri::parse("say")),
        |_| {},
    );
    let proxy = LinkProxy::new(downlink.clone(), ReentrantCommand::default());
    *proxy.layer().link.lock() = Some(downlink.clone());
    fixture.edge.open_uplink(proxy.clone());
    assert!(downlink.is_open());

    downlink.command("a");
    assert!(proxy.layer().link.lock().is_none());
    assert_eq!(*said.lock(), vec!["a".to_string(), "b".to_string()]);
}

#[test]
fn test_policy_gates_pushes() {
    let said = Arc::new(Mutex::new(Vec::new()));
    let (builder, schedule) = EdgeFixture::builder();
    let builder = builder
        .policy(Arc::new(DenyAnonymous))
        .route("/rooms/", room_factory(said.clone()));
    let fixture = EdgeFixture::start(builder, schedule);

    assert_eq!(
        fixture.command("/rooms/1", "say", "who"),
        Some(PushOutcome::Declined(MeshworkError::PolicyRejected("anonymous".into())))
    );
    let envelope = Envelope::command(Uri::parse("/rooms/1"), Uri::parse("say"), "me");
    let request = PushRequest::new(envelope)
        .with_credentials(Credentials::new(Uri::empty()).with_claim("subject", "ada"));
    assert_eq!(fixture.push(request), Some(PushOutcome::Accepted));
    assert_eq!(*said.lock(), vec!["me".to_string()]);
}

#[test]
fn test_policy_layer_can_be_disabled() {
    let said = Arc::new(Mutex::new(Vec::new()));
    let (builder, schedule) = EdgeFixture::builder();
    let builder = builder
        .policy(Arc::new(DenyAnonymous))
        .without_host_policy()
        .route("/rooms/", room_factory(said.clone()));
    let fixture = EdgeFixture::start(builder, schedule);
    assert_eq!(fixture.command("/rooms/1", "say", "open"), Some(PushOutcome::Accepted));
}

#[test]
fn test_parts_lane_reports_new_parts() {
    let said = Arc::new(Mutex::new(Vec::new()));
    let (builder, schedule) = EdgeFixture::builder();
    let builder = builder
        .config(RuntimeConfig::default().with_edge_name("fixture").with_meta(true))
        .route("/rooms/", room_factory(said));
    let fixture = EdgeFixture::start(builder, schedule);

    let (link, events) = fixture.downlink("meta:mesh", PARTS_LANE);
    assert!(link.is_open());
    let mesh = fixture.edge.mesh(&Uri::empty()).unwrap();
    assert!(mesh.ourself().is_some());
    assert!(mesh.gateway().is_none());

    assert_eq!(fixture.command("/rooms/1", "say", "hi"), Some(PushOutcome::Accepted));
    let reported: Vec<PartInfo> = events
        .lock()
        .iter()
        .filter_map(|body| serde_json::from_str(body).ok())
        .collect();
    assert!(reported.iter().any(|info| info.part_key == PartKey::Extant));
}

#[test]
fn test_meta_uris_route_to_ourself() {
    let (builder, schedule) = EdgeFixture::builder();
    let fixture = EdgeFixture::start(
        builder.config(RuntimeConfig::default().with_meta(true)),
        schedule,
    );
    let mesh = fixture.edge.open_mesh(&Uri::empty());
    let ourself = mesh.ourself().unwrap();
    assert_eq!(ourself.part_key(), PartKey::Meta);
    assert!(same_tier(&mesh.get_part(&Uri::parse("meta:mesh")).unwrap(), &ourself));
    assert!(mesh.get_part(&Uri::parse("/rooms/1")).is_none());
}

struct DeferringView {
    calls: Mutex<Vec<bool>>,
}

impl HttpLaneView for DeferringView {
    fn dispatch_do_respond(&self, request: &HttpRequest, preemptive: bool) -> Respond {
        self.calls.lock().push(preemptive);
        if preemptive {
            Respond::Defer
        } else {
            Respond::Response(HttpResponse::ok(format!("deferred {}", request.uri)))
        }
    }
}

#[derive(Default)]
struct WatchingView {
    responses: Mutex<Vec<u16>>,
}

impl HttpLaneView for WatchingView {
    fn lane_did_respond(&self, response: &HttpResponse) {
        self.responses.lock().push(response.status);
    }
}

#[test]
fn test_http_exchange_resumes_on_stage() {
    let stage = ManualStage::new();
    let lanes: Arc<Mutex<Vec<Arc<HttpLane>>>> = Arc::new(Mutex::new(Vec::new()));
    let registry = lanes.clone();
    let (builder, schedule) = EdgeFixture::builder_on(stage.clone());
    let builder = builder.route("/api/", move |address: &NodeAddress| {
        let node = NodeModel::new(address.node_uri.clone());
        let lane = HttpLane::new(Uri::parse("http"));
        node.open_lane(Uri::parse("http"), lane.clone());
        registry.lock().push(lane);
        node as Arc<dyn NodeBinding>
    });
    let fixture = EdgeFixture::start(builder, schedule);

    let node_uri = Uri::parse("/api/users");
    let node = fixture
        .edge
        .open_mesh(&Uri::empty())
        .open_part(&node_uri)
        .and_then(|part| part.open_host(&Uri::empty()))
        .and_then(|host| host.open_node(&node_uri))
        .unwrap();
    assert!(node.is_started());

    let lane = lanes.lock()[0].clone();
    let deferring = Arc::new(DeferringView { calls: Mutex::new(Vec::new()) });
    let watching = Arc::new(WatchingView::default());
    lane.add_view(deferring.clone());
    lane.add_view(watching.clone());

    let answer = Arc::new(Mutex::new(None));
    let slot = answer.clone();
    lane.request(HttpRequest::get(Uri::parse("/api/users")), move |response| {
        *slot.lock() = Some(response);
    });
    assert!(answer.lock().is_none());
    assert_eq!(*deferring.calls.lock(), vec![true]);

    stage.run_pending();
    let response = answer.lock().clone().unwrap();
    assert_eq!(response.status, 200);
    assert_eq!(response.body, "deferred /api/users".as_bytes());
    assert_eq!(*deferring.calls.lock(), vec![true, false]);
    assert_eq!(*watching.responses.lock(), vec![200]);
}

#[test]
fn test_http_lane_without_views_answers_not_found() {
    let lane = HttpLane::new(Uri::parse("http"));
    let node = NodeModel::new(Uri::parse("/api"));
    node.open_lane(Uri::parse("http"), lane.clone());
    node.start().unwrap();

    let answer = Arc::new(Mutex::new(None));
    let slot = answer.clone();
    lane.request(HttpRequest::get(Uri::parse("/api")), move |response| {
        *slot.lock() = Some(response.status);
    });
    assert_eq!(*answer.lock(), Some(404));
}

#[test]
fn test_probe_kernel_sees_traffic_through_proxies() {
    let said = Arc::new(Mutex::new(Vec::new()));
    let kernel = ProbeKernel::new();
    let (builder, schedule) = EdgeFixture::builder();
    let builder = builder.kernel(kernel.clone()).route("/rooms/", room_factory(said.clone()));
    let fixture = EdgeFixture::start(builder, schedule);

    assert_eq!(fixture.command("/rooms/1", "say", "through"), Some(PushOutcome::Accepted));
    assert_eq!(*said.lock(), vec!["through".to_string()]);
    assert_eq!(kernel.parts.pushes(), 1);
    assert_eq!(kernel.nodes.pushes(), 1);

    let (_link, _) = fixture.downlink("/rooms/1", "say");
    assert_eq!(kernel.parts.uplinks(), 1);
    assert_eq!(kernel.nodes.uplinks(), 1);

    let gateway = fixture.edge.mesh(&Uri::empty()).unwrap().gateway().unwrap();
    assert!(unwrap_part::<PartProxy<ProbePartLayer>>(&*gateway).is_some());
    assert!(unwrap_part::<PartTable>(&*gateway).is_some());
    assert_eq!(kernel.parts.phases(), vec![Phase::Start]);
}

#[test]
fn test_failing_child_does_not_stop_fan_out() {
    let said = Arc::new(Mutex::new(Vec::new()));
    let kernel = ProbeKernel::with_probes(Probe::new(), Probe::failing(Phase::Stop));
    let (builder, schedule) = EdgeFixture::builder();
    let builder = builder.kernel(kernel.clone()).route("/rooms/", room_factory(said));
    let fixture = EdgeFixture::start(builder, schedule);

    fixture.command("/rooms/1", "say", "a");
    fixture.command("/rooms/2", "say", "b");
    let host = fixture.edge.mesh(&Uri::empty()).unwrap().gateway().unwrap().master().unwrap();
    let nodes: Vec<_> = host.nodes().values().cloned().collect();
    assert_eq!(nodes.len(), 2);

    assert!(fixture.edge.stop().is_ok());
    let stops = kernel.nodes.phases().iter().filter(|phase| **phase == Phase::Stop).count();
    assert_eq!(stops, 2);
    assert_eq!(host.tier_state(), TierState::Stopped);
    assert!(nodes.iter().all(|node| node.tier_state() == TierState::Failed));

    fixture.edge.close().unwrap();
    assert!(host.is_closed());
    assert!(nodes.iter().all(|node| node.is_closed()));
}

#[test]
fn test_failed_child_reports_on_fail_log() {
    let said = Arc::new(Mutex::new(Vec::new()));
    let kernel = ProbeKernel::with_probes(Probe::new(), Probe::failing(Phase::Stop));
    let (builder, schedule) = EdgeFixture::builder();
    let builder = builder
        .config(RuntimeConfig::default().with_meta(true))
        .kernel(kernel)
        .route("/rooms/", room_factory(said));
    let fixture = EdgeFixture::start(builder, schedule);

    let (link, failures) = fixture.downlink("meta:mesh", log_lane(LogLevel::Fail));
    assert!(link.is_open());
    fixture.command("/rooms/1", "say", "a");
    let host = fixture.edge.mesh(&Uri::empty()).unwrap().gateway().unwrap().master().unwrap();
    assert!(failures.lock().is_empty());

    assert!(host.stop().is_ok());
    let entries: Vec<LogEntry> = failures
        .lock()
        .iter()
        .filter_map(|body| serde_json::from_str(body).ok())
        .collect();
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].level, LogLevel::Fail);
    assert!(entries[0].message.contains("refused stop"));
    let node = host.get_node(&Uri::parse("/rooms/1")).unwrap();
    assert_eq!(node.tier_state(), TierState::Failed);
}

#[test]
fn test_closed_edge_declines_everything() {
    let (fixture, said) = EdgeFixture::rooms();
    fixture.edge.close().unwrap();
    assert_eq!(
        fixture.command("/rooms/1", "say", "late"),
        Some(PushOutcome::Declined(MeshworkError::LinkClosed))
    );
    assert!(said.lock().is_empty());
    assert!(fixture.edge.meshes().values().all(|mesh: &Arc<dyn MeshBinding>| mesh.is_closed()));
}
