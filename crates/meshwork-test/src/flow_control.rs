//! Randomized credit traffic through traced links on a queueing stage

use std::sync::Arc;

use parking_lot::Mutex;
use proptest::prelude::*;

use meshwork_core::{Envelope, LinkAddress, NodeAddress, Uri};
use meshwork_runtime::{CommandLane, LinkProxy, LocalDownlink, NodeBinding, NodeModel, SupplyLane};

use crate::clock::ManualStage;
use crate::fixture::EdgeFixture;
use crate::probe::{FlowEvent, ProbeLink, ProbeLinkLayer};

#[derive(Clone, Debug)]
enum FlowOp {
    Command,
    Supply,
    Step,
}

fn flow_op() -> impl Strategy<Value = FlowOp> {
    prop_oneof![
        1 => Just(FlowOp::Command),
        1 => Just(FlowOp::Supply),
        2 => Just(FlowOp::Step),
    ]
}

/// One downlink wrapped in a traced proxy, with the bodies it received
struct TracedLink {
    link: Arc<LocalDownlink>,
    trace: Arc<ProbeLink>,
    events: Arc<Mutex<Vec<String>>>,
}

impl TracedLink {
    fn open(fixture: &EdgeFixture, node: &str, lane: &str) -> Self {
        let events = Arc::new(Mutex::new(Vec::new()));
        let sink = events.clone();
        let address = LinkAddress::new(Uri::parse(node), Uri::parse(lane));
        let link = LocalDownlink::new(address, move |envelope: Envelope| {
            sink.lock().push(String::from_utf8_lossy(&envelope.body).into_owned());
        });
        let trace = ProbeLink::new();
        fixture
            .edge
            .open_uplink(LinkProxy::new(link.clone(), ProbeLinkLayer(trace.clone())));
        TracedLink { link, trace, events }
    }

    fn downs(&self) -> Vec<String> {
        self.trace
            .events()
            .into_iter()
            .filter_map(|event| match event {
                FlowEvent::Down(body) => Some(body),
                _ => None,
            })
            .collect()
    }

    fn ups(&self) -> Vec<String> {
        self.trace
            .events()
            .into_iter()
            .filter_map(|event| match event {
                FlowEvent::Up(body) => Some(body),
                _ => None,
            })
            .collect()
    }
}

/// Replay `events`, requiring each push or skip to consume an outstanding
/// pull in its direction; returns the grants still outstanding
fn unmatched_pulls(events: &[FlowEvent]) -> Result<(usize, usize), String> {
    let (mut down, mut up) = (0usize, 0usize);
    for (index, event) in events.iter().enumerate() {
        match event {
            FlowEvent::PullDown => down += 1,
            FlowEvent::PullUp => up += 1,
            FlowEvent::Down(_) | FlowEvent::SkipDown => {
                down = down
                    .checked_sub(1)
                    .ok_or_else(|| format!("{event:?} at {index} without a down pull"))?;
            }
            FlowEvent::Up(_) | FlowEvent::SkipUp => {
                up = up
                    .checked_sub(1)
                    .ok_or_else(|| format!("{event:?} at {index} without an up pull"))?;
            }
        }
        if down > 1 || up > 1 {
            return Err(format!("pulls stacked at {index}"));
        }
    }
    Ok((down, up))
}

type FeedSlot = Arc<Mutex<Option<Arc<SupplyLane>>>>;

/// Edge on `stage` serving `/flow/*` nodes with a recording `say` command
/// lane and a `feed` supply lane; the slot holds the last `feed` created
fn flow_fixture(stage: Arc<ManualStage>) -> (EdgeFixture, FeedSlot, Arc<Mutex<Vec<String>>>) {
    let said = Arc::new(Mutex::new(Vec::new()));
    let slot: FeedSlot = Arc::new(Mutex::new(None));
    let (builder, schedule) = EdgeFixture::builder_on(stage);
    let recorder = said.clone();
    let registry = slot.clone();
    let builder = builder.route("/flow/", move |address: &NodeAddress| {
        let node = NodeModel::new(address.node_uri.clone());
        let recorder = recorder.clone();
        node.open_lane(
            Uri::parse("say"),
            CommandLane::new(Uri::parse("say"), move |envelope: &Envelope| {
                recorder.lock().push(String::from_utf8_lossy(&envelope.body).into_owned());
            }),
        );
        let feed = SupplyLane::new(Uri::parse("feed"));
        node.open_lane(Uri::parse("feed"), feed.clone());
        *registry.lock() = Some(feed);
        node as Arc<dyn NodeBinding>
    });
    (EdgeFixture::start(builder, schedule), slot, said)
}

#[test]
fn test_queued_commands_wait_for_the_stage() {
    let stage = ManualStage::new();
    let (fixture, _, said) = flow_fixture(stage.clone());
    let traced = TracedLink::open(&fixture, "/flow/1", "say");
    assert!(traced.link.is_open());

    traced.link.command("one");
    traced.link.command("two");
    assert!(said.lock().is_empty());
    assert_eq!(traced.trace.events(), Vec::<FlowEvent>::new());

    stage.run_pending();
    assert_eq!(*said.lock(), vec!["one".to_string(), "two".to_string()]);
    assert_eq!(*traced.events.lock(), vec!["one".to_string(), "two".to_string()]);
    assert_eq!(unmatched_pulls(&traced.trace.events()), Ok((0, 0)));
}

proptest! {
    #[test]
    fn test_random_traffic_respects_credit(ops in proptest::collection::vec(flow_op(), 1..64)) {
        let stage = ManualStage::new();
        let (fixture, slot, said) = flow_fixture(stage.clone());
        let commands = TracedLink::open(&fixture, "/flow/1", "say");
        let supply = TracedLink::open(&fixture, "/flow/1", "feed");
        prop_assert!(commands.link.is_open());
        prop_assert!(supply.link.is_open());
        let feed = slot.lock().clone().unwrap();

        let mut sent = Vec::new();
        let mut supplied = Vec::new();
        for op in ops {
            match op {
                FlowOp::Command => {
                    let body = format!("c{}", sent.len());
                    commands.link.command(body.clone());
                    sent.push(body);
                }
                FlowOp::Supply => {
                    let body = format!("s{}", supplied.len());
                    feed.push(body.clone());
                    supplied.push(body);
                }
                FlowOp::Step => {
                    stage.run_next();
                }
            }
            for traced in [&commands, &supply] {
                let checked = unmatched_pulls(&traced.trace.events());
                prop_assert!(checked.is_ok(), "{:?}", checked);
            }
        }

        stage.run_pending();
        prop_assert_eq!(stage.pending(), 0);
        prop_assert_eq!(&*said.lock(), &sent);
        prop_assert_eq!(commands.ups(), sent.clone());
        prop_assert_eq!(commands.downs(), sent.clone());
        prop_assert_eq!(&*commands.events.lock(), &sent);
        prop_assert_eq!(supply.downs(), supplied.clone());
        prop_assert_eq!(&*supply.events.lock(), &supplied);
        prop_assert_eq!(feed.dropped(), 0);
        for traced in [&commands, &supply] {
            prop_assert_eq!(unmatched_pulls(&traced.trace.events()), Ok((0, 0)));
        }
    }
}
