//! Edge fixtures wired to the deterministic clock

use std::sync::Arc;

use parking_lot::Mutex;

use meshwork_core::{Envelope, Lifecycle, LinkAddress, NodeAddress, Stage, Uri};
use meshwork_runtime::{
    CommandLane, Edge, EdgeBuilder, InlineStage, LocalDownlink, NodeBinding, NodeModel, PushOutcome,
    PushRequest, RuntimeConfig,
};

use crate::clock::ManualSchedule;

/// Builder-side helpers shared by scenarios
pub struct EdgeFixture {
    pub edge: Arc<Edge>,
    pub schedule: Arc<ManualSchedule>,
}

impl EdgeFixture {
    /// Edge with an inline stage, a manual schedule and no meta node
    pub fn builder() -> (EdgeBuilder, Arc<ManualSchedule>) {
        Self::builder_on(Arc::new(InlineStage))
    }

    pub fn builder_on(stage: Arc<dyn Stage>) -> (EdgeBuilder, Arc<ManualSchedule>) {
        let schedule = ManualSchedule::new();
        let builder = Edge::builder()
            .config(RuntimeConfig::default().with_edge_name("fixture").with_meta(false))
            .stage(stage)
            .schedule(schedule.clone());
        (builder, schedule)
    }

    pub fn start(builder: EdgeBuilder, schedule: Arc<ManualSchedule>) -> Self {
        let edge = builder.build();
        if let Err(error) = edge.start() {
            tracing::error!(%error, "fixture edge failed to start");
        }
        EdgeFixture { edge, schedule }
    }

    /// Started edge serving `/rooms/*` nodes whose `say` lane records bodies
    pub fn rooms() -> (Self, Arc<Mutex<Vec<String>>>) {
        let said = Arc::new(Mutex::new(Vec::new()));
        let (builder, schedule) = Self::builder();
        let builder = builder.route("/rooms/", room_factory(said.clone()));
        (Self::start(builder, schedule), said)
    }

    /// Push and report the outcome, if the push completed synchronously
    pub fn push(&self, request: PushRequest) -> Option<PushOutcome> {
        push_outcome(|request| self.edge.push_up(request), request)
    }

    pub fn command(&self, node: &str, lane: &str, body: &str) -> Option<PushOutcome> {
        self.push(PushRequest::new(Envelope::command(Uri::parse(node), Uri::parse(lane), body.to_string())))
    }

    /// Open a local downlink through the edge, collecting event bodies
    pub fn downlink(&self, node: &str, lane: &str) -> (Arc<LocalDownlink>, Arc<Mutex<Vec<String>>>) {
        let events = Arc::new(Mutex::new(Vec::new()));
        let sink = events.clone();
        let link = LocalDownlink::new(LinkAddress::new(Uri::parse(node), Uri::parse(lane)), move |envelope| {
            sink.lock().push(String::from_utf8_lossy(&envelope.body).into_owned());
        });
        self.edge.open_uplink(link.clone());
        (link, events)
    }
}

/// Node factory for rooms with a recording `say` command lane
pub fn room_factory(
    said: Arc<Mutex<Vec<String>>>,
) -> impl Fn(&NodeAddress) -> Arc<dyn NodeBinding> + Send + Sync + 'static {
    move |address: &NodeAddress| {
        let node = NodeModel::new(address.node_uri.clone());
        let said = said.clone();
        node.open_lane(
            Uri::parse("say"),
            CommandLane::new(Uri::parse("say"), move |envelope: &Envelope| {
                said.lock().push(String::from_utf8_lossy(&envelope.body).into_owned());
            }),
        );
        node as Arc<dyn NodeBinding>
    }
}

/// Run `push` on `request` and capture a synchronous completion
pub fn push_outcome(push: impl FnOnce(PushRequest), request: PushRequest) -> Option<PushOutcome> {
    let outcome = Arc::new(Mutex::new(None));
    let slot = outcome.clone();
    push(request.on_complete(move |result| *slot.lock() = Some(result)));
    let result = outcome.lock().clone();
    result
}
