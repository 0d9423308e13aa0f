//! Nodes: addressable containers of lanes

use std::any::TypeId;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::{Arc, Weak};
use std::time::{SystemTime, UNIX_EPOCH};

use parking_lot::RwLock;

use meshwork_core::{
    fan_out, CasCell, LaneAddress, LogEntry, LogLevel, MeshworkError, NodeAddress,
    PartKey, Phase, TierHooks, TierStatus, Uri,
};

use crate::lane::{LaneBinding, LaneContext};
use crate::link::{reject_link, LinkBinding};
use crate::push::PushRequest;
use crate::stage::detached_services;
use crate::table::{close_entry, open_entry, TierMap};
use crate::tier::{log_via, own_capability, tier_lifecycle, Capability, Services, TierBinding, TierContext};

pub type LaneMap = TierMap<dyn LaneBinding>;

/// What a node offers its host
pub trait NodeBinding: TierBinding {
    fn node_uri(&self) -> Uri;

    fn node_context(&self) -> Option<Arc<dyn NodeContext>>;
    fn set_node_context(&self, context: Arc<dyn NodeContext>);
    fn node_wrapper(self: Arc<Self>) -> Arc<dyn NodeBinding>;
    fn unwrap_node(&self, type_id: TypeId) -> Option<Capability>;

    fn lanes(&self) -> Arc<LaneMap>;
    fn get_lane(&self, lane_uri: &Uri) -> Option<Arc<dyn LaneBinding>>;
    fn open_lane(&self, lane_uri: Uri, lane: Arc<dyn LaneBinding>) -> Arc<dyn LaneBinding>;
    fn close_lane(&self, lane_uri: &Uri);

    fn open_uplink(&self, link: Arc<dyn LinkBinding>);
    fn push_up(&self, request: PushRequest);
}

/// What a host provides to its nodes
pub trait NodeContext: TierContext {
    fn node_address(&self) -> NodeAddress;

    /// Outermost proxy above this context, if it is itself a proxy
    fn outer_node(&self) -> Option<Arc<dyn NodeBinding>>;

    fn create_lane(&self, address: &LaneAddress) -> Option<Arc<dyn LaneBinding>>;
    fn inject_lane(&self, address: &LaneAddress, lane: Arc<dyn LaneBinding>) -> Arc<dyn LaneBinding>;
    fn push_down(&self, request: PushRequest);
}

/// Unwrap `node` to concrete type `T`
pub fn unwrap_node<T: Send + Sync + 'static>(node: &dyn NodeBinding) -> Option<Arc<T>> {
    node.unwrap_node(TypeId::of::<T>())
        .and_then(crate::tier::downcast::<T>)
}

/// Address of a lane whose node is not attached to a host
fn detached_address(node_uri: Uri, lane_uri: Uri) -> LaneAddress {
    NodeAddress {
        edge_name: String::new(),
        mesh_uri: Uri::empty(),
        part_key: PartKey::Extant,
        host_uri: Uri::empty(),
        node_uri,
    }
    .lane(lane_uri)
}

/// Node that routes to a table of lanes
pub struct NodeModel {
    node_uri: Uri,
    status: TierStatus,
    context: RwLock<Option<Arc<dyn NodeContext>>>,
    lanes: CasCell<LaneMap>,
    created: u64,
    me: Weak<NodeModel>,
}

impl NodeModel {
    pub fn new(node_uri: Uri) -> Arc<Self> {
        let created = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis() as u64)
            .unwrap_or(0);
        Arc::new_cyclic(|me| NodeModel {
            node_uri,
            status: TierStatus::new(),
            context: RwLock::new(None),
            lanes: CasCell::new(BTreeMap::new()),
            created,
            me: me.clone(),
        })
    }

    /// Creation time in milliseconds since the unix epoch
    pub fn created(&self) -> u64 {
        self.created
    }

    fn log(&self, level: LogLevel, message: &dyn fmt::Display) {
        log_via(self.node_context(), || self.node_uri.to_string(), level, message);
    }

    fn lane_address(&self, lane_uri: Uri) -> LaneAddress {
        match self.node_context() {
            Some(context) => context.node_address().lane(lane_uri),
            None => detached_address(self.node_uri.clone(), lane_uri),
        }
    }

    /// Existing lane, or one created on demand through the context
    fn resolve_lane(&self, lane_uri: &Uri) -> Option<Arc<dyn LaneBinding>> {
        if let Some(lane) = self.get_lane(lane_uri) {
            return Some(lane);
        }
        let context = self.node_context()?;
        let lane = context.create_lane(&self.lane_address(lane_uri.clone()))?;
        Some(self.open_lane(lane_uri.clone(), lane))
    }

    fn wire_lane(&self, lane_uri: &Uri, lane: Arc<dyn LaneBinding>) -> Arc<dyn LaneBinding> {
        let lane = match self.node_context() {
            Some(context) => context.inject_lane(&self.lane_address(lane_uri.clone()), lane),
            None => lane,
        };
        lane.set_lane_context(Arc::new(NodeModelLane {
            node: self.me.clone(),
            lane_uri: lane_uri.clone(),
        }));
        lane
    }
}

impl TierHooks for NodeModel {
    fn propagate(&self, phase: Phase) {
        let lanes = self.lanes.load();
        fan_out(lanes.values(), phase, |child, error| {
            self.log(LogLevel::Debug, &format_args!("lane failed to {phase}"));
            child.did_fail(error);
        });
    }

    fn did_enter(&self, phase: Phase) {
        if phase == Phase::Close {
            self.context.write().take();
        }
    }
}

tier_lifecycle!(NodeModel, status);

impl TierBinding for NodeModel {
    fn did_fail(&self, error: MeshworkError) {
        self.status.fail();
        self.log(LogLevel::Fail, &error);
    }
}

impl NodeBinding for NodeModel {
    fn node_uri(&self) -> Uri {
        self.node_uri.clone()
    }

    fn node_context(&self) -> Option<Arc<dyn NodeContext>> {
        self.context.read().clone()
    }

    fn set_node_context(&self, context: Arc<dyn NodeContext>) {
        *self.context.write() = Some(context);
    }

    fn node_wrapper(self: Arc<Self>) -> Arc<dyn NodeBinding> {
        match self.node_context().and_then(|context| context.outer_node()) {
            Some(outer) => outer,
            None => self,
        }
    }

    fn unwrap_node(&self, type_id: TypeId) -> Option<Capability> {
        own_capability(&self.me, type_id)
    }

    fn lanes(&self) -> Arc<LaneMap> {
        self.lanes.load()
    }

    fn get_lane(&self, lane_uri: &Uri) -> Option<Arc<dyn LaneBinding>> {
        self.lanes.load().get(lane_uri).cloned()
    }

    fn open_lane(&self, lane_uri: Uri, lane: Arc<dyn LaneBinding>) -> Arc<dyn LaneBinding> {
        open_entry(&self.lanes, &lane_uri, lane, &self.status, |lane| {
            self.wire_lane(&lane_uri, lane)
        })
    }

    fn close_lane(&self, lane_uri: &Uri) {
        if let Some(lane) = close_entry(&self.lanes, lane_uri) {
            if let Err(error) = lane.close() {
                self.log(LogLevel::Warn, &error);
            }
        }
    }

    fn open_uplink(&self, link: Arc<dyn LinkBinding>) {
        let lane_uri = link.link_address().lane_uri;
        match self.resolve_lane(&lane_uri) {
            Some(lane) => lane.open_uplink(link),
            None => reject_link(
                &*link,
                MeshworkError::LaneNotFound {
                    node: self.node_uri.clone(),
                    lane: lane_uri,
                },
            ),
        }
    }

    fn push_up(&self, request: PushRequest) {
        match self.resolve_lane(request.lane_uri()) {
            Some(lane) => lane.push_up(request),
            None => {
                let error = MeshworkError::LaneNotFound {
                    node: self.node_uri.clone(),
                    lane: request.lane_uri().clone(),
                };
                request.did_decline(error);
            }
        }
    }
}

/// Context a [`NodeModel`] assigns to each of its lanes
struct NodeModelLane {
    node: Weak<NodeModel>,
    lane_uri: Uri,
}

impl NodeModelLane {
    fn node_context(&self) -> Option<Arc<dyn NodeContext>> {
        self.node.upgrade().and_then(|node| node.node_context())
    }
}

impl TierContext for NodeModelLane {
    fn services(&self) -> Arc<Services> {
        match self.node_context() {
            Some(context) => context.services(),
            None => detached_services(),
        }
    }

    fn origin(&self) -> String {
        match self.node_context() {
            Some(context) => format!("{}#{}", context.node_address().node_uri, self.lane_uri),
            None => self.lane_uri.to_string(),
        }
    }

    fn record(&self, entry: LogEntry) {
        match self.node_context() {
            Some(context) => context.record(entry),
            None => entry.emit(),
        }
    }
}

impl LaneContext for NodeModelLane {
    fn lane_address(&self) -> LaneAddress {
        match self.node.upgrade() {
            Some(node) => node.lane_address(self.lane_uri.clone()),
            None => detached_address(Uri::empty(), self.lane_uri.clone()),
        }
    }

    fn push_down(&self, request: PushRequest) {
        match self.node_context() {
            Some(context) => context.push_down(request),
            None => request.did_decline(MeshworkError::LinkClosed),
        }
    }
}
