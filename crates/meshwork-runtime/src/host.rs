//! Hosts: network endpoints within a part, owning nodes

use std::any::TypeId;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::RwLock;

use meshwork_core::{
    fan_out, CasCell, Credentials, HostAddress, Identity, LaneAddress, LogEntry, LogLevel,
    MeshworkError, NodeAddress, PartKey, Phase, PolicyDirective, TierHooks, TierStatus, Uri,
};

use crate::lane::LaneBinding;
use crate::link::{reject_link, LinkBinding};
use crate::node::{NodeBinding, NodeContext};
use crate::push::PushRequest;
use crate::stage::detached_services;
use crate::table::{close_entry, open_entry, TierMap};
use crate::tier::{log_via, own_capability, tier_lifecycle, Capability, Services, TierBinding, TierContext};

pub type NodeMap = TierMap<dyn NodeBinding>;

/// What a host offers its part
pub trait HostBinding: TierBinding {
    fn host_uri(&self) -> Uri;

    fn host_context(&self) -> Option<Arc<dyn HostContext>>;
    fn set_host_context(&self, context: Arc<dyn HostContext>);
    fn host_wrapper(self: Arc<Self>) -> Arc<dyn HostBinding>;
    fn unwrap_host(&self, type_id: TypeId) -> Option<Capability>;

    fn is_connected(&self) -> bool;
    fn is_remote(&self) -> bool;
    fn is_secure(&self) -> bool;

    fn nodes(&self) -> Arc<NodeMap>;
    fn get_node(&self, node_uri: &Uri) -> Option<Arc<dyn NodeBinding>>;

    /// Existing node, or one created on demand through the context
    fn open_node(&self, node_uri: &Uri) -> Option<Arc<dyn NodeBinding>>;
    fn add_node(&self, node_uri: Uri, node: Arc<dyn NodeBinding>) -> Arc<dyn NodeBinding>;
    fn close_node(&self, node_uri: &Uri);

    fn open_uplink(&self, link: Arc<dyn LinkBinding>);
    fn push_up(&self, request: PushRequest);

    fn did_connect(&self);
    fn did_disconnect(&self);
}

/// What a part provides to its hosts
pub trait HostContext: TierContext {
    fn host_address(&self) -> HostAddress;

    /// Outermost proxy above this context, if it is itself a proxy
    fn outer_host(&self) -> Option<Arc<dyn HostBinding>>;

    fn create_node(&self, address: &NodeAddress) -> Option<Arc<dyn NodeBinding>>;
    fn inject_node(&self, address: &NodeAddress, node: Arc<dyn NodeBinding>) -> Arc<dyn NodeBinding>;
    fn create_lane(&self, address: &LaneAddress) -> Option<Arc<dyn LaneBinding>>;
    fn inject_lane(&self, address: &LaneAddress, lane: Arc<dyn LaneBinding>) -> Arc<dyn LaneBinding>;

    fn push_down(&self, request: PushRequest);
    fn authenticate(&self, credentials: &Credentials) -> PolicyDirective<Identity>;

    fn host_did_connect(&self);
    fn host_did_disconnect(&self);
}

/// Unwrap `host` to concrete type `T`
pub fn unwrap_host<T: Send + Sync + 'static>(host: &dyn HostBinding) -> Option<Arc<T>> {
    host.unwrap_host(TypeId::of::<T>())
        .and_then(crate::tier::downcast::<T>)
}

/// Address of a host that is not attached to a part
pub(crate) fn detached_host_address(host_uri: Uri) -> HostAddress {
    HostAddress {
        edge_name: String::new(),
        mesh_uri: Uri::empty(),
        part_key: PartKey::Extant,
        host_uri,
    }
}

/// Local host routing to a table of nodes
pub struct HostTable {
    host_uri: Uri,
    status: TierStatus,
    context: RwLock<Option<Arc<dyn HostContext>>>,
    nodes: CasCell<NodeMap>,
    connected: AtomicBool,
    me: Weak<HostTable>,
}

impl HostTable {
    pub fn new(host_uri: Uri) -> Arc<Self> {
        Arc::new_cyclic(|me| HostTable {
            host_uri,
            status: TierStatus::new(),
            context: RwLock::new(None),
            nodes: CasCell::new(BTreeMap::new()),
            connected: AtomicBool::new(true),
            me: me.clone(),
        })
    }

    fn log(&self, level: LogLevel, message: &dyn fmt::Display) {
        log_via(self.host_context(), || self.host_uri.to_string(), level, message);
    }

    fn node_address(&self, node_uri: Uri) -> NodeAddress {
        match self.host_context() {
            Some(context) => context.host_address().node(node_uri),
            None => detached_host_address(self.host_uri.clone()).node(node_uri),
        }
    }

    fn wire_node(&self, node_uri: &Uri, node: Arc<dyn NodeBinding>) -> Arc<dyn NodeBinding> {
        let node = match self.host_context() {
            Some(context) => context.inject_node(&self.node_address(node_uri.clone()), node),
            None => node,
        };
        node.set_node_context(Arc::new(HostTableNode {
            host: self.me.clone(),
            node_uri: node_uri.clone(),
        }));
        node
    }

    fn resolve_node(&self, node_uri: &Uri) -> Option<Arc<dyn NodeBinding>> {
        self.get_node(node_uri).or_else(|| self.open_node(node_uri))
    }
}

impl TierHooks for HostTable {
    fn propagate(&self, phase: Phase) {
        let nodes = self.nodes.load();
        fan_out(nodes.values(), phase, |child, error| {
            self.log(LogLevel::Debug, &format_args!("node failed to {phase}"));
            child.did_fail(error);
        });
    }

    fn did_enter(&self, phase: Phase) {
        if phase == Phase::Close {
            self.context.write().take();
        }
    }
}

tier_lifecycle!(HostTable, status);

impl TierBinding for HostTable {
    fn did_fail(&self, error: MeshworkError) {
        self.status.fail();
        self.log(LogLevel::Fail, &error);
    }
}

impl HostBinding for HostTable {
    fn host_uri(&self) -> Uri {
        self.host_uri.clone()
    }

    fn host_context(&self) -> Option<Arc<dyn HostContext>> {
        self.context.read().clone()
    }

    fn set_host_context(&self, context: Arc<dyn HostContext>) {
        *self.context.write() = Some(context);
    }

    fn host_wrapper(self: Arc<Self>) -> Arc<dyn HostBinding> {
        match self.host_context().and_then(|context| context.outer_host()) {
            Some(outer) => outer,
            None => self,
        }
    }

    fn unwrap_host(&self, type_id: TypeId) -> Option<Capability> {
        own_capability(&self.me, type_id)
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Acquire)
    }

    fn is_remote(&self) -> bool {
        false
    }

    fn is_secure(&self) -> bool {
        true
    }

    fn nodes(&self) -> Arc<NodeMap> {
        self.nodes.load()
    }

    fn get_node(&self, node_uri: &Uri) -> Option<Arc<dyn NodeBinding>> {
        self.nodes.load().get(node_uri).cloned()
    }

    fn open_node(&self, node_uri: &Uri) -> Option<Arc<dyn NodeBinding>> {
        if let Some(node) = self.get_node(node_uri) {
            return Some(node);
        }
        let context = self.host_context()?;
        let node = context.create_node(&self.node_address(node_uri.clone()))?;
        Some(self.add_node(node_uri.clone(), node))
    }

    fn add_node(&self, node_uri: Uri, node: Arc<dyn NodeBinding>) -> Arc<dyn NodeBinding> {
        open_entry(&self.nodes, &node_uri, node, &self.status, |node| {
            self.wire_node(&node_uri, node)
        })
    }

    fn close_node(&self, node_uri: &Uri) {
        if let Some(node) = close_entry(&self.nodes, node_uri) {
            if let Err(error) = node.close() {
                self.log(LogLevel::Warn, &error);
            }
        }
    }

    fn open_uplink(&self, link: Arc<dyn LinkBinding>) {
        let node_uri = link.link_address().node_uri;
        match self.resolve_node(&node_uri) {
            Some(node) => node.open_uplink(link),
            None => reject_link(&*link, MeshworkError::NodeNotFound(node_uri)),
        }
    }

    fn push_up(&self, request: PushRequest) {
        match self.resolve_node(request.node_uri()) {
            Some(node) => node.push_up(request),
            None => {
                let error = MeshworkError::NodeNotFound(request.node_uri().clone());
                request.did_decline(error);
            }
        }
    }

    fn did_connect(&self) {
        self.connected.store(true, Ordering::Release);
        if let Some(context) = self.host_context() {
            context.host_did_connect();
        }
    }

    fn did_disconnect(&self) {
        self.connected.store(false, Ordering::Release);
        if let Some(context) = self.host_context() {
            context.host_did_disconnect();
        }
    }
}

/// Context a [`HostTable`] assigns to each of its nodes
struct HostTableNode {
    host: Weak<HostTable>,
    node_uri: Uri,
}

impl HostTableNode {
    fn host_context(&self) -> Option<Arc<dyn HostContext>> {
        self.host.upgrade().and_then(|host| host.host_context())
    }
}

impl TierContext for HostTableNode {
    fn services(&self) -> Arc<Services> {
        match self.host_context() {
            Some(context) => context.services(),
            None => detached_services(),
        }
    }

    fn origin(&self) -> String {
        self.node_uri.to_string()
    }

    fn record(&self, entry: LogEntry) {
        match self.host_context() {
            Some(context) => context.record(entry),
            None => entry.emit(),
        }
    }
}

impl NodeContext for HostTableNode {
    fn node_address(&self) -> NodeAddress {
        match self.host.upgrade() {
            Some(host) => host.node_address(self.node_uri.clone()),
            None => detached_host_address(Uri::empty()).node(self.node_uri.clone()),
        }
    }

    fn outer_node(&self) -> Option<Arc<dyn NodeBinding>> {
        None
    }

    fn create_lane(&self, address: &LaneAddress) -> Option<Arc<dyn LaneBinding>> {
        self.host_context()?.create_lane(address)
    }

    fn inject_lane(&self, address: &LaneAddress, lane: Arc<dyn LaneBinding>) -> Arc<dyn LaneBinding> {
        match self.host_context() {
            Some(context) => context.inject_lane(address, lane),
            None => lane,
        }
    }

    fn push_down(&self, request: PushRequest) {
        match self.host_context() {
            Some(context) => context.push_down(request),
            None => request.did_decline(MeshworkError::LinkClosed),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lane::{CommandLane, SupplyLane};
    use crate::node::NodeModel;
    use crate::push::PushOutcome;
    use meshwork_core::{Envelope, Lifecycle};
    use std::sync::Mutex;

    fn outcome_of(host: &HostTable, node: &str, lane: &str) -> PushOutcome {
        let outcome = Arc::new(Mutex::new(None));
        let sink = outcome.clone();
        let request = PushRequest::new(Envelope::command(Uri::parse(node), Uri::parse(lane), "x"))
            .on_complete(move |result| *sink.lock().unwrap() = Some(result));
        host.push_up(request);
        let result = outcome.lock().unwrap().take();
        result.unwrap()
    }

    #[test]
    fn test_push_to_missing_node_declines() {
        let host = HostTable::new(Uri::empty());
        assert_eq!(
            outcome_of(&host, "/missing", "lane"),
            PushOutcome::Declined(MeshworkError::NodeNotFound(Uri::parse("/missing")))
        );
    }

    #[test]
    fn test_push_routes_to_started_lane() {
        let host = HostTable::new(Uri::empty());
        let node = host.add_node(Uri::parse("/room"), NodeModel::new(Uri::parse("/room")));
        node.open_lane(Uri::parse("chat"), CommandLane::new(Uri::parse("chat"), |_| {}));
        node.open_lane(Uri::parse("feed"), SupplyLane::new(Uri::parse("feed")));
        host.start().unwrap();

        assert!(node.is_started());
        assert_eq!(outcome_of(&host, "/room", "chat"), PushOutcome::Accepted);
        assert!(matches!(
            outcome_of(&host, "/room", "feed"),
            PushOutcome::Declined(MeshworkError::Unsupported(_))
        ));
    }

    #[test]
    fn test_close_node_closes_it() {
        let host = HostTable::new(Uri::empty());
        host.open().unwrap();
        let node = host.add_node(Uri::parse("/room"), NodeModel::new(Uri::parse("/room")));
        assert!(node.is_opened());
        host.close_node(&Uri::parse("/room"));
        assert!(node.is_closed());
        assert!(host.get_node(&Uri::parse("/room")).is_none());
    }
}
