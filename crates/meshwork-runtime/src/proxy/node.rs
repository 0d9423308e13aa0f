//! Node proxy

use std::any::TypeId;
use std::sync::{Arc, Weak};

use parking_lot::RwLock;

use meshwork_core::{
    LaneAddress, LogEntry, MeshworkError, MeshworkResult, NodeAddress, PartKey, Phase, Uri,
};

use crate::lane::LaneBinding;
use crate::link::LinkBinding;
use crate::node::{LaneMap, NodeBinding, NodeContext};
use crate::proxy::proxy_lifecycle;
use crate::push::PushRequest;
use crate::stage::detached_services;
use crate::tier::{own_capability, Capability, Services, TierBinding, TierContext};

/// Calls a [`NodeProxy`] lets its layer intercept
pub trait NodeLayer: Send + Sync + 'static {
    fn transition(&self, node: &dyn NodeBinding, phase: Phase) -> MeshworkResult<()> {
        phase.drive(node)
    }

    fn open_uplink(&self, node: &dyn NodeBinding, link: Arc<dyn LinkBinding>) {
        node.open_uplink(link);
    }

    fn push_up(&self, node: &dyn NodeBinding, request: PushRequest) {
        node.push_up(request);
    }

    fn record(&self, context: &dyn NodeContext, entry: LogEntry) {
        context.record(entry);
    }
}

impl NodeLayer for () {}

pub struct NodeProxy<L: NodeLayer = ()> {
    inner: Arc<dyn NodeBinding>,
    layer: L,
    context: RwLock<Option<Arc<dyn NodeContext>>>,
    me: Weak<NodeProxy<L>>,
}

impl<L: NodeLayer> NodeProxy<L> {
    pub fn new(inner: Arc<dyn NodeBinding>, layer: L) -> Arc<Self> {
        Arc::new_cyclic(|me| NodeProxy {
            inner,
            layer,
            context: RwLock::new(None),
            me: me.clone(),
        })
    }

    pub fn inner(&self) -> &Arc<dyn NodeBinding> {
        &self.inner
    }

    pub fn layer(&self) -> &L {
        &self.layer
    }
}

impl NodeProxy {
    pub fn transparent(inner: Arc<dyn NodeBinding>) -> Arc<Self> {
        Self::new(inner, ())
    }
}

proxy_lifecycle!(NodeProxy, NodeLayer);

impl<L: NodeLayer> TierBinding for NodeProxy<L> {
    fn did_fail(&self, error: MeshworkError) {
        self.inner.did_fail(error);
    }
}

impl<L: NodeLayer> NodeBinding for NodeProxy<L> {
    fn node_uri(&self) -> Uri {
        self.inner.node_uri()
    }

    fn node_context(&self) -> Option<Arc<dyn NodeContext>> {
        self.context.read().clone()
    }

    fn set_node_context(&self, context: Arc<dyn NodeContext>) {
        *self.context.write() = Some(context);
        if let Some(me) = self.me.upgrade() {
            self.inner.set_node_context(me);
        }
    }

    fn node_wrapper(self: Arc<Self>) -> Arc<dyn NodeBinding> {
        match self.node_context().and_then(|context| context.outer_node()) {
            Some(outer) => outer,
            None => self,
        }
    }

    fn unwrap_node(&self, type_id: TypeId) -> Option<Capability> {
        own_capability(&self.me, type_id).or_else(|| self.inner.unwrap_node(type_id))
    }

    fn lanes(&self) -> Arc<LaneMap> {
        self.inner.lanes()
    }

    fn get_lane(&self, lane_uri: &Uri) -> Option<Arc<dyn LaneBinding>> {
        self.inner.get_lane(lane_uri)
    }

    fn open_lane(&self, lane_uri: Uri, lane: Arc<dyn LaneBinding>) -> Arc<dyn LaneBinding> {
        self.inner.open_lane(lane_uri, lane)
    }

    fn close_lane(&self, lane_uri: &Uri) {
        self.inner.close_lane(lane_uri);
    }

    fn open_uplink(&self, link: Arc<dyn LinkBinding>) {
        self.layer.open_uplink(&*self.inner, link);
    }

    fn push_up(&self, request: PushRequest) {
        self.layer.push_up(&*self.inner, request);
    }
}

impl<L: NodeLayer> TierContext for NodeProxy<L> {
    fn services(&self) -> Arc<Services> {
        match self.node_context() {
            Some(context) => context.services(),
            None => detached_services(),
        }
    }

    fn origin(&self) -> String {
        match self.node_context() {
            Some(context) => context.origin(),
            None => self.inner.node_uri().to_string(),
        }
    }

    fn record(&self, entry: LogEntry) {
        match self.node_context() {
            Some(context) => self.layer.record(&*context, entry),
            None => entry.emit(),
        }
    }
}

impl<L: NodeLayer> NodeContext for NodeProxy<L> {
    fn node_address(&self) -> NodeAddress {
        match self.node_context() {
            Some(context) => context.node_address(),
            None => NodeAddress {
                edge_name: String::new(),
                mesh_uri: Uri::empty(),
                part_key: PartKey::Extant,
                host_uri: Uri::empty(),
                node_uri: self.inner.node_uri(),
            },
        }
    }

    fn outer_node(&self) -> Option<Arc<dyn NodeBinding>> {
        self.node_context()
            .and_then(|context| context.outer_node())
            .or_else(|| self.me.upgrade().map(|me| me as Arc<dyn NodeBinding>))
    }

    fn create_lane(&self, address: &LaneAddress) -> Option<Arc<dyn LaneBinding>> {
        self.node_context()?.create_lane(address)
    }

    fn inject_lane(&self, address: &LaneAddress, lane: Arc<dyn LaneBinding>) -> Arc<dyn LaneBinding> {
        match self.node_context() {
            Some(context) => context.inject_lane(address, lane),
            None => lane,
        }
    }

    fn push_down(&self, request: PushRequest) {
        match self.node_context() {
            Some(context) => context.push_down(request),
            None => request.did_decline(MeshworkError::LinkClosed),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lane::CommandLane;
    use crate::node::{unwrap_node, NodeModel};
    use crate::push::PushOutcome;
    use meshwork_core::{Envelope, Lifecycle};
    use parking_lot::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingLayer {
        pushes: AtomicUsize,
    }

    impl NodeLayer for CountingLayer {
        fn push_up(&self, node: &dyn NodeBinding, request: PushRequest) {
            self.pushes.fetch_add(1, Ordering::Relaxed);
            node.push_up(request);
        }
    }

    #[test]
    fn test_layer_intercepts_push() {
        let model = NodeModel::new(Uri::parse("/n"));
        let proxy = NodeProxy::new(model.clone(), CountingLayer { pushes: AtomicUsize::new(0) });
        proxy.open_lane(Uri::parse("cmd"), CommandLane::new(Uri::parse("cmd"), |_: &Envelope| {}));
        proxy.start().unwrap();
        assert!(model.is_started());

        let outcome = Arc::new(Mutex::new(None));
        let seen = outcome.clone();
        proxy.push_up(
            PushRequest::new(Envelope::command(Uri::parse("/n"), Uri::parse("cmd"), "go"))
                .on_complete(move |result| *seen.lock() = Some(result)),
        );

        assert_eq!(*outcome.lock(), Some(PushOutcome::Accepted));
        assert_eq!(proxy.layer().pushes.load(Ordering::Relaxed), 1);
        assert!(unwrap_node::<NodeProxy<CountingLayer>>(&*proxy).is_some());
        assert!(unwrap_node::<NodeModel>(&*proxy).is_some());
    }

    #[test]
    fn test_detached_proxy_address_names_node() {
        let proxy = NodeProxy::transparent(NodeModel::new(Uri::parse("/n")));
        assert_eq!(proxy.node_address().node_uri, Uri::parse("/n"));
        assert!(proxy.outer_node().is_some());
    }
}
