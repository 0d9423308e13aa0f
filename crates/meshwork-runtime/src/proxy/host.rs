//! Host proxy

use std::any::TypeId;
use std::sync::{Arc, Weak};

use parking_lot::RwLock;

use meshwork_core::{
    Credentials, HostAddress, Identity, LaneAddress, LogEntry, MeshworkError, MeshworkResult,
    NodeAddress, Phase, PolicyDirective, Uri,
};

use crate::host::{detached_host_address, HostBinding, HostContext, NodeMap};
use crate::lane::LaneBinding;
use crate::link::LinkBinding;
use crate::node::NodeBinding;
use crate::proxy::proxy_lifecycle;
use crate::push::PushRequest;
use crate::stage::detached_services;
use crate::tier::{own_capability, Capability, Services, TierBinding, TierContext};

/// Calls a [`HostProxy`] lets its layer intercept
///
/// Routing hooks also receive the proxy's own context, when assigned, so a
/// layer can consult the part above it.
pub trait HostLayer: Send + Sync + 'static {
    fn transition(&self, host: &dyn HostBinding, phase: Phase) -> MeshworkResult<()> {
        phase.drive(host)
    }

    fn open_uplink(
        &self,
        host: &dyn HostBinding,
        _context: Option<Arc<dyn HostContext>>,
        link: Arc<dyn LinkBinding>,
    ) {
        host.open_uplink(link);
    }

    fn push_up(
        &self,
        host: &dyn HostBinding,
        _context: Option<Arc<dyn HostContext>>,
        request: PushRequest,
    ) {
        host.push_up(request);
    }

    fn record(&self, context: &dyn HostContext, entry: LogEntry) {
        context.record(entry);
    }
}

impl HostLayer for () {}

pub struct HostProxy<L: HostLayer = ()> {
    inner: Arc<dyn HostBinding>,
    layer: L,
    context: RwLock<Option<Arc<dyn HostContext>>>,
    me: Weak<HostProxy<L>>,
}

impl<L: HostLayer> HostProxy<L> {
    pub fn new(inner: Arc<dyn HostBinding>, layer: L) -> Arc<Self> {
        Arc::new_cyclic(|me| HostProxy {
            inner,
            layer,
            context: RwLock::new(None),
            me: me.clone(),
        })
    }

    pub fn inner(&self) -> &Arc<dyn HostBinding> {
        &self.inner
    }

    pub fn layer(&self) -> &L {
        &self.layer
    }
}

impl HostProxy {
    pub fn transparent(inner: Arc<dyn HostBinding>) -> Arc<Self> {
        Self::new(inner, ())
    }
}

proxy_lifecycle!(HostProxy, HostLayer);

impl<L: HostLayer> TierBinding for HostProxy<L> {
    fn did_fail(&self, error: MeshworkError) {
        self.inner.did_fail(error);
    }
}

impl<L: HostLayer> HostBinding for HostProxy<L> {
    fn host_uri(&self) -> Uri {
        self.inner.host_uri()
    }

    fn host_context(&self) -> Option<Arc<dyn HostContext>> {
        self.context.read().clone()
    }

    fn set_host_context(&self, context: Arc<dyn HostContext>) {
        *self.context.write() = Some(context);
        if let Some(me) = self.me.upgrade() {
            self.inner.set_host_context(me);
        }
    }

    fn host_wrapper(self: Arc<Self>) -> Arc<dyn HostBinding> {
        match self.host_context().and_then(|context| context.outer_host()) {
            Some(outer) => outer,
            None => self,
        }
    }

    fn unwrap_host(&self, type_id: TypeId) -> Option<Capability> {
        own_capability(&self.me, type_id).or_else(|| self.inner.unwrap_host(type_id))
    }

    fn is_connected(&self) -> bool {
        self.inner.is_connected()
    }

    fn is_remote(&self) -> bool {
        self.inner.is_remote()
    }

    fn is_secure(&self) -> bool {
        self.inner.is_secure()
    }

    fn nodes(&self) -> Arc<NodeMap> {
        self.inner.nodes()
    }

    fn get_node(&self, node_uri: &Uri) -> Option<Arc<dyn NodeBinding>> {
        self.inner.get_node(node_uri)
    }

    fn open_node(&self, node_uri: &Uri) -> Option<Arc<dyn NodeBinding>> {
        self.inner.open_node(node_uri)
    }

    fn add_node(&self, node_uri: Uri, node: Arc<dyn NodeBinding>) -> Arc<dyn NodeBinding> {
        self.inner.add_node(node_uri, node)
    }

    fn close_node(&self, node_uri: &Uri) {
        self.inner.close_node(node_uri);
    }

    fn open_uplink(&self, link: Arc<dyn LinkBinding>) {
        self.layer.open_uplink(&*self.inner, self.host_context(), link);
    }

    fn push_up(&self, request: PushRequest) {
        self.layer.push_up(&*self.inner, self.host_context(), request);
    }

    fn did_connect(&self) {
        self.inner.did_connect();
    }

    fn did_disconnect(&self) {
        self.inner.did_disconnect();
    }
}

impl<L: HostLayer> TierContext for HostProxy<L> {
    fn services(&self) -> Arc<Services> {
        match self.host_context() {
            Some(context) => context.services(),
            None => detached_services(),
        }
    }

    fn origin(&self) -> String {
        match self.host_context() {
            Some(context) => context.origin(),
            None => self.inner.host_uri().to_string(),
        }
    }

    fn record(&self, entry: LogEntry) {
        match self.host_context() {
            Some(context) => self.layer.record(&*context, entry),
            None => entry.emit(),
        }
    }
}

impl<L: HostLayer> HostContext for HostProxy<L> {
    fn host_address(&self) -> HostAddress {
        match self.host_context() {
            Some(context) => context.host_address(),
            None => detached_host_address(self.inner.host_uri()),
        }
    }

    fn outer_host(&self) -> Option<Arc<dyn HostBinding>> {
        self.host_context()
            .and_then(|context| context.outer_host())
            .or_else(|| self.me.upgrade().map(|me| me as Arc<dyn HostBinding>))
    }

    fn create_node(&self, address: &NodeAddress) -> Option<Arc<dyn NodeBinding>> {
        self.host_context()?.create_node(address)
    }

    fn inject_node(&self, address: &NodeAddress, node: Arc<dyn NodeBinding>) -> Arc<dyn NodeBinding> {
        match self.host_context() {
            Some(context) => context.inject_node(address, node),
            None => node,
        }
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

    fn authenticate(&self, credentials: &Credentials) -> PolicyDirective<Identity> {
        match self.host_context() {
            Some(context) => context.authenticate(credentials),
            None => self.policy().authenticate(credentials),
        }
    }

    fn host_did_connect(&self) {
        if let Some(context) = self.host_context() {
            context.host_did_connect();
        }
    }

    fn host_did_disconnect(&self) {
        if let Some(context) = self.host_context() {
            context.host_did_disconnect();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::host::{unwrap_host, HostTable};
    use crate::node::NodeModel;
    use meshwork_core::Lifecycle;

    #[test]
    fn test_host_proxy_forwards_tables_and_lifecycle() {
        let table = HostTable::new(Uri::parse("warp://a"));
        let proxy = HostProxy::transparent(table.clone());

        assert_eq!(proxy.host_uri(), Uri::parse("warp://a"));
        proxy.add_node(Uri::parse("/n"), NodeModel::new(Uri::parse("/n")));
        assert!(table.get_node(&Uri::parse("/n")).is_some());
        assert!(proxy.is_connected());

        proxy.load().unwrap();
        assert!(table.is_loaded());
        assert!(!table.is_started());

        proxy.did_disconnect();
        assert!(!table.is_connected());

        assert!(unwrap_host::<HostTable>(&*proxy).is_some());
    }

    #[test]
    fn test_detached_proxy_declines_push_down() {
        let proxy = HostProxy::transparent(HostTable::new(Uri::empty()));
        let outcome = std::sync::Arc::new(parking_lot::Mutex::new(None));
        let seen = outcome.clone();
        let request = PushRequest::new(meshwork_core::Envelope::command(Uri::parse("/n"), Uri::parse("l"), "x"))
            .on_complete(move |result| *seen.lock() = Some(result));
        proxy.push_down(request);
        assert_eq!(
            *outcome.lock(),
            Some(crate::push::PushOutcome::Declined(MeshworkError::LinkClosed))
        );
    }
}
