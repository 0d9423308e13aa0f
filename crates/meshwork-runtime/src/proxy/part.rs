//! Part proxy

use std::any::TypeId;
use std::sync::{Arc, Weak};

use parking_lot::RwLock;

use meshwork_core::{
    HostAddress, LaneAddress, LogEntry, MeshAddress, MeshworkError, MeshworkResult, NodeAddress,
    PartAddress, PartKey, Phase, Uri,
};

use crate::host::HostBinding;
use crate::lane::LaneBinding;
use crate::link::LinkBinding;
use crate::node::NodeBinding;
use crate::part::{HostMap, PartBinding, PartContext, PartPredicate};
use crate::proxy::proxy_lifecycle;
use crate::push::PushRequest;
use crate::stage::detached_services;
use crate::tier::{own_capability, Capability, Services, TierBinding, TierContext};

/// Calls a [`PartProxy`] lets its layer intercept
pub trait PartLayer: Send + Sync + 'static {
    fn transition(&self, part: &dyn PartBinding, phase: Phase) -> MeshworkResult<()> {
        phase.drive(part)
    }

    fn open_uplink(&self, part: &dyn PartBinding, link: Arc<dyn LinkBinding>) {
        part.open_uplink(link);
    }

    fn push_up(&self, part: &dyn PartBinding, request: PushRequest) {
        part.push_up(request);
    }

    fn record(&self, context: &dyn PartContext, entry: LogEntry) {
        context.record(entry);
    }
}

impl PartLayer for () {}

pub struct PartProxy<L: PartLayer = ()> {
    inner: Arc<dyn PartBinding>,
    layer: L,
    context: RwLock<Option<Arc<dyn PartContext>>>,
    me: Weak<PartProxy<L>>,
}

impl<L: PartLayer> PartProxy<L> {
    pub fn new(inner: Arc<dyn PartBinding>, layer: L) -> Arc<Self> {
        Arc::new_cyclic(|me| PartProxy {
            inner,
            layer,
            context: RwLock::new(None),
            me: me.clone(),
        })
    }

    pub fn inner(&self) -> &Arc<dyn PartBinding> {
        &self.inner
    }

    pub fn layer(&self) -> &L {
        &self.layer
    }
}

impl PartProxy {
    pub fn transparent(inner: Arc<dyn PartBinding>) -> Arc<Self> {
        Self::new(inner, ())
    }
}

proxy_lifecycle!(PartProxy, PartLayer);

impl<L: PartLayer> TierBinding for PartProxy<L> {
    fn did_fail(&self, error: MeshworkError) {
        self.inner.did_fail(error);
    }
}

impl<L: PartLayer> PartBinding for PartProxy<L> {
    fn part_key(&self) -> PartKey {
        self.inner.part_key()
    }

    fn predicate(&self) -> PartPredicate {
        self.inner.predicate()
    }

    fn part_context(&self) -> Option<Arc<dyn PartContext>> {
        self.context.read().clone()
    }

    fn set_part_context(&self, context: Arc<dyn PartContext>) {
        *self.context.write() = Some(context);
        if let Some(me) = self.me.upgrade() {
            self.inner.set_part_context(me);
        }
    }

    fn part_wrapper(self: Arc<Self>) -> Arc<dyn PartBinding> {
        match self.part_context().and_then(|context| context.outer_part()) {
            Some(outer) => outer,
            None => self,
        }
    }

    fn unwrap_part(&self, type_id: TypeId) -> Option<Capability> {
        own_capability(&self.me, type_id).or_else(|| self.inner.unwrap_part(type_id))
    }

    fn hosts(&self) -> Arc<HostMap> {
        self.inner.hosts()
    }

    fn master(&self) -> Option<Arc<dyn HostBinding>> {
        self.inner.master()
    }

    fn get_host(&self, host_uri: &Uri) -> Option<Arc<dyn HostBinding>> {
        self.inner.get_host(host_uri)
    }

    fn open_host(&self, host_uri: &Uri) -> Option<Arc<dyn HostBinding>> {
        self.inner.open_host(host_uri)
    }

    fn add_host(&self, host_uri: Uri, host: Arc<dyn HostBinding>) -> Arc<dyn HostBinding> {
        self.inner.add_host(host_uri, host)
    }

    fn close_host(&self, host_uri: &Uri) {
        self.inner.close_host(host_uri);
    }

    fn open_uplink(&self, link: Arc<dyn LinkBinding>) {
        self.layer.open_uplink(&*self.inner, link);
    }

    fn push_up(&self, request: PushRequest) {
        self.layer.push_up(&*self.inner, request);
    }
}

impl<L: PartLayer> TierContext for PartProxy<L> {
    fn services(&self) -> Arc<Services> {
        match self.part_context() {
            Some(context) => context.services(),
            None => detached_services(),
        }
    }

    fn origin(&self) -> String {
        match self.part_context() {
            Some(context) => context.origin(),
            None => self.inner.part_key().to_string(),
        }
    }

    fn record(&self, entry: LogEntry) {
        match self.part_context() {
            Some(context) => self.layer.record(&*context, entry),
            None => entry.emit(),
        }
    }
}

impl<L: PartLayer> PartContext for PartProxy<L> {
    fn part_address(&self) -> PartAddress {
        match self.part_context() {
            Some(context) => context.part_address(),
            None => MeshAddress::new("", Uri::empty()).part(self.inner.part_key()),
        }
    }

    fn outer_part(&self) -> Option<Arc<dyn PartBinding>> {
        self.part_context()
            .and_then(|context| context.outer_part())
            .or_else(|| self.me.upgrade().map(|me| me as Arc<dyn PartBinding>))
    }

    fn create_host(&self, address: &HostAddress) -> Option<Arc<dyn HostBinding>> {
        self.part_context()?.create_host(address)
    }

    fn inject_host(&self, address: &HostAddress, host: Arc<dyn HostBinding>) -> Arc<dyn HostBinding> {
        match self.part_context() {
            Some(context) => context.inject_host(address, host),
            None => host,
        }
    }

    fn create_node(&self, address: &NodeAddress) -> Option<Arc<dyn NodeBinding>> {
        self.part_context()?.create_node(address)
    }

    fn inject_node(&self, address: &NodeAddress, node: Arc<dyn NodeBinding>) -> Arc<dyn NodeBinding> {
        match self.part_context() {
            Some(context) => context.inject_node(address, node),
            None => node,
        }
    }

    fn create_lane(&self, address: &LaneAddress) -> Option<Arc<dyn LaneBinding>> {
        self.part_context()?.create_lane(address)
    }

    fn inject_lane(&self, address: &LaneAddress, lane: Arc<dyn LaneBinding>) -> Arc<dyn LaneBinding> {
        match self.part_context() {
            Some(context) => context.inject_lane(address, lane),
            None => lane,
        }
    }

    fn push_down(&self, request: PushRequest) {
        match self.part_context() {
            Some(context) => context.push_down(request),
            None => request.did_decline(MeshworkError::LinkClosed),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::host::HostTable;
    use crate::part::{unwrap_part, PartTable};
    use meshwork_core::Lifecycle;

    #[test]
    fn test_transparent_proxy_forwards() {
        let table = PartTable::new(PartKey::named("a"), PartPredicate::node_prefix("/a"));
        let proxy = PartProxy::transparent(table.clone());

        assert_eq!(proxy.part_key(), PartKey::named("a"));
        assert_eq!(proxy.predicate(), table.predicate());
        proxy.add_host(Uri::empty(), HostTable::new(Uri::empty()));
        assert_eq!(table.hosts().len(), 1);
        assert!(proxy.master().is_some());

        proxy.start().unwrap();
        assert!(table.is_started());
        assert!(proxy.is_started());
        proxy.close().unwrap();
        assert!(table.is_closed());
    }

    #[test]
    fn test_context_assignment_chains_through_proxy() {
        let table = PartTable::new(PartKey::named("a"), PartPredicate::Any);
        let inner = PartProxy::transparent(table.clone());
        let outer = PartProxy::transparent(inner.clone());

        struct Root;
        impl TierContext for Root {
            fn services(&self) -> Arc<Services> {
                detached_services()
            }
            fn origin(&self) -> String {
                "root".to_string()
            }
            fn record(&self, entry: LogEntry) {
                entry.emit();
            }
        }
        impl PartContext for Root {
            fn part_address(&self) -> PartAddress {
                MeshAddress::new("e", Uri::empty()).part(PartKey::named("a"))
            }
            fn outer_part(&self) -> Option<Arc<dyn PartBinding>> {
                None
            }
            fn create_host(&self, _: &HostAddress) -> Option<Arc<dyn HostBinding>> {
                None
            }
            fn inject_host(&self, _: &HostAddress, host: Arc<dyn HostBinding>) -> Arc<dyn HostBinding> {
                host
            }
            fn create_node(&self, _: &NodeAddress) -> Option<Arc<dyn NodeBinding>> {
                None
            }
            fn inject_node(&self, _: &NodeAddress, node: Arc<dyn NodeBinding>) -> Arc<dyn NodeBinding> {
                node
            }
            fn create_lane(&self, _: &LaneAddress) -> Option<Arc<dyn LaneBinding>> {
                None
            }
            fn inject_lane(&self, _: &LaneAddress, lane: Arc<dyn LaneBinding>) -> Arc<dyn LaneBinding> {
                lane
            }
            fn push_down(&self, request: PushRequest) {
                request.did_decline(MeshworkError::LinkClosed);
            }
        }

        outer.set_part_context(Arc::new(Root));
        assert!(inner.part_context().is_some());
        assert!(table.part_context().is_some());
        assert_eq!(table.part_context().unwrap().part_address().edge_name, "e");

        let wrapper = table.clone().part_wrapper();
        assert!(crate::tier::same_tier(&wrapper, &outer));

        let found = unwrap_part::<PartTable>(&*outer).unwrap();
        assert!(Arc::ptr_eq(&found, &table));
        assert!(unwrap_part::<PartProxy>(&*outer).is_some());
    }
}
