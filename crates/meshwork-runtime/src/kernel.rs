//! Kernels: pluggable factories and decorators for tiers
//!
//! A kernel may create a binding for an address it recognizes and may wrap
//! any binding on its way into the graph. Kernels are consulted through a
//! [`KernelStack`]:
//!
//! - creation asks kernels in descending priority; the first binding wins
//! - injection lets every kernel wrap in ascending priority, so the
//!   highest-priority layer ends up outermost

use std::sync::Arc;

use meshwork_core::{HostAddress, LaneAddress, LinkAddress, NodeAddress, PartAddress, PartKey, Uri};

use crate::host::{HostBinding, HostTable};
use crate::lane::LaneBinding;
use crate::link::LinkBinding;
use crate::node::{NodeBinding, NodeModel};
use crate::part::{PartBinding, PartPredicate, PartTable};
use crate::proxy::{HostProxy, PolicyLayer};

pub trait Kernel: Send + Sync {
    fn priority(&self) -> f64 {
        0.0
    }

    fn create_part(&self, _address: &PartAddress) -> Option<Arc<dyn PartBinding>> {
        None
    }

    fn inject_part(&self, _address: &PartAddress, part: Arc<dyn PartBinding>) -> Arc<dyn PartBinding> {
        part
    }

    fn create_host(&self, _address: &HostAddress) -> Option<Arc<dyn HostBinding>> {
        None
    }

    fn inject_host(&self, _address: &HostAddress, host: Arc<dyn HostBinding>) -> Arc<dyn HostBinding> {
        host
    }

    fn create_node(&self, _address: &NodeAddress) -> Option<Arc<dyn NodeBinding>> {
        None
    }

    fn inject_node(&self, _address: &NodeAddress, node: Arc<dyn NodeBinding>) -> Arc<dyn NodeBinding> {
        node
    }

    fn create_lane(&self, _address: &LaneAddress) -> Option<Arc<dyn LaneBinding>> {
        None
    }

    fn inject_lane(&self, _address: &LaneAddress, lane: Arc<dyn LaneBinding>) -> Arc<dyn LaneBinding> {
        lane
    }

    fn inject_link(&self, _address: &LinkAddress, link: Arc<dyn LinkBinding>) -> Arc<dyn LinkBinding> {
        link
    }
}

/// Kernels ordered by descending priority
#[derive(Clone, Default)]
pub struct KernelStack {
    kernels: Vec<Arc<dyn Kernel>>,
}

impl KernelStack {
    pub fn new(kernels: impl IntoIterator<Item = Arc<dyn Kernel>>) -> Self {
        let mut stack = KernelStack::default();
        for kernel in kernels {
            stack.push(kernel);
        }
        stack
    }

    /// Insert `kernel` after every kernel of equal or higher priority
    pub fn push(&mut self, kernel: Arc<dyn Kernel>) {
        let priority = kernel.priority();
        let index = self
            .kernels
            .iter()
            .position(|other| other.priority().total_cmp(&priority).is_lt())
            .unwrap_or(self.kernels.len());
        self.kernels.insert(index, kernel);
    }

    pub fn len(&self) -> usize {
        self.kernels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.kernels.is_empty()
    }

    pub fn create_part(&self, address: &PartAddress) -> Option<Arc<dyn PartBinding>> {
        self.kernels.iter().find_map(|kernel| kernel.create_part(address))
    }

    pub fn inject_part(&self, address: &PartAddress, part: Arc<dyn PartBinding>) -> Arc<dyn PartBinding> {
        self.kernels
            .iter()
            .rev()
            .fold(part, |part, kernel| kernel.inject_part(address, part))
    }

    pub fn create_host(&self, address: &HostAddress) -> Option<Arc<dyn HostBinding>> {
        self.kernels.iter().find_map(|kernel| kernel.create_host(address))
    }

    pub fn inject_host(&self, address: &HostAddress, host: Arc<dyn HostBinding>) -> Arc<dyn HostBinding> {
        self.kernels
            .iter()
            .rev()
            .fold(host, |host, kernel| kernel.inject_host(address, host))
    }

    pub fn create_node(&self, address: &NodeAddress) -> Option<Arc<dyn NodeBinding>> {
        self.kernels.iter().find_map(|kernel| kernel.create_node(address))
    }

    pub fn inject_node(&self, address: &NodeAddress, node: Arc<dyn NodeBinding>) -> Arc<dyn NodeBinding> {
        self.kernels
            .iter()
            .rev()
            .fold(node, |node, kernel| kernel.inject_node(address, node))
    }

    pub fn create_lane(&self, address: &LaneAddress) -> Option<Arc<dyn LaneBinding>> {
        self.kernels.iter().find_map(|kernel| kernel.create_lane(address))
    }

    pub fn inject_lane(&self, address: &LaneAddress, lane: Arc<dyn LaneBinding>) -> Arc<dyn LaneBinding> {
        self.kernels
            .iter()
            .rev()
            .fold(lane, |lane, kernel| kernel.inject_lane(address, lane))
    }

    pub fn inject_link(&self, address: &LinkAddress, link: Arc<dyn LinkBinding>) -> Arc<dyn LinkBinding> {
        self.kernels
            .iter()
            .rev()
            .fold(link, |link, kernel| kernel.inject_link(address, link))
    }
}

pub type NodeFactory = Arc<dyn Fn(&NodeAddress) -> Arc<dyn NodeBinding> + Send + Sync>;

/// Local tables, routed nodes, and host policy enforcement
pub struct DefaultKernel {
    routes: Vec<(Uri, NodeFactory)>,
    host_policy: bool,
}

impl Default for DefaultKernel {
    fn default() -> Self {
        DefaultKernel {
            routes: Vec::new(),
            host_policy: true,
        }
    }
}

impl DefaultKernel {
    pub fn new() -> Self {
        Self::default()
    }

    /// Serve node URIs starting with `prefix` from `factory`
    ///
    /// Routes are matched in registration order.
    pub fn route(
        mut self,
        prefix: impl Into<Uri>,
        factory: impl Fn(&NodeAddress) -> Arc<dyn NodeBinding> + Send + Sync + 'static,
    ) -> Self {
        self.routes.push((prefix.into(), Arc::new(factory)));
        self
    }

    /// Skip wrapping hosts in a [`PolicyLayer`]
    pub fn without_host_policy(mut self) -> Self {
        self.host_policy = false;
        self
    }
}

impl Kernel for DefaultKernel {
    fn priority(&self) -> f64 {
        -1.0
    }

    fn create_part(&self, address: &PartAddress) -> Option<Arc<dyn PartBinding>> {
        let predicate = match address.part_key {
            PartKey::Meta => PartPredicate::Meta,
            PartKey::Extant | PartKey::Key(_) => PartPredicate::Any,
        };
        Some(PartTable::new(address.part_key.clone(), predicate))
    }

    fn create_host(&self, address: &HostAddress) -> Option<Arc<dyn HostBinding>> {
        Some(HostTable::new(address.host_uri.clone()))
    }

    fn inject_host(&self, _address: &HostAddress, host: Arc<dyn HostBinding>) -> Arc<dyn HostBinding> {
        if self.host_policy {
            HostProxy::new(host, PolicyLayer)
        } else {
            host
        }
    }

    fn create_node(&self, address: &NodeAddress) -> Option<Arc<dyn NodeBinding>> {
        if address.node_uri.is_meta() {
            return Some(NodeModel::new(address.node_uri.clone()));
        }
        let node_uri = address.node_uri.as_str();
        self.routes
            .iter()
            .find(|(prefix, _)| node_uri.starts_with(prefix.as_str()))
            .map(|(_, factory)| factory(address))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::host::unwrap_host;
    use crate::proxy::HostProxy;
    use meshwork_core::MeshAddress;
    use parking_lot::Mutex;

    struct Tagging {
        priority: f64,
        name: &'static str,
        order: Arc<Mutex<Vec<&'static str>>>,
    }

    impl Kernel for Tagging {
        fn priority(&self) -> f64 {
            self.priority
        }

        fn create_host(&self, address: &HostAddress) -> Option<Arc<dyn HostBinding>> {
            self.order.lock().push(self.name);
            (self.name == "middle").then(|| HostTable::new(address.host_uri.clone()) as Arc<dyn HostBinding>)
        }

        fn inject_host(&self, _address: &HostAddress, host: Arc<dyn HostBinding>) -> Arc<dyn HostBinding> {
            self.order.lock().push(self.name);
            HostProxy::transparent(host)
        }
    }

    fn host_address() -> HostAddress {
        MeshAddress::new("edge", Uri::empty())
            .part(PartKey::Extant)
            .host(Uri::empty())
    }

    #[test]
    fn test_stack_orders_creation_and_injection() {
        let order = Arc::new(Mutex::new(Vec::new()));
        let kernel = |priority, name| -> Arc<dyn Kernel> {
            Arc::new(Tagging { priority, name, order: order.clone() })
        };
        let stack = KernelStack::new([kernel(0.0, "low"), kernel(2.0, "high"), kernel(1.0, "middle")]);

        let host = stack.create_host(&host_address()).unwrap();
        assert_eq!(*order.lock(), vec!["high", "middle"]);

        order.lock().clear();
        let host = stack.inject_host(&host_address(), host);
        assert_eq!(*order.lock(), vec!["low", "middle", "high"]);
        assert!(unwrap_host::<HostTable>(&*host).is_some());
    }

    #[test]
    fn test_default_kernel_routes_nodes_by_prefix() {
        let kernel = DefaultKernel::new()
            .route("/users/", |address: &NodeAddress| NodeModel::new(address.node_uri.clone()) as Arc<dyn NodeBinding>);
        let host = host_address();

        assert!(kernel.create_node(&host.node(Uri::parse("/users/7"))).is_some());
        assert!(kernel.create_node(&host.node(Uri::parse("/rooms/1"))).is_none());
        assert!(kernel.create_node(&host.node(Uri::parse("meta:mesh"))).is_some());
    }

    #[test]
    fn test_default_kernel_part_predicates() {
        let kernel = DefaultKernel::new();
        let mesh = MeshAddress::new("edge", Uri::empty());
        let meta = kernel.create_part(&mesh.part(PartKey::Meta)).unwrap();
        assert_eq!(meta.predicate(), PartPredicate::Meta);
        let gateway = kernel.create_part(&mesh.part(PartKey::Extant)).unwrap();
        assert_eq!(gateway.predicate(), PartPredicate::Any);
    }

    #[test]
    fn test_default_kernel_wraps_hosts_in_policy() {
        let kernel = DefaultKernel::new();
        let host = kernel.create_host(&host_address()).unwrap();
        let host = kernel.inject_host(&host_address(), host);
        assert!(unwrap_host::<HostProxy<PolicyLayer>>(&*host).is_some());

        let bare = DefaultKernel::new().without_host_policy();
        let host = bare.inject_host(&host_address(), HostTable::new(Uri::empty()));
        assert!(unwrap_host::<HostProxy<PolicyLayer>>(&*host).is_none());
    }
}
