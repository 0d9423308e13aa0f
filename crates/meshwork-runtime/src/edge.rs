//! The edge: root of the tier graph
//!
//! An [`Edge`] owns the runtime configuration, the kernel stack and the
//! shared collaborators, and acts as the context of every mesh it opens.
//! Pushes climbing out of a mesh through `push_down` re-enter the graph
//! here and are routed again from the top.

use std::collections::BTreeMap;
use std::sync::{Arc, Weak};

use meshwork_core::{
    fan_out, CasCell, HostAddress, LaneAddress, LinkAddress, LogEntry, MeshAddress,
    MeshworkError, NodeAddress, PartAddress, Phase, Policy, Schedule, Stage, Store, TierHooks,
    TierStatus, Uri,
};

use crate::config::RuntimeConfig;
use crate::host::HostBinding;
use crate::kernel::{DefaultKernel, Kernel, KernelStack};
use crate::lane::LaneBinding;
use crate::link::{reject_link, LinkBinding};
use crate::mesh::{MeshBinding, MeshContext, MeshTable};
use crate::node::NodeBinding;
use crate::part::PartBinding;
use crate::push::PushRequest;
use crate::stage::{IdleSchedule, InlineStage, TokioSchedule, TokioStage, TransientStore};
use crate::table::{close_entry, open_entry, TierMap};
use crate::tier::{tier_lifecycle, Services, TierContext};

pub type MeshMap = TierMap<dyn MeshBinding>;

/// Builder for [`Edge`]
///
/// Without explicit collaborators the edge runs tasks and timers on the
/// ambient tokio runtime when there is one, and inline with idle timers
/// otherwise.
#[derive(Default)]
pub struct EdgeBuilder {
    config: RuntimeConfig,
    policy: Option<Arc<dyn Policy>>,
    schedule: Option<Arc<dyn Schedule>>,
    stage: Option<Arc<dyn Stage>>,
    store: Option<Arc<dyn Store>>,
    kernels: Vec<Arc<dyn Kernel>>,
    default_kernel: DefaultKernel,
}

impl EdgeBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn config(mut self, config: RuntimeConfig) -> Self {
        self.config = config;
        self
    }

    pub fn policy(mut self, policy: Arc<dyn Policy>) -> Self {
        self.policy = Some(policy);
        self
    }

    pub fn schedule(mut self, schedule: Arc<dyn Schedule>) -> Self {
        self.schedule = Some(schedule);
        self
    }

    pub fn stage(mut self, stage: Arc<dyn Stage>) -> Self {
        self.stage = Some(stage);
        self
    }

    pub fn store(mut self, store: Arc<dyn Store>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn kernel(mut self, kernel: Arc<dyn Kernel>) -> Self {
        self.kernels.push(kernel);
        self
    }

    /// Serve node URIs starting with `prefix` from `factory`
    pub fn route(
        mut self,
        prefix: impl Into<Uri>,
        factory: impl Fn(&NodeAddress) -> Arc<dyn NodeBinding> + Send + Sync + 'static,
    ) -> Self {
        self.default_kernel = self.default_kernel.route(prefix, factory);
        self
    }

    pub fn without_host_policy(mut self) -> Self {
        self.default_kernel = self.default_kernel.without_host_policy();
        self
    }

    pub fn build(self) -> Arc<Edge> {
        let stage = self.stage.unwrap_or_else(|| match TokioStage::try_current() {
            Some(stage) => Arc::new(stage),
            None => Arc::new(InlineStage),
        });
        let schedule = self.schedule.unwrap_or_else(|| match TokioSchedule::try_current() {
            Some(schedule) => Arc::new(schedule),
            None => Arc::new(IdleSchedule),
        });
        let store = self.store.unwrap_or_else(|| Arc::new(TransientStore::new()));
        let mut services = Services::new(schedule, stage, store);
        if let Some(policy) = self.policy {
            services = services.with_policy(policy);
        }

        let mut kernels = KernelStack::new(self.kernels);
        kernels.push(Arc::new(self.default_kernel));

        tracing::debug!(edge = %self.config.edge_name, kernels = kernels.len(), "edge built");
        Arc::new_cyclic(|me| Edge {
            config: self.config,
            services: Arc::new(services),
            kernels,
            status: TierStatus::new(),
            meshes: CasCell::new(BTreeMap::new()),
            me: me.clone(),
        })
    }
}

pub struct Edge {
    config: RuntimeConfig,
    services: Arc<Services>,
    kernels: KernelStack,
    status: TierStatus,
    meshes: CasCell<MeshMap>,
    me: Weak<Edge>,
}

impl Edge {
    pub fn builder() -> EdgeBuilder {
        EdgeBuilder::new()
    }

    pub fn config(&self) -> &RuntimeConfig {
        &self.config
    }

    pub fn services(&self) -> &Arc<Services> {
        &self.services
    }

    pub fn kernels(&self) -> &KernelStack {
        &self.kernels
    }

    pub fn meshes(&self) -> Arc<MeshMap> {
        self.meshes.load()
    }

    pub fn mesh(&self, mesh_uri: &Uri) -> Option<Arc<dyn MeshBinding>> {
        self.meshes.load().get(mesh_uri).cloned()
    }

    /// Existing mesh, or a new one brought up to the edge's phase
    pub fn open_mesh(&self, mesh_uri: &Uri) -> Arc<dyn MeshBinding> {
        if let Some(mesh) = self.mesh(mesh_uri) {
            return mesh;
        }
        let mesh: Arc<dyn MeshBinding> = MeshTable::with_config(mesh_uri.clone(), &self.config);
        open_entry(&self.meshes, mesh_uri, mesh, &self.status, |mesh| {
            mesh.set_mesh_context(Arc::new(EdgeMesh {
                edge: self.me.clone(),
                mesh_uri: mesh_uri.clone(),
            }));
            mesh
        })
    }

    pub fn close_mesh(&self, mesh_uri: &Uri) {
        if let Some(mesh) = close_entry(&self.meshes, mesh_uri) {
            if let Err(error) = mesh.close() {
                tracing::warn!(mesh = %mesh_uri, %error, "mesh failed to close");
            }
        }
    }

    /// Route `request` to the mesh it names
    pub fn push_up(&self, request: PushRequest) {
        if self.status.state().is_closed() {
            request.did_decline(MeshworkError::LinkClosed);
            return;
        }
        let mesh_uri = request.mesh_uri.clone();
        self.open_mesh(&mesh_uri).push_up(request);
    }

    /// Route `link` to the mesh named by its address
    pub fn open_uplink(&self, link: Arc<dyn LinkBinding>) {
        if self.status.state().is_closed() {
            reject_link(&*link, MeshworkError::LinkClosed);
            return;
        }
        let mesh_uri = link.link_address().mesh_uri;
        self.open_mesh(&mesh_uri).open_uplink(link);
    }
}

impl TierHooks for Edge {
    fn propagate(&self, phase: Phase) {
        let meshes = self.meshes.load();
        fan_out(meshes.values(), phase, |mesh, error| {
            tracing::error!(edge = %self.config.edge_name, %error, "mesh failed to {phase}");
            mesh.did_fail(error);
        });
    }

    fn did_enter(&self, phase: Phase) {
        tracing::info!(edge = %self.config.edge_name, "edge did {phase}");
    }
}

tier_lifecycle!(Edge, status);

/// Context an [`Edge`] assigns to each mesh
struct EdgeMesh {
    edge: Weak<Edge>,
    mesh_uri: Uri,
}

impl EdgeMesh {
    fn edge(&self) -> Option<Arc<Edge>> {
        self.edge.upgrade()
    }
}

impl TierContext for EdgeMesh {
    fn services(&self) -> Arc<Services> {
        match self.edge.upgrade() {
            Some(edge) => edge.services.clone(),
            None => crate::stage::detached_services(),
        }
    }

    fn origin(&self) -> String {
        self.mesh_uri.to_string()
    }

    fn record(&self, entry: LogEntry) {
        entry.emit();
    }
}

impl MeshContext for EdgeMesh {
    fn mesh_address(&self) -> MeshAddress {
        let edge_name = self
            .edge
            .upgrade()
            .map(|edge| edge.config.edge_name.clone())
            .unwrap_or_default();
        MeshAddress::new(edge_name, self.mesh_uri.clone())
    }

    fn create_part(&self, address: &PartAddress) -> Option<Arc<dyn PartBinding>> {
        self.edge()?.kernels.create_part(address)
    }

    fn inject_part(&self, address: &PartAddress, part: Arc<dyn PartBinding>) -> Arc<dyn PartBinding> {
        match self.edge() {
            Some(edge) => edge.kernels.inject_part(address, part),
            None => part,
        }
    }

    fn create_host(&self, address: &HostAddress) -> Option<Arc<dyn HostBinding>> {
        self.edge()?.kernels.create_host(address)
    }

    fn inject_host(&self, address: &HostAddress, host: Arc<dyn HostBinding>) -> Arc<dyn HostBinding> {
        match self.edge() {
            Some(edge) => edge.kernels.inject_host(address, host),
            None => host,
        }
    }

    fn create_node(&self, address: &NodeAddress) -> Option<Arc<dyn NodeBinding>> {
        self.edge()?.kernels.create_node(address)
    }

    fn inject_node(&self, address: &NodeAddress, node: Arc<dyn NodeBinding>) -> Arc<dyn NodeBinding> {
        match self.edge() {
            Some(edge) => edge.kernels.inject_node(address, node),
            None => node,
        }
    }

    fn create_lane(&self, address: &LaneAddress) -> Option<Arc<dyn LaneBinding>> {
        self.edge()?.kernels.create_lane(address)
    }

    fn inject_lane(&self, address: &LaneAddress, lane: Arc<dyn LaneBinding>) -> Arc<dyn LaneBinding> {
        match self.edge() {
            Some(edge) => edge.kernels.inject_lane(address, lane),
            None => lane,
        }
    }

    fn inject_link(&self, address: &LinkAddress, link: Arc<dyn LinkBinding>) -> Arc<dyn LinkBinding> {
        match self.edge() {
            Some(edge) => edge.kernels.inject_link(address, link),
            None => link,
        }
    }

    fn push_down(&self, request: PushRequest) {
        match self.edge.upgrade() {
            Some(edge) => edge.push_up(request),
            None => request.did_decline(MeshworkError::LinkClosed),
        }
    }
}
