//! Meshes and the part membership table
//!
//! A mesh keeps its parts in a single copy-on-write vector published
//! through a [`CasCell`]. Lookups scan a snapshot in insertion order and
//! never block. Lazy creation follows an optimistic loop:
//!
//! 1. snapshot the table and return any part that already owns the address,
//!    closing whatever this call created in an earlier, lost round;
//! 2. otherwise create, inject and wire a part once;
//! 3. publish `snapshot + part` with a compare-and-swap, retrying from 1 on
//!    contention.
//!
//! Only the caller whose swap succeeds assigns the gateway or ourself
//! slot, activates the part and notifies membership observers.

use std::any::TypeId;
use std::fmt;
use std::sync::{Arc, Weak};

use bytes::Bytes;
use parking_lot::RwLock;

use meshwork_core::{
    activate, fan_out, CasCell, HostAddress, LaneAddress, LinkAddress, LogEntry, LogLevel,
    MeshAddress, MeshworkError, NodeAddress, PartAddress, PartKey, Phase, TierHooks, TierStatus,
    Uri,
};

use crate::config::RuntimeConfig;
use crate::host::HostBinding;
use crate::lane::{DemandLane, LaneBinding, SupplyLane, DEFAULT_SUPPLY_LIMIT};
use crate::link::{reject_link, LinkBinding};
use crate::node::{NodeBinding, NodeModel};
use crate::part::{PartBinding, PartContext};
use crate::push::PushRequest;
use crate::reflect::{log_lane, meta_mesh_node, MembershipObserver, PartInfo, PARTS_LANE};
use crate::stage::detached_services;
use crate::table::discard;
use crate::tier::{own_capability, same_tier, tier_lifecycle, Capability, Services, TierBinding, TierContext};

pub type PartList = Vec<Arc<dyn PartBinding>>;

/// What a mesh offers the edge
pub trait MeshBinding: TierBinding {
    fn mesh_uri(&self) -> Uri;

    fn mesh_context(&self) -> Option<Arc<dyn MeshContext>>;
    fn set_mesh_context(&self, context: Arc<dyn MeshContext>);
    fn unwrap_mesh(&self, type_id: TypeId) -> Option<Capability>;

    fn parts(&self) -> Arc<PartList>;
    fn gateway(&self) -> Option<Arc<dyn PartBinding>>;
    fn ourself(&self) -> Option<Arc<dyn PartBinding>>;

    /// Part owning `node_uri`, falling back to the gateway
    fn get_part(&self, node_uri: &Uri) -> Option<Arc<dyn PartBinding>>;
    fn get_part_by_key(&self, part_key: &PartKey) -> Option<Arc<dyn PartBinding>>;

    /// Part owning `node_uri`, created on demand
    fn open_part(&self, node_uri: &Uri) -> Option<Arc<dyn PartBinding>>;
    fn open_gateway(&self) -> Option<Arc<dyn PartBinding>>;
    fn add_part(&self, part_key: PartKey, part: Arc<dyn PartBinding>) -> Arc<dyn PartBinding>;
    fn close_part(&self, part_key: &PartKey);

    fn observe(&self, observer: Arc<dyn MembershipObserver>);

    fn open_uplink(&self, link: Arc<dyn LinkBinding>);
    fn push_up(&self, request: PushRequest);
}

/// What the edge provides to its meshes
pub trait MeshContext: TierContext {
    fn mesh_address(&self) -> MeshAddress;

    fn create_part(&self, address: &PartAddress) -> Option<Arc<dyn PartBinding>>;
    fn inject_part(&self, address: &PartAddress, part: Arc<dyn PartBinding>) -> Arc<dyn PartBinding>;
    fn create_host(&self, address: &HostAddress) -> Option<Arc<dyn HostBinding>>;
    fn inject_host(&self, address: &HostAddress, host: Arc<dyn HostBinding>) -> Arc<dyn HostBinding>;
    fn create_node(&self, address: &NodeAddress) -> Option<Arc<dyn NodeBinding>>;
    fn inject_node(&self, address: &NodeAddress, node: Arc<dyn NodeBinding>) -> Arc<dyn NodeBinding>;
    fn create_lane(&self, address: &LaneAddress) -> Option<Arc<dyn LaneBinding>>;
    fn inject_lane(&self, address: &LaneAddress, lane: Arc<dyn LaneBinding>) -> Arc<dyn LaneBinding>;
    fn inject_link(&self, address: &LinkAddress, link: Arc<dyn LinkBinding>) -> Arc<dyn LinkBinding>;

    fn push_down(&self, request: PushRequest);
}

/// Unwrap `mesh` to concrete type `T`
pub fn unwrap_mesh<T: Send + Sync + 'static>(mesh: &dyn MeshBinding) -> Option<Arc<T>> {
    mesh.unwrap_mesh(TypeId::of::<T>())
        .and_then(crate::tier::downcast::<T>)
}

/// Lanes of the `meta:mesh` node
struct MetaLanes {
    parts: Arc<DemandLane>,
    logs: Vec<(LogLevel, Arc<SupplyLane>)>,
}

impl MetaLanes {
    fn publish(&self, entry: &LogEntry) {
        let Some((_, lane)) = self.logs.iter().find(|(level, _)| *level == entry.level) else {
            return;
        };
        if lane.uplink_count() == 0 {
            return;
        }
        match serde_json::to_vec(entry) {
            Ok(body) => lane.push(body),
            Err(error) => tracing::warn!(%error, "unencodable log entry"),
        }
    }
}

/// Mesh routing to a CAS-published table of parts
pub struct MeshTable {
    mesh_uri: Uri,
    status: TierStatus,
    context: RwLock<Option<Arc<dyn MeshContext>>>,
    parts: CasCell<PartList>,
    gateway: RwLock<Option<Arc<dyn PartBinding>>>,
    ourself: RwLock<Option<Arc<dyn PartBinding>>>,
    observers: RwLock<Vec<Arc<dyn MembershipObserver>>>,
    meta_enabled: bool,
    supply_limit: usize,
    meta: RwLock<Option<Arc<MetaLanes>>>,
    me: Weak<MeshTable>,
}

impl MeshTable {
    /// Mesh without a reflection node
    pub fn new(mesh_uri: Uri) -> Arc<Self> {
        Self::build(mesh_uri, false, DEFAULT_SUPPLY_LIMIT)
    }

    pub fn with_config(mesh_uri: Uri, config: &RuntimeConfig) -> Arc<Self> {
        Self::build(mesh_uri, config.meta_enabled, config.supply_queue_limit)
    }

    fn build(mesh_uri: Uri, meta_enabled: bool, supply_limit: usize) -> Arc<Self> {
        Arc::new_cyclic(|me| MeshTable {
            mesh_uri,
            status: TierStatus::new(),
            context: RwLock::new(None),
            parts: CasCell::new(Vec::new()),
            gateway: RwLock::new(None),
            ourself: RwLock::new(None),
            observers: RwLock::new(Vec::new()),
            meta_enabled,
            supply_limit,
            meta: RwLock::new(None),
            me: me.clone(),
        })
    }

    fn origin(&self) -> String {
        if self.mesh_uri.is_defined() {
            self.mesh_uri.to_string()
        } else {
            "mesh".to_string()
        }
    }

    fn log(&self, level: LogLevel, message: &dyn fmt::Display) {
        self.record(LogEntry::new(level, self.origin(), message));
    }

    /// Fan `entry` out to the meta log lanes, then up to the edge
    fn record(&self, entry: LogEntry) {
        let meta = self.meta.read().clone();
        if let Some(meta) = meta {
            meta.publish(&entry);
        }
        match self.mesh_context() {
            Some(context) => context.record(entry),
            None => entry.emit(),
        }
    }

    fn mesh_address(&self) -> MeshAddress {
        match self.mesh_context() {
            Some(context) => context.mesh_address(),
            None => MeshAddress::new("", self.mesh_uri.clone()),
        }
    }

    fn find_existing(parts: &PartList, part_key: &PartKey, node_uri: Option<&Uri>) -> Option<Arc<dyn PartBinding>> {
        if let Some(node_uri) = node_uri.filter(|_| !part_key.is_meta()) {
            if let Some(part) = Self::find_by_predicate(parts, node_uri) {
                return Some(part);
            }
        }
        parts.iter().find(|part| part.part_key() == *part_key).cloned()
    }

    fn find_by_predicate(parts: &PartList, node_uri: &Uri) -> Option<Arc<dyn PartBinding>> {
        parts
            .iter()
            .find(|part| !part.part_key().is_gateway() && part.predicate().test(node_uri))
            .cloned()
    }

    fn wire_part(&self, address: &PartAddress, part: Arc<dyn PartBinding>) -> Arc<dyn PartBinding> {
        let part = match self.mesh_context() {
            Some(context) => context.inject_part(address, part),
            None => part,
        };
        part.set_part_context(Arc::new(MeshTablePart {
            mesh: self.me.clone(),
            part_key: address.part_key.clone(),
        }));
        part
    }

    /// Publish a part under `part_key` unless one already owns the address
    ///
    /// `offered` is used instead of asking the context to create a part.
    fn install(
        &self,
        part_key: PartKey,
        node_uri: Option<&Uri>,
        mut offered: Option<Arc<dyn PartBinding>>,
    ) -> Option<Arc<dyn PartBinding>> {
        let mut wired: Option<Arc<dyn PartBinding>> = None;
        loop {
            let old = self.parts.load();
            if let Some(existing) = Self::find_existing(&old, &part_key, node_uri) {
                if let Some(loser) = wired.take().or_else(|| offered.take()) {
                    if !same_tier(&loser, &existing) {
                        discard(&*loser);
                    }
                }
                return Some(existing);
            }
            let part = match &wired {
                Some(part) => part.clone(),
                None => {
                    let address = self.mesh_address().part(part_key.clone());
                    let created = match offered.take() {
                        Some(part) => part,
                        None => self.mesh_context()?.create_part(&address)?,
                    };
                    let part = self.wire_part(&address, created);
                    wired = Some(part.clone());
                    part
                }
            };
            let mut new = (*old).clone();
            new.push(part.clone());
            if self.parts.compare_and_swap(&old, new) {
                self.did_add_part(&part_key, &part);
                return Some(part);
            }
        }
    }

    fn did_add_part(&self, part_key: &PartKey, part: &Arc<dyn PartBinding>) {
        match part_key {
            PartKey::Extant => *self.gateway.write() = Some(part.clone()),
            PartKey::Meta => *self.ourself.write() = Some(part.clone()),
            PartKey::Key(_) => {}
        }
        if let Err(error) = activate(self.status.state(), &**part) {
            part.did_fail(error);
        }
        self.log(LogLevel::Debug, &format_args!("opened part {part_key}"));

        let info = PartInfo::of(&**part);
        let observers = self.observers.read().clone();
        for observer in observers {
            observer.did_open_part(&info);
        }
        if let Some(meta) = self.meta.read().clone() {
            meta.parts.cue_key(part_key.to_string());
        }
    }

    fn did_remove_part(&self, part_key: &PartKey, part: &Arc<dyn PartBinding>) {
        for slot in [&self.gateway, &self.ourself] {
            let mut slot = slot.write();
            if slot.as_ref().is_some_and(|current| same_tier(current, part)) {
                *slot = None;
            }
        }
        if let Err(error) = part.close() {
            self.log(LogLevel::Warn, &format_args!("part {part_key} failed to close: {error}"));
        }
        self.log(LogLevel::Debug, &format_args!("closed part {part_key}"));

        let observers = self.observers.read().clone();
        for observer in observers {
            observer.did_close_part(part_key);
        }
        if let Some(meta) = self.meta.read().clone() {
            meta.parts.cue();
        }
    }

    /// Body published on the `parts` lane for a cue
    fn parts_body(&self, part_key: Option<&str>) -> Option<Bytes> {
        let parts = self.parts.load();
        let encoded = match part_key {
            Some(part_key) => {
                let part = parts.iter().find(|part| part.part_key().to_string() == part_key)?;
                serde_json::to_vec(&PartInfo::of(&**part))
            }
            None => {
                let infos: Vec<PartInfo> = parts.iter().map(|part| PartInfo::of(&**part)).collect();
                serde_json::to_vec(&infos)
            }
        };
        encoded.ok().map(Bytes::from)
    }

    /// Open `meta:mesh` in the ourself part with its reflection lanes
    fn open_meta(&self) {
        let node_uri = meta_mesh_node();
        let Some(part) = self.open_part(&node_uri) else {
            self.log(LogLevel::Warn, &"no kernel provides the meta part");
            return;
        };
        let Some(host) = part.open_host(&Uri::empty()) else {
            self.log(LogLevel::Warn, &"no kernel provides the meta host");
            return;
        };
        let node = match host.open_node(&node_uri) {
            Some(node) => node,
            None => host.add_node(node_uri.clone(), NodeModel::new(node_uri.clone())),
        };

        let mesh = self.me.clone();
        let parts = DemandLane::new(Uri::parse(PARTS_LANE), move |part_key: Option<&str>| {
            mesh.upgrade().and_then(|mesh| mesh.parts_body(part_key))
        });
        node.open_lane(Uri::parse(PARTS_LANE), parts.clone());

        let logs = LogLevel::ALL
            .iter()
            .map(|&level| {
                let lane_uri = Uri::parse(log_lane(level));
                let lane = SupplyLane::with_limit(lane_uri.clone(), self.supply_limit);
                node.open_lane(lane_uri, lane.clone());
                (level, lane)
            })
            .collect();
        *self.meta.write() = Some(Arc::new(MetaLanes { parts, logs }));
    }
}

impl TierHooks for MeshTable {
    fn propagate(&self, phase: Phase) {
        let parts = self.parts.load();
        fan_out(parts.iter(), phase, |child, error| {
            self.log(LogLevel::Debug, &format_args!("part failed to {phase}"));
            child.did_fail(error);
        });
    }

    fn did_enter(&self, phase: Phase) {
        match phase {
            Phase::Open if self.meta_enabled => self.open_meta(),
            Phase::Close => {
                self.meta.write().take();
                self.context.write().take();
            }
            _ => {}
        }
    }
}

tier_lifecycle!(MeshTable, status);

impl TierBinding for MeshTable {
    fn did_fail(&self, error: MeshworkError) {
        self.status.fail();
        self.log(LogLevel::Fail, &error);
    }
}

impl MeshBinding for MeshTable {
    fn mesh_uri(&self) -> Uri {
        self.mesh_uri.clone()
    }

    fn mesh_context(&self) -> Option<Arc<dyn MeshContext>> {
        self.context.read().clone()
    }

    fn set_mesh_context(&self, context: Arc<dyn MeshContext>) {
        *self.context.write() = Some(context);
    }

    fn unwrap_mesh(&self, type_id: TypeId) -> Option<Capability> {
        own_capability(&self.me, type_id)
    }

    fn parts(&self) -> Arc<PartList> {
        self.parts.load()
    }

    fn gateway(&self) -> Option<Arc<dyn PartBinding>> {
        self.gateway.read().clone()
    }

    fn ourself(&self) -> Option<Arc<dyn PartBinding>> {
        self.ourself.read().clone()
    }

    fn get_part(&self, node_uri: &Uri) -> Option<Arc<dyn PartBinding>> {
        if node_uri.is_meta() {
            return self.ourself();
        }
        Self::find_by_predicate(&self.parts.load(), node_uri).or_else(|| self.gateway())
    }

    fn get_part_by_key(&self, part_key: &PartKey) -> Option<Arc<dyn PartBinding>> {
        self.parts.load().iter().find(|part| part.part_key() == *part_key).cloned()
    }

    fn open_part(&self, node_uri: &Uri) -> Option<Arc<dyn PartBinding>> {
        let part_key = if node_uri.is_meta() { PartKey::Meta } else { PartKey::Extant };
        self.install(part_key, Some(node_uri), None)
    }

    fn open_gateway(&self) -> Option<Arc<dyn PartBinding>> {
        self.install(PartKey::Extant, None, None)
    }

    fn add_part(&self, part_key: PartKey, part: Arc<dyn PartBinding>) -> Arc<dyn PartBinding> {
        self.install(part_key, None, Some(part.clone())).unwrap_or(part)
    }

    fn close_part(&self, part_key: &PartKey) {
        loop {
            let old = self.parts.load();
            let Some(index) = old.iter().position(|part| part.part_key() == *part_key) else {
                return;
            };
            let part = old[index].clone();
            let mut new = (*old).clone();
            new.remove(index);
            if self.parts.compare_and_swap(&old, new) {
                self.did_remove_part(part_key, &part);
                return;
            }
        }
    }

    fn observe(&self, observer: Arc<dyn MembershipObserver>) {
        self.observers.write().push(observer);
    }

    fn open_uplink(&self, link: Arc<dyn LinkBinding>) {
        let address = link.link_address();
        let link = match self.mesh_context() {
            Some(context) => context.inject_link(&address, link),
            None => link,
        };
        match self.get_part(&address.node_uri).or_else(|| self.open_part(&address.node_uri)) {
            Some(part) => part.open_uplink(link),
            None => reject_link(&*link, MeshworkError::PartNotFound(address.node_uri)),
        }
    }

    fn push_up(&self, request: PushRequest) {
        let node_uri = request.node_uri().clone();
        match self.get_part(&node_uri).or_else(|| self.open_part(&node_uri)) {
            Some(part) => part.push_up(request),
            None => request.did_decline(MeshworkError::PartNotFound(node_uri)),
        }
    }
}

/// Context a [`MeshTable`] assigns to each of its parts
struct MeshTablePart {
    mesh: Weak<MeshTable>,
    part_key: PartKey,
}

impl MeshTablePart {
    fn mesh_context(&self) -> Option<Arc<dyn MeshContext>> {
        self.mesh.upgrade().and_then(|mesh| mesh.mesh_context())
    }
}

impl TierContext for MeshTablePart {
    fn services(&self) -> Arc<Services> {
        match self.mesh_context() {
            Some(context) => context.services(),
            None => detached_services(),
        }
    }

    fn origin(&self) -> String {
        self.part_key.to_string()
    }

    fn record(&self, entry: LogEntry) {
        match self.mesh.upgrade() {
            Some(mesh) => mesh.record(entry),
            None => entry.emit(),
        }
    }
}

impl PartContext for MeshTablePart {
    fn part_address(&self) -> PartAddress {
        match self.mesh.upgrade() {
            Some(mesh) => mesh.mesh_address().part(self.part_key.clone()),
            None => MeshAddress::new("", Uri::empty()).part(self.part_key.clone()),
        }
    }

    fn outer_part(&self) -> Option<Arc<dyn PartBinding>> {
        None
    }

    fn create_host(&self, address: &HostAddress) -> Option<Arc<dyn HostBinding>> {
        self.mesh_context()?.create_host(address)
    }

    fn inject_host(&self, address: &HostAddress, host: Arc<dyn HostBinding>) -> Arc<dyn HostBinding> {
        match self.mesh_context() {
            Some(context) => context.inject_host(address, host),
            None => host,
        }
    }

    fn create_node(&self, address: &NodeAddress) -> Option<Arc<dyn NodeBinding>> {
        self.mesh_context()?.create_node(address)
    }

    fn inject_node(&self, address: &NodeAddress, node: Arc<dyn NodeBinding>) -> Arc<dyn NodeBinding> {
        match self.mesh_context() {
            Some(context) => context.inject_node(address, node),
            None => node,
        }
    }

    fn create_lane(&self, address: &LaneAddress) -> Option<Arc<dyn LaneBinding>> {
        self.mesh_context()?.create_lane(address)
    }

    fn inject_lane(&self, address: &LaneAddress, lane: Arc<dyn LaneBinding>) -> Arc<dyn LaneBinding> {
        match self.mesh_context() {
            Some(context) => context.inject_lane(address, lane),
            None => lane,
        }
    }

    fn push_down(&self, request: PushRequest) {
        match self.mesh_context() {
            Some(context) => context.push_down(request),
            None => request.did_decline(MeshworkError::LinkClosed),
        }
    }
}
