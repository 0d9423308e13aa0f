//! Parts: routable partitions of a mesh, owning hosts

use std::any::TypeId;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::{Arc, Weak};

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use meshwork_core::{
    fan_out, CasCell, Credentials, HostAddress, Identity, LaneAddress, LogEntry, LogLevel,
    MeshworkError, NodeAddress, PartAddress, PartKey, Phase, PolicyDirective, TierHooks,
    TierStatus, Uri,
};

use crate::host::{HostBinding, HostContext};
use crate::lane::LaneBinding;
use crate::link::{reject_link, LinkBinding};
use crate::node::NodeBinding;
use crate::push::PushRequest;
use crate::stage::detached_services;
use crate::table::{close_entry, open_entry, TierMap};
use crate::tier::{log_via, own_capability, tier_lifecycle, Capability, Services, TierBinding, TierContext};

pub type HostMap = TierMap<dyn HostBinding>;

/// Which node URIs a part owns
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum PartPredicate {
    Any,
    Meta,
    NodePrefix { prefix: String },
    /// Inclusive range over the 32-bit FNV-1a hash of the node URI
    HashRange { lower: u32, upper: u32 },
}

impl PartPredicate {
    pub fn node_prefix(prefix: impl Into<String>) -> Self {
        PartPredicate::NodePrefix { prefix: prefix.into() }
    }

    pub fn hash_range(lower: u32, upper: u32) -> Self {
        PartPredicate::HashRange { lower, upper }
    }

    pub fn test(&self, node_uri: &Uri) -> bool {
        match self {
            PartPredicate::Any => true,
            PartPredicate::Meta => node_uri.is_meta(),
            PartPredicate::NodePrefix { prefix } => node_uri.as_str().starts_with(prefix.as_str()),
            PartPredicate::HashRange { lower, upper } => {
                let hash = fnv1a(node_uri.as_str().as_bytes());
                *lower <= hash && hash <= *upper
            }
        }
    }
}

impl fmt::Display for PartPredicate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PartPredicate::Any => f.write_str("any"),
            PartPredicate::Meta => f.write_str("meta"),
            PartPredicate::NodePrefix { prefix } => write!(f, "prefix({prefix})"),
            PartPredicate::HashRange { lower, upper } => write!(f, "hash({lower:#x}..={upper:#x})"),
        }
    }
}

fn fnv1a(bytes: &[u8]) -> u32 {
    let mut hash: u32 = 0x811c_9dc5;
    for byte in bytes {
        hash ^= u32::from(*byte);
        hash = hash.wrapping_mul(0x0100_0193);
    }
    hash
}

/// What a part offers its mesh
pub trait PartBinding: TierBinding {
    fn part_key(&self) -> PartKey;
    fn predicate(&self) -> PartPredicate;

    fn part_context(&self) -> Option<Arc<dyn PartContext>>;
    fn set_part_context(&self, context: Arc<dyn PartContext>);
    fn part_wrapper(self: Arc<Self>) -> Arc<dyn PartBinding>;
    fn unwrap_part(&self, type_id: TypeId) -> Option<Capability>;

    fn hosts(&self) -> Arc<HostMap>;
    /// The local host, keyed by the empty URI
    fn master(&self) -> Option<Arc<dyn HostBinding>>;
    fn get_host(&self, host_uri: &Uri) -> Option<Arc<dyn HostBinding>>;

    /// Existing host, or one created on demand through the context
    fn open_host(&self, host_uri: &Uri) -> Option<Arc<dyn HostBinding>>;
    fn add_host(&self, host_uri: Uri, host: Arc<dyn HostBinding>) -> Arc<dyn HostBinding>;
    fn close_host(&self, host_uri: &Uri);

    fn open_uplink(&self, link: Arc<dyn LinkBinding>);
    fn push_up(&self, request: PushRequest);
}

/// What a mesh provides to its parts
pub trait PartContext: TierContext {
    fn part_address(&self) -> PartAddress;

    /// Outermost proxy above this context, if it is itself a proxy
    fn outer_part(&self) -> Option<Arc<dyn PartBinding>>;

    fn create_host(&self, address: &HostAddress) -> Option<Arc<dyn HostBinding>>;
    fn inject_host(&self, address: &HostAddress, host: Arc<dyn HostBinding>) -> Arc<dyn HostBinding>;
    fn create_node(&self, address: &NodeAddress) -> Option<Arc<dyn NodeBinding>>;
    fn inject_node(&self, address: &NodeAddress, node: Arc<dyn NodeBinding>) -> Arc<dyn NodeBinding>;
    fn create_lane(&self, address: &LaneAddress) -> Option<Arc<dyn LaneBinding>>;
    fn inject_lane(&self, address: &LaneAddress, lane: Arc<dyn LaneBinding>) -> Arc<dyn LaneBinding>;

    fn push_down(&self, request: PushRequest);
}

/// Unwrap `part` to concrete type `T`
pub fn unwrap_part<T: Send + Sync + 'static>(part: &dyn PartBinding) -> Option<Arc<T>> {
    part.unwrap_part(TypeId::of::<T>())
        .and_then(crate::tier::downcast::<T>)
}

/// Part routing to a table of hosts
pub struct PartTable {
    part_key: PartKey,
    predicate: PartPredicate,
    status: TierStatus,
    context: RwLock<Option<Arc<dyn PartContext>>>,
    hosts: CasCell<HostMap>,
    me: Weak<PartTable>,
}

impl PartTable {
    pub fn new(part_key: PartKey, predicate: PartPredicate) -> Arc<Self> {
        Arc::new_cyclic(|me| PartTable {
            part_key,
            predicate,
            status: TierStatus::new(),
            context: RwLock::new(None),
            hosts: CasCell::new(BTreeMap::new()),
            me: me.clone(),
        })
    }

    fn log(&self, level: LogLevel, message: &dyn fmt::Display) {
        log_via(self.part_context(), || self.part_key.to_string(), level, message);
    }

    fn host_address(&self, host_uri: Uri) -> HostAddress {
        match self.part_context() {
            Some(context) => context.part_address().host(host_uri),
            None => HostAddress {
                edge_name: String::new(),
                mesh_uri: Uri::empty(),
                part_key: self.part_key.clone(),
                host_uri,
            },
        }
    }

    fn wire_host(&self, host_uri: &Uri, host: Arc<dyn HostBinding>) -> Arc<dyn HostBinding> {
        let host = match self.part_context() {
            Some(context) => context.inject_host(&self.host_address(host_uri.clone()), host),
            None => host,
        };
        host.set_host_context(Arc::new(PartTableHost {
            part: self.me.clone(),
            host_uri: host_uri.clone(),
        }));
        host
    }

    fn resolve_host(&self, host_uri: &Uri) -> Option<Arc<dyn HostBinding>> {
        self.get_host(host_uri).or_else(|| self.open_host(host_uri))
    }
}

impl TierHooks for PartTable {
    fn propagate(&self, phase: Phase) {
        let hosts = self.hosts.load();
        fan_out(hosts.values(), phase, |child, error| {
            self.log(LogLevel::Debug, &format_args!("host failed to {phase}"));
            child.did_fail(error);
        });
    }

    fn did_enter(&self, phase: Phase) {
        if phase == Phase::Close {
            self.context.write().take();
        }
    }
}

tier_lifecycle!(PartTable, status);

impl TierBinding for PartTable {
    fn did_fail(&self, error: MeshworkError) {
        self.status.fail();
        self.log(LogLevel::Fail, &error);
    }
}

impl PartBinding for PartTable {
    fn part_key(&self) -> PartKey {
        self.part_key.clone()
    }

    fn predicate(&self) -> PartPredicate {
        self.predicate.clone()
    }

    fn part_context(&self) -> Option<Arc<dyn PartContext>> {
        self.context.read().clone()
    }

    fn set_part_context(&self, context: Arc<dyn PartContext>) {
        *self.context.write() = Some(context);
    }

    fn part_wrapper(self: Arc<Self>) -> Arc<dyn PartBinding> {
        match self.part_context().and_then(|context| context.outer_part()) {
            Some(outer) => outer,
            None => self,
        }
    }

    fn unwrap_part(&self, type_id: TypeId) -> Option<Capability> {
        own_capability(&self.me, type_id)
    }

    fn hosts(&self) -> Arc<HostMap> {
        self.hosts.load()
    }

    fn master(&self) -> Option<Arc<dyn HostBinding>> {
        self.get_host(&Uri::empty())
    }

    fn get_host(&self, host_uri: &Uri) -> Option<Arc<dyn HostBinding>> {
        self.hosts.load().get(host_uri).cloned()
    }

    fn open_host(&self, host_uri: &Uri) -> Option<Arc<dyn HostBinding>> {
        if let Some(host) = self.get_host(host_uri) {
            return Some(host);
        }
        let context = self.part_context()?;
        let host = context.create_host(&self.host_address(host_uri.clone()))?;
        Some(self.add_host(host_uri.clone(), host))
    }

    fn add_host(&self, host_uri: Uri, host: Arc<dyn HostBinding>) -> Arc<dyn HostBinding> {
        open_entry(&self.hosts, &host_uri, host, &self.status, |host| {
            self.wire_host(&host_uri, host)
        })
    }

    fn close_host(&self, host_uri: &Uri) {
        if let Some(host) = close_entry(&self.hosts, host_uri) {
            if let Err(error) = host.close() {
                self.log(LogLevel::Warn, &error);
            }
        }
    }

    fn open_uplink(&self, link: Arc<dyn LinkBinding>) {
        let host_uri = link.link_address().host_uri;
        match self.resolve_host(&host_uri) {
            Some(host) => host.open_uplink(link),
            None => reject_link(&*link, MeshworkError::HostNotFound(host_uri)),
        }
    }

    fn push_up(&self, request: PushRequest) {
        match self.resolve_host(&request.host_uri) {
            Some(host) => host.push_up(request),
            None => {
                let error = MeshworkError::HostNotFound(request.host_uri.clone());
                request.did_decline(error);
            }
        }
    }
}

/// Context a [`PartTable`] assigns to each of its hosts
struct PartTableHost {
    part: Weak<PartTable>,
    host_uri: Uri,
}

impl PartTableHost {
    fn part_context(&self) -> Option<Arc<dyn PartContext>> {
        self.part.upgrade().and_then(|part| part.part_context())
    }
}

impl TierContext for PartTableHost {
    fn services(&self) -> Arc<Services> {
        match self.part_context() {
            Some(context) => context.services(),
            None => detached_services(),
        }
    }

    fn origin(&self) -> String {
        if self.host_uri.is_defined() {
            self.host_uri.to_string()
        } else {
            "master".to_string()
        }
    }

    fn record(&self, entry: LogEntry) {
        match self.part_context() {
            Some(context) => context.record(entry),
            None => entry.emit(),
        }
    }
}

impl HostContext for PartTableHost {
    fn host_address(&self) -> HostAddress {
        match self.part.upgrade() {
            Some(part) => part.host_address(self.host_uri.clone()),
            None => crate::host::detached_host_address(self.host_uri.clone()),
        }
    }

    fn outer_host(&self) -> Option<Arc<dyn HostBinding>> {
        None
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

    fn authenticate(&self, credentials: &Credentials) -> PolicyDirective<Identity> {
        self.policy().authenticate(credentials)
    }

    fn host_did_connect(&self) {
        self.debug(&format_args!("host {} connected", self.host_uri));
    }

    fn host_did_disconnect(&self) {
        self.debug(&format_args!("host {} disconnected", self.host_uri));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::host::HostTable;
    use meshwork_core::Lifecycle;

    #[test]
    fn test_predicates() {
        let room = Uri::parse("/room/1");
        assert!(PartPredicate::Any.test(&room));
        assert!(!PartPredicate::Meta.test(&room));
        assert!(PartPredicate::Meta.test(&Uri::parse("meta:mesh")));
        assert!(PartPredicate::node_prefix("/room").test(&room));
        assert!(!PartPredicate::node_prefix("/lobby").test(&room));
        assert!(PartPredicate::hash_range(0, u32::MAX).test(&room));
    }

    proptest::proptest! {
        #[test]
        fn test_hash_ranges_partition_uris(path in "/[a-z0-9/]{0,24}", split in 0u32..u32::MAX) {
            let uri = Uri::parse(&path);
            let low = PartPredicate::hash_range(0, split);
            let high = PartPredicate::hash_range(split + 1, u32::MAX);
            proptest::prop_assert_ne!(low.test(&uri), high.test(&uri));
        }
    }

    #[test]
    fn test_predicate_serde_shape() {
        let json = serde_json::to_string(&PartPredicate::node_prefix("/a")).unwrap();
        assert_eq!(json, r#"{"type":"nodePrefix","prefix":"/a"}"#);
    }

    #[test]
    fn test_master_host_is_empty_uri() {
        let part = PartTable::new(PartKey::Extant, PartPredicate::Any);
        assert!(part.master().is_none());
        part.add_host(Uri::empty(), HostTable::new(Uri::empty()));
        part.add_host(Uri::parse("warp://peer"), HostTable::new(Uri::parse("warp://peer")));
        assert_eq!(part.master().map(|host| host.host_uri()), Some(Uri::empty()));
        assert_eq!(part.hosts().len(), 2);
    }

    #[test]
    fn test_push_to_unknown_host_declines_without_context() {
        let part = PartTable::new(PartKey::Extant, PartPredicate::Any);
        part.open().unwrap();
        let declined = Arc::new(parking_lot::Mutex::new(None));
        let sink = declined.clone();
        let request = PushRequest::new(meshwork_core::Envelope::command(
            Uri::parse("/n"),
            Uri::parse("l"),
            "x",
        ))
        .on_complete(move |outcome| *sink.lock() = Some(outcome));
        part.push_up(request);
        assert_eq!(
            declined.lock().take(),
            Some(crate::push::PushOutcome::Declined(MeshworkError::HostNotFound(Uri::empty())))
        );
    }
}
