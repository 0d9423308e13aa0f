//! Lanes: the endpoints links attach to

pub mod command;
pub mod demand;
pub mod http;
pub mod relay;
pub mod supply;
pub mod uplink;

pub use command::*;
pub use demand::*;
pub use http::*;
pub use relay::*;
pub use supply::*;
pub use uplink::*;

use std::any::TypeId;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::RwLock;

use meshwork_core::{
    Envelope, LaneAddress, LinkKey, LogLevel, MeshworkError, Phase, TierState, TierStatus, Uri,
};

use crate::link::LinkBinding;
use crate::push::PushRequest;
use crate::tier::{log_via, Capability, TierBinding, TierContext};

/// What a lane offers its node
pub trait LaneBinding: TierBinding {
    fn lane_uri(&self) -> Uri;
    fn lane_type(&self) -> &'static str;

    fn lane_context(&self) -> Option<Arc<dyn LaneContext>>;
    fn set_lane_context(&self, context: Arc<dyn LaneContext>);
    fn unwrap_lane(&self, type_id: TypeId) -> Option<Capability>;

    fn uplink_count(&self) -> usize;

    /// Attach `link`, or reject it through `did_fail`
    fn open_uplink(&self, link: Arc<dyn LinkBinding>);
    fn close_uplink(&self, key: LinkKey);

    /// Handle a one-shot routed request
    fn push_up(&self, request: PushRequest);

    /// Handle a command received over the uplink `key`
    fn push_up_command(&self, key: LinkKey, envelope: Envelope);
}

/// What a node provides to its lanes
pub trait LaneContext: TierContext {
    fn lane_address(&self) -> LaneAddress;
    fn push_down(&self, request: PushRequest);
}

/// Unwrap `lane` to concrete type `T`
pub fn unwrap_lane<T: Send + Sync + 'static>(lane: &dyn LaneBinding) -> Option<Arc<T>> {
    lane.unwrap_lane(TypeId::of::<T>())
        .and_then(crate::tier::downcast::<T>)
}

/// State shared by every lane implementation
pub struct LaneCore {
    pub(crate) status: TierStatus,
    lane_uri: Uri,
    context: RwLock<Option<Arc<dyn LaneContext>>>,
    next_key: AtomicU64,
}

impl LaneCore {
    pub fn new(lane_uri: Uri) -> Self {
        LaneCore {
            status: TierStatus::new(),
            lane_uri,
            context: RwLock::new(None),
            next_key: AtomicU64::new(1),
        }
    }

    pub fn lane_uri(&self) -> &Uri {
        &self.lane_uri
    }

    pub fn state(&self) -> TierState {
        self.status.state()
    }

    pub fn context(&self) -> Option<Arc<dyn LaneContext>> {
        self.context.read().clone()
    }

    pub fn set_context(&self, context: Arc<dyn LaneContext>) {
        *self.context.write() = Some(context);
    }

    pub fn clear_context(&self) {
        self.context.write().take();
    }

    pub fn next_link_key(&self) -> LinkKey {
        LinkKey(self.next_key.fetch_add(1, Ordering::Relaxed))
    }

    pub fn log(&self, level: LogLevel, message: &dyn fmt::Display) {
        log_via(self.context(), || self.lane_uri.to_string(), level, message);
    }

    /// Fail the lane and report `error`
    pub fn fail(&self, error: MeshworkError) {
        self.status.fail();
        self.log(LogLevel::Fail, &error);
    }
}

/// Uplinks attached to a lane, keyed by link
pub struct UplinkSet<S: DownSource> {
    uplinks: RwLock<BTreeMap<LinkKey, Arc<Uplink<S>>>>,
}

impl<S: DownSource> UplinkSet<S> {
    pub fn new() -> Self {
        UplinkSet {
            uplinks: RwLock::new(BTreeMap::new()),
        }
    }

    pub fn insert(&self, uplink: Arc<Uplink<S>>) {
        self.uplinks.write().insert(uplink.key(), uplink);
    }

    pub fn remove(&self, key: LinkKey) -> Option<Arc<Uplink<S>>> {
        self.uplinks.write().remove(&key)
    }

    pub fn get(&self, key: LinkKey) -> Option<Arc<Uplink<S>>> {
        self.uplinks.read().get(&key).cloned()
    }

    /// Snapshot, so callbacks never run under the lock
    pub fn snapshot(&self) -> Vec<Arc<Uplink<S>>> {
        self.uplinks.read().values().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.uplinks.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.uplinks.read().is_empty()
    }

    /// Close and drop every uplink
    pub fn close_all(&self) {
        let uplinks: Vec<_> = std::mem::take(&mut *self.uplinks.write()).into_values().collect();
        for uplink in uplinks {
            uplink.close();
        }
    }
}

impl<S: DownSource> Default for UplinkSet<S> {
    fn default() -> Self {
        Self::new()
    }
}

/// Attach `link` to a lane: create its uplink, assign the context, and
/// signal the binding that flow control may begin
pub(crate) fn attach_uplink<S: DownSource>(
    core: &LaneCore,
    uplinks: &UplinkSet<S>,
    lane: Weak<dyn LaneBinding>,
    link: Arc<dyn LinkBinding>,
    source: S,
) -> Option<Arc<Uplink<S>>> {
    let Some(context) = core.context() else {
        crate::link::reject_link(&*link, MeshworkError::LinkClosed);
        return None;
    };
    if core.state().is_closed() || core.state().is_failed() {
        crate::link::reject_link(&*link, MeshworkError::LinkClosed);
        return None;
    }
    let address = context.lane_address();
    let uplink = Uplink::open(core.next_link_key(), address, link.clone(), lane, context.stage(), source);
    uplinks.insert(uplink.clone());
    link.set_link_context(uplink.clone());
    link.open_down();
    Some(uplink)
}

/// Close hook shared by lanes: tears down uplinks and releases the context
pub(crate) fn close_lane<S: DownSource>(core: &LaneCore, uplinks: &UplinkSet<S>, phase: Phase) {
    if phase == Phase::Close {
        uplinks.close_all();
        core.clear_context();
    }
}
