//! Demand lanes compute values lazily, only when a consumer pulls
//!
//! A cue marks an uplink as having something to send without computing
//! it. When the consumer pulls, the uplink asks the lane's
//! [`DemandSource`] for the value; an absent result is skipped and leaves
//! no trace, so repeated cues for a value that no longer exists are free.

use std::any::TypeId;
use std::collections::VecDeque;
use std::sync::{Arc, Weak};

use bytes::Bytes;
use parking_lot::Mutex;

use meshwork_core::{Envelope, LinkKey, LogLevel, MeshworkError, Phase, TierHooks, Uri};

use crate::lane::{attach_uplink, close_lane, DownSource, LaneBinding, LaneContext, LaneCore, UplinkSet};
use crate::link::LinkBinding;
use crate::push::PushRequest;
use crate::tier::{own_capability, tier_lifecycle, Capability, TierBinding};

/// Computes the next value for a cued key
///
/// `key` is `None` for a whole-value cue. The uplink may call this again
/// on every poll until a pull consumes the cue, so implementations must be
/// free of side effects.
pub trait DemandSource: Send + Sync + 'static {
    fn next_down_cue(&self, key: Option<&str>) -> Option<Bytes>;
}

impl<F> DemandSource for F
where
    F: Fn(Option<&str>) -> Option<Bytes> + Send + Sync + 'static,
{
    fn next_down_cue(&self, key: Option<&str>) -> Option<Bytes> {
        self(key)
    }
}

/// Per-uplink set of outstanding cues
pub struct DemandQueue {
    cues: Mutex<VecDeque<Option<String>>>,
    source: Arc<dyn DemandSource>,
}

impl DemandQueue {
    pub fn new(source: Arc<dyn DemandSource>) -> Self {
        DemandQueue {
            cues: Mutex::new(VecDeque::new()),
            source,
        }
    }

    /// Record a cue; duplicates of a pending cue coalesce
    pub fn cue(&self, key: Option<String>) {
        let mut cues = self.cues.lock();
        if !cues.contains(&key) {
            cues.push_back(key);
        }
    }

    pub fn pending(&self) -> usize {
        self.cues.lock().len()
    }
}

impl DownSource for DemandQueue {
    fn next_down(&self) -> Option<Bytes> {
        loop {
            let key = self.cues.lock().pop_front()?;
            if let Some(body) = self.source.next_down_cue(key.as_deref()) {
                return Some(body);
            }
        }
    }

    fn is_pending(&self) -> bool {
        !self.cues.lock().is_empty()
    }
}

/// Lane whose values are computed on pull
pub struct DemandLane {
    core: LaneCore,
    uplinks: UplinkSet<DemandQueue>,
    source: Arc<dyn DemandSource>,
    me: Weak<DemandLane>,
}

impl DemandLane {
    pub fn new(lane_uri: Uri, source: impl DemandSource) -> Arc<Self> {
        Self::with_source(lane_uri, Arc::new(source))
    }

    pub fn with_source(lane_uri: Uri, source: Arc<dyn DemandSource>) -> Arc<Self> {
        Arc::new_cyclic(|me| DemandLane {
            core: LaneCore::new(lane_uri),
            uplinks: UplinkSet::new(),
            source,
            me: me.clone(),
        })
    }

    /// Mark the whole value as changed on every uplink
    pub fn cue(&self) {
        self.cue_all(None);
    }

    /// Mark `key` as changed on every uplink
    pub fn cue_key(&self, key: impl Into<String>) {
        self.cue_all(Some(key.into()));
    }

    fn cue_all(&self, key: Option<String>) {
        for uplink in self.uplinks.snapshot() {
            uplink.source().cue(key.clone());
            uplink.feed();
        }
    }
}

impl TierHooks for DemandLane {
    fn did_enter(&self, phase: Phase) {
        close_lane(&self.core, &self.uplinks, phase);
    }
}

tier_lifecycle!(DemandLane, core.status);

impl TierBinding for DemandLane {
    fn did_fail(&self, error: MeshworkError) {
        self.core.fail(error);
    }
}

impl LaneBinding for DemandLane {
    fn lane_uri(&self) -> Uri {
        self.core.lane_uri().clone()
    }

    fn lane_type(&self) -> &'static str {
        "demand"
    }

    fn lane_context(&self) -> Option<Arc<dyn LaneContext>> {
        self.core.context()
    }

    fn set_lane_context(&self, context: Arc<dyn LaneContext>) {
        self.core.set_context(context);
    }

    fn unwrap_lane(&self, type_id: TypeId) -> Option<Capability> {
        own_capability(&self.me, type_id)
    }

    fn uplink_count(&self) -> usize {
        self.uplinks.len()
    }

    fn open_uplink(&self, link: Arc<dyn LinkBinding>) {
        let lane: Weak<dyn LaneBinding> = self.me.clone();
        let queue = DemandQueue::new(self.source.clone());
        attach_uplink(&self.core, &self.uplinks, lane, link, queue);
    }

    fn close_uplink(&self, key: LinkKey) {
        if let Some(uplink) = self.uplinks.remove(key) {
            uplink.close();
        }
    }

    fn push_up(&self, request: PushRequest) {
        request.did_decline(MeshworkError::Unsupported("demand lanes accept no commands"));
    }

    fn push_up_command(&self, key: LinkKey, _envelope: Envelope) {
        self.core.log(LogLevel::Debug, &format_args!("ignoring command from {key}"));
    }
}
