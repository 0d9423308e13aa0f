//! Supply lanes push every published value to each attached uplink

use std::any::TypeId;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use bytes::Bytes;
use parking_lot::Mutex;

use meshwork_core::{Envelope, LinkKey, LogLevel, MeshworkError, Phase, TierHooks, Uri};

use crate::lane::{attach_uplink, close_lane, DownSource, LaneBinding, LaneContext, LaneCore, UplinkSet};
use crate::link::LinkBinding;
use crate::push::PushRequest;
use crate::tier::{own_capability, tier_lifecycle, Capability, TierBinding};

pub const DEFAULT_SUPPLY_LIMIT: usize = 1024;

/// Bounded FIFO of bodies waiting for down credit
///
/// When full, the oldest body is dropped to make room.
pub struct SupplyQueue {
    queue: Mutex<VecDeque<Bytes>>,
    limit: usize,
    dropped: AtomicU64,
}

impl SupplyQueue {
    pub fn new(limit: usize) -> Self {
        SupplyQueue {
            queue: Mutex::new(VecDeque::new()),
            limit: limit.max(1),
            dropped: AtomicU64::new(0),
        }
    }

    pub fn push(&self, body: Bytes) {
        let mut queue = self.queue.lock();
        if queue.len() >= self.limit {
            queue.pop_front();
            self.dropped.fetch_add(1, Ordering::Relaxed);
        }
        queue.push_back(body);
    }

    pub fn len(&self) -> usize {
        self.queue.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.lock().is_empty()
    }

    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

impl DownSource for SupplyQueue {
    fn next_down(&self) -> Option<Bytes> {
        self.queue.lock().pop_front()
    }

    fn is_pending(&self) -> bool {
        !self.is_empty()
    }
}

/// Lane that fans published values out to its uplinks
pub struct SupplyLane {
    core: LaneCore,
    uplinks: UplinkSet<SupplyQueue>,
    limit: usize,
    me: Weak<SupplyLane>,
}

impl SupplyLane {
    pub fn new(lane_uri: Uri) -> Arc<Self> {
        Self::with_limit(lane_uri, DEFAULT_SUPPLY_LIMIT)
    }

    pub fn with_limit(lane_uri: Uri, limit: usize) -> Arc<Self> {
        Arc::new_cyclic(|me| SupplyLane {
            core: LaneCore::new(lane_uri),
            uplinks: UplinkSet::new(),
            limit,
            me: me.clone(),
        })
    }

    /// Publish `body` to every attached uplink
    pub fn push(&self, body: impl Into<Bytes>) {
        let body = body.into();
        for uplink in self.uplinks.snapshot() {
            uplink.source().push(body.clone());
            uplink.feed();
        }
    }

    /// Bodies dropped across all uplinks because their queues were full
    pub fn dropped(&self) -> u64 {
        self.uplinks
            .snapshot()
            .iter()
            .map(|uplink| uplink.source().dropped())
            .sum()
    }

    fn weak_lane(&self) -> Weak<dyn LaneBinding> {
        self.me.clone()
    }
}

impl TierHooks for SupplyLane {
    fn did_enter(&self, phase: Phase) {
        close_lane(&self.core, &self.uplinks, phase);
    }
}

tier_lifecycle!(SupplyLane, core.status);

impl TierBinding for SupplyLane {
    fn did_fail(&self, error: MeshworkError) {
        self.core.fail(error);
    }
}

impl LaneBinding for SupplyLane {
    fn lane_uri(&self) -> Uri {
        self.core.lane_uri().clone()
    }

    fn lane_type(&self) -> &'static str {
        "supply"
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
        let source = SupplyQueue::new(self.limit);
        attach_uplink(&self.core, &self.uplinks, self.weak_lane(), link, source);
    }

    fn close_uplink(&self, key: LinkKey) {
        if let Some(uplink) = self.uplinks.remove(key) {
            uplink.close();
        }
    }

    fn push_up(&self, request: PushRequest) {
        request.did_decline(MeshworkError::Unsupported("supply lanes accept no commands"));
    }

    fn push_up_command(&self, key: LinkKey, envelope: Envelope) {
        self.core.log(
            LogLevel::Debug,
            &format_args!("ignoring command from {} ({} bytes)", key, envelope.len()),
        );
    }
}
