//! Lane side of a link

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

use bytes::Bytes;

use meshwork_core::{
    Envelope, FlowStats, Identity, LaneAddress, LinkFlow, LinkKey, MeshworkError, Stage,
};

use crate::lane::LaneBinding;
use crate::link::{LinkBinding, LinkContext};

/// Source of envelope bodies an uplink pushes down
///
/// `next_down` is only called while the consumer holds a down credit.
/// Returning `None` must leave the source unchanged.
pub trait DownSource: Send + Sync + 'static {
    fn next_down(&self) -> Option<Bytes>;

    /// True while more bodies are waiting
    fn is_pending(&self) -> bool;
}

/// Uplink bridging one link binding to its lane
pub struct Uplink<S: DownSource> {
    key: LinkKey,
    address: LaneAddress,
    link: Arc<dyn LinkBinding>,
    lane: Weak<dyn LaneBinding>,
    stage: Arc<dyn Stage>,
    flow: LinkFlow,
    source: S,
    closed: AtomicBool,
    me: Weak<Uplink<S>>,
}

impl<S: DownSource> Uplink<S> {
    pub fn open(
        key: LinkKey,
        address: LaneAddress,
        link: Arc<dyn LinkBinding>,
        lane: Weak<dyn LaneBinding>,
        stage: Arc<dyn Stage>,
        source: S,
    ) -> Arc<Self> {
        Arc::new_cyclic(|me| Uplink {
            key,
            address,
            link,
            lane,
            stage,
            flow: LinkFlow::new(),
            source,
            closed: AtomicBool::new(false),
            me: me.clone(),
        })
    }

    #[inline]
    pub fn key(&self) -> LinkKey {
        self.key
    }

    pub fn source(&self) -> &S {
        &self.source
    }

    pub fn link(&self) -> &Arc<dyn LinkBinding> {
        &self.link
    }

    pub fn stats(&self) -> FlowStats {
        self.flow.stats()
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Signal that the source has data for the consumer
    pub fn feed(&self) {
        if self.is_closed() {
            return;
        }
        if self.flow.down.feed() {
            self.link.feed_down();
        }
    }

    /// Close from the lane side
    pub fn close(&self) {
        if !self.closed.swap(true, Ordering::AcqRel) {
            self.link.close_down();
        }
    }

    fn pump_down(&self) {
        if self.is_closed() {
            return;
        }
        match self.source.next_down() {
            Some(body) => {
                if self.flow.take_down() {
                    let envelope = Envelope::event(
                        self.address.node_uri.clone(),
                        self.address.lane_uri.clone(),
                        body,
                    );
                    self.link.push_down(envelope);
                }
            }
            None => {
                if self.flow.skip_down() {
                    self.link.skip_down();
                }
            }
        }
        // A producer feeding between `next_down` and the credit update
        // coalesces into the already-set signal; re-check so it is not lost.
        if self.source.is_pending() {
            self.feed();
        }
    }

    fn schedule(&self, task: fn(&Uplink<S>)) {
        if let Some(me) = self.me.upgrade() {
            self.stage.execute(Box::new(move || task(&me)));
        }
    }

    fn detach(&self) {
        if let Some(lane) = self.lane.upgrade() {
            lane.close_uplink(self.key);
        }
    }
}

impl<S: DownSource> LinkContext for Uplink<S> {
    fn link_key(&self) -> LinkKey {
        self.key
    }

    fn outer_link(&self) -> Option<Arc<dyn LinkBinding>> {
        None
    }

    fn is_connected_up(&self) -> bool {
        !self.is_closed()
    }

    fn is_remote_up(&self) -> bool {
        false
    }

    fn is_secure_up(&self) -> bool {
        true
    }

    fn remote_identity_up(&self) -> Option<Identity> {
        None
    }

    fn feed_up(&self) {
        if self.is_closed() {
            return;
        }
        if self.flow.up.pull() {
            self.schedule(|uplink| uplink.link.pull_up());
        }
    }

    fn push_up(&self, envelope: Envelope) {
        if self.is_closed() {
            return;
        }
        if !self.flow.take_up() {
            tracing::warn!(
                lane = %self.address.lane_uri,
                error = %MeshworkError::FlowViolation("push_up without credit"),
                "dropping command"
            );
            return;
        }
        if let Some(lane) = self.lane.upgrade() {
            lane.push_up_command(self.key, envelope);
        }
    }

    fn skip_up(&self) {
        self.flow.up.skip();
    }

    fn pull_down(&self) {
        if self.is_closed() {
            return;
        }
        if self.flow.down.pull() {
            self.schedule(Uplink::pump_down);
        }
    }

    fn close_up(&self) {
        if !self.closed.swap(true, Ordering::AcqRel) {
            self.detach();
            self.link.did_close_up();
        }
    }

    fn did_close_down(&self) {
        self.closed.store(true, Ordering::Release);
        self.detach();
    }
}
