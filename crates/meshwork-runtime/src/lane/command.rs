//! Command lanes hand pushed envelopes to a handler and echo them to uplinks

use std::any::TypeId;
use std::sync::{Arc, Weak};

use meshwork_core::{Envelope, LinkKey, MeshworkError, Phase, TierHooks, Uri};

use crate::lane::{
    attach_uplink, close_lane, LaneBinding, LaneContext, LaneCore, SupplyQueue, UplinkSet,
    DEFAULT_SUPPLY_LIMIT,
};
use crate::link::LinkBinding;
use crate::push::PushRequest;
use crate::tier::{own_capability, tier_lifecycle, Capability, TierBinding};

type CommandHandler = Box<dyn Fn(&Envelope) + Send + Sync + 'static>;

/// Lane that runs a handler for every command it receives
pub struct CommandLane {
    core: LaneCore,
    uplinks: UplinkSet<SupplyQueue>,
    on_command: CommandHandler,
    me: Weak<CommandLane>,
}

impl CommandLane {
    pub fn new(lane_uri: Uri, on_command: impl Fn(&Envelope) + Send + Sync + 'static) -> Arc<Self> {
        Arc::new_cyclic(|me| CommandLane {
            core: LaneCore::new(lane_uri),
            uplinks: UplinkSet::new(),
            on_command: Box::new(on_command),
            me: me.clone(),
        })
    }

    fn dispatch(&self, envelope: &Envelope) {
        (self.on_command)(envelope);
        for uplink in self.uplinks.snapshot() {
            uplink.source().push(envelope.body.clone());
            uplink.feed();
        }
    }
}

impl TierHooks for CommandLane {
    fn did_enter(&self, phase: Phase) {
        close_lane(&self.core, &self.uplinks, phase);
    }
}

tier_lifecycle!(CommandLane, core.status);

impl TierBinding for CommandLane {
    fn did_fail(&self, error: MeshworkError) {
        self.core.fail(error);
    }
}

impl LaneBinding for CommandLane {
    fn lane_uri(&self) -> Uri {
        self.core.lane_uri().clone()
    }

    fn lane_type(&self) -> &'static str {
        "command"
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
        let queue = SupplyQueue::new(DEFAULT_SUPPLY_LIMIT);
        attach_uplink(&self.core, &self.uplinks, lane, link, queue);
    }

    fn close_uplink(&self, key: LinkKey) {
        if let Some(uplink) = self.uplinks.remove(key) {
            uplink.close();
        }
    }

    fn push_up(&self, request: PushRequest) {
        if !self.core.state().is_started() {
            request.did_decline(MeshworkError::LinkClosed);
            return;
        }
        self.dispatch(&request.envelope);
        request.did_accept();
    }

    fn push_up_command(&self, _key: LinkKey, envelope: Envelope) {
        self.dispatch(&envelope);
    }
}
