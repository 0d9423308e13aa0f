//! Link contracts and the in-process downlink
//!
//! A link connects a consumer ([`LinkBinding`], the downlink side) to a
//! lane ([`LinkContext`], the uplink side). Both directions use the same
//! credit protocol:
//!
//! | direction | producer signals | consumer grants | producer sends |
//! |-----------|------------------|-----------------|----------------|
//! | down      | `feed_down`      | `pull_down`     | `push_down` / `skip_down` |
//! | up        | `feed_up`        | `pull_up`       | `push_up` / `skip_up` |

use std::any::TypeId;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use bytes::Bytes;
use parking_lot::{Mutex, RwLock};

use meshwork_core::{Envelope, Identity, LinkAddress, LinkKey, MeshworkError};

use crate::tier::{own_capability, Capability};

/// Consumer side of a link, exposed to the lane it attaches to
pub trait LinkBinding: Send + Sync {
    fn link_address(&self) -> LinkAddress;
    fn link_context(&self) -> Option<Arc<dyn LinkContext>>;
    fn set_link_context(&self, context: Arc<dyn LinkContext>);

    /// Outermost proxy around this binding
    fn link_wrapper(self: Arc<Self>) -> Arc<dyn LinkBinding>;
    fn unwrap_link(&self, type_id: TypeId) -> Option<Capability>;

    fn is_connected_down(&self) -> bool;
    fn is_remote_down(&self) -> bool;
    fn is_secure_down(&self) -> bool;
    fn remote_identity_down(&self) -> Option<Identity>;

    /// The uplink is attached and flow control may begin
    fn open_down(&self);
    fn feed_down(&self);
    fn push_down(&self, envelope: Envelope);
    fn skip_down(&self);
    fn pull_up(&self);
    fn close_down(&self);
    fn did_close_up(&self);
    fn did_connect(&self);
    fn did_disconnect(&self);
    fn did_fail(&self, error: MeshworkError);
}

/// Lane side of a link, assigned to the binding once it is routed
pub trait LinkContext: Send + Sync {
    fn link_key(&self) -> LinkKey;

    /// Outermost proxy above this context, if it is itself a proxy
    fn outer_link(&self) -> Option<Arc<dyn LinkBinding>>;

    fn is_connected_up(&self) -> bool;
    fn is_remote_up(&self) -> bool;
    fn is_secure_up(&self) -> bool;
    fn remote_identity_up(&self) -> Option<Identity>;

    fn feed_up(&self);
    fn push_up(&self, envelope: Envelope);
    fn skip_up(&self);
    fn pull_down(&self);
    fn close_up(&self);
    fn did_close_down(&self);
}

/// Unwrap `link` to concrete type `T`
pub fn unwrap_link<T: Send + Sync + 'static>(link: &dyn LinkBinding) -> Option<Arc<T>> {
    link.unwrap_link(TypeId::of::<T>())
        .and_then(crate::tier::downcast::<T>)
}

/// Reject a link that could not be routed
pub fn reject_link(link: &dyn LinkBinding, error: MeshworkError) {
    tracing::debug!(link = %link.link_address(), %error, "link rejected");
    link.did_fail(error);
}

type EventHandler = Box<dyn Fn(Envelope) + Send + Sync + 'static>;

/// Downlink consumed inside the process
///
/// Pulls one envelope each time the uplink feeds, hands it to the event
/// handler, and sends queued commands whenever the uplink grants an up
/// credit.
pub struct LocalDownlink {
    address: LinkAddress,
    context: RwLock<Option<Arc<dyn LinkContext>>>,
    on_event: EventHandler,
    outbox: Mutex<VecDeque<Envelope>>,
    opened: AtomicBool,
    connected: AtomicBool,
    closed: AtomicBool,
    received: AtomicU64,
    error: Mutex<Option<MeshworkError>>,
    identity: Option<Identity>,
    me: Weak<LocalDownlink>,
}

impl LocalDownlink {
    pub fn new(address: LinkAddress, on_event: impl Fn(Envelope) + Send + Sync + 'static) -> Arc<Self> {
        Self::with_identity(address, None, on_event)
    }

    /// Downlink presenting `identity` to the hosts it is routed through
    pub fn with_identity(
        address: LinkAddress,
        identity: Option<Identity>,
        on_event: impl Fn(Envelope) + Send + Sync + 'static,
    ) -> Arc<Self> {
        Arc::new_cyclic(|me| LocalDownlink {
            address,
            context: RwLock::new(None),
            on_event: Box::new(on_event),
            outbox: Mutex::new(VecDeque::new()),
            opened: AtomicBool::new(false),
            connected: AtomicBool::new(false),
            closed: AtomicBool::new(false),
            received: AtomicU64::new(0),
            error: Mutex::new(None),
            identity,
            me: me.clone(),
        })
    }

    /// Queue a command for the lane; sent once the uplink grants credit
    pub fn command(&self, body: impl Into<Bytes>) {
        let envelope = Envelope::command(
            self.address.node_uri.clone(),
            self.address.lane_uri.clone(),
            body,
        );
        self.outbox.lock().push_back(envelope);
        if self.opened.load(Ordering::Acquire) {
            if let Some(context) = self.link_context() {
                context.feed_up();
            }
        }
    }

    /// Ask the uplink to close
    pub fn close(&self) {
        if let Some(context) = self.link_context() {
            context.close_up();
        } else {
            self.closed.store(true, Ordering::Release);
        }
    }

    pub fn is_open(&self) -> bool {
        self.opened.load(Ordering::Acquire) && !self.closed.load(Ordering::Acquire)
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    pub fn received(&self) -> u64 {
        self.received.load(Ordering::Relaxed)
    }

    pub fn error(&self) -> Option<MeshworkError> {
        self.error.lock().clone()
    }

    fn finish(&self) {
        self.closed.store(true, Ordering::Release);
        self.connected.store(false, Ordering::Release);
        self.context.write().take();
    }
}

impl LinkBinding for LocalDownlink {
    fn link_address(&self) -> LinkAddress {
        self.address.clone()
    }

    fn link_context(&self) -> Option<Arc<dyn LinkContext>> {
        self.context.read().clone()
    }

    fn set_link_context(&self, context: Arc<dyn LinkContext>) {
        *self.context.write() = Some(context);
    }

    fn link_wrapper(self: Arc<Self>) -> Arc<dyn LinkBinding> {
        match self.link_context().and_then(|context| context.outer_link()) {
            Some(outer) => outer,
            None => self,
        }
    }

    fn unwrap_link(&self, type_id: TypeId) -> Option<Capability> {
        own_capability(&self.me, type_id)
    }

    fn is_connected_down(&self) -> bool {
        self.connected.load(Ordering::Acquire)
    }

    fn is_remote_down(&self) -> bool {
        false
    }

    fn is_secure_down(&self) -> bool {
        true
    }

    fn remote_identity_down(&self) -> Option<Identity> {
        self.identity.clone()
    }

    fn open_down(&self) {
        self.opened.store(true, Ordering::Release);
        self.connected.store(true, Ordering::Release);
        if !self.outbox.lock().is_empty() {
            if let Some(context) = self.link_context() {
                context.feed_up();
            }
        }
    }

    fn feed_down(&self) {
        if self.closed.load(Ordering::Acquire) {
            return;
        }
        if let Some(context) = self.link_context() {
            context.pull_down();
        }
    }

    fn push_down(&self, envelope: Envelope) {
        self.received.fetch_add(1, Ordering::Relaxed);
        (self.on_event)(envelope);
    }

    fn skip_down(&self) {
        tracing::trace!(link = %self.address, "skip down");
    }

    fn pull_up(&self) {
        let Some(context) = self.link_context() else {
            return;
        };
        let next = self.outbox.lock().pop_front();
        match next {
            Some(envelope) => context.push_up(envelope),
            None => context.skip_up(),
        }
        // A command queued before the credit was taken found it still
        // pulled and did not feed; re-check so it is not stranded.
        if !self.outbox.lock().is_empty() {
            context.feed_up();
        }
    }

    fn close_down(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        if let Some(context) = self.link_context() {
            context.did_close_down();
        }
        self.finish();
    }

    fn did_close_up(&self) {
        self.finish();
    }

    fn did_connect(&self) {
        self.connected.store(true, Ordering::Release);
    }

    fn did_disconnect(&self) {
        self.connected.store(false, Ordering::Release);
    }

    fn did_fail(&self, error: MeshworkError) {
        tracing::debug!(link = %self.address, %error, "downlink failed");
        *self.error.lock() = Some(error);
        self.finish();
    }
}
