//! Link proxy
//!
//! Sits between a lane's uplink and a downlink. Pushes, skips and credit
//! grants in both directions pass through the layer; feeds and close
//! signals forward unchanged.

use std::any::TypeId;
use std::sync::{Arc, Weak};

use parking_lot::RwLock;

use meshwork_core::{Envelope, Identity, LinkAddress, LinkKey, MeshworkError};

use crate::link::{LinkBinding, LinkContext};
use crate::tier::{own_capability, Capability};

/// Calls a [`LinkProxy`] lets its layer intercept
pub trait LinkLayer: Send + Sync + 'static {
    fn push_down(&self, link: &dyn LinkBinding, envelope: Envelope) {
        link.push_down(envelope);
    }

    fn skip_down(&self, link: &dyn LinkBinding) {
        link.skip_down();
    }

    /// The lane granted one up credit
    fn pull_up(&self, link: &dyn LinkBinding) {
        link.pull_up();
    }

    fn push_up(&self, context: &dyn LinkContext, envelope: Envelope) {
        context.push_up(envelope);
    }

    fn skip_up(&self, context: &dyn LinkContext) {
        context.skip_up();
    }

    /// The consumer granted one down credit
    fn pull_down(&self, context: &dyn LinkContext) {
        context.pull_down();
    }
}

impl LinkLayer for () {}

pub struct LinkProxy<L: LinkLayer = ()> {
    inner: Arc<dyn LinkBinding>,
    layer: L,
    context: RwLock<Option<Arc<dyn LinkContext>>>,
    me: Weak<LinkProxy<L>>,
}

impl<L: LinkLayer> LinkProxy<L> {
    pub fn new(inner: Arc<dyn LinkBinding>, layer: L) -> Arc<Self> {
        Arc::new_cyclic(|me| LinkProxy {
            inner,
            layer,
            context: RwLock::new(None),
            me: me.clone(),
        })
    }

    pub fn inner(&self) -> &Arc<dyn LinkBinding> {
        &self.inner
    }

    pub fn layer(&self) -> &L {
        &self.layer
    }
}

impl LinkProxy {
    pub fn transparent(inner: Arc<dyn LinkBinding>) -> Arc<Self> {
        Self::new(inner, ())
    }
}

impl<L: LinkLayer> LinkBinding for LinkProxy<L> {
    fn link_address(&self) -> LinkAddress {
        self.inner.link_address()
    }

    fn link_context(&self) -> Option<Arc<dyn LinkContext>> {
        self.context.read().clone()
    }

    fn set_link_context(&self, context: Arc<dyn LinkContext>) {
        *self.context.write() = Some(context);
        if let Some(me) = self.me.upgrade() {
            self.inner.set_link_context(me);
        }
    }

    fn link_wrapper(self: Arc<Self>) -> Arc<dyn LinkBinding> {
        match self.link_context().and_then(|context| context.outer_link()) {
            Some(outer) => outer,
            None => self,
        }
    }

    fn unwrap_link(&self, type_id: TypeId) -> Option<Capability> {
        own_capability(&self.me, type_id).or_else(|| self.inner.unwrap_link(type_id))
    }

    fn is_connected_down(&self) -> bool {
        self.inner.is_connected_down()
    }

    fn is_remote_down(&self) -> bool {
        self.inner.is_remote_down()
    }

    fn is_secure_down(&self) -> bool {
        self.inner.is_secure_down()
    }

    fn remote_identity_down(&self) -> Option<Identity> {
        self.inner.remote_identity_down()
    }

    fn open_down(&self) {
        self.inner.open_down();
    }

    fn feed_down(&self) {
        self.inner.feed_down();
    }

    fn push_down(&self, envelope: Envelope) {
        self.layer.push_down(&*self.inner, envelope);
    }

    fn skip_down(&self) {
        self.layer.skip_down(&*self.inner);
    }

    fn pull_up(&self) {
        self.layer.pull_up(&*self.inner);
    }

    fn close_down(&self) {
        self.inner.close_down();
    }

    fn did_close_up(&self) {
        self.inner.did_close_up();
    }

    fn did_connect(&self) {
        self.inner.did_connect();
    }

    fn did_disconnect(&self) {
        self.inner.did_disconnect();
    }

    fn did_fail(&self, error: MeshworkError) {
        self.inner.did_fail(error);
    }
}

impl<L: LinkLayer> LinkContext for LinkProxy<L> {
    fn link_key(&self) -> LinkKey {
        match self.link_context() {
            Some(context) => context.link_key(),
            None => LinkKey(0),
        }
    }

    fn outer_link(&self) -> Option<Arc<dyn LinkBinding>> {
        self.link_context()
            .and_then(|context| context.outer_link())
            .or_else(|| self.me.upgrade().map(|me| me as Arc<dyn LinkBinding>))
    }

    fn is_connected_up(&self) -> bool {
        self.link_context().map_or(false, |context| context.is_connected_up())
    }

    fn is_remote_up(&self) -> bool {
        self.link_context().map_or(false, |context| context.is_remote_up())
    }

    fn is_secure_up(&self) -> bool {
        self.link_context().map_or(false, |context| context.is_secure_up())
    }

    fn remote_identity_up(&self) -> Option<Identity> {
        self.link_context()?.remote_identity_up()
    }

    fn feed_up(&self) {
        if let Some(context) = self.link_context() {
            context.feed_up();
        }
    }

    fn push_up(&self, envelope: Envelope) {
        match self.link_context() {
            Some(context) => self.layer.push_up(&*context, envelope),
            None => tracing::debug!(link = %self.inner.link_address(), "dropped envelope on unattached link"),
        }
    }

    fn skip_up(&self) {
        if let Some(context) = self.link_context() {
            self.layer.skip_up(&*context);
        }
    }

    fn pull_down(&self) {
        if let Some(context) = self.link_context() {
            self.layer.pull_down(&*context);
        }
    }

    fn close_up(&self) {
        if let Some(context) = self.link_context() {
            context.close_up();
        }
    }

    fn did_close_down(&self) {
        if let Some(context) = self.link_context() {
            context.did_close_down();
        }
    }
}
