//! Proxies decorate a tier without touching its code
//!
//! A proxy wraps one binding and implements both that binding's contract
//! and the matching context contract. Assigning the proxy a context makes
//! it install itself as the wrapped binding's context, so the chain reads
//! `parent context → proxy → inner binding`. Every call forwards
//! unchanged unless the proxy's layer intercepts it; `()` is the
//! transparent layer.
//!
//! Unwrapping walks from the outermost proxy inward and returns the first
//! layer whose concrete type matches.

pub mod host;
pub mod link;
pub mod node;
pub mod part;
pub mod policy;

pub use host::*;
pub use link::*;
pub use node::*;
pub use part::*;
pub use policy::*;

/// Implement [`Lifecycle`](meshwork_core::Lifecycle) for a proxy by routing
/// every transition through its layer's `transition` hook
macro_rules! proxy_lifecycle {
    ($proxy:ident, $layer:ident) => {
        impl<L: $layer> meshwork_core::Lifecycle for $proxy<L> {
            fn tier_state(&self) -> meshwork_core::TierState {
                self.inner.tier_state()
            }

            fn open(&self) -> meshwork_core::MeshworkResult<()> {
                self.layer.transition(&*self.inner, meshwork_core::Phase::Open)
            }

            fn load(&self) -> meshwork_core::MeshworkResult<()> {
                self.layer.transition(&*self.inner, meshwork_core::Phase::Load)
            }

            fn start(&self) -> meshwork_core::MeshworkResult<()> {
                self.layer.transition(&*self.inner, meshwork_core::Phase::Start)
            }

            fn stop(&self) -> meshwork_core::MeshworkResult<()> {
                self.layer.transition(&*self.inner, meshwork_core::Phase::Stop)
            }

            fn unload(&self) -> meshwork_core::MeshworkResult<()> {
                self.layer.transition(&*self.inner, meshwork_core::Phase::Unload)
            }

            fn close(&self) -> meshwork_core::MeshworkResult<()> {
                self.layer.transition(&*self.inner, meshwork_core::Phase::Close)
            }
        }
    };
}

pub(crate) use proxy_lifecycle;
