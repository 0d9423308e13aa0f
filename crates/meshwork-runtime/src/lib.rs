//! Meshwork Runtime - The tier graph and its routing
//!
//! An [`Edge`] roots a graph of tiers:
//!
//! ```text
//! edge → mesh → part → host → node → lane ⇄ link
//! ```
//!
//! Every tier pairs a binding (what it offers its parent) with a context
//! (what its parent provides to it). Membership tables are copy-on-write
//! snapshots published by compare-and-swap, so lookups never block and
//! concurrent lazy creation installs exactly one child per address.
//! Links move envelopes in both directions under credit-based flow control.

pub mod config;
pub mod logging;
pub mod tier;
pub mod table;
pub mod push;
pub mod link;
pub mod lane;
pub mod node;
pub mod host;
pub mod part;
pub mod mesh;
pub mod proxy;
pub mod kernel;
pub mod edge;
pub mod reflect;
pub mod stage;

pub use config::*;
pub use tier::*;
pub use table::*;
pub use push::*;
pub use link::*;
pub use lane::*;
pub use node::*;
pub use host::*;
pub use part::*;
pub use mesh::*;
pub use proxy::*;
pub use kernel::*;
pub use edge::*;
pub use reflect::*;
pub use stage::*;
