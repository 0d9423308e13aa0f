//! Meshwork Core - Fundamental types and primitives
//!
//! This crate defines the types shared by every meshwork crate:
//! - URIs and the hierarchical address model (mesh, part, host, node, lane, link)
//! - Opaque envelopes
//! - The tier lifecycle state machine
//! - Credit-based flow control cells
//! - The compare-and-swap snapshot cell backing membership tables
//! - Contracts of external collaborators (stage, schedule, store, policy, transport)
//! - Error taxonomy and log entries

pub mod uri;
pub mod address;
pub mod envelope;
pub mod error;
pub mod lifecycle;
pub mod flow;
pub mod cell;
pub mod log;
pub mod service;

pub use uri::*;
pub use address::*;
pub use envelope::*;
pub use error::*;
pub use lifecycle::*;
pub use flow::*;
pub use cell::*;
pub use log::*;
pub use service::*;
