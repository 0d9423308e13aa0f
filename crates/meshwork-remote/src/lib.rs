//! Meshwork Remote - Hosts reached over a transport
//!
//! This crate provides:
//! - [`RemoteHostClient`], a host binding that forwards pushes over a
//!   [`Transport`](meshwork_core::Transport) connection
//! - Reconnect backoff with jitter
//! - [`RemoteKernel`], which creates clients for `warp` and `warps` host URIs

pub mod backoff;
pub mod client;
pub mod kernel;

pub use backoff::*;
pub use client::*;
pub use kernel::*;
