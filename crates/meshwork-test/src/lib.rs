//! Meshwork Test Harness
//!
//! This crate provides:
//! - A virtual clock and a queueing stage for deterministic timing
//! - A scripted transport for remote host connect and disconnect runs
//! - Probe kernels that record traffic crossing proxies
//! - Edge fixtures wiring the above into a running tier graph

pub mod clock;
pub mod fixture;
pub mod probe;
pub mod transport;

#[cfg(test)]
mod flow_control;
#[cfg(test)]
mod remote;
#[cfg(test)]
mod scenarios;

pub use clock::*;
pub use fixture::*;
pub use probe::*;
pub use transport::*;
