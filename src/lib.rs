//! A demand-paging cache controller: a small fully associative cache of
//! fixed-size pages in front of a large external memory, moving whole pages
//! across a credit flow-controlled link on demand.
//!
//! The cycle-level core lives in [`controller`]. [`system::System`] clocks it
//! against a [`host::HostMemory`] link partner directly, [`sim`] runs the
//! same parts as asynchronix models.

pub mod error;

pub mod client;
pub mod common;
pub mod controller;
pub mod host;
pub mod link;
pub mod lru;
pub mod memory;
pub mod protocol;
pub mod sim;
pub mod system;
pub mod tags;

pub use common::*;
pub use controller::{CacheController, CacheStats};
pub use error::{ConfigError, SimError, SimResult};
pub use system::System;
