//! # pim-sm-rs
//!
//! The upstream (source, group) state machine of a PIM Sparse-Mode
//! multicast routing engine: per-flow Join/Prune state toward the
//! upstream neighbor, shared-tree to source-tree switchover, First-Hop
//! Router register encapsulation toward the Rendezvous Point, and
//! traffic-driven keepalive.
//!
//! The crate implements the state machine only. Neighbor discovery,
//! packet codecs, route lookup, assert elections, and the kernel
//! forwarding table are collaborators behind the traits in [`system`];
//! plug in real implementations to build a daemon, or test doubles to
//! drive the machine deterministically.
//!
//! ```no_run
//! use std::cell::RefCell;
//! use std::rc::Rc;
//! use std::time::Instant;
//!
//! use pim_sm_rs::config::UpstreamConfig;
//! use pim_sm_rs::engine::{Collaborators, UpstreamEngine};
//! use pim_sm_rs::runtime::spawn_tick_task;
//!
//! # fn collaborators() -> Collaborators { unimplemented!() }
//! # async fn demo() {
//! let engine = UpstreamEngine::new(UpstreamConfig::default(), collaborators(), Instant::now());
//! let engine = Rc::new(RefCell::new(engine));
//! // inside a tokio LocalSet on a current-thread runtime:
//! let driver = spawn_tick_task(Rc::clone(&engine));
//! # drop(driver);
//! # }
//! ```
//!
//! All state is in-memory; after a restart it is rebuilt from live
//! protocol exchange.

pub mod config;
pub mod engine;
pub mod runtime;
pub mod system;
pub mod upstream;

pub use config::UpstreamConfig;
pub use engine::{Collaborators, UpstreamEngine};
pub use system::{FlowCounters, IfChannel, IfIndex, OifFlag, OilId, RpfInfo};
pub use upstream::{
    JoinState, RegisterState, UpstreamEntry, UpstreamError, UpstreamFlags, UpstreamKey,
    UpstreamRegistry,
};
