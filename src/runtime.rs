//! Async driver for the upstream engine
//!
//! The engine is deliberately synchronous and single-threaded; all this
//! module does is tick it on a cadence from a local (non-Send) tokio
//! task. Run inside a [`tokio::task::LocalSet`] on a current-thread
//! runtime so protocol event handlers and timer callbacks never execute
//! in parallel.

use std::cell::RefCell;
use std::rc::Rc;
use std::time::Instant;

use crate::engine::UpstreamEngine;

/// Spawn the periodic timer tick task for an engine
///
/// Must be called from within a `LocalSet` context. Returns the task
/// handle; abort it to stop driving the engine.
pub fn spawn_tick_task(engine: Rc<RefCell<UpstreamEngine>>) -> tokio::task::JoinHandle<()> {
    let interval = engine.borrow().config().tick_interval;

    tokio::task::spawn_local(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            engine.borrow_mut().tick(Instant::now());
        }
    })
}
