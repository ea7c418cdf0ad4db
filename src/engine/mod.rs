//! The upstream state machine engine
//!
//! [`UpstreamEngine`] is the single owning service object for all upstream
//! state: the registry, the traffic sweep wheel, and every per-entry
//! timer. It is plain synchronous code; every public operation is one
//! event callback that runs to completion before the next (there is no
//! locking because there is no parallelism). The async driver in
//! [`crate::runtime`] only calls [`UpstreamEngine::tick`] on a cadence.
//!
//! Within one callback the dependent re-evaluations always run in the
//! same sequence: predicate recompute, state switch, then timer
//! (re)start. Timer deadlines are explicit handles with cancel-on-replace
//! semantics; an entry is never destroyed while one is still armed.
//!
//! The submodules split the machine by concern and each contributes an
//! `impl UpstreamEngine` block:
//! - [`join`]: JoinDesired evaluation, the NotJoined/Joined switch, join
//!   refresh timers, suppression and override rules
//! - [`register`]: the FHR register sub-state-machine
//! - [`spt`]: SPT-bit assignment and switchover policy
//! - [`olist`]: inherited outgoing-interface-list computation
//! - [`sweep`]: the bucketed traffic sweep and the keepalive supervisor

pub mod join;
pub mod olist;
pub mod register;
pub mod spt;
pub mod sweep;

use std::net::Ipv4Addr;
use std::rc::Rc;
use std::time::Instant;

use rand::rngs::SmallRng;
use rand::SeedableRng;

use crate::config::UpstreamConfig;
use crate::system::{
    ChannelView, ForwardingPlane, IfIndex, JoinAggregator, MsdpHooks, RegisterSender, RouterInfo,
    RpfResolver,
};
use crate::upstream::{
    JoinState, UpstreamEntry, UpstreamError, UpstreamFlags, UpstreamKey, UpstreamRegistry,
};

use sweep::SweepWheel;

/// The collaborator set the engine drives (spec'd at the trait boundary
/// in [`crate::system`])
pub struct Collaborators {
    pub rpf: Rc<dyn RpfResolver>,
    pub forwarding: Rc<dyn ForwardingPlane>,
    pub neighbors: Rc<dyn JoinAggregator>,
    pub msdp: Rc<dyn MsdpHooks>,
    pub channels: Rc<dyn ChannelView>,
    pub router: Rc<dyn RouterInfo>,
    pub register: Rc<dyn RegisterSender>,
}

/// Upstream (source, group) state machine engine
pub struct UpstreamEngine {
    config: UpstreamConfig,
    sys: Collaborators,
    registry: UpstreamRegistry,
    wheel: SweepWheel,
    rng: SmallRng,
}

impl UpstreamEngine {
    /// Create an engine with entropy-seeded register jitter
    pub fn new(config: UpstreamConfig, sys: Collaborators, now: Instant) -> Self {
        Self::with_rng(config, sys, now, SmallRng::from_entropy())
    }

    /// Create an engine with a caller-provided jitter source, for
    /// deterministic tests
    pub fn with_rng(config: UpstreamConfig, sys: Collaborators, now: Instant, rng: SmallRng) -> Self {
        let wheel = SweepWheel::new(config.sweep_period, config.sweep_slots, now);
        Self {
            config,
            sys,
            registry: UpstreamRegistry::new(),
            wheel,
            rng,
        }
    }

    pub fn config(&self) -> &UpstreamConfig {
        &self.config
    }

    /// Read access to the registry, for inspection and show commands
    pub fn registry(&self) -> &UpstreamRegistry {
        &self.registry
    }

    /// Look up an entry by key
    pub fn find(&self, key: &UpstreamKey) -> Option<&UpstreamEntry> {
        self.registry.find(key)
    }

    /// Drop all upstream state, for daemon shutdown
    pub fn shutdown(&mut self) {
        tracing::info!(entries = self.registry.len(), "Upstream engine shutdown");
        self.wheel.clear();
        self.registry.clear();
    }

    /// Reference an upstream entry, creating it on first use
    ///
    /// On an existing entry the requested flags are merged and the
    /// reference count grows only when at least one flag was new; a
    /// repeat call with flags already held succeeds without changing
    /// state. Creation resolves RPF first and leaves nothing behind on
    /// failure.
    pub fn add_reference(
        &mut self,
        key: UpstreamKey,
        incoming: Option<IfIndex>,
        flags: UpstreamFlags,
        now: Instant,
    ) -> Result<&UpstreamEntry, UpstreamError> {
        if self.registry.contains(&key) {
            let entry = self
                .registry
                .find_mut(&key)
                .ok_or(UpstreamError::NotFound(key))?;
            if !flags.is_empty() && !entry.flags.contains(flags) {
                entry.flags.insert(flags);
                entry.ref_count += 1;
            }
            tracing::debug!(
                entry = %entry.name,
                ref_count = entry.ref_count,
                "Referenced existing upstream"
            );
        } else {
            self.create_entry(key, incoming, flags, now)?;
        }
        self.registry.find(&key).ok_or(UpstreamError::NotFound(key))
    }

    /// Release one reference, destroying the entry at zero
    ///
    /// Destruction stops every timer, leaves the neighbor aggregator,
    /// prunes upstream if the entry was Joined, detaches the OIL, clears
    /// tree links, and notifies MSDP and the RPF tracker.
    pub fn release(&mut self, key: &UpstreamKey) {
        let Some(entry) = self.registry.find_mut(key) else {
            return;
        };
        entry.ref_count = entry.ref_count.saturating_sub(1);
        tracing::debug!(entry = %entry.name, ref_count = entry.ref_count, "Release upstream");
        if entry.ref_count >= 1 {
            return;
        }

        entry.keepalive_timer = None;
        entry.register_stop_timer = None;
        entry.msdp_reg_timer = None;

        let was_joined = entry.is_joined();
        let rpf = entry.rpf;
        let oil = entry.channel_oil.take();
        let upstream_addr = entry.upstream_addr;
        let mut notify_msdp = false;

        if was_joined {
            self.sys.neighbors.upstream_send(&rpf, key, false);
            if key.is_wildcard() && !key.is_star_star() {
                // A Joined (*,G) going away must be reported to MSDP
                notify_msdp = true;
            }
        }
        self.join_timer_stop(key);

        if key.is_source_group() {
            self.wheel.unregister(key);
            notify_msdp = true;
        }

        let entry = self.registry.remove(key);
        debug_assert!(entry.map(|e| !e.has_live_timer()).unwrap_or(true));

        if let Some(oil) = oil {
            self.sys.forwarding.uninstall(oil);
            self.sys.forwarding.release_oil(oil);
        }
        if notify_msdp {
            self.sys.msdp.upstream_deleted(key);
        }
        self.sys.rpf.deregister(key, upstream_addr);
    }

    /// Re-resolve RPF for one entry
    ///
    /// Failure keeps the previous info stale until a later pass succeeds.
    /// When the RPF' neighbor moves, a Joined entry leaves the old
    /// neighbor's aggregator and restarts its refresh cycle toward the
    /// new one, and the channel module re-evaluates assert tracking.
    pub fn update_rpf(&mut self, key: &UpstreamKey, forced_neighbor: Option<Ipv4Addr>, now: Instant) {
        let Some(entry) = self.registry.find(key) else {
            return;
        };
        let old = entry.rpf;
        let upstream_addr = entry.upstream_addr;
        let name = entry.name.clone();

        let Some(new) = self.sys.rpf.resolve(key, upstream_addr, forced_neighbor) else {
            tracing::debug!(entry = %name, "RPF resolution failed, keeping stale info");
            return;
        };

        if let Some(entry) = self.registry.find_mut(key) {
            entry.rpf = new;
            if entry.channel_oil.is_none() {
                if let Some(iface) = new.interface {
                    entry.channel_oil = Some(self.sys.forwarding.create_oil(key, iface));
                }
            }
        }

        if !old.is_same(&new) {
            tracing::debug!(
                entry = %name,
                old_neighbor = ?old.neighbor,
                new_neighbor = ?new.neighbor,
                "RPF neighbor changed"
            );
            if self
                .registry
                .find(key)
                .map(|e| e.is_joined())
                .unwrap_or(false)
            {
                self.join_timer_restart(key, &old, now);
            }
            if old.interface != new.interface {
                self.sys.channels.refresh_assert_tracking(key);
            }
        }
    }

    /// Retry RPF resolution for every entry with no usable neighbor
    ///
    /// Run when a new neighbor appears: entries that had no path to send
    /// a Join may have one now.
    pub fn find_new_rpf(&mut self, now: Instant) {
        for key in self.registry.keys_ordered() {
            let unresolved = self
                .registry
                .find(&key)
                .map(|e| e.rpf.neighbor.is_none())
                .unwrap_or(false);
            if unresolved {
                tracing::debug!(entry = %key, "Upstream without a path to send join, checking");
                self.update_rpf(&key, None, now);
            }
        }
    }

    /// Fire every expired timer and run due traffic-sweep buckets
    ///
    /// Expiries run in a fixed order: join refresh, register-stop,
    /// keepalive, MSDP registration, then the sweep. Each pass walks a
    /// snapshot of the ordered index so a handler may destroy its entry.
    pub fn tick(&mut self, now: Instant) {
        for key in self.registry.keys_ordered() {
            if self.take_expired(&key, now, |e| &mut e.join_timer) {
                self.on_join_timer(&key, now);
            }
        }
        for key in self.registry.keys_ordered() {
            if self.take_expired(&key, now, |e| &mut e.register_stop_timer) {
                self.on_register_stop_timer(&key, now);
            }
        }
        for key in self.registry.keys_ordered() {
            if self.take_expired(&key, now, |e| &mut e.keepalive_timer) {
                self.on_keepalive_timer(&key, now);
            }
        }
        for key in self.registry.keys_ordered() {
            if self.take_expired(&key, now, |e| &mut e.msdp_reg_timer) {
                self.on_msdp_reg_timer(&key);
            }
        }
        for key in self.wheel.due(now) {
            self.sweep_entry(&key, now);
        }
    }

    /// Clear and report a timer deadline that has passed
    fn take_expired(
        &mut self,
        key: &UpstreamKey,
        now: Instant,
        timer: fn(&mut UpstreamEntry) -> &mut Option<Instant>,
    ) -> bool {
        let Some(entry) = self.registry.find_mut(key) else {
            return false;
        };
        let slot = timer(entry);
        match *slot {
            Some(deadline) if deadline <= now => {
                *slot = None;
                true
            }
            _ => false,
        }
    }

    fn create_entry(
        &mut self,
        key: UpstreamKey,
        incoming: Option<IfIndex>,
        flags: UpstreamFlags,
        now: Instant,
    ) -> Result<(), UpstreamError> {
        let upstream_addr = match key.source {
            Some(source) => source,
            None => match self.sys.router.rp_address(key.group) {
                Some(rp) => rp,
                None => {
                    tracing::debug!(entry = %key, "Received a wildcard join with no RP configured");
                    return Err(UpstreamError::NoRpConfigured(key));
                }
            },
        };

        self.registry
            .insert(UpstreamEntry::new(key, upstream_addr, flags, now));
        if key.is_source_group() {
            self.wheel.register(&key);
        }

        let Some(rpf) = self.sys.rpf.resolve(&key, upstream_addr, None) else {
            tracing::debug!(entry = %key, "Attempting to create upstream, unable to RPF for source");
            if key.is_source_group() {
                self.wheel.unregister(&key);
            }
            self.registry.remove(&key);
            self.sys.rpf.deregister(&key, upstream_addr);
            return Err(UpstreamError::RpfUnresolved(key));
        };

        if let Some(entry) = self.registry.find_mut(&key) {
            entry.rpf = rpf;
        }
        if let Some(iface) = rpf.interface.or(incoming) {
            let oil = self.sys.forwarding.create_oil(&key, iface);
            if let Some(entry) = self.registry.find_mut(&key) {
                entry.channel_oil = Some(oil);
            }
        }

        tracing::debug!(entry = %key, upstream_addr = %upstream_addr, "Created upstream entry");
        Ok(())
    }

    /// Add a flag-backed reference to an existing entry
    pub(crate) fn reference_flag(&mut self, key: &UpstreamKey, flag: UpstreamFlags) {
        if let Some(entry) = self.registry.find_mut(key) {
            entry.flags.insert(flag);
            entry.ref_count += 1;
        }
    }

    pub(crate) fn registry_mut(&mut self) -> &mut UpstreamRegistry {
        &mut self.registry
    }

    /// Convenience for the submodules: whether this router is the RP for
    /// the entry's group
    pub(crate) fn group_is_rp(&self, key: &UpstreamKey) -> bool {
        key.group
            .map(|group| self.sys.router.i_am_rp(group))
            .unwrap_or(false)
    }

    pub(crate) fn is_joined(&self, key: &UpstreamKey) -> bool {
        self.registry
            .find(key)
            .map(|e| e.join_state == JoinState::Joined)
            .unwrap_or(false)
    }
}
