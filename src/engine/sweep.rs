//! Traffic sweep wheel and keepalive supervisor
//!
//! Every (S,G) entry sits in one bucket of a timer wheel; each bucket is
//! visited once per rotation, so a flow's packet counters are checked on
//! a fixed cadence without any per-packet cost, and insert/remove stay
//! O(1) regardless of flow count.
//!
//! The keepalive timer is the "this flow is active" signal: the sweep
//! (re)arms it while traffic keeps arriving, and its expiry tears down
//! whatever state traffic created.

use std::collections::hash_map::DefaultHasher;
use std::collections::HashSet;
use std::hash::{Hash, Hasher};
use std::time::{Duration, Instant};

use crate::upstream::{UpstreamFlags, UpstreamKey};

use super::UpstreamEngine;

/// Bucketed timer wheel over (S,G) entries
#[derive(Debug)]
pub struct SweepWheel {
    slots: Vec<HashSet<UpstreamKey>>,
    slot_interval: Duration,
    current: usize,
    next_slot_at: Instant,
}

impl SweepWheel {
    /// Create a wheel that revisits every entry once per `period`,
    /// spread over `slots` buckets
    pub fn new(period: Duration, slots: usize, now: Instant) -> Self {
        let slots = slots.max(1);
        // A zero interval would keep `due` advancing forever
        let slot_interval = (period / slots as u32).max(Duration::from_millis(1));
        Self {
            slots: (0..slots).map(|_| HashSet::new()).collect(),
            slot_interval,
            current: 0,
            next_slot_at: now + slot_interval,
        }
    }

    fn slot_of(&self, key: &UpstreamKey) -> usize {
        let mut hasher = DefaultHasher::new();
        key.hash(&mut hasher);
        (hasher.finish() as usize) % self.slots.len()
    }

    /// Add an entry to its bucket
    pub fn register(&mut self, key: &UpstreamKey) {
        let slot = self.slot_of(key);
        self.slots[slot].insert(*key);
    }

    /// Remove an entry from its bucket
    pub fn unregister(&mut self, key: &UpstreamKey) {
        let slot = self.slot_of(key);
        self.slots[slot].remove(key);
    }

    /// Keys of every bucket whose deadline has passed, advancing the wheel
    pub fn due(&mut self, now: Instant) -> Vec<UpstreamKey> {
        let mut due = Vec::new();
        while self.next_slot_at <= now {
            due.extend(self.slots[self.current].iter().copied());
            self.current = (self.current + 1) % self.slots.len();
            self.next_slot_at += self.slot_interval;
        }
        due
    }

    pub fn clear(&mut self) {
        for slot in &mut self.slots {
            slot.clear();
        }
    }
}

impl UpstreamEngine {
    /// (Re)arm the keepalive timer and refresh the MSDP active-source view
    pub(crate) fn keepalive_start(&mut self, key: &UpstreamKey, now: Instant) {
        let Some(entry) = self.registry().find(key) else {
            return;
        };
        if !entry.flags.contains(UpstreamFlags::SRC_STREAM) {
            tracing::debug!(entry = %entry.name, "Keepalive start with no stream reference");
        }
        let deadline = now + self.config().keepalive_period;
        if let Some(entry) = self.registry_mut().find_mut(key) {
            entry.keepalive_timer = Some(deadline);
        }
        self.sys.msdp.local_source_update(key);
    }

    /// Keepalive expiry: the flow went quiet
    ///
    /// RP-side cached state and the MSDP local-source entry are dropped,
    /// and the reference the traffic observation held is released, which
    /// may destroy the entry.
    pub(crate) fn on_keepalive_timer(&mut self, key: &UpstreamKey, _now: Instant) {
        if self.group_is_rp(key) {
            self.sys.forwarding.clear_rp_state(key);
        }
        self.sys.msdp.local_source_delete(key);

        let has_stream_ref = self
            .registry()
            .find(key)
            .map(|e| e.flags.contains(UpstreamFlags::SRC_STREAM))
            .unwrap_or(false);
        if has_stream_ref {
            self.fhr_keepalive_expired(key);
            tracing::debug!(entry = %key, "Keepalive expired; remove stream reference");
            if let Some(entry) = self.registry_mut().find_mut(key) {
                entry.flags.remove(UpstreamFlags::SRC_STREAM);
            }
            self.release(key);
        }
    }

    /// A register for this flow was received (RP side): keep the MSDP
    /// local-source cache warm for the registration period
    pub fn msdp_reg_received(&mut self, key: &UpstreamKey, now: Instant) {
        let deadline = now + self.config().msdp_reg_period;
        if let Some(entry) = self.registry_mut().find_mut(key) {
            entry.msdp_reg_timer = Some(deadline);
        }
        self.sys.msdp.local_source_update(key);
    }

    /// MSDP registration timer expiry: registers stopped arriving
    pub(crate) fn on_msdp_reg_timer(&mut self, key: &UpstreamKey) {
        self.sys.msdp.local_source_delete(key);
    }

    /// Whether observed traffic may (re)start the keepalive timer
    /// (RFC 4601 §4.2 data packet forwarding rules)
    ///
    /// Directly connected sources always qualify. A Joined entry with a
    /// non-empty inherited outgoing set qualifies only on the RP: a
    /// deliberate, interoperability-affecting narrowing of the base
    /// specification that must not be widened to all routers.
    fn keepalive_start_ok(&self, key: &UpstreamKey) -> bool {
        let Some(entry) = self.registry().find(key) else {
            return false;
        };
        if let (Some(iface), Some(source)) = (entry.rpf.interface, key.source) {
            if self.sys.router.connected_to_source(iface, source) {
                return true;
            }
        }

        if entry.is_joined() && !self.empty_inherited_olist(key) && self.group_is_rp(key) {
            return true;
        }

        false
    }

    /// One sweep visit: compare the flow's packet counters against the
    /// previous visit and react
    pub(crate) fn sweep_entry(&mut self, key: &UpstreamKey, now: Instant) {
        let Some(entry) = self.registry().find(key) else {
            return;
        };
        let name = entry.name.clone();
        let rpf_iface = entry.rpf.interface;
        let last_seen = entry.last_sweep_packets;

        let Some(oil) = entry.channel_oil else {
            tracing::debug!(entry = %name, "Not installed in mroute");
            return;
        };
        if !self.sys.forwarding.is_installed(oil) {
            tracing::debug!(entry = %name, "Not installed in mroute");
            return;
        }

        let counters = self.sys.forwarding.read_counters(oil);
        if let Some(entry) = self.registry_mut().find_mut(key) {
            entry.last_sweep_packets = counters.packets;
        }

        if counters.packets <= last_seen && counters.last_used > self.config().traffic_idle_threshold
        {
            tracing::debug!(
                entry = %name,
                packets = counters.packets,
                last_used_secs = counters.last_used.as_secs(),
                "No new packets within the idle threshold"
            );
            return;
        }

        if self.keepalive_start_ok(key) {
            let has_stream_ref = self
                .registry()
                .find(key)
                .map(|e| e.flags.contains(UpstreamFlags::SRC_STREAM))
                .unwrap_or(false);
            if !has_stream_ref {
                tracing::debug!(entry = %name, "Source reference created on keepalive restart");
                self.reference_flag(key, UpstreamFlags::SRC_STREAM);
                self.fhr_keepalive_started(key);
            }
            self.keepalive_start(key, now);
        }

        let sptbit = self
            .registry()
            .find(key)
            .map(|e| e.sptbit())
            .unwrap_or(true);
        if !sptbit {
            if let Some(iface) = rpf_iface {
                self.update_sptbit(key, iface);
            }
        }
    }
}
