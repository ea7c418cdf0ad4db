//! Upstream entry and per-entry state types
//!
//! This module defines the per-flow state stored in the registry: the
//! Join/Prune and register state machines' current states, capability
//! flags, resolved RPF info, tree links, and timer deadlines.

use std::collections::BTreeSet;
use std::net::Ipv4Addr;
use std::time::Instant;

use crate::system::{OilId, RpfInfo};

use super::key::UpstreamKey;

/// Upstream Join/Prune state (RFC 4601 §4.5.7)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JoinState {
    /// Not joined toward the upstream neighbor
    NotJoined,
    /// Joined toward the upstream neighbor, refresh timer running
    Joined,
}

impl JoinState {
    pub fn as_str(&self) -> &'static str {
        match self {
            JoinState::NotJoined => "NotJoined",
            JoinState::Joined => "Joined",
        }
    }
}

/// First-Hop-Router register state (RFC 4601 §4.4.1)
///
/// Only meaningful while the FHR flag is set.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegisterState {
    /// No register state, initial and terminal
    NoInfo,
    /// Register-encapsulating traffic toward the RP
    Join,
    /// Probe sent, waiting for a Register-Stop or timer expiry
    JoinPending,
    /// Register-Stop received, encapsulation suppressed
    Prune,
}

impl RegisterState {
    pub fn as_str(&self) -> &'static str {
        match self {
            RegisterState::NoInfo => "RegNoInfo",
            RegisterState::Join => "RegJoined",
            RegisterState::JoinPending => "RegJoinPend",
            RegisterState::Prune => "RegPrune",
        }
    }
}

/// Independent per-entry capability flags
///
/// Additive bits with no overlapping semantics. Each source-of-state bit
/// (IGMP, PIM, stream, MSDP) corresponds to one reference a subsystem
/// holds on the entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct UpstreamFlags(u8);

impl UpstreamFlags {
    /// This router is the Designated Router directly connected to the source
    pub const FHR: UpstreamFlags = UpstreamFlags(0x01);
    /// Entry is kept alive by observed source traffic
    pub const SRC_STREAM: UpstreamFlags = UpstreamFlags(0x02);
    /// Entry was created by local IGMP membership
    pub const SRC_IGMP: UpstreamFlags = UpstreamFlags(0x04);
    /// Entry was created by a received PIM Join
    pub const SRC_PIM: UpstreamFlags = UpstreamFlags(0x08);
    /// Entry was created by an MSDP source advertisement
    pub const SRC_MSDP: UpstreamFlags = UpstreamFlags(0x10);
    /// Cached result of the JoinDesired predicate
    pub const DR_JOIN_DESIRED: UpstreamFlags = UpstreamFlags(0x20);

    /// The empty flag set
    pub fn empty() -> Self {
        UpstreamFlags(0)
    }

    /// Whether every bit of `other` is already set
    pub fn contains(&self, other: UpstreamFlags) -> bool {
        other.0 != 0 && (self.0 & other.0) == other.0
    }

    /// Whether any bit of `other` is set
    pub fn intersects(&self, other: UpstreamFlags) -> bool {
        (self.0 & other.0) != 0
    }

    /// Set every bit of `other`
    pub fn insert(&mut self, other: UpstreamFlags) {
        self.0 |= other.0;
    }

    /// Clear every bit of `other`
    pub fn remove(&mut self, other: UpstreamFlags) {
        self.0 &= !other.0;
    }

    pub fn is_empty(&self) -> bool {
        self.0 == 0
    }
}

impl std::ops::BitOr for UpstreamFlags {
    type Output = UpstreamFlags;

    fn bitor(self, rhs: UpstreamFlags) -> UpstreamFlags {
        UpstreamFlags(self.0 | rhs.0)
    }
}

/// One upstream (source, group) entry, owned by the registry
#[derive(Debug)]
pub struct UpstreamEntry {
    /// Entry identity
    pub key: UpstreamKey,

    /// Cached display form of the key, used in log lines
    pub name: String,

    /// Address Joins resolve toward: the source for (S,G), the RP otherwise
    pub upstream_addr: Ipv4Addr,

    /// Number of outstanding references; the entry dies at zero
    pub ref_count: u32,

    /// Capability flags
    pub flags: UpstreamFlags,

    /// Join/Prune state
    pub join_state: JoinState,

    /// When `join_state` last changed
    pub state_transition: Instant,

    /// FHR register state
    pub reg_state: RegisterState,

    /// SPT bit, monotonic: never cleared once set
    sptbit: bool,

    /// Resolved RPF info, `RpfInfo::unresolved()` until resolution succeeds
    pub rpf: RpfInfo,

    /// Key of the covering wildcard entry, resolved through the registry
    pub parent: Option<UpstreamKey>,

    /// Keys of covered entries, ordered; populated only on wildcard entries
    pub children: BTreeSet<UpstreamKey>,

    /// Forwarding-plane OIL handle, absent until RPF resolves
    pub channel_oil: Option<OilId>,

    /// Join refresh deadline, `None` while stopped or delegated to a
    /// neighbor aggregator
    pub join_timer: Option<Instant>,

    /// Neighbor aggregator currently carrying this entry's refresh, if any
    pub aggregated_with: Option<(crate::system::IfIndex, Ipv4Addr)>,

    /// Keepalive deadline: the flow is considered active until it passes
    pub keepalive_timer: Option<Instant>,

    /// Register-stop suppression/probe deadline
    pub register_stop_timer: Option<Instant>,

    /// MSDP registration refresh deadline
    pub msdp_reg_timer: Option<Instant>,

    /// Packet count seen by the previous traffic sweep
    pub last_sweep_packets: u64,
}

impl UpstreamEntry {
    /// Create a fresh entry with one reference and everything idle
    pub fn new(key: UpstreamKey, upstream_addr: Ipv4Addr, flags: UpstreamFlags, now: Instant) -> Self {
        Self {
            key,
            name: key.to_string(),
            upstream_addr,
            ref_count: 1,
            flags,
            join_state: JoinState::NotJoined,
            state_transition: now,
            reg_state: RegisterState::NoInfo,
            sptbit: false,
            rpf: RpfInfo::unresolved(),
            parent: None,
            children: BTreeSet::new(),
            channel_oil: None,
            join_timer: None,
            aggregated_with: None,
            keepalive_timer: None,
            register_stop_timer: None,
            msdp_reg_timer: None,
            last_sweep_packets: 0,
        }
    }

    /// SPT-bit value
    pub fn sptbit(&self) -> bool {
        self.sptbit
    }

    /// Set the SPT bit. There is deliberately no way to clear it.
    pub fn set_sptbit(&mut self) {
        self.sptbit = true;
    }

    /// Whether the entry is in Joined state
    pub fn is_joined(&self) -> bool {
        self.join_state == JoinState::Joined
    }

    /// Record a join-state change, stamping the transition time
    pub fn set_join_state(&mut self, state: JoinState, now: Instant) {
        if self.join_state != state {
            self.state_transition = now;
        }
        self.join_state = state;
    }

    /// Remaining time on the join refresh timer, zero when stopped
    pub fn join_timer_remaining(&self, now: Instant) -> std::time::Duration {
        match self.join_timer {
            Some(deadline) => deadline.saturating_duration_since(now),
            None => std::time::Duration::ZERO,
        }
    }

    /// Whether any timer handle is still live
    pub fn has_live_timer(&self) -> bool {
        self.join_timer.is_some()
            || self.keepalive_timer.is_some()
            || self.register_stop_timer.is_some()
            || self.msdp_reg_timer.is_some()
    }
}
