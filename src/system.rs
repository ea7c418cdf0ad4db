//! Collaborator contracts consumed by the upstream state machine
//!
//! The upstream core does not resolve routes, install kernel state, build
//! Join/Prune packets, or run assert elections. It consumes those
//! capabilities through the traits below. All trait methods take `&self`:
//! the engine is single-threaded and cooperative, so implementations are
//! free to use interior mutability.
//!
//! Nothing here is persisted. Every collaborator rebuilds its state from
//! live protocol exchange after a restart.

use std::net::Ipv4Addr;
use std::time::Duration;

use bytes::Bytes;

use crate::upstream::UpstreamKey;

/// Kernel interface index
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct IfIndex(pub u32);

impl std::fmt::Display for IfIndex {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "if{}", self.0)
    }
}

/// Handle to a forwarding-plane outgoing-interface-list object
///
/// Issued by [`ForwardingPlane::create_oil`] and owned by exactly one
/// upstream entry until released.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct OilId(pub u64);

/// Provenance of an interface in an outgoing interface list
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OifFlag {
    /// Added because the entry's own channel state asks for it
    Protocol,
    /// Inherited from a covering wildcard entry's channel state
    Inherited,
}

/// Resolved reverse-path-forwarding info toward a source or RP
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RpfInfo {
    /// Upstream interface, absent while unresolved
    pub interface: Option<IfIndex>,
    /// Nexthop address from the unicast RIB
    pub nexthop: Option<Ipv4Addr>,
    /// Address of the RPF' neighbor Join/Prune messages go to
    pub neighbor: Option<Ipv4Addr>,
    /// Route metric toward the upstream address
    pub metric: u32,
    /// Metric preference (administrative distance)
    pub preference: u32,
}

impl RpfInfo {
    /// RPF info of an entry that has never resolved: no interface, no
    /// neighbor, infinite metric
    pub fn unresolved() -> Self {
        Self {
            interface: None,
            nexthop: None,
            neighbor: None,
            metric: u32::MAX,
            preference: u32::MAX,
        }
    }

    /// True when there is a usable RPF' neighbor to send Joins to
    pub fn is_usable(&self) -> bool {
        self.interface.is_some() && self.neighbor.is_some()
    }

    /// Two RPF results are "the same" when interface and neighbor match
    pub fn is_same(&self, other: &RpfInfo) -> bool {
        self.interface == other.interface && self.neighbor == other.neighbor
    }
}

/// Packet/usage counters read from the forwarding plane for one flow
#[derive(Debug, Clone, Copy, Default)]
pub struct FlowCounters {
    /// Total packets forwarded for the flow
    pub packets: u64,
    /// Time since the flow last carried a packet
    pub last_used: Duration,
}

/// Snapshot of one per-interface channel's state, as read from the
/// channel/assert module
///
/// Channels on interfaces without protocol configuration are simply not
/// included in the snapshot (they contribute nothing).
#[derive(Debug, Clone, Copy)]
pub struct IfChannel {
    /// The upstream entry this channel belongs to
    pub upstream: UpstreamKey,
    /// Interface the channel lives on
    pub interface: IfIndex,
    /// Channel source address, `None` on (*,G) channels
    pub source: Option<Ipv4Addr>,
    /// Channel is in the joins-or-include set
    pub joins_or_include: bool,
    /// This router lost the assert election on the channel's interface
    pub lost_assert: bool,
    /// (S,G) channel is on the shared-tree-prune (S,G,rpt) list
    pub sg_rpt: bool,
    /// Channel is currently in the entry's outgoing interface list
    pub in_oif_list: bool,
}

/// Reverse-path route lookup
pub trait RpfResolver {
    /// Resolve the RPF interface/neighbor toward `upstream_addr`
    ///
    /// `forced_neighbor` pins the RPF' neighbor instead of deriving it
    /// from the nexthop. `None` means the address is unroutable right
    /// now; on an existing entry the caller keeps its stale info.
    fn resolve(
        &self,
        key: &UpstreamKey,
        upstream_addr: Ipv4Addr,
        forced_neighbor: Option<Ipv4Addr>,
    ) -> Option<RpfInfo>;

    /// Stop tracking reachability of `upstream_addr` for this entry
    fn deregister(&self, key: &UpstreamKey, upstream_addr: Ipv4Addr);
}

/// Multicast forwarding plane
///
/// The core never mutates an OIL directly; it only requests changes
/// through this contract.
pub trait ForwardingPlane {
    /// Create the OIL object for a flow with the given incoming interface
    fn create_oil(&self, key: &UpstreamKey, incoming: IfIndex) -> OilId;

    /// Remove the flow from the kernel table
    fn uninstall(&self, oil: OilId);

    /// Release the OIL object itself
    fn release_oil(&self, oil: OilId);

    /// Add an interface to the OIL
    fn add_oif(&self, oil: OilId, interface: IfIndex, flag: OifFlag);

    /// Remove an interface from the OIL
    fn remove_oif(&self, oil: OilId, interface: IfIndex, flag: OifFlag);

    /// Whether the flow is installed in the kernel table
    fn is_installed(&self, oil: OilId) -> bool;

    /// Whether the OIL has no interfaces
    fn oil_is_empty(&self, oil: OilId) -> bool;

    /// Read the flow's packet/usage counters
    fn read_counters(&self, oil: OilId) -> FlowCounters;

    /// Enable data forwarding for the flow on one interface
    fn start_forwarding(&self, key: &UpstreamKey, interface: IfIndex);

    /// Disable data forwarding for the flow on one interface
    fn stop_forwarding(&self, key: &UpstreamKey, interface: IfIndex);

    /// Clear RP-side cached state for a flow whose keepalive expired
    fn clear_rp_state(&self, key: &UpstreamKey);
}

/// Per-neighbor Join/Prune aggregation
pub trait JoinAggregator {
    /// Whether a usable PIM neighbor exists at `addr` on `interface`
    fn has_neighbor(&self, interface: IfIndex, addr: Ipv4Addr) -> bool;

    /// Register an entry with a neighbor's periodic Join/Prune batch
    fn add_group(&self, interface: IfIndex, neighbor: Ipv4Addr, key: &UpstreamKey);

    /// Remove an entry from a neighbor's periodic Join/Prune batch
    fn remove_group(&self, interface: IfIndex, neighbor: Ipv4Addr, key: &UpstreamKey);

    /// Send a single immediate Join (`join = true`) or Prune upstream
    fn upstream_send(&self, rpf: &RpfInfo, key: &UpstreamKey, join: bool);
}

/// MSDP notifications
pub trait MsdpHooks {
    /// The entry's Join/Prune state changed
    fn join_state_changed(&self, key: &UpstreamKey, joined: bool);

    /// Refresh the local-active-source cache entry for this flow
    fn local_source_update(&self, key: &UpstreamKey);

    /// Remove the local-active-source cache entry for this flow
    fn local_source_delete(&self, key: &UpstreamKey);

    /// The upstream entry was destroyed
    fn upstream_deleted(&self, key: &UpstreamKey);
}

/// Read access to the per-interface channel/assert module
pub trait ChannelView {
    /// Snapshot of every configured channel in the system
    ///
    /// A snapshot, not a live view: callers may delete entries while
    /// walking it.
    fn snapshot(&self) -> Vec<IfChannel>;

    /// Ask the module to re-evaluate assert tracking for an entry's
    /// channels after a join-state or RPF change
    fn refresh_assert_tracking(&self, key: &UpstreamKey);
}

/// Local router topology facts
pub trait RouterInfo {
    /// Whether this router is the DR on the interface
    fn is_dr(&self, interface: IfIndex) -> bool;

    /// Whether the interface is directly connected to `source`
    fn connected_to_source(&self, interface: IfIndex, source: Ipv4Addr) -> bool;

    /// Whether the interface is a loopback
    fn is_loopback(&self, interface: IfIndex) -> bool;

    /// The interface's join-suppression window
    fn suppression_window(&self, interface: IfIndex) -> Duration;

    /// The interface's join override window
    fn override_window(&self, interface: IfIndex) -> Duration;

    /// Primary address of the interface
    fn primary_address(&self, interface: IfIndex) -> Option<Ipv4Addr>;

    /// Whether this router is the RP for `group`
    fn i_am_rp(&self, group: Ipv4Addr) -> bool;

    /// Address of the RP for `group`, `None` when no RP is configured
    ///
    /// A `group` of `None` asks for the RP covering (*,*) state.
    fn rp_address(&self, group: Option<Ipv4Addr>) -> Option<Ipv4Addr>;

    /// RPF info toward the RP for `group`
    fn rp_upstream(&self, group: Ipv4Addr) -> Option<RpfInfo>;

    /// The pseudo-interface register encapsulation goes out of
    fn register_interface(&self) -> IfIndex;
}

/// Register encapsulation path toward the RP
pub trait RegisterSender {
    /// Encapsulate and send one register probe toward the RP for the flow
    ///
    /// `null_register` marks a Null-Register probe carrying no payload
    /// beyond the inner header.
    fn send_register(
        &self,
        key: &UpstreamKey,
        probe: Bytes,
        origin: Ipv4Addr,
        rp: &RpfInfo,
        null_register: bool,
    );
}
