//! JoinDesired evaluation, the NotJoined/Joined switch, and the join
//! refresh timer rules
//!
//! JoinDesired(S,G) is true when any downstream interface is in
//!
//! ```text
//! inherited_olist(S,G) = joins(S,G) (+) pim_include(S,G) (-) lost_assert(S,G)
//! ```
//!
//! either for the entry itself or through its covering wildcard entry.
//! The predicate is recomputed whenever channel membership, assert state,
//! or RPF resolution changes; wildcard changes re-trigger their children.
//!
//! Refresh timing: a standalone periodic timer per entry, unless a usable
//! neighbor exists on the RPF interface, in which case the entry rides
//! that neighbor's Join/Prune aggregation batch instead. Two override
//! rules (RFC 4601 §4.5.7) shorten a pending timer: suppression on
//! seeing another router's Join, and t_override on a neighbor GenID
//! change. Neither ever lengthens the remaining time.

use std::net::Ipv4Addr;
use std::time::{Duration, Instant};

use crate::system::{IfChannel, RpfInfo};
use crate::upstream::{JoinState, UpstreamFlags, UpstreamKey};

use super::UpstreamEngine;

impl UpstreamEngine {
    /// One channel's JoinDesired contribution
    ///
    /// Each channel contributes independently. The entry's own channel
    /// contributes when it is in joins-or-include without a lost assert;
    /// an (S,G,rpt) prune only stops that channel from contributing
    /// further. A channel of the covering wildcard entry contributes
    /// under the same eligibility.
    pub(crate) fn join_desired_on_channel(
        &self,
        key: &UpstreamKey,
        parent: Option<UpstreamKey>,
        ch: &IfChannel,
    ) -> bool {
        if ch.upstream == *key {
            if !ch.lost_assert && ch.joins_or_include {
                return true;
            }
            if ch.sg_rpt {
                return false;
            }
        }

        match parent {
            Some(parent) => ch.upstream == parent && !ch.lost_assert && ch.joins_or_include,
            None => false,
        }
    }

    /// Evaluate JoinDesired over every channel in the system
    pub fn evaluate_join_desired(&self, key: &UpstreamKey) -> bool {
        let parent = self.registry().find(key).and_then(|e| e.parent);
        self.sys
            .channels
            .snapshot()
            .iter()
            .any(|ch| self.join_desired_on_channel(key, parent, ch))
    }

    /// Recompute JoinDesired and switch the Join/Prune state machine on a
    /// change
    ///
    /// Children inherit eligibility through their parent's channels, so a
    /// wildcard entry re-triggers evaluation of every child.
    pub fn update_join_desired(&mut self, key: &UpstreamKey, now: Instant) {
        let Some(entry) = self.registry().find(key) else {
            return;
        };
        let was_desired = entry.flags.contains(UpstreamFlags::DR_JOIN_DESIRED);
        let children: Vec<UpstreamKey> = entry.children.iter().copied().collect();

        let is_desired = self.evaluate_join_desired(key);
        if let Some(entry) = self.registry_mut().find_mut(key) {
            if is_desired {
                entry.flags.insert(UpstreamFlags::DR_JOIN_DESIRED);
            } else {
                entry.flags.remove(UpstreamFlags::DR_JOIN_DESIRED);
            }
        }

        if is_desired && !was_desired {
            self.switch(key, JoinState::Joined, now);
        } else if !is_desired && was_desired {
            self.switch(key, JoinState::NotJoined, now);
        }

        for child in children {
            self.update_join_desired(&child, now);
        }
    }

    /// Drive the two-state Join/Prune machine
    ///
    /// Entering Joined the first time enables forwarding, notifies MSDP,
    /// and either starts register-encapsulation (FHR-eligible with an
    /// active source stream) or sends a Join and arms the refresh cycle.
    /// Re-entering Joined only re-enables forwarding. Leaving Joined
    /// disables forwarding, prunes upstream, and stops the refresh cycle.
    pub(crate) fn switch(&mut self, key: &UpstreamKey, new_state: JoinState, now: Instant) {
        let Some(entry) = self.registry().find(key) else {
            return;
        };
        let old_state = entry.join_state;
        let rpf = entry.rpf;
        tracing::debug!(
            entry = %entry.name,
            old = old_state.as_str(),
            new = new_state.as_str(),
            "Upstream state switch"
        );

        if let Some(entry) = self.registry_mut().find_mut(key) {
            entry.set_join_state(new_state, now);
        }
        self.sys.channels.refresh_assert_tracking(key);

        if new_state == JoinState::Joined {
            if old_state != JoinState::Joined {
                let (old_fhr, src_stream) = self
                    .registry()
                    .find(key)
                    .map(|e| {
                        (
                            e.flags.contains(UpstreamFlags::FHR),
                            e.flags.contains(UpstreamFlags::SRC_STREAM),
                        )
                    })
                    .unwrap_or((false, false));

                self.forward_on(key);
                if !key.is_star_star() {
                    self.sys.msdp.join_state_changed(key, true);
                }

                if self.could_register(key) {
                    if let Some(entry) = self.registry_mut().find_mut(key) {
                        entry.flags.insert(UpstreamFlags::FHR);
                    }
                    if !old_fhr && src_stream {
                        self.register_join(key, now);
                    }
                } else {
                    self.send_join(key);
                    self.join_timer_start(key, now);
                }
            } else {
                self.forward_on(key);
            }
        } else {
            self.forward_off(key);
            if old_state == JoinState::Joined && !key.is_star_star() {
                self.sys.msdp.join_state_changed(key, false);
            }
            self.sys.neighbors.upstream_send(&rpf, key, false);
            self.join_timer_stop(key);
        }
    }

    /// Whether this router may register-encapsulate for the entry: DR on
    /// the RPF interface and directly connected to the source
    pub(crate) fn could_register(&self, key: &UpstreamKey) -> bool {
        let Some(entry) = self.registry().find(key) else {
            return false;
        };
        let (Some(iface), Some(source)) = (entry.rpf.interface, key.source) else {
            return false;
        };
        self.sys.router.is_dr(iface) && self.sys.router.connected_to_source(iface, source)
    }

    /// Send an immediate Join(S,G) toward the current RPF' neighbor
    pub(crate) fn send_join(&self, key: &UpstreamKey) {
        let Some(entry) = self.registry().find(key) else {
            return;
        };
        if entry.rpf.neighbor.is_none() {
            tracing::debug!(entry = %entry.name, "Can't send join upstream: no RPF neighbor");
            // warning only; the refresh cycle keeps running
        }
        self.sys.neighbors.upstream_send(&entry.rpf, key, true);
    }

    /// Arm the refresh cycle: delegate to the RPF neighbor's aggregation
    /// batch when one exists, otherwise run the standalone periodic timer
    ///
    /// Never leaves two live refresh mechanisms for one entry.
    pub(crate) fn join_timer_start(&mut self, key: &UpstreamKey, now: Instant) {
        let Some(entry) = self.registry().find(key) else {
            return;
        };
        let name = entry.name.clone();
        let stale = entry.aggregated_with;
        let target = match (entry.rpf.interface, entry.rpf.neighbor) {
            (Some(iface), Some(addr)) if self.sys.neighbors.has_neighbor(iface, addr) => {
                Some((iface, addr))
            }
            _ => None,
        };

        if let Some((iface, addr)) = stale {
            if target != Some((iface, addr)) {
                self.sys.neighbors.remove_group(iface, addr, key);
            }
        }

        match target {
            Some((iface, addr)) => {
                self.sys.neighbors.add_group(iface, addr, key);
                if let Some(entry) = self.registry_mut().find_mut(key) {
                    entry.aggregated_with = Some((iface, addr));
                    entry.join_timer = None;
                }
            }
            None => {
                tracing::debug!(
                    entry = %name,
                    period_secs = self.config().join_period.as_secs(),
                    "Starting periodic join timer"
                );
                let deadline = now + self.config().join_period;
                if let Some(entry) = self.registry_mut().find_mut(key) {
                    entry.aggregated_with = None;
                    entry.join_timer = Some(deadline);
                }
            }
        }
    }

    /// Stop the refresh cycle: leave the aggregation batch and cancel the
    /// standalone timer
    pub(crate) fn join_timer_stop(&mut self, key: &UpstreamKey) {
        let Some(entry) = self.registry().find(key) else {
            return;
        };
        let membership = entry.aggregated_with.or_else(|| {
            match (entry.rpf.interface, entry.rpf.neighbor) {
                (Some(iface), Some(addr)) if self.sys.neighbors.has_neighbor(iface, addr) => {
                    Some((iface, addr))
                }
                _ => None,
            }
        });

        if let Some((iface, addr)) = membership {
            self.sys.neighbors.remove_group(iface, addr, key);
        }
        if let Some(entry) = self.registry_mut().find_mut(key) {
            entry.aggregated_with = None;
            entry.join_timer = None;
        }
    }

    /// Move the refresh cycle from an old RPF' neighbor to the current one
    pub(crate) fn join_timer_restart(&mut self, key: &UpstreamKey, old: &RpfInfo, now: Instant) {
        if let (Some(iface), Some(addr)) = (old.interface, old.neighbor) {
            if self.sys.neighbors.has_neighbor(iface, addr) {
                self.sys.neighbors.remove_group(iface, addr, key);
            }
        }
        if let Some(entry) = self.registry_mut().find_mut(key) {
            entry.aggregated_with = None;
        }
        self.join_timer_start(key, now);
    }

    /// Rearm the standalone timer at an explicit interval, cancelling any
    /// pending deadline
    fn join_timer_restart_at(&mut self, key: &UpstreamKey, now: Instant, interval: Duration) {
        tracing::debug!(
            entry = %key,
            interval_msec = interval.as_millis() as u64,
            "Restarting join timer"
        );
        if let Some(entry) = self.registry_mut().find_mut(key) {
            entry.join_timer = Some(now + interval);
        }
    }

    /// Another router's Join(S,G) was seen on the RPF link: suppress our
    /// own refresh
    ///
    /// Downward-only: the timer is restarted at
    /// min(interface suppression window, holdtime) only when that is
    /// sooner than the pending deadline.
    pub fn join_suppress(
        &mut self,
        key: &UpstreamKey,
        rpf_addr: Ipv4Addr,
        holdtime: Duration,
        now: Instant,
    ) {
        let Some(entry) = self.registry().find(key) else {
            return;
        };
        let Some(iface) = entry.rpf.interface else {
            return;
        };
        let suppress = self.sys.router.suppression_window(iface).min(holdtime);
        let remain = entry.join_timer_remaining(now);

        tracing::debug!(
            entry = %entry.name,
            rpf_addr = %rpf_addr,
            join_timer_msec = remain.as_millis() as u64,
            suppress_msec = suppress.as_millis() as u64,
            "Detected join to RPF'(S,G)"
        );

        if remain > suppress {
            self.join_timer_restart_at(key, now, suppress);
        }
    }

    /// Shorten the join timer to the interface override window, if it is
    /// pending further out
    pub(crate) fn join_timer_decrease_to_override(
        &mut self,
        label: &str,
        key: &UpstreamKey,
        now: Instant,
    ) {
        let Some(entry) = self.registry().find(key) else {
            return;
        };
        let Some(iface) = entry.rpf.interface else {
            return;
        };
        let t_override = self.sys.router.override_window(iface);
        let remain = entry.join_timer_remaining(now);

        tracing::debug!(
            label,
            entry = %entry.name,
            join_timer_msec = remain.as_millis() as u64,
            override_msec = t_override.as_millis() as u64,
            "Considering join timer override"
        );

        if remain > t_override {
            self.join_timer_restart_at(key, now, t_override);
        }
    }

    /// The current RPF' neighbor rebooted (generation ID changed): force
    /// faster convergence on every Joined entry behind it
    pub fn rpf_genid_changed(&mut self, neighbor: Ipv4Addr, now: Instant) {
        for key in self.registry().keys_ordered() {
            let matches = self
                .registry()
                .find(&key)
                .map(|e| e.is_joined() && e.rpf.neighbor == Some(neighbor))
                .unwrap_or(false);
            if matches {
                self.join_timer_decrease_to_override("RPF'(S,G) GenID change", &key, now);
            }
        }
    }

    /// Standalone join timer expiry: refresh the Join and rearm
    pub(crate) fn on_join_timer(&mut self, key: &UpstreamKey, now: Instant) {
        let Some(entry) = self.registry().find(key) else {
            return;
        };
        // An FHR has no upstream neighbor to refresh; the register
        // machine owns this entry until keepalive expiry
        if entry.flags.contains(UpstreamFlags::FHR) {
            return;
        }

        let sendable = match entry.rpf.interface {
            Some(iface) => !self.sys.router.is_loopback(iface),
            None => false,
        };
        if sendable {
            self.send_join(key);
        }
        self.join_timer_start(key, now);
    }

    /// Enable forwarding on every channel of the entry that sits in its
    /// outgoing interface list
    pub(crate) fn forward_on(&self, key: &UpstreamKey) {
        for ch in self.sys.channels.snapshot() {
            if ch.upstream == *key && ch.in_oif_list {
                self.sys.forwarding.start_forwarding(key, ch.interface);
            }
        }
    }

    /// Disable forwarding on every channel of the entry
    pub(crate) fn forward_off(&self, key: &UpstreamKey) {
        for ch in self.sys.channels.snapshot() {
            if ch.upstream == *key {
                self.sys.forwarding.stop_forwarding(key, ch.interface);
            }
        }
    }
}
