//! Inherited outgoing-interface-list computation (RFC 4601 §3.2.3)
//!
//! ```text
//! inherited_olist(S,G,rpt) =
//!           ( joins(*,*,RP(G)) (+) joins(*,G) (-) prunes(S,G,rpt) )
//!      (+) ( pim_include(*,G) (-) pim_exclude(S,G) )
//!      (-) ( lost_assert(*,G) (+) lost_assert(S,G,rpt) )
//!
//! inherited_olist(S,G) =
//!      inherited_olist(S,G,rpt) (+)
//!      joins(S,G) (+) pim_include(S,G) (-) lost_assert(S,G)
//! ```

use std::time::Instant;

use crate::system::OifFlag;
use crate::upstream::{JoinState, UpstreamKey};

use super::UpstreamEngine;

impl UpstreamEngine {
    /// Compute the inherited outgoing set and push it into the
    /// forwarding plane, returning the number of selected interfaces
    ///
    /// Interfaces contributed by the entry's own channels are flagged
    /// [`OifFlag::Protocol`]; those inherited through a covering wildcard
    /// entry's channels are flagged [`OifFlag::Inherited`] so the
    /// forwarding plane can tell them apart later.
    pub(crate) fn inherited_olist_decide(&mut self, key: &UpstreamKey) -> usize {
        let Some(entry) = self.registry().find(key) else {
            return 0;
        };
        let parent = entry.parent;
        let rpf_iface = entry.rpf.interface;
        let mut oil = entry.channel_oil;

        if oil.is_none() {
            if let Some(iface) = rpf_iface {
                let created = self.sys.forwarding.create_oil(key, iface);
                if let Some(entry) = self.registry_mut().find_mut(key) {
                    entry.channel_oil = Some(created);
                }
                oil = Some(created);
            }
        }
        let Some(oil) = oil else {
            return 0;
        };

        let mut selected = 0;
        for ch in self.sys.channels.snapshot() {
            if self.join_desired_on_channel(key, parent, &ch) {
                let flag = if ch.source.is_none() && ch.upstream != *key {
                    OifFlag::Inherited
                } else {
                    OifFlag::Protocol
                };
                self.sys.forwarding.add_oif(oil, ch.interface, flag);
                selected += 1;
            }
        }
        selected
    }

    /// Apply the inherited outgoing set and drive the Join/Prune machine
    ///
    /// A non-empty set pushes the entry into Joined. An empty set still
    /// enables forwarding directly: a router hanging off a stick has
    /// nobody downstream to join for, but must keep accepting the
    /// incoming packets.
    pub fn inherited_olist(&mut self, key: &UpstreamKey, now: Instant) -> usize {
        let selected = self.inherited_olist_decide(key);

        if selected > 0 {
            self.switch(key, JoinState::Joined, now);
        } else {
            self.forward_on(key);
        }

        selected
    }
}
