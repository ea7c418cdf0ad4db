//! SPT-bit assignment and shortest-path-tree switchover policy
//! (RFC 4601 §4.2.1, §4.8)
//!
//! The SPT bit records that source-tree traffic for an (S,G) flow is
//! arriving on the source's own reverse path. It is monotonic: once set
//! it stays set for the life of the entry.

use crate::system::IfIndex;
use crate::upstream::UpstreamKey;

use super::UpstreamEngine;

impl UpstreamEngine {
    /// SwitchToSptDesired(S,G) policy hook
    ///
    /// Baseline policy: switch when this router is the RP for the group.
    /// Switch-on-first-packet falls out implicitly, because starting the
    /// keepalive timer triggers switchover evaluation.
    pub fn switch_to_spt_desired(&self, key: &UpstreamKey) -> bool {
        self.group_is_rp(key)
    }

    /// Whether any of the entry's channels carries an (S,G,rpt) prune
    pub(crate) fn is_sg_rpt(&self, key: &UpstreamKey) -> bool {
        self.sys
            .channels
            .snapshot()
            .iter()
            .any(|ch| ch.upstream == *key && ch.sg_rpt)
    }

    /// Whether the entry's inherited outgoing list is empty
    pub(crate) fn empty_inherited_olist(&self, key: &UpstreamKey) -> bool {
        match self.registry().find(key).and_then(|e| e.channel_oil) {
            Some(oil) => self.sys.forwarding.oil_is_empty(oil),
            None => true,
        }
    }

    /// Evaluate the SPT bit after traffic arrived on `incoming`
    ///
    /// The checks run in a fixed order and the first hit wins; nothing
    /// ever clears the bit:
    /// 1. traffic not on the RPF interface: no decision
    /// 2. directly connected to the source
    /// 3. RPF interface toward S differs from the one toward RP(G)
    /// 4. (S,G,rpt)-pruned with an empty inherited outgoing list
    /// 5. RPF'(S,G) equals RPF'(*,G)
    pub fn update_sptbit(&mut self, key: &UpstreamKey, incoming: IfIndex) {
        let Some(entry) = self.registry().find(key) else {
            return;
        };
        let name = entry.name.clone();
        let rpf = entry.rpf;
        let parent = entry.parent;

        if rpf.interface != Some(incoming) {
            tracing::debug!(
                entry = %name,
                incoming = %incoming,
                "Incoming interface differs from RPF_interface(S)"
            );
            return;
        }

        if let Some(source) = key.source {
            if self.sys.router.connected_to_source(incoming, source) {
                tracing::debug!(entry = %name, "Directly connected to the source");
                self.set_sptbit(key);
                return;
            }
        }

        let rp_iface = key.group.and_then(|g| self.sys.router.rp_upstream(g)).and_then(|rp| rp.interface);
        if rp_iface != rpf.interface {
            tracing::debug!(entry = %name, "RPF_interface(S) != RPF_interface(RP(G))");
            self.set_sptbit(key);
            return;
        }

        if self.is_sg_rpt(key) && self.empty_inherited_olist(key) {
            tracing::debug!(entry = %name, "Inherited (S,G,rpt) outgoing list is empty");
            self.set_sptbit(key);
            return;
        }

        if let Some(parent) = parent {
            let same = self
                .registry()
                .find(&parent)
                .map(|p| p.rpf.is_same(&rpf))
                .unwrap_or(false);
            if same {
                tracing::debug!(entry = %name, "RPF'(S,G) is the same as RPF'(*,G)");
                self.set_sptbit(key);
            }
        }
    }

    fn set_sptbit(&mut self, key: &UpstreamKey) {
        if let Some(entry) = self.registry_mut().find_mut(key) {
            entry.set_sptbit();
        }
    }
}
