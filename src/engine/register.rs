//! First-Hop-Router register state machine (RFC 4601 §4.4.1)
//!
//! NoInfo → Join when the entry becomes FHR-eligible with an active
//! source stream; Join → Prune on a Register-Stop from the RP; Prune →
//! JoinPending on register-stop timer expiry (with a Null-Register probe
//! unless the RP-side silence condition holds); JoinPending → Join on the
//! next expiry. Keepalive expiry clears the whole thing back to NoInfo.

use std::net::Ipv4Addr;
use std::time::{Duration, Instant};

use bytes::{BufMut, Bytes, BytesMut};
use rand::Rng;

use crate::system::OifFlag;
use crate::upstream::{RegisterState, UpstreamFlags, UpstreamKey};

use super::UpstreamEngine;

/// IPv4 protocol number for PIM
const IPPROTO_PIM: u8 = 103;

/// Build the bare inner IPv4 header a Null-Register probe carries
///
/// Twenty bytes, no payload; the encapsulation layer fills in checksums.
pub(crate) fn encode_null_probe(source: Ipv4Addr, group: Ipv4Addr) -> Bytes {
    let mut buf = BytesMut::with_capacity(20);
    buf.put_u8(0x45); // version 4, IHL 5
    buf.put_u8(0); // TOS
    buf.put_u16(20); // total length, header only
    buf.put_u16(0); // identification
    buf.put_u16(0); // flags + fragment offset
    buf.put_u8(0); // TTL
    buf.put_u8(IPPROTO_PIM);
    buf.put_u16(0); // header checksum
    buf.put_slice(&source.octets());
    buf.put_slice(&group.octets());
    buf.freeze()
}

/// Jittered register suppression interval: uniform over [0.5P, 1.5P],
/// less the probe period so the probe lands before suppression ends
pub(crate) fn suppression_interval(
    rng: &mut impl Rng,
    base: Duration,
    probe: Duration,
) -> Duration {
    let lower = base / 2;
    let span_ms = base.as_millis() as u64;
    let jittered = lower + Duration::from_millis(rng.gen_range(0..=span_ms));
    jittered.saturating_sub(probe)
}

impl UpstreamEngine {
    /// NoInfo → Join: begin register-encapsulating toward the RP
    ///
    /// Adds the register pseudo-interface to the outgoing set and starts
    /// the keepalive timer.
    pub(crate) fn register_join(&mut self, key: &UpstreamKey, now: Instant) {
        let oil = self.registry().find(key).and_then(|e| e.channel_oil);
        if let Some(entry) = self.registry_mut().find_mut(key) {
            entry.reg_state = RegisterState::Join;
        }
        self.keepalive_start(key, now);
        if let Some(oil) = oil {
            let regif = self.sys.router.register_interface();
            self.sys.forwarding.add_oif(oil, regif, OifFlag::Protocol);
        }
    }

    /// A Register-Stop arrived from the RP for this flow
    ///
    /// Join/JoinPending → Prune: stop encapsulating and sit out the
    /// jittered suppression period.
    pub fn register_stop_received(&mut self, key: &UpstreamKey, now: Instant) {
        let Some(entry) = self.registry().find(key) else {
            return;
        };
        match entry.reg_state {
            RegisterState::Join | RegisterState::JoinPending => {
                let oil = entry.channel_oil;
                tracing::debug!(entry = %entry.name, "Register-Stop received, suppressing");
                if let Some(entry) = self.registry_mut().find_mut(key) {
                    entry.reg_state = RegisterState::Prune;
                }
                if let Some(oil) = oil {
                    let regif = self.sys.router.register_interface();
                    self.sys.forwarding.remove_oif(oil, regif, OifFlag::Protocol);
                }
                self.start_register_stop_timer(key, now, false);
            }
            RegisterState::NoInfo | RegisterState::Prune => {}
        }
    }

    /// Arm the register-stop timer, cancelling any pending deadline
    ///
    /// `null_register` selects the short non-jittered probe period;
    /// otherwise the jittered suppression period applies.
    pub(crate) fn start_register_stop_timer(
        &mut self,
        key: &UpstreamKey,
        now: Instant,
        null_register: bool,
    ) {
        let base = self.config().register_suppression_period;
        let probe = self.config().register_probe_period;
        let interval = if null_register {
            probe
        } else {
            suppression_interval(&mut self.rng, base, probe)
        };

        tracing::debug!(
            entry = %key,
            interval_msec = interval.as_millis() as u64,
            "Starting register stop timer"
        );
        if let Some(entry) = self.registry_mut().find_mut(key) {
            entry.register_stop_timer = Some(now + interval);
        }
    }

    /// Register-stop timer expiry
    pub(crate) fn on_register_stop_timer(&mut self, key: &UpstreamKey, now: Instant) {
        let Some(entry) = self.registry().find(key) else {
            return;
        };
        tracing::debug!(
            entry = %entry.name,
            reg_state = entry.reg_state.as_str(),
            "Upstream register stop timer"
        );

        match entry.reg_state {
            RegisterState::JoinPending => {
                // Suppression ran out without another Register-Stop
                let oil = entry.channel_oil;
                if let Some(entry) = self.registry_mut().find_mut(key) {
                    entry.reg_state = RegisterState::Join;
                }
                if let Some(oil) = oil {
                    let regif = self.sys.router.register_interface();
                    self.sys.forwarding.add_oif(oil, regif, OifFlag::Protocol);
                }
            }
            RegisterState::Prune => self.register_probe(key, now),
            RegisterState::Join | RegisterState::NoInfo => {}
        }
    }

    /// Prune expiry: move to JoinPending and send one Null-Register probe
    /// unless the RP-side silence condition holds
    fn register_probe(&mut self, key: &UpstreamKey, now: Instant) {
        let Some(entry) = self.registry().find(key) else {
            return;
        };
        let Some(iface) = entry.rpf.interface else {
            tracing::debug!(entry = %entry.name, "No RPF interface to probe the RP from");
            return;
        };
        let Some(origin) = self.sys.router.primary_address(iface) else {
            tracing::debug!(entry = %entry.name, "RPF interface not configured for pim");
            return;
        };
        let oil = entry.channel_oil;
        let name = entry.name.clone();

        if let Some(entry) = self.registry_mut().find_mut(key) {
            entry.reg_state = RegisterState::JoinPending;
        }
        self.start_register_stop_timer(key, now, true);

        // On the RP itself a still-active flow needs no probe; the RP
        // sees the traffic natively
        let recently_active = oil
            .map(|oil| self.sys.forwarding.read_counters(oil).last_used <= self.config().keepalive_period)
            .unwrap_or(false);
        if recently_active && self.group_is_rp(key) {
            tracing::debug!(entry = %name, "Not probing: local router is the RP and the flow is active");
            return;
        }

        let (Some(source), Some(group)) = (key.source, key.group) else {
            return;
        };
        let Some(rp) = key.group.and_then(|g| self.sys.router.rp_upstream(g)) else {
            tracing::debug!(entry = %name, "No RP to probe");
            return;
        };

        let probe = encode_null_probe(source, group);
        self.sys.register.send_register(key, probe, origin, &rp, true);
    }

    /// Keepalive started while FHR-eligible: CouldRegister may have just
    /// become true, so enter the register Join state
    pub(crate) fn fhr_keepalive_started(&mut self, key: &UpstreamKey) {
        if !self.could_register(key) {
            return;
        }
        tracing::debug!(entry = %key, "Keepalive started; set fhr reg state to joined");

        let (reg_state, oil) = match self.registry().find(key) {
            Some(e) => (e.reg_state, e.channel_oil),
            None => return,
        };
        if let Some(entry) = self.registry_mut().find_mut(key) {
            entry.flags.insert(UpstreamFlags::FHR);
        }
        if reg_state == RegisterState::NoInfo {
            if let Some(oil) = oil {
                let regif = self.sys.router.register_interface();
                self.sys.forwarding.add_oif(oil, regif, OifFlag::Protocol);
            }
            if let Some(entry) = self.registry_mut().find_mut(key) {
                entry.reg_state = RegisterState::Join;
            }
        }
    }

    /// Keepalive expired: CouldRegister is false again, so tear the FHR
    /// register state back down to NoInfo
    pub(crate) fn fhr_keepalive_expired(&mut self, key: &UpstreamKey) {
        let Some(entry) = self.registry().find(key) else {
            return;
        };
        if !entry.flags.contains(UpstreamFlags::FHR) {
            return;
        }
        tracing::debug!(entry = %entry.name, "Keepalive expired; clear fhr reg state");

        let oil = entry.channel_oil;
        if let Some(entry) = self.registry_mut().find_mut(key) {
            entry.register_stop_timer = None;
        }
        if let Some(oil) = oil {
            let regif = self.sys.router.register_interface();
            self.sys.forwarding.remove_oif(oil, regif, OifFlag::Protocol);
        }
        if let Some(entry) = self.registry_mut().find_mut(key) {
            entry.reg_state = RegisterState::NoInfo;
            entry.flags.remove(UpstreamFlags::FHR);
        }
    }
}
