//! Upstream entry identity
//!
//! This module defines the (source, group) key that identifies an upstream
//! entry. Either half may be the wildcard, giving the three shapes the
//! protocol knows about: (S,G), (*,G) and (*,*).

use std::cmp::Ordering;
use std::net::Ipv4Addr;

/// Identity of an upstream entry: (source, group), either side wildcarded
///
/// `None` stands for the `*` wildcard. Keys are unique within a registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct UpstreamKey {
    /// Source address, `None` for `*`
    pub source: Option<Ipv4Addr>,
    /// Group address, `None` for `*`
    pub group: Option<Ipv4Addr>,
}

impl UpstreamKey {
    /// Create an (S,G) key
    pub fn source_group(source: Ipv4Addr, group: Ipv4Addr) -> Self {
        Self {
            source: Some(source),
            group: Some(group),
        }
    }

    /// Create a (*,G) key
    pub fn star_group(group: Ipv4Addr) -> Self {
        Self {
            source: None,
            group: Some(group),
        }
    }

    /// Create the (*,*) key
    pub fn star_star() -> Self {
        Self {
            source: None,
            group: None,
        }
    }

    /// True for (S,G) keys
    pub fn is_source_group(&self) -> bool {
        self.source.is_some() && self.group.is_some()
    }

    /// True for (*,G) and (*,*) keys
    pub fn is_wildcard(&self) -> bool {
        self.source.is_none()
    }

    /// True for the (*,*) key
    pub fn is_star_star(&self) -> bool {
        self.source.is_none() && self.group.is_none()
    }

    /// The key of the entry that would cover this one, if any
    ///
    /// (S,G) is covered by (*,G); (*,G) is covered by (*,*). The (*,*)
    /// key has no cover.
    pub fn covering_key(&self) -> Option<UpstreamKey> {
        match (self.source, self.group) {
            (Some(_), Some(group)) => Some(UpstreamKey::star_group(group)),
            (None, Some(_)) => Some(UpstreamKey::star_star()),
            _ => None,
        }
    }
}

/// Keys order by (group, source), numerically ascending, wildcard first.
///
/// This is the canonical full-table scan order of the registry.
impl Ord for UpstreamKey {
    fn cmp(&self, other: &Self) -> Ordering {
        self.group
            .cmp(&other.group)
            .then(self.source.cmp(&other.source))
    }
}

impl PartialOrd for UpstreamKey {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl std::fmt::Display for UpstreamKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.source {
            Some(src) => write!(f, "({},", src)?,
            None => write!(f, "(*,")?,
        }
        match self.group {
            Some(grp) => write!(f, "{})", grp),
            None => write!(f, "*)"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn addr(s: &str) -> Ipv4Addr {
        s.parse().unwrap()
    }

    #[test]
    fn test_shapes() {
        let sg = UpstreamKey::source_group(addr("10.0.0.1"), addr("224.1.1.1"));
        let star_g = UpstreamKey::star_group(addr("224.1.1.1"));
        let star_star = UpstreamKey::star_star();

        assert!(sg.is_source_group());
        assert!(!sg.is_wildcard());

        assert!(star_g.is_wildcard());
        assert!(!star_g.is_source_group());
        assert!(!star_g.is_star_star());

        assert!(star_star.is_wildcard());
        assert!(star_star.is_star_star());
    }

    #[test]
    fn test_covering_key() {
        let sg = UpstreamKey::source_group(addr("10.0.0.1"), addr("224.1.1.1"));
        let star_g = UpstreamKey::star_group(addr("224.1.1.1"));

        assert_eq!(sg.covering_key(), Some(star_g));
        assert_eq!(star_g.covering_key(), Some(UpstreamKey::star_star()));
        assert_eq!(UpstreamKey::star_star().covering_key(), None);
    }

    #[test]
    fn test_ordering_group_then_source() {
        let a = UpstreamKey::source_group(addr("10.0.0.2"), addr("224.1.1.1"));
        let b = UpstreamKey::source_group(addr("10.0.0.1"), addr("224.1.1.2"));
        let c = UpstreamKey::star_group(addr("224.1.1.1"));

        // Group dominates source
        assert!(a < b);
        // Wildcard source sorts before any concrete source of the group
        assert!(c < a);

        // Numeric, not lexicographic: 10.0.0.9 < 10.0.0.10
        let lo = UpstreamKey::source_group(addr("10.0.0.9"), addr("224.1.1.1"));
        let hi = UpstreamKey::source_group(addr("10.0.0.10"), addr("224.1.1.1"));
        assert!(lo < hi);
    }

    #[test]
    fn test_display() {
        let sg = UpstreamKey::source_group(addr("10.0.0.1"), addr("224.1.1.1"));
        assert_eq!(sg.to_string(), "(10.0.0.1,224.1.1.1)");
        assert_eq!(
            UpstreamKey::star_group(addr("224.1.1.1")).to_string(),
            "(*,224.1.1.1)"
        );
        assert_eq!(UpstreamKey::star_star().to_string(), "(*,*)");
    }
}
