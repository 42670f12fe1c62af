use std::net::IpAddr;

use tracing::debug;

/// One permitted-peer pattern: an exact label or a `*`-wildcarded label,
/// matched against either the numeric address or the resolved FQDN of a
/// connecting peer (spec.md §4.1).
#[derive(Debug, Clone, PartialEq, Eq)]
struct Pattern(String);

impl Pattern {
    fn matches(&self, candidate: &str) -> bool {
        if self.0 == "*" {
            return true;
        }
        if let Some(suffix) = self.0.strip_prefix('*') {
            return candidate.to_ascii_lowercase().ends_with(&suffix.to_ascii_lowercase());
        }
        if let Some(prefix) = self.0.strip_suffix('*') {
            return candidate.to_ascii_lowercase().starts_with(&prefix.to_ascii_lowercase());
        }
        self.0.eq_ignore_ascii_case(candidate)
    }
}

/// Ordered set of permitted-peer patterns, shared by reference between the
/// module and every stream driver it activates (spec.md §3, §9 "model as an
/// immutable snapshot acquired at activation").
///
/// An empty list means "no restriction" — every peer is permitted. This
/// mirrors the source: `inputTCPServerStreamDriverPermittedPeer` is never
/// required, and omitting it entirely disables peer authentication.
#[derive(Debug, Clone, Default)]
pub struct PermittedPeerList {
    patterns: Vec<Pattern>,
}

impl PermittedPeerList {
    pub fn new() -> Self {
        Self { patterns: Vec::new() }
    }

    pub fn add(&mut self, pattern: impl Into<String>) {
        self.patterns.push(Pattern(pattern.into()));
    }

    pub fn is_empty(&self) -> bool {
        self.patterns.is_empty()
    }

    pub fn len(&self) -> usize {
        self.patterns.len()
    }

    /// Logged once at activation (`willRun`-equivalent), matching the
    /// source's startup summary of the active ACL.
    pub fn log_summary(&self) {
        if self.patterns.is_empty() {
            debug!("permitted peer list is empty, accepting all peers");
        } else {
            debug!(patterns = self.len(), "permitted peer list active");
        }
    }

    /// `isAllowed(family, addr, fqdn, directionTCP)` (spec.md §4.1).
    /// Tries the FQDN first, then falls back to the numeric address.
    /// Unknown address family — there is none in `std::net::IpAddr`, so
    /// this only ever sees V4/V6 — fails closed by construction.
    pub fn is_allowed(&self, addr: IpAddr, fqdn: Option<&str>) -> bool {
        if self.patterns.is_empty() {
            return true;
        }
        if let Some(fqdn) = fqdn {
            if self.patterns.iter().any(|p| p.matches(fqdn)) {
                return true;
            }
        }
        let numeric = addr.to_string();
        self.patterns.iter().any(|p| p.matches(&numeric))
    }
}

impl Drop for PermittedPeerList {
    fn drop(&mut self) {
        debug!(patterns = self.len(), "permitted peer list torn down");
    }
}

#[cfg(test)]
mod tests {
    use std::net::{IpAddr, Ipv4Addr};

    use super::*;

    #[test]
    fn empty_list_permits_everyone() {
        let acl = PermittedPeerList::new();
        assert!(acl.is_allowed(IpAddr::V4(Ipv4Addr::new(10, 0, 0, 9)), None));
    }

    #[test]
    fn exact_numeric_match_is_permitted() {
        let mut acl = PermittedPeerList::new();
        acl.add("192.168.1.5");
        assert!(acl.is_allowed(IpAddr::V4(Ipv4Addr::new(192, 168, 1, 5)), None));
        assert!(!acl.is_allowed(IpAddr::V4(Ipv4Addr::new(10, 0, 0, 9)), None));
    }

    #[test]
    fn fqdn_is_tried_before_numeric_fallback() {
        let mut acl = PermittedPeerList::new();
        acl.add("*.example.com");
        assert!(acl.is_allowed(IpAddr::V4(Ipv4Addr::new(10, 0, 0, 9)), Some("host.example.com")));
        assert!(!acl.is_allowed(IpAddr::V4(Ipv4Addr::new(10, 0, 0, 9)), Some("host.other.com")));
    }

    #[test]
    fn numeric_fallback_applies_when_fqdn_does_not_match() {
        let mut acl = PermittedPeerList::new();
        acl.add("10.0.0.9");
        assert!(acl.is_allowed(IpAddr::V4(Ipv4Addr::new(10, 0, 0, 9)), Some("host.other.com")));
    }

    #[test]
    fn unrelated_peer_is_rejected() {
        let mut acl = PermittedPeerList::new();
        acl.add("10.0.0.1");
        acl.add("10.0.0.2");
        assert!(!acl.is_allowed(IpAddr::V4(Ipv4Addr::new(10, 0, 0, 9)), None));
    }
}
