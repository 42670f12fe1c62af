//! Reverse-DNS resolution of an accepted peer's FQDN (spec.md §4.4 "obtain
//! peer address+FQDN"), feeding the FQDN-first matching `PermittedPeerList`
//! already implements (spec.md §4.1).
//!
//! This is a synchronous `getnameinfo(3)` call, same as the legacy
//! `dnscache`-backed resolution it mirrors: it runs on whatever thread calls
//! it and can block on an upstream DNS query. Callers on a latency-sensitive
//! accept loop should only invoke it when an ACL with FQDN patterns is
//! actually configured (see `driver.rs`), same tradeoff the source makes.

#[cfg(target_os = "linux")]
mod imp {
    use std::{ffi::CStr, mem, net::SocketAddr};

    use libc::{AF_INET, AF_INET6, NI_NAMEREQD, sockaddr, sockaddr_in, sockaddr_in6, socklen_t};
    use tracing::debug;

    /// Resolves `peer`'s numeric address to a hostname via `getnameinfo`,
    /// with `NI_NAMEREQD` set so a missing PTR record is a failure rather
    /// than a numeric-string fallback baked into libc itself. Returns
    /// `None` on any resolution failure (no PTR record, timeout, NXDOMAIN)
    /// — callers fall back to numeric-address matching, per spec.md §4.1.
    pub fn resolve_fqdn(peer: SocketAddr) -> Option<String> {
        let mut host = [0u8; 256];
        let rc = match peer {
            SocketAddr::V4(v4) => {
                let sin = sockaddr_in {
                    sin_family: AF_INET as _,
                    sin_port: v4.port().to_be(),
                    sin_addr: libc::in_addr { s_addr: u32::from_ne_bytes(v4.ip().octets()) },
                    sin_zero: [0; 8],
                };
                unsafe {
                    libc::getnameinfo(
                        std::ptr::addr_of!(sin).cast::<sockaddr>(),
                        mem::size_of::<sockaddr_in>() as socklen_t,
                        host.as_mut_ptr().cast::<libc::c_char>(),
                        host.len() as _,
                        std::ptr::null_mut(),
                        0,
                        NI_NAMEREQD,
                    )
                }
            }
            SocketAddr::V6(v6) => {
                let sin6 = sockaddr_in6 {
                    sin6_family: AF_INET6 as _,
                    sin6_port: v6.port().to_be(),
                    sin6_flowinfo: v6.flowinfo(),
                    sin6_addr: libc::in6_addr { s6_addr: v6.ip().octets() },
                    sin6_scope_id: v6.scope_id(),
                };
                unsafe {
                    libc::getnameinfo(
                        std::ptr::addr_of!(sin6).cast::<sockaddr>(),
                        mem::size_of::<sockaddr_in6>() as socklen_t,
                        host.as_mut_ptr().cast::<libc::c_char>(),
                        host.len() as _,
                        std::ptr::null_mut(),
                        0,
                        NI_NAMEREQD,
                    )
                }
            }
        };
        if rc != 0 {
            debug!(%peer, %rc, "reverse DNS lookup failed, falling back to numeric match");
            return None;
        }
        // SAFETY: `getnameinfo` wrote a NUL-terminated C string into `host`
        // on success.
        let cstr = unsafe { CStr::from_ptr(host.as_ptr().cast::<libc::c_char>()) };
        let name = cstr.to_string_lossy().into_owned();
        if name.is_empty() { None } else { Some(name) }
    }
}

#[cfg(not(target_os = "linux"))]
mod imp {
    use std::net::SocketAddr;

    use tracing::warn;

    pub fn resolve_fqdn(peer: SocketAddr) -> Option<String> {
        warn!(%peer, "reverse DNS lookup is only implemented on linux, falling back to numeric match");
        None
    }
}

pub use imp::resolve_fqdn;

#[cfg(all(test, target_os = "linux"))]
mod tests {
    use std::net::{IpAddr, Ipv4Addr, SocketAddr};

    use super::*;

    #[test]
    fn loopback_resolves_or_falls_back_cleanly() {
        let peer = SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), 0);
        // No assertion on the resolved name itself (environment-dependent
        // reverse zone), just that this doesn't panic and returns a sane
        // `Option<String>`.
        let _ = resolve_fqdn(peer);
    }
}
