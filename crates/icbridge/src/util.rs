//! Small helpers shared across the crate.

use std::net::IpAddr;

/// Resolve the fully qualified host name for a peer address.
///
/// The reverse lookup runs on the blocking pool; when it fails (no PTR
/// record, resolver trouble) the literal address is returned instead.
pub async fn fqdn(addr: IpAddr) -> String {
    match tokio::task::spawn_blocking(move || reverse_lookup(addr)).await {
        Ok(Some(name)) => name,
        _ => addr.to_string(),
    }
}

fn reverse_lookup(addr: IpAddr) -> Option<String> {
    let mut host = [0 as libc::c_char; libc::NI_MAXHOST as usize];

    let rc = match addr {
        IpAddr::V4(v4) => {
            let sin = libc::sockaddr_in {
                sin_family: libc::AF_INET as libc::sa_family_t,
                sin_port: 0,
                // octets are already in network order; keep the layout
                sin_addr: libc::in_addr {
                    s_addr: u32::from_ne_bytes(v4.octets()),
                },
                sin_zero: [0; 8],
            };
            // SAFETY: sin is a fully initialized sockaddr_in and host is a
            // writable buffer of NI_MAXHOST bytes.
            unsafe {
                libc::getnameinfo(
                    std::ptr::from_ref(&sin).cast::<libc::sockaddr>(),
                    std::mem::size_of::<libc::sockaddr_in>() as libc::socklen_t,
                    host.as_mut_ptr(),
                    host.len() as libc::socklen_t,
                    std::ptr::null_mut(),
                    0,
                    libc::NI_NAMEREQD,
                )
            }
        }
        IpAddr::V6(v6) => {
            let sin6 = libc::sockaddr_in6 {
                sin6_family: libc::AF_INET6 as libc::sa_family_t,
                sin6_port: 0,
                sin6_flowinfo: 0,
                sin6_addr: libc::in6_addr {
                    s6_addr: v6.octets(),
                },
                sin6_scope_id: 0,
            };
            // SAFETY: as above, for the IPv6 sockaddr.
            unsafe {
                libc::getnameinfo(
                    std::ptr::from_ref(&sin6).cast::<libc::sockaddr>(),
                    std::mem::size_of::<libc::sockaddr_in6>() as libc::socklen_t,
                    host.as_mut_ptr(),
                    host.len() as libc::socklen_t,
                    std::ptr::null_mut(),
                    0,
                    libc::NI_NAMEREQD,
                )
            }
        }
    };

    if rc != 0 {
        return None;
    }

    // SAFETY: getnameinfo succeeded, so host holds a NUL-terminated string.
    let name = unsafe { std::ffi::CStr::from_ptr(host.as_ptr()) };
    name.to_str().ok().map(str::to_string)
}
