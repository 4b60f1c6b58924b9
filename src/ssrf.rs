use anyhow::{anyhow, bail, Result};
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};
use url::{Host, Url};

/// IPv4 ranges a fetch must never reach: private, loopback, link-local,
/// CGNAT, documentation, benchmarking, multicast, reserved.
static V4_BLOCKED: &[(Ipv4Addr, u8)] = &[
    (Ipv4Addr::new(0, 0, 0, 0), 8),
    (Ipv4Addr::new(10, 0, 0, 0), 8),
    (Ipv4Addr::new(100, 64, 0, 0), 10),
    (Ipv4Addr::new(127, 0, 0, 0), 8),
    (Ipv4Addr::new(169, 254, 0, 0), 16),
    (Ipv4Addr::new(172, 16, 0, 0), 12),
    (Ipv4Addr::new(192, 0, 0, 0), 24),
    (Ipv4Addr::new(192, 0, 2, 0), 24),
    (Ipv4Addr::new(192, 168, 0, 0), 16),
    (Ipv4Addr::new(198, 18, 0, 0), 15),
    (Ipv4Addr::new(198, 51, 100, 0), 24),
    (Ipv4Addr::new(203, 0, 113, 0), 24),
    (Ipv4Addr::new(224, 0, 0, 0), 4),
    (Ipv4Addr::new(240, 0, 0, 0), 4),
];

static V6_BLOCKED: &[(Ipv6Addr, u8)] = &[
    (Ipv6Addr::new(0, 0, 0, 0, 0, 0, 0, 0), 128),
    (Ipv6Addr::new(0, 0, 0, 0, 0, 0, 0, 1), 128),
    (Ipv6Addr::new(0xfc00, 0, 0, 0, 0, 0, 0, 0), 7),
    (Ipv6Addr::new(0xfe80, 0, 0, 0, 0, 0, 0, 0), 10),
    (Ipv6Addr::new(0xff00, 0, 0, 0, 0, 0, 0, 0), 8),
    (Ipv6Addr::new(0x2001, 0xdb8, 0, 0, 0, 0, 0, 0), 32),
];

fn v4_in(ip: Ipv4Addr, net: Ipv4Addr, prefix: u8) -> bool {
    if prefix == 0 {
        return true;
    }
    let shift = 32 - u32::from(prefix);
    (u32::from(ip) >> shift) == (u32::from(net) >> shift)
}

fn v6_in(ip: Ipv6Addr, net: Ipv6Addr, prefix: u8) -> bool {
    if prefix == 0 {
        return true;
    }
    let shift = 128 - u32::from(prefix);
    (u128::from(ip) >> shift) == (u128::from(net) >> shift)
}

/// Whether an address falls inside any blocked range. IPv4-mapped IPv6
/// addresses are folded and checked against the IPv4 table.
pub fn ip_blocked(ip: IpAddr) -> bool {
    match ip {
        IpAddr::V4(v4) => V4_BLOCKED.iter().any(|&(net, p)| v4_in(v4, net, p)),
        IpAddr::V6(v6) => {
            if let Some(mapped) = v6.to_ipv4_mapped() {
                return ip_blocked(IpAddr::V4(mapped));
            }
            V6_BLOCKED.iter().any(|&(net, p)| v6_in(v6, net, p))
        }
    }
}

fn check_ip(ip: IpAddr, host: &str) -> Result<()> {
    if ip_blocked(ip) {
        bail!("non-public host: {host} resolves to blocked address {ip}");
    }
    Ok(())
}

/// Validate a URL's host before connecting: IP literals are checked against
/// the blocked ranges directly; hostnames are resolved and every returned
/// address must be public.
pub async fn ensure_public_url(url: &Url) -> Result<()> {
    let host = url
        .host()
        .ok_or_else(|| anyhow!("url has no host: {url}"))?;
    match host {
        Host::Ipv4(ip) => check_ip(IpAddr::V4(ip), &ip.to_string()),
        Host::Ipv6(ip) => check_ip(IpAddr::V6(ip), &ip.to_string()),
        Host::Domain(domain) => {
            let port = url.port_or_known_default().unwrap_or(443);
            let addrs = tokio::net::lookup_host((domain, port))
                .await
                .map_err(|e| anyhow!("dns resolution failed for {domain}: {e}"))?;
            let mut any = false;
            for addr in addrs {
                any = true;
                check_ip(addr.ip(), domain)?;
            }
            if !any {
                bail!("dns resolution returned no addresses for {domain}");
            }
            Ok(())
        }
    }
}
