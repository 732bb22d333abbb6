//! SSRF defense for outbound scrape fetches.
//!
//! Five checks applied in order: scheme, static blocked hostnames, an
//! optional domain allowlist, literal-IP reserved ranges, and (for
//! hostnames that survive to this point) DNS resolution. Each later check
//! can be more expensive than the last, so cheap checks run first.

use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};

use url::Url;

use crate::{Error, Result};

const BLOCKED_HOSTNAMES: &[&str] = &["metadata.google.internal", "metadata.google.com", "metadata", "instance-data"];

/// Validate a user-supplied URL is safe to fetch. Returns `Ok(())` on
/// success; on rejection returns [`Error::SsrfBlocked`] carrying the URL,
/// the offending hostname, and a machine-readable reason code.
///
/// # Errors
///
/// See above.
pub async fn validate_url(url: &str, allow_private_ips: bool, allowed_domains: &[String]) -> Result<()> {
    let parsed = Url::parse(url).map_err(|e| Error::InvalidUrl(format!("{url}: {e}")))?;

    if parsed.scheme() != "http" && parsed.scheme() != "https" {
        return Err(Error::DisallowedScheme(parsed.scheme().to_string()));
    }

    let Some(host) = parsed.host_str() else {
        return Err(Error::InvalidUrl(format!("{url}: no host")));
    };
    let host = host.trim_start_matches('[').trim_end_matches(']').to_string();

    if BLOCKED_HOSTNAMES.contains(&host.as_str()) {
        return Err(blocked(url, &host, "blocked_hostname"));
    }

    if !allowed_domains.is_empty() && !is_allowed_domain(&host, allowed_domains) {
        return Err(blocked(url, &host, "domain_not_allowlisted"));
    }

    if let Ok(ip) = host.parse::<IpAddr>() {
        if !allow_private_ips && is_private_or_reserved(ip) {
            return Err(blocked(url, &host, "reserved_ip_literal"));
        }
        return Ok(());
    }

    if let Ok(addrs) = tokio::net::lookup_host((host.as_str(), 0)).await {
        for addr in addrs {
            if !allow_private_ips && is_private_or_reserved(addr.ip()) {
                return Err(blocked(url, &host, "reserved_ip_resolved"));
            }
        }
    }
    // DNS resolution failure is not itself a rejection; the fetch that
    // follows this check will fail naturally.

    Ok(())
}

fn blocked(url: &str, host: &str, reason: &str) -> Error {
    Error::SsrfBlocked { url: url.to_string(), host: host.to_string(), reason: reason.to_string() }
}

fn is_allowed_domain(host: &str, allowed: &[String]) -> bool {
    allowed.iter().any(|allowed_host| host == allowed_host || host.ends_with(&format!(".{allowed_host}")))
}

fn is_private_or_reserved(ip: IpAddr) -> bool {
    match ip {
        IpAddr::V4(v4) => is_private_ipv4(v4),
        IpAddr::V6(v6) => is_private_ipv6(v6),
    }
}

fn is_private_ipv4(ip: Ipv4Addr) -> bool {
    let octets = ip.octets();
    matches!(octets[0], 10 | 127 | 0)
        || (octets[0] == 172 && (16..=31).contains(&octets[1]))
        || (octets[0] == 192 && octets[1] == 168)
        || (octets[0] == 169 && octets[1] == 254)
        || (octets[0] == 100 && (64..=127).contains(&octets[1]))
}

fn is_private_ipv6(ip: Ipv6Addr) -> bool {
    if ip.is_loopback() || ip.is_unspecified() {
        return true;
    }
    if let Some(v4) = ip.to_ipv4_mapped() {
        return is_private_ipv4(v4);
    }
    let segments = ip.segments();
    // fe80::/10 link-local
    if segments[0] & 0xffc0 == 0xfe80 {
        return true;
    }
    // fc00::/7 unique-local
    if segments[0] & 0xfe00 == 0xfc00 {
        return true;
    }
    false
}
