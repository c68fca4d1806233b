//! Address derivation from a runtime-reported hostname and port
//!
//! Plain functions with no runtime dependency; [`crate::container::CitmContainer`]
//! feeds them the hostname and public ports its endpoint reports.

use std::borrow::Cow;
use std::net::IpAddr;

/// Rewrite loopback IP literals to `localhost`.
///
/// Subdomain routing needs a name that wildcard-resolves locally, which
/// `sub.127.0.0.1` does not. Hostnames and non-loopback addresses pass through,
/// as does blank input.
pub fn to_localhost_if_loopback(hostname: &str) -> &str {
    let literal = hostname
        .trim()
        .trim_start_matches('[')
        .trim_end_matches(']');

    match literal.parse::<IpAddr>() {
        Ok(ip) if is_loopback(&ip) => "localhost",
        _ => hostname,
    }
}

fn is_loopback(ip: &IpAddr) -> bool {
    match ip {
        IpAddr::V4(v4) => v4.is_loopback(),
        IpAddr::V6(v6) => {
            v6.is_loopback() || v6.to_ipv4_mapped().is_some_and(|v4| v4.is_loopback())
        }
    }
}

/// `s1.s2.<hostname>` with loopback hostnames rewritten to `localhost`.
///
/// Blank subdomains are skipped. A non-loopback IP literal has no subdomains, so
/// they are dropped and the address is returned as is.
pub fn hostname_with_subdomains(hostname: &str, subdomains: &[&str]) -> String {
    let base = to_localhost_if_loopback(hostname);

    let labels: Vec<&str> = subdomains
        .iter()
        .map(|s| s.trim())
        .filter(|s| !s.is_empty())
        .collect();

    if labels.is_empty() || is_ip_literal(base) {
        return base.to_string();
    }
    format!("{}.{}", labels.join("."), base)
}

fn is_ip_literal(host: &str) -> bool {
    host.trim_start_matches('[')
        .trim_end_matches(']')
        .parse::<IpAddr>()
        .is_ok()
}

/// Host part of a URL authority; IPv6 literals need brackets
fn authority_host(host: &str) -> Cow<'_, str> {
    match host.parse::<IpAddr>() {
        Ok(IpAddr::V6(_)) => Cow::Owned(format!("[{}]", host)),
        _ => Cow::Borrowed(host),
    }
}

/// `scheme://host:port`, without a trailing slash
pub fn base_url(scheme: &str, host: &str, port: u16) -> String {
    format!("{}://{}:{}", scheme, authority_host(host), port)
}
