//! Derivation of rate-limit identities from client address, submitted
//! credential and authenticated account.

use std::net::{IpAddr, Ipv6Addr};

/// Prefix length IPv6 clients are collapsed to by default.
pub const DEFAULT_IPV6_PREFIX: u8 = 56;

/// Stable per-client address key.
///
/// IPv4 (and IPv4-mapped IPv6) addresses are used as-is. Other IPv6
/// addresses are masked to `prefix` bits so that rotating through a
/// subnet does not yield fresh budgets.
pub fn ip_key(ip: IpAddr, ipv6_prefix: u8) -> String {
    match ip {
        IpAddr::V4(v4) => v4.to_string(),
        IpAddr::V6(v6) => {
            if let Some(v4) = v6.to_ipv4_mapped() {
                return v4.to_string();
            }
            let prefix = ipv6_prefix.min(128);
            let mask = if prefix == 0 {
                0
            } else {
                u128::MAX << (128 - u32::from(prefix))
            };
            let masked = Ipv6Addr::from(u128::from(v6) & mask);
            format!("{masked}/{prefix}")
        }
    }
}

/// How a scope builds its identity for a request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum KeyPolicy {
    /// Client address only.
    Ip,
    /// Client address plus a credential field from the JSON body,
    /// lower-cased. A missing field counts as `unknown`.
    IpAndField(&'static str),
    /// The authenticated account when present, else the client address.
    AccountOrIp,
}

/// Inputs a key may be derived from.
#[derive(Debug, Clone, Copy)]
pub struct KeySource<'a> {
    pub ip: IpAddr,
    pub field: Option<&'a str>,
    pub account_id: Option<&'a str>,
}

impl KeyPolicy {
    pub fn derive(&self, source: KeySource<'_>, ipv6_prefix: u8) -> String {
        let ip = ip_key(source.ip, ipv6_prefix);
        match self {
            KeyPolicy::Ip => ip,
            KeyPolicy::IpAndField(_) => {
                let value = source
                    .field
                    .map(|v| v.trim().to_lowercase())
                    .filter(|v| !v.is_empty())
                    .unwrap_or_else(|| "unknown".to_string());
                format!("{ip}:{value}")
            }
            KeyPolicy::AccountOrIp => match source.account_id {
                Some(id) => format!("user:{id}"),
                None => format!("ip:{ip}"),
            },
        }
    }

    /// The JSON body field this policy reads, if any.
    pub fn body_field(&self) -> Option<&'static str> {
        match self {
            KeyPolicy::IpAndField(field) => Some(field),
            _ => None,
        }
    }
}
