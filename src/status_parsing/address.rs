use std::net::IpAddr;

/// Externally observed address of a client, split into host and port.
///
/// The port is kept as text: it is empty when the snapshot gave none.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct RealAddress {
    pub ip: String,
    pub port: String,
}

impl RealAddress {
    fn new(ip: &str, port: &str) -> Self {
        Self {
            ip: ip.to_string(),
            port: port.to_string(),
        }
    }
}

/// Splits a `Real Address` column into ip and port.
///
/// Handles `[v6]:port`, bare v4/v6 addresses and `v4:port`. Never fails:
/// anything unrecognised comes back whole with an empty port.
pub fn resolve_real_address(raw: &str) -> RealAddress {
    let value = raw.trim();
    if value.is_empty() {
        return RealAddress::default();
    }

    if value.starts_with('[') {
        return match value.split_once("]:") {
            Some((ip, port)) => RealAddress::new(ip.trim_start_matches('['), port),
            None => RealAddress::new(value.trim_matches(|c| c == '[' || c == ']'), ""),
        };
    }

    if is_ip(value) {
        return RealAddress::new(value, "");
    }

    if let Some((ip, port)) = value.rsplit_once(':') {
        if !port.is_empty() && port.bytes().all(|b| b.is_ascii_digit()) && is_ip(ip) {
            return RealAddress::new(ip, port);
        }
    }

    RealAddress::new(value, "")
}

pub fn is_ip(value: &str) -> bool {
    value.parse::<IpAddr>().is_ok()
}
