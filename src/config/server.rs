use std::net::{IpAddr, Ipv4Addr};

use ipnet::IpNet;
use serde::{Deserialize, Serialize};

/// HTTP server configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ServerConfig {
    /// Host address to bind to.
    #[serde(default = "default_host")]
    pub host: IpAddr,

    /// Port to listen on.
    #[serde(default = "default_port")]
    pub port: u16,

    /// Request body size limit in bytes. Login forms are tiny.
    #[serde(default = "default_body_limit")]
    pub body_limit_bytes: usize,

    /// Which peers may deliver federated identity headers.
    #[serde(default)]
    pub trusted_proxies: TrustedProxiesConfig,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            body_limit_bytes: default_body_limit(),
            trusted_proxies: TrustedProxiesConfig::default(),
        }
    }
}

fn default_host() -> IpAddr {
    IpAddr::V4(Ipv4Addr::LOCALHOST)
}

fn default_port() -> u16 {
    8080
}

fn default_body_limit() -> usize {
    64 * 1024
}

/// Configuration for the peers allowed to assert identity headers.
///
/// **Security Note:** the federated callback trusts attribute headers set by
/// the SP module running in front of the broker (e.g. `mod_shib` behind
/// Apache, or a header-forwarding proxy). If a client can reach the broker
/// directly and set those headers itself, it can log in as anyone. Only trust
/// headers when the connecting peer is a known proxy.
///
/// - `dangerously_trust_all: true` - **DANGEROUS**: Trusts identity headers
///   from ANY peer. Only use when the broker is reachable exclusively through
///   the SP module.
///
/// - `cidrs: ["10.0.0.0/8"]` - Trust identity headers only when the connecting
///   IP is within one of the specified CIDR ranges.
///
/// When neither is set, headers are accepted from any peer; configuration
/// validation refuses that combination unless the server binds to loopback.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(deny_unknown_fields)]
pub struct TrustedProxiesConfig {
    /// Trust identity headers from any connecting peer.
    #[serde(default)]
    pub dangerously_trust_all: bool,

    /// List of trusted proxy CIDR ranges (e.g., ["127.0.0.1/32", "10.0.0.0/8"]).
    #[serde(default)]
    pub cidrs: Vec<String>,
}

impl TrustedProxiesConfig {
    /// Parse the CIDR strings into IpNet objects.
    ///
    /// Invalid CIDRs are logged as warnings and skipped.
    pub fn parsed_cidrs(&self) -> Vec<IpNet> {
        self.cidrs
            .iter()
            .filter_map(|cidr_str| {
                cidr_str.parse::<IpNet>().ok().or_else(|| {
                    tracing::warn!(cidr = %cidr_str, "Invalid CIDR in trusted_proxies config, skipping");
                    None
                })
            })
            .collect()
    }

    /// Check if an IP address is within any of the trusted CIDR ranges.
    pub fn is_trusted_ip(&self, ip: IpAddr, parsed_cidrs: &[IpNet]) -> bool {
        if self.dangerously_trust_all {
            return true;
        }
        parsed_cidrs.iter().any(|cidr| cidr.contains(&ip))
    }

    /// Returns true if a peer restriction is in effect.
    ///
    /// This doesn't mean headers ARE trusted - the connecting IP must still
    /// be validated against the CIDRs (unless dangerously_trust_all is set).
    pub fn is_configured(&self) -> bool {
        self.dangerously_trust_all || !self.cidrs.is_empty()
    }
}
