// src/core/scanner/dns.rs

use tracing::{debug, info, warn};

use hickory_resolver::TokioAsyncResolver;
use hickory_resolver::config::{ResolverConfig, ResolverOpts};
use std::net::Ipv4Addr;

/// Resolves configured hostnames to the IPv4 addresses that get probed.
pub struct HostResolver {
    resolver: TokioAsyncResolver,
}

impl HostResolver {
    /// Uses the system resolver configuration, falling back to the library
    /// defaults when it cannot be read.
    pub fn from_system() -> Self {
        let resolver = match TokioAsyncResolver::tokio_from_system_conf() {
            Ok(resolver) => resolver,
            Err(e) => {
                warn!(error = %e, "Could not read system resolver config, using defaults.");
                TokioAsyncResolver::tokio(ResolverConfig::default(), ResolverOpts::default())
            }
        };
        Self { resolver }
    }

    /// Looks up every IPv4 address for `hostname`.
    ///
    /// A failed lookup is logged and returns no addresses; the host then simply
    /// contributes nothing to the run. IP literals resolve to themselves.
    pub async fn resolve_ipv4(&self, hostname: &str) -> Vec<Ipv4Addr> {
        debug!(hostname, "Resolving host.");
        match self.resolver.lookup_ip(hostname).await {
            Ok(lookup) => {
                let mut addrs: Vec<Ipv4Addr> = lookup
                    .iter()
                    .filter_map(|ip| match ip {
                        std::net::IpAddr::V4(v4) => Some(v4),
                        std::net::IpAddr::V6(_) => None,
                    })
                    .collect();
                addrs.sort_unstable();
                addrs.dedup();

                if addrs.is_empty() {
                    warn!(hostname, "Host has no IPv4 addresses.");
                } else {
                    info!(hostname, count = addrs.len(), "Resolved host.");
                }
                addrs
            }
            Err(e) => {
                warn!(hostname, error = %e, "DNS lookup failed.");
                Vec::new()
            }
        }
    }
}
