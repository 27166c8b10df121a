// src/core/enumerator.rs

//! Turns configured address ranges and port specifications into the concrete
//! addresses and ports the orchestrator fans out over.

use serde::{Deserialize, Serialize};
use std::net::Ipv4Addr;
use std::ops::RangeInclusive;
use std::str::FromStr;
use thiserror::Error;
use tracing::{debug, warn};

/// The port probed when a range names no ports at all.
pub const DEFAULT_PORT: u16 = 443;

#[derive(Error, Debug, PartialEq, Eq)]
pub enum CidrError {
    #[error("missing '/' prefix separator in {0:?}")]
    MissingPrefix(String),

    #[error("invalid IPv4 address in {0:?}")]
    BadAddress(String),

    #[error("invalid prefix length in {0:?}")]
    BadPrefix(String),
}

/// A parsed IPv4 CIDR block, normalized to its network address.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Ipv4Block {
    network: u32,
    prefix: u8,
}

impl Ipv4Block {
    fn mask(&self) -> u32 {
        if self.prefix == 0 {
            0
        } else {
            u32::MAX << (32 - self.prefix)
        }
    }

    pub fn network(&self) -> Ipv4Addr {
        Ipv4Addr::from(self.network)
    }

    pub fn broadcast(&self) -> Ipv4Addr {
        Ipv4Addr::from(self.network | !self.mask())
    }

    /// Number of addresses [`hosts`](Self::hosts) yields.
    pub fn host_count(&self) -> u64 {
        let size = 1u64 << (32 - u32::from(self.prefix));
        match self.prefix {
            32 => 1,
            31 => 0,
            _ => size - 2,
        }
    }

    /// Addresses worth probing: everything but the network and broadcast
    /// addresses, except a /32 which is the single host itself.
    pub fn hosts(&self) -> impl Iterator<Item = Ipv4Addr> + use<> {
        let broadcast = u32::from(self.broadcast());
        let range: RangeInclusive<u32> = if self.prefix == 32 {
            self.network..=self.network
        } else if broadcast - self.network < 2 {
            // A /31 has no addresses left once both ends are excluded.
            1..=0
        } else {
            (self.network + 1)..=(broadcast - 1)
        };
        range.map(Ipv4Addr::from)
    }
}

impl FromStr for Ipv4Block {
    type Err = CidrError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        let Some((ip_str, prefix_str)) = s.split_once('/') else {
            return Err(CidrError::MissingPrefix(s.to_string()));
        };
        let ip: Ipv4Addr = ip_str
            .parse()
            .map_err(|_| CidrError::BadAddress(s.to_string()))?;
        let prefix: u8 = prefix_str
            .parse()
            .ok()
            .filter(|p| *p <= 32)
            .ok_or_else(|| CidrError::BadPrefix(s.to_string()))?;

        let block = Ipv4Block { network: 0, prefix };
        Ok(Ipv4Block {
            network: u32::from(ip) & block.mask(),
            prefix,
        })
    }
}

/// Expands a CIDR string into the ordered addresses to probe.
///
/// Addresses are produced lazily, so even a /0 costs nothing up front. An
/// unparsable CIDR is logged and yields no addresses so that the rest of the
/// run can continue.
pub fn expand_cidr(cidr: &str) -> impl Iterator<Item = Ipv4Addr> + use<> {
    let block = match cidr.parse::<Ipv4Block>() {
        Ok(block) => {
            debug!(
                cidr,
                network = %block.network(),
                broadcast = %block.broadcast(),
                hosts = block.host_count(),
                "Expanding CIDR."
            );
            Some(block)
        }
        Err(e) => {
            warn!(cidr, error = %e, "Skipping unparsable CIDR.");
            None
        }
    };
    block.into_iter().flat_map(|block| block.hosts())
}

/// Which ports to probe for one address range.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PortSpec {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub ports: Vec<u16>,
    /// Inclusive `[start, end]` pairs.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub port_ranges: Vec<Vec<u16>>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub skip_ports: Vec<u16>,
}

/// Resolves a port spec to a sorted, duplicate-free list with both the
/// range-local and the global skip lists removed.
///
/// Explicit ports default to `[443]`. Ranges with fewer than two bounds or
/// with `start > end` are ignored.
pub fn expand_ports(spec: &PortSpec, global_skip: &[u16]) -> Vec<u16> {
    let mut ports: Vec<u16> = if spec.ports.is_empty() {
        vec![DEFAULT_PORT]
    } else {
        spec.ports.clone()
    };

    for bounds in &spec.port_ranges {
        match bounds.as_slice() {
            [start, end, ..] if start <= end => ports.extend(*start..=*end),
            _ => debug!(?bounds, "Ignoring malformed port range."),
        }
    }

    ports.retain(|port| !spec.skip_ports.contains(port));
    ports.retain(|port| !global_skip.contains(port));

    ports.sort_unstable();
    ports.dedup();
    ports
}
