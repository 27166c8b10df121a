// src/core/models.rs

use serde::{Deserialize, Serialize};
use std::fmt;
use std::net::{IpAddr, SocketAddr};

// --- Scan Targets ---

// One (host, port) pair handed to a probe worker. `hostname` is set when the
// target came from a DNS name; it then drives both SNI and the reported name.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Target {
    pub ip: IpAddr,
    pub port: u16,
    pub hostname: Option<String>,
}

impl Target {
    // A target discovered through CIDR expansion, known only by address.
    pub fn from_ip(ip: IpAddr, port: u16) -> Self {
        Self { ip, port, hostname: None }
    }

    // A target resolved from a configured DNS name.
    pub fn from_host(hostname: &str, ip: IpAddr, port: u16) -> Self {
        Self {
            ip,
            port,
            hostname: Some(hostname.to_string()),
        }
    }

    pub fn socket_addr(&self) -> SocketAddr {
        SocketAddr::new(self.ip, self.port)
    }

    /// The identity used in the report: the hostname when known, the IP otherwise.
    pub fn display_name(&self) -> String {
        match &self.hostname {
            Some(name) => name.clone(),
            None => self.ip.to_string(),
        }
    }

    /// Name announced through SNI. IP-only targets announce nothing.
    pub fn sni(&self) -> Option<&str> {
        self.hostname.as_deref()
    }
}

impl fmt::Display for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.hostname {
            Some(name) => write!(f, "{}:{} ({})", name, self.port, self.ip),
            None => write!(f, "{}", self.socket_addr()),
        }
    }
}

// --- Certificates ---

// The leaf certificate presented by an endpoint. Field names follow the
// discovery API's wire format.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct CertificateRecord {
    pub common_name: String,
    pub issuer: String,
    pub expiry: String,
    #[serde(rename = "PEM")]
    pub pem: String,
}

// --- Endpoint Results ---

// A reachable TLS endpoint and the certificate it presented.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct EndpointResult {
    pub name: String,
    pub port: u16,
    pub certificate: CertificateRecord,
}

impl EndpointResult {
    pub fn new(target: &Target, certificate: CertificateRecord) -> Self {
        Self {
            name: target.display_name(),
            port: target.port,
            certificate,
        }
    }

    /// An endpoint with no identity carries nothing worth reporting.
    pub fn is_empty(&self) -> bool {
        self.name.is_empty()
    }
}

// --- Main Report ---

// The document shipped to the discovery API once per run.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ScanReport {
    pub agent_name: String,
    pub agent_version: String,
    pub endpoints: Vec<EndpointResult>,
}

impl ScanReport {
    pub fn new(agent_name: &str, endpoints: Vec<EndpointResult>) -> Self {
        Self {
            agent_name: agent_name.to_string(),
            agent_version: env!("CARGO_PKG_VERSION").to_string(),
            endpoints,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::Ipv4Addr;

    fn sample_certificate() -> CertificateRecord {
        CertificateRecord {
            common_name: "localhost".to_string(),
            issuer: "localhost".to_string(),
            expiry: "2036-October-15".to_string(),
            pem: "-----BEGIN CERTIFICATE-----\r\n-----END CERTIFICATE-----\r\n".to_string(),
        }
    }

    #[test]
    fn hostname_targets_report_the_hostname() {
        let ip = IpAddr::V4(Ipv4Addr::new(10, 0, 0, 5));
        let target = Target::from_host("api.example.com", ip, 8443);

        assert_eq!(target.display_name(), "api.example.com");
        assert_eq!(target.sni(), Some("api.example.com"));
        assert_eq!(target.socket_addr(), SocketAddr::new(ip, 8443));
    }

    #[test]
    fn ip_targets_have_no_sni() {
        let target = Target::from_ip(IpAddr::V4(Ipv4Addr::new(10, 0, 0, 5)), 443);

        assert_eq!(target.display_name(), "10.0.0.5");
        assert_eq!(target.sni(), None);
    }

    #[test]
    fn report_serializes_with_wire_field_names() {
        let target = Target::from_ip(IpAddr::V4(Ipv4Addr::new(192, 168, 1, 1)), 443);
        let endpoint = EndpointResult::new(&target, sample_certificate());
        let report = ScanReport::new("lab agent", vec![endpoint]);

        let json: serde_json::Value = serde_json::to_value(&report).unwrap();

        assert_eq!(json["agent_name"], "lab agent");
        assert_eq!(json["agent_version"], env!("CARGO_PKG_VERSION"));
        assert_eq!(json["endpoints"][0]["name"], "192.168.1.1");
        assert_eq!(json["endpoints"][0]["port"], 443);
        assert_eq!(json["endpoints"][0]["certificate"]["issuer"], "localhost");
        assert!(json["endpoints"][0]["certificate"]["PEM"].is_string());
    }

    #[test]
    fn empty_name_marks_the_sentinel() {
        let sentinel = EndpointResult {
            name: String::new(),
            port: 443,
            certificate: sample_certificate(),
        };
        assert!(sentinel.is_empty());
    }
}
