// src/config.rs

//! The agent's YAML configuration.

use crate::core::enumerator::{DEFAULT_PORT, PortSpec};
use crate::core::scanner::{HostSpec, RangeSpec, ScanPlan};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("cannot read config file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("cannot parse config file {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },

    #[error("test mode requested but no test_api_url is configured")]
    MissingTestUrl,

    #[error("api_key is empty")]
    MissingApiKey,

    #[error("invalid proxy {0}")]
    InvalidProxy(String),
}

/// A block of addresses, e.g. `10.0.1.0/24`, and the ports to probe on it.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CidrConfig {
    pub cidr: String,
    #[serde(flatten)]
    pub ports: PortSpec,
}

/// A host known by DNS name.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HostConfig {
    pub hostname: String,
    #[serde(default = "default_port")]
    pub port: u16,
}

fn default_port() -> u16 {
    DEFAULT_PORT
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Configuration {
    pub agent_name: String,
    #[serde(default)]
    pub api_key: String,
    /// Alternate discovery endpoint used in test mode.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub test_api_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub proxy_host: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub proxy_port: Option<u16>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub skip_ports: Vec<u16>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub connect_timeout_ms: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub handshake_timeout_ms: Option<u64>,
    /// Upper bound on simultaneous probes, below the descriptor budget.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_concurrency: Option<usize>,
    #[serde(default)]
    pub cidrs: BTreeMap<String, CidrConfig>,
    #[serde(default)]
    pub hosts: BTreeMap<String, HostConfig>,
}

impl Configuration {
    pub fn from_yaml(raw: &str) -> Result<Self, serde_yaml::Error> {
        serde_yaml::from_str(raw)
    }

    /// The proxy URL for the reporting client, if one is configured.
    pub fn proxy_url(&self) -> Result<Option<String>, ConfigError> {
        match (&self.proxy_host, self.proxy_port) {
            (None, None) => Ok(None),
            (Some(host), Some(port)) if !host.is_empty() => {
                if host.contains("://") {
                    Ok(Some(format!("{host}:{port}")))
                } else {
                    Ok(Some(format!("http://{host}:{port}")))
                }
            }
            (Some(host), None) if !host.is_empty() => Ok(Some(if host.contains("://") {
                host.clone()
            } else {
                format!("http://{host}")
            })),
            (host, port) => Err(ConfigError::InvalidProxy(format!("{host:?}:{port:?}"))),
        }
    }

    /// Turns the named ranges and hosts into a scan plan.
    pub fn scan_plan(&self) -> ScanPlan {
        ScanPlan {
            ranges: self
                .cidrs
                .iter()
                .map(|(name, c)| RangeSpec {
                    name: name.clone(),
                    cidr: c.cidr.clone(),
                    ports: c.ports.clone(),
                })
                .collect(),
            hosts: self
                .hosts
                .iter()
                .map(|(name, h)| HostSpec {
                    name: name.clone(),
                    hostname: h.hostname.clone(),
                    port: h.port,
                })
                .collect(),
            skip_ports: self.skip_ports.clone(),
        }
    }
}

/// Reads and parses the configuration file. Any failure here is fatal to the run.
pub fn load_config(path: &Path) -> Result<Configuration, ConfigError> {
    let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    Configuration::from_yaml(&raw).map_err(|source| ConfigError::Parse {
        path: path.to_path_buf(),
        source,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::enumerator::expand_ports;
    use std::io::Write;

    const SAMPLE: &str = r#"
agent_name: test agent
api_key: __TEST_API_KEY__
skip_ports: [22, 80]
cidrs:
  test1:
    cidr: 10.0.1.0/24
    skip_ports: [8080]
  test2:
    cidr: 10.0.2.0/24
    ports: [81, 443, 8080]
    port_ranges:
      - [77, 83]
      - [20, 25]
  test3:
    cidr: 10.0.3.1/32
hosts:
  test4:
    hostname: api.third-party.invalid
    port: 8080
  test5:
    hostname: hostname.example.com
"#;

    fn sample() -> Configuration {
        Configuration::from_yaml(SAMPLE).unwrap()
    }

    #[test]
    fn cidr_port_lists_follow_the_config() {
        let conf = sample();

        assert_eq!(expand_ports(&conf.cidrs["test1"].ports, &conf.skip_ports), vec![443]);
        assert_eq!(
            expand_ports(&conf.cidrs["test2"].ports, &conf.skip_ports),
            vec![20, 21, 23, 24, 25, 77, 78, 79, 81, 82, 83, 443, 8080]
        );
        assert_eq!(expand_ports(&conf.cidrs["test3"].ports, &conf.skip_ports), vec![443]);
    }

    #[test]
    fn host_port_defaults_to_443() {
        let conf = sample();

        assert_eq!(conf.hosts["test4"].port, 8080);
        assert_eq!(conf.hosts["test5"].port, 443);
    }

    #[test]
    fn plan_carries_ranges_hosts_and_global_skips() {
        let plan = sample().scan_plan();

        assert_eq!(plan.ranges.len(), 3);
        assert_eq!(plan.hosts.len(), 2);
        assert_eq!(plan.skip_ports, vec![22, 80]);
        let test2 = plan.ranges.iter().find(|r| r.name == "test2").unwrap();
        assert_eq!(test2.cidr, "10.0.2.0/24");
        assert_eq!(test2.ports.port_ranges, vec![vec![77, 83], vec![20, 25]]);
    }

    #[test]
    fn proxy_url_is_built_from_host_and_port() {
        let mut conf = sample();
        assert_eq!(conf.proxy_url().unwrap(), None);

        conf.proxy_host = Some("proxy.internal".to_string());
        conf.proxy_port = Some(3128);
        assert_eq!(conf.proxy_url().unwrap().as_deref(), Some("http://proxy.internal:3128"));

        conf.proxy_host = None;
        assert!(matches!(conf.proxy_url(), Err(ConfigError::InvalidProxy(_))));
    }

    #[test]
    fn load_config_reads_files() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(SAMPLE.as_bytes()).unwrap();

        let conf = load_config(file.path()).unwrap();
        assert_eq!(conf.agent_name, "test agent");
        assert_eq!(conf.api_key, "__TEST_API_KEY__");
    }

    #[test]
    fn unreadable_and_malformed_files_are_errors() {
        let missing = load_config(Path::new("/nonexistent/agent.yaml")).unwrap_err();
        assert!(matches!(missing, ConfigError::Read { .. }));

        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(b"agent_name: [unterminated").unwrap();
        let malformed = load_config(file.path()).unwrap_err();
        assert!(matches!(malformed, ConfigError::Parse { .. }));
    }

    #[test]
    fn out_of_range_ports_fail_to_parse() {
        let raw = "agent_name: x\ncidrs:\n  a:\n    cidr: 10.0.0.0/24\n    ports: [70000]\n";
        assert!(Configuration::from_yaml(raw).is_err());
    }
}
