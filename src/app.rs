// src/app.rs

use crate::config::{ConfigError, Configuration};
use crate::core::gate::ConcurrencyGate;
use crate::core::models::ScanReport;
use crate::core::reporter::{DISCOVERY_URL, Reporter, write_report};
use crate::core::scanner::dns::HostResolver;
use crate::core::scanner::probe::{ProbeSettings, TlsProber};
use crate::core::scanner::{ScanPlan, Scanner, Shutdown};
use crate::logging::project_directory;
use color_eyre::eyre::{Result, WrapErr};
use std::fmt::Write as _;
use std::path::PathBuf;
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// Config file looked up in the working directory before the platform one.
pub const LOCAL_CONFIG: &str = "agent.yaml";

/// Where the configuration lives when no path is given on the command line.
pub fn default_config_path() -> PathBuf {
    let local = PathBuf::from(LOCAL_CONFIG);
    if local.exists() {
        return local;
    }
    match project_directory() {
        Some(dirs) => dirs.config_dir().join("config.yaml"),
        None => local,
    }
}

/// Command-line switches that shape a run.
#[derive(Debug, Clone, Default)]
pub struct RunOptions {
    pub test_mode: bool,
    pub send: bool,
    pub dump: bool,
    pub output: Option<PathBuf>,
}

/// Everything a run needs, resolved once at startup and never mutated.
#[derive(Debug, Clone)]
pub struct Settings {
    pub agent_name: String,
    pub api_key: String,
    pub destination: String,
    pub proxy: Option<String>,
    pub probe: ProbeSettings,
    pub max_concurrency: Option<usize>,
    pub plan: ScanPlan,
    pub send: bool,
    pub dump: bool,
    pub output: Option<PathBuf>,
}

impl Settings {
    pub fn resolve(config: Configuration, options: &RunOptions) -> Result<Self, ConfigError> {
        let destination = if options.test_mode {
            config.test_api_url.clone().ok_or(ConfigError::MissingTestUrl)?
        } else {
            DISCOVERY_URL.to_string()
        };
        if options.send && config.api_key.trim().is_empty() {
            return Err(ConfigError::MissingApiKey);
        }

        let mut probe = ProbeSettings::default();
        if let Some(ms) = config.connect_timeout_ms {
            probe.connect_timeout = Duration::from_millis(ms);
        }
        if let Some(ms) = config.handshake_timeout_ms {
            probe.handshake_timeout = Duration::from_millis(ms);
        }

        Ok(Self {
            proxy: config.proxy_url()?,
            plan: config.scan_plan(),
            agent_name: config.agent_name,
            api_key: config.api_key,
            destination,
            probe,
            max_concurrency: config.max_concurrency,
            send: options.send,
            dump: options.dump,
            output: options.output.clone(),
        })
    }
}

pub struct App {
    settings: Settings,
}

impl App {
    pub fn new(settings: Settings) -> Self {
        Self { settings }
    }

    /// Scans, then hands the report to whichever outputs are enabled.
    ///
    /// Delivery failures are logged, not returned: the scan itself succeeded.
    pub async fn run(&self, shutdown: Shutdown) -> Result<ScanReport> {
        let settings = &self.settings;
        let gate = ConcurrencyGate::from_fd_budget(settings.max_concurrency);
        let prober = TlsProber::new(settings.probe.clone()).wrap_err("cannot build TLS connector")?;
        let scanner = Scanner::new(prober, gate, shutdown);

        let outcome = scanner.run(&settings.plan, &HostResolver::from_system()).await;
        let summary = &outcome.summary;
        if summary.cancelled {
            warn!(
                launched = summary.launched,
                finished = summary.finished,
                "Scan was cancelled, the report is partial."
            );
        } else {
            debug!(launched = summary.launched, finished = summary.finished, "Scan complete.");
        }
        let report = ScanReport::new(&settings.agent_name, outcome.endpoints);

        if settings.dump {
            print!("{}", render_dump(&report));
        }

        if let Some(path) = &settings.output {
            if let Err(e) = write_report(&report, path) {
                error!(error = %e, "Could not keep a local copy of the report.");
            }
        }

        if settings.send {
            let reporter = Reporter::new(
                &settings.destination,
                &settings.api_key,
                settings.proxy.as_deref(),
            )?;
            if let Err(e) = reporter.send(&report).await {
                error!(url = %reporter.url(), error = %e, "Report delivery failed.");
            }
        } else {
            info!(endpoints = report.endpoints.len(), "Sending disabled, report not delivered.");
        }

        Ok(report)
    }
}

/// Console listing of discovered certificates.
pub fn render_dump(report: &ScanReport) -> String {
    let mut out = String::new();
    for endpoint in &report.endpoints {
        let cert = &endpoint.certificate;
        let _ = writeln!(out, "Certificate for {}:{}:", endpoint.name, endpoint.port);
        let _ = writeln!(out, "  Common Name: {}", cert.common_name);
        let _ = writeln!(out, "  Issuer Name: {}", cert.issuer);
        let _ = writeln!(out, "  Expiry: {}", cert.expiry);
        let _ = writeln!(out, "----\n");
    }
    out
}
