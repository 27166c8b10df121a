// src/core/scanner/probe.rs

use tracing::{debug, info, warn};

use crate::core::certificate::record_from_der;
use crate::core::error::ProbeError;
use crate::core::models::{CertificateRecord, EndpointResult, Target};
use async_trait::async_trait;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::time::{sleep, timeout};
use tokio_native_tls::{TlsConnector, TlsStream};

/// Largest politeness response we bother reading.
const HTTP_READ_LIMIT: usize = 4096;

/// Anything that can turn a target into an endpoint result.
///
/// The orchestrator only talks to this trait, which lets tests drive it with
/// a fake that never touches the network.
#[async_trait]
pub trait Prober: Send + Sync + 'static {
    /// Returns `None` when the target yields no certificate, for any reason.
    async fn probe(&self, target: &Target) -> Option<EndpointResult>;
}

/// Deadlines and limits for a single probe.
#[derive(Debug, Clone)]
pub struct ProbeSettings {
    pub connect_timeout: Duration,
    pub handshake_timeout: Duration,
    /// Deadline for the optional HTTP request on the HTTPS port.
    pub http_timeout: Duration,
    /// Port on which a minimal GET is sent after the handshake.
    pub http_port: u16,
    /// How often a connect failing with fd exhaustion is retried.
    pub max_exhaustion_retries: u32,
}

impl Default for ProbeSettings {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_millis(500),
            handshake_timeout: Duration::from_secs(10),
            http_timeout: Duration::from_secs(1),
            http_port: 443,
            max_exhaustion_retries: 8,
        }
    }
}

/// Probes targets with a plain TCP connect followed by a TLS handshake that
/// accepts any certificate. Verification is off so that self-signed and
/// expired certificates are recorded instead of rejected.
pub struct TlsProber {
    with_sni: TlsConnector,
    without_sni: TlsConnector,
    settings: ProbeSettings,
}

impl TlsProber {
    pub fn new(settings: ProbeSettings) -> Result<Self, native_tls::Error> {
        Ok(Self {
            with_sni: build_connector(true)?,
            without_sni: build_connector(false)?,
            settings,
        })
    }

    /// Opens a TCP connection, retrying a bounded number of times while the
    /// process is out of file descriptors.
    async fn connect(&self, target: &Target) -> Result<TcpStream, ProbeError> {
        let addr = target.socket_addr();
        let connect_timeout = self.settings.connect_timeout;

        retry_while_exhausted(
            target,
            self.settings.max_exhaustion_retries,
            connect_timeout,
            || async move {
                match timeout(connect_timeout, TcpStream::connect(addr)).await {
                    Ok(Ok(stream)) => Ok(stream),
                    Ok(Err(e)) => Err(ProbeError::from_connect(e)),
                    Err(_) => Err(ProbeError::Timeout("TCP connect")),
                }
            },
        )
        .await
    }

    async fn handshake(&self, target: &Target) -> Result<TlsStream<TcpStream>, ProbeError> {
        let stream = self.connect(target).await?;

        let (connector, domain) = match target.sni() {
            Some(hostname) => (&self.with_sni, hostname.to_string()),
            None => (&self.without_sni, target.ip.to_string()),
        };

        debug!(%target, "Performing TLS handshake.");
        match timeout(self.settings.handshake_timeout, connector.connect(&domain, stream)).await {
            Ok(Ok(tls)) => Ok(tls),
            Ok(Err(e)) => Err(ProbeError::Handshake(e.to_string())),
            Err(_) => Err(ProbeError::Timeout("TLS handshake")),
        }
    }

    /// Some servers drop idle TLS sessions noisily; give them a request.
    async fn say_hello(&self, target: &Target, tls: &mut TlsStream<TcpStream>) {
        let host = target.display_name();
        let request = format!("GET / HTTP/1.1\r\nHost: {host}\r\nConnection: close\r\n\r\n");

        let exchange = async {
            tls.write_all(request.as_bytes()).await?;
            let mut buf = vec![0u8; HTTP_READ_LIMIT];
            tls.read(&mut buf).await
        };

        match timeout(self.settings.http_timeout, exchange).await {
            Ok(Ok(read)) => debug!(%target, read, "Discarded HTTP response."),
            Ok(Err(e)) => debug!(%target, error = %e, "HTTP request failed."),
            Err(_) => debug!(%target, "HTTP response timed out."),
        }
    }

    async fn fetch_certificate(&self, target: &Target) -> Result<CertificateRecord, ProbeError> {
        // Cheap reachability check before paying for a handshake.
        drop(self.connect(target).await?);

        let mut tls = self.handshake(target).await?;

        if target.port == self.settings.http_port {
            self.say_hello(target, &mut tls).await;
        }

        let cert = tls
            .get_ref()
            .peer_certificate()
            .map_err(|e| ProbeError::Handshake(e.to_string()))?
            .ok_or(ProbeError::NoCertificate)?;
        let der = cert.to_der().map_err(|e| ProbeError::Certificate(e.to_string()))?;

        record_from_der(&der)
    }
}

#[async_trait]
impl Prober for TlsProber {
    async fn probe(&self, target: &Target) -> Option<EndpointResult> {
        match self.fetch_certificate(target).await {
            Ok(certificate) => {
                info!(
                    %target,
                    common_name = %certificate.common_name,
                    expiry = %certificate.expiry,
                    "Found certificate."
                );
                Some(EndpointResult::new(target, certificate))
            }
            Err(err @ (ProbeError::Unreachable(_) | ProbeError::Timeout("TCP connect"))) => {
                debug!(%target, error = %err, "Target not reachable.");
                None
            }
            Err(err) => {
                warn!(%target, error = %err, "Probe yielded no certificate.");
                None
            }
        }
    }
}

/// Runs `attempt` until it succeeds, fails permanently, or has been retried
/// `max_retries` times after fd exhaustion. Sleeps `pause` between attempts.
async fn retry_while_exhausted<T, F, Fut>(
    target: &Target,
    max_retries: u32,
    pause: Duration,
    mut attempt: F,
) -> Result<T, ProbeError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, ProbeError>>,
{
    let mut retries = 0;
    loop {
        let err = match attempt().await {
            Ok(value) => return Ok(value),
            Err(err) => err,
        };

        if !err.is_transient() || retries >= max_retries {
            return Err(err);
        }
        retries += 1;
        warn!(%target, retries, error = %err, "Out of file descriptors, backing off.");
        sleep(pause).await;
    }
}

fn build_connector(use_sni: bool) -> Result<TlsConnector, native_tls::Error> {
    let connector = native_tls::TlsConnector::builder()
        .danger_accept_invalid_certs(true)
        .danger_accept_invalid_hostnames(true)
        .use_sni(use_sni)
        .build()?;
    Ok(TlsConnector::from(connector))
}
