// src/core/reporter.rs

use tracing::{debug, info};

use crate::core::models::ScanReport;
use reqwest::header::CONTENT_TYPE;
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

/// Production discovery endpoint.
pub const DISCOVERY_URL: &str = "https://portal.certainty-sys.com/api/v1/agents/discovery";

/// Header carrying the agent's API key.
pub const API_KEY_HEADER: &str = "certainty-api-key";

const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Error, Debug)]
pub enum ReportError {
    #[error("cannot serialize report: {0}")]
    Serialize(#[from] serde_json::Error),

    #[error("cannot build HTTP client: {0}")]
    Client(#[source] reqwest::Error),

    #[error("request to {url} failed: {source}")]
    Request {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("discovery API answered {status}: {body}")]
    Status { status: u16, body: String },

    #[error("cannot write report to {path}: {source}")]
    Write {
        path: String,
        #[source]
        source: std::io::Error,
    },
}

/// Ships the finished report to the discovery API.
pub struct Reporter {
    client: reqwest::Client,
    url: String,
    api_key: String,
}

impl Reporter {
    pub fn new(url: &str, api_key: &str, proxy: Option<&str>) -> Result<Self, ReportError> {
        let mut builder = reqwest::Client::builder()
            .user_agent(concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION")))
            .timeout(REQUEST_TIMEOUT);

        if let Some(proxy) = proxy {
            debug!(proxy, "Routing reports through proxy.");
            builder = builder.proxy(reqwest::Proxy::all(proxy).map_err(ReportError::Client)?);
        }

        Ok(Self {
            client: builder.build().map_err(ReportError::Client)?,
            url: url.to_string(),
            api_key: api_key.to_string(),
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    /// POSTs the report as JSON and returns the response body, which is only
    /// ever logged.
    pub async fn send(&self, report: &ScanReport) -> Result<String, ReportError> {
        let body = serde_json::to_vec_pretty(report)?;
        info!(
            url = %self.url,
            endpoints = report.endpoints.len(),
            bytes = body.len(),
            "Sending report."
        );

        let response = self
            .client
            .post(&self.url)
            .header(API_KEY_HEADER, &self.api_key)
            .header(CONTENT_TYPE, "application/json")
            .body(body)
            .send()
            .await
            .map_err(|source| ReportError::Request {
                url: self.url.clone(),
                source,
            })?;

        let status = response.status();
        let text = response.text().await.map_err(|source| ReportError::Request {
            url: self.url.clone(),
            source,
        })?;

        if !status.is_success() {
            return Err(ReportError::Status {
                status: status.as_u16(),
                body: text,
            });
        }
        info!(%status, response = %text, "Report accepted.");
        Ok(text)
    }
}

/// Writes the report to disk so that a failed delivery does not lose the scan.
pub fn write_report(report: &ScanReport, path: &Path) -> Result<(), ReportError> {
    let body = serde_json::to_vec_pretty(report)?;
    std::fs::write(path, body).map_err(|source| ReportError::Write {
        path: path.display().to_string(),
        source,
    })?;
    info!(path = %path.display(), "Report written.");
    Ok(())
}
