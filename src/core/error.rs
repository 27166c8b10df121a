// src/core/error.rs

use std::io;
use thiserror::Error;

// Linux errno values for "too many open files" (per process / system wide).
const EMFILE: i32 = 24;
const ENFILE: i32 = 23;

/// Why a single probe produced nothing. None of these abort the run.
#[derive(Error, Debug)]
pub enum ProbeError {
    /// The process ran out of file descriptors while connecting.
    #[error("file descriptors exhausted: {0}")]
    ResourceExhausted(#[source] io::Error),

    /// Connection refused, host unreachable and friends.
    #[error("unreachable: {0}")]
    Unreachable(#[source] io::Error),

    /// A network step did not finish within its deadline.
    #[error("{0} timed out")]
    Timeout(&'static str),

    #[error("TLS handshake failed: {0}")]
    Handshake(String),

    #[error("no peer certificate presented")]
    NoCertificate,

    /// The peer sent something that is not a parseable X.509 certificate.
    #[error("unreadable certificate: {0}")]
    Certificate(String),
}

impl ProbeError {
    /// Sorts a connect error into the transient (fd pressure) or the
    /// permanent bucket.
    pub fn from_connect(err: io::Error) -> Self {
        if is_fd_exhaustion(&err) {
            ProbeError::ResourceExhausted(err)
        } else {
            ProbeError::Unreachable(err)
        }
    }

    pub fn is_transient(&self) -> bool {
        matches!(self, ProbeError::ResourceExhausted(_))
    }
}

fn is_fd_exhaustion(err: &io::Error) -> bool {
    match err.raw_os_error() {
        Some(code) => code == EMFILE || code == ENFILE,
        None => err.to_string().to_lowercase().contains("too many open files"),
    }
}
