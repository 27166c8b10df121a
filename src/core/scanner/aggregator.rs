// src/core/scanner/aggregator.rs

//! Fan-in of probe results.
//!
//! Workers only ever hold a [`ResultSink`]; the collection itself lives inside
//! the aggregator task. The shutdown order is fixed:
//!
//! 1. [`Aggregator::start`] before the first worker is launched.
//! 2. Wait for every worker to finish.
//! 3. [`Aggregator::finish`], which drops the last sender (end of stream) and
//!    waits for the task to hand back the finished collection.

use crate::core::models::EndpointResult;
use std::collections::HashSet;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error};

/// The producer side handed to workers.
#[derive(Debug, Clone)]
pub struct ResultSink {
    tx: mpsc::UnboundedSender<EndpointResult>,
}

impl ResultSink {
    /// Queues a result. Empty sentinels never reach the aggregator.
    pub fn push(&self, result: EndpointResult) {
        if result.is_empty() {
            return;
        }
        if self.tx.send(result).is_err() {
            // Only possible if the aggregator was torn down early.
            error!("Result dropped: aggregator is no longer running.");
        }
    }
}

pub struct Aggregator {
    sink: ResultSink,
    handle: JoinHandle<Vec<EndpointResult>>,
}

impl Aggregator {
    /// Spawns the draining task.
    pub fn start() -> Self {
        let (tx, mut rx) = mpsc::unbounded_channel::<EndpointResult>();

        let handle = tokio::spawn(async move {
            let mut collected = Vec::new();
            while let Some(result) = rx.recv().await {
                collected.push(result);
            }
            debug!(received = collected.len(), "Result stream closed.");
            dedup(collected)
        });

        Self {
            sink: ResultSink { tx },
            handle,
        }
    }

    pub fn sink(&self) -> ResultSink {
        self.sink.clone()
    }

    /// Closes the stream and waits for the final collection.
    ///
    /// Must only be called once every worker holding a sink has finished,
    /// otherwise the stream stays open until the stragglers drop theirs.
    pub async fn finish(self) -> Vec<EndpointResult> {
        drop(self.sink);
        match self.handle.await {
            Ok(results) => results,
            Err(e) => {
                error!(error = %e, "Aggregator task failed.");
                Vec::new()
            }
        }
    }
}

/// Keeps the first of identical (name, port, certificate) entries, which
/// happen when a hostname resolves to several addresses behind one cert.
fn dedup(results: Vec<EndpointResult>) -> Vec<EndpointResult> {
    let mut seen = HashSet::new();
    results
        .into_iter()
        .filter(|r| seen.insert((r.name.clone(), r.port, r.certificate.pem.clone())))
        .collect()
}
