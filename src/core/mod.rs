// src/core/mod.rs

// The probing engine and its collaborators. `scanner` owns the run; everything
// else is a leaf it calls into.

/// Data structures shared across the agent: targets, certificate records,
/// endpoint results and the final report.
pub mod models;

/// Per-probe error taxonomy.
pub mod error;

/// CIDR and port-specification expansion.
pub mod enumerator;

/// The file-descriptor-sized semaphore shared by every probe.
pub mod gate;

/// Leaf certificate parsing and PEM encoding.
pub mod certificate;

/// Probe workers, fan-in aggregation and the orchestrator.
pub mod scanner;

/// Delivery of the finished report.
pub mod reporter;
