// src/core/scanner/mod.rs

// Scan orchestration: expands the plan into targets, launches one gated probe
// worker per target and drives the aggregator through its shutdown order.
pub mod aggregator;
pub mod dns;
pub mod probe;

use tracing::{debug, error, info, warn};

use self::aggregator::{Aggregator, ResultSink};
use self::dns::HostResolver;
use self::probe::Prober;
use crate::core::enumerator::{PortSpec, expand_cidr, expand_ports};
use crate::core::gate::ConcurrencyGate;
use crate::core::models::{EndpointResult, Target};
use std::net::IpAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::watch;
use tokio::task::JoinSet;

/// A named address range and the ports to probe on each of its hosts.
#[derive(Debug, Clone)]
pub struct RangeSpec {
    pub name: String,
    pub cidr: String,
    pub ports: PortSpec,
}

/// A named DNS host probed on a single port.
#[derive(Debug, Clone)]
pub struct HostSpec {
    pub name: String,
    pub hostname: String,
    pub port: u16,
}

/// Everything one run should look at.
#[derive(Debug, Clone, Default)]
pub struct ScanPlan {
    pub ranges: Vec<RangeSpec>,
    pub hosts: Vec<HostSpec>,
    /// Ports never probed, whatever a range asks for.
    pub skip_ports: Vec<u16>,
}

/// Operator-initiated abort. Once triggered no new probe starts and probes
/// already running give up.
#[derive(Debug, Clone)]
pub struct Shutdown {
    rx: watch::Receiver<bool>,
}

impl Shutdown {
    pub fn new() -> (watch::Sender<bool>, Self) {
        let (tx, rx) = watch::channel(false);
        (tx, Self { rx })
    }

    /// A signal that never fires.
    #[cfg(test)]
    pub fn never() -> Self {
        Self::new().1
    }

    pub fn is_triggered(&self) -> bool {
        *self.rx.borrow()
    }

    /// Resolves once the signal fires. Pends forever if the sender is gone
    /// without having fired.
    pub async fn triggered(&mut self) {
        if self.rx.wait_for(|stop| *stop).await.is_err() {
            std::future::pending::<()>().await;
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct ScanSummary {
    pub launched: usize,
    pub finished: usize,
    pub reported: usize,
    pub elapsed: Duration,
    pub cancelled: bool,
}

#[derive(Debug, Clone, Default)]
pub struct ScanOutcome {
    pub endpoints: Vec<EndpointResult>,
    pub summary: ScanSummary,
}

/// Drives a run. The gate is shared by every probe the scanner launches,
/// across all ranges and hosts.
pub struct Scanner<P: Prober> {
    prober: Arc<P>,
    gate: ConcurrencyGate,
    shutdown: Shutdown,
}

impl<P: Prober> Scanner<P> {
    pub fn new(prober: P, gate: ConcurrencyGate, shutdown: Shutdown) -> Self {
        Self {
            prober: Arc::new(prober),
            gate,
            shutdown,
        }
    }

    /// Probes every target in `plan` and returns the aggregated endpoints.
    ///
    /// The aggregator is started before the first launch and only closed once
    /// every launched worker has been joined.
    pub async fn run(&self, plan: &ScanPlan, resolver: &HostResolver) -> ScanOutcome {
        let started = Instant::now();
        info!(
            ranges = plan.ranges.len(),
            hosts = plan.hosts.len(),
            capacity = self.gate.capacity(),
            "Starting scan."
        );

        let aggregator = Aggregator::start();
        let sink = aggregator.sink();
        let mut workers = JoinSet::new();
        let mut launched = 0usize;
        let mut finished = 0usize;
        let mut open = true;

        'ranges: for range in &plan.ranges {
            let ports = expand_ports(&range.ports, &plan.skip_ports);
            info!(
                range = %range.name,
                cidr = %range.cidr,
                ports = ports.len(),
                "Scanning range."
            );

            for ip in expand_cidr(&range.cidr) {
                for &port in &ports {
                    let target = Target::from_ip(IpAddr::V4(ip), port);
                    if !self.launch(target, &sink, &mut workers).await {
                        open = false;
                        break 'ranges;
                    }
                    launched += 1;
                    finished += reap(&mut workers);
                }
            }
        }

        if open {
            'hosts: for host in &plan.hosts {
                let addrs = resolver.resolve_ipv4(&host.hostname).await;
                info!(
                    host = %host.name,
                    hostname = %host.hostname,
                    addresses = addrs.len(),
                    port = host.port,
                    "Scanning host."
                );

                for ip in addrs {
                    let target = Target::from_host(&host.hostname, IpAddr::V4(ip), host.port);
                    if !self.launch(target, &sink, &mut workers).await {
                        break 'hosts;
                    }
                    launched += 1;
                    finished += reap(&mut workers);
                }
            }
        }

        // Barrier: every launched worker must be done before the stream closes.
        while let Some(joined) = workers.join_next().await {
            if let Err(e) = joined {
                error!(error = %e, "Probe worker panicked.");
            }
            finished += 1;
        }
        debug!(launched, finished, "All probe workers finished.");

        drop(sink);
        let endpoints = aggregator.finish().await;

        let summary = ScanSummary {
            launched,
            finished,
            reported: endpoints.len(),
            elapsed: started.elapsed(),
            cancelled: self.shutdown.is_triggered(),
        };
        info!(
            launched = summary.launched,
            reported = summary.reported,
            elapsed_ms = summary.elapsed.as_millis() as u64,
            cancelled = summary.cancelled,
            "Scan finished."
        );

        ScanOutcome { endpoints, summary }
    }

    /// Waits for a gate slot and spawns the probe. Returns `false` when the run
    /// is being cancelled and nothing was launched.
    async fn launch(&self, target: Target, sink: &ResultSink, workers: &mut JoinSet<()>) -> bool {
        let mut shutdown = self.shutdown.clone();
        if shutdown.is_triggered() {
            self.gate.close();
            return false;
        }

        let permit = tokio::select! {
            permit = self.gate.acquire() => match permit {
                Ok(permit) => permit,
                Err(_) => {
                    warn!("Concurrency gate closed, no further probes.");
                    return false;
                }
            },
            _ = shutdown.triggered() => {
                warn!("Scan cancelled, no further probes.");
                self.gate.close();
                return false;
            }
        };

        let prober = Arc::clone(&self.prober);
        let sink = sink.clone();
        workers.spawn(async move {
            // Held until the probe is over, whatever its outcome.
            let _permit = permit;
            tokio::select! {
                result = prober.probe(&target) => {
                    if let Some(result) = result {
                        sink.push(result);
                    }
                }
                _ = shutdown.triggered() => debug!(%target, "Probe cancelled."),
            }
        });
        true
    }
}

/// Collects workers that already finished so the join set does not grow with
/// the size of the address space.
fn reap(workers: &mut JoinSet<()>) -> usize {
    let mut reaped = 0;
    while let Some(joined) = workers.try_join_next() {
        if let Err(e) = joined {
            error!(error = %e, "Probe worker panicked.");
        }
        reaped += 1;
    }
    reaped
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::models::CertificateRecord;
    use async_trait::async_trait;
    use std::collections::HashSet;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Pretends every host answers TLS on 443 and nothing else, while tracking
    /// how many probes run at once.
    #[derive(Default)]
    struct FakeProber {
        current: AtomicUsize,
        peak: AtomicUsize,
        calls: AtomicUsize,
        seen: Mutex<Vec<Target>>,
        delay_ms: u64,
    }

    impl FakeProber {
        fn with_delay(delay_ms: u64) -> Self {
            Self {
                delay_ms,
                ..Self::default()
            }
        }
    }

    #[async_trait]
    impl Prober for FakeProber {
        async fn probe(&self, target: &Target) -> Option<EndpointResult> {
            let now = self.current.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.seen.lock().unwrap().push(target.clone());

            tokio::time::sleep(Duration::from_millis(self.delay_ms)).await;
            self.current.fetch_sub(1, Ordering::SeqCst);

            (target.port == 443).then(|| {
                EndpointResult::new(
                    target,
                    CertificateRecord {
                        common_name: target.display_name(),
                        issuer: "Fake CA".to_string(),
                        expiry: "2030-January-01".to_string(),
                        pem: format!("pem-for-{target}"),
                    },
                )
            })
        }
    }

    fn range(name: &str, cidr: &str, ports: Vec<u16>) -> RangeSpec {
        RangeSpec {
            name: name.to_string(),
            cidr: cidr.to_string(),
            ports: PortSpec {
                ports,
                ..PortSpec::default()
            },
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn gate_caps_in_flight_probes() {
        let scanner = Scanner::new(
            FakeProber::with_delay(5),
            ConcurrencyGate::new(4),
            Shutdown::never(),
        );
        let plan = ScanPlan {
            ranges: vec![range("lab", "10.9.0.0/27", vec![443, 8443])],
            ..ScanPlan::default()
        };

        let outcome = scanner.run(&plan, &HostResolver::from_system()).await;

        let peak = scanner.prober.peak.load(Ordering::SeqCst);
        assert!(peak <= 4, "peak {peak} exceeded capacity");
        assert!(peak >= 1);
        assert_eq!(outcome.summary.launched, 60);
        assert_eq!(outcome.summary.finished, 60);
        assert_eq!(scanner.prober.calls.load(Ordering::SeqCst), 60);
        assert_eq!(scanner.gate.available(), 4);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn only_certificates_are_reported() {
        let scanner = Scanner::new(
            FakeProber::with_delay(1),
            ConcurrencyGate::new(16),
            Shutdown::never(),
        );
        let plan = ScanPlan {
            ranges: vec![
                range("a", "10.1.0.0/29", vec![443, 80]),
                range("broken", "10.1.0.0/99", vec![443]),
                range("single", "10.2.0.7/32", vec![]),
            ],
            skip_ports: vec![80],
            ..ScanPlan::default()
        };

        let outcome = scanner.run(&plan, &HostResolver::from_system()).await;

        // 6 hosts in the /29 plus the /32; port 80 is skipped globally.
        assert_eq!(outcome.summary.launched, 7);
        let names: HashSet<String> = outcome.endpoints.iter().map(|e| e.name.clone()).collect();
        assert_eq!(names.len(), 7);
        assert!(names.contains("10.2.0.7"));
        assert!(!names.contains("10.1.0.0"));
        assert!(!names.contains("10.1.0.7"));
        assert!(outcome.endpoints.iter().all(|e| e.port == 443));
    }

    #[tokio::test]
    async fn hosts_probe_their_port_with_the_hostname() {
        let scanner = Scanner::new(
            FakeProber::default(),
            ConcurrencyGate::new(2),
            Shutdown::never(),
        );
        let plan = ScanPlan {
            hosts: vec![
                HostSpec {
                    name: "loopback".to_string(),
                    hostname: "127.0.0.1".to_string(),
                    port: 443,
                },
                HostSpec {
                    name: "alt".to_string(),
                    hostname: "127.0.0.1".to_string(),
                    port: 8080,
                },
            ],
            ..ScanPlan::default()
        };

        let outcome = scanner.run(&plan, &HostResolver::from_system()).await;

        assert_eq!(outcome.summary.launched, 2);
        let seen = scanner.prober.seen.lock().unwrap().clone();
        assert!(seen.iter().all(|t| t.sni() == Some("127.0.0.1")));
        assert_eq!(outcome.endpoints.len(), 1);
        assert_eq!(outcome.endpoints[0].port, 443);
    }

    #[tokio::test]
    async fn cancelled_run_launches_nothing_and_still_finishes() {
        let (tx, shutdown) = Shutdown::new();
        tx.send(true).unwrap();
        let scanner = Scanner::new(FakeProber::default(), ConcurrencyGate::new(2), shutdown);
        let plan = ScanPlan {
            ranges: vec![range("lab", "10.9.0.0/24", vec![443])],
            ..ScanPlan::default()
        };

        let outcome = scanner.run(&plan, &HostResolver::from_system()).await;

        assert_eq!(outcome.summary.launched, 0);
        assert!(outcome.summary.cancelled);
        assert!(outcome.endpoints.is_empty());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn cancelling_mid_run_stops_launching() {
        let (tx, shutdown) = Shutdown::new();
        let scanner = Scanner::new(FakeProber::with_delay(20), ConcurrencyGate::new(2), shutdown);
        let plan = ScanPlan {
            ranges: vec![range("lab", "10.9.0.0/24", vec![443])],
            ..ScanPlan::default()
        };

        let canceller = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            tx.send(true).unwrap();
            tx
        });
        let outcome = scanner.run(&plan, &HostResolver::from_system()).await;
        drop(canceller.await.unwrap());

        assert!(outcome.summary.cancelled);
        assert!(outcome.summary.launched < 254);
        assert_eq!(outcome.summary.launched, outcome.summary.finished);
        assert_eq!(scanner.gate.available(), 2);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn huge_range_starts_probing_right_away() {
        let (tx, shutdown) = Shutdown::new();
        let scanner = Scanner::new(FakeProber::with_delay(1), ConcurrencyGate::new(8), shutdown);
        let plan = ScanPlan {
            ranges: vec![range("everything", "0.0.0.0/0", vec![443])],
            ..ScanPlan::default()
        };

        let canceller = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(100)).await;
            tx.send(true).unwrap();
            tx
        });
        let outcome = scanner.run(&plan, &HostResolver::from_system()).await;
        drop(canceller.await.unwrap());

        assert!(outcome.summary.cancelled);
        assert!(outcome.summary.launched > 0);
        assert_eq!(outcome.summary.launched, outcome.summary.finished);
        let first = IpAddr::V4(std::net::Ipv4Addr::new(0, 0, 0, 1));
        let seen = scanner.prober.seen.lock().unwrap();
        assert!(seen.iter().any(|t| t.ip == first));
    }
}
