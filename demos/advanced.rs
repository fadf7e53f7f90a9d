//! Advanced features: admission policies, disposal, shutdown, Prometheus export

use esox_connpool::{
    BoxError, CloseMode, ConcurrencyPolicy, ConnPool, DisposalCallback, DropConnection, PoolConfiguration,
    PoolError,
};
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

#[derive(Debug)]
struct Connection {
    id: usize,
}

/// Counts closes and fails every third one
#[derive(Clone, Default)]
struct LoggingDisposal {
    closed: Arc<AtomicUsize>,
}

impl DisposalCallback<Connection> for LoggingDisposal {
    fn dispose(&self, connection: Connection, mode: CloseMode) -> Result<(), BoxError> {
        let n = self.closed.fetch_add(1, Ordering::Relaxed) + 1;
        println!("   Closing connection {} ({:?})", connection.id, mode);
        if n % 3 == 0 {
            return Err(format!("socket {} already reset", connection.id).into());
        }
        Ok(())
    }
}

fn main() {
    println!("=== Esox ConnPool - Advanced Features ===\n");

    // Example 1: Admission policies
    admission_policies();

    // Example 2: Lax target adjustment
    lax_target();

    // Example 3: Disposal and shutdown
    disposal_and_shutdown();

    // Example 4: Prometheus metrics
    prometheus_export();
}

fn admission_policies() {
    println!("1. Admission Policies:");
    for policy in [
        ConcurrencyPolicy::Strict,
        ConcurrencyPolicy::Lax,
        ConcurrencyPolicy::RouteSegmented,
    ] {
        let config = PoolConfiguration::new()
            .with_concurrency_policy(policy)
            .with_max_total(2)
            .with_default_max_per_route(2)
            .with_lease_timeout(Duration::from_millis(20));
        let pool: ConnPool<&'static str, u32> = ConnPool::new(config, DropConnection);

        let workers: Vec<_> = ["a", "b", "c"]
            .into_iter()
            .map(|route| {
                let pool = pool.clone();
                thread::spawn(move || pool.lease(route, None).unwrap().wait_blocking())
            })
            .collect();
        let leased: Vec<_> = workers.into_iter().filter_map(|w| w.join().unwrap().ok()).collect();

        println!(
            "   {:<16} leased {} of 3, allocated {} (max_total {})",
            policy.to_string(),
            leased.len(),
            pool.total_stats().allocated(),
            pool.max_total()
        );
        for entry in &leased {
            pool.release(entry, true).unwrap();
        }
    }
    println!();
}

fn lax_target() {
    println!("2. Lax Target:");
    let config = PoolConfiguration::new()
        .with_concurrency_policy(ConcurrencyPolicy::Lax)
        .with_max_total(4)
        .with_default_max_per_route(2);
    let pool: ConnPool<&'static str, u32> = ConnPool::new(config, DropConnection);

    let held: Vec<_> = ["a", "a", "b", "b"]
        .into_iter()
        .map(|route| pool.lease(route, None).unwrap().wait_blocking().unwrap())
        .collect();
    for entry in &held {
        pool.release(entry, true).unwrap();
    }
    println!("   Idle before: {}", pool.total_stats().available);

    pool.set_max_total(1).unwrap();
    println!("   Idle after lowering target: {}", pool.total_stats().available);

    let strict: ConnPool<&'static str, u32> =
        ConnPool::new(PoolConfiguration::default(), DropConnection);
    if let Err(PoolError::Unsupported(policy)) = strict.set_max_total(1) {
        println!("   set_max_total is not available under the {} policy\n", policy);
    }
}

fn disposal_and_shutdown() {
    println!("3. Disposal and Shutdown:");
    let disposal = LoggingDisposal::default();
    let pool: ConnPool<&'static str, Connection> = ConnPool::new(
        PoolConfiguration::new().with_default_max_per_route(3),
        disposal.clone(),
    );

    let entries: Vec<_> = (0..3)
        .map(|id| {
            let entry = pool.lease("backend:8080", None).unwrap().wait_blocking().unwrap();
            pool.assign_connection(&entry, Connection { id }).unwrap();
            entry
        })
        .collect();

    // the server said "Connection: close"
    pool.release(&entries[0], false).unwrap();
    pool.release(&entries[1], true).unwrap();

    let reused = pool.lease("backend:8080", None).unwrap().wait_blocking().unwrap();
    println!("   Reused connection {}", reused.with_connection(|c| c.id).unwrap());

    pool.shutdown(CloseMode::Immediate);
    let metrics = pool.get_metrics();
    println!(
        "   Disposed {} entries, {} close error(s)",
        metrics.entries_disposed, metrics.disposal_failures
    );
    match pool.lease("backend:8080", None) {
        Ok(_) => println!("   Unexpected lease after shutdown"),
        Err(e) => println!("   After shutdown: {}\n", e),
    }
}

fn prometheus_export() {
    println!("4. Prometheus Export:");
    let pool: ConnPool<&'static str, u32> =
        ConnPool::new(PoolConfiguration::default(), DropConnection);

    let held = pool.lease("a", None).unwrap().wait_blocking().unwrap();
    let _other = pool.lease("b", None).unwrap().wait_blocking().unwrap();
    pool.release(&held, true).unwrap();

    let mut tags = HashMap::new();
    tags.insert("service".to_string(), "checkout".to_string());
    match pool.export_metrics_prometheus("upstream", Some(&tags)) {
        Ok(text) => println!("{}", text),
        Err(e) => println!("   Export failed: {}", e),
    }
}
