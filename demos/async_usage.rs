//! Async usage examples

use async_trait::async_trait;
use esox_connpool::{
    BoxError, CloseMode, ConcurrencyPolicy, ConnFactory, ConnPool, DropConnection, PoolConfiguration,
};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tokio::time::sleep;
use tracing_subscriber::EnvFilter;

/// Pretends to open a TCP stream
struct FakeDialer {
    dialed: AtomicUsize,
}

#[async_trait]
impl ConnFactory<String, String> for FakeDialer {
    async fn connect(&self, route: &String) -> Result<String, BoxError> {
        sleep(Duration::from_millis(5)).await;
        let n = self.dialed.fetch_add(1, Ordering::Relaxed) + 1;
        if route.starts_with("down.") {
            return Err(format!("connection refused by {route}").into());
        }
        Ok(format!("stream-{n} to {route}"))
    }
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "esox_connpool=debug".into()))
        .init();

    println!("=== Esox ConnPool - Async Examples ===\n");

    // Example 1: Lease with a dialer
    lease_connected().await;

    // Example 2: Lease timeout
    lease_timeout().await;

    // Example 3: Concurrent callers
    concurrent_access().await;

    // Example 4: Background maintenance
    maintenance().await;
}

async fn lease_connected() {
    println!("1. Lease with Dialer:");
    let pool: ConnPool<String, String> = ConnPool::new(PoolConfiguration::default(), DropConnection);
    let dialer = FakeDialer {
        dialed: AtomicUsize::new(0),
    };

    for _ in 0..3 {
        let entry = pool
            .lease_connected("api.example.com:443".to_string(), None, &dialer)
            .await
            .unwrap();
        println!("   Using {}", entry.with_connection(|c| c.clone()).unwrap());
        pool.release(&entry, true).unwrap();
    }
    println!("   Dialed {} time(s) for 3 requests", dialer.dialed.load(Ordering::Relaxed));

    match pool.lease_connected("down.example.com:443".to_string(), None, &dialer).await {
        Ok(_) => println!("   Unexpected success"),
        Err(e) => println!("   Error: {}", e),
    }
    println!();
}

async fn lease_timeout() {
    println!("2. Lease Timeout:");
    let config = PoolConfiguration::new()
        .with_default_max_per_route(1)
        .with_lease_timeout(Duration::from_millis(100));
    let pool: ConnPool<&'static str, u32> = ConnPool::new(config, DropConnection);

    let _held = pool.lease("a", None).unwrap().wait().await.unwrap();

    // Try to get another (should time out)
    match pool.lease("a", None).unwrap().wait().await {
        Ok(_) => println!("   Got entry"),
        Err(e) => println!("   Error: {}", e),
    }
    println!();
}

async fn concurrent_access() {
    println!("3. Concurrent Access:");
    let config = PoolConfiguration::new()
        .with_concurrency_policy(ConcurrencyPolicy::RouteSegmented)
        .with_max_total(8)
        .with_default_max_per_route(2);
    let pool: ConnPool<&'static str, u32> = ConnPool::new(config, DropConnection);

    let mut handles = vec![];
    for i in 0..10 {
        let pool = pool.clone();
        let route = ["a", "b", "c"][i % 3];
        handles.push(tokio::spawn(async move {
            let entry = pool.lease(route, None).unwrap().wait().await.unwrap();
            sleep(Duration::from_millis(10)).await;
            pool.release(&entry, true).unwrap();
            i
        }));
    }

    for handle in handles {
        let task = handle.await.unwrap();
        println!("   Task {} completed", task);
    }

    let metrics = pool.get_metrics();
    println!(
        "   Created: {}, Reused: {}, Handed off: {}\n",
        metrics.entries_created, metrics.entries_reused, metrics.handed_off
    );
}

async fn maintenance() {
    println!("4. Background Maintenance:");
    let pool: ConnPool<&'static str, u32> = ConnPool::new(PoolConfiguration::default(), DropConnection);

    let entry = pool.lease("a", None).unwrap().wait().await.unwrap();
    pool.update_expiry(&entry, Duration::from_millis(20)).unwrap();
    pool.release(&entry, true).unwrap();

    let sweeper = pool.clone();
    let task = tokio::spawn(async move {
        let mut tick = tokio::time::interval(Duration::from_millis(15));
        for _ in 0..3 {
            tick.tick().await;
            let expired = sweeper.close_expired();
            let idle = sweeper.close_idle(Duration::from_secs(30));
            println!("   Sweep: {} expired, {} idle", expired, idle);
        }
    });
    task.await.unwrap();

    println!("   Available after sweeps: {}", pool.total_stats().available);
    pool.shutdown(CloseMode::Graceful);
}
