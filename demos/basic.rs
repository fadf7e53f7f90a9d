//! Basic usage examples for ConnPool

use esox_connpool::{CloseMode, ConnPool, DropConnection, PoolConfiguration, ReusePolicy};

#[derive(Debug)]
struct Connection {
    id: usize,
    peer: String,
}

fn main() {
    println!("=== Esox ConnPool - Basic Examples ===\n");

    // Example 1: Lease, dial, release
    lease_and_release();

    // Example 2: Per-route limits and waiting
    route_limits();

    // Example 3: Reuse ordering
    reuse_ordering();

    // Example 4: Metrics and health
    metrics_and_health();
}

fn lease_and_release() {
    println!("1. Lease and Release:");
    let pool: ConnPool<String, Connection> = ConnPool::new(PoolConfiguration::default(), DropConnection);
    let route = "api.example.com:443".to_string();

    let entry = pool.lease(route.clone(), None).unwrap().wait_blocking().unwrap();
    if !entry.has_connection() {
        // the pool never dials; the caller does and hands the connection over
        let conn = Connection {
            id: 1,
            peer: entry.route().clone(),
        };
        pool.assign_connection(&entry, conn).unwrap();
        println!("   Dialed new connection for {}", entry.route());
    }
    pool.release(&entry, true).unwrap();

    let again = pool.lease(route.clone(), None).unwrap().wait_blocking().unwrap();
    let reused = again.with_connection(|c| format!("#{} to {}", c.id, c.peer)).unwrap();
    println!("   Reused connection {reused}");
    pool.release(&again, true).unwrap();

    println!("   Route stats: {}\n", pool.stats(&route));
}

fn route_limits() {
    println!("2. Route Limits:");
    let config = PoolConfiguration::new().with_max_total(4).with_default_max_per_route(1);
    let pool: ConnPool<&'static str, u32> = ConnPool::new(config, DropConnection);

    let held = pool.lease("db:5432", None).unwrap().wait_blocking().unwrap();
    let pending = pool.lease("db:5432", None).unwrap();
    println!("   Second lease waiting: {}", pending.is_waiting());
    println!("   Other route unaffected: {}", pool.lease("cache:6379", None).unwrap().is_ready());

    pool.release(&held, true).unwrap();
    let handed = pending.wait_blocking().unwrap();
    println!("   Waiter got the released entry: {}", handed.same_entry(&held));
    pool.release(&handed, true).unwrap();

    pool.set_max_per_route("db:5432", 3).unwrap();
    println!("   New limit for db:5432: {}\n", pool.max_per_route(&"db:5432"));
}

fn reuse_ordering() {
    println!("3. Reuse Ordering:");
    for policy in [ReusePolicy::Lifo, ReusePolicy::Fifo] {
        let config = PoolConfiguration::new().with_reuse_policy(policy);
        let pool: ConnPool<&'static str, u32> = ConnPool::new(config, DropConnection);

        let first = pool.lease("a", None).unwrap().wait_blocking().unwrap();
        let second = pool.lease("a", None).unwrap().wait_blocking().unwrap();
        pool.release(&first, true).unwrap();
        pool.release(&second, true).unwrap();

        let next = pool.lease("a", None).unwrap().wait_blocking().unwrap();
        let which = if next.same_entry(&second) { "last released" } else { "first released" };
        println!("   {policy:?}: next lease gets the {which} entry");
        pool.shutdown(CloseMode::Graceful);
    }
    println!();
}

fn metrics_and_health() {
    println!("4. Metrics and Health:");
    let pool: ConnPool<&'static str, u32> =
        ConnPool::new(PoolConfiguration::new().with_max_total(2), DropConnection);

    {
        let _a = pool.lease("a", None).unwrap().wait_blocking().unwrap();
        let _b = pool.lease("b", None).unwrap().wait_blocking().unwrap();

        let health = pool.get_health_status();
        println!("   Health: {}", if health.is_healthy { "Healthy" } else { "Unhealthy" });
        println!("   Utilization: {:.1}%", health.utilization * 100.0);
        println!("   Leased: {}, Available: {}", health.leased_entries, health.available_entries);
        for warning in &health.warnings {
            println!("   Warning: {warning}");
        }
    }

    let metrics = pool.export_metrics();
    println!("\n   Metrics:");
    for (key, value) in metrics {
        println!("     {}: {}", key, value);
    }
}
