//! Demonstrates that concurrent `acquire` calls for the same key share
//! one fetch, and that a flaky fetcher is retried with backoff.

use query_cache::QueryCache;
use query_cache_core::{QueryKey, QueryOpts, RetryDelay, RetryPolicy};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

#[tokio::main]
async fn main() {
    println!("=== query-cache Dedup & Retry Example ===\n");

    let cache = QueryCache::new();
    let calls = Arc::new(AtomicU32::new(0));

    println!("Firing three concurrent acquire() calls for the same key...");
    let make_fetcher = {
        let calls = calls.clone();
        move |_k: QueryKey| {
            let calls = calls.clone();
            async move {
                calls.fetch_add(1, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(50)).await;
                Ok::<_, String>("shared result".to_string())
            }
        }
    };
    let key = QueryKey::of("dedup-demo");
    let q1 = cache.acquire(key.clone(), make_fetcher.clone(), QueryOpts::new().build());
    let q2 = cache.acquire(key.clone(), make_fetcher.clone(), QueryOpts::new().build());
    let q3 = cache.acquire(key, make_fetcher, QueryOpts::new().build());

    tokio::time::sleep(Duration::from_millis(100)).await;
    println!(
        "Underlying fetcher ran {} time(s) for 3 acquire() calls (all return the same Query)",
        calls.load(Ordering::SeqCst)
    );
    assert!(Arc::ptr_eq(&q1, &q2) && Arc::ptr_eq(&q2, &q3));

    println!("\nAcquiring a query whose fetcher fails twice before succeeding...");
    let attempt = Arc::new(AtomicU32::new(0));
    let flaky = {
        let attempt = attempt.clone();
        move |_k: QueryKey| {
            let attempt = attempt.clone();
            async move {
                let n = attempt.fetch_add(1, Ordering::SeqCst);
                if n < 2 {
                    Err(format!("transient failure #{n}"))
                } else {
                    Ok("recovered".to_string())
                }
            }
        }
    };
    let flaky_query = cache.acquire(
        QueryKey::of("flaky-demo"),
        flaky,
        QueryOpts::new()
            .retry(RetryPolicy::count(3))
            .retry_delay(RetryDelay::fixed(Duration::from_millis(10)))
            .build(),
    );

    for _ in 0..50 {
        if matches!(flaky_query.state().status, query_cache::QueryStatus::Success) {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    println!(
        "Flaky query settled as {:?} after {} attempt(s)",
        flaky_query.state().status,
        attempt.load(Ordering::SeqCst)
    );

    println!("\n=== Example Complete ===");
}
