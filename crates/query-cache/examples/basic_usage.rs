//! Basic example demonstrating query-cache with a plain async fetcher.

use query_cache::{QueryCache, QueryStatus};
use query_cache_core::{QueryKey, QueryOpts};
use std::time::Duration;

#[derive(Debug, Clone)]
struct User {
    id: u64,
    name: String,
}

#[tokio::main]
async fn main() {
    println!("=== query-cache Basic Example ===\n");

    let cache = QueryCache::new();

    println!("Acquiring query for user:123...");
    let query = cache.acquire(
        QueryKey::of(("user", 123u64)),
        |_key| async {
            Ok::<_, String>(User {
                id: 123,
                name: "Alice".to_string(),
            })
        },
        QueryOpts::new().stale_time(Duration::from_secs(30)).build(),
    );

    let _disposer = query.subscribe(|snapshot| match snapshot.status {
        QueryStatus::Pending => println!("  ...pending"),
        QueryStatus::Success => {
            println!(
                "  ✅ success: {:?}",
                snapshot.data.as_ref().map(|u| &u.name)
            );
        }
        QueryStatus::Error => println!("  ❌ error: {:?}", snapshot.error),
    });

    // The initial fetch kicked off in acquire() runs in the background;
    // give it a moment to land before reading the snapshot directly.
    tokio::time::sleep(Duration::from_millis(20)).await;
    let snapshot = query.state();
    println!(
        "\nFinal snapshot: status={:?} stale={}",
        snapshot.status,
        query.is_stale()
    );

    println!("\nRegistry size: {}", cache.len());
    println!("=== Example Complete ===");
}
