//! Demonstrates prefix-based invalidation across a family of keys, and
//! the `"static"` staleTime exemption.

use query_cache::QueryCache;
use query_cache_core::{KeyAtom, QueryKey, QueryOpts};
use std::time::Duration;

#[tokio::main]
async fn main() {
    println!("=== query-cache Prefix Invalidation Example ===\n");

    let cache = QueryCache::new();

    let todos = cache.acquire(
        QueryKey::new([KeyAtom::new("todos")]),
        |_k| async { Ok::<_, String>(vec!["buy milk".to_string()]) },
        QueryOpts::new().build(),
    );
    let todo_one = cache.acquire(
        QueryKey::new([KeyAtom::new("todos"), KeyAtom::new(1u64)]),
        |_k| async { Ok::<_, String>("buy milk".to_string()) },
        QueryOpts::new().build(),
    );
    let pinned_todo = cache.acquire(
        QueryKey::new([KeyAtom::new("todos"), KeyAtom::new("pinned")]),
        |_k| async { Ok::<_, String>("never invalidated".to_string()) },
        QueryOpts::new().stale_static().build(),
    );

    tokio::time::sleep(Duration::from_millis(20)).await;
    println!("Before invalidate:");
    println!("  todos stale: {}", todos.is_stale());
    println!("  todos/1 stale: {}", todo_one.is_stale());
    println!("  todos/pinned stale: {}", pinned_todo.is_stale());

    println!("\nInvalidating prefix [\"todos\"]...");
    cache.invalidate(&QueryKey::new([KeyAtom::new("todos")]));

    println!("After invalidate:");
    println!("  todos stale: {}", todos.is_stale());
    println!("  todos/1 stale: {}", todo_one.is_stale());
    println!(
        "  todos/pinned stale: {} (exempt via stale_static)",
        pinned_todo.is_stale()
    );

    println!("\n=== Example Complete ===");
}
