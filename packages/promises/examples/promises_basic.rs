//! Example demonstrating direct resolution and the blocking accessors.

use std::sync::Arc;
use std::thread;
use std::time::Duration;

use promises::Promise;

fn main() {
    println!("=== Peek Example ===");
    peek_example();

    println!("\n=== Cross-thread Get Example ===");
    cross_thread_get_example();

    println!("\n=== Empty Completion Example ===");
    empty_completion_example();
}

/// Resolves a cell and reads the cached value without blocking.
fn peek_example() {
    let cell = Promise::<String>::new();
    cell.on_next("Hello from a promise cell!".to_string());

    let value = cell.peek().unwrap();
    println!("Peeked: {value:?}");
}

/// Blocks one thread on a cell another thread resolves.
fn cross_thread_get_example() {
    let cell = Promise::<u32>::new();

    let resolver = {
        let cell = Arc::clone(&cell);
        thread::spawn(move || {
            thread::sleep(Duration::from_millis(50));
            cell.on_next(42);
        })
    };

    let value = cell
        .get(Duration::from_secs(5))
        .expect("cell is resolved by the spawned thread");
    println!("Received: {value:?}");

    resolver.join().unwrap();
}

/// A cell can complete without ever carrying a value.
fn empty_completion_example() {
    let cell = Promise::<u32>::new();
    cell.on_complete();

    let value = cell.peek().unwrap();
    println!("Resolved empty: {value:?}");
    println!("Is success: {}", cell.is_success());
}
