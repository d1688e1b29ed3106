//! Example demonstrating multicast delivery: several subscribers, attached
//! before and after resolution, all observing the same outcome.

use std::sync::{Arc, Mutex};

use promises::{Promise, ResolveError, Subscriber, Subscription};

/// A subscriber that prints and records everything it receives.
struct Printer {
    name: &'static str,
    seen: Mutex<Vec<String>>,
}

impl Printer {
    fn new(name: &'static str) -> Arc<Self> {
        Arc::new(Self {
            name,
            seen: Mutex::new(Vec::new()),
        })
    }
}

impl Subscriber<String> for Printer {
    fn on_subscribe(&self, subscription: Arc<dyn Subscription>) {
        subscription.request(1);
    }

    fn on_next(&self, value: String) {
        println!("[{}] received: {value}", self.name);
        self.seen.lock().unwrap().push(value);
    }

    fn on_complete(&self) {
        println!("[{}] completed", self.name);
    }

    fn on_error(&self, cause: ResolveError) {
        println!("[{}] failed: {cause}", self.name);
    }
}

fn main() {
    let cell = Promise::<String>::new();

    // Two subscribers attach while the cell is still pending.
    let early_a = Printer::new("early-a");
    let early_b = Printer::new("early-b");
    cell.subscribe(Arc::clone(&early_a) as _);
    cell.subscribe(Arc::clone(&early_b) as _);

    println!("Resolving the cell...");
    cell.on_next("broadcast payload".to_string());

    // A third subscriber attaches after resolution and is served from the
    // cache; the producer is not consulted again.
    let late = Printer::new("late");
    cell.subscribe(Arc::clone(&late) as _);

    assert_eq!(early_a.seen.lock().unwrap().len(), 1);
    assert_eq!(early_b.seen.lock().unwrap().len(), 1);
    assert_eq!(late.seen.lock().unwrap().len(), 1);
    println!("All three subscribers observed the same resolution.");
}
