//! Measures a small sorting workload on the calling thread and exports the samples.
//!
//! Run with: `cargo run --example lap_timer_basic`
//!
//! Set `RUST_LOG=lap_timer=debug` to see what the engine is doing.

#![allow(missing_docs, reason = "No need for API documentation in example code")]

use std::cell::RefCell;
use std::env;
use std::hint::black_box;

use lap_timer::Benchmark;
use tracing_subscriber::EnvFilter;

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let data = RefCell::new(Vec::<u64>::new());

    let result = Benchmark::new("sort_10k", || {
        data.borrow_mut().sort_unstable();
        black_box(&data);
    })
    .setup(|| {
        // A fresh reversed input for every iteration, prepared outside the timed region.
        *data.borrow_mut() = (0..10_000).rev().collect();
    })
    .iterations(200)
    .warmup(20)
    .performance_counters(true)
    .output_dir(env::temp_dir())
    .run();

    match result {
        Ok(results) => {
            let stats = results.statistics();
            println!(
                "Sorting 10k elements took {:?} on average ({} samples).",
                stats.mean(),
                stats.count()
            );
        }
        Err(error) => eprintln!("Benchmark failed: {error}"),
    }
}
