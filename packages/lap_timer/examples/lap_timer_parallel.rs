//! Measures how the latency of a contended lock changes with the number of concurrent workers.
//!
//! Run with: `cargo run --example lap_timer_parallel`

#![allow(missing_docs, reason = "No need for API documentation in example code")]

use std::env;
use std::hint::black_box;
use std::sync::Mutex;

use lap_timer::ParallelBenchmark;
use tracing_subscriber::EnvFilter;

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let shared = Mutex::new(Vec::<u64>::with_capacity(1024));

    for threads in [1, 2, 4] {
        let results = ParallelBenchmark::new(format!("contended_push_{threads}t"), || {
            let mut guard = shared.lock().expect("no benchmark callback panics while holding the lock");
            guard.push(black_box(42));
        })
        .teardown(|| {
            shared
                .lock()
                .expect("no benchmark callback panics while holding the lock")
                .clear();
        })
        .threads(threads)
        .iterations(500)
        .warmup(50)
        .output_dir(env::temp_dir())
        .run();

        if let Err(error) = results {
            eprintln!("Benchmark with {threads} threads failed: {error}");
            return;
        }

        println!();
    }
}
