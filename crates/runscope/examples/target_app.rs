//! Example target for `runscope attach`
//!
//! Spins two named worker threads doing CPU work and times its own rounds
//! with runscope-trace, so both collection modes have something to see.
//!
//! Run:     cargo run --example target_app
//! Profile: runscope attach --process target_app   (in another terminal)

use runscope_trace::{Engine, ProfilerMode, profile_function, profile_scope};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

fn main() {
    println!("=== runscope target ===");
    println!("PID: {}", std::process::id());
    println!("Press Ctrl-C to stop.");

    let engine = Arc::new(Engine::new());
    engine.begin_session("target_app", ProfilerMode::Instrumentation);

    for name in ["primes", "sorter"] {
        let engine = Arc::clone(&engine);
        thread::Builder::new()
            .name(name.to_string())
            .spawn(move || worker(&engine, name))
            .expect("failed to spawn worker");
    }

    let start = Instant::now();
    loop {
        thread::sleep(Duration::from_secs(2));
        let entries = engine.entries();
        let total_ms: f64 = entries.iter().map(|e| e.duration_ms()).sum();
        println!(
            "[{:>5.1}s] rounds={:<6} time in rounds={:.0}ms",
            start.elapsed().as_secs_f64(),
            entries.len(),
            total_ms
        );
        engine.clear();
    }
}

fn worker(engine: &Engine, name: &str) {
    loop {
        {
            profile_scope!(engine, "round");
            let result = if name == "primes" {
                calculate_primes(engine, 20_000)
            } else {
                bubble_sort(engine, 600)
            };
            std::hint::black_box(result);
        }
        thread::sleep(Duration::from_millis(1));
    }
}

#[inline(never)]
fn calculate_primes(engine: &Engine, limit: usize) -> usize {
    profile_function!(engine);
    (2..=limit).filter(|&n| is_prime(n)).count()
}

#[inline(never)]
fn is_prime(n: usize) -> bool {
    if n < 2 {
        return false;
    }
    let mut i = 2;
    while i * i <= n {
        if n % i == 0 {
            return false;
        }
        i += 1;
    }
    true
}

#[inline(never)]
fn bubble_sort(engine: &Engine, size: usize) -> usize {
    profile_function!(engine);
    let mut data: Vec<usize> = (0..size).rev().collect();
    for i in 0..data.len() {
        for j in 0..data.len() - 1 - i {
            if data[j] > data[j + 1] {
                data.swap(j, j + 1);
            }
        }
    }
    data[0]
}
