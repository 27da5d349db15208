//! Synthetic CPU burner for trying out the profiler.
//!
//! Run it, then point strobe at its PID:
//!
//! ```bash
//! cargo run --release --example busy &
//! sudo ./target/release/strobe --pid $! --duration 10 --output busy.folded
//! ```

use std::time::{Duration, Instant};

#[inline(never)]
fn hot_leaf(n: u64) -> u64 {
    let mut acc = 0u64;
    for i in 0..n {
        acc = acc.wrapping_add(i.wrapping_mul(i));
    }
    acc
}

#[inline(never)]
fn hot_caller() -> u64 {
    hot_leaf(10_000)
}

fn main() {
    println!("busy: pid {}", std::process::id());

    let started = Instant::now();
    let mut total = 0u64;
    loop {
        total = total.wrapping_add(hot_caller());
        if started.elapsed() > Duration::from_secs(60) {
            break;
        }
    }
    println!("busy: done ({total})");
}
