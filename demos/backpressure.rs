//! Backpressure example
//!
//! A fast producer feeds slow workers through a small queue. The producer is
//! held back by the queue instead of buffering without limit; halfway
//! through, the run is cancelled and the tally shows where every item ended.
//!
//! Run with: RUST_LOG=debug cargo run --example backpressure

use bounded_pipeline::prelude::*;
use std::thread;
use std::time::{Duration, Instant};

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    println!("=== Bounded Pipeline - Backpressure Example ===\n");

    let config = PipelineConfig::new(200)
        .with_input_capacity(Capacity::Bounded(5))
        .with_output_capacity(Capacity::Bounded(5))
        .with_poll_timeout(Duration::from_millis(50))
        .with_put_timeout(Duration::from_millis(50))
        .with_thread_name_prefix("backpressure");

    let mut pipeline = Coordinator::new(
        config,
        |id: ItemId| id.sequence,
        |item: &Item<u64>| -> std::result::Result<u64, TransformError> {
            thread::sleep(Duration::from_millis(20));
            if item.payload() % 17 == 0 {
                return Err(TransformError::recoverable("rejected by validation"));
            }
            Ok(item.payload() + 1)
        },
    )?;

    pipeline.start(1, 2)?;

    let started = Instant::now();
    while started.elapsed() < Duration::from_millis(500) {
        if let Some((input, output)) = pipeline.queue_sizes() {
            println!(
                "[{:>4} ms] state={} input={} output={}",
                started.elapsed().as_millis(),
                pipeline.state(),
                input,
                output
            );
        }
        thread::sleep(Duration::from_millis(50));
    }

    println!("\nCancelling...");
    pipeline.cancel();

    let tally = pipeline.await_completion(Duration::from_secs(10))?;
    println!("\n{}", tally);
    println!("{}", tally.to_json()?);

    Ok(())
}
