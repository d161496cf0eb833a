//! Data processor example
//!
//! Two collectors generate random readings, three processors double them
//! with simulated latency, and a monitor counts the results.
//!
//! Run with: RUST_LOG=info cargo run --example data_processor

use bounded_pipeline::prelude::*;
use std::thread;
use std::time::Duration;

#[derive(Debug, Clone)]
struct Reading {
    label: String,
    value: u32,
}

fn process(item: &Item<Reading>) -> std::result::Result<u32, TransformError> {
    log::debug!("processing {} ({})", item.payload().label, item.payload().value);
    thread::sleep(Duration::from_millis(fastrand::u64(200..=800)));
    Ok(item.payload().value * 2)
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    println!("=== Bounded Pipeline - Data Processor Example ===\n");

    let config = PipelineConfig::new(5)
        .with_producer_delay(Duration::from_millis(300))
        .with_poll_timeout(Duration::from_secs(1))
        .with_thread_name_prefix("data-processor");
    println!("Configuration:\n{}\n", config.to_json()?);

    let mut received = 0u64;
    let mut pipeline = Coordinator::new(
        config,
        |id: ItemId| Reading {
            label: format!("data_{}_{}", id.producer + 1, id.sequence + 1),
            value: fastrand::u32(1..=100),
        },
        process,
    )?
    .on_result(move |result: &WorkResult<u32>| {
        received += 1;
        println!(
            "monitor: result #{} - {} -> {} (processor {})",
            received,
            result.item_id(),
            result.value(),
            result.worker_id() + 1
        );
    });

    pipeline.start(2, 3)?;
    let tally = pipeline.await_completion(Duration::from_secs(60))?;

    println!("\nFinal tally:");
    println!("  Produced:  {}", tally.items_produced);
    println!("  Collected: {}", tally.results_collected);
    for (worker, count) in &tally.results_by_worker {
        println!("  Processor {}: {} results", worker + 1, count);
    }
    println!("  Elapsed:   {} ms", tally.elapsed().num_milliseconds());
    println!("  Conserved: {}", tally.is_conserved());

    Ok(())
}
