//! Flush a shardcache backend from the command line
//!
//! With a group argument only that group's keys are removed; without one
//! the whole database is cleared on every shard.

use std::env;
use std::path::Path;
use std::process;

use anyhow::Result;
use tracing::Level;
use tracing_subscriber::FmtSubscriber;

use shardcache::cache::{CachePool, FlushEvent};

fn main() -> Result<()> {
    let subscriber = FmtSubscriber::builder()
        .with_max_level(Level::INFO)
        .with_target(false)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    let args: Vec<String> = env::args().collect();
    if args.len() < 2 {
        eprintln!("Usage: {} <config-file> [group]", args[0]);
        process::exit(1);
    }

    let pool = CachePool::from_config_file(Path::new(&args[1]));
    let mut cache = pool.acquire()?;

    let event = match args.get(2) {
        Some(group) => {
            println!("Flushing group '{}'...", group);
            FlushEvent::Group(group.clone())
        }
        None => {
            println!("Flushing all entries...");
            FlushEvent::All
        }
    };

    cache.flush(event)?;
    cache.close();

    println!("Done!");
    Ok(())
}
