#[macro_use]
extern crate log;

use std::time::Instant;

use anyhow::{bail, Result};
use clap::Parser;

use heapsnap::*;

fn load(path: &str) -> Result<Snapshot> {
    let start = Instant::now();
    let heapdump = HeapDump::from_path(path)?;
    let snapshot = heapdump.into_snapshot()?;
    info!(
        "Loaded {} with {} instances in {} ms",
        path,
        snapshot.instances().len() - 1,
        start.elapsed().as_millis()
    );
    Ok(snapshot)
}

fn load_one(args: &Args) -> Result<Snapshot> {
    if args.paths.len() != 1 {
        bail!("Expected one heap dump, got {}", args.paths.len());
    }
    load(&args.paths[0])
}

pub fn main() -> Result<()> {
    env_logger::init();
    let args = Args::parse();
    match &args.command {
        Commands::Summary(a) => analysis::summary(&load_one(&args)?, a.top),
        Commands::Path(a) => analysis::path(&load_one(&args)?, a.id)?,
        Commands::Diff(a) => {
            if args.paths.len() != 2 {
                bail!("Diff takes a heap dump and its baseline, got {} paths", args.paths.len());
            }
            let mut snapshot = load(&args.paths[0])?;
            let mut baseline = load(&args.paths[1])?;
            analysis::diff(&mut snapshot, &mut baseline, a.top);
        }
        Commands::Export(a) => export(&load_one(&args)?, &a.output_path)?,
        Commands::Sites(a) => analysis::sites(&load_one(&args)?, a.depth),
    }
    Ok(())
}
