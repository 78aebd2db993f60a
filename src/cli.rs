use clap::{Parser, Subcommand};

use crate::constants::DEFAULT_TOP_N;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
    /// Heap dumps (`.binpb` or `.binpb.zst`)
    #[arg(required = true)]
    pub paths: Vec<String>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Parser, Debug, Clone, Copy)]
pub struct SummaryArgs {
    /// Number of rooted instances to list
    #[arg(short, long, default_value_t = DEFAULT_TOP_N)]
    pub top: usize,
}

#[derive(Parser, Debug, Clone, Copy)]
pub struct PathArgs {
    /// Dump id of the instance, e.g. 0x12c0
    #[arg(short, long, value_parser = parse_id)]
    pub id: u64,
}

#[derive(Parser, Debug, Clone, Copy)]
pub struct DiffArgs {
    #[arg(short, long, default_value_t = DEFAULT_TOP_N)]
    pub top: usize,
}

#[derive(Parser, Debug, Clone)]
pub struct ExportArgs {
    #[arg(short, long)]
    pub output_path: String,
}

#[derive(Parser, Debug, Clone, Copy)]
pub struct SitesArgs {
    #[arg(short, long, default_value_t = 3)]
    pub depth: usize,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    Summary(SummaryArgs),
    Path(PathArgs),
    Diff(DiffArgs),
    Export(ExportArgs),
    Sites(SitesArgs),
}

fn parse_id(s: &str) -> Result<u64, String> {
    let parsed = match s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
        Some(hex) => u64::from_str_radix(hex, 16),
        None => s.parse(),
    };
    parsed.map_err(|e| format!("invalid instance id {}: {}", s, e))
}
