#[macro_use]
extern crate log;

pub mod analysis;
mod cli;
pub mod constants;
mod diff;
mod dominators;
mod error;
mod export;
pub mod graph;
mod heapdump;
mod reachability;
mod sanity;
mod site;
mod snapshot;

pub use crate::cli::{Args, Commands, DiffArgs, ExportArgs, PathArgs, SitesArgs, SummaryArgs};
pub use crate::diff::Diff;
pub use crate::dominators::compute_dominators;
pub use crate::error::HeapGraphError;
pub use crate::export::{class_histogram, export};
pub use crate::graph::{Diffable, HeapId, InstanceId, RootType, SiteId, Size};
pub use crate::heapdump::HeapDump;
pub use crate::sanity::sanity_check;
pub use crate::site::{Frame, ObjectsInfo, Site, SiteTree};
pub use crate::snapshot::{ClassObjData, PathElement, Snapshot, SnapshotBuilder};
