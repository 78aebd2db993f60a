use thiserror::Error;

pub type Result<T> = std::result::Result<T, HeapGraphError>;

/// Errors that abort the construction of a snapshot.
///
/// Lookups on a prepared snapshot never fail: a miss is reported as `None`
/// or an empty list.
#[derive(Error, Debug)]
pub enum HeapGraphError {
    /// The decoder handed us a graph that cannot be assembled
    #[error("Malformed heap dump: {0}")]
    Format(String),

    /// An instance reached through strong references ended up without a
    /// dominator
    #[error("Instance 0x{id:x} is strongly reachable but has no immediate dominator")]
    GraphInvariant { id: u64 },
}

