//! The heap graph: instances, the references between them, and the heaps
//! they live on.
//!
//! All nodes live in arenas owned by a [`crate::Snapshot`] and point at each
//! other through the integer ids defined here, so the graph can have cycles
//! (dominator parent/children, reverse references, diff baselines) without
//! any shared ownership.

mod heap;
mod instance;
mod references;
mod size;
mod value;

pub use heap::Heap;
pub use instance::{
    ArrayInstance, ArrayValues, ClassInstance, ClassObj, Instance, InstanceKind, PlaceHolder,
    PlaceHolderShape, RefLabel, Reference, SuperRoot,
};
pub(crate) use instance::HeapSizes;
pub(crate) use references::{instance_fields, is_instance_of_class, references};
pub use size::Size;
pub use value::{Field, FieldValue, Type, Value};

macro_rules! arena_id {
    ($name:ident) => {
        #[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Debug)]
        pub struct $name(u32);

        impl $name {
            pub fn index(self) -> usize {
                self.0 as usize
            }

            pub(crate) fn from_index(index: usize) -> Self {
                debug_assert!(index <= u32::MAX as usize);
                $name(index as u32)
            }
        }
    };
}

arena_id!(InstanceId);
arena_id!(HeapId);
arena_id!(SiteId);

/// An entity that can be paired with its counterpart in another snapshot.
///
/// Until a diff is performed every entity is its own baseline.
pub trait Diffable {
    type Id: Copy + Eq;
    fn baseline(&self) -> Self::Id;
    fn is_placeholder(&self) -> bool;
}

/// Ways in which an object can be a GC root
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub enum RootType {
    JniGlobal,
    JniLocal,
    JavaFrame,
    NativeStack,
    StickyClass,
    ThreadBlock,
    Monitor,
    Thread,
    InternedString,
    Debugger,
    VmInternal,
    Unknown,
    JniMonitor,
    Finalizing,
}

impl RootType {
    pub const ALL: [RootType; 14] = [
        RootType::JniGlobal,
        RootType::JniLocal,
        RootType::JavaFrame,
        RootType::NativeStack,
        RootType::StickyClass,
        RootType::ThreadBlock,
        RootType::Monitor,
        RootType::Thread,
        RootType::InternedString,
        RootType::Debugger,
        RootType::VmInternal,
        RootType::Unknown,
        RootType::JniMonitor,
        RootType::Finalizing,
    ];

    pub fn mask(self) -> u32 {
        1 << (self as u32)
    }
}
