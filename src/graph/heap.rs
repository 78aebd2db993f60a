use super::{Diffable, HeapId, Size};

/// A named partition of the heap dump, such as "app", "zygote" or "image"
#[derive(Clone, Debug)]
pub struct Heap {
    pub(crate) name: String,
    pub(crate) index: usize,
    pub(crate) size: Size,
    pub(crate) baseline: HeapId,
    pub(crate) is_placeholder: bool,
}

impl Heap {
    pub(crate) fn new(name: &str, index: usize) -> Heap {
        Heap {
            name: name.to_string(),
            index,
            size: Size::ZERO,
            baseline: HeapId::from_index(index),
            is_placeholder: false,
        }
    }

    /// A zero sized heap standing in for `baseline`, a heap of the same name
    /// that only exists in the other snapshot
    pub(crate) fn new_placeholder(name: &str, index: usize, baseline: HeapId) -> Heap {
        Heap {
            name: name.to_string(),
            index,
            size: Size::ZERO,
            baseline,
            is_placeholder: true,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Position of this heap in its snapshot, also the key of per-heap
    /// arrays. Placeholder heaps sit past the end of every such array.
    pub fn index(&self) -> usize {
        self.index
    }

    pub fn id(&self) -> HeapId {
        HeapId::from_index(self.index)
    }

    /// Total size of the strongly reachable instances on this heap
    pub fn size(&self) -> Size {
        self.size
    }

    pub(crate) fn add_to_size(&mut self, size: Size) {
        self.size += size;
    }
}

impl Diffable for Heap {
    type Id = HeapId;

    fn baseline(&self) -> HeapId {
        self.baseline
    }

    fn is_placeholder(&self) -> bool {
        self.is_placeholder
    }
}
