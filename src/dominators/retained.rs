use smallvec::smallvec;

use crate::graph::{HeapSizes, Instance, InstanceId, Size};

/// Compute the retained size of `root` and every instance it dominates.
///
/// `shallow` holds the shallow size of every instance, indexed like
/// `instances`. The dominator tree must already be in place.
pub(crate) fn compute_retained_sizes(
    instances: &mut [Instance],
    root: InstanceId,
    num_heaps: usize,
    shallow: &[Size],
) {
    // Two visits per node: the first allocates its sizes and schedules its
    // children, the second (once the children are done) folds theirs in.
    // An instance is on its second visit once its sizes are allocated.
    let mut stack = vec![root];
    while let Some(inst) = stack.pop() {
        let i = inst.index();
        if instances[i].retained_sizes.is_none() {
            let mut sizes: HeapSizes = smallvec![Size::ZERO; num_heaps];
            if let Some(heap) = instances[i].heap {
                sizes[heap.index()] += shallow[i];
            }
            instances[i].retained_sizes = Some(sizes);
            stack.push(inst);
            stack.extend(instances[i].dominated.iter().copied());
        } else {
            let mut sizes = instances[i].retained_sizes.take().unwrap_or_default();
            for child in &instances[i].dominated {
                if let Some(child_sizes) = &instances[child.index()].retained_sizes {
                    for (total, size) in sizes.iter_mut().zip(child_sizes.iter()) {
                        *total += *size;
                    }
                }
            }
            instances[i].retained_sizes = Some(sizes);
        }
    }
}
