//! Reachability of the heap graph from the super root.
//!
//! Every instance gets its reverse references and a path back to the GC
//! roots. Strong references are always explored before weak ones, so an
//! instance's path to the roots is strong whenever it can be.

use std::collections::VecDeque;

use fixedbitset::FixedBitSet;

use crate::constants::{CLEANER_THUNK, NATIVE_ALLOCATION_REGISTRY, SUN_MISC_CLEANER};
use crate::graph::{instance_fields, is_instance_of_class, references, Instance, InstanceId, Reference, Value};

fn field(instances: &[Instance], id: InstanceId, name: &str) -> Option<Value> {
    instance_fields(instances, id)
        .into_iter()
        .find(|f| &*f.name == name)
        .map(|f| f.value)
}

/// A class instance of (a subclass of) `class_name` held in field `name`
fn field_instance_of(
    instances: &[Instance],
    id: InstanceId,
    name: &str,
    class_name: &str,
) -> Option<InstanceId> {
    let dst = field(instances, id, name)?.as_instance()?;
    if instances[dst.index()].is_class_instance() && is_instance_of_class(instances, dst, class_name) {
        Some(dst)
    } else {
        None
    }
}

/// If `id` is a cleaner registered with a native allocation registry,
/// return the instance it cleans up and the size of the native allocation
fn as_registered_native_allocation(instances: &[Instance], id: InstanceId) -> Option<(InstanceId, u64)> {
    if !instances[id.index()].is_class_instance() || !is_instance_of_class(instances, id, SUN_MISC_CLEANER) {
        return None;
    }
    let thunk = field_instance_of(instances, id, "thunk", CLEANER_THUNK)?;
    let registry = field_instance_of(instances, thunk, "this$0", NATIVE_ALLOCATION_REGISTRY)?;
    let size = field(instances, registry, "size")?.as_long()?;
    let referent = field(instances, id, "referent")?.as_instance()?;
    Some((referent, size as u64))
}

/// Credit the size of every registered native allocation to the instance
/// whose cleaner frees it. Returns the number of allocations found.
pub(crate) fn attribute_registered_native_sizes(instances: &mut [Instance]) -> usize {
    let mut found = 0;
    for i in 0..instances.len() {
        if let Some((referent, size)) = as_registered_native_allocation(instances, InstanceId::from_index(i)) {
            instances[referent.index()].add_registered_native_size(size);
            found += 1;
        }
    }
    found
}

/// Record the reverse references and next instance towards the roots of
/// every instance reachable from `root`.
///
/// The search is breadth first through strong references, then continues
/// breadth first through everything else. `root` itself is never recorded
/// as a referrer. Returns the set of instances reached in the strong phase.
pub(crate) fn compute_reverse_references(instances: &mut [Instance], root: InstanceId) -> FixedBitSet {
    let mut visited = FixedBitSet::with_capacity(instances.len());
    let mut strong: VecDeque<Reference> = references(instances, root).into();
    let mut weak: VecDeque<Reference> = VecDeque::new();

    while let Some(r) = strong.pop_front() {
        let d = r.dst.index();
        if !visited.put(d) {
            let children = references(instances, r.dst);
            let inst = &mut instances[d];
            inst.next_to_gc_root = Some((r.src, r.label));
            inst.hard_reverse_refs = Some(vec![]);
            for child in children {
                if child.strong {
                    strong.push_back(child);
                } else {
                    weak.push_back(child);
                }
            }
        }
        if r.src != root {
            instances[d]
                .hard_reverse_refs
                .get_or_insert_with(Vec::new)
                .push(r.src);
        }
    }
    let strongly_reachable = visited.clone();

    while let Some(r) = weak.pop_front() {
        let d = r.dst.index();
        if !visited.put(d) {
            let children = references(instances, r.dst);
            let inst = &mut instances[d];
            inst.next_to_gc_root = Some((r.src, r.label));
            inst.hard_reverse_refs = Some(vec![]);
            weak.extend(children);
        }
        let inst = &mut instances[d];
        let refs = if r.strong {
            &mut inst.hard_reverse_refs
        } else {
            &mut inst.soft_reverse_refs
        };
        refs.get_or_insert_with(Vec::new).push(r.src);
    }
    strongly_reachable
}
