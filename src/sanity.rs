use crate::graph::{InstanceId, Size};
use crate::Snapshot;

/// Check the annotations left by the preparation passes against each other.
/// Panics on the first inconsistency. Returns the number of strongly
/// reachable instances.
pub fn sanity_check(snapshot: &Snapshot) -> usize {
    let instances = snapshot.instances();
    let mut heap_sizes = vec![Size::ZERO; snapshot.heaps().len()];
    let mut num_dominated = 0;
    let mut reachable = 0;
    for (i, inst) in instances.iter().enumerate() {
        let id = InstanceId::from_index(i);
        let states = [
            inst.is_strongly_reachable(),
            inst.is_weakly_reachable(),
            inst.is_unreachable(),
        ];
        assert_eq!(states.iter().filter(|s| **s).count(), 1);

        for child in inst.dominated() {
            assert_eq!(snapshot.instance(*child).immediate_dominator(), Some(id));
        }
        num_dominated += inst.dominated().len();

        if inst.is_super_root() {
            continue;
        }
        if !inst.is_strongly_reachable() {
            assert!(inst.total_retained_size().is_zero());
            continue;
        }
        reachable += 1;
        let shallow = snapshot.size(id);
        if let Some(heap) = inst.heap() {
            heap_sizes[heap.index()] += shallow;
        }
        let children = inst
            .dominated()
            .iter()
            .fold(Size::ZERO, |acc, c| acc + snapshot.total_retained_size(*c));
        assert_eq!(inst.total_retained_size(), shallow + children);
    }
    assert_eq!(num_dominated, reachable);

    for heap in snapshot.heaps() {
        assert_eq!(heap.size(), heap_sizes[heap.index()], "heap {}", heap.name());
    }
    let root = snapshot.super_root();
    let total = heap_sizes.iter().fold(Size::ZERO, |acc, s| acc + *s);
    assert_eq!(snapshot.total_retained_size(root), total);
    reachable
}
