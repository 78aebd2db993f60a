//! Pairing up the heaps, instances and sites of two snapshots.
//!
//! Object identities mean nothing across heap dumps, so instances are
//! matched structurally: starting from the rooted instances, siblings in the
//! dominator tree that look alike (same class, heap, string value, array
//! length) are paired largest retained size first. Whatever is left over on
//! one side gets a zero sized placeholder on the other, so that every
//! entity has a baseline.

use std::collections::{HashMap, VecDeque};
use std::time::Instant;

use fixedbitset::FixedBitSet;

use crate::graph::{Heap, HeapId, Instance, InstanceId, InstanceKind, PlaceHolder, PlaceHolderShape, SiteId};
use crate::Snapshot;

pub struct Diff;

/// Instances may only be paired with instances that share their key
#[derive(Clone, PartialEq, Eq, Hash, Debug)]
struct Key {
    class: String,
    heap: String,
    string: String,
    class_name: String,
    array_length: usize,
}

impl Key {
    fn new(snapshot: &Snapshot, id: InstanceId) -> Key {
        let inst = snapshot.instance(id);
        let class_name = match &inst.kind {
            InstanceKind::ClassObj(cls) => cls.name().to_string(),
            InstanceKind::PlaceHolder(PlaceHolder {
                shape: PlaceHolderShape::ClassObj { name },
                ..
            }) => name.clone(),
            _ => String::new(),
        };
        Key {
            class: snapshot.class_name(id).to_string(),
            heap: inst
                .heap()
                .map_or(String::new(), |h| snapshot.heap(h).name().to_string()),
            string: snapshot.as_string(id, -1).unwrap_or_default(),
            class_name,
            array_length: inst.array_length().unwrap_or(0),
        }
    }
}

/// Which instances of one snapshot have a counterpart in the other
struct Paired {
    real: usize,
    paired: FixedBitSet,
}

impl Paired {
    fn new(snapshot: &Snapshot) -> Paired {
        Paired {
            real: snapshot.num_real,
            paired: FixedBitSet::with_capacity(snapshot.num_real),
        }
    }

    fn insert(&mut self, id: InstanceId) {
        if id.index() < self.real {
            self.paired.insert(id.index());
        }
    }

    /// Placeholders always have a counterpart
    fn contains(&self, id: InstanceId) -> bool {
        id.index() >= self.real || self.paired.contains(id.index())
    }
}

impl Diff {
    /// Make `a` and `b` baselines of each other.
    ///
    /// Both snapshots must be freshly built. Placeholders are appended to
    /// the instance and heap arenas of either snapshot as needed.
    pub fn snapshots(a: &mut Snapshot, b: &mut Snapshot) {
        let start = Instant::now();
        heaps(a, b);

        let mut paired_a = Paired::new(a);
        let mut paired_b = Paired::new(b);
        instances(a, b, &mut paired_a, &mut paired_b);
        info!(
            "Diffed instances, {} placeholders in A and {} in B, in {} ms",
            a.num_placeholders(),
            b.num_placeholders(),
            start.elapsed().as_millis()
        );

        let start = Instant::now();
        let (by_name_a, by_name_b) = unpaired_classes(a, b, &paired_a, &paired_b);
        let classes_a = ClassBaselines {
            paired: &paired_a,
            by_name: by_name_a,
        };
        let classes_b = ClassBaselines {
            paired: &paired_b,
            by_name: by_name_b,
        };
        sites(a, b, &classes_a, &classes_b);
        attach_placeholders(a, b);
        attach_placeholders(b, a);
        info!("Diffed sites in {} ms", start.elapsed().as_millis());
    }
}

fn heaps(a: &mut Snapshot, b: &mut Snapshot) {
    let b_len = b.heaps.len();
    let mut b_matched = vec![false; b_len];
    for i in 0..a.heaps.len() {
        let name = a.heaps[i].name.clone();
        let found = (0..b_len).find(|j| !b_matched[*j] && b.heaps[*j].name == name);
        match found {
            Some(j) => {
                b_matched[j] = true;
                a.heaps[i].baseline = HeapId::from_index(j);
                b.heaps[j].baseline = HeapId::from_index(i);
            }
            None => {
                let index = b.heaps.len();
                debug!("Heap {} only in A", name);
                b.heaps
                    .push(Heap::new_placeholder(&name, index, HeapId::from_index(i)));
                a.heaps[i].baseline = HeapId::from_index(index);
            }
        }
    }
    for (j, matched) in b_matched.into_iter().enumerate() {
        if !matched {
            let index = a.heaps.len();
            let name = b.heaps[j].name.clone();
            debug!("Heap {} only in B", name);
            a.heaps
                .push(Heap::new_placeholder(&name, index, HeapId::from_index(j)));
            b.heaps[j].baseline = HeapId::from_index(index);
        }
    }
}

/// Create a placeholder in `dst` for `inst` of `src`
fn new_placeholder(src: &mut Snapshot, dst: &mut Snapshot, inst: InstanceId) -> InstanceId {
    let placeholder = PlaceHolder {
        class_name: src.class_name(inst).to_string(),
        string_value: src.as_string(inst, -1),
        shape: src.placeholder_shape(inst),
        display: src.display(inst),
    };
    let real = src.instance(inst);
    let heap = real.heap().map(|h| src.heap(h).baseline);
    let index = dst.instances.len();
    let mut instance = Instance::new(
        real.id(),
        index,
        heap,
        None,
        None,
        InstanceKind::PlaceHolder(placeholder),
    );
    instance.baseline = inst;
    dst.instances.push(instance);
    let id = InstanceId::from_index(index);
    src.instances[inst.index()].baseline = id;
    id
}

/// Create placeholders in `dst` for `inst` and everything it dominates.
/// The placeholders form the same tree as the instances they stand in for.
fn new_placeholder_tree(
    src: &mut Snapshot,
    dst: &mut Snapshot,
    inst: InstanceId,
    paired: &mut Paired,
) -> InstanceId {
    let result = new_placeholder(src, dst, inst);
    paired.insert(inst);
    let mut stack = vec![(inst, result)];
    while let Some((real, placeholder)) = stack.pop() {
        for child in src.instance(real).dominated.clone() {
            let child_placeholder = new_placeholder(src, dst, child);
            paired.insert(child);
            dst.instances[placeholder.index()]
                .dominated
                .push(child_placeholder);
            stack.push((child, child_placeholder));
        }
    }
    result
}

/// A group of siblings sharing a key
#[derive(Default)]
struct Bucket {
    a: Vec<InstanceId>,
    b: Vec<InstanceId>,
}

fn instances(a: &mut Snapshot, b: &mut Snapshot, paired_a: &mut Paired, paired_b: &mut Paired) {
    // Pairs of already matched parents whose dominated instances are still
    // to be diffed
    let mut stack = vec![(a.super_root(), b.super_root())];
    while let Some((parent_a, parent_b)) = stack.pop() {
        let mut buckets: Vec<Bucket> = vec![];
        let mut by_key: HashMap<Key, usize> = HashMap::new();
        for inst in a.instance(parent_a).dominated.clone() {
            let i = *by_key.entry(Key::new(a, inst)).or_insert_with(|| {
                buckets.push(Bucket::default());
                buckets.len() - 1
            });
            buckets[i].a.push(inst);
        }
        for inst in b.instance(parent_b).dominated.clone() {
            let i = *by_key.entry(Key::new(b, inst)).or_insert_with(|| {
                buckets.push(Bucket::default());
                buckets.len() - 1
            });
            buckets[i].b.push(inst);
        }

        for mut bucket in buckets {
            bucket
                .a
                .sort_by(|x, y| a.total_retained_size(*y).cmp(&a.total_retained_size(*x)));
            bucket
                .b
                .sort_by(|x, y| b.total_retained_size(*y).cmp(&b.total_retained_size(*x)));

            let common = bucket.a.len().min(bucket.b.len());
            for (x, y) in bucket.a.iter().zip(bucket.b.iter()) {
                a.instances[x.index()].baseline = *y;
                b.instances[y.index()].baseline = *x;
                paired_a.insert(*x);
                paired_b.insert(*y);
                stack.push((*x, *y));
            }
            for x in &bucket.a[common..] {
                let placeholder = new_placeholder_tree(a, b, *x, paired_a);
                b.instances[parent_b.index()].dominated.push(placeholder);
            }
            for y in &bucket.b[common..] {
                let placeholder = new_placeholder_tree(b, a, *y, paired_b);
                a.instances[parent_a.index()].dominated.push(placeholder);
            }
        }
    }
}

/// Class objects the instance diff left unpaired (typically because they
/// are not strongly reachable), matched up by name. The two maps are
/// inverses of each other.
fn unpaired_classes(
    a: &Snapshot,
    b: &Snapshot,
    paired_a: &Paired,
    paired_b: &Paired,
) -> (HashMap<InstanceId, InstanceId>, HashMap<InstanceId, InstanceId>) {
    let mut by_name: HashMap<&str, VecDeque<InstanceId>> = HashMap::new();
    for (i, inst) in b.instances[..b.num_real].iter().enumerate() {
        let id = InstanceId::from_index(i);
        if let Some(cls) = inst.as_class_obj() {
            if !paired_b.contains(id) {
                by_name.entry(cls.name()).or_default().push_back(id);
            }
        }
    }
    let mut a_to_b = HashMap::new();
    let mut b_to_a = HashMap::new();
    for (i, inst) in a.instances[..a.num_real].iter().enumerate() {
        let x = InstanceId::from_index(i);
        let Some(cls) = inst.as_class_obj() else {
            continue;
        };
        if paired_a.contains(x) {
            continue;
        }
        if let Some(y) = by_name.get_mut(cls.name()).and_then(|q| q.pop_front()) {
            a_to_b.insert(x, y);
            b_to_a.insert(y, x);
        }
    }
    (a_to_b, b_to_a)
}

/// Counterparts of the class objects of one snapshot in the other
struct ClassBaselines<'p> {
    paired: &'p Paired,
    by_name: HashMap<InstanceId, InstanceId>,
}

impl ClassBaselines<'_> {
    fn get(&self, snapshot: &Snapshot, cls: InstanceId) -> Option<InstanceId> {
        if self.paired.contains(cls) {
            Some(snapshot.instance(cls).baseline)
        } else {
            self.by_name.get(&cls).copied()
        }
    }
}

/// Pair every objects info of `site` in `src` with the matching info of
/// `baseline` in `dst`, creating empty ones as needed. Infos of `site`
/// flagged in `done` were already paired from the other side and are
/// skipped. Returns the infos of `baseline` that are now paired.
fn objects_infos(
    src: &mut Snapshot,
    dst: &mut Snapshot,
    site: SiteId,
    baseline: SiteId,
    classes: &ClassBaselines,
    done: &[bool],
) -> Vec<bool> {
    let mut paired = vec![false; dst.site(baseline).objects_infos.len()];
    for i in 0..src.site(site).objects_infos.len() {
        if done.get(i).copied().unwrap_or(false) {
            continue;
        }
        let info = &src.site(site).objects_infos[i];
        let heap = src.heap(info.heap).baseline;
        let class_obj = info.class_obj.and_then(|cls| classes.get(src, cls));
        let before = dst.site(baseline).objects_infos.len();
        let j = dst.sites.objects_info(baseline, heap, class_obj);
        let dst_info = &mut dst.sites.get_mut(baseline).objects_infos[j];
        if j >= before {
            dst_info.is_placeholder = true;
        }
        dst_info.baseline = i;
        src.sites.get_mut(site).objects_infos[i].baseline = j;
        if j >= paired.len() {
            paired.resize(j + 1, false);
        }
        paired[j] = true;
    }
    paired
}

fn set_sites_baseline(snapshot: &mut Snapshot, site: SiteId, baseline: SiteId) {
    for s in snapshot.sites.descendants(site) {
        snapshot.sites.get_mut(s).baseline = baseline;
    }
}

fn sites(a: &mut Snapshot, b: &mut Snapshot, classes_a: &ClassBaselines, classes_b: &ClassBaselines) {
    let mut stack = vec![(a.root_site(), b.root_site())];
    while let Some((site_a, site_b)) = stack.pop() {
        a.sites.get_mut(site_a).baseline = site_b;
        b.sites.get_mut(site_b).baseline = site_a;
        let paired_infos = objects_infos(a, b, site_a, site_b, classes_a, &[]);
        objects_infos(b, a, site_b, site_a, classes_b, &paired_infos);

        let children_b = b.site(site_b).children.clone();
        let mut matched_b = vec![false; children_b.len()];
        for child_a in a.site(site_a).children.clone() {
            let found = children_b
                .iter()
                .position(|child_b| a.site(child_a).same_frame(b.site(*child_b)));
            match found {
                Some(j) => {
                    matched_b[j] = true;
                    stack.push((child_a, children_b[j]));
                }
                None => set_sites_baseline(a, child_a, site_b),
            }
        }
        for (child_b, matched) in children_b.into_iter().zip(matched_b) {
            if !matched {
                set_sites_baseline(b, child_b, site_a);
            }
        }
    }
}

/// Add the placeholders of `snapshot` to the sites matching those of the
/// instances they stand in for
fn attach_placeholders(snapshot: &mut Snapshot, other: &Snapshot) {
    for i in snapshot.num_real..snapshot.instances.len() {
        let real = snapshot.instances[i].baseline;
        let Some(real_site) = other.instance(real).site() else {
            continue;
        };
        let site = other.site(real_site).baseline;
        let id = InstanceId::from_index(i);
        snapshot.instances[i].site = Some(site);
        snapshot.sites.add_instance(site, id);
    }
}
