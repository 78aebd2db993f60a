//! Assembling a heap graph into a snapshot, and querying it.
//!
//! A [`SnapshotBuilder`] collects the records a heap dump decoder produces,
//! keyed by raw dump ids. [`SnapshotBuilder::build`] resolves those ids into
//! arena ids and runs the preparation passes: registered native sizes,
//! reachability, dominators, retained sizes and site summaries. The
//! resulting [`Snapshot`] is read only apart from diffing.

use std::time::Instant;

use crate::constants::*;
use crate::dominators::{compute_dominators, compute_retained_sizes};
use crate::error::{HeapGraphError, Result};
use crate::graph::{
    self, ArrayInstance, ArrayValues, ClassInstance, ClassObj, Field, FieldValue, Heap, HeapId,
    Instance, InstanceId, InstanceKind, PlaceHolderShape, RefLabel, Reference, RootType, SiteId,
    Size, SuperRoot, Value,
};
use crate::reachability::{attribute_registered_native_sizes, compute_reverse_references};
use crate::site::{Frame, Site, SiteTree};

/// Everything about a class object except where it lives
#[derive(Clone, Debug)]
pub struct ClassObjData {
    pub name: String,
    pub super_class: Option<u64>,
    pub class_loader: Option<u64>,
    pub instance_size: u64,
    pub instance_fields: Vec<Field>,
    pub static_fields: Vec<FieldValue<u64>>,
    pub static_fields_size: u64,
}

#[derive(Debug)]
enum RecordKind {
    ClassObj(ClassObjData),
    ClassInstance(Vec<Value<u64>>),
    Array(ArrayValues<u64>),
}

#[derive(Debug)]
struct Record {
    id: u64,
    heap: HeapId,
    site: SiteId,
    class_id: Option<u64>,
    kind: RecordKind,
}

/// Collects the contents of a heap dump, referring to instances by their
/// dump ids. References may point forwards to records added later.
pub struct SnapshotBuilder {
    heaps: Vec<Heap>,
    sites: SiteTree,
    records: Vec<Record>,
    roots: Vec<(u64, RootType)>,
}

impl Default for SnapshotBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl SnapshotBuilder {
    pub fn new() -> SnapshotBuilder {
        SnapshotBuilder {
            heaps: vec![],
            sites: SiteTree::new("ROOT"),
            records: vec![],
            roots: vec![],
        }
    }

    /// The heap with the given name, added if this is the first time it is
    /// seen. Heaps keep the order in which they were first seen.
    pub fn add_heap(&mut self, name: &str) -> HeapId {
        if let Some(heap) = self.heaps.iter().find(|h| h.name == name) {
            return heap.id();
        }
        let index = self.heaps.len();
        self.heaps.push(Heap::new(name, index));
        HeapId::from_index(index)
    }

    /// The allocation site of a stack trace, inner-most frame first. The
    /// empty trace is the root site.
    pub fn site(&mut self, frames: &[Frame]) -> SiteId {
        self.sites.get_site(frames)
    }

    pub fn root_site(&self) -> SiteId {
        self.sites.root()
    }

    /// `class_id` is the class of the class object itself, usually
    /// `java.lang.Class`
    pub fn add_class_obj(
        &mut self,
        id: u64,
        heap: HeapId,
        site: SiteId,
        class_id: Option<u64>,
        data: ClassObjData,
    ) {
        self.records.push(Record {
            id,
            heap,
            site,
            class_id,
            kind: RecordKind::ClassObj(data),
        });
    }

    /// `fields` are in the order of the class's field descriptors, then
    /// those of its super class, and so on
    pub fn add_class_instance(
        &mut self,
        id: u64,
        heap: HeapId,
        site: SiteId,
        class_id: u64,
        fields: Vec<Value<u64>>,
    ) {
        self.records.push(Record {
            id,
            heap,
            site,
            class_id: Some(class_id),
            kind: RecordKind::ClassInstance(fields),
        });
    }

    pub fn add_array(&mut self, id: u64, heap: HeapId, site: SiteId, class_id: u64, values: ArrayValues<u64>) {
        self.records.push(Record {
            id,
            heap,
            site,
            class_id: Some(class_id),
            kind: RecordKind::Array(values),
        });
    }

    pub fn add_root(&mut self, id: u64, ty: RootType) {
        self.roots.push((id, ty));
    }

    /// Resolve every reference and run the preparation passes
    pub fn build(self) -> Result<Snapshot> {
        let SnapshotBuilder {
            heaps,
            mut sites,
            mut records,
            mut roots,
        } = self;

        let start = Instant::now();
        records.sort_by_key(|r| r.id);
        for pair in records.windows(2) {
            if pair[0].id == pair[1].id {
                return Err(HeapGraphError::Format(format!(
                    "Duplicate instance id 0x{:x}",
                    pair[0].id
                )));
            }
        }
        if let Some(r) = records.first() {
            if r.id == SUPER_ROOT_ID {
                return Err(HeapGraphError::Format(format!(
                    "Instance id 0x{:x} is reserved",
                    SUPER_ROOT_ID
                )));
            }
        }
        for r in &records {
            if r.heap.index() >= heaps.len() {
                return Err(HeapGraphError::Format(format!(
                    "Instance 0x{:x} is on an unknown heap",
                    r.id
                )));
            }
        }

        // Arena index of every record is its position in the sorted list,
        // shifted past the super root
        let ids: Vec<u64> = records.iter().map(|r| r.id).collect();
        let resolve = |id: u64| {
            ids.binary_search(&id)
                .ok()
                .map(|i| InstanceId::from_index(i + 1))
        };
        let is_class = |id: u64| {
            ids.binary_search(&id)
                .map_or(false, |i| matches!(records[i].kind, RecordKind::ClassObj(_)))
        };

        let mut instances = Vec::with_capacity(records.len() + 1);
        instances.push(Instance::new(
            SUPER_ROOT_ID,
            SUPER_ROOT_INDEX,
            None,
            None,
            None,
            InstanceKind::SuperRoot(SuperRoot::default()),
        ));
        let mut kinds = Vec::with_capacity(records.len());
        for r in &records {
            if !matches!(r.kind, RecordKind::ClassObj(_)) {
                match r.class_id {
                    Some(class_id) if is_class(class_id) => {}
                    Some(class_id) => {
                        return Err(HeapGraphError::Format(format!(
                            "Instance 0x{:x} has unknown class 0x{:x}",
                            r.id, class_id
                        )))
                    }
                    None => {
                        return Err(HeapGraphError::Format(format!(
                            "Instance 0x{:x} has no class",
                            r.id
                        )))
                    }
                }
            }
            kinds.push((r.id, r.heap, r.site, r.class_id.and_then(resolve)));
        }
        for (r, (id, heap, site, class_obj)) in records.into_iter().zip(kinds) {
            let index = instances.len();
            let kind = match r.kind {
                RecordKind::ClassObj(data) => InstanceKind::ClassObj(ClassObj {
                    name: data.name,
                    super_class: data.super_class.and_then(resolve),
                    class_loader: data.class_loader.and_then(resolve),
                    instance_size: data.instance_size,
                    instance_fields: data.instance_fields,
                    static_fields: data
                        .static_fields
                        .into_iter()
                        .map(|f| FieldValue {
                            name: f.name,
                            ty: f.ty,
                            value: f.value.map_ref(resolve),
                        })
                        .collect(),
                    static_fields_size: data.static_fields_size,
                }),
                RecordKind::ClassInstance(fields) => InstanceKind::ClassInstance(ClassInstance {
                    fields: fields.into_iter().map(|v| v.map_ref(resolve)).collect(),
                }),
                RecordKind::Array(values) => InstanceKind::Array(ArrayInstance {
                    values: values.map_ref(resolve),
                }),
            };
            sites.add_instance(site, InstanceId::from_index(index));
            instances.push(Instance::new(id, index, Some(heap), class_obj, Some(site), kind));
        }

        roots.sort_by_key(|(id, _)| *id);
        let mut super_root = SuperRoot::default();
        let mut skipped = 0;
        for (id, ty) in roots {
            match resolve(id) {
                Some(inst) => {
                    if !instances[inst.index()].is_root() {
                        super_root.roots.push(inst);
                    }
                    instances[inst.index()].add_root_type(ty);
                }
                None => skipped += 1,
            }
        }
        if skipped > 0 {
            warn!("Skipped {} roots without an instance", skipped);
        }
        instances[SUPER_ROOT_INDEX].kind = InstanceKind::SuperRoot(super_root);
        check_class_hierarchy(&instances)?;
        info!(
            "Resolved {} instances in {} ms",
            instances.len() - 1,
            start.elapsed().as_millis()
        );

        let num_real = instances.len();
        let mut snapshot = Snapshot {
            instances,
            num_real,
            heaps,
            sites,
        };
        snapshot.prepare()?;
        Ok(snapshot)
    }
}

/// Fail if following super classes from any class object comes back
/// around to a class already on the walk
fn check_class_hierarchy(instances: &[Instance]) -> Result<()> {
    const UNSEEN: u8 = 0;
    const ON_WALK: u8 = 1;
    const CHECKED: u8 = 2;
    let mut state = vec![UNSEEN; instances.len()];
    let mut walk = vec![];
    for start in 0..instances.len() {
        let mut next = Some(start);
        while let Some(i) = next {
            match state[i] {
                CHECKED => break,
                ON_WALK => {
                    return Err(HeapGraphError::Format(format!(
                        "Super classes of 0x{:x} form a cycle",
                        instances[i].id
                    )))
                }
                _ => {}
            }
            let Some(class) = instances[i].as_class_obj() else {
                break;
            };
            state[i] = ON_WALK;
            walk.push(i);
            next = class.super_class.map(|s| s.index());
        }
        for i in walk.drain(..) {
            state[i] = CHECKED;
        }
    }
    Ok(())
}

/// One step of a path from a GC root to an instance
#[derive(Clone, PartialEq, Eq, Debug)]
pub struct PathElement {
    pub instance: InstanceId,
    /// The field of `instance` that refers to the next element of the path.
    /// Empty for the last element.
    pub field: RefLabel,
    /// True if `instance` dominates the last element of the path
    pub is_dominator: bool,
}

/// A prepared heap graph.
///
/// Instances are stored in an arena: the super root first, then the
/// instances of the heap dump sorted by dump id, then any placeholders
/// added by a diff.
#[derive(Clone, Debug)]
pub struct Snapshot {
    pub(crate) instances: Vec<Instance>,
    /// Arena length before any placeholders were added
    pub(crate) num_real: usize,
    pub(crate) heaps: Vec<Heap>,
    pub(crate) sites: SiteTree,
}

impl Snapshot {
    fn prepare(&mut self) -> Result<()> {
        let root = self.super_root();
        let n = self.instances.len();

        let start = Instant::now();
        let found = attribute_registered_native_sizes(&mut self.instances);
        info!(
            "Found {} registered native allocations in {} ms",
            found,
            start.elapsed().as_millis()
        );

        let start = Instant::now();
        let strongly_reachable = compute_reverse_references(&mut self.instances, root);
        info!(
            "Computed reverse references, {} of {} instances strongly reachable, in {} ms",
            strongly_reachable.count_ones(..),
            n - 1,
            start.elapsed().as_millis()
        );

        let start = Instant::now();
        let instances = &self.instances;
        let idoms = compute_dominators(n, root.index(), |i| {
            graph::references(instances, InstanceId::from_index(i))
                .into_iter()
                .filter(|r| r.strong)
                .map(|r| r.dst.index())
        });
        for (i, idom) in idoms.into_iter().enumerate() {
            if let Some(d) = idom {
                self.instances[i].immediate_dominator = Some(InstanceId::from_index(d));
                self.instances[d].dominated.push(InstanceId::from_index(i));
            }
        }
        for i in strongly_reachable.ones() {
            if self.instances[i].immediate_dominator.is_none() {
                return Err(HeapGraphError::GraphInvariant {
                    id: self.instances[i].id,
                });
            }
        }
        info!("Computed dominators in {} ms", start.elapsed().as_millis());

        let start = Instant::now();
        let shallow: Vec<Size> = (0..n)
            .map(|i| self.size(InstanceId::from_index(i)))
            .collect();
        let num_heaps = self.heaps.len();
        compute_retained_sizes(&mut self.instances, root, num_heaps, &shallow);
        for heap in self.heaps.iter_mut() {
            let size = self.instances[root.index()].retained_size(heap.id());
            heap.add_to_size(size);
        }
        info!("Computed retained sizes in {} ms", start.elapsed().as_millis());

        let start = Instant::now();
        let instances = &self.instances;
        self.sites.prepare_for_use(num_heaps, |id| {
            let inst = &instances[id.index()];
            if !inst.is_strongly_reachable() {
                return None;
            }
            Some((inst.heap?, inst.class_obj, shallow[id.index()]))
        });
        info!(
            "Summarized {} allocation sites in {} ms",
            self.sites.len(),
            start.elapsed().as_millis()
        );

        if cfg!(debug_assertions) || cfg!(feature = "sanity") {
            let reachable = crate::sanity::sanity_check(self);
            info!("Sanity check reporting {} strongly reachable instances", reachable);
            assert_eq!(reachable, strongly_reachable.count_ones(..));
        }
        Ok(())
    }

    pub fn super_root(&self) -> InstanceId {
        InstanceId::from_index(SUPER_ROOT_INDEX)
    }

    pub fn instance(&self, id: InstanceId) -> &Instance {
        &self.instances[id.index()]
    }

    /// Every instance of the snapshot, including the super root and any
    /// placeholders
    pub fn instances(&self) -> &[Instance] {
        &self.instances
    }

    pub fn num_placeholders(&self) -> usize {
        self.instances.len() - self.num_real
    }

    /// The instance with the given dump id
    pub fn find_instance(&self, id: u64) -> Option<InstanceId> {
        let real = &self.instances[SUPER_ROOT_INDEX + 1..self.num_real];
        real.binary_search_by_key(&id, |inst| inst.id)
            .ok()
            .map(|i| InstanceId::from_index(i + SUPER_ROOT_INDEX + 1))
    }

    /// The class object with the given dump id
    pub fn find_class_obj(&self, id: u64) -> Option<InstanceId> {
        self.find_instance(id)
            .filter(|inst| self.instance(*inst).as_class_obj().is_some())
    }

    /// Instances immediately dominated by the super root: the GC roots and
    /// anything reachable from more than one of them
    pub fn rooted(&self) -> &[InstanceId] {
        &self.instances[SUPER_ROOT_INDEX].dominated
    }

    pub fn references(&self, id: InstanceId) -> Vec<Reference> {
        graph::references(&self.instances, id)
    }

    pub fn instance_fields(&self, id: InstanceId) -> Vec<FieldValue> {
        graph::instance_fields(&self.instances, id)
    }

    /// The value of the first instance field called `name`
    pub fn field(&self, id: InstanceId, name: &str) -> Option<Value> {
        self.instance_fields(id)
            .into_iter()
            .find(|f| &*f.name == name)
            .map(|f| f.value)
    }

    /// The instance referred to by field `name`, if it holds a non-null
    /// reference
    pub fn ref_field(&self, id: InstanceId, name: &str) -> Option<InstanceId> {
        self.field(id, name)?.as_instance()
    }

    fn int_field(&self, id: InstanceId, name: &str, default: i32) -> i32 {
        self.field(id, name)
            .and_then(|v| v.as_int())
            .unwrap_or(default)
    }

    pub fn is_instance_of_class(&self, id: InstanceId, class_name: &str) -> bool {
        graph::is_instance_of_class(&self.instances, id, class_name)
    }

    /// The object a `java.lang.ref.Reference` refers to
    pub fn referent(&self, id: InstanceId) -> Option<InstanceId> {
        if self.instance(id).is_class_instance() && self.is_instance_of_class(id, JAVA_LANG_REF_REFERENCE) {
            self.ref_field(id, "referent")
        } else {
            None
        }
    }

    /// Name of the class of an instance, `"???"` if unknown
    pub fn class_name(&self, id: InstanceId) -> &str {
        let inst = self.instance(id);
        if let Some(placeholder) = inst.as_placeholder() {
            return &placeholder.class_name;
        }
        inst.class_obj
            .and_then(|cls| self.instance(cls).as_class_obj())
            .map_or(UNKNOWN_CLASS_NAME, |cls| cls.name())
    }

    /// Shallow size of an instance. Zero for the super root and for
    /// placeholders.
    pub fn size(&self, id: InstanceId) -> Size {
        let inst = self.instance(id);
        if inst.is_super_root() || inst.as_placeholder().is_some() {
            return Size::ZERO;
        }
        let instance_size = inst
            .class_obj
            .and_then(|cls| self.instance(cls).as_class_obj())
            .map_or(0, |cls| cls.instance_size);
        Size::new(instance_size + inst.extra_java_size(), inst.registered_native_size)
    }

    pub fn retained_size(&self, id: InstanceId, heap: HeapId) -> Size {
        self.instance(id).retained_size(heap)
    }

    pub fn total_retained_size(&self, id: InstanceId) -> Size {
        self.instance(id).total_retained_size()
    }

    /// The string an instance represents: a `java.lang.String` or a
    /// `char[]`. Truncated to `max_chars` characters unless it is negative.
    pub fn as_string(&self, id: InstanceId, max_chars: isize) -> Option<String> {
        let inst = self.instance(id);
        match &inst.kind {
            InstanceKind::PlaceHolder(p) => p.string_value.as_ref().map(|s| {
                if max_chars < 0 {
                    s.clone()
                } else {
                    s.chars().take(max_chars as usize).collect()
                }
            }),
            InstanceKind::Array(array) => match array.values {
                ArrayValues::Chars(_) => array.as_maybe_compressed_string(0, -1, max_chars),
                _ => None,
            },
            InstanceKind::ClassInstance(_) => {
                if !self.is_instance_of_class(id, JAVA_LANG_STRING) {
                    return None;
                }
                let value = self.ref_field(id, "value")?;
                let chars = self.instance(value).as_array()?;
                let count = self.int_field(id, "count", chars.len() as i32);
                let offset = self.int_field(id, "offset", 0);
                chars.as_maybe_compressed_string(offset.max(0) as usize, count as isize, max_chars)
            }
            InstanceKind::ClassObj(_) | InstanceKind::SuperRoot(_) => None,
        }
    }

    /// Human readable name of an instance, e.g. `java.lang.Object@0000abcd`
    pub fn display(&self, id: InstanceId) -> String {
        let inst = self.instance(id);
        match &inst.kind {
            InstanceKind::PlaceHolder(p) => p.display.clone(),
            InstanceKind::SuperRoot(_) => "SUPER_ROOT".to_string(),
            InstanceKind::ClassObj(cls) => format!("class {}", cls.name),
            InstanceKind::Array(array) => {
                let class_name = self.class_name(id);
                let elem = class_name.strip_suffix("[]").unwrap_or(class_name);
                format!("{}[{}]@{:08x}", elem, array.len(), inst.id)
            }
            InstanceKind::ClassInstance(_) => format!("{}@{:08x}", self.class_name(id), inst.id),
        }
    }

    /// A sample path from a GC root to `id`, root first, or `None` if the
    /// instance is unreachable
    pub fn path_from_gc_root(&self, id: InstanceId) -> Option<Vec<PathElement>> {
        let mut path = vec![];
        let mut dominator = Some(id);
        let mut current = (id, RefLabel::Empty);
        loop {
            let (inst, field) = current;
            let is_dominator = dominator == Some(inst);
            if is_dominator {
                dominator = self.instance(inst).immediate_dominator;
            }
            path.push(PathElement {
                instance: inst,
                field,
                is_dominator,
            });
            let instance = self.instance(inst);
            if instance.is_root() {
                break;
            }
            current = instance.next_to_gc_root.clone()?;
        }
        path.reverse();
        Some(path)
    }

    pub fn heaps(&self) -> &[Heap] {
        &self.heaps
    }

    pub fn heap(&self, id: HeapId) -> &Heap {
        &self.heaps[id.index()]
    }

    pub fn heap_by_name(&self, name: &str) -> Option<HeapId> {
        self.heaps.iter().find(|h| h.name == name).map(|h| h.id())
    }

    pub fn sites(&self) -> &SiteTree {
        &self.sites
    }

    pub fn root_site(&self) -> SiteId {
        self.sites.root()
    }

    pub fn site(&self, id: SiteId) -> &Site {
        self.sites.get(id)
    }

    /// The site with the given site id
    pub fn find_site(&self, id: u64) -> Option<SiteId> {
        self.sites.find_site(id)
    }

    /// Instances allocated at `site` or below it, optionally restricted to
    /// a heap and a class by name. Includes unreachable instances and any
    /// placeholders a diff attached to the sites.
    pub fn site_objects(&self, site: SiteId, heap_name: Option<&str>, class_name: Option<&str>) -> Vec<InstanceId> {
        let mut result = vec![];
        for s in self.sites.descendants(site) {
            for inst in self.sites.get(s).objects() {
                let instance = self.instance(*inst);
                if let Some(heap_name) = heap_name {
                    let on_heap = instance
                        .heap
                        .map_or(false, |h| self.heap(h).name() == heap_name);
                    if !on_heap {
                        continue;
                    }
                }
                if let Some(class_name) = class_name {
                    if self.class_name(*inst) != class_name {
                        continue;
                    }
                }
                result.push(*inst);
            }
        }
        result
    }

    /// Shape of an instance as seen by a placeholder standing in for it
    pub(crate) fn placeholder_shape(&self, id: InstanceId) -> PlaceHolderShape {
        let inst = self.instance(id);
        match &inst.kind {
            InstanceKind::PlaceHolder(p) => p.shape.clone(),
            InstanceKind::Array(array) => PlaceHolderShape::Array {
                elem_type: array.elem_type(),
                length: array.len(),
            },
            InstanceKind::ClassObj(cls) => PlaceHolderShape::ClassObj {
                name: cls.name.clone(),
            },
            InstanceKind::ClassInstance(_) | InstanceKind::SuperRoot(_) => PlaceHolderShape::Instance,
        }
    }
}


#[cfg(test)]
mod tests {
    use super::test_util::*;
    use super::*;
    use crate::graph::Type;

    fn find(snapshot: &Snapshot, id: u64) -> InstanceId {
        snapshot.find_instance(id).unwrap()
    }

    #[test]
    fn test_weak_referent_chain() {
        let mut dump = TestDump::new();
        let reference = dump.class("java.lang.ref.Reference", None, &[("referent", Type::Object)]);
        let weak = dump.class("java.lang.ref.WeakReference", Some(reference), &[]);
        let node = dump.class("Node", None, &[]);
        let y = dump.object(node, vec![]);
        let x = dump.object(weak, vec![obj(y)]);
        dump.root(x);
        let snapshot = dump.build();

        let x = find(&snapshot, x);
        let y = find(&snapshot, y);
        assert!(snapshot.instance(x).is_strongly_reachable());
        assert!(snapshot.instance(y).is_weakly_reachable());
        assert!(snapshot.instance(y).immediate_dominator().is_none());
        assert_eq!(snapshot.referent(x), Some(y));
        assert_eq!(snapshot.instance(y).soft_reverse_references(), &[x]);
        assert_eq!(snapshot.total_retained_size(x), Size::new(16, 0));
        assert!(snapshot.total_retained_size(y).is_zero());
    }

    #[test]
    fn test_shared_object_under_two_roots() {
        let mut dump = TestDump::new();
        let node = dump.class("Node", None, &[("next", Type::Object)]);
        let shared = dump.object(node, vec![Value::Object(None)]);
        let a = dump.object(node, vec![obj(shared)]);
        let b = dump.object(node, vec![obj(shared)]);
        dump.root(a);
        dump.root(b);
        let snapshot = dump.build();

        let (a, b, shared) = (find(&snapshot, a), find(&snapshot, b), find(&snapshot, shared));
        assert_eq!(snapshot.instance(shared).immediate_dominator(), Some(snapshot.super_root()));
        let rooted = snapshot.rooted();
        assert!(rooted.contains(&a));
        assert!(rooted.contains(&b));
        assert!(rooted.contains(&shared));
        assert_eq!(snapshot.total_retained_size(a), Size::new(16, 0));
        assert_eq!(snapshot.instance(shared).hard_reverse_references(), &[a, b]);
    }

    #[test]
    fn test_size_conservation() {
        let mut dump = TestDump::new();
        let node = dump.class("Node", None, &[("left", Type::Object), ("right", Type::Object)]);
        let byte_array = dump.class_sized("byte[]", None, &[], 12);
        let bytes = dump.array(byte_array, ArrayValues::Bytes(vec![1, 2, 3, 4]));
        let leaf = dump.object(node, vec![Value::Object(None), obj(bytes)]);
        let mid = dump.object(node, vec![obj(leaf), obj(leaf)]);
        let top = dump.object(node, vec![obj(mid), Value::Object(None)]);
        let _garbage = dump.object(node, vec![obj(top), Value::Object(None)]);
        dump.root(top);
        dump.root(dump.class_class);
        let snapshot = dump.build();

        let heap = snapshot.heap_by_name("app").unwrap();
        let mut live = Size::ZERO;
        for (i, inst) in snapshot.instances().iter().enumerate() {
            let id = InstanceId::from_index(i);
            if inst.is_strongly_reachable() {
                live += snapshot.size(id);
            }
            // Exactly one of the three
            let states = [
                inst.is_strongly_reachable(),
                inst.is_weakly_reachable(),
                inst.is_unreachable(),
            ];
            assert_eq!(states.iter().filter(|s| **s).count(), 1);
        }
        assert_eq!(snapshot.heap(heap).size(), live);
        assert_eq!(snapshot.total_retained_size(snapshot.super_root()), live);
        // java.lang.Class itself has no size
        assert_eq!(live, Size::new(3 * 16 + 12 + 4, 0));

        let top = find(&snapshot, top);
        assert_eq!(snapshot.total_retained_size(top), Size::new(3 * 16 + 16, 0));
        for inst in snapshot.instances() {
            let children: u64 = inst
                .dominated()
                .iter()
                .map(|c| snapshot.total_retained_size(*c).total())
                .sum();
            assert!(inst.total_retained_size().total() >= children);
        }
    }

    #[test]
    fn test_path_from_gc_root() {
        let mut dump = TestDump::new();
        let node = dump.class("Node", None, &[("a", Type::Object), ("b", Type::Object)]);
        let d = dump.object(node, vec![Value::Object(None), Value::Object(None)]);
        let b = dump.object(node, vec![obj(d), Value::Object(None)]);
        let c = dump.object(node, vec![obj(d), Value::Object(None)]);
        let a = dump.object(node, vec![obj(b), obj(c)]);
        let unreachable = dump.object(node, vec![obj(a), Value::Object(None)]);
        dump.root(a);
        let snapshot = dump.build();

        let (a, b, d) = (find(&snapshot, a), find(&snapshot, b), find(&snapshot, d));
        let path = snapshot.path_from_gc_root(d).unwrap();
        assert_eq!(
            path,
            vec![
                PathElement {
                    instance: a,
                    field: RefLabel::Field("a".into()),
                    is_dominator: true,
                },
                PathElement {
                    instance: b,
                    field: RefLabel::Field("a".into()),
                    is_dominator: false,
                },
                PathElement {
                    instance: d,
                    field: RefLabel::Empty,
                    is_dominator: true,
                },
            ]
        );
        let unreachable = find(&snapshot, unreachable);
        assert!(snapshot.path_from_gc_root(unreachable).is_none());
        assert!(snapshot.path_from_gc_root(snapshot.super_root()).is_none());
    }

    #[test]
    fn test_strings() {
        let mut dump = TestDump::new();
        let string = dump.class(
            "java.lang.String",
            None,
            &[("value", Type::Object), ("count", Type::Int), ("offset", Type::Int)],
        );
        let char_array = dump.class_sized("char[]", None, &[], 12);
        let byte_array = dump.class_sized("byte[]", None, &[], 12);
        let chars: Vec<u16> = "hello world".encode_utf16().collect();
        let value = dump.array(char_array, ArrayValues::Chars(chars));
        let hello = dump.object(string, vec![obj(value), Value::Int(5), Value::Int(0)]);
        let world = dump.object(string, vec![obj(value), Value::Int(5), Value::Int(6)]);
        let latin = dump.array(byte_array, ArrayValues::Bytes(vec![b'a' as i8, b'b' as i8, 0xe9u8 as i8]));
        let compressed = dump.object(string, vec![obj(latin), Value::Int(3), Value::Int(0)]);
        let snapshot = dump.build();

        let hello = find(&snapshot, hello);
        assert_eq!(snapshot.as_string(hello, -1).as_deref(), Some("hello"));
        assert_eq!(snapshot.as_string(hello, 3).as_deref(), Some("hel"));
        let world = find(&snapshot, world);
        assert_eq!(snapshot.as_string(world, -1).as_deref(), Some("world"));
        let value = find(&snapshot, value);
        assert_eq!(snapshot.as_string(value, -1).as_deref(), Some("hello world"));
        let compressed = find(&snapshot, compressed);
        assert_eq!(snapshot.as_string(compressed, -1).as_deref(), Some("ab\u{e9}"));
        let latin = find(&snapshot, latin);
        assert_eq!(snapshot.as_string(latin, -1), None);
        assert_eq!(snapshot.display(value), format!("char[11]@{:08x}", snapshot.instance(value).id()));
    }

    #[test]
    fn test_registered_native_size() {
        let mut dump = TestDump::new();
        let cleaner = dump.class(
            "sun.misc.Cleaner",
            None,
            &[("thunk", Type::Object), ("referent", Type::Object)],
        );
        let thunk_class = dump.class(
            "libcore.util.NativeAllocationRegistry$CleanerThunk",
            None,
            &[("this$0", Type::Object)],
        );
        let registry_class = dump.class("libcore.util.NativeAllocationRegistry", None, &[("size", Type::Long)]);
        let bitmap_class = dump.class("android.graphics.Bitmap", None, &[]);
        let registry = dump.object(registry_class, vec![Value::Long(1000)]);
        let thunk = dump.object(thunk_class, vec![obj(registry)]);
        let bitmap = dump.object(bitmap_class, vec![]);
        let c = dump.object(cleaner, vec![obj(thunk), obj(bitmap)]);
        dump.root(bitmap);
        dump.root(c);
        let snapshot = dump.build();

        let bitmap = find(&snapshot, bitmap);
        assert_eq!(snapshot.size(bitmap), Size::new(16, 1000));
        assert_eq!(snapshot.total_retained_size(bitmap), Size::new(16, 1000));
        let heap = snapshot.heap_by_name("app").unwrap();
        assert_eq!(snapshot.heap(heap).size().registered_native_size(), 1000);
    }

    #[test]
    fn test_lookups() {
        let mut dump = TestDump::new();
        let node = dump.class("Node", None, &[("next", Type::Object)]);
        // A reference to an id that is not in the dump is null
        let a = dump.object(node, vec![obj(0xdead)]);
        dump.root(a);
        dump.builder.add_root(0xbeef, RootType::Thread);
        dump.builder.add_root(a, RootType::JavaFrame);
        let snapshot = dump.build();

        let a_id = find(&snapshot, a);
        assert_eq!(snapshot.field(a_id, "next"), Some(Value::Object(None)));
        assert!(snapshot.references(a_id).is_empty());
        assert_eq!(
            snapshot.instance(a_id).root_types(),
            Some(vec![RootType::JniGlobal, RootType::JavaFrame])
        );
        assert_eq!(snapshot.rooted(), &[a_id]);
        assert_eq!(snapshot.find_class_obj(node), snapshot.find_instance(node));
        assert!(snapshot.find_class_obj(a).is_none());
        assert!(snapshot.find_instance(0xdead).is_none());
        assert_eq!(snapshot.display(a_id), format!("Node@{:08x}", a));
        let node = find(&snapshot, node);
        assert_eq!(snapshot.display(node), "class Node");
        assert_eq!(snapshot.class_name(node), "java.lang.Class");
        assert!(snapshot.heap_by_name("zygote").is_none());
        assert_eq!(snapshot.num_placeholders(), 0);
    }

    #[test]
    fn test_super_class_cycle_rejected() {
        let mut dump = TestDump::new();
        let a = dump.next_id();
        let b = dump.next_id();
        for (id, name, super_class) in [(a, "A", b), (b, "B", a)] {
            dump.builder.add_class_obj(
                id,
                dump.heap,
                dump.site,
                Some(dump.class_class),
                ClassObjData {
                    name: name.to_string(),
                    super_class: Some(super_class),
                    class_loader: None,
                    instance_size: 16,
                    instance_fields: vec![],
                    static_fields: vec![],
                    static_fields_size: 0,
                },
            );
        }
        let x = dump.object(a, vec![]);
        dump.root(x);
        assert!(matches!(dump.builder.build(), Err(HeapGraphError::Format(_))));
    }

    #[test]
    fn test_self_super_class_rejected() {
        let mut dump = TestDump::new();
        let id = dump.next_id();
        dump.builder.add_class_obj(
            id,
            dump.heap,
            dump.site,
            Some(dump.class_class),
            ClassObjData {
                name: "Loop".to_string(),
                super_class: Some(id),
                class_loader: None,
                instance_size: 16,
                instance_fields: vec![],
                static_fields: vec![],
                static_fields_size: 0,
            },
        );
        assert!(matches!(dump.builder.build(), Err(HeapGraphError::Format(_))));
    }

    #[test]
    fn test_site_objects_include_unreachable() {
        let mut dump = TestDump::new();
        let node = dump.class("Node", None, &[]);
        let rooted = dump.object(node, vec![]);
        dump.object(node, vec![]);
        dump.root(rooted);
        let snapshot = dump.build();

        let root = snapshot.root_site();
        assert_eq!(snapshot.site_objects(root, None, Some("Node")).len(), 2);
        // Node, java.lang.Class and the two instances
        assert_eq!(snapshot.site_objects(root, None, None).len(), 4);
        assert_eq!(snapshot.site_objects(root, Some("app"), Some("java.lang.Class")).len(), 2);
    }

    #[test]
    fn test_site_summaries() {
        let mut dump = TestDump::new();
        let node = dump.class("Node", None, &[]);
        let outer = Frame::new("main", "()V", "Main.java", 10);
        let inner = Frame::new("alloc", "()V", "Main.java", 20);
        let site = dump.builder.site(&[inner, outer]);
        let heap = dump.heap;
        dump.builder.add_class_instance(0x10, heap, site, node, vec![]);
        dump.builder.add_class_instance(0x20, heap, site, node, vec![]);
        dump.builder.add_class_instance(0x30, heap, site, node, vec![]);
        dump.root(0x10);
        dump.root(0x20);
        let snapshot = dump.build();

        let root = snapshot.root_site();
        let main = snapshot.site(root).children()[0];
        assert_eq!(snapshot.site(main).method_name(), "main");
        let alloc = snapshot.site(main).children()[0];
        // Only the strongly reachable instances are counted
        assert_eq!(snapshot.site(alloc).total_size(), Size::new(32, 0));
        assert_eq!(snapshot.site(main).total_size(), Size::new(32, 0));
        // Listing objects ignores reachability
        assert_eq!(snapshot.site_objects(main, Some("app"), Some("Node")).len(), 3);
        assert!(snapshot.site_objects(main, Some("zygote"), None).is_empty());
        let info = &snapshot.site(alloc).objects_infos()[0];
        assert_eq!(info.num_instances, 2);
        assert_eq!(snapshot.find_site(snapshot.site(alloc).id()), Some(alloc));
        assert!(snapshot.find_site(100).is_none());
    }

    #[test]
    fn test_duplicate_ids_are_rejected() {
        let mut dump = TestDump::new();
        let node = dump.class("Node", None, &[]);
        let heap = dump.heap;
        let site = dump.site;
        dump.builder.add_class_instance(0x10, heap, site, node, vec![]);
        dump.builder.add_class_instance(0x10, heap, site, node, vec![]);
        assert!(matches!(dump.builder.build(), Err(HeapGraphError::Format(_))));
    }

    #[test]
    fn test_unknown_class_is_rejected() {
        let mut dump = TestDump::new();
        let heap = dump.heap;
        let site = dump.site;
        dump.builder.add_class_instance(0x10, heap, site, 0x999, vec![]);
        assert!(matches!(dump.builder.build(), Err(HeapGraphError::Format(_))));
    }
}
