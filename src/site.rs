use std::collections::HashMap;

use smallvec::smallvec;

use crate::graph::{Diffable, HeapId, HeapSizes, InstanceId, SiteId, Size};

/// One frame of an allocation stack trace
#[derive(Clone, PartialEq, Eq, Hash, Debug)]
pub struct Frame {
    pub method: String,
    pub signature: String,
    pub filename: String,
    pub line: i32,
}

impl Frame {
    pub fn new(method: &str, signature: &str, filename: &str, line: i32) -> Frame {
        Frame {
            method: method.to_string(),
            signature: signature.to_string(),
            filename: filename.to_string(),
            line,
        }
    }
}

/// Summary of the instances of one class on one heap allocated at (or
/// below) a site
#[derive(Clone, Debug)]
pub struct ObjectsInfo {
    pub heap: HeapId,
    /// `None` for instances without a known class
    pub class_obj: Option<InstanceId>,
    pub num_instances: u64,
    /// Sum of the shallow sizes of the instances
    pub num_bytes: Size,
    pub(crate) baseline: usize,
    pub(crate) is_placeholder: bool,
}

impl ObjectsInfo {
    fn new(heap: HeapId, class_obj: Option<InstanceId>, index: usize) -> ObjectsInfo {
        ObjectsInfo {
            heap,
            class_obj,
            num_instances: 0,
            num_bytes: Size::ZERO,
            baseline: index,
            is_placeholder: false,
        }
    }
}

/// The baseline of an objects info is an index into the objects infos of
/// its site's baseline
impl Diffable for ObjectsInfo {
    type Id = usize;

    fn baseline(&self) -> usize {
        self.baseline
    }

    fn is_placeholder(&self) -> bool {
        self.is_placeholder
    }
}

/// A node of the allocation call-stack trie
#[derive(Clone, Debug)]
pub struct Site {
    pub(crate) parent: Option<SiteId>,
    pub(crate) method: String,
    pub(crate) signature: String,
    pub(crate) filename: String,
    pub(crate) line: i32,
    // Pre-order position in the site tree, assigned by prepare_for_use. Ids
    // of a site's children are increasing, which lets find_site binary
    // search them.
    pub(crate) id: u64,
    pub(crate) sizes_by_heap: HeapSizes,
    pub(crate) children: Vec<SiteId>,
    pub(crate) objects: Vec<InstanceId>,
    pub(crate) objects_infos: Vec<ObjectsInfo>,
    pub(crate) objects_info_map: HashMap<(HeapId, Option<InstanceId>), usize>,
    pub(crate) baseline: SiteId,
}

impl Site {
    fn new(index: usize, parent: Option<SiteId>, frame: Frame) -> Site {
        Site {
            parent,
            method: frame.method,
            signature: frame.signature,
            filename: frame.filename,
            line: frame.line,
            id: 0,
            sizes_by_heap: HeapSizes::new(),
            children: vec![],
            objects: vec![],
            objects_infos: vec![],
            objects_info_map: HashMap::new(),
            baseline: SiteId::from_index(index),
        }
    }

    fn matches(&self, frame: &Frame) -> bool {
        self.line == frame.line
            && self.method == frame.method
            && self.signature == frame.signature
            && self.filename == frame.filename
    }

    /// Same call site as `other`, which may live in another snapshot
    pub(crate) fn same_frame(&self, other: &Site) -> bool {
        self.line == other.line
            && self.method == other.method
            && self.signature == other.signature
            && self.filename == other.filename
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn parent(&self) -> Option<SiteId> {
        self.parent
    }

    pub fn method_name(&self) -> &str {
        &self.method
    }

    pub fn signature(&self) -> &str {
        &self.signature
    }

    pub fn filename(&self) -> &str {
        &self.filename
    }

    pub fn line_number(&self) -> i32 {
        self.line
    }

    pub fn children(&self) -> &[SiteId] {
        &self.children
    }

    /// Instances allocated directly at this site, not including child sites
    pub fn objects(&self) -> &[InstanceId] {
        &self.objects
    }

    pub fn objects_infos(&self) -> &[ObjectsInfo] {
        &self.objects_infos
    }

    /// Size of the strongly reachable objects on `heap` allocated at this
    /// and child sites
    pub fn size(&self, heap: HeapId) -> Size {
        self.sizes_by_heap
            .get(heap.index())
            .copied()
            .unwrap_or(Size::ZERO)
    }

    pub fn total_size(&self) -> Size {
        self.sizes_by_heap
            .iter()
            .fold(Size::ZERO, |acc, s| acc + *s)
    }
}

impl Diffable for Site {
    type Id = SiteId;

    fn baseline(&self) -> SiteId {
        self.baseline
    }

    fn is_placeholder(&self) -> bool {
        false
    }
}

/// Arena holding every site of a snapshot. The root site is always at
/// index 0.
#[derive(Clone, Debug)]
pub struct SiteTree {
    pub(crate) sites: Vec<Site>,
}

impl SiteTree {
    pub fn new(root_name: &str) -> SiteTree {
        SiteTree {
            sites: vec![Site::new(0, None, Frame::new(root_name, "", "", 0))],
        }
    }

    pub fn root(&self) -> SiteId {
        SiteId::from_index(0)
    }

    pub fn len(&self) -> usize {
        self.sites.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sites.is_empty()
    }

    pub fn get(&self, site: SiteId) -> &Site {
        &self.sites[site.index()]
    }

    pub(crate) fn get_mut(&mut self, site: SiteId) -> &mut Site {
        &mut self.sites[site.index()]
    }

    /// The site for a stack trace given inner-most frame first, creating
    /// any missing sites along the way
    pub fn get_site(&mut self, frames: &[Frame]) -> SiteId {
        let mut site = self.root();
        for frame in frames.iter().rev() {
            let found = self
                .get(site)
                .children
                .iter()
                .copied()
                .find(|c| self.get(*c).matches(frame));
            site = match found {
                Some(child) => child,
                None => {
                    let child = SiteId::from_index(self.sites.len());
                    self.sites.push(Site::new(child.index(), Some(site), frame.clone()));
                    self.get_mut(site).children.push(child);
                    child
                }
            };
        }
        site
    }

    pub(crate) fn add_instance(&mut self, site: SiteId, inst: InstanceId) {
        self.get_mut(site).objects.push(inst);
    }

    /// The objects info of `site` for (heap, class), created empty if
    /// missing. Returns its index in the site's objects infos.
    pub(crate) fn objects_info(
        &mut self,
        site: SiteId,
        heap: HeapId,
        class_obj: Option<InstanceId>,
    ) -> usize {
        let s = self.get_mut(site);
        if let Some(index) = s.objects_info_map.get(&(heap, class_obj)) {
            return *index;
        }
        let index = s.objects_infos.len();
        s.objects_infos.push(ObjectsInfo::new(heap, class_obj, index));
        s.objects_info_map.insert((heap, class_obj), index);
        index
    }

    /// Every site of the subtree rooted at `site`, in pre-order
    pub fn descendants(&self, site: SiteId) -> Vec<SiteId> {
        let mut result = vec![];
        let mut stack = vec![site];
        while let Some(s) = stack.pop() {
            result.push(s);
            stack.extend(self.get(s).children.iter().rev());
        }
        result
    }

    /// Assign site ids and summarize the objects allocated at each site.
    ///
    /// `summarize` returns the heap, class and shallow size of an instance
    /// that should be counted, or `None` for instances that are not strongly
    /// reachable.
    pub(crate) fn prepare_for_use<F>(&mut self, num_heaps: usize, mut summarize: F)
    where
        F: FnMut(InstanceId) -> Option<(HeapId, Option<InstanceId>, Size)>,
    {
        let mut next_id = 0;
        let mut stack = vec![(self.root(), false)];
        while let Some((site, visited)) = stack.pop() {
            if !visited {
                let s = self.get_mut(site);
                s.id = next_id;
                next_id += 1;
                s.sizes_by_heap = smallvec![Size::ZERO; num_heaps];
                s.objects_infos.clear();
                s.objects_info_map.clear();
                let objects = s.objects.clone();
                for inst in objects {
                    if let Some((heap, class_obj, size)) = summarize(inst) {
                        let info = self.objects_info(site, heap, class_obj);
                        let s = self.get_mut(site);
                        s.objects_infos[info].num_instances += 1;
                        s.objects_infos[info].num_bytes += size;
                        s.sizes_by_heap[heap.index()] += size;
                    }
                }
                stack.push((site, true));
                stack.extend(self.get(site).children.iter().rev().map(|c| (*c, false)));
            } else {
                let children = self.get(site).children.clone();
                for child in children {
                    let child_infos: Vec<(HeapId, Option<InstanceId>, u64, Size)> = self
                        .get(child)
                        .objects_infos
                        .iter()
                        .map(|i| (i.heap, i.class_obj, i.num_instances, i.num_bytes))
                        .collect();
                    for (heap, class_obj, num_instances, num_bytes) in child_infos {
                        let info = self.objects_info(site, heap, class_obj);
                        let s = self.get_mut(site);
                        s.objects_infos[info].num_instances += num_instances;
                        s.objects_infos[info].num_bytes += num_bytes;
                    }
                    let child_sizes = self.get(child).sizes_by_heap.clone();
                    let s = self.get_mut(site);
                    for (i, size) in child_sizes.into_iter().enumerate() {
                        s.sizes_by_heap[i] += size;
                    }
                }
            }
        }
    }

    /// The site with the given id, if any
    pub fn find_site(&self, id: u64) -> Option<SiteId> {
        let mut site = self.root();
        loop {
            let s = self.get(site);
            if s.id == id {
                return Some(site);
            }
            // The last child whose id is not larger than the one we look for
            // is the only subtree that can contain it
            let after = s.children.partition_point(|c| self.get(*c).id <= id);
            if after == 0 {
                return None;
            }
            site = s.children[after - 1];
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frame(method: &str, line: i32) -> Frame {
        Frame::new(method, "()V", "Main.java", line)
    }

    #[test]
    fn test_get_site_shares_prefixes() {
        let mut tree = SiteTree::new("ROOT");
        // Inner-most frame first
        let a = tree.get_site(&[frame("alloc", 10), frame("main", 1)]);
        let b = tree.get_site(&[frame("other", 20), frame("main", 1)]);
        let a2 = tree.get_site(&[frame("alloc", 10), frame("main", 1)]);
        assert_eq!(a, a2);
        assert_ne!(a, b);
        assert_eq!(tree.get(a).parent(), tree.get(b).parent());
        assert_eq!(tree.get(tree.root()).children().len(), 1);
        assert_eq!(tree.get_site(&[]), tree.root());
        assert_eq!(tree.len(), 4);
    }

    #[test]
    fn test_prepare_for_use_assigns_preorder_ids() {
        let mut tree = SiteTree::new("ROOT");
        let main = tree.get_site(&[frame("main", 1)]);
        let a = tree.get_site(&[frame("a", 2), frame("main", 1)]);
        let b = tree.get_site(&[frame("b", 3), frame("main", 1)]);
        let other = tree.get_site(&[frame("other", 4)]);
        tree.prepare_for_use(1, |_| None);
        assert_eq!(tree.get(tree.root()).id(), 0);
        assert_eq!(tree.get(main).id(), 1);
        assert_eq!(tree.get(a).id(), 2);
        assert_eq!(tree.get(b).id(), 3);
        assert_eq!(tree.get(other).id(), 4);
        for (site, id) in [(main, 1), (a, 2), (b, 3), (other, 4)] {
            assert_eq!(tree.find_site(id), Some(site));
        }
        assert_eq!(tree.find_site(0), Some(tree.root()));
        assert_eq!(tree.find_site(5), None);
    }

    #[test]
    fn test_prepare_for_use_aggregates_children() {
        let mut tree = SiteTree::new("ROOT");
        let a = tree.get_site(&[frame("a", 2), frame("main", 1)]);
        let b = tree.get_site(&[frame("b", 3), frame("main", 1)]);
        let heap = HeapId::from_index(0);
        let class = Some(InstanceId::from_index(1));
        tree.add_instance(a, InstanceId::from_index(10));
        tree.add_instance(a, InstanceId::from_index(11));
        tree.add_instance(b, InstanceId::from_index(12));
        // Instance 11 is not strongly reachable
        tree.prepare_for_use(1, |inst| {
            if inst.index() == 11 {
                None
            } else {
                Some((heap, class, Size::new(16, 0)))
            }
        });
        let root = tree.get(tree.root());
        assert_eq!(root.total_size(), Size::new(32, 0));
        assert_eq!(root.objects_infos().len(), 1);
        assert_eq!(root.objects_infos()[0].num_instances, 2);
        assert_eq!(tree.get(a).size(heap), Size::new(16, 0));
        assert_eq!(tree.get(a).objects().len(), 2);
        // Out of range heaps have no size
        assert_eq!(tree.get(a).size(HeapId::from_index(3)), Size::ZERO);
    }
}
