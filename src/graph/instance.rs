use std::fmt;
use std::sync::Arc;

use smallvec::SmallVec;

use super::{Diffable, Field, FieldValue, HeapId, InstanceId, RootType, SiteId, Size, Type, Value};

/// Retained sizes of one instance, indexed by heap
pub(crate) type HeapSizes = SmallVec<[Size; 4]>;

/// Instance fields of a normal object, in the order of the field
/// descriptors of its class, then its super class, and so on
#[derive(Clone, Debug)]
pub struct ClassInstance {
    pub(crate) fields: Vec<Value>,
}

/// Elements of an array, by element type
#[derive(Clone, PartialEq, Debug)]
pub enum ArrayValues<R = InstanceId> {
    Objects(Vec<Option<R>>),
    Chars(Vec<u16>),
    Bytes(Vec<i8>),
    Primitives(Type, Vec<Value<R>>),
}

impl<R: Copy> ArrayValues<R> {
    pub fn len(&self) -> usize {
        match self {
            ArrayValues::Objects(v) => v.len(),
            ArrayValues::Chars(v) => v.len(),
            ArrayValues::Bytes(v) => v.len(),
            ArrayValues::Primitives(_, v) => v.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn elem_type(&self) -> Type {
        match self {
            ArrayValues::Objects(_) => Type::Object,
            ArrayValues::Chars(_) => Type::Char,
            ArrayValues::Bytes(_) => Type::Byte,
            ArrayValues::Primitives(ty, _) => *ty,
        }
    }

    pub(crate) fn map_ref<S, F>(self, mut f: F) -> ArrayValues<S>
    where
        F: FnMut(R) -> Option<S>,
    {
        match self {
            ArrayValues::Objects(v) => {
                ArrayValues::Objects(v.into_iter().map(|r| r.and_then(&mut f)).collect())
            }
            ArrayValues::Chars(v) => ArrayValues::Chars(v),
            ArrayValues::Bytes(v) => ArrayValues::Bytes(v),
            ArrayValues::Primitives(ty, v) => {
                ArrayValues::Primitives(ty, v.into_iter().map(|x| x.map_ref(&mut f)).collect())
            }
        }
    }
}

#[derive(Clone, Debug)]
pub struct ArrayInstance {
    pub(crate) values: ArrayValues,
}

impl ArrayInstance {
    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn elem_type(&self) -> Type {
        self.values.elem_type()
    }

    pub fn values(&self) -> &ArrayValues {
        &self.values
    }

    /// Element `i` as a value, or `None` past the end
    pub fn value(&self, i: usize) -> Option<Value> {
        match &self.values {
            ArrayValues::Objects(v) => v.get(i).map(|r| Value::Object(*r)),
            ArrayValues::Chars(v) => v.get(i).map(|c| Value::Char(*c)),
            ArrayValues::Bytes(v) => v.get(i).map(|b| Value::Byte(*b)),
            ArrayValues::Primitives(_, v) => v.get(i).copied(),
        }
    }

    /// Decode `count` characters starting at `offset`, either from UTF-16
    /// chars or from a Latin-1 compressed byte array. A negative count means
    /// "to the end of the array", a negative `max_chars` means no limit.
    pub(crate) fn as_maybe_compressed_string(
        &self,
        offset: usize,
        count: isize,
        max_chars: isize,
    ) -> Option<String> {
        let len = self.len();
        let offset = offset.min(len);
        let mut count = if count < 0 {
            len - offset
        } else {
            (count as usize).min(len - offset)
        };
        if max_chars >= 0 {
            count = count.min(max_chars as usize);
        }
        match &self.values {
            ArrayValues::Chars(chars) => Some(
                char::decode_utf16(chars[offset..offset + count].iter().copied())
                    .map(|r| r.unwrap_or(char::REPLACEMENT_CHARACTER))
                    .collect(),
            ),
            ArrayValues::Bytes(bytes) => Some(
                bytes[offset..offset + count]
                    .iter()
                    .map(|b| *b as u8 as char)
                    .collect(),
            ),
            _ => None,
        }
    }
}

/// A class object. Classes are graph nodes too, so they can be retained and
/// leaked like any other object.
#[derive(Clone, Debug)]
pub struct ClassObj {
    pub(crate) name: String,
    pub(crate) super_class: Option<InstanceId>,
    pub(crate) class_loader: Option<InstanceId>,
    pub(crate) instance_size: u64,
    pub(crate) instance_fields: Vec<Field>,
    pub(crate) static_fields: Vec<FieldValue>,
    pub(crate) static_fields_size: u64,
}

impl ClassObj {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn super_class(&self) -> Option<InstanceId> {
        self.super_class
    }

    pub fn class_loader(&self) -> Option<InstanceId> {
        self.class_loader
    }

    /// Shallow size of an instance of this class
    pub fn instance_size(&self) -> u64 {
        self.instance_size
    }

    /// Fields declared by this class, excluding inherited ones
    pub fn instance_fields(&self) -> &[Field] {
        &self.instance_fields
    }

    pub fn static_field_values(&self) -> &[FieldValue] {
        &self.static_fields
    }

    pub fn static_fields_size(&self) -> u64 {
        self.static_fields_size
    }
}

/// The synthetic root of the graph, whose outgoing references are the GC
/// roots
#[derive(Clone, Debug, Default)]
pub struct SuperRoot {
    pub(crate) roots: Vec<InstanceId>,
}

/// What a placeholder looks like, copied from its real counterpart so that
/// it can be keyed and displayed without access to the other snapshot
#[derive(Clone, PartialEq, Eq, Debug)]
pub enum PlaceHolderShape {
    Instance,
    Array { elem_type: Type, length: usize },
    ClassObj { name: String },
}

#[derive(Clone, Debug)]
pub struct PlaceHolder {
    pub(crate) class_name: String,
    pub(crate) string_value: Option<String>,
    pub(crate) shape: PlaceHolderShape,
    pub(crate) display: String,
}

impl PlaceHolder {
    pub fn shape(&self) -> &PlaceHolderShape {
        &self.shape
    }
}

#[derive(Clone, Debug)]
pub enum InstanceKind {
    ClassInstance(ClassInstance),
    Array(ArrayInstance),
    ClassObj(ClassObj),
    SuperRoot(SuperRoot),
    PlaceHolder(PlaceHolder),
}

/// Label of the field through which one instance refers to another
#[derive(Clone, PartialEq, Eq, Debug)]
pub enum RefLabel {
    Empty,
    Field(Arc<str>),
    Index(usize),
    Root(usize),
}

impl fmt::Display for RefLabel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RefLabel::Empty => Ok(()),
            RefLabel::Field(name) => write!(f, ".{}", name),
            RefLabel::Index(i) => write!(f, "[{}]", i),
            RefLabel::Root(i) => write!(f, ".roots[{}]", i),
        }
    }
}

/// An edge of the heap graph. Not stored, regenerated on demand.
#[derive(Clone, PartialEq, Eq, Debug)]
pub struct Reference {
    pub src: InstanceId,
    pub label: RefLabel,
    pub dst: InstanceId,
    pub strong: bool,
}

/// A node of the heap graph.
///
/// Topology is fixed once the snapshot is built. The preparation passes
/// only fill in the reachability, dominator and retained size annotations.
#[derive(Clone, Debug)]
pub struct Instance {
    pub(crate) id: u64,
    pub(crate) heap: Option<HeapId>,
    pub(crate) class_obj: Option<InstanceId>,
    pub(crate) site: Option<SiteId>,
    pub(crate) root_types: u32,
    pub(crate) registered_native_size: u64,

    pub(crate) next_to_gc_root: Option<(InstanceId, RefLabel)>,
    pub(crate) hard_reverse_refs: Option<Vec<InstanceId>>,
    pub(crate) soft_reverse_refs: Option<Vec<InstanceId>>,

    pub(crate) immediate_dominator: Option<InstanceId>,
    pub(crate) dominated: Vec<InstanceId>,
    pub(crate) retained_sizes: Option<HeapSizes>,

    pub(crate) baseline: InstanceId,
    pub(crate) kind: InstanceKind,
}

impl Instance {
    pub(crate) fn new(
        id: u64,
        index: usize,
        heap: Option<HeapId>,
        class_obj: Option<InstanceId>,
        site: Option<SiteId>,
        kind: InstanceKind,
    ) -> Instance {
        Instance {
            id,
            heap,
            class_obj,
            site,
            root_types: 0,
            registered_native_size: 0,
            next_to_gc_root: None,
            hard_reverse_refs: None,
            soft_reverse_refs: None,
            immediate_dominator: None,
            dominated: vec![],
            retained_sizes: None,
            baseline: InstanceId::from_index(index),
            kind,
        }
    }

    /// The id of this instance in the heap dump
    pub fn id(&self) -> u64 {
        self.id
    }

    /// The heap this instance was allocated on. `None` only for the super
    /// root.
    pub fn heap(&self) -> Option<HeapId> {
        self.heap
    }

    pub fn class_obj(&self) -> Option<InstanceId> {
        self.class_obj
    }

    pub fn site(&self) -> Option<SiteId> {
        self.site
    }

    pub fn kind(&self) -> &InstanceKind {
        &self.kind
    }

    pub fn is_root(&self) -> bool {
        self.root_types != 0
    }

    pub(crate) fn add_root_type(&mut self, ty: RootType) {
        self.root_types |= ty.mask();
    }

    /// The root types of this instance, or `None` if it is not a GC root
    pub fn root_types(&self) -> Option<Vec<RootType>> {
        if !self.is_root() {
            return None;
        }
        Some(
            RootType::ALL
                .iter()
                .copied()
                .filter(|ty| self.root_types & ty.mask() != 0)
                .collect(),
        )
    }

    pub fn registered_native_size(&self) -> u64 {
        self.registered_native_size
    }

    pub(crate) fn add_registered_native_size(&mut self, size: u64) {
        self.registered_native_size += size;
    }

    /// Bytes taken by this object beyond the instance size of its class
    pub(crate) fn extra_java_size(&self) -> u64 {
        match &self.kind {
            InstanceKind::Array(array) => array.elem_type().size() * array.len() as u64,
            InstanceKind::ClassObj(class) => class.static_fields_size,
            InstanceKind::ClassInstance(_)
            | InstanceKind::SuperRoot(_)
            | InstanceKind::PlaceHolder(_) => 0,
        }
    }

    /// Retained size on one heap. Zero before the dominator pass, for
    /// instances that are not strongly reachable, and for heaps this
    /// instance has no slot for.
    pub fn retained_size(&self, heap: HeapId) -> Size {
        self.retained_sizes
            .as_ref()
            .and_then(|sizes| sizes.get(heap.index()).copied())
            .unwrap_or(Size::ZERO)
    }

    pub fn total_retained_size(&self) -> Size {
        self.retained_sizes
            .iter()
            .flatten()
            .fold(Size::ZERO, |acc, s| acc + *s)
    }

    pub fn is_strongly_reachable(&self) -> bool {
        self.immediate_dominator.is_some()
    }

    /// Reachable only through soft, weak, phantom or finalizer references
    pub fn is_weakly_reachable(&self) -> bool {
        !self.is_strongly_reachable() && self.next_to_gc_root.is_some()
    }

    pub fn is_unreachable(&self) -> bool {
        !self.is_strongly_reachable() && !self.is_weakly_reachable()
    }

    pub fn immediate_dominator(&self) -> Option<InstanceId> {
        self.immediate_dominator
    }

    /// Instances immediately dominated by this one
    pub fn dominated(&self) -> &[InstanceId] {
        &self.dominated
    }

    pub fn next_to_gc_root(&self) -> Option<&(InstanceId, RefLabel)> {
        self.next_to_gc_root.as_ref()
    }

    /// Instances with a strong reference to this one
    pub fn hard_reverse_references(&self) -> &[InstanceId] {
        self.hard_reverse_refs.as_deref().unwrap_or(&[])
    }

    /// Instances with a soft, weak, phantom or finalizer reference to this
    /// one
    pub fn soft_reverse_references(&self) -> &[InstanceId] {
        self.soft_reverse_refs.as_deref().unwrap_or(&[])
    }

    pub fn is_class_obj(&self) -> bool {
        matches!(
            self.kind,
            InstanceKind::ClassObj(_)
                | InstanceKind::PlaceHolder(PlaceHolder {
                    shape: PlaceHolderShape::ClassObj { .. },
                    ..
                })
        )
    }

    pub fn as_class_obj(&self) -> Option<&ClassObj> {
        match &self.kind {
            InstanceKind::ClassObj(class) => Some(class),
            _ => None,
        }
    }

    pub fn as_array(&self) -> Option<&ArrayInstance> {
        match &self.kind {
            InstanceKind::Array(array) => Some(array),
            _ => None,
        }
    }

    pub fn is_array_instance(&self) -> bool {
        self.array_length().is_some()
    }

    /// Length of this array, including arrays stood in for by a
    /// placeholder
    pub fn array_length(&self) -> Option<usize> {
        match &self.kind {
            InstanceKind::Array(array) => Some(array.len()),
            InstanceKind::PlaceHolder(PlaceHolder {
                shape: PlaceHolderShape::Array { length, .. },
                ..
            }) => Some(*length),
            _ => None,
        }
    }

    pub fn is_class_instance(&self) -> bool {
        matches!(self.kind, InstanceKind::ClassInstance(_))
    }

    pub fn is_super_root(&self) -> bool {
        matches!(self.kind, InstanceKind::SuperRoot(_))
    }

    pub fn as_placeholder(&self) -> Option<&PlaceHolder> {
        match &self.kind {
            InstanceKind::PlaceHolder(p) => Some(p),
            _ => None,
        }
    }
}

impl Diffable for Instance {
    type Id = InstanceId;

    fn baseline(&self) -> InstanceId {
        self.baseline
    }

    fn is_placeholder(&self) -> bool {
        matches!(self.kind, InstanceKind::PlaceHolder(_))
    }
}
