//! The heap dump container: protobuf messages describing the heaps,
//! classes, instances, arrays, roots and allocation stacks of a dump, read
//! from `.binpb` files, optionally zstd compressed (`.binpb.zst`).
//!
//! Values and array elements travel as raw 64 bit patterns tagged with
//! their type. Object references are dump ids, 0 being null.

use std::fs::File;
use std::io::Read;
use std::path::Path;

use anyhow::Result;
use prost::Message;

use crate::error::HeapGraphError;
use crate::graph::{ArrayValues, Field, FieldValue, RootType, SiteId, Type, Value};
use crate::site::Frame;
use crate::snapshot::{ClassObjData, Snapshot, SnapshotBuilder};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, ::prost::Enumeration)]
#[repr(i32)]
pub enum ValueType {
    Object = 0,
    Boolean = 1,
    Char = 2,
    Float = 3,
    Double = 4,
    Byte = 5,
    Short = 6,
    Int = 7,
    Long = 8,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, ::prost::Enumeration)]
#[repr(i32)]
pub enum RootKind {
    JniGlobal = 0,
    JniLocal = 1,
    JavaFrame = 2,
    NativeStack = 3,
    StickyClass = 4,
    ThreadBlock = 5,
    Monitor = 6,
    Thread = 7,
    InternedString = 8,
    Debugger = 9,
    VmInternal = 10,
    Unknown = 11,
    JniMonitor = 12,
    Finalizing = 13,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct StackFrame {
    #[prost(string, tag = "1")]
    pub method: String,
    #[prost(string, tag = "2")]
    pub signature: String,
    #[prost(string, tag = "3")]
    pub filename: String,
    #[prost(int32, tag = "4")]
    pub line: i32,
}

/// Indices into [`HeapDump::frames`], inner-most frame first
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct StackTrace {
    #[prost(uint32, repeated, tag = "1")]
    pub frames: Vec<u32>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct ValueRecord {
    #[prost(enumeration = "ValueType", tag = "1")]
    pub ty: i32,
    #[prost(uint64, tag = "2")]
    pub bits: u64,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct FieldRecord {
    #[prost(string, tag = "1")]
    pub name: String,
    #[prost(enumeration = "ValueType", tag = "2")]
    pub ty: i32,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct StaticFieldRecord {
    #[prost(string, tag = "1")]
    pub name: String,
    #[prost(message, optional, tag = "2")]
    pub value: Option<ValueRecord>,
}

/// `stack` is 0 for objects without an allocation stack, otherwise one
/// more than the index into [`HeapDump::stacks`]
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct ClassRecord {
    #[prost(uint64, tag = "1")]
    pub id: u64,
    #[prost(uint32, tag = "2")]
    pub heap: u32,
    #[prost(uint32, tag = "3")]
    pub stack: u32,
    #[prost(uint64, tag = "4")]
    pub class_id: u64,
    #[prost(string, tag = "5")]
    pub name: String,
    #[prost(uint64, tag = "6")]
    pub super_class_id: u64,
    #[prost(uint64, tag = "7")]
    pub class_loader_id: u64,
    #[prost(uint64, tag = "8")]
    pub instance_size: u64,
    #[prost(message, repeated, tag = "9")]
    pub fields: Vec<FieldRecord>,
    #[prost(message, repeated, tag = "10")]
    pub static_fields: Vec<StaticFieldRecord>,
    #[prost(uint64, tag = "11")]
    pub static_fields_size: u64,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct InstanceRecord {
    #[prost(uint64, tag = "1")]
    pub id: u64,
    #[prost(uint32, tag = "2")]
    pub heap: u32,
    #[prost(uint32, tag = "3")]
    pub stack: u32,
    #[prost(uint64, tag = "4")]
    pub class_id: u64,
    #[prost(message, repeated, tag = "5")]
    pub values: Vec<ValueRecord>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct ArrayRecord {
    #[prost(uint64, tag = "1")]
    pub id: u64,
    #[prost(uint32, tag = "2")]
    pub heap: u32,
    #[prost(uint32, tag = "3")]
    pub stack: u32,
    #[prost(uint64, tag = "4")]
    pub class_id: u64,
    #[prost(enumeration = "ValueType", tag = "5")]
    pub elem_type: i32,
    #[prost(uint64, repeated, tag = "6")]
    pub elements: Vec<u64>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct RootRecord {
    #[prost(uint64, tag = "1")]
    pub id: u64,
    #[prost(enumeration = "RootKind", tag = "2")]
    pub kind: i32,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct HeapDump {
    #[prost(string, repeated, tag = "1")]
    pub heaps: Vec<String>,
    #[prost(message, repeated, tag = "2")]
    pub frames: Vec<StackFrame>,
    #[prost(message, repeated, tag = "3")]
    pub stacks: Vec<StackTrace>,
    #[prost(message, repeated, tag = "4")]
    pub classes: Vec<ClassRecord>,
    #[prost(message, repeated, tag = "5")]
    pub instances: Vec<InstanceRecord>,
    #[prost(message, repeated, tag = "6")]
    pub arrays: Vec<ArrayRecord>,
    #[prost(message, repeated, tag = "7")]
    pub roots: Vec<RootRecord>,
}

impl From<ValueType> for Type {
    fn from(ty: ValueType) -> Type {
        match ty {
            ValueType::Object => Type::Object,
            ValueType::Boolean => Type::Boolean,
            ValueType::Char => Type::Char,
            ValueType::Float => Type::Float,
            ValueType::Double => Type::Double,
            ValueType::Byte => Type::Byte,
            ValueType::Short => Type::Short,
            ValueType::Int => Type::Int,
            ValueType::Long => Type::Long,
        }
    }
}

impl From<Type> for ValueType {
    fn from(ty: Type) -> ValueType {
        match ty {
            Type::Object => ValueType::Object,
            Type::Boolean => ValueType::Boolean,
            Type::Char => ValueType::Char,
            Type::Float => ValueType::Float,
            Type::Double => ValueType::Double,
            Type::Byte => ValueType::Byte,
            Type::Short => ValueType::Short,
            Type::Int => ValueType::Int,
            Type::Long => ValueType::Long,
        }
    }
}

impl From<RootKind> for RootType {
    fn from(kind: RootKind) -> RootType {
        RootType::ALL[kind as usize]
    }
}

fn value_type(ty: i32) -> std::result::Result<Type, HeapGraphError> {
    ValueType::from_i32(ty)
        .map(Type::from)
        .ok_or_else(|| HeapGraphError::Format(format!("Unknown value type {}", ty)))
}

fn decode_value(ty: Type, bits: u64) -> Value<u64> {
    match ty {
        Type::Object => Value::Object(non_null(bits)),
        Type::Boolean => Value::Boolean(bits != 0),
        Type::Char => Value::Char(bits as u16),
        Type::Float => Value::Float(f32::from_bits(bits as u32)),
        Type::Double => Value::Double(f64::from_bits(bits)),
        Type::Byte => Value::Byte(bits as i8),
        Type::Short => Value::Short(bits as i16),
        Type::Int => Value::Int(bits as i32),
        Type::Long => Value::Long(bits as i64),
    }
}

fn encode_value(value: Value<u64>) -> u64 {
    match value {
        Value::Object(r) => r.unwrap_or(0),
        Value::Boolean(x) => x as u64,
        Value::Char(x) => x as u64,
        Value::Float(x) => x.to_bits() as u64,
        Value::Double(x) => x.to_bits(),
        Value::Byte(x) => x as u8 as u64,
        Value::Short(x) => x as u16 as u64,
        Value::Int(x) => x as u32 as u64,
        Value::Long(x) => x as u64,
    }
}

impl ValueRecord {
    fn decode(&self) -> std::result::Result<Value<u64>, HeapGraphError> {
        Ok(decode_value(value_type(self.ty)?, self.bits))
    }
}

impl From<Value<u64>> for ValueRecord {
    fn from(value: Value<u64>) -> ValueRecord {
        ValueRecord {
            ty: ValueType::from(value.ty()) as i32,
            bits: encode_value(value),
        }
    }
}

impl ArrayRecord {
    fn decode(&self) -> std::result::Result<ArrayValues<u64>, HeapGraphError> {
        let ty = value_type(self.elem_type)?;
        Ok(match ty {
            Type::Object => ArrayValues::Objects(
                self.elements
                    .iter()
                    .map(|bits| non_null(*bits))
                    .collect(),
            ),
            Type::Char => ArrayValues::Chars(self.elements.iter().map(|bits| *bits as u16).collect()),
            Type::Byte => ArrayValues::Bytes(self.elements.iter().map(|bits| *bits as i8).collect()),
            _ => ArrayValues::Primitives(
                ty,
                self.elements
                    .iter()
                    .map(|bits| decode_value(ty, *bits))
                    .collect(),
            ),
        })
    }
}

fn non_null(id: u64) -> Option<u64> {
    if id == 0 {
        None
    } else {
        Some(id)
    }
}

impl HeapDump {
    pub fn from_binpb_zst(p: impl AsRef<Path>) -> Result<HeapDump> {
        let file = File::open(p)?;
        let mut reader = zstd::Decoder::new(file)?;
        let mut buf = vec![];
        reader.read_to_end(&mut buf)?;
        Ok(HeapDump::decode(buf.as_slice())?)
    }

    pub fn from_binpb(p: impl AsRef<Path>) -> Result<HeapDump> {
        let buf = std::fs::read(p)?;
        Ok(HeapDump::decode(buf.as_slice())?)
    }

    /// Read a heap dump, decompressing it if the file name ends in `.zst`
    pub fn from_path(p: impl AsRef<Path>) -> Result<HeapDump> {
        let p = p.as_ref();
        if p.extension().map_or(false, |ext| ext == "zst") {
            HeapDump::from_binpb_zst(p)
        } else {
            HeapDump::from_binpb(p)
        }
    }

    /// Feed the dump into a [`SnapshotBuilder`] and build the snapshot
    pub fn into_snapshot(self) -> crate::error::Result<Snapshot> {
        let mut builder = SnapshotBuilder::new();
        let heaps: Vec<_> = self.heaps.iter().map(|name| builder.add_heap(name)).collect();
        let heap = |index: u32, id: u64| {
            heaps.get(index as usize).copied().ok_or_else(|| {
                HeapGraphError::Format(format!("Instance 0x{:x} is on unknown heap {}", id, index))
            })
        };

        let frames: Vec<Frame> = self
            .frames
            .iter()
            .map(|f| Frame::new(&f.method, &f.signature, &f.filename, f.line))
            .collect();
        let mut sites: Vec<SiteId> = vec![builder.root_site()];
        for stack in &self.stacks {
            let trace = stack
                .frames
                .iter()
                .map(|i| {
                    frames
                        .get(*i as usize)
                        .cloned()
                        .ok_or_else(|| HeapGraphError::Format(format!("Unknown stack frame {}", i)))
                })
                .collect::<std::result::Result<Vec<_>, _>>()?;
            sites.push(builder.site(&trace));
        }
        let site = |stack: u32, id: u64| {
            sites.get(stack as usize).copied().ok_or_else(|| {
                HeapGraphError::Format(format!("Instance 0x{:x} has unknown stack {}", id, stack))
            })
        };

        info!(
            "Decoding {} classes, {} instances, {} arrays and {} roots",
            self.classes.len(),
            self.instances.len(),
            self.arrays.len(),
            self.roots.len()
        );
        for class in self.classes {
            let instance_fields = class
                .fields
                .iter()
                .map(|f| -> std::result::Result<Field, HeapGraphError> {
                    Ok(Field::new(&f.name, value_type(f.ty)?))
                })
                .collect::<std::result::Result<Vec<_>, _>>()?;
            let static_fields = class
                .static_fields
                .iter()
                .map(|f| -> std::result::Result<FieldValue<u64>, HeapGraphError> {
                    let value = match &f.value {
                        Some(v) => v.decode()?,
                        None => Value::Object(None),
                    };
                    Ok(FieldValue::new(&f.name, value))
                })
                .collect::<std::result::Result<Vec<_>, _>>()?;
            builder.add_class_obj(
                class.id,
                heap(class.heap, class.id)?,
                site(class.stack, class.id)?,
                non_null(class.class_id),
                ClassObjData {
                    name: class.name,
                    super_class: non_null(class.super_class_id),
                    class_loader: non_null(class.class_loader_id),
                    instance_size: class.instance_size,
                    instance_fields,
                    static_fields,
                    static_fields_size: class.static_fields_size,
                },
            );
        }
        for inst in &self.instances {
            let values = inst
                .values
                .iter()
                .map(|v| v.decode())
                .collect::<std::result::Result<Vec<_>, _>>()?;
            builder.add_class_instance(
                inst.id,
                heap(inst.heap, inst.id)?,
                site(inst.stack, inst.id)?,
                inst.class_id,
                values,
            );
        }
        for array in &self.arrays {
            builder.add_array(
                array.id,
                heap(array.heap, array.id)?,
                site(array.stack, array.id)?,
                array.class_id,
                array.decode()?,
            );
        }
        for root in &self.roots {
            let kind = RootKind::from_i32(root.kind)
                .ok_or_else(|| HeapGraphError::Format(format!("Unknown root kind {}", root.kind)))?;
            builder.add_root(root.id, kind.into());
        }
        builder.build()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> HeapDump {
        let class = |id: u64, name: &str, fields: Vec<FieldRecord>| ClassRecord {
            id,
            heap: 0,
            stack: 0,
            class_id: 0x10,
            name: name.to_string(),
            super_class_id: 0,
            class_loader_id: 0,
            instance_size: if fields.is_empty() { 0 } else { 16 },
            fields,
            static_fields: vec![],
            static_fields_size: 0,
        };
        let mut class_class = class(0x10, "java.lang.Class", vec![]);
        class_class.static_fields = vec![StaticFieldRecord {
            name: "cache".to_string(),
            value: Some(Value::Object(Some(0x40)).into()),
        }];
        class_class.static_fields_size = 4;
        HeapDump {
            heaps: vec!["app".to_string(), "zygote".to_string()],
            frames: vec![
                StackFrame {
                    method: "alloc".to_string(),
                    signature: "()V".to_string(),
                    filename: "Foo.java".to_string(),
                    line: 12,
                },
                StackFrame {
                    method: "main".to_string(),
                    signature: "()V".to_string(),
                    filename: "Foo.java".to_string(),
                    line: 3,
                },
            ],
            stacks: vec![StackTrace { frames: vec![0, 1] }],
            classes: vec![
                class_class,
                class(
                    0x20,
                    "Foo",
                    vec![
                        FieldRecord {
                            name: "count".to_string(),
                            ty: ValueType::Int as i32,
                        },
                        FieldRecord {
                            name: "data".to_string(),
                            ty: ValueType::Object as i32,
                        },
                    ],
                ),
                class(0x30, "long[]", vec![]),
            ],
            instances: vec![InstanceRecord {
                id: 0x40,
                heap: 1,
                stack: 1,
                class_id: 0x20,
                values: vec![Value::Int(-7).into(), Value::Object(Some(0x50)).into()],
            }],
            arrays: vec![ArrayRecord {
                id: 0x50,
                heap: 1,
                stack: 1,
                class_id: 0x30,
                elem_type: ValueType::Long as i32,
                elements: vec![1, u64::MAX],
            }],
            roots: vec![RootRecord {
                id: 0x10,
                kind: RootKind::StickyClass as i32,
            }],
        }
    }

    #[test]
    fn test_round_trip_through_zstd() {
        let buf = sample().encode_to_vec();
        let compressed = zstd::encode_all(buf.as_slice(), 3).unwrap();
        let decompressed = zstd::decode_all(compressed.as_slice()).unwrap();
        let dump = HeapDump::decode(decompressed.as_slice()).unwrap();
        assert_eq!(dump, sample());
    }

    #[test]
    fn test_into_snapshot() {
        let snapshot = sample().into_snapshot().unwrap();
        let foo = snapshot.find_instance(0x40).unwrap();
        assert_eq!(snapshot.field(foo, "count"), Some(Value::Int(-7)));
        let data = snapshot.ref_field(foo, "data").unwrap();
        let array = snapshot.instance(data).as_array().unwrap();
        assert_eq!(array.value(1), Some(Value::Long(-1)));

        // Reachable through the static field of java.lang.Class
        assert!(snapshot.instance(foo).is_strongly_reachable());
        let zygote = snapshot.heap_by_name("zygote").unwrap();
        assert_eq!(snapshot.instance(foo).heap(), Some(zygote));
        assert_eq!(snapshot.size(data).java_size(), 2 * 8);
        assert_eq!(snapshot.heap(zygote).size().java_size(), 16 + 16);

        let site = snapshot.instance(foo).site().unwrap();
        assert_eq!(snapshot.site(site).method_name(), "alloc");
        let parent = snapshot.site(site).parent().unwrap();
        assert_eq!(snapshot.site(parent).method_name(), "main");
        assert_eq!(
            snapshot.instance(snapshot.find_instance(0x10).unwrap()).root_types(),
            Some(vec![RootType::StickyClass])
        );
    }

    #[test]
    fn test_unknown_value_type_is_rejected() {
        let mut dump = sample();
        dump.instances[0].values[0].ty = 42;
        assert!(matches!(dump.into_snapshot(), Err(HeapGraphError::Format(_))));
    }

    #[test]
    fn test_from_path() {
        let dir = std::env::temp_dir();
        let plain = dir.join(format!("heapsnap-test-{}.binpb", std::process::id()));
        let compressed = dir.join(format!("heapsnap-test-{}.binpb.zst", std::process::id()));
        let buf = sample().encode_to_vec();
        std::fs::write(&plain, &buf).unwrap();
        std::fs::write(&compressed, zstd::encode_all(buf.as_slice(), 3).unwrap()).unwrap();
        assert_eq!(HeapDump::from_path(&plain).unwrap(), sample());
        assert_eq!(HeapDump::from_path(&compressed).unwrap(), sample());
        std::fs::remove_file(plain).unwrap();
        std::fs::remove_file(compressed).unwrap();
    }
}
