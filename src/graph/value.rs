use std::fmt;
use std::sync::Arc;

use super::InstanceId;
use crate::constants::ID_SIZE;

/// Types of fields and array elements found in a heap dump
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub enum Type {
    Object,
    Boolean,
    Char,
    Float,
    Double,
    Byte,
    Short,
    Int,
    Long,
}

impl Type {
    /// Number of bytes a value of this type occupies in the heap
    pub fn size(self) -> u64 {
        match self {
            Type::Object => ID_SIZE,
            Type::Boolean | Type::Byte => 1,
            Type::Char | Type::Short => 2,
            Type::Float | Type::Int => 4,
            Type::Double | Type::Long => 8,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Type::Object => "Object",
            Type::Boolean => "boolean",
            Type::Char => "char",
            Type::Float => "float",
            Type::Double => "double",
            Type::Byte => "byte",
            Type::Short => "short",
            Type::Int => "int",
            Type::Long => "long",
        }
    }
}

/// A field or array element value.
///
/// `R` is how object references are written down. The decoder side uses raw
/// dump ids (`Value<u64>`); inside a snapshot references are arena ids.
#[derive(Clone, Copy, PartialEq, Debug)]
pub enum Value<R = InstanceId> {
    Object(Option<R>),
    Boolean(bool),
    Char(u16),
    Float(f32),
    Double(f64),
    Byte(i8),
    Short(i16),
    Int(i32),
    Long(i64),
}

impl<R: Copy> Value<R> {
    pub fn ty(&self) -> Type {
        match self {
            Value::Object(_) => Type::Object,
            Value::Boolean(_) => Type::Boolean,
            Value::Char(_) => Type::Char,
            Value::Float(_) => Type::Float,
            Value::Double(_) => Type::Double,
            Value::Byte(_) => Type::Byte,
            Value::Short(_) => Type::Short,
            Value::Int(_) => Type::Int,
            Value::Long(_) => Type::Long,
        }
    }

    /// The referenced instance, if this is a non-null object value
    pub fn as_instance(&self) -> Option<R> {
        match self {
            Value::Object(r) => *r,
            _ => None,
        }
    }

    pub fn as_int(&self) -> Option<i32> {
        match self {
            Value::Int(x) => Some(*x),
            _ => None,
        }
    }

    pub fn as_long(&self) -> Option<i64> {
        match self {
            Value::Long(x) => Some(*x),
            _ => None,
        }
    }

    /// Rewrite the object reference, keeping primitives as they are
    pub fn map_ref<S, F>(self, mut f: F) -> Value<S>
    where
        F: FnMut(R) -> Option<S>,
    {
        match self {
            Value::Object(r) => Value::Object(r.and_then(&mut f)),
            Value::Boolean(x) => Value::Boolean(x),
            Value::Char(x) => Value::Char(x),
            Value::Float(x) => Value::Float(x),
            Value::Double(x) => Value::Double(x),
            Value::Byte(x) => Value::Byte(x),
            Value::Short(x) => Value::Short(x),
            Value::Int(x) => Value::Int(x),
            Value::Long(x) => Value::Long(x),
        }
    }
}

impl<R: fmt::Debug> fmt::Display for Value<R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Object(None) => write!(f, "null"),
            Value::Object(Some(r)) => write!(f, "{:?}", r),
            Value::Boolean(x) => write!(f, "{}", x),
            Value::Char(x) => match char::from_u32(*x as u32) {
                Some(c) => write!(f, "'{}'", c),
                None => write!(f, "'\\u{:04x}'", x),
            },
            Value::Float(x) => write!(f, "{}", x),
            Value::Double(x) => write!(f, "{}", x),
            Value::Byte(x) => write!(f, "{}", x),
            Value::Short(x) => write!(f, "{}", x),
            Value::Int(x) => write!(f, "{}", x),
            Value::Long(x) => write!(f, "{}", x),
        }
    }
}

/// A declared instance field
#[derive(Clone, PartialEq, Eq, Debug)]
pub struct Field {
    pub name: Arc<str>,
    pub ty: Type,
}

impl Field {
    pub fn new(name: &str, ty: Type) -> Field {
        Field {
            name: Arc::from(name),
            ty,
        }
    }
}

/// A named field together with its value
#[derive(Clone, PartialEq, Debug)]
pub struct FieldValue<R = InstanceId> {
    pub name: Arc<str>,
    pub ty: Type,
    pub value: Value<R>,
}

impl<R: Copy> FieldValue<R> {
    pub fn new(name: &str, value: Value<R>) -> FieldValue<R> {
        FieldValue {
            name: Arc::from(name),
            ty: value.ty(),
            value,
        }
    }
}
