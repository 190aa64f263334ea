//! Remote property values and the generic type marshaler.
//!
//! A [`Value`] is what arrives from the bus. A [`Field`] is the local,
//! typed storage a consumer reads from. Marshaling converts one into the
//! other, or fails with [`MarshalError::TypeMismatch`] without touching the
//! field.
//!
//! # Null object paths
//!
//! The object path `"/"` is the wire encoding of "no object". Marshaling it
//! into a `String` field stores an empty string, into an `Option<String>`
//! field stores `None`, and array marshaling drops it.

use std::cell::{Ref, RefCell};
use std::collections::HashMap;
use std::fmt;
use std::rc::Rc;

use crate::error::MarshalError;

/// The object path that stands for a null reference.
pub const NULL_OBJECT_PATH: &str = "/";

/// Property name to value mapping, as carried by GetAll replies and
/// change events.
pub type PropertyMap = HashMap<String, Value>;

/// A remote property value.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    /// Boolean
    Bool(bool),
    /// Signed 8-bit integer
    I8(i8),
    /// Unsigned 8-bit integer (D-Bus byte)
    U8(u8),
    /// Signed 16-bit integer
    I16(i16),
    /// Unsigned 16-bit integer
    U16(u16),
    /// Signed 32-bit integer
    I32(i32),
    /// Unsigned 32-bit integer
    U32(u32),
    /// Signed 64-bit integer
    I64(i64),
    /// Unsigned 64-bit integer
    U64(u64),
    /// Double precision float
    F64(f64),
    /// UTF-8 string
    Str(String),
    /// Object path
    ObjectPath(String),
    /// Homogeneous array
    Array(Vec<Value>),
}

impl Value {
    /// Creates an object path value.
    pub fn object_path(path: impl Into<String>) -> Self {
        Value::ObjectPath(path.into())
    }

    /// Creates the null object path value.
    pub fn null_object_path() -> Self {
        Value::ObjectPath(NULL_OBJECT_PATH.to_string())
    }

    /// Returns true for the `"/"` object path.
    pub fn is_null_object_path(&self) -> bool {
        matches!(self, Value::ObjectPath(path) if path == NULL_OBJECT_PATH)
    }

    /// Returns the runtime type name, as used in diagnostics.
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Bool(_) => "boolean",
            Value::I8(_) => "int8",
            Value::U8(_) => "uint8",
            Value::I16(_) => "int16",
            Value::U16(_) => "uint16",
            Value::I32(_) => "int32",
            Value::U32(_) => "uint32",
            Value::I64(_) => "int64",
            Value::U64(_) => "uint64",
            Value::F64(_) => "double",
            Value::Str(_) => "string",
            Value::ObjectPath(_) => "object-path",
            Value::Array(_) => "array",
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Bool(v) => write!(f, "{}", v),
            Value::I8(v) => write!(f, "{}", v),
            Value::U8(v) => write!(f, "{}", v),
            Value::I16(v) => write!(f, "{}", v),
            Value::U16(v) => write!(f, "{}", v),
            Value::I32(v) => write!(f, "{}", v),
            Value::U32(v) => write!(f, "{}", v),
            Value::I64(v) => write!(f, "{}", v),
            Value::U64(v) => write!(f, "{}", v),
            Value::F64(v) => write!(f, "{}", v),
            Value::Str(v) => write!(f, "{:?}", v),
            Value::ObjectPath(v) => write!(f, "{}", v),
            Value::Array(items) => {
                write!(f, "[")?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}", item)?;
                }
                write!(f, "]")
            }
        }
    }
}

macro_rules! value_from {
    ($($ty:ty => $variant:ident),* $(,)?) => {
        $(
            impl From<$ty> for Value {
                fn from(v: $ty) -> Self {
                    Value::$variant(v)
                }
            }
        )*
    };
}

value_from! {
    bool => Bool,
    i8 => I8,
    u8 => U8,
    i16 => I16,
    u16 => U16,
    i32 => I32,
    u32 => U32,
    i64 => I64,
    u64 => U64,
    f64 => F64,
    String => Str,
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::Str(v.to_string())
    }
}

/// A local type that remote values can be marshaled into.
pub trait FieldType: Sized + 'static {
    /// Type name used in mismatch diagnostics.
    const TYPE_NAME: &'static str;

    /// Converts a remote value, or returns `None` on a type mismatch.
    fn from_value(value: &Value) -> Option<Self>;
}

macro_rules! scalar_field_type {
    ($($ty:ty => $variant:ident, $name:literal);* $(;)?) => {
        $(
            impl FieldType for $ty {
                const TYPE_NAME: &'static str = $name;

                fn from_value(value: &Value) -> Option<Self> {
                    match value {
                        Value::$variant(v) => Some(*v),
                        _ => None,
                    }
                }
            }
        )*
    };
}

scalar_field_type! {
    bool => Bool, "boolean";
    i8 => I8, "int8";
    u8 => U8, "uint8";
    i16 => I16, "int16";
    u16 => U16, "uint16";
    i32 => I32, "int32";
    u32 => U32, "uint32";
    i64 => I64, "int64";
    u64 => U64, "uint64";
    f64 => F64, "double";
}

impl FieldType for String {
    const TYPE_NAME: &'static str = "string";

    fn from_value(value: &Value) -> Option<Self> {
        match value {
            Value::Str(s) => Some(s.clone()),
            Value::ObjectPath(p) if p == NULL_OBJECT_PATH => Some(String::new()),
            Value::ObjectPath(p) => Some(p.clone()),
            _ => None,
        }
    }
}

impl FieldType for Option<String> {
    const TYPE_NAME: &'static str = "string";

    fn from_value(value: &Value) -> Option<Self> {
        match value {
            Value::Str(s) => Some(Some(s.clone())),
            Value::ObjectPath(p) if p == NULL_OBJECT_PATH => Some(None),
            Value::ObjectPath(p) => Some(Some(p.clone())),
            _ => None,
        }
    }
}

impl FieldType for Vec<String> {
    const TYPE_NAME: &'static str = "string-array";

    fn from_value(value: &Value) -> Option<Self> {
        let Value::Array(items) = value else {
            return None;
        };
        let mut out = Vec::with_capacity(items.len());
        for item in items {
            match item {
                Value::Str(s) => out.push(s.clone()),
                Value::ObjectPath(p) if p == NULL_OBJECT_PATH => {}
                Value::ObjectPath(p) => out.push(p.clone()),
                _ => return None,
            }
        }
        Some(out)
    }
}

/// Shared, typed storage for one mirrored property.
///
/// The consumer keeps one handle and reads it; the property registry keeps
/// another and writes through it when the remote value changes.
pub struct Field<T>(Rc<RefCell<T>>);

impl<T> Field<T> {
    /// Creates a field holding `value`.
    pub fn new(value: T) -> Self {
        Self(Rc::new(RefCell::new(value)))
    }

    /// Borrows the current value.
    ///
    /// Do not hold the borrow across an `.await`: updates arriving while it
    /// is held are rejected.
    pub fn borrow(&self) -> Ref<'_, T> {
        self.0.borrow()
    }

    /// Replaces the value, returning the previous one.
    pub fn replace(&self, value: T) -> T {
        self.0.replace(value)
    }
}

impl<T: Clone> Field<T> {
    /// Returns a copy of the current value.
    pub fn get(&self) -> T {
        self.0.borrow().clone()
    }
}

impl<T> Clone for Field<T> {
    fn clone(&self) -> Self {
        Self(Rc::clone(&self.0))
    }
}

impl<T: Default> Default for Field<T> {
    fn default() -> Self {
        Self::new(T::default())
    }
}

impl<T: fmt::Debug> fmt::Debug for Field<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.0.try_borrow() {
            Ok(value) => f.debug_tuple("Field").field(&*value).finish(),
            Err(_) => f.write_str("Field(<borrowed>)"),
        }
    }
}

/// Type-erased write access to a [`Field`].
pub trait FieldSlot {
    /// Type name of the stored value.
    fn type_name(&self) -> &'static str;

    /// Converts `value` and stores it, dropping the previous value.
    ///
    /// On error the field is left unchanged.
    fn assign(&self, value: &Value) -> Result<(), MarshalError>;
}

impl<T: FieldType> FieldSlot for Field<T> {
    fn type_name(&self) -> &'static str {
        T::TYPE_NAME
    }

    fn assign(&self, value: &Value) -> Result<(), MarshalError> {
        let converted = T::from_value(value)
            .ok_or_else(|| MarshalError::type_mismatch(T::TYPE_NAME, value.type_name()))?;
        let mut slot = self.0.try_borrow_mut().map_err(|_| MarshalError::FieldBusy {
            expected: T::TYPE_NAME,
        })?;
        *slot = converted;
        Ok(())
    }
}

/// Converts a remote value into a field.
pub type MarshalFn = fn(&Value, &dyn FieldSlot) -> Result<(), MarshalError>;

/// The default marshaler: strict type match, null object paths clear.
pub fn marshal_generic(value: &Value, field: &dyn FieldSlot) -> Result<(), MarshalError> {
    field.assign(value)
}

/// Marshaler for `ao` properties such as a team's port list.
///
/// Accepts only arrays of object paths; `"/"` entries are dropped.
pub fn marshal_object_path_array(
    value: &Value,
    field: &dyn FieldSlot,
) -> Result<(), MarshalError> {
    match value {
        Value::Array(items) if items.iter().all(|v| matches!(v, Value::ObjectPath(_))) => {
            field.assign(value)
        }
        Value::Array(_) => Err(MarshalError::type_mismatch(
            "object-path-array",
            "array",
        )),
        other => Err(MarshalError::type_mismatch(
            "object-path-array",
            other.type_name(),
        )),
    }
}
