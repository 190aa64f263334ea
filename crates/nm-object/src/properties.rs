//! Property registries.
//!
//! A consumer describes the properties it mirrors for one remote interface
//! as a list of [`PropertyInfo`]. The mirror turns each list into a
//! [`PropertyTable`] keyed by local property name.

use std::collections::HashMap;
use std::fmt;
use std::rc::Rc;

use tracing::warn;

use crate::value::{marshal_generic, Field, FieldSlot, FieldType, MarshalFn};

/// Registration entry for one property.
#[derive(Clone)]
pub struct PropertyInfo {
    /// Local property name (see [`crate::canonical_name`]).
    pub name: String,
    /// Custom marshal function; `None` selects [`marshal_generic`].
    pub marshal: Option<MarshalFn>,
    /// Storage the property is mirrored into; `None` marks a property the
    /// object knows about but does not track.
    pub field: Option<Rc<dyn FieldSlot>>,
}

impl PropertyInfo {
    /// Mirrors `name` into `field` with the generic marshaler.
    pub fn new<T: FieldType>(name: impl Into<String>, field: &Field<T>) -> Self {
        Self {
            name: name.into(),
            marshal: None,
            field: Some(Rc::new(field.clone())),
        }
    }

    /// Mirrors `name` into `field` with a custom marshal function.
    pub fn with_marshal<T: FieldType>(
        name: impl Into<String>,
        marshal: MarshalFn,
        field: &Field<T>,
    ) -> Self {
        Self {
            name: name.into(),
            marshal: Some(marshal),
            field: Some(Rc::new(field.clone())),
        }
    }

    /// Acknowledges `name` without mirroring it.
    pub fn ignored(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            marshal: None,
            field: None,
        }
    }
}

impl fmt::Debug for PropertyInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PropertyInfo")
            .field("name", &self.name)
            .field("custom_marshal", &self.marshal.is_some())
            .field("field", &self.field.as_ref().map(|slot| slot.type_name()))
            .finish()
    }
}

/// Resolved registry entry.
#[derive(Clone)]
pub(crate) struct PropertyEntry {
    pub(crate) marshal: MarshalFn,
    pub(crate) field: Option<Rc<dyn FieldSlot>>,
}

/// Properties registered for one remote interface.
#[derive(Clone, Default)]
pub(crate) struct PropertyTable {
    entries: HashMap<String, PropertyEntry>,
}

impl PropertyTable {
    /// Builds a table, skipping malformed entries.
    ///
    /// An entry with a custom marshal function but no field can never do
    /// anything and is a caller bug; it is logged and dropped. A repeated
    /// name replaces the earlier entry.
    pub(crate) fn build(
        object_type: &str,
        interface: &str,
        infos: impl IntoIterator<Item = PropertyInfo>,
    ) -> Self {
        let mut entries = HashMap::new();
        for info in infos {
            if info.name.is_empty() || (info.marshal.is_some() && info.field.is_none()) {
                warn!(
                    object_type,
                    interface,
                    property = %info.name,
                    "missing field in property info"
                );
                continue;
            }
            entries.insert(
                info.name,
                PropertyEntry {
                    marshal: info.marshal.unwrap_or(marshal_generic),
                    field: info.field,
                },
            );
        }
        Self { entries }
    }

    /// Looks up a local property name.
    pub(crate) fn lookup(&self, name: &str) -> Option<&PropertyEntry> {
        self.entries.get(name)
    }

    /// Returns the number of registered properties.
    pub(crate) fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns the registered local names.
    pub(crate) fn names(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }
}
