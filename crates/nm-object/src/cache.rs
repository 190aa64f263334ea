//! Object cache.
//!
//! Maps (connection, path) to the live consumer object mirroring that path,
//! so repeated lookups share one mirror. The cache holds weak references
//! only: it never keeps an object alive, and a disposed or dropped object
//! is no longer returned.

use std::any::Any;
use std::cell::RefCell;
use std::collections::HashMap;
use std::fmt;
use std::rc::{Rc, Weak};

use tracing::debug;

use crate::bus::{Connection, ConnectionId};
use crate::error::{MirrorError, Result};
use crate::object::ObjectMirror;

/// A consumer type built around an [`ObjectMirror`].
pub trait RemoteObject: Any {
    /// Type name used in diagnostics and type conflict errors.
    const TYPE_NAME: &'static str;

    /// Returns the mirror backing this object.
    fn mirror(&self) -> &ObjectMirror;
}

type CacheKey = (ConnectionId, String);

struct CacheEntry {
    object: Weak<dyn Any>,
    type_name: &'static str,
    mirror_id: u64,
}

#[derive(Default)]
pub(crate) struct CacheInner {
    entries: RefCell<HashMap<CacheKey, CacheEntry>>,
}

impl CacheInner {
    /// Removes the entry for `path` if it still belongs to `mirror_id`.
    pub(crate) fn remove_mirror(&self, connection: ConnectionId, path: &str, mirror_id: u64) {
        let removed = {
            let mut entries = self.entries.borrow_mut();
            let key = (connection, path.to_string());
            match entries.get(&key) {
                Some(entry) if entry.mirror_id == mirror_id => entries.remove(&key),
                _ => None,
            }
        };
        if removed.is_some() {
            debug!(%connection, path, "removed object from cache");
        }
    }
}

/// Deduplicating registry of remote objects.
///
/// Cloning yields another handle to the same cache.
#[derive(Clone, Default)]
pub struct ObjectCache {
    inner: Rc<CacheInner>,
}

impl ObjectCache {
    /// Creates an empty cache.
    pub fn new() -> Self {
        Self::default()
    }

    fn live_entry(
        &self,
        connection: ConnectionId,
        path: &str,
    ) -> Option<(Rc<dyn Any>, &'static str)> {
        let entries = self.inner.entries.borrow();
        let entry = entries.get(&(connection, path.to_string()))?;
        let object = entry.object.upgrade()?;
        Some((object, entry.type_name))
    }

    /// Returns the live object of type `T` for `path`, if any.
    pub fn lookup_or_none<T: RemoteObject>(
        &self,
        connection: &Connection,
        path: &str,
    ) -> Option<Rc<T>> {
        let (object, _) = self.live_entry(connection.id(), path)?;
        let object = object.downcast::<T>().ok()?;
        if object.mirror().is_disposed() {
            return None;
        }
        Some(object)
    }

    /// Returns the cached object for `path`, building it with `ctor` if none
    /// is alive.
    ///
    /// `ctor` receives a fresh mirror and must register its properties on
    /// it. If `ctor` fails, the mirror is dropped and nothing is cached. A
    /// live object of a different type at the same path is an error.
    pub fn get_or_create<T, F>(
        &self,
        connection: &Connection,
        path: &str,
        ctor: F,
    ) -> Result<Rc<T>>
    where
        T: RemoteObject,
        F: FnOnce(ObjectMirror) -> Result<T>,
    {
        if let Some((object, existing)) = self.live_entry(connection.id(), path) {
            match object.downcast::<T>() {
                Ok(object) if !object.mirror().is_disposed() => return Ok(object),
                Ok(_) => {}
                Err(_) => {
                    return Err(MirrorError::TypeConflict {
                        path: path.to_string(),
                        existing,
                        requested: T::TYPE_NAME,
                    })
                }
            }
        }

        let mirror = ObjectMirror::new(connection.clone(), path, T::TYPE_NAME)?;
        let object = Rc::new(ctor(mirror)?);
        self.insert(&object);
        Ok(object)
    }

    /// Records `object` under its mirror's connection and path, replacing
    /// any previous entry.
    pub fn insert<T: RemoteObject>(&self, object: &Rc<T>) {
        let mirror = object.mirror();
        mirror.attach_cache(Rc::downgrade(&self.inner));

        let erased: Rc<dyn Any> = object.clone();
        let key = (mirror.connection().id(), mirror.path().to_string());
        let previous = self.inner.entries.borrow_mut().insert(
            key,
            CacheEntry {
                object: Rc::downgrade(&erased),
                type_name: T::TYPE_NAME,
                mirror_id: mirror.mirror_id(),
            },
        );
        drop(previous);

        debug!(
            object_type = T::TYPE_NAME,
            connection = %mirror.connection().id(),
            path = %mirror.path(),
            "cached object"
        );
    }

    /// Forgets the entry for `path`, whatever it holds.
    pub fn remove(&self, connection: &Connection, path: &str) -> bool {
        let removed = self
            .inner
            .entries
            .borrow_mut()
            .remove(&(connection.id(), path.to_string()));
        removed.is_some()
    }

    /// Returns the number of entries whose object is still alive.
    pub fn len(&self) -> usize {
        self.inner
            .entries
            .borrow()
            .values()
            .filter(|entry| entry.object.strong_count() > 0)
            .count()
    }

    /// Returns true if no live object is cached.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drops entries whose object is gone.
    pub fn prune(&self) -> usize {
        let mut entries = self.inner.entries.borrow_mut();
        let before = entries.len();
        entries.retain(|_, entry| entry.object.strong_count() > 0);
        before - entries.len()
    }
}

impl fmt::Debug for ObjectCache {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ObjectCache")
            .field("entries", &self.inner.entries.borrow().len())
            .finish()
    }
}
