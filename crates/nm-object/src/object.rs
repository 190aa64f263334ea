//! Object mirrors.
//!
//! An [`ObjectMirror`] keeps local fields in step with the properties of one
//! remote object. Consumers register the properties they care about per
//! remote interface; the mirror subscribes to that interface's change
//! stream, applies incoming values through the registered marshalers and
//! reports each changed property once per scheduling tick.
//!
//! Mirrors are single-threaded. Registering properties and queuing change
//! notifications spawn tasks with [`tokio::task::spawn_local`], so mirrors
//! must be used from inside a [`tokio::task::LocalSet`].
//!
//! # Lookup order
//!
//! Registrations are kept most recent first. When two interfaces register
//! the same local name, dispatch uses the first table in that order that
//! knows the name, even if its entry is an ignored one.

use std::cell::RefCell;
use std::collections::HashMap;
use std::fmt;
use std::rc::{Rc, Weak};
use std::sync::atomic::{AtomicU64, Ordering};

use futures::StreamExt;
use tokio::task::AbortHandle;
use tracing::{debug, trace, warn};

use crate::bus::{validate_object_path, Connection};
use crate::cache::CacheInner;
use crate::error::{BusError, MarshalError, MirrorError, Result};
use crate::names::canonical_name;
use crate::notify::NotifyQueue;
use crate::properties::{PropertyInfo, PropertyTable};
use crate::value::{PropertyMap, Value};

static NEXT_MIRROR_ID: AtomicU64 = AtomicU64::new(1);

/// Identifies a handler installed with [`ObjectMirror::connect_notify`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct NotifyHandlerId(u64);

type NotifyHandler = Rc<dyn Fn(&ObjectMirror, &str)>;

/// What [`ObjectMirror::dispatch`] did with a value.
#[derive(Debug, Clone, PartialEq)]
pub enum DispatchOutcome {
    /// The field was updated and the property queued for notification.
    Applied,
    /// The property is registered without a field.
    Ignored,
    /// No registered interface knows the property.
    Unknown,
    /// The value could not be marshaled; the field is unchanged.
    Rejected(MarshalError),
    /// The mirror has been disposed.
    Disposed,
}

#[derive(Default)]
struct MirrorState {
    /// Most recent registration first
    registrations: Vec<(String, PropertyTable)>,
    /// Change stream tasks, one per interface
    subscriptions: HashMap<String, AbortHandle>,
    notify: NotifyQueue,
    handlers: Vec<(NotifyHandlerId, NotifyHandler)>,
    next_handler: u64,
    initialized: bool,
    disposed: bool,
}

pub(crate) struct MirrorInner {
    id: u64,
    connection: Connection,
    path: String,
    type_name: &'static str,
    cache: RefCell<Option<Weak<CacheInner>>>,
    state: RefCell<MirrorState>,
}

impl MirrorInner {
    fn dispose(&self) {
        {
            let mut state = self.state.borrow_mut();
            if state.disposed {
                return;
            }
            state.disposed = true;
        }

        // Leave the cache before anything else so lookups stop finding us.
        if let Some(cache) = self.cache.borrow_mut().take().and_then(|weak| weak.upgrade()) {
            cache.remove_mirror(self.connection.id(), &self.path, self.id);
        }

        let (discarded, handlers) = {
            let mut state = self.state.borrow_mut();
            let discarded = state.notify.cancel();
            for (_, handle) in state.subscriptions.drain() {
                handle.abort();
            }
            (discarded, std::mem::take(&mut state.handlers))
        };
        // Handlers may own mirror handles; drop them with no borrow held.
        drop(handlers);

        debug!(
            object_type = self.type_name,
            path = %self.path,
            discarded,
            "disposed object mirror"
        );
    }
}

impl Drop for MirrorInner {
    fn drop(&mut self) {
        self.dispose();
    }
}

/// Local mirror of one remote object.
///
/// Cloning yields another handle to the same mirror.
#[derive(Clone)]
pub struct ObjectMirror {
    inner: Rc<MirrorInner>,
}

impl ObjectMirror {
    /// Creates a mirror for `path` on `connection`.
    ///
    /// Most callers go through [`crate::ObjectCache::get_or_create`] so that
    /// one path maps to one mirror.
    pub fn new(connection: Connection, path: &str, type_name: &'static str) -> Result<Self> {
        validate_object_path(path).map_err(|reason| MirrorError::InvalidPath {
            path: path.to_string(),
            reason,
        })?;

        Ok(Self {
            inner: Rc::new(MirrorInner {
                id: NEXT_MIRROR_ID.fetch_add(1, Ordering::Relaxed),
                connection,
                path: path.to_string(),
                type_name,
                cache: RefCell::new(None),
                state: RefCell::new(MirrorState::default()),
            }),
        })
    }

    /// Returns the bus connection.
    pub fn connection(&self) -> &Connection {
        &self.inner.connection
    }

    /// Returns the object path.
    pub fn path(&self) -> &str {
        &self.inner.path
    }

    /// Returns the consumer type name used in diagnostics.
    pub fn type_name(&self) -> &'static str {
        self.inner.type_name
    }

    pub(crate) fn mirror_id(&self) -> u64 {
        self.inner.id
    }

    pub(crate) fn attach_cache(&self, cache: Weak<CacheInner>) {
        *self.inner.cache.borrow_mut() = Some(cache);
    }

    /// Returns true if both handles refer to the same mirror.
    pub fn ptr_eq(&self, other: &ObjectMirror) -> bool {
        Rc::ptr_eq(&self.inner, &other.inner)
    }

    /// Registers the properties mirrored for `interface`.
    ///
    /// The first registration of an interface also subscribes to its change
    /// stream. Registering the same interface again adds another table in
    /// front of the existing ones without subscribing twice.
    pub fn register_properties(
        &self,
        interface: &str,
        infos: impl IntoIterator<Item = PropertyInfo>,
    ) {
        let table = PropertyTable::build(self.inner.type_name, interface, infos);
        let count = table.len();

        let subscribe = {
            let mut state = self.inner.state.borrow_mut();
            if state.disposed {
                return;
            }
            state.registrations.insert(0, (interface.to_string(), table));
            !state.subscriptions.contains_key(interface)
        };

        debug!(
            object_type = self.inner.type_name,
            path = %self.inner.path,
            interface,
            count,
            "registered properties"
        );

        if subscribe {
            self.subscribe(interface);
        }
    }

    fn subscribe(&self, interface: &str) {
        let mut stream = match self
            .inner
            .connection
            .bus()
            .subscribe(&self.inner.path, interface)
        {
            Ok(stream) => stream,
            Err(err) => {
                warn!(
                    object_type = self.inner.type_name,
                    path = %self.inner.path,
                    interface,
                    error = %err,
                    "could not subscribe to property changes"
                );
                return;
            }
        };

        let weak = Rc::downgrade(&self.inner);
        let tracked = interface.to_string();
        let handle = tokio::task::spawn_local(async move {
            while let Some(batch) = stream.next().await {
                let Some(inner) = weak.upgrade() else {
                    break;
                };
                let mirror = ObjectMirror { inner };
                mirror.process_properties_changed(&batch.changed);
                // Invalidated properties carry no value; fetch them.
                for name in &batch.invalidated {
                    mirror.reload_property(&tracked, name).await;
                }
            }
        })
        .abort_handle();

        self.inner
            .state
            .borrow_mut()
            .subscriptions
            .insert(interface.to_string(), handle);
    }

    /// Returns the registered interfaces, most recent first, without
    /// duplicates.
    pub fn interfaces(&self) -> Vec<String> {
        let state = self.inner.state.borrow();
        let mut out: Vec<String> = Vec::with_capacity(state.registrations.len());
        for (interface, _) in &state.registrations {
            if !out.contains(interface) {
                out.push(interface.clone());
            }
        }
        out
    }

    /// Returns the local property names registered for `interface`, sorted.
    pub fn property_names(&self, interface: &str) -> Vec<String> {
        let state = self.inner.state.borrow();
        let mut names: Vec<String> = state
            .registrations
            .iter()
            .filter(|(iface, _)| iface == interface)
            .flat_map(|(_, table)| table.names().map(str::to_string))
            .collect();
        names.sort();
        names.dedup();
        names
    }

    /// Returns true once a full refresh has succeeded, or when nothing is
    /// registered.
    pub fn is_initialized(&self) -> bool {
        let state = self.inner.state.borrow();
        state.initialized || state.registrations.is_empty()
    }

    /// Returns true after [`dispose`](Self::dispose).
    pub fn is_disposed(&self) -> bool {
        self.inner.state.borrow().disposed
    }

    /// Applies one remote value.
    pub fn dispatch(&self, remote_name: &str, value: &Value) -> DispatchOutcome {
        let name = canonical_name(remote_name);

        let entry = {
            let state = self.inner.state.borrow();
            if state.disposed {
                return DispatchOutcome::Disposed;
            }
            state
                .registrations
                .iter()
                .find_map(|(_, table)| table.lookup(&name).cloned())
        };

        let Some(entry) = entry else {
            debug!(
                object_type = self.inner.type_name,
                path = %self.inner.path,
                property = %name,
                "unhandled property"
            );
            return DispatchOutcome::Unknown;
        };
        let Some(field) = entry.field else {
            return DispatchOutcome::Ignored;
        };

        match (entry.marshal)(value, field.as_ref()) {
            Ok(()) => {
                self.queue_notify(&name);
                DispatchOutcome::Applied
            }
            Err(err) => {
                warn!(
                    object_type = self.inner.type_name,
                    path = %self.inner.path,
                    property = %name,
                    expected = field.type_name(),
                    actual = value.type_name(),
                    error = %err,
                    "could not demarshal property"
                );
                DispatchOutcome::Rejected(err)
            }
        }
    }

    /// Applies a batch of remote values, one entry at a time.
    ///
    /// A rejected entry does not stop the rest of the batch.
    pub fn process_properties_changed(&self, changes: &PropertyMap) {
        for (name, value) in changes {
            self.dispatch(name, value);
        }
    }

    /// Queues a change notification for `property`.
    ///
    /// The first name queued in a tick schedules a flush on the local task
    /// set; later names join the same batch.
    pub fn queue_notify(&self, property: &str) {
        let schedule = {
            let mut state = self.inner.state.borrow_mut();
            if state.disposed {
                return;
            }
            state.notify.queue(property)
        };
        if !schedule {
            return;
        }

        let weak = Rc::downgrade(&self.inner);
        let handle = tokio::task::spawn_local(async move {
            tokio::task::yield_now().await;
            if let Some(inner) = weak.upgrade() {
                ObjectMirror { inner }.flush_notifications();
            }
        })
        .abort_handle();
        self.inner.state.borrow_mut().notify.set_flush(handle);
    }

    fn flush_notifications(&self) {
        let (batch, handlers) = {
            let mut state = self.inner.state.borrow_mut();
            if state.disposed {
                return;
            }
            let batch = state.notify.take_batch();
            let handlers: Vec<NotifyHandler> =
                state.handlers.iter().map(|(_, h)| Rc::clone(h)).collect();
            (batch, handlers)
        };

        trace!(path = %self.inner.path, count = batch.len(), "emitting notifications");
        for property in &batch {
            for handler in &handlers {
                if self.is_disposed() {
                    return;
                }
                handler(self, property);
            }
        }
    }

    /// Returns the names waiting for the next flush, oldest first.
    pub fn pending_notifications(&self) -> Vec<String> {
        self.inner.state.borrow().notify.pending().to_vec()
    }

    /// Returns true while a flush is scheduled.
    pub fn notify_scheduled(&self) -> bool {
        self.inner.state.borrow().notify.is_scheduled()
    }

    /// Installs a change handler. It runs once per flushed property name.
    pub fn connect_notify(
        &self,
        handler: impl Fn(&ObjectMirror, &str) + 'static,
    ) -> NotifyHandlerId {
        let mut state = self.inner.state.borrow_mut();
        state.next_handler += 1;
        let id = NotifyHandlerId(state.next_handler);
        state.handlers.push((id, Rc::new(handler)));
        id
    }

    /// Removes a change handler. Returns false if it was not installed.
    pub fn disconnect_notify(&self, id: NotifyHandlerId) -> bool {
        let removed = {
            let mut state = self.inner.state.borrow_mut();
            match state.handlers.iter().position(|(hid, _)| *hid == id) {
                Some(pos) => Some(state.handlers.remove(pos)),
                None => None,
            }
        };
        removed.is_some()
    }

    /// Fetches every property of every registered interface.
    ///
    /// Interfaces are fetched most recent registration first and the first
    /// failure is returned. Values applied before the failure are kept.
    pub async fn reload_properties(&self) -> std::result::Result<(), BusError> {
        let interfaces = self.interfaces();
        for interface in &interfaces {
            let properties = self
                .inner
                .connection
                .get_all(&self.inner.path, interface)
                .await?;
            self.process_properties_changed(&properties);
        }

        if !interfaces.is_empty() {
            self.inner.state.borrow_mut().initialized = true;
        }
        Ok(())
    }

    /// Fetches and applies one property.
    ///
    /// Failures are logged, never returned. A call that got no reply is only
    /// logged at debug level.
    pub async fn reload_property(&self, interface: &str, remote_name: &str) {
        match self
            .inner
            .connection
            .get(&self.inner.path, interface, remote_name)
            .await
        {
            Ok(value) => {
                self.dispatch(remote_name, &value);
            }
            Err(err) if err.is_no_reply() => {
                debug!(
                    object_type = self.inner.type_name,
                    path = %self.inner.path,
                    property = remote_name,
                    error = %err,
                    "no reply reading property"
                );
            }
            Err(err) => {
                warn!(
                    object_type = self.inner.type_name,
                    path = %self.inner.path,
                    property = remote_name,
                    error = %err,
                    "could not get property"
                );
            }
        }
    }

    /// Writes a remote property without waiting for the result.
    ///
    /// The local field is not touched; the new value arrives through the
    /// change stream if the remote side accepts it.
    pub fn set_property(&self, interface: &str, remote_name: &str, value: Value) {
        let connection = self.inner.connection.clone();
        let object_type = self.inner.type_name;
        let path = self.inner.path.clone();
        let interface = interface.to_string();
        let name = remote_name.to_string();

        tokio::task::spawn_local(async move {
            match connection.set(&path, &interface, &name, value).await {
                Ok(()) => debug!(
                    object_type,
                    path = %path,
                    interface = %interface,
                    property = %name,
                    "set property"
                ),
                Err(err) => debug!(
                    object_type,
                    path = %path,
                    interface = %interface,
                    property = %name,
                    error = %err,
                    "set property failed"
                ),
            }
        });
    }

    /// Runs a full refresh unless the mirror is already initialized.
    ///
    /// A failure is logged and otherwise ignored; fields keep whatever they
    /// held before.
    pub async fn ensure_initialized(&self) {
        if self.is_initialized() {
            return;
        }
        if let Err(err) = self.reload_properties().await {
            warn!(
                object_type = self.inner.type_name,
                path = %self.inner.path,
                error = %err,
                "could not initialize"
            );
        }
    }

    /// Detaches the mirror.
    ///
    /// Removes it from its cache, cancels a pending flush without emitting
    /// it, ends the change subscriptions and drops the change handlers.
    /// Later dispatches do nothing. Calling it again is a no-op; dropping the
    /// last handle does the same.
    pub fn dispose(&self) {
        self.inner.dispose();
    }
}

impl fmt::Debug for ObjectMirror {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ObjectMirror")
            .field("type_name", &self.inner.type_name)
            .field("path", &self.inner.path)
            .field("connection", &self.inner.connection.id())
            .finish_non_exhaustive()
    }
}
