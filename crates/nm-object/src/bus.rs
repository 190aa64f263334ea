//! Bus abstraction for the `org.freedesktop.DBus.Properties` interface.
//!
//! The engine never talks to a transport directly. It calls through the
//! [`PropertiesBus`] trait, which has two implementations: the in-memory
//! [`crate::MockBus`] and, with the `zbus` feature, `ZbusBus`.
//!
//! A [`Connection`] pairs a bus with a process-unique [`ConnectionId`] and
//! the call timeouts. Timeouts are enforced here rather than in the
//! backends, so every backend reports an expired call the same way.

use std::fmt;
use std::rc::Rc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use futures::stream::LocalBoxStream;

use crate::error::BusError;
use crate::value::{PropertyMap, Value};

/// Name of the standard properties interface.
pub const PROPERTIES_INTERFACE: &str = "org.freedesktop.DBus.Properties";

/// One `PropertiesChanged` delivery.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PropertiesChanged {
    /// New values, keyed by remote property name.
    pub changed: PropertyMap,
    /// Remote names whose value changed but was not sent along.
    pub invalidated: Vec<String>,
}

impl PropertiesChanged {
    /// A batch carrying only new values.
    pub fn changed(changed: PropertyMap) -> Self {
        Self {
            changed,
            invalidated: Vec::new(),
        }
    }
}

/// Stream of change batches for one (path, interface) pair.
pub type ChangeStream = LocalBoxStream<'static, PropertiesChanged>;

/// Remote properties access.
///
/// Implementations are single-threaded; futures need not be `Send`.
#[async_trait(?Send)]
pub trait PropertiesBus {
    /// Fetches every property of `interface` on `path`.
    async fn get_all(&self, path: &str, interface: &str) -> Result<PropertyMap, BusError>;

    /// Fetches one property.
    async fn get(&self, path: &str, interface: &str, name: &str) -> Result<Value, BusError>;

    /// Writes one property.
    async fn set(&self, path: &str, interface: &str, name: &str, value: Value)
        -> Result<(), BusError>;

    /// Subscribes to change notifications of `interface` on `path`.
    ///
    /// The subscription ends when the returned stream is dropped.
    fn subscribe(&self, path: &str, interface: &str) -> Result<ChangeStream, BusError>;
}

static NEXT_CONNECTION_ID: AtomicU64 = AtomicU64::new(1);

/// Process-unique connection identity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId(u64);

impl ConnectionId {
    fn next() -> Self {
        ConnectionId(NEXT_CONNECTION_ID.fetch_add(1, Ordering::Relaxed))
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "conn#{}", self.0)
    }
}

/// Timeouts for the three properties calls.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CallTimeouts {
    /// Bound on `GetAll`
    pub get_all: Duration,
    /// Bound on `Get`
    pub get: Duration,
    /// Bound on `Set`
    pub set: Duration,
}

impl Default for CallTimeouts {
    fn default() -> Self {
        Self {
            get_all: Duration::from_secs(25),
            get: Duration::from_secs(15),
            set: Duration::from_secs(2),
        }
    }
}

/// Handle to a bus connection.
///
/// Cloning is cheap; clones share the bus and the identity.
#[derive(Clone)]
pub struct Connection {
    id: ConnectionId,
    bus: Rc<dyn PropertiesBus>,
    timeouts: CallTimeouts,
}

impl Connection {
    /// Wraps `bus` with default timeouts.
    pub fn new(bus: Rc<dyn PropertiesBus>) -> Self {
        Self::with_timeouts(bus, CallTimeouts::default())
    }

    /// Wraps `bus` with explicit timeouts.
    pub fn with_timeouts(bus: Rc<dyn PropertiesBus>, timeouts: CallTimeouts) -> Self {
        Self {
            id: ConnectionId::next(),
            bus,
            timeouts,
        }
    }

    /// Returns the connection identity.
    pub fn id(&self) -> ConnectionId {
        self.id
    }

    /// Returns the underlying bus.
    pub fn bus(&self) -> &Rc<dyn PropertiesBus> {
        &self.bus
    }

    /// Returns the call timeouts.
    pub fn timeouts(&self) -> CallTimeouts {
        self.timeouts
    }

    /// `GetAll`, bounded by the get-all timeout.
    pub async fn get_all(&self, path: &str, interface: &str) -> Result<PropertyMap, BusError> {
        let timeout = self.timeouts.get_all;
        tokio::time::timeout(timeout, self.bus.get_all(path, interface))
            .await
            .map_err(|_| BusError::no_reply("GetAll", timeout))?
    }

    /// `Get`, bounded by the get timeout.
    pub async fn get(&self, path: &str, interface: &str, name: &str) -> Result<Value, BusError> {
        let timeout = self.timeouts.get;
        tokio::time::timeout(timeout, self.bus.get(path, interface, name))
            .await
            .map_err(|_| BusError::no_reply("Get", timeout))?
    }

    /// `Set`, bounded by the set timeout.
    pub async fn set(
        &self,
        path: &str,
        interface: &str,
        name: &str,
        value: Value,
    ) -> Result<(), BusError> {
        let timeout = self.timeouts.set;
        tokio::time::timeout(timeout, self.bus.set(path, interface, name, value))
            .await
            .map_err(|_| BusError::no_reply("Set", timeout))?
    }
}

impl fmt::Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("id", &self.id)
            .field("timeouts", &self.timeouts)
            .finish_non_exhaustive()
    }
}

/// Checks D-Bus object path syntax.
///
/// A path is `/` or a sequence of `/`-prefixed, non-empty elements made of
/// `[A-Za-z0-9_]`, with no trailing slash.
pub fn validate_object_path(path: &str) -> Result<(), &'static str> {
    if path.is_empty() {
        return Err("empty path");
    }
    if !path.starts_with('/') {
        return Err("path must start with '/'");
    }
    if path == "/" {
        return Ok(());
    }
    if path.ends_with('/') {
        return Err("trailing '/'");
    }
    for element in path[1..].split('/') {
        if element.is_empty() {
            return Err("empty path element");
        }
        if !element
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || b == b'_')
        {
            return Err("invalid character in path element");
        }
    }
    Ok(())
}
