//! Remote-object property mirrors for NetworkManager.
//!
//! This crate keeps in-process representations of remote D-Bus objects in
//! step with the properties the remote side publishes:
//!
//! - [`ObjectMirror`]: owns identity (connection + path) and the property
//!   registrations of one remote object
//! - [`PropertyInfo`] / [`Field`]: what a consumer registers and reads
//! - [`ObjectCache`]: one live object per (connection, path)
//! - [`PropertiesBus`]: the `org.freedesktop.DBus.Properties` seam, with
//!   [`MockBus`] for tests and `ZbusBus` (feature `zbus`) for a real bus
//!
//! # Architecture
//!
//! 1. A consumer type is built by [`ObjectCache::get_or_create`] around a
//!    fresh mirror and registers its properties per remote interface
//! 2. Registration subscribes the mirror to that interface's change stream
//! 3. Incoming values are canonicalized ([`canonical_name`]), looked up and
//!    marshaled into the consumer's fields
//! 4. Each changed property is reported once per scheduling tick to the
//!    handlers installed with [`ObjectMirror::connect_notify`]
//!
//! Everything runs on one thread inside a [`tokio::task::LocalSet`].
//!
//! # Example
//!
//! ```ignore
//! use nm_object::{Field, ObjectMirror, PropertyInfo, RemoteObject};
//!
//! struct Link {
//!     mirror: ObjectMirror,
//!     carrier: Field<bool>,
//! }
//!
//! impl Link {
//!     fn new(mirror: ObjectMirror) -> nm_object::Result<Self> {
//!         let carrier = Field::new(false);
//!         mirror.register_properties(
//!             "org.freedesktop.NetworkManager.Device.Wired",
//!             vec![PropertyInfo::new("carrier", &carrier)],
//!         );
//!         Ok(Self { mirror, carrier })
//!     }
//! }
//! ```

mod bus;
mod cache;
pub mod config;
#[cfg(feature = "zbus")]
mod dbus;
mod error;
pub mod logging;
mod mock;
mod names;
mod notify;
mod object;
mod properties;
mod value;

pub use bus::{
    validate_object_path, CallTimeouts, ChangeStream, Connection, ConnectionId, PropertiesBus,
    PropertiesChanged, PROPERTIES_INTERFACE,
};
pub use cache::{ObjectCache, RemoteObject};
pub use config::{BusConfig, BusKind, LoggingConfig, MirrorConfig, TimeoutsConfig};
#[cfg(feature = "zbus")]
pub use dbus::ZbusBus;
pub use error::{
    BusError, ErrorKind, MarshalError, MirrorError, Result, DBUS_ERROR_NO_REPLY,
    DBUS_ERROR_UNKNOWN_INTERFACE, DBUS_ERROR_UNKNOWN_PROPERTY,
};
pub use logging::init_logging;
pub use mock::{BusCall, BusMethod, MockBus, ScriptedReply};
pub use names::canonical_name;
pub use object::{DispatchOutcome, NotifyHandlerId, ObjectMirror};
pub use properties::PropertyInfo;
pub use value::{
    marshal_generic, marshal_object_path_array, Field, FieldSlot, FieldType, MarshalFn,
    PropertyMap, Value, NULL_OBJECT_PATH,
};
