//! Error types for the property mirror engine.
//!
//! Errors fall into a fixed set of kinds ([`ErrorKind`]). Synchronous
//! operations return them to the caller; background paths (change events,
//! deferred notification, fire-and-forget writes) log and absorb them.

use std::time::Duration;
use thiserror::Error;

/// D-Bus error name reported when a method call gets no reply in time.
pub const DBUS_ERROR_NO_REPLY: &str = "org.freedesktop.DBus.Error.NoReply";

/// D-Bus error name reported by a peer that has no such interface.
pub const DBUS_ERROR_UNKNOWN_INTERFACE: &str = "org.freedesktop.DBus.Error.UnknownInterface";

/// D-Bus error name reported by a peer that has no such property.
pub const DBUS_ERROR_UNKNOWN_PROPERTY: &str = "org.freedesktop.DBus.Error.UnknownProperty";

/// Result type alias for mirror operations.
pub type Result<T> = std::result::Result<T, MirrorError>;

/// Every failure category the engine can report.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Remote value type disagrees with the registered field type.
    TypeMismatch,
    /// Remote property name has no registry match.
    UnknownProperty,
    /// Remote call timed out or the peer went away.
    NoReply,
    /// Any other remote call failure.
    Protocol,
    /// A mirror could not be built for the given connection and path.
    Construction,
    /// Invalid configuration or logger setup.
    Config,
}

impl ErrorKind {
    /// Returns the kind name as used in log fields.
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::TypeMismatch => "type-mismatch",
            ErrorKind::UnknownProperty => "unknown-property",
            ErrorKind::NoReply => "no-reply",
            ErrorKind::Protocol => "protocol",
            ErrorKind::Construction => "construction",
            ErrorKind::Config => "config",
        }
    }
}

/// Failure to convert a remote value into a local field.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MarshalError {
    /// The remote value's runtime type does not match the field.
    #[error("expected {expected}, got {actual}")]
    TypeMismatch {
        /// Type the field stores.
        expected: &'static str,
        /// Type that arrived on the wire.
        actual: &'static str,
    },

    /// The field is currently borrowed by a reader and cannot be updated.
    #[error("field of type {expected} is borrowed")]
    FieldBusy {
        /// Type the field stores.
        expected: &'static str,
    },
}

impl MarshalError {
    /// Creates a type mismatch error.
    pub fn type_mismatch(expected: &'static str, actual: &'static str) -> Self {
        MarshalError::TypeMismatch { expected, actual }
    }

    /// Returns the error kind.
    pub fn kind(&self) -> ErrorKind {
        ErrorKind::TypeMismatch
    }
}

/// Failure of a remote properties call.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BusError {
    /// No reply arrived within the call's timeout, or the peer vanished.
    #[error("no reply to {method} within {timeout:?}")]
    NoReply {
        /// Properties method that was called.
        method: String,
        /// Timeout the call was bounded by, when known.
        timeout: Option<Duration>,
    },

    /// The remote side answered with an error.
    #[error("{name}: {message}")]
    Remote {
        /// D-Bus error name.
        name: String,
        /// Human readable detail.
        message: String,
    },

    /// The reply could not be decoded.
    #[error("invalid reply: {0}")]
    InvalidReply(String),

    /// Transport level failure (connection closed, I/O error).
    #[error("transport error: {0}")]
    Transport(String),
}

impl BusError {
    /// Creates a no-reply error for a call bounded by `timeout`.
    pub fn no_reply(method: impl Into<String>, timeout: Duration) -> Self {
        BusError::NoReply {
            method: method.into(),
            timeout: Some(timeout),
        }
    }

    /// Creates a remote error.
    pub fn remote(name: impl Into<String>, message: impl Into<String>) -> Self {
        let name = name.into();
        if name == DBUS_ERROR_NO_REPLY {
            return BusError::NoReply {
                method: message.into(),
                timeout: None,
            };
        }
        BusError::Remote {
            name,
            message: message.into(),
        }
    }

    /// Returns true for timeouts and vanished peers.
    ///
    /// These are expected while the remote service shuts down and are kept
    /// out of warning-level logs on best-effort paths.
    pub fn is_no_reply(&self) -> bool {
        matches!(self, BusError::NoReply { .. })
    }

    /// Returns the D-Bus error name for this failure.
    pub fn name(&self) -> &str {
        match self {
            BusError::NoReply { .. } => DBUS_ERROR_NO_REPLY,
            BusError::Remote { name, .. } => name,
            BusError::InvalidReply(_) => "org.freedesktop.DBus.Error.InvalidArgs",
            BusError::Transport(_) => "org.freedesktop.DBus.Error.Disconnected",
        }
    }

    /// Returns the error kind.
    pub fn kind(&self) -> ErrorKind {
        if self.is_no_reply() {
            ErrorKind::NoReply
        } else {
            ErrorKind::Protocol
        }
    }
}

/// Errors returned by mirror construction, cache and setup operations.
#[derive(Debug, Error)]
pub enum MirrorError {
    /// The object path is not a valid D-Bus object path.
    #[error("invalid object path '{path}': {reason}")]
    InvalidPath {
        /// The rejected path.
        path: String,
        /// Why it was rejected.
        reason: &'static str,
    },

    /// A consumer failed to build its object around a fresh mirror.
    #[error("failed to construct {object_type} at {path}: {message}")]
    Construction {
        /// Object type being built.
        object_type: &'static str,
        /// Object path.
        path: String,
        /// Error message.
        message: String,
    },

    /// The cache holds a live object of another type for this path.
    #[error("{path} is already mirrored as {existing}, not {requested}")]
    TypeConflict {
        /// Object path.
        path: String,
        /// Type name of the cached object.
        existing: &'static str,
        /// Type name the caller asked for.
        requested: &'static str,
    },

    /// Remote call failure.
    #[error("bus error: {0}")]
    Bus(#[from] BusError),

    /// Configuration error.
    #[error("configuration error: {0}")]
    Config(String),

    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl MirrorError {
    /// Creates a construction error.
    pub fn construction(
        object_type: &'static str,
        path: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        MirrorError::Construction {
            object_type,
            path: path.into(),
            message: message.into(),
        }
    }

    /// Returns the error kind.
    pub fn kind(&self) -> ErrorKind {
        match self {
            MirrorError::InvalidPath { .. }
            | MirrorError::Construction { .. }
            | MirrorError::TypeConflict { .. } => ErrorKind::Construction,
            MirrorError::Bus(err) => err.kind(),
            MirrorError::Config(_) | MirrorError::Io(_) => ErrorKind::Config,
        }
    }
}
