//! D-Bus backend over zbus.
//!
//! Properties calls go out as plain `org.freedesktop.DBus.Properties`
//! method calls to the configured service. Change notifications come from
//! a properties proxy bound to that service, so only signals sent by the
//! current owner of the service name are applied. Invalidated property
//! names are passed on for the mirror to fetch.
//!
//! D-Bus has no signed byte, so [`Value::I8`] is sent as `int16`.

use std::collections::HashMap;

use async_trait::async_trait;
use futures::StreamExt;
use tracing::{debug, warn};
use zbus::zvariant::{self, ObjectPath, OwnedValue};

use crate::bus::{ChangeStream, PropertiesBus, PropertiesChanged, PROPERTIES_INTERFACE};
use crate::config::{BusConfig, BusKind};
use crate::error::BusError;
use crate::value::{PropertyMap, Value};

const DBUS_ERROR_INVALID_ARGS: &str = "org.freedesktop.DBus.Error.InvalidArgs";

/// [`PropertiesBus`] over a zbus connection.
#[derive(Debug, Clone)]
pub struct ZbusBus {
    connection: zbus::Connection,
    service: String,
}

impl ZbusBus {
    /// Wraps an established connection; calls go to `service`.
    pub fn new(connection: zbus::Connection, service: impl Into<String>) -> Self {
        Self {
            connection,
            service: service.into(),
        }
    }

    /// Connects to the bus named in `config`.
    pub async fn connect(config: &BusConfig) -> Result<Self, BusError> {
        let connection = match config.kind {
            BusKind::System => zbus::Connection::system().await,
            BusKind::Session => zbus::Connection::session().await,
        }
        .map_err(map_error)?;
        debug!(service = %config.service, kind = ?config.kind, "connected to message bus");
        Ok(Self::new(connection, config.service.clone()))
    }

    /// Returns the underlying zbus connection.
    pub fn connection(&self) -> &zbus::Connection {
        &self.connection
    }

    async fn call<B>(&self, path: &str, method: &str, body: &B) -> Result<zbus::Message, BusError>
    where
        B: serde::Serialize + zvariant::DynamicType,
    {
        self.connection
            .call_method(
                Some(self.service.as_str()),
                path,
                Some(PROPERTIES_INTERFACE),
                method,
                body,
            )
            .await
            .map_err(map_error)
    }
}

#[async_trait(?Send)]
impl PropertiesBus for ZbusBus {
    async fn get_all(&self, path: &str, interface: &str) -> Result<PropertyMap, BusError> {
        let reply = self.call(path, "GetAll", &(interface,)).await?;
        let body = reply.body();
        let properties: HashMap<String, OwnedValue> = body
            .deserialize()
            .map_err(|e| BusError::InvalidReply(e.to_string()))?;
        Ok(convert_map(
            path,
            properties.iter().map(|(name, value)| (name.as_str(), &**value)),
        ))
    }

    async fn get(&self, path: &str, interface: &str, name: &str) -> Result<Value, BusError> {
        let reply = self.call(path, "Get", &(interface, name)).await?;
        let body = reply.body();
        let value: OwnedValue = body
            .deserialize()
            .map_err(|e| BusError::InvalidReply(e.to_string()))?;
        from_zvariant(&value).ok_or_else(|| {
            BusError::InvalidReply(format!("unsupported type for property {}", name))
        })
    }

    async fn set(
        &self,
        path: &str,
        interface: &str,
        name: &str,
        value: Value,
    ) -> Result<(), BusError> {
        let value = to_zvariant(&value)?;
        self.call(path, "Set", &(interface, name, value)).await?;
        Ok(())
    }

    fn subscribe(&self, path: &str, interface: &str) -> Result<ChangeStream, BusError> {
        let builder = zbus::fdo::PropertiesProxy::builder(&self.connection)
            .destination(self.service.clone())
            .and_then(|b| b.path(path.to_string()))
            .map_err(map_error)?;

        let path = path.to_string();
        let interface = interface.to_string();
        let arg0 = interface.clone();
        let failed_path = path.clone();

        let stream = futures::stream::once(async move {
            let proxy = builder.build().await?;
            proxy
                .receive_properties_changed_with_args(&[(0, arg0.as_str())])
                .await
        })
        .filter_map(move |result| {
            let path = failed_path.clone();
            async move {
                match result {
                    Ok(stream) => Some(stream),
                    Err(err) => {
                        warn!(path = %path, error = %err, "could not subscribe to PropertiesChanged");
                        None
                    }
                }
            }
        })
        .flatten()
        .filter_map(move |signal| {
            let batch = decode_properties_changed(&path, &interface, &signal);
            async move { batch }
        })
        .boxed_local();

        Ok(stream)
    }
}

fn decode_properties_changed(
    path: &str,
    interface: &str,
    signal: &zbus::fdo::PropertiesChanged,
) -> Option<PropertiesChanged> {
    let args = match signal.args() {
        Ok(args) => args,
        Err(err) => {
            debug!(path, error = %err, "malformed PropertiesChanged");
            return None;
        }
    };
    if args.interface_name().as_str() != interface {
        return None;
    }
    let changed = convert_map(
        path,
        args.changed_properties()
            .iter()
            .map(|(name, value)| (*name, value)),
    );
    let invalidated = args
        .invalidated_properties()
        .iter()
        .map(|name| name.to_string())
        .collect();
    Some(PropertiesChanged {
        changed,
        invalidated,
    })
}

fn convert_map<'a, 'v: 'a>(
    path: &str,
    properties: impl IntoIterator<Item = (&'a str, &'a zvariant::Value<'v>)>,
) -> PropertyMap {
    properties
        .into_iter()
        .filter_map(|(name, value)| match from_zvariant(value) {
            Some(value) => Some((name.to_string(), value)),
            None => {
                debug!(path, property = name, "skipping property of unsupported type");
                None
            }
        })
        .collect()
}

/// Converts a zvariant value; `None` for types the engine does not model.
pub(crate) fn from_zvariant(value: &zvariant::Value<'_>) -> Option<Value> {
    use zvariant::Value as Z;

    Some(match value {
        Z::Bool(v) => Value::Bool(*v),
        Z::U8(v) => Value::U8(*v),
        Z::I16(v) => Value::I16(*v),
        Z::U16(v) => Value::U16(*v),
        Z::I32(v) => Value::I32(*v),
        Z::U32(v) => Value::U32(*v),
        Z::I64(v) => Value::I64(*v),
        Z::U64(v) => Value::U64(*v),
        Z::F64(v) => Value::F64(*v),
        Z::Str(s) => Value::Str(s.to_string()),
        Z::ObjectPath(p) => Value::ObjectPath(p.to_string()),
        Z::Value(inner) => return from_zvariant(inner),
        Z::Array(array) => Value::Array(
            array
                .iter()
                .map(from_zvariant)
                .collect::<Option<Vec<_>>>()?,
        ),
        _ => return None,
    })
}

/// Converts a value for sending.
pub(crate) fn to_zvariant(value: &Value) -> Result<zvariant::Value<'static>, BusError> {
    use zvariant::Value as Z;

    Ok(match value {
        Value::Bool(v) => Z::Bool(*v),
        Value::I8(v) => Z::I16(i16::from(*v)),
        Value::U8(v) => Z::U8(*v),
        Value::I16(v) => Z::I16(*v),
        Value::U16(v) => Z::U16(*v),
        Value::I32(v) => Z::I32(*v),
        Value::U32(v) => Z::U32(*v),
        Value::I64(v) => Z::I64(*v),
        Value::U64(v) => Z::U64(*v),
        Value::F64(v) => Z::F64(*v),
        Value::Str(s) => Z::from(s.clone()),
        Value::ObjectPath(p) => Z::from(object_path(p)?),
        Value::Array(items) => array_to_zvariant(items)?,
    })
}

fn object_path(path: &str) -> Result<ObjectPath<'static>, BusError> {
    ObjectPath::try_from(path.to_string())
        .map_err(|e| BusError::remote(DBUS_ERROR_INVALID_ARGS, e.to_string()))
}

fn array_to_zvariant(items: &[Value]) -> Result<zvariant::Value<'static>, BusError> {
    macro_rules! homogeneous {
        ($variant:ident, $map:expr) => {{
            let mut out = Vec::with_capacity(items.len());
            for item in items {
                match item {
                    Value::$variant(v) => out.push(($map)(v)?),
                    other => {
                        return Err(BusError::remote(
                            DBUS_ERROR_INVALID_ARGS,
                            format!("mixed array element {}", other.type_name()),
                        ))
                    }
                }
            }
            Ok(zvariant::Value::from(out))
        }};
    }

    match items.first() {
        None => Ok(zvariant::Value::from(Vec::<String>::new())),
        Some(Value::Str(_)) => homogeneous!(Str, |v: &String| Ok::<_, BusError>(v.clone())),
        Some(Value::ObjectPath(_)) => homogeneous!(ObjectPath, |v: &String| object_path(v)),
        Some(Value::U32(_)) => homogeneous!(U32, |v: &u32| Ok::<_, BusError>(*v)),
        Some(Value::U8(_)) => homogeneous!(U8, |v: &u8| Ok::<_, BusError>(*v)),
        Some(other) => Err(BusError::remote(
            DBUS_ERROR_INVALID_ARGS,
            format!("unsupported array element {}", other.type_name()),
        )),
    }
}

fn map_error(err: zbus::Error) -> BusError {
    match err {
        zbus::Error::MethodError(name, message, _) => {
            BusError::remote(name.to_string(), message.unwrap_or_default())
        }
        zbus::Error::Variant(e) => BusError::InvalidReply(e.to_string()),
        other => BusError::Transport(other.to_string()),
    }
}
