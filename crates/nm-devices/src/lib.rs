//! NetworkManager device mirrors.
//!
//! Consumer types built on [`nm_object`]:
//!
//! - [`Device`]: `org.freedesktop.NetworkManager.Device`
//! - [`DeviceTeam`]: adds `org.freedesktop.NetworkManager.Device.Team`
//!
//! [`create_device`] reads the remote `DeviceType` once and picks the
//! mirror type up front, so callers match on [`AnyDevice`] instead of
//! probing the object later.

mod device;
mod team;
mod types;

use std::rc::Rc;

use nm_object::{Connection, MirrorError, ObjectCache, ObjectMirror, RemoteObject, Result, Value};
use tracing::debug;

pub use device::{Device, DEVICE_INTERFACE};
pub use team::{DeviceTeam, TEAM_INTERFACE};
pub use types::{DeviceKind, DeviceState, DEVICE_TYPE_TEAM};

/// A device mirror of the type matching the remote device.
#[derive(Debug, Clone)]
pub enum AnyDevice {
    /// A team master
    Team(Rc<DeviceTeam>),
    /// Any other device type, mirrored with the base interface only
    Generic(Rc<Device>),
}

impl AnyDevice {
    /// Returns the base device.
    pub fn device(&self) -> &Device {
        match self {
            AnyDevice::Team(team) => team.device(),
            AnyDevice::Generic(device) => device,
        }
    }

    /// Returns the backing mirror.
    pub fn mirror(&self) -> &ObjectMirror {
        self.device().mirror()
    }
}

/// Returns the cached mirror for the device at `path`, creating one of the
/// right type if needed.
pub async fn create_device(
    cache: &ObjectCache,
    connection: &Connection,
    path: &str,
) -> Result<AnyDevice> {
    if let Some(team) = cache.lookup_or_none::<DeviceTeam>(connection, path) {
        return Ok(AnyDevice::Team(team));
    }
    if let Some(device) = cache.lookup_or_none::<Device>(connection, path) {
        return Ok(AnyDevice::Generic(device));
    }

    nm_object::validate_object_path(path).map_err(|reason| MirrorError::InvalidPath {
        path: path.to_string(),
        reason,
    })?;

    let kind = match connection.get(path, DEVICE_INTERFACE, "DeviceType").await {
        Ok(Value::U32(raw)) => DeviceKind::from_device_type(raw),
        Ok(other) => {
            return Err(MirrorError::construction(
                Device::TYPE_NAME,
                path,
                format!("DeviceType has type {}", other.type_name()),
            ))
        }
        Err(err) => {
            return Err(MirrorError::construction(
                Device::TYPE_NAME,
                path,
                format!("could not read device type: {}", err),
            ))
        }
    };
    debug!(path, %kind, "creating device mirror");

    match kind {
        DeviceKind::Team => cache
            .get_or_create(connection, path, DeviceTeam::new)
            .map(AnyDevice::Team),
        _ => cache
            .get_or_create(connection, path, Device::new)
            .map(AnyDevice::Generic),
    }
}
