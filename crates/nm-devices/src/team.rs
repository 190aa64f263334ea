//! Team device mirror.

use nm_object::{marshal_object_path_array, Field, ObjectMirror, PropertyInfo, RemoteObject, Result};

use crate::device::Device;

/// Team device interface.
pub const TEAM_INTERFACE: &str = "org.freedesktop.NetworkManager.Device.Team";

/// Mirror of a team (link aggregation) device.
///
/// Registers the team interface on top of the base device interface, so
/// team properties shadow base properties of the same name.
#[derive(Debug)]
pub struct DeviceTeam {
    device: Device,
    hw_address: Field<String>,
    carrier: Field<bool>,
    slaves: Field<Vec<String>>,
}

impl DeviceTeam {
    /// Builds the base device, then registers the team interface on top.
    pub fn new(mirror: ObjectMirror) -> Result<Self> {
        let device = Device::new(mirror)?;
        let team = Self {
            device,
            hw_address: Field::default(),
            carrier: Field::default(),
            slaves: Field::default(),
        };

        team.device.mirror().register_properties(
            TEAM_INTERFACE,
            vec![
                PropertyInfo::new("hw-address", &team.hw_address),
                PropertyInfo::new("carrier", &team.carrier),
                PropertyInfo::with_marshal("slaves", marshal_object_path_array, &team.slaves),
            ],
        );

        Ok(team)
    }

    /// Returns the base device.
    pub fn device(&self) -> &Device {
        &self.device
    }

    /// Hardware address of the team interface.
    pub async fn hw_address(&self) -> String {
        self.device.mirror().ensure_initialized().await;
        self.hw_address.get()
    }

    /// True while at least one port has carrier.
    pub async fn carrier(&self) -> bool {
        self.device.mirror().ensure_initialized().await;
        self.carrier.get()
    }

    /// Object paths of the port devices.
    pub async fn slaves(&self) -> Vec<String> {
        self.device.mirror().ensure_initialized().await;
        self.slaves.get()
    }
}

impl RemoteObject for DeviceTeam {
    const TYPE_NAME: &'static str = "NMDeviceTeam";

    fn mirror(&self) -> &ObjectMirror {
        self.device.mirror()
    }
}
