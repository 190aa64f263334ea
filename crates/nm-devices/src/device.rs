//! Generic device mirror.
//!
//! Mirrors `org.freedesktop.NetworkManager.Device`. Getters run a full
//! refresh first if the mirror has not been initialized yet; a failed
//! refresh is logged by the mirror and the getter returns the current
//! (default) value.

use nm_object::{Field, ObjectMirror, PropertyInfo, RemoteObject, Result, Value};

use crate::types::{DeviceKind, DeviceState};

/// Base device interface.
pub const DEVICE_INTERFACE: &str = "org.freedesktop.NetworkManager.Device";

/// Mirror of a NetworkManager device.
#[derive(Debug)]
pub struct Device {
    mirror: ObjectMirror,
    interface: Field<String>,
    ip_interface: Field<String>,
    udi: Field<String>,
    driver: Field<String>,
    device_type: Field<u32>,
    state: Field<u32>,
    managed: Field<bool>,
    capabilities: Field<u32>,
    active_connection: Field<Option<String>>,
    ip4_config: Field<Option<String>>,
}

impl Device {
    /// Builds the device around `mirror` and registers its properties.
    pub fn new(mirror: ObjectMirror) -> Result<Self> {
        let device = Self {
            mirror,
            interface: Field::default(),
            ip_interface: Field::default(),
            udi: Field::default(),
            driver: Field::default(),
            device_type: Field::default(),
            state: Field::default(),
            managed: Field::default(),
            capabilities: Field::default(),
            active_connection: Field::default(),
            ip4_config: Field::default(),
        };

        device.mirror.register_properties(
            DEVICE_INTERFACE,
            vec![
                PropertyInfo::new("interface", &device.interface),
                PropertyInfo::new("ip-interface", &device.ip_interface),
                PropertyInfo::new("udi", &device.udi),
                PropertyInfo::new("driver", &device.driver),
                PropertyInfo::new("device-type", &device.device_type),
                PropertyInfo::new("state", &device.state),
                PropertyInfo::new("managed", &device.managed),
                PropertyInfo::new("capabilities", &device.capabilities),
                PropertyInfo::new("active-connection", &device.active_connection),
                PropertyInfo::new("ip4-config", &device.ip4_config),
                // Deprecated, superseded by Ip4Config.
                PropertyInfo::ignored("ip4-address"),
            ],
        );

        Ok(device)
    }

    /// Returns the backing mirror.
    pub fn mirror(&self) -> &ObjectMirror {
        &self.mirror
    }

    /// Returns the object path.
    pub fn path(&self) -> &str {
        self.mirror.path()
    }

    /// Kernel interface name.
    pub async fn interface(&self) -> String {
        self.mirror.ensure_initialized().await;
        self.interface.get()
    }

    /// IP interface name, which may differ from [`interface`](Self::interface)
    /// for devices that route through another link.
    pub async fn ip_interface(&self) -> String {
        self.mirror.ensure_initialized().await;
        self.ip_interface.get()
    }

    /// Device identifier from the hardware layer (e.g. a sysfs path).
    pub async fn udi(&self) -> String {
        self.mirror.ensure_initialized().await;
        self.udi.get()
    }

    /// Kernel driver name.
    pub async fn driver(&self) -> String {
        self.mirror.ensure_initialized().await;
        self.driver.get()
    }

    /// Device type, read from `DeviceType`.
    pub async fn kind(&self) -> DeviceKind {
        self.mirror.ensure_initialized().await;
        DeviceKind::from_device_type(self.device_type.get())
    }

    /// Current device state.
    pub async fn state(&self) -> DeviceState {
        self.mirror.ensure_initialized().await;
        DeviceState::from_u32(self.state.get())
    }

    /// Whether NetworkManager manages the device.
    pub async fn managed(&self) -> bool {
        self.mirror.ensure_initialized().await;
        self.managed.get()
    }

    /// Capability flags as published.
    pub async fn capabilities(&self) -> u32 {
        self.mirror.ensure_initialized().await;
        self.capabilities.get()
    }

    /// Path of the active connection, `None` when the device is idle.
    pub async fn active_connection(&self) -> Option<String> {
        self.mirror.ensure_initialized().await;
        self.active_connection.get()
    }

    /// Path of the IPv4 configuration, `None` when unconfigured.
    pub async fn ip4_config(&self) -> Option<String> {
        self.mirror.ensure_initialized().await;
        self.ip4_config.get()
    }

    /// Re-reads the device state.
    pub async fn refresh_state(&self) -> DeviceState {
        self.mirror.reload_property(DEVICE_INTERFACE, "State").await;
        DeviceState::from_u32(self.state.get())
    }

    /// Asks NetworkManager to manage (or stop managing) the device.
    ///
    /// The local value changes only when the remote side reports it.
    pub fn set_managed(&self, managed: bool) {
        self.mirror
            .set_property(DEVICE_INTERFACE, "Managed", Value::Bool(managed));
    }
}

impl RemoteObject for Device {
    const TYPE_NAME: &'static str = "NMDevice";

    fn mirror(&self) -> &ObjectMirror {
        &self.mirror
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use nm_object::{Connection, MockBus, PropertyMap};
    use pretty_assertions::assert_eq;
    use std::rc::Rc;

    const PATH: &str = "/org/freedesktop/NetworkManager/Devices/1";

    fn run<F: std::future::Future>(fut: F) -> F::Output {
        let rt = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .unwrap();
        tokio::task::LocalSet::new().block_on(&rt, fut)
    }

    fn eth0() -> PropertyMap {
        let mut props = PropertyMap::new();
        props.insert("Interface".into(), Value::from("eth0"));
        props.insert("IpInterface".into(), Value::from("eth0"));
        props.insert("Udi".into(), Value::from("/sys/devices/pci0000:00/net/eth0"));
        props.insert("Driver".into(), Value::from("e1000e"));
        props.insert("DeviceType".into(), Value::U32(1));
        props.insert("State".into(), Value::U32(100));
        props.insert("Managed".into(), Value::Bool(true));
        props.insert("Capabilities".into(), Value::U32(3));
        props.insert(
            "ActiveConnection".into(),
            Value::object_path("/org/freedesktop/NetworkManager/ActiveConnection/4"),
        );
        props.insert("Ip4Config".into(), Value::null_object_path());
        props.insert("Ip4Address".into(), Value::U32(0x0100_a8c0));
        props
    }

    #[test]
    fn test_getters_initialize_lazily() {
        run(async {
            let bus = Rc::new(MockBus::new());
            bus.add_object(PATH, DEVICE_INTERFACE, eth0());
            let mirror = ObjectMirror::new(Connection::new(bus.clone()), PATH, "NMDevice").unwrap();
            let device = Device::new(mirror).unwrap();

            assert!(!device.mirror().is_initialized());
            assert_eq!(device.interface().await, "eth0");
            assert!(device.mirror().is_initialized());
            assert_eq!(device.driver().await, "e1000e");
            assert_eq!(device.kind().await, DeviceKind::Ethernet);
            assert_eq!(device.state().await, DeviceState::Activated);
            assert!(device.managed().await);
            assert_eq!(device.capabilities().await, 3);
            assert_eq!(
                device.active_connection().await.as_deref(),
                Some("/org/freedesktop/NetworkManager/ActiveConnection/4")
            );
            assert_eq!(device.ip4_config().await, None);
            assert_eq!(bus.call_count(nm_object::BusMethod::GetAll), 1);
        });
    }

    #[test]
    fn test_set_managed_goes_remote() {
        run(async {
            let bus = Rc::new(MockBus::new());
            bus.add_object(PATH, DEVICE_INTERFACE, eth0());
            bus.set_echo(true);
            let mirror = ObjectMirror::new(Connection::new(bus.clone()), PATH, "NMDevice").unwrap();
            let device = Device::new(mirror).unwrap();
            assert!(device.managed().await);

            device.set_managed(false);
            assert!(device.managed.get());
            for _ in 0..16 {
                tokio::task::yield_now().await;
            }
            assert!(!device.managed.get());
        });
    }
}
