//! Test fixtures for mirror tests
//!
//! Provides a mock bus with short timeouts, property maps for common device
//! setups and a small consumer type.

use std::cell::RefCell;
use std::rc::Rc;
use std::time::Duration;

use nm_object::{
    CallTimeouts, Connection, Field, MockBus, ObjectMirror, PropertyInfo, PropertyMap,
    RemoteObject, Result, Value,
};

/// Interface used by [`TestDevice`].
pub const TEST_INTERFACE: &str = "org.freedesktop.NetworkManager.Device.Test";

/// Timeout applied to every call on a [`TestBus`].
pub const TEST_TIMEOUT: Duration = Duration::from_millis(100);

/// Builds a property map from remote name / value pairs.
pub fn props<I, K, V>(pairs: I) -> PropertyMap
where
    I: IntoIterator<Item = (K, V)>,
    K: Into<String>,
    V: Into<Value>,
{
    pairs
        .into_iter()
        .map(|(k, v)| (k.into(), v.into()))
        .collect()
}

/// Returns the device object path for index `n`.
pub fn device_path(n: u32) -> String {
    format!("/org/freedesktop/NetworkManager/Devices/{}", n)
}

/// A mock bus and a connection to it.
pub struct TestBus {
    /// The bus, for scripting and inspection
    pub bus: Rc<MockBus>,
    /// Connection with [`TEST_TIMEOUT`] on every call
    pub connection: Connection,
}

impl TestBus {
    pub fn new() -> Self {
        let bus = Rc::new(MockBus::new());
        let connection = Connection::with_timeouts(
            bus.clone(),
            CallTimeouts {
                get_all: TEST_TIMEOUT,
                get: TEST_TIMEOUT,
                set: TEST_TIMEOUT,
            },
        );
        Self { bus, connection }
    }

    /// A second, independent connection to the same bus.
    pub fn second_connection(&self) -> Connection {
        Connection::with_timeouts(self.bus.clone(), self.connection.timeouts())
    }

    /// Creates a detached mirror for `path`.
    pub fn mirror(&self, path: &str) -> ObjectMirror {
        ObjectMirror::new(self.connection.clone(), path, TestDevice::TYPE_NAME)
            .expect("Invalid test path")
    }
}

impl Default for TestBus {
    fn default() -> Self {
        Self::new()
    }
}

/// Minimal consumer mirroring a handful of [`TEST_INTERFACE`] properties.
#[derive(Debug)]
pub struct TestDevice {
    pub mirror: ObjectMirror,
    pub speed: Field<u32>,
    pub carrier: Field<bool>,
    pub driver: Field<String>,
    pub ip4_config: Field<Option<String>>,
}

impl TestDevice {
    /// Registers `speed`, `carrier`, `driver` and `ip4-config`; `hw-address`
    /// is acknowledged but not mirrored.
    pub fn new(mirror: ObjectMirror) -> Result<Self> {
        let device = Self {
            mirror,
            speed: Field::default(),
            carrier: Field::default(),
            driver: Field::default(),
            ip4_config: Field::default(),
        };
        device.mirror.register_properties(
            TEST_INTERFACE,
            vec![
                PropertyInfo::new("speed", &device.speed),
                PropertyInfo::new("carrier", &device.carrier),
                PropertyInfo::new("driver", &device.driver),
                PropertyInfo::new("ip4-config", &device.ip4_config),
                PropertyInfo::ignored("hw-address"),
            ],
        );
        Ok(device)
    }
}

impl RemoteObject for TestDevice {
    const TYPE_NAME: &'static str = "TestDevice";

    fn mirror(&self) -> &ObjectMirror {
        &self.mirror
    }
}

/// Records the names flushed by a mirror, in emission order.
#[derive(Clone, Default)]
pub struct NotifyRecorder {
    seen: Rc<RefCell<Vec<String>>>,
}

impl NotifyRecorder {
    /// Installs a recording handler on `mirror`.
    pub fn attach(mirror: &ObjectMirror) -> Self {
        let recorder = Self::default();
        let seen = recorder.seen.clone();
        mirror.connect_notify(move |_, name| seen.borrow_mut().push(name.to_string()));
        recorder
    }

    /// Returns every name recorded so far.
    pub fn names(&self) -> Vec<String> {
        self.seen.borrow().clone()
    }

    /// Returns how often `name` was recorded.
    pub fn count(&self, name: &str) -> usize {
        self.seen.borrow().iter().filter(|n| *n == name).count()
    }

    pub fn clear(&self) {
        self.seen.borrow_mut().clear();
    }
}

/// Device property fixtures
pub mod device_fixtures {
    use super::*;

    /// Base device properties of an activated Ethernet device.
    pub fn ethernet(iface: &str) -> PropertyMap {
        let mut map = props([
            ("Interface", Value::from(iface)),
            ("IpInterface", Value::from(iface)),
            ("Udi", Value::from(format!("/sys/devices/virtual/net/{}", iface))),
            ("Driver", Value::from("e1000e")),
            ("DeviceType", Value::U32(1)),
            ("State", Value::U32(100)),
            ("Managed", Value::Bool(true)),
            ("Capabilities", Value::U32(3)),
        ]);
        map.insert("ActiveConnection".into(), Value::null_object_path());
        map.insert("Ip4Config".into(), Value::null_object_path());
        map
    }

    /// Base device properties of a team master.
    pub fn team(iface: &str) -> PropertyMap {
        let mut map = ethernet(iface);
        map.insert("Driver".into(), Value::from("team"));
        map.insert("DeviceType".into(), Value::U32(15));
        map.insert("State".into(), Value::U32(30));
        map
    }

    /// Team interface properties with the given port paths.
    pub fn team_ports(hw_address: &str, ports: &[String]) -> PropertyMap {
        props([
            ("HwAddress", Value::from(hw_address)),
            ("Carrier", Value::Bool(!ports.is_empty())),
            (
                "Slaves",
                Value::Array(ports.iter().map(|p| Value::object_path(p.clone())).collect()),
            ),
        ])
    }

    /// [`TEST_INTERFACE`](super::TEST_INTERFACE) properties.
    pub fn test_device(speed: u32, driver: &str) -> PropertyMap {
        props([
            ("Speed", Value::U32(speed)),
            ("Carrier", Value::Bool(true)),
            ("Driver", Value::from(driver)),
            ("HwAddress", Value::from("00:11:22:33:44:55")),
        ])
    }
}
