//! Device type and state enumerations as published on the bus.

use std::fmt;

/// Device state (`State` property).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DeviceState {
    Unknown,
    Unmanaged,
    Unavailable,
    Disconnected,
    Prepare,
    Config,
    NeedAuth,
    IpConfig,
    IpCheck,
    Secondaries,
    Activated,
    Deactivating,
    Failed,
}

impl DeviceState {
    /// Maps the wire value; unrecognized values become `Unknown`.
    pub fn from_u32(value: u32) -> Self {
        match value {
            10 => DeviceState::Unmanaged,
            20 => DeviceState::Unavailable,
            30 => DeviceState::Disconnected,
            40 => DeviceState::Prepare,
            50 => DeviceState::Config,
            60 => DeviceState::NeedAuth,
            70 => DeviceState::IpConfig,
            80 => DeviceState::IpCheck,
            90 => DeviceState::Secondaries,
            100 => DeviceState::Activated,
            110 => DeviceState::Deactivating,
            120 => DeviceState::Failed,
            _ => DeviceState::Unknown,
        }
    }

    /// Returns the wire value.
    pub fn as_u32(&self) -> u32 {
        match self {
            DeviceState::Unknown => 0,
            DeviceState::Unmanaged => 10,
            DeviceState::Unavailable => 20,
            DeviceState::Disconnected => 30,
            DeviceState::Prepare => 40,
            DeviceState::Config => 50,
            DeviceState::NeedAuth => 60,
            DeviceState::IpConfig => 70,
            DeviceState::IpCheck => 80,
            DeviceState::Secondaries => 90,
            DeviceState::Activated => 100,
            DeviceState::Deactivating => 110,
            DeviceState::Failed => 120,
        }
    }

    /// Returns true between `Prepare` and `Secondaries`, inclusive.
    pub fn is_activating(&self) -> bool {
        (40..=90).contains(&self.as_u32())
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            DeviceState::Unknown => "unknown",
            DeviceState::Unmanaged => "unmanaged",
            DeviceState::Unavailable => "unavailable",
            DeviceState::Disconnected => "disconnected",
            DeviceState::Prepare => "prepare",
            DeviceState::Config => "config",
            DeviceState::NeedAuth => "need-auth",
            DeviceState::IpConfig => "ip-config",
            DeviceState::IpCheck => "ip-check",
            DeviceState::Secondaries => "secondaries",
            DeviceState::Activated => "activated",
            DeviceState::Deactivating => "deactivating",
            DeviceState::Failed => "failed",
        }
    }
}

impl fmt::Display for DeviceState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Device type (`DeviceType` property).
///
/// Only the types with their own mirror get a variant; everything else is
/// `Other` and is mirrored as a plain device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DeviceKind {
    Unknown,
    Ethernet,
    Wifi,
    Bond,
    Vlan,
    Bridge,
    Generic,
    Team,
    Other(u32),
}

/// Wire value of the team device type.
pub const DEVICE_TYPE_TEAM: u32 = 15;

impl DeviceKind {
    /// Maps the wire value.
    pub fn from_device_type(value: u32) -> Self {
        match value {
            0 => DeviceKind::Unknown,
            1 => DeviceKind::Ethernet,
            2 => DeviceKind::Wifi,
            10 => DeviceKind::Bond,
            11 => DeviceKind::Vlan,
            13 => DeviceKind::Bridge,
            14 => DeviceKind::Generic,
            DEVICE_TYPE_TEAM => DeviceKind::Team,
            other => DeviceKind::Other(other),
        }
    }

    /// Returns true for types that aggregate other devices.
    pub fn is_master(&self) -> bool {
        matches!(self, DeviceKind::Bond | DeviceKind::Bridge | DeviceKind::Team)
    }
}

impl fmt::Display for DeviceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DeviceKind::Unknown => f.write_str("unknown"),
            DeviceKind::Ethernet => f.write_str("ethernet"),
            DeviceKind::Wifi => f.write_str("wifi"),
            DeviceKind::Bond => f.write_str("bond"),
            DeviceKind::Vlan => f.write_str("vlan"),
            DeviceKind::Bridge => f.write_str("bridge"),
            DeviceKind::Generic => f.write_str("generic"),
            DeviceKind::Team => f.write_str("team"),
            DeviceKind::Other(v) => write!(f, "type-{}", v),
        }
    }
}
