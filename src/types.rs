//! Hardware inventory value types

use crate::events::types::Uid;
use serde::{Deserialize, Serialize};

/// Feature switches reported by the platform.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct FeatureFlags {
    pub get_devices: bool,
    pub get_device_details: bool,
    pub get_device_performance: bool,
    pub modify_device_security: bool,
    pub erase_device_data: bool,
    pub update_device_fw: bool,
    pub modify_device_settings: bool,
    pub get_pools: bool,
    pub get_namespaces: bool,
    pub create_namespace: bool,
    pub delete_namespace: bool,
    pub rename_namespace: bool,
}

impl FeatureFlags {
    pub fn all_enabled() -> Self {
        Self {
            get_devices: true,
            get_device_details: true,
            get_device_performance: true,
            modify_device_security: true,
            erase_device_data: true,
            update_device_fw: true,
            modify_device_settings: true,
            get_pools: true,
            get_namespaces: true,
            create_namespace: true,
            delete_namespace: true,
            rename_namespace: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Capabilities {
    pub features: FeatureFlags,
    pub block_sizes: Vec<u32>,
    pub min_namespace_size: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum LockState {
    #[default]
    Unknown,
    Disabled,
    Unlocked,
    Locked,
    Frozen,
    PassphraseLimit,
    NotSupported,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceDiscovery {
    pub uid: Uid,
    pub handle: u32,
    pub manufacturer: u16,
    pub serial_number: String,
    pub model_number: String,
    pub fw_revision: String,
    pub capacity: u64,
    pub lock_state: LockState,
    pub manageable: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum HealthState {
    #[default]
    Unknown,
    Normal,
    NonCritical,
    Critical,
    Fatal,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct DeviceStatus {
    pub health: HealthState,
    pub is_new: bool,
    pub last_shutdown_clean: bool,
    pub viral: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SensorKind {
    MediaTemperature,
    ControllerTemperature,
    SpareCapacity,
    PercentageUsed,
    PowerOnTime,
    UnsafeShutdowns,
}

impl SensorKind {
    pub fn name(&self) -> &'static str {
        match self {
            SensorKind::MediaTemperature => "media temperature",
            SensorKind::ControllerTemperature => "controller temperature",
            SensorKind::SpareCapacity => "spare capacity",
            SensorKind::PercentageUsed => "percentage used",
            SensorKind::PowerOnTime => "power on time",
            SensorKind::UnsafeShutdowns => "unsafe shutdowns",
        }
    }

    /// Sensors whose alarm threshold can be changed.
    pub fn has_settable_threshold(&self) -> bool {
        matches!(
            self,
            SensorKind::MediaTemperature
                | SensorKind::ControllerTemperature
                | SensorKind::SpareCapacity
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Sensor {
    pub kind: SensorKind,
    pub reading: i64,
    pub alarm_threshold: Option<i64>,
    pub alarm_enabled: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SensorSettings {
    pub alarm_enabled: bool,
    pub alarm_threshold: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct DevicePerformance {
    pub time: i64,
    pub bytes_read: u64,
    pub bytes_written: u64,
    pub read_requests: u64,
    pub write_requests: u64,
}

/// Everything known about one device. Sub-reads that failed are left empty.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceDetails {
    pub discovery: DeviceDiscovery,
    pub status: Option<DeviceStatus>,
    pub sensors: Vec<Sensor>,
    pub performance: Option<DevicePerformance>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PoolType {
    Persistent,
    PersistentMirror,
    Volatile,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Pool {
    pub uid: Uid,
    pub pool_type: PoolType,
    pub capacity: u64,
    pub free_capacity: u64,
    pub device_uids: Vec<Uid>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NamespaceDiscovery {
    pub uid: Uid,
    pub name: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum NamespaceType {
    Storage,
    AppDirect,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum NamespaceHealth {
    #[default]
    Unknown,
    Normal,
    NonFunctional,
    Critical,
    BrokenMirror,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NamespaceDetails {
    pub discovery: NamespaceDiscovery,
    pub pool_uid: Uid,
    pub namespace_type: NamespaceType,
    pub block_size: u32,
    pub block_count: u64,
    pub health: NamespaceHealth,
    pub enabled: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NamespaceCreateSettings {
    pub name: String,
    pub namespace_type: NamespaceType,
    pub block_size: u32,
    pub block_count: u64,
}

/// Longest namespace friendly name.
pub const MAX_NAMESPACE_NAME_LEN: usize = 64;
