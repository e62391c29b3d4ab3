//! Transport and platform collaborator
//!
//! Everything that reaches the hardware goes through [`NvmDriver`]. Inventory
//! reads are typed; device mutations travel through the firmware mailbox as
//! opaque [`FwCommand`]s.

use crate::error::{NvmError, Result};
use crate::events::types::Uid;
use crate::types::{
    Capabilities, DeviceDiscovery, DevicePerformance, DeviceStatus, NamespaceCreateSettings,
    NamespaceDetails, NamespaceDiscovery, Pool, Sensor,
};
use async_trait::async_trait;

pub const OPCODE_SET_SECURITY_INFO: u8 = 0x03;
pub const SUBOP_SET_PASSPHRASE: u8 = 0xF1;
pub const SUBOP_DISABLE_PASSPHRASE: u8 = 0xF2;
pub const SUBOP_SECURE_ERASE: u8 = 0xF5;
pub const SUBOP_FREEZE_LOCK: u8 = 0xF6;
pub const OPCODE_SET_FEATURES: u8 = 0x05;
pub const SUBOP_ALARM_THRESHOLDS: u8 = 0x01;
pub const OPCODE_SET_ADMIN_FEATURES: u8 = 0x07;
pub const SUBOP_PLATFORM_CONFIG_DATA: u8 = 0x01;
pub const OPCODE_UPDATE_FIRMWARE: u8 = 0x09;
pub const SUBOP_UPDATE_FW: u8 = 0x00;

/// Fixed width of a passphrase field in a security payload.
pub const PASSPHRASE_FIELD_LEN: usize = 32;

/// One firmware mailbox request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FwCommand {
    pub device_handle: u32,
    pub opcode: u8,
    pub sub_opcode: u8,
    pub input: Vec<u8>,
}

impl FwCommand {
    pub fn new(device_handle: u32, opcode: u8, sub_opcode: u8) -> Self {
        Self {
            device_handle,
            opcode,
            sub_opcode,
            input: Vec::new(),
        }
    }

    pub fn with_input(mut self, input: Vec<u8>) -> Self {
        self.input = input;
        self
    }
}

/// Non-success mailbox status.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FwStatus {
    InvalidParameter,
    DataTransferError,
    InternalDeviceError,
    UnsupportedCommand,
    DeviceBusy,
    InvalidPassphrase,
    FirmwareAuthFailed,
    InvalidSecurityState,
    PassphraseLimit,
    DriverFailed,
}

impl From<FwStatus> for NvmError {
    fn from(status: FwStatus) -> Self {
        match status {
            FwStatus::InvalidParameter => NvmError::InvalidParameter,
            FwStatus::DataTransferError => NvmError::DataTransferError,
            FwStatus::InternalDeviceError => NvmError::DeviceError,
            FwStatus::UnsupportedCommand => NvmError::NotSupported,
            FwStatus::DeviceBusy => NvmError::DeviceBusy,
            FwStatus::InvalidPassphrase => NvmError::BadPassphrase,
            FwStatus::FirmwareAuthFailed => NvmError::BadFirmware,
            FwStatus::InvalidSecurityState => NvmError::BadSecurityState,
            FwStatus::PassphraseLimit => NvmError::LimitPassphrase,
            FwStatus::DriverFailed => NvmError::DriverFailed,
        }
    }
}

#[async_trait]
pub trait NvmDriver: Send + Sync {
    /// Whether the calling process holds administrative rights.
    fn caller_is_admin(&self) -> bool;

    /// Whether the platform driver is loaded and compatible with this library.
    fn is_available(&self) -> bool {
        true
    }

    async fn get_capabilities(&self) -> Result<Capabilities>;

    async fn get_devices(&self) -> Result<Vec<DeviceDiscovery>>;

    async fn get_device_status(&self, device_handle: u32) -> Result<DeviceStatus>;

    async fn get_sensors(&self, device_handle: u32) -> Result<Vec<Sensor>>;

    async fn get_performance(&self, device_handle: u32) -> Result<DevicePerformance>;

    async fn get_platform_config_data(&self, device_handle: u32) -> Result<Vec<u8>>;

    async fn get_pools(&self) -> Result<Vec<Pool>>;

    async fn get_namespaces(&self) -> Result<Vec<NamespaceDiscovery>>;

    async fn get_namespace_details(&self, uid: &Uid) -> Result<NamespaceDetails>;

    /// Create a namespace in `pool_uid`, returning its uid.
    async fn create_namespace(
        &self,
        pool_uid: &Uid,
        settings: &NamespaceCreateSettings,
    ) -> Result<Uid>;

    async fn modify_namespace_name(&self, uid: &Uid, name: &str) -> Result<()>;

    async fn delete_namespace(&self, uid: &Uid) -> Result<()>;

    /// Synchronous firmware mailbox exchange. Returns the output payload.
    async fn passthrough(&self, command: &FwCommand) -> std::result::Result<Vec<u8>, FwStatus>;
}

/// Send `command` and map a failed mailbox status into the error taxonomy.
pub async fn send_command(driver: &dyn NvmDriver, command: &FwCommand) -> Result<Vec<u8>> {
    driver.passthrough(command).await.map_err(|status| {
        tracing::warn!(
            device_handle = command.device_handle,
            opcode = command.opcode,
            sub_opcode = command.sub_opcode,
            ?status,
            "Firmware command failed"
        );
        NvmError::from(status)
    })
}

/// Zero-padded fixed-width passphrase field.
pub fn passphrase_field(passphrase: &str) -> [u8; PASSPHRASE_FIELD_LEN] {
    let mut field = [0u8; PASSPHRASE_FIELD_LEN];
    let bytes = passphrase.as_bytes();
    let len = bytes.len().min(PASSPHRASE_FIELD_LEN);
    field[..len].copy_from_slice(&bytes[..len]);
    field
}
