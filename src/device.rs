//! Device inventory and device mutations
//!
//! Reads consult the [`ProcessContext`] first and fill it on a miss.
//! Mutations validate everything up front, invalidate the cached inventory
//! only once the firmware accepted the command, then record a MGMT event.

use crate::context::ProcessContext;
use crate::driver::{self, FwCommand, NvmDriver};
use crate::error::{NvmError, PartialResult, Result};
use crate::events::messages::{
    MGMT_FIRMWARE_UPDATE, MGMT_SECURITY_FROZEN, MGMT_SECURITY_PASSWORD_REMOVED,
    MGMT_SECURITY_PASSWORD_SET, MGMT_SECURITY_SECURE_ERASE, MGMT_SENSOR_SETTINGS_CHANGE,
};
use crate::events::store::EventStore;
use crate::events::types::{DiagnosticResult, EventSeverity, EventType, Uid};
use crate::types::{
    Capabilities, DeviceDetails, DeviceDiscovery, FeatureFlags, LockState, SensorKind,
    SensorSettings,
};
use std::sync::Arc;

pub const MAX_PASSPHRASE_LEN: usize = 32;

pub(crate) fn require_admin(driver: &dyn NvmDriver) -> Result<()> {
    if driver.caller_is_admin() {
        Ok(())
    } else {
        Err(NvmError::InvalidPermissions)
    }
}

/// Permission first, then a usable driver. Every hardware operation starts here.
pub(crate) fn require_access(driver: &dyn NvmDriver) -> Result<()> {
    require_admin(driver)?;
    if driver.is_available() {
        Ok(())
    } else {
        Err(NvmError::BadDriver)
    }
}

/// Capabilities from the context, fetched from the driver on a miss.
pub(crate) async fn cached_capabilities(
    driver: &dyn NvmDriver,
    context: &ProcessContext,
) -> Result<Capabilities> {
    match context.get_capabilities() {
        Err(NvmError::NotCached) => {
            let capabilities = driver.get_capabilities().await?;
            if let Err(e) = context.set_capabilities(&capabilities) {
                tracing::debug!(error = %e, "Capabilities not cached");
            }
            Ok(capabilities)
        }
        other => other,
    }
}

pub(crate) async fn require_feature(
    driver: &dyn NvmDriver,
    context: &ProcessContext,
    enabled: impl FnOnce(&FeatureFlags) -> bool,
) -> Result<()> {
    let capabilities = cached_capabilities(driver, context).await?;
    if enabled(&capabilities.features) {
        Ok(())
    } else {
        Err(NvmError::NotSupported)
    }
}

/// Record a management event. The mutation already happened, so a failure
/// here is only logged.
pub(crate) async fn log_mgmt_event(events: &EventStore, code: u16, uid: Option<Uid>, args: &[&str]) {
    if let Err(e) = events
        .store_by_parts(
            EventType::Mgmt,
            EventSeverity::Info,
            code,
            uid,
            false,
            args,
            DiagnosticResult::Unknown,
        )
        .await
    {
        tracing::warn!(code, error = %e, "Failed to record management event");
    }
}

fn passphrase_len_ok(passphrase: &str) -> bool {
    !passphrase.is_empty() && passphrase.len() <= MAX_PASSPHRASE_LEN
}

/// A passphrase the caller presents to prove ownership.
fn validate_passphrase(passphrase: &str) -> Result<()> {
    if passphrase_len_ok(passphrase) {
        Ok(())
    } else {
        Err(NvmError::InvalidParameter)
    }
}

/// A passphrase about to be installed on the device.
fn validate_new_passphrase(passphrase: &str) -> Result<()> {
    if passphrase_len_ok(passphrase) {
        Ok(())
    } else {
        Err(NvmError::InvalidPassphrase)
    }
}

/// Reject lock states no security command can proceed from.
fn check_security_state(device: &DeviceDiscovery) -> Result<()> {
    match device.lock_state {
        LockState::Frozen => Err(NvmError::SecurityFrozen),
        LockState::PassphraseLimit => Err(NvmError::LimitPassphrase),
        LockState::NotSupported => Err(NvmError::NotSupported),
        LockState::Locked | LockState::Unknown => Err(NvmError::BadSecurityState),
        LockState::Disabled | LockState::Unlocked => Ok(()),
    }
}

fn require_manageable(device: &DeviceDiscovery) -> Result<()> {
    if device.manageable {
        Ok(())
    } else {
        Err(NvmError::NotManageable)
    }
}

#[derive(Clone)]
pub struct DeviceManager {
    driver: Arc<dyn NvmDriver>,
    context: Arc<ProcessContext>,
    events: Arc<EventStore>,
}

impl DeviceManager {
    pub fn new(
        driver: Arc<dyn NvmDriver>,
        context: Arc<ProcessContext>,
        events: Arc<EventStore>,
    ) -> Self {
        Self {
            driver,
            context,
            events,
        }
    }

    pub async fn get_capabilities(&self) -> Result<Capabilities> {
        require_access(self.driver.as_ref())?;
        cached_capabilities(self.driver.as_ref(), &self.context).await
    }

    /// Device list from the context, populating it from the driver on a miss.
    async fn device_list(&self) -> Result<Vec<DeviceDiscovery>> {
        match self.context.get_devices(usize::MAX) {
            Err(NvmError::NotCached) => {
                let devices = self.driver.get_devices().await?;
                if let Err(e) = self.context.set_devices(&devices) {
                    tracing::debug!(error = %e, "Device list not cached");
                }
                Ok(devices)
            }
            other => other,
        }
    }

    async fn find_device(&self, uid: &Uid) -> Result<DeviceDiscovery> {
        self.device_list()
            .await?
            .into_iter()
            .find(|d| d.uid == *uid)
            .ok_or(NvmError::BadDevice)
    }

    pub async fn get_device_count(&self) -> Result<usize> {
        require_access(self.driver.as_ref())?;
        require_feature(self.driver.as_ref(), &self.context, |f| f.get_devices).await?;

        match usize::try_from(self.context.get_device_count()) {
            Ok(count) => Ok(count),
            Err(_) => Ok(self.device_list().await?.len()),
        }
    }

    pub async fn get_devices(&self, capacity: usize) -> Result<Vec<DeviceDiscovery>> {
        require_access(self.driver.as_ref())?;
        require_feature(self.driver.as_ref(), &self.context, |f| f.get_devices).await?;

        let devices = self.device_list().await?;
        if capacity < devices.len() {
            return Err(NvmError::ArrayTooSmall);
        }
        Ok(devices)
    }

    pub async fn get_device_discovery(&self, uid: &Uid) -> Result<DeviceDiscovery> {
        require_access(self.driver.as_ref())?;
        require_feature(self.driver.as_ref(), &self.context, |f| f.get_devices).await?;
        self.find_device(uid).await
    }

    /// Status, sensors and performance of one device.
    ///
    /// Sub-reads continue past failures; the first one is reported in the
    /// returned [`PartialResult`]. Only complete details are cached.
    pub async fn get_device_details(&self, uid: &Uid) -> Result<PartialResult<DeviceDetails>> {
        require_access(self.driver.as_ref())?;
        let capabilities = cached_capabilities(self.driver.as_ref(), &self.context).await?;
        if !capabilities.features.get_device_details {
            return Err(NvmError::NotSupported);
        }

        if let Ok(details) = self.context.get_device_details(uid) {
            return Ok(PartialResult::new(details));
        }

        let discovery = self.find_device(uid).await?;
        let handle = discovery.handle;
        let manageable = discovery.manageable;
        let mut result = PartialResult::new(DeviceDetails {
            discovery,
            status: None,
            sensors: Vec::new(),
            performance: None,
        });
        if !manageable {
            return Ok(result);
        }

        let status = self.driver.get_device_status(handle).await;
        result.value.status = result.take(status);

        let sensors = self.driver.get_sensors(handle).await;
        if let Some(sensors) = result.take(sensors) {
            result.value.sensors = sensors;
        }

        if capabilities.features.get_device_performance {
            let performance = self.driver.get_performance(handle).await;
            result.value.performance = result.take(performance);
        }

        if result.is_ok() {
            if let Err(e) = self.context.set_device_details(uid, &result.value) {
                tracing::debug!(%uid, error = %e, "Device details not cached");
            }
        } else {
            tracing::warn!(%uid, error = ?result.first_error, "Device details incomplete");
        }
        Ok(result)
    }

    /// Raw platform configuration data of one device.
    pub async fn get_device_pcd(&self, uid: &Uid) -> Result<Vec<u8>> {
        require_access(self.driver.as_ref())?;
        if let Ok(pcd) = self.context.get_device_pcd(uid) {
            return Ok(pcd);
        }

        let device = self.find_device(uid).await?;
        require_manageable(&device)?;
        let pcd = self.driver.get_platform_config_data(device.handle).await?;
        if let Err(e) = self.context.set_device_pcd(uid, &pcd) {
            tracing::debug!(%uid, error = %e, "Device PCD not cached");
        }
        Ok(pcd)
    }

    /// Replace the platform configuration data of one device.
    pub async fn write_device_pcd(&self, uid: &Uid, pcd: &[u8]) -> Result<()> {
        require_access(self.driver.as_ref())?;
        if pcd.is_empty() {
            return Err(NvmError::InvalidParameter);
        }
        let device = self.find_device(uid).await?;
        require_manageable(&device)?;

        let command = FwCommand::new(
            device.handle,
            driver::OPCODE_SET_ADMIN_FEATURES,
            driver::SUBOP_PLATFORM_CONFIG_DATA,
        )
        .with_input(pcd.to_vec());
        driver::send_command(self.driver.as_ref(), &command).await?;

        self.context.invalidate_device_pcd(uid);
        Ok(())
    }

    /// Caller and platform checks shared by every security command.
    async fn security_access(&self) -> Result<()> {
        require_access(self.driver.as_ref())?;
        require_feature(self.driver.as_ref(), &self.context, |f| {
            f.modify_device_security
        })
        .await
    }

    /// Target device of a security command, once its inputs are valid.
    async fn security_target(&self, uid: &Uid) -> Result<DeviceDiscovery> {
        let device = self.find_device(uid).await?;
        require_manageable(&device)?;
        check_security_state(&device)?;
        Ok(device)
    }

    async fn run_security_command(
        &self,
        device: &DeviceDiscovery,
        sub_opcode: u8,
        input: Vec<u8>,
    ) -> Result<()> {
        let command = FwCommand::new(device.handle, driver::OPCODE_SET_SECURITY_INFO, sub_opcode)
            .with_input(input);
        driver::send_command(self.driver.as_ref(), &command).await?;
        self.context.invalidate_devices();
        Ok(())
    }

    /// Set a new passphrase. Changing an existing one needs `old_passphrase`.
    pub async fn set_passphrase(
        &self,
        uid: &Uid,
        old_passphrase: Option<&str>,
        new_passphrase: &str,
    ) -> Result<()> {
        self.security_access().await?;
        validate_new_passphrase(new_passphrase)?;
        if let Some(old) = old_passphrase {
            validate_passphrase(old)?;
        }
        let device = self.security_target(uid).await?;
        if device.lock_state == LockState::Unlocked && old_passphrase.is_none() {
            return Err(NvmError::InvalidParameter);
        }

        let mut input = driver::passphrase_field(old_passphrase.unwrap_or_default()).to_vec();
        input.extend_from_slice(&driver::passphrase_field(new_passphrase));
        self.run_security_command(&device, driver::SUBOP_SET_PASSPHRASE, input)
            .await?;

        let uid_text = uid.to_string();
        log_mgmt_event(&self.events, MGMT_SECURITY_PASSWORD_SET, Some(*uid), &[uid_text.as_str()]).await;
        Ok(())
    }

    /// Remove the passphrase, disabling security on the device.
    pub async fn remove_passphrase(&self, uid: &Uid, passphrase: &str) -> Result<()> {
        self.security_access().await?;
        validate_passphrase(passphrase)?;
        let device = self.security_target(uid).await?;
        if device.lock_state == LockState::Disabled {
            return Err(NvmError::SecurityDisabled);
        }

        let input = driver::passphrase_field(passphrase).to_vec();
        self.run_security_command(&device, driver::SUBOP_DISABLE_PASSPHRASE, input)
            .await?;

        let uid_text = uid.to_string();
        log_mgmt_event(&self.events, MGMT_SECURITY_PASSWORD_REMOVED, Some(*uid), &[uid_text.as_str()])
            .await;
        Ok(())
    }

    pub async fn secure_erase(&self, uid: &Uid, passphrase: &str) -> Result<()> {
        self.security_access().await?;
        require_feature(self.driver.as_ref(), &self.context, |f| f.erase_device_data).await?;
        validate_passphrase(passphrase)?;
        let device = self.security_target(uid).await?;
        if device.lock_state == LockState::Disabled {
            return Err(NvmError::SecurityDisabled);
        }

        let input = driver::passphrase_field(passphrase).to_vec();
        self.run_security_command(&device, driver::SUBOP_SECURE_ERASE, input)
            .await?;

        let uid_text = uid.to_string();
        log_mgmt_event(&self.events, MGMT_SECURITY_SECURE_ERASE, Some(*uid), &[uid_text.as_str()]).await;
        Ok(())
    }

    /// Freeze the security state until the next power cycle.
    pub async fn freeze_lock(&self, uid: &Uid) -> Result<()> {
        self.security_access().await?;
        let device = self.security_target(uid).await?;
        if device.lock_state == LockState::Disabled {
            return Err(NvmError::SecurityDisabled);
        }

        self.run_security_command(&device, driver::SUBOP_FREEZE_LOCK, Vec::new())
            .await?;

        let uid_text = uid.to_string();
        log_mgmt_event(&self.events, MGMT_SECURITY_FROZEN, Some(*uid), &[uid_text.as_str()]).await;
        Ok(())
    }

    /// Stage a firmware image on the device.
    pub async fn update_firmware(&self, uid: &Uid, image: &[u8]) -> Result<()> {
        require_access(self.driver.as_ref())?;
        if image.is_empty() {
            return Err(NvmError::BadFile);
        }
        require_feature(self.driver.as_ref(), &self.context, |f| f.update_device_fw).await?;
        let device = self.find_device(uid).await?;
        require_manageable(&device)?;

        let command = FwCommand::new(
            device.handle,
            driver::OPCODE_UPDATE_FIRMWARE,
            driver::SUBOP_UPDATE_FW,
        )
        .with_input(image.to_vec());
        driver::send_command(self.driver.as_ref(), &command).await?;
        self.context.invalidate_devices();

        let uid_text = uid.to_string();
        log_mgmt_event(
            &self.events,
            MGMT_FIRMWARE_UPDATE,
            Some(*uid),
            &[uid_text.as_str(), "staged"],
        )
        .await;
        Ok(())
    }

    pub async fn set_sensor_settings(
        &self,
        uid: &Uid,
        sensor: SensorKind,
        settings: &SensorSettings,
    ) -> Result<()> {
        require_access(self.driver.as_ref())?;
        if !sensor.has_settable_threshold() {
            return Err(NvmError::NotSupported);
        }
        let threshold =
            u16::try_from(settings.alarm_threshold).map_err(|_| NvmError::InvalidParameter)?;
        require_feature(self.driver.as_ref(), &self.context, |f| {
            f.modify_device_settings
        })
        .await?;
        let device = self.find_device(uid).await?;
        require_manageable(&device)?;

        let mut input = vec![sensor as u8, u8::from(settings.alarm_enabled)];
        input.extend_from_slice(&threshold.to_le_bytes());
        let command = FwCommand::new(
            device.handle,
            driver::OPCODE_SET_FEATURES,
            driver::SUBOP_ALARM_THRESHOLDS,
        )
        .with_input(input);
        driver::send_command(self.driver.as_ref(), &command).await?;
        self.context.invalidate_devices();

        let uid_text = uid.to_string();
        log_mgmt_event(
            &self.events,
            MGMT_SENSOR_SETTINGS_CHANGE,
            Some(*uid),
            &[sensor.name(), uid_text.as_str()],
        )
        .await;
        Ok(())
    }
}
