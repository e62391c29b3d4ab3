//! Shared fixtures for integration tests
#![allow(dead_code)]

use async_trait::async_trait;
use nvm_core::events::{SyslogLevel, SyslogSink, Uid};
use nvm_core::types::{
    Capabilities, DeviceDiscovery, DevicePerformance, DeviceStatus, FeatureFlags, HealthState,
    LockState, NamespaceCreateSettings, NamespaceDetails, NamespaceDiscovery, NamespaceHealth,
    Pool, PoolType, Sensor, SensorKind,
};
use nvm_core::{FwCommand, FwStatus, LibConfig, Nvm, NvmDriver, NvmError};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tempfile::TempDir;

pub const POOL_UID: Uid = Uid([0xAA; 16]);

pub fn device(n: u8) -> DeviceDiscovery {
    DeviceDiscovery {
        uid: Uid([n; 16]),
        handle: n as u32,
        manufacturer: 0x89,
        serial_number: format!("SN{:04}", n),
        model_number: "MN: 0123456789".to_string(),
        fw_revision: "01.02.00.5375".to_string(),
        capacity: 128 << 30,
        lock_state: LockState::Disabled,
        manageable: true,
    }
}

/// Scripted in-memory platform with per-call counters.
pub struct MockDriver {
    pub admin: AtomicBool,
    pub available: AtomicBool,
    pub devices: Mutex<Vec<DeviceDiscovery>>,
    pub namespaces: Mutex<Vec<NamespaceDetails>>,
    pub pool_free: Mutex<u64>,
    pub fail_sensors: AtomicBool,
    pub passthrough_status: Mutex<Option<FwStatus>>,
    pub commands: Mutex<Vec<FwCommand>>,
    calls: Mutex<HashMap<&'static str, usize>>,
}

impl MockDriver {
    pub fn new(devices: Vec<DeviceDiscovery>) -> Self {
        Self {
            admin: AtomicBool::new(true),
            available: AtomicBool::new(true),
            devices: Mutex::new(devices),
            namespaces: Mutex::new(Vec::new()),
            pool_free: Mutex::new(64 << 30),
            fail_sensors: AtomicBool::new(false),
            passthrough_status: Mutex::new(None),
            commands: Mutex::new(Vec::new()),
            calls: Mutex::new(HashMap::new()),
        }
    }

    fn hit(&self, name: &'static str) {
        *self.calls.lock().unwrap().entry(name).or_default() += 1;
    }

    pub fn calls(&self, name: &str) -> usize {
        self.calls.lock().unwrap().get(name).copied().unwrap_or(0)
    }

    fn handle_of(&self, handle: u32) -> Result<DeviceDiscovery, NvmError> {
        self.devices
            .lock()
            .unwrap()
            .iter()
            .find(|d| d.handle == handle)
            .cloned()
            .ok_or(NvmError::BadDevice)
    }
}

#[async_trait]
impl NvmDriver for MockDriver {
    fn caller_is_admin(&self) -> bool {
        self.admin.load(Ordering::SeqCst)
    }

    fn is_available(&self) -> bool {
        self.available.load(Ordering::SeqCst)
    }

    async fn get_capabilities(&self) -> Result<Capabilities, NvmError> {
        self.hit("get_capabilities");
        Ok(Capabilities {
            features: FeatureFlags::all_enabled(),
            block_sizes: vec![512, 4096],
            min_namespace_size: 1 << 30,
        })
    }

    async fn get_devices(&self) -> Result<Vec<DeviceDiscovery>, NvmError> {
        self.hit("get_devices");
        Ok(self.devices.lock().unwrap().clone())
    }

    async fn get_device_status(&self, handle: u32) -> Result<DeviceStatus, NvmError> {
        self.hit("get_device_status");
        self.handle_of(handle)?;
        Ok(DeviceStatus {
            health: HealthState::Normal,
            is_new: false,
            last_shutdown_clean: true,
            viral: false,
        })
    }

    async fn get_sensors(&self, handle: u32) -> Result<Vec<Sensor>, NvmError> {
        self.hit("get_sensors");
        self.handle_of(handle)?;
        if self.fail_sensors.load(Ordering::SeqCst) {
            return Err(NvmError::DeviceBusy);
        }
        Ok(vec![Sensor {
            kind: SensorKind::MediaTemperature,
            reading: 35,
            alarm_threshold: Some(81),
            alarm_enabled: true,
        }])
    }

    async fn get_performance(&self, handle: u32) -> Result<DevicePerformance, NvmError> {
        self.hit("get_performance");
        self.handle_of(handle)?;
        Ok(DevicePerformance {
            time: 1_700_000_000,
            bytes_read: 4096,
            bytes_written: 8192,
            read_requests: 1,
            write_requests: 2,
        })
    }

    async fn get_platform_config_data(&self, handle: u32) -> Result<Vec<u8>, NvmError> {
        self.hit("get_platform_config_data");
        self.handle_of(handle)?;
        Ok(vec![0x50, 0x43, 0x44, handle as u8])
    }

    async fn get_pools(&self) -> Result<Vec<Pool>, NvmError> {
        self.hit("get_pools");
        let devices = self.devices.lock().unwrap();
        Ok(vec![Pool {
            uid: POOL_UID,
            pool_type: PoolType::Persistent,
            capacity: devices.iter().map(|d| d.capacity).sum(),
            free_capacity: *self.pool_free.lock().unwrap(),
            device_uids: devices.iter().map(|d| d.uid).collect(),
        }])
    }

    async fn get_namespaces(&self) -> Result<Vec<NamespaceDiscovery>, NvmError> {
        self.hit("get_namespaces");
        Ok(self
            .namespaces
            .lock()
            .unwrap()
            .iter()
            .map(|n| n.discovery.clone())
            .collect())
    }

    async fn get_namespace_details(&self, uid: &Uid) -> Result<NamespaceDetails, NvmError> {
        self.hit("get_namespace_details");
        self.namespaces
            .lock()
            .unwrap()
            .iter()
            .find(|n| n.discovery.uid == *uid)
            .cloned()
            .ok_or(NvmError::BadNamespace)
    }

    async fn create_namespace(
        &self,
        pool_uid: &Uid,
        settings: &NamespaceCreateSettings,
    ) -> Result<Uid, NvmError> {
        self.hit("create_namespace");
        let uid = Uid::generate();
        let size = u64::from(settings.block_size) * settings.block_count;
        *self.pool_free.lock().unwrap() -= size;
        self.namespaces.lock().unwrap().push(NamespaceDetails {
            discovery: NamespaceDiscovery {
                uid,
                name: settings.name.clone(),
            },
            pool_uid: *pool_uid,
            namespace_type: settings.namespace_type,
            block_size: settings.block_size,
            block_count: settings.block_count,
            health: NamespaceHealth::Normal,
            enabled: true,
        });
        Ok(uid)
    }

    async fn modify_namespace_name(&self, uid: &Uid, name: &str) -> Result<(), NvmError> {
        self.hit("modify_namespace_name");
        let mut namespaces = self.namespaces.lock().unwrap();
        let ns = namespaces
            .iter_mut()
            .find(|n| n.discovery.uid == *uid)
            .ok_or(NvmError::BadNamespace)?;
        ns.discovery.name = name.to_string();
        Ok(())
    }

    async fn delete_namespace(&self, uid: &Uid) -> Result<(), NvmError> {
        self.hit("delete_namespace");
        let mut namespaces = self.namespaces.lock().unwrap();
        let before = namespaces.len();
        namespaces.retain(|n| n.discovery.uid != *uid);
        if namespaces.len() == before {
            return Err(NvmError::BadNamespace);
        }
        Ok(())
    }

    async fn passthrough(&self, command: &FwCommand) -> Result<Vec<u8>, FwStatus> {
        self.hit("passthrough");
        self.commands.lock().unwrap().push(command.clone());
        if let Some(status) = *self.passthrough_status.lock().unwrap() {
            return Err(status);
        }
        Ok(Vec::new())
    }
}

/// Records everything written to the system log.
#[derive(Default)]
pub struct RecordingSyslog {
    pub lines: Mutex<Vec<(SyslogLevel, String)>>,
}

impl SyslogSink for RecordingSyslog {
    fn write(&self, level: SyslogLevel, _source: &str, message: &str) {
        self.lines.lock().unwrap().push((level, message.to_string()));
    }
}

pub async fn open_test_nvm(driver: Arc<MockDriver>) -> (TempDir, Nvm) {
    let dir = TempDir::new().unwrap();
    let mut config = LibConfig::with_store_path(dir.path().join("nvm.db"));
    config.poll_minute_ms = 20;
    let nvm = Nvm::create(config, driver).await.unwrap();
    (dir, nvm)
}

pub fn counter() -> Arc<AtomicUsize> {
    Arc::new(AtomicUsize::new(0))
}
