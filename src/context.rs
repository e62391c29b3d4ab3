//! Process-wide inventory cache
//!
//! Holds snapshots of capabilities, devices (with lazily filled details and
//! platform configuration data), pools and namespaces so repeated queries do
//! not go back to the hardware. Every accessor takes the one context lock
//! for its whole duration and hands out owned copies. The lock is never held
//! across an `.await`.

use crate::error::{NvmError, Result};
use crate::events::types::Uid;
use crate::types::{
    Capabilities, DeviceDetails, DeviceDiscovery, NamespaceDetails, NamespaceDiscovery, Pool,
};
use std::sync::{Mutex, MutexGuard};

/// Count reported for a collection that is not cached.
pub const UNSET_COUNT: i32 = -1;

#[derive(Debug, Clone)]
struct DeviceEntry {
    discovery: DeviceDiscovery,
    details: Option<DeviceDetails>,
    pcd: Option<Vec<u8>>,
}

#[derive(Debug, Clone)]
struct NamespaceEntry {
    discovery: NamespaceDiscovery,
    details: Option<NamespaceDetails>,
}

#[derive(Debug, Default)]
struct ContextState {
    capabilities: Option<Capabilities>,
    devices: Option<Vec<DeviceEntry>>,
    pools: Option<Vec<Pool>>,
    namespaces: Option<Vec<NamespaceEntry>>,
}

/// Copy out a cached collection, refusing a smaller caller capacity.
fn copy_out<T: Clone, U>(
    cached: Option<&Vec<T>>,
    capacity: usize,
    map: impl Fn(&T) -> U,
) -> Result<Vec<U>> {
    let items = cached.ok_or(NvmError::NotCached)?;
    if capacity < items.len() {
        return Err(NvmError::ArrayTooSmall);
    }
    Ok(items.iter().map(map).collect())
}

fn count_of<T>(cached: Option<&Vec<T>>) -> i32 {
    cached.map_or(UNSET_COUNT, |items| items.len() as i32)
}

#[derive(Debug, Default)]
pub struct ProcessContext {
    state: Mutex<Option<ContextState>>,
}

impl ProcessContext {
    /// A handle with no context allocated yet; call [`create`](Self::create).
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Option<ContextState>> {
        self.state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Replace any existing context with a fresh, empty one.
    pub fn create(&self) {
        *self.lock() = Some(ContextState::default());
    }

    /// Drop the context and everything it caches. Safe when none exists.
    pub fn destroy(&self) {
        *self.lock() = None;
    }

    pub fn exists(&self) -> bool {
        self.lock().is_some()
    }

    fn with_state<R>(&self, f: impl FnOnce(&mut ContextState) -> Result<R>) -> Result<R> {
        match self.lock().as_mut() {
            Some(state) => f(state),
            None => Err(NvmError::NotCached),
        }
    }

    fn invalidate(&self, domain: &'static str, f: impl FnOnce(&mut ContextState)) {
        if let Some(state) = self.lock().as_mut() {
            f(state);
            crate::metrics::record_context_invalidation(domain);
            tracing::debug!(domain, "Context invalidated");
        }
    }

    pub fn get_capabilities(&self) -> Result<Capabilities> {
        self.with_state(|s| s.capabilities.clone().ok_or(NvmError::NotCached))
    }

    pub fn set_capabilities(&self, capabilities: &Capabilities) -> Result<()> {
        self.with_state(|s| {
            s.capabilities = Some(capabilities.clone());
            Ok(())
        })
    }

    /// Cached device count, or [`UNSET_COUNT`].
    pub fn get_device_count(&self) -> i32 {
        self.lock()
            .as_ref()
            .map_or(UNSET_COUNT, |s| count_of(s.devices.as_ref()))
    }

    pub fn get_devices(&self, capacity: usize) -> Result<Vec<DeviceDiscovery>> {
        self.with_state(|s| copy_out(s.devices.as_ref(), capacity, |d| d.discovery.clone()))
    }

    /// Replace the device list; cached details and PCD are dropped.
    pub fn set_devices(&self, devices: &[DeviceDiscovery]) -> Result<()> {
        self.with_state(|s| {
            s.devices = Some(
                devices
                    .iter()
                    .map(|d| DeviceEntry {
                        discovery: d.clone(),
                        details: None,
                        pcd: None,
                    })
                    .collect(),
            );
            Ok(())
        })
    }

    pub fn invalidate_devices(&self) {
        self.invalidate("devices", |s| s.devices = None);
    }

    fn device_entry<'a>(state: &'a mut ContextState, uid: &Uid) -> Result<&'a mut DeviceEntry> {
        state
            .devices
            .as_mut()
            .and_then(|devices| devices.iter_mut().find(|d| d.discovery.uid == *uid))
            .ok_or(NvmError::NotCached)
    }

    pub fn get_device_details(&self, uid: &Uid) -> Result<DeviceDetails> {
        self.with_state(|s| {
            Self::device_entry(s, uid)?
                .details
                .clone()
                .ok_or(NvmError::NotCached)
        })
    }

    /// Cache details for a device already in the device list.
    pub fn set_device_details(&self, uid: &Uid, details: &DeviceDetails) -> Result<()> {
        self.with_state(|s| {
            Self::device_entry(s, uid)?.details = Some(details.clone());
            Ok(())
        })
    }

    pub fn get_device_pcd(&self, uid: &Uid) -> Result<Vec<u8>> {
        self.with_state(|s| {
            Self::device_entry(s, uid)?
                .pcd
                .clone()
                .ok_or(NvmError::NotCached)
        })
    }

    pub fn set_device_pcd(&self, uid: &Uid, pcd: &[u8]) -> Result<()> {
        self.with_state(|s| {
            Self::device_entry(s, uid)?.pcd = Some(pcd.to_vec());
            Ok(())
        })
    }

    pub fn invalidate_device_pcd(&self, uid: &Uid) {
        self.invalidate("device_pcd", |s| {
            if let Ok(entry) = Self::device_entry(s, uid) {
                entry.pcd = None;
            }
        });
    }

    pub fn get_pool_count(&self) -> i32 {
        self.lock()
            .as_ref()
            .map_or(UNSET_COUNT, |s| count_of(s.pools.as_ref()))
    }

    pub fn get_pools(&self, capacity: usize) -> Result<Vec<Pool>> {
        self.with_state(|s| copy_out(s.pools.as_ref(), capacity, Pool::clone))
    }

    pub fn set_pools(&self, pools: &[Pool]) -> Result<()> {
        self.with_state(|s| {
            s.pools = Some(pools.to_vec());
            Ok(())
        })
    }

    pub fn get_pool(&self, uid: &Uid) -> Result<Pool> {
        self.with_state(|s| {
            s.pools
                .as_ref()
                .and_then(|pools| pools.iter().find(|p| p.uid == *uid))
                .cloned()
                .ok_or(NvmError::NotCached)
        })
    }

    pub fn invalidate_pools(&self) {
        self.invalidate("pools", |s| s.pools = None);
    }

    pub fn get_namespace_count(&self) -> i32 {
        self.lock()
            .as_ref()
            .map_or(UNSET_COUNT, |s| count_of(s.namespaces.as_ref()))
    }

    pub fn get_namespaces(&self, capacity: usize) -> Result<Vec<NamespaceDiscovery>> {
        self.with_state(|s| {
            copy_out(s.namespaces.as_ref(), capacity, |n| n.discovery.clone())
        })
    }

    pub fn set_namespaces(&self, namespaces: &[NamespaceDiscovery]) -> Result<()> {
        self.with_state(|s| {
            s.namespaces = Some(
                namespaces
                    .iter()
                    .map(|n| NamespaceEntry {
                        discovery: n.clone(),
                        details: None,
                    })
                    .collect(),
            );
            Ok(())
        })
    }

    fn namespace_entry<'a>(
        state: &'a mut ContextState,
        uid: &Uid,
    ) -> Result<&'a mut NamespaceEntry> {
        state
            .namespaces
            .as_mut()
            .and_then(|list| list.iter_mut().find(|n| n.discovery.uid == *uid))
            .ok_or(NvmError::NotCached)
    }

    pub fn get_namespace_details(&self, uid: &Uid) -> Result<NamespaceDetails> {
        self.with_state(|s| {
            Self::namespace_entry(s, uid)?
                .details
                .clone()
                .ok_or(NvmError::NotCached)
        })
    }

    pub fn set_namespace_details(&self, uid: &Uid, details: &NamespaceDetails) -> Result<()> {
        self.with_state(|s| {
            Self::namespace_entry(s, uid)?.details = Some(details.clone());
            Ok(())
        })
    }

    pub fn invalidate_namespaces(&self) {
        self.invalidate("namespaces", |s| s.namespaces = None);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{LockState, PoolType};

    fn device(n: u8) -> DeviceDiscovery {
        DeviceDiscovery {
            uid: Uid([n; 16]),
            handle: n as u32,
            manufacturer: 0x89,
            serial_number: format!("SN{}", n),
            model_number: "MN".to_string(),
            fw_revision: "01.00.00.1000".to_string(),
            capacity: 1 << 30,
            lock_state: LockState::Disabled,
            manageable: true,
        }
    }

    fn details(n: u8) -> DeviceDetails {
        DeviceDetails {
            discovery: device(n),
            status: None,
            sensors: Vec::new(),
            performance: None,
        }
    }

    #[test]
    fn test_devices_round_trip_and_invalidate() {
        let ctx = ProcessContext::new();
        ctx.create();
        let devices = vec![device(1), device(2)];

        assert_eq!(ctx.get_device_count(), UNSET_COUNT);
        ctx.set_devices(&devices).unwrap();
        assert_eq!(ctx.get_device_count(), 2);
        assert_eq!(ctx.get_devices(2).unwrap(), devices);
        assert_eq!(ctx.get_devices(8).unwrap(), devices);

        ctx.invalidate_devices();
        assert_eq!(ctx.get_device_count(), -1);
        assert_eq!(ctx.get_devices(2), Err(NvmError::NotCached));
    }

    #[test]
    fn test_smaller_capacity_is_array_too_small() {
        let ctx = ProcessContext::new();
        ctx.create();
        ctx.set_devices(&[device(1), device(2), device(3)]).unwrap();
        assert_eq!(ctx.get_devices(2), Err(NvmError::ArrayTooSmall));

        let pool = Pool {
            uid: Uid([9; 16]),
            pool_type: PoolType::Persistent,
            capacity: 10,
            free_capacity: 5,
            device_uids: vec![Uid([1; 16])],
        };
        ctx.set_pools(&[pool.clone(), pool]).unwrap();
        assert_eq!(ctx.get_pools(1), Err(NvmError::ArrayTooSmall));

        ctx.set_namespaces(&[
            NamespaceDiscovery { uid: Uid([4; 16]), name: "a".into() },
            NamespaceDiscovery { uid: Uid([5; 16]), name: "b".into() },
        ])
        .unwrap();
        assert_eq!(ctx.get_namespaces(0), Err(NvmError::ArrayTooSmall));
    }

    #[test]
    fn test_returned_copies_are_detached() {
        let ctx = ProcessContext::new();
        ctx.create();
        ctx.set_devices(&[device(1)]).unwrap();

        let mut copy = ctx.get_devices(1).unwrap();
        copy[0].serial_number = "changed".to_string();
        assert_eq!(ctx.get_devices(1).unwrap()[0].serial_number, "SN1");
    }

    #[test]
    fn test_details_and_pcd_per_device() {
        let ctx = ProcessContext::new();
        ctx.create();
        let uid = Uid([1; 16]);

        assert_eq!(ctx.set_device_details(&uid, &details(1)), Err(NvmError::NotCached));
        ctx.set_devices(&[device(1), device(2)]).unwrap();
        ctx.set_device_details(&uid, &details(1)).unwrap();
        ctx.set_device_pcd(&uid, &[1, 2, 3]).unwrap();
        ctx.set_device_pcd(&Uid([2; 16]), &[9]).unwrap();

        assert_eq!(ctx.get_device_details(&uid).unwrap(), details(1));
        ctx.invalidate_device_pcd(&uid);
        assert_eq!(ctx.get_device_pcd(&uid), Err(NvmError::NotCached));
        assert_eq!(ctx.get_device_pcd(&Uid([2; 16])).unwrap(), vec![9]);
        assert!(ctx.get_device_details(&uid).is_ok());
    }

    #[test]
    fn test_destroy_and_recreate() {
        let ctx = ProcessContext::new();
        ctx.destroy();
        assert!(!ctx.exists());
        assert_eq!(ctx.get_capabilities(), Err(NvmError::NotCached));

        ctx.create();
        ctx.set_capabilities(&Capabilities::default()).unwrap();
        assert!(ctx.get_capabilities().is_ok());

        ctx.create();
        assert_eq!(ctx.get_capabilities(), Err(NvmError::NotCached));
        ctx.destroy();
        assert_eq!(ctx.get_device_count(), UNSET_COUNT);
    }
}
