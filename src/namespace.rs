//! Pools and namespaces

use crate::context::ProcessContext;
use crate::device::{cached_capabilities, log_mgmt_event, require_access, require_feature};
use crate::driver::NvmDriver;
use crate::error::{NvmError, Result};
use crate::events::messages::{
    MGMT_NAMESPACE_CREATED, MGMT_NAMESPACE_DELETED, MGMT_NAMESPACE_MODIFIED,
};
use crate::events::store::EventStore;
use crate::events::types::Uid;
use crate::types::{
    NamespaceCreateSettings, NamespaceDetails, NamespaceDiscovery, Pool, MAX_NAMESPACE_NAME_LEN,
};
use std::sync::Arc;

fn validate_name(name: &str) -> Result<()> {
    if name.is_empty() || name.len() > MAX_NAMESPACE_NAME_LEN {
        return Err(NvmError::InvalidParameter);
    }
    Ok(())
}

#[derive(Clone)]
pub struct NamespaceManager {
    driver: Arc<dyn NvmDriver>,
    context: Arc<ProcessContext>,
    events: Arc<EventStore>,
}

impl NamespaceManager {
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

    async fn pool_list(&self) -> Result<Vec<Pool>> {
        match self.context.get_pools(usize::MAX) {
            Err(NvmError::NotCached) => {
                let pools = self.driver.get_pools().await?;
                if let Err(e) = self.context.set_pools(&pools) {
                    tracing::debug!(error = %e, "Pool list not cached");
                }
                Ok(pools)
            }
            other => other,
        }
    }

    async fn namespace_list(&self) -> Result<Vec<NamespaceDiscovery>> {
        match self.context.get_namespaces(usize::MAX) {
            Err(NvmError::NotCached) => {
                let namespaces = self.driver.get_namespaces().await?;
                if let Err(e) = self.context.set_namespaces(&namespaces) {
                    tracing::debug!(error = %e, "Namespace list not cached");
                }
                Ok(namespaces)
            }
            other => other,
        }
    }

    async fn find_namespace(&self, uid: &Uid) -> Result<NamespaceDiscovery> {
        self.namespace_list()
            .await?
            .into_iter()
            .find(|n| n.uid == *uid)
            .ok_or(NvmError::BadNamespace)
    }

    pub async fn get_pool_count(&self) -> Result<usize> {
        require_access(self.driver.as_ref())?;
        require_feature(self.driver.as_ref(), &self.context, |f| f.get_pools).await?;
        match usize::try_from(self.context.get_pool_count()) {
            Ok(count) => Ok(count),
            Err(_) => Ok(self.pool_list().await?.len()),
        }
    }

    pub async fn get_pools(&self, capacity: usize) -> Result<Vec<Pool>> {
        require_access(self.driver.as_ref())?;
        require_feature(self.driver.as_ref(), &self.context, |f| f.get_pools).await?;
        let pools = self.pool_list().await?;
        if capacity < pools.len() {
            return Err(NvmError::ArrayTooSmall);
        }
        Ok(pools)
    }

    pub async fn get_pool(&self, uid: &Uid) -> Result<Pool> {
        require_access(self.driver.as_ref())?;
        require_feature(self.driver.as_ref(), &self.context, |f| f.get_pools).await?;
        if let Ok(pool) = self.context.get_pool(uid) {
            return Ok(pool);
        }
        self.pool_list()
            .await?
            .into_iter()
            .find(|p| p.uid == *uid)
            .ok_or(NvmError::BadPool)
    }

    pub async fn get_namespace_count(&self) -> Result<usize> {
        require_access(self.driver.as_ref())?;
        require_feature(self.driver.as_ref(), &self.context, |f| f.get_namespaces).await?;
        match usize::try_from(self.context.get_namespace_count()) {
            Ok(count) => Ok(count),
            Err(_) => Ok(self.namespace_list().await?.len()),
        }
    }

    pub async fn get_namespaces(&self, capacity: usize) -> Result<Vec<NamespaceDiscovery>> {
        require_access(self.driver.as_ref())?;
        require_feature(self.driver.as_ref(), &self.context, |f| f.get_namespaces).await?;
        let namespaces = self.namespace_list().await?;
        if capacity < namespaces.len() {
            return Err(NvmError::ArrayTooSmall);
        }
        Ok(namespaces)
    }

    pub async fn get_namespace_details(&self, uid: &Uid) -> Result<NamespaceDetails> {
        require_access(self.driver.as_ref())?;
        require_feature(self.driver.as_ref(), &self.context, |f| f.get_namespaces).await?;
        if let Ok(details) = self.context.get_namespace_details(uid) {
            return Ok(details);
        }

        self.find_namespace(uid).await?;
        let details = self.driver.get_namespace_details(uid).await?;
        if let Err(e) = self.context.set_namespace_details(uid, &details) {
            tracing::debug!(%uid, error = %e, "Namespace details not cached");
        }
        Ok(details)
    }

    fn invalidate_after_change(&self) {
        self.context.invalidate_namespaces();
        self.context.invalidate_pools();
    }

    /// Carve a new namespace out of `pool_uid`.
    pub async fn create_namespace(
        &self,
        pool_uid: &Uid,
        settings: &NamespaceCreateSettings,
    ) -> Result<Uid> {
        require_access(self.driver.as_ref())?;
        validate_name(&settings.name)?;
        if settings.block_count == 0 || settings.block_size == 0 {
            return Err(NvmError::InvalidParameter);
        }

        let capabilities = cached_capabilities(self.driver.as_ref(), &self.context).await?;
        if !capabilities.features.create_namespace {
            return Err(NvmError::NotSupported);
        }
        if !capabilities.block_sizes.is_empty()
            && !capabilities.block_sizes.contains(&settings.block_size)
        {
            return Err(NvmError::InvalidParameter);
        }

        let size = u64::from(settings.block_size)
            .checked_mul(settings.block_count)
            .ok_or(NvmError::InvalidParameter)?;
        if size < capabilities.min_namespace_size {
            return Err(NvmError::InvalidParameter);
        }

        let pool = self
            .pool_list()
            .await?
            .into_iter()
            .find(|p| p.uid == *pool_uid)
            .ok_or(NvmError::BadPool)?;
        if size > pool.free_capacity {
            return Err(NvmError::InvalidParameter);
        }

        let uid = self.driver.create_namespace(pool_uid, settings).await?;
        self.invalidate_after_change();
        tracing::info!(%uid, pool = %pool_uid, size, "Namespace created");

        let uid_text = uid.to_string();
        log_mgmt_event(
            &self.events,
            MGMT_NAMESPACE_CREATED,
            None,
            &[settings.name.as_str(), uid_text.as_str()],
        )
        .await;
        Ok(uid)
    }

    pub async fn modify_namespace_name(&self, uid: &Uid, name: &str) -> Result<()> {
        require_access(self.driver.as_ref())?;
        validate_name(name)?;
        require_feature(self.driver.as_ref(), &self.context, |f| f.rename_namespace).await?;
        self.find_namespace(uid).await?;

        self.driver.modify_namespace_name(uid, name).await?;
        self.context.invalidate_namespaces();

        let uid_text = uid.to_string();
        log_mgmt_event(&self.events, MGMT_NAMESPACE_MODIFIED, None, &[name, uid_text.as_str()]).await;
        Ok(())
    }

    pub async fn delete_namespace(&self, uid: &Uid) -> Result<()> {
        require_access(self.driver.as_ref())?;
        require_feature(self.driver.as_ref(), &self.context, |f| f.delete_namespace).await?;
        let namespace = self.find_namespace(uid).await?;

        self.driver.delete_namespace(uid).await?;
        self.invalidate_after_change();
        tracing::info!(%uid, "Namespace deleted");

        let uid_text = uid.to_string();
        log_mgmt_event(
            &self.events,
            MGMT_NAMESPACE_DELETED,
            None,
            &[namespace.name.as_str(), uid_text.as_str()],
        )
        .await;
        Ok(())
    }
}
