/// Integration tests for pool and namespace management
mod common;

use common::{device, open_test_nvm, MockDriver, POOL_UID};
use nvm_core::events::messages::{MGMT_NAMESPACE_CREATED, MGMT_NAMESPACE_DELETED};
use nvm_core::events::{EventFilter, Uid};
use nvm_core::types::{NamespaceCreateSettings, NamespaceType};
use nvm_core::NvmError;
use std::sync::Arc;

fn settings(name: &str, block_count: u64) -> NamespaceCreateSettings {
    NamespaceCreateSettings {
        name: name.to_string(),
        namespace_type: NamespaceType::AppDirect,
        block_size: 4096,
        block_count,
    }
}

#[tokio::test]
async fn test_namespace_lifecycle_invalidates_cache() {
    let driver = Arc::new(MockDriver::new(vec![device(1), device(2)]));
    let (_dir, nvm) = open_test_nvm(driver.clone()).await;
    nvm.create_context();
    let namespaces = nvm.namespaces();

    assert_eq!(namespaces.get_namespace_count().await.unwrap(), 0);
    let free_before = namespaces.get_pool(&POOL_UID).await.unwrap().free_capacity;
    assert_eq!(driver.calls("get_pools"), 1);

    let uid = namespaces
        .create_namespace(&POOL_UID, &settings("ns0", 1 << 18))
        .await
        .unwrap();

    let pool = namespaces.get_pool(&POOL_UID).await.unwrap();
    assert_eq!(driver.calls("get_pools"), 2);
    assert_eq!(pool.free_capacity, free_before - (4096u64 << 18));

    let listed = namespaces.get_namespaces(4).await.unwrap();
    assert_eq!(listed.len(), 1);
    assert_eq!(listed[0].uid, uid);

    let details = namespaces.get_namespace_details(&uid).await.unwrap();
    assert_eq!(details.block_count, 1 << 18);
    namespaces.get_namespace_details(&uid).await.unwrap();
    assert_eq!(driver.calls("get_namespace_details"), 1);

    namespaces.modify_namespace_name(&uid, "renamed").await.unwrap();
    let details = namespaces.get_namespace_details(&uid).await.unwrap();
    assert_eq!(details.discovery.name, "renamed");
    assert_eq!(driver.calls("get_namespace_details"), 2);

    namespaces.delete_namespace(&uid).await.unwrap();
    assert_eq!(namespaces.get_namespace_count().await.unwrap(), 0);
    assert_eq!(
        namespaces.get_namespace_details(&uid).await,
        Err(NvmError::BadNamespace)
    );

    let created = nvm
        .get_event_count(&EventFilter::new().code(MGMT_NAMESPACE_CREATED))
        .await
        .unwrap();
    let deleted = nvm
        .get_events(&EventFilter::new().code(MGMT_NAMESPACE_DELETED), 1)
        .await
        .unwrap();
    assert_eq!(created, 1);
    assert!(deleted[0].message.contains("renamed"));
}

#[tokio::test]
async fn test_create_namespace_validation() {
    let driver = Arc::new(MockDriver::new(vec![device(1)]));
    let (_dir, nvm) = open_test_nvm(driver.clone()).await;
    let namespaces = nvm.namespaces();

    assert_eq!(
        namespaces.create_namespace(&POOL_UID, &settings("", 1 << 18)).await,
        Err(NvmError::InvalidParameter)
    );
    let mut odd_block = settings("ns", 1 << 18);
    odd_block.block_size = 1000;
    assert_eq!(
        namespaces.create_namespace(&POOL_UID, &odd_block).await,
        Err(NvmError::InvalidParameter)
    );
    // Below the minimum namespace size
    assert_eq!(
        namespaces.create_namespace(&POOL_UID, &settings("ns", 1)).await,
        Err(NvmError::InvalidParameter)
    );
    // Larger than the pool's free capacity
    assert_eq!(
        namespaces.create_namespace(&POOL_UID, &settings("ns", 1 << 30)).await,
        Err(NvmError::InvalidParameter)
    );
    assert_eq!(
        namespaces
            .create_namespace(&Uid([0x11; 16]), &settings("ns", 1 << 18))
            .await,
        Err(NvmError::BadPool)
    );
    assert_eq!(driver.calls("create_namespace"), 0);
}

#[tokio::test]
async fn test_unknown_namespace_and_pool() {
    let driver = Arc::new(MockDriver::new(vec![device(1)]));
    let (_dir, nvm) = open_test_nvm(driver).await;

    assert_eq!(
        nvm.namespaces().get_pool(&Uid([0x11; 16])).await,
        Err(NvmError::BadPool)
    );
    assert_eq!(
        nvm.namespaces().delete_namespace(&Uid([0x22; 16])).await,
        Err(NvmError::BadNamespace)
    );
}
