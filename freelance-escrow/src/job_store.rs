//! Job Record Store - instance-keyed escrow state
//!
//! Each instance lives behind its own mutex, so invocations on one job are
//! strictly serialized while different jobs never wait on each other. The
//! outer map lock is only held long enough to find or insert a slot.

use crate::{
    error::EscrowError,
    models::{AccountId, InstanceId, JobEvent, JobRecord},
    EscrowResult,
};
use std::{
    collections::HashMap,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
};
use tokio::sync::{Mutex, OwnedMutexGuard, RwLock};
use tracing::info;

/// Everything the store keeps for one deployed instance
#[derive(Debug, Clone)]
pub struct InstanceSlot {
    pub instance_id: InstanceId,
    /// Deployer; the only identity allowed to call `initialize`
    pub creator: AccountId,
    /// `None` until `initialize` succeeds
    pub record: Option<JobRecord>,
    /// Audit trail, appended under the same lock as the record change
    pub events: Vec<JobEvent>,
}

/// In-memory job storage (records are retained forever, including
/// terminal ones)
pub struct JobStore {
    instances: Arc<RwLock<HashMap<InstanceId, Arc<Mutex<InstanceSlot>>>>>,
    next_id: AtomicU64,
}

impl JobStore {
    pub fn new() -> Self {
        Self {
            instances: Arc::new(RwLock::new(HashMap::new())),
            next_id: AtomicU64::new(1),
        }
    }

    /// Allocate a fresh, uninitialized instance. Ids are never reused.
    pub async fn deploy(&self, creator: AccountId) -> InstanceId {
        let instance_id = InstanceId(self.next_id.fetch_add(1, Ordering::SeqCst));
        let slot = InstanceSlot {
            instance_id,
            creator: creator.clone(),
            record: None,
            events: Vec::new(),
        };

        self.instances
            .write()
            .await
            .insert(instance_id, Arc::new(Mutex::new(slot)));

        info!(instance_id = %instance_id, creator = %creator, "deployed job instance");
        instance_id
    }

    /// Exclusive access to one instance for the duration of an invocation
    pub async fn lock(&self, instance_id: InstanceId) -> EscrowResult<OwnedMutexGuard<InstanceSlot>> {
        let slot = self
            .instances
            .read()
            .await
            .get(&instance_id)
            .cloned()
            .ok_or_else(|| EscrowError::not_found(format!("Job instance {} not found", instance_id)))?;

        Ok(slot.lock_owned().await)
    }

    /// Copy of the most recently committed state of an instance
    pub async fn snapshot(&self, instance_id: InstanceId) -> EscrowResult<InstanceSlot> {
        let guard = self.lock(instance_id).await?;
        Ok(guard.clone())
    }

    pub async fn len(&self) -> usize {
        self.instances.read().await.len()
    }
}

impl Default for JobStore {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn test_deploy_allocates_unique_ids() {
        let store = JobStore::new();
        let creator = AccountId::new("DEPLOYER").unwrap();

        let first = store.deploy(creator.clone()).await;
        let second = store.deploy(creator).await;

        assert_ne!(first, second);
        assert_eq!(store.len().await, 2);
        assert!(store.snapshot(first).await.unwrap().record.is_none());
    }

    #[tokio::test]
    async fn test_unknown_instance_is_not_found() {
        let store = JobStore::new();
        assert!(matches!(
            store.lock(InstanceId(42)).await,
            Err(EscrowError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_instances_lock_independently() {
        let store = Arc::new(JobStore::new());
        let creator = AccountId::new("DEPLOYER").unwrap();
        let a = store.deploy(creator.clone()).await;
        let b = store.deploy(creator).await;

        let _held = store.lock(a).await.unwrap();

        // b stays reachable while a is held
        let other = tokio::time::timeout(Duration::from_secs(1), store.lock(b)).await;
        assert!(other.is_ok());

        // a itself is serialized
        let same = tokio::time::timeout(Duration::from_millis(50), store.lock(a)).await;
        assert!(same.is_err());
    }
}
