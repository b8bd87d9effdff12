use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};
use uuid::Uuid;

/// 按域名 id 串行化续期/删除等生命周期操作
#[derive(Clone, Default)]
pub struct DomainLocks {
    inner: Arc<Mutex<HashMap<Uuid, Arc<AsyncMutex<()>>>>>,
}

impl DomainLocks {
    pub async fn acquire(&self, domain_id: Uuid) -> OwnedMutexGuard<()> {
        let lock = {
            let mut map = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
            // 只剩 map 自身引用的锁无人持有也无人等待
            map.retain(|_, lock| Arc::strong_count(lock) > 1);
            map.entry(domain_id).or_default().clone()
        };
        lock.lock_owned().await
    }

    #[cfg(test)]
    fn tracked(&self) -> usize {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner).len()
    }
}
