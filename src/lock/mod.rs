use std::{fmt, future::Future, sync::Arc};

use bytes::Bytes;
use tracing::{debug, warn};

use crate::{
    error::{LockError, Result},
    interface::Coordinator,
    util::cancel::{cancelled, run_until},
};

/// Ownership of a lock acquired through a [`Locker`](crate::Locker).
///
/// The lock lasts until [`unlock`](Lock::unlock) succeeds or its lease runs
/// out, whichever comes first. Dropping the handle releases nothing; the key
/// stays held until the lease expires. Leases are never renewed.
pub struct Lock {
    coordinator: Arc<dyn Coordinator>,
    key: Bytes,
}

impl Lock {
    /// Only built from a successful acquire response.
    pub(crate) fn new(coordinator: Arc<dyn Coordinator>, key: Bytes) -> Self {
        Self { coordinator, key }
    }

    /// The key the service granted for this lock.
    pub fn key(&self) -> &Bytes {
        &self.key
    }

    pub fn key_str(&self) -> String {
        String::from_utf8_lossy(&self.key).into_owned()
    }

    /// Releases the lock.
    ///
    /// Every call is sent to the service, including a second unlock or an
    /// unlock after the lease already expired, and the service's answer is
    /// passed back unchanged. etcd deletes the key unconditionally, so a repeat
    /// unlock succeeds there; an RPC failure comes back as
    /// [`LockError::Release`].
    pub async fn unlock(&self) -> Result<()> {
        self.unlock_until(futures::future::pending()).await
    }

    /// Like [`unlock`](Lock::unlock), giving up once `cancel` resolves.
    pub async fn unlock_until<C>(&self, cancel: C) -> Result<()>
    where
        C: Future<Output = ()>,
    {
        match run_until(self.coordinator.release(self.key.clone()), cancelled(cancel)).await {
            Ok(()) => {
                debug!(key = %self.key_str(), "Lock released");
                Ok(())
            }
            Err(source) => {
                warn!(key = %self.key_str(), error = %source, "Lock release failed");
                Err(LockError::Release {
                    key: self.key_str(),
                    source,
                })
            }
        }
    }
}

impl fmt::Debug for Lock {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Lock").field("key", &self.key_str()).finish()
    }
}
