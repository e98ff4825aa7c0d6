//! Distributed locks on etcd v3.
//!
//! A [`Locker`] grants a lease sized to the lock timeout, then asks the
//! coordination service for the named lock fenced by that lease. The call waits
//! inside that single RPC until the lock is free; there is no client-side
//! polling, queueing or lease renewal. A lock that is never unlocked is freed
//! by the service once its lease expires.
//!
//! ```no_run
//! use std::time::Duration;
//!
//! use etcd_lock::{Locker, LockerOptions};
//!
//! # async fn run() -> etcd_lock::Result<()> {
//! let locker = Locker::connect(
//!     LockerOptions::new("127.0.0.1:2379").with_default_timeout(Duration::from_secs(3)),
//! )
//! .await?;
//!
//! // Held for at most 5 seconds.
//! let lock = locker.lock("resource_key", Some(Duration::from_secs(5))).await?;
//!
//! // Waits until `lock` is released or expires, then holds it for 3 seconds.
//! let another = locker.lock("resource_key", None).await?;
//! another.unlock().await?;
//! # drop(lock);
//! # Ok(())
//! # }
//! ```

use std::{fmt, future::Future, sync::Arc, time::Duration};

use bytes::Bytes;
use tokio::time::Instant;
use tonic::Status;
use tracing::{debug, warn};

use lease::LeaseManager;
use util::cancel::{cancelled, deadline, run_until};

pub mod error;
pub mod etcd;
pub mod interface;
pub mod lease;
pub mod lock;
pub mod memory;
pub mod options;
mod util;

pub use error::{LockError, Result};
pub use etcd::EtcdCoordinator;
pub use interface::{Coordinator, LeaseGrant, LeaseId};
pub use lease::LeaseToken;
pub use lock::Lock;
pub use memory::{CallCounts, MemoryCoordinator};
pub use options::{LockerOptions, TransportOptions, DEFAULT_KEY_PREFIX, DEFAULT_TIMEOUT};

/// Client for acquiring locks from a coordination service.
///
/// `Locker` holds no mutable state and can be shared across tasks; every call
/// goes straight to the service over the shared transport.
pub struct Locker {
    key_prefix: String,
    default_timeout: Duration,
    lease_manager: LeaseManager,
    coordinator: Arc<dyn Coordinator>,
}

impl Locker {
    /// Connects to the etcd cluster at `options.address`.
    pub async fn connect(options: LockerOptions) -> Result<Self> {
        let coordinator = EtcdCoordinator::connect(&options.address, &options.transport).await?;
        Ok(Self::with_coordinator(Arc::new(coordinator), &options))
    }

    /// Builds a locker on top of an existing coordinator. The address and
    /// transport options are not used.
    pub fn with_coordinator(coordinator: Arc<dyn Coordinator>, options: &LockerOptions) -> Self {
        Self {
            key_prefix: options.effective_key_prefix().to_string(),
            default_timeout: options.default_timeout,
            lease_manager: LeaseManager::new(coordinator.clone()),
            coordinator,
        }
    }

    pub fn key_prefix(&self) -> &str {
        &self.key_prefix
    }

    pub fn default_timeout(&self) -> Duration {
        self.default_timeout
    }

    /// Acquires the lock on `name`, waiting as long as it is held elsewhere.
    ///
    /// The lock is bound to a lease of `timeout` (or the default timeout),
    /// truncated to whole seconds. If that lease runs out while still waiting,
    /// acquisition fails.
    pub async fn lock(&self, name: &str, timeout: Option<Duration>) -> Result<Lock> {
        self.lock_inner(name, timeout, futures::future::pending()).await
    }

    /// Like [`lock`](Locker::lock), giving up with a `Cancelled` status once
    /// `cancel` resolves.
    ///
    /// A lease granted before cancellation is not revoked; it expires on its
    /// own TTL.
    pub async fn lock_until<C>(
        &self,
        name: &str,
        timeout: Option<Duration>,
        cancel: C,
    ) -> Result<Lock>
    where
        C: Future<Output = ()>,
    {
        self.lock_inner(name, timeout, cancelled(cancel)).await
    }

    /// Like [`lock`](Locker::lock), giving up with a `DeadlineExceeded` status
    /// at `at`.
    pub async fn lock_with_deadline(
        &self,
        name: &str,
        timeout: Option<Duration>,
        at: Instant,
    ) -> Result<Lock> {
        self.lock_inner(name, timeout, deadline(at)).await
    }

    async fn lock_inner<I>(
        &self,
        name: &str,
        timeout: Option<Duration>,
        interrupt: I,
    ) -> Result<Lock>
    where
        I: Future<Output = Status>,
    {
        if name.is_empty() {
            return Err(LockError::EmptyKey);
        }

        let ttl = timeout.unwrap_or(self.default_timeout);
        let key = self.assemble_key_name(name);
        tokio::pin!(interrupt);

        let lease = run_until(self.lease_manager.grant(ttl), interrupt.as_mut())
            .await
            .map_err(|source| LockError::LeaseGrant {
                ttl_seconds: lease::ttl_seconds(ttl),
                source,
            })?;
        let lease_id = lease.id();

        debug!(key = %String::from_utf8_lossy(&key), lease_id, "Acquiring lock");
        let acquire = self.coordinator.acquire(key.clone(), lease.into_id());
        match run_until(acquire, interrupt.as_mut()).await {
            Ok(granted) => {
                let lock = Lock::new(self.coordinator.clone(), granted);
                debug!(key = %lock.key_str(), lease_id, "Lock acquired");
                Ok(lock)
            }
            Err(source) => {
                let key = String::from_utf8_lossy(&key).into_owned();
                warn!(key = %key, lease_id, error = %source, "Lock acquisition failed");
                Err(LockError::Acquisition { key, source })
            }
        }
    }

    fn assemble_key_name(&self, name: &str) -> Bytes {
        Bytes::from(format!("{}{}", self.key_prefix, name))
    }
}

impl fmt::Debug for Locker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Locker")
            .field("key_prefix", &self.key_prefix)
            .field("default_timeout", &self.default_timeout)
            .finish()
    }
}
