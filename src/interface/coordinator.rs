use async_trait::async_trait;
use bytes::Bytes;
use tonic::Status;

/// Identifier the coordination service assigns to a granted lease.
pub type LeaseId = i64;

/// A lease as granted by the coordination service. The server may adjust the
/// requested TTL, so `ttl_seconds` is the value it actually applied.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LeaseGrant {
    pub id: LeaseId,
    pub ttl_seconds: i64,
}

/// The Lease and Lock capabilities of a remote coordination service.
///
/// A single implementation is shared (behind an `Arc`) by a `Locker` and every
/// `Lock` it hands out, so implementations must accept concurrent calls.
#[async_trait]
pub trait Coordinator: Send + Sync {
    /// Grants a lease that expires `ttl_seconds` after it is created unless
    /// released first.
    async fn grant_lease(&self, ttl_seconds: i64) -> Result<LeaseGrant, Status>;

    /// Acquires the lock named `name` on behalf of `lease`, waiting for as long
    /// as the service keeps the request pending. Returns the key that now
    /// represents ownership.
    async fn acquire(&self, name: Bytes, lease: LeaseId) -> Result<Bytes, Status>;

    /// Releases ownership represented by `key`.
    async fn release(&self, key: Bytes) -> Result<(), Status>;
}
