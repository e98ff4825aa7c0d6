//! In-process coordinator modelling the lease and lock behavior of the etcd
//! services. Time is tokio time, so tests can run it on a paused clock.

use std::{
    collections::HashMap,
    sync::atomic::{AtomicUsize, Ordering},
};

use async_trait::async_trait;
use bytes::Bytes;
use tokio::{
    sync::{Mutex, Notify},
    time::{sleep_until, Duration, Instant},
};
use tonic::{Code, Status};

use crate::interface::{Coordinator, LeaseGrant, LeaseId};

/// Leases shorter than this are extended to it, like etcd's minimum TTL.
const MIN_TTL_SECONDS: i64 = 1;

/// Lease lifetimes are capped here so huge TTLs stay representable as instants.
const MAX_LEASE_LIFETIME: Duration = Duration::from_secs(30 * 365 * 24 * 60 * 60);

/// Number of calls a [`MemoryCoordinator`] has served.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct CallCounts {
    pub grants: usize,
    pub acquires: usize,
    pub releases: usize,
}

impl CallCounts {
    pub fn total(&self) -> usize {
        self.grants + self.acquires + self.releases
    }
}

struct Holder {
    key: Bytes,
    lease: LeaseId,
}

#[derive(Default)]
struct State {
    next_lease: LeaseId,
    leases: HashMap<LeaseId, Instant>,
    holders: HashMap<Bytes, Holder>,
    granted_ttls: Vec<i64>,
    grant_failure: Option<(Code, String)>,
}

impl State {
    /// Drops expired leases and every lock they fenced. Returns whether
    /// anything was removed.
    fn purge_expired(&mut self, now: Instant) -> bool {
        let before = self.leases.len();
        self.leases.retain(|_, expires_at| *expires_at > now);
        if self.leases.len() == before {
            return false;
        }
        let leases = &self.leases;
        self.holders.retain(|_, holder| leases.contains_key(&holder.lease));
        true
    }
}

/// Two behaviors differ from etcd: releasing a lock also revokes its lease,
/// and releasing a key that is not held fails with `NotFound` where etcd
/// succeeds.
pub struct MemoryCoordinator {
    state: Mutex<State>,
    changed: Notify,
    grants: AtomicUsize,
    acquires: AtomicUsize,
    releases: AtomicUsize,
}

impl Default for MemoryCoordinator {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryCoordinator {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(State {
                next_lease: 0x694d_0000,
                ..Default::default()
            }),
            changed: Notify::new(),
            grants: AtomicUsize::new(0),
            acquires: AtomicUsize::new(0),
            releases: AtomicUsize::new(0),
        }
    }

    pub fn calls(&self) -> CallCounts {
        CallCounts {
            grants: self.grants.load(Ordering::SeqCst),
            acquires: self.acquires.load(Ordering::SeqCst),
            releases: self.releases.load(Ordering::SeqCst),
        }
    }

    /// TTLs of every lease grant request, in order, as requested by the client.
    pub async fn granted_ttls(&self) -> Vec<i64> {
        self.state.lock().await.granted_ttls.clone()
    }

    /// Makes the next lease grant fail with `code`.
    pub async fn fail_next_grant(&self, code: Code, message: impl Into<String>) {
        self.state.lock().await.grant_failure = Some((code, message.into()));
    }

    /// Number of leases that have neither expired nor been released.
    pub async fn live_leases(&self) -> usize {
        let mut state = self.state.lock().await;
        if state.purge_expired(Instant::now()) {
            self.changed.notify_waiters();
        }
        state.leases.len()
    }
}

#[async_trait]
impl Coordinator for MemoryCoordinator {
    async fn grant_lease(&self, ttl_seconds: i64) -> Result<LeaseGrant, Status> {
        self.grants.fetch_add(1, Ordering::SeqCst);
        let mut state = self.state.lock().await;
        state.granted_ttls.push(ttl_seconds);
        if let Some((code, message)) = state.grant_failure.take() {
            return Err(Status::new(code, message));
        }

        let ttl = ttl_seconds.max(MIN_TTL_SECONDS);
        state.next_lease += 1;
        let id = state.next_lease;
        let lifetime = Duration::from_secs(ttl as u64).min(MAX_LEASE_LIFETIME);
        let now = Instant::now();
        let expires_at = now
            .checked_add(lifetime)
            .unwrap_or_else(|| now + Duration::from_secs(24 * 60 * 60));
        state.leases.insert(id, expires_at);
        Ok(LeaseGrant {
            id,
            ttl_seconds: ttl,
        })
    }

    async fn acquire(&self, name: Bytes, lease: LeaseId) -> Result<Bytes, Status> {
        self.acquires.fetch_add(1, Ordering::SeqCst);
        loop {
            let mut state = self.state.lock().await;
            let now = Instant::now();
            if state.purge_expired(now) {
                self.changed.notify_waiters();
            }

            let own_expiry = match state.leases.get(&lease) {
                Some(expires_at) => *expires_at,
                None => return Err(Status::not_found("requested lease not found")),
            };

            let holder_expiry = match state.holders.get(&name) {
                None => {
                    let mut key = name.to_vec();
                    key.extend_from_slice(format!("/{:x}", lease).as_bytes());
                    let key = Bytes::from(key);
                    state.holders.insert(
                        name,
                        Holder {
                            key: key.clone(),
                            lease,
                        },
                    );
                    return Ok(key);
                }
                Some(holder) => state.leases.get(&holder.lease).copied().unwrap_or(now),
            };

            // Registered before the state lock is released so a release in
            // between is not missed.
            let changed = self.changed.notified();
            drop(state);
            tokio::select! {
                _ = changed => {}
                _ = sleep_until(own_expiry.min(holder_expiry)) => {}
            }
        }
    }

    async fn release(&self, key: Bytes) -> Result<(), Status> {
        self.releases.fetch_add(1, Ordering::SeqCst);
        let mut state = self.state.lock().await;
        state.purge_expired(Instant::now());

        let name = state
            .holders
            .iter()
            .find(|(_, holder)| holder.key == key)
            .map(|(name, _)| name.clone());
        let result = match name.and_then(|name| state.holders.remove(&name)) {
            Some(holder) => {
                state.leases.remove(&holder.lease);
                Ok(())
            }
            None => Err(Status::not_found("lock key not found")),
        };
        drop(state);
        self.changed.notify_waiters();
        result
    }
}
