use std::time::Duration;

use crate::interface::{LeaseGrant, LeaseId};

pub(crate) mod manager;

pub(crate) use manager::LeaseManager;

/// A granted lease, waiting to fence exactly one acquire call.
///
/// Not `Clone`: acquiring consumes the token.
#[derive(Debug, PartialEq, Eq)]
pub struct LeaseToken {
    id: LeaseId,
    ttl_seconds: i64,
}

impl LeaseToken {
    pub(crate) fn from_grant(grant: LeaseGrant) -> Self {
        Self {
            id: grant.id,
            ttl_seconds: grant.ttl_seconds,
        }
    }

    pub fn id(&self) -> LeaseId {
        self.id
    }

    pub fn ttl(&self) -> Duration {
        Duration::from_secs(self.ttl_seconds.max(0) as u64)
    }

    pub(crate) fn into_id(self) -> LeaseId {
        self.id
    }
}

/// Lease TTLs are whole seconds; anything below a second is dropped.
pub(crate) fn ttl_seconds(timeout: Duration) -> i64 {
    i64::try_from(timeout.as_secs()).unwrap_or(i64::MAX)
}
