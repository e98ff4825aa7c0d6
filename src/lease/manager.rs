use std::{sync::Arc, time::Duration};

use tonic::Status;
use tracing::{debug, warn};

use super::{ttl_seconds, LeaseToken};
use crate::interface::Coordinator;

/// Turns lock timeouts into granted leases.
pub(crate) struct LeaseManager {
    coordinator: Arc<dyn Coordinator>,
}

impl LeaseManager {
    pub(crate) fn new(coordinator: Arc<dyn Coordinator>) -> Self {
        Self { coordinator }
    }

    pub(crate) async fn grant(&self, timeout: Duration) -> Result<LeaseToken, Status> {
        let ttl_secs = ttl_seconds(timeout);
        match self.coordinator.grant_lease(ttl_secs).await {
            Ok(grant) => {
                debug!(lease_id = grant.id, ttl_secs = grant.ttl_seconds, "Lease granted");
                Ok(LeaseToken::from_grant(grant))
            }
            Err(status) => {
                warn!(ttl_secs, error = %status, "Lease grant failed");
                Err(status)
            }
        }
    }
}
