//! Coordinator backed by the etcd v3 gRPC API
//!
//! One tonic `Channel` is shared by every call. It multiplexes requests over a
//! single HTTP/2 connection, so concurrent locks on distinct names never wait
//! on each other client-side.

pub mod proto;

use async_trait::async_trait;
use bytes::Bytes;
use tonic::{
    client::Grpc,
    codegen::http::uri::PathAndQuery,
    transport::{Channel, Endpoint},
    Request, Status,
};
use tonic_prost::ProstCodec;
use tracing::info;

use self::proto::{
    LeaseGrantRequest, LeaseGrantResponse, LockRequest, LockResponse, UnlockRequest,
    UnlockResponse, LEASE_GRANT_PATH, LOCK_PATH, UNLOCK_PATH,
};
use crate::{
    error::Result,
    interface::{Coordinator, LeaseGrant, LeaseId},
    options::TransportOptions,
    util::endpoint_uri,
};

pub struct EtcdCoordinator {
    channel: Channel,
}

impl EtcdCoordinator {
    /// Builds the channel to `address`. Unless the transport is lazy, the
    /// connection is established here and failures are returned right away.
    pub async fn connect(address: &str, transport: &TransportOptions) -> Result<Self> {
        let uri = endpoint_uri(address, transport.tls.is_some());
        let mut endpoint = Endpoint::from_shared(uri.clone())?;
        if let Some(timeout) = transport.connect_timeout {
            endpoint = endpoint.connect_timeout(timeout);
        }
        if let Some(keepalive) = transport.tcp_keepalive {
            endpoint = endpoint.tcp_keepalive(Some(keepalive));
        }
        if let Some(interval) = transport.http2_keep_alive_interval {
            endpoint = endpoint.http2_keep_alive_interval(interval);
        }
        if let Some(tls) = transport.tls.clone() {
            endpoint = endpoint.tls_config(tls)?;
        }

        let channel = if transport.lazy {
            endpoint.connect_lazy()
        } else {
            endpoint.connect().await?
        };
        info!(address = %uri, lazy = transport.lazy, "Connected to coordination service");

        Ok(Self { channel })
    }

    /// Wraps an already configured channel.
    pub fn from_channel(channel: Channel) -> Self {
        Self { channel }
    }

    async fn unary<Req, Resp>(
        &self,
        path: &'static str,
        message: Req,
    ) -> std::result::Result<Resp, Status>
    where
        Req: prost::Message + Send + Sync + 'static,
        Resp: prost::Message + Default + Send + Sync + 'static,
    {
        let mut grpc = Grpc::new(self.channel.clone());
        grpc.ready()
            .await
            .map_err(|e| Status::unavailable(format!("service was not ready: {}", e)))?;
        let codec: ProstCodec<Req, Resp> = ProstCodec::default();
        let response = grpc
            .unary(Request::new(message), PathAndQuery::from_static(path), codec)
            .await?;
        Ok(response.into_inner())
    }
}

#[async_trait]
impl Coordinator for EtcdCoordinator {
    async fn grant_lease(&self, ttl_seconds: i64) -> std::result::Result<LeaseGrant, Status> {
        let response: LeaseGrantResponse = self
            .unary(
                LEASE_GRANT_PATH,
                LeaseGrantRequest {
                    ttl: ttl_seconds,
                    id: 0,
                },
            )
            .await?;
        if !response.error.is_empty() {
            return Err(Status::unknown(response.error));
        }
        Ok(LeaseGrant {
            id: response.id,
            ttl_seconds: response.ttl,
        })
    }

    async fn acquire(&self, name: Bytes, lease: LeaseId) -> std::result::Result<Bytes, Status> {
        let response: LockResponse = self.unary(LOCK_PATH, LockRequest { name, lease }).await?;
        Ok(response.key)
    }

    async fn release(&self, key: Bytes) -> std::result::Result<(), Status> {
        let _: UnlockResponse = self.unary(UNLOCK_PATH, UnlockRequest { key }).await?;
        Ok(())
    }
}
