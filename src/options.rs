//! Configuration for [`Locker`](crate::Locker)

use std::time::Duration;

use tonic::transport::ClientTlsConfig;

/// Namespace prepended to every resource name when no prefix is configured.
pub const DEFAULT_KEY_PREFIX: &str = "__etcd_lock/";

/// Lease TTL applied when neither the caller nor the options give a timeout.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(60);

/// Options for building a `Locker`.
#[derive(Clone, Debug)]
pub struct LockerOptions {
    /// Coordination service address, e.g. `127.0.0.1:2379` or `https://etcd:2379`
    pub address: String,
    /// Prefix for lock keys (empty falls back to [`DEFAULT_KEY_PREFIX`])
    pub key_prefix: String,
    /// Lease TTL used when `lock` is called without a timeout
    pub default_timeout: Duration,
    /// Dial behavior of the underlying gRPC channel
    pub transport: TransportOptions,
}

impl Default for LockerOptions {
    fn default() -> Self {
        Self {
            address: "127.0.0.1:2379".to_string(),
            key_prefix: String::new(),
            default_timeout: DEFAULT_TIMEOUT,
            transport: TransportOptions::default(),
        }
    }
}

impl LockerOptions {
    pub fn new(address: impl Into<String>) -> Self {
        Self {
            address: address.into(),
            ..Default::default()
        }
    }

    pub fn with_key_prefix(mut self, key_prefix: impl Into<String>) -> Self {
        self.key_prefix = key_prefix.into();
        self
    }

    pub fn with_default_timeout(mut self, default_timeout: Duration) -> Self {
        self.default_timeout = default_timeout;
        self
    }

    pub fn with_transport(mut self, transport: TransportOptions) -> Self {
        self.transport = transport;
        self
    }

    /// The prefix actually used for lock keys.
    pub fn effective_key_prefix(&self) -> &str {
        if self.key_prefix.is_empty() {
            DEFAULT_KEY_PREFIX
        } else {
            &self.key_prefix
        }
    }
}

/// Pass-through dial options for the gRPC channel.
///
/// There is deliberately no per-request timeout: lock acquisition is a single
/// RPC that stays pending until the lock is granted.
#[derive(Clone, Debug, Default)]
pub struct TransportOptions {
    pub connect_timeout: Option<Duration>,
    pub tcp_keepalive: Option<Duration>,
    pub http2_keep_alive_interval: Option<Duration>,
    pub tls: Option<ClientTlsConfig>,
    /// Defer connecting until the first RPC instead of failing construction.
    pub lazy: bool,
}

impl TransportOptions {
    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = Some(timeout);
        self
    }

    pub fn with_tcp_keepalive(mut self, keepalive: Duration) -> Self {
        self.tcp_keepalive = Some(keepalive);
        self
    }

    pub fn with_http2_keep_alive_interval(mut self, interval: Duration) -> Self {
        self.http2_keep_alive_interval = Some(interval);
        self
    }

    pub fn with_tls(mut self, tls: ClientTlsConfig) -> Self {
        self.tls = Some(tls);
        self
    }

    pub fn lazy(mut self) -> Self {
        self.lazy = true;
        self
    }
}
