//! EtcdCoordinator against an in-process gRPC server that serves the etcd
//! Lease and Lock method paths.

use std::{
    convert::Infallible,
    future::{ready, Ready},
    sync::{Arc, Mutex},
    task::{Context, Poll},
    time::Duration,
};

use bytes::Bytes;
use etcd_lock::{
    etcd::proto::{
        LeaseGrantRequest, LeaseGrantResponse, LockRequest, LockResponse, UnlockRequest,
        UnlockResponse,
    },
    Coordinator, EtcdCoordinator, LockError, Locker, LockerOptions, TransportOptions,
};
use tokio::net::TcpListener;
use tokio_stream::wrappers::TcpListenerStream;
use tonic::{
    body::Body,
    codegen::{http, BoxFuture, Service},
    server::{Grpc, NamedService, UnaryService},
    transport::Server,
    Code, Request, Response, Status,
};
use tonic_prost::ProstCodec;

const LEASE_ID: i64 = 0x2a;

#[derive(Default)]
struct Seen {
    paths: Vec<String>,
    ttls: Vec<i64>,
    names: Vec<Bytes>,
    leases: Vec<i64>,
    unlocked: Vec<Bytes>,
}

/// Answers the three RPCs the lock client uses and records what arrived.
#[derive(Clone, Default)]
struct EtcdServer {
    seen: Arc<Mutex<Seen>>,
    grant_error: Option<String>,
}

struct Unary<F>(F);

impl<Req, Resp, F> UnaryService<Req> for Unary<F>
where
    F: FnMut(Req) -> Result<Resp, Status>,
{
    type Response = Resp;
    type Future = Ready<Result<Response<Resp>, Status>>;

    fn call(&mut self, request: Request<Req>) -> Self::Future {
        ready((self.0)(request.into_inner()).map(Response::new))
    }
}

impl EtcdServer {
    fn lease_grant(&self, req: LeaseGrantRequest) -> Result<LeaseGrantResponse, Status> {
        self.seen.lock().unwrap().ttls.push(req.ttl);
        Ok(match &self.grant_error {
            Some(error) => LeaseGrantResponse {
                error: error.clone(),
                ..Default::default()
            },
            None => LeaseGrantResponse {
                id: LEASE_ID,
                ttl: req.ttl,
                ..Default::default()
            },
        })
    }

    fn lock(&self, req: LockRequest) -> Result<LockResponse, Status> {
        let mut seen = self.seen.lock().unwrap();
        seen.names.push(req.name.clone());
        seen.leases.push(req.lease);
        let key = format!("{}/{:x}", String::from_utf8_lossy(&req.name), req.lease);
        Ok(LockResponse {
            header: None,
            key: Bytes::from(key),
        })
    }

    fn unlock(&self, req: UnlockRequest) -> Result<UnlockResponse, Status> {
        // etcd deletes the key whether or not it still exists.
        self.seen.lock().unwrap().unlocked.push(req.key);
        Ok(UnlockResponse::default())
    }

    fn dispatch(&self, req: http::Request<Body>) -> BoxFuture<http::Response<Body>, Infallible> {
        let path = req.uri().path().to_string();
        self.seen.lock().unwrap().paths.push(path.clone());
        let server = self.clone();
        Box::pin(async move {
            let response = match path.as_str() {
                "/etcdserverpb.Lease/LeaseGrant" => {
                    let mut grpc =
                        Grpc::new(ProstCodec::<LeaseGrantResponse, LeaseGrantRequest>::default());
                    grpc.unary(Unary(move |r: LeaseGrantRequest| server.lease_grant(r)), req)
                        .await
                }
                "/v3lockpb.Lock/Lock" => {
                    let mut grpc = Grpc::new(ProstCodec::<LockResponse, LockRequest>::default());
                    grpc.unary(Unary(move |r: LockRequest| server.lock(r)), req)
                        .await
                }
                "/v3lockpb.Lock/Unlock" => {
                    let mut grpc =
                        Grpc::new(ProstCodec::<UnlockResponse, UnlockRequest>::default());
                    grpc.unary(Unary(move |r: UnlockRequest| server.unlock(r)), req)
                        .await
                }
                _ => {
                    let mut response = http::Response::new(Body::empty());
                    *response.status_mut() = http::StatusCode::NOT_FOUND;
                    response
                }
            };
            Ok(response)
        })
    }
}

#[derive(Clone)]
struct LeaseService(EtcdServer);

#[derive(Clone)]
struct LockService(EtcdServer);

impl NamedService for LeaseService {
    const NAME: &'static str = "etcdserverpb.Lease";
}

impl NamedService for LockService {
    const NAME: &'static str = "v3lockpb.Lock";
}

impl Service<http::Request<Body>> for LeaseService {
    type Response = http::Response<Body>;
    type Error = Infallible;
    type Future = BoxFuture<Self::Response, Self::Error>;

    fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, req: http::Request<Body>) -> Self::Future {
        self.0.dispatch(req)
    }
}

impl Service<http::Request<Body>> for LockService {
    type Response = http::Response<Body>;
    type Error = Infallible;
    type Future = BoxFuture<Self::Response, Self::Error>;

    fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, req: http::Request<Body>) -> Self::Future {
        self.0.dispatch(req)
    }
}

/// Starts `server` on an ephemeral port and returns its address.
async fn serve(server: EtcdServer) -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let address = listener.local_addr().unwrap().to_string();
    tokio::spawn(
        Server::builder()
            .add_service(LeaseService(server.clone()))
            .add_service(LockService(server))
            .serve_with_incoming(TcpListenerStream::new(listener)),
    );
    address
}

fn transport() -> TransportOptions {
    TransportOptions::default().with_connect_timeout(Duration::from_secs(5))
}

// ============== Wire Contract ==============

#[tokio::test]
async fn test_lock_and_unlock_over_grpc() {
    let server = EtcdServer::default();
    let address = serve(server.clone()).await;
    let locker = Locker::connect(
        LockerOptions::new(address)
            .with_default_timeout(Duration::from_secs(4))
            .with_transport(transport()),
    )
    .await
    .unwrap();

    let lock = locker
        .lock("job", Some(Duration::from_millis(3500)))
        .await
        .unwrap();
    assert_eq!(lock.key_str(), "__etcd_lock/job/2a");
    lock.unlock().await.unwrap();

    let seen = server.seen.lock().unwrap();
    assert_eq!(
        seen.paths,
        vec![
            "/etcdserverpb.Lease/LeaseGrant",
            "/v3lockpb.Lock/Lock",
            "/v3lockpb.Lock/Unlock",
        ]
    );
    assert_eq!(seen.ttls, vec![3]);
    assert_eq!(seen.names, vec![Bytes::from_static(b"__etcd_lock/job")]);
    assert_eq!(seen.leases, vec![LEASE_ID]);
    assert_eq!(seen.unlocked, vec![Bytes::from_static(b"__etcd_lock/job/2a")]);
}

#[tokio::test]
async fn test_default_timeout_reaches_the_wire() {
    let server = EtcdServer::default();
    let address = serve(server.clone()).await;
    let locker = Locker::connect(
        LockerOptions::new(address)
            .with_default_timeout(Duration::from_secs(4))
            .with_transport(transport()),
    )
    .await
    .unwrap();

    locker.lock("k", None).await.unwrap();

    assert_eq!(server.seen.lock().unwrap().ttls, vec![4]);
}

#[tokio::test]
async fn test_repeat_unlock_is_forwarded_each_time() {
    let server = EtcdServer::default();
    let address = serve(server.clone()).await;
    let coordinator = EtcdCoordinator::connect(&address, &transport())
        .await
        .unwrap();

    let key = Bytes::from_static(b"__etcd_lock/job/2a");
    coordinator.release(key.clone()).await.unwrap();
    coordinator.release(key.clone()).await.unwrap();

    assert_eq!(server.seen.lock().unwrap().unlocked, vec![key.clone(), key]);
}

// ============== Failures ==============

#[tokio::test]
async fn test_grant_error_field_fails_the_grant() {
    let server = EtcdServer {
        grant_error: Some("etcdserver: too many requests".to_string()),
        ..Default::default()
    };
    let address = serve(server.clone()).await;
    let coordinator = EtcdCoordinator::connect(&address, &transport())
        .await
        .unwrap();

    let status = coordinator.grant_lease(5).await.unwrap_err();
    assert_eq!(status.code(), Code::Unknown);
    assert_eq!(status.message(), "etcdserver: too many requests");

    let locker = Locker::with_coordinator(Arc::new(coordinator), &LockerOptions::default());
    let err = locker
        .lock("job", Some(Duration::from_secs(5)))
        .await
        .unwrap_err();
    assert!(matches!(err, LockError::LeaseGrant { ttl_seconds: 5, .. }));

    // No lock request follows a failed grant.
    let seen = server.seen.lock().unwrap();
    assert!(seen.names.is_empty());
    assert_eq!(seen.ttls, vec![5, 5]);
}
