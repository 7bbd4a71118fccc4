//! Broker integration tests: registration, routing and failure replies over
//! real sockets.

use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use tokio_util::sync::CancellationToken;

use svcfabric::broker::Broker;
use svcfabric::client::{RequestClient, RetryPolicy};
use svcfabric::registry::{Registry, ServiceDescriptor};
use svcfabric::transport::{Endpoint, Requester};
use svcfabric::types::{ClientConfig, ServiceId, TransportConfig};
use svcfabric::wire::tokens::REGISTER;
use svcfabric::wire::{Envelope, ErrorCode, FrameLimits};
use svcfabric::worker::{HelloHandler, Worker};
use svcfabric::{Config, Error};

struct TestBroker {
    addr: SocketAddr,
    services_file: PathBuf,
    cancel: CancellationToken,
    _dir: tempfile::TempDir,
}

impl TestBroker {
    fn endpoint(&self) -> Endpoint {
        self.addr.into()
    }
}

impl Drop for TestBroker {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

/// Helper: spin up a broker on a random port with its record file in a
/// fresh temp dir.
async fn start_test_broker(queue_limit: usize) -> TestBroker {
    let dir = tempfile::tempdir().unwrap();
    start_broker_in(dir, queue_limit).await
}

async fn start_broker_in(dir: tempfile::TempDir, queue_limit: usize) -> TestBroker {
    start_broker_with(dir, |config| config.broker.backend_queue_limit = queue_limit).await
}

/// Helper: like [`start_broker_in`], with `configure` applied last.
async fn start_broker_with(
    dir: tempfile::TempDir,
    configure: impl FnOnce(&mut Config),
) -> TestBroker {
    let mut config = Config::default();
    config.broker.frontend_addr = "tcp://127.0.0.1:0".to_string();
    config.broker.services_file = dir.path().join("services.json");
    configure(&mut config);
    let services_file = config.broker.services_file.clone();

    let broker = Broker::bind(&config, Registry::with_store(&services_file))
        .await
        .unwrap();
    let addr = broker.local_addr();
    let cancel = CancellationToken::new();
    tokio::spawn(broker.run(cancel.clone()));

    TestBroker {
        addr,
        services_file,
        cancel,
        _dir: dir,
    }
}

/// Helper: an address nothing listens on right now.
async fn free_address() -> String {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    format!("tcp://127.0.0.1:{}", listener.local_addr().unwrap().port())
}

fn descriptor(sid: &str, address: &str) -> ServiceDescriptor {
    ServiceDescriptor::new(
        ServiceId::from_string(sid.to_string()).unwrap(),
        format!("{} Service", sid),
        address,
        sid,
    )
}

fn client() -> RequestClient {
    RequestClient::new(&ClientConfig::default(), FrameLimits::default())
}

fn quick_client() -> RequestClient {
    client().with_request_policy(RetryPolicy {
        attempts: 1,
        timeout: Duration::from_millis(500),
        reconnect_interval: Duration::from_millis(20),
    })
}

fn hello_worker(address: &str) -> Worker {
    Worker::new(
        descriptor("hello", address),
        Arc::new(HelloHandler),
        client(),
        TransportConfig::default(),
    )
}

fn record_lines(path: &Path) -> Vec<String> {
    std::fs::read_to_string(path)
        .unwrap_or_default()
        .lines()
        .map(str::to_string)
        .collect()
}

fn expect_status(err: Error, code: ErrorCode) {
    match err {
        Error::ServiceUnavailable(status) => assert_eq!(status.code, code, "{status}"),
        other => panic!("expected {code:?} status, got {other:?}"),
    }
}

#[tokio::test]
async fn test_registered_worker_answers_through_broker() {
    let broker = start_test_broker(16).await;
    let worker = hello_worker(&free_address().await);
    worker.register(&broker.endpoint()).await.unwrap();

    let cancel = CancellationToken::new();
    let serving = worker.clone();
    let worker_cancel = cancel.clone();
    tokio::spawn(async move { serving.serve_dialed(worker_cancel).await });

    let reply = client()
        .call_via(&broker.endpoint(), "hello", vec![Bytes::from_static(b"Hello")], "hello")
        .await
        .unwrap();
    assert_eq!(reply, vec![Bytes::from_static(b"World")]);
    cancel.cancel();
}

#[tokio::test]
async fn test_header_frames_survive_round_trip() {
    let broker = start_test_broker(16).await;
    let worker = hello_worker(&free_address().await);
    worker.register(&broker.endpoint()).await.unwrap();

    let cancel = CancellationToken::new();
    let serving = worker.clone();
    let worker_cancel = cancel.clone();
    tokio::spawn(async move { serving.serve_dialed(worker_cancel).await });

    let mut requester = Requester::connect(&broker.endpoint(), FrameLimits::default())
        .await
        .unwrap();
    let request = Envelope::with_header(
        vec![Bytes::from_static(b"trace-7"), Bytes::from_static(b"hop-1")],
        vec![Bytes::from_static(b"hello"), Bytes::from_static(b"Hello")],
    );
    let reply = tokio::time::timeout(Duration::from_secs(5), requester.request(&request))
        .await
        .unwrap()
        .unwrap();

    assert_eq!(reply.header(), request.header());
    assert_eq!(
        reply.body(),
        &[
            Bytes::from_static(b"hello"),
            Bytes::new(),
            Bytes::from_static(b"World")
        ]
    );
    cancel.cancel();
}

#[tokio::test]
async fn test_unregistered_service_is_invalid_service() {
    let broker = start_test_broker(16).await;

    let started = std::time::Instant::now();
    let err = quick_client()
        .call_via(&broker.endpoint(), "time", vec![Bytes::from_static(b"now")], "time")
        .await
        .unwrap_err();

    expect_status(err, ErrorCode::InvalidService);
    assert!(started.elapsed() < Duration::from_millis(500));
}

#[tokio::test]
async fn test_registration_is_idempotent() {
    let broker = start_test_broker(16).await;
    let hello = descriptor("hello", &free_address().await);

    let first = client().register(&broker.endpoint(), &hello).await.unwrap();
    let second = client().register(&broker.endpoint(), &hello).await.unwrap();
    assert_eq!(first, "Registered");
    assert_eq!(second, "Registered");

    let lines = record_lines(&broker.services_file);
    assert_eq!(lines.len(), 1);
    assert_eq!(ServiceDescriptor::decode(lines[0].as_bytes()).unwrap().id, hello.id);
}

#[tokio::test]
async fn test_reregistration_moves_service() {
    let broker = start_test_broker(16).await;
    let a = free_address().await;
    let b = free_address().await;

    client().register(&broker.endpoint(), &descriptor("hello", &a)).await.unwrap();
    client().register(&broker.endpoint(), &descriptor("hello", &b)).await.unwrap();

    let found = client().lookup(&broker.endpoint(), "hello").await.unwrap();
    assert_eq!(found.address, b);
    assert_eq!(record_lines(&broker.services_file).len(), 1);
}

#[tokio::test]
async fn test_bind_failure_discards_descriptor() {
    let broker = start_test_broker(16).await;
    let blocker = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let taken = format!("tcp://127.0.0.1:{}", blocker.local_addr().unwrap().port());

    let err = client()
        .register(&broker.endpoint(), &descriptor("hello", &taken))
        .await
        .unwrap_err();
    expect_status(err, ErrorCode::BindFail);
    assert!(record_lines(&broker.services_file).is_empty());

    let err = client().lookup(&broker.endpoint(), "hello").await.unwrap_err();
    expect_status(err, ErrorCode::NotFound);
}

#[tokio::test]
async fn test_failed_move_keeps_previous_registration() {
    let broker = start_test_broker(16).await;
    let worker = hello_worker(&free_address().await);
    worker.register(&broker.endpoint()).await.unwrap();

    let blocker = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let taken = format!("tcp://127.0.0.1:{}", blocker.local_addr().unwrap().port());
    let err = client()
        .register(&broker.endpoint(), &descriptor("hello", &taken))
        .await
        .unwrap_err();
    expect_status(err, ErrorCode::BindFail);

    let found = client().lookup(&broker.endpoint(), "hello").await.unwrap();
    assert_eq!(found.address, worker.descriptor().address);
    let lines = record_lines(&broker.services_file);
    assert_eq!(lines.len(), 1);
    assert_eq!(
        ServiceDescriptor::decode(lines[0].as_bytes()).unwrap().address,
        worker.descriptor().address
    );

    // The old route still carries traffic.
    let cancel = CancellationToken::new();
    let serving = worker.clone();
    let worker_cancel = cancel.clone();
    tokio::spawn(async move { serving.serve_dialed(worker_cancel).await });
    let reply = client()
        .call_via(&broker.endpoint(), "hello", vec![Bytes::from_static(b"Hello")], "hello")
        .await
        .unwrap();
    assert_eq!(reply, vec![Bytes::from_static(b"World")]);
    cancel.cancel();
}

#[tokio::test]
async fn test_malformed_registration_is_decode_fail() {
    let broker = start_test_broker(16).await;
    let err = client()
        .send_request(
            &broker.endpoint(),
            "register",
            vec![Bytes::from_static(b"{not json")],
            "register",
        )
        .await
        .unwrap_err();
    expect_status(err, ErrorCode::DecodeFail);
}

#[tokio::test]
async fn test_broker_answers_heartbeat() {
    let broker = start_test_broker(16).await;
    client().heartbeat(&broker.endpoint()).await.unwrap();
}

#[tokio::test]
async fn test_stored_services_are_routed_after_restart() {
    let dir = tempfile::tempdir().unwrap();
    let address = free_address().await;
    {
        let mut stored = Registry::with_store(dir.path().join("services.json"));
        stored.register(descriptor("hello", &address)).unwrap();
    }

    let broker = start_broker_in(dir, 16).await;
    let cancel = CancellationToken::new();
    let serving = hello_worker(&address);
    let worker_cancel = cancel.clone();
    tokio::spawn(async move { serving.serve_dialed(worker_cancel).await });

    let reply = client()
        .call_via(&broker.endpoint(), "hello", vec![Bytes::from_static(b"Hello")], "hello")
        .await
        .unwrap();
    assert_eq!(reply, vec![Bytes::from_static(b"World")]);
    cancel.cancel();
}

#[tokio::test]
async fn test_full_backend_queue_is_unavailable() {
    let broker = start_test_broker(1).await;
    client()
        .register(&broker.endpoint(), &descriptor("hello", &free_address().await))
        .await
        .unwrap();

    // No worker is connected: the first request waits in the queue.
    let endpoint = broker.endpoint();
    tokio::spawn(async move {
        let mut parked = Requester::connect(&endpoint, FrameLimits::default())
            .await
            .unwrap();
        let _ = parked
            .request(&Envelope::request("hello", "first"))
            .await;
    });
    tokio::time::sleep(Duration::from_millis(100)).await;

    let err = quick_client()
        .call_via(&broker.endpoint(), "hello", vec![Bytes::from_static(b"second")], "hello")
        .await
        .unwrap_err();
    expect_status(err, ErrorCode::Unavailable);
}

#[tokio::test]
async fn test_unwritable_record_file_still_registers_and_routes() {
    let dir = tempfile::tempdir().unwrap();
    let unwritable = dir.path().join("missing").join("services.json");
    let broker = start_broker_with(dir, |config| config.broker.services_file = unwritable).await;

    let worker = hello_worker(&free_address().await);
    let record = Bytes::from(worker.descriptor().encode().unwrap());
    let mut requester = Requester::connect(&broker.endpoint(), FrameLimits::default())
        .await
        .unwrap();
    let ack = requester
        .request(&Envelope::request(REGISTER, record))
        .await
        .unwrap();

    let body = ack.body();
    assert_eq!(body.len(), 3);
    assert_eq!(body[0].as_ref(), REGISTER.as_bytes());
    assert!(body[1].is_empty(), "error frame: {:?}", body[1]);
    let text = String::from_utf8_lossy(&body[2]);
    assert!(text.starts_with("Registered:PersistFail"), "{text}");
    assert!(!broker.services_file.exists());

    // The route was added even though nothing reached disk.
    let cancel = CancellationToken::new();
    let serving = worker.clone();
    let worker_cancel = cancel.clone();
    tokio::spawn(async move { serving.serve_dialed(worker_cancel).await });

    let reply = client()
        .call_via(&broker.endpoint(), "hello", vec![Bytes::from_static(b"Hello")], "hello")
        .await
        .unwrap();
    assert_eq!(reply, vec![Bytes::from_static(b"World")]);

    let found = quick_client().lookup(&broker.endpoint(), "hello").await.unwrap();
    assert_eq!(found.address, worker.descriptor().address);
    cancel.cancel();
}

#[tokio::test]
async fn test_backlog_beyond_worker_channel_is_fully_delivered() {
    let dir = tempfile::tempdir().unwrap();
    let broker = start_broker_with(dir, |config| {
        config.broker.backend_queue_limit = 16;
        config.transport.channel_capacity = 2;
    })
    .await;
    let worker = hello_worker(&free_address().await);
    worker.register(&broker.endpoint()).await.unwrap();

    // Queue more requests than a worker connection can hold before any
    // worker is connected.
    let caller = client().with_request_policy(RetryPolicy {
        attempts: 1,
        timeout: Duration::from_secs(3),
        reconnect_interval: Duration::from_millis(20),
    });
    let calls: Vec<_> = (0..6)
        .map(|_| {
            let caller = caller.clone();
            let endpoint = broker.endpoint();
            tokio::spawn(async move {
                caller
                    .call_via(&endpoint, "hello", vec![Bytes::from_static(b"Hello")], "hello")
                    .await
            })
        })
        .collect();
    tokio::time::sleep(Duration::from_millis(200)).await;

    let cancel = CancellationToken::new();
    let serving = worker.clone();
    let worker_cancel = cancel.clone();
    tokio::spawn(async move { serving.serve_dialed(worker_cancel).await });

    for call in calls {
        let reply = call.await.unwrap().unwrap();
        assert_eq!(reply, vec![Bytes::from_static(b"World")]);
    }
    cancel.cancel();
}
