//! 통합 테스트 -- TCP 수신부터 파일 저장까지의 전체 흐름 검증
//!
//! 실제 루프백 소켓에 [`Acceptor`]를 바인드하고, 클라이언트 연결이 보낸 바이트가
//! 워커 풀을 거쳐 저장소에 도달하는지 확인합니다.

use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;
use tokio_util::sync::CancellationToken;

use scanlog_collector::{
    Acceptor, CollectorError, ConnectionSet, EventSink, FileSink, PersistOutcome, WorkerPool,
};
use scanlog_core::config::{DEFAULT_MARKER, ListenerConfig, StorageConfig};

/// 동시 실행 수와 본문을 기록하는 테스트용 저장소
struct TrackingSink {
    current: AtomicUsize,
    peak: AtomicUsize,
    seen: Mutex<Vec<String>>,
    delay: Duration,
}

impl Default for TrackingSink {
    fn default() -> Self {
        Self::with_delay(Duration::from_millis(10))
    }
}

impl TrackingSink {
    fn with_delay(delay: Duration) -> Self {
        Self {
            current: AtomicUsize::new(0),
            peak: AtomicUsize::new(0),
            seen: Mutex::new(Vec::new()),
            delay,
        }
    }

    fn seen(&self) -> Vec<String> {
        self.seen.lock().unwrap().clone()
    }
}

impl EventSink for TrackingSink {
    fn persist(&self, content: &str) -> Result<PersistOutcome, CollectorError> {
        let now = self.current.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
        std::thread::sleep(self.delay);
        self.seen.lock().unwrap().push(content.to_owned());
        self.current.fetch_sub(1, Ordering::SeqCst);
        Ok(PersistOutcome::NoData)
    }
}

/// 루프백에 바인드된 수집기 한 벌
struct Harness {
    addr: std::net::SocketAddr,
    pool: WorkerPool,
    connections: ConnectionSet,
    cancel: CancellationToken,
    task: tokio::task::JoinHandle<Result<(), CollectorError>>,
}

impl Harness {
    async fn start(sink: Arc<dyn EventSink>, workers: usize, max_connections: usize) -> Self {
        let config = ListenerConfig {
            bind_addr: "127.0.0.1".to_owned(),
            port: 0,
            max_connections,
            ..Default::default()
        };
        let pool = WorkerPool::new(sink, workers).expect("pool");
        let connections = ConnectionSet::new(config.max_connections);
        let cancel = CancellationToken::new();

        let acceptor = Acceptor::bind(&config, pool.clone(), connections.clone(), cancel.clone())
            .await
            .expect("bind");
        let addr = acceptor.local_addr();
        let task = tokio::spawn(acceptor.run());

        Self {
            addr,
            pool,
            connections,
            cancel,
            task,
        }
    }

    async fn send(&self, payload: &[u8]) {
        let mut stream = TcpStream::connect(self.addr).await.expect("connect");
        stream.write_all(payload).await.expect("write");
        stream.shutdown().await.expect("shutdown");
    }

    /// 수락기, 연결, 풀 순서로 정리합니다.
    async fn stop(self) {
        self.cancel.cancel();
        self.task.await.expect("join").expect("acceptor");
        self.connections.cancel_and_settle().await;
        self.pool.drain().await;
    }
}

/// 조건이 참이 될 때까지 최대 5초간 폴링합니다.
async fn wait_for(mut condition: impl FnMut() -> bool) {
    for _ in 0..500 {
        if condition() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("condition not met within timeout");
}

fn stored_files(dir: &Path) -> Vec<String> {
    let mut contents: Vec<String> = std::fs::read_dir(dir)
        .expect("read dir")
        .map(|e| std::fs::read_to_string(e.expect("entry").path()).expect("read file"))
        .collect();
    contents.sort();
    contents
}

/// 20개 동시 연결, 풀 크기 8: 모두 저장되고 저장 호출은 병렬로, 최대 8개까지 실행
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_connections_are_bounded_by_pool() {
    let sink = Arc::new(TrackingSink::with_delay(Duration::from_millis(50)));
    let harness = Harness::start(sink.clone(), 8, 0).await;

    let mut clients = Vec::new();
    for i in 0..20 {
        let addr = harness.addr;
        clients.push(tokio::spawn(async move {
            let mut stream = TcpStream::connect(addr).await.expect("connect");
            stream
                .write_all(format!("client-{i}\n").as_bytes())
                .await
                .expect("write");
            stream.shutdown().await.expect("shutdown");
        }));
    }
    for client in clients {
        client.await.expect("client");
    }

    wait_for(|| sink.seen().len() == 20).await;
    harness.stop().await;

    let mut seen = sink.seen();
    seen.sort();
    let mut expected: Vec<String> = (0..20).map(|i| format!("client-{i}")).collect();
    expected.sort();
    assert_eq!(seen, expected);
    let peak = sink.peak.load(Ordering::SeqCst);
    assert!(peak > 1, "persist calls never overlapped");
    assert!(peak <= 8, "peak {peak} exceeds pool size");
}

/// 한 연결의 이벤트는 보낸 순서대로 저장됩니다.
#[tokio::test]
async fn test_per_connection_order_is_preserved() {
    let sink = Arc::new(TrackingSink::default());
    let harness = Harness::start(sink.clone(), 4, 0).await;

    let payload: String = (0..50).map(|i| format!("line-{i}\n")).collect();
    harness.send(payload.as_bytes()).await;

    wait_for(|| sink.seen().len() == 50).await;
    harness.stop().await;

    let expected: Vec<String> = (0..50).map(|i| format!("line-{i}")).collect();
    assert_eq!(sink.seen(), expected);
}

/// "hello\nworld" → 파일 두 개
#[tokio::test]
async fn test_hello_world_writes_two_files() {
    let tmp = tempfile::tempdir().expect("tempdir");
    let storage = StorageConfig {
        log_dir: tmp.path().join("incoming").display().to_string(),
        ..Default::default()
    };
    let sink = Arc::new(FileSink::open(&storage).expect("sink"));
    let root = sink.root().to_path_buf();
    let harness = Harness::start(sink, 2, 0).await;

    harness.send(b"hello\nworld").await;

    wait_for(|| std::fs::read_dir(&root).map(|d| d.count()).unwrap_or(0) == 2).await;
    harness.stop().await;

    assert_eq!(stored_files(&root), vec!["hello", "world"]);
}

/// 마커가 포함된 라인은 저장되고 일치로 보고됩니다.
#[tokio::test]
async fn test_marker_line_is_stored() {
    let tmp = tempfile::tempdir().expect("tempdir");
    let storage = StorageConfig {
        log_dir: tmp.path().display().to_string(),
        ..Default::default()
    };
    let sink = FileSink::open(&storage).expect("sink");

    let line = format!("A{DEFAULT_MARKER}B");
    let outcome = sink.persist(&line).expect("persist");
    assert!(outcome.marker_matched());

    let sink = Arc::new(sink);
    let harness = Harness::start(sink, 1, 0).await;
    harness.send(format!("{line}\n").as_bytes()).await;

    wait_for(|| stored_files(tmp.path()).len() == 2).await;
    harness.stop().await;

    assert!(stored_files(tmp.path()).iter().all(|c| c == &line));
}

/// 아무것도 보내지 않은 연결은 이벤트를 만들지 않습니다.
#[tokio::test]
async fn test_empty_connection_writes_nothing() {
    let tmp = tempfile::tempdir().expect("tempdir");
    let storage = StorageConfig {
        log_dir: tmp.path().display().to_string(),
        ..Default::default()
    };
    let sink = Arc::new(FileSink::open(&storage).expect("sink"));
    let harness = Harness::start(sink, 1, 0).await;

    harness.send(b"").await;
    harness.send(b"\n\n").await;
    tokio::time::sleep(Duration::from_millis(100)).await;

    // 연결 태스크가 끝날 때까지 기다립니다
    wait_for(|| harness.connections.active() == 0).await;
    harness.stop().await;

    assert!(stored_files(tmp.path()).is_empty());
}

/// 한 연결의 디코딩 에러는 다른 연결에 영향을 주지 않습니다.
#[tokio::test]
async fn test_decode_error_is_isolated_to_its_connection() {
    let sink = Arc::new(TrackingSink::default());
    let harness = Harness::start(sink.clone(), 2, 0).await;

    harness.send(b"bad-before\n\xff\xfe\n").await;
    harness.send(b"good\n").await;

    wait_for(|| sink.seen().len() == 2).await;
    harness.stop().await;

    let mut seen = sink.seen();
    seen.sort();
    assert_eq!(seen, vec!["bad-before", "good"]);
}

/// 연결 한도를 넘은 연결은 즉시 닫힙니다.
#[tokio::test]
async fn test_connection_limit_closes_extra_connections() {
    let sink = Arc::new(TrackingSink::default());
    let harness = Harness::start(sink.clone(), 1, 1).await;

    // 첫 연결은 열어 둔 채로 유지합니다
    let mut held = TcpStream::connect(harness.addr).await.expect("connect");
    held.write_all(b"held\n").await.expect("write");
    wait_for(|| sink.seen().len() == 1).await;

    // 거부된 연결은 서버가 먼저 닫을 수 있으므로 쓰기 에러는 무시합니다
    let mut extra = TcpStream::connect(harness.addr).await.expect("connect");
    let _ = extra.write_all(b"rejected\n").await;
    tokio::time::sleep(Duration::from_millis(100)).await;
    drop(extra);

    drop(held);
    harness.stop().await;

    assert_eq!(sink.seen(), vec!["held"]);
}

/// 셧다운은 열려 있는 연결의 잔여 버퍼를 저장한 뒤 끝납니다.
#[tokio::test]
async fn test_shutdown_flushes_open_connections() {
    let sink = Arc::new(TrackingSink::default());
    let harness = Harness::start(sink.clone(), 2, 0).await;

    let mut open = TcpStream::connect(harness.addr).await.expect("connect");
    open.write_all(b"first\nunterminated").await.expect("write");
    wait_for(|| sink.seen().len() == 1).await;
    tokio::time::sleep(Duration::from_millis(50)).await;

    harness.stop().await;

    assert_eq!(sink.seen(), vec!["first", "unterminated"]);
    drop(open);
}
