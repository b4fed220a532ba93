//! 연결 단위 프레이밍 태스크
//!
//! [`handle_connection`]은 수락된 연결 하나를 소유하고 끝날 때까지 다음을 반복합니다.
//!
//! 1. 최대 `recv_buffer_size` 바이트를 읽습니다 (0바이트 = 스트림 끝).
//! 2. [`LineFramer`]로 완결된 라인을 꺼내 워커 풀에 제출합니다.
//! 3. 다음 라인을 제출하기 전에 이전 라인의 저장 완료를 기다립니다.
//!
//! 스트림 끝, 에러, 취소, 유휴 타임아웃 모두 같은 정리 경로를 거칩니다.
//! 소켓을 닫고, 남은 완결 라인과 비어 있지 않은 잔여분을 차례로 제출한 뒤 종료합니다.

use std::net::SocketAddr;
use std::time::Duration;

use scanlog_core::config::ListenerConfig;
use scanlog_core::metrics as m;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, debug, error, info, info_span, warn};
use uuid::Uuid;

use crate::error::{CollectorError, ConnectionError};
use crate::event::Event;
use crate::framer::LineFramer;
use crate::pool::{WorkHandle, WorkerPool};
use crate::sink::PersistOutcome;

/// 연결이 에러 없이 끝난 사유
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionEnd {
    /// 상대가 연결을 닫음
    Eof,
    /// 셧다운으로 취소됨
    Cancelled,
    /// 유휴 타임아웃 초과
    IdleTimeout,
}

impl ConnectionEnd {
    /// 메트릭 레이블용 짧은 이름
    pub fn label(&self) -> &'static str {
        match self {
            Self::Eof => "eof",
            Self::Cancelled => "cancelled",
            Self::IdleTimeout => "idle_timeout",
        }
    }
}

/// 연결 태스크 동작 옵션
#[derive(Debug, Clone)]
pub struct ConnectionOptions {
    /// 한 번에 읽는 최대 바이트 수
    pub recv_buffer_size: usize,
    /// 개행 없이 쌓일 수 있는 최대 바이트 수 (0 = 무제한)
    pub max_line_bytes: usize,
    /// 읽기 대기 제한 (`None` = 무제한)
    pub idle_timeout: Option<Duration>,
}

impl ConnectionOptions {
    /// 수신기 설정으로부터 옵션을 만듭니다.
    pub fn from_config(config: &ListenerConfig) -> Self {
        Self {
            recv_buffer_size: config.recv_buffer_size.max(1),
            max_line_bytes: config.max_line_bytes,
            idle_timeout: (config.idle_timeout_secs > 0)
                .then(|| Duration::from_secs(config.idle_timeout_secs)),
        }
    }
}

impl Default for ConnectionOptions {
    fn default() -> Self {
        Self::from_config(&ListenerConfig::default())
    }
}

/// 종료된 연결의 요약
#[derive(Debug)]
pub struct ConnectionReport {
    /// 송신 측 주소
    pub peer: SocketAddr,
    /// 연결 식별자
    pub connection_id: Uuid,
    /// 풀에 제출한 이벤트 수
    pub events: u64,
    /// 종료 사유
    pub end: Result<ConnectionEnd, ConnectionError>,
}

impl ConnectionReport {
    /// 메트릭 레이블용 종료 사유
    pub fn end_label(&self) -> &'static str {
        match &self.end {
            Ok(end) => end.label(),
            Err(_) => "error",
        }
    }
}

/// 연결 하나를 끝까지 처리합니다.
///
/// 반환 시점에는 스트림이 닫혀 있고, 이 연결에서 추출한 모든 이벤트가 풀에 제출되어
/// 있습니다. 에러는 이 연결에만 영향을 주며 [`ConnectionReport::end`]로 보고됩니다.
pub async fn handle_connection<S>(
    stream: S,
    peer: SocketAddr,
    pool: WorkerPool,
    options: ConnectionOptions,
    cancel: CancellationToken,
) -> ConnectionReport
where
    S: AsyncRead + Unpin + Send,
{
    let connection_id = Uuid::new_v4();
    let span = info_span!("connection", %peer, %connection_id);
    let session = Session {
        pool,
        peer,
        connection_id,
        cancel,
        events: 0,
        pending: None,
    };
    session.run(stream, options).instrument(span).await
}

/// 활성 연결 gauge를 연결 수명 동안 유지합니다.
struct ActiveGuard;

impl ActiveGuard {
    fn new() -> Self {
        metrics::gauge!(m::LISTENER_CONNECTIONS_ACTIVE).increment(1.0);
        Self
    }
}

impl Drop for ActiveGuard {
    fn drop(&mut self) {
        metrics::gauge!(m::LISTENER_CONNECTIONS_ACTIVE).decrement(1.0);
    }
}

struct Session {
    pool: WorkerPool,
    peer: SocketAddr,
    connection_id: Uuid,
    cancel: CancellationToken,
    events: u64,
    /// 취소로 기다림이 중단된 저장 작업
    pending: Option<WorkHandle>,
}

impl Session {
    async fn run<S>(mut self, mut stream: S, options: ConnectionOptions) -> ConnectionReport
    where
        S: AsyncRead + Unpin + Send,
    {
        let _active = ActiveGuard::new();
        debug!("connection opened");

        let mut framer = LineFramer::new(options.max_line_bytes);
        let mut chunk = vec![0u8; options.recv_buffer_size];

        let end = loop {
            let read = tokio::select! {
                biased;
                () = self.cancel.cancelled() => break Ok(ConnectionEnd::Cancelled),
                read = read_chunk(&mut stream, &mut chunk, options.idle_timeout) => read,
            };

            let n = match read {
                Ok(Some(0)) => break Ok(ConnectionEnd::Eof),
                Ok(Some(n)) => n,
                Ok(None) => break Ok(ConnectionEnd::IdleTimeout),
                Err(e) => break Err(ConnectionError::Io(e)),
            };

            // 한도를 넘은 꼬리는 버려지지만 그 앞의 완결 라인은 먼저 제출합니다
            let pushed = framer.push(&chunk[..n]);

            match self.deliver_complete(&mut framer).await {
                Ok(true) => {}
                Ok(false) => break Ok(ConnectionEnd::Cancelled),
                Err(e) => break Err(e),
            }
            if let Err(e) = pushed {
                break Err(e);
            }
        };

        drop(stream);
        self.flush(&mut framer).await;

        match &end {
            Ok(ConnectionEnd::Cancelled) => debug!(events = self.events, "connection cancelled"),
            Ok(ConnectionEnd::Eof) => debug!(events = self.events, "connection closed by peer"),
            Ok(ConnectionEnd::IdleTimeout) => {
                info!(events = self.events, "connection closed after idle timeout");
            }
            Err(e) => warn!(events = self.events, error = %e, "connection closed with error"),
        }

        let report = ConnectionReport {
            peer: self.peer,
            connection_id: self.connection_id,
            events: self.events,
            end,
        };
        metrics::counter!(m::LISTENER_CONNECTIONS_CLOSED_TOTAL, m::LABEL_END => report.end_label())
            .increment(1);
        report
    }

    /// 버퍼의 완결 라인을 모두 제출합니다. 취소되면 `Ok(false)`.
    async fn deliver_complete(&mut self, framer: &mut LineFramer) -> Result<bool, ConnectionError> {
        while let Some(line) = framer.next_line() {
            let text = line.inspect_err(|_| {
                metrics::counter!(m::EVENTS_DECODE_ERRORS_TOTAL).increment(1);
            })?;
            if !self.deliver(text).await {
                return Ok(false);
            }
        }
        Ok(true)
    }

    /// 이벤트를 제출하고 저장 완료를 기다립니다. 기다리는 중 취소되면 `false`.
    async fn deliver(&mut self, content: String) -> bool {
        let Some(mut handle) = self.dispatch(content) else {
            return true;
        };

        tokio::select! {
            biased;
            result = &mut handle => {
                self.report(result);
                true
            }
            () = self.cancel.cancelled() => {
                self.pending = Some(handle);
                false
            }
        }
    }

    /// 정리 경로: 남은 작업을 기다리고 완결 라인과 잔여분을 순서대로 제출합니다.
    async fn flush(&mut self, framer: &mut LineFramer) {
        if let Some(handle) = self.pending.take() {
            let result = handle.await;
            self.report(result);
        }

        while let Some(line) = framer.next_line() {
            match line {
                Ok(text) => self.deliver_to_end(text).await,
                Err(e) => self.skip_undecodable(&e),
            }
        }

        match framer.finish() {
            Some(Ok(text)) => self.deliver_to_end(text).await,
            Some(Err(e)) => self.skip_undecodable(&e),
            None => {}
        }
    }

    async fn deliver_to_end(&mut self, content: String) {
        if let Some(handle) = self.dispatch(content) {
            let result = handle.await;
            self.report(result);
        }
    }

    fn skip_undecodable(&self, err: &ConnectionError) {
        metrics::counter!(m::EVENTS_DECODE_ERRORS_TOTAL).increment(1);
        warn!(error = %err, "dropping undecodable line during flush");
    }

    fn dispatch(&mut self, content: String) -> Option<WorkHandle> {
        let event = Event::new(content, self.peer, self.connection_id, self.events);
        self.events += 1;
        metrics::counter!(m::EVENTS_RECEIVED_TOTAL).increment(1);

        match self.pool.submit(event) {
            Ok(handle) => Some(handle),
            Err(e) => {
                error!(error = %e, "failed to submit event");
                None
            }
        }
    }

    fn report(&self, result: Result<PersistOutcome, CollectorError>) {
        match result {
            Ok(PersistOutcome::Stored {
                path,
                bytes,
                marker_matched,
            }) => {
                info!(path = %path.display(), bytes, marker_matched, "saved event");
            }
            Ok(PersistOutcome::Rejected) => debug!("event without marker rejected"),
            Ok(PersistOutcome::NoData) => debug!("empty event skipped"),
            Err(e) => error!(error = %e, "failed to persist event"),
        }
    }
}

/// 청크 하나를 읽습니다. 유휴 타임아웃이 지나면 `Ok(None)`.
async fn read_chunk<S>(
    stream: &mut S,
    buf: &mut [u8],
    idle_timeout: Option<Duration>,
) -> std::io::Result<Option<usize>>
where
    S: AsyncRead + Unpin,
{
    match idle_timeout {
        Some(limit) => match tokio::time::timeout(limit, stream.read(buf)).await {
            Ok(read) => read.map(Some),
            Err(_) => Ok(None),
        },
        None => stream.read(buf).await.map(Some),
    }
}
