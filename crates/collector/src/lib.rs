//! scanlog 수집기: TCP 연결을 이벤트로 나누어 파일로 저장합니다.
//!
//! # 모듈 구성
//!
//! - [`listener`]: TCP 바인드 및 연결 수락 루프 ([`Acceptor`])
//! - [`connection`]: 연결당 수신 루프, 이벤트 제출, 종료 시 잔여 버퍼 플러시
//! - [`connections`]: 실행 중인 연결 태스크 집합, 일괄 취소 및 정착 대기
//! - [`framer`]: 바이트 스트림을 개행 단위 라인으로 나누는 순수 프레이머
//! - [`pool`]: 블로킹 저장 작업의 동시 실행 수를 제한하는 워커 풀
//! - [`sink`]: 이벤트를 파일로 저장하고 마커 포함 여부를 보고하는 저장소
//! - [`event`]: 연결에서 추출된 이벤트 타입
//! - [`error`]: 도메인 에러 타입
//!
//! # 아키텍처
//!
//! ```text
//! Acceptor --spawn--> connection task --submit/await--> WorkerPool --spawn_blocking--> EventSink
//!    |                     |                                 |
//! TcpListener         LineFramer                     Semaphore(workers)
//! ```

pub mod connection;
pub mod connections;
pub mod error;
pub mod event;
pub mod framer;
pub mod listener;
pub mod pool;
pub mod sink;

// --- 주요 타입 re-export ---

pub use connection::{ConnectionEnd, ConnectionOptions, ConnectionReport, handle_connection};
pub use connections::{ConnectionSet, SettleSummary, SpawnRejected};
pub use error::{CollectorError, ConnectionError};
pub use event::Event;
pub use framer::LineFramer;
pub use listener::Acceptor;
pub use pool::{WorkHandle, WorkerPool};
pub use sink::{EventSink, FileSink, PersistOutcome};
