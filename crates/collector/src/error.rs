//! 수집기 에러 타입
//!
//! [`CollectorError`]는 수신기와 워커 풀, 저장소에서 발생하는 에러입니다.
//! [`ConnectionError`]는 단일 연결을 끝내는 에러로, 다른 연결에 전파되지 않습니다.
//! 셧다운에 의한 취소는 에러가 아니라 [`ConnectionEnd::Cancelled`](crate::ConnectionEnd)로 표현합니다.

use scanlog_core::error::ScanlogError;

/// 수집기 도메인 에러
#[derive(Debug, thiserror::Error)]
pub enum CollectorError {
    /// 리스너 바인드 실패
    #[error("failed to bind {addr}: {source}")]
    Bind {
        /// 바인드하려던 주소
        addr: String,
        /// 원인 I/O 에러
        #[source]
        source: std::io::Error,
    },

    /// 연결 수락 실패 (리스너 종료)
    #[error("accept error: {0}")]
    Accept(#[source] std::io::Error),

    /// 이벤트 파일 쓰기 실패
    #[error("storage error: {path}: {source}")]
    Storage {
        /// 쓰려던 파일 또는 디렉토리 경로
        path: String,
        /// 원인 I/O 에러
        #[source]
        source: std::io::Error,
    },

    /// drain 이후 제출된 작업
    #[error("worker pool is closed")]
    PoolClosed,

    /// 워커 스레드에서 작업이 패닉하거나 취소됨
    #[error("worker failed: {0}")]
    Worker(String),

    /// 설정 에러
    #[error("config error: {field}: {reason}")]
    Config {
        /// 설정 필드명
        field: String,
        /// 에러 사유
        reason: String,
    },
}

impl From<CollectorError> for ScanlogError {
    fn from(err: CollectorError) -> Self {
        ScanlogError::Collector(err.to_string())
    }
}

/// 단일 연결을 종료시키는 에러
#[derive(Debug, thiserror::Error)]
pub enum ConnectionError {
    /// UTF-8이 아닌 라인
    #[error("invalid utf-8 in line {line}: {source}")]
    Decode {
        /// 연결 내 라인 번호 (1부터)
        line: u64,
        /// 디코딩 에러
        #[source]
        source: std::str::Utf8Error,
    },

    /// 소켓 읽기 실패
    #[error("read error: {0}")]
    Io(#[from] std::io::Error),

    /// 개행 없이 최대 라인 크기를 초과
    #[error("line exceeds {max} bytes without a delimiter")]
    LineTooLong {
        /// 허용된 최대 바이트 수
        max: usize,
    },
}

impl ConnectionError {
    /// 메트릭 레이블용 짧은 이름
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Decode { .. } => "decode",
            Self::Io(_) => "io",
            Self::LineTooLong { .. } => "line_too_long",
        }
    }
}
