//! 이벤트 저장소
//!
//! [`EventSink`]는 워커 스레드에서 호출되는 블로킹 저장 인터페이스입니다.
//! [`FileSink`]는 이벤트 하나를 파일 하나로 저장하고, 본문에 마커 문자열이
//! 포함되었는지 보고합니다.
//!
//! # 파일 레이아웃
//!
//! ```text
//! {log_dir}/{file_prefix}{YYYYmmdd_HHMMSS_ffffff}.log
//! {log_dir}/{file_prefix}{YYYYmmdd_HHMMSS_ffffff}_1.log   (같은 마이크로초에 충돌한 경우)
//! ```

use std::fs::{self, OpenOptions};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};

use chrono::Local;
use scanlog_core::config::StorageConfig;
use tracing::debug;

use crate::error::CollectorError;

/// 같은 타임스탬프에서 시도할 최대 파일명 수
const MAX_NAME_ATTEMPTS: u32 = 1000;

/// 이벤트 저장 결과
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PersistOutcome {
    /// 빈 이벤트. 아무것도 쓰지 않음
    NoData,
    /// 마커가 없어 거부됨 (`reject_unmatched = true`). 아무것도 쓰지 않음
    Rejected,
    /// 파일로 저장됨
    Stored {
        /// 생성된 파일 경로
        path: PathBuf,
        /// 기록한 바이트 수
        bytes: usize,
        /// 마커 포함 여부
        marker_matched: bool,
    },
}

impl PersistOutcome {
    /// 메트릭 레이블용 짧은 이름
    pub fn label(&self) -> &'static str {
        match self {
            Self::NoData => "empty",
            Self::Rejected => "rejected",
            Self::Stored { .. } => "stored",
        }
    }

    /// 저장된 이벤트가 마커를 포함하는지 여부
    pub fn marker_matched(&self) -> bool {
        matches!(
            self,
            Self::Stored {
                marker_matched: true,
                ..
            }
        )
    }
}

/// 블로킹 이벤트 저장 인터페이스
///
/// 워커 풀의 블로킹 스레드에서 호출되므로 내부에서 비동기 런타임을 기대하면 안 됩니다.
/// 실패는 호출자에게 그대로 반환하며 재시도하지 않습니다.
pub trait EventSink: Send + Sync + 'static {
    /// 이벤트 본문 하나를 저장합니다.
    fn persist(&self, content: &str) -> Result<PersistOutcome, CollectorError>;
}

/// 이벤트 하나를 파일 하나로 저장하는 저장소
#[derive(Debug, Clone)]
pub struct FileSink {
    root: PathBuf,
    file_prefix: String,
    marker: String,
    reject_unmatched: bool,
}

impl FileSink {
    /// 설정으로부터 저장소를 열고, 저장 디렉토리가 없으면 생성합니다.
    pub fn open(config: &StorageConfig) -> Result<Self, CollectorError> {
        let sink = Self {
            root: PathBuf::from(&config.log_dir),
            file_prefix: config.file_prefix.clone(),
            marker: config.marker.clone(),
            reject_unmatched: config.reject_unmatched,
        };
        sink.ensure_root()?;
        Ok(sink)
    }

    /// 저장 디렉토리 경로
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// 분류에 사용하는 마커 문자열
    pub fn marker(&self) -> &str {
        &self.marker
    }

    /// 본문에 마커가 포함되어 있는지 확인합니다.
    pub fn contains_marker(&self, content: &str) -> bool {
        content.contains(&self.marker)
    }

    fn ensure_root(&self) -> Result<(), CollectorError> {
        fs::create_dir_all(&self.root).map_err(|source| CollectorError::Storage {
            path: self.root.display().to_string(),
            source,
        })
    }

    fn file_name(&self, stamp: &str, attempt: u32) -> String {
        if attempt == 0 {
            format!("{}{stamp}.log", self.file_prefix)
        } else {
            format!("{}{stamp}_{attempt}.log", self.file_prefix)
        }
    }

    /// 새 파일을 만들어 본문 전체를 기록합니다.
    fn write_new(&self, path: &Path, content: &str) -> std::io::Result<WriteAttempt> {
        let mut file = match OpenOptions::new().write(true).create_new(true).open(path) {
            Ok(f) => f,
            Err(e) if e.kind() == ErrorKind::AlreadyExists => return Ok(WriteAttempt::NameTaken),
            Err(e) => return Err(e),
        };

        if let Err(e) = file.write_all(content.as_bytes()).and_then(|()| file.flush()) {
            // 부분 기록 파일을 남기지 않습니다
            drop(file);
            let _ = fs::remove_file(path);
            return Err(e);
        }

        Ok(WriteAttempt::Written)
    }
}

/// [`FileSink::write_new`] 한 번의 결과
#[derive(Debug, PartialEq, Eq)]
enum WriteAttempt {
    /// 파일을 새로 만들고 본문을 모두 기록함
    Written,
    /// 같은 이름의 파일이 이미 있어 아무것도 쓰지 않음
    NameTaken,
}

impl EventSink for FileSink {
    fn persist(&self, content: &str) -> Result<PersistOutcome, CollectorError> {
        if content.is_empty() {
            return Ok(PersistOutcome::NoData);
        }

        let marker_matched = self.contains_marker(content);
        if self.reject_unmatched && !marker_matched {
            return Ok(PersistOutcome::Rejected);
        }

        let stamp = Local::now().format("%Y%m%d_%H%M%S_%6f").to_string();
        let mut root_recreated = false;
        let mut attempt = 0;

        while attempt < MAX_NAME_ATTEMPTS {
            let path = self.root.join(self.file_name(&stamp, attempt));
            match self.write_new(&path, content) {
                Ok(WriteAttempt::Written) => {
                    debug!(path = %path.display(), bytes = content.len(), "event file written");
                    return Ok(PersistOutcome::Stored {
                        path,
                        bytes: content.len(),
                        marker_matched,
                    });
                }
                Ok(WriteAttempt::NameTaken) => attempt += 1,
                // 실행 중에 저장 디렉토리가 사라진 경우 한 번만 다시 만듭니다
                Err(e) if e.kind() == ErrorKind::NotFound && !root_recreated => {
                    root_recreated = true;
                    self.ensure_root()?;
                }
                Err(source) => {
                    return Err(CollectorError::Storage {
                        path: path.display().to_string(),
                        source,
                    });
                }
            }
        }

        Err(CollectorError::Storage {
            path: self.root.join(self.file_name(&stamp, 0)).display().to_string(),
            source: std::io::Error::new(
                ErrorKind::AlreadyExists,
                format!("no free file name after {MAX_NAME_ATTEMPTS} attempts"),
            ),
        })
    }
}
