//! 에러 타입: 도메인별 에러 정의

/// scanlog 최상위 에러 타입
#[derive(Debug, thiserror::Error)]
pub enum ScanlogError {
    /// 설정 관련 에러
    #[error("config error: {0}")]
    Config(#[from] ConfigError),

    /// 수집기 에러 (바인드, 풀 종료 등)
    #[error("collector error: {0}")]
    Collector(String),

    /// I/O 에러
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// 설정 관련 에러
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// 설정 파일을 찾을 수 없음
    #[error("config file not found: {path}")]
    FileNotFound { path: String },

    /// 설정 파싱 실패
    #[error("failed to parse config: {reason}")]
    ParseFailed { reason: String },

    /// 유효하지 않은 설정 값
    #[error("invalid config value for '{field}': {reason}")]
    InvalidValue { field: String, reason: String },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_error_converts_to_scanlog_error() {
        let err: ScanlogError = ConfigError::InvalidValue {
            field: "pool.workers".to_owned(),
            reason: "must be greater than 0".to_owned(),
        }
        .into();
        assert!(matches!(err, ScanlogError::Config(_)));
        assert!(err.to_string().contains("pool.workers"));
    }

    #[test]
    fn io_error_converts_to_scanlog_error() {
        let io = std::io::Error::new(std::io::ErrorKind::PermissionDenied, "denied");
        let err: ScanlogError = io.into();
        assert!(matches!(err, ScanlogError::Io(_)));
    }
}
