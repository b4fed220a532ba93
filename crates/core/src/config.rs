//! 설정 관리: scanlog.toml 파싱 및 런타임 설정
//!
//! [`ScanlogConfig`]는 수신기, 저장소, 워커 풀, 메트릭 설정을 담는 최상위 구조체입니다.
//!
//! # 설정 로딩 우선순위
//! 1. CLI 인자 (최고 우선)
//! 2. 환경변수 (`SCANLOG_LISTENER_PORT=5514` 형식)
//! 3. 설정 파일 (`scanlog.toml`)
//! 4. 기본값 (`Default` 구현)
//!
//! # 사용 예시
//! ```no_run
//! # async fn example() -> Result<(), scanlog_core::error::ScanlogError> {
//! use scanlog_core::config::ScanlogConfig;
//!
//! // 파일에서 로드 + 환경변수 오버라이드, 이후 검증
//! let config = ScanlogConfig::load("scanlog.toml").await?;
//! config.validate()?;
//!
//! // TOML 문자열에서 직접 파싱
//! let config = ScanlogConfig::parse("[listener]\nport = 5514")?;
//! # Ok(())
//! # }
//! ```

use std::net::IpAddr;
use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::{ConfigError, ScanlogError};

/// 기본 마커 문자열 (스캔 최종 결과 이벤트)
pub const DEFAULT_MARKER: &str = "- scan_machine.final_result -";

/// scanlog 통합 설정
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ScanlogConfig {
    /// 일반 설정
    #[serde(default)]
    pub general: GeneralConfig,
    /// TCP 수신기 설정
    #[serde(default)]
    pub listener: ListenerConfig,
    /// 이벤트 저장소 설정
    #[serde(default)]
    pub storage: StorageConfig,
    /// 워커 풀 설정
    #[serde(default)]
    pub pool: PoolConfig,
    /// 메트릭 설정
    #[serde(default)]
    pub metrics: MetricsConfig,
}

impl ScanlogConfig {
    /// TOML 파일에서 설정을 로드하고 환경변수 오버라이드를 적용합니다.
    ///
    /// 검증하지 않습니다. 호출자가 CLI 등 남은 오버라이드를 모두 적용한 뒤
    /// [`validate`](Self::validate)를 한 번 호출해야 합니다.
    pub async fn load(path: impl AsRef<Path>) -> Result<Self, ScanlogError> {
        let mut config = Self::from_file(path).await?;
        config.apply_env_overrides();
        Ok(config)
    }

    /// 파일 없이 기본값 + 환경변수 오버라이드로 설정을 만듭니다.
    ///
    /// [`load`](Self::load)와 마찬가지로 검증은 호출자의 몫입니다.
    pub fn from_env() -> Self {
        let mut config = Self::default();
        config.apply_env_overrides();
        config
    }

    /// TOML 파일에서 설정을 로드합니다 (환경변수 오버라이드 없음).
    pub async fn from_file(path: impl AsRef<Path>) -> Result<Self, ScanlogError> {
        let path = path.as_ref();
        let content = tokio::fs::read_to_string(path).await.map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                ScanlogError::Config(ConfigError::FileNotFound {
                    path: path.display().to_string(),
                })
            } else {
                ScanlogError::Io(e)
            }
        })?;
        Self::parse(&content)
    }

    /// TOML 문자열에서 설정을 파싱합니다.
    pub fn parse(toml_str: &str) -> Result<Self, ScanlogError> {
        toml::from_str(toml_str).map_err(|e| {
            ScanlogError::Config(ConfigError::ParseFailed {
                reason: e.to_string(),
            })
        })
    }

    /// 환경변수로 설정값을 오버라이드합니다.
    ///
    /// 환경변수 네이밍 규칙: `SCANLOG_{SECTION}_{FIELD}`
    /// 예: `SCANLOG_STORAGE_LOG_DIR=/srv/incoming`
    pub fn apply_env_overrides(&mut self) {
        // General
        override_string(&mut self.general.log_level, "SCANLOG_GENERAL_LOG_LEVEL");
        override_string(&mut self.general.log_format, "SCANLOG_GENERAL_LOG_FORMAT");

        // Listener
        override_string(&mut self.listener.bind_addr, "SCANLOG_LISTENER_BIND_ADDR");
        override_u16(&mut self.listener.port, "SCANLOG_LISTENER_PORT");
        override_usize(
            &mut self.listener.recv_buffer_size,
            "SCANLOG_LISTENER_RECV_BUFFER_SIZE",
        );
        override_usize(
            &mut self.listener.max_line_bytes,
            "SCANLOG_LISTENER_MAX_LINE_BYTES",
        );
        override_usize(
            &mut self.listener.max_connections,
            "SCANLOG_LISTENER_MAX_CONNECTIONS",
        );
        override_u64(
            &mut self.listener.idle_timeout_secs,
            "SCANLOG_LISTENER_IDLE_TIMEOUT_SECS",
        );

        // Storage
        override_string(&mut self.storage.log_dir, "SCANLOG_STORAGE_LOG_DIR");
        override_string(&mut self.storage.file_prefix, "SCANLOG_STORAGE_FILE_PREFIX");
        override_string(&mut self.storage.marker, "SCANLOG_STORAGE_MARKER");
        override_bool(
            &mut self.storage.reject_unmatched,
            "SCANLOG_STORAGE_REJECT_UNMATCHED",
        );

        // Pool
        override_usize(&mut self.pool.workers, "SCANLOG_POOL_WORKERS");

        // Metrics
        override_bool(&mut self.metrics.enabled, "SCANLOG_METRICS_ENABLED");
        override_string(&mut self.metrics.listen_addr, "SCANLOG_METRICS_LISTEN_ADDR");
        override_u16(&mut self.metrics.port, "SCANLOG_METRICS_PORT");
    }

    /// 설정값의 유효성을 검증합니다.
    pub fn validate(&self) -> Result<(), ScanlogError> {
        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.general.log_level.as_str()) {
            return Err(invalid(
                "general.log_level",
                format!("must be one of: {}", valid_levels.join(", ")),
            ));
        }

        let valid_formats = ["json", "pretty"];
        if !valid_formats.contains(&self.general.log_format.as_str()) {
            return Err(invalid(
                "general.log_format",
                format!("must be one of: {}", valid_formats.join(", ")),
            ));
        }

        if self.listener.bind_addr.parse::<IpAddr>().is_err() {
            return Err(invalid(
                "listener.bind_addr",
                format!("'{}' is not an IP address", self.listener.bind_addr),
            ));
        }

        if self.listener.recv_buffer_size == 0 {
            return Err(invalid(
                "listener.recv_buffer_size",
                "must be greater than 0".to_owned(),
            ));
        }

        if self.storage.log_dir.trim().is_empty() {
            return Err(invalid("storage.log_dir", "must not be empty".to_owned()));
        }

        if self.storage.marker.is_empty() {
            return Err(invalid("storage.marker", "must not be empty".to_owned()));
        }

        // 파일명 접두어가 경로를 벗어나지 못하도록
        if self.storage.file_prefix.contains(['/', '\\']) {
            return Err(invalid(
                "storage.file_prefix",
                "must not contain path separators".to_owned(),
            ));
        }

        if self.pool.workers == 0 {
            return Err(invalid("pool.workers", "must be greater than 0".to_owned()));
        }

        if self.metrics.enabled && self.metrics.listen_addr.parse::<IpAddr>().is_err() {
            return Err(invalid(
                "metrics.listen_addr",
                format!("'{}' is not an IP address", self.metrics.listen_addr),
            ));
        }

        Ok(())
    }
}

fn invalid(field: &str, reason: String) -> ScanlogError {
    ConfigError::InvalidValue {
        field: field.to_owned(),
        reason,
    }
    .into()
}

/// 일반 설정
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneralConfig {
    /// 로그 레벨 (trace, debug, info, warn, error)
    pub log_level: String,
    /// 로그 형식 (json, pretty)
    pub log_format: String,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_owned(),
            log_format: "pretty".to_owned(),
        }
    }
}

/// TCP 수신기 설정
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ListenerConfig {
    /// 바인드 IP (IPv4 와일드카드가 기본)
    pub bind_addr: String,
    /// 수신 포트
    pub port: u16,
    /// 한 번에 읽는 최대 바이트 수
    pub recv_buffer_size: usize,
    /// 개행 없이 버퍼에 쌓일 수 있는 최대 바이트 수 (0 = 무제한)
    pub max_line_bytes: usize,
    /// 최대 동시 연결 수 (0 = 무제한)
    pub max_connections: usize,
    /// 유휴 연결 타임아웃 (초, 0 = 비활성)
    pub idle_timeout_secs: u64,
}

impl ListenerConfig {
    /// `bind_addr:port` 형식의 주소 문자열을 반환합니다.
    pub fn socket_addr(&self) -> String {
        match self.bind_addr.parse::<IpAddr>() {
            Ok(IpAddr::V6(ip)) => format!("[{ip}]:{}", self.port),
            _ => format!("{}:{}", self.bind_addr, self.port),
        }
    }
}

impl Default for ListenerConfig {
    fn default() -> Self {
        Self {
            bind_addr: "0.0.0.0".to_owned(),
            port: 514,
            recv_buffer_size: 2048,
            max_line_bytes: 1024 * 1024, // 1MB
            max_connections: 0,
            idle_timeout_secs: 0,
        }
    }
}

/// 이벤트 저장소 설정
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// 이벤트 파일을 저장할 디렉토리
    pub log_dir: String,
    /// 이벤트 파일명 접두어
    pub file_prefix: String,
    /// 분류에 사용할 마커 문자열
    pub marker: String,
    /// 마커가 없는 이벤트를 저장하지 않을지 여부
    pub reject_unmatched: bool,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            log_dir: "incoming".to_owned(),
            file_prefix: "event_".to_owned(),
            marker: DEFAULT_MARKER.to_owned(),
            reject_unmatched: false,
        }
    }
}

/// 워커 풀 설정
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PoolConfig {
    /// 동시에 실행할 수 있는 저장 작업 수
    pub workers: usize,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self { workers: 8 }
    }
}

/// Prometheus 메트릭 설정
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MetricsConfig {
    /// 활성화 여부
    pub enabled: bool,
    /// 메트릭 HTTP 리스너 주소
    pub listen_addr: String,
    /// 메트릭 HTTP 리스너 포트
    pub port: u16,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            listen_addr: "127.0.0.1".to_owned(),
            port: 9514,
        }
    }
}

// --- 환경변수 오버라이드 헬퍼 ---

fn override_string(target: &mut String, env_key: &str) {
    if let Ok(val) = std::env::var(env_key) {
        *target = val;
    }
}

fn override_bool(target: &mut bool, env_key: &str) {
    override_parsed(target, env_key, "bool");
}

fn override_u16(target: &mut u16, env_key: &str) {
    override_parsed(target, env_key, "u16");
}

fn override_usize(target: &mut usize, env_key: &str) {
    override_parsed(target, env_key, "usize");
}

fn override_u64(target: &mut u64, env_key: &str) {
    override_parsed(target, env_key, "u64");
}

fn override_parsed<T: std::str::FromStr>(target: &mut T, env_key: &str, type_name: &str) {
    if let Ok(val) = std::env::var(env_key) {
        match val.parse::<T>() {
            Ok(parsed) => *target = parsed,
            Err(_) => warn!(
                env_key,
                value = val.as_str(),
                expected = type_name,
                "failed to parse env var, ignoring"
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    #[test]
    fn default_config_has_sane_values() {
        let config = ScanlogConfig::default();
        assert_eq!(config.general.log_level, "info");
        assert_eq!(config.listener.bind_addr, "0.0.0.0");
        assert_eq!(config.listener.port, 514);
        assert_eq!(config.listener.recv_buffer_size, 2048);
        assert_eq!(config.storage.log_dir, "incoming");
        assert_eq!(config.storage.marker, DEFAULT_MARKER);
        assert!(!config.storage.reject_unmatched);
        assert_eq!(config.pool.workers, 8);
        assert!(!config.metrics.enabled);
    }

    #[test]
    fn default_config_passes_validation() {
        ScanlogConfig::default().validate().unwrap();
    }

    #[test]
    fn parse_empty_toml_uses_defaults() {
        let config = ScanlogConfig::parse("").unwrap();
        assert_eq!(config.listener.port, 514);
        assert_eq!(config.pool.workers, 8);
    }

    #[test]
    fn parse_partial_toml_merges_with_defaults() {
        let toml = r#"
[listener]
port = 5514

[storage]
reject_unmatched = true
"#;
        let config = ScanlogConfig::parse(toml).unwrap();
        assert_eq!(config.listener.port, 5514);
        // bind_addr는 기본값 유지
        assert_eq!(config.listener.bind_addr, "0.0.0.0");
        assert!(config.storage.reject_unmatched);
        assert_eq!(config.storage.log_dir, "incoming");
    }

    #[test]
    fn parse_invalid_toml_returns_error() {
        let err = ScanlogConfig::parse("invalid = [[[toml").unwrap_err();
        assert!(matches!(
            err,
            ScanlogError::Config(ConfigError::ParseFailed { .. })
        ));
    }

    #[test]
    fn socket_addr_formats_ipv4_and_ipv6() {
        let mut listener = ListenerConfig::default();
        assert_eq!(listener.socket_addr(), "0.0.0.0:514");
        listener.bind_addr = "::1".to_owned();
        listener.port = 6000;
        assert_eq!(listener.socket_addr(), "[::1]:6000");
    }

    #[test]
    fn validate_rejects_invalid_log_level() {
        let mut config = ScanlogConfig::default();
        config.general.log_level = "verbose".to_owned();
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("log_level"));
    }

    #[test]
    fn validate_rejects_invalid_log_format() {
        let mut config = ScanlogConfig::default();
        config.general.log_format = "xml".to_owned();
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("log_format"));
    }

    #[test]
    fn validate_rejects_zero_workers() {
        let mut config = ScanlogConfig::default();
        config.pool.workers = 0;
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("pool.workers"));
    }

    #[test]
    fn validate_rejects_zero_recv_buffer() {
        let mut config = ScanlogConfig::default();
        config.listener.recv_buffer_size = 0;
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("recv_buffer_size"));
    }

    #[test]
    fn validate_rejects_hostname_bind_addr() {
        let mut config = ScanlogConfig::default();
        config.listener.bind_addr = "localhost".to_owned();
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("bind_addr"));
    }

    #[test]
    fn validate_rejects_empty_marker_and_log_dir() {
        let mut config = ScanlogConfig::default();
        config.storage.marker = String::new();
        assert!(config.validate().unwrap_err().to_string().contains("marker"));

        let mut config = ScanlogConfig::default();
        config.storage.log_dir = "  ".to_owned();
        assert!(config.validate().unwrap_err().to_string().contains("log_dir"));
    }

    #[test]
    fn validate_rejects_prefix_with_separator() {
        let mut config = ScanlogConfig::default();
        config.storage.file_prefix = "../escape_".to_owned();
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("file_prefix"));
    }

    #[test]
    fn validate_checks_metrics_addr_only_when_enabled() {
        let mut config = ScanlogConfig::default();
        config.metrics.listen_addr = "not-an-ip".to_owned();
        config.validate().unwrap();

        config.metrics.enabled = true;
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("metrics.listen_addr"));
    }

    #[test]
    #[serial]
    fn env_override_string() {
        let mut val = "original".to_owned();
        // SAFETY: serial_test로 환경변수를 만지는 테스트를 직렬화합니다.
        unsafe { std::env::set_var("TEST_SCANLOG_STR", "overridden") };
        override_string(&mut val, "TEST_SCANLOG_STR");
        assert_eq!(val, "overridden");
        unsafe { std::env::remove_var("TEST_SCANLOG_STR") };
    }

    #[test]
    #[serial]
    fn env_override_invalid_number_keeps_original() {
        let mut val: u16 = 514;
        // SAFETY: serial_test로 환경변수를 만지는 테스트를 직렬화합니다.
        unsafe { std::env::set_var("TEST_SCANLOG_PORT_BAD", "99999999") };
        override_u16(&mut val, "TEST_SCANLOG_PORT_BAD");
        assert_eq!(val, 514);
        unsafe { std::env::remove_var("TEST_SCANLOG_PORT_BAD") };
    }

    #[test]
    #[serial]
    fn env_overrides_apply_to_sections() {
        // SAFETY: serial_test로 환경변수를 만지는 테스트를 직렬화합니다.
        unsafe {
            std::env::set_var("SCANLOG_LISTENER_PORT", "6514");
            std::env::set_var("SCANLOG_POOL_WORKERS", "2");
            std::env::set_var("SCANLOG_STORAGE_REJECT_UNMATCHED", "true");
        }
        let config = ScanlogConfig::from_env();
        assert_eq!(config.listener.port, 6514);
        assert_eq!(config.pool.workers, 2);
        assert!(config.storage.reject_unmatched);
        unsafe {
            std::env::remove_var("SCANLOG_LISTENER_PORT");
            std::env::remove_var("SCANLOG_POOL_WORKERS");
            std::env::remove_var("SCANLOG_STORAGE_REJECT_UNMATCHED");
        }
    }

    #[test]
    #[serial]
    fn from_env_leaves_invalid_values_for_later_validation() {
        // SAFETY: serial_test로 환경변수를 만지는 테스트를 직렬화합니다.
        unsafe {
            std::env::set_var("SCANLOG_POOL_WORKERS", "0");
        }
        let mut config = ScanlogConfig::from_env();
        unsafe {
            std::env::remove_var("SCANLOG_POOL_WORKERS");
        }

        assert_eq!(config.pool.workers, 0);
        assert!(config.validate().is_err());
        config.pool.workers = 4;
        config.validate().unwrap();
    }

    #[test]
    fn env_override_missing_var_keeps_original() {
        let mut val = "original".to_owned();
        override_string(&mut val, "TEST_SCANLOG_NONEXISTENT_12345");
        assert_eq!(val, "original");
    }

    #[test]
    fn config_serialize_roundtrip() {
        let config = ScanlogConfig::default();
        let toml_str = toml::to_string_pretty(&config).unwrap();
        let parsed = ScanlogConfig::parse(&toml_str).unwrap();
        assert_eq!(config.listener.port, parsed.listener.port);
        assert_eq!(config.storage.marker, parsed.storage.marker);
        assert_eq!(config.pool.workers, parsed.pool.workers);
    }

    #[tokio::test]
    async fn from_file_not_found() {
        let err = ScanlogConfig::from_file("/nonexistent/path/scanlog.toml")
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            ScanlogError::Config(ConfigError::FileNotFound { .. })
        ));
    }
}
