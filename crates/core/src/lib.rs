//! scanlog 공통 크레이트
//!
//! 수집기(`scanlog-collector`)와 데몬(`scanlog-daemon`)이 함께 쓰는
//! 설정, 최상위 에러, 메트릭 이름을 정의합니다.

pub mod config;
pub mod error;
pub mod metrics;

// --- 주요 타입 re-export ---

// 에러
pub use error::{ConfigError, ScanlogError};

// 설정
pub use config::{
    GeneralConfig, ListenerConfig, MetricsConfig, PoolConfig, ScanlogConfig, StorageConfig,
};
