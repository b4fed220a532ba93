//! 메트릭 상수 및 설명 등록
//!
//! 모든 Prometheus 메트릭의 이름과 설명을 중앙에서 정의합니다.
//! 수집기는 이 상수로 `metrics::counter!()`, `metrics::gauge!()`,
//! `metrics::histogram!()` 매크로를 호출합니다.
//!
//! # 네이밍 컨벤션
//!
//! - 접두어: `scanlog_`
//! - 영역: `listener_`, `events_`, `pool_`, `daemon_`
//! - 접미어: `_total` (counter), `_seconds` (histogram), 없음 (gauge)
//!
//! 레코더가 설치되지 않은 상태에서는 모든 매크로 호출이 no-op입니다.

// ─── 레이블 키 상수 ────────────────────────────────────────────────

/// 결과 레이블 키 (stored, rejected, empty, failed)
pub const LABEL_OUTCOME: &str = "outcome";

/// 연결 종료 사유 레이블 키 (eof, cancelled, idle_timeout, error)
pub const LABEL_END: &str = "end";

// ─── Listener 메트릭 ───────────────────────────────────────────────

/// Listener: 수락된 연결 수 (counter)
pub const LISTENER_CONNECTIONS_ACCEPTED_TOTAL: &str =
    "scanlog_listener_connections_accepted_total";

/// Listener: 연결 한도 초과로 거부된 연결 수 (counter)
pub const LISTENER_CONNECTIONS_REJECTED_TOTAL: &str =
    "scanlog_listener_connections_rejected_total";

/// Listener: 현재 활성 연결 수 (gauge)
pub const LISTENER_CONNECTIONS_ACTIVE: &str = "scanlog_listener_connections_active";

/// Listener: 종료된 연결 수 (counter, label: end)
pub const LISTENER_CONNECTIONS_CLOSED_TOTAL: &str = "scanlog_listener_connections_closed_total";

// ─── Event 메트릭 ──────────────────────────────────────────────────

/// Events: 프레이머가 추출한 이벤트 수 (counter)
pub const EVENTS_RECEIVED_TOTAL: &str = "scanlog_events_received_total";

/// Events: 저장 결과별 이벤트 수 (counter, label: outcome)
pub const EVENTS_PERSISTED_TOTAL: &str = "scanlog_events_persisted_total";

/// Events: 마커가 포함된 저장 이벤트 수 (counter)
pub const EVENTS_MARKER_MATCHED_TOTAL: &str = "scanlog_events_marker_matched_total";

/// Events: UTF-8 디코딩 실패 수 (counter)
pub const EVENTS_DECODE_ERRORS_TOTAL: &str = "scanlog_events_decode_errors_total";

// ─── Worker Pool 메트릭 ────────────────────────────────────────────

/// Pool: 현재 실행 중인 저장 작업 수 (gauge)
pub const POOL_JOBS_IN_FLIGHT: &str = "scanlog_pool_jobs_in_flight";

/// Pool: 저장 작업 소요 시간 (histogram, 초)
pub const POOL_JOB_DURATION_SECONDS: &str = "scanlog_pool_job_duration_seconds";

// ─── Daemon 메트릭 ─────────────────────────────────────────────────

/// Daemon: 빌드 정보 (gauge, 항상 1, label: version)
pub const DAEMON_BUILD_INFO: &str = "scanlog_daemon_build_info";

/// Daemon: 종료 소요 시간 (gauge, 초)
pub const DAEMON_SHUTDOWN_DURATION_SECONDS: &str = "scanlog_daemon_shutdown_duration_seconds";

// ─── 히스토그램 버킷 정의 ────────────────────────────────────────────

/// 저장 작업 지연 시간 히스토그램 버킷 (초)
///
/// 50us ~ 1s 범위, 단일 파일 쓰기 분포
pub const JOB_DURATION_BUCKETS: [f64; 9] = [
    0.00005, 0.0001, 0.0005, 0.001, 0.005, 0.01, 0.05, 0.1, 1.0,
];

// ─── 설명 등록 함수 ─────────────────────────────────────────────────

/// 모든 메트릭의 설명(description)을 등록합니다.
///
/// 전역 레코더 설치 후 한 번만 호출해야 합니다.
pub fn describe_all() {
    use metrics::{describe_counter, describe_gauge, describe_histogram};

    // Listener
    describe_counter!(
        LISTENER_CONNECTIONS_ACCEPTED_TOTAL,
        "Total number of TCP connections accepted"
    );
    describe_counter!(
        LISTENER_CONNECTIONS_REJECTED_TOTAL,
        "Total number of TCP connections closed because max_connections was reached"
    );
    describe_gauge!(
        LISTENER_CONNECTIONS_ACTIVE,
        "Number of connections currently being framed"
    );
    describe_counter!(
        LISTENER_CONNECTIONS_CLOSED_TOTAL,
        "Total number of connections closed, by end reason"
    );

    // Events
    describe_counter!(
        EVENTS_RECEIVED_TOTAL,
        "Total number of events extracted from connection streams"
    );
    describe_counter!(
        EVENTS_PERSISTED_TOTAL,
        "Total number of persistence calls, by outcome"
    );
    describe_counter!(
        EVENTS_MARKER_MATCHED_TOTAL,
        "Total number of stored events containing the marker"
    );
    describe_counter!(
        EVENTS_DECODE_ERRORS_TOTAL,
        "Total number of lines rejected as invalid UTF-8"
    );

    // Pool
    describe_gauge!(
        POOL_JOBS_IN_FLIGHT,
        "Number of persistence jobs currently running on worker threads"
    );
    describe_histogram!(
        POOL_JOB_DURATION_SECONDS,
        "Time spent executing a single persistence job in seconds"
    );

    // Daemon
    describe_gauge!(DAEMON_BUILD_INFO, "Build information, always 1");
    describe_gauge!(
        DAEMON_SHUTDOWN_DURATION_SECONDS,
        "Time taken by the last graceful shutdown in seconds"
    );
}
