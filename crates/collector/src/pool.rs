//! 저장 작업 워커 풀
//!
//! [`WorkerPool`]은 블로킹 [`EventSink::persist`] 호출을 tokio 블로킹 스레드 풀에서
//! 실행합니다. 동시에 실행되는 저장 호출 수는 `workers` 개의 세마포어 퍼밋으로
//! 제한되며, 초과 제출은 버려지지 않고 퍼밋을 기다립니다.
//!
//! # 종료
//! [`drain`](WorkerPool::drain)은 새 제출을 막고, 대기 중이거나 실행 중인 모든 작업이
//! 끝날 때까지 기다립니다. 여러 번 호출해도 안전합니다.

use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex, PoisonError};
use std::task::{Context, Poll};
use std::time::Instant;

use scanlog_core::metrics as m;
use tokio::sync::Semaphore;
use tokio::task::{JoinError, JoinHandle};
use tokio_util::task::TaskTracker;
use tracing::{debug, info};

use crate::error::CollectorError;
use crate::event::Event;
use crate::sink::{EventSink, PersistOutcome};

/// 고정 슬롯 수를 가진 저장 작업 실행기
///
/// 복제 비용이 낮으며, 모든 복제본이 같은 슬롯과 작업 목록을 공유합니다.
#[derive(Clone)]
pub struct WorkerPool {
    inner: Arc<PoolInner>,
}

struct PoolInner {
    sink: Arc<dyn EventSink>,
    slots: Arc<Semaphore>,
    workers: usize,
    tracker: TaskTracker,
    /// drain 시작 여부. 제출과 drain 시작이 서로 엇갈리지 않도록 잠금 아래에서 읽고 씁니다.
    closed: Mutex<bool>,
}

impl WorkerPool {
    /// `workers`개의 동시 실행 슬롯을 가진 풀을 생성합니다.
    ///
    /// `workers`가 0이면 작업이 영원히 실행되지 않으므로 에러를 반환합니다.
    pub fn new(sink: Arc<dyn EventSink>, workers: usize) -> Result<Self, CollectorError> {
        if workers == 0 {
            return Err(CollectorError::Config {
                field: "pool.workers".to_owned(),
                reason: "must be greater than 0".to_owned(),
            });
        }

        Ok(Self {
            inner: Arc::new(PoolInner {
                sink,
                slots: Arc::new(Semaphore::new(workers)),
                workers,
                tracker: TaskTracker::new(),
                closed: Mutex::new(false),
            }),
        })
    }

    /// 이벤트 저장 작업을 제출합니다.
    ///
    /// 반환된 [`WorkHandle`]은 저장 호출이 끝나거나 실패하면 완료됩니다.
    /// 핸들을 버려도 작업은 취소되지 않으며 [`drain`](Self::drain)이 기다립니다.
    ///
    /// # Errors
    /// drain이 시작된 뒤라면 [`CollectorError::PoolClosed`]를 반환합니다.
    pub fn submit(&self, event: Event) -> Result<WorkHandle, CollectorError> {
        let closed = self
            .inner
            .closed
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if *closed {
            return Err(CollectorError::PoolClosed);
        }

        let sink = Arc::clone(&self.inner.sink);
        let slots = Arc::clone(&self.inner.slots);
        let task = self.inner.tracker.spawn(run_job(sink, slots, event));
        drop(closed);

        Ok(WorkHandle { task })
    }

    /// 새 제출을 막고 대기 중/실행 중인 모든 작업이 끝날 때까지 기다립니다.
    ///
    /// 이 호출이 처음으로 drain을 시작했다면 `true`를 반환합니다.
    /// 이후 호출도 작업이 모두 끝날 때까지 기다린 뒤 `false`를 반환합니다.
    pub async fn drain(&self) -> bool {
        let first = {
            let mut closed = self
                .inner
                .closed
                .lock()
                .unwrap_or_else(PoisonError::into_inner);
            let first = !*closed;
            *closed = true;
            self.inner.tracker.close();
            first
        };

        if first {
            info!(
                pending = self.inner.tracker.len(),
                "draining worker pool"
            );
        }
        self.inner.tracker.wait().await;
        if first {
            info!("worker pool drained");
        }
        first
    }

    /// 동시 실행 슬롯 수
    pub fn workers(&self) -> usize {
        self.inner.workers
    }

    /// drain이 시작되었는지 여부
    pub fn is_closed(&self) -> bool {
        *self
            .inner
            .closed
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// 아직 끝나지 않은 (대기 + 실행 중) 작업 수
    pub fn pending(&self) -> usize {
        self.inner.tracker.len()
    }
}

impl std::fmt::Debug for WorkerPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkerPool")
            .field("workers", &self.inner.workers)
            .field("available", &self.inner.slots.available_permits())
            .field("pending", &self.inner.tracker.len())
            .finish()
    }
}

/// 슬롯을 얻은 뒤 블로킹 스레드에서 저장 호출을 실행합니다.
async fn run_job(
    sink: Arc<dyn EventSink>,
    slots: Arc<Semaphore>,
    event: Event,
) -> Result<PersistOutcome, CollectorError> {
    let _permit = slots
        .acquire_owned()
        .await
        .map_err(|_| CollectorError::PoolClosed)?;

    metrics::gauge!(m::POOL_JOBS_IN_FLIGHT).increment(1.0);
    let started = Instant::now();
    let connection_id = event.connection_id;
    let sequence = event.sequence;

    let result = tokio::task::spawn_blocking(move || sink.persist(&event.content))
        .await
        .unwrap_or_else(|e| Err(worker_failure(e)));

    metrics::histogram!(m::POOL_JOB_DURATION_SECONDS).record(started.elapsed().as_secs_f64());
    metrics::gauge!(m::POOL_JOBS_IN_FLIGHT).decrement(1.0);

    match &result {
        Ok(outcome) => {
            metrics::counter!(m::EVENTS_PERSISTED_TOTAL, m::LABEL_OUTCOME => outcome.label())
                .increment(1);
            if outcome.marker_matched() {
                metrics::counter!(m::EVENTS_MARKER_MATCHED_TOTAL).increment(1);
            }
        }
        Err(_) => {
            metrics::counter!(m::EVENTS_PERSISTED_TOTAL, m::LABEL_OUTCOME => "failed")
                .increment(1);
        }
    }
    debug!(%connection_id, sequence, ok = result.is_ok(), "persist job finished");

    result
}

fn worker_failure(err: JoinError) -> CollectorError {
    if err.is_panic() {
        let payload = err.into_panic();
        let msg = payload
            .downcast_ref::<&str>()
            .map(|s| (*s).to_owned())
            .or_else(|| payload.downcast_ref::<String>().cloned())
            .unwrap_or_else(|| "unknown panic payload".to_owned());
        CollectorError::Worker(format!("persist call panicked: {msg}"))
    } else {
        CollectorError::Worker("persist call was cancelled".to_owned())
    }
}

/// 제출된 저장 작업의 완료를 기다리는 핸들
///
/// `.await`하면 저장 결과를 반환합니다.
#[derive(Debug)]
pub struct WorkHandle {
    task: JoinHandle<Result<PersistOutcome, CollectorError>>,
}

impl Future for WorkHandle {
    type Output = Result<PersistOutcome, CollectorError>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        Pin::new(&mut self.task)
            .poll(cx)
            .map(|joined| joined.unwrap_or_else(|e| Err(worker_failure(e))))
    }
}
