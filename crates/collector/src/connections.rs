//! 활성 연결 태스크 집합
//!
//! [`ConnectionSet`]은 수락기가 생성한 연결 태스크를 추적합니다. 셧다운 시
//! [`cancel_and_settle`](ConnectionSet::cancel_and_settle)은 모든 연결을 취소하고
//! 각 태스크가 정리 경로를 마칠 때까지 기다린 뒤 결과를 요약합니다.

use std::future::Future;
use std::sync::{Arc, Mutex, PoisonError};

use tokio::task::{JoinError, JoinSet};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::connection::{ConnectionEnd, ConnectionReport};

/// 연결 태스크를 생성하지 못한 사유
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum SpawnRejected {
    /// 셧다운이 시작되어 더 이상 연결을 받지 않음
    #[error("connection set is closed")]
    Closed,
    /// 최대 동시 연결 수에 도달
    #[error("connection limit {0} reached")]
    Limit(usize),
}

/// 셧다운 시 정리된 연결 태스크 결과 요약
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SettleSummary {
    /// 스트림 끝 또는 유휴 타임아웃으로 끝난 연결
    pub completed: usize,
    /// 취소로 끝난 연결
    pub cancelled: usize,
    /// 연결 에러로 끝난 연결
    pub failed: usize,
    /// 패닉한 태스크
    pub panicked: usize,
}

impl SettleSummary {
    /// 태스크 결과 하나를 반영합니다.
    pub fn record(&mut self, joined: Result<ConnectionReport, JoinError>) {
        match joined {
            Ok(report) => match report.end {
                Ok(ConnectionEnd::Cancelled) => self.cancelled += 1,
                Ok(_) => self.completed += 1,
                Err(_) => self.failed += 1,
            },
            Err(e) if e.is_panic() => {
                warn!(error = %e, "connection task panicked");
                self.panicked += 1;
            }
            // 런타임 종료로 중단된 태스크
            Err(_) => self.cancelled += 1,
        }
    }

    /// 정리된 태스크 총수
    pub fn total(&self) -> usize {
        self.completed + self.cancelled + self.failed + self.panicked
    }
}

#[derive(Default)]
struct SetState {
    tasks: JoinSet<ConnectionReport>,
    closed: bool,
}

/// 활성 연결 태스크 집합
///
/// 복제본은 같은 태스크 집합과 취소 토큰을 공유합니다.
#[derive(Clone)]
pub struct ConnectionSet {
    state: Arc<Mutex<SetState>>,
    cancel: CancellationToken,
    limit: usize,
}

impl ConnectionSet {
    /// 새 집합을 생성합니다. `limit`이 0이면 동시 연결 수를 제한하지 않습니다.
    pub fn new(limit: usize) -> Self {
        Self {
            state: Arc::new(Mutex::new(SetState::default())),
            cancel: CancellationToken::new(),
            limit,
        }
    }

    /// 새 연결 태스크에 넘길 취소 토큰
    pub fn child_token(&self) -> CancellationToken {
        self.cancel.child_token()
    }

    /// 연결 태스크를 생성합니다. 끝난 태스크는 먼저 회수합니다.
    pub fn try_spawn<F>(&self, task: F) -> Result<(), SpawnRejected>
    where
        F: Future<Output = ConnectionReport> + Send + 'static,
    {
        let mut state = self.lock();
        if state.closed {
            return Err(SpawnRejected::Closed);
        }

        reap(&mut state.tasks);
        if self.limit > 0 && state.tasks.len() >= self.limit {
            return Err(SpawnRejected::Limit(self.limit));
        }

        state.tasks.spawn(task);
        Ok(())
    }

    /// 아직 끝나지 않은 연결 태스크 수
    pub fn active(&self) -> usize {
        let mut state = self.lock();
        reap(&mut state.tasks);
        state.tasks.len()
    }

    /// 최대 동시 연결 수 (0 = 무제한)
    pub fn limit(&self) -> usize {
        self.limit
    }

    /// 새 연결을 막고 모든 연결을 취소한 뒤, 모든 태스크가 끝날 때까지 기다립니다.
    ///
    /// 개별 연결의 결과는 전파하지 않고 요약에만 반영합니다. 두 번째 호출부터는
    /// 빈 요약을 반환합니다.
    pub async fn cancel_and_settle(&self) -> SettleSummary {
        let mut tasks = {
            let mut state = self.lock();
            state.closed = true;
            std::mem::take(&mut state.tasks)
        };
        self.cancel.cancel();

        let mut summary = SettleSummary::default();
        while let Some(joined) = tasks.join_next().await {
            summary.record(joined);
        }

        debug!(?summary, "connection tasks settled");
        summary
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, SetState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl std::fmt::Debug for ConnectionSet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionSet")
            .field("limit", &self.limit)
            .field("cancelled", &self.cancel.is_cancelled())
            .finish()
    }
}

/// 이미 끝난 태스크를 집합에서 제거합니다.
fn reap(tasks: &mut JoinSet<ConnectionReport>) {
    while let Some(joined) = tasks.try_join_next() {
        match joined {
            Err(e) if e.is_panic() => warn!(error = %e, "connection task panicked"),
            _ => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ConnectionError;
    use std::net::SocketAddr;
    use std::time::Duration;
    use uuid::Uuid;

    fn report(end: Result<ConnectionEnd, ConnectionError>) -> ConnectionReport {
        let peer: SocketAddr = "127.0.0.1:40000".parse().unwrap();
        ConnectionReport {
            peer,
            connection_id: Uuid::new_v4(),
            events: 0,
            end,
        }
    }

    /// 취소될 때까지 기다리는 연결 태스크 흉내
    fn waiting_task(token: CancellationToken) -> impl Future<Output = ConnectionReport> {
        async move {
            token.cancelled().await;
            report(Ok(ConnectionEnd::Cancelled))
        }
    }

    async fn panicking_task(token: CancellationToken) -> ConnectionReport {
        token.cancelled().await;
        panic!("boom");
    }

    #[tokio::test]
    async fn limit_rejects_extra_connections() {
        let set = ConnectionSet::new(2);
        set.try_spawn(waiting_task(set.child_token())).unwrap();
        set.try_spawn(waiting_task(set.child_token())).unwrap();

        let err = set.try_spawn(waiting_task(set.child_token())).unwrap_err();
        assert_eq!(err, SpawnRejected::Limit(2));
        assert_eq!(set.active(), 2);

        set.cancel_and_settle().await;
    }

    #[tokio::test]
    async fn finished_tasks_are_reaped() {
        let set = ConnectionSet::new(1);
        set.try_spawn(async { report(Ok(ConnectionEnd::Eof)) }).unwrap();

        // 태스크가 끝날 시간을 줍니다
        for _ in 0..100 {
            if set.active() == 0 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        assert_eq!(set.active(), 0);
        assert!(set.try_spawn(async { report(Ok(ConnectionEnd::Eof)) }).is_ok());
    }

    #[tokio::test]
    async fn settle_cancels_and_waits_for_all() {
        let set = ConnectionSet::new(0);
        for _ in 0..5 {
            set.try_spawn(waiting_task(set.child_token())).unwrap();
        }

        let summary = set.cancel_and_settle().await;
        assert_eq!(summary.cancelled, 5);
        assert_eq!(summary.total(), 5);
        assert_eq!(set.active(), 0);
    }

    #[tokio::test]
    async fn closed_set_refuses_new_connections() {
        let set = ConnectionSet::new(0);
        set.cancel_and_settle().await;

        let err = set.try_spawn(async { report(Ok(ConnectionEnd::Eof)) }).unwrap_err();
        assert_eq!(err, SpawnRejected::Closed);
        assert_eq!(set.cancel_and_settle().await, SettleSummary::default());
    }

    #[tokio::test]
    async fn summary_classifies_outcomes() {
        let set = ConnectionSet::new(0);
        let token = set.child_token();
        set.try_spawn(async move {
            token.cancelled().await;
            report(Ok(ConnectionEnd::Eof))
        })
        .unwrap();
        let token = set.child_token();
        set.try_spawn(async move {
            token.cancelled().await;
            report(Err(ConnectionError::LineTooLong { max: 1 }))
        })
        .unwrap();
        set.try_spawn(panicking_task(set.child_token())).unwrap();

        let summary = set.cancel_and_settle().await;
        assert_eq!(
            summary,
            SettleSummary {
                completed: 1,
                cancelled: 0,
                failed: 1,
                panicked: 1,
            }
        );
    }
}
