//! TCP 수락기
//!
//! [`Acceptor`]는 `SO_REUSEADDR`로 바인드한 소켓에서 연결을 계속 수락하고, 연결마다
//! [`handle_connection`] 태스크를 [`ConnectionSet`]에 생성한 뒤 곧바로 다음 수락으로
//! 돌아갑니다. 취소되거나 치명적인 수락 에러가 나면 소켓을 닫고 종료합니다.

use std::io::ErrorKind;
use std::net::SocketAddr;

use scanlog_core::config::ListenerConfig;
use scanlog_core::metrics as m;
use tokio::net::{TcpListener, TcpSocket, TcpStream};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::connection::{ConnectionOptions, handle_connection};
use crate::connections::{ConnectionSet, SpawnRejected};
use crate::error::CollectorError;
use crate::pool::WorkerPool;

/// listen 백로그 (`TcpListener::bind`의 기본값과 동일)
const LISTEN_BACKLOG: u32 = 1024;

/// TCP 연결 수락기
pub struct Acceptor {
    listener: TcpListener,
    local_addr: SocketAddr,
    pool: WorkerPool,
    connections: ConnectionSet,
    options: ConnectionOptions,
    cancel: CancellationToken,
}

impl Acceptor {
    /// 설정된 주소에 바인드합니다.
    ///
    /// 포트 0으로 바인드하면 실제 포트는 [`local_addr`](Self::local_addr)로 확인합니다.
    pub async fn bind(
        config: &ListenerConfig,
        pool: WorkerPool,
        connections: ConnectionSet,
        cancel: CancellationToken,
    ) -> Result<Self, CollectorError> {
        let addr_text = config.socket_addr();
        let addr: SocketAddr = addr_text.parse().map_err(|e| CollectorError::Config {
            field: "listener.bind_addr".to_owned(),
            reason: format!("'{addr_text}': {e}"),
        })?;

        let listener = bind_reuse(addr).map_err(|source| CollectorError::Bind {
            addr: addr_text.clone(),
            source,
        })?;
        let local_addr = listener.local_addr().map_err(|source| CollectorError::Bind {
            addr: addr_text,
            source,
        })?;

        info!(%local_addr, "listening for scan events");

        Ok(Self {
            listener,
            local_addr,
            pool,
            connections,
            options: ConnectionOptions::from_config(config),
            cancel,
        })
    }

    /// 실제 바인드된 주소
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// 취소되거나 치명적인 수락 에러가 날 때까지 연결을 수락합니다.
    ///
    /// 반환 시 리스너 소켓은 닫혀 있습니다. 이미 생성된 연결 태스크는 계속 실행되며,
    /// 정리는 [`ConnectionSet::cancel_and_settle`]이 담당합니다.
    pub async fn run(self) -> Result<(), CollectorError> {
        let result = loop {
            tokio::select! {
                biased;
                () = self.cancel.cancelled() => {
                    debug!("acceptor cancelled");
                    break Ok(());
                }
                accepted = self.listener.accept() => match accepted {
                    Ok((stream, peer)) => self.spawn_connection(stream, peer),
                    Err(e) if is_transient(&e) => {
                        warn!(error = %e, "connection failed during accept");
                    }
                    Err(e) => {
                        error!(error = %e, "accept failed, stopping listener");
                        break Err(CollectorError::Accept(e));
                    }
                },
            }
        };

        drop(self.listener);
        info!(local_addr = %self.local_addr, "listener socket closed");
        result
    }

    fn spawn_connection(&self, stream: TcpStream, peer: SocketAddr) {
        let task = handle_connection(
            stream,
            peer,
            self.pool.clone(),
            self.options.clone(),
            self.connections.child_token(),
        );

        match self.connections.try_spawn(task) {
            Ok(()) => {
                metrics::counter!(m::LISTENER_CONNECTIONS_ACCEPTED_TOTAL).increment(1);
                debug!(%peer, "accepted connection");
            }
            Err(SpawnRejected::Limit(limit)) => {
                metrics::counter!(m::LISTENER_CONNECTIONS_REJECTED_TOTAL).increment(1);
                warn!(%peer, limit, "max connections reached, closing connection");
            }
            Err(SpawnRejected::Closed) => {
                debug!(%peer, "shutting down, closing connection");
            }
        }
    }
}

impl std::fmt::Debug for Acceptor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Acceptor")
            .field("local_addr", &self.local_addr)
            .field("options", &self.options)
            .finish()
    }
}

fn bind_reuse(addr: SocketAddr) -> std::io::Result<TcpListener> {
    let socket = if addr.is_ipv4() {
        TcpSocket::new_v4()?
    } else {
        TcpSocket::new_v6()?
    };
    socket.set_reuseaddr(true)?;
    socket.bind(addr)?;
    socket.listen(LISTEN_BACKLOG)
}

/// 개별 연결에만 해당하는 수락 에러인지 확인합니다.
fn is_transient(err: &std::io::Error) -> bool {
    matches!(
        err.kind(),
        ErrorKind::ConnectionAborted | ErrorKind::ConnectionReset | ErrorKind::Interrupted
    )
}
