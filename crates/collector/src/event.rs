//! 연결에서 추출된 이벤트

use std::net::SocketAddr;
use std::time::SystemTime;

use uuid::Uuid;

/// 개행으로 구분된 (또는 스트림 끝의) 한 단위의 텍스트
///
/// 프레이머가 생성하고 워커 풀로 소유권이 넘어갑니다. 생성 후에는 변경되지 않습니다.
#[derive(Debug, Clone)]
pub struct Event {
    /// 뒤쪽 공백이 제거된 이벤트 본문 (빈 문자열 가능)
    pub content: String,
    /// 송신 측 주소
    pub peer: SocketAddr,
    /// 연결 식별자 (연결 수락 시 생성)
    pub connection_id: Uuid,
    /// 연결 내 순번 (0부터)
    pub sequence: u64,
    /// 추출 시각
    pub received_at: SystemTime,
}

impl Event {
    /// 새 이벤트를 생성합니다.
    pub fn new(
        content: impl Into<String>,
        peer: SocketAddr,
        connection_id: Uuid,
        sequence: u64,
    ) -> Self {
        Self {
            content: content.into(),
            peer,
            connection_id,
            sequence,
            received_at: SystemTime::now(),
        }
    }

    /// 본문이 비어 있는지 확인합니다.
    pub fn is_empty(&self) -> bool {
        self.content.is_empty()
    }
}
