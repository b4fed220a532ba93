//! 개행 기반 라인 프레이머
//!
//! [`LineFramer`]는 한 연결의 수신 버퍼를 소유하고, 임의 경계로 잘린 바이트 청크를
//! 완결된 라인 시퀀스로 바꿉니다. 소켓과 분리된 순수 타입이라 청크 경계와 무관하게
//! 같은 라인 시퀀스를 내놓는지 직접 검증할 수 있습니다.
//!
//! - 라인 구분자는 `\n`이며, 추출된 라인은 뒤쪽 공백(`\r` 포함)이 제거됩니다.
//! - UTF-8 디코딩은 청크가 아니라 라인 단위로 수행합니다. 따라서 청크 경계에 걸친
//!   멀티바이트 문자도 정상 처리됩니다.
//! - 빈 라인도 빈 문자열로 반환합니다.

use bytes::{Buf, BytesMut};

use crate::error::ConnectionError;

/// 한 연결의 수신 버퍼
#[derive(Debug)]
pub struct LineFramer {
    /// 아직 라인으로 추출되지 않은 바이트
    buf: BytesMut,
    /// `buf` 앞부분 중 개행이 없다고 확인된 바이트 수
    scanned: usize,
    /// `buf` 끝의 미완결 라인 길이 (마지막 개행 이후 바이트 수)
    tail_len: usize,
    /// 한 라인의 최대 바이트 수, 개행 제외 (0 = 무제한)
    max_line_bytes: usize,
    /// 지금까지 추출한 라인 수
    lines: u64,
}

impl LineFramer {
    /// 새 프레이머를 생성합니다. `max_line_bytes`가 0이면 라인 길이를 제한하지 않습니다.
    pub fn new(max_line_bytes: usize) -> Self {
        Self {
            buf: BytesMut::new(),
            scanned: 0,
            tail_len: 0,
            max_line_bytes,
            lines: 0,
        }
    }

    /// 수신한 청크를 버퍼 뒤에 붙입니다.
    ///
    /// 라인 길이 제한은 라인마다 적용됩니다. 청크 안에서 끝나는 라인이든, 아직 개행을
    /// 받지 못한 미완결 라인이든 `max_line_bytes`를 넘는 순간 그 라인부터 버퍼 끝까지를
    /// 버리고 [`ConnectionError::LineTooLong`]을 반환합니다. 따라서 청크를 어떻게
    /// 나누어 받아도 같은 라인에서 같은 결과가 납니다. 그 앞의 완결된 라인은 버퍼에 남아
    /// 이후 [`next_line`](Self::next_line)으로 꺼낼 수 있습니다.
    ///
    /// 새 청크만 검사하므로 비용은 청크 길이에 비례합니다.
    pub fn push(&mut self, chunk: &[u8]) -> Result<(), ConnectionError> {
        let base = self.buf.len();
        self.buf.extend_from_slice(chunk);

        let mut line_start = base - self.tail_len;
        for (i, _) in chunk.iter().enumerate().filter(|&(_, &b)| b == b'\n') {
            let end = base + i;
            if self.exceeds(end - line_start) {
                return Err(self.overflow(line_start));
            }
            line_start = end + 1;
        }

        self.tail_len = self.buf.len() - line_start;
        if self.exceeds(self.tail_len) {
            return Err(self.overflow(line_start));
        }
        Ok(())
    }

    fn exceeds(&self, len: usize) -> bool {
        self.max_line_bytes != 0 && len > self.max_line_bytes
    }

    /// `line_start`부터 버퍼 끝까지 버립니다.
    fn overflow(&mut self, line_start: usize) -> ConnectionError {
        self.buf.truncate(line_start);
        self.scanned = self.scanned.min(line_start);
        self.tail_len = 0;
        ConnectionError::LineTooLong {
            max: self.max_line_bytes,
        }
    }

    /// 버퍼에서 완결된 라인 하나를 꺼냅니다.
    ///
    /// 개행이 없으면 `None`을 반환합니다. UTF-8이 아닌 라인은 버퍼에서 제거된 뒤
    /// [`ConnectionError::Decode`]로 보고됩니다.
    pub fn next_line(&mut self) -> Option<Result<String, ConnectionError>> {
        let offset = self.buf[self.scanned..].iter().position(|&b| b == b'\n');
        let Some(offset) = offset else {
            self.scanned = self.buf.len();
            return None;
        };

        let end = self.scanned + offset;
        let line = self.buf.split_to(end);
        self.buf.advance(1);
        self.scanned = 0;
        self.lines += 1;

        Some(decode(&line, self.lines))
    }

    /// 연결 종료 시 남은 미완결 라인을 꺼냅니다.
    ///
    /// 뒤쪽 공백을 제거한 결과가 비어 있으면 `None`입니다. 호출 후 버퍼는 비어 있습니다.
    /// 완결된 라인이 남아 있다면 먼저 [`next_line`](Self::next_line)으로 모두 꺼내야 합니다.
    pub fn finish(&mut self) -> Option<Result<String, ConnectionError>> {
        let rest = self.buf.split();
        self.scanned = 0;
        self.tail_len = 0;

        match decode(&rest, self.lines + 1) {
            Ok(text) if text.is_empty() => None,
            Ok(text) => {
                self.lines += 1;
                Some(Ok(text))
            }
            Err(e) => Some(Err(e)),
        }
    }

    /// 아직 라인으로 추출되지 않은 바이트 수
    pub fn pending_bytes(&self) -> usize {
        self.buf.len()
    }

    /// 지금까지 추출한 라인 수
    pub fn lines(&self) -> u64 {
        self.lines
    }
}

/// 라인을 UTF-8로 디코딩하고 뒤쪽 공백을 제거합니다.
fn decode(raw: &[u8], line: u64) -> Result<String, ConnectionError> {
    std::str::from_utf8(raw)
        .map(|text| text.trim_end().to_owned())
        .map_err(|source| ConnectionError::Decode { line, source })
}

impl Default for LineFramer {
    fn default() -> Self {
        Self::new(0)
    }
}
