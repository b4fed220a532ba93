#![no_main]

use arbitrary::Arbitrary;
use libfuzzer_sys::fuzz_target;

use scanlog_collector::LineFramer;

/// 퍼저용 구조적 입력
#[derive(Arbitrary, Debug)]
struct FuzzInput {
    /// 수신 스트림 바이트
    stream: Vec<u8>,
    /// 청크 경계 (스트림 길이로 나눈 나머지를 사용)
    cuts: Vec<u16>,
    /// 최대 라인 크기 (0 = 무제한)
    max_line_bytes: u8,
}

/// 라인과 잔여분을 모두 꺼냅니다. 디코딩 실패는 `None`으로, 한도 초과는 `true`로 기록합니다.
fn frame(chunks: &[&[u8]], max_line_bytes: usize) -> (Vec<Option<String>>, bool) {
    let mut framer = LineFramer::new(max_line_bytes);
    let mut out = Vec::new();
    for chunk in chunks {
        let pushed = framer.push(chunk);
        while let Some(line) = framer.next_line() {
            out.push(line.ok());
        }
        if pushed.is_err() {
            assert!(framer.finish().is_none());
            return (out, true);
        }
    }
    if let Some(rest) = framer.finish() {
        out.push(rest.ok());
    }
    assert_eq!(framer.pending_bytes(), 0);
    (out, false)
}

fuzz_target!(|input: FuzzInput| {
    let bytes = input.stream.as_slice();
    let max = usize::from(input.max_line_bytes);

    let mut points: Vec<usize> = input
        .cuts
        .iter()
        .map(|c| usize::from(*c) % (bytes.len() + 1))
        .collect();
    points.sort_unstable();
    points.dedup();

    let mut chunks: Vec<&[u8]> = Vec::new();
    let mut start = 0;
    for p in points {
        chunks.push(&bytes[start..p]);
        start = p;
    }
    chunks.push(&bytes[start..]);

    // 청크 경계는 제한 유무와 상관없이 프레이밍 결과를 바꾸지 않아야 합니다
    assert_eq!(frame(&[bytes], 0), frame(&chunks, 0));
    assert_eq!(frame(&[bytes], max), frame(&chunks, max));
});
