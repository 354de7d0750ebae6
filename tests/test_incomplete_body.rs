//! 接続切断時のパーサー状態のテスト
//!
//! 応答の途中で接続が閉じられたとき、`finish()` 後の状態で
//! 「正常終了」か「不完全な転送」かを判定できることを確認する。
//!
//! 呼び出し側は以下の手順で判定する:
//! 1. 受信したバイト列をすべて `feed()` し、`None` が返るまでイベントを取り出す
//! 2. 接続終了を `finish()` で通知する
//! 3. 状態が `Complete` でなければ不完全な転送として扱う

use http1_engine::{ParseEvent, ParserLimits, ParserState, ResponseParser, Version};

/// 全データを feed し、接続終了を通知した後のイベントと状態を返す
fn feed_then_close(method: &str, input: &[u8]) -> (Vec<ParseEvent>, ParserState) {
    let mut parser = ResponseParser::for_request_method(method, ParserLimits::default());
    let mut events = Vec::new();
    let mut input = input;
    while let Some(event) = parser.feed(input).unwrap() {
        input = b"";
        events.push(event);
    }
    parser.finish();
    while let Some(event) = parser.feed(b"").unwrap() {
        events.push(event);
    }
    (events, parser.state())
}

fn body_of(events: &[ParseEvent]) -> Vec<u8> {
    let mut body = Vec::new();
    for event in events {
        if let ParseEvent::BodyChunk(data) = event {
            body.extend_from_slice(data);
        }
    }
    body
}

fn status_of(events: &[ParseEvent]) -> (Version, u16) {
    match &events[0] {
        ParseEvent::HeadersReady { head, .. } => (head.version, head.status_code),
        other => panic!("unexpected first event: {other:?}"),
    }
}

/// ステータス行だけで閉じた HTTP/1.0 応答は空ボディで完了する
#[test]
fn test_http10_empty_body_until_close() {
    let (events, state) = feed_then_close("GET", b"HTTP/1.0 200 OK\r\n\r\n");
    assert_eq!(state, ParserState::Complete);
    assert_eq!(status_of(&events), (Version::Http10, 200));
    assert!(body_of(&events).is_empty());
    assert!(matches!(
        events.last(),
        Some(ParseEvent::MessageComplete { .. })
    ));
}

/// Content-Length より 1 バイト短いまま閉じられた
#[test]
fn test_content_length_short_by_one() {
    let (events, state) =
        feed_then_close("GET", b"HTTP/1.0 200 OK\r\nContent-Length: 2\r\n\r\n.");
    assert_eq!(state, ParserState::BodyIdentity);
    assert_eq!(state.name(), "awaiting-body-identity");
    assert_eq!(body_of(&events), b".");
    assert!(
        !events
            .iter()
            .any(|e| matches!(e, ParseEvent::MessageComplete { .. }))
    );
}

/// 終端チャンクの LF が届く前に閉じられた
#[test]
fn test_chunked_missing_final_lf() {
    let (_, state) = feed_then_close(
        "GET",
        b"HTTP/1.0 200 OK\r\nTransfer-Encoding: chunked\r\n\r\n0\r",
    );
    assert_eq!(state, ParserState::BodyChunkedTrailer);
    assert_eq!(state.name(), "chunked-trailer");
}

/// 終端チャンクの後、トレーラー終端の空行が届く前に閉じられた
#[test]
fn test_chunked_missing_trailer_terminator() {
    let (events, state) = feed_then_close(
        "GET",
        b"HTTP/1.1 200 OK\r\nTransfer-Encoding: chunked\r\n\r\n3\r\nabc\r\n0\r\n",
    );
    assert_eq!(state, ParserState::BodyChunkedTrailer);
    assert_eq!(body_of(&events), b"abc");
}

/// チャンクデータの途中で閉じられた
#[test]
fn test_chunked_truncated_data() {
    let (events, state) = feed_then_close(
        "GET",
        b"HTTP/1.1 200 OK\r\nTransfer-Encoding: chunked\r\n\r\n5\r\nab",
    );
    assert_eq!(state, ParserState::BodyChunked);
    assert_eq!(body_of(&events), b"ab");
}

/// フレーミングヘッダーが無い応答は接続終了までをボディとして受け入れる
#[test]
fn test_unframed_body_accepted_at_close() {
    let (events, state) = feed_then_close("GET", b"HTTP/1.1 200 OK\r\n\r\n00000000000");
    assert_eq!(state, ParserState::Complete);
    assert_eq!(body_of(&events), b"00000000000");
}

/// ヘッダーの途中で閉じられた
#[test]
fn test_closed_during_headers() {
    let (events, state) = feed_then_close("GET", b"HTTP/1.1 200 OK\r\nContent-Le");
    assert!(events.is_empty());
    assert_eq!(state, ParserState::AwaitingHeaders);
    assert_eq!(state.ordinal(), 0);
}

/// HEAD への応答は Content-Length があってもボディを待たない
#[test]
fn test_head_response_complete_without_body() {
    let (events, state) =
        feed_then_close("HEAD", b"HTTP/1.1 200 OK\r\nContent-Length: 1000\r\n\r\n");
    assert_eq!(state, ParserState::Complete);
    assert!(matches!(
        events[0],
        ParseEvent::HeadersReady {
            headers_only: true,
            ..
        }
    ));
}
