//! PBT テスト共通ユーティリティ

use http1_engine::{Headers, ParseEvent, ParserLimits, ParserState, ResponseHead, ResponseParser};
use proptest::prelude::*;

// ========================================
// 生成器
// ========================================

/// トークン文字列 (ヘッダー名など)
pub fn token() -> impl Strategy<Value = String> {
    "[A-Za-z0-9_.-]{1,16}"
}

/// ヘッダー値 (前後の空白なし、制御文字なし)
pub fn header_value() -> impl Strategy<Value = String> {
    "[A-Za-z0-9][A-Za-z0-9 ;=/.,-]{0,30}[A-Za-z0-9]"
}

/// フレーミングに関係しないヘッダー
pub fn extra_headers() -> impl Strategy<Value = Vec<(String, String)>> {
    proptest::collection::vec((token(), header_value()), 0..6).prop_map(|headers| {
        headers
            .into_iter()
            .map(|(name, value)| (format!("X-{name}"), value))
            .collect()
    })
}

/// ボディ
pub fn body(max_len: usize) -> impl Strategy<Value = Vec<u8>> {
    proptest::collection::vec(any::<u8>(), 0..max_len)
}

/// ボディを chunked の断片に分ける大きさ
pub fn chunk_sizes() -> impl Strategy<Value = Vec<usize>> {
    proptest::collection::vec(1usize..64, 1..8)
}

/// バイト列を分割する位置
pub fn split_points() -> impl Strategy<Value = Vec<usize>> {
    proptest::collection::vec(1usize..32, 0..16)
}

// ========================================
// レスポンス組み立て
// ========================================

/// ヘッダー部分を組み立てる
pub fn response_head(status: u16, headers: &[(String, String)]) -> Vec<u8> {
    let mut out = format!("HTTP/1.1 {status} Status\r\n").into_bytes();
    for (name, value) in headers {
        out.extend_from_slice(format!("{name}: {value}\r\n").as_bytes());
    }
    out.extend_from_slice(b"\r\n");
    out
}

/// ボディを `sizes` の大きさで巡回的に区切って chunked にする
pub fn chunked_body(body: &[u8], sizes: &[usize]) -> Vec<u8> {
    let mut out = Vec::new();
    let mut rest = body;
    let mut i = 0;
    while !rest.is_empty() {
        let n = sizes[i % sizes.len()].min(rest.len());
        out.extend_from_slice(&http1_engine::encode_chunk(&rest[..n]));
        rest = &rest[n..];
        i += 1;
    }
    out.extend_from_slice(http1_engine::LAST_CHUNK);
    out
}

/// `points` の間隔でバイト列を分割する
pub fn fragments<'a>(data: &'a [u8], points: &[usize]) -> Vec<&'a [u8]> {
    let mut out = Vec::new();
    let mut rest = data;
    for &n in points {
        if rest.is_empty() {
            break;
        }
        let n = n.min(rest.len());
        out.push(&rest[..n]);
        rest = &rest[n..];
    }
    if !rest.is_empty() {
        out.push(rest);
    }
    out
}

// ========================================
// パース結果
// ========================================

/// パース結果 (ボディの断片は連結済み)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Parsed {
    pub head: Option<ResponseHead>,
    pub headers_only: bool,
    pub body: Vec<u8>,
    pub trailers: Option<Headers>,
    pub state: ParserState,
}

/// 断片ごとに feed してイベントを集める
///
/// `eof` が true の場合は最後に接続終了を通知する。
pub fn parse_fragments(
    fragments: &[&[u8]],
    limits: ParserLimits,
    eof: bool,
) -> Result<Parsed, http1_engine::Error> {
    let mut parser = ResponseParser::new(limits);
    let mut parsed = Parsed {
        head: None,
        headers_only: false,
        body: Vec::new(),
        trailers: None,
        state: ParserState::AwaitingHeaders,
    };
    for fragment in fragments {
        drain(&mut parser, fragment, &mut parsed)?;
    }
    if eof {
        parser.finish();
        drain(&mut parser, b"", &mut parsed)?;
    }
    parsed.state = parser.state();
    Ok(parsed)
}

fn drain(
    parser: &mut ResponseParser,
    mut input: &[u8],
    parsed: &mut Parsed,
) -> Result<(), http1_engine::Error> {
    while let Some(event) = parser.feed(input)? {
        input = b"";
        match event {
            ParseEvent::HeadersReady { head, headers_only } => {
                parsed.head = Some(head);
                parsed.headers_only = headers_only;
            }
            ParseEvent::BodyChunk(data) => parsed.body.extend_from_slice(&data),
            ParseEvent::MessageComplete { trailers } => parsed.trailers = Some(trailers),
        }
    }
    Ok(())
}
