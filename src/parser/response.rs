//! HTTP レスポンスパーサー

use crate::error::Error;
use crate::headers::Headers;
use crate::limits::ParserLimits;

use super::body::{Framing, is_last_chunk_prefix, parse_chunk_size, resolve_framing};
use super::head::{ResponseHead, find_line, parse_header_line, parse_status_line};
use super::state::{ChunkPhase, ParserState};

/// パースイベント
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParseEvent {
    /// ステータス行とヘッダーが揃った
    ///
    /// `headers_only` が true の場合、この応答にボディは無い。
    HeadersReady {
        head: ResponseHead,
        headers_only: bool,
    },
    /// ボディの断片 (chunked の場合はデコード済み)
    BodyChunk(Vec<u8>),
    /// メッセージ完了
    MessageComplete { trailers: Headers },
}

/// HTTP レスポンスパーサー (Sans I/O)
///
/// `feed()` でバイト列を渡すと、最大 1 つのイベントを返す。
/// 入力は内部バッファに残るので、空のスライスで `feed()` を繰り返して
/// `None` が返るまでイベントを取り出す。
///
/// ```rust
/// use http1_engine::{ParseEvent, ParserLimits, ResponseParser};
///
/// let mut parser = ResponseParser::new(ParserLimits::default());
/// let mut events = Vec::new();
/// let mut input: &[u8] = b"HTTP/1.1 200 OK\r\nContent-Length: 5\r\n\r\nhello";
/// while let Some(event) = parser.feed(input).unwrap() {
///     input = b"";
///     events.push(event);
/// }
/// assert!(matches!(events[0], ParseEvent::HeadersReady { .. }));
/// assert_eq!(events[1], ParseEvent::BodyChunk(b"hello".to_vec()));
/// assert!(matches!(events[2], ParseEvent::MessageComplete { .. }));
/// ```
#[derive(Debug)]
pub struct ResponseParser {
    buf: Vec<u8>,
    state: ParserState,
    chunk: ChunkPhase,
    limits: ParserLimits,
    /// HEAD へのレスポンスなど、ボディを持たないと分かっている
    expect_no_body: bool,
    /// CONNECT へのレスポンス (2xx はボディなし)
    connect: bool,
    status_line: Option<(crate::version::Version, u16, String)>,
    headers: Headers,
    head_bytes: usize,
    trailers: Headers,
    trailer_bytes: usize,
    remaining: u64,
    body_bytes: u64,
    body_limit_exceeded: bool,
    complete_emitted: bool,
}

impl ResponseParser {
    /// 新しいパーサーを作成
    pub fn new(limits: ParserLimits) -> Self {
        Self {
            buf: Vec::new(),
            state: ParserState::AwaitingHeaders,
            chunk: ChunkPhase::Size,
            limits,
            expect_no_body: false,
            connect: false,
            status_line: None,
            headers: Headers::new(),
            head_bytes: 0,
            trailers: Headers::new(),
            trailer_bytes: 0,
            remaining: 0,
            body_bytes: 0,
            body_limit_exceeded: false,
            complete_emitted: false,
        }
    }

    /// リクエストメソッドに合わせたパーサーを作成
    ///
    /// HEAD はボディなし、CONNECT は 2xx でボディなしとして扱う。
    pub fn for_request_method(method: &str, limits: ParserLimits) -> Self {
        let mut parser = Self::new(limits);
        parser.expect_no_body = method.eq_ignore_ascii_case("HEAD");
        parser.connect = method.eq_ignore_ascii_case("CONNECT");
        parser
    }

    /// ステータスに関係なくボディなしとして扱う
    pub fn set_expect_no_body(&mut self, expect_no_body: bool) {
        self.expect_no_body = expect_no_body;
    }

    /// 制限設定を取得
    pub fn limits(&self) -> &ParserLimits {
        &self.limits
    }

    /// 現在の状態
    pub fn state(&self) -> ParserState {
        self.state
    }

    /// ボディの合計バイト数が上限を超えたか
    ///
    /// Content-Length が上限を超えている場合はヘッダー時点で true になる。
    pub fn body_limit_exceeded(&self) -> bool {
        self.body_limit_exceeded
    }

    /// これまでに取り出したボディのバイト数
    pub fn body_bytes(&self) -> u64 {
        self.body_bytes
    }

    /// 未処理のバッファ
    ///
    /// 完了後に残っている場合は、応答の後ろに余分なバイトが送られてきている。
    pub fn remaining(&self) -> &[u8] {
        &self.buf
    }

    /// 次のメッセージのために状態を初期化
    ///
    /// 制限設定とメソッド由来の設定は維持する。
    pub fn reset(&mut self) {
        self.buf.clear();
        self.state = ParserState::AwaitingHeaders;
        self.reset_message();
    }

    fn reset_message(&mut self) {
        self.chunk = ChunkPhase::Size;
        self.status_line = None;
        self.headers = Headers::new();
        self.head_bytes = 0;
        self.trailers = Headers::new();
        self.trailer_bytes = 0;
        self.remaining = 0;
        self.body_bytes = 0;
        self.body_limit_exceeded = false;
        self.complete_emitted = false;
    }

    /// 接続終了を通知
    ///
    /// 接続終了までがボディの場合は完了に遷移する。
    /// それ以外の状態では何もしない。
    pub fn finish(&mut self) {
        if self.state == ParserState::BodyIdentityEof && self.buf.is_empty() {
            self.state = ParserState::Complete;
        }
    }

    /// データを追加し、次のイベントを返す
    ///
    /// イベントが作れるだけのデータが無い場合は `Ok(None)`。
    /// エラー後は常に `Err(Error::Failed)` を返す。
    pub fn feed(&mut self, data: &[u8]) -> Result<Option<ParseEvent>, Error> {
        if self.state == ParserState::Error {
            return Err(Error::Failed);
        }
        self.buf.extend_from_slice(data);
        match self.advance() {
            Ok(event) => Ok(event),
            Err(e) => {
                self.state = ParserState::Error;
                self.buf.clear();
                Err(e)
            }
        }
    }

    fn advance(&mut self) -> Result<Option<ParseEvent>, Error> {
        loop {
            match self.state {
                ParserState::AwaitingHeaders => return self.parse_head(),
                ParserState::BodyIdentity => {
                    if self.buf.is_empty() {
                        return Ok(None);
                    }
                    let n = (self.buf.len() as u64).min(self.remaining) as usize;
                    let data = self.take_body(n);
                    self.remaining -= n as u64;
                    if self.remaining == 0 {
                        self.state = ParserState::Complete;
                    }
                    return Ok(Some(ParseEvent::BodyChunk(data)));
                }
                ParserState::BodyIdentityEof => {
                    if self.buf.is_empty() {
                        return Ok(None);
                    }
                    let data = self.take_body(self.buf.len());
                    return Ok(Some(ParseEvent::BodyChunk(data)));
                }
                ParserState::BodyChunked | ParserState::BodyChunkedTrailer => {
                    match self.parse_chunked()? {
                        Some(event) => return Ok(Some(event)),
                        None if self.state == ParserState::Complete => continue,
                        None => return Ok(None),
                    }
                }
                ParserState::Complete => {
                    if self.complete_emitted {
                        return Ok(None);
                    }
                    self.complete_emitted = true;
                    return Ok(Some(ParseEvent::MessageComplete {
                        trailers: std::mem::take(&mut self.trailers),
                    }));
                }
                ParserState::Error => return Err(Error::Failed),
            }
        }
    }

    /// ステータス行とヘッダーを読む
    ///
    /// 1xx (101 以外) は読み飛ばして次の応答を読む。
    fn parse_head(&mut self) -> Result<Option<ParseEvent>, Error> {
        loop {
            let Some(pos) = find_line(&self.buf) else {
                let pending = self.head_bytes + self.buf.len();
                if self.limits.header_bytes_exceeded(pending) {
                    return Err(Error::HeaderSectionTooLarge {
                        size: pending,
                        limit: self.limits.max_header_bytes,
                    });
                }
                return Ok(None);
            };

            self.head_bytes += pos + 2;
            if self.limits.header_bytes_exceeded(self.head_bytes) {
                return Err(Error::HeaderSectionTooLarge {
                    size: self.head_bytes,
                    limit: self.limits.max_header_bytes,
                });
            }

            if self.status_line.is_none() {
                let status = parse_status_line(&self.buf[..pos])?;
                self.buf.drain(..pos + 2);
                self.status_line = Some(status);
                continue;
            }

            if pos > 0 {
                if self.headers.len() >= self.limits.max_headers_count {
                    return Err(Error::TooManyHeaders {
                        count: self.headers.len() + 1,
                        limit: self.limits.max_headers_count,
                    });
                }
                let (name, value) = parse_header_line(&self.buf[..pos])?;
                self.buf.drain(..pos + 2);
                self.headers.push_unchecked(name, value);
                continue;
            }

            // 空行: ヘッダー終端
            self.buf.drain(..2);
            let (version, status_code, reason_phrase) = self
                .status_line
                .take()
                .ok_or_else(|| Error::InvalidData("missing status line".to_string()))?;

            if (100..200).contains(&status_code) && status_code != 101 {
                // 中間レスポンスは読み飛ばして本来の応答を待つ
                self.reset_message();
                continue;
            }

            let headers = std::mem::take(&mut self.headers);
            let no_body = self.expect_no_body
                || !status_has_body(status_code)
                || (self.connect && (200..300).contains(&status_code));

            let framing = resolve_framing(&headers, no_body)?;
            let headers_only = match framing {
                Framing::None | Framing::Length(0) => {
                    self.state = ParserState::Complete;
                    true
                }
                Framing::Length(len) => {
                    self.remaining = len;
                    if self.limits.body_bytes_exceeded(len) {
                        self.body_limit_exceeded = true;
                    }
                    self.state = ParserState::BodyIdentity;
                    false
                }
                Framing::Chunked => {
                    self.chunk = ChunkPhase::Size;
                    self.state = ParserState::BodyChunked;
                    false
                }
                Framing::UntilEof => {
                    self.state = ParserState::BodyIdentityEof;
                    false
                }
            };

            let head = ResponseHead {
                version,
                status_code,
                reason_phrase,
                headers,
            };
            return Ok(Some(ParseEvent::HeadersReady { head, headers_only }));
        }
    }

    /// chunked ボディを読む
    ///
    /// 状態を 1 つ以上進めたがイベントが無い場合、データ不足なら `None`
    fn parse_chunked(&mut self) -> Result<Option<ParseEvent>, Error> {
        loop {
            match self.chunk {
                ChunkPhase::Size => {
                    let Some(pos) = find_line(&self.buf) else {
                        self.check_chunk_line(self.buf.len())?;
                        if is_last_chunk_prefix(&self.buf) {
                            self.state = ParserState::BodyChunkedTrailer;
                            self.chunk = ChunkPhase::LastChunkLine;
                        }
                        return Ok(None);
                    };
                    self.check_chunk_line(pos)?;
                    let size = parse_chunk_size(&self.buf[..pos])?;
                    self.buf.drain(..pos + 2);
                    if size == 0 {
                        self.state = ParserState::BodyChunkedTrailer;
                        self.chunk = ChunkPhase::Trailer;
                    } else {
                        self.chunk = ChunkPhase::Data { remaining: size };
                    }
                }
                ChunkPhase::Data { remaining } => {
                    if self.buf.is_empty() {
                        return Ok(None);
                    }
                    let n = (self.buf.len() as u64).min(remaining) as usize;
                    let data = self.take_body(n);
                    let remaining = remaining - n as u64;
                    self.chunk = if remaining == 0 {
                        ChunkPhase::DataCrlf
                    } else {
                        ChunkPhase::Data { remaining }
                    };
                    return Ok(Some(ParseEvent::BodyChunk(data)));
                }
                ChunkPhase::DataCrlf => {
                    if self.buf.first().is_some_and(|&b| b != b'\r')
                        || self.buf.get(1).is_some_and(|&b| b != b'\n')
                    {
                        return Err(Error::InvalidData(
                            "invalid chunked encoding: expected CRLF after chunk data".to_string(),
                        ));
                    }
                    if self.buf.len() < 2 {
                        return Ok(None);
                    }
                    self.buf.drain(..2);
                    self.chunk = ChunkPhase::Size;
                }
                ChunkPhase::LastChunkLine => {
                    let Some(pos) = find_line(&self.buf) else {
                        self.check_chunk_line(self.buf.len())?;
                        return Ok(None);
                    };
                    self.check_chunk_line(pos)?;
                    // サイズ 0 は確定しているので形式だけ確認する
                    parse_chunk_size(&self.buf[..pos])?;
                    self.buf.drain(..pos + 2);
                    self.chunk = ChunkPhase::Trailer;
                }
                ChunkPhase::Trailer => {
                    let Some(pos) = find_line(&self.buf) else {
                        let pending = self.trailer_bytes + self.buf.len();
                        if self.limits.header_bytes_exceeded(pending) {
                            return Err(Error::HeaderSectionTooLarge {
                                size: pending,
                                limit: self.limits.max_header_bytes,
                            });
                        }
                        return Ok(None);
                    };
                    if pos == 0 {
                        self.buf.drain(..2);
                        self.state = ParserState::Complete;
                        return Ok(None);
                    }
                    self.trailer_bytes += pos + 2;
                    if self.limits.header_bytes_exceeded(self.trailer_bytes) {
                        return Err(Error::HeaderSectionTooLarge {
                            size: self.trailer_bytes,
                            limit: self.limits.max_header_bytes,
                        });
                    }
                    if self.trailers.len() >= self.limits.max_headers_count {
                        return Err(Error::TooManyHeaders {
                            count: self.trailers.len() + 1,
                            limit: self.limits.max_headers_count,
                        });
                    }
                    let (name, value) = parse_header_line(&self.buf[..pos])?;
                    self.buf.drain(..pos + 2);
                    self.trailers.push_unchecked(name, value);
                }
            }
        }
    }

    fn check_chunk_line(&self, size: usize) -> Result<(), Error> {
        if size > self.limits.max_chunk_line_size {
            return Err(Error::ChunkLineTooLong {
                size,
                limit: self.limits.max_chunk_line_size,
            });
        }
        Ok(())
    }

    fn take_body(&mut self, n: usize) -> Vec<u8> {
        let data: Vec<u8> = self.buf.drain(..n).collect();
        self.body_bytes = self.body_bytes.saturating_add(n as u64);
        if self.limits.body_bytes_exceeded(self.body_bytes) {
            self.body_limit_exceeded = true;
        }
        data
    }
}

/// ステータスコードからボディがあるかどうかを判定
fn status_has_body(status_code: u16) -> bool {
    // 1xx, 204, 304 はボディなし
    !((100..200).contains(&status_code) || status_code == 204 || status_code == 304)
}
