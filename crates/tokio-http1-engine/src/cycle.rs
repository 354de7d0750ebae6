//! リクエストサイクル
//!
//! 1 回の送信 (リダイレクトごとに 1 つ) を担当する。
//!
//! ```text
//! Dispatched -> Connecting -> Writing -> AwaitingHeaders -> StreamingBody -> Completed
//!                    |            |              |                 |
//!                    +------------+--------------+-----------------+--> Failed
//! ```
//!
//! ヘッダーを受信した時点で `Response` を返し、ボディは別タスクで
//! ボディチャネルに流し続ける。失敗はどの段階でも 1 回だけ確定し、
//! まだ解決していないヘッダー待ちとボディの両方に同じエラーが届く。
//! 保持している接続はその場で破棄する。

use std::io;
use std::sync::Arc;

use bytes::Bytes;
use http1_engine::{
    ContentEncoding, Headers, LAST_CHUNK, ParseEvent, ParserState, ResponseHead, ResponseParser,
    Version, encode_chunk, encode_request_head,
};
use rustls::ClientConfig;
use tokio::io::{AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::oneshot;

use crate::body::RequestBody;
use crate::cancel::{CancelSignal, combine};
use crate::channel::{Body, BodySender, DEFAULT_BODY_CHANNEL_CAPACITY, body_channel};
use crate::decompress::{self, Decoder};
use crate::error::{Error, ProtocolError, Result};
use crate::options::ClientOptions;
use crate::pool::{ConnectionPool, Endpoint, PooledConnection};
use crate::request::Request;
use crate::response::Response;
use crate::transport::{ConnectionInfo, Transport};

/// ソケットから一度に読むバイト数
const READ_BUFFER_SIZE: usize = 8192;

/// デフォルトの User-Agent
pub const USER_AGENT: &str = concat!("tokio_http1_engine/", env!("CARGO_PKG_VERSION"));

/// ボディを持つのが普通のメソッド (空でも Content-Length: 0 を送る)
const BODY_METHODS: [&str; 3] = ["POST", "PUT", "PATCH"];

/// TRACE で送らないヘッダー
const TRACE_STRIPPED_HEADERS: [&str; 5] = [
    "Transfer-Encoding",
    "Content-Length",
    "Authorization",
    "Proxy-Authorization",
    "Cookie",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Dispatched,
    Connecting,
    Writing,
    AwaitingHeaders,
    StreamingBody,
    Completed,
    Failed,
}

/// リクエストボディの送り方
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RequestFraming {
    /// chunked で送る
    Chunked,
    /// 宣言した長さちょうどを送る
    Length(u64),
    /// そのまま送る
    Raw,
}

/// 送信前に組み立てたリクエスト
#[derive(Debug)]
struct PreparedRequest {
    head: Vec<u8>,
    framing: RequestFraming,
    send_body: bool,
    keep_alive: bool,
}

/// 読み込みの結果
enum ReadOutcome {
    Completed,
    Retry,
    /// 受け取り手がいなくなった
    Abandoned,
}

/// サイクルが使う共有資源
#[derive(Debug, Clone)]
pub(crate) struct CycleContext {
    pub(crate) pool: Arc<ConnectionPool>,
    pub(crate) tls_config: Arc<ClientConfig>,
}

/// リクエストを送り、ヘッダーを受信した時点でレスポンスを返す
///
/// 転送タイムアウトはここから始まり、ボディが確定した時点で止まる。
pub(crate) async fn dispatch(
    context: CycleContext,
    request: Request,
    options: &ClientOptions,
    signal: CancelSignal,
) -> Result<Response> {
    let default_headers = options.headers()?;
    let signal = match options.transfer_timeout() {
        Some(after) => combine([signal, CancelSignal::timeout(after)]),
        None => signal,
    };

    let (headers_tx, headers_rx) = oneshot::channel();
    let (body_tx, body) = body_channel(DEFAULT_BODY_CHANNEL_CAPACITY);
    let cycle = RequestCycle {
        context,
        request,
        options: options.clone(),
        default_headers,
        signal,
        phase: Phase::Dispatched,
        headers_tx: Some(headers_tx),
        body_tx: Some(body_tx),
        body: Some(body),
        connection: None,
        connection_info: ConnectionInfo::default(),
        keep_alive: false,
        retry_count: 0,
    };
    tokio::spawn(cycle.run());

    headers_rx.await.unwrap_or_else(|_| {
        Err(Error::from(io::Error::other(
            "request cycle ended without a response",
        )))
    })
}

struct RequestCycle {
    context: CycleContext,
    request: Request,
    options: ClientOptions,
    default_headers: Headers,
    signal: CancelSignal,
    phase: Phase,
    headers_tx: Option<oneshot::Sender<Result<Response>>>,
    body_tx: Option<BodySender>,
    body: Option<Body>,
    connection: Option<PooledConnection>,
    connection_info: ConnectionInfo,
    keep_alive: bool,
    retry_count: u32,
}

impl RequestCycle {
    async fn run(mut self) {
        let signal = self.signal.clone();
        let target = self.request.uri().to_string();
        let result = tokio::select! {
            biased;
            cause = signal.cancelled() => Err(Error::from_cancel(&cause, &target)),
            result = self.drive() => result,
        };
        if let Err(e) = result {
            self.fail(e);
        }
    }

    fn set_phase(&mut self, phase: Phase) {
        tracing::debug!(
            method = %self.request.method(),
            uri = %self.request.uri(),
            from = ?self.phase,
            to = ?phase,
            "request phase"
        );
        self.phase = phase;
    }

    async fn drive(&mut self) -> Result<()> {
        // ネットワークに触れる前にバージョンを決める
        let version = Version::negotiate(self.request.protocol_versions()).ok_or_else(|| {
            ProtocolError::UnsupportedProtocolVersions(self.request.protocol_versions().to_vec())
        })?;
        let endpoint = Endpoint::from_url(self.request.uri())?;
        let prepared = prepare(&self.request, version, &self.default_headers).await?;
        self.keep_alive = prepared.keep_alive;

        loop {
            self.write_request(&endpoint, &prepared).await?;
            match self.read_response().await? {
                ReadOutcome::Completed => return Ok(()),
                ReadOutcome::Abandoned => {
                    tracing::debug!(uri = %self.request.uri(), "response abandoned by caller");
                    self.discard_connection();
                    self.phase = Phase::Completed;
                    return Ok(());
                }
                ReadOutcome::Retry => {
                    tracing::debug!(
                        uri = %self.request.uri(),
                        "connection closed before any response bytes, retrying"
                    );
                    self.discard_connection();
                    self.retry_count += 1;
                }
            }
        }
    }

    async fn write_request(&mut self, endpoint: &Endpoint, prepared: &PreparedRequest) -> Result<()> {
        self.set_phase(Phase::Connecting);
        let target = self.request.uri().to_string();
        let connection = self
            .context
            .pool
            .acquire(endpoint, &self.signal)
            .await
            .map_err(|e| e.into_error(&target))?;
        let connection = self.connection.insert(connection);
        self.connection_info = connection.info();
        if endpoint.secure {
            let tcp_info = self.connection_info.clone();
            connection
                .upgrade_tls(endpoint.server_name(), self.context.tls_config.clone())
                .await
                .map_err(|e| e.with_connection_info(tcp_info))?;
            self.connection_info = connection.info();
        }

        self.set_phase(Phase::Writing);
        let transport = transport_of(&mut self.connection)?;
        transport.write_all(&prepared.head).await?;
        if prepared.send_body {
            write_body(transport, self.request.body(), prepared.framing).await?;
        } else {
            transport.flush().await?;
        }
        tracing::trace!(head_bytes = prepared.head.len(), "request written");
        Ok(())
    }

    async fn read_response(&mut self) -> Result<ReadOutcome> {
        self.set_phase(Phase::AwaitingHeaders);
        let mut parser =
            ResponseParser::for_request_method(self.request.method(), self.options.parser_limits());
        let mut buf = vec![0u8; READ_BUFFER_SIZE];
        let mut total_read = 0usize;

        loop {
            let n = transport_of(&mut self.connection)?.read(&mut buf).await?;
            let eof = n == 0;
            if eof {
                if parser.state() == ParserState::AwaitingHeaders
                    && total_read == 0
                    && self.retry_count == 0
                {
                    return Ok(ReadOutcome::Retry);
                }
                parser.finish();
            }
            total_read += n;
            tracing::trace!(bytes = n, total = total_read, "response bytes read");

            let mut input = &buf[..n];
            while let Some(event) = parser.feed(input)? {
                input = &[];
                match event {
                    ParseEvent::HeadersReady { head, headers_only } => {
                        if !self.on_headers(head, headers_only)? {
                            return Ok(ReadOutcome::Abandoned);
                        }
                    }
                    ParseEvent::BodyChunk(data) => {
                        if parser.body_limit_exceeded() {
                            return Err(Error::StreamTooLarge {
                                limit: parser.limits().max_body_bytes,
                            });
                        }
                        if self.options.discard_body {
                            continue;
                        }
                        let Some(sender) = self.body_tx.as_ref() else {
                            continue;
                        };
                        if sender.send(Bytes::from(data)).await.is_err() {
                            return Ok(ReadOutcome::Abandoned);
                        }
                    }
                    ParseEvent::MessageComplete { .. } => {
                        let reusable = self.keep_alive && !eof && parser.remaining().is_empty();
                        self.complete(reusable);
                        return Ok(ReadOutcome::Completed);
                    }
                }
            }

            if eof {
                let state = parser.state();
                if state == ParserState::AwaitingHeaders {
                    return Err(Error::Disconnected { state });
                }
                return Err(Error::IncompleteTransfer { state });
            }
        }
    }

    /// ヘッダーを受信した
    ///
    /// 呼び出し側がすでにいない場合は false。
    fn on_headers(&mut self, head: ResponseHead, headers_only: bool) -> Result<bool> {
        if head.must_close() || head.status_code == 101 {
            self.keep_alive = false;
        }

        let ResponseHead {
            version,
            status_code,
            reason_phrase,
            mut headers,
        } = head;
        let mut body = self.body.take().unwrap_or_else(Body::empty);
        if !headers_only {
            apply_content_decoding(&mut headers, &mut body)?;
        }

        let response = Response {
            version,
            status: status_code,
            reason: reason_phrase,
            headers,
            body,
            request: self.request.clone(),
            previous: None,
            connection_info: self.connection_info.clone(),
        };

        self.set_phase(Phase::StreamingBody);
        let Some(headers_tx) = self.headers_tx.take() else {
            return Ok(false);
        };
        Ok(headers_tx.send(Ok(response)).is_ok())
    }

    /// ボディを確定させてから接続を戻す
    fn complete(&mut self, reusable: bool) {
        self.set_phase(Phase::Completed);
        if let Some(sender) = self.body_tx.take() {
            sender.complete();
        }
        if let Some(mut connection) = self.connection.take() {
            if reusable {
                self.context.pool.release(&mut connection);
            } else {
                self.context.pool.discard(&mut connection);
            }
        }
    }

    fn fail(&mut self, error: Error) {
        if matches!(self.phase, Phase::Completed | Phase::Failed) {
            return;
        }
        tracing::debug!(
            uri = %self.request.uri(),
            phase = ?self.phase,
            error = %error,
            "request failed"
        );
        self.phase = Phase::Failed;
        if let Some(headers_tx) = self.headers_tx.take() {
            let _ = headers_tx.send(Err(error.clone()));
        }
        if let Some(sender) = self.body_tx.take() {
            sender.fail(error);
        }
        self.discard_connection();
    }

    fn discard_connection(&mut self) {
        if let Some(mut connection) = self.connection.take() {
            self.context.pool.discard(&mut connection);
        }
    }
}

fn transport_of(connection: &mut Option<PooledConnection>) -> Result<&mut Transport> {
    connection
        .as_mut()
        .and_then(PooledConnection::transport_mut)
        .ok_or_else(|| {
            Error::from(io::Error::new(
                io::ErrorKind::NotConnected,
                "connection is not available",
            ))
        })
}

/// ヘッダーを補い、リクエスト行とヘッダーをエンコードする
async fn prepare(
    request: &Request,
    version: Version,
    default_headers: &Headers,
) -> Result<PreparedRequest> {
    let trace = request.method().eq_ignore_ascii_case("TRACE");
    let empty = RequestBody::Empty;
    let body = if trace { &empty } else { request.body() };

    let mut headers = request.headers().clone();
    headers.merge_missing(default_headers);
    for (name, value) in &body.headers()? {
        headers.set_if_absent(name, value)?;
    }
    if let Some(host) = request.host_header() {
        headers.set_if_absent("Host", &host)?;
    }
    headers.set_if_absent("User-Agent", USER_AGENT)?;
    headers.set_if_absent("Accept", "*/*")?;
    if let Some(accept_encoding) = decompress::accept_encoding() {
        headers.set_if_absent("Accept-Encoding", accept_encoding)?;
    }

    let framing = if trace {
        for name in TRACE_STRIPPED_HEADERS {
            headers.remove(name);
        }
        RequestFraming::Raw
    } else if headers.contains("Transfer-Encoding") {
        headers.remove("Content-Length");
        if headers.has_token("Transfer-Encoding", "chunked") {
            RequestFraming::Chunked
        } else {
            RequestFraming::Raw
        }
    } else if let Some(value) = headers.get("Content-Length") {
        let length = value
            .trim()
            .parse::<u64>()
            .map_err(|_| ProtocolError::InvalidContentLength(value.to_string()))?;
        RequestFraming::Length(length)
    } else {
        match body.declared_length().await? {
            Some(0) => {
                let method = request.method();
                if BODY_METHODS.iter().any(|m| m.eq_ignore_ascii_case(method)) {
                    headers.set("Content-Length", "0")?;
                }
                RequestFraming::Length(0)
            }
            Some(length) => {
                headers.set("Content-Length", &length.to_string())?;
                RequestFraming::Length(length)
            }
            None => {
                headers.set("Transfer-Encoding", "chunked")?;
                RequestFraming::Chunked
            }
        }
    };

    if framing == RequestFraming::Chunked && version == Version::Http10 {
        return Err(ProtocolError::ChunkedOverHttp10.into());
    }

    let head = encode_request_head(request.method(), &request.target(), version, &headers)?;
    Ok(PreparedRequest {
        head,
        framing,
        send_body: !trace,
        keep_alive: !headers.has_token("Connection", "close"),
    })
}

/// ボディを書き込む
///
/// 最後のチャンクを見分けるため、常に 1 つ先読みしてから書く。
/// 宣言した長さを超えるチャンクは書き込まずに失敗する。
async fn write_body<W>(writer: &mut W, body: &RequestBody, framing: RequestFraming) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    let chunked = framing == RequestFraming::Chunked;
    let mut remaining = match framing {
        RequestFraming::Length(length) => Some(length),
        _ => None,
    };
    let mut stream = body.create_stream();
    let mut pending: Option<Bytes> = None;
    let mut written = 0u64;

    loop {
        let next = stream.next_chunk().await?;
        if let (Some(chunk), Some(remaining)) = (next.as_ref(), remaining.as_mut()) {
            let len = chunk.len() as u64;
            if len > *remaining {
                return Err(ProtocolError::BodyLongerThanDeclared.into());
            }
            *remaining -= len;
        }

        let last = next.is_none();
        match pending.take() {
            Some(data) if chunked => {
                let mut frame = encode_chunk(&data);
                if last {
                    frame.extend_from_slice(LAST_CHUNK);
                }
                writer.write_all(&frame).await?;
                written += data.len() as u64;
            }
            Some(data) => {
                writer.write_all(&data).await?;
                written += data.len() as u64;
            }
            None if last && chunked => writer.write_all(LAST_CHUNK).await?,
            None => {}
        }

        match next {
            Some(chunk) => pending = Some(chunk),
            None => break,
        }
    }

    if remaining.is_some_and(|r| r > 0) {
        return Err(ProtocolError::BodyShorterThanDeclared.into());
    }
    writer.flush().await?;
    tracing::trace!(body_bytes = written, "request body written");
    Ok(())
}

/// 展開できる Content-Encoding を外し、ボディに展開器を付ける
fn apply_content_decoding(headers: &mut Headers, body: &mut Body) -> Result<()> {
    // 解釈できない Content-Encoding はそのまま渡す
    let Ok(Some(encoding)) = ContentEncoding::from_headers(headers) else {
        return Ok(());
    };
    let (codings, rest) = encoding.split_decodable(&decompress::supported_codings());
    if rest.as_ref() == Some(&encoding) {
        return Ok(());
    }
    for coding in &codings {
        if let Some(decoder) = Decoder::new(coding) {
            body.push_decoder(decoder);
        }
    }
    match rest {
        Some(rest) => headers.set("Content-Encoding", &rest.to_string())?,
        None => {
            headers.remove("Content-Encoding");
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;

    async fn prepared(request: Request, version: Version) -> Result<PreparedRequest> {
        prepare(&request, version, &Headers::new()).await
    }

    fn head_text(prepared: &PreparedRequest) -> String {
        String::from_utf8(prepared.head.clone()).unwrap()
    }

    #[tokio::test]
    async fn test_prepare_get() {
        let request = Request::new("GET", "http://example.com:8080/a?b=1").unwrap();
        let prepared = prepared(request, Version::Http11).await.unwrap();
        let head = head_text(&prepared);
        assert!(head.starts_with("GET /a?b=1 HTTP/1.1\r\n"));
        assert!(head.contains("Host: example.com:8080\r\n"));
        assert!(head.contains(&format!("User-Agent: {USER_AGENT}\r\n")));
        assert!(head.contains("Accept: */*\r\n"));
        assert!(!head.contains("Content-Length"));
        assert_eq!(prepared.framing, RequestFraming::Length(0));
        assert!(prepared.keep_alive);
    }

    #[tokio::test]
    async fn test_prepare_post_lengths() {
        let request = Request::new("POST", "http://example.com/").unwrap();
        let prepared_empty = prepared(request.clone(), Version::Http11).await.unwrap();
        assert!(head_text(&prepared_empty).contains("Content-Length: 0\r\n"));

        let prepared_body = prepared(request.clone().with_body("hello"), Version::Http11)
            .await
            .unwrap();
        assert!(head_text(&prepared_body).contains("Content-Length: 5\r\n"));
        assert_eq!(prepared_body.framing, RequestFraming::Length(5));

        let streamed = request.with_body(RequestBody::from_chunks(["a", "b"], None));
        let prepared_chunked = prepared(streamed.clone(), Version::Http11).await.unwrap();
        assert!(head_text(&prepared_chunked).contains("Transfer-Encoding: chunked\r\n"));
        assert_eq!(prepared_chunked.framing, RequestFraming::Chunked);

        let err = prepared(streamed, Version::Http10).await.unwrap_err();
        assert!(matches!(
            err,
            Error::Protocol(ProtocolError::ChunkedOverHttp10)
        ));
    }

    #[tokio::test]
    async fn test_prepare_transfer_encoding_wins() {
        let request = Request::new("POST", "http://example.com/")
            .unwrap()
            .with_header("Transfer-Encoding", "chunked")
            .unwrap()
            .with_header("Content-Length", "5")
            .unwrap()
            .with_body("hello");
        let prepared = prepared(request, Version::Http11).await.unwrap();
        assert!(!head_text(&prepared).contains("Content-Length"));
        assert_eq!(prepared.framing, RequestFraming::Chunked);
    }

    #[tokio::test]
    async fn test_prepare_trace_strips() {
        let request = Request::new("TRACE", "http://example.com/")
            .unwrap()
            .with_header("Authorization", "secret")
            .unwrap()
            .with_header("Cookie", "a=b")
            .unwrap()
            .with_header("Proxy-Authorization", "secret")
            .unwrap()
            .with_header("Content-Length", "4")
            .unwrap()
            .with_body("body");
        let prepared = prepared(request, Version::Http11).await.unwrap();
        let head = head_text(&prepared);
        for name in TRACE_STRIPPED_HEADERS {
            assert!(!head.contains(name), "{name} must be stripped");
        }
        assert!(!prepared.send_body);
    }

    #[tokio::test]
    async fn test_prepare_default_headers() {
        let request = Request::new("GET", "http://example.com/")
            .unwrap()
            .with_header("X-Keep", "request")
            .unwrap()
            .with_header("Connection", "close")
            .unwrap();
        let defaults = Headers::try_from_pairs([("X-Keep", "default"), ("X-Add", "1")]).unwrap();
        let prepared = prepare(&request, Version::Http11, &defaults).await.unwrap();
        let head = head_text(&prepared);
        assert!(head.contains("X-Keep: request\r\n"));
        assert!(!head.contains("X-Keep: default"));
        assert!(head.contains("X-Add: 1\r\n"));
        assert!(!prepared.keep_alive);
    }

    #[tokio::test]
    async fn test_prepare_invalid_content_length() {
        let request = Request::new("POST", "http://example.com/")
            .unwrap()
            .with_header("Content-Length", "abc")
            .unwrap();
        let err = prepared(request, Version::Http11).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Protocol);
    }

    #[tokio::test]
    async fn test_write_body_chunked() {
        let mut out = Vec::new();
        let body = RequestBody::from_chunks(["ab", "", "cde"], None);
        write_body(&mut out, &body, RequestFraming::Chunked)
            .await
            .unwrap();
        assert_eq!(out, b"2\r\nab\r\n3\r\ncde\r\n0\r\n\r\n");

        let mut out = Vec::new();
        write_body(&mut out, &RequestBody::Empty, RequestFraming::Chunked)
            .await
            .unwrap();
        assert_eq!(out, b"0\r\n\r\n");
    }

    #[tokio::test]
    async fn test_write_body_longer_than_declared() {
        let mut out = Vec::new();
        let body = RequestBody::from_chunks(["a", "b", "c"], Some(2));
        let err = write_body(&mut out, &body, RequestFraming::Length(2))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            Error::Protocol(ProtocolError::BodyLongerThanDeclared)
        ));
        // 超過したチャンクは書き込まれない
        assert!(out.len() < 3);
    }

    #[tokio::test]
    async fn test_write_body_shorter_than_declared() {
        let mut out = Vec::new();
        let body = RequestBody::from_chunks(["a"], Some(2));
        let err = write_body(&mut out, &body, RequestFraming::Length(2))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            Error::Protocol(ProtocolError::BodyShorterThanDeclared)
        ));
    }

    #[tokio::test]
    async fn test_write_body_exact_length() {
        let mut out = Vec::new();
        let body = RequestBody::from_chunks(["ab", "c"], Some(3));
        write_body(&mut out, &body, RequestFraming::Length(3))
            .await
            .unwrap();
        assert_eq!(out, b"abc");
    }

    #[test]
    fn test_content_decoding_unknown_kept() {
        let mut headers = Headers::try_from_pairs([("Content-Encoding", "br")]).unwrap();
        let mut body = Body::empty();
        apply_content_decoding(&mut headers, &mut body).unwrap();
        assert_eq!(headers.get("Content-Encoding"), Some("br"));
    }

    #[cfg(feature = "gzip")]
    #[test]
    fn test_content_decoding_stripped() {
        let mut headers = Headers::try_from_pairs([("Content-Encoding", "br, gzip")]).unwrap();
        let mut body = Body::empty();
        apply_content_decoding(&mut headers, &mut body).unwrap();
        assert_eq!(headers.get("Content-Encoding"), Some("br"));

        let mut headers = Headers::try_from_pairs([("Content-Encoding", "deflate, gzip")]).unwrap();
        apply_content_decoding(&mut headers, &mut body).unwrap();
        assert!(!headers.contains("Content-Encoding"));
    }
}
