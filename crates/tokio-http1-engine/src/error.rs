//! tokio-http1-engine エラー型
//!
//! 1 つの失敗がヘッダー待ちの呼び出し側とボディの読み手の両方に届くので、
//! `Error` は `Clone` できる (I/O エラーは `Arc` で共有する)。

use std::sync::Arc;
use std::time::Duration;

use http1_engine::ParserState;

use crate::cancel::CancelCause;
use crate::transport::ConnectionInfo;
use crate::tunnel::TunnelError;

/// エラーの分類
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// リクエストの構築や送信が不正
    Protocol,
    /// 受信したメッセージが不正
    Parse,
    /// メッセージ完了前に接続が閉じられた
    IncompleteTransfer,
    /// ボディが上限を超えた
    StreamTooLarge,
    /// 接続失敗、予期しない切断
    Socket,
    /// 内部タイマーが発火した
    Timeout,
    /// 呼び出し側がキャンセルした
    Cancelled,
    /// リダイレクト回数の上限を超えた
    TooManyRedirects,
    /// プロキシの CONNECT に失敗した
    Tunnel,
    /// 設定値が不正
    InvalidOption,
}

/// リクエスト構築・送信時のプロトコル違反
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ProtocolError {
    #[error("None of the requested protocol versions are supported: {0:?}")]
    UnsupportedProtocolVersions(Vec<String>),
    #[error("Sending the request failed due to a header injection attempt: {0}")]
    HeaderInjection(#[from] http1_engine::EncodeError),
    #[error("Body contained more bytes than specified in Content-Length, aborting request")]
    BodyLongerThanDeclared,
    #[error("Body contained fewer bytes than specified in Content-Length, aborting request")]
    BodyShorterThanDeclared,
    #[error("Can't send chunked bodies over HTTP/1.0")]
    ChunkedOverHttp10,
    #[error("invalid Content-Length header: {0}")]
    InvalidContentLength(String),
    #[error("invalid URI: {0}")]
    InvalidUri(String),
    #[error("unsupported URI scheme: {0}")]
    UnsupportedScheme(String),
    #[error("invalid multipart boundary: {0:?}")]
    InvalidBoundary(String),
}

/// tokio-http1-engine エラー
#[derive(Debug, Clone, thiserror::Error)]
pub enum Error {
    #[error(transparent)]
    Protocol(#[from] ProtocolError),
    #[error("failed to parse response: {0}")]
    Parse(#[from] http1_engine::Error),
    #[error("Socket disconnected prior to response completion (Parser state: {state})")]
    IncompleteTransfer { state: ParserState },
    #[error("Body exceeded the configured limit of {limit} bytes")]
    StreamTooLarge { limit: u64 },
    #[error("Connection to '{authority}' failed: {source}")]
    Connect {
        authority: String,
        source: Arc<std::io::Error>,
    },
    #[error("Socket disconnected prior to response completion (Parser state: {state})")]
    Disconnected { state: ParserState },
    #[error("I/O error: {0}")]
    Io(Arc<std::io::Error>),
    #[error("TLS error: {0}")]
    Tls(String),
    /// TCP 接続後の TLS ハンドシェイクに失敗した
    ///
    /// `connection` には TCP レベルの情報だけが入る。
    #[error("TLS handshake failed: {message}")]
    TlsHandshake {
        message: String,
        connection: ConnectionInfo,
    },
    #[error("Proxy CONNECT failed: {0}")]
    Tunnel(#[from] TunnelError),
    #[error("{message}")]
    Timeout { message: String },
    #[error("The request was cancelled")]
    Cancelled,
    #[error("Too many redirects: exceeded {max}")]
    TooManyRedirects { max: u32 },
    #[error("invalid option: {0}")]
    InvalidOption(String),
}

impl Error {
    /// エラーの分類
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::Protocol(_) => ErrorKind::Protocol,
            Error::Parse(_) => ErrorKind::Parse,
            Error::IncompleteTransfer { .. } => ErrorKind::IncompleteTransfer,
            Error::StreamTooLarge { .. } => ErrorKind::StreamTooLarge,
            Error::Connect { .. }
            | Error::Disconnected { .. }
            | Error::Io(_)
            | Error::Tls(_)
            | Error::TlsHandshake { .. } => ErrorKind::Socket,
            Error::Tunnel(_) => ErrorKind::Tunnel,
            Error::Timeout { .. } => ErrorKind::Timeout,
            Error::Cancelled => ErrorKind::Cancelled,
            Error::TooManyRedirects { .. } => ErrorKind::TooManyRedirects,
            Error::InvalidOption(_) => ErrorKind::InvalidOption,
        }
    }

    /// 失敗時点で取得できていた接続情報
    pub fn connection_info(&self) -> Option<&ConnectionInfo> {
        match self {
            Error::TlsHandshake { connection, .. } => Some(connection),
            _ => None,
        }
    }

    /// TLS のエラーにハンドシェイク前の接続情報を付ける
    pub(crate) fn with_connection_info(self, connection: ConnectionInfo) -> Self {
        match self {
            Error::Tls(message) => Error::TlsHandshake {
                message,
                connection,
            },
            other => other,
        }
    }

    /// キャンセル原因をエラーに変換
    pub(crate) fn from_cancel(cause: &CancelCause, target: &str) -> Self {
        match cause {
            CancelCause::Cancelled => Error::Cancelled,
            CancelCause::Timeout { after } => Error::timeout(target, *after),
        }
    }

    pub(crate) fn timeout(target: &str, after: Duration) -> Self {
        Error::Timeout {
            message: format!(
                "Response for \"{}\" didn't finish within {} ms, aborting",
                target,
                after.as_millis()
            ),
        }
    }
}

impl From<std::io::Error> for Error {
    fn from(e: std::io::Error) -> Self {
        Error::Io(Arc::new(e))
    }
}

impl From<rustls::Error> for Error {
    fn from(e: rustls::Error) -> Self {
        Error::Tls(e.to_string())
    }
}

impl From<rustls_pki_types::InvalidDnsNameError> for Error {
    fn from(e: rustls_pki_types::InvalidDnsNameError) -> Self {
        Error::Tls(e.to_string())
    }
}

impl From<http1_engine::EncodeError> for Error {
    fn from(e: http1_engine::EncodeError) -> Self {
        Error::Protocol(ProtocolError::HeaderInjection(e))
    }
}

/// Result 型エイリアス
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind() {
        assert_eq!(
            Error::from(ProtocolError::ChunkedOverHttp10).kind(),
            ErrorKind::Protocol
        );
        assert_eq!(
            Error::Disconnected {
                state: ParserState::AwaitingHeaders
            }
            .kind(),
            ErrorKind::Socket
        );
        assert_eq!(
            Error::from_cancel(&CancelCause::Cancelled, "http://a/").kind(),
            ErrorKind::Cancelled
        );
        assert_eq!(
            Error::from(std::io::Error::other("x")).kind(),
            ErrorKind::Socket
        );
    }

    #[test]
    fn test_messages() {
        let e = Error::IncompleteTransfer {
            state: ParserState::BodyIdentity,
        };
        assert_eq!(
            e.to_string(),
            "Socket disconnected prior to response completion (Parser state: awaiting-body-identity (1))"
        );

        let e = Error::from_cancel(
            &CancelCause::Timeout {
                after: Duration::from_millis(1500),
            },
            "http://example.com/",
        );
        assert_eq!(
            e.to_string(),
            "Response for \"http://example.com/\" didn't finish within 1500 ms, aborting"
        );
    }
}
