//! tokio_http1_engine - Tokio HTTP/1.x client engine for http1_engine
//!
//! tokio と tokio-rustls を使用した非同期 HTTP/1.x クライアントエンジン。
//! プロトコルの解析とエンコードは Sans I/O の `http1_engine` に任せ、
//! このクレートは接続の管理と送受信の順序付けを行う。
//!
//! ## Features
//!
//! - `gzip` - gzip / deflate の Content-Encoding を展開する (デフォルト有効)
//! - `full` - すべての機能を有効化
//!
//! ## 特徴
//!
//! - **ヘッダー受信時点で応答**: ボディは容量制限付きのチャネルで順に届く
//! - **Keep-Alive**: authority ごとのコネクションプール
//! - **キャンセル**: 呼び出し側のキャンセルと転送タイムアウトを合成したシグナル
//! - **プロキシ**: CONNECT トンネル
//! - **TLS 対応**: tokio-rustls による HTTPS 対応
//!
//! ## クライアント
//!
//! ```ignore
//! use tokio_http1_engine::{Client, CancelSource, FormBody};
//!
//! let client = Client::new();
//!
//! // GET
//! let response = client.get("http://example.com/path").await?;
//! assert_eq!(response.status, 200);
//! let body = response.body.bytes().await?;
//!
//! // フォーム
//! let form = FormBody::new().field("name", "value");
//! let response = client.post("http://example.com/form").body(form).await?;
//!
//! // キャンセル
//! let source = CancelSource::new();
//! let pending = client.get("http://example.com/slow").cancel_signal(source.signal());
//! source.cancel();
//! ```

mod body;
mod cancel;
mod channel;
mod client;
mod cycle;
mod decompress;
mod error;
mod options;
mod pool;
mod proxy;
mod request;
mod response;
mod transport;
mod tunnel;

pub use body::{BodyStream, FormBody, RequestBody};
pub use cancel::{CancelCause, CancelSignal, CancelSource, combine};
pub use channel::{Body, DEFAULT_BODY_CHANNEL_CAPACITY};
pub use client::{Client, RequestBuilder};
pub use cycle::USER_AGENT;
pub use decompress::{accept_encoding, supported_codings};
pub use error::{Error, ErrorKind, ProtocolError, Result};
pub use options::{ClientOptions, RequestOptions};
pub use pool::{
    AcquireError, Connect, ConnectFuture, ConnectionPool, Endpoint, PoolConfig, PooledConnection,
    TcpConnector,
};
pub use proxy::ProxyConfig;
pub use request::Request;
pub use response::Response;
pub use transport::{ConnectionInfo, TlsInfo, Transport, default_tls_config};
pub use tunnel::{HttpTunneler, TunnelError};

// http1_engine の型を re-export
pub use http1_engine::{Headers, ParserState, Version};
