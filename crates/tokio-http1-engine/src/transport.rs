//! TCP / TLS トランスポート
//!
//! 平文の TCP と tokio-rustls の TLS ストリームを 1 つの型にまとめ、
//! 接続情報 (アドレスと TLS セッション) を取り出す。

use std::io;
use std::net::SocketAddr;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use rustls::ClientConfig;
use rustls_pki_types::ServerName;
use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};
use tokio::net::TcpStream;
use tokio_rustls::TlsConnector;
use tokio_rustls::client::TlsStream;

use crate::error::{Error, Result};

/// OS のルート証明書ストアを使用するデフォルトの TLS 設定を作成
pub fn default_tls_config() -> Arc<ClientConfig> {
    Arc::new(
        ClientConfig::builder()
            .dangerous()
            .with_custom_certificate_verifier(Arc::new(rustls_platform_verifier::Verifier::new()))
            .with_no_client_auth(),
    )
}

/// TLS セッション情報
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TlsInfo {
    /// TLS バージョン (例: "TLSv1_3")
    pub protocol_version: Option<String>,
    /// 暗号スイート
    pub cipher_suite: Option<String>,
    /// ALPN で合意したプロトコル
    pub alpn_protocol: Option<String>,
    /// サーバー証明書チェーン (DER)
    pub peer_certificates: Vec<Vec<u8>>,
    /// SNI に使ったサーバー名
    pub server_name: String,
}

/// 接続情報
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConnectionInfo {
    /// ローカルアドレス
    pub local_addr: Option<SocketAddr>,
    /// リモートアドレス (プロキシ経由の場合はプロキシ)
    pub remote_addr: Option<SocketAddr>,
    /// TLS セッション (平文なら `None`)
    pub tls: Option<TlsInfo>,
}

/// トランスポート
#[derive(Debug)]
pub enum Transport {
    Plain(TcpStream),
    Tls {
        stream: Box<TlsStream<TcpStream>>,
        server_name: String,
    },
}

impl Transport {
    /// TLS か
    pub fn is_tls(&self) -> bool {
        matches!(self, Transport::Tls { .. })
    }

    fn tcp(&self) -> &TcpStream {
        match self {
            Transport::Plain(stream) => stream,
            Transport::Tls { stream, .. } => stream.get_ref().0,
        }
    }

    /// 接続情報を取得
    ///
    /// 取得できなかった項目は `None` のまま返す。
    pub fn info(&self) -> ConnectionInfo {
        let tcp = self.tcp();
        let tls = match self {
            Transport::Plain(_) => None,
            Transport::Tls {
                stream,
                server_name,
            } => {
                let (_, session) = stream.get_ref();
                Some(TlsInfo {
                    protocol_version: session.protocol_version().map(|v| format!("{v:?}")),
                    cipher_suite: session
                        .negotiated_cipher_suite()
                        .map(|s| format!("{:?}", s.suite())),
                    alpn_protocol: session
                        .alpn_protocol()
                        .map(|p| String::from_utf8_lossy(p).into_owned()),
                    peer_certificates: session
                        .peer_certificates()
                        .map(|certs| certs.iter().map(|c| c.as_ref().to_vec()).collect())
                        .unwrap_or_default(),
                    server_name: server_name.clone(),
                })
            }
        };
        ConnectionInfo {
            local_addr: tcp.local_addr().ok(),
            remote_addr: tcp.peer_addr().ok(),
            tls,
        }
    }

    /// TLS ハンドシェイクを行う
    ///
    /// すでに TLS の場合はそのまま返す。
    pub async fn upgrade_tls(self, host: &str, config: Arc<ClientConfig>) -> Result<Self> {
        let stream = match self {
            Transport::Tls { .. } => return Ok(self),
            Transport::Plain(stream) => stream,
        };
        let connector = TlsConnector::from(config);
        let server_name = ServerName::try_from(host.to_string())?;
        let tls_stream = connector
            .connect(server_name, stream)
            .await
            .map_err(|e| Error::Tls(e.to_string()))?;
        Ok(Transport::Tls {
            stream: Box::new(tls_stream),
            server_name: host.to_string(),
        })
    }
}

impl AsyncRead for Transport {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        match self.get_mut() {
            Transport::Plain(stream) => Pin::new(stream).poll_read(cx, buf),
            Transport::Tls { stream, .. } => Pin::new(stream.as_mut()).poll_read(cx, buf),
        }
    }
}

impl AsyncWrite for Transport {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        match self.get_mut() {
            Transport::Plain(stream) => Pin::new(stream).poll_write(cx, buf),
            Transport::Tls { stream, .. } => Pin::new(stream.as_mut()).poll_write(cx, buf),
        }
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        match self.get_mut() {
            Transport::Plain(stream) => Pin::new(stream).poll_flush(cx),
            Transport::Tls { stream, .. } => Pin::new(stream.as_mut()).poll_flush(cx),
        }
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        match self.get_mut() {
            Transport::Plain(stream) => Pin::new(stream).poll_shutdown(cx),
            Transport::Tls { stream, .. } => Pin::new(stream.as_mut()).poll_shutdown(cx),
        }
    }
}
