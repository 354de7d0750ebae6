//! プロキシの CONNECT トンネル
//!
//! プロキシへの接続上で `CONNECT host:port HTTP/1.1` を送り、
//! 200 が返れば以降の通信を宛先サーバーとの通信として扱う。

use std::sync::Arc;

use http1_engine::{ParseEvent, ParserLimits, ResponseParser, encode_connect_request};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::pool::PooledConnection;

/// CONNECT の失敗
#[derive(Debug, Clone, thiserror::Error)]
pub enum TunnelError {
    #[error("Socket went away while writing tunneling request")]
    Write(Arc<std::io::Error>),
    #[error("Unexpected response status received from proxy: {0}")]
    Status(u16),
    #[error("Malformed HTTP response received from proxy while establishing tunnel")]
    Malformed(http1_engine::Error),
    #[error("Socket went away while awaiting tunneling response")]
    Closed,
    #[error("Reading the tunneling response failed: {0}")]
    Read(Arc<std::io::Error>),
    #[error("invalid tunnel authority: {0}")]
    InvalidAuthority(String),
}

/// CONNECT トンネルを張る
#[derive(Debug, Clone, Default)]
pub struct HttpTunneler {
    limits: ParserLimits,
}

impl HttpTunneler {
    /// 接続上にトンネルを張る
    ///
    /// すでにトンネル済みの接続では何もしない。
    pub async fn tunnel(
        &self,
        connection: &mut PooledConnection,
        authority: &str,
    ) -> Result<(), TunnelError> {
        if connection.is_tunneled() {
            return Ok(());
        }
        let stream = connection.transport_mut().ok_or(TunnelError::Closed)?;
        negotiate(stream, authority, self.limits.clone()).await?;
        connection.mark_tunneled();
        tracing::debug!(
            connection_id = connection.id(),
            authority = %authority,
            "tunnel established"
        );
        Ok(())
    }
}

/// CONNECT を送り、応答を待つ
pub(crate) async fn negotiate<S>(
    stream: &mut S,
    authority: &str,
    limits: ParserLimits,
) -> Result<(), TunnelError>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let request = encode_connect_request(authority)
        .map_err(|_| TunnelError::InvalidAuthority(authority.to_string()))?;
    stream
        .write_all(&request)
        .await
        .map_err(|e| TunnelError::Write(Arc::new(e)))?;
    stream
        .flush()
        .await
        .map_err(|e| TunnelError::Write(Arc::new(e)))?;

    let mut parser = ResponseParser::for_request_method("CONNECT", limits);
    let mut buf = [0u8; 1024];
    loop {
        let n = match stream.read(&mut buf).await {
            Ok(0) => return Err(TunnelError::Closed),
            Ok(n) => n,
            Err(e) => return Err(TunnelError::Read(Arc::new(e))),
        };
        let mut input = &buf[..n];
        while let Some(event) = parser.feed(input).map_err(TunnelError::Malformed)? {
            input = b"";
            if let ParseEvent::HeadersReady { head, .. } = event {
                if head.status_code == 200 {
                    return Ok(());
                }
                return Err(TunnelError::Status(head.status_code));
            }
        }
    }
}
