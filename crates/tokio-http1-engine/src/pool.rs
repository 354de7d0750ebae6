//! コネクションプール
//!
//! authority (`host:port`) ごとにアイドル接続を保持する。プロキシを使う場合の
//! キーは `proxy#authority` になり、宛先ごとの接続数が分かるようにする。
//!
//! 取り出した接続は使用中として記録され、`release()` か `discard()` されるまで
//! 他の取得者に渡されない。`release()` と `discard()` は何度呼んでもよい。

use std::collections::{HashMap, HashSet};
use std::future::Future;
use std::io;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use tokio::net::TcpStream;
use url::Url;

use crate::cancel::{CancelCause, CancelSignal};
use crate::error::{Error, ProtocolError};
use crate::proxy::ProxyConfig;
use crate::transport::{ConnectionInfo, Transport};
use crate::tunnel::{HttpTunneler, TunnelError};

/// 接続処理が返す Future
pub type ConnectFuture<'a> = Pin<Box<dyn Future<Output = io::Result<TcpStream>> + Send + 'a>>;

/// TCP 接続を確立する
///
/// デフォルトは `TcpStream::connect`。
pub trait Connect: Send + Sync + 'static {
    /// `host:port` に接続する
    fn connect<'a>(&'a self, authority: &'a str) -> ConnectFuture<'a>;
}

/// `TcpStream::connect` で接続する
#[derive(Debug, Clone, Copy, Default)]
pub struct TcpConnector;

impl Connect for TcpConnector {
    fn connect<'a>(&'a self, authority: &'a str) -> ConnectFuture<'a> {
        Box::pin(async move {
            let stream = TcpStream::connect(authority).await?;
            stream.set_nodelay(true)?;
            Ok(stream)
        })
    }
}

/// 接続先
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Endpoint {
    /// ホスト名 (IPv6 の場合は角括弧付き)
    pub host: String,
    /// ポート
    pub port: u16,
    /// https か
    pub secure: bool,
}

impl Endpoint {
    /// URL から接続先を作成
    pub fn from_url(url: &Url) -> Result<Self, ProtocolError> {
        let secure = match url.scheme() {
            "http" => false,
            "https" => true,
            other => return Err(ProtocolError::UnsupportedScheme(other.to_string())),
        };
        let host = url
            .host_str()
            .ok_or_else(|| ProtocolError::InvalidUri(url.to_string()))?;
        let port = url
            .port_or_known_default()
            .ok_or_else(|| ProtocolError::InvalidUri(url.to_string()))?;
        Ok(Self {
            host: host.to_string(),
            port,
            secure,
        })
    }

    /// `host:port`
    pub fn authority(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// TLS の SNI に使う名前 (IPv6 の角括弧を外す)
    pub fn server_name(&self) -> &str {
        self.host.trim_start_matches('[').trim_end_matches(']')
    }
}

/// プールの設定
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PoolConfig {
    /// アイドル接続を保持する時間 (`None` は無期限)
    pub idle_timeout: Option<Duration>,
    /// キーごとに保持するアイドル接続の最大数
    pub max_idle_per_key: usize,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            idle_timeout: Some(Duration::from_secs(90)),
            max_idle_per_key: 8,
        }
    }
}

/// 接続の取得に失敗した
#[derive(Debug, thiserror::Error)]
pub enum AcquireError {
    #[error("Connection to '{authority}' failed: {source}")]
    Connect {
        authority: String,
        source: io::Error,
    },
    #[error("connection acquisition was aborted: {0:?}")]
    Cancelled(CancelCause),
    #[error("Proxy CONNECT failed: {0}")]
    Tunnel(#[from] TunnelError),
}

impl AcquireError {
    /// リクエストのエラーに変換 (`target` はタイムアウトのメッセージに使う)
    pub(crate) fn into_error(self, target: &str) -> Error {
        match self {
            AcquireError::Connect { authority, source } => Error::Connect {
                authority,
                source: Arc::new(source),
            },
            AcquireError::Cancelled(cause) => Error::from_cancel(&cause, target),
            AcquireError::Tunnel(e) => Error::Tunnel(e),
        }
    }
}

/// プールから取り出した接続
#[derive(Debug)]
pub struct PooledConnection {
    id: u64,
    key: String,
    transport: Option<Transport>,
    tunneled: bool,
    reused: bool,
    closed: bool,
}

impl PooledConnection {
    fn new(id: u64, key: String, transport: Transport) -> Self {
        Self {
            id,
            key,
            transport: Some(transport),
            tunneled: false,
            reused: false,
            closed: false,
        }
    }

    /// プール内で一意な ID
    pub fn id(&self) -> u64 {
        self.id
    }

    /// プールのキー
    pub fn key(&self) -> &str {
        &self.key
    }

    /// アイドル接続を再利用したものか
    pub fn is_reused(&self) -> bool {
        self.reused
    }

    /// トンネル済みか
    pub fn is_tunneled(&self) -> bool {
        self.tunneled
    }

    pub(crate) fn mark_tunneled(&mut self) {
        self.tunneled = true;
    }

    /// この接続を再利用しない (release されても破棄する)
    pub fn mark_closed(&mut self) {
        self.closed = true;
    }

    /// release / discard 済みか
    pub fn is_detached(&self) -> bool {
        self.transport.is_none()
    }

    /// トランスポート (破棄済みなら `None`)
    pub fn transport_mut(&mut self) -> Option<&mut Transport> {
        self.transport.as_mut()
    }

    /// 接続情報
    pub fn info(&self) -> ConnectionInfo {
        self.transport
            .as_ref()
            .map(Transport::info)
            .unwrap_or_default()
    }

    /// TLS ハンドシェイクを行う (TLS 済みなら何もしない)
    ///
    /// 失敗した場合、接続は失われる。
    pub(crate) async fn upgrade_tls(
        &mut self,
        host: &str,
        config: Arc<rustls::ClientConfig>,
    ) -> crate::error::Result<()> {
        let transport = self.transport.take().ok_or_else(|| {
            Error::from(io::Error::new(
                io::ErrorKind::NotConnected,
                "connection already released",
            ))
        })?;
        self.transport = Some(transport.upgrade_tls(host, config).await?);
        Ok(())
    }
}

struct IdleConnection {
    id: u64,
    transport: Transport,
    tunneled: bool,
    since: Instant,
}

#[derive(Default)]
struct PoolState {
    idle: HashMap<String, Vec<IdleConnection>>,
    in_use: HashSet<u64>,
}

/// コネクションプール
pub struct ConnectionPool {
    connector: Arc<dyn Connect>,
    proxy: ProxyConfig,
    config: PoolConfig,
    tunneler: HttpTunneler,
    state: Mutex<PoolState>,
    next_id: AtomicU64,
}

impl std::fmt::Debug for ConnectionPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionPool")
            .field("proxy", &self.proxy)
            .field("config", &self.config)
            .finish()
    }
}

impl Default for ConnectionPool {
    fn default() -> Self {
        Self::new(ProxyConfig::none(), PoolConfig::default())
    }
}

impl ConnectionPool {
    /// 新しいプールを作成
    pub fn new(proxy: ProxyConfig, config: PoolConfig) -> Self {
        Self::with_connector(TcpConnector, proxy, config)
    }

    /// 接続処理を指定してプールを作成
    pub fn with_connector<C: Connect>(connector: C, proxy: ProxyConfig, config: PoolConfig) -> Self {
        Self {
            connector: Arc::new(connector),
            proxy,
            config,
            tunneler: HttpTunneler::default(),
            state: Mutex::new(PoolState::default()),
            next_id: AtomicU64::new(1),
        }
    }

    /// プロキシ設定
    pub fn proxy(&self) -> &ProxyConfig {
        &self.proxy
    }

    fn state(&self) -> MutexGuard<'_, PoolState> {
        // 保持している状態は常に整合しているので、poison は無視する
        self.state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// 接続先のプールキー
    pub fn key_for(&self, endpoint: &Endpoint) -> String {
        let authority = endpoint.authority();
        match self.proxy.for_scheme(endpoint.secure) {
            Some(proxy) => format!("{proxy}#{authority}"),
            None => authority,
        }
    }

    /// 接続を取得する
    ///
    /// アイドル接続があれば再利用し、無ければ新しく接続する。
    /// プロキシを使う場合は CONNECT でトンネルを張る。
    /// `signal` が発火した場合は `AcquireError::Cancelled` を返す。
    pub async fn acquire(
        &self,
        endpoint: &Endpoint,
        signal: &CancelSignal,
    ) -> Result<PooledConnection, AcquireError> {
        if let Some(cause) = signal.cause() {
            return Err(AcquireError::Cancelled(cause));
        }

        let key = self.key_for(endpoint);
        if let Some(connection) = self.take_idle(&key) {
            tracing::debug!(connection_id = connection.id, key = %key, "reusing idle connection");
            return Ok(connection);
        }

        let authority = endpoint.authority();
        let proxy = self.proxy.for_scheme(endpoint.secure);
        let open = async {
            let target = proxy.unwrap_or(&authority);
            let stream = self
                .connector
                .connect(target)
                .await
                .map_err(|source| AcquireError::Connect {
                    authority: target.to_string(),
                    source,
                })?;
            let id = self.next_id.fetch_add(1, Ordering::Relaxed);
            let mut connection = PooledConnection::new(id, key.clone(), Transport::Plain(stream));
            if proxy.is_some() {
                self.tunneler.tunnel(&mut connection, &authority).await?;
            }
            Ok::<_, AcquireError>(connection)
        };

        let connection = tokio::select! {
            biased;
            cause = signal.cancelled() => return Err(AcquireError::Cancelled(cause)),
            result = open => result?,
        };
        self.state().in_use.insert(connection.id);
        tracing::debug!(connection_id = connection.id, key = %key, "opened connection");
        Ok(connection)
    }

    fn take_idle(&self, key: &str) -> Option<PooledConnection> {
        let mut state = self.state();
        let entries = state.idle.get_mut(key)?;
        let mut found = None;
        while let Some(entry) = entries.pop() {
            let expired = self
                .config
                .idle_timeout
                .is_some_and(|timeout| entry.since.elapsed() >= timeout);
            if expired || !is_alive(&entry.transport) {
                tracing::debug!(connection_id = entry.id, key = %key, "dropping stale idle connection");
                continue;
            }
            found = Some(entry);
            break;
        }
        if entries.is_empty() {
            state.idle.remove(key);
        }
        let entry = found?;
        state.in_use.insert(entry.id);
        Some(PooledConnection {
            id: entry.id,
            key: key.to_string(),
            transport: Some(entry.transport),
            tunneled: entry.tunneled,
            reused: true,
            closed: false,
        })
    }

    /// 接続をプールに戻す
    ///
    /// 閉じている接続や再利用しない接続は破棄する。
    pub fn release(&self, connection: &mut PooledConnection) {
        let Some(transport) = connection.transport.take() else {
            return;
        };
        let mut state = self.state();
        state.in_use.remove(&connection.id);
        if connection.closed || !is_alive(&transport) {
            tracing::debug!(connection_id = connection.id, "discarding closed connection on release");
            return;
        }
        let entries = state.idle.entry(connection.key.clone()).or_default();
        if entries.len() >= self.config.max_idle_per_key {
            tracing::debug!(connection_id = connection.id, "idle limit reached, closing connection");
            return;
        }
        entries.push(IdleConnection {
            id: connection.id,
            transport,
            tunneled: connection.tunneled,
            since: Instant::now(),
        });
        tracing::debug!(connection_id = connection.id, key = %connection.key, "connection released");
    }

    /// 接続を閉じて破棄する
    pub fn discard(&self, connection: &mut PooledConnection) {
        let transport = connection.transport.take();
        self.state().in_use.remove(&connection.id);
        if transport.is_some() {
            tracing::debug!(connection_id = connection.id, "connection discarded");
        }
    }

    /// 使用中の接続数
    pub fn in_use_count(&self) -> usize {
        self.state().in_use.len()
    }

    /// 使用中か
    pub fn is_in_use(&self, id: u64) -> bool {
        self.state().in_use.contains(&id)
    }

    /// キーごとのアイドル接続数
    pub fn idle_count(&self, key: &str) -> usize {
        self.state().idle.get(key).map_or(0, Vec::len)
    }
}

/// アイドル接続がまだ使えるか
///
/// 読めるデータがある (EOF を含む) 接続は使えないとみなす。
fn is_alive(transport: &Transport) -> bool {
    let tcp = match transport {
        Transport::Plain(stream) => stream,
        Transport::Tls { stream, .. } => stream.get_ref().0,
    };
    let mut probe = [0u8; 1];
    matches!(tcp.try_read(&mut probe), Err(e) if e.kind() == io::ErrorKind::WouldBlock)
}

#[cfg(test)]
mod tests {
    use tokio::net::TcpListener;

    use super::*;
    use crate::cancel::CancelSource;

    async fn listener() -> (Endpoint, tokio::task::JoinHandle<Vec<TcpStream>>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let handle = tokio::spawn(async move {
            let mut sockets = Vec::new();
            while let Ok(Ok((socket, _))) =
                tokio::time::timeout(Duration::from_millis(500), listener.accept()).await
            {
                sockets.push(socket);
            }
            sockets
        });
        (
            Endpoint {
                host: "127.0.0.1".to_string(),
                port,
                secure: false,
            },
            handle,
        )
    }

    struct NeverConnect;

    impl Connect for NeverConnect {
        fn connect<'a>(&'a self, _authority: &'a str) -> ConnectFuture<'a> {
            Box::pin(std::future::pending())
        }
    }

    #[test]
    fn test_endpoint_from_url() {
        let url = Url::parse("https://example.com/path").unwrap();
        let endpoint = Endpoint::from_url(&url).unwrap();
        assert_eq!(endpoint.authority(), "example.com:443");
        assert!(endpoint.secure);

        let url = Url::parse("http://[::1]:8080/").unwrap();
        let endpoint = Endpoint::from_url(&url).unwrap();
        assert_eq!(endpoint.authority(), "[::1]:8080");
        assert_eq!(endpoint.server_name(), "::1");

        let url = Url::parse("ftp://example.com/").unwrap();
        assert!(matches!(
            Endpoint::from_url(&url),
            Err(ProtocolError::UnsupportedScheme(_))
        ));
    }

    #[test]
    fn test_key_with_proxy() {
        let pool = ConnectionPool::new(
            ProxyConfig {
                http: None,
                https: Some("proxy:3128".to_string()),
            },
            PoolConfig::default(),
        );
        let secure = Endpoint {
            host: "example.com".to_string(),
            port: 443,
            secure: true,
        };
        let plain = Endpoint {
            secure: false,
            port: 80,
            ..secure.clone()
        };
        assert_eq!(pool.key_for(&secure), "proxy:3128#example.com:443");
        assert_eq!(pool.key_for(&plain), "example.com:80");
    }

    #[tokio::test]
    async fn test_reuse_after_release() {
        let (endpoint, server) = listener().await;
        let pool = ConnectionPool::default();
        let signal = CancelSignal::never();

        let mut first = pool.acquire(&endpoint, &signal).await.unwrap();
        assert!(!first.is_reused());
        assert!(pool.is_in_use(first.id()));
        let id = first.id();
        pool.release(&mut first);
        assert_eq!(pool.in_use_count(), 0);
        assert_eq!(pool.idle_count(&endpoint.authority()), 1);

        let mut second = pool.acquire(&endpoint, &signal).await.unwrap();
        assert_eq!(second.id(), id);
        assert!(second.is_reused());
        pool.discard(&mut second);
        drop(server);
    }

    #[tokio::test]
    async fn test_concurrent_acquire_gets_distinct_connections() {
        let (endpoint, server) = listener().await;
        let pool = ConnectionPool::default();
        let signal = CancelSignal::never();

        let mut a = pool.acquire(&endpoint, &signal).await.unwrap();
        let mut b = pool.acquire(&endpoint, &signal).await.unwrap();
        assert_ne!(a.id(), b.id());
        assert_eq!(pool.in_use_count(), 2);
        pool.release(&mut a);
        pool.release(&mut b);
        assert_eq!(pool.idle_count(&endpoint.authority()), 2);
        drop(server);
    }

    #[tokio::test]
    async fn test_release_and_discard_are_idempotent() {
        let (endpoint, server) = listener().await;
        let pool = ConnectionPool::default();
        let mut connection = pool.acquire(&endpoint, &CancelSignal::never()).await.unwrap();

        pool.release(&mut connection);
        pool.release(&mut connection);
        pool.discard(&mut connection);
        assert!(connection.is_detached());
        assert_eq!(pool.idle_count(&endpoint.authority()), 1);

        let mut reused = pool.acquire(&endpoint, &CancelSignal::never()).await.unwrap();
        pool.discard(&mut reused);
        pool.discard(&mut reused);
        pool.release(&mut reused);
        assert_eq!(pool.idle_count(&endpoint.authority()), 0);
        assert_eq!(pool.in_use_count(), 0);
        drop(server);
    }

    #[tokio::test]
    async fn test_closed_connection_not_pooled() {
        let (endpoint, server) = listener().await;
        let pool = ConnectionPool::default();
        let mut connection = pool.acquire(&endpoint, &CancelSignal::never()).await.unwrap();
        connection.mark_closed();
        pool.release(&mut connection);
        assert_eq!(pool.idle_count(&endpoint.authority()), 0);
        drop(server);
    }

    #[tokio::test]
    async fn test_peer_closed_idle_connection_skipped() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let endpoint = Endpoint {
            host: "127.0.0.1".to_string(),
            port,
            secure: false,
        };
        let pool = ConnectionPool::default();

        let mut connection = pool.acquire(&endpoint, &CancelSignal::never()).await.unwrap();
        let (socket, _) = listener.accept().await.unwrap();
        let first_id = connection.id();
        pool.release(&mut connection);
        drop(socket);
        tokio::time::sleep(Duration::from_millis(50)).await;

        let accept = tokio::spawn(async move { listener.accept().await.map(|(s, _)| s) });
        let mut next = pool.acquire(&endpoint, &CancelSignal::never()).await.unwrap();
        assert_ne!(next.id(), first_id);
        assert!(!next.is_reused());
        pool.discard(&mut next);
        drop(accept);
    }

    #[tokio::test]
    async fn test_max_idle_per_key() {
        let (endpoint, server) = listener().await;
        let pool = ConnectionPool::new(
            ProxyConfig::none(),
            PoolConfig {
                idle_timeout: None,
                max_idle_per_key: 1,
            },
        );
        let signal = CancelSignal::never();
        let mut a = pool.acquire(&endpoint, &signal).await.unwrap();
        let mut b = pool.acquire(&endpoint, &signal).await.unwrap();
        pool.release(&mut a);
        pool.release(&mut b);
        assert_eq!(pool.idle_count(&endpoint.authority()), 1);
        drop(server);
    }

    #[tokio::test]
    async fn test_cancelled_while_connecting() {
        let pool =
            ConnectionPool::with_connector(NeverConnect, ProxyConfig::none(), PoolConfig::default());
        let endpoint = Endpoint {
            host: "example.com".to_string(),
            port: 80,
            secure: false,
        };
        let source = CancelSource::new();
        let signal = source.signal();
        let canceller = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            source.cancel();
        });
        let err = pool.acquire(&endpoint, &signal).await.unwrap_err();
        assert!(matches!(err, AcquireError::Cancelled(CancelCause::Cancelled)));
        assert_eq!(pool.in_use_count(), 0);
        canceller.await.unwrap();
    }

    #[tokio::test]
    async fn test_connect_failure() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);
        let endpoint = Endpoint {
            host: "127.0.0.1".to_string(),
            port,
            secure: false,
        };
        let err = ConnectionPool::default()
            .acquire(&endpoint, &CancelSignal::never())
            .await
            .unwrap_err();
        assert!(matches!(err, AcquireError::Connect { .. }));
        assert_eq!(
            err.into_error("http://127.0.0.1/").kind(),
            crate::error::ErrorKind::Socket
        );
    }
}
