//! HTTP/HTTPS クライアント
//!
//! コネクションプールを共有し、リクエストごとにリクエストサイクルを起動する。
//! リダイレクトをたどる場合は 1 回ごとに新しいサイクルになる。
//!
//! ## 使い方
//!
//! ```ignore
//! use tokio_http1_engine::Client;
//!
//! // GET
//! let client = Client::new();
//! let response = client.get("http://example.com/path").await?;
//! let text = response.body.text().await?;
//!
//! // ヘッダーとボディ
//! let response = client.post("http://example.com/api")
//!     .header("Content-Type", "application/json")
//!     .body("{\"key\": \"value\"}")
//!     .await?;
//!
//! // キャンセル
//! let source = CancelSource::new();
//! let future = client.get("http://example.com/slow").cancel_signal(source.signal());
//! ```

use std::future::IntoFuture;
use std::pin::Pin;
use std::sync::Arc;

use rustls::ClientConfig;
use url::Url;

use crate::body::RequestBody;
use crate::cancel::CancelSignal;
use crate::channel::Body;
use crate::cycle::{self, CycleContext};
use crate::error::{Error, Result};
use crate::options::{ClientOptions, RequestOptions};
use crate::pool::{ConnectionPool, PoolConfig};
use crate::proxy::ProxyConfig;
use crate::request::Request;
use crate::response::Response;
use crate::transport::default_tls_config;

/// HTTP クライアント
///
/// `Clone` してもコネクションプールは共有される。
#[derive(Debug, Clone)]
pub struct Client {
    pool: Arc<ConnectionPool>,
    options: ClientOptions,
    tls_config: Option<Arc<ClientConfig>>,
}

impl Default for Client {
    fn default() -> Self {
        Self::new()
    }
}

impl Client {
    /// デフォルト設定のクライアントを作成 (プロキシなし)
    pub fn new() -> Self {
        Self::with_pool(Arc::new(ConnectionPool::new(
            ProxyConfig::none(),
            PoolConfig::default(),
        )))
    }

    /// プールを指定してクライアントを作成
    pub fn with_pool(pool: Arc<ConnectionPool>) -> Self {
        Self {
            pool,
            options: ClientOptions::default(),
            tls_config: None,
        }
    }

    /// 設定を指定 (検証に失敗した場合はエラー)
    pub fn options(mut self, options: ClientOptions) -> Result<Self> {
        options.validate()?;
        self.options = options;
        Ok(self)
    }

    /// TLS 設定を指定
    ///
    /// 指定しない場合は OS のルート証明書ストアを使用する。
    pub fn tls_config(mut self, config: Arc<ClientConfig>) -> Self {
        self.tls_config = Some(config);
        self
    }

    /// コネクションプール
    pub fn pool(&self) -> &Arc<ConnectionPool> {
        &self.pool
    }

    /// 現在の設定
    pub fn client_options(&self) -> &ClientOptions {
        &self.options
    }

    /// GET リクエストを作成
    pub fn get(&self, url: &str) -> RequestBuilder<'_> {
        self.request("GET", url)
    }

    /// POST リクエストを作成
    pub fn post(&self, url: &str) -> RequestBuilder<'_> {
        self.request("POST", url)
    }

    /// PUT リクエストを作成
    pub fn put(&self, url: &str) -> RequestBuilder<'_> {
        self.request("PUT", url)
    }

    /// DELETE リクエストを作成
    pub fn delete(&self, url: &str) -> RequestBuilder<'_> {
        self.request("DELETE", url)
    }

    /// HEAD リクエストを作成
    pub fn head(&self, url: &str) -> RequestBuilder<'_> {
        self.request("HEAD", url)
    }

    /// PATCH リクエストを作成
    pub fn patch(&self, url: &str) -> RequestBuilder<'_> {
        self.request("PATCH", url)
    }

    /// 任意のメソッドでリクエストを作成
    pub fn request(&self, method: &str, url: &str) -> RequestBuilder<'_> {
        RequestBuilder {
            client: self,
            request: Request::new(method, url),
            options: RequestOptions::default(),
            signal: CancelSignal::never(),
        }
    }

    /// リクエストを送信する
    ///
    /// ヘッダーを受信した時点で返る。ボディは `Response::body` から読む。
    /// `signal` が発火するとどの段階でも中断し、受信中のボディも失敗する。
    pub async fn send(
        &self,
        request: Request,
        overrides: &RequestOptions,
        signal: CancelSignal,
    ) -> Result<Response> {
        let options = self.options.merge(overrides)?;
        let context = CycleContext {
            pool: self.pool.clone(),
            tls_config: self.tls_config.clone().unwrap_or_else(default_tls_config),
        };

        let mut request = request;
        let mut previous: Option<Response> = None;
        let mut redirects = 0u32;
        loop {
            let mut response =
                cycle::dispatch(context.clone(), request.clone(), &options, signal.clone()).await?;
            response.previous = previous.take().map(Box::new);

            if options.max_redirects == 0 {
                return Ok(response);
            }
            let Some(next) = redirect_request(&response, &options) else {
                return Ok(response);
            };
            if redirects >= options.max_redirects {
                return Err(Error::TooManyRedirects {
                    max: options.max_redirects,
                });
            }
            redirects += 1;
            tracing::debug!(
                status = response.status,
                from = %response.request.uri(),
                to = %next.uri(),
                "following redirect"
            );

            // 接続をプールに戻すため、前のボディは読み捨てる
            let body = std::mem::replace(&mut response.body, Body::empty());
            if let Err(e) = body.bytes().await {
                tracing::debug!(error = %e, "failed to drain redirect body");
            }

            request = next;
            previous = Some(response);
        }
    }
}

/// リダイレクト先へのリクエストを作る
///
/// リダイレクトしない応答や Location が解釈できない場合は `None`。
fn redirect_request(response: &Response, options: &ClientOptions) -> Option<Request> {
    if !matches!(response.status, 301 | 302 | 303 | 307 | 308) {
        return None;
    }
    let location = response.headers.get("Location")?;
    let from = response.request.uri();
    let mut to = from.join(location).ok()?;
    if !matches!(to.scheme(), "http" | "https") {
        return None;
    }
    to.set_fragment(None);

    let mut request = response.request.clone().with_uri(to.clone());
    let method = request.method().to_ascii_uppercase();
    let to_get = match response.status {
        303 => method != "HEAD",
        301 | 302 => method != "GET" && method != "HEAD",
        _ => false,
    };
    if to_get {
        request = request
            .with_method("GET")
            .with_body(RequestBody::Empty)
            .without_header("Content-Length")
            .without_header("Transfer-Encoding")
            .without_header("Content-Type");
    }

    if from.host_str() != to.host_str() || from.port_or_known_default() != to.port_or_known_default()
    {
        request = request
            .without_header("Host")
            .without_header("Authorization")
            .without_header("Cookie");
    }

    request = request.without_header("Referer");
    if options.auto_referer && !(from.scheme() == "https" && to.scheme() == "http") {
        let mut referer = from.clone();
        referer.set_fragment(None);
        let _ = referer.set_username("");
        let _ = referer.set_password(None);
        if let Ok(with_referer) = request.clone().with_header("Referer", referer.as_str()) {
            request = with_referer;
        }
    }
    Some(request)
}

/// リクエストビルダー
///
/// Client のメソッド (get, post など) から取得し、ヘッダーやボディを追加してから
/// `.await` でリクエストを送信する。
pub struct RequestBuilder<'a> {
    client: &'a Client,
    request: Result<Request>,
    options: RequestOptions,
    signal: CancelSignal,
}

impl<'a> RequestBuilder<'a> {
    /// ヘッダーを追加
    ///
    /// 不正なヘッダーは送信時にエラーになる。
    pub fn header(mut self, name: &str, value: &str) -> Self {
        self.request = self.request.and_then(|r| r.with_header(name, value));
        self
    }

    /// クエリパラメータを追加
    ///
    /// ```ignore
    /// let response = client.get("https://api.example.com/users")
    ///     .query([("page", "1"), ("limit", "10")])
    ///     .await?;
    /// // -> GET /users?page=1&limit=10
    /// ```
    pub fn query<I, K, V>(mut self, params: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: AsRef<str>,
    {
        self.request = self.request.map(|r| {
            let mut url: Url = r.uri().clone();
            url.query_pairs_mut().extend_pairs(params);
            r.with_uri(url)
        });
        self
    }

    /// ボディを設定
    pub fn body(mut self, body: impl Into<RequestBody>) -> Self {
        let body = body.into();
        self.request = self.request.map(|r| r.with_body(body));
        self
    }

    /// 送信を許可するプロトコルバージョンを指定
    pub fn protocol_versions<I, S>(mut self, versions: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.request = self.request.map(|r| r.with_protocol_versions(versions));
        self
    }

    /// このリクエストだけの設定
    pub fn options(mut self, options: RequestOptions) -> Self {
        self.options = options;
        self
    }

    /// キャンセルシグナルを指定
    pub fn cancel_signal(mut self, signal: CancelSignal) -> Self {
        self.signal = signal;
        self
    }

    /// リクエストを送信
    async fn send(self) -> Result<Response> {
        let request = self.request?;
        self.client.send(request, &self.options, self.signal).await
    }
}

impl<'a> IntoFuture for RequestBuilder<'a> {
    type Output = Result<Response>;
    type IntoFuture = Pin<Box<dyn std::future::Future<Output = Self::Output> + Send + 'a>>;

    fn into_future(self) -> Self::IntoFuture {
        Box::pin(self.send())
    }
}
