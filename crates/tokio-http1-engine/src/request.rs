//! リクエスト
//!
//! `Request` は値として扱い、変更は `with_*` で新しい値を作る。
//! リダイレクトや再送で同じリクエストを何度でも送れる。

use http1_engine::Headers;
use url::Url;

use crate::body::RequestBody;
use crate::error::{ProtocolError, Result};

/// HTTP リクエスト
#[derive(Debug, Clone)]
pub struct Request {
    method: String,
    uri: Url,
    protocol_versions: Vec<String>,
    headers: Headers,
    body: RequestBody,
}

impl Request {
    /// URI 文字列からリクエストを作成
    pub fn new(method: &str, uri: &str) -> Result<Self> {
        let uri = Url::parse(uri).map_err(|e| ProtocolError::InvalidUri(format!("{uri}: {e}")))?;
        Ok(Self::from_url(method, uri))
    }

    /// パース済みの URI からリクエストを作成
    pub fn from_url(method: &str, uri: Url) -> Self {
        Self {
            method: method.to_string(),
            uri,
            protocol_versions: vec!["1.1".to_string(), "1.0".to_string()],
            headers: Headers::new(),
            body: RequestBody::Empty,
        }
    }

    /// HTTP メソッド
    pub fn method(&self) -> &str {
        &self.method
    }

    /// リクエスト URI
    pub fn uri(&self) -> &Url {
        &self.uri
    }

    /// 送信を許可するプロトコルバージョン ("1.1", "1.0")
    pub fn protocol_versions(&self) -> &[String] {
        &self.protocol_versions
    }

    /// ヘッダー
    pub fn headers(&self) -> &Headers {
        &self.headers
    }

    /// ボディ
    pub fn body(&self) -> &RequestBody {
        &self.body
    }

    pub fn with_method(mut self, method: &str) -> Self {
        self.method = method.to_string();
        self
    }

    pub fn with_uri(mut self, uri: Url) -> Self {
        self.uri = uri;
        self
    }

    pub fn with_protocol_versions<I, S>(mut self, versions: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.protocol_versions = versions.into_iter().map(Into::into).collect();
        self
    }

    /// ヘッダーを追加
    ///
    /// 名前や値に改行などの不正な文字を含む場合はエラー。
    pub fn with_header(mut self, name: &str, value: &str) -> Result<Self> {
        self.headers.append(name, value)?;
        Ok(self)
    }

    /// 同名のヘッダーを置き換える
    pub fn with_replaced_header(mut self, name: &str, value: &str) -> Result<Self> {
        self.headers.set(name, value)?;
        Ok(self)
    }

    /// ヘッダーをまとめて置き換える
    pub fn with_headers(mut self, headers: Headers) -> Self {
        self.headers = headers;
        self
    }

    /// ヘッダーを削除
    pub fn without_header(mut self, name: &str) -> Self {
        self.headers.remove(name);
        self
    }

    pub fn with_body(mut self, body: impl Into<RequestBody>) -> Self {
        self.body = body.into();
        self
    }

    /// リクエスト行に書くターゲット (origin-form)
    pub(crate) fn target(&self) -> String {
        let mut target = self.uri.path().to_string();
        if target.is_empty() {
            target.push('/');
        }
        if let Some(query) = self.uri.query() {
            target.push('?');
            target.push_str(query);
        }
        target
    }

    /// Host ヘッダーの値 (既定ポートは省略する)
    pub(crate) fn host_header(&self) -> Option<String> {
        let host = self.uri.host_str()?;
        Some(match self.uri.port() {
            Some(port) => format!("{host}:{port}"),
            None => host.to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;

    #[test]
    fn test_defaults() {
        let request = Request::new("GET", "http://example.com").unwrap();
        assert_eq!(request.method(), "GET");
        assert_eq!(request.protocol_versions(), ["1.1", "1.0"]);
        assert_eq!(request.target(), "/");
        assert_eq!(request.host_header().as_deref(), Some("example.com"));
        assert!(request.body().is_empty());
    }

    #[test]
    fn test_target_and_host() {
        let request = Request::new("GET", "https://example.com:8443/a/b?x=1&y=2#frag").unwrap();
        assert_eq!(request.target(), "/a/b?x=1&y=2");
        assert_eq!(request.host_header().as_deref(), Some("example.com:8443"));

        let request = Request::new("GET", "http://example.com:80/").unwrap();
        assert_eq!(request.host_header().as_deref(), Some("example.com"));
    }

    #[test]
    fn test_with_returns_new_value() {
        let original = Request::new("GET", "http://example.com/").unwrap();
        let changed = original
            .clone()
            .with_method("POST")
            .with_header("X-A", "1")
            .unwrap()
            .with_body("data");
        assert_eq!(original.method(), "GET");
        assert!(original.headers().is_empty());
        assert_eq!(changed.method(), "POST");
        assert_eq!(changed.headers().get("x-a"), Some("1"));

        let replaced = changed.with_replaced_header("x-a", "2").unwrap();
        assert_eq!(replaced.headers().get_all("X-A"), vec!["2"]);
        assert!(replaced.without_header("X-A").headers().is_empty());
    }

    #[test]
    fn test_header_injection_rejected() {
        let result = Request::new("GET", "http://example.com/")
            .unwrap()
            .with_header("X-A", "a\r\nInjected: yes");
        assert!(matches!(
            result,
            Err(Error::Protocol(ProtocolError::HeaderInjection(_)))
        ));
    }

    #[test]
    fn test_invalid_uri() {
        assert!(matches!(
            Request::new("GET", "not a uri"),
            Err(Error::Protocol(ProtocolError::InvalidUri(_)))
        ));
    }
}
