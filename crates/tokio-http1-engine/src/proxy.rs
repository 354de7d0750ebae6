//! フォワードプロキシの設定
//!
//! プール作成時に渡す値。エンジン自体は環境変数を読まない。

use serde::Deserialize;

/// プロキシ設定 (`host:port` 形式の authority)
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ProxyConfig {
    /// http:// の宛先に使うプロキシ
    pub http: Option<String>,
    /// https:// の宛先に使うプロキシ
    pub https: Option<String>,
}

impl ProxyConfig {
    /// プロキシなし
    pub fn none() -> Self {
        Self::default()
    }

    /// 環境変数 `http_proxy` / `HTTP_PROXY` / `https_proxy` / `HTTPS_PROXY` から作成
    ///
    /// CGI として動作している場合 (`REQUEST_METHOD` が設定されている場合) は
    /// `Proxy` リクエストヘッダーから環境変数を注入できるので読まない。
    pub fn from_env() -> Self {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    pub(crate) fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        if lookup("REQUEST_METHOD").is_some() {
            return Self::none();
        }
        let find = |names: [&str; 2]| {
            names
                .iter()
                .filter_map(|name| lookup(name))
                .find(|value| !value.is_empty())
                .and_then(|value| proxy_authority(&value))
        };
        Self {
            http: find(["http_proxy", "HTTP_PROXY"]),
            https: find(["https_proxy", "HTTPS_PROXY"]),
        }
    }

    /// 宛先のスキームに対応するプロキシ
    pub fn for_scheme(&self, secure: bool) -> Option<&str> {
        if secure {
            self.https.as_deref()
        } else {
            self.http.as_deref()
        }
    }
}

/// `http://proxy:3128/` や `proxy:3128` から `host:port` を取り出す
pub(crate) fn proxy_authority(value: &str) -> Option<String> {
    let with_scheme = if value.contains("://") {
        value.to_string()
    } else {
        format!("http://{value}")
    };
    let url = url::Url::parse(&with_scheme).ok()?;
    let host = url.host_str()?;
    let port = url.port_or_known_default()?;
    Some(format!("{host}:{port}"))
}
