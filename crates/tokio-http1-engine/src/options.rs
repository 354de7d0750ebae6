//! クライアントの設定
//!
//! TOML から読み込める。未知のキーと負の値は読み込み時に拒否する。
//!
//! ```toml
//! transfer-timeout-ms = 5000
//! max-redirects = 3
//! default-headers = [["User-Agent", "my-app/1.0"]]
//! ```

use std::time::Duration;

use http1_engine::{Headers, ParserLimits};
use serde::Deserialize;

use crate::error::{Error, Result};

/// クライアントの設定
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields, rename_all = "kebab-case")]
pub struct ClientOptions {
    /// 転送全体のタイムアウト (ミリ秒, 0 は無効)
    pub transfer_timeout_ms: u64,
    /// リダイレクトをたどる最大回数 (0 はたどらない)
    pub max_redirects: u32,
    /// リダイレクト時に Referer を付ける
    pub auto_referer: bool,
    /// ボディを読まずに捨てる
    pub discard_body: bool,
    /// すべてのリクエストに付けるヘッダー (リクエスト側にあればそちらを使う)
    pub default_headers: Vec<(String, String)>,
    /// ステータス行とヘッダーの最大バイト数 (0 は無制限)
    pub max_header_bytes: usize,
    /// ボディの最大バイト数 (0 は無制限)
    pub max_body_bytes: u64,
}

impl Default for ClientOptions {
    fn default() -> Self {
        Self {
            transfer_timeout_ms: 15_000,
            max_redirects: 5,
            auto_referer: true,
            discard_body: false,
            default_headers: Vec::new(),
            max_header_bytes: 8 * 1024,
            max_body_bytes: 10 * 1024 * 1024,
        }
    }
}

/// リクエストごとの設定 (指定した項目だけ上書きする)
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields, rename_all = "kebab-case")]
pub struct RequestOptions {
    pub transfer_timeout_ms: Option<u64>,
    pub max_redirects: Option<u32>,
    pub auto_referer: Option<bool>,
    pub discard_body: Option<bool>,
    pub default_headers: Option<Vec<(String, String)>>,
    pub max_header_bytes: Option<usize>,
    pub max_body_bytes: Option<u64>,
}

impl ClientOptions {
    /// TOML 文字列から読み込む
    pub fn from_toml_str(s: &str) -> Result<Self> {
        let options: Self = toml::from_str(s).map_err(|e| Error::InvalidOption(e.to_string()))?;
        options.validate()?;
        Ok(options)
    }

    /// 値を検証する
    pub fn validate(&self) -> Result<()> {
        self.headers()?;
        Ok(())
    }

    /// デフォルトヘッダー
    ///
    /// リクエストのヘッダーと同じ検証を行う。
    pub fn headers(&self) -> Result<Headers> {
        Headers::try_from_pairs(
            self.default_headers
                .iter()
                .map(|(name, value)| (name.as_str(), value.as_str())),
        )
        .map_err(|e| Error::InvalidOption(format!("default-headers: {e}")))
    }

    /// リクエストごとの設定を重ねた設定
    pub fn merge(&self, overrides: &RequestOptions) -> Result<Self> {
        let merged = Self {
            transfer_timeout_ms: overrides
                .transfer_timeout_ms
                .unwrap_or(self.transfer_timeout_ms),
            max_redirects: overrides.max_redirects.unwrap_or(self.max_redirects),
            auto_referer: overrides.auto_referer.unwrap_or(self.auto_referer),
            discard_body: overrides.discard_body.unwrap_or(self.discard_body),
            default_headers: overrides
                .default_headers
                .clone()
                .unwrap_or_else(|| self.default_headers.clone()),
            max_header_bytes: overrides.max_header_bytes.unwrap_or(self.max_header_bytes),
            max_body_bytes: overrides.max_body_bytes.unwrap_or(self.max_body_bytes),
        };
        merged.validate()?;
        Ok(merged)
    }

    /// 転送タイムアウト (無効なら `None`)
    pub fn transfer_timeout(&self) -> Option<Duration> {
        (self.transfer_timeout_ms > 0).then(|| Duration::from_millis(self.transfer_timeout_ms))
    }

    /// パーサーの制限
    pub fn parser_limits(&self) -> ParserLimits {
        ParserLimits {
            max_header_bytes: self.max_header_bytes,
            max_body_bytes: self.max_body_bytes,
            ..ParserLimits::default()
        }
    }
}

impl RequestOptions {
    /// TOML 文字列から読み込む
    pub fn from_toml_str(s: &str) -> Result<Self> {
        toml::from_str(s).map_err(|e| Error::InvalidOption(e.to_string()))
    }
}
