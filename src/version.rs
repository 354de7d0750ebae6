//! HTTP バージョン

use std::fmt;

/// このクレートが扱える HTTP バージョン
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Version {
    /// HTTP/1.0
    Http10,
    /// HTTP/1.1
    Http11,
}

impl Version {
    /// プロトコル番号 ("1.0" / "1.1") から変換
    pub fn from_protocol(protocol: &str) -> Option<Self> {
        match protocol {
            "1.0" => Some(Version::Http10),
            "1.1" => Some(Version::Http11),
            _ => None,
        }
    }

    /// ステータス行のバージョン文字列 ("HTTP/1.1" など) をパース
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "HTTP/1.0" => Some(Version::Http10),
            "HTTP/1.1" => Some(Version::Http11),
            _ => None,
        }
    }

    /// "HTTP/1.x" 形式の文字列
    pub fn as_str(&self) -> &'static str {
        match self {
            Version::Http10 => "HTTP/1.0",
            Version::Http11 => "HTTP/1.1",
        }
    }

    /// プロトコル番号 ("1.0" / "1.1")
    pub fn as_protocol(&self) -> &'static str {
        match self {
            Version::Http10 => "1.0",
            Version::Http11 => "1.1",
        }
    }

    /// 受け入れ可能なプロトコル番号のリストから使用するバージョンを決める
    ///
    /// 1.1 を優先し、なければ 1.0 を選ぶ。どちらも含まれない場合は `None`。
    pub fn negotiate<S: AsRef<str>>(acceptable: &[S]) -> Option<Self> {
        let offered = |v: Version| {
            acceptable
                .iter()
                .any(|p| Version::from_protocol(p.as_ref()) == Some(v))
        };
        if offered(Version::Http11) {
            Some(Version::Http11)
        } else if offered(Version::Http10) {
            Some(Version::Http10)
        } else {
            None
        }
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_negotiate_prefers_http11() {
        assert_eq!(Version::negotiate(&["1.0", "1.1"]), Some(Version::Http11));
        assert_eq!(Version::negotiate(&["1.0"]), Some(Version::Http10));
        assert_eq!(Version::negotiate(&["2", "3"]), None);
        assert_eq!(Version::negotiate::<&str>(&[]), None);
    }

    #[test]
    fn test_from_protocol() {
        assert_eq!(Version::from_protocol("1.1"), Some(Version::Http11));
        assert_eq!(Version::from_protocol("1.0"), Some(Version::Http10));
        assert_eq!(Version::from_protocol("HTTP/1.1"), None);
        assert_eq!(Version::from_protocol(" 1.1"), None);
        for version in [Version::Http10, Version::Http11] {
            assert_eq!(Version::from_protocol(version.as_protocol()), Some(version));
        }
    }

    #[test]
    fn test_parse() {
        assert_eq!(Version::parse("HTTP/1.1"), Some(Version::Http11));
        assert_eq!(Version::parse("HTTP/1.0"), Some(Version::Http10));
        assert_eq!(Version::parse("HTTP/2"), None);
        assert_eq!(Version::parse("http/1.1"), None);
    }
}
