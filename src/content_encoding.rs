//! Content-Encoding ヘッダーの解釈 (RFC 9110 Section 8.4)
//!
//! レスポンスボディに適用されたコーディングを列挙し、
//! クライアントが外せるものを末尾 (最後に適用されたもの) から順に取り出す。
//!
//! ```rust
//! use http1_engine::{ContentCoding, ContentEncoding, Headers};
//!
//! let mut headers = Headers::new();
//! headers.append("Content-Encoding", "br, gzip").unwrap();
//!
//! let ce = ContentEncoding::from_headers(&headers).unwrap().unwrap();
//! let (decode, rest) = ce.split_decodable(&[ContentCoding::Gzip]);
//! assert_eq!(decode, vec![ContentCoding::Gzip]);
//! assert_eq!(rest.unwrap().to_string(), "br");
//! ```

use core::fmt;

use crate::headers::{Headers, is_token_char};

/// Content-Encoding パースエラー
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ContentEncodingError {
    /// 空の入力
    Empty,
    /// 不正なエンコーディングトークン
    InvalidEncoding,
}

impl fmt::Display for ContentEncodingError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ContentEncodingError::Empty => write!(f, "empty Content-Encoding"),
            ContentEncodingError::InvalidEncoding => {
                write!(f, "invalid Content-Encoding token")
            }
        }
    }
}

impl std::error::Error for ContentEncodingError {}

/// コンテントコーディング
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ContentCoding {
    /// gzip (x-gzip を含む)
    Gzip,
    /// deflate (zlib 形式)
    Deflate,
    Identity,
    Other(String),
}

impl ContentCoding {
    /// 正規化したトークン値
    pub fn as_str(&self) -> &str {
        match self {
            ContentCoding::Gzip => "gzip",
            ContentCoding::Deflate => "deflate",
            ContentCoding::Identity => "identity",
            ContentCoding::Other(value) => value.as_str(),
        }
    }

    fn parse(token: &str) -> Result<Self, ContentEncodingError> {
        if token.is_empty() || !token.bytes().all(is_token_char) {
            return Err(ContentEncodingError::InvalidEncoding);
        }
        let normalized = token.to_ascii_lowercase();
        Ok(match normalized.as_str() {
            "gzip" | "x-gzip" => ContentCoding::Gzip,
            "deflate" => ContentCoding::Deflate,
            "identity" => ContentCoding::Identity,
            _ => ContentCoding::Other(normalized),
        })
    }
}

/// Content-Encoding ヘッダー
///
/// 適用された順に並ぶ。最後の要素が最も外側のコーディング。
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContentEncoding {
    encodings: Vec<ContentCoding>,
}

impl ContentEncoding {
    /// Content-Encoding ヘッダー値をパース
    pub fn parse(input: &str) -> Result<Self, ContentEncodingError> {
        let mut encodings = Vec::new();
        for part in input.split(',') {
            let part = part.trim();
            if part.is_empty() {
                continue;
            }
            encodings.push(ContentCoding::parse(part)?);
        }
        if encodings.is_empty() {
            return Err(ContentEncodingError::Empty);
        }
        Ok(Self { encodings })
    }

    /// ヘッダー全体から Content-Encoding を取得
    ///
    /// 複数の Content-Encoding ヘッダーは出現順に連結する。
    /// ヘッダーが無い場合は `Ok(None)`。
    pub fn from_headers(headers: &Headers) -> Result<Option<Self>, ContentEncodingError> {
        let values = headers.get_all("Content-Encoding");
        if values.is_empty() {
            return Ok(None);
        }
        Self::parse(&values.join(",")).map(Some)
    }

    /// エンコーディング一覧
    pub fn encodings(&self) -> &[ContentCoding] {
        &self.encodings
    }

    /// 末尾から `supported` に含まれるコーディングを取り出す
    ///
    /// 戻り値の 1 つ目は外す順 (外側から) に並んだコーディング。
    /// identity は取り出すだけで何もしない扱いなので 1 つ目には含めない。
    /// 2 つ目は残ったコーディングで、全部外せた場合は `None`。
    pub fn split_decodable(
        &self,
        supported: &[ContentCoding],
    ) -> (Vec<ContentCoding>, Option<ContentEncoding>) {
        let mut rest = self.encodings.clone();
        let mut decode = Vec::new();
        while let Some(last) = rest.last() {
            if *last == ContentCoding::Identity {
                rest.pop();
            } else if supported.contains(last) {
                if let Some(coding) = rest.pop() {
                    decode.push(coding);
                }
            } else {
                break;
            }
        }
        let rest = if rest.is_empty() {
            None
        } else {
            Some(ContentEncoding { encodings: rest })
        };
        (decode, rest)
    }
}

impl fmt::Display for ContentEncoding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let values: Vec<&str> = self.encodings.iter().map(ContentCoding::as_str).collect();
        write!(f, "{}", values.join(", "))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_multiple() {
        let ce = ContentEncoding::parse("GZIP, x-gzip,deflate").unwrap();
        assert_eq!(
            ce.encodings(),
            &[
                ContentCoding::Gzip,
                ContentCoding::Gzip,
                ContentCoding::Deflate
            ]
        );
        assert_eq!(ce.to_string(), "gzip, gzip, deflate");
    }

    #[test]
    fn parse_invalid() {
        assert_eq!(ContentEncoding::parse(" , "), Err(ContentEncodingError::Empty));
        assert_eq!(
            ContentEncoding::parse("g zip"),
            Err(ContentEncodingError::InvalidEncoding)
        );
    }

    #[test]
    fn split_all_supported() {
        let ce = ContentEncoding::parse("deflate, identity, gzip").unwrap();
        let (decode, rest) = ce.split_decodable(&[ContentCoding::Gzip, ContentCoding::Deflate]);
        assert_eq!(decode, vec![ContentCoding::Gzip, ContentCoding::Deflate]);
        assert!(rest.is_none());
    }

    #[test]
    fn split_stops_at_unsupported() {
        let ce = ContentEncoding::parse("gzip, br, deflate").unwrap();
        let (decode, rest) = ce.split_decodable(&[ContentCoding::Gzip, ContentCoding::Deflate]);
        assert_eq!(decode, vec![ContentCoding::Deflate]);
        assert_eq!(rest.unwrap().to_string(), "gzip, br");
    }

    #[test]
    fn split_nothing_supported() {
        let ce = ContentEncoding::parse("gzip").unwrap();
        let (decode, rest) = ce.split_decodable(&[]);
        assert!(decode.is_empty());
        assert_eq!(rest, Some(ce));
    }
}
