//! ステータス行とヘッダー行のパース

use crate::error::Error;
use crate::headers::{Headers, is_valid_field_value, is_valid_header_name};
use crate::version::Version;

/// レスポンスヘッダー (ボディなし)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResponseHead {
    /// HTTP バージョン
    pub version: Version,
    /// ステータスコード (200, 404, etc.)
    pub status_code: u16,
    /// ステータスフレーズ (OK, Not Found, etc.)
    pub reason_phrase: String,
    /// ヘッダー
    pub headers: Headers,
}

impl ResponseHead {
    /// この応答の後に接続を閉じる必要があるか
    ///
    /// `Connection: close` を含む場合、または Connection ヘッダーが無い
    /// HTTP/1.0 応答の場合に true。
    pub fn must_close(&self) -> bool {
        if self.headers.has_token("Connection", "close") {
            return true;
        }
        !self.headers.contains("Connection") && self.version == Version::Http10
    }
}

/// CRLF で終わる行を探す
pub(crate) fn find_line(buf: &[u8]) -> Option<usize> {
    buf.windows(2).position(|w| w == b"\r\n")
}

/// ステータス行をパース
///
/// status-line = HTTP-version SP status-code SP [ reason-phrase ]
pub(crate) fn parse_status_line(line: &[u8]) -> Result<(Version, u16, String), Error> {
    let line = std::str::from_utf8(line)
        .map_err(|e| Error::InvalidData(format!("invalid UTF-8 in status line: {e}")))?;

    let mut parts = line.splitn(3, ' ');
    let version = parts.next().unwrap_or_default();
    let version = Version::parse(version)
        .ok_or_else(|| Error::InvalidData(format!("unsupported version: {:?}", version)))?;

    let code = parts
        .next()
        .ok_or_else(|| Error::InvalidData(format!("invalid status line: {:?}", line)))?;
    if code.len() != 3 || !code.bytes().all(|b| b.is_ascii_digit()) {
        return Err(Error::InvalidData(format!("invalid status code: {:?}", code)));
    }
    let status_code: u16 = code
        .parse()
        .map_err(|_| Error::InvalidData(format!("invalid status code: {:?}", code)))?;
    if !(100..=599).contains(&status_code) {
        return Err(Error::InvalidData(format!(
            "status code out of range: {}",
            status_code
        )));
    }

    let reason = parts.next().unwrap_or("");
    if !is_valid_reason_phrase(reason) {
        return Err(Error::InvalidData(
            "invalid reason phrase: contains control characters".to_string(),
        ));
    }

    Ok((version, status_code, reason.to_string()))
}

/// ヘッダー行をパース
pub(crate) fn parse_header_line(line: &[u8]) -> Result<(String, String), Error> {
    let line = std::str::from_utf8(line)
        .map_err(|e| Error::InvalidData(format!("invalid UTF-8 in header: {e}")))?;

    if line.starts_with(' ') || line.starts_with('\t') {
        return Err(Error::InvalidData(
            "invalid header line: obs-fold".to_string(),
        ));
    }
    if line.contains('\r') || line.contains('\n') {
        return Err(Error::InvalidData(
            "invalid header line: contains CR/LF".to_string(),
        ));
    }

    let (name, value) = line
        .split_once(':')
        .ok_or_else(|| Error::InvalidData("invalid header line: missing colon".to_string()))?;
    if !is_valid_header_name(name) {
        return Err(Error::InvalidData(format!(
            "invalid header line: invalid name {:?}",
            name
        )));
    }

    // ヘッダー値の検証 (RFC 9110 Section 5.5)
    let value = value.trim_matches(|c| c == ' ' || c == '\t');
    if !is_valid_field_value(value) {
        return Err(Error::InvalidData(
            "invalid header line: invalid value (contains control characters)".to_string(),
        ));
    }

    Ok((name.to_string(), value.to_string()))
}

/// reason-phrase が有効か確認 (RFC 9112 Section 4)
fn is_valid_reason_phrase(phrase: &str) -> bool {
    phrase
        .bytes()
        .all(|b| matches!(b, 0x09 | 0x20..=0x7E | 0x80..=0xFF))
}
