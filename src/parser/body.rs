//! ボディのフレーミング解決と chunked 行のパース

use crate::error::Error;
use crate::headers::Headers;

/// ボディの区切り方
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Framing {
    /// ボディなし
    None,
    /// Transfer-Encoding: chunked
    Chunked,
    /// Content-Length で指定された固定長
    Length(u64),
    /// 接続が閉じるまでがボディ
    UntilEof,
}

/// ヘッダーからボディの区切り方を決める
///
/// 優先順位:
/// 1. ボディを持たない応答 (`no_body`)
/// 2. Transfer-Encoding の最後が chunked なら chunked
/// 3. chunked 以外の Transfer-Encoding は接続終了まで
/// 4. Content-Length があれば固定長
/// 5. それ以外は接続終了まで
pub(crate) fn resolve_framing(headers: &Headers, no_body: bool) -> Result<Framing, Error> {
    let transfer_encoding = parse_transfer_encoding(headers)?;
    let content_length = parse_content_length(headers)?;

    if no_body {
        return Ok(Framing::None);
    }
    match transfer_encoding {
        Some(true) => return Ok(Framing::Chunked),
        Some(false) => return Ok(Framing::UntilEof),
        None => {}
    }
    Ok(match content_length {
        Some(len) => Framing::Length(len),
        None => Framing::UntilEof,
    })
}

/// Transfer-Encoding ヘッダーを解析
///
/// ヘッダーが無ければ `None`、最後のコーディングが chunked なら `Some(true)`。
/// 複数の Transfer-Encoding ヘッダーは連結して単一のリストとして扱う。
fn parse_transfer_encoding(headers: &Headers) -> Result<Option<bool>, Error> {
    let values = headers.get_all("Transfer-Encoding");
    if values.is_empty() {
        return Ok(None);
    }

    let mut chunked_count = 0;
    let mut last_is_chunked = false;
    for value in values {
        for token in value.split(',') {
            let token = token.trim();
            if token.is_empty() {
                return Err(Error::InvalidData(
                    "invalid Transfer-Encoding: empty token".to_string(),
                ));
            }
            last_is_chunked = token.eq_ignore_ascii_case("chunked");
            if last_is_chunked {
                chunked_count += 1;
                if chunked_count > 1 {
                    return Err(Error::InvalidData(
                        "invalid Transfer-Encoding: duplicate chunked".to_string(),
                    ));
                }
            }
        }
    }

    Ok(Some(last_is_chunked))
}

/// Content-Length ヘッダーを解析
///
/// 値の異なる Content-Length が複数ある場合はエラー
fn parse_content_length(headers: &Headers) -> Result<Option<u64>, Error> {
    let mut value: Option<u64> = None;
    for raw in headers.get_all("Content-Length") {
        let raw = raw.trim();
        if raw.is_empty() || !raw.bytes().all(|b| b.is_ascii_digit()) {
            return Err(Error::InvalidData(
                "invalid Content-Length: not a number".to_string(),
            ));
        }
        let parsed: u64 = raw
            .parse()
            .map_err(|_| Error::InvalidData("invalid Content-Length: overflow".to_string()))?;
        match value {
            Some(prev) if prev != parsed => {
                return Err(Error::InvalidData(
                    "invalid Content-Length: mismatched values".to_string(),
                ));
            }
            _ => value = Some(parsed),
        }
    }
    Ok(value)
}

/// チャンクサイズ行をパース (拡張は無視)
pub(crate) fn parse_chunk_size(line: &[u8]) -> Result<u64, Error> {
    let size = match line.iter().position(|&b| b == b';') {
        Some(pos) => &line[..pos],
        None => line,
    };
    let size = size.trim_ascii();
    if size.is_empty() || size.len() > 16 || !size.iter().all(u8::is_ascii_hexdigit) {
        return Err(Error::InvalidData(format!(
            "invalid chunk size: {:?}",
            String::from_utf8_lossy(size)
        )));
    }
    let size = std::str::from_utf8(size)
        .map_err(|_| Error::InvalidData("invalid chunk size".to_string()))?;
    u64::from_str_radix(size, 16)
        .map_err(|_| Error::InvalidData(format!("invalid chunk size: {:?}", size)))
}

/// 未完成のチャンクサイズ行がサイズ 0 (終端チャンク) と確定しているか
///
/// `0`, `000\r`, `0;ext` のように 0 の並びの後に CR か `;` が来ていれば
/// 後続のバイトに関係なく終端チャンクになる。
pub(crate) fn is_last_chunk_prefix(buf: &[u8]) -> bool {
    let zeros = buf.iter().take_while(|&&b| b == b'0').count();
    zeros > 0 && matches!(buf.get(zeros), Some(b'\r') | Some(b';'))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn headers(pairs: &[(&str, &str)]) -> Headers {
        Headers::try_from_pairs(pairs.iter().copied()).unwrap()
    }

    #[test]
    fn test_resolve_framing() {
        assert_eq!(resolve_framing(&headers(&[]), false).unwrap(), Framing::UntilEof);
        assert_eq!(
            resolve_framing(&headers(&[("Content-Length", "10")]), false).unwrap(),
            Framing::Length(10)
        );
        assert_eq!(
            resolve_framing(&headers(&[("Transfer-Encoding", "gzip, chunked")]), false).unwrap(),
            Framing::Chunked
        );
        assert_eq!(
            resolve_framing(&headers(&[("Transfer-Encoding", "gzip")]), false).unwrap(),
            Framing::UntilEof
        );
        assert_eq!(
            resolve_framing(&headers(&[("Content-Length", "10")]), true).unwrap(),
            Framing::None
        );
    }

    #[test]
    fn test_transfer_encoding_wins_over_content_length() {
        let h = headers(&[("Content-Length", "3"), ("Transfer-Encoding", "chunked")]);
        assert_eq!(resolve_framing(&h, false).unwrap(), Framing::Chunked);
    }

    #[test]
    fn test_invalid_framing_headers() {
        assert!(resolve_framing(&headers(&[("Content-Length", "abc")]), false).is_err());
        assert!(resolve_framing(&headers(&[("Content-Length", "-1")]), false).is_err());
        assert!(
            resolve_framing(
                &headers(&[("Content-Length", "1"), ("Content-Length", "2")]),
                false
            )
            .is_err()
        );
        assert!(
            resolve_framing(&headers(&[("Transfer-Encoding", "chunked, chunked")]), false)
                .is_err()
        );
        assert!(resolve_framing(&headers(&[("Transfer-Encoding", "chunked,")]), false).is_err());
    }

    #[test]
    fn test_parse_chunk_size() {
        assert_eq!(parse_chunk_size(b"1a").unwrap(), 26);
        assert_eq!(parse_chunk_size(b"FF;name=value").unwrap(), 255);
        assert_eq!(parse_chunk_size(b"0 ").unwrap(), 0);
        assert!(parse_chunk_size(b"").is_err());
        assert!(parse_chunk_size(b"xyz").is_err());
        assert!(parse_chunk_size(b"11111111111111111").is_err());
    }

    #[test]
    fn test_is_last_chunk_prefix() {
        assert!(is_last_chunk_prefix(b"0\r"));
        assert!(is_last_chunk_prefix(b"000;ext"));
        assert!(!is_last_chunk_prefix(b"0"));
        assert!(!is_last_chunk_prefix(b"01\r"));
        assert!(!is_last_chunk_prefix(b"\r"));
    }
}
