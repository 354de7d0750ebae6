//! リクエストヘッドと chunked フレームのエンコード
//!
//! ボディ自体は呼び出し側がストリームとして書き込むので、
//! ここではリクエスト行 + ヘッダーと chunked の枠だけを作る。

use crate::error::EncodeError;
use crate::headers::Headers;
use crate::version::Version;

/// 終端チャンク (トレーラーなし)
pub const LAST_CHUNK: &[u8] = b"0\r\n\r\n";

/// リクエスト行とヘッダーをエンコード
///
/// メソッド、リクエストターゲット、ヘッダーをすべて検証し、
/// 改行などインジェクションに使える文字を含む場合は何も生成せずにエラーを返す。
pub fn encode_request_head(
    method: &str,
    target: &str,
    version: Version,
    headers: &Headers,
) -> Result<Vec<u8>, EncodeError> {
    if !is_valid_method(method) {
        return Err(EncodeError::InvalidMethod(method.to_string()));
    }
    if !is_valid_request_target(target) {
        return Err(EncodeError::InvalidRequestTarget(target.to_string()));
    }

    let mut buf = Vec::with_capacity(64 + headers.len() * 32);

    // Request line: METHOD SP TARGET SP VERSION CRLF
    buf.extend_from_slice(method.as_bytes());
    buf.push(b' ');
    buf.extend_from_slice(target.as_bytes());
    buf.push(b' ');
    buf.extend_from_slice(version.as_str().as_bytes());
    buf.extend_from_slice(b"\r\n");

    // Headers は構築時に検証済みだが、ここでも確認する
    for (name, value) in headers {
        if !crate::headers::is_valid_header_name(name) {
            return Err(EncodeError::InvalidHeaderName(name.to_string()));
        }
        if !crate::headers::is_valid_field_value(value) {
            return Err(EncodeError::InvalidHeaderValue {
                name: name.to_string(),
            });
        }
        buf.extend_from_slice(name.as_bytes());
        buf.extend_from_slice(b": ");
        buf.extend_from_slice(value.as_bytes());
        buf.extend_from_slice(b"\r\n");
    }

    buf.extend_from_slice(b"\r\n");
    Ok(buf)
}

/// CONNECT リクエストをエンコード (ボディなし)
///
/// `authority` は `host:port` 形式。
pub fn encode_connect_request(authority: &str) -> Result<Vec<u8>, EncodeError> {
    let mut headers = Headers::new();
    headers.append("Host", authority)?;
    encode_request_head("CONNECT", authority, Version::Http11, &headers)
}

/// Chunked Transfer Encoding 用のチャンクをエンコード
///
/// 空のデータは終端チャンクと区別できないので、呼び出し側が渡さないこと。
/// 空の場合は空の Vec を返す。
pub fn encode_chunk(data: &[u8]) -> Vec<u8> {
    if data.is_empty() {
        return Vec::new();
    }
    let mut buf = Vec::with_capacity(data.len() + 12);
    // チャンクサイズ (16進数)
    buf.extend_from_slice(format!("{:x}\r\n", data.len()).as_bytes());
    buf.extend_from_slice(data);
    buf.extend_from_slice(b"\r\n");
    buf
}

/// メソッド名が有効か確認
///
/// method = token
fn is_valid_method(method: &str) -> bool {
    !method.is_empty() && method.bytes().all(crate::headers::is_token_char)
}

/// リクエストターゲットが有効か確認
///
/// 制御文字、空白、DEL を含むものはリクエスト行を壊すので拒否する。
/// フラグメントは送信しない。
fn is_valid_request_target(target: &str) -> bool {
    !target.is_empty() && target.bytes().all(|b| b > 0x20 && b != 0x7F && b != b'#')
}
