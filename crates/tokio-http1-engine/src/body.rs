//! リクエストボディ
//!
//! 送信するボディは以下のいずれか。どれも `create_stream()` でチャンク列を作り、
//! `declared_length()` で長さ (不明なら `None`) を返す。長さが不明な場合は
//! chunked で送信される。
//!
//! - 空
//! - メモリ上のバイト列
//! - 任意のチャンク列 (長さは指定可能)
//! - ファイル (長さは送信直前のファイルサイズ)
//! - フォーム (URL エンコードまたは multipart/form-data)

use std::collections::VecDeque;
use std::io;
use std::path::{Path, PathBuf};

use bytes::{Bytes, BytesMut};
use http1_engine::{EncodeError, Headers};
use tokio::io::AsyncReadExt;

use crate::error::ProtocolError;

/// ファイルから一度に読むバイト数
const FILE_READ_SIZE: usize = 8192;

/// multipart の boundary の最大長 (RFC 2046)
const MAX_BOUNDARY_LENGTH: usize = 70;

/// リクエストボディ
#[derive(Debug, Clone, Default)]
pub enum RequestBody {
    /// ボディなし
    #[default]
    Empty,
    /// メモリ上のバイト列
    Memory(Bytes),
    /// チャンク列
    ///
    /// `length` を指定すると Content-Length として送信され、
    /// 実際のバイト数と一致しない場合は送信が失敗する。
    Chunks {
        chunks: Vec<Bytes>,
        length: Option<u64>,
    },
    /// ファイル
    File(PathBuf),
    /// フォーム
    Form(FormBody),
}

impl RequestBody {
    /// チャンク列からボディを作成
    pub fn from_chunks<I, B>(chunks: I, length: Option<u64>) -> Self
    where
        I: IntoIterator<Item = B>,
        B: Into<Bytes>,
    {
        RequestBody::Chunks {
            chunks: chunks.into_iter().map(Into::into).collect(),
            length,
        }
    }

    /// ファイルからボディを作成
    pub fn file(path: impl Into<PathBuf>) -> Self {
        RequestBody::File(path.into())
    }

    /// ボディが無いか
    pub fn is_empty(&self) -> bool {
        matches!(self, RequestBody::Empty)
    }

    /// 送信するバイト数 (不明な場合は `None`)
    ///
    /// ファイルは呼び出した時点のサイズを返す。
    pub async fn declared_length(&self) -> io::Result<Option<u64>> {
        match self {
            RequestBody::Empty => Ok(Some(0)),
            RequestBody::Memory(data) => Ok(Some(data.len() as u64)),
            RequestBody::Chunks { length, .. } => Ok(*length),
            RequestBody::File(path) => Ok(Some(file_size(path).await?)),
            RequestBody::Form(form) => form.declared_length().await.map(Some),
        }
    }

    /// ボディが付加するヘッダー (Content-Type など)
    ///
    /// フォームのパートヘッダーに改行が含まれる場合は失敗する。
    pub fn headers(&self) -> Result<Headers, EncodeError> {
        let mut headers = Headers::new();
        if let RequestBody::Form(form) = self {
            form.validate_parts()?;
            headers.append("Content-Type", &form.content_type())?;
        }
        Ok(headers)
    }

    /// 送信用のストリームを作成
    pub fn create_stream(&self) -> BodyStream {
        let segments = match self {
            RequestBody::Empty => VecDeque::new(),
            RequestBody::Memory(data) => VecDeque::from([Segment::Bytes(data.clone())]),
            RequestBody::Chunks { chunks, .. } => {
                chunks.iter().cloned().map(Segment::Bytes).collect()
            }
            RequestBody::File(path) => VecDeque::from([Segment::File(path.clone())]),
            RequestBody::Form(form) => form.segments().into(),
        };
        BodyStream {
            segments,
            file: None,
        }
    }
}

impl From<Vec<u8>> for RequestBody {
    fn from(data: Vec<u8>) -> Self {
        RequestBody::Memory(Bytes::from(data))
    }
}

impl From<&'static [u8]> for RequestBody {
    fn from(data: &'static [u8]) -> Self {
        RequestBody::Memory(Bytes::from_static(data))
    }
}

impl From<&'static str> for RequestBody {
    fn from(data: &'static str) -> Self {
        RequestBody::Memory(Bytes::from_static(data.as_bytes()))
    }
}

impl From<String> for RequestBody {
    fn from(data: String) -> Self {
        RequestBody::Memory(Bytes::from(data))
    }
}

impl From<Bytes> for RequestBody {
    fn from(data: Bytes) -> Self {
        RequestBody::Memory(data)
    }
}

impl From<FormBody> for RequestBody {
    fn from(form: FormBody) -> Self {
        RequestBody::Form(form)
    }
}

#[derive(Debug, Clone)]
enum Segment {
    Bytes(Bytes),
    File(PathBuf),
}

/// 送信用のチャンク列
#[derive(Debug)]
pub struct BodyStream {
    segments: VecDeque<Segment>,
    file: Option<tokio::fs::File>,
}

impl BodyStream {
    /// 次のチャンクを読む (空のチャンクは返さない)
    ///
    /// 終端では `Ok(None)`。
    pub async fn next_chunk(&mut self) -> io::Result<Option<Bytes>> {
        loop {
            if let Some(file) = self.file.as_mut() {
                let mut buf = BytesMut::with_capacity(FILE_READ_SIZE);
                if file.read_buf(&mut buf).await? > 0 {
                    return Ok(Some(buf.freeze()));
                }
                self.file = None;
                continue;
            }
            match self.segments.pop_front() {
                None => return Ok(None),
                Some(Segment::Bytes(data)) if data.is_empty() => {}
                Some(Segment::Bytes(data)) => return Ok(Some(data)),
                Some(Segment::File(path)) => {
                    self.file = Some(tokio::fs::File::open(&path).await?);
                }
            }
        }
    }
}

async fn file_size(path: &Path) -> io::Result<u64> {
    Ok(tokio::fs::metadata(path).await?.len())
}

#[derive(Debug, Clone)]
enum FormValue {
    Text(String),
    File { path: PathBuf, file_name: String },
}

#[derive(Debug, Clone)]
struct FormField {
    name: String,
    value: FormValue,
    content_type: String,
}

/// フォームボディ
///
/// ファイルを含まない場合は `application/x-www-form-urlencoded`、
/// ファイルを含む場合は `multipart/form-data` で送信する。
///
/// URL エンコードでは同じ名前のフィールドが複数ある場合、
/// `name[0]=a&name[1]=b` のように添字付きのキーになる。
#[derive(Debug, Clone)]
pub struct FormBody {
    fields: Vec<FormField>,
    boundary: String,
}

impl Default for FormBody {
    fn default() -> Self {
        Self::new()
    }
}

impl FormBody {
    /// 新しいフォームを作成 (boundary はランダムな 32 桁の 16 進数)
    pub fn new() -> Self {
        let boundary: String = (0..16)
            .map(|_| format!("{:02x}", fastrand::u8(..)))
            .collect();
        Self {
            fields: Vec::new(),
            boundary,
        }
    }

    /// multipart の boundary を指定してフォームを作成
    ///
    /// boundary は RFC 2046 の bchars からなる 1 から 70 文字で、末尾は空白以外。
    pub fn with_boundary(boundary: impl Into<String>) -> Result<Self, ProtocolError> {
        let boundary = boundary.into();
        if !is_valid_boundary(&boundary) {
            return Err(ProtocolError::InvalidBoundary(boundary));
        }
        Ok(Self {
            fields: Vec::new(),
            boundary,
        })
    }

    /// multipart の boundary
    pub fn boundary(&self) -> &str {
        &self.boundary
    }

    /// テキストフィールドを追加 (multipart 時の Content-Type は text/plain)
    pub fn field(self, name: &str, value: &str) -> Self {
        self.field_with_type(name, value, "text/plain")
    }

    /// Content-Type を指定してテキストフィールドを追加
    ///
    /// 空の Content-Type を指定すると multipart のパートヘッダーから省略する。
    pub fn field_with_type(mut self, name: &str, value: &str, content_type: &str) -> Self {
        self.fields.push(FormField {
            name: name.to_string(),
            value: FormValue::Text(value.to_string()),
            content_type: content_type.to_string(),
        });
        self
    }

    /// ファイルフィールドを追加 (multipart になる)
    pub fn file(mut self, name: &str, path: impl Into<PathBuf>, content_type: &str) -> Self {
        let path = path.into();
        let file_name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        self.fields.push(FormField {
            name: name.to_string(),
            value: FormValue::File { path, file_name },
            content_type: content_type.to_string(),
        });
        self
    }

    /// multipart で送信するか
    pub fn is_multipart(&self) -> bool {
        self.fields
            .iter()
            .any(|f| matches!(f.value, FormValue::File { .. }))
    }

    /// Content-Type ヘッダーの値
    pub fn content_type(&self) -> String {
        if self.is_multipart() && self.boundary.bytes().all(is_token_char) {
            format!("multipart/form-data; boundary={}", self.boundary)
        } else if self.is_multipart() {
            format!("multipart/form-data; boundary=\"{}\"", self.boundary)
        } else {
            "application/x-www-form-urlencoded".to_string()
        }
    }

    /// URL エンコードした本文
    fn urlencoded(&self) -> String {
        // 名前ごとに最初の出現順でまとめる
        let mut grouped: Vec<(&str, Vec<&str>)> = Vec::new();
        for field in &self.fields {
            let FormValue::Text(value) = &field.value else {
                continue;
            };
            match grouped.iter_mut().find(|(name, _)| *name == field.name) {
                Some((_, values)) => values.push(value),
                None => grouped.push((&field.name, vec![value])),
            }
        }

        let mut serializer = url::form_urlencoded::Serializer::new(String::new());
        for (name, values) in grouped {
            if let [value] = values.as_slice() {
                serializer.append_pair(name, value);
            } else {
                for (i, value) in values.iter().enumerate() {
                    serializer.append_pair(&format!("{name}[{i}]"), value);
                }
            }
        }
        serializer.finish()
    }

    /// 送信するセグメント列
    fn segments(&self) -> Vec<Segment> {
        if !self.is_multipart() {
            return vec![Segment::Bytes(Bytes::from(self.urlencoded()))];
        }

        let mut segments = Vec::with_capacity(self.fields.len() * 4 + 1);
        for field in &self.fields {
            segments.push(Segment::Bytes(Bytes::from(format!(
                "--{}\r\n",
                self.boundary
            ))));
            match &field.value {
                FormValue::Text(value) => {
                    segments.push(Segment::Bytes(Bytes::from(part_header(
                        &field.name,
                        None,
                        &field.content_type,
                    ))));
                    segments.push(Segment::Bytes(Bytes::from(value.clone())));
                }
                FormValue::File { path, file_name } => {
                    segments.push(Segment::Bytes(Bytes::from(part_header(
                        &field.name,
                        Some(file_name),
                        &field.content_type,
                    ))));
                    segments.push(Segment::File(path.clone()));
                }
            }
            segments.push(Segment::Bytes(Bytes::from_static(b"\r\n")));
        }
        segments.push(Segment::Bytes(Bytes::from(format!(
            "--{}--\r\n",
            self.boundary
        ))));
        segments
    }

    /// パートヘッダーに入る値に改行が無いか
    fn validate_parts(&self) -> Result<(), EncodeError> {
        if !self.is_multipart() {
            return Ok(());
        }
        let mut part = Headers::new();
        for field in &self.fields {
            let file_name = match &field.value {
                FormValue::File { file_name, .. } => file_name.as_str(),
                FormValue::Text(_) => "",
            };
            if has_line_break(&field.name) || has_line_break(file_name) {
                return Err(EncodeError::InvalidHeaderValue {
                    name: "Content-Disposition".to_string(),
                });
            }
            if !field.content_type.is_empty() {
                part.append("Content-Type", &field.content_type)?;
            }
        }
        Ok(())
    }

    /// 送信するバイト数
    ///
    /// multipart の場合は各セグメントの長さとファイルサイズの合計。
    pub async fn declared_length(&self) -> io::Result<u64> {
        let mut length = 0;
        for segment in self.segments() {
            length += match segment {
                Segment::Bytes(data) => data.len() as u64,
                Segment::File(path) => file_size(&path).await?,
            };
        }
        Ok(length)
    }
}

fn is_valid_boundary(boundary: &str) -> bool {
    (1..=MAX_BOUNDARY_LENGTH).contains(&boundary.len())
        && !boundary.ends_with(' ')
        && boundary
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || b"'()+_,-./:=? ".contains(&b))
}

fn is_token_char(b: u8) -> bool {
    b.is_ascii_alphanumeric() || b"!#$%&'*+-.^_`|~".contains(&b)
}

fn has_line_break(value: &str) -> bool {
    value.contains(['\r', '\n'])
}

/// Content-Disposition の quoted-string に入れる値
///
/// 改行は送信前の検証で弾かれる。
fn escape_quoted(value: &str) -> String {
    value.replace('"', "%22")
}

/// multipart のパートヘッダー
fn part_header(name: &str, file_name: Option<&str>, content_type: &str) -> String {
    let name = escape_quoted(name);
    let file_name = file_name.map(escape_quoted);
    match file_name {
        Some(file_name) => format!(
            "Content-Disposition: form-data; name=\"{name}\"; filename=\"{file_name}\"\r\n\
             Content-Type: {content_type}\r\n\
             Content-Transfer-Encoding: binary\r\n\r\n"
        ),
        None if content_type.is_empty() => {
            format!("Content-Disposition: form-data; name=\"{name}\"\r\n\r\n")
        }
        None => format!(
            "Content-Disposition: form-data; name=\"{name}\"\r\n\
             Content-Type: {content_type}\r\n\r\n"
        ),
    }
}
