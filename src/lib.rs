//! # http1_engine
//!
//! 依存なしの HTTP/1.x クライアント向けプロトコル層 (Sans I/O)
//!
//! ## 特徴
//!
//! - **依存なし**: 標準ライブラリのみ使用
//! - **Sans I/O**: I/O を完全に分離した設計
//! - **インクリメンタル**: 任意の大きさの断片でレスポンスをパースできる
//! - **インジェクション対策**: ヘッダーは構築時に検証される
//!
//! ## 使い方
//!
//! ```rust
//! use http1_engine::{
//!     Headers, ParseEvent, ParserLimits, ResponseParser, Version, encode_request_head,
//! };
//!
//! // リクエストヘッドを作成してエンコード
//! let mut headers = Headers::new();
//! headers.append("Host", "example.com").unwrap();
//! let bytes = encode_request_head("GET", "/", Version::Http11, &headers).unwrap();
//! assert!(bytes.starts_with(b"GET / HTTP/1.1\r\n"));
//!
//! // レスポンスをパース
//! let mut parser = ResponseParser::for_request_method("GET", ParserLimits::default());
//! let event = parser
//!     .feed(b"HTTP/1.1 204 No Content\r\n\r\n")
//!     .unwrap()
//!     .unwrap();
//! assert!(matches!(event, ParseEvent::HeadersReady { headers_only: true, .. }));
//! ```

pub mod content_encoding;
mod encoder;
mod error;
mod headers;
mod limits;
mod parser;
mod version;

pub use content_encoding::{ContentCoding, ContentEncoding};
pub use encoder::{LAST_CHUNK, encode_chunk, encode_connect_request, encode_request_head};
pub use error::{EncodeError, Error};
pub use headers::Headers;
pub use limits::ParserLimits;
pub use parser::{ParseEvent, ParserState, ResponseHead, ResponseParser};
pub use version::Version;
