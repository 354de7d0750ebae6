//! HTTP/1.x レスポンスパーサー
//!
//! Sans I/O 設計のインクリメンタルパーサー。受信したバイト列を任意の大きさで
//! `feed()` でき、1 バイトずつ渡しても一括で渡しても同じイベント列になる
//! (連続する `BodyChunk` の分割位置だけが異なる)。
//!
//! ## 状態遷移
//!
//! ```text
//! AwaitingHeaders -> BodyIdentity | BodyIdentityEof | BodyChunked | Complete
//! BodyIdentity    -> Complete
//! BodyIdentityEof -> Complete (finish() で接続終了を通知したとき)
//! BodyChunked     -> BodyChunkedTrailer -> Complete
//! 任意の状態       -> Error
//! ```

mod body;
mod head;
mod response;
mod state;

pub use head::ResponseHead;
pub use response::{ParseEvent, ResponseParser};
pub use state::ParserState;
