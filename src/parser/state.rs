//! パーサー状態の定義

use std::fmt;

/// パーサーの公開状態
///
/// 接続が途中で閉じられた場合の診断に使うため、
/// 安定した名前と序数を持つ。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ParserState {
    /// ステータス行とヘッダー待ち
    AwaitingHeaders,
    /// Content-Length で長さが決まったボディの読み取り中
    BodyIdentity,
    /// 接続終了までがボディ
    BodyIdentityEof,
    /// chunked ボディの読み取り中
    BodyChunked,
    /// 終端チャンク以降 (トレーラーと最後の空行) の読み取り中
    BodyChunkedTrailer,
    /// メッセージ完了
    Complete,
    /// パースエラー
    Error,
}

impl ParserState {
    /// 序数
    pub fn ordinal(&self) -> u8 {
        match self {
            ParserState::AwaitingHeaders => 0,
            ParserState::BodyIdentity => 1,
            ParserState::BodyIdentityEof => 2,
            ParserState::BodyChunked => 3,
            ParserState::BodyChunkedTrailer => 4,
            ParserState::Complete => 5,
            ParserState::Error => 6,
        }
    }

    /// 状態名
    pub fn name(&self) -> &'static str {
        match self {
            ParserState::AwaitingHeaders => "awaiting-headers",
            ParserState::BodyIdentity => "awaiting-body-identity",
            ParserState::BodyIdentityEof => "awaiting-body-identity-eof",
            ParserState::BodyChunked => "awaiting-body-chunked",
            ParserState::BodyChunkedTrailer => "chunked-trailer",
            ParserState::Complete => "complete",
            ParserState::Error => "error",
        }
    }
}

impl fmt::Display for ParserState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.name(), self.ordinal())
    }
}

/// chunked ボディ内部の位置
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ChunkPhase {
    /// チャンクサイズ行待ち
    Size,
    /// チャンクデータ読み取り中
    Data { remaining: u64 },
    /// チャンクデータ後の CRLF 待ち
    DataCrlf,
    /// サイズ 0 と判明した終端チャンク行の残り
    LastChunkLine,
    /// トレーラーヘッダー待ち
    Trailer,
}
