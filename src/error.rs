use std::fmt;

/// HTTP パースエラー
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Error {
    /// 不正なデータ
    InvalidData(String),
    /// ヘッダーセクションのサイズ超過
    HeaderSectionTooLarge { size: usize, limit: usize },
    /// ヘッダー数超過
    TooManyHeaders { count: usize, limit: usize },
    /// チャンクサイズ行が長すぎる
    ChunkLineTooLong { size: usize, limit: usize },
    /// 以前のエラーでパーサーが停止している
    Failed,
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::InvalidData(msg) => write!(f, "invalid data: {}", msg),
            Error::HeaderSectionTooLarge { size, limit } => {
                write!(f, "header section too large: {} > {}", size, limit)
            }
            Error::TooManyHeaders { count, limit } => {
                write!(f, "too many headers: {} > {}", count, limit)
            }
            Error::ChunkLineTooLong { size, limit } => {
                write!(f, "chunk line too long: {} > {}", size, limit)
            }
            Error::Failed => write!(f, "parser is in error state"),
        }
    }
}

impl std::error::Error for Error {}

/// HTTP エンコードエラー
///
/// リクエストの構築時に検出される。ここで失敗したリクエストは
/// 1 バイトも送信されない。
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EncodeError {
    /// 不正なメソッド名
    InvalidMethod(String),
    /// 不正なリクエストターゲット
    InvalidRequestTarget(String),
    /// 不正なヘッダー名
    InvalidHeaderName(String),
    /// ヘッダー値に改行や制御文字が含まれている (ヘッダーインジェクション)
    InvalidHeaderValue { name: String },
}

impl fmt::Display for EncodeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EncodeError::InvalidMethod(method) => write!(f, "invalid method: {:?}", method),
            EncodeError::InvalidRequestTarget(target) => {
                write!(f, "invalid request target: {:?}", target)
            }
            EncodeError::InvalidHeaderName(name) => write!(f, "invalid header name: {:?}", name),
            EncodeError::InvalidHeaderValue { name } => {
                write!(f, "invalid value for header {:?}", name)
            }
        }
    }
}

impl std::error::Error for EncodeError {}
