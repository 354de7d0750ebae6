/// パーサーの制限設定
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParserLimits {
    /// ステータス行とヘッダーの合計最大バイト数 (デフォルト: 8KB, 0 は無制限)
    pub max_header_bytes: usize,
    /// 最大ヘッダー数 (デフォルト: 100)
    pub max_headers_count: usize,
    /// 最大ボディサイズ (デフォルト: 10MB, 0 は無制限)
    ///
    /// 超過してもパースは失敗しない。`ResponseParser::body_limit_exceeded()` が
    /// true になるので、呼び出し側が転送を中断する。
    pub max_body_bytes: u64,
    /// 最大チャンクサイズ行長 (デフォルト: 1KB)
    ///
    /// チャンク拡張を含むため、サイズ表記そのものより長めに取る。
    pub max_chunk_line_size: usize,
}

impl Default for ParserLimits {
    fn default() -> Self {
        Self {
            max_header_bytes: 8 * 1024,
            max_headers_count: 100,
            max_body_bytes: 10 * 1024 * 1024,
            max_chunk_line_size: 1024,
        }
    }
}

impl ParserLimits {
    /// 制限なしの設定を作成
    pub fn unlimited() -> Self {
        Self {
            max_header_bytes: 0,
            max_headers_count: usize::MAX,
            max_body_bytes: 0,
            max_chunk_line_size: usize::MAX,
        }
    }

    /// ヘッダーバイト数が上限を超えているか
    pub(crate) fn header_bytes_exceeded(&self, size: usize) -> bool {
        self.max_header_bytes != 0 && size > self.max_header_bytes
    }

    /// ボディバイト数が上限を超えているか
    pub(crate) fn body_bytes_exceeded(&self, size: u64) -> bool {
        self.max_body_bytes != 0 && size > self.max_body_bytes
    }
}
