//! ヘッダーマルチマップ
//!
//! 挿入順を保持し、名前の比較は大文字小文字を区別しない。
//! 同じ名前を複数回持てる。
//!
//! `append` / `set` は名前と値を検証し、CR / LF などの制御文字を含む値を
//! 拒否する。リクエストとデフォルトヘッダーはこの経路でしか構築されないため、
//! ヘッダーインジェクションはエンコード前に必ず検出される。

use crate::error::EncodeError;

/// 順序付き・大文字小文字非区別のヘッダーマルチマップ
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Headers {
    entries: Vec<(String, String)>,
}

impl Headers {
    /// 空のヘッダーを作成
    pub fn new() -> Self {
        Self::default()
    }

    /// 名前と値のペアから作成 (すべて検証する)
    pub fn try_from_pairs<I, N, V>(pairs: I) -> Result<Self, EncodeError>
    where
        I: IntoIterator<Item = (N, V)>,
        N: AsRef<str>,
        V: AsRef<str>,
    {
        let mut headers = Self::new();
        for (name, value) in pairs {
            headers.append(name.as_ref(), value.as_ref())?;
        }
        Ok(headers)
    }

    /// ヘッダーを末尾に追加
    pub fn append(&mut self, name: &str, value: &str) -> Result<(), EncodeError> {
        validate_header(name, value)?;
        self.entries.push((name.to_string(), value.to_string()));
        Ok(())
    }

    /// 同名のヘッダーをすべて置き換える
    ///
    /// 既存ヘッダーがあれば最初の位置に、なければ末尾に入る。
    pub fn set(&mut self, name: &str, value: &str) -> Result<(), EncodeError> {
        validate_header(name, value)?;
        match self
            .entries
            .iter()
            .position(|(n, _)| n.eq_ignore_ascii_case(name))
        {
            Some(pos) => {
                self.entries[pos].1 = value.to_string();
                let mut index = 0;
                self.entries.retain(|(n, _)| {
                    let keep = index <= pos || !n.eq_ignore_ascii_case(name);
                    index += 1;
                    keep
                });
            }
            None => self.entries.push((name.to_string(), value.to_string())),
        }
        Ok(())
    }

    /// 同名のヘッダーが無い場合だけ追加
    pub fn set_if_absent(&mut self, name: &str, value: &str) -> Result<(), EncodeError> {
        if self.contains(name) {
            return Ok(());
        }
        self.append(name, value)
    }

    /// 同名のヘッダーをすべて削除し、削除した数を返す
    pub fn remove(&mut self, name: &str) -> usize {
        let before = self.entries.len();
        self.entries.retain(|(n, _)| !n.eq_ignore_ascii_case(name));
        before - self.entries.len()
    }

    /// 最初の値を取得
    pub fn get(&self, name: &str) -> Option<&str> {
        self.entries
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    /// すべての値を取得
    pub fn get_all(&self, name: &str) -> Vec<&str> {
        self.entries
            .iter()
            .filter(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
            .collect()
    }

    /// ヘッダーが存在するか
    pub fn contains(&self, name: &str) -> bool {
        self.entries.iter().any(|(n, _)| n.eq_ignore_ascii_case(name))
    }

    /// カンマ区切りリストとして token を含むか (大文字小文字を区別しない)
    ///
    /// 複数の同名ヘッダーは 1 つのリストとして扱う。
    pub fn has_token(&self, name: &str, token: &str) -> bool {
        self.get_all(name)
            .iter()
            .flat_map(|v| v.split(','))
            .any(|t| t.trim().eq_ignore_ascii_case(token))
    }

    /// 挿入順に走査
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().map(|(n, v)| (n.as_str(), v.as_str()))
    }

    /// エントリ数
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// 空かどうか
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// 別のヘッダーのうち、こちらに無い名前のものをすべて追加する
    pub fn merge_missing(&mut self, other: &Headers) {
        let missing: Vec<(String, String)> = other
            .entries
            .iter()
            .filter(|(n, _)| !self.contains(n))
            .cloned()
            .collect();
        self.entries.extend(missing);
    }

    /// 検証済みのヘッダーを追加 (パーサー用)
    pub(crate) fn push_unchecked(&mut self, name: String, value: String) {
        self.entries.push((name, value));
    }
}

impl<'a> IntoIterator for &'a Headers {
    type Item = (&'a str, &'a str);
    type IntoIter = std::iter::Map<
        std::slice::Iter<'a, (String, String)>,
        fn(&'a (String, String)) -> (&'a str, &'a str),
    >;

    fn into_iter(self) -> Self::IntoIter {
        fn pair(entry: &(String, String)) -> (&str, &str) {
            (entry.0.as_str(), entry.1.as_str())
        }
        self.entries.iter().map(pair)
    }
}

fn validate_header(name: &str, value: &str) -> Result<(), EncodeError> {
    if !is_valid_header_name(name) {
        return Err(EncodeError::InvalidHeaderName(name.to_string()));
    }
    if !is_valid_field_value(value) {
        return Err(EncodeError::InvalidHeaderValue {
            name: name.to_string(),
        });
    }
    Ok(())
}

/// ヘッダー名が有効か確認
pub(crate) fn is_valid_header_name(name: &str) -> bool {
    !name.is_empty() && name.bytes().all(is_token_char)
}

/// トークン文字か確認
pub(crate) fn is_token_char(b: u8) -> bool {
    matches!(
        b,
        b'!' | b'#' | b'$' | b'%' | b'&' | b'\'' | b'*' | b'+' | b'-' | b'.' |
        b'0'..=b'9' | b'A'..=b'Z' | b'^' | b'_' | b'`' | b'a'..=b'z' | b'|' | b'~'
    )
}

/// ヘッダー値に許可される文字か確認 (RFC 9110 Section 5.5)
///
/// VCHAR / obs-text に加えて SP と HTAB を許可する
pub(crate) fn is_valid_field_vchar(b: u8) -> bool {
    matches!(b, 0x09 | 0x20..=0x7E | 0x80..=0xFF)
}

/// ヘッダー値が有効か確認
///
/// 制御文字 (0x00-0x08, 0x0A-0x1F, 0x7F) を含む場合は無効
pub(crate) fn is_valid_field_value(value: &str) -> bool {
    value.bytes().all(is_valid_field_vchar)
}
