//! レスポンスボディの展開
//!
//! `gzip` フィーチャーが有効な場合、flate2 で gzip と deflate (zlib) を展開する。

use std::io;

use http1_engine::ContentCoding;

/// 展開器
pub(crate) enum Decoder {
    #[cfg(feature = "gzip")]
    Gzip(flate2::write::GzDecoder<Vec<u8>>),
    #[cfg(feature = "gzip")]
    Deflate(flate2::write::ZlibDecoder<Vec<u8>>),
}

impl Decoder {
    /// コーディングに対応する展開器を作成
    pub(crate) fn new(coding: &ContentCoding) -> Option<Self> {
        match coding {
            #[cfg(feature = "gzip")]
            ContentCoding::Gzip => Some(Decoder::Gzip(flate2::write::GzDecoder::new(Vec::new()))),
            #[cfg(feature = "gzip")]
            ContentCoding::Deflate => Some(Decoder::Deflate(flate2::write::ZlibDecoder::new(
                Vec::new(),
            ))),
            _ => None,
        }
    }

    /// 入力を展開し、得られた分を返す
    #[cfg_attr(not(feature = "gzip"), allow(unused_variables))]
    pub(crate) fn decode(&mut self, data: &[u8]) -> io::Result<Vec<u8>> {
        #[cfg(feature = "gzip")]
        {
            use std::io::Write;
            match self {
                Decoder::Gzip(d) => {
                    d.write_all(data)?;
                    Ok(std::mem::take(d.get_mut()))
                }
                Decoder::Deflate(d) => {
                    d.write_all(data)?;
                    Ok(std::mem::take(d.get_mut()))
                }
            }
        }
        #[cfg(not(feature = "gzip"))]
        {
            match *self {}
        }
    }

    /// 入力の終わりを通知し、残りを返す
    pub(crate) fn finish(&mut self) -> io::Result<Vec<u8>> {
        #[cfg(feature = "gzip")]
        {
            match self {
                Decoder::Gzip(d) => {
                    d.try_finish()?;
                    Ok(std::mem::take(d.get_mut()))
                }
                Decoder::Deflate(d) => {
                    d.try_finish()?;
                    Ok(std::mem::take(d.get_mut()))
                }
            }
        }
        #[cfg(not(feature = "gzip"))]
        {
            match *self {}
        }
    }
}

/// 展開できるコーディング
pub fn supported_codings() -> Vec<ContentCoding> {
    #[cfg(feature = "gzip")]
    {
        vec![ContentCoding::Gzip, ContentCoding::Deflate]
    }
    #[cfg(not(feature = "gzip"))]
    {
        Vec::new()
    }
}

/// 展開できる場合に送る Accept-Encoding の値
pub fn accept_encoding() -> Option<&'static str> {
    if cfg!(feature = "gzip") {
        Some("gzip, deflate, identity")
    } else {
        None
    }
}

#[cfg(all(test, feature = "gzip"))]
mod tests {
    use std::io::Write;

    use super::*;

    fn gzip(data: &[u8]) -> Vec<u8> {
        let mut encoder = flate2::write::GzEncoder::new(Vec::new(), flate2::Compression::default());
        encoder.write_all(data).unwrap();
        encoder.finish().unwrap()
    }

    #[test]
    fn test_gzip_in_pieces() {
        let compressed = gzip(b"hello hello hello hello");
        let mut decoder = Decoder::new(&ContentCoding::Gzip).unwrap();
        let mut out = Vec::new();
        for piece in compressed.chunks(3) {
            out.extend(decoder.decode(piece).unwrap());
        }
        out.extend(decoder.finish().unwrap());
        assert_eq!(out, b"hello hello hello hello");
    }

    #[test]
    fn test_unsupported() {
        assert!(Decoder::new(&ContentCoding::Other("br".to_string())).is_none());
        assert!(Decoder::new(&ContentCoding::Identity).is_none());
    }
}
