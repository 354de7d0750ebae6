//! レスポンス
//!
//! ヘッダーを受信した時点で返され、ボディは `body` から順に読む。

use http1_engine::{Headers, Version};

use crate::channel::Body;
use crate::request::Request;
use crate::transport::ConnectionInfo;

/// HTTP レスポンス
#[derive(Debug)]
pub struct Response {
    /// HTTP バージョン
    pub version: Version,
    /// ステータスコード
    pub status: u16,
    /// ステータスフレーズ
    pub reason: String,
    /// ヘッダー (展開した Content-Encoding は取り除かれている)
    pub headers: Headers,
    /// ボディ
    pub body: Body,
    /// このレスポンスを返したリクエスト
    pub request: Request,
    /// リダイレクト前のレスポンス (ボディは読み捨て済み)
    pub previous: Option<Box<Response>>,
    /// 接続情報
    pub connection_info: ConnectionInfo,
}

impl Response {
    /// ステータスコードが 2xx か
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    /// リダイレクトをたどる前の最初のリクエスト
    pub fn original_request(&self) -> &Request {
        let mut response = self;
        while let Some(previous) = response.previous.as_deref() {
            response = previous;
        }
        &response.request
    }

    /// リダイレクトの回数
    pub fn redirect_count(&self) -> usize {
        std::iter::successors(self.previous.as_deref(), |r| r.previous.as_deref()).count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn response(uri: &str, previous: Option<Response>) -> Response {
        Response {
            version: Version::Http11,
            status: 200,
            reason: "OK".to_string(),
            headers: Headers::new(),
            body: Body::empty(),
            request: Request::new("GET", uri).unwrap(),
            previous: previous.map(Box::new),
            connection_info: ConnectionInfo::default(),
        }
    }

    #[test]
    fn test_original_request() {
        let first = response("http://a.example/", None);
        let second = response("http://b.example/", Some(first));
        let third = response("http://c.example/", Some(second));
        assert_eq!(third.original_request().uri().as_str(), "http://a.example/");
        assert_eq!(third.redirect_count(), 2);
        assert!(third.is_success());
    }
}
