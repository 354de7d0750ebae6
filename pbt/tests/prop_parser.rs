//! ResponseParser のプロパティテスト (parser/)

use http1_engine::{Headers, ParserLimits, ParserState, ResponseParser};
use pbt::{
    body, chunk_sizes, chunked_body, extra_headers, fragments, parse_fragments, response_head,
    split_points,
};
use proptest::prelude::*;

// ========================================
// 分割に対する不変性
// ========================================

proptest! {
    // Content-Length のレスポンスは、どう分割して渡しても同じ結果になる
    #[test]
    fn content_length_fragmentation_invariant(
        headers in extra_headers(),
        body in body(512),
        points in split_points(),
    ) {
        let mut all_headers = headers.clone();
        all_headers.push(("Content-Length".to_string(), body.len().to_string()));
        let mut message = response_head(200, &all_headers);
        message.extend_from_slice(&body);

        let whole = parse_fragments(&[&message], ParserLimits::default(), false).unwrap();
        let split = parse_fragments(&fragments(&message, &points), ParserLimits::default(), false).unwrap();

        prop_assert_eq!(&whole, &split);
        prop_assert_eq!(whole.state, ParserState::Complete);
        prop_assert_eq!(whole.body, body);
    }

    // chunked のレスポンスは、どう分割して渡しても同じボディとトレーラーになる
    #[test]
    fn chunked_fragmentation_invariant(
        headers in extra_headers(),
        body in body(512),
        sizes in chunk_sizes(),
        points in split_points(),
    ) {
        let mut all_headers = headers.clone();
        all_headers.push(("Transfer-Encoding".to_string(), "chunked".to_string()));
        let mut message = response_head(200, &all_headers);
        message.extend_from_slice(&chunked_body(&body, &sizes));

        let whole = parse_fragments(&[&message], ParserLimits::default(), false).unwrap();
        let split = parse_fragments(&fragments(&message, &points), ParserLimits::default(), false).unwrap();

        prop_assert_eq!(&whole, &split);
        prop_assert_eq!(whole.state, ParserState::Complete);
        prop_assert_eq!(whole.body, body);
        prop_assert_eq!(whole.trailers, Some(Headers::new()));
    }

    // 1 バイトずつ渡しても同じヘッダーになる
    #[test]
    fn byte_by_byte_headers(headers in extra_headers()) {
        let mut all_headers = headers.clone();
        all_headers.push(("Content-Length".to_string(), "0".to_string()));
        let message = response_head(204, &all_headers);

        let bytes: Vec<&[u8]> = message.chunks(1).collect();
        let parsed = parse_fragments(&bytes, ParserLimits::default(), false).unwrap();
        let head = parsed.head.unwrap();
        prop_assert_eq!(head.status_code, 204);
        prop_assert!(parsed.headers_only);
        for (name, value) in &headers {
            prop_assert!(head.headers.get_all(name).contains(&value.as_str()));
        }
    }
}

// ========================================
// 接続終了までのボディ
// ========================================

proptest! {
    // 長さ指定なしのボディは、接続終了で受け取った全バイトになる
    #[test]
    fn until_eof_body_is_everything_received(body in body(512), points in split_points()) {
        let mut message = b"HTTP/1.0 200 OK\r\n\r\n".to_vec();
        message.extend_from_slice(&body);

        let parsed = parse_fragments(&fragments(&message, &points), ParserLimits::default(), true).unwrap();
        prop_assert_eq!(parsed.state, ParserState::Complete);
        prop_assert_eq!(parsed.body, body);
        prop_assert!(parsed.trailers.is_some());
    }

    // Content-Length 未満で接続が終了した場合は完了しない
    #[test]
    fn truncated_body_never_completes(body in body(256), cut in 0usize..256) {
        prop_assume!(!body.is_empty());
        let cut = cut % body.len();
        let mut message = format!("HTTP/1.1 200 OK\r\nContent-Length: {}\r\n\r\n", body.len()).into_bytes();
        message.extend_from_slice(&body[..cut]);

        let parsed = parse_fragments(&[&message], ParserLimits::default(), true).unwrap();
        prop_assert_eq!(parsed.state, ParserState::BodyIdentity);
        prop_assert!(parsed.trailers.is_none());
        prop_assert_eq!(parsed.body, body[..cut].to_vec());
    }
}

// ========================================
// 制限
// ========================================

proptest! {
    // ヘッダー部分が上限を超えるとエラーになる
    #[test]
    fn header_limit_enforced(value_len in 64usize..256, limit in 16usize..64) {
        let message = format!(
            "HTTP/1.1 200 OK\r\nX-Long: {}\r\nContent-Length: 0\r\n\r\n",
            "a".repeat(value_len)
        );
        let limits = ParserLimits { max_header_bytes: limit, ..ParserLimits::default() };
        prop_assert!(parse_fragments(&[message.as_bytes()], limits, false).is_err());
    }

    // 宣言された Content-Length が上限を超える場合はヘッダー時点でフラグが立つ
    #[test]
    fn body_limit_flagged_at_headers(length in 2u64..10_000, limit in 1u64..10_000) {
        let message = format!("HTTP/1.1 200 OK\r\nContent-Length: {length}\r\n\r\n");
        let limits = ParserLimits { max_body_bytes: limit, ..ParserLimits::default() };
        let mut parser = ResponseParser::new(limits);
        let event = parser.feed(message.as_bytes()).unwrap();
        prop_assert!(event.is_some());
        prop_assert_eq!(parser.body_limit_exceeded(), length > limit);
    }

    // エラー後は何を渡してもエラー
    #[test]
    fn error_is_sticky(garbage in "[a-z ]{1,32}", more in body(64)) {
        let mut parser = ResponseParser::new(ParserLimits::default());
        let message = format!("{garbage}\r\n\r\n");
        prop_assert!(parser.feed(message.as_bytes()).is_err());
        prop_assert_eq!(parser.state(), ParserState::Error);
        prop_assert!(parser.feed(&more).is_err());
    }
}

// ========================================
// Keep-Alive の残りバイト
// ========================================

proptest! {
    // 完了後に続くバイトは次の応答のために残る
    #[test]
    fn trailing_bytes_are_kept(body in body(128), next in body(64)) {
        let mut message = format!("HTTP/1.1 200 OK\r\nContent-Length: {}\r\n\r\n", body.len()).into_bytes();
        message.extend_from_slice(&body);
        message.extend_from_slice(&next);

        let mut parser = ResponseParser::new(ParserLimits::default());
        let mut input: &[u8] = &message;
        while parser.feed(input).unwrap().is_some() {
            input = b"";
        }
        prop_assert_eq!(parser.state(), ParserState::Complete);
        prop_assert_eq!(parser.remaining(), next.as_slice());
    }
}
