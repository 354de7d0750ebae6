#![no_main]

use arbitrary::Arbitrary;
use http1_engine::{Headers, Version, encode_request_head};
use libfuzzer_sys::fuzz_target;

#[derive(Arbitrary, Debug)]
struct Input {
    method: String,
    target: String,
    headers: Vec<(String, String)>,
}

fuzz_target!(|input: Input| {
    let mut headers = Headers::new();
    for (name, value) in &input.headers {
        let _ = headers.append(name, value);
    }
    // 検証を通ったヘッダーだけで組み立てるので、出力に余計な改行は現れない
    if let Ok(bytes) = encode_request_head(&input.method, &input.target, Version::Http11, &headers)
    {
        let lines = bytes.windows(2).filter(|w| w == b"\r\n").count();
        assert_eq!(lines, headers.len() + 2);
        assert!(bytes.ends_with(b"\r\n\r\n"));
        assert_eq!(bytes.windows(4).filter(|w| w == b"\r\n\r\n").count(), 1);
    }
});
