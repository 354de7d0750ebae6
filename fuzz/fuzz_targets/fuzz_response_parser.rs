#![no_main]

use arbitrary::Arbitrary;
use http1_engine::{ParseEvent, ParserLimits, ParserState, ResponseParser};
use libfuzzer_sys::fuzz_target;

#[derive(Arbitrary, Debug)]
struct Input<'a> {
    data: &'a [u8],
    split: u8,
    head: bool,
    eof: bool,
}

fn run(data: &[u8], split: usize, head: bool, eof: bool) -> (Vec<u8>, ParserState) {
    let method = if head { "HEAD" } else { "GET" };
    let mut parser = ResponseParser::for_request_method(method, ParserLimits::default());
    let mut body = Vec::new();
    for fragment in data.chunks(split.max(1)) {
        let mut input = fragment;
        loop {
            match parser.feed(input) {
                Ok(Some(ParseEvent::BodyChunk(chunk))) => body.extend_from_slice(&chunk),
                Ok(Some(_)) => {}
                Ok(None) => break,
                Err(_) => return (body, ParserState::Error),
            }
            input = &[];
        }
    }
    if eof {
        parser.finish();
        while let Ok(Some(event)) = parser.feed(&[]) {
            if let ParseEvent::BodyChunk(chunk) = event {
                body.extend_from_slice(&chunk);
            }
        }
    }
    (body, parser.state())
}

fuzz_target!(|input: Input| {
    // 一括で渡した場合と分割して渡した場合でボディと状態が一致する
    let whole = run(input.data, input.data.len(), input.head, input.eof);
    let split = run(input.data, input.split as usize, input.head, input.eof);
    if whole.1 != ParserState::Error && split.1 != ParserState::Error {
        assert_eq!(whole, split);
    }
});
