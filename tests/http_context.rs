use netpool::{AllocTracker, Buffer, HttpContext};
use std::sync::Arc;

fn context() -> HttpContext {
    HttpContext::new(&Arc::new(AllocTracker::new()))
}

fn body_of(ctx: &HttpContext) -> Vec<u8> {
    let tracker = Arc::new(AllocTracker::new());
    let mut out = Buffer::new(&tracker);
    assert!(ctx.content(&mut out));
    out.as_slice().to_vec()
}

#[test]
fn content_length_body() {
    let mut ctx = context();
    assert!(ctx.append(b"POST /submit HTTP/1.1\r\nContent-Length: 11\r\n\r\nhello world"));
    assert!(ctx.parse());
    assert!(ctx.is_good());

    let (method, uri, version) = ctx.first_line().unwrap();
    assert_eq!((method.as_str(), uri.as_str(), version.as_str()),
               ("POST", "/submit", "HTTP/1.1"));
    assert_eq!(ctx.body_length(), 11);
    assert_eq!(body_of(&ctx), b"hello world");
}

#[test]
fn chunked_body_concatenates_chunks() {
    let mut ctx = context();
    assert!(ctx.append(
        b"POST /upload HTTP/1.1\r\nTransfer-Encoding: chunked\r\n\r\n\
          4\r\nWiki\r\n5\r\npedia\r\n0\r\n\r\n"
    ));
    assert!(ctx.parse());
    assert!(ctx.is_good());
    assert_eq!(ctx.body_length(), 9);
    assert_eq!(body_of(&ctx), b"Wikipedia");
}

#[test]
fn chunked_trailers_land_in_headers() {
    let mut ctx = context();
    assert!(ctx.append(
        b"POST /u HTTP/1.1\r\nTransfer-Encoding: chunked\r\n\r\n\
          3\r\nabc\r\n0\r\nExpires: never\r\n\r\n"
    ));
    assert!(ctx.parse());
    assert!(ctx.is_good());
    assert_eq!(body_of(&ctx), b"abc");
    assert_eq!(ctx.headers()["Expires"], vec!["never"]);
}

#[test]
fn any_byte_chunking_yields_identical_parse() {
    let raw: &[u8] = b"PUT /thing HTTP/1.1\r\nHost: example.com\r\nContent-Length: 5\r\n\r\nabcde";
    for step in [1usize, 2, 3, 7, raw.len()] {
        let mut ctx = context();
        let mut done = false;
        for piece in raw.chunks(step) {
            assert!(ctx.append(piece));
            done = ctx.parse();
        }
        assert!(done, "chunking step {step} never completed");
        assert!(ctx.is_good());
        let (method, uri, version) = ctx.first_line().unwrap();
        assert_eq!((method.as_str(), uri.as_str(), version.as_str()),
                   ("PUT", "/thing", "HTTP/1.1"));
        assert_eq!(ctx.headers()["Host"], vec!["example.com"]);
        assert_eq!(body_of(&ctx), b"abcde");
    }
}

#[test]
fn back_to_back_requests_via_keep_alive() {
    let raw: &[u8] = b"GET /a HTTP/1.1\r\nHost: x\r\nConnection: Keep-Alive\r\n\r\n\
                       GET /b HTTP/1.1\r\nHost: x\r\n\r\n";
    let mut ctx = context();

    // Byte by byte, collecting each completed request.
    let mut first_lines = Vec::new();
    for &byte in raw {
        assert!(ctx.append(&[byte]));
        if ctx.parse() {
            assert!(ctx.is_good());
            first_lines.push(ctx.first_line().unwrap());
            if !ctx.reinit_for_next() {
                break;
            }
        }
    }

    assert_eq!(
        first_lines,
        vec![
            ("GET".to_string(), "/a".to_string(), "HTTP/1.1".to_string()),
            ("GET".to_string(), "/b".to_string(), "HTTP/1.1".to_string()),
        ]
    );
}

#[test]
fn reinit_requires_done_and_keep_alive() {
    let mut ctx = context();
    assert!(!ctx.reinit_for_next()); // nothing parsed yet

    assert!(ctx.append(b"GET / HTTP/1.1\r\nHost: x\r\n\r\n"));
    assert!(ctx.parse());
    assert!(ctx.is_good());
    // Complete but keep-alive was not negotiated.
    assert!(!ctx.reinit_for_next());
}

#[test]
fn surplus_bytes_survive_reinit() {
    let mut ctx = context();
    // First request plus the opening half of the next one.
    assert!(ctx.append(
        b"GET /one HTTP/1.1\r\nConnection: Keep-Alive\r\n\r\nGET /two HTT"
    ));
    assert!(ctx.parse());
    assert!(ctx.is_good());
    assert!(ctx.reinit_for_next());

    assert!(!ctx.parse()); // surplus alone is not a full request
    assert!(ctx.append(b"P/1.1\r\nHost: x\r\n\r\n"));
    assert!(ctx.parse());
    assert!(ctx.is_good());
    let (_, uri, _) = ctx.first_line().unwrap();
    assert_eq!(uri, "/two");
}

#[test]
fn bare_lf_transitions_to_bad() {
    // LF as the very first byte.
    let mut ctx = context();
    assert!(ctx.append(b"\nGET / HTTP/1.1\r\n\r\n"));
    assert!(ctx.parse());
    assert!(!ctx.is_good());

    // LF terminating a header line without CR.
    let mut ctx = context();
    assert!(ctx.append(b"GET / HTTP/1.1\nHost: x\r\n\r\n"));
    assert!(ctx.parse());
    assert!(!ctx.is_good());
}

#[test]
fn header_names_and_values_are_trimmed_case_insensitive() {
    let mut ctx = context();
    assert!(ctx.append(
        b"GET / HTTP/1.1\r\n  content-LENGTH :  3 \r\nCONNECTION: keep-alive\r\n\r\nxyz"
    ));
    assert!(ctx.parse());
    assert!(ctx.is_good());
    assert!(ctx.is_keep_alive());
    assert_eq!(body_of(&ctx), b"xyz");
}

#[test]
fn repeated_headers_collect_as_multimap() {
    let mut ctx = context();
    assert!(ctx.append(
        b"GET / HTTP/1.1\r\nAccept: text/html\r\nAccept: text/plain\r\n\r\n"
    ));
    assert!(ctx.parse());
    assert!(ctx.is_good());
    assert_eq!(ctx.headers()["Accept"], vec!["text/html", "text/plain"]);
}

#[test]
fn status_line_splits_like_a_request_line() {
    let mut ctx = context();
    assert!(ctx.append(b"HTTP/1.1 404 Not Found\r\nContent-Length: 0\r\n\r\n"));
    assert!(ctx.parse());
    assert!(ctx.is_good());
    let (version, code, reason) = ctx.first_line().unwrap();
    assert_eq!((version.as_str(), code.as_str(), reason.as_str()),
               ("HTTP/1.1", "404", "Not Found"));
}

#[test]
fn buffer_grows_past_initial_size() {
    let body = vec![b'x'; 10 * 1024];
    let mut ctx = context();
    let header = format!("POST /big HTTP/1.1\r\nContent-Length: {}\r\n\r\n", body.len());
    assert!(ctx.append(header.as_bytes()));
    assert!(!ctx.parse());
    assert!(ctx.append(&body));
    assert!(ctx.parse());
    assert!(ctx.is_good());
    assert_eq!(ctx.body_length(), body.len());
}

#[test]
fn frame_cap_rejects_oversized_input() {
    let tracker = Arc::new(AllocTracker::new());
    let mut ctx = HttpContext::with_max_buffer_size(&tracker, 0x1000);
    let oversized = vec![b'a'; 0x2000];
    assert!(!ctx.append(&oversized));
}

#[test]
fn partial_chunk_waits_for_more_data() {
    let mut ctx = context();
    assert!(ctx.append(b"POST /u HTTP/1.1\r\nTransfer-Encoding: chunked\r\n\r\n4\r\nWi"));
    assert!(!ctx.parse());
    assert!(ctx.append(b"ki\r\n0\r\n\r\n"));
    assert!(ctx.parse());
    assert!(ctx.is_good());
    assert_eq!(body_of(&ctx), b"Wiki");
}
