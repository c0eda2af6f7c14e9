//! Streaming HTTP/1.1 framer.
//!
//! One [`HttpContext`] per connection turns an arbitrary byte-chunking of a
//! request (or response) into a parsed frame: first line, headers, and a
//! body that may be plain, `Content-Length`-delimited, or chunked. Bytes are
//! fed incrementally and parsing picks up where it stopped; the caller polls
//! [`parse`](HttpContext::parse) after every append and reads the results
//! once the frame is complete.

use std::collections::HashMap;
use std::sync::Arc;

use crate::alloc::AllocTracker;
use crate::buffer::Buffer;

/// Default cap on a single frame's buffered bytes.
pub const DEFAULT_MAX_BUFFER_SIZE: usize = 0x100_0000; // 16 MiB

const INITIAL_BUFFER_SIZE: usize = 0x1000; // 4 KiB
const LOW_SPACE_WATERMARK: usize = 0x800; // grow when less than 2 KiB free

const LINE_LEN_UNKNOWN: usize = usize::MAX;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Start,
    ReadHeader,
    ReadBody,
    ReadChunkHeader,
    ReadChunkBody,
    ReadChunkFooter,
    Done,
    Bad,
}

/// Incremental parser state for one HTTP/1.1 frame on one connection.
///
/// The internal buffer starts at 4 KiB and doubles as needed up to the
/// configured cap. Feed bytes with [`append`](Self::append), or avoid the
/// copy by receiving directly into [`recv_buffer`](Self::recv_buffer) and
/// committing with [`advance`](Self::advance).
pub struct HttpContext {
    max_buffer_size: usize,
    buf: Buffer,
    now_index: usize,
    analysis_index: usize,

    state: State,
    /// Header and trailer lines as `(start, length)` into the buffer;
    /// `LINE_LEN_UNKNOWN` marks a line still being received.
    lines: Vec<(usize, usize)>,
    header_size: usize,
    keep_alive: bool,
    chunked: bool,
    content_length: usize,
    chunk_size: usize,
    chunk_size_started: bool,
    chunk_size_done: bool,
    /// Body spans in arrival order: the single content run, or one span per
    /// chunk.
    chunks: Vec<(usize, usize)>,
}

impl HttpContext {
    pub fn new(tracker: &Arc<AllocTracker>) -> Self {
        Self::with_max_buffer_size(tracker, DEFAULT_MAX_BUFFER_SIZE)
    }

    pub fn with_max_buffer_size(tracker: &Arc<AllocTracker>, max_buffer_size: usize) -> Self {
        let mut buf = Buffer::new(tracker);
        buf.resize(INITIAL_BUFFER_SIZE, 0);
        Self {
            max_buffer_size,
            buf,
            now_index: 0,
            analysis_index: 0,
            state: State::Start,
            lines: Vec::with_capacity(16),
            header_size: 0,
            keep_alive: false,
            chunked: false,
            content_length: 0,
            chunk_size: 0,
            chunk_size_started: false,
            chunk_size_done: false,
            chunks: Vec::new(),
        }
    }

    // ============================================================================
    // Receiving
    // ============================================================================

    /// The writable region to receive into. Grows the buffer (doubling, up
    /// to the cap) when free space runs low; empty once the cap is reached.
    pub fn recv_buffer(&mut self) -> &mut [u8] {
        if self.buf.len() - self.now_index < LOW_SPACE_WATERMARK {
            let grown = (self.buf.len() * 2).min(self.max_buffer_size);
            if grown > self.buf.len() {
                self.buf.resize(grown, self.now_index);
            }
        }
        &mut self.buf.as_mut_slice()[self.now_index..]
    }

    /// Commits `length` bytes written into [`recv_buffer`](Self::recv_buffer).
    pub fn advance(&mut self, length: usize) {
        if self.now_index + length <= self.buf.len() {
            self.now_index += length;
        }
    }

    /// Appends a copy of `data`, growing as needed. Returns `false` when the
    /// frame would exceed the buffer cap; the connection should be closed.
    pub fn append(&mut self, data: &[u8]) -> bool {
        let mut offset = 0;
        while offset < data.len() {
            let space = self.recv_buffer();
            if space.is_empty() {
                return false;
            }
            let n = space.len().min(data.len() - offset);
            space[..n].copy_from_slice(&data[offset..offset + n]);
            self.advance(n);
            offset += n;
        }
        true
    }

    // ============================================================================
    // Parsing
    // ============================================================================

    /// Runs the parser over everything received so far. Returns `true` once
    /// the frame is terminal - complete ([`is_good`](Self::is_good)) or
    /// malformed - and `false` while more bytes are needed.
    pub fn parse(&mut self) -> bool {
        loop {
            if matches!(self.state, State::Done | State::Bad) {
                return true;
            }
            if self.now_index <= self.analysis_index {
                return false;
            }
            match self.state {
                State::Start => {
                    if self.analysis_index != 0 || self.buf.as_slice()[0] == b'\n' {
                        self.state = State::Bad;
                        return true;
                    }
                    self.state = State::ReadHeader;
                    self.lines.push((0, LINE_LEN_UNKNOWN));
                }
                State::ReadHeader => {
                    if !self.scan_lines(false) {
                        match self.state {
                            State::Bad => return true,
                            State::ReadHeader => return false,
                            _ => {} // blank line reached; headers decoded
                        }
                    }
                }
                State::ReadBody => {
                    if self.now_index - self.analysis_index < self.content_length {
                        return false;
                    }
                    self.chunks.push((self.analysis_index, self.content_length));
                    self.analysis_index += self.content_length;
                    self.state = State::Done;
                    return true;
                }
                State::ReadChunkHeader => {
                    if !self.scan_chunk_header() {
                        match self.state {
                            State::Bad => return true,
                            State::ReadChunkHeader => return false,
                            _ => {}
                        }
                    }
                }
                State::ReadChunkBody => {
                    // Payload plus its trailing CRLF must be present.
                    if self.now_index - self.analysis_index < self.chunk_size.saturating_add(2) {
                        return false;
                    }
                    self.chunks.push((self.analysis_index, self.chunk_size));
                    self.analysis_index += self.chunk_size + 2;
                    self.state = State::ReadChunkHeader;
                    self.chunk_size = 0;
                    self.chunk_size_started = false;
                    self.chunk_size_done = false;
                }
                State::ReadChunkFooter => {
                    if !self.scan_lines(true) {
                        match self.state {
                            State::Bad | State::Done => return true,
                            State::ReadChunkFooter => return false,
                            _ => {}
                        }
                    }
                }
                State::Done | State::Bad => return true,
            }
        }
    }

    // Consumes CRLF-terminated lines until the blank line that ends the
    // header (or trailer) block. Returns false when it ran out of input or
    // hit a terminal state; the caller inspects self.state.
    fn scan_lines(&mut self, trailer: bool) -> bool {
        while self.analysis_index < self.now_index {
            let idx = self.analysis_index;
            if self.buf.as_slice()[idx] == b'\n' {
                if self.buf.as_slice()[idx - 1] != b'\r' {
                    self.state = State::Bad;
                    return false;
                }
                let last = self
                    .lines
                    .last_mut()
                    .expect("an open line exists while scanning");
                last.1 = idx - 1 - last.0;
                if last.1 == 0 {
                    // Blank line: block complete.
                    self.lines.pop();
                    self.analysis_index = idx + 1;
                    if trailer {
                        self.state = State::Done;
                    } else {
                        self.header_size = self.analysis_index;
                        self.decode_header_and_update_state();
                    }
                    return true;
                }
                self.lines.push((idx + 1, LINE_LEN_UNKNOWN));
            }
            self.analysis_index += 1;
        }
        false
    }

    // Consumes the hex chunk-size line. Digits accumulate until the first
    // non-hex byte; anything after that up to the CRLF (chunk extensions) is
    // skipped.
    fn scan_chunk_header(&mut self) -> bool {
        while self.analysis_index < self.now_index {
            let idx = self.analysis_index;
            let ch = self.buf.as_slice()[idx];
            if ch == b'\n' {
                if self.buf.as_slice()[idx - 1] != b'\r' {
                    self.state = State::Bad;
                    return false;
                }
                self.analysis_index = idx + 1;
                if self.chunk_size > 0 {
                    self.state = State::ReadChunkBody;
                } else {
                    self.state = State::ReadChunkFooter;
                    self.lines.push((self.analysis_index, LINE_LEN_UNKNOWN));
                }
                return true;
            } else if !self.chunk_size_done {
                match ch {
                    b'0'..=b'9' => {
                        self.push_chunk_digit(ch - b'0');
                    }
                    b'a'..=b'f' => {
                        self.push_chunk_digit(ch - b'a' + 10);
                    }
                    b'A'..=b'F' => {
                        self.push_chunk_digit(ch - b'A' + 10);
                    }
                    _ => {
                        if self.chunk_size_started || !ch.is_ascii_whitespace() {
                            self.chunk_size_done = true;
                        }
                    }
                }
            }
            self.analysis_index += 1;
        }
        false
    }

    // Saturates on absurd sizes; an unsatisfiable chunk runs into the
    // buffer cap instead of wrapping around.
    fn push_chunk_digit(&mut self, digit: u8) {
        self.chunk_size = self
            .chunk_size
            .saturating_mul(16)
            .saturating_add(usize::from(digit));
        self.chunk_size_started = true;
    }

    fn decode_header_and_update_state(&mut self) {
        // Line 0 is the request/status line; header lines follow it.
        for index in 1..self.lines.len() {
            let (start, len) = self.lines[index];
            if start > self.header_size {
                break; // Trailer lines are decoded by nobody.
            }
            if len == LINE_LEN_UNKNOWN {
                continue;
            }
            let Some((name, value)) = split_header(&self.buf.as_slice()[start..start + len]) else {
                continue;
            };
            if name.eq_ignore_ascii_case("Connection") {
                self.keep_alive = value.eq_ignore_ascii_case("Keep-Alive");
            } else if name.eq_ignore_ascii_case("Content-Length") {
                self.content_length = parse_leading_digits(value);
            } else if name.eq_ignore_ascii_case("Transfer-Encoding") {
                self.chunked = value.eq_ignore_ascii_case("chunked");
            }
        }

        if self.chunked {
            self.state = State::ReadChunkHeader;
            self.chunk_size = 0;
            self.chunk_size_started = false;
            self.chunk_size_done = false;
        } else if self.content_length > 0 {
            self.state = State::ReadBody;
        } else {
            self.state = State::Done;
        }
    }

    // ============================================================================
    // Results
    // ============================================================================

    /// `true` when a complete, well-formed frame has been parsed.
    pub fn is_good(&self) -> bool {
        self.state == State::Done
    }

    /// `true` when the peer negotiated `Connection: Keep-Alive`.
    pub fn is_keep_alive(&self) -> bool {
        self.keep_alive
    }

    /// The first line split on its two spaces: `(method, uri, version)` for
    /// a request, `(version, code, reason)` for a response. `None` until the
    /// frame is complete or if the line is not shaped that way.
    pub fn first_line(&self) -> Option<(String, String, String)> {
        if self.state != State::Done {
            return None;
        }
        let (start, len) = *self.lines.first()?;
        let line = std::str::from_utf8(&self.buf.as_slice()[start..start + len]).ok()?;
        let first_space = line.find(' ')?;
        let rest = &line[first_space + 1..];
        let second_space = rest.find(' ')?;
        Some((
            line[..first_space].to_string(),
            rest[..second_space].to_string(),
            rest[second_space + 1..].to_string(),
        ))
    }

    /// Headers (and, for chunked frames, trailers) as a multimap of trimmed
    /// names to trimmed values. Empty until the frame is complete.
    pub fn headers(&self) -> HashMap<String, Vec<String>> {
        let mut headers: HashMap<String, Vec<String>> = HashMap::new();
        if self.state != State::Done {
            return headers;
        }
        for &(start, len) in self.lines.iter().skip(1) {
            if len == LINE_LEN_UNKNOWN {
                continue;
            }
            if let Some((name, value)) = split_header(&self.buf.as_slice()[start..start + len]) {
                headers
                    .entry(name.to_string())
                    .or_default()
                    .push(value.to_string());
            }
        }
        headers
    }

    /// Total body length: the content run, or the chunk lengths summed.
    pub fn body_length(&self) -> usize {
        self.chunks.iter().map(|&(_, len)| len).sum()
    }

    /// Copies the body - contiguous content or concatenated chunks - into
    /// `out`. Returns `false` until the frame is complete.
    pub fn content(&self, out: &mut Buffer) -> bool {
        if self.state != State::Done {
            return false;
        }
        out.resize(self.body_length(), 0);
        let mut offset = 0;
        for &(start, len) in &self.chunks {
            out.as_mut_slice()[offset..offset + len]
                .copy_from_slice(&self.buf.as_slice()[start..start + len]);
            offset += len;
        }
        true
    }

    /// Prepares for the next frame on a keep-alive connection: surplus bytes
    /// shift to the front and parsing state resets. Valid only when the
    /// current frame is complete and keep-alive was negotiated; otherwise
    /// returns `false` and the connection should be closed.
    pub fn reinit_for_next(&mut self) -> bool {
        if self.state != State::Done || !self.keep_alive {
            return false;
        }

        let extra = self.now_index - self.analysis_index;
        self.buf
            .as_mut_slice()
            .copy_within(self.analysis_index..self.now_index, 0);
        self.now_index = extra;
        self.analysis_index = 0;

        self.state = State::Start;
        self.lines.clear();
        self.header_size = 0;
        self.keep_alive = false;
        self.chunked = false;
        self.content_length = 0;
        self.chunk_size = 0;
        self.chunk_size_started = false;
        self.chunk_size_done = false;
        self.chunks.clear();
        true
    }
}

// Splits "Name: value" with both sides trimmed; None without a colon, a
// name, or a value.
fn split_header(line: &[u8]) -> Option<(&str, &str)> {
    let line = std::str::from_utf8(line).ok()?;
    let colon = line.find(':')?;
    let name = line[..colon].trim();
    let value = line[colon + 1..].trim();
    if name.is_empty() || value.is_empty() {
        return None;
    }
    Some((name, value))
}

// atoi-style: parses leading ASCII digits, ignoring whatever follows.
fn parse_leading_digits(value: &str) -> usize {
    value
        .bytes()
        .take_while(u8::is_ascii_digit)
        .fold(0usize, |acc, b| {
            acc.saturating_mul(10).saturating_add(usize::from(b - b'0'))
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn context() -> HttpContext {
        HttpContext::new(&Arc::new(AllocTracker::new()))
    }

    #[test]
    fn parses_request_without_body() {
        let mut ctx = context();
        assert!(ctx.append(b"GET /index.html HTTP/1.1\r\nHost: example.com\r\n\r\n"));
        assert!(ctx.parse());
        assert!(ctx.is_good());

        let (method, uri, version) = ctx.first_line().unwrap();
        assert_eq!(method, "GET");
        assert_eq!(uri, "/index.html");
        assert_eq!(version, "HTTP/1.1");
        assert_eq!(ctx.headers()["Host"], vec!["example.com"]);
        assert_eq!(ctx.body_length(), 0);
    }

    #[test]
    fn bare_lf_is_rejected() {
        let mut ctx = context();
        assert!(ctx.append(b"GET / HTTP/1.1\nHost: x\r\n\r\n"));
        assert!(ctx.parse());
        assert!(!ctx.is_good());
    }
}
