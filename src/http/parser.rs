//! Turns buffered bytes into `Request`s.
//!
//! The parser walks `START_LINE → HEADERS → BODY → COMPLETE`, stopping at
//! any point where the buffer runs dry. It also stops once between headers
//! and body (`Parsed::Head`) so the connection can judge the head, answer
//! `Expect`, and set the body limit before a single body byte is consumed.
//!
//! Errors are terminal: once `advance` fails, the byte stream can't be
//! realigned and the connection has to go.

use crate::errors::{Error, Result};
use crate::http::buffer::Buffer;
use crate::http::{BodyFraming, Headers, Method, Request, Version};

use std::str;

/// What a call to `advance` achieved
#[derive(Debug, PartialEq, Eq)]
pub enum Parsed {
    /// The buffer ran out; read more and call again
    NeedMore,
    /// The head is complete and available through `request()`. The next
    /// call starts on the body.
    Head,
    /// The whole request is in; collect it with `take_request()`
    Complete,
}

#[derive(Debug)]
enum State {
    StartLine,
    Headers,
    HeadDone,
    Length { remaining: usize },
    ChunkSize,
    ChunkData { remaining: usize },
    ChunkEnd,
    Trailers,
    Complete,
    Error,
}

#[derive(Debug)]
pub struct RequestParser {
    state: State,
    request: Option<Request>,
    header_count: usize,
    max_headers: usize,
    body_limit: usize,
    /// The start or header line that made the last `advance` fail, if a
    /// line was to blame
    rejected: Vec<u8>,
}

impl RequestParser {
    pub fn new(max_headers: usize, body_limit: usize) -> RequestParser {
        RequestParser {
            state: State::StartLine,
            request: None,
            header_count: 0,
            max_headers: max_headers,
            body_limit: body_limit,
            rejected: Vec::new(),
        }
    }

    /// Caps the decoded body size of the current request. Only meaningful
    /// between `Parsed::Head` and the next call to `advance`.
    pub fn set_body_limit(&mut self, limit: usize) {
        self.body_limit = limit;
    }

    /// The request being parsed, once its start line is in.
    pub fn request(&self) -> Option<&Request> {
        self.request.as_ref()
    }

    /// Hands over a completed request and readies the parser for the next.
    pub fn take_request(&mut self) -> Option<Request> {
        match self.state {
            State::Complete => {
                self.reset();
                self.request.take()
            },
            _ => None
        }
    }

    pub fn reset(&mut self) {
        self.state = State::StartLine;
        self.header_count = 0;
        self.rejected.clear();
    }

    pub fn rejected_line(&self) -> &[u8] {
        &self.rejected
    }

    pub fn advance(&mut self, buf: &mut Buffer) -> Result<Parsed> {
        let result = self.run(buf);
        if result.is_err() {
            self.state = State::Error;
        }
        result
    }

    fn run(&mut self, buf: &mut Buffer) -> Result<Parsed> {
        loop {
            match self.state {
                State::StartLine => {
                    let line = match buf.take_line()? {
                        Some(line) => line,
                        None => return Ok(Parsed::NeedMore)
                    };
                    // Stray CRLFs between requests are tolerated
                    if line.is_empty() {
                        continue;
                    }
                    let request = match parse_request_line(&line) {
                        Ok(request) => request,
                        Err(e) => {
                            self.rejected = line;
                            return Err(e);
                        }
                    };
                    self.request = Some(request);
                    self.header_count = 0;
                    self.state = State::Headers;
                },
                State::Headers => {
                    let line = match buf.take_line()? {
                        Some(line) => line,
                        None => return Ok(Parsed::NeedMore)
                    };
                    if line.is_empty() {
                        let request = self.current()?;
                        request.framing = body_framing(&request.headers)?;
                        self.state = State::HeadDone;
                        return Ok(Parsed::Head);
                    }

                    match parse_header_line(&line) {
                        Ok((name, value)) => self.current()?.headers.insert(name, value),
                        Err(e) => {
                            self.rejected = line.clone();
                            return Err(e);
                        }
                    }

                    self.header_count += 1;
                    if self.header_count > self.max_headers {
                        return Err(Error::HeadersTooLarge);
                    }
                },
                State::HeadDone => {
                    let limit = self.body_limit;
                    let request = self.current()?;
                    self.state = match request.framing {
                        BodyFraming::None | BodyFraming::Length(0) =>
                            State::Complete,
                        BodyFraming::Length(n) if n > limit =>
                            return Err(Error::BodyTooLarge),
                        BodyFraming::Length(n) => {
                            request.body.reserve(n);
                            State::Length { remaining: n }
                        },
                        BodyFraming::Chunked => State::ChunkSize,
                        BodyFraming::Unsupported(_) =>
                            return Err(Error::Framing("unsupported transfer coding")),
                    };
                },
                State::Length { remaining } => {
                    let chunk = buf.take_up_to(remaining);
                    let remaining = remaining - chunk.len();
                    self.current()?.body.extend_from_slice(&chunk);

                    if remaining == 0 {
                        self.state = State::Complete;
                    } else {
                        self.state = State::Length { remaining: remaining };
                        return Ok(Parsed::NeedMore);
                    }
                },
                State::ChunkSize => {
                    match buf.peek().first() {
                        None => return Ok(Parsed::NeedMore),
                        Some(b) if !b.is_ascii_hexdigit() =>
                            return Err(Error::Framing("chunk size is not hex")),
                        Some(_) => ()
                    }

                    let (consumed, size) = match httparse::parse_chunk_size(buf.peek())? {
                        httparse::Status::Complete(parsed) => parsed,
                        httparse::Status::Partial => {
                            if buf.len() > buf.max_line() {
                                return Err(Error::LineTooLong);
                            }
                            return Ok(Parsed::NeedMore);
                        }
                    };
                    buf.consume(consumed);

                    let limit = self.body_limit as u64;
                    let decoded = self.current()?.body.len() as u64;
                    if decoded + size > limit {
                        return Err(Error::BodyTooLarge);
                    }

                    self.state = if size == 0 {
                        State::Trailers
                    } else {
                        State::ChunkData { remaining: size as usize }
                    };
                },
                State::ChunkData { remaining } => {
                    let chunk = buf.take_up_to(remaining);
                    let remaining = remaining - chunk.len();
                    self.current()?.body.extend_from_slice(&chunk);

                    if remaining == 0 {
                        self.state = State::ChunkEnd;
                    } else {
                        self.state = State::ChunkData { remaining: remaining };
                        return Ok(Parsed::NeedMore);
                    }
                },
                State::ChunkEnd => {
                    match buf.take_exact(2) {
                        None => return Ok(Parsed::NeedMore),
                        Some(ref crlf) if crlf == b"\r\n" => {
                            self.state = State::ChunkSize;
                        },
                        Some(_) => return Err(Error::Framing("chunk data not followed by CRLF"))
                    }
                },
                State::Trailers => {
                    let line = match buf.take_line()? {
                        Some(line) => line,
                        None => return Ok(Parsed::NeedMore)
                    };

                    if line.is_empty() {
                        self.state = State::Complete;
                        continue;
                    }

                    // Trailer fields are checked for form but otherwise dropped
                    parse_header_line(&line)?;
                    self.header_count += 1;
                    if self.header_count > self.max_headers {
                        return Err(Error::HeadersTooLarge);
                    }
                },
                State::Complete => return Ok(Parsed::Complete),
                State::Error => return Err(Error::Framing("parser already failed")),
            }
        }
    }

    fn current(&mut self) -> Result<&mut Request> {
        self.request.as_mut().ok_or(Error::Framing("no request in progress"))
    }
}

/// `METHOD SP TARGET SP VERSION`, nothing more and nothing less.
fn parse_request_line(line: &[u8]) -> Result<Request> {
    let mut parts = line.split(|&b| b == b' ');

    let (method, target, version) =
        match (parts.next(), parts.next(), parts.next(), parts.next()) {
            (Some(m), Some(t), Some(v), None)
                if !m.is_empty() && !t.is_empty() && !v.is_empty() => (m, t, v),
            _ => return Err(Error::Framing("malformed request line"))
        };

    if !method.iter().all(|&b| is_token_char(b)) {
        return Err(Error::Framing("invalid method token"));
    }
    if !target.iter().all(|&b| b > 0x20 && b < 0x7f) {
        return Err(Error::Framing("invalid request target"));
    }
    // A token that names HTTP but no version we can read is answered like
    // any other version we don't speak
    let version = match Version::parse(version) {
        Some(v) => v,
        None if version.starts_with(b"HTTP/") => Version::UNRECOGNIZED,
        None => return Err(Error::Framing("invalid version token"))
    };

    // Both were checked to be ASCII above
    let method = str::from_utf8(method).map_err(|_| Error::Framing("invalid method token"))?;
    let target = str::from_utf8(target).map_err(|_| Error::Framing("invalid request target"))?;

    Ok(Request {
        method: Method::parse(method),
        target: target.to_owned(),
        version: version,
        headers: Headers::new(),
        framing: BodyFraming::None,
        body: Vec::new(),
    })
}

fn parse_header_line(line: &[u8]) -> Result<(&str, Vec<u8>)> {
    if line[0] == b' ' || line[0] == b'\t' {
        return Err(Error::Framing("obsolete line folding"));
    }

    let colon = line.iter().position(|&b| b == b':')
        .ok_or(Error::Framing("header line without colon"))?;
    let name = &line[.. colon];

    if name.is_empty() || !name.iter().all(|&b| is_token_char(b)) {
        return Err(Error::Framing("invalid header name"));
    }

    let value = trim_ows(&line[colon + 1 ..]);
    if value.iter().any(|&b| b == b'\r' || b == b'\n' || b == 0) {
        return Err(Error::Framing("invalid header value"));
    }

    let name = str::from_utf8(name).map_err(|_| Error::Framing("invalid header name"))?;
    Ok((name, value.to_vec()))
}

/// Decides how the body is delimited. The two framing mechanisms are
/// mutually exclusive: seeing both is an error, not a precedence question.
fn body_framing(headers: &Headers) -> Result<BodyFraming> {
    match (headers.get("Transfer-Encoding"), headers.get("Content-Length")) {
        (Some(_), Some(_)) =>
            Err(Error::Framing("both Content-Length and Transfer-Encoding")),
        (Some(coding), None) => {
            let coding = String::from_utf8_lossy(trim_ows(coding)).to_ascii_lowercase();
            if coding == "chunked" {
                Ok(BodyFraming::Chunked)
            } else {
                Ok(BodyFraming::Unsupported(coding))
            }
        },
        (None, Some(length)) => parse_content_length(length).map(BodyFraming::Length),
        (None, None) => Ok(BodyFraming::None)
    }
}

/// Repeated `Content-Length` fields arrive folded into a list; they're fine
/// as long as every entry agrees.
fn parse_content_length(value: &[u8]) -> Result<usize> {
    let mut length = None;

    for part in value.split(|&b| b == b',') {
        let part = trim_ows(part);
        if part.is_empty() || part.len() > 19 || !part.iter().all(u8::is_ascii_digit) {
            return Err(Error::Framing("invalid Content-Length"));
        }

        let n = str::from_utf8(part).ok()
            .and_then(|s| s.parse::<usize>().ok())
            .ok_or(Error::Framing("invalid Content-Length"))?;

        match length {
            Some(l) if l != n => return Err(Error::Framing("conflicting Content-Length")),
            _ => length = Some(n)
        }
    }

    length.ok_or(Error::Framing("invalid Content-Length"))
}

fn trim_ows(mut bytes: &[u8]) -> &[u8] {
    while let Some((&first, rest)) = bytes.split_first() {
        if first != b' ' && first != b'\t' {
            break;
        }
        bytes = rest;
    }
    while let Some((&last, rest)) = bytes.split_last() {
        if last != b' ' && last != b'\t' {
            break;
        }
        bytes = rest;
    }
    bytes
}

fn is_token_char(b: u8) -> bool {
    b.is_ascii_alphanumeric() || b"!#$%&'*+-.^_`|~".contains(&b)
}
