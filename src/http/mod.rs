//! HTTP/1.1 message types and the pieces that frame them on the wire.

pub mod buffer;
pub mod expect;
pub mod parser;
pub mod response;

use crate::errors::{Error, Result};
use crate::filesystem::normalize_path;

use std::fmt;
use std::str;

/// Request methods. Anything the server has no handler for lands in
/// `Other` and is answered with 501.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Method {
    Get,
    Post,
    Delete,
    Other(String),
}

impl Method {
    pub fn parse(token: &str) -> Method {
        match token {
            "GET" => Method::Get,
            "POST" => Method::Post,
            "DELETE" => Method::Delete,
            other => Method::Other(other.to_owned())
        }
    }

    pub fn as_str(&self) -> &str {
        match *self {
            Method::Get => "GET",
            Method::Post => "POST",
            Method::Delete => "DELETE",
            Method::Other(ref s) => s
        }
    }

    #[inline]
    pub fn is_implemented(&self) -> bool {
        match *self {
            Method::Other(_) => false,
            _ => true
        }
    }

    /// Methods whose requests must say how long their body is
    #[inline]
    pub fn expects_body(&self) -> bool {
        *self == Method::Post
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The `HTTP/x.y` version of a request line
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Version {
    pub major: u16,
    pub minor: u16,
}

impl Version {
    pub const HTTP_10: Version = Version { major: 1, minor: 0 };
    pub const HTTP_11: Version = Version { major: 1, minor: 1 };
    /// Stands in for an `HTTP/` token whose numbers can't be read
    pub const UNRECOGNIZED: Version = Version { major: 0, minor: 0 };

    /// Parses `HTTP/<digits>[.<digits>]`. Anything else isn't a version
    /// token at all, which is a different fault from an unsupported one.
    pub fn parse(token: &[u8]) -> Option<Version> {
        let rest = token.strip_prefix(b"HTTP/")?;
        let (major, minor) = match rest.iter().position(|&b| b == b'.') {
            Some(dot) => (&rest[.. dot], &rest[dot + 1 ..]),
            None => (rest, &b"0"[..])
        };

        Some(Version {
            major: parse_digits(major)?,
            minor: parse_digits(minor)?,
        })
    }

    #[inline]
    pub fn is_supported(&self) -> bool {
        *self == Version::HTTP_10 || *self == Version::HTTP_11
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "HTTP/{}.{}", self.major, self.minor)
    }
}

fn parse_digits(digits: &[u8]) -> Option<u16> {
    if digits.is_empty() || digits.len() > 3 ||
        !digits.iter().all(u8::is_ascii_digit) {
        return None;
    }
    str::from_utf8(digits).ok()?.parse().ok()
}

/// A map of HTTP headers
///
/// Keys are case-normalized on input: the first word, and any words after a
/// hyphen, are capitalized, with all other letters lowercased. Field order
/// is kept.
#[derive(Debug, Clone, Default)]
pub struct Headers {
    fields: Vec<(String, Vec<u8>)>,
}

pub fn normalize_header_name(name: &str) -> String {
    let mut normalized = String::with_capacity(name.len());
    let mut after_hyphen = true;

    for ch in name.chars() {
        if after_hyphen {
            normalized.push(ch.to_ascii_uppercase());
        } else {
            normalized.push(ch.to_ascii_lowercase());
        }
        after_hyphen = ch == '-';
    }

    normalized
}

#[test]
fn normalize_content_type() {
    let expected = "Content-Type";
    assert_eq!(expected, &normalize_header_name("Content-Type"));
    assert_eq!(expected, &normalize_header_name("content-type"));
    assert_eq!(expected, &normalize_header_name("CONTENT-TYPE"));
    assert_eq!(expected, &normalize_header_name("cOnTeNt-TyPe"));
}

impl Headers {
    pub fn new() -> Headers {
        Headers { fields: Vec::new() }
    }

    /// Adds a field. A repeated name is folded into the first occurrence as
    /// a comma-separated list, so every name maps to exactly one value.
    pub fn insert(&mut self, key: &str, mut value: Vec<u8>) {
        let key = normalize_header_name(key);
        match self.fields.iter_mut().find(|field| field.0 == key) {
            Some(field) => {
                let entry = &mut field.1;
                entry.reserve(value.len() + 1);
                entry.push(b',');
                entry.append(&mut value);
            },
            None => self.fields.push((key, value))
        }
    }

    /// Adds a field without folding, for response fields like `Set-Cookie`
    /// that can't be combined.
    pub fn append(&mut self, key: &str, value: Vec<u8>) {
        self.fields.push((normalize_header_name(key), value));
    }

    /// Replaces every field of this name with a single one.
    pub fn set(&mut self, key: &str, value: Vec<u8>) {
        self.remove(key);
        self.append(key, value);
    }

    pub fn remove(&mut self, key: &str) {
        let key = normalize_header_name(key);
        self.fields.retain(|field| field.0 != key);
    }

    pub fn get(&self, key: &str) -> Option<&[u8]> {
        let key = normalize_header_name(key);
        self.fields.iter()
            .find(|field| field.0 == key)
            .map(|field| field.1.as_slice())
    }

    /// The value as text, if it is valid UTF-8
    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.get(key).and_then(|v| str::from_utf8(v).ok())
    }

    pub fn contains(&self, key: &str) -> bool {
        self.get(key).is_some()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &[u8])> {
        self.fields.iter().map(|(k, v)| (k.as_str(), v.as_slice()))
    }
}

/// How the extent of a request body is determined
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BodyFraming {
    None,
    Length(usize),
    Chunked,
    /// A `Transfer-Encoding` the server doesn't decode
    Unsupported(String),
}

impl BodyFraming {
    /// True if body bytes may follow the head on the wire
    pub fn has_body(&self) -> bool {
        match *self {
            BodyFraming::None | BodyFraming::Length(0) => false,
            _ => true
        }
    }
}

/// An incoming request from the client
///
/// While the parser is still in the body, `body` holds what has been
/// decoded so far.
#[derive(Debug, Clone)]
pub struct Request {
    pub method: Method,
    pub target: String,
    pub version: Version,
    pub headers: Headers,
    pub framing: BodyFraming,
    pub body: Vec<u8>,
}

impl Request {
    /// Whether the connection may carry another request after this one.
    ///
    /// HTTP/1.1 stays open unless told `close`; HTTP/1.0 closes unless told
    /// `keep-alive`.
    pub fn keep_alive(&self) -> bool {
        let tokens = self.headers.get_str("Connection")
            .map(|v| v.split(',')
                 .map(|t| t.trim().to_ascii_lowercase())
                 .collect::<Vec<_>>())
            .unwrap_or_default();

        if tokens.iter().any(|t| t == "close") {
            return false;
        }
        if self.version == Version::HTTP_11 {
            return true;
        }
        tokens.iter().any(|t| t == "keep-alive")
    }

    pub fn content_type(&self) -> Option<&str> {
        self.headers.get_str("Content-Type")
    }
}

/// A request-target in origin form, split and normalized
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Target {
    /// Decoded path with a single leading `/`, used for route matching
    pub path: String,
    /// The raw query, without the `?`
    pub query: String,
}

impl Target {
    pub fn parse(raw: &str) -> Result<Target> {
        let (path, query) = match raw.find('?') {
            Some(q) => (&raw[.. q], &raw[q + 1 ..]),
            None => (raw, "")
        };

        let normalized = normalize_path(path.as_bytes())?;
        let mut decoded = String::from("/");
        decoded.push_str(str::from_utf8(&normalized)
                         .map_err(|_| Error::IllegalPercentEncoding)?);

        Ok(Target {
            path: decoded,
            query: query.to_owned(),
        })
    }
}
