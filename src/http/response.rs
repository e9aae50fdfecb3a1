//! Outgoing responses and their serialization.

use crate::http::Headers;
use crate::status::StatusCode;

use mime::Mime;

use std::collections::HashMap;
use std::fs::{self, File};
use std::path::PathBuf;

pub const SERVER_SOFTWARE: &str = concat!("webserv/", env!("CARGO_PKG_VERSION"));

/// Where the bytes after the head come from
#[derive(Debug)]
pub enum ResponseBody {
    Empty,
    Bytes(Vec<u8>),
    /// Streamed from disk as the socket accepts it
    File { file: File, len: u64 },
}

impl ResponseBody {
    pub fn len(&self) -> u64 {
        match *self {
            ResponseBody::Empty => 0,
            ResponseBody::Bytes(ref b) => b.len() as u64,
            ResponseBody::File { len, .. } => len,
        }
    }
}

#[derive(Debug)]
pub struct Response {
    pub status: StatusCode,
    pub headers: Headers,
    pub body: ResponseBody,
}

impl Response {
    pub fn new(status: StatusCode) -> Response {
        Response {
            status: status,
            headers: Headers::new(),
            body: ResponseBody::Empty,
        }
    }

    pub fn with_bytes(status: StatusCode, content_type: &str, body: Vec<u8>) -> Response {
        let mut res = Response::new(status);
        res.headers.set("Content-Type", content_type.as_bytes().to_vec());
        res.body = ResponseBody::Bytes(body);
        res
    }

    pub fn with_file(status: StatusCode, content_type: &str, file: File, len: u64) -> Response {
        let mut res = Response::new(status);
        res.headers.set("Content-Type", content_type.as_bytes().to_vec());
        res.body = ResponseBody::File { file: file, len: len };
        res
    }

    /// An error response with an HTML body: the configured page for this
    /// status if one is set and readable, the built-in one otherwise.
    pub fn error(status: StatusCode, pages: &HashMap<u16, PathBuf>) -> Response {
        let body = pages.get(&status.code())
            .and_then(|path| match fs::read(path) {
                Ok(page) => Some(page),
                Err(e) => {
                    warn!("Error page {} unreadable: {}", path.display(), e);
                    None
                }
            })
            .unwrap_or_else(|| error_messages::page(status));

        Response::with_bytes(status, "text/html", body)
    }

    /// A redirect to `location` with a small HTML body for clients that
    /// don't follow it.
    pub fn redirect(status: StatusCode, location: &str) -> Response {
        let body = format!("<!doctype html><html><head><title>{}</title></head>\
                            <body><h1>{}</h1><p>Moved to <a href=\"{}\">{}</a>.</p></body></html>",
                           status, status, location, location);
        let mut res = Response::with_bytes(status, "text/html", body.into_bytes());
        res.headers.set("Location", location.as_bytes().to_vec());
        res
    }

    /// Splits the response into its serialized head and its body.
    ///
    /// Framing is the server's business alone: any `Content-Length` or
    /// `Transfer-Encoding` set by a handler is dropped, and exactly one
    /// `Content-Length` is written unless the status forbids a body.
    pub fn into_wire(mut self, keep_alive: bool) -> (Vec<u8>, ResponseBody) {
        self.headers.remove("Content-Length");
        self.headers.remove("Transfer-Encoding");
        self.headers.remove("Connection");

        if self.status.allows_body() {
            let len = self.body.len().to_string();
            self.headers.set("Content-Length", len.into_bytes());
        } else {
            self.body = ResponseBody::Empty;
        }

        if !self.headers.contains("Server") {
            self.headers.set("Server", SERVER_SOFTWARE.as_bytes().to_vec());
        }
        let connection: &[u8] = if keep_alive { b"keep-alive" } else { b"close" };
        self.headers.set("Connection", connection.to_vec());

        let mut head = Vec::with_capacity(256);
        head.extend_from_slice(format!("HTTP/1.1 {}\r\n", self.status).as_bytes());

        for (name, content) in self.headers.iter() {
            head.extend_from_slice(name.as_bytes());
            head.extend_from_slice(b": ");
            head.extend_from_slice(content);
            head.extend_from_slice(b"\r\n");
        }
        head.extend_from_slice(b"\r\n");

        (head, self.body)
    }
}

/// Translates a strongly-typed Mime type into a string, without parameters
pub fn mime_as_string(mime: &Mime) -> String {
    mime.essence_str().to_owned()
}

pub mod error_messages {
    use crate::status::StatusCode;

    fn explanation(status: StatusCode) -> &'static str {
        match status.code() {
            400 => "Your request had some kind of bad syntax. Are you using netcat?",
            403 => "You don't have permission to do that. Sorry.",
            404 => "I couldn't find that file. Sorry.",
            405 => "That method isn't allowed here.",
            411 => "Requests like this one need to say how long their body is.",
            413 => "That body is bigger than I'm willing to accept.",
            417 => "I can't meet that expectation.",
            501 => "I don't know how to do that.",
            502 => "The script behind this page didn't answer properly.",
            504 => "The script behind this page took too long.",
            505 => "I only speak HTTP/1.0 and HTTP/1.1.",
            _ => "Something went wrong on my side. There's nothing you can do; maybe come back later."
        }
    }

    /// The built-in page for an error status
    pub fn page(status: StatusCode) -> Vec<u8> {
        format!("<!doctype html><html><head><title>Error</title></head><body>\
                 <h1>{}</h1><p>{}</p></body></html>",
                status, explanation(status))
            .into_bytes()
    }
}
