//! Run CGI/1.1 scripts and translate their output into responses
//!
//! A script is found from the request path, started with its metavariables
//! in the environment, fed the request body on stdin, and read on stdout.
//! Its output is a header block, an empty line, and a body.

pub mod gateway;
pub mod parser;
pub mod process;

use crate::errors::{Error, Result};
use crate::http::{Request, Target};
use crate::http::response::{Response, ResponseBody, SERVER_SOFTWARE};
use crate::status::StatusCode;

use std::env;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::str;

/// A status line
#[derive(Debug, PartialEq, Eq)]
pub struct Status {
    pub code: u16,
    pub reason_phrase: Vec<u8>
}

/// A location redirect
#[derive(Debug, PartialEq, Eq)]
pub struct Location {
    pub url: Vec<u8>
}

/// Other headers
#[derive(Debug, PartialEq, Eq)]
pub struct Header {
    pub name: Vec<u8>,
    pub content: Vec<u8>
}

/// The header portion of a document
#[derive(Debug, PartialEq, Eq)]
pub struct DocumentHeaders {
    pub content_type: Option<Vec<u8>>,
    pub status: Option<Status>,
    pub location: Option<Location>,
    pub headers: Vec<Header>
}

impl DocumentHeaders {
    /// Sorts parsed header lines into the fields CGI gives meaning to.
    pub fn from_headers(headers: Vec<Header>) -> Result<DocumentHeaders> {
        let mut doc = DocumentHeaders {
            content_type: None,
            status: None,
            location: None,
            headers: Vec::new()
        };

        for header in headers {
            let name = str::from_utf8(&header.name)
                .map_err(|_| Error::MalformedCgiOutput)?
                .to_ascii_lowercase();

            match &name[..] {
                "status" => {
                    let (_, status) = parser::status(&header.content)
                        .map_err(|_| Error::MalformedCgiOutput)?;
                    if status.code < 200 {
                        return Err(Error::MalformedCgiOutput);
                    }
                    doc.status = Some(status);
                },
                "location" => doc.location = Some(Location { url: header.content }),
                "content-type" => doc.content_type = Some(header.content),
                _ => doc.headers.push(header)
            }
        }

        Ok(doc)
    }

    /// The status the script asked for. A bare redirect means 302.
    pub fn status_code(&self) -> StatusCode {
        match (&self.status, &self.location) {
            (&Some(ref status), _) => StatusCode(status.code),
            (&None, &Some(_)) => StatusCode::FOUND,
            (&None, &None) => StatusCode::OK,
        }
    }

    pub fn into_response(self, body: Vec<u8>) -> Response {
        let status = self.status_code();
        let mut res = Response::new(status);

        res.headers.set("Content-Type",
                        self.content_type.unwrap_or_else(|| b"text/plain".to_vec()));
        if let Some(location) = self.location {
            res.headers.set("Location", location.url);
        }

        for Header { name, content } in self.headers {
            let name = String::from_utf8_lossy(&name);
            // Framing belongs to the server
            match &name.to_ascii_lowercase()[..] {
                "content-length" | "transfer-encoding" | "connection" => continue,
                _ => res.headers.append(&name, content)
            }
        }

        res.body = ResponseBody::Bytes(body);
        res
    }
}

/// Where a script lives, and how the request path splits around it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScriptLocation {
    /// URI path of the script itself
    pub script_name: String,
    pub script_filename: PathBuf,
    /// Whatever followed the script in the path, with its leading `/`
    pub path_info: String,
}

/// Finds the script in a request path: the first segment below the route
/// prefix that ends in `extension`. Paths without one aren't CGI requests.
pub fn locate_script(prefix: &str, root: &Path, relative: &str, extension: &str)
                     -> Option<ScriptLocation> {
    let mut consumed = 0;

    for segment in relative.split('/') {
        consumed += segment.len();

        if segment.len() > extension.len() && segment.ends_with(extension) {
            let script = &relative[.. consumed];
            let path_info = &relative[consumed ..];

            return Some(ScriptLocation {
                script_name: format!("{}/{}", prefix, script),
                script_filename: root.join(script),
                path_info: path_info.to_owned(),
            });
        }

        consumed += 1;
    }

    None
}

/// Facts about the connection a request came in on
#[derive(Debug, Clone)]
pub struct ServerMeta {
    pub server_name: String,
    pub server_port: u16,
    pub remote: SocketAddr,
}

/// The CGI/1.1 metavariables for a request. Every standard variable is
/// present; the ones the request has nothing for are empty.
pub fn metavariables(req: &Request, target: &Target, script: &ScriptLocation,
                     meta: &ServerMeta) -> Vec<(String, Vec<u8>)> {
    let server_name = req.headers.get_str("Host")
        .map(|host| host.split(':').next().unwrap_or(host).to_owned())
        .filter(|host| !host.is_empty())
        .unwrap_or_else(|| meta.server_name.clone());

    let content_length = if req.framing.has_body() || !req.body.is_empty() {
        req.body.len().to_string()
    } else {
        String::new()
    };

    let path = env::var("PATH")
        .unwrap_or_else(|_| String::from("/usr/local/bin:/usr/bin:/bin"));

    let mut metavars: Vec<(String, Vec<u8>)> = vec![
        (String::from("GATEWAY_INTERFACE"), b"CGI/1.1".to_vec()),
        (String::from("SERVER_SOFTWARE"), SERVER_SOFTWARE.as_bytes().to_vec()),
        (String::from("SERVER_NAME"), server_name.into_bytes()),
        (String::from("SERVER_PORT"), meta.server_port.to_string().into_bytes()),
        (String::from("SERVER_PROTOCOL"), req.version.to_string().into_bytes()),
        (String::from("REQUEST_METHOD"), req.method.as_str().as_bytes().to_vec()),
        (String::from("REQUEST_URI"), req.target.as_bytes().to_vec()),
        (String::from("SCRIPT_NAME"), script.script_name.as_bytes().to_vec()),
        (String::from("SCRIPT_FILENAME"),
         script.script_filename.to_string_lossy().into_owned().into_bytes()),
        (String::from("PATH_INFO"), script.path_info.as_bytes().to_vec()),
        (String::from("QUERY_STRING"), target.query.as_bytes().to_vec()),
        (String::from("CONTENT_LENGTH"), content_length.into_bytes()),
        (String::from("CONTENT_TYPE"),
         req.headers.get("Content-Type").unwrap_or(b"").to_vec()),
        (String::from("REMOTE_ADDR"), meta.remote.ip().to_string().into_bytes()),
        (String::from("REMOTE_PORT"), meta.remote.port().to_string().into_bytes()),
        (String::from("REDIRECT_STATUS"), b"200".to_vec()),
        (String::from("PATH"), path.into_bytes()),
    ];

    for (name, value) in req.headers.iter() {
        match name {
            // Already passed as CONTENT_*
            "Content-Type" | "Content-Length" => continue,
            _ => metavars.push(
                (format!("HTTP_{}", name.replace("-", "_").to_ascii_uppercase()),
                 value.to_vec()))
        }
    }

    metavars
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::http::{BodyFraming, Headers, Method, Version};

    fn value<'a>(vars: &'a [(String, Vec<u8>)], name: &str) -> &'a [u8] {
        &vars.iter().find(|&&(ref n, _)| n == name).unwrap().1
    }

    #[test]
    fn locate_script_splits_path_info() {
        let loc = locate_script("/cgi-bin", Path::new("/srv/cgi"), "a/test.py/extra/bits", ".py")
            .unwrap();
        assert_eq!(loc.script_name, "/cgi-bin/a/test.py");
        assert_eq!(loc.script_filename, PathBuf::from("/srv/cgi/a/test.py"));
        assert_eq!(loc.path_info, "/extra/bits");

        let loc = locate_script("", Path::new("/srv"), "x.sh", ".sh").unwrap();
        assert_eq!(loc.script_name, "/x.sh");
        assert_eq!(loc.path_info, "");
    }

    #[test]
    fn locate_script_needs_extension() {
        assert!(locate_script("/cgi-bin", Path::new("/srv"), "plain/file.txt", ".py").is_none());
        assert!(locate_script("/cgi-bin", Path::new("/srv"), ".py", ".py").is_none());
    }

    #[test]
    fn metavariables_always_present() {
        let mut headers = Headers::new();
        headers.insert("User-Agent", b"test".to_vec());
        let req = Request {
            method: Method::Get,
            target: String::from("/cgi-bin/t.py?a=1"),
            version: Version::HTTP_11,
            headers: headers,
            framing: BodyFraming::None,
            body: Vec::new(),
        };
        let target = Target::parse(&req.target).unwrap();
        let script = locate_script("/cgi-bin", Path::new("/srv"), "t.py", ".py").unwrap();
        let meta = ServerMeta {
            server_name: String::from("localhost"),
            server_port: 8080,
            remote: "127.0.0.1:5555".parse().unwrap(),
        };

        let vars = metavariables(&req, &target, &script, &meta);
        assert_eq!(value(&vars, "REQUEST_METHOD"), b"GET");
        assert_eq!(value(&vars, "QUERY_STRING"), b"a=1");
        assert_eq!(value(&vars, "CONTENT_LENGTH"), b"");
        assert_eq!(value(&vars, "CONTENT_TYPE"), b"");
        assert_eq!(value(&vars, "SERVER_NAME"), b"localhost");
        assert_eq!(value(&vars, "SERVER_PORT"), b"8080");
        assert_eq!(value(&vars, "SERVER_PROTOCOL"), b"HTTP/1.1");
        assert_eq!(value(&vars, "SCRIPT_FILENAME"), b"/srv/t.py");
        assert_eq!(value(&vars, "HTTP_USER_AGENT"), b"test");
        assert_eq!(value(&vars, "REMOTE_PORT"), b"5555");
    }

    #[test]
    fn document_headers_sorted() {
        let (_, hdrs) = parser::headers(b"Status: 404 Nope\r\nX-A: b\r\nContent-Length: 3\r\n\r\n").unwrap();
        let doc = DocumentHeaders::from_headers(hdrs).unwrap();
        assert_eq!(doc.status_code(), StatusCode::NOT_FOUND);

        let res = doc.into_response(b"abc".to_vec());
        assert_eq!(res.status, StatusCode::NOT_FOUND);
        assert_eq!(res.headers.get("Content-Type").unwrap(), b"text/plain");
        assert_eq!(res.headers.get("X-A").unwrap(), b"b");
        assert!(res.headers.get("Content-Length").is_none());
    }

    #[test]
    fn location_alone_redirects() {
        let (_, hdrs) = parser::headers(b"Location: /elsewhere\n\n").unwrap();
        let doc = DocumentHeaders::from_headers(hdrs).unwrap();
        assert_eq!(doc.status_code(), StatusCode::FOUND);
        let res = doc.into_response(Vec::new());
        assert_eq!(res.headers.get("Location").unwrap(), b"/elsewhere");
    }

    #[test]
    fn bad_status_is_malformed() {
        let (_, hdrs) = parser::headers(b"Status: lol\r\n\r\n").unwrap();
        assert!(DocumentHeaders::from_headers(hdrs).is_err());
    }

    #[test]
    fn informational_status_is_malformed() {
        // An interim status can't stand in for the final response
        let (_, hdrs) = parser::headers(b"Status: 100 Continue\r\n\r\nbody").unwrap();
        assert!(DocumentHeaders::from_headers(hdrs).is_err());

        let (_, hdrs) = parser::headers(b"Status: 199 Whatever\r\n\r\n").unwrap();
        assert!(DocumentHeaders::from_headers(hdrs).is_err());

        let (_, hdrs) = parser::headers(b"Status: 200 OK\r\n\r\n").unwrap();
        assert!(DocumentHeaders::from_headers(hdrs).is_ok());
    }
}
