//! Handlers for static file service
//!
//! Every handler answers either with the outcome it reached and the
//! response that goes with it, or with the failure outcome alone; the
//! connection turns outcomes into final statuses.

use crate::filesystem::{is_contained, resolve_under};
use crate::http::{Method, Request, Target};
use crate::http::response::{mime_as_string, Response};
use crate::server::router::Route;
use crate::status::{Outcome, StatusCode};

use mime::Mime;

use std::fs::{self, File, OpenOptions};
use std::io::{ErrorKind, Write};
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

pub type Handled = Result<(Outcome, Response), Outcome>;

static UPLOAD_COUNTER: AtomicUsize = AtomicUsize::new(0);

pub fn serve(route: &Route, target: &Target, request: &Request) -> Handled {
    let relative = route.relative(&target.path);

    match request.method {
        Method::Get => serve_file(route, relative),
        Method::Post => store_upload(route, relative, request),
        Method::Delete => delete_file(route, relative),
        Method::Other(_) => Err(Outcome::Forbidden)
    }
}

fn failure(kind: ErrorKind) -> Outcome {
    match kind {
        ErrorKind::NotFound => Outcome::Missing,
        _ => Outcome::Forbidden
    }
}

fn serve_file(route: &Route, relative: &str) -> Handled {
    let mut path = resolve_under(&route.root, relative.as_bytes());
    let mut meta = fs::metadata(&path).map_err(|e| failure(e.kind()))?;

    if !is_contained(&route.root, &path) {
        warn!("Refusing {}: outside of {}", path.display(), route.root.display());
        return Err(Outcome::Forbidden);
    }

    if meta.is_dir() {
        let index = path.join(&route.index);
        meta = match fs::metadata(&index) {
            Ok(m) if m.is_file() => m,
            // No index and no listings
            _ => return Err(Outcome::Forbidden)
        };
        path = index;
    }

    let file = File::open(&path).map_err(|e| failure(e.kind()))?;

    let mime = mime_guess::from_path(&path)
        .first()
        .map(|m| mime_as_string(&m))
        .unwrap_or(String::from("application/octet-stream"));

    Ok((Outcome::Served, Response::with_file(StatusCode::OK, &mime, file, meta.len())))
}

fn store_upload(route: &Route, relative: &str, request: &Request) -> Handled {
    let upload_dir = match route.upload_dir {
        Some(ref dir) => dir,
        None => {
            let path = resolve_under(&route.root, relative.as_bytes());
            return Err(if path.exists() { Outcome::Forbidden } else { Outcome::Missing });
        }
    };

    if !upload_dir.is_dir() {
        warn!("Upload directory {} is missing", upload_dir.display());
        return Err(Outcome::Missing);
    }

    let (part_name, content) = match request.content_type().and_then(boundary) {
        Some(boundary) => match multipart_file(&request.body, &boundary) {
            Some((name, data)) => (name, data),
            None => (None, &request.body[..])
        },
        None => (None, &request.body[..])
    };

    let uri_name = if relative.is_empty() || relative.ends_with('/') {
        None
    } else {
        Some(relative.to_owned())
    };
    let named_by_uri = uri_name.is_some();
    let name = uri_name
        .or(part_name)
        .unwrap_or_else(generated_name);

    let dest = resolve_under(upload_dir, name.as_bytes());
    if dest.is_dir() || !is_contained(upload_dir, &dest) {
        return Err(Outcome::Forbidden);
    }
    let existed = dest.exists();

    let written = OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(true)
        .open(&dest)
        .and_then(|mut file| file.write_all(content));

    if let Err(e) = written {
        warn!("Storing upload at {} failed: {}", dest.display(), e);
        return Err(failure(e.kind()));
    }
    info!("Stored {} bytes at {}", content.len(), dest.display());

    if existed {
        let res = Response::with_bytes(StatusCode::OK, "text/plain", b"Updated\n".to_vec());
        return Ok((Outcome::Served, res));
    }

    let location = if named_by_uri {
        format!("{}/{}", route.prefix, relative)
    } else {
        format!("{}/{}", route.prefix, name)
    };
    let mut res = Response::with_bytes(StatusCode::CREATED, "text/plain", b"Created\n".to_vec());
    res.headers.set("Location", location.into_bytes());
    Ok((Outcome::Created, res))
}

fn delete_file(route: &Route, relative: &str) -> Handled {
    let path = resolve_under(&route.root, relative.as_bytes());
    let meta = fs::metadata(&path).map_err(|e| failure(e.kind()))?;

    if meta.is_dir() || !is_contained(&route.root, &path) {
        return Err(Outcome::Forbidden);
    }

    fs::remove_file(&path).map_err(|e| {
        warn!("Deleting {} failed: {}", path.display(), e);
        failure(e.kind())
    })?;
    info!("Deleted {}", path.display());

    Ok((Outcome::Deleted, Response::new(StatusCode::NO_CONTENT)))
}

fn generated_name() -> String {
    let secs = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0);
    format!("upload-{}-{}", secs, UPLOAD_COUNTER.fetch_add(1, Ordering::Relaxed))
}

/// The boundary of a `multipart/form-data` content type
fn boundary(content_type: &str) -> Option<String> {
    let mime: Mime = content_type.parse().ok()?;
    if mime.type_() != mime::MULTIPART || mime.subtype() != mime::FORM_DATA {
        return None;
    }
    mime.get_param(mime::BOUNDARY).map(|b| b.as_str().to_owned())
}

fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack.windows(needle.len()).position(|w| w == needle)
}

/// The first part of a multipart body that carries a file, with the name
/// the client gave it.
fn multipart_file<'a>(body: &'a [u8], boundary: &str) -> Option<(Option<String>, &'a [u8])> {
    let delimiter = format!("--{}", boundary).into_bytes();
    let mut closing = b"\r\n".to_vec();
    closing.extend_from_slice(&delimiter);

    let start = find(body, &delimiter)?;
    let mut rest = &body[start + delimiter.len() ..];

    loop {
        if rest.starts_with(b"--") {
            return None;
        }
        rest = rest.strip_prefix(b"\r\n")?;

        let head_end = find(rest, b"\r\n\r\n")?;
        let head = &rest[.. head_end];
        let content = &rest[head_end + 4 ..];
        let end = find(content, &closing)?;

        if let Some(name) = disposition_filename(head) {
            let name = Path::new(&name).file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .filter(|n| !n.is_empty());
            return Some((name, &content[.. end]));
        }

        rest = &content[end + closing.len() ..];
    }
}

fn disposition_filename(head: &[u8]) -> Option<String> {
    let head = String::from_utf8_lossy(head);

    head.split("\r\n")
        .find(|line| line.to_ascii_lowercase().starts_with("content-disposition:"))
        .and_then(|line| {
            let at = line.find("filename=\"")? + "filename=\"".len();
            let len = line[at ..].find('"')?;
            Some(line[at .. at + len].to_owned())
        })
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::filesystem::scratch_dir;
    use crate::http::{BodyFraming, Headers, Version};
    use crate::server::router::RouteKind;

    use std::time::Duration;

    fn route(root: &Path, upload: bool) -> Route {
        Route {
            prefix: String::from("/files"),
            root: root.to_path_buf(),
            methods: vec![Method::Get, Method::Post, Method::Delete],
            index: String::from("index.html"),
            upload_dir: if upload { Some(root.to_path_buf()) } else { None },
            body_limit: 1024,
            cgi_timeout: Duration::from_secs(1),
            kind: RouteKind::Static,
        }
    }

    fn request(method: Method, path: &str, content_type: Option<&str>, body: &[u8]) -> (Target, Request) {
        let mut headers = Headers::new();
        if let Some(ct) = content_type {
            headers.insert("Content-Type", ct.as_bytes().to_vec());
        }
        let req = Request {
            method: method,
            target: path.to_owned(),
            version: Version::HTTP_11,
            headers: headers,
            framing: BodyFraming::Length(body.len()),
            body: body.to_vec(),
        };
        (Target::parse(path).unwrap(), req)
    }

    #[test]
    fn get_serves_file_with_mime() {
        let root = scratch_dir("static-get");
        fs::write(root.join("page.html"), b"<p>hi</p>").unwrap();
        let (target, req) = request(Method::Get, "/files/page.html", None, b"");

        let (outcome, res) = serve(&route(&root, false), &target, &req).unwrap();
        assert_eq!(outcome, Outcome::Served);
        assert_eq!(res.headers.get("Content-Type").unwrap(), b"text/html");
        assert_eq!(res.body.len(), 9);
    }

    #[test]
    fn get_directory_uses_index_or_forbids() {
        let root = scratch_dir("static-dir");
        let (target, req) = request(Method::Get, "/files/", None, b"");
        assert_eq!(serve(&route(&root, false), &target, &req).unwrap_err(), Outcome::Forbidden);

        fs::write(root.join("index.html"), b"index").unwrap();
        let (outcome, _) = serve(&route(&root, false), &target, &req).unwrap();
        assert_eq!(outcome, Outcome::Served);
    }

    #[test]
    fn get_missing_is_404() {
        let root = scratch_dir("static-missing");
        let (target, req) = request(Method::Get, "/files/nope.txt", None, b"");
        assert_eq!(serve(&route(&root, false), &target, &req).unwrap_err(), Outcome::Missing);
    }

    #[test]
    fn post_without_upload_dir() {
        let root = scratch_dir("static-noupload");
        fs::write(root.join("there.txt"), b"x").unwrap();
        let r = route(&root, false);

        let (target, req) = request(Method::Post, "/files/there.txt", None, b"data");
        assert_eq!(serve(&r, &target, &req).unwrap_err(), Outcome::Forbidden);
        let (target, req) = request(Method::Post, "/files/absent.txt", None, b"data");
        assert_eq!(serve(&r, &target, &req).unwrap_err(), Outcome::Missing);
    }

    #[test]
    fn post_creates_then_overwrites() {
        let root = scratch_dir("static-upload");
        let r = route(&root, true);

        let (target, req) = request(Method::Post, "/files/note.txt", None, b"first");
        let (outcome, res) = serve(&r, &target, &req).unwrap();
        assert_eq!(outcome, Outcome::Created);
        assert_eq!(res.headers.get("Location").unwrap(), b"/files/note.txt");
        assert_eq!(fs::read(root.join("note.txt")).unwrap(), b"first");

        let (target, req) = request(Method::Post, "/files/note.txt", None, b"second");
        let (outcome, _) = serve(&r, &target, &req).unwrap();
        assert_eq!(outcome, Outcome::Served);
        assert_eq!(fs::read(root.join("note.txt")).unwrap(), b"second");
    }

    #[test]
    fn post_multipart_extracts_file_part() {
        let root = scratch_dir("static-multipart");
        let r = route(&root, true);
        let body = b"--XyZ\r\n\
                     Content-Disposition: form-data; name=\"field\"\r\n\r\n\
                     ignored\r\n\
                     --XyZ\r\n\
                     Content-Disposition: form-data; name=\"file\"; filename=\"../evil/pic.txt\"\r\n\
                     Content-Type: text/plain\r\n\r\n\
                     file\r\ncontents\r\n\
                     --XyZ--\r\n";

        let (target, req) = request(Method::Post, "/files", Some("multipart/form-data; boundary=XyZ"), body);
        let (outcome, res) = serve(&r, &target, &req).unwrap();
        assert_eq!(outcome, Outcome::Created);
        assert_eq!(res.headers.get("Location").unwrap(), b"/files/pic.txt");
        assert_eq!(fs::read(root.join("pic.txt")).unwrap(), b"file\r\ncontents");
    }

    #[test]
    fn post_raw_body_gets_generated_name() {
        let root = scratch_dir("static-generated");
        let r = route(&root, true);
        let (target, req) = request(Method::Post, "/files/", Some("application/octet-stream"), b"raw");
        let (outcome, res) = serve(&r, &target, &req).unwrap();
        assert_eq!(outcome, Outcome::Created);
        let location = String::from_utf8(res.headers.get("Location").unwrap().to_vec()).unwrap();
        assert!(location.starts_with("/files/upload-"));
    }

    #[test]
    fn delete_then_missing() {
        let root = scratch_dir("static-delete");
        fs::write(root.join("gone.txt"), b"bye").unwrap();
        let r = route(&root, false);

        let (target, req) = request(Method::Delete, "/files/gone.txt", None, b"");
        let (outcome, res) = serve(&r, &target, &req).unwrap();
        assert_eq!(outcome, Outcome::Deleted);
        assert_eq!(res.status, StatusCode::NO_CONTENT);
        assert!(!root.join("gone.txt").exists());

        assert_eq!(serve(&r, &target, &req).unwrap_err(), Outcome::Missing);
    }

    #[test]
    fn delete_directory_forbidden() {
        let root = scratch_dir("static-deldir");
        fs::create_dir(root.join("sub")).unwrap();
        let (target, req) = request(Method::Delete, "/files/sub", None, b"");
        assert_eq!(serve(&route(&root, false), &target, &req).unwrap_err(), Outcome::Forbidden);
    }

    #[test]
    fn boundary_from_content_type() {
        assert_eq!(boundary("multipart/form-data; boundary=abc").unwrap(), "abc");
        assert!(boundary("text/plain").is_none());
    }
}
