pub mod parser;

use crate::http::Method;
use crate::status::StatusCode;

use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;

/// A holder for app configuration
///
/// Built once at start-up and never changed afterwards; everything that
/// needs it gets a shared reference.
#[derive(Debug, Clone)]
pub struct Config {
    /// Address to bind every listener on
    pub host: String,
    /// Port numbers to listen on, one listener each
    pub ports: Vec<u16>,
    pub limits: Limits,
    pub cgi: CgiConfig,
    /// Status code to HTML file served in place of the built-in page
    pub error_pages: HashMap<u16, PathBuf>,
    pub routes: Vec<RouteConfig>,
}

impl Default for Config {
    fn default() -> Config {
        Config {
            host: String::from("0.0.0.0"),
            ports: vec![8080],
            limits: Default::default(),
            cgi: Default::default(),
            error_pages: HashMap::new(),
            // Without any routes configured, the site root also accepts POST
            routes: vec![RouteConfig {
                methods: vec![Method::Get, Method::Post],
                ..RouteConfig::default()
            }],
        }
    }
}

#[derive(Debug, Clone)]
pub struct Limits {
    /// Largest request body accepted, after chunked decoding
    pub client_max_body_size: usize,
    /// Longest request line, header line, or chunk-size line
    pub max_line_length: usize,
    pub max_header_count: usize,
    /// A connection with no traffic for this long is dropped
    pub idle_timeout: Duration,
}

impl Default for Limits {
    fn default() -> Limits {
        Limits {
            client_max_body_size: 1024 * 1024,
            max_line_length: 8192,
            max_header_count: 100,
            idle_timeout: Duration::from_secs(30),
        }
    }
}

#[derive(Debug, Clone)]
pub struct CgiConfig {
    pub timeout: Duration,
    /// Answered when a script can't be run or its output can't be parsed
    pub failure_status: StatusCode,
}

impl Default for CgiConfig {
    fn default() -> CgiConfig {
        CgiConfig {
            timeout: Duration::from_secs(5),
            failure_status: StatusCode::BAD_GATEWAY,
        }
    }
}

/// One `[[route]]` block
#[derive(Debug, Clone)]
pub struct RouteConfig {
    /// URI prefix this route answers for
    pub path: String,
    /// Where the files are located on disk
    pub root: PathBuf,
    pub methods: Vec<Method>,
    pub index: String,
    /// Uploads land here; POST is refused without one
    pub upload_dir: Option<PathBuf>,
    pub cgi_extension: Option<String>,
    pub cgi_interpreter: Option<PathBuf>,
    /// Overrides `Limits::client_max_body_size`
    pub client_max_body_size: Option<usize>,
    /// Overrides `CgiConfig::timeout`
    pub cgi_timeout: Option<Duration>,
    pub redirect: Option<String>,
    pub redirect_code: StatusCode,
}

impl Default for RouteConfig {
    fn default() -> RouteConfig {
        RouteConfig {
            path: String::from("/"),
            root: PathBuf::from("www"),
            methods: vec![Method::Get],
            index: String::from("index.html"),
            upload_dir: None,
            cgi_extension: None,
            cgi_interpreter: None,
            client_max_body_size: None,
            cgi_timeout: None,
            redirect: None,
            redirect_code: StatusCode::MOVED_PERMANENTLY,
        }
    }
}
