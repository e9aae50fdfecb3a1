use super::*;
use toml::{Table, Value};

use std::fs;
use std::io;
use std::path::Path;

pub fn parse_file<P: AsRef<Path>>(conf: P) -> Result<Config, Error> {
    let toml = fs::read_to_string(conf)?;
    parse_str(&toml)
}

pub fn parse_str(toml: &str) -> Result<Config, Error> {
    match toml.parse::<Table>() {
        Ok(table) => config_from_table(&table),
        Err(e) => Err(Error::Parse(vec![message_from_error(toml, &e)]))
    }
}

/// Finds a dotted key like `"listen.port"` in nested tables
fn lookup<'a>(table: &'a Table, path: &str) -> Option<&'a Value> {
    let mut parts = path.split('.');
    let mut current = table.get(parts.next()?)?;

    for part in parts {
        current = current.as_table()?.get(part)?;
    }

    Some(current)
}

fn config_from_table(table: &Table) -> Result<Config, Error> {
    let mut config: Config = Default::default();

    match lookup(table, "listen.host") {
        Some(&Value::String(ref host)) => config.host = host.clone(),
        Some(val) => return Err(Error::Validation(
            format!("Expected the listen host to be a string, got a {}",
                    val.type_str())
        )),
        None => ()
    }

    match lookup(table, "listen.port") {
        Some(&Value::Array(ref ports)) => {
            if ports.is_empty() {
                return Err(Error::Validation(
                    String::from("The listen port list is empty")));
            }
            config.ports = ports.iter()
                .map(port)
                .collect::<Result<Vec<_>, _>>()?;
        },
        Some(val) => config.ports = vec![port(val)?],
        None => ()
    }

    if let Some(val) = lookup(table, "limits.client_max_body_size") {
        config.limits.client_max_body_size = size(val, "client_max_body_size")?;
    }
    if let Some(val) = lookup(table, "limits.max_line_length") {
        config.limits.max_line_length = positive(val, "max_line_length")? as usize;
    }
    if let Some(val) = lookup(table, "limits.max_header_count") {
        config.limits.max_header_count = positive(val, "max_header_count")? as usize;
    }
    if let Some(val) = lookup(table, "limits.idle_timeout") {
        config.limits.idle_timeout = Duration::from_secs(positive(val, "idle_timeout")?);
    }

    if let Some(val) = lookup(table, "cgi.timeout") {
        config.cgi.timeout = Duration::from_secs(positive(val, "cgi timeout")?);
    }
    match lookup(table, "cgi.failure_status") {
        Some(&Value::Integer(code)) if code >= 500 && code <= 599 =>
            config.cgi.failure_status = StatusCode(code as u16),
        Some(&Value::Integer(code)) => return Err(Error::Validation(
            format!("The CGI failure status {} is not a 5xx code", code)
        )),
        Some(val) => return Err(Error::Validation(
            format!("Expected the CGI failure status to be an integer, got a {}",
                    val.type_str())
        )),
        None => ()
    }

    match lookup(table, "error_pages") {
        Some(&Value::Table(ref pages)) => {
            for (code, page) in pages {
                let code = match code.parse::<u16>() {
                    Ok(c) if c >= 400 && c <= 599 => c,
                    _ => return Err(Error::Validation(
                        format!("Error page key {:?} is not an error status code", code)
                    ))
                };
                config.error_pages.insert(code, PathBuf::from(string(page, "error page")?));
            }
        },
        Some(val) => return Err(Error::Validation(
            format!("Expected error_pages to be a table, got a {}", val.type_str())
        )),
        None => ()
    }

    match table.get("route") {
        Some(&Value::Array(ref routes)) => {
            config.routes = routes.iter()
                .enumerate()
                .map(|(i, route)| match *route {
                    Value::Table(ref t) => route_from_table(t),
                    ref val => Err(Error::Validation(
                        format!("Expected route {} to be a table, got a {}",
                                i + 1, val.type_str())
                    ))
                })
                .collect::<Result<Vec<_>, _>>()?;
        },
        Some(val) => return Err(Error::Validation(
            format!("Expected route to be an array of tables, got a {}",
                    val.type_str())
        )),
        None => ()
    }

    Ok(config)
}

fn route_from_table(table: &Table) -> Result<RouteConfig, Error> {
    let mut route: RouteConfig = Default::default();

    match table.get("path") {
        Some(&Value::String(ref path)) if path.starts_with('/') =>
            route.path = path.clone(),
        Some(&Value::String(ref path)) => return Err(Error::Validation(
            format!("Route path {:?} doesn't start with '/'", path)
        )),
        Some(val) => return Err(Error::Validation(
            format!("Expected the route path to be a string, got a {}",
                    val.type_str())
        )),
        None => return Err(Error::Validation(String::from("A route is missing its path")))
    }

    if let Some(val) = table.get("root") {
        route.root = PathBuf::from(string(val, "route root")?);
    }

    match table.get("methods") {
        Some(&Value::Array(ref methods)) => {
            route.methods = Vec::with_capacity(methods.len());
            for method in methods {
                match Method::parse(string(method, "method")?) {
                    Method::Other(name) => return Err(Error::Validation(
                        format!("Unknown method {:?} on route {}", name, route.path)
                    )),
                    m => route.methods.push(m)
                }
            }
        },
        Some(val) => return Err(Error::Validation(
            format!("Expected the route methods to be an array, got a {}",
                    val.type_str())
        )),
        None => ()
    }

    if let Some(val) = table.get("index") {
        route.index = string(val, "index")?.to_owned();
    }
    if let Some(val) = table.get("upload_dir") {
        route.upload_dir = Some(PathBuf::from(string(val, "upload_dir")?));
    }
    if let Some(val) = table.get("cgi_extension") {
        let ext = string(val, "cgi_extension")?;
        if !ext.starts_with('.') || ext.len() < 2 {
            return Err(Error::Validation(
                format!("CGI extension {:?} should look like \".py\"", ext)
            ));
        }
        route.cgi_extension = Some(ext.to_owned());
    }
    if let Some(val) = table.get("cgi_interpreter") {
        route.cgi_interpreter = Some(PathBuf::from(string(val, "cgi_interpreter")?));
    }
    if let Some(val) = table.get("client_max_body_size") {
        route.client_max_body_size = Some(size(val, "client_max_body_size")?);
    }
    if let Some(val) = table.get("cgi_timeout") {
        route.cgi_timeout = Some(Duration::from_secs(positive(val, "cgi_timeout")?));
    }
    if let Some(val) = table.get("redirect") {
        route.redirect = Some(string(val, "redirect")?.to_owned());
    }
    match table.get("redirect_code") {
        Some(&Value::Integer(code)) if code >= 300 && code <= 399 =>
            route.redirect_code = StatusCode(code as u16),
        Some(&Value::Integer(code)) => return Err(Error::Validation(
            format!("Redirect code {} is not a 3xx code", code)
        )),
        Some(val) => return Err(Error::Validation(
            format!("Expected the redirect code to be an integer, got a {}",
                    val.type_str())
        )),
        None => ()
    }

    Ok(route)
}

fn port(val: &Value) -> Result<u16, Error> {
    match *val {
        Value::Integer(p) if p <= u16::MAX as i64 && p > 0 => Ok(p as u16),
        Value::Integer(p) => Err(Error::Validation(
            format!("The given port {} is out of range", p)
        )),
        ref val => Err(Error::Validation(
            format!("Expected the port to be an integer, got a {}",
                    val.type_str())
        ))
    }
}

fn positive(val: &Value, what: &str) -> Result<u64, Error> {
    match *val {
        Value::Integer(n) if n > 0 => Ok(n as u64),
        Value::Integer(n) => Err(Error::Validation(
            format!("Expected {} to be positive, got {}", what, n)
        )),
        ref val => Err(Error::Validation(
            format!("Expected {} to be an integer, got a {}", what, val.type_str())
        ))
    }
}

/// A byte count; zero is allowed and refuses every body
fn size(val: &Value, what: &str) -> Result<usize, Error> {
    match *val {
        Value::Integer(n) if n >= 0 => Ok(n as usize),
        Value::Integer(n) => Err(Error::Validation(
            format!("Expected {} to be a byte count, got {}", what, n)
        )),
        ref val => Err(Error::Validation(
            format!("Expected {} to be an integer, got a {}", what, val.type_str())
        ))
    }
}

fn string<'a>(val: &'a Value, what: &str) -> Result<&'a str, Error> {
    match *val {
        Value::String(ref s) => Ok(s),
        ref val => Err(Error::Validation(
            format!("Expected {} to be a string, got a {}", what, val.type_str())
        ))
    }
}

#[derive(Debug)]
pub enum Error {
    Io(io::Error),
    Parse(Vec<ErrorMessage>),
    Validation(String)
}

impl From<io::Error> for Error {
    fn from(e: io::Error) -> Error {
        Error::Io(e)
    }
}

/// An owned, rendered version of a TOML syntax error
#[derive(Debug, Clone)]
pub struct ErrorMessage {
    pub desc: String,
    pub line: usize,
    pub column: usize
}

/// Convert a `toml::de::Error` into an `ErrorMessage`, with 1-based
/// positions
fn message_from_error(source: &str, error: &toml::de::Error) -> ErrorMessage {
    let offset = error.span().map_or(0, |span| span.start).min(source.len());
    let before = &source[.. offset];
    let line = before.matches('\n').count() + 1;
    let column = before.rfind('\n').map_or(offset, |nl| offset - nl - 1) + 1;

    ErrorMessage {
        desc: error.message().to_owned(),
        line: line,
        column: column
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn empty_file_gives_defaults() {
        let config = parse_str("").unwrap();
        assert_eq!(config.ports, vec![8080]);
        assert_eq!(config.limits.client_max_body_size, 1024 * 1024);
        assert_eq!(config.cgi.failure_status, StatusCode::BAD_GATEWAY);
        assert_eq!(config.routes.len(), 1);
    }

    #[test]
    fn full_file() {
        let config = parse_str(r#"
            [listen]
            host = "127.0.0.1"
            port = [8080, 8081]

            [limits]
            client_max_body_size = 100
            idle_timeout = 10

            [cgi]
            timeout = 2
            failure_status = 500

            [error_pages]
            404 = "www/errors/404.html"

            [[route]]
            path = "/"
            root = "www"
            methods = ["GET", "POST"]

            [[route]]
            path = "/cgi-bin"
            root = "www/cgi-bin"
            methods = ["GET", "POST"]
            cgi_extension = ".py"
            cgi_interpreter = "/usr/bin/python3"
            cgi_timeout = 1

            [[route]]
            path = "/old"
            redirect = "/"
            redirect_code = 302
        "#).unwrap();

        assert_eq!(config.host, "127.0.0.1");
        assert_eq!(config.ports, vec![8080, 8081]);
        assert_eq!(config.limits.client_max_body_size, 100);
        assert_eq!(config.limits.idle_timeout, Duration::from_secs(10));
        assert_eq!(config.cgi.failure_status, StatusCode(500));
        assert_eq!(config.error_pages.get(&404).unwrap(), &PathBuf::from("www/errors/404.html"));
        assert_eq!(config.routes.len(), 3);
        assert_eq!(config.routes[1].cgi_extension.as_ref().unwrap(), ".py");
        assert_eq!(config.routes[1].cgi_timeout, Some(Duration::from_secs(1)));
        assert_eq!(config.routes[2].methods, vec![Method::Get]);
        assert_eq!(config.routes[2].redirect_code, StatusCode::FOUND);
    }

    #[test]
    fn port_out_of_range() {
        match parse_str("[listen]\nport = 70000\n") {
            Err(Error::Validation(_)) => (),
            other => panic!("{:?}", other)
        }
    }

    #[test]
    fn port_wrong_type() {
        match parse_str("[listen]\nport = \"eighty\"\n") {
            Err(Error::Validation(_)) => (),
            other => panic!("{:?}", other)
        }
    }

    #[test]
    fn unknown_method_rejected() {
        match parse_str("[[route]]\npath = \"/\"\nmethods = [\"PATCH\"]\n") {
            Err(Error::Validation(_)) => (),
            other => panic!("{:?}", other)
        }
    }

    #[test]
    fn route_path_needs_slash() {
        assert!(parse_str("[[route]]\npath = \"nope\"\n").is_err());
        assert!(parse_str("[[route]]\nroot = \"www\"\n").is_err());
    }

    #[test]
    fn syntax_errors_have_positions() {
        match parse_str("[listen]\nport = = 3\n") {
            Err(Error::Parse(errors)) => {
                assert_eq!(errors.len(), 1);
                assert_eq!(errors[0].line, 2);
                assert!(errors[0].column > 1);
            },
            other => panic!("{:?}", other)
        }
    }
}
