//! A dead-simple router implementation
//!
//! A `Router` matches a request path against the configured routes and
//! picks the one with the longest matching prefix. Prefixes only match on
//! segment boundaries, so `/upload` covers `/upload/x` but not `/uploads`.

use crate::config::{Config, RouteConfig};
use crate::http::Method;
use crate::status::StatusCode;

use std::path::PathBuf;
use std::time::Duration;

/// What a route does with the requests it matches
#[derive(Debug, Clone)]
pub enum RouteKind {
    Static,
    Cgi { extension: String, interpreter: Option<PathBuf> },
    Redirect { code: StatusCode, location: String },
}

#[derive(Debug, Clone)]
pub struct Route {
    pub prefix: String,
    pub root: PathBuf,
    pub methods: Vec<Method>,
    pub index: String,
    pub upload_dir: Option<PathBuf>,
    pub body_limit: usize,
    pub cgi_timeout: Duration,
    pub kind: RouteKind,
}

impl Route {
    fn from_config(route: &RouteConfig, config: &Config) -> Route {
        let kind = match (&route.redirect, &route.cgi_extension) {
            (&Some(ref location), _) => RouteKind::Redirect {
                code: route.redirect_code,
                location: location.clone(),
            },
            (&None, &Some(ref extension)) => RouteKind::Cgi {
                extension: extension.clone(),
                interpreter: route.cgi_interpreter.clone(),
            },
            (&None, &None) => RouteKind::Static,
        };

        Route {
            prefix: route.path.trim_end_matches('/').to_owned(),
            root: route.root.clone(),
            methods: route.methods.clone(),
            index: route.index.clone(),
            upload_dir: route.upload_dir.clone(),
            body_limit: route.client_max_body_size
                .unwrap_or(config.limits.client_max_body_size),
            cgi_timeout: route.cgi_timeout.unwrap_or(config.cgi.timeout),
            kind: kind,
        }
    }

    fn matches(&self, path: &str) -> bool {
        match path.strip_prefix(self.prefix.as_str()) {
            Some(rest) => rest.is_empty() || rest.starts_with('/'),
            None => false
        }
    }

    /// The part of `path` below this route's prefix, without a leading `/`
    pub fn relative<'a>(&self, path: &'a str) -> &'a str {
        path.get(self.prefix.len() ..)
            .unwrap_or("")
            .trim_start_matches('/')
    }
}

#[derive(Debug)]
pub struct Router {
    routes: Vec<Route>
}

impl Router {
    pub fn new(config: &Config) -> Router {
        Router {
            routes: config.routes.iter()
                .map(|r| Route::from_config(r, config))
                .collect()
        }
    }

    /// Index of the best route for a decoded path
    pub fn route(&self, path: &str) -> Option<usize> {
        self.routes.iter()
            .enumerate()
            .filter(|&(_, route)| route.matches(path))
            .max_by_key(|&(_, route)| route.prefix.len())
            .map(|(i, _)| i)
    }

    pub fn get(&self, index: usize) -> Option<&Route> {
        self.routes.get(index)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn router(paths: &[&str]) -> Router {
        let mut config = Config::default();
        config.routes = paths.iter()
            .map(|p| RouteConfig { path: p.to_string(), ..RouteConfig::default() })
            .collect();
        Router::new(&config)
    }

    fn prefix_of(r: &Router, path: &str) -> Option<String> {
        r.route(path).map(|i| r.get(i).unwrap().prefix.clone())
    }

    #[test]
    fn longest_prefix_wins() {
        let r = router(&["/", "/upload", "/upload/big"]);
        assert_eq!(prefix_of(&r, "/upload/big/x").unwrap(), "/upload/big");
        assert_eq!(prefix_of(&r, "/upload/x").unwrap(), "/upload");
        assert_eq!(prefix_of(&r, "/other").unwrap(), "");
    }

    #[test]
    fn prefixes_match_whole_segments() {
        let r = router(&["/upload"]);
        assert!(r.route("/upload").is_some());
        assert!(r.route("/upload/").is_some());
        assert!(r.route("/uploads").is_none());
        assert!(r.route("/").is_none());
    }

    #[test]
    fn relative_path() {
        let r = router(&["/cgi-bin/"]);
        let route = r.get(r.route("/cgi-bin/a.py/x").unwrap()).unwrap();
        assert_eq!(route.relative("/cgi-bin/a.py/x"), "a.py/x");
        assert_eq!(route.relative("/cgi-bin"), "");
    }

    #[test]
    fn route_kinds() {
        let mut config = Config::default();
        config.routes = vec![
            RouteConfig {
                path: String::from("/cgi"),
                cgi_extension: Some(String::from(".sh")),
                client_max_body_size: Some(10),
                ..RouteConfig::default()
            },
            RouteConfig {
                path: String::from("/old"),
                redirect: Some(String::from("/new")),
                ..RouteConfig::default()
            },
        ];
        let r = Router::new(&config);

        let cgi = r.get(0).unwrap();
        assert_eq!(cgi.body_limit, 10);
        match cgi.kind {
            RouteKind::Cgi { ref extension, .. } => assert_eq!(extension, ".sh"),
            ref other => panic!("{:?}", other)
        }
        match r.get(1).unwrap().kind {
            RouteKind::Redirect { code, .. } => assert_eq!(code, StatusCode::MOVED_PERMANENTLY),
            ref other => panic!("{:?}", other)
        }
        assert_eq!(r.get(1).unwrap().body_limit, config.limits.client_max_body_size);
    }
}
