//! Maps parser, policy, and handler outcomes to response statuses.
//!
//! The checks run in a fixed order and the first one that applies wins:
//! 400, 505, 501, 405, 411, 413, then whatever the resource handler found
//! (404, 403, or success). The first six are known as soon as the head is
//! in, which is what lets an oversized upload be refused before its body
//! arrives.

use crate::http::{BodyFraming, Method, Request};

use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct StatusCode(pub u16);

impl StatusCode {
    pub const OK: StatusCode = StatusCode(200);
    pub const CREATED: StatusCode = StatusCode(201);
    pub const NO_CONTENT: StatusCode = StatusCode(204);
    pub const MOVED_PERMANENTLY: StatusCode = StatusCode(301);
    pub const FOUND: StatusCode = StatusCode(302);
    pub const BAD_REQUEST: StatusCode = StatusCode(400);
    pub const FORBIDDEN: StatusCode = StatusCode(403);
    pub const NOT_FOUND: StatusCode = StatusCode(404);
    pub const METHOD_NOT_ALLOWED: StatusCode = StatusCode(405);
    pub const LENGTH_REQUIRED: StatusCode = StatusCode(411);
    pub const PAYLOAD_TOO_LARGE: StatusCode = StatusCode(413);
    pub const EXPECTATION_FAILED: StatusCode = StatusCode(417);
    pub const NOT_IMPLEMENTED: StatusCode = StatusCode(501);
    pub const BAD_GATEWAY: StatusCode = StatusCode(502);
    pub const GATEWAY_TIMEOUT: StatusCode = StatusCode(504);
    pub const VERSION_NOT_SUPPORTED: StatusCode = StatusCode(505);

    #[inline]
    pub fn code(self) -> u16 {
        self.0
    }

    /// Whether responses with this status may carry a body at all
    #[inline]
    pub fn allows_body(self) -> bool {
        !(self.0 < 200 || self.0 == 204 || self.0 == 304)
    }

    pub fn canonical_reason(self) -> &'static str {
        match self.0 {
            100 => "Continue",
            200 => "OK",
            201 => "Created",
            202 => "Accepted",
            204 => "No Content",
            301 => "Moved Permanently",
            302 => "Found",
            303 => "See Other",
            304 => "Not Modified",
            307 => "Temporary Redirect",
            308 => "Permanent Redirect",
            400 => "Bad Request",
            401 => "Unauthorized",
            403 => "Forbidden",
            404 => "Not Found",
            405 => "Method Not Allowed",
            408 => "Request Timeout",
            409 => "Conflict",
            411 => "Length Required",
            413 => "Payload Too Large",
            414 => "URI Too Long",
            415 => "Unsupported Media Type",
            417 => "Expectation Failed",
            500 => "Internal Server Error",
            501 => "Not Implemented",
            502 => "Bad Gateway",
            503 => "Service Unavailable",
            504 => "Gateway Timeout",
            505 => "HTTP Version Not Supported",
            _ => "Unknown"
        }
    }
}

impl fmt::Display for StatusCode {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{} {}", self.0, self.canonical_reason())
    }
}

/// Everything known about a request once its head is parsed
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Admission {
    pub malformed: bool,
    pub version_unsupported: bool,
    pub not_implemented: bool,
    pub method_not_allowed: bool,
    pub length_missing: bool,
    pub too_large: bool,
}

impl Admission {
    /// Judges a parsed head against the policy of the route it matched.
    ///
    /// `allowed` is `None` when no route matched; the request then falls
    /// through to the resource checks and ends up a 404.
    pub fn assess(request: &Request,
                  target_ok: bool,
                  allowed: Option<&[Method]>,
                  body_limit: usize) -> Admission {
        let unsupported_coding = match request.framing {
            BodyFraming::Unsupported(_) => true,
            _ => false
        };

        Admission {
            malformed: !target_ok,
            version_unsupported: !request.version.is_supported(),
            not_implemented: !request.method.is_implemented() || unsupported_coding,
            method_not_allowed: allowed
                .map_or(false, |methods| !methods.contains(&request.method)),
            length_missing: request.method.expects_body() &&
                request.framing == BodyFraming::None,
            too_large: match request.framing {
                BodyFraming::Length(n) => n > body_limit,
                _ => false
            },
        }
    }

    /// A framing fault found by the parser itself
    pub fn malformed() -> Admission {
        Admission { malformed: true, ..Admission::default() }
    }

    /// A body that grew past its limit while being decoded
    pub fn too_large() -> Admission {
        Admission { too_large: true, ..Admission::default() }
    }
}

/// The head-time verdict: a status to answer with instead of running the
/// handler, or `None` if the request may proceed.
pub fn admit(admission: &Admission) -> Option<StatusCode> {
    let checks = [
        (admission.malformed, StatusCode::BAD_REQUEST),
        (admission.version_unsupported, StatusCode::VERSION_NOT_SUPPORTED),
        (admission.not_implemented, StatusCode::NOT_IMPLEMENTED),
        (admission.method_not_allowed, StatusCode::METHOD_NOT_ALLOWED),
        (admission.length_missing, StatusCode::LENGTH_REQUIRED),
        (admission.too_large, StatusCode::PAYLOAD_TOO_LARGE),
    ];

    checks.iter()
        .find(|&&(failed, _)| failed)
        .map(|&(_, status)| status)
}

/// What a resource handler (static or CGI) came back with
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    /// Existing content was served or replaced
    Served,
    /// An upload created a new resource
    Created,
    /// A delete succeeded and there is nothing to say about it
    Deleted,
    Missing,
    Forbidden,
    Redirect(StatusCode),
    /// The CGI script ran and chose its own status
    Script(StatusCode),
    /// The CGI script couldn't be run or produced unusable output
    GatewayFailure,
    GatewayTimeout,
}

/// Turns a handler outcome into the final status. `bad_gateway` is the
/// configured status for broken CGI runs.
pub fn resolve(outcome: &Outcome, bad_gateway: StatusCode) -> StatusCode {
    match *outcome {
        Outcome::Missing => StatusCode::NOT_FOUND,
        Outcome::Forbidden => StatusCode::FORBIDDEN,
        Outcome::Created => StatusCode::CREATED,
        Outcome::Deleted => StatusCode::NO_CONTENT,
        Outcome::Served => StatusCode::OK,
        Outcome::Redirect(code) | Outcome::Script(code) => code,
        Outcome::GatewayFailure => bad_gateway,
        Outcome::GatewayTimeout => StatusCode::GATEWAY_TIMEOUT,
    }
}

/// The complete decision for a request whose outcome is already known.
pub fn decide(admission: &Admission, outcome: &Outcome, bad_gateway: StatusCode)
              -> StatusCode {
    admit(admission).unwrap_or_else(|| resolve(outcome, bad_gateway))
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::http::{Headers, Version};

    fn request(method: Method, version: Version, framing: BodyFraming) -> Request {
        Request {
            method: method,
            target: String::from("/"),
            version: version,
            headers: Headers::new(),
            framing: framing,
            body: Vec::new(),
        }
    }

    const GET_ONLY: &[Method] = &[Method::Get];

    #[test]
    fn precedence_is_fixed() {
        let everything = Admission {
            malformed: true,
            version_unsupported: true,
            not_implemented: true,
            method_not_allowed: true,
            length_missing: true,
            too_large: true,
        };
        assert_eq!(admit(&everything), Some(StatusCode::BAD_REQUEST));

        let mut a = everything.clone();
        a.malformed = false;
        assert_eq!(admit(&a), Some(StatusCode::VERSION_NOT_SUPPORTED));
        a.version_unsupported = false;
        assert_eq!(admit(&a), Some(StatusCode::NOT_IMPLEMENTED));
        a.not_implemented = false;
        assert_eq!(admit(&a), Some(StatusCode::METHOD_NOT_ALLOWED));
        a.method_not_allowed = false;
        assert_eq!(admit(&a), Some(StatusCode::LENGTH_REQUIRED));
        a.length_missing = false;
        assert_eq!(admit(&a), Some(StatusCode::PAYLOAD_TOO_LARGE));
        a.too_large = false;
        assert_eq!(admit(&a), None);
    }

    #[test]
    fn unknown_method_is_501_even_where_get_only() {
        let req = request(Method::parse("BREW"), Version::HTTP_11, BodyFraming::None);
        let a = Admission::assess(&req, true, Some(GET_ONLY), 100);
        assert_eq!(admit(&a), Some(StatusCode::NOT_IMPLEMENTED));
    }

    #[test]
    fn known_method_not_on_route_is_405() {
        let req = request(Method::Delete, Version::HTTP_11, BodyFraming::None);
        let a = Admission::assess(&req, true, Some(GET_ONLY), 100);
        assert_eq!(admit(&a), Some(StatusCode::METHOD_NOT_ALLOWED));
    }

    #[test]
    fn post_without_length_is_411() {
        let req = request(Method::Post, Version::HTTP_11, BodyFraming::None);
        let a = Admission::assess(&req, true, None, 100);
        assert_eq!(admit(&a), Some(StatusCode::LENGTH_REQUIRED));

        let req = request(Method::Post, Version::HTTP_11, BodyFraming::Length(0));
        let a = Admission::assess(&req, true, None, 100);
        assert_eq!(admit(&a), None);
    }

    #[test]
    fn declared_length_over_limit_is_413() {
        let req = request(Method::Post, Version::HTTP_11, BodyFraming::Length(101));
        let a = Admission::assess(&req, true, None, 100);
        assert_eq!(admit(&a), Some(StatusCode::PAYLOAD_TOO_LARGE));

        // Chunked bodies can only be caught while decoding
        let req = request(Method::Post, Version::HTTP_11, BodyFraming::Chunked);
        let a = Admission::assess(&req, true, None, 100);
        assert_eq!(admit(&a), None);
    }

    #[test]
    fn unsupported_coding_is_501() {
        let req = request(Method::Post, Version::HTTP_11,
                          BodyFraming::Unsupported(String::from("gzip")));
        let a = Admission::assess(&req, true, None, 100);
        assert_eq!(admit(&a), Some(StatusCode::NOT_IMPLEMENTED));
    }

    #[test]
    fn old_version_beats_method_checks() {
        let req = request(Method::Delete, Version { major: 0, minor: 9 }, BodyFraming::None);
        let a = Admission::assess(&req, true, Some(GET_ONLY), 100);
        assert_eq!(admit(&a), Some(StatusCode::VERSION_NOT_SUPPORTED));
    }

    #[test]
    fn outcomes_resolve() {
        let gw = StatusCode::BAD_GATEWAY;
        assert_eq!(resolve(&Outcome::Missing, gw), StatusCode::NOT_FOUND);
        assert_eq!(resolve(&Outcome::Forbidden, gw), StatusCode::FORBIDDEN);
        assert_eq!(resolve(&Outcome::Created, gw), StatusCode::CREATED);
        assert_eq!(resolve(&Outcome::Deleted, gw), StatusCode::NO_CONTENT);
        assert_eq!(resolve(&Outcome::GatewayFailure, StatusCode(500)), StatusCode(500));
        assert_eq!(resolve(&Outcome::Script(StatusCode(418)), gw), StatusCode(418));
    }

    #[test]
    fn admission_checks_run_before_outcome() {
        let a = Admission { method_not_allowed: true, ..Admission::default() };
        assert_eq!(decide(&a, &Outcome::Missing, StatusCode::BAD_GATEWAY),
                   StatusCode::METHOD_NOT_ALLOWED);
        assert_eq!(decide(&Admission::default(), &Outcome::Missing, StatusCode::BAD_GATEWAY),
                   StatusCode::NOT_FOUND);
    }

    #[test]
    fn display_has_reason() {
        assert_eq!(StatusCode::PAYLOAD_TOO_LARGE.to_string(), "413 Payload Too Large");
        assert!(!StatusCode::NO_CONTENT.allows_body());
        assert!(StatusCode::NOT_FOUND.allows_body());
    }
}
