//! `Expect: 100-continue` handling.
//!
//! The decision is made once, right after the head is parsed and judged,
//! and before any body byte is read. A client that asked to wait is told
//! either to go ahead (`100 Continue`) or, if the request is already doomed,
//! gets the final status without the interim one.

use crate::http::{Request, Version};
use crate::status::StatusCode;

pub const CONTINUE_RESPONSE: &[u8] = b"HTTP/1.1 100 Continue\r\n\r\n";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Expectation {
    None,
    Continue,
    /// An expectation the server can't meet
    Unsupported(String),
}

impl Expectation {
    pub fn of(request: &Request) -> Expectation {
        match request.headers.get_str("Expect") {
            None => Expectation::None,
            Some(value) => {
                let value = value.trim();
                if value.eq_ignore_ascii_case("100-continue") {
                    Expectation::Continue
                } else {
                    Expectation::Unsupported(value.to_owned())
                }
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContinueAction {
    /// Read the body (if any) without an interim response
    Proceed,
    /// Queue `CONTINUE_RESPONSE`, then read the body
    SendContinue,
    /// Answer with this status; the body will never be processed
    Reject(StatusCode),
}

/// Decides what to do between head and body, given the admission verdict
/// for the head.
pub fn decide(request: &Request, verdict: Option<StatusCode>) -> ContinueAction {
    if let Some(status) = verdict {
        return ContinueAction::Reject(status);
    }

    match Expectation::of(request) {
        Expectation::None => ContinueAction::Proceed,
        Expectation::Unsupported(_) => ContinueAction::Reject(StatusCode::EXPECTATION_FAILED),
        // HTTP/1.0 clients don't know about interim responses
        Expectation::Continue if request.version == Version::HTTP_11 &&
            request.framing.has_body() => ContinueAction::SendContinue,
        Expectation::Continue => ContinueAction::Proceed,
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::http::{BodyFraming, Headers, Method};

    fn request(expect: Option<&str>, version: Version, framing: BodyFraming) -> Request {
        let mut headers = Headers::new();
        if let Some(e) = expect {
            headers.insert("Expect", e.as_bytes().to_vec());
        }
        Request {
            method: Method::Post,
            target: String::from("/upload"),
            version: version,
            headers: headers,
            framing: framing,
            body: Vec::new(),
        }
    }

    #[test]
    fn admissible_body_gets_continue() {
        let req = request(Some("100-continue"), Version::HTTP_11, BodyFraming::Length(10));
        assert_eq!(decide(&req, None), ContinueAction::SendContinue);

        let req = request(Some("100-Continue"), Version::HTTP_11, BodyFraming::Chunked);
        assert_eq!(decide(&req, None), ContinueAction::SendContinue);
    }

    #[test]
    fn rejected_head_gets_only_final_status() {
        let req = request(Some("100-continue"), Version::HTTP_11, BodyFraming::Length(1 << 30));
        assert_eq!(decide(&req, Some(StatusCode::PAYLOAD_TOO_LARGE)),
                   ContinueAction::Reject(StatusCode::PAYLOAD_TOO_LARGE));
    }

    #[test]
    fn no_continue_without_body_or_on_old_clients() {
        let req = request(Some("100-continue"), Version::HTTP_11, BodyFraming::Length(0));
        assert_eq!(decide(&req, None), ContinueAction::Proceed);

        let req = request(Some("100-continue"), Version::HTTP_10, BodyFraming::Length(5));
        assert_eq!(decide(&req, None), ContinueAction::Proceed);

        let req = request(None, Version::HTTP_11, BodyFraming::Length(5));
        assert_eq!(decide(&req, None), ContinueAction::Proceed);
    }

    #[test]
    fn unknown_expectation_fails() {
        let req = request(Some("something-else"), Version::HTTP_11, BodyFraming::Length(5));
        assert_eq!(decide(&req, None),
                   ContinueAction::Reject(StatusCode::EXPECTATION_FAILED));
    }
}
