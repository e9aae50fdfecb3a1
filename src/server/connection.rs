//! One client connection and everything it's in the middle of.
//!
//! A connection moves through four phases. `Reading` feeds socket bytes to
//! the parser until a request is complete or rejected. `Waiting` means a
//! CGI script is producing the response. `Writing` drains the serialized
//! response, and afterwards either goes back to `Reading` or closes.
//! `Lingering` follows an error response sent while request bytes may still
//! be in flight: our side is shut for writing and input is thrown away
//! until the peer gives up, so the error isn't lost to a reset.
//!
//! Only one request is handled at a time; pipelined bytes wait in the
//! buffer until the previous response is out.

use crate::cgi::{self, ServerMeta};
use crate::cgi::gateway::{self, Launch};
use crate::errors::Error;
use crate::http::{Method, Target};
use crate::http::buffer::Buffer;
use crate::http::expect::{self, ContinueAction, CONTINUE_RESPONSE};
use crate::http::parser::{Parsed, RequestParser};
use crate::http::response::{Response, ResponseBody};
use crate::server::Context;
use crate::server::router::RouteKind;
use crate::server::static_files::{self, Handled};
use crate::status::{self, Admission, Outcome, StatusCode};
use crate::config::Limits;
use crate::log_util::ascii_escape_prefix;

use mio::Token;
use mio::net::TcpStream;

use std::fs::File;
use std::io::{self, Read, Write};
use std::net::{Shutdown, SocketAddr};
use std::time::{Duration, Instant};

const READ_CHUNK: usize = 16 * 1024;
/// Past this many unparsed bytes, the socket isn't read until the parser
/// catches up.
const HIGH_WATER: usize = 256 * 1024;
const FILE_CHUNK: usize = 64 * 1024;
const LINGER: Duration = Duration::from_secs(2);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Reading,
    Waiting,
    Writing,
    Lingering { until: Instant },
}

/// What happens once the current response has been written
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Closing {
    KeepAlive,
    Close,
    Linger,
}

#[derive(Debug, PartialEq, Eq)]
pub enum Step {
    Open,
    Close(&'static str),
}

/// The request between its head and its response
#[derive(Debug)]
struct InFlight {
    method: Method,
    raw_target: String,
    target: Option<Target>,
    route: Option<usize>,
    admission: Admission,
    keep_alive: bool,
}

#[derive(Debug)]
pub struct Connection {
    token: Token,
    stream: TcpStream,
    peer: SocketAddr,
    local: SocketAddr,
    inbound: Buffer,
    parser: RequestParser,
    outbound: Vec<u8>,
    written: usize,
    /// Rest of a file body still to be sent, and how much of it remains
    file: Option<(File, u64)>,
    phase: Phase,
    closing: Closing,
    in_flight: Option<InFlight>,
    /// Key of the CGI process working on our request
    cgi: Option<Token>,
    peer_closed: bool,
    last_activity: Instant,
}

impl Connection {
    pub fn new(token: Token, stream: TcpStream, peer: SocketAddr, local: SocketAddr,
               limits: &Limits) -> Connection {
        Connection {
            token: token,
            stream: stream,
            peer: peer,
            local: local,
            inbound: Buffer::new(limits.max_line_length),
            parser: RequestParser::new(limits.max_header_count, limits.client_max_body_size),
            outbound: Vec::new(),
            written: 0,
            file: None,
            phase: Phase::Reading,
            closing: Closing::KeepAlive,
            in_flight: None,
            cgi: None,
            peer_closed: false,
            last_activity: Instant::now(),
        }
    }

    pub fn peer(&self) -> SocketAddr {
        self.peer
    }

    pub fn stream_mut(&mut self) -> &mut TcpStream {
        &mut self.stream
    }

    /// Detaches the CGI process, if any, so it can be cleaned up.
    pub fn take_cgi(&mut self) -> Option<Token> {
        self.cgi.take()
    }

    /// Makes all the progress currently possible: parse, write, read, and
    /// again, until nothing moves.
    pub fn step(&mut self, ctx: &mut Context) -> Step {
        loop {
            let mut progress = false;

            if self.phase == Phase::Reading {
                progress |= self.pump(ctx);
            }

            match self.flush() {
                Ok(moved) => progress |= moved,
                Err(e) => {
                    debug!("Write to {} failed: {}", self.peer, e);
                    return Step::Close("write failed");
                }
            }

            if self.phase == Phase::Writing && self.outbound.is_empty() && self.file.is_none() {
                match self.closing {
                    Closing::KeepAlive => {
                        self.phase = Phase::Reading;
                        self.in_flight = None;
                    },
                    Closing::Close => return Step::Close("response sent"),
                    Closing::Linger => {
                        let _ = self.stream.shutdown(Shutdown::Write);
                        self.phase = Phase::Lingering { until: Instant::now() + LINGER };
                    }
                }
                progress = true;
            }

            match self.read_chunk() {
                Ok(moved) => progress |= moved,
                Err(e) => {
                    debug!("Read from {} failed: {}", self.peer, e);
                    return Step::Close("read failed");
                }
            }

            if self.peer_closed {
                match self.phase {
                    Phase::Reading if !progress => return Step::Close("peer closed"),
                    Phase::Reading => (),
                    Phase::Waiting => return Step::Close("peer left during CGI"),
                    Phase::Lingering { .. } => return Step::Close("linger finished"),
                    Phase::Writing => self.closing = Closing::Close,
                }
            }

            if !progress {
                return Step::Open;
            }
        }
    }

    /// Why this connection should be dropped by now, if it should
    pub fn expired(&self, now: Instant, idle: Duration) -> Option<&'static str> {
        match self.phase {
            Phase::Lingering { until } if now >= until => Some("linger finished"),
            Phase::Lingering { .. } | Phase::Waiting => None,
            _ if now.duration_since(self.last_activity) >= idle => Some("idle timeout"),
            _ => None
        }
    }

    /// Delivers the result of our CGI process.
    pub fn finish_cgi(&mut self, result: Result<Response, Outcome>, ctx: &mut Context) {
        self.cgi = None;
        if self.phase != Phase::Waiting {
            return;
        }
        self.respond_with(result.map(|res| (Outcome::Script(res.status), res)), ctx);
    }

    fn pump(&mut self, ctx: &mut Context) -> bool {
        let mut progress = false;

        while self.phase == Phase::Reading {
            match self.parser.advance(&mut self.inbound) {
                Ok(Parsed::NeedMore) => break,
                Ok(Parsed::Head) => {
                    progress = true;
                    self.on_head(ctx);
                },
                Ok(Parsed::Complete) => {
                    progress = true;
                    self.on_complete(ctx);
                },
                Err(e) => {
                    progress = true;
                    self.on_parse_error(e, ctx);
                }
            }
        }

        progress
    }

    fn on_head(&mut self, ctx: &mut Context) {
        let (action, flight, limit, has_body) = {
            let req = match self.parser.request() {
                Some(r) => r,
                None => return self.on_parse_error(Error::Framing("head without request"), ctx)
            };

            let target = Target::parse(&req.target).ok();
            let route = target.as_ref().and_then(|t| ctx.router.route(&t.path));
            let route_ref = route.and_then(|i| ctx.router.get(i));
            let limit = route_ref
                .map_or(ctx.config.limits.client_max_body_size, |r| r.body_limit);

            let admission = Admission::assess(req, target.is_some(),
                                              route_ref.map(|r| &r.methods[..]), limit);
            let action = expect::decide(req, status::admit(&admission));

            let flight = InFlight {
                method: req.method.clone(),
                raw_target: req.target.clone(),
                target: target,
                route: route,
                admission: admission,
                keep_alive: req.keep_alive(),
            };
            (action, flight, limit, req.framing.has_body())
        };

        let keep_alive = flight.keep_alive;
        self.in_flight = Some(flight);

        match action {
            ContinueAction::Reject(status) => {
                // An announced body that won't be read leaves the stream
                // misaligned
                let closing = match (has_body, keep_alive) {
                    (true, _) => Closing::Linger,
                    (false, true) => Closing::KeepAlive,
                    (false, false) => Closing::Close,
                };
                self.parser.reset();
                self.respond(Response::error(status, &ctx.config.error_pages), closing);
            },
            ContinueAction::SendContinue => {
                self.outbound.extend_from_slice(CONTINUE_RESPONSE);
                self.parser.set_body_limit(limit);
            },
            ContinueAction::Proceed => self.parser.set_body_limit(limit),
        }
    }

    fn on_parse_error(&mut self, error: Error, ctx: &mut Context) {
        let admission = match error {
            Error::BodyTooLarge => Admission::too_large(),
            _ => Admission::malformed()
        };
        let status = status::admit(&admission).unwrap_or(StatusCode::BAD_REQUEST);
        if self.parser.rejected_line().is_empty() {
            debug!("Rejecting request from {}: {:?}", self.peer, error);
        } else {
            debug!("Rejecting request from {}: {:?} in \"{}\"", self.peer, error,
                   ascii_escape_prefix(self.parser.rejected_line(), 200));
        }

        if let Some(ref mut flight) = self.in_flight {
            flight.admission = admission;
        }

        self.respond(Response::error(status, &ctx.config.error_pages), Closing::Linger);
    }

    fn on_complete(&mut self, ctx: &mut Context) {
        let req = match self.parser.take_request() {
            Some(r) => r,
            None => return
        };
        let (target, route) = match self.in_flight {
            Some(InFlight { target: Some(ref t), route, .. }) => (t.clone(), route),
            _ => return self.respond_with(Err(Outcome::Missing), ctx)
        };
        let route = match route.and_then(|i| ctx.router.get(i)) {
            Some(r) => r,
            None => return self.respond_with(Err(Outcome::Missing), ctx)
        };

        match route.kind {
            RouteKind::Redirect { code, ref location } => {
                let res = Response::redirect(code, location);
                self.respond_with(Ok((Outcome::Redirect(code), res)), ctx);
            },
            RouteKind::Cgi { ref extension, ref interpreter } => {
                let relative = route.relative(&target.path);
                match cgi::locate_script(&route.prefix, &route.root, relative, extension) {
                    Some(script) => {
                        let meta = ServerMeta {
                            server_name: ctx.config.host.clone(),
                            server_port: self.local.port(),
                            remote: self.peer,
                        };
                        let launch = Launch {
                            request: &req,
                            target: &target,
                            script: &script,
                            interpreter: interpreter.as_deref(),
                            root: &route.root,
                            meta: &meta,
                            timeout: route.cgi_timeout,
                        };

                        let started = gateway::launch(&launch, self.token)
                            .and_then(|process| ctx.start_cgi(process).map_err(|e| {
                                warn!("Couldn't register CGI pipes: {}", e);
                                Outcome::GatewayFailure
                            }));
                        match started {
                            Ok(key) => {
                                self.cgi = Some(key);
                                self.phase = Phase::Waiting;
                            },
                            Err(outcome) => self.respond_with(Err(outcome), ctx)
                        }
                    },
                    None => {
                        let handled = static_files::serve(route, &target, &req);
                        self.respond_with(handled, ctx);
                    }
                }
            },
            RouteKind::Static => {
                let handled = static_files::serve(route, &target, &req);
                self.respond_with(handled, ctx);
            }
        }
    }

    /// Settles the final status of a handled request and queues the
    /// response.
    fn respond_with(&mut self, handled: Handled, ctx: &mut Context) {
        let bad_gateway = ctx.config.cgi.failure_status;
        let (admission, keep_alive) = match self.in_flight {
            Some(ref f) => (f.admission.clone(), f.keep_alive),
            None => (Admission::default(), false)
        };

        let res = match handled {
            Ok((outcome, mut res)) => {
                res.status = status::decide(&admission, &outcome, bad_gateway);
                res
            },
            Err(outcome) => {
                let status = status::decide(&admission, &outcome, bad_gateway);
                Response::error(status, &ctx.config.error_pages)
            }
        };

        let closing = if keep_alive { Closing::KeepAlive } else { Closing::Close };
        self.respond(res, closing);
    }

    fn respond(&mut self, res: Response, closing: Closing) {
        match self.in_flight {
            Some(ref f) => info!("{} \"{} {}\" {}", self.peer, f.method, f.raw_target, res.status),
            None => info!("{} \"-\" {}", self.peer, res.status)
        }

        let (head, body) = res.into_wire(closing == Closing::KeepAlive);
        self.outbound.extend_from_slice(&head);
        match body {
            ResponseBody::Empty => (),
            ResponseBody::Bytes(bytes) => self.outbound.extend_from_slice(&bytes),
            ResponseBody::File { file, len } => self.file = Some((file, len)),
        }

        self.closing = closing;
        self.phase = Phase::Writing;
    }

    /// Writes until the socket pushes back or there's nothing left.
    fn flush(&mut self) -> io::Result<bool> {
        let mut progress = false;

        loop {
            if self.written < self.outbound.len() {
                match self.stream.write(&self.outbound[self.written ..]) {
                    Ok(0) => return Err(io::Error::new(io::ErrorKind::WriteZero,
                                                       "socket accepted no bytes")),
                    Ok(n) => {
                        self.written += n;
                        self.last_activity = Instant::now();
                        progress = true;
                    },
                    Err(ref e) if e.kind() == io::ErrorKind::WouldBlock => return Ok(progress),
                    Err(ref e) if e.kind() == io::ErrorKind::Interrupted => (),
                    Err(e) => return Err(e)
                }
                continue;
            }

            self.outbound.clear();
            self.written = 0;

            let done = match self.file {
                Some((ref mut file, ref mut remaining)) if *remaining > 0 => {
                    let want = (*remaining).min(FILE_CHUNK as u64) as usize;
                    self.outbound.resize(want, 0);
                    let n = file.read(&mut self.outbound)?;
                    if n == 0 {
                        return Err(io::Error::new(io::ErrorKind::UnexpectedEof,
                                                  "file shrank while being sent"));
                    }
                    self.outbound.truncate(n);
                    *remaining -= n as u64;
                    false
                },
                _ => true
            };

            if done {
                self.file = None;
                return Ok(progress);
            }
        }
    }

    /// Reads what the socket has, within the buffer's high-water mark.
    fn read_chunk(&mut self) -> io::Result<bool> {
        let mut progress = false;
        let mut buf = [0; READ_CHUNK];
        let lingering = match self.phase {
            Phase::Lingering { .. } => true,
            _ => false
        };

        while !self.peer_closed && (lingering || self.inbound.len() < HIGH_WATER) {
            match self.stream.read(&mut buf) {
                Ok(0) => {
                    self.peer_closed = true;
                    progress = true;
                },
                Ok(n) => {
                    self.last_activity = Instant::now();
                    progress = true;
                    if !lingering {
                        self.inbound.append(&buf[.. n]);
                    }
                },
                Err(ref e) if e.kind() == io::ErrorKind::WouldBlock => break,
                Err(ref e) if e.kind() == io::ErrorKind::Interrupted => (),
                Err(e) => return Err(e)
            }
        }

        Ok(progress)
    }
}
