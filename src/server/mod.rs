//! Server functionality
//!
//! Everything runs on one thread around one `mio::Poll`: the listeners,
//! every client socket, and the pipes of every running CGI script. No peer
//! is ever waited on; each event does whatever work is ready and returns.
//!
//! Tokens below the listener count belong to listeners. Every other token
//! is handed out once, in order, to a client socket or a CGI pipe.

mod connection;
pub mod router;
mod static_files;

use crate::cgi::gateway::{Gateway, PipeEnd};
use crate::cgi::process::CgiProcess;
use crate::config::Config;
use crate::errors::Result;
use crate::http::response::Response;
use crate::server::connection::{Connection, Step};
use crate::server::router::Router;
use crate::status::Outcome;

use mio::{Events, Interest, Poll, Registry, Token};
use mio::event::Event;
use mio::net::TcpListener;

use std::collections::HashMap;
use std::io::{self, ErrorKind};
use std::net::{SocketAddr, ToSocketAddrs};
use std::time::{Duration, Instant};

const EVENTS_CAPACITY: usize = 1024;
/// How long the poller sleeps while scripts are running and may need
/// reaping or timing out
const CGI_TICK: Duration = Duration::from_millis(100);
/// How long it sleeps otherwise; idle connections are swept this often
const IDLE_TICK: Duration = Duration::from_secs(1);

/// What a connection needs from the server to handle a request
pub struct Context<'a> {
    pub config: &'a Config,
    pub router: &'a Router,
    gateway: &'a mut Gateway,
    registry: &'a Registry,
    next_token: &'a mut usize,
}

impl<'a> Context<'a> {
    fn allocate(&mut self) -> Token {
        let token = Token(*self.next_token);
        *self.next_token += 1;
        token
    }

    /// Registers a freshly started script's pipes and hands it to the
    /// gateway. Returns the key it's filed under.
    pub fn start_cgi(&mut self, mut process: CgiProcess) -> io::Result<Token> {
        let stdout = self.allocate();
        let stdin = if process.stdin_mut().is_some() { Some(self.allocate()) } else { None };

        if let Err(e) = self.register_pipes(&mut process, stdout, stdin) {
            release_pipes(self.registry, &mut process);
            self.gateway.abandon(process);
            return Err(e);
        }

        self.gateway.insert(stdout, stdin, process);
        Ok(stdout)
    }

    fn register_pipes(&self, process: &mut CgiProcess, stdout: Token, stdin: Option<Token>)
                      -> io::Result<()> {
        if let Some(pipe) = process.stdout_mut() {
            self.registry.register(pipe, stdout, Interest::READABLE)?;
        }
        if let (Some(pipe), Some(token)) = (process.stdin_mut(), stdin) {
            self.registry.register(pipe, token, Interest::WRITABLE)?;
        }
        Ok(())
    }
}

/// Drops both pipes of a process, deregistering whatever is still open.
fn release_pipes(registry: &Registry, process: &mut CgiProcess) {
    if let Some(mut pipe) = process.take_stdin() {
        let _ = registry.deregister(&mut pipe);
    }
    if let Some(mut pipe) = process.take_stdout() {
        let _ = registry.deregister(&mut pipe);
    }
}

pub struct Server {
    poll: Poll,
    listeners: Vec<TcpListener>,
    connections: HashMap<Token, Connection>,
    gateway: Gateway,
    router: Router,
    config: Config,
    next_token: usize,
}

impl Server {
    /// Binds one listener per configured port.
    pub fn bind(config: Config) -> Result<Server> {
        let poll = Poll::new()?;
        let mut listeners = Vec::with_capacity(config.ports.len());

        for (i, &port) in config.ports.iter().enumerate() {
            let addr = (config.host.as_str(), port).to_socket_addrs()?
                .next()
                .ok_or_else(|| io::Error::new(ErrorKind::AddrNotAvailable,
                                              format!("{} doesn't resolve", config.host)))?;

            let mut listener = TcpListener::bind(addr)?;
            poll.registry().register(&mut listener, Token(i), Interest::READABLE)?;
            info!("Listening on {}", listener.local_addr()?);
            listeners.push(listener);
        }

        Ok(Server {
            poll: poll,
            next_token: listeners.len(),
            listeners: listeners,
            connections: HashMap::new(),
            gateway: Gateway::new(),
            router: Router::new(&config),
            config: config,
        })
    }

    #[cfg(test)]
    pub fn local_addrs(&self) -> Vec<SocketAddr> {
        self.listeners.iter()
            .filter_map(|l| l.local_addr().ok())
            .collect()
    }

    /// Serves forever.
    pub fn run(&mut self) -> Result<()> {
        loop {
            self.turn(None)?;
        }
    }

    /// Waits for events once, at most `timeout`, handles them, and then
    /// deals with whatever timed out.
    pub fn turn(&mut self, timeout: Option<Duration>) -> Result<()> {
        let tick = if self.gateway.is_idle() { IDLE_TICK } else { CGI_TICK };
        let timeout = timeout.map_or(tick, |t| t.min(tick));

        let mut events = Events::with_capacity(EVENTS_CAPACITY);
        match self.poll.poll(&mut events, Some(timeout)) {
            Ok(()) => (),
            Err(ref e) if e.kind() == ErrorKind::Interrupted => (),
            Err(e) => return Err(e.into())
        }

        for event in events.iter() {
            let token = event.token();

            if token.0 < self.listeners.len() {
                self.accept(token.0);
            } else if self.connections.contains_key(&token) {
                self.client_event(token, event);
            } else if let Some((key, end)) = self.gateway.lookup(token) {
                self.pipe_event(token, key, end);
            } else {
                trace!("Stale event for {:?}", token);
            }
        }

        self.sweep(Instant::now());
        Ok(())
    }

    fn accept(&mut self, index: usize) {
        loop {
            let (mut stream, peer) = match self.listeners[index].accept() {
                Ok(pair) => pair,
                Err(ref e) if e.kind() == ErrorKind::WouldBlock => return,
                Err(ref e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) => {
                    warn!("Failed connection: {}", e);
                    return;
                }
            };

            let token = Token(self.next_token);
            self.next_token += 1;

            let registered = self.poll.registry()
                .register(&mut stream, token, Interest::READABLE | Interest::WRITABLE);
            if let Err(e) = registered {
                warn!("Couldn't register connection from {}: {}", peer, e);
                continue;
            }
            let local = match stream.local_addr() {
                Ok(addr) => addr,
                Err(e) => {
                    warn!("Dropping connection from {}: {}", peer, e);
                    let _ = self.poll.registry().deregister(&mut stream);
                    continue;
                }
            };
            let _ = stream.set_nodelay(true);

            debug!("Accepted {} as {:?}", peer, token);
            let conn = Connection::new(token, stream, peer, local, &self.config.limits);
            self.connections.insert(token, conn);
            self.step(token);
        }
    }

    fn client_event(&mut self, token: Token, event: &Event) {
        if event.is_error() {
            self.close(token, "socket error");
        } else {
            self.step(token);
        }
    }

    /// Lets a connection make progress, and closes it if it's done.
    fn step(&mut self, token: Token) {
        let step = match self.connections.get_mut(&token) {
            Some(conn) => {
                let mut ctx = Context {
                    config: &self.config,
                    router: &self.router,
                    gateway: &mut self.gateway,
                    registry: self.poll.registry(),
                    next_token: &mut self.next_token,
                };
                conn.step(&mut ctx)
            },
            None => return
        };

        if let Step::Close(why) = step {
            self.close(token, why);
        }
    }

    fn close(&mut self, token: Token, why: &str) {
        let mut conn = match self.connections.remove(&token) {
            Some(c) => c,
            None => return
        };

        let _ = self.poll.registry().deregister(conn.stream_mut());

        if let Some(key) = conn.take_cgi() {
            if let Some(mut process) = self.gateway.remove(key) {
                release_pipes(self.poll.registry(), &mut process);
                self.gateway.abandon(process);
            }
        }

        debug!("Closed {} ({})", conn.peer(), why);
    }

    fn pipe_event(&mut self, token: Token, key: Token, end: PipeEnd) {
        let registry = self.poll.registry();
        let process = match self.gateway.get_mut(key) {
            Some(p) => p,
            None => return
        };

        let mut closed_pipe = false;
        let mut failed = false;

        match end {
            PipeEnd::Stdin => {
                let done = process.write_input().unwrap_or_else(|e| {
                    warn!("Writing to CGI {} failed: {}", process.id(), e);
                    true
                });
                if done {
                    if let Some(mut pipe) = process.take_stdin() {
                        let _ = registry.deregister(&mut pipe);
                    }
                    closed_pipe = true;
                }
            },
            PipeEnd::Stdout => match process.read_output() {
                Ok(true) => {
                    if let Some(mut pipe) = process.take_stdout() {
                        let _ = registry.deregister(&mut pipe);
                    }
                    closed_pipe = true;
                },
                Ok(false) => (),
                Err(e) => {
                    debug!("CGI {} failed: {:?}", process.id(), e);
                    failed = true;
                }
            }
        }

        if closed_pipe {
            self.gateway.forget_pipe(token);
        }
        if failed {
            self.fail_cgi(key, Outcome::GatewayFailure);
        } else {
            self.check_cgi(key);
        }
    }

    /// Completes a script's request if it has exited and all its output is
    /// in.
    fn check_cgi(&mut self, key: Token) {
        let finished = match self.gateway.get_mut(key) {
            Some(process) => {
                if let Err(e) = process.try_reap() {
                    warn!("Couldn't check on CGI {}: {}", process.id(), e);
                }
                process.is_finished()
            },
            None => return
        };
        if !finished {
            return;
        }

        let mut process = match self.gateway.remove(key) {
            Some(p) => p,
            None => return
        };
        release_pipes(self.poll.registry(), &mut process);

        let client = process.client;
        let result = process.into_response().map_err(|e| {
            debug!("CGI output unusable: {:?}", e);
            Outcome::GatewayFailure
        });
        self.deliver(client, result);
    }

    /// Gives up on a script and answers its request with `outcome`.
    fn fail_cgi(&mut self, key: Token, outcome: Outcome) {
        let mut process = match self.gateway.remove(key) {
            Some(p) => p,
            None => return
        };
        release_pipes(self.poll.registry(), &mut process);

        let client = process.client;
        self.gateway.abandon(process);
        self.deliver(client, Err(outcome));
    }

    fn deliver(&mut self, client: Option<Token>, result: ::std::result::Result<Response, Outcome>) {
        let token = match client {
            Some(t) => t,
            None => return
        };

        if let Some(conn) = self.connections.get_mut(&token) {
            let mut ctx = Context {
                config: &self.config,
                router: &self.router,
                gateway: &mut self.gateway,
                registry: self.poll.registry(),
                next_token: &mut self.next_token,
            };
            conn.finish_cgi(result, &mut ctx);
        }
        self.step(token);
    }

    fn sweep(&mut self, now: Instant) {
        for key in self.gateway.expired(now) {
            warn!("CGI for {:?} ran out of time", key);
            self.fail_cgi(key, Outcome::GatewayTimeout);
        }

        for key in self.gateway.unreaped() {
            self.check_cgi(key);
        }
        self.gateway.reap();

        let idle = self.config.limits.idle_timeout;
        let expired: Vec<(Token, &'static str)> = self.connections.iter()
            .filter_map(|(&token, conn)| conn.expired(now, idle).map(|why| (token, why)))
            .collect();
        for (token, why) in expired {
            self.close(token, why);
        }
    }
}
