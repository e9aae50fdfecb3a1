//! One running CGI script and its pipes.
//!
//! Nothing here blocks: both pipe ends are non-blocking, and the read and
//! write methods do what they can and report back. Registering the pipes
//! with the poller is left to whoever owns it.

use crate::cgi::{parser, DocumentHeaders};
use crate::errors::{Error, Result};
use crate::http::response::Response;
use crate::log_util::ascii_escape_prefix;

use mio::Token;
use mio::unix::pipe::{Receiver, Sender};

use std::io::{self, Read, Write};
use std::process::{Child, ExitStatus};
use std::time::{Duration, Instant};

/// A script that hasn't finished its headers within this many bytes is
/// considered broken.
const MAX_HEADER_BLOCK: usize = 64 * 1024;

/// Output beyond this is never going to be sent; the script is treated as
/// a failure instead.
const MAX_OUTPUT: usize = 32 * 1024 * 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum OutputState {
    ReadingHeaders,
    ReadingBody { body_start: usize },
    Done { body_start: usize },
}

#[derive(Debug)]
pub struct CgiProcess {
    child: Child,
    stdin: Option<Sender>,
    stdout: Option<Receiver>,
    /// The request body, fed to stdin as it will take it
    input: Vec<u8>,
    written: usize,
    output: Vec<u8>,
    max_output: usize,
    state: OutputState,
    document: Option<DocumentHeaders>,
    started: Instant,
    deadline: Instant,
    exit: Option<ExitStatus>,
    /// The connection waiting on this script, if it's still around
    pub client: Option<Token>,
}

impl CgiProcess {
    /// Wraps a freshly spawned child whose stdin and stdout are piped.
    pub fn new(mut child: Child, input: Vec<u8>, timeout: Duration, client: Token)
               -> io::Result<CgiProcess> {
        let stdout = match child.stdout.take() {
            Some(out) => Receiver::from(out),
            None => return Err(io::Error::new(io::ErrorKind::Other, "CGI stdout not piped"))
        };
        stdout.set_nonblocking(true)?;

        // A script with no body to read sees EOF straight away
        let stdin = match child.stdin.take() {
            Some(inp) if !input.is_empty() => {
                let sender = Sender::from(inp);
                sender.set_nonblocking(true)?;
                Some(sender)
            },
            _ => None
        };

        let now = Instant::now();
        Ok(CgiProcess {
            child: child,
            stdin: stdin,
            stdout: Some(stdout),
            input: input,
            written: 0,
            output: Vec::with_capacity(4096),
            max_output: MAX_OUTPUT,
            state: OutputState::ReadingHeaders,
            document: None,
            started: now,
            deadline: now + timeout,
            exit: None,
            client: Some(client),
        })
    }

    pub fn id(&self) -> u32 {
        self.child.id()
    }

    pub fn stdin_mut(&mut self) -> Option<&mut Sender> {
        self.stdin.as_mut()
    }

    pub fn stdout_mut(&mut self) -> Option<&mut Receiver> {
        self.stdout.as_mut()
    }

    /// Hands over the stdin pipe so it can be deregistered and closed.
    pub fn take_stdin(&mut self) -> Option<Sender> {
        self.stdin.take()
    }

    pub fn take_stdout(&mut self) -> Option<Receiver> {
        self.stdout.take()
    }

    pub fn stdout_closed(&self) -> bool {
        self.stdout.is_none()
    }

    pub fn deadline(&self) -> Instant {
        self.deadline
    }

    pub fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }

    #[cfg(test)]
    pub fn limit_output(&mut self, max: usize) {
        self.max_output = max;
    }

    /// Feeds as much of the body to the script as the pipe takes. True once
    /// all of it is written, or the script stopped reading.
    pub fn write_input(&mut self) -> io::Result<bool> {
        let stdin = match self.stdin {
            Some(ref mut s) => s,
            None => return Ok(true)
        };

        while self.written < self.input.len() {
            match stdin.write(&self.input[self.written ..]) {
                Ok(0) => return Ok(true),
                Ok(n) => self.written += n,
                Err(ref e) if e.kind() == io::ErrorKind::WouldBlock => return Ok(false),
                Err(ref e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(ref e) if e.kind() == io::ErrorKind::BrokenPipe => {
                    debug!("CGI {} closed stdin after {} of {} bytes",
                           self.child.id(), self.written, self.input.len());
                    return Ok(true);
                },
                Err(e) => return Err(e)
            }
        }

        Ok(true)
    }

    /// Drains whatever the script has written. True once stdout hit EOF.
    ///
    /// Fails as soon as the output can't be a valid CGI response.
    pub fn read_output(&mut self) -> Result<bool> {
        let mut eof = false;

        if let Some(ref mut stdout) = self.stdout {
            let mut buf = [0; 16 * 1024];
            loop {
                match stdout.read(&mut buf) {
                    Ok(0) => {
                        eof = true;
                        break;
                    },
                    Ok(n) => {
                        self.output.extend_from_slice(&buf[.. n]);
                        if self.output.len() > self.max_output {
                            warn!("CGI {} wrote more than {} bytes",
                                  self.child.id(), self.max_output);
                            return Err(Error::MalformedCgiOutput);
                        }
                    },
                    Err(ref e) if e.kind() == io::ErrorKind::WouldBlock => break,
                    Err(ref e) if e.kind() == io::ErrorKind::Interrupted => continue,
                    Err(e) => return Err(Error::from(e))
                }
            }
        } else {
            eof = true;
        }

        if self.state == OutputState::ReadingHeaders {
            self.parse_headers(eof)?;
        }
        if eof {
            if let OutputState::ReadingBody { body_start } = self.state {
                self.state = OutputState::Done { body_start: body_start };
            }
        }

        Ok(eof)
    }

    fn parse_headers(&mut self, eof: bool) -> Result<()> {
        match parser::headers(&self.output) {
            Ok((rest, headers)) => {
                let body_start = self.output.len() - rest.len();
                self.document = Some(DocumentHeaders::from_headers(headers)?);
                self.state = OutputState::ReadingBody { body_start: body_start };
                Ok(())
            },
            Err(nom::Err::Incomplete(_)) if !eof && self.output.len() <= MAX_HEADER_BLOCK =>
                Ok(()),
            Err(_) => {
                warn!("CGI {} wrote a bad header block: \"{}\"",
                      self.child.id(), ascii_escape_prefix(&self.output, 200));
                Err(Error::MalformedCgiOutput)
            }
        }
    }

    /// Checks on the child without waiting for it.
    pub fn try_reap(&mut self) -> io::Result<Option<ExitStatus>> {
        if self.exit.is_none() {
            self.exit = self.child.try_wait()?;
            if let Some(status) = self.exit {
                debug!("CGI {} exited with {} after {:?}",
                       self.child.id(), status, self.started.elapsed());
            }
        }
        Ok(self.exit)
    }

    /// All output is in and the child is gone.
    pub fn is_finished(&self) -> bool {
        match self.state {
            OutputState::Done { .. } => self.stdout.is_none() && self.exit.is_some(),
            _ => false
        }
    }

    pub fn kill(&mut self) {
        if self.exit.is_none() {
            if let Err(e) = self.child.kill() {
                debug!("Killing CGI {}: {}", self.child.id(), e);
            }
        }
    }

    /// Builds the response out of everything the script wrote.
    pub fn into_response(self) -> Result<Response> {
        let CgiProcess { state, document, mut output, .. } = self;

        match (state, document) {
            (OutputState::Done { body_start }, Some(document)) => {
                let body = output.split_off(body_start);
                Ok(document.into_response(body))
            },
            _ => Err(Error::MalformedCgiOutput)
        }
    }

    /// What's left once the output no longer matters: the child, for
    /// reaping.
    pub fn into_child(self) -> Child {
        self.child
    }
}
