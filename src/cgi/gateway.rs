//! Bookkeeping for every script in flight.
//!
//! Each process is keyed by the token of its stdout pipe; its stdin pipe,
//! while open, has a token of its own that maps back to the same key.
//! Killed or orphaned children are kept around until they can be reaped.

use crate::cgi::{metavariables, ScriptLocation, ServerMeta};
use crate::cgi::process::CgiProcess;
use crate::filesystem::is_contained;
use crate::http::{Request, Target};
use crate::status::Outcome;

use mio::Token;

use std::collections::HashMap;
use std::ffi::OsStr;
use std::fs;
use std::os::unix::ffi::OsStrExt;
use std::os::unix::fs::PermissionsExt;
use std::path::Path;
use std::process::{Child, Command, Stdio};
use std::time::{Duration, Instant};

/// Which end of a script's plumbing an event is for
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipeEnd {
    Stdin,
    Stdout,
}

#[derive(Debug, Default)]
pub struct Gateway {
    processes: HashMap<Token, CgiProcess>,
    pipes: HashMap<Token, (Token, PipeEnd)>,
    reaping: Vec<Child>,
}

impl Gateway {
    pub fn new() -> Gateway {
        Gateway::default()
    }

    /// Takes charge of a process whose pipes are registered under
    /// `stdout` and, if it has one, `stdin`.
    pub fn insert(&mut self, stdout: Token, stdin: Option<Token>, process: CgiProcess) {
        self.pipes.insert(stdout, (stdout, PipeEnd::Stdout));
        if let Some(token) = stdin {
            self.pipes.insert(token, (stdout, PipeEnd::Stdin));
        }
        self.processes.insert(stdout, process);
    }

    /// The process key and pipe end behind a poll token
    pub fn lookup(&self, token: Token) -> Option<(Token, PipeEnd)> {
        self.pipes.get(&token).cloned()
    }

    pub fn get_mut(&mut self, key: Token) -> Option<&mut CgiProcess> {
        self.processes.get_mut(&key)
    }

    /// Forgets a pipe token once that pipe has been closed.
    pub fn forget_pipe(&mut self, token: Token) {
        self.pipes.remove(&token);
    }

    pub fn remove(&mut self, key: Token) -> Option<CgiProcess> {
        self.pipes.retain(|_, &mut (k, _)| k != key);
        self.processes.remove(&key)
    }

    /// Kills a process whose output nobody wants any more and keeps the
    /// child until it can be reaped.
    pub fn abandon(&mut self, mut process: CgiProcess) {
        info!("Killing CGI {} after {:?}", process.id(), process.elapsed());
        process.kill();
        self.reaping.push(process.into_child());
    }

    /// Collects whichever abandoned children have exited.
    pub fn reap(&mut self) {
        self.reaping.retain_mut(|child| match child.try_wait() {
            Ok(Some(_)) => false,
            Ok(None) => true,
            Err(e) => {
                warn!("Couldn't reap CGI {}: {}", child.id(), e);
                false
            }
        });
    }

    /// Keys of the processes that have run out of time
    pub fn expired(&self, now: Instant) -> Vec<Token> {
        self.processes.iter()
            .filter(|&(_, p)| p.deadline() <= now)
            .map(|(&key, _)| key)
            .collect()
    }

    /// Keys of processes that may be done but haven't been seen to exit
    pub fn unreaped(&self) -> Vec<Token> {
        self.processes.iter()
            .filter(|&(_, p)| p.stdout_closed())
            .map(|(&key, _)| key)
            .collect()
    }

    pub fn is_idle(&self) -> bool {
        self.processes.is_empty() && self.reaping.is_empty()
    }
}

/// Everything needed to start one script
#[derive(Debug)]
pub struct Launch<'a> {
    pub request: &'a Request,
    pub target: &'a Target,
    pub script: &'a ScriptLocation,
    pub interpreter: Option<&'a Path>,
    pub root: &'a Path,
    pub meta: &'a ServerMeta,
    pub timeout: Duration,
}

/// Checks the script and starts it. Failures come back as the outcome to
/// answer with.
pub fn launch(params: &Launch, client: Token) -> Result<CgiProcess, Outcome> {
    // Scripts run from their own directory, so they're started by an
    // absolute path
    let filename = match params.script.script_filename.canonicalize() {
        Ok(f) => f,
        Err(_) => return Err(Outcome::Missing)
    };
    let meta = match fs::metadata(&filename) {
        Ok(m) => m,
        Err(_) => return Err(Outcome::Missing)
    };

    if meta.is_dir() || !is_contained(params.root, &filename) {
        return Err(Outcome::Forbidden);
    }
    if params.interpreter.is_none() && meta.permissions().mode() & 0o111 == 0 {
        warn!("CGI script {} isn't executable", filename.display());
        return Err(Outcome::Forbidden);
    }

    let script = ScriptLocation {
        script_filename: filename.clone(),
        ..params.script.clone()
    };

    let mut command = match params.interpreter {
        Some(interpreter) => {
            let mut c = Command::new(interpreter);
            c.arg(&filename);
            c
        },
        None => Command::new(&filename)
    };

    if let Some(dir) = filename.parent() {
        command.current_dir(dir);
    }
    command.env_clear()
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::inherit());
    for (name, value) in metavariables(params.request, params.target, &script, params.meta) {
        command.env(name, OsStr::from_bytes(&value));
    }

    let child = match command.spawn() {
        Ok(c) => c,
        Err(e) => {
            warn!("Couldn't start CGI {}: {}", filename.display(), e);
            return Err(Outcome::GatewayFailure);
        }
    };

    info!("Started CGI {} (pid {}) for {} {}",
          filename.display(), child.id(), params.request.method, params.request.target);

    CgiProcess::new(child, params.request.body.clone(), params.timeout, client)
        .map_err(|e| {
            warn!("Couldn't set up pipes for CGI {}: {}", filename.display(), e);
            Outcome::GatewayFailure
        })
}
