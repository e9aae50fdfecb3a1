//! A small HTTP/1.1 origin server with CGI support.
//!
//! Call it like this:
//!
//!     webserv -f conf/webserv.toml
//!
//! The config file is in the [TOML format][toml] because it’s commonly used in
//! the Rust ecosystem. Here is an example:
//!
//! ```toml
//! [listen]
//! host = "127.0.0.1"
//! port = [8080, 8081]
//!
//! [limits]
//! client_max_body_size = 1048576
//! idle_timeout = 30
//!
//! [cgi]
//! timeout = 5
//! failure_status = 502
//!
//! [error_pages]
//! 404 = "www/errors/404.html"
//!
//! [[route]]
//! path = "/"
//! root = "www"
//! methods = ["GET", "POST"]
//!
//! [[route]]
//! path = "/cgi-bin"
//! root = "www/cgi-bin"
//! methods = ["GET", "POST"]
//! cgi_extension = ".sh"
//! ```
//!
//! Any key left out takes its default. If a key is of the wrong type, the
//! server will bail, so don’t do that.
//!
//! Everything happens on one thread: sockets and CGI pipes are multiplexed
//! through a single poller, and a slow client or script never holds up
//! anyone else.
//!
//! [toml]: https://github.com/toml-lang/toml

#[macro_use] extern crate log;

mod cgi;
mod config;
mod errors;
mod filesystem;
mod http;
mod log_util;
mod server;
mod status;

use crate::config::parser::{self, parse_file};
use crate::server::Server;

use clap::{value_parser, Arg, Command};
use log::LevelFilter;

use std::env;
use std::path::PathBuf;
use std::process::exit;

fn main() {
    let mut log_builder = env_logger::Builder::new();
    log_builder.filter_level(LevelFilter::Info);

    if let Ok(var) = env::var("SERVER_LOG") {
        log_builder.parse_filters(&var);
    }

    if let Err(e) = log_builder.try_init() {
        eprintln!("webserv: Error when initializing logging: {}", e);
        exit(1);
    }

    let matches = Command::new("webserv")
        .version(env!("CARGO_PKG_VERSION"))
        .author("Alex Hill <alexander.d.hill.89@gmail.com>")
        .arg(Arg::new("config_file")
             .short('f')
             .value_name("FILE")
             .help("The TOML file with server configuration")
             .value_parser(value_parser!(PathBuf))
             .default_value("conf/webserv.toml"))
        .get_matches();

    let config_file = match matches.get_one::<PathBuf>("config_file") {
        Some(f) => f.clone(),
        None => PathBuf::from("conf/webserv.toml")
    };

    let config = match parse_file(&config_file) {
        Ok(c) => c,
        Err(parser::Error::Io(e)) => {
            error!("Error opening config file {:?}: {}", config_file, e);
            exit(1);
        },
        Err(parser::Error::Parse(e)) => {
            error!("Errors parsing config file {:?}", config_file);
            for error in e {
                error!("Config file error at line {} column {}: {}",
                       error.line, error.column, error.desc);
            }
            exit(1);
        },
        Err(parser::Error::Validation(message)) => {
            error!("Error in config file: {}", message);
            exit(1);
        }
    };

    let mut server = match Server::bind(config) {
        Ok(s) => s,
        Err(e) => {
            error!("Couldn't start listening: {:?}", e);
            exit(1);
        }
    };

    if let Err(e) = server.run() {
        error!("Server stopped: {:?}", e);
        exit(1);
    }
}
