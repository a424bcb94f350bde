//! Self-healing client for a line-based chat service.
//!
//! The service exposes two TCP ports: one broadcasts every chat line, the
//! other accepts a token (or registers a new account) and then takes user
//! messages. This crate keeps both connections alive and reconnects when
//! either goes quiet or breaks. Each module focuses on one responsibility:
//!
//! - [`transport`] opens TCP connections that close on every exit path.
//! - [`protocol`] provides the newline framing, escaping and JSON replies.
//! - [`auth`] runs the token / registration handshake.
//! - [`liveness`] carries activity events and the watchdog consuming them.
//! - [`relay`] holds the reader, sender and keepalive loops.
//! - [`supervisor`] drives the reconnect state machine and publishes status.
//! - [`history`] appends received messages to a timestamped log.
//! - [`config`] and [`cli`] describe the runtime configuration.
//! - [`console`] and [`client`] wire everything to a terminal.
//!
//! Integration tests run the supervisor against a scripted in-process server.

pub mod auth;
pub mod cli;
pub mod client;
pub mod config;
pub mod console;
pub mod error;
pub mod history;
pub mod liveness;
pub mod protocol;
pub mod relay;
pub mod supervisor;
pub mod transport;

pub use error::{ChatError, ConnectionError};
