//! IRC to ICB protocol bridge.
//!
//! This crate accepts connections from IRC clients and translates them
//! into sessions against an upstream ICB server, so an ICB group looks
//! and feels like an IRC channel. Every accepted IRC connection gets a
//! dedicated upstream connection; there is no shared state between
//! sessions beyond the connection registry.
//!
//! # Architecture
//!
//! - [`irc`] decodes the CRLF line protocol spoken by IRC clients.
//! - [`icb::packet`] frames the length-tagged ICB wire format.
//! - [`icb::Client`] owns the upstream socket and keeps the observable
//!   group state (current group, flags, moderator, topic, membership)
//!   up to date as messages are read.
//! - [`icb::parsers`] reassembles multi-message ICB replies (status
//!   dumps, who listings, away notifications) into typed results.
//! - [`session`] drives one connection: it dispatches IRC commands to
//!   ICB, translates ICB events into IRC numerics and messages, and
//!   mirrors group state changes as IRC traffic.
//!
//! # Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use icbridge::{Config, session};
//!
//! let config = Arc::new(Config::from_path("icbridged.json".as_ref())?);
//! let registry = session::ConnectionRegistry::default();
//!
//! let listener = tokio::net::TcpListener::bind("0.0.0.0:6667").await?;
//! loop {
//!     let (stream, peer) = listener.accept().await?;
//!     tokio::spawn(session::run(stream, peer, config.clone(), registry.clone()));
//! }
//! ```

pub mod config;
pub mod error;
pub mod icb;
pub mod irc;
pub mod session;
pub mod util;
pub mod validate;

pub use config::Config;
pub use error::{Error, Result};

/// Name advertised in the welcome sequence.
pub const NAME: &str = "icbridged";

/// Version advertised in the welcome sequence.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
