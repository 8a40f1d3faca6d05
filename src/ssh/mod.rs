//! SSH module - SFTP sessions over russh
//!
//! Implements the transport traits for real servers:
//! - Password and private-key authentication
//! - Keepalive every 30s, disconnect after 3 missed replies
//! - One SFTP subsystem channel per SSH connection

mod client;
mod error;
mod session;

pub use client::{ClientHandler, RusshConnector};
pub use error::SshError;
pub use session::RusshSession;
