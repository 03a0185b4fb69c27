//! Typed error taxonomy for the engine's public boundary.
//!
//! Parser and session internals keep using `anyhow::Result` with `.context(...)`, the way the
//! teacher crate does throughout `imap.rs` and `sync/mod.rs`; this module is only the boundary
//! where those short-circuits get folded into one of the five categories below.

use std::io;

use crate::types::{ResponseCode, Status};

/// The engine's public error type.
#[derive(Debug, thiserror::Error)]
pub enum Error {
  /// I/O failure reading from or writing to the transport. Fatal for the session.
  #[error("transport error: {0}")]
  Transport(#[from] io::Error),

  /// Unexpected byte, unknown response keyword, or malformed structure. Fatal.
  #[error("protocol error: {0}")]
  Protocol(String),

  /// A tagged completion with status NO or BAD. The session continues; only the
  /// originating caller sees this.
  #[error("{status} response{code} {text}", code = FormatCode(.code))]
  Imap {
    status: Status,
    code: Option<ResponseCode>,
    text: String,
  },

  /// The caller withdrew interest in a pending command. Forces teardown, since the
  /// stream cannot be safely resynchronized once a command has been written without a
  /// listener left for its reply.
  #[error("cancelled")]
  Cancelled,

  /// Invalid arguments that never reach the wire (CR/LF in quoted input, a negative
  /// literal length, ...).
  #[error("invalid argument: {0}")]
  Config(String),
}

impl Clone for Error {
  /// `io::Error` isn't `Clone`; reconstructed from its kind and message so a teardown error can
  /// be broadcast to every pending caller.
  fn clone(&self) -> Self {
    match self {
      Error::Transport(error) => Error::Transport(io::Error::new(error.kind(), error.to_string())),
      Error::Protocol(message) => Error::Protocol(message.clone()),
      Error::Imap { status, code, text } => Error::Imap {
        status: *status,
        code: code.clone(),
        text: text.clone(),
      },
      Error::Cancelled => Error::Cancelled,
      Error::Config(message) => Error::Config(message.clone()),
    }
  }
}

struct FormatCode<'a>(&'a Option<ResponseCode>);

impl std::fmt::Display for FormatCode<'_> {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    match self.0 {
      Some(code) => write!(f, " [{code:?}]"),
      None => Ok(()),
    }
  }
}

impl Error {
  pub fn protocol(message: impl Into<String>) -> Self {
    Error::Protocol(message.into())
  }

  pub fn config(message: impl Into<String>) -> Self {
    Error::Config(message.into())
  }
}

pub type Result<T> = std::result::Result<T, Error>;
