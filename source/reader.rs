//! Buffered peek/read over the transport (§4.A).
//!
//! A hand-rolled, pull-based byte reader: unlike the teacher's `peg`-based `Stream`, which parses
//! whole pre-buffered chunks and needed a NOOP-boundary hack to tell "incomplete" from "failed",
//! this reader pulls bytes lazily and one token at a time, which is what the lexer above it
//! actually needs to support literals arriving over an arbitrary number of `read()` calls.

use std::io::{self, Read};

use crate::error::{Error, Result};

/// Renders control bytes visibly, the way the teacher's `imap.rs::escape()` does for wire traces.
pub fn escape(bytes: &[u8]) -> String {
  let mut string = String::new();
  for byte in bytes {
    string += &std::ascii::escape_default(*byte).to_string();
  }
  string
}

/// `escape()`, truncated to the first line plus an `...omitted...` marker, so a multi-megabyte
/// literal never ends up verbatim in the log.
pub fn summarize(bytes: &[u8]) -> String {
  let stop = bytes
    .windows(2)
    .position(|window| window == b"\r\n")
    .map(|position| position + 2)
    .unwrap_or(bytes.len());
  let mut string = escape(&bytes[..stop]);
  if stop < bytes.len() {
    string += "...omitted...";
  }
  string
}

/// Wraps a transport with a single-byte pushback and line-oriented reads. Every byte actually
/// pulled off the transport (not replayed from pushback) is appended to an internal log buffer
/// that callers drain at response-unit boundaries for wire-level tracing (§10.A).
pub struct ByteReader<R> {
  inner: R,
  pushback: Option<u8>,
  log: Vec<u8>,
}

fn eof() -> Error {
  Error::Transport(io::Error::new(io::ErrorKind::UnexpectedEof, "transport closed mid-response"))
}

impl<R: Read> ByteReader<R> {
  pub fn new(inner: R) -> Self {
    Self {
      inner,
      pushback: None,
      log: Vec::new(),
    }
  }

  /// Drains the bytes read off the transport since the last drain.
  pub fn take_log(&mut self) -> Vec<u8> {
    std::mem::take(&mut self.log)
  }

  /// Reads a single byte, consuming a previously unread one first.
  pub fn read_byte(&mut self) -> Result<u8> {
    if let Some(byte) = self.pushback.take() {
      return Ok(byte);
    }
    let mut buffer = [0u8; 1];
    match self.inner.read(&mut buffer) {
      Ok(0) => Err(eof()),
      Ok(_) => {
        self.log.push(buffer[0]);
        Ok(buffer[0])
      }
      Err(error) => Err(Error::Transport(error)),
    }
  }

  /// Pushes a byte back so the next `read_byte` returns it. At most one byte may be held back
  /// at a time; calling this twice without an intervening read is a logic error.
  pub fn unread_byte(&mut self, byte: u8) {
    debug_assert!(self.pushback.is_none(), "at most one byte of pushback");
    self.pushback = Some(byte);
  }

  /// Reads bytes up to and including `delimiter`. The delimiter is part of the returned buffer.
  pub fn read_string_until(&mut self, delimiter: u8) -> Result<Vec<u8>> {
    let mut out = Vec::new();
    loop {
      let byte = self.read_byte()?;
      out.push(byte);
      if byte == delimiter {
        return Ok(out);
      }
    }
  }

  /// Consumes and discards the trailing line terminator: CRLF canonically, a bare LF tolerated.
  pub fn read_to_eol(&mut self) -> Result<()> {
    loop {
      let byte = self.read_byte()?;
      if byte == b'\n' {
        return Ok(());
      }
      if byte == b'\r' {
        let next = self.read_byte()?;
        if next != b'\n' {
          self.unread_byte(next);
        }
        return Ok(());
      }
    }
  }

  /// Reads exactly `n` raw bytes (the payload of a literal). 8-bit clean.
  pub fn read_exact(&mut self, n: usize) -> Result<Vec<u8>> {
    let mut out = Vec::with_capacity(n);
    for _ in 0..n {
      out.push(self.read_byte()?);
    }
    Ok(out)
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use std::io::Cursor;

  #[test]
  fn read_byte_and_pushback() {
    let mut reader = ByteReader::new(Cursor::new(b"ab".to_vec()));
    assert_eq!(b'a', reader.read_byte().unwrap());
    let b = reader.read_byte().unwrap();
    assert_eq!(b'b', b);
    reader.unread_byte(b);
    assert_eq!(b'b', reader.read_byte().unwrap());
    assert!(reader.read_byte().is_err());
  }

  #[test]
  fn read_string_until_is_inclusive() {
    let mut reader = ByteReader::new(Cursor::new(b"abc def".to_vec()));
    assert_eq!(b"abc ".to_vec(), reader.read_string_until(b' ').unwrap());
    assert_eq!(b"def".to_vec(), reader.read_string_until(b'f').unwrap());
  }

  #[test]
  fn read_to_eol_consumes_crlf() {
    let mut reader = ByteReader::new(Cursor::new(b"hi\r\nrest".to_vec()));
    assert_eq!(b"hi".to_vec(), reader.read_string_until(b'i').unwrap());
    reader.read_to_eol().unwrap();
    assert_eq!(b'r', reader.read_byte().unwrap());
  }

  #[test]
  fn read_to_eol_tolerates_bare_lf() {
    let mut reader = ByteReader::new(Cursor::new(b"hi\nrest".to_vec()));
    reader.read_byte().unwrap();
    reader.read_byte().unwrap();
    reader.read_to_eol().unwrap();
    assert_eq!(b'r', reader.read_byte().unwrap());
  }

  #[test]
  fn read_exact_is_8bit_clean() {
    let payload = vec![0u8, b'\r', b'\n', 0xffu8, b'a'];
    let mut bytes = payload.clone();
    bytes.extend_from_slice(b"\r\n");
    let mut reader = ByteReader::new(Cursor::new(bytes));
    assert_eq!(payload, reader.read_exact(payload.len()).unwrap());
    reader.read_to_eol().unwrap();
  }

  #[test]
  fn eof_mid_response_is_transport_error() {
    let mut reader = ByteReader::new(Cursor::new(b"a".to_vec()));
    reader.read_byte().unwrap();
    assert!(matches!(reader.read_byte(), Err(Error::Transport(_))));
  }

  #[test]
  fn take_log_drains_bytes_actually_read_from_the_transport() {
    let mut reader = ByteReader::new(Cursor::new(b"ab".to_vec()));
    let b = reader.read_byte().unwrap();
    reader.unread_byte(b);
    reader.read_byte().unwrap();
    reader.read_byte().unwrap();
    // The unread/re-read byte is only counted once: it was never re-pulled from the transport.
    assert_eq!(b"ab".to_vec(), reader.take_log());
    assert!(reader.take_log().is_empty());
  }

  #[test]
  fn escape_renders_control_bytes_visibly() {
    assert_eq!(r"a\r\nb", escape(b"a\r\nb"));
  }

  #[test]
  fn summarize_passes_through_a_short_line() {
    assert_eq!(r"a0 OK done\r\n", summarize(b"a0 OK done\r\n"));
  }

  #[test]
  fn summarize_truncates_after_the_first_line() {
    let bytes = b"a0 OK done\r\nmore garbage that should never appear";
    assert_eq!(r"a0 OK done\r\n...omitted...", summarize(bytes));
  }
}
