//! Tokens: atom, quoted string, literal `{n}`, paren-lists, numbers, EOL (§4.B).
//!
//! Grounded in the shape of the teacher's `peg::parser!` grammar in `imap.rs` (one function per
//! BNF production, each preceded by the RFC citation it implements) but hand-rolled against the
//! byte reader instead of a slice-combinator, since the lexer has to survive a literal arriving
//! over several transport reads.

use crate::error::{Error, Result};
use crate::reader::ByteReader;
use std::io::Read;

/// An atom is terminated by one of these without consuming it.
fn is_atom_terminator(byte: u8) -> bool {
  matches!(byte, b' ' | b'\r' | b'(' | b')' | b'[')
}

/// A string-valued token: atom, quoted string, or literal. The three forms IMAP uses wherever an
/// `astring` is expected (mailbox names, flags, tags inside response codes, ...).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StringToken {
  Atom(String),
  Quoted(String),
  Literal(Vec<u8>),
}

impl StringToken {
  /// Lossy text view, for callers that don't care whether a literal carried binary.
  pub fn as_text(&self) -> String {
    match self {
      StringToken::Atom(s) | StringToken::Quoted(s) => s.clone(),
      StringToken::Literal(bytes) => String::from_utf8_lossy(bytes).into_owned(),
    }
  }
}

pub struct Lexer<R> {
  reader: ByteReader<R>,
}

impl<R: Read> Lexer<R> {
  pub fn new(inner: R) -> Self {
    Self {
      reader: ByteReader::new(inner),
    }
  }

  pub fn reader_mut(&mut self) -> &mut ByteReader<R> {
    &mut self.reader
  }

  pub fn peek_byte(&mut self) -> Result<u8> {
    let byte = self.reader.read_byte()?;
    self.reader.unread_byte(byte);
    Ok(byte)
  }

  /// Consumes `byte` exactly, failing otherwise.
  pub fn expect_byte(&mut self, byte: u8) -> Result<()> {
    let got = self.reader.read_byte()?;
    if got != byte {
      return Err(Error::protocol(format!(
        "expected {byte:?}, got {got:?}"
      )));
    }
    Ok(())
  }

  /// Consumes an exact byte sequence.
  pub fn expect(&mut self, literal: &[u8]) -> Result<()> {
    for &byte in literal {
      self.expect_byte(byte)?;
    }
    Ok(())
  }

  pub fn expect_sp(&mut self) -> Result<()> {
    self.expect_byte(b' ')
  }

  /// Consumes the trailing CRLF (or bare LF, tolerated by the byte reader).
  pub fn expect_eol(&mut self) -> Result<()> {
    self.reader.read_to_eol()
  }

  /// A run of printable non-whitespace, non-special characters. An immediate terminator yields
  /// an empty atom, which callers use as an end-of-list signal (e.g. CAPABILITY's trailing atom).
  pub fn read_atom(&mut self) -> Result<String> {
    let mut out = Vec::new();
    loop {
      let byte = self.reader.read_byte()?;
      if is_atom_terminator(byte) {
        self.reader.unread_byte(byte);
        break;
      }
      out.push(byte);
    }
    String::from_utf8(out).map_err(|error| Error::protocol(format!("non-UTF-8 atom: {error}")))
  }

  /// Expects and consumes a leading `"`, then reads up to the unescaped closing `"`.
  /// `\\` and `\"` are recognized escapes; no CR/LF is allowed inside.
  pub fn read_quoted(&mut self) -> Result<String> {
    self.expect_byte(b'"')?;
    let mut out = Vec::new();
    loop {
      let byte = self.reader.read_byte()?;
      match byte {
        b'"' => break,
        b'\r' | b'\n' => {
          return Err(Error::protocol("CR/LF inside quoted string"));
        }
        b'\\' => {
          let escaped = self.reader.read_byte()?;
          match escaped {
            b'\\' | b'"' => out.push(escaped),
            other => return Err(Error::protocol(format!("invalid escape \\{}", other as char))),
          }
        }
        other => out.push(other),
      }
    }
    String::from_utf8(out).map_err(|error| Error::protocol(format!("non-UTF-8 quoted string: {error}")))
  }

  /// Expects and consumes a leading `{`, reads the decimal length, `}`, CRLF, then exactly that
  /// many raw bytes.
  pub fn read_literal(&mut self) -> Result<Vec<u8>> {
    self.expect_byte(b'{')?;
    let mut digits = Vec::new();
    loop {
      let byte = self.reader.read_byte()?;
      if byte == b'}' {
        break;
      }
      if !byte.is_ascii_digit() {
        return Err(Error::protocol("non-digit in literal length"));
      }
      digits.push(byte);
    }
    let text = String::from_utf8(digits).expect("ASCII digits");
    let n: usize = text
      .parse()
      .map_err(|_| Error::protocol(format!("invalid literal length {text:?}")))?;
    self.expect_eol()?;
    self.reader.read_exact(n)
  }

  /// Dispatches on the next byte to read an atom, quoted string, or literal.
  pub fn read_string_token(&mut self) -> Result<StringToken> {
    match self.peek_byte()? {
      b'"' => Ok(StringToken::Quoted(self.read_quoted()?)),
      b'{' => Ok(StringToken::Literal(self.read_literal()?)),
      _ => Ok(StringToken::Atom(self.read_atom()?)),
    }
  }

  /// `NIL`, or a string token. The central "nstring" concept: NIL is absence, never `""`.
  pub fn read_nstring(&mut self) -> Result<Option<StringToken>> {
    if self.peek_byte()? == b'N' {
      // Only NIL starts with 'N' among the tokens this grammar expects here.
      self.expect(b"NIL")?;
      return Ok(None);
    }
    Ok(Some(self.read_string_token()?))
  }

  /// `(` followed by zero or more atoms/quoted strings separated by SP, followed by `)`.
  pub fn read_string_list(&mut self) -> Result<Vec<String>> {
    self.expect_byte(b'(')?;
    let mut out = Vec::new();
    loop {
      if self.peek_byte()? == b')' {
        self.expect_byte(b')')?;
        return Ok(out);
      }
      if !out.is_empty() {
        self.expect_sp()?;
      }
      match self.read_string_token()? {
        StringToken::Atom(s) | StringToken::Quoted(s) => out.push(s),
        StringToken::Literal(bytes) => out.push(String::from_utf8_lossy(&bytes).into_owned()),
      }
    }
  }

  /// A token that parses as a nonnegative decimal integer.
  pub fn read_number(&mut self) -> Result<u64> {
    let atom = self.read_atom()?;
    parse_number(&atom)
  }
}

pub fn parse_number(text: &str) -> Result<u64> {
  if text.is_empty() || !text.bytes().all(|b| b.is_ascii_digit()) {
    return Err(Error::protocol(format!("not a number: {text:?}")));
  }
  text
    .parse()
    .map_err(|_| Error::protocol(format!("number out of range: {text:?}")))
}
