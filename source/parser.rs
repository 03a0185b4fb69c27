//! Per-response-type decoding into structured values (§4.D).
//!
//! Entry point reads one response unit: a tag (`*`, `+`, or `aN`) followed by the body, and
//! dispatches on the leading atom the way the teacher's `sync/mod.rs` classify-loop does
//! (`match stream.expect(parser::start)? { b"*" => ..., tag => ... }`), except the dispatch
//! itself lives here rather than at each call site.

use std::io::Read;

use crate::error::{Error, Result};
use crate::lexer::{Lexer, StringToken};
use crate::sexp::{read_sexp, Sexp};
use crate::tag;
use crate::types::{
  Address, Envelope, FetchResponse, FetchValue, ListEntry, ListFlags, Response, ResponseCode,
  Status, StatusLine, TaggedCompletion, Untagged,
};

/// Reads raw bytes up to (not including) the line terminator, consuming the terminator.
fn read_rest_of_line<R: Read>(lexer: &mut Lexer<R>) -> Result<String> {
  let mut out = Vec::new();
  loop {
    let byte = lexer.reader_mut().read_byte()?;
    if byte == b'\n' {
      break;
    }
    if byte == b'\r' {
      let next = lexer.reader_mut().read_byte()?;
      if next != b'\n' {
        lexer.reader_mut().unread_byte(next);
      }
      break;
    }
    out.push(byte);
  }
  Ok(String::from_utf8_lossy(&out).into_owned())
}

fn read_until_one_of<R: Read>(lexer: &mut Lexer<R>, terminators: &[u8]) -> Result<String> {
  let mut out = Vec::new();
  loop {
    let byte = lexer.reader_mut().read_byte()?;
    if terminators.contains(&byte) {
      lexer.reader_mut().unread_byte(byte);
      break;
    }
    out.push(byte);
  }
  Ok(String::from_utf8_lossy(&out).into_owned())
}

/// Reads one full response unit off the wire, tracing the raw bytes consumed at `trace` level
/// (§10.A), the way the teacher's `Stream::inner_parse` logs the span a successful parse
/// consumed.
pub fn read_response<R: Read>(lexer: &mut Lexer<R>) -> Result<Response> {
  let result = read_response_inner(lexer);
  let consumed = lexer.reader_mut().take_log();
  match &result {
    Ok(_) => log::trace!("< {}", crate::reader::summarize(&consumed)),
    Err(error) => log::trace!("<< {error} {}", crate::reader::summarize(&consumed)),
  }
  result
}

fn read_response_inner<R: Read>(lexer: &mut Lexer<R>) -> Result<Response> {
  match lexer.peek_byte()? {
    b'*' => {
      lexer.reader_mut().read_byte()?;
      lexer.expect_sp()?;
      Ok(Response::Untagged(parse_untagged(lexer)?))
    }
    b'+' => {
      lexer.reader_mut().read_byte()?;
      if lexer.peek_byte()? == b' ' {
        lexer.reader_mut().read_byte()?;
      }
      Ok(Response::Continuation(read_rest_of_line(lexer)?))
    }
    _ => {
      let tag_atom = lexer.read_atom()?;
      let tag = tag::parse(&tag_atom)
        .ok_or_else(|| Error::protocol(format!("unexpected tag {tag_atom:?}")))?;
      lexer.expect_sp()?;
      let status_atom = lexer.read_atom()?;
      let status = parse_status_keyword(&status_atom)?;
      let (code, text) = parse_status_tail(lexer)?;
      Ok(Response::Tagged {
        tag,
        completion: TaggedCompletion {
          status,
          code,
          text,
          extras: Vec::new(),
        },
      })
    }
  }
}

fn parse_status_keyword(atom: &str) -> Result<Status> {
  match atom {
    "OK" => Ok(Status::Ok),
    "NO" => Ok(Status::No),
    "BAD" => Ok(Status::Bad),
    other => Err(Error::protocol(format!("unexpected status {other:?}"))),
  }
}

/// After `*` and the leading atom: dispatch to the matching sub-parser, or treat the atom as a
/// sequence number for `EXISTS`/`RECENT`/`EXPUNGE`/`FETCH`.
fn parse_untagged<R: Read>(lexer: &mut Lexer<R>) -> Result<Untagged> {
  let leading = lexer.read_atom()?;
  match leading.as_str() {
    "CAPABILITY" => parse_capability(lexer),
    "LIST" => parse_list(lexer),
    "FLAGS" => {
      lexer.expect_sp()?;
      let flags = lexer.read_string_list()?;
      lexer.expect_eol()?;
      Ok(Untagged::Flags(flags))
    }
    "OK" | "NO" | "BAD" => {
      let status = parse_status_keyword(&leading)?;
      let (code, text) = parse_status_tail(lexer)?;
      Ok(Untagged::Status(StatusLine { status, code, text }))
    }
    _ => {
      let seq = crate::lexer::parse_number(&leading)
        .map_err(|_| Error::protocol(format!("unhandled untagged response: {leading:?}")))?;
      lexer.expect_sp()?;
      let keyword = lexer.read_atom()?;
      match keyword.as_str() {
        "EXISTS" => {
          lexer.expect_eol()?;
          Ok(Untagged::Exists(seq))
        }
        "RECENT" => {
          lexer.expect_eol()?;
          Ok(Untagged::Recent(seq))
        }
        "EXPUNGE" => {
          lexer.expect_eol()?;
          Ok(Untagged::Expunge(seq))
        }
        "FETCH" => parse_fetch(lexer, seq),
        other => Err(Error::protocol(format!(
          "unhandled numeric-prefixed response: {other:?}"
        ))),
      }
    }
  }
}

fn parse_capability<R: Read>(lexer: &mut Lexer<R>) -> Result<Untagged> {
  let mut caps = Vec::new();
  loop {
    if lexer.peek_byte()? == b'\r' {
      break;
    }
    lexer.expect_sp()?;
    let atom = lexer.read_atom()?;
    if atom.is_empty() {
      break;
    }
    caps.push(atom);
  }
  lexer.expect_eol()?;
  Ok(Untagged::Capability(caps))
}

/// Peeks for a bracketed response code; if present, switches on it, otherwise leaves the byte
/// for the free-text read that follows.
fn parse_status_tail<R: Read>(lexer: &mut Lexer<R>) -> Result<(Option<ResponseCode>, String)> {
  lexer.expect_sp()?;
  let code = if lexer.peek_byte()? == b'[' {
    lexer.reader_mut().read_byte()?;
    let atom = read_until_one_of(lexer, &[b' ', b']'])?;
    Some(match atom.as_str() {
      "PERMANENTFLAGS" => {
        lexer.expect_sp()?;
        let flags = lexer.read_string_list()?;
        lexer.expect(b"] ")?;
        ResponseCode::PermanentFlags(flags)
      }
      "UIDVALIDITY" => {
        lexer.expect_sp()?;
        let n = lexer.read_number()?;
        lexer.expect(b"] ")?;
        ResponseCode::UidValidity(n)
      }
      "UIDNEXT" => {
        lexer.expect_sp()?;
        let n = lexer.read_number()?;
        lexer.expect(b"] ")?;
        ResponseCode::UidNext(n)
      }
      _ => {
        let remainder = read_until_one_of(lexer, &[b']'])?;
        lexer.expect_byte(b']')?;
        if lexer.peek_byte()? == b' ' {
          lexer.reader_mut().read_byte()?;
        }
        let text = remainder.trim().to_string();
        ResponseCode::Other(atom, if text.is_empty() { None } else { Some(text) })
      }
    })
  } else {
    None
  };
  let text = read_rest_of_line(lexer)?;
  Ok((code, text))
}

/// `(flags) SP delimiter SP mailbox`, EOL. Unrecognized flags land in `other` rather than
/// failing the parse.
fn parse_list<R: Read>(lexer: &mut Lexer<R>) -> Result<Untagged> {
  lexer.expect_sp()?;
  let atoms = lexer.read_string_list()?;
  let mut flags = ListFlags::default();
  for atom in atoms {
    match atom.as_str() {
      "\\Noinferiors" => flags.noinferiors = Some(true),
      "\\Noselect" => flags.noselect = Some(true),
      "\\Marked" => flags.marked = Some(true),
      "\\Unmarked" => flags.marked = Some(false),
      "\\HasChildren" => flags.has_children = Some(true),
      "\\HasNoChildren" => flags.has_children = Some(false),
      other => flags.other.push(other.to_string()),
    }
  }
  lexer.expect_sp()?;
  let delimiter = match lexer.read_nstring()? {
    None => None,
    Some(token) => {
      let text = token.as_text();
      let mut chars = text.chars();
      let first = chars
        .next()
        .ok_or_else(|| Error::protocol("empty LIST delimiter"))?;
      if chars.next().is_some() {
        return Err(Error::protocol("LIST delimiter is not a single character"));
      }
      Some(first)
    }
  };
  lexer.expect_sp()?;
  let name = lexer.read_string_token()?.as_text();
  lexer.expect_eol()?;
  Ok(Untagged::List(ListEntry {
    delimiter,
    name,
    flags,
  }))
}

fn parse_fetch<R: Read>(lexer: &mut Lexer<R>, seq: u64) -> Result<Untagged> {
  lexer.expect_sp()?;
  lexer.expect_byte(b'(')?;
  let mut items = Vec::new();
  loop {
    if lexer.peek_byte()? == b')' {
      lexer.reader_mut().read_byte()?;
      break;
    }
    if !items.is_empty() {
      lexer.expect_sp()?;
    }
    items.push(read_fetch_pair(lexer)?);
  }
  lexer.expect_eol()?;
  Ok(Untagged::Fetch(FetchResponse { seq, items }))
}

/// `BODY`/`BODY.PEEK` keys carry a bracketed section specifier the generic atom grammar can't
/// tokenize (`[` is an atom terminator everywhere else); this is the one key read specially
/// rather than through the uniform S-expression walk the other keys use.
fn read_fetch_pair<R: Read>(lexer: &mut Lexer<R>) -> Result<(String, FetchValue)> {
  let key = lexer.read_atom()?;
  if key == "BODY" || key == "BODY.PEEK" {
    return read_body_pair(lexer, key);
  }

  lexer.expect_sp()?;
  let value = match key.as_str() {
    "ENVELOPE" => FetchValue::Envelope(decode_envelope(&read_sexp(lexer)?)?),
    "FLAGS" => FetchValue::Flags(read_sexp(lexer)?),
    "INTERNALDATE" => FetchValue::InternalDate(lexer.read_string_token()?.as_text()),
    "RFC822" => FetchValue::Rfc822(literal_bytes(lexer.read_string_token()?)),
    "RFC822.HEADER" => FetchValue::Rfc822Header(literal_bytes(lexer.read_string_token()?)),
    "RFC822.SIZE" => FetchValue::Rfc822Size(lexer.read_number()?),
    "UID" => FetchValue::Uid(lexer.read_number()?),
    _ => FetchValue::Other(read_sexp(lexer)?),
  };
  Ok((key, value))
}

fn literal_bytes(token: StringToken) -> Vec<u8> {
  match token {
    StringToken::Literal(bytes) => bytes,
    StringToken::Atom(s) | StringToken::Quoted(s) => s.into_bytes(),
  }
}

fn read_body_pair<R: Read>(lexer: &mut Lexer<R>, key: String) -> Result<(String, FetchValue)> {
  let mut full_key = key;
  let mut section = String::new();
  if lexer.peek_byte()? == b'[' {
    lexer.reader_mut().read_byte()?;
    full_key.push('[');
    let mut depth = 1i32;
    loop {
      let byte = lexer.reader_mut().read_byte()?;
      match byte {
        b'[' => depth += 1,
        b']' => {
          depth -= 1;
          if depth == 0 {
            break;
          }
        }
        _ => {}
      }
      section.push(byte as char);
    }
    full_key.push_str(&section);
    full_key.push(']');
  }
  if lexer.peek_byte()? == b'<' {
    lexer.reader_mut().read_byte()?;
    full_key.push('<');
    loop {
      let byte = lexer.reader_mut().read_byte()?;
      full_key.push(byte as char);
      if byte == b'>' {
        break;
      }
    }
  }
  lexer.expect_sp()?;
  let data = lexer.read_nstring()?.map(literal_bytes);
  Ok((full_key, FetchValue::Body { section, data }))
}

fn opt_str(sexp: &Sexp) -> Option<String> {
  match sexp {
    Sexp::Nil => None,
    other => other.as_str().map(|s| s.to_string()),
  }
}

fn decode_address(sexp: &Sexp) -> Result<Address> {
  let items = sexp
    .as_list()
    .ok_or_else(|| Error::protocol("address is not a list"))?;
  if items.len() != 4 {
    return Err(Error::protocol(format!(
      "address must have 4 fields, got {}",
      items.len()
    )));
  }
  Ok(Address {
    name: opt_str(&items[0]),
    adl: opt_str(&items[1]),
    mailbox: opt_str(&items[2]),
    host: opt_str(&items[3]),
  })
}

fn decode_address_list(sexp: &Sexp) -> Result<Option<Vec<Address>>> {
  match sexp {
    Sexp::Nil => Ok(None),
    Sexp::List(addrs) => addrs.iter().map(decode_address).collect::<Result<_>>().map(Some),
    _ => Err(Error::protocol("address list is not NIL or a list")),
  }
}

fn decode_envelope(sexp: &Sexp) -> Result<Envelope> {
  let items = sexp
    .as_list()
    .ok_or_else(|| Error::protocol("ENVELOPE is not a list"))?;
  if items.len() != 10 {
    return Err(Error::protocol(format!(
      "ENVELOPE must have 10 fields, got {}",
      items.len()
    )));
  }
  Ok(Envelope {
    date: opt_str(&items[0]),
    subject: opt_str(&items[1]),
    from: decode_address_list(&items[2])?,
    sender: decode_address_list(&items[3])?,
    reply_to: decode_address_list(&items[4])?,
    to: decode_address_list(&items[5])?,
    cc: decode_address_list(&items[6])?,
    bcc: decode_address_list(&items[7])?,
    in_reply_to: opt_str(&items[8]),
    message_id: opt_str(&items[9]),
  })
}
