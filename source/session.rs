//! `Connect`, `Send`/`SendSync`, and the thin typed wrappers (§4.G).
//!
//! Credential handling (the password-command argv, `zeroize` scrubbing) stays in the demo
//! binary's configuration layer per §10.C — this module only takes an already-resolved
//! user/password pair, the way the teacher's `sync::authenticate` takes an already-resolved
//! `Credentials` rather than touching `process::Command` itself.

use std::io::{Read, Write};
use std::sync::mpsc;
use std::time::Duration;

use crate::correlator::{self, Correlator, Unsolicited};
use crate::error::{Error, Result};
use crate::tag::Tag;
use crate::transport::{self, Transport};
use crate::types::{FetchResponse, ListEntry, ResponseCode, Status, StatusLine, TaggedCompletion, Untagged};
use crate::utf7;

pub type BoxRead = Box<dyn Read + Send>;
pub type BoxWrite = Box<dyn Write + Send>;

/// The one piece of configuration in scope for this engine: where to connect and how.
#[derive(Debug, Clone)]
pub struct ConnectOptions {
  pub address: String,
  pub port: u16,
  pub tls: bool,
  pub timeout: Option<Duration>,
}

fn open_transport(options: &ConnectOptions) -> anyhow::Result<(BoxRead, BoxWrite)> {
  if options.tls {
    let stream = transport::connect_tls(&options.address, options.port, options.timeout)?;
    let (reader, writer) = stream.split();
    Ok((Box::new(reader), Box::new(writer)))
  } else {
    let stream = transport::connect_tcp(&options.address, options.port, options.timeout)?;
    let (reader, writer) = stream.split();
    Ok((Box::new(reader), Box::new(writer)))
  }
}

/// A live IMAP session: the correlated command stream plus the unsolicited sink.
pub struct Session {
  correlator: Correlator<BoxWrite>,
  unsolicited_rx: mpsc::Receiver<Unsolicited>,
}

/// Rejects CR/LF, then wraps in a quoted string, escaping `\` and `"`.
fn quote(value: &str) -> Result<String> {
  if value.contains('\r') || value.contains('\n') {
    return Err(Error::config("CR/LF is not allowed in a quoted argument"));
  }
  let escaped = value.replace('\\', "\\\\").replace('"', "\\\"");
  Ok(format!("\"{escaped}\""))
}

fn quote_mailbox(name: &str) -> Result<String> {
  quote(&utf7::encode(name))
}

/// `FLAGS`/`EXISTS`/`RECENT`/`UIDVALIDITY`/`UIDNEXT` pulled out of an `EXAMINE` completion's
/// grouped extras, alongside the completion itself.
#[derive(Debug, Clone)]
pub struct ExamineResult {
  pub flags: Vec<String>,
  pub exists: Option<u64>,
  pub recent: Option<u64>,
  pub uid_validity: Option<u64>,
  pub uid_next: Option<u64>,
  pub completion: TaggedCompletion,
}

/// `LIST` entries split out of a completion's grouped extras from anything else that arrived
/// alongside them.
#[derive(Debug, Clone)]
pub struct ListResult {
  pub entries: Vec<ListEntry>,
  pub other: Vec<Untagged>,
  pub completion: TaggedCompletion,
}

impl Session {
  /// Establishes the transport, reads the greeting, and starts the reader loop.
  pub fn connect(options: &ConnectOptions) -> Result<(Session, String)> {
    let (read_half, write_half) =
      open_transport(options).map_err(|error| Error::protocol(error.to_string()))?;
    let (correlator, unsolicited_rx) = correlator::spawn(read_half, write_half);
    let greeting = match unsolicited_rx.recv() {
      Ok(Unsolicited::Response(Untagged::Status(StatusLine {
        status: Status::Ok,
        text,
        ..
      }))) => text,
      Ok(other) => return Err(Error::protocol(format!("unexpected greeting: {other:?}"))),
      Err(_) => return Err(Error::protocol("connection closed before greeting")),
    };
    log::debug!("connected, greeting: {greeting:?}");
    Ok((Session { correlator, unsolicited_rx }, greeting))
  }

  /// The sink of untagged responses and continuations that arrived with no pending command.
  pub fn unsolicited(&self) -> &mpsc::Receiver<Unsolicited> {
    &self.unsolicited_rx
  }

  /// Fire-and-forget: writes the command, returns its tag without waiting for completion.
  pub fn send(&self, command_text: &str) -> Result<Tag> {
    self.correlator.send(command_text)
  }

  /// Writes the command and blocks for its tagged completion.
  pub fn send_sync(&self, command_text: &str) -> Result<TaggedCompletion> {
    self.correlator.send_sync(command_text)
  }

  pub fn send_sync_timeout(&self, command_text: &str, timeout: Duration) -> Result<TaggedCompletion> {
    self.correlator.send_sync_timeout(command_text, timeout)
  }

  pub fn auth(&self, user: &str, password: &str) -> Result<TaggedCompletion> {
    self.send_sync(&format!("LOGIN {} {}", quote(user)?, quote(password)?))
  }

  pub fn list(&self, reference: &str, name: &str) -> Result<ListResult> {
    let completion = self.send_sync(&format!(
      "LIST {} {}",
      quote_mailbox(reference)?,
      quote_mailbox(name)?
    ))?;
    let mut entries = Vec::new();
    let mut other = Vec::new();
    for extra in completion.extras.clone() {
      match extra {
        Untagged::List(entry) => entries.push(entry),
        other_extra => other.push(other_extra),
      }
    }
    Ok(ListResult { entries, other, completion })
  }

  pub fn examine(&self, mailbox: &str) -> Result<ExamineResult> {
    let completion = self.send_sync(&format!("EXAMINE {}", quote_mailbox(mailbox)?))?;
    let mut flags = Vec::new();
    let mut exists = None;
    let mut recent = None;
    let mut uid_validity = None;
    let mut uid_next = None;
    for extra in &completion.extras {
      match extra {
        Untagged::Flags(values) => flags = values.clone(),
        Untagged::Exists(n) => exists = Some(*n),
        Untagged::Recent(n) => recent = Some(*n),
        Untagged::Status(StatusLine {
          code: Some(ResponseCode::UidValidity(n)),
          ..
        }) => uid_validity = Some(*n),
        Untagged::Status(StatusLine {
          code: Some(ResponseCode::UidNext(n)),
          ..
        }) => uid_next = Some(*n),
        _ => {}
      }
    }
    Ok(ExamineResult {
      flags,
      exists,
      recent,
      uid_validity,
      uid_next,
      completion,
    })
  }

  pub fn fetch(&self, sequence: &str, fields: &str) -> Result<(Vec<FetchResponse>, TaggedCompletion)> {
    let completion = self.send_sync(&format!("FETCH {sequence} {fields}"))?;
    let fetches = completion
      .extras
      .iter()
      .filter_map(|extra| match extra {
        Untagged::Fetch(fetch) => Some(fetch.clone()),
        _ => None,
      })
      .collect();
    Ok((fetches, completion))
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn quote_rejects_cr_lf() {
    assert!(quote("a\r\nb").is_err());
    assert!(quote("plain").is_ok());
  }

  #[test]
  fn quote_escapes_backslash_and_quote() {
    assert_eq!(r#""a\\b\"c""#, quote(r#"a\b"c"#).unwrap());
  }
}
