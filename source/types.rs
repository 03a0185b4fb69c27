//! The response data model (§3): status, response codes, list entries, envelopes, fetch items.

use crate::sexp::Sexp;
use crate::tag::Tag;

/// A three-valued domain: the only statuses a tagged completion or a status response can carry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
  Ok,
  No,
  Bad,
}

impl std::fmt::Display for Status {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.write_str(match self {
      Status::Ok => "OK",
      Status::No => "NO",
      Status::Bad => "BAD",
    })
  }
}

/// The bracketed `[...]` token inside an OK/NO/BAD text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResponseCode {
  PermanentFlags(Vec<String>),
  UidValidity(u64),
  UidNext(u64),
  /// Any other code: the atom and, if present, the free text that followed it up to `]`.
  Other(String, Option<String>),
}

/// `OK`/`NO`/`BAD` as it appears standalone, untagged (e.g. `* OK [UIDVALIDITY 1] ...`).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusLine {
  pub status: Status,
  pub code: Option<ResponseCode>,
  pub text: String,
}

/// A tagged completion: the terminal line of a command, with every untagged response that
/// arrived while the command was pending attached as `extras`, in arrival order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaggedCompletion {
  pub status: Status,
  pub code: Option<ResponseCode>,
  pub text: String,
  pub extras: Vec<Untagged>,
}

/// Tri-state LIST attribute flags, plus unrecognized ones carried in `other` rather than
/// failing the parse — see the redesign in the design notes.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ListFlags {
  pub noinferiors: Option<bool>,
  pub noselect: Option<bool>,
  pub marked: Option<bool>,
  pub has_children: Option<bool>,
  pub other: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListEntry {
  pub delimiter: Option<char>,
  pub name: String,
  pub flags: ListFlags,
}

/// A four-field address tuple per RFC 3501's ENVELOPE grammar.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Address {
  pub name: Option<String>,
  pub adl: Option<String>,
  pub mailbox: Option<String>,
  pub host: Option<String>,
}

impl Address {
  /// `mailbox@host`, when both halves are present.
  pub fn address(&self) -> Option<String> {
    match (&self.mailbox, &self.host) {
      (Some(mailbox), Some(host)) => Some(format!("{mailbox}@{host}")),
      _ => None,
    }
  }
}

/// The ten-field ENVELOPE tuple.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Envelope {
  pub date: Option<String>,
  pub subject: Option<String>,
  pub from: Option<Vec<Address>>,
  pub sender: Option<Vec<Address>>,
  pub reply_to: Option<Vec<Address>>,
  pub to: Option<Vec<Address>>,
  pub cc: Option<Vec<Address>>,
  pub bcc: Option<Vec<Address>>,
  pub in_reply_to: Option<String>,
  pub message_id: Option<String>,
}

/// The decoded value of one `FETCH` key. `Other` carries the raw S-expression for any key the
/// engine doesn't structurally recognize, so extensions never fail the parse.
#[derive(Debug, Clone, PartialEq)]
pub enum FetchValue {
  Envelope(Envelope),
  Flags(Sexp),
  InternalDate(String),
  Rfc822(Vec<u8>),
  Rfc822Header(Vec<u8>),
  Rfc822Size(u64),
  Uid(u64),
  Body { section: String, data: Option<Vec<u8>> },
  Other(Sexp),
}

/// A `FETCH` response: the message sequence number plus its (key, value) pairs, in the order the
/// server sent them.
#[derive(Debug, Clone, PartialEq)]
pub struct FetchResponse {
  pub seq: u64,
  pub items: Vec<(String, FetchValue)>,
}

impl FetchResponse {
  pub fn get(&self, key: &str) -> Option<&FetchValue> {
    self.items.iter().find(|(k, _)| k == key).map(|(_, v)| v)
  }
}

/// Everything that can arrive with a leading `*`: either solicited (grouped into a pending
/// command's `extras`) or unsolicited (delivered to the unsolicited sink).
#[derive(Debug, Clone, PartialEq)]
pub enum Untagged {
  Capability(Vec<String>),
  List(ListEntry),
  Flags(Vec<String>),
  Exists(u64),
  Recent(u64),
  Expunge(u64),
  Fetch(FetchResponse),
  Status(StatusLine),
}

/// One full response unit read off the wire.
#[derive(Debug, Clone, PartialEq)]
pub enum Response {
  Tagged { tag: Tag, completion: TaggedCompletion },
  Untagged(Untagged),
  Continuation(String),
}
