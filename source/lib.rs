// https://www.rfc-editor.org/rfc/rfc3501 - IMAP4rev1
// https://www.rfc-editor.org/rfc/rfc2152 - UTF-7
// https://www.rfc-editor.org/rfc/rfc2595#section-6 - Using TLS with IMAP, POP3 and ACAP

//! A client-side IMAP wire protocol engine: lexing, response parsing, and a single-reader,
//! many-writer correlator multiplexing tagged commands over one connection.

mod correlator;
mod error;
mod lexer;
mod parser;
mod reader;
mod sexp;
mod session;
mod tag;
mod transport;
mod types;
mod utf7;

pub use correlator::{Correlator, Unsolicited};
pub use error::{Error, Result};
pub use parser::read_response;
pub use session::{ConnectOptions, ExamineResult, ListResult, Session};
pub use sexp::Sexp;
pub use tag::Tag;
pub use types::{
  Address, Envelope, FetchResponse, FetchValue, ListEntry, ListFlags, Response, ResponseCode,
  Status, StatusLine, TaggedCompletion, Untagged,
};
pub use utf7::{decode as decode_mailbox_name, encode as encode_mailbox_name};
