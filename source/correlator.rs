//! Tag allocation, pending-command table, send/receive pairing (§4.E, §4.F).
//!
//! Structural reference: `mqasimca-mailledger`'s sans-I/O `Protocol` keeps a `pending:
//! HashMap<Tag, PendingCommand>` classified by a single dispatch loop; this module keeps that
//! shape but owns its own reader thread and transport instead of being driven externally, since
//! this engine reads directly off a blocking socket rather than a caller-fed buffer.

use std::collections::HashMap;
use std::io::{Read, Write};
use std::sync::mpsc;
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use crate::error::{Error, Result};
use crate::lexer::Lexer;
use crate::parser::read_response;
use crate::tag::{Tag, TagGenerator};
use crate::types::{Response, TaggedCompletion, Untagged};

/// An untagged response or continuation with no pending command to claim it.
#[derive(Debug, Clone, PartialEq)]
pub enum Unsolicited {
  Response(Untagged),
  Continuation(String),
}

enum Waiter {
  Completion(mpsc::Sender<Result<TaggedCompletion>>),
  /// Installed by [`Correlator::await_continuation`] in place of the tag's `Completion` waiter
  /// for the duration of a literal handshake.
  Gate(mpsc::Sender<GateEvent>),
}

enum GateEvent {
  Continuation,
  Rejected(TaggedCompletion),
  /// The reader tore the session down while this literal handshake was outstanding.
  Closed(Error),
}

#[derive(Default)]
struct PendingState {
  table: HashMap<Tag, Waiter>,
  batch: Vec<Untagged>,
  continuation_waiter: Option<mpsc::Sender<GateEvent>>,
  closed: Option<Error>,
}

struct Shared<W> {
  tags: TagGenerator,
  write_half: Mutex<W>,
  pending: Mutex<PendingState>,
}

/// The write side of a correlated session: allocates tags, serializes writes, and pairs each
/// tagged completion with the caller that sent it. A background thread owns the read half and
/// is the only thing that ever calls [`Lexer::reader_mut`] on it.
pub struct Correlator<W> {
  shared: Arc<Shared<W>>,
}

impl<W> Clone for Correlator<W> {
  fn clone(&self) -> Self {
    Correlator {
      shared: self.shared.clone(),
    }
  }
}

/// Starts the reader thread over `read_half` and returns a handle for issuing commands plus the
/// receiving end of the unsolicited sink.
pub fn spawn<R, W>(read_half: R, write_half: W) -> (Correlator<W>, mpsc::Receiver<Unsolicited>)
where
  R: Read + Send + 'static,
  W: Write + Send + 'static,
{
  let (unsolicited_tx, unsolicited_rx) = mpsc::channel();
  let shared = Arc::new(Shared {
    tags: TagGenerator::new(),
    write_half: Mutex::new(write_half),
    pending: Mutex::new(PendingState::default()),
  });
  let reader_shared = shared.clone();
  thread::spawn(move || reader_loop(read_half, reader_shared, unsolicited_tx));
  (Correlator { shared }, unsolicited_rx)
}

fn reader_loop<R: Read, W: Write>(read_half: R, shared: Arc<Shared<W>>, unsolicited_tx: mpsc::Sender<Unsolicited>) {
  let mut lexer = Lexer::new(read_half);
  loop {
    match read_response(&mut lexer) {
      Ok(response) => {
        if let Err(error) = dispatch(&shared, &unsolicited_tx, response) {
          teardown(&shared, error);
          return;
        }
      }
      Err(error) => {
        teardown(&shared, error);
        return;
      }
    }
  }
}

fn dispatch<W>(
  shared: &Arc<Shared<W>>,
  unsolicited_tx: &mpsc::Sender<Unsolicited>,
  response: Response,
) -> Result<()> {
  match response {
    Response::Untagged(untagged) => {
      let mut state = shared.pending.lock().expect("pending mutex poisoned");
      if state.table.is_empty() {
        drop(state);
        let _ = unsolicited_tx.send(Unsolicited::Response(untagged));
      } else {
        state.batch.push(untagged);
      }
      Ok(())
    }
    Response::Continuation(text) => {
      let mut state = shared.pending.lock().expect("pending mutex poisoned");
      match state.continuation_waiter.take() {
        Some(tx) => {
          let _ = tx.send(GateEvent::Continuation);
        }
        None => {
          drop(state);
          let _ = unsolicited_tx.send(Unsolicited::Continuation(text));
        }
      }
      Ok(())
    }
    Response::Tagged { tag, mut completion } => {
      let mut state = shared.pending.lock().expect("pending mutex poisoned");
      let batch = std::mem::take(&mut state.batch);
      completion.extras = batch;
      match state.table.remove(&tag) {
        Some(Waiter::Completion(tx)) => {
          let _ = tx.send(Ok(completion));
          Ok(())
        }
        Some(Waiter::Gate(tx)) => {
          let _ = tx.send(GateEvent::Rejected(completion));
          Ok(())
        }
        None => Err(Error::protocol(format!("unknown tag {tag}"))),
      }
    }
  }
}

/// Fails every outstanding waiter with `error` and marks the session closed so further `send`
/// calls fail immediately, mirroring the reader-owns-socket teardown in §5.
fn teardown<W>(shared: &Arc<Shared<W>>, error: Error) {
  log::debug!("session teardown: {error}");
  let mut state = shared.pending.lock().expect("pending mutex poisoned");
  for (_, waiter) in state.table.drain() {
    match waiter {
      Waiter::Completion(tx) => {
        let _ = tx.send(Err(error.clone()));
      }
      Waiter::Gate(tx) => {
        let _ = tx.send(GateEvent::Closed(error.clone()));
      }
    }
  }
  state.continuation_waiter = None;
  state.closed = Some(error);
}

enum ContinuationOutcome {
  Proceed,
  Rejected(TaggedCompletion),
}

impl<W: Write> Correlator<W> {
  /// Allocates a tag, registers `reply` if given, and writes `a<tag> <command_text>`. Returns
  /// the allocated tag so the caller can later [`Correlator::cancel`] it.
  fn send_raw(&self, reply: Option<mpsc::Sender<Result<TaggedCompletion>>>, command_text: &str) -> Result<Tag> {
    let tag = self.shared.tags.next();
    {
      let mut state = self.shared.pending.lock().expect("pending mutex poisoned");
      if let Some(closed) = &state.closed {
        return Err(closed.clone());
      }
      if let Some(reply) = reply {
        state.table.insert(tag, Waiter::Completion(reply));
      }
    }
    let line = format!("{tag} {command_text}\r\n");
    let mut write_half = self.shared.write_half.lock().expect("write mutex poisoned");
    log::trace!("> {}", crate::reader::summarize(line.as_bytes()));
    write_half.write_all(line.as_bytes()).map_err(Error::from)?;
    Ok(tag)
  }

  /// Fire-and-forget: writes the command with no reply registration.
  pub fn send(&self, command_text: &str) -> Result<Tag> {
    self.send_raw(None, command_text)
  }

  /// Writes the command and blocks for its tagged completion.
  pub fn send_sync(&self, command_text: &str) -> Result<TaggedCompletion> {
    let (tx, rx) = mpsc::channel();
    self.send_raw(Some(tx), command_text)?;
    rx.recv().unwrap_or(Err(Error::Cancelled))
  }

  /// As [`Correlator::send_sync`], but unregisters the pending entry and returns
  /// [`Error::Cancelled`] if no completion arrives within `timeout`. A response that later
  /// arrives for the cancelled tag has no listener and forces session teardown, per §5.
  pub fn send_sync_timeout(&self, command_text: &str, timeout: Duration) -> Result<TaggedCompletion> {
    let (tx, rx) = mpsc::channel();
    let tag = self.send_raw(Some(tx), command_text)?;
    match rx.recv_timeout(timeout) {
      Ok(result) => result,
      Err(_) => {
        self.cancel(tag);
        Err(Error::Cancelled)
      }
    }
  }

  /// Unregisters `tag`'s pending entry, if still present.
  pub fn cancel(&self, tag: Tag) {
    let mut state = self.shared.pending.lock().expect("pending mutex poisoned");
    state.table.remove(&tag);
  }

  /// Writes a command whose line ends in a literal prefix (`... {n}\r\n`), waits for the `+`
  /// continuation, then writes the literal bytes and `command_suffix` followed by CRLF. A
  /// tagged rejection in place of the continuation short-circuits: the payload is never sent
  /// and the rejection is returned as the command's result, exactly as any other completion.
  pub fn send_literal(
    &self,
    command_prefix: &str,
    literal: &[u8],
    command_suffix: &str,
  ) -> Result<TaggedCompletion> {
    let (tx, rx) = mpsc::channel();
    let tag = self.shared.tags.next();
    {
      let mut state = self.shared.pending.lock().expect("pending mutex poisoned");
      if let Some(closed) = &state.closed {
        return Err(closed.clone());
      }
      state.table.insert(tag, Waiter::Completion(tx));
    }

    let mut write_half = self.shared.write_half.lock().expect("write mutex poisoned");
    let head = format!("{tag} {command_prefix}{{{}}}\r\n", literal.len());
    log::trace!("> {}", crate::reader::summarize(head.as_bytes()));
    write_half.write_all(head.as_bytes())?;

    match self.await_continuation(tag)? {
      ContinuationOutcome::Rejected(completion) => Ok(completion),
      ContinuationOutcome::Proceed => {
        {
          const LOG_CAP: usize = 256;
          let shown = &literal[..literal.len().min(LOG_CAP)];
          let omitted = if literal.len() > LOG_CAP { "...omitted..." } else { "" };
          log::trace!("> {}{omitted} ({} bytes)", crate::reader::escape(shown), literal.len());
        }
        write_half.write_all(literal)?;
        let tail = format!("{command_suffix}\r\n");
        log::trace!("> {}", crate::reader::summarize(tail.as_bytes()));
        write_half.write_all(tail.as_bytes())?;
        drop(write_half);
        rx.recv().unwrap_or(Err(Error::Cancelled))
      }
    }
  }

  /// Arms the continuation gate for `tag`: temporarily replaces its completion waiter so the
  /// next `+` or the command's own tagged rejection (whichever the reader sees first) resolves
  /// this call instead of the normal completion path.
  fn await_continuation(&self, tag: Tag) -> Result<ContinuationOutcome> {
    let (gate_tx, gate_rx) = mpsc::channel();
    let original = {
      let mut state = self.shared.pending.lock().expect("pending mutex poisoned");
      let original = match state.table.remove(&tag) {
        Some(Waiter::Completion(tx)) => tx,
        _ => unreachable!("send_literal always registers a Completion waiter first"),
      };
      state.table.insert(tag, Waiter::Gate(gate_tx.clone()));
      state.continuation_waiter = Some(gate_tx);
      original
    };
    match gate_rx.recv() {
      Ok(GateEvent::Continuation) => {
        let mut state = self.shared.pending.lock().expect("pending mutex poisoned");
        state.table.insert(tag, Waiter::Completion(original));
        Ok(ContinuationOutcome::Proceed)
      }
      Ok(GateEvent::Rejected(completion)) => Ok(ContinuationOutcome::Rejected(completion)),
      Ok(GateEvent::Closed(error)) => Err(error),
      Err(_) => Err(Error::Cancelled),
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use std::net::{TcpListener, TcpStream};

  /// A loopback socket pair: good enough to drive the correlator end to end without a custom
  /// in-memory duplex pipe.
  fn socket_pair() -> (TcpStream, TcpStream) {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();
    let client = thread::spawn(move || TcpStream::connect(addr).unwrap());
    let (server, _) = listener.accept().unwrap();
    (server, client.join().unwrap())
  }

  #[test]
  fn send_sync_round_trip() {
    let (mut server, client) = socket_pair();
    let (correlator, _unsolicited) = spawn(client.try_clone().unwrap(), client);
    thread::spawn(move || {
      let mut buf = [0u8; 256];
      let n = server.read(&mut buf).unwrap();
      assert_eq!(b"a0 CAPABILITY\r\n", &buf[..n]);
      server
        .write_all(b"* CAPABILITY IMAP4rev1\r\na0 OK CAPABILITY completed\r\n")
        .unwrap();
    });
    let completion = correlator.send_sync("CAPABILITY").unwrap();
    assert_eq!(crate::types::Status::Ok, completion.status);
    assert_eq!(1, completion.extras.len());
  }

  #[test]
  fn tags_are_monotonic_across_calls() {
    let (mut server, client) = socket_pair();
    let (correlator, _unsolicited) = spawn(client.try_clone().unwrap(), client);
    thread::spawn(move || {
      let mut buf = [0u8; 256];
      for i in 0..3 {
        let n = server.read(&mut buf).unwrap();
        assert_eq!(format!("a{i} NOOP\r\n").as_bytes(), &buf[..n]);
        server
          .write_all(format!("a{i} OK done\r\n").as_bytes())
          .unwrap();
      }
    });
    for _ in 0..3 {
      correlator.send_sync("NOOP").unwrap();
    }
  }

  #[test]
  fn unknown_tag_tears_down_other_pending_callers() {
    let (mut server, client) = socket_pair();
    let (correlator, _unsolicited) = spawn(client.try_clone().unwrap(), client);
    let other = correlator.clone();
    let waiting = thread::spawn(move || other.send_sync("NOOP"));
    thread::sleep(Duration::from_millis(50));
    let mut buf = [0u8; 256];
    let n = server.read(&mut buf).unwrap();
    assert!(n > 0);
    server.write_all(b"a99 OK unexpected\r\n").unwrap();
    assert!(waiting.join().unwrap().is_err());
  }

  #[test]
  fn cancel_unregisters_before_late_arrival() {
    let (mut server, client) = socket_pair();
    let (correlator, _unsolicited) = spawn(client.try_clone().unwrap(), client);
    let mut buf = [0u8; 256];
    let n = server.read(&mut buf).unwrap();
    assert!(n > 0);
    let err = correlator
      .send_sync_timeout("NOOP", Duration::from_millis(20))
      .unwrap_err();
    assert!(matches!(err, Error::Cancelled));
  }

  #[test]
  fn literal_continuation_then_payload() {
    let (mut server, client) = socket_pair();
    let (correlator, _unsolicited) = spawn(client.try_clone().unwrap(), client);
    thread::spawn(move || {
      let mut buf = [0u8; 256];
      let n = server.read(&mut buf).unwrap();
      assert_eq!(b"a0 APPEND INBOX {3}\r\n", &buf[..n]);
      server.write_all(b"+ ready\r\n").unwrap();
      let n = server.read(&mut buf).unwrap();
      assert_eq!(b"abc\r\n", &buf[..n]);
      server.write_all(b"a0 OK APPEND completed\r\n").unwrap();
    });
    let completion = correlator.send_literal("APPEND INBOX ", b"abc", "").unwrap();
    assert_eq!(crate::types::Status::Ok, completion.status);
  }

  #[test]
  fn literal_rejected_before_continuation() {
    let (mut server, client) = socket_pair();
    let (correlator, _unsolicited) = spawn(client.try_clone().unwrap(), client);
    thread::spawn(move || {
      let mut buf = [0u8; 256];
      let n = server.read(&mut buf).unwrap();
      assert_eq!(b"a0 APPEND INBOX {3}\r\n", &buf[..n]);
      server.write_all(b"a0 NO [OVERQUOTA] over quota\r\n").unwrap();
    });
    let completion = correlator.send_literal("APPEND INBOX ", b"abc", "").unwrap();
    assert_eq!(crate::types::Status::No, completion.status);
  }

  #[test]
  fn literal_sees_typed_error_on_teardown_not_a_fabricated_bad() {
    let (mut server, client) = socket_pair();
    let (correlator, _unsolicited) = spawn(client.try_clone().unwrap(), client);
    thread::spawn(move || {
      let mut buf = [0u8; 256];
      let n = server.read(&mut buf).unwrap();
      assert_eq!(b"a0 APPEND INBOX {3}\r\n", &buf[..n]);
      // Close the connection instead of answering: the reader observes EOF while the literal
      // handshake is outstanding and must tear down with a typed error, not a synthetic BAD.
      drop(server);
    });
    let err = correlator.send_literal("APPEND INBOX ", b"abc", "").unwrap_err();
    assert!(matches!(err, Error::Transport(_)));
  }
}
