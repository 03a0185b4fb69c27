//! End-to-end `Session` tests against a same-process fake IMAP server on a loopback
//! `TcpListener`, per the test-tooling plan: no subprocess, no TLS, just scripted bytes.

use std::io::{BufRead, BufReader, Write};
use std::net::{TcpListener, TcpStream};
use std::thread;
use std::time::Duration;

use pretty_assertions::assert_eq;
use test_log::test;

use improto::{ConnectOptions, Status};

/// Binds a loopback listener, hands the address back immediately, and runs `script` against the
/// first accepted connection on a background thread.
fn fake_server(script: impl FnOnce(TcpStream) + Send + 'static) -> (String, u16) {
  let listener = TcpListener::bind("127.0.0.1:0").unwrap();
  let addr = listener.local_addr().unwrap();
  thread::spawn(move || {
    let (stream, _) = listener.accept().unwrap();
    script(stream);
  });
  (addr.ip().to_string(), addr.port())
}

fn read_line(reader: &mut BufReader<TcpStream>) -> String {
  let mut line = String::new();
  reader.read_line(&mut line).unwrap();
  line
}

#[test]
fn connect_reports_greeting() {
  let (address, port) = fake_server(|stream| {
    let mut stream = stream;
    stream.write_all(b"* OK IMAP4rev1 Service Ready\r\n").unwrap();
  });
  let options = ConnectOptions {
    address,
    port,
    tls: false,
    timeout: Some(Duration::from_secs(5)),
  };
  let (_session, greeting) = improto::Session::connect(&options).unwrap();
  assert_eq!("IMAP4rev1 Service Ready", greeting);
}

#[test]
fn connect_fails_on_bye_greeting() {
  let (address, port) = fake_server(|stream| {
    let mut stream = stream;
    stream.write_all(b"* BYE shutting down\r\n").unwrap();
  });
  let options = ConnectOptions {
    address,
    port,
    tls: false,
    timeout: Some(Duration::from_secs(5)),
  };
  assert!(improto::Session::connect(&options).is_err());
}

#[test]
fn auth_list_examine_fetch_round_trip() {
  let (address, port) = fake_server(|stream| {
    stream.set_nodelay(true).unwrap();
    let mut writer = stream.try_clone().unwrap();
    let mut reader = BufReader::new(stream);

    writer.write_all(b"* OK ready for requests\r\n").unwrap();

    let login = read_line(&mut reader);
    assert_eq!("a0 LOGIN \"alice\" \"s3cret\"\r\n", login);
    writer.write_all(b"a0 OK LOGIN completed\r\n").unwrap();

    let list = read_line(&mut reader);
    assert_eq!("a1 LIST \"\" \"*\"\r\n", list);
    writer
      .write_all(b"* LIST (\\HasNoChildren) \"/\" \"INBOX\"\r\na1 OK LIST completed\r\n")
      .unwrap();

    let examine = read_line(&mut reader);
    assert_eq!("a2 EXAMINE \"INBOX\"\r\n", examine);
    writer
      .write_all(
        b"* 5 EXISTS\r\n\
          * 2 RECENT\r\n\
          * FLAGS (\\Answered \\Flagged \\Deleted \\Seen \\Draft)\r\n\
          * OK [UIDVALIDITY 3857529045] UIDs valid\r\n\
          * OK [UIDNEXT 4] Predicted next UID\r\n\
          a2 OK [READ-ONLY] EXAMINE completed\r\n",
      )
      .unwrap();

    let fetch = read_line(&mut reader);
    assert_eq!("a3 FETCH 1 (UID RFC822.SIZE)\r\n", fetch);
    writer
      .write_all(b"* 1 FETCH (UID 1 RFC822.SIZE 430)\r\na3 OK FETCH completed\r\n")
      .unwrap();
  });

  let options = ConnectOptions {
    address,
    port,
    tls: false,
    timeout: Some(Duration::from_secs(5)),
  };
  let (session, greeting) = improto::Session::connect(&options).unwrap();
  assert_eq!("ready for requests", greeting);

  let login = session.auth("alice", "s3cret").unwrap();
  assert_eq!(Status::Ok, login.status);

  let list = session.list("", "*").unwrap();
  assert_eq!(1, list.entries.len());
  assert_eq!("INBOX", list.entries[0].name);
  assert_eq!(Some('/'), list.entries[0].delimiter);
  assert_eq!(Some(true), list.entries[0].flags.has_children.map(|v| !v));

  let examined = session.examine("INBOX").unwrap();
  assert_eq!(Some(5), examined.exists);
  assert_eq!(Some(2), examined.recent);
  assert_eq!(Some(3857529045), examined.uid_validity);
  assert_eq!(Some(4), examined.uid_next);
  assert_eq!(5, examined.flags.len());

  let (fetches, completion) = session.fetch("1", "(UID RFC822.SIZE)").unwrap();
  assert_eq!(Status::Ok, completion.status);
  assert_eq!(1, fetches.len());
  assert_eq!(1, fetches[0].seq);
  assert!(matches!(
    fetches[0].get("UID"),
    Some(improto::FetchValue::Uid(1))
  ));
  assert!(matches!(
    fetches[0].get("RFC822.SIZE"),
    Some(improto::FetchValue::Rfc822Size(430))
  ));
}

#[test]
fn unsolicited_exists_arrives_on_the_sink_outside_a_pending_command() {
  let (address, port) = fake_server(|stream| {
    let mut stream = stream;
    stream.write_all(b"* OK ready\r\n").unwrap();
    thread::sleep(Duration::from_millis(50));
    stream.write_all(b"* 7 EXISTS\r\n").unwrap();
  });
  let options = ConnectOptions {
    address,
    port,
    tls: false,
    timeout: Some(Duration::from_secs(5)),
  };
  let (session, _greeting) = improto::Session::connect(&options).unwrap();
  let update = session
    .unsolicited()
    .recv_timeout(Duration::from_secs(2))
    .unwrap();
  assert!(matches!(
    update,
    improto::Unsolicited::Response(improto::Untagged::Exists(7))
  ));
}
