//! Pluggable transport: plain TCP or TLS-over-TCP, both exposing a plain `Read + Write`.
//!
//! Grounded directly on the teacher's `TCP`/`TLS`/`TLSStream` trio in `lib.rs`: same
//! `ouroboros::self_referencing` trick to hold `rustls::ClientConnection` and its borrowed
//! `rustls::Stream` in one struct, same `rustls_native_certs`-seeded root store.

use std::io::{self, Read, Write};
use std::net::{TcpStream, ToSocketAddrs};
use std::time::Duration;

use anyhow::Context as _;

/// A connected, byte-oriented transport. The reader thread and the writer side of the
/// correlator each need independent access, so implementations are split into a read half and
/// a write half via [`Transport::split`].
pub trait Transport: Read + Write + Send {
  type Reader: Read + Send + 'static;
  type Writer: Write + Send + 'static;

  fn split(self) -> (Self::Reader, Self::Writer);
}

/// Connects a plain TCP socket, honoring an optional connect/read timeout.
pub fn connect_tcp(address: &str, port: u16, timeout: Option<Duration>) -> anyhow::Result<TcpStream> {
  let resolved = (address, port)
    .to_socket_addrs()?
    .next()
    .with_context(|| format!("couldn't resolve {address}:{port}"))?;
  log::debug!("connecting to {resolved:?} with timeout {timeout:?}");
  let stream = match timeout {
    Some(duration) => {
      let stream = TcpStream::connect_timeout(&resolved, duration)?;
      stream.set_read_timeout(Some(duration))?;
      stream
    }
    None => TcpStream::connect(resolved)?,
  };
  Ok(stream)
}

impl Transport for TcpStream {
  type Reader = TcpStream;
  type Writer = TcpStream;

  fn split(self) -> (Self::Reader, Self::Writer) {
    let writer = self.try_clone().expect("TcpStream::try_clone");
    (self, writer)
  }
}

/// Holds the TLS connection and its backing socket together with the `rustls::Stream` borrowing
/// both, since `rustls::Stream` can't outlive either.
#[ouroboros::self_referencing]
pub struct TlsStream {
  tcp_stream: TcpStream,
  tls_connection: rustls::ClientConnection,
  #[borrows(mut tcp_stream, mut tls_connection)]
  #[covariant]
  tls_stream: rustls::Stream<'this, rustls::ClientConnection, TcpStream>,
}

impl Read for TlsStream {
  fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
    self.with_mut(|fields| fields.tls_stream.read(buf))
  }
}

impl Write for TlsStream {
  fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
    self.with_mut(|fields| fields.tls_stream.write(buf))
  }

  fn flush(&mut self) -> io::Result<()> {
    self.with_mut(|fields| fields.tls_stream.flush())
  }
}

/// Connects over TCP, then performs the TLS handshake for `address`.
pub fn connect_tls(address: &str, port: u16, timeout: Option<Duration>) -> anyhow::Result<TlsStream> {
  let tcp_stream = connect_tcp(address, port, timeout)?;
  let mut root_store = rustls::RootCertStore::empty();
  for certificate in rustls_native_certs::load_native_certs()? {
    root_store.add(&rustls::Certificate(certificate.0))?;
  }
  let config = rustls::ClientConfig::builder()
    .with_safe_defaults()
    .with_root_certificates(root_store)
    .with_no_client_auth();
  let server_name = address
    .try_into()
    .with_context(|| format!("couldn't convert {address} to a server name"))?;
  let tls_connection = rustls::ClientConnection::new(std::sync::Arc::new(config), server_name)?;
  Ok(
    TlsStreamBuilder {
      tcp_stream,
      tls_connection,
      tls_stream_builder: |tcp_stream, tls_connection| rustls::Stream::new(tls_connection, tcp_stream),
    }
    .build(),
  )
}

/// `TlsStream` isn't `Clone`-able the way `TcpStream` is, so the read half and write half share
/// ownership through a mutex; the correlator only ever has one of each in flight at a time, so
/// contention is not a concern.
pub struct SharedHalf<T>(std::sync::Arc<std::sync::Mutex<T>>);

impl<T> Clone for SharedHalf<T> {
  fn clone(&self) -> Self {
    SharedHalf(self.0.clone())
  }
}

impl<T: Read> Read for SharedHalf<T> {
  fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
    self.0.lock().expect("transport mutex poisoned").read(buf)
  }
}

impl<T: Write> Write for SharedHalf<T> {
  fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
    self.0.lock().expect("transport mutex poisoned").write(buf)
  }

  fn flush(&mut self) -> io::Result<()> {
    self.0.lock().expect("transport mutex poisoned").flush()
  }
}

impl Transport for TlsStream {
  type Reader = SharedHalf<TlsStream>;
  type Writer = SharedHalf<TlsStream>;

  fn split(self) -> (Self::Reader, Self::Writer) {
    let shared = SharedHalf(std::sync::Arc::new(std::sync::Mutex::new(self)));
    (shared.clone(), shared)
  }
}
