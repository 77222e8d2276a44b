//! Connection transport: plain TCP, or TLS when dialing the well-known
//! TLS port 6697.
//!
//! Exposes line-oriented reads with a fixed length bound and a raw write
//! half. Only the dial carries a timeout; post-connect I/O blocks until
//! the peer responds or the connection is shut down.

use std::io;
use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, BufReader};
use tokio::net::TcpStream;
use tokio::time::timeout;
use tokio_rustls::{rustls, TlsConnector};

use crate::error::{Error, Result};

/// Port on which the dial performs a TLS handshake instead of plain TCP.
pub const TLS_PORT: u16 = 6697;

/// Longest wire line the reader accepts before flagging truncation.
pub const MAX_LINE_BYTES: usize = 520;

const DIAL_TIMEOUT: Duration = Duration::from_secs(8);

pub(crate) type BoxedWriter = Box<dyn AsyncWrite + Send + Unpin>;
type BoxedReader = Box<dyn AsyncRead + Send + Unpin>;

/// One line off the wire, stripped of its CR-LF terminator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Line {
    pub text: String,
    /// True if the line reached [`MAX_LINE_BYTES`] before a terminator
    /// was found; `text` then holds the truncated prefix.
    pub truncated: bool,
}

/// Buffered line reader over the connection's read half.
pub struct LineReader {
    inner: BufReader<BoxedReader>,
    partial: Vec<u8>,
}

impl LineReader {
    fn new(reader: BoxedReader) -> Self {
        Self {
            inner: BufReader::with_capacity(MAX_LINE_BYTES, reader),
            partial: Vec::new(),
        }
    }

    /// Read the next line.
    ///
    /// Cancel-safe: a partially accumulated line is kept in the reader
    /// and picked up by the next call.
    pub async fn read_line(&mut self) -> io::Result<Line> {
        loop {
            let buf = self.inner.fill_buf().await?;
            if buf.is_empty() {
                return Err(io::Error::new(
                    io::ErrorKind::UnexpectedEof,
                    "connection closed by peer",
                ));
            }

            if let Some(pos) = buf.iter().position(|&b| b == b'\n') {
                self.partial.extend_from_slice(&buf[..pos]);
                self.inner.consume(pos + 1);
                if self.partial.last() == Some(&b'\r') {
                    self.partial.pop();
                }
                let truncated = self.partial.len() >= MAX_LINE_BYTES;
                let text = String::from_utf8_lossy(&self.partial).into_owned();
                self.partial.clear();
                return Ok(Line { text, truncated });
            }

            let n = buf.len();
            self.partial.extend_from_slice(buf);
            self.inner.consume(n);
            if self.partial.len() >= MAX_LINE_BYTES {
                let text = String::from_utf8_lossy(&self.partial).into_owned();
                self.partial.clear();
                return Ok(Line {
                    text,
                    truncated: true,
                });
            }
        }
    }
}

/// An established connection to a server, ready to hand to
/// [`Network::new`](crate::Network::new).
pub struct Connection {
    reader: LineReader,
    writer: BoxedWriter,
}

impl Connection {
    /// Dial `host:port` with an 8 second connect timeout.
    ///
    /// When `port` is [`TLS_PORT`] the stream is wrapped in a TLS
    /// handshake verified against the system trust roots.
    pub async fn dial(host: &str, port: u16) -> Result<Self> {
        let addr = format!("{host}:{port}");
        let tcp = timeout(DIAL_TIMEOUT, TcpStream::connect(&addr))
            .await
            .map_err(|_| Error::DialTimeout)?
            .map_err(Error::Dial)?;

        if port != TLS_PORT {
            return Ok(Self::from_stream(tcp));
        }

        let connector = TlsConnector::from(Arc::new(tls_client_config()));
        let dns_name = rustls::pki_types::ServerName::try_from(host.to_string())
            .map_err(|e| Error::Dial(io::Error::new(io::ErrorKind::InvalidInput, e)))?;
        let tls = timeout(DIAL_TIMEOUT, connector.connect(dns_name, tcp))
            .await
            .map_err(|_| Error::DialTimeout)?
            .map_err(Error::Dial)?;
        Ok(Self::from_stream(tls))
    }

    /// Wrap an already-established byte stream.
    ///
    /// This is how [`dial`](Self::dial) wraps both plain and TLS streams,
    /// and the seam tests use to drive a session over an in-memory duplex.
    pub fn from_stream<S>(stream: S) -> Self
    where
        S: AsyncRead + AsyncWrite + Send + Unpin + 'static,
    {
        let (reader, writer) = tokio::io::split(stream);
        Self {
            reader: LineReader::new(Box::new(reader)),
            writer: Box::new(writer),
        }
    }

    pub(crate) fn into_split(self) -> (LineReader, BoxedWriter) {
        (self.reader, self.writer)
    }
}

fn tls_client_config() -> rustls::ClientConfig {
    let root_store =
        rustls::RootCertStore::from_iter(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());
    rustls::ClientConfig::builder()
        .with_root_certificates(root_store)
        .with_no_client_auth()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::AsyncWriteExt;

    #[tokio::test]
    async fn reads_lines_stripped_of_crlf() {
        let (client, mut server) = tokio::io::duplex(1024);
        let (mut reader, _writer) = Connection::from_stream(client).into_split();

        server.write_all(b"PING :serv\r\nNOTICE x :hi\r\n").await.unwrap();

        let line = reader.read_line().await.unwrap();
        assert_eq!(line.text, "PING :serv");
        assert!(!line.truncated);

        let line = reader.read_line().await.unwrap();
        assert_eq!(line.text, "NOTICE x :hi");
        assert!(!line.truncated);
    }

    #[tokio::test]
    async fn accepts_bare_lf_terminator() {
        let (client, mut server) = tokio::io::duplex(1024);
        let (mut reader, _writer) = Connection::from_stream(client).into_split();

        server.write_all(b"PING :serv\n").await.unwrap();

        let line = reader.read_line().await.unwrap();
        assert_eq!(line.text, "PING :serv");
    }

    #[tokio::test]
    async fn flags_oversized_line_as_truncated() {
        let (client, mut server) = tokio::io::duplex(4096);
        let (mut reader, _writer) = Connection::from_stream(client).into_split();

        let long = vec![b'A'; MAX_LINE_BYTES + 100];
        server.write_all(&long).await.unwrap();

        let line = reader.read_line().await.unwrap();
        assert!(line.truncated);
    }

    #[tokio::test]
    async fn partial_line_survives_across_writes() {
        let (client, mut server) = tokio::io::duplex(1024);
        let (mut reader, _writer) = Connection::from_stream(client).into_split();

        server.write_all(b"NICK ne").await.unwrap();
        let read = tokio::spawn(async move { reader.read_line().await });
        tokio::task::yield_now().await;
        server.write_all(b"o\r\n").await.unwrap();

        let line = read.await.unwrap().unwrap();
        assert_eq!(line.text, "NICK neo");
    }

    #[tokio::test]
    async fn eof_is_unexpected_eof() {
        let (client, server) = tokio::io::duplex(1024);
        let (mut reader, _writer) = Connection::from_stream(client).into_split();
        drop(server);

        let err = reader.read_line().await.unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::UnexpectedEof);
    }
}
