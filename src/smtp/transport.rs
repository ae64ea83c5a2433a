//-
// Copyright (c) 2026, Jason Lingle
//
// This file is part of msaprobe.
//
// msaprobe is free software: you can redistribute it and/or modify it under
// the terms of the GNU General Public License as published by the Free
// Software Foundation, either version 3 of the License, or (at your option)
// any later version.
//
// msaprobe is distributed in the hope that it will be useful, but WITHOUT ANY
// WARRANTY; without even the implied warranty of MERCHANTABILITY or FITNESS
// FOR A PARTICULAR PURPOSE. See the GNU General Public License for more
// details.
//
// You should have received a copy of the GNU General Public License along
// with msaprobe. If not, see <http://www.gnu.org/licenses/>.

use std::cell::RefCell;
use std::io::{self, Read, Write};
use std::mem;
use std::net::{TcpStream, ToSocketAddrs};
use std::rc::Rc;
use std::time::Duration;

use log::{debug, trace};
use openssl::ssl::{
    HandshakeError, SslConnector, SslMethod, SslOptions, SslStream,
    SslVerifyMode,
};

use super::endpoint::{ConnectionType, Endpoint, TlsPolicy};
use super::reply::LineSource;
use super::transcript::{Transcript, HIDDEN_AUTH_REPLY};
use crate::support::error::Error;

/// Longest server line accepted before the connection is written off.
const MAX_LINE: usize = 4096;

/// TLS session parameters exposed after a successful handshake.
#[derive(Clone, Debug, Default)]
pub struct CryptoInfo {
    pub protocol: Option<String>,
    pub cipher_name: Option<String>,
    pub cipher_bits: Option<i32>,
    pub cipher_version: Option<String>,
}

#[derive(Debug)]
enum Stream {
    Cleartext(TcpStream),
    Tls(Box<SslStream<TcpStream>>),
    Closed,
}

impl Stream {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match *self {
            Stream::Cleartext(ref mut s) => s.read(buf),
            Stream::Tls(ref mut s) => s.read(buf),
            Stream::Closed => Err(io::ErrorKind::NotConnected.into()),
        }
    }

    fn write_all(&mut self, buf: &[u8]) -> io::Result<()> {
        match *self {
            Stream::Cleartext(ref mut s) => s.write_all(buf),
            Stream::Tls(ref mut s) => s.write_all(buf),
            Stream::Closed => Err(io::ErrorKind::NotConnected.into()),
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        match *self {
            Stream::Cleartext(ref mut s) => s.flush(),
            Stream::Tls(ref mut s) => s.flush(),
            Stream::Closed => Ok(()),
        }
    }
}

/// A line-oriented byte stream to one server, cleartext or TLS, with an
/// in-place STARTTLS upgrade.
///
/// All I/O is blocking; the read/write deadlines set at `open` bound each
/// individual operation. Every line that crosses the wire is recorded in
/// the shared transcript.
#[derive(Debug)]
pub struct Transport {
    stream: Stream,
    transcript: Rc<RefCell<Transcript>>,
    buffer: Vec<u8>,
    redact_client: bool,
}

impl Transport {
    /// Resolves `endpoint` and connects, applying `connect_timeout` per
    /// candidate address and the read/write deadline thereafter.
    ///
    /// For `ConnectionType::Tls` the TLS handshake is part of connecting,
    /// and any failure in it (certificate failures included) is reported
    /// as a connection failure.
    pub fn open(
        endpoint: &Endpoint,
        transcript: Rc<RefCell<Transcript>>,
        connect_timeout: Duration,
        io_timeout: Duration,
    ) -> Result<Self, Error> {
        let addresses = (&endpoint.host as &str, endpoint.port)
            .to_socket_addrs()
            .map_err(Error::Connect)?;

        let mut last_error = None::<io::Error>;
        let mut socket = None::<TcpStream>;
        for address in addresses {
            debug!("Connecting to {}", address);
            match TcpStream::connect_timeout(&address, connect_timeout) {
                Ok(s) => {
                    socket = Some(s);
                    break;
                },
                Err(e) => last_error = Some(e),
            }
        }

        let socket = match socket {
            Some(s) => s,
            None => {
                return Err(Error::Connect(last_error.unwrap_or_else(|| {
                    io::Error::new(
                        io::ErrorKind::NotFound,
                        format!("host '{}' not found", endpoint.host),
                    )
                })));
            },
        };

        socket
            .set_read_timeout(Some(io_timeout))
            .and_then(|()| socket.set_write_timeout(Some(io_timeout)))
            .map_err(Error::Connect)?;

        let mut transport = Transport {
            stream: Stream::Cleartext(socket),
            transcript,
            buffer: Vec::new(),
            redact_client: false,
        };

        if ConnectionType::Tls == endpoint.connection_type {
            transport
                .start_tls(&endpoint.tls, &endpoint.host)
                .map_err(|e| {
                    Error::Connect(io::Error::new(
                        io::ErrorKind::Other,
                        e.to_string(),
                    ))
                })?;
        }

        Ok(transport)
    }

    /// Reads the next line, with the CRLF (or bare LF) terminator removed.
    ///
    /// Returns `None` on clean end of stream. A timeout or any other
    /// socket error is a read failure.
    pub fn read_line(&mut self) -> Result<Option<String>, Error> {
        loop {
            if let Some(eol) =
                self.buffer.iter().position(|&byte| b'\n' == byte)
            {
                let mut line: Vec<u8> =
                    self.buffer.drain(..=eol).take(eol).collect();
                if line.last().copied() == Some(b'\r') {
                    line.pop();
                }

                let line = String::from_utf8_lossy(&line).into_owned();
                trace!("S: {}", line);
                self.transcript.borrow_mut().server_line(&line);
                return Ok(Some(line));
            }

            if self.buffer.len() >= MAX_LINE {
                return Err(Error::Read(io::Error::new(
                    io::ErrorKind::InvalidData,
                    "server line too long",
                )));
            }

            let mut chunk = [0u8; 1024];
            match self.stream.read(&mut chunk) {
                Ok(0) => {
                    // EOF. A trailing partial line is still surfaced so
                    // it shows up in diagnostics.
                    if self.buffer.is_empty() {
                        return Ok(None);
                    }

                    let line = String::from_utf8_lossy(&self.buffer)
                        .into_owned();
                    self.buffer.clear();
                    trace!("S: {} (unterminated)", line);
                    self.transcript.borrow_mut().server_line(&line);
                    return Ok(Some(line));
                },
                Ok(n) => self.buffer.extend_from_slice(&chunk[..n]),
                Err(e) => return Err(Error::Read(e)),
            }
        }
    }

    /// Writes `line` followed by CRLF.
    ///
    /// `line` itself must not contain CR or LF; allowing those would let a
    /// caller smuggle extra commands into the dialogue.
    pub fn write_line(&mut self, line: &str) -> Result<(), Error> {
        if line.contains(['\r', '\n']) {
            return Err(Error::InvalidArgument(
                "command line may not contain CR or LF".to_owned(),
            ));
        }

        {
            let mut transcript = self.transcript.borrow_mut();
            if self.redact_client {
                transcript.client_line(HIDDEN_AUTH_REPLY);
            } else {
                transcript.client_line(line);
            }
        }
        trace!("C: {}", if self.redact_client { "(redacted)" } else { line });

        let mut data = Vec::with_capacity(line.len() + 2);
        data.extend_from_slice(line.as_bytes());
        data.extend_from_slice(b"\r\n");
        self.stream.write_all(&data).map_err(Error::Write)?;
        self.stream.flush().map_err(Error::Write)
    }

    /// While set, client lines are recorded as the fixed redaction marker
    /// instead of their contents.
    pub fn set_redact_client(&mut self, redact: bool) {
        self.redact_client = redact;
    }

    /// Upgrades the established cleartext stream to TLS in place.
    ///
    /// Precondition: the stream is cleartext and nothing is buffered
    /// beyond the server's go-ahead reply; data read ahead of the
    /// handshake would otherwise be interpreted as TLS records.
    pub fn start_tls(
        &mut self,
        policy: &TlsPolicy,
        server_name: &str,
    ) -> Result<(), Error> {
        match self.stream {
            Stream::Cleartext(_) => (),
            Stream::Tls(_) => {
                return Err(Error::Crypto(
                    "stream is already encrypted".to_owned(),
                ));
            },
            Stream::Closed => {
                return Err(Error::Crypto("stream is closed".to_owned()));
            },
        }

        if !self.buffer.is_empty() {
            return Err(Error::Crypto(
                "unread data buffered before TLS handshake".to_owned(),
            ));
        }

        self.transcript.borrow_mut().note(format_args!(
            "TLS handshake with {}",
            server_name
        ));

        let Stream::Cleartext(socket) =
            mem::replace(&mut self.stream, Stream::Closed)
        else {
            unreachable!()
        };

        let connector = build_connector(policy)?;
        let mut config = connector.configure().map_err(ssl_error)?;
        config.set_use_server_name_indication(policy.use_sni);
        config.set_verify_hostname(
            policy.verify_peer && policy.verify_hostname,
        );

        // A failed handshake leaves the stream closed; the session is
        // unusable afterwards regardless.
        let stream = config
            .connect(server_name, socket)
            .map_err(handshake_error)?;
        self.stream = Stream::Tls(Box::new(stream));

        let info = self.crypto_info().unwrap_or_default();
        self.transcript.borrow_mut().note(format_args!(
            "TLS established: {} {} ({} bits)",
            info.protocol.as_deref().unwrap_or("?"),
            info.cipher_name.as_deref().unwrap_or("?"),
            info.cipher_bits.unwrap_or(0),
        ));

        Ok(())
    }

    pub fn is_encrypted(&self) -> bool {
        matches!(self.stream, Stream::Tls(_))
    }

    /// TLS session parameters, once a handshake has completed.
    pub fn crypto_info(&self) -> Option<CryptoInfo> {
        let Stream::Tls(ref stream) = self.stream else {
            return None;
        };

        let ssl = stream.ssl();
        let cipher = ssl.current_cipher();
        Some(CryptoInfo {
            protocol: Some(ssl.version_str().to_owned()),
            cipher_name: cipher.map(|c| c.name().to_owned()),
            cipher_bits: cipher.map(|c| c.bits().algorithm),
            cipher_version: cipher.map(|c| c.version().to_owned()),
        })
    }

    /// Releases the socket. Safe to call more than once.
    pub fn close(&mut self) {
        self.stream = Stream::Closed;
        self.buffer.clear();
    }
}

impl LineSource for Transport {
    fn next_line(&mut self) -> Result<Option<String>, Error> {
        self.read_line()
    }
}

fn build_connector(policy: &TlsPolicy) -> Result<SslConnector, Error> {
    let mut builder =
        SslConnector::builder(SslMethod::tls_client()).map_err(ssl_error)?;

    // allow_self_signed drops verification entirely: the observation
    // commands want the dialogue, not an opinion on the certificate.
    if policy.verify_peer && !policy.allow_self_signed {
        builder.set_verify(SslVerifyMode::PEER);
        if let Some(ref ca_bundle) = policy.ca_bundle {
            builder.set_ca_file(ca_bundle).map_err(ssl_error)?;
        }
    } else {
        builder.set_verify(SslVerifyMode::NONE);
    }

    builder
        .set_min_proto_version(policy.min_protocol)
        .and_then(|()| builder.set_max_proto_version(policy.max_protocol))
        .map_err(ssl_error)?;
    builder.set_options(SslOptions::NO_COMPRESSION);

    Ok(builder.build())
}

fn ssl_error(e: openssl::error::ErrorStack) -> Error {
    Error::Crypto(e.to_string())
}

fn handshake_error(e: HandshakeError<TcpStream>) -> Error {
    match e {
        HandshakeError::SetupFailure(stack) => ssl_error(stack),
        HandshakeError::Failure(mid) => {
            let error = mid.error();
            let verify = mid.ssl().verify_result();
            if openssl::x509::X509VerifyResult::OK != verify {
                Error::Crypto(format!(
                    "certificate verification failed: {}",
                    verify.error_string(),
                ))
            } else {
                Error::Crypto(error.to_string())
            }
        },
        // Only possible on non-blocking sockets.
        HandshakeError::WouldBlock(_) => unreachable!(),
    }
}

#[cfg(test)]
mod test {
    use std::io::{BufRead, BufReader, Write};
    use std::net::TcpListener;
    use std::thread;

    use super::*;
    use crate::smtp::endpoint::{ConnectionType, Endpoint, TlsPolicy};

    fn local_endpoint(port: u16) -> Endpoint {
        Endpoint::new(
            "127.0.0.1",
            port,
            ConnectionType::PlainText,
            TlsPolicy::observe(),
        )
        .unwrap()
    }

    fn open_pair() -> (Transport, TcpStream) {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        let accept = thread::spawn(move || listener.accept().unwrap().0);

        let transport = Transport::open(
            &local_endpoint(port),
            Rc::new(RefCell::new(Transcript::new())),
            Duration::from_secs(5),
            Duration::from_secs(5),
        )
        .unwrap();
        (transport, accept.join().unwrap())
    }

    #[test]
    fn reads_crlf_and_bare_lf_lines() {
        let (mut transport, mut server) = open_pair();
        server.write_all(b"220 ready\r\n250 ok\npartial").unwrap();
        drop(server);

        assert_eq!(Some("220 ready".to_owned()), transport.read_line().unwrap());
        assert_eq!(Some("250 ok".to_owned()), transport.read_line().unwrap());
        assert_eq!(Some("partial".to_owned()), transport.read_line().unwrap());
        assert_eq!(None, transport.read_line().unwrap());
    }

    #[test]
    fn writes_append_crlf() {
        let (mut transport, server) = open_pair();
        transport.write_line("EHLO librarymarket.com").unwrap();
        transport.close();

        let mut line = String::new();
        BufReader::new(server).read_line(&mut line).unwrap();
        assert_eq!("EHLO librarymarket.com\r\n", line);
    }

    #[test]
    fn embedded_line_breaks_rejected() {
        let (mut transport, _server) = open_pair();
        assert_matches!(
            Err(Error::InvalidArgument(..)),
            transport.write_line("MAIL FROM:<a@b>\r\nRCPT TO:<c@d>")
        );
        assert_matches!(
            Err(Error::InvalidArgument(..)),
            transport.write_line("NOOP\n")
        );
    }

    #[test]
    fn transcript_marks_direction_and_redacts() {
        let (mut transport, mut server) = open_pair();
        server.write_all(b"220 hello\r\n").unwrap();

        transport.read_line().unwrap();
        transport.write_line("EHLO librarymarket.com").unwrap();
        transport.set_redact_client(true);
        transport.write_line("c2VjcmV0").unwrap();
        transport.set_redact_client(false);

        let transcript = transport.transcript.borrow();
        assert_eq!(
            "220 hello\n\
             ~> EHLO librarymarket.com\n\
             ~> (hidden auth reply)\n",
            transcript.as_str()
        );
        assert!(!transcript.as_str().contains("c2VjcmV0"));
    }

    #[test]
    fn close_is_idempotent() {
        let (mut transport, _server) = open_pair();
        transport.close();
        transport.close();
        assert_matches!(Err(Error::Read(..)), transport.read_line());
    }

    #[test]
    fn connect_to_unresolvable_host_fails() {
        let endpoint = Endpoint::new(
            "nonexistent.invalid",
            587,
            ConnectionType::PlainText,
            TlsPolicy::observe(),
        )
        .unwrap();
        assert_matches!(
            Err(Error::Connect(..)),
            Transport::open(
                &endpoint,
                Rc::new(RefCell::new(Transcript::new())),
                Duration::from_millis(500),
                Duration::from_millis(500),
            )
        );
    }
}
