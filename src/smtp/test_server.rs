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

//! Scripted SMTP server used by the session and runner tests.
//!
//! A script is a list of steps per accepted connection: expected client
//! commands and canned replies, plus a step that performs the server side
//! of a TLS handshake with a throwaway self-signed certificate. After its
//! script, each connection is drained: a trailing QUIT is answered, any
//! other command is a test failure.

use std::io::{self, BufRead, BufReader, Read, Write};
use std::net::{TcpListener, TcpStream};
use std::thread::{self, JoinHandle};

use lazy_static::lazy_static;
use openssl::ssl::{SslAcceptor, SslMethod, SslStream};

lazy_static! {
    static ref SERVER_KEY: openssl::pkey::PKey<openssl::pkey::Private> =
        openssl::pkey::PKey::from_rsa(
            openssl::rsa::Rsa::generate(2048).unwrap()
        )
        .unwrap();
    static ref SERVER_CERT: openssl::x509::X509 = {
        let mut builder = openssl::x509::X509Builder::new().unwrap();
        builder.set_version(2).unwrap();
        builder.set_pubkey(&SERVER_KEY).unwrap();
        builder
            .set_not_before(&openssl::asn1::Asn1Time::from_unix(0).unwrap())
            .unwrap();
        builder
            .set_not_after(&openssl::asn1::Asn1Time::days_from_now(2).unwrap())
            .unwrap();
        builder
            .sign(&SERVER_KEY, openssl::hash::MessageDigest::sha256())
            .unwrap();
        builder.build()
    };
}

#[derive(Clone, Debug)]
pub(crate) enum Step {
    /// Expect exactly this command line from the client.
    Expect(String),
    /// Expect a command line starting with this prefix.
    ExpectPrefix(String),
    /// Expect some command line, contents ignored.
    ExpectAny,
    /// Send these line(s); CRLF is appended, embedded `\r\n` allowed.
    Send(String),
    /// Perform the server side of a TLS handshake.
    StartTls,
    /// Drop the connection immediately, skipping the drain phase.
    Close,
}

/// Expect the exact command `line`.
pub(crate) fn c(line: &str) -> Step {
    Step::Expect(line.to_owned())
}

/// Expect a command starting with `prefix`.
pub(crate) fn cp(prefix: &str) -> Step {
    Step::ExpectPrefix(prefix.to_owned())
}

/// Send the reply `text`.
pub(crate) fn r(text: &str) -> Step {
    Step::Send(text.to_owned())
}

pub(crate) struct ScriptedServer {
    port: u16,
    handle: JoinHandle<Result<(), String>>,
}

impl ScriptedServer {
    /// Starts a server which accepts one connection per script, in order.
    pub(crate) fn start(scripts: Vec<Vec<Step>>) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();

        let handle = thread::spawn(move || {
            for (ix, script) in scripts.iter().enumerate() {
                let (socket, _) =
                    listener.accept().map_err(|e| e.to_string())?;
                run_script(socket, script)
                    .map_err(|e| format!("connection {}: {}", ix, e))?;
            }

            Ok(())
        });

        ScriptedServer { port, handle }
    }

    pub(crate) fn port(&self) -> u16 {
        self.port
    }

    /// Joins the server thread, panicking if any script was violated.
    pub(crate) fn finish(self) {
        match self.handle.join() {
            Ok(Ok(())) => (),
            Ok(Err(e)) => panic!("scripted server failed: {}", e),
            Err(_) => panic!("scripted server panicked"),
        }
    }
}

enum Conn {
    Plain(BufReader<TcpStream>),
    Tls(BufReader<SslStream<TcpStream>>),
}

impl Conn {
    fn read_line(&mut self) -> Result<Option<String>, String> {
        fn read_from(
            reader: &mut BufReader<impl Read>,
        ) -> Result<Option<String>, String> {
            let mut line = String::new();
            match reader.read_line(&mut line) {
                Ok(0) => Ok(None),
                Ok(_) => {
                    Ok(Some(line.trim_end_matches(['\r', '\n']).to_owned()))
                },
                Err(e) => Err(e.to_string()),
            }
        }

        match *self {
            Conn::Plain(ref mut reader) => read_from(reader),
            Conn::Tls(ref mut reader) => read_from(reader),
        }
    }

    fn write_all(&mut self, data: &[u8]) -> io::Result<()> {
        match *self {
            Conn::Plain(ref mut reader) => {
                reader.get_mut().write_all(data)
            },
            Conn::Tls(ref mut reader) => reader.get_mut().write_all(data),
        }
    }
}

fn run_script(socket: TcpStream, steps: &[Step]) -> Result<(), String> {
    let mut conn = Conn::Plain(BufReader::new(socket));

    for step in steps {
        match *step {
            Step::Expect(ref expected) => {
                let line = conn
                    .read_line()?
                    .ok_or("connection closed before expected command")?;
                if line != *expected {
                    return Err(format!(
                        "expected command {:?}, got {:?}",
                        expected, line
                    ));
                }
            },

            Step::ExpectPrefix(ref prefix) => {
                let line = conn
                    .read_line()?
                    .ok_or("connection closed before expected command")?;
                if !line.starts_with(prefix) {
                    return Err(format!(
                        "expected command starting {:?}, got {:?}",
                        prefix, line
                    ));
                }
            },

            Step::ExpectAny => {
                conn.read_line()?
                    .ok_or("connection closed before expected command")?;
            },

            Step::Send(ref text) => {
                conn.write_all(format!("{}\r\n", text).as_bytes())
                    .map_err(|e| e.to_string())?;
            },

            Step::StartTls => {
                let Conn::Plain(reader) = conn else {
                    return Err("already in TLS".to_owned());
                };

                let mut builder = SslAcceptor::mozilla_intermediate_v5(
                    SslMethod::tls_server(),
                )
                .unwrap();
                builder.set_private_key(&SERVER_KEY).unwrap();
                builder.set_certificate(&SERVER_CERT).unwrap();
                let acceptor = builder.build();

                let stream = acceptor
                    .accept(reader.into_inner())
                    .map_err(|e| format!("TLS accept failed: {}", e))?;
                conn = Conn::Tls(BufReader::new(stream));
            },

            Step::Close => return Ok(()),
        }
    }

    // Drain. The client is allowed to QUIT (and gets an answer) or to just
    // hang up; anything else indicates the script is out of sync.
    loop {
        match conn.read_line()? {
            None => return Ok(()),
            Some(line) if "QUIT" == line => {
                let _ = conn.write_all(b"221 2.0.0 Bye\r\n");
            },
            Some(line) => {
                return Err(format!("unexpected trailing command {:?}", line));
            },
        }
    }
}
