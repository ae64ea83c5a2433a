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

//! The client side of one SMTP submission dialogue.
//!
//! A session advances through connect → greeting → EHLO (or HELO
//! fallback) → optional STARTTLS + second EHLO, after which the server
//! identity and extension table are frozen and the diagnostic operations
//! (submission probe, authentication) become available. Commands are
//! strictly serialized; there is no pipelining.

use std::cell::RefCell;
use std::collections::BTreeMap;
use std::fmt::Write as _;
use std::rc::Rc;
use std::time::Duration;

use lazy_static::lazy_static;
use log::debug;
use rand::rngs::OsRng;
use rand::RngCore;
use regex::Regex;

use super::codes::pc;
use super::endpoint::{ConnectionType, Endpoint};
use super::reply::Reply;
use super::sasl::Mechanism;
use super::transcript::Transcript;
use super::transport::{CryptoInfo, Transport};
use crate::support::error::Error;

/// The domain this client identifies as in EHLO/HELO.
pub const HELO_DOMAIN: &str = "librarymarket.com";

/// Domain of the throwaway recipient used by the submission probe.
const PROBE_RECIPIENT_DOMAIN: &str = "librarymarket.com";

/// ESMTP keyword → raw parameter tokens, as advertised by the last EHLO.
pub type ExtensionTable = BTreeMap<String, Vec<String>>;

lazy_static! {
    // addr-spec, restricted to the dot-atom form a submission probe can
    // meaningfully use.
    static ref RX_MAILBOX: Regex = Regex::new(
        "^[A-Za-z0-9!#$%&'*+/=?^_`{|}~.-]+\
         @[A-Za-z0-9]([A-Za-z0-9-]*[A-Za-z0-9])?\
         (\\.[A-Za-z0-9]([A-Za-z0-9-]*[A-Za-z0-9])?)*$"
    )
    .unwrap();
}

pub fn is_valid_mailbox(s: &str) -> bool {
    RX_MAILBOX.is_match(s)
}

/// 16 hex characters from 8 cryptographically random bytes.
pub fn random_hex_token() -> String {
    let mut bytes = [0u8; 8];
    OsRng.fill_bytes(&mut bytes);

    let mut hex = String::with_capacity(2 * bytes.len());
    for byte in bytes {
        let _ = write!(hex, "{:02x}", byte);
    }
    hex
}

pub struct Session {
    endpoint: Endpoint,
    transcript: Rc<RefCell<Transcript>>,
    transport: Option<Transport>,
    identity: Option<String>,
    extensions: Option<ExtensionTable>,
}

impl Session {
    pub fn new(endpoint: Endpoint) -> Self {
        Session {
            endpoint,
            transcript: Rc::new(RefCell::new(Transcript::new())),
            transport: None,
            identity: None,
            extensions: None,
        }
    }

    /// Opens the transport (including the implicit-TLS handshake for
    /// `ConnectionType::Tls`).
    pub fn connect(
        &mut self,
        connect_timeout: Duration,
        io_timeout: Duration,
    ) -> Result<(), Error> {
        if self.transport.is_some() {
            return Err(Error::AlreadyConnected);
        }

        debug!(
            "Connecting to {}:{} ({})",
            self.endpoint.host,
            self.endpoint.port,
            self.endpoint.connection_type,
        );
        self.transport = Some(Transport::open(
            &self.endpoint,
            Rc::clone(&self.transcript),
            connect_timeout,
            io_timeout,
        )?);
        Ok(())
    }

    /// Drives the dialogue from greeting to a frozen extension table.
    ///
    /// Reads the 220 greeting, negotiates EHLO (falling back to HELO,
    /// which leaves the table empty), and performs the STARTTLS upgrade
    /// demanded by the connection type: mandatory for `StartTls`,
    /// opportunistic for `Auto`. The EHLO repeated after an upgrade fully
    /// replaces the extension table.
    pub fn probe(&mut self) -> Result<(), Error> {
        let greeting = self.read_reply()?;
        if !greeting.code_is(pc::ServiceReady.code()) {
            return Err(Error::ServerGreeting {
                code: greeting.code,
                lines: greeting.lines,
            });
        }

        let identity = greeting
            .lines
            .first()
            .and_then(|line| line.split_whitespace().next())
            .unwrap_or_default()
            .to_owned();
        self.identity.get_or_insert(identity);

        let mut extensions = self.client_greeting()?;

        match self.endpoint.connection_type {
            ConnectionType::StartTls => {
                if !extensions.contains_key("STARTTLS") {
                    return Err(Error::StartTlsUnsupported);
                }

                extensions = self.upgrade_tls()?;
            },

            ConnectionType::Auto
                if extensions.contains_key("STARTTLS") =>
            {
                extensions = self.upgrade_tls()?;
            },

            _ => (),
        }

        self.extensions = Some(extensions);
        debug!(
            "Negotiation with {} complete (encrypted: {})",
            self.identity().unwrap_or("?"),
            self.is_encrypted(),
        );
        Ok(())
    }

    /// Determines whether the server demands authentication before
    /// accepting mail, by starting a transaction it never finishes.
    ///
    /// `sender` must be empty or a plausible mailbox address. The
    /// transaction is abandoned with a best-effort RSET either way so the
    /// session remains usable.
    pub fn is_authentication_required(
        &mut self,
        sender: &str,
    ) -> Result<bool, Error> {
        if self.extensions.is_none() {
            return Err(Error::InvalidArgument(
                "session has not been probed".to_owned(),
            ));
        }

        if !sender.is_empty() && !is_valid_mailbox(sender) {
            return Err(Error::InvalidArgument(format!(
                "'{}' is not a valid sender address",
                sender
            )));
        }

        let result = self.submission_probe(sender);

        // The RSET is advisory; its failure changes nothing about the
        // answer we already have.
        let _ = self
            .write_line("RSET")
            .and_then(|()| self.read_reply().map(|_| ()));

        result
    }

    fn submission_probe(&mut self, sender: &str) -> Result<bool, Error> {
        self.write_line(&format!("MAIL FROM:<{}>", sender))?;
        let mut reply = self.read_reply()?;

        if reply.code_is(pc::Ok.code()) {
            self.write_line(&format!(
                "RCPT TO:<{}@{}>",
                random_hex_token(),
                PROBE_RECIPIENT_DOMAIN,
            ))?;
            reply = self.read_reply()?;
        }

        match reply.code {
            Some(250) | Some(251) => Ok(false),
            Some(530) | Some(550) | Some(551) | Some(554) => Ok(true),
            Some(501) if sender.is_empty() => Err(Error::SenderRequired),
            code => Err(Error::Protocol {
                code,
                lines: reply.lines,
            }),
        }
    }

    /// Runs one AUTH attempt with the given mechanism.
    ///
    /// While `hide_auth_replies` is set, the client's challenge responses
    /// are redacted from the transcript. The mechanism is reset on every
    /// exit path so the caller can retry.
    pub fn authenticate(
        &mut self,
        mechanism: &mut Mechanism,
        hide_auth_replies: bool,
    ) -> Result<(), Error> {
        {
            let advertised = self
                .extensions
                .as_ref()
                .and_then(|table| table.get("AUTH"))
                .filter(|mechanisms| !mechanisms.is_empty())
                .ok_or_else(|| {
                    Error::AuthenticationUnsupported(
                        mechanism.name().to_owned(),
                    )
                })?;

            if !advertised
                .iter()
                .any(|name| name.eq_ignore_ascii_case(mechanism.name()))
            {
                return Err(Error::AuthenticationUnsupported(
                    mechanism.name().to_owned(),
                ));
            }
        }

        let result = self.auth_exchange(mechanism, hide_auth_replies);

        if let Some(ref mut transport) = self.transport {
            transport.set_redact_client(false);
        }
        mechanism.reset();

        result
    }

    fn auth_exchange(
        &mut self,
        mechanism: &mut Mechanism,
        hide_auth_replies: bool,
    ) -> Result<(), Error> {
        self.write_line(&format!("AUTH {}", mechanism.name()))?;
        if let Some(ref mut transport) = self.transport {
            transport.set_redact_client(hide_auth_replies);
        }

        loop {
            let reply = self.read_reply()?;
            match reply.code {
                Some(code) if pc::ServerChallenge.code() == code => {
                    let response = mechanism.respond(&reply.lines)?;
                    self.write_line(&response)?;
                },
                Some(code)
                    if pc::AuthenticationSucceeded.code() == code =>
                {
                    debug!("Authentication accepted");
                    return Ok(());
                },
                code => {
                    return Err(Error::Authentication {
                        code,
                        lines: reply.lines,
                    });
                },
            }
        }
    }

    /// Best-effort QUIT and close. Idempotent; also runs on drop.
    pub fn disconnect(&mut self) {
        if let Some(mut transport) = self.transport.take() {
            if transport.write_line("QUIT").is_ok() {
                let _ = Reply::read(&mut transport);
            }
            transport.close();
        }
    }

    /// The server's self-declared identity: the first whitespace-delimited
    /// token of the 220 greeting. Set by the first successful `probe`.
    pub fn identity(&self) -> Option<&str> {
        self.identity.as_deref()
    }

    /// The extension table, populated once `probe` has succeeded.
    pub fn extensions(&self) -> Option<&ExtensionTable> {
        self.extensions.as_ref()
    }

    /// Negotiated TLS parameters, if the stream is encrypted.
    pub fn crypto_info(&self) -> Option<CryptoInfo> {
        self.transport.as_ref().and_then(Transport::crypto_info)
    }

    pub fn is_encrypted(&self) -> bool {
        self.transport
            .as_ref()
            .is_some_and(Transport::is_encrypted)
    }

    /// The wire dialogue so far; survives `disconnect`.
    pub fn debug_transcript(&self) -> String {
        self.transcript.borrow().as_str().to_owned()
    }

    fn transport_mut(&mut self) -> Result<&mut Transport, Error> {
        self.transport.as_mut().ok_or_else(|| {
            Error::InvalidArgument("session is not connected".to_owned())
        })
    }

    fn write_line(&mut self, line: &str) -> Result<(), Error> {
        self.transport_mut()?.write_line(line)
    }

    fn read_reply(&mut self) -> Result<Reply, Error> {
        Reply::read(self.transport_mut()?)
    }

    /// EHLO, falling back to HELO when the server rejects it. HELO
    /// success yields an empty extension table.
    fn client_greeting(&mut self) -> Result<ExtensionTable, Error> {
        match self.ehlo() {
            Ok(extensions) => Ok(extensions),
            Err(e @ Error::ClientGreeting { .. }) => {
                debug!("EHLO rejected ({}); retrying with HELO", e);
                self.helo()?;
                Ok(ExtensionTable::new())
            },
            Err(e) => Err(e),
        }
    }

    fn ehlo(&mut self) -> Result<ExtensionTable, Error> {
        self.write_line(&format!("EHLO {}", HELO_DOMAIN))?;
        let reply = self.read_reply()?;
        if !reply.code_is(pc::Ok.code()) {
            return Err(Error::ClientGreeting {
                code: reply.code,
                lines: reply.lines,
            });
        }

        // The first line merely echoes the server identity; each further
        // line is an extension keyword plus parameters.
        let mut extensions = ExtensionTable::new();
        for line in reply.lines.iter().skip(1) {
            let mut tokens = line.split_whitespace();
            let Some(keyword) = tokens.next() else {
                continue;
            };

            extensions.insert(
                keyword.to_ascii_uppercase(),
                tokens.map(str::to_owned).collect(),
            );
        }

        Ok(extensions)
    }

    fn helo(&mut self) -> Result<(), Error> {
        self.write_line(&format!("HELO {}", HELO_DOMAIN))?;
        let reply = self.read_reply()?;
        if !reply.code_is(pc::Ok.code()) {
            return Err(Error::ClientGreeting {
                code: reply.code,
                lines: reply.lines,
            });
        }

        Ok(())
    }

    fn upgrade_tls(&mut self) -> Result<ExtensionTable, Error> {
        self.write_line("STARTTLS")?;
        let reply = self.read_reply()?;
        if !reply.code_is(pc::ServiceReady.code()) {
            return Err(Error::Crypto(match reply.code {
                Some(code) => format!(
                    "server rejected STARTTLS: {} {}",
                    code,
                    reply.lines.first().map(String::as_str).unwrap_or(""),
                ),
                None => "no reply to STARTTLS".to_owned(),
            }));
        }

        let policy = self.endpoint.tls.clone();
        let host = self.endpoint.host.clone();
        self.transport_mut()?.start_tls(&policy, &host)?;
        self.ehlo()
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        self.disconnect();
    }
}
