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

use std::fmt;
use std::net::IpAddr;
use std::path::PathBuf;
use std::str::FromStr;

use lazy_static::lazy_static;
use openssl::ssl::SslVersion;
use regex::Regex;

use crate::support::error::Error;

/// How the transport layer reaches (and possibly encrypts) the endpoint.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ConnectionType {
    /// Start in cleartext; upgrade via STARTTLS if the server offers it.
    Auto,
    /// Cleartext only, even if the server offers STARTTLS.
    PlainText,
    /// Cleartext connect, mandatory STARTTLS upgrade.
    StartTls,
    /// Implicit TLS from the first byte.
    Tls,
}

impl ConnectionType {
    pub fn as_str(self) -> &'static str {
        match self {
            ConnectionType::Auto => "auto",
            ConnectionType::PlainText => "plain",
            ConnectionType::StartTls => "starttls",
            ConnectionType::Tls => "tls",
        }
    }
}

impl fmt::Display for ConnectionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for ConnectionType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, String> {
        match s.to_ascii_lowercase().as_str() {
            "auto" => Ok(ConnectionType::Auto),
            "none" | "plain" => Ok(ConnectionType::PlainText),
            "starttls" => Ok(ConnectionType::StartTls),
            "tls" => Ok(ConnectionType::Tls),
            _ => Err(format!(
                "unknown encryption type '{}' \
                 (expected auto, none, plain, starttls or tls)",
                s
            )),
        }
    }
}

/// Certificate and protocol policy applied to TLS handshakes, whether from
/// implicit TLS or a STARTTLS upgrade.
#[derive(Clone, Debug)]
pub struct TlsPolicy {
    pub verify_peer: bool,
    pub verify_hostname: bool,
    pub allow_self_signed: bool,
    /// PEM bundle of trusted roots. `None` uses the default verify paths of
    /// the linked OpenSSL.
    pub ca_bundle: Option<PathBuf>,
    pub min_protocol: Option<SslVersion>,
    pub max_protocol: Option<SslVersion>,
    pub use_sni: bool,
}

impl TlsPolicy {
    /// Full verification, as used by the `validate` command.
    pub fn strict() -> Self {
        TlsPolicy {
            verify_peer: true,
            verify_hostname: true,
            allow_self_signed: false,
            ca_bundle: None,
            min_protocol: None,
            max_protocol: None,
            use_sni: true,
        }
    }

    /// No verification at all, as used by the `probe:*` commands, whose job
    /// is to observe whatever the server presents.
    pub fn observe() -> Self {
        TlsPolicy {
            verify_peer: false,
            verify_hostname: false,
            allow_self_signed: true,
            ca_bundle: None,
            min_protocol: None,
            max_protocol: None,
            use_sni: true,
        }
    }
}

lazy_static! {
    // One dot-separated label chain, letters/digits/hyphens, no hyphen at
    // either end of a label, optional trailing dot.
    static ref RX_HOST_NAME: Regex = Regex::new(
        "^[A-Za-z0-9]([A-Za-z0-9-]*[A-Za-z0-9])?\
         (\\.[A-Za-z0-9]([A-Za-z0-9-]*[A-Za-z0-9])?)*\\.?$"
    )
    .unwrap();
}

/// The server to be probed, validated at construction.
///
/// `host` is kept as given (resolution happens at connect time); this only
/// rejects inputs which could never name a server.
#[derive(Clone, Debug)]
pub struct Endpoint {
    pub host: String,
    pub port: u16,
    pub connection_type: ConnectionType,
    pub tls: TlsPolicy,
}

impl Endpoint {
    pub fn new(
        host: impl Into<String>,
        port: u16,
        connection_type: ConnectionType,
        tls: TlsPolicy,
    ) -> Result<Self, Error> {
        let host = host.into();
        if 0 == port {
            return Err(Error::InvalidArgument(
                "port must be between 1 and 65535".to_owned(),
            ));
        }

        if !is_valid_host(&host) {
            return Err(Error::InvalidArgument(format!(
                "'{}' is neither an IP address nor a host name",
                host
            )));
        }

        Ok(Endpoint {
            host,
            port,
            connection_type,
            tls,
        })
    }
}

fn is_valid_host(host: &str) -> bool {
    if host.is_empty() || host.len() > 253 {
        return false;
    }

    host.parse::<IpAddr>().is_ok() || RX_HOST_NAME.is_match(host)
}

#[cfg(test)]
mod test {
    use super::*;

    fn endpoint(host: &str, port: u16) -> Result<Endpoint, Error> {
        Endpoint::new(host, port, ConnectionType::Auto, TlsPolicy::observe())
    }

    #[test]
    fn port_zero_rejected() {
        assert_matches!(
            Err(Error::InvalidArgument(..)),
            endpoint("mail.example.com", 0)
        );
    }

    #[test]
    fn host_validation() {
        assert!(endpoint("mail.example.com", 587).is_ok());
        assert!(endpoint("localhost", 587).is_ok());
        assert!(endpoint("127.0.0.1", 587).is_ok());
        assert!(endpoint("::1", 587).is_ok());
        assert!(endpoint("mail.example.com.", 587).is_ok());

        assert_matches!(Err(Error::InvalidArgument(..)), endpoint("", 587));
        assert_matches!(
            Err(Error::InvalidArgument(..)),
            endpoint("not a host", 587)
        );
        assert_matches!(
            Err(Error::InvalidArgument(..)),
            endpoint("-bad.example.com", 587)
        );
        assert_matches!(
            Err(Error::InvalidArgument(..)),
            endpoint("mail..example.com", 587)
        );
    }

    #[test]
    fn connection_type_parsing() {
        assert_eq!(Ok(ConnectionType::Auto), "auto".parse());
        assert_eq!(Ok(ConnectionType::PlainText), "none".parse());
        assert_eq!(Ok(ConnectionType::PlainText), "plain".parse());
        assert_eq!(Ok(ConnectionType::StartTls), "STARTTLS".parse());
        assert_eq!(Ok(ConnectionType::Tls), "tls".parse());
        assert!("quic".parse::<ConnectionType>().is_err());
    }
}
