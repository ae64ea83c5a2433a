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

use std::io;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("Connection failed: {0}")]
    Connect(#[source] io::Error),
    #[error("Session is already connected")]
    AlreadyConnected,
    #[error("TLS failure: {0}")]
    Crypto(String),
    #[error("Server does not advertise STARTTLS")]
    StartTlsUnsupported,
    #[error("Bad server greeting: {}", reply_summary(.code, .lines))]
    ServerGreeting {
        code: Option<u16>,
        lines: Vec<String>,
    },
    #[error("Client greeting rejected: {}", reply_summary(.code, .lines))]
    ClientGreeting {
        code: Option<u16>,
        lines: Vec<String>,
    },
    #[error("Read failed: {0}")]
    Read(#[source] io::Error),
    #[error("Write failed: {0}")]
    Write(#[source] io::Error),
    #[error("Unexpected server reply: {}", reply_summary(.code, .lines))]
    Protocol {
        code: Option<u16>,
        lines: Vec<String>,
    },
    #[error("Authentication failed: {}", reply_summary(.code, .lines))]
    Authentication {
        code: Option<u16>,
        lines: Vec<String>,
    },
    #[error("Server does not offer the {0} mechanism")]
    AuthenticationUnsupported(String),
    #[error("SASL mechanism misused: {0}")]
    MechanismMisuse(&'static str),
    #[error("Server requires a non-empty sender address")]
    SenderRequired,
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),
}

/// Renders the `{code, lines}` payload carried by the reply-shaped errors.
///
/// An absent code means the server never produced a well-formed reply line
/// before the stream ended.
fn reply_summary(code: &Option<u16>, lines: &[String]) -> String {
    match (code, lines.first()) {
        (Some(code), Some(line)) => format!("{} {}", code, line),
        (Some(code), None) => format!("{} <no text>", code),
        (None, _) => "no valid reply received".to_owned(),
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn reply_errors_render_code_and_first_line() {
        let e = Error::ServerGreeting {
            code: Some(554),
            lines: vec!["go away".to_owned(), "really".to_owned()],
        };
        assert_eq!("Bad server greeting: 554 go away", e.to_string());

        let e = Error::Protocol {
            code: None,
            lines: vec![],
        };
        assert_eq!(
            "Unexpected server reply: no valid reply received",
            e.to_string()
        );
    }
}
