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
use std::fmt::Write as _;

/// Substituted for client lines written while the authentication guard is
/// active, so credential material never lands in diagnostic output.
pub const HIDDEN_AUTH_REPLY: &str = "(hidden auth reply)";

/// Append-only log of the wire dialogue, kept for diagnostics.
///
/// Server lines are recorded verbatim, client lines with a `~> ` marker,
/// and out-of-band events (such as TLS handshakes) as `<> ` notes. Growth
/// is unbounded, which is fine for a tool that talks to one server and
/// exits.
#[derive(Debug, Default)]
pub struct Transcript {
    buffer: String,
}

impl Transcript {
    pub fn new() -> Self {
        Transcript::default()
    }

    pub fn server_line(&mut self, line: &str) {
        let _ = writeln!(self.buffer, "{}", line);
    }

    pub fn client_line(&mut self, line: &str) {
        let _ = writeln!(self.buffer, "~> {}", line);
    }

    pub fn note(&mut self, args: fmt::Arguments<'_>) {
        let _ = writeln!(self.buffer, "<> {}", args);
    }

    pub fn as_str(&self) -> &str {
        &self.buffer
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn lines_are_marked_by_origin() {
        let mut transcript = Transcript::new();
        transcript.server_line("220 mail.example ESMTP");
        transcript.client_line("EHLO librarymarket.com");
        transcript.note(format_args!("TLS handshake with mail.example"));

        assert_eq!(
            "220 mail.example ESMTP\n\
             ~> EHLO librarymarket.com\n\
             <> TLS handshake with mail.example\n",
            transcript.as_str()
        );
    }
}
