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

use crate::support::error::Error;

/// Cap on lines consumed for a single reply, so a misbehaving server
/// cannot hold the dialogue open forever.
const MAX_REPLY_LINES: usize = 1000;

/// Anything that yields reply lines; `Ok(None)` is clean end of stream.
///
/// The transport implements this against the socket; tests implement it
/// against canned line vectors.
pub trait LineSource {
    fn next_line(&mut self) -> Result<Option<String>, Error>;
}

impl LineSource for Vec<String> {
    fn next_line(&mut self) -> Result<Option<String>, Error> {
        if self.is_empty() {
            Ok(None)
        } else {
            Ok(Some(self.remove(0)))
        }
    }
}

/// One SMTP reply, per RFC 5321 §4.2.
///
/// `code` is the status of the first well-formed line; it is `None` when
/// the stream ended (or the line cap was hit) before a terminating line
/// arrived, which callers surface as a protocol failure appropriate to
/// where they are in the dialogue.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Reply {
    pub code: Option<u16>,
    pub lines: Vec<String>,
}

impl Reply {
    pub fn code_is(&self, code: u16) -> bool {
        Some(code) == self.code
    }

    /// Reads lines from `src` until a well-formed terminating line.
    ///
    /// Lines whose first four characters are not `[2-5][0-5][0-9]`
    /// followed by space or `-` are skipped; only well-formed lines can
    /// terminate the reply. I/O errors propagate as-is.
    pub fn read(src: &mut impl LineSource) -> Result<Reply, Error> {
        let mut code = None::<u16>;
        let mut lines = Vec::<String>::new();

        for _ in 0..MAX_REPLY_LINES {
            let Some(raw) = src.next_line()? else {
                break;
            };

            let Some(parsed) = parse_line(&raw) else {
                continue;
            };

            if code.is_none() {
                code = Some(parsed.code);
            }
            lines.push(parsed.text.to_owned());

            if parsed.last {
                return Ok(Reply { code, lines });
            }
        }

        // The server hung up (or babbled past the cap) mid-reply. Whatever
        // was collected is kept for diagnostics, but there is no code.
        Ok(Reply { code: None, lines })
    }
}

struct ParsedLine<'a> {
    code: u16,
    last: bool,
    text: &'a str,
}

fn parse_line(s: &str) -> Option<ParsedLine<'_>> {
    let code = s.get(0..3)?;
    let sep = s.get(3..4)?;
    let text = s.get(4..).unwrap_or("");

    let b = code.as_bytes();
    if !(b'2'..=b'5').contains(&b[0])
        || !(b'0'..=b'5').contains(&b[1])
        || !b[2].is_ascii_digit()
    {
        return None;
    }

    let code: u16 = code.parse().ok()?;
    let last = match sep {
        " " => true,
        "-" => false,
        _ => return None,
    };

    Some(ParsedLine { code, last, text })
}
