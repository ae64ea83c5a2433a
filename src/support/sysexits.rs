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

//! The subset of `sysexits.h` used by the CLI.
//!
//! Scripts wrapping the tool can distinguish argument mistakes from the
//! server actually failing its checks by inspecting the exit code.

#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Debug)]
pub struct Sysexit(pub i32);

/// Command line mistake: bad flags, bad host/port syntax, bad sender.
pub const EX_USAGE: Sysexit = Sysexit(64);
/// Host name did not resolve.
pub const EX_NOHOST: Sysexit = Sysexit(68);
/// The endpoint failed a compliance check or refused the connection.
pub const EX_UNAVAILABLE: Sysexit = Sysexit(69);
/// Internal bug, e.g. a SASL state machine driven out of sequence.
pub const EX_SOFTWARE: Sysexit = Sysexit(70);
/// Transport I/O failed mid-dialogue, including timeouts.
pub const EX_IOERR: Sysexit = Sysexit(74);
/// The server spoke, but not valid SMTP.
pub const EX_PROTOCOL: Sysexit = Sysexit(76);

impl Sysexit {
    pub fn exit(self) -> ! {
        std::process::exit(self.0)
    }
}
