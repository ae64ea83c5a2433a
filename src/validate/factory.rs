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

use crate::smtp::endpoint::{ConnectionType, Endpoint, TlsPolicy};
use crate::smtp::session::Session;
use crate::support::error::Error;

/// Produces the fresh session each check runs against.
///
/// Checks never share a connection; this seam hands each one its own
/// unconnected session, optionally with a different connection type than
/// the configured one (the plaintext check depends on that).
pub trait SessionFactory {
    fn session(
        &self,
        connection_type: ConnectionType,
    ) -> Result<Session, Error>;

    /// The connection type the operator asked to be validated.
    fn connection_type(&self) -> ConnectionType;
}

/// The real, network-backed factory.
pub struct NetFactory {
    pub host: String,
    pub port: u16,
    pub connection_type: ConnectionType,
    pub tls: TlsPolicy,
}

impl SessionFactory for NetFactory {
    fn session(
        &self,
        connection_type: ConnectionType,
    ) -> Result<Session, Error> {
        let endpoint = Endpoint::new(
            self.host.clone(),
            self.port,
            connection_type,
            self.tls.clone(),
        )?;
        Ok(Session::new(endpoint))
    }

    fn connection_type(&self) -> ConnectionType {
        self.connection_type
    }
}
