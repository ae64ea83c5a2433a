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

//! The fixed compliance battery run by the `validate` command.
//!
//! Every check obtains a fresh session from the factory, so no protocol
//! state leaks between checks and an I/O failure only poisons the check
//! that hit it. The battery is an explicit ordered table; there is no
//! registration magic.

use std::time::Duration;

use log::debug;

use super::factory::SessionFactory;
use crate::smtp::endpoint::ConnectionType;
use crate::smtp::sasl::{Credentials, Mechanism};
use crate::smtp::session::{random_hex_token, Session};
use crate::support::error::Error;

pub struct CheckContext<'a> {
    pub factory: &'a dyn SessionFactory,
    /// Envelope sender for the submission probes; may be empty.
    pub sender: &'a str,
    /// The credentials the server is supposed to accept.
    pub credentials: Credentials,
    pub connect_timeout: Duration,
    pub io_timeout: Duration,
    /// When unset, the battery stops at the first failing check.
    pub continue_after_failure: bool,
}

#[derive(Debug)]
pub struct CheckFailure {
    pub reason: String,
    pub transcript: Option<String>,
}

impl CheckFailure {
    fn new(reason: impl ToString) -> Self {
        CheckFailure {
            reason: reason.to_string(),
            transcript: None,
        }
    }

    fn with_session(reason: impl ToString, session: &Session) -> Self {
        CheckFailure {
            reason: reason.to_string(),
            transcript: Some(session.debug_transcript()),
        }
    }
}

#[derive(Debug)]
pub struct CheckReport {
    pub description: &'static str,
    pub result: Result<(), CheckFailure>,
}

impl CheckReport {
    pub fn passed(&self) -> bool {
        self.result.is_ok()
    }
}

pub fn battery_passed(reports: &[CheckReport]) -> bool {
    reports.iter().all(CheckReport::passed)
}

struct Check {
    description: &'static str,
    strict_only: bool,
    run: fn(&CheckContext<'_>) -> Result<(), CheckFailure>,
}

static CHECKS: &[Check] = &[
    Check {
        description: "plain-text connections do not offer AUTH",
        strict_only: true,
        run: check_plain_text_auth_disallowed,
    },
    Check {
        description: "negotiated TLS protocol is modern",
        strict_only: false,
        run: check_tls_protocol_modern,
    },
    Check {
        description: "server supports SMTP AUTH",
        strict_only: false,
        run: check_auth_supported,
    },
    Check {
        description: "server offers a compatible AUTH mechanism",
        strict_only: false,
        run: check_auth_mechanism_supported,
    },
    Check {
        description: "submission requires authentication",
        strict_only: false,
        run: check_auth_required_for_submission,
    },
    Check {
        description: "invalid credentials are rejected",
        strict_only: false,
        run: check_invalid_credentials_rejected,
    },
    Check {
        description: "valid credentials unlock submission",
        strict_only: false,
        run: check_valid_credentials_accepted,
    },
];

/// Runs the battery in canonical order and reports each outcome.
pub fn run_battery(
    cx: &CheckContext<'_>,
    strict: bool,
) -> Vec<CheckReport> {
    let mut reports = Vec::new();

    for check in CHECKS {
        if check.strict_only && !strict {
            continue;
        }

        debug!("Running check: {}", check.description);
        let result = (check.run)(cx);
        let failed = result.is_err();
        reports.push(CheckReport {
            description: check.description,
            result,
        });

        if failed && !cx.continue_after_failure {
            break;
        }
    }

    reports
}

/// Fresh session, connected and probed, or the failure with whatever
/// transcript accumulated.
fn open_probed(
    cx: &CheckContext<'_>,
    connection_type: ConnectionType,
) -> Result<Session, CheckFailure> {
    let mut session = cx
        .factory
        .session(connection_type)
        .map_err(CheckFailure::new)?;

    if let Err(e) = session.connect(cx.connect_timeout, cx.io_timeout) {
        return Err(CheckFailure::with_session(e, &session));
    }

    if let Err(e) = session.probe() {
        return Err(CheckFailure::with_session(e, &session));
    }

    Ok(session)
}

fn advertised_mechanisms(session: &Session) -> Vec<String> {
    session
        .extensions()
        .and_then(|table| table.get("AUTH"))
        .cloned()
        .unwrap_or_default()
}

fn check_plain_text_auth_disallowed(
    cx: &CheckContext<'_>,
) -> Result<(), CheckFailure> {
    // An implicit-TLS endpoint has no plain-text surface to inspect.
    if ConnectionType::Tls == cx.factory.connection_type() {
        return Ok(());
    }

    let session = open_probed(cx, ConnectionType::PlainText)?;
    if session
        .extensions()
        .is_some_and(|table| table.contains_key("AUTH"))
    {
        return Err(CheckFailure::with_session(
            "server offers AUTH before the connection is encrypted",
            &session,
        ));
    }

    Ok(())
}

fn check_tls_protocol_modern(
    cx: &CheckContext<'_>,
) -> Result<(), CheckFailure> {
    let session = open_probed(cx, cx.factory.connection_type())?;

    let Some(protocol) =
        session.crypto_info().and_then(|info| info.protocol)
    else {
        return Err(CheckFailure::with_session(
            "connection is not encrypted",
            &session,
        ));
    };

    if legacy_tls_protocol(&protocol) {
        return Err(CheckFailure::with_session(
            format!("legacy TLS protocol negotiated: {}", protocol),
            &session,
        ));
    }

    Ok(())
}

fn legacy_tls_protocol(protocol: &str) -> bool {
    "TLSv1" == protocol || "TLSv1.1" == protocol
}

fn check_auth_supported(cx: &CheckContext<'_>) -> Result<(), CheckFailure> {
    let session = open_probed(cx, cx.factory.connection_type())?;
    if session
        .extensions()
        .is_some_and(|table| table.contains_key("AUTH"))
    {
        Ok(())
    } else {
        Err(CheckFailure::with_session(
            "server does not advertise AUTH",
            &session,
        ))
    }
}

fn check_auth_mechanism_supported(
    cx: &CheckContext<'_>,
) -> Result<(), CheckFailure> {
    let session = open_probed(cx, cx.factory.connection_type())?;
    let mechanisms = advertised_mechanisms(&session);

    if Mechanism::select(&mechanisms, Credentials::new("", "")).is_some() {
        Ok(())
    } else {
        Err(CheckFailure::with_session(
            "no mutually supported AUTH mechanism \
             (need CRAM-MD5, LOGIN or PLAIN)",
            &session,
        ))
    }
}

fn check_auth_required_for_submission(
    cx: &CheckContext<'_>,
) -> Result<(), CheckFailure> {
    let mut session = open_probed(cx, cx.factory.connection_type())?;
    match session.is_authentication_required(cx.sender) {
        Ok(true) => Ok(()),
        Ok(false) => Err(CheckFailure::with_session(
            "server accepts submission without authentication",
            &session,
        )),
        Err(e) => Err(CheckFailure::with_session(e, &session)),
    }
}

fn check_invalid_credentials_rejected(
    cx: &CheckContext<'_>,
) -> Result<(), CheckFailure> {
    let mut session = open_probed(cx, cx.factory.connection_type())?;
    let mechanisms = advertised_mechanisms(&session);

    let credentials =
        Credentials::new(random_hex_token(), random_hex_token());
    let Some(mut mechanism) = Mechanism::select(&mechanisms, credentials)
    else {
        return Err(CheckFailure::with_session(
            "no mutually supported AUTH mechanism to try",
            &session,
        ));
    };

    match session.authenticate(&mut mechanism, true) {
        Err(Error::Authentication { .. }) => Ok(()),
        Ok(()) => Err(CheckFailure::with_session(
            "server accepted made-up credentials",
            &session,
        )),
        Err(e) => Err(CheckFailure::with_session(e, &session)),
    }
}

fn check_valid_credentials_accepted(
    cx: &CheckContext<'_>,
) -> Result<(), CheckFailure> {
    let mut session = open_probed(cx, cx.factory.connection_type())?;
    let mechanisms = advertised_mechanisms(&session);

    let Some(mut mechanism) =
        Mechanism::select(&mechanisms, cx.credentials.clone())
    else {
        return Err(CheckFailure::with_session(
            "no mutually supported AUTH mechanism to try",
            &session,
        ));
    };

    if let Err(e) = session.authenticate(&mut mechanism, true) {
        return Err(CheckFailure::with_session(e, &session));
    }

    match session.is_authentication_required(cx.sender) {
        Ok(false) => Ok(()),
        Ok(true) => Err(CheckFailure::with_session(
            "submission is still refused after authenticating",
            &session,
        )),
        Err(e) => Err(CheckFailure::with_session(e, &session)),
    }
}
