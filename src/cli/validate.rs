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

use super::main::ValidateSubcommand;
use crate::smtp::endpoint::{ConnectionType, TlsPolicy};
use crate::smtp::sasl::Credentials;
use crate::smtp::session::is_valid_mailbox;
use crate::support::sysexits::*;
use crate::validate::factory::{NetFactory, SessionFactory};
use crate::validate::runner::{battery_passed, run_battery, CheckContext};

pub(super) fn main(cmd: ValidateSubcommand) {
    if !cmd.sender.is_empty() && !is_valid_mailbox(&cmd.sender) {
        die!(
            EX_USAGE,
            "--sender '{}' is not a valid mailbox address",
            cmd.sender
        );
    }

    let mut tls = TlsPolicy::strict();
    tls.ca_bundle = cmd.ca_bundle.clone();

    let factory = NetFactory {
        host: cmd.common.host.clone(),
        port: cmd.common.port,
        connection_type: if cmd.tls {
            ConnectionType::Tls
        } else {
            ConnectionType::StartTls
        },
        tls,
    };

    // Surface bad host/port syntax as a usage error before any check
    // reports a confusing connection failure.
    if let Err(e) = factory.session(factory.connection_type()) {
        die!(EX_USAGE, "{}", e);
    }

    let cx = CheckContext {
        factory: &factory,
        sender: &cmd.sender,
        credentials: Credentials::new(cmd.username, cmd.password),
        connect_timeout: cmd.common.connect_timeout(),
        io_timeout: cmd.common.io_timeout(),
        continue_after_failure: !cmd.stop_on_failure,
    };

    let reports = run_battery(&cx, cmd.strict);

    for report in &reports {
        match report.result {
            Ok(()) => println!("{} ... PASS", report.description),
            Err(ref failure) => {
                println!("{} ... FAIL", report.description);
                eprintln!(
                    "Debug Log ({}): {}",
                    report.description, failure.reason
                );
                if let Some(ref transcript) = failure.transcript {
                    eprintln!("[");
                    for line in transcript.lines() {
                        eprintln!("  {}", line);
                    }
                    eprintln!("]");
                }
            },
        }
    }

    if !battery_passed(&reports) {
        EX_UNAVAILABLE.exit();
    }
}
