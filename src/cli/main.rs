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

use std::time::Duration;

use structopt::clap;
use structopt::StructOpt;

use crate::support::sysexits::*;

#[derive(StructOpt)]
#[structopt(max_term_width = 80)]
enum Command {
    /// Run the full compliance battery against a submission endpoint.
    ///
    /// Connects to the given host and port as a mail client would, using
    /// STARTTLS by default (--tls switches to implicit TLS), and verifies
    /// that the server demands authentication before accepting mail, that
    /// the offered SASL mechanisms are usable, that bogus credentials are
    /// rejected, and that the supplied credentials unlock submission.
    ///
    /// TLS certificates are fully verified against the CA bundle. Each
    /// check uses its own connection, so a failure never cascades into
    /// the following checks.
    ///
    /// The exit status is zero only if every check passed.
    Validate(ValidateSubcommand),
    /// Report the TLS parameters negotiated with the server.
    ///
    /// Connects, upgrades via STARTTLS when the server offers it (or
    /// speaks TLS from the first byte with --tls), and prints the
    /// negotiated protocol and cipher. Certificate verification is
    /// disabled: the point is to observe the server, not to judge it.
    #[structopt(name = "probe:encryption")]
    ProbeEncryption(ProbeEncryptionSubcommand),
    /// List the ESMTP extensions advertised by the server.
    ///
    /// Prints the keyword and parameters of every extension announced in
    /// response to EHLO, after any TLS negotiation selected with
    /// --encryption-type. Certificate verification is disabled.
    #[structopt(name = "probe:extensions")]
    ProbeExtensions(ProbeExtensionsSubcommand),
}

#[derive(StructOpt)]
pub(super) struct ConnectionOptions {
    /// Host name or IP address of the server
    pub(super) host: String,
    /// TCP port of the submission service
    pub(super) port: u16,
    /// Seconds to wait for the TCP connection
    #[structopt(long, default_value = "3")]
    pub(super) connect_timeout: f64,
    /// Seconds to wait for any single read or write
    #[structopt(long, default_value = "15")]
    pub(super) io_timeout: f64,
    /// Dump the wire dialogue to standard error as it happens
    #[structopt(long)]
    pub(super) trace: bool,
}

impl ConnectionOptions {
    pub(super) fn connect_timeout(&self) -> Duration {
        seconds_option(self.connect_timeout, "--connect-timeout")
    }

    pub(super) fn io_timeout(&self) -> Duration {
        seconds_option(self.io_timeout, "--io-timeout")
    }
}

fn seconds_option(value: f64, name: &str) -> Duration {
    if !value.is_finite() || value <= 0.0 {
        die!(EX_USAGE, "{} must be a positive number of seconds", name);
    }

    Duration::from_secs_f64(value)
}

#[derive(StructOpt)]
pub(super) struct ValidateSubcommand {
    #[structopt(flatten)]
    pub(super) common: ConnectionOptions,

    /// User name the server should accept
    pub(super) username: String,
    /// Password the server should accept
    pub(super) password: String,

    /// Also verify that plain-text connections offer no AUTH
    #[structopt(long)]
    pub(super) strict: bool,
    /// Use implicit TLS instead of STARTTLS
    #[structopt(long)]
    pub(super) tls: bool,
    /// Envelope sender for the submission probes [default: empty]
    #[structopt(long, default_value = "")]
    pub(super) sender: String,
    /// PEM bundle of trusted CA roots [default: the system store]
    #[structopt(long, parse(from_os_str))]
    pub(super) ca_bundle: Option<std::path::PathBuf>,
    /// Stop at the first failing check
    #[structopt(long)]
    pub(super) stop_on_failure: bool,
}

#[derive(StructOpt)]
pub(super) struct ProbeEncryptionSubcommand {
    #[structopt(flatten)]
    pub(super) common: ConnectionOptions,

    /// Use implicit TLS instead of opportunistic STARTTLS
    #[structopt(long)]
    pub(super) tls: bool,
    /// Output format: console, csv or json
    #[structopt(long, default_value = "console")]
    pub(super) format: super::probe::OutputFormat,
}

#[derive(StructOpt)]
pub(super) struct ProbeExtensionsSubcommand {
    #[structopt(flatten)]
    pub(super) common: ConnectionOptions,

    /// How to reach the server: auto, none, plain, starttls or tls
    #[structopt(long, default_value = "auto")]
    pub(super) encryption_type: crate::smtp::endpoint::ConnectionType,
    /// Output format: console, csv or json
    #[structopt(long, default_value = "console")]
    pub(super) format: super::probe::OutputFormat,
}

pub fn main() {
    // Clap exits with status 1 instead of EX_USAGE if we use the more
    // concise API
    let cmd = Command::from_clap(&match Command::clap().get_matches_safe() {
        Ok(matches) => matches,
        Err(
            e @ clap::Error {
                kind: clap::ErrorKind::HelpDisplayed,
                ..
            },
        )
        | Err(
            e @ clap::Error {
                kind: clap::ErrorKind::VersionDisplayed,
                ..
            },
        ) => {
            println!("{}", e.message);
            return;
        },
        Err(e) => {
            eprintln!("{}", e.message);
            EX_USAGE.exit()
        },
    });

    let trace = match cmd {
        Command::Validate(ref c) => c.common.trace,
        Command::ProbeEncryption(ref c) => c.common.trace,
        Command::ProbeExtensions(ref c) => c.common.trace,
    };
    crate::init_simple_log(if trace {
        log::LevelFilter::Trace
    } else {
        log::LevelFilter::Warn
    });

    match cmd {
        Command::Validate(cmd) => super::validate::main(cmd),
        Command::ProbeEncryption(cmd) => super::probe::encryption(cmd),
        Command::ProbeExtensions(cmd) => super::probe::extensions(cmd),
    }
}
