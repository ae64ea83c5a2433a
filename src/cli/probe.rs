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

use std::cmp::Reverse;
use std::fmt::Write as _;
use std::str::FromStr;

use super::main::{
    ConnectionOptions, ProbeEncryptionSubcommand, ProbeExtensionsSubcommand,
};
use crate::smtp::endpoint::{ConnectionType, Endpoint, TlsPolicy};
use crate::smtp::session::{ExtensionTable, Session};
use crate::support::error::Error;
use crate::support::sysexits::*;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(super) enum OutputFormat {
    Console,
    Csv,
    Json,
}

impl FromStr for OutputFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, String> {
        match s.to_ascii_lowercase().as_str() {
            "console" => Ok(OutputFormat::Console),
            "csv" => Ok(OutputFormat::Csv),
            "json" => Ok(OutputFormat::Json),
            _ => Err(format!(
                "unknown format '{}' (expected console, csv or json)",
                s
            )),
        }
    }
}

pub(super) fn encryption(cmd: ProbeEncryptionSubcommand) {
    let connection_type = if cmd.tls {
        ConnectionType::Tls
    } else {
        ConnectionType::Auto
    };
    let session = open_probed(&cmd.common, connection_type);

    let info = session.crypto_info().unwrap_or_default();
    let unknown = || "Unknown".to_owned();
    let rows = vec![
        ("protocol".to_owned(), info.protocol.unwrap_or_else(unknown)),
        (
            "cipher_name".to_owned(),
            info.cipher_name.unwrap_or_else(unknown),
        ),
        (
            "cipher_bits".to_owned(),
            info.cipher_bits
                .map(|bits| bits.to_string())
                .unwrap_or_else(unknown),
        ),
        (
            "cipher_version".to_owned(),
            info.cipher_version.unwrap_or_else(unknown),
        ),
    ];

    let output = match cmd.format {
        OutputFormat::Console => render_console(("Field", "Value"), &rows),
        OutputFormat::Csv => render_csv(("Field", "Value"), &rows),
        OutputFormat::Json => {
            let map: serde_json::Map<String, serde_json::Value> = rows
                .into_iter()
                .map(|(name, value)| {
                    (name, serde_json::Value::String(value))
                })
                .collect();
            serde_json::Value::Object(map).to_string() + "\n"
        },
    };
    print!("{}", output);
}

pub(super) fn extensions(cmd: ProbeExtensionsSubcommand) {
    let session = open_probed(&cmd.common, cmd.encryption_type);
    let table = session.extensions().cloned().unwrap_or_default();
    let entries = ordered_extensions(&table);

    let output = match cmd.format {
        OutputFormat::Console | OutputFormat::Csv => {
            let rows: Vec<(String, String)> = entries
                .into_iter()
                .map(|(keyword, params)| (keyword, params.join(" ")))
                .collect();
            match cmd.format {
                OutputFormat::Console => {
                    render_console(("Name", "Value"), &rows)
                },
                _ => render_csv(("Name", "Value"), &rows),
            }
        },
        OutputFormat::Json => {
            let map: serde_json::Map<String, serde_json::Value> = entries
                .into_iter()
                .map(|(keyword, params)| {
                    (
                        keyword,
                        serde_json::Value::Array(
                            params
                                .into_iter()
                                .map(serde_json::Value::String)
                                .collect(),
                        ),
                    )
                })
                .collect();
            serde_json::Value::Object(map).to_string() + "\n"
        },
    };
    print!("{}", output);
}

/// Keywords ascending, then stably re-ordered so the keywords with the
/// most parameters come first.
fn ordered_extensions(
    table: &ExtensionTable,
) -> Vec<(String, Vec<String>)> {
    // BTreeMap iteration is already in ascending keyword order.
    let mut entries: Vec<(String, Vec<String>)> = table
        .iter()
        .map(|(keyword, params)| (keyword.clone(), params.clone()))
        .collect();
    entries.sort_by_key(|(_, params)| Reverse(params.len()));
    entries
}

fn open_probed(
    common: &ConnectionOptions,
    connection_type: ConnectionType,
) -> Session {
    let endpoint = match Endpoint::new(
        common.host.clone(),
        common.port,
        connection_type,
        TlsPolicy::observe(),
    ) {
        Ok(endpoint) => endpoint,
        Err(e) => die!(EX_USAGE, "{}", e),
    };

    let mut session = Session::new(endpoint);
    if let Err(e) =
        session.connect(common.connect_timeout(), common.io_timeout())
    {
        die_with(e);
    }
    if let Err(e) = session.probe() {
        die_with(e);
    }

    session
}

fn die_with(e: Error) -> ! {
    let ex = match e {
        Error::Connect(ref source)
            if std::io::ErrorKind::NotFound == source.kind() =>
        {
            EX_NOHOST
        },
        Error::Connect(..) => EX_UNAVAILABLE,
        Error::Read(..) | Error::Write(..) => EX_IOERR,
        Error::InvalidArgument(..) => EX_USAGE,
        Error::MechanismMisuse(..) => EX_SOFTWARE,
        _ => EX_PROTOCOL,
    };
    die!(ex, "Error: {}", e)
}

fn render_console(
    header: (&str, &str),
    rows: &[(String, String)],
) -> String {
    let name_width = rows
        .iter()
        .map(|(name, _)| name.len())
        .chain(std::iter::once(header.0.len()))
        .max()
        .unwrap();
    let value_width = rows
        .iter()
        .map(|(_, value)| value.len())
        .chain(std::iter::once(header.1.len()))
        .max()
        .unwrap();

    let mut out = String::new();
    let rule = format!(
        "+-{:-<nw$}-+-{:-<vw$}-+\n",
        "",
        "",
        nw = name_width,
        vw = value_width,
    );

    out.push_str(&rule);
    let _ = writeln!(
        out,
        "| {:<nw$} | {:<vw$} |",
        header.0,
        header.1,
        nw = name_width,
        vw = value_width,
    );
    out.push_str(&rule);
    for (name, value) in rows {
        let _ = writeln!(
            out,
            "| {:<nw$} | {:<vw$} |",
            name,
            value,
            nw = name_width,
            vw = value_width,
        );
    }
    out.push_str(&rule);

    out
}

fn render_csv(header: (&str, &str), rows: &[(String, String)]) -> String {
    let mut out = format!("{},{}\n", header.0, header.1);
    for (name, value) in rows {
        let _ =
            writeln!(out, "{},{}", csv_field(name), csv_field(value));
    }
    out
}

fn csv_field(s: &str) -> String {
    if s.contains([',', '"', '\n', '\r']) {
        format!("\"{}\"", s.replace('"', "\"\""))
    } else {
        s.to_owned()
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn rows() -> Vec<(String, String)> {
        vec![
            ("protocol".to_owned(), "TLSv1.3".to_owned()),
            ("cipher_name".to_owned(), "TLS_AES_256_GCM_SHA384".to_owned()),
            ("cipher_bits".to_owned(), "256".to_owned()),
            ("cipher_version".to_owned(), "Unknown".to_owned()),
        ]
    }

    #[test]
    fn console_table_is_framed_and_aligned() {
        let table = render_console(("Field", "Value"), &rows());
        let lines: Vec<&str> = table.lines().collect();

        assert_eq!(8, lines.len());
        assert!(lines[0].starts_with("+-"));
        assert_eq!(lines[0], lines[2]);
        assert_eq!(lines[0], lines[7]);
        assert!(lines[1].contains("Field"));
        assert!(lines[3].contains("TLSv1.3"));
        assert!(lines
            .iter()
            .all(|line| line.len() == lines[0].len()));
    }

    #[test]
    fn csv_has_header_and_quotes_only_when_needed() {
        let mut rows = rows();
        rows.push(("odd".to_owned(), "a,b \"c\"".to_owned()));
        let csv = render_csv(("Field", "Value"), &rows);
        let lines: Vec<&str> = csv.lines().collect();

        assert_eq!("Field,Value", lines[0]);
        assert_eq!("protocol,TLSv1.3", lines[1]);
        assert_eq!("odd,\"a,b \"\"c\"\"\"", lines[5]);
    }

    #[test]
    fn extension_ordering() {
        let mut table = ExtensionTable::new();
        table.insert(
            "AUTH".to_owned(),
            vec!["PLAIN".to_owned(), "LOGIN".to_owned()],
        );
        table.insert("PIPELINING".to_owned(), vec![]);
        table.insert("SIZE".to_owned(), vec!["10485760".to_owned()]);
        table.insert("8BITMIME".to_owned(), vec![]);

        let ordered: Vec<String> = ordered_extensions(&table)
            .into_iter()
            .map(|(keyword, _)| keyword)
            .collect();

        // Most parameters first; alphabetical within equal counts.
        assert_eq!(
            vec!["AUTH", "SIZE", "8BITMIME", "PIPELINING"],
            ordered
        );
    }

    #[test]
    fn output_format_parsing() {
        assert_eq!(Ok(OutputFormat::Console), "console".parse());
        assert_eq!(Ok(OutputFormat::Csv), "CSV".parse());
        assert_eq!(Ok(OutputFormat::Json), "json".parse());
        assert!("yaml".parse::<OutputFormat>().is_err());
    }
}
