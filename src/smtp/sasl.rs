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

//! Client-side SASL state machines for the mechanisms a submission server
//! is expected to offer: PLAIN (RFC 4616), LOGIN (historical) and CRAM-MD5
//! (RFC 2195).
//!
//! Each mechanism is driven by the session's AUTH loop: every 334 reply is
//! handed to `respond`, whose return value is written back verbatim.
//! Misuse (a challenge the mechanism cannot be in a position to receive)
//! indicates a client bug or a badly broken server and is reported as
//! `MechanismMisuse` rather than an authentication failure.

use std::fmt::Write as _;

use openssl::hash::MessageDigest;
use openssl::pkey::PKey;
use openssl::sign::Signer;

use crate::support::error::Error;

/// Base64 of `Username:`, the LOGIN user-name prompt.
const LOGIN_PROMPT_USERNAME: &str = "VXNlcm5hbWU6";
/// Base64 of `Password:`.
const LOGIN_PROMPT_PASSWORD: &str = "UGFzc3dvcmQ6";

/// Mechanism names in selection priority order.
const PRIORITY: &[&str] = &["CRAM-MD5", "LOGIN", "PLAIN"];

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

impl Credentials {
    pub fn new(
        username: impl Into<String>,
        password: impl Into<String>,
    ) -> Self {
        Credentials {
            username: username.into(),
            password: password.into(),
        }
    }
}

/// One authentication attempt's state machine.
#[derive(Clone, Debug)]
pub enum Mechanism {
    Plain {
        credentials: Credentials,
        responded: bool,
    },
    Login {
        credentials: Credentials,
        sent_username: bool,
        sent_password: bool,
    },
    CramMd5 {
        credentials: Credentials,
        responded: bool,
    },
}

impl Mechanism {
    pub fn plain(credentials: Credentials) -> Self {
        Mechanism::Plain {
            credentials,
            responded: false,
        }
    }

    pub fn login(credentials: Credentials) -> Self {
        Mechanism::Login {
            credentials,
            sent_username: false,
            sent_password: false,
        }
    }

    pub fn cram_md5(credentials: Credentials) -> Self {
        Mechanism::CramMd5 {
            credentials,
            responded: false,
        }
    }

    /// Picks the strongest supported mechanism out of the server's
    /// advertised `AUTH` parameter list: CRAM-MD5, then LOGIN, then PLAIN.
    pub fn select(
        advertised: &[String],
        credentials: Credentials,
    ) -> Option<Self> {
        for &name in PRIORITY {
            if advertised.iter().any(|a| a.eq_ignore_ascii_case(name)) {
                return Some(match name {
                    "CRAM-MD5" => Mechanism::cram_md5(credentials),
                    "LOGIN" => Mechanism::login(credentials),
                    _ => Mechanism::plain(credentials),
                });
            }
        }

        None
    }

    pub fn name(&self) -> &'static str {
        match *self {
            Mechanism::Plain { .. } => "PLAIN",
            Mechanism::Login { .. } => "LOGIN",
            Mechanism::CramMd5 { .. } => "CRAM-MD5",
        }
    }

    /// Produces the client reply for one 334 challenge, `challenge` being
    /// the reply's text lines.
    pub fn respond(&mut self, challenge: &[String]) -> Result<String, Error> {
        match *self {
            Mechanism::Plain {
                ref credentials,
                ref mut responded,
            } => {
                if mem_take_flag(responded) {
                    return Err(Error::MechanismMisuse(
                        "PLAIN challenged more than once",
                    ));
                }

                // The authorisation and authentication identities are the
                // same user.
                Ok(base64::encode(format!(
                    "{}\0{}\0{}",
                    credentials.username,
                    credentials.username,
                    credentials.password,
                )))
            },

            Mechanism::Login {
                ref credentials,
                ref mut sent_username,
                ref mut sent_password,
            } => {
                let prompt = challenge
                    .first()
                    .map(|line| line.trim())
                    .unwrap_or("");
                match prompt {
                    LOGIN_PROMPT_USERNAME => {
                        if *sent_username {
                            return Err(Error::MechanismMisuse(
                                "LOGIN requested the user name twice",
                            ));
                        }

                        *sent_username = true;
                        Ok(base64::encode(&credentials.username))
                    },
                    LOGIN_PROMPT_PASSWORD => {
                        if *sent_password {
                            return Err(Error::MechanismMisuse(
                                "LOGIN requested the password twice",
                            ));
                        }

                        *sent_password = true;
                        Ok(base64::encode(&credentials.password))
                    },
                    _ => Err(Error::MechanismMisuse(
                        "unrecognised LOGIN challenge",
                    )),
                }
            },

            Mechanism::CramMd5 {
                ref credentials,
                ref mut responded,
            } => {
                let encoded_nonce =
                    challenge.first().map(|line| line.trim()).unwrap_or("");
                if encoded_nonce.is_empty() {
                    return Err(Error::MechanismMisuse(
                        "empty CRAM-MD5 challenge",
                    ));
                }

                if mem_take_flag(responded) {
                    return Err(Error::MechanismMisuse(
                        "CRAM-MD5 challenged more than once",
                    ));
                }

                let nonce =
                    base64::decode(encoded_nonce).map_err(|_| {
                        Error::MechanismMisuse(
                            "CRAM-MD5 challenge is not valid base64",
                        )
                    })?;

                let digest =
                    hmac_md5_hex(credentials.password.as_bytes(), &nonce)?;
                Ok(base64::encode(format!(
                    "{} {}",
                    credentials.username, digest,
                )))
            },
        }
    }

    /// Returns the mechanism to its initial state so a fresh attempt
    /// replays identically.
    pub fn reset(&mut self) {
        match *self {
            Mechanism::Plain {
                ref mut responded, ..
            }
            | Mechanism::CramMd5 {
                ref mut responded, ..
            } => *responded = false,
            Mechanism::Login {
                ref mut sent_username,
                ref mut sent_password,
                ..
            } => {
                *sent_username = false;
                *sent_password = false;
            },
        }
    }
}

fn mem_take_flag(flag: &mut bool) -> bool {
    std::mem::replace(flag, true)
}

/// `HMAC-MD5(key, data)` rendered as lowercase hex, per RFC 2195.
fn hmac_md5_hex(key: &[u8], data: &[u8]) -> Result<String, Error> {
    let key = PKey::hmac(key).map_err(crypto_error)?;
    let mut signer =
        Signer::new(MessageDigest::md5(), &key).map_err(crypto_error)?;
    signer.update(data).map_err(crypto_error)?;
    let digest = signer.sign_to_vec().map_err(crypto_error)?;

    let mut hex = String::with_capacity(2 * digest.len());
    for byte in digest {
        let _ = write!(hex, "{:02x}", byte);
    }
    Ok(hex)
}

fn crypto_error(e: openssl::error::ErrorStack) -> Error {
    Error::Crypto(e.to_string())
}

#[cfg(test)]
mod test {
    use super::*;

    fn credentials() -> Credentials {
        Credentials::new("zim", "hunter2")
    }

    fn challenge(lines: &[&str]) -> Vec<String> {
        lines.iter().map(|&s| s.to_owned()).collect()
    }

    #[test]
    fn plain_single_response() {
        let mut mechanism = Mechanism::plain(credentials());
        let response = mechanism.respond(&challenge(&[""])).unwrap();
        assert_eq!(base64::encode("zim\0zim\0hunter2"), response);

        assert_matches!(
            Err(Error::MechanismMisuse(..)),
            mechanism.respond(&challenge(&[""]))
        );
    }

    #[test]
    fn login_prompts() {
        let mut mechanism = Mechanism::login(credentials());
        assert_eq!(
            base64::encode("zim"),
            mechanism
                .respond(&challenge(&["VXNlcm5hbWU6"]))
                .unwrap()
        );
        assert_eq!(
            base64::encode("hunter2"),
            mechanism
                .respond(&challenge(&["UGFzc3dvcmQ6"]))
                .unwrap()
        );
    }

    #[test]
    fn login_rejects_repeated_prompts() {
        let mut mechanism = Mechanism::login(credentials());
        mechanism.respond(&challenge(&["VXNlcm5hbWU6"])).unwrap();
        assert_matches!(
            Err(Error::MechanismMisuse(..)),
            mechanism.respond(&challenge(&["VXNlcm5hbWU6"]))
        );
    }

    #[test]
    fn login_rejects_unknown_prompts() {
        let mut mechanism = Mechanism::login(credentials());
        assert_matches!(
            Err(Error::MechanismMisuse(..)),
            mechanism.respond(&challenge(&["UGluIG51bWJlcjo="]))
        );
        assert_matches!(
            Err(Error::MechanismMisuse(..)),
            mechanism.respond(&challenge(&[]))
        );
    }

    #[test]
    fn cram_md5_rfc2195_vector() {
        let mut mechanism = Mechanism::cram_md5(Credentials::new(
            "tim",
            "tanstaaftanstaaf",
        ));
        let response = mechanism
            .respond(&challenge(&[
                "PDE4OTYuNjk3MTcwOTUyQHBvc3RvZmZpY2UucmVzdG9uLm1jaS5uZXQ+",
            ]))
            .unwrap();

        assert_eq!(
            "tim b913a602c7eda7a495b4e6e7334d3890",
            String::from_utf8(base64::decode(response).unwrap()).unwrap(),
        );
    }

    #[test]
    fn cram_md5_rejects_empty_or_repeated_challenges() {
        let mut mechanism = Mechanism::cram_md5(credentials());
        assert_matches!(
            Err(Error::MechanismMisuse(..)),
            mechanism.respond(&challenge(&[]))
        );
        assert_matches!(
            Err(Error::MechanismMisuse(..)),
            mechanism.respond(&challenge(&[""]))
        );

        // The empty challenges above did not consume the single step.
        mechanism
            .respond(&challenge(&[&base64::encode("<nonce@example>")]))
            .unwrap();
        assert_matches!(
            Err(Error::MechanismMisuse(..)),
            mechanism.respond(&challenge(&[&base64::encode("<again>")]))
        );
    }

    #[test]
    fn reset_replays_identically() {
        for mut mechanism in [
            Mechanism::plain(credentials()),
            Mechanism::login(credentials()),
            Mechanism::cram_md5(credentials()),
        ] {
            let challenges = match mechanism {
                Mechanism::Plain { .. } => vec![challenge(&[""])],
                Mechanism::Login { .. } => vec![
                    challenge(&["VXNlcm5hbWU6"]),
                    challenge(&["UGFzc3dvcmQ6"]),
                ],
                Mechanism::CramMd5 { .. } => {
                    vec![challenge(&[&base64::encode("<1@2>")])]
                },
            };

            let first: Vec<String> = challenges
                .iter()
                .map(|c| mechanism.respond(c).unwrap())
                .collect();
            mechanism.reset();
            let second: Vec<String> = challenges
                .iter()
                .map(|c| mechanism.respond(c).unwrap())
                .collect();

            assert_eq!(first, second);
        }
    }

    #[test]
    fn selection_priority() {
        let advertised = |names: &[&str]| -> Vec<String> {
            names.iter().map(|&s| s.to_owned()).collect()
        };

        let selected = Mechanism::select(
            &advertised(&["PLAIN", "LOGIN", "CRAM-MD5"]),
            credentials(),
        )
        .unwrap();
        assert_eq!("CRAM-MD5", selected.name());

        let selected = Mechanism::select(
            &advertised(&["plain", "login"]),
            credentials(),
        )
        .unwrap();
        assert_eq!("LOGIN", selected.name());

        let selected =
            Mechanism::select(&advertised(&["PLAIN"]), credentials()).unwrap();
        assert_eq!("PLAIN", selected.name());

        assert!(Mechanism::select(
            &advertised(&["XOAUTH2", "NTLM"]),
            credentials()
        )
        .is_none());
        assert!(Mechanism::select(&advertised(&[]), credentials()).is_none());
    }
}
