//! Command grammar
//!
//! One command per inbound message, ASCII text:
//!
//! ```text
//! ping
//! sleep=<integer 1..86400>
//! ota=<url, 8..255 chars>
//! ```
//!
//! Payloads longer than [`MAX_COMMAND_LEN`] are cut to that length before
//! parsing. The excess is dropped silently.

use std::borrow::Cow;

/// Maximum payload length considered by the parser (bytes)
pub const MAX_COMMAND_LEN: usize = 256;

const PING: &str = "ping";
const SLEEP_PREFIX: &str = "sleep=";
const OTA_PREFIX: &str = "ota=";

/// A parsed inbound command
///
/// Values are carried as received; range checks happen when the command is
/// applied to the node configuration.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Command {
    Ping,
    SetSleep(i64),
    RequestUpdate(String),
    Unknown(String),
}

impl Command {
    /// Parse a raw payload into a command
    pub fn parse(raw: &[u8]) -> Self {
        let text = truncate_payload(raw);

        if text == PING {
            return Command::Ping;
        }

        if let Some(value) = text.strip_prefix(SLEEP_PREFIX) {
            return Command::SetSleep(parse_leading_int(value));
        }

        if let Some(url) = text.strip_prefix(OTA_PREFIX) {
            return Command::RequestUpdate(url.to_string());
        }

        Command::Unknown(text.into_owned())
    }

    pub fn name(&self) -> &'static str {
        match self {
            Command::Ping => "ping",
            Command::SetSleep(_) => "sleep",
            Command::RequestUpdate(_) => "ota",
            Command::Unknown(_) => "unknown",
        }
    }
}

/// Bounded copy of a payload as text
///
/// Keeps at most [`MAX_COMMAND_LEN`] bytes. Invalid UTF-8 (including a
/// multi-byte character split by the cut) is replaced, never rejected.
pub fn truncate_payload(raw: &[u8]) -> Cow<'_, str> {
    let end = raw.len().min(MAX_COMMAND_LEN);
    String::from_utf8_lossy(&raw[..end])
}

/// Leading-integer parse with C `atoi` semantics
///
/// Leading whitespace and one sign are accepted, digits are read up to the
/// first non-digit, and text without digits yields 0. Overflow saturates.
pub fn parse_leading_int(s: &str) -> i64 {
    let s = s.trim_start();
    let (negative, digits) = match s.as_bytes().first() {
        Some(b'-') => (true, &s[1..]),
        Some(b'+') => (false, &s[1..]),
        _ => (false, s),
    };

    let mut value: i64 = 0;
    for b in digits.bytes().take_while(|b| b.is_ascii_digit()) {
        let digit = (b - b'0') as i64;
        value = value.saturating_mul(10).saturating_add(digit);
    }

    if negative {
        -value
    } else {
        value
    }
}
