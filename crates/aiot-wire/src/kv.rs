//! `key=value;key=value` payload codec
//!
//! Keys are non-empty ASCII without `;` or `=`. Values are ASCII without
//! `;` and may contain `=`; a pair splits at its first `=`.

use aiot_core::{AiotError, AiotResult};
use bytes::Bytes;

/// Pair separator
pub const PAIR_SEP: char = ';';
/// Key/value separator
pub const KV_SEP: char = '=';

/// Maximum serialized payload size (bytes)
pub const MAX_PAYLOAD_SIZE: usize = 512;

/// Key carrying the event name in acknowledgement payloads
pub const EVENT_KEY: &str = "event";

/// Ordered list of key/value pairs
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct KvPayload {
    pairs: Vec<(String, String)>,
}

impl KvPayload {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start an event payload: `event=<name>`
    pub fn event(name: &str) -> Self {
        KvPayload::new().with(EVENT_KEY, name)
    }

    /// Append a pair (builder form)
    pub fn with(mut self, key: impl Into<String>, value: impl ToString) -> Self {
        self.push(key, value);
        self
    }

    /// Append a pair
    pub fn push(&mut self, key: impl Into<String>, value: impl ToString) {
        self.pairs.push((key.into(), value.to_string()));
    }

    /// Append every pair of `other`, in order
    pub fn extend(&mut self, other: &KvPayload) {
        self.pairs.extend(other.pairs.iter().cloned());
    }

    /// First value stored under `key`
    pub fn get(&self, key: &str) -> Option<&str> {
        self.pairs
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.pairs.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.pairs.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.pairs.is_empty()
    }

    /// Parse a payload
    ///
    /// An empty string is an empty payload. Every segment must contain `=`
    /// and a non-empty key.
    pub fn parse(text: &str) -> AiotResult<Self> {
        if text.len() > MAX_PAYLOAD_SIZE {
            return Err(AiotError::PayloadTooLarge {
                limit: MAX_PAYLOAD_SIZE,
                actual: text.len(),
            });
        }
        if !text.is_ascii() {
            return Err(AiotError::InvalidPayload("non-ASCII payload".into()));
        }

        let mut payload = KvPayload::new();
        if text.is_empty() {
            return Ok(payload);
        }

        for segment in text.split(PAIR_SEP) {
            let (key, value) = segment.split_once(KV_SEP).ok_or_else(|| {
                AiotError::InvalidPayload(format!("missing '=' in {:?}", segment))
            })?;
            if key.is_empty() {
                return Err(AiotError::InvalidPayload("empty key".into()));
            }
            payload.push(key, value);
        }

        Ok(payload)
    }

    /// Parse a raw payload received from the broker
    pub fn from_bytes(raw: &[u8]) -> AiotResult<Self> {
        let text = std::str::from_utf8(raw)
            .map_err(|_| AiotError::InvalidPayload("payload is not UTF-8".into()))?;
        Self::parse(text)
    }

    /// Serialize to the wire form
    pub fn serialize(&self) -> AiotResult<String> {
        let mut out = String::new();

        for (i, (key, value)) in self.pairs.iter().enumerate() {
            validate_key(key)?;
            validate_value(key, value)?;

            if i > 0 {
                out.push(PAIR_SEP);
            }
            out.push_str(key);
            out.push(KV_SEP);
            out.push_str(value);
        }

        if out.len() > MAX_PAYLOAD_SIZE {
            return Err(AiotError::PayloadTooLarge {
                limit: MAX_PAYLOAD_SIZE,
                actual: out.len(),
            });
        }

        Ok(out)
    }

    /// Serialize into a publishable buffer
    pub fn to_bytes(&self) -> AiotResult<Bytes> {
        self.serialize().map(Bytes::from)
    }
}

fn validate_key(key: &str) -> AiotResult<()> {
    if key.is_empty() {
        return Err(AiotError::InvalidPayload("empty key".into()));
    }
    if !key.is_ascii() || key.contains(PAIR_SEP) || key.contains(KV_SEP) {
        return Err(AiotError::InvalidPayload(format!("invalid key {:?}", key)));
    }
    Ok(())
}

fn validate_value(key: &str, value: &str) -> AiotResult<()> {
    if !value.is_ascii() || value.contains(PAIR_SEP) {
        return Err(AiotError::InvalidPayload(format!(
            "invalid value for {:?}",
            key
        )));
    }
    Ok(())
}

/// Make free text safe to carry as a value
///
/// Separators and non-ASCII characters become `_`.
pub fn sanitize_value(text: &str) -> String {
    text.chars()
        .map(|c| if c == PAIR_SEP || !c.is_ascii() { '_' } else { c })
        .collect()
}

/// Make free text safe to use as a key
///
/// Both separators and non-ASCII characters become `_`; empty text
/// becomes `_`.
pub fn sanitize_key(text: &str) -> String {
    if text.is_empty() {
        return "_".to_string();
    }
    text.chars()
        .map(|c| {
            if c == PAIR_SEP || c == KV_SEP || !c.is_ascii() {
                '_'
            } else {
                c
            }
        })
        .collect()
}
