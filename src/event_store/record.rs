//! Event record shape and id parsing.

use rand::Rng;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A single stored event.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventRecord {
    /// `<stream_id>_<unix_millis>_<8_random_base36_chars>`.
    pub event_id: String,
    /// Stream this event belongs to (redundant with the id prefix, kept for
    /// convenient filtering).
    pub stream_id: String,
    /// Epoch milliseconds the event was stored at; authoritative for
    /// ordering.
    pub timestamp: i64,
    /// The id's trailing random component, used to break same-millisecond
    /// ties deterministically.
    pub random_suffix: String,
    /// User the event is attributed to, if any (used for erasure).
    #[serde(default)]
    pub user_id: Option<String>,
    /// The sanitized, possibly-encrypted message body.
    pub message: Value,
    /// Whether `message` is an encryption envelope rather than plaintext.
    pub encrypted: bool,
}

impl EventRecord {
    /// Sort key guaranteeing deterministic replay order: embedded
    /// timestamp first, random suffix (as a string) breaking ties.
    #[must_use]
    pub fn sort_key(&self) -> (i64, &str) {
        (self.timestamp, self.random_suffix.as_str())
    }
}

const BASE36_ALPHABET: &[u8] = b"0123456789abcdefghijklmnopqrstuvwxyz";

/// Generate an 8-character lowercase base36 suffix.
#[must_use]
pub fn random_base36_suffix() -> String {
    let mut rng = rand::rng();
    (0..8)
        .map(|_| BASE36_ALPHABET[rng.random_range(0..BASE36_ALPHABET.len())] as char)
        .collect()
}

/// Build an event id from its three components.
#[must_use]
pub fn build_event_id(stream_id: &str, timestamp: i64, random_suffix: &str) -> String {
    format!("{stream_id}_{timestamp}_{random_suffix}")
}

/// Recover the stream id from an event id: everything before the first `_`.
///
/// Returns `None` for a malformed id with no underscore at all.
#[must_use]
pub fn parse_stream_id(event_id: &str) -> Option<&str> {
    event_id.split_once('_').map(|(stream_id, _)| stream_id)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_stream_id_takes_prefix_before_first_underscore() {
        assert_eq!(parse_stream_id("session-1_1700000000000_ab12cd34"), Some("session-1"));
    }

    #[test]
    fn parse_stream_id_rejects_ids_without_underscore() {
        assert_eq!(parse_stream_id("malformed"), None);
    }

    #[test]
    fn random_base36_suffix_is_eight_chars_from_alphabet() {
        let suffix = random_base36_suffix();
        assert_eq!(suffix.len(), 8);
        assert!(suffix.chars().all(|c| BASE36_ALPHABET.contains(&(c as u8))));
    }

    #[test]
    fn sort_key_breaks_ties_on_random_suffix() {
        let a = EventRecord {
            event_id: "s_100_aaaaaaaa".to_string(),
            stream_id: "s".to_string(),
            timestamp: 100,
            random_suffix: "aaaaaaaa".to_string(),
            user_id: None,
            message: Value::Null,
            encrypted: false,
        };
        let mut b = a.clone();
        b.random_suffix = "bbbbbbbb".to_string();
        b.event_id = "s_100_bbbbbbbb".to_string();

        assert!(a.sort_key() < b.sort_key());
    }
}
