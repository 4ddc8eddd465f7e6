use crate::consts::{BUSY_TOKEN, DIAL_TONE_TOKEN, NUMBER_MARKER, RING_TOKEN};

/// What a single inbound chunk from the modem means to the call monitor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Token {
    /// Caller-ID payload with at least one digit.
    Number(String),
    Ring,
    DialTone,
    Busy,
    /// Noise, partial frames, command echoes, `OK` responses...
    Other,
}

/// Pull the digits following the Caller-ID marker out of a chunk.
///
/// The payload runs from just after the marker up to, but not including, the
/// last character of the chunk (the modem terminates it). Non-digits are
/// dropped, so the result can be empty.
pub fn extract_phone_number(msg: &str) -> Option<String> {
    let start = msg.find(NUMBER_MARKER)? + NUMBER_MARKER.len();
    let end = msg
        .char_indices()
        .last()
        .map(|(idx, _)| idx)
        .unwrap_or_default();
    let payload = msg.get(start..end).unwrap_or_default();
    Some(payload.chars().filter(char::is_ascii_digit).collect())
}

pub fn decode(chunk: &[u8]) -> Token {
    let msg = String::from_utf8_lossy(chunk);
    match extract_phone_number(&msg) {
        Some(number) if !number.is_empty() => return Token::Number(number),
        _ => (),
    }
    match &*msg {
        RING_TOKEN => Token::Ring,
        DIAL_TONE_TOKEN => Token::DialTone,
        BUSY_TOKEN => Token::Busy,
        _ => Token::Other,
    }
}
