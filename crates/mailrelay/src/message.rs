//! RFC 5322 message construction: plain text, optionally with an HTML
//! alternative.

use std::fmt::Write as _;

use base64::Engine;
use chrono::{DateTime, Local, Utc};
use mailrelay_smtp::Address;

/// Longest line allowed unencoded (RFC 5322 §2.1.1).
const MAX_LINE: usize = 998;

/// Base64 body line width.
const BASE64_WIDTH: usize = 76;

/// UTF-8 bytes per encoded-word: 60 base64 characters, 72 with the
/// `=?utf-8?b?` prefix and `?=` suffix.
const ENCODED_WORD_BYTES: usize = 45;

/// An email message to send.
#[derive(Debug, Clone)]
pub struct OutgoingMessage {
    /// Sender address.
    pub from: Address,
    /// Optional display name for the sender.
    pub from_name: Option<String>,
    /// Recipient addresses.
    pub to: Vec<Address>,
    /// CC addresses.
    pub cc: Vec<Address>,
    /// Subject line.
    pub subject: String,
    /// Plain text body.
    pub text: String,
    /// Optional HTML alternative.
    pub html: Option<String>,
}

impl OutgoingMessage {
    /// Builds the RFC 5322 formatted message, stamped now.
    #[must_use]
    pub fn to_rfc5322(&self) -> String {
        let now = Local::now();
        let message_id = message_id(&self.from, Utc::now());
        self.render(&now, &message_id)
    }

    /// Builds the message with an explicit date and message id.
    #[must_use]
    pub fn render(&self, date: &DateTime<Local>, message_id: &str) -> String {
        let mut message = String::new();

        let _ = write!(message, "From: {}\r\n", self.from_header());
        let _ = write!(message, "To: {}\r\n", join(&self.to));
        if !self.cc.is_empty() {
            let _ = write!(message, "Cc: {}\r\n", join(&self.cc));
        }
        let _ = write!(message, "Subject: {}\r\n", encode_word(&self.subject));
        let _ = write!(message, "Date: {}\r\n", date.to_rfc2822());
        let _ = write!(message, "Message-ID: {message_id}\r\n");
        let _ = write!(message, "Reply-To: {}\r\n", self.from);
        message.push_str("MIME-Version: 1.0\r\n");

        match &self.html {
            None => write_part(&mut message, "text/plain", &self.text),
            Some(html) => {
                let boundary = boundary(message_id);
                let _ = write!(
                    message,
                    "Content-Type: multipart/alternative; boundary=\"{boundary}\"\r\n\r\n"
                );
                let _ = write!(message, "--{boundary}\r\n");
                write_part(&mut message, "text/plain", &self.text);
                let _ = write!(message, "\r\n--{boundary}\r\n");
                write_part(&mut message, "text/html", html);
                let _ = write!(message, "\r\n--{boundary}--\r\n");
            }
        }
        message
    }

    fn from_header(&self) -> String {
        match self.from_name.as_deref().map(str::trim) {
            Some(name) if !name.is_empty() => {
                format!("{} <{}>", display_name(name), self.from)
            }
            _ => self.from.to_string(),
        }
    }
}

/// Writes part headers and the body, base64-encoding when the text is not
/// plain short-lined ASCII.
fn write_part(out: &mut String, content_type: &str, body: &str) {
    let _ = write!(out, "Content-Type: {content_type}; charset=\"utf-8\"\r\n");
    if needs_encoding(body) {
        out.push_str("Content-Transfer-Encoding: base64\r\n\r\n");
        let encoded = base64::engine::general_purpose::STANDARD.encode(body.as_bytes());
        for chunk in encoded.as_bytes().chunks(BASE64_WIDTH) {
            out.push_str(&String::from_utf8_lossy(chunk));
            out.push_str("\r\n");
        }
    } else {
        out.push_str("Content-Transfer-Encoding: 7bit\r\n\r\n");
        for line in body.lines() {
            out.push_str(line);
            out.push_str("\r\n");
        }
    }
}

fn needs_encoding(body: &str) -> bool {
    !body.is_ascii() || body.lines().any(|line| line.len() > MAX_LINE) || body.contains('\r')
}

/// Header text on one logical line; CR and LF become spaces.
fn unfold(text: &str) -> String {
    text.replace(['\r', '\n'], " ")
}

/// RFC 2047 encoded-words for non-ASCII header text, folded so each word
/// stays within 75 characters.
fn encode_word(text: &str) -> String {
    let text = unfold(text);
    if text.is_ascii() {
        return text;
    }

    let mut words = Vec::new();
    let mut chunk = String::new();
    for c in text.chars() {
        if chunk.len() + c.len_utf8() > ENCODED_WORD_BYTES {
            words.push(encoded_word(&chunk));
            chunk.clear();
        }
        chunk.push(c);
    }
    if !chunk.is_empty() {
        words.push(encoded_word(&chunk));
    }
    words.join("\r\n ")
}

fn encoded_word(chunk: &str) -> String {
    format!(
        "=?utf-8?b?{}?=",
        base64::engine::general_purpose::STANDARD.encode(chunk.as_bytes())
    )
}

fn display_name(name: &str) -> String {
    if !name.is_ascii() {
        return encode_word(name);
    }
    let name = unfold(name);
    if name
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || " !#$%&'*+-/=?^_`{|}~".contains(c))
    {
        return name;
    }
    format!("\"{}\"", name.replace('\\', "\\\\").replace('"', "\\\""))
}

fn join(addresses: &[Address]) -> String {
    addresses
        .iter()
        .map(Address::as_str)
        .collect::<Vec<_>>()
        .join(", ")
}

/// `<timestamp.pid@domain>`, with the domain taken from the sender.
#[must_use]
pub fn message_id(from: &Address, now: DateTime<Utc>) -> String {
    let domain = from
        .as_str()
        .rsplit_once('@')
        .map_or("localhost", |(_, domain)| domain);
    let stamp = now
        .timestamp_nanos_opt()
        .unwrap_or_else(|| now.timestamp_micros());
    format!("<{stamp}.{}@{domain}>", std::process::id())
}

fn boundary(message_id: &str) -> String {
    let token: String = message_id
        .chars()
        .filter(char::is_ascii_alphanumeric)
        .take(40)
        .collect();
    format!("=_mailrelay_{token}")
}
