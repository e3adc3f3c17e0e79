//! SMTP replies and their parser.
//!
//! Replies are single-line (`250 OK`) or multi-line, where every line but
//! the last uses `-` after the code (`250-first`, `250 last`).

use crate::error::{Error, Result};

/// SMTP reply from server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reply {
    /// Reply code (e.g., 250).
    pub code: ReplyCode,
    /// Reply text, one entry per line.
    pub message: Vec<String>,
}

impl Reply {
    /// Creates a new reply.
    #[must_use]
    #[allow(clippy::missing_const_for_fn)] // Vec is not const-compatible
    pub fn new(code: ReplyCode, message: Vec<String>) -> Self {
        Self { code, message }
    }

    /// Returns true if this is a success reply (2xx).
    #[must_use]
    pub const fn is_success(&self) -> bool {
        self.code.is_success()
    }

    /// Returns the full message as a single string.
    #[must_use]
    pub fn message_text(&self) -> String {
        self.message.join("\n")
    }

    /// Converts a non-success reply into [`Error::SmtpError`].
    #[must_use]
    pub fn into_error(self) -> Error {
        Error::smtp_error(self.code.as_u16(), self.message_text())
    }
}

/// SMTP reply code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct ReplyCode(u16);

impl ReplyCode {
    /// 220 Service ready
    pub const SERVICE_READY: Self = Self(220);
    /// 221 Service closing transmission channel
    pub const CLOSING: Self = Self(221);
    /// 235 Authentication succeeded
    pub const AUTH_SUCCESS: Self = Self(235);
    /// 250 Requested mail action okay, completed
    pub const OK: Self = Self(250);
    /// 334 Continue with authentication
    pub const AUTH_CONTINUE: Self = Self(334);
    /// 354 Start mail input
    pub const START_DATA: Self = Self(354);
    /// 502 Command not implemented
    pub const NOT_IMPLEMENTED: Self = Self(502);
    /// 535 Authentication credentials invalid
    pub const AUTH_FAILED: Self = Self(535);

    /// Creates a new reply code.
    #[must_use]
    pub const fn new(code: u16) -> Self {
        Self(code)
    }

    /// Returns the numeric code.
    #[must_use]
    pub const fn as_u16(self) -> u16 {
        self.0
    }

    /// Returns true if this is a success code (2xx).
    #[must_use]
    pub const fn is_success(self) -> bool {
        self.0 >= 200 && self.0 < 300
    }

    /// Returns true if this is an intermediate reply (3xx).
    #[must_use]
    pub const fn is_intermediate(self) -> bool {
        self.0 >= 300 && self.0 < 400
    }

    /// Returns true if this is a transient error (4xx).
    #[must_use]
    pub const fn is_transient(self) -> bool {
        self.0 >= 400 && self.0 < 500
    }

    /// Returns true if this is a permanent error (5xx).
    #[must_use]
    pub const fn is_permanent(self) -> bool {
        self.0 >= 500 && self.0 < 600
    }
}

impl std::fmt::Display for ReplyCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Checks if a line is the last line of a reply.
#[must_use]
pub fn is_last_reply_line(line: &str) -> bool {
    line.len() == 3 || line.as_bytes().get(3) == Some(&b' ')
}

/// Parses an SMTP reply from its lines.
///
/// # Errors
///
/// Returns [`Error::Protocol`] if the reply is empty, a line lacks a
/// three-digit code, or the lines disagree on the code.
pub fn parse_reply(lines: &[String]) -> Result<Reply> {
    let first = lines
        .first()
        .ok_or_else(|| Error::Protocol("empty reply".into()))?;
    let code = parse_code(first)?;

    let mut message = Vec::with_capacity(lines.len());
    for line in lines {
        if parse_code(line)? != code {
            return Err(Error::Protocol(format!(
                "reply code changed mid-reply: {line}"
            )));
        }
        match line.as_bytes().get(3) {
            None => message.push(String::new()),
            Some(b' ' | b'-') => message.push(line.get(4..).unwrap_or_default().to_string()),
            Some(_) => {
                return Err(Error::Protocol(format!("malformed reply line: {line}")));
            }
        }
    }

    Ok(Reply::new(ReplyCode::new(code), message))
}

fn parse_code(line: &str) -> Result<u16> {
    let digits = line
        .get(..3)
        .filter(|d| d.bytes().all(|b| b.is_ascii_digit()))
        .ok_or_else(|| Error::Protocol(format!("invalid reply line: {line}")))?;
    digits
        .parse()
        .map_err(|_| Error::Protocol(format!("invalid reply code: {digits}")))
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    fn lines(raw: &[&str]) -> Vec<String> {
        raw.iter().map(ToString::to_string).collect()
    }

    #[test]
    fn test_parse_single_line_reply() {
        let reply = parse_reply(&lines(&["250 OK"])).unwrap();
        assert_eq!(reply.code, ReplyCode::OK);
        assert_eq!(reply.message, vec!["OK"]);
        assert!(reply.is_success());
    }

    #[test]
    fn test_parse_multi_line_ehlo() {
        let reply = parse_reply(&lines(&[
            "250-smtp.example.com Hello",
            "250-STARTTLS",
            "250 AUTH PLAIN LOGIN",
        ]))
        .unwrap();
        assert_eq!(reply.code.as_u16(), 250);
        assert_eq!(
            reply.message,
            vec!["smtp.example.com Hello", "STARTTLS", "AUTH PLAIN LOGIN"]
        );
    }

    #[test]
    fn test_parse_bare_code() {
        let reply = parse_reply(&lines(&["354"])).unwrap();
        assert_eq!(reply.code, ReplyCode::START_DATA);
        assert_eq!(reply.message, vec![""]);
    }

    #[test]
    fn test_is_last_reply_line() {
        assert!(is_last_reply_line("250 OK"));
        assert!(is_last_reply_line("250"));
        assert!(!is_last_reply_line("250-Continuing"));
    }

    #[test]
    fn test_parse_errors() {
        assert!(parse_reply(&[]).is_err());
        assert!(parse_reply(&lines(&["25"])).is_err());
        assert!(parse_reply(&lines(&["ABC OK"])).is_err());
        assert!(parse_reply(&lines(&["250xOK"])).is_err());
        assert!(parse_reply(&lines(&["250-a", "251 b"])).is_err());
    }

    #[test]
    fn test_non_ascii_text_does_not_panic() {
        let reply = parse_reply(&lines(&["220 ünïcode ready"])).unwrap();
        assert_eq!(reply.message, vec!["ünïcode ready"]);
        assert!(parse_reply(&lines(&["22ü ready"])).is_err());
    }

    #[test]
    fn test_code_classes() {
        assert!(ReplyCode::SERVICE_READY.is_success());
        assert!(ReplyCode::AUTH_CONTINUE.is_intermediate());
        assert!(ReplyCode::new(421).is_transient());
        assert!(ReplyCode::AUTH_FAILED.is_permanent());
        assert_eq!(format!("{}", ReplyCode::NOT_IMPLEMENTED), "502");
    }

    #[test]
    fn test_into_error() {
        let reply = Reply::new(ReplyCode::new(554), lines(&["no", "relay"]));
        let err = reply.into_error();
        assert_eq!(err.to_string(), "server replied 554: no\nrelay");
    }
}
