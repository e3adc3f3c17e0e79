//! SMTP service extensions advertised in the EHLO reply.

use std::collections::HashSet;

use super::reply::Reply;

/// SMTP extensions discovered from EHLO response.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Extension {
    /// STARTTLS - TLS upgrade
    StartTls,
    /// AUTH - Authentication
    Auth(Vec<AuthMechanism>),
    /// SIZE - Maximum message size
    Size(Option<usize>),
    /// Anything else, kept verbatim
    Unknown(String),
}

impl Extension {
    /// Parses an extension line from EHLO response.
    #[must_use]
    pub fn parse(line: &str) -> Self {
        let mut words = line.split_whitespace();
        let Some(keyword) = words.next() else {
            return Self::Unknown(line.to_string());
        };

        match keyword.to_ascii_uppercase().as_str() {
            "STARTTLS" => Self::StartTls,
            // Some servers still advertise the pre-standard "AUTH=" form.
            "AUTH" | "AUTH=" => Self::Auth(words.filter_map(AuthMechanism::parse).collect()),
            "SIZE" => Self::Size(words.next().and_then(|s| s.parse().ok())),
            upper if upper.starts_with("AUTH=") => Self::Auth(
                std::iter::once(&keyword[5..])
                    .chain(words)
                    .filter_map(AuthMechanism::parse)
                    .collect(),
            ),
            _ => Self::Unknown(line.to_string()),
        }
    }
}

/// SASL authentication mechanism.
///
/// Only PLAIN and LOGIN are ever used; the others are recognized so a
/// failed selection can name what the server offered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AuthMechanism {
    /// PLAIN - plaintext authentication
    Plain,
    /// LOGIN - legacy plaintext
    Login,
    /// CRAM-MD5 - challenge-response
    CramMd5,
    /// `XOAUTH2` - `OAuth2` (Google/Microsoft)
    XOAuth2,
}

impl AuthMechanism {
    /// Parses an authentication mechanism name.
    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_ascii_uppercase().as_str() {
            "PLAIN" => Some(Self::Plain),
            "LOGIN" => Some(Self::Login),
            "CRAM-MD5" => Some(Self::CramMd5),
            "XOAUTH2" => Some(Self::XOAuth2),
            _ => None,
        }
    }

    /// Returns the mechanism name as a string.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Plain => "PLAIN",
            Self::Login => "LOGIN",
            Self::CramMd5 => "CRAM-MD5",
            Self::XOAuth2 => "XOAUTH2",
        }
    }
}

/// Server capabilities from the most recent greeting.
#[derive(Debug, Clone, Default)]
pub struct ServerInfo {
    /// Server hostname from the banner.
    pub hostname: String,
    /// Supported extensions.
    pub extensions: HashSet<Extension>,
    /// True if the server only answered HELO.
    pub legacy_helo: bool,
}

impl ServerInfo {
    /// Builds capabilities from an EHLO reply; the first line is the
    /// server's greeting text, the rest are extensions.
    #[must_use]
    pub fn from_ehlo(hostname: String, reply: &Reply) -> Self {
        Self {
            hostname,
            extensions: reply.message.iter().skip(1).map(|l| Extension::parse(l)).collect(),
            legacy_helo: false,
        }
    }

    /// Checks if the server supports an extension.
    #[must_use]
    pub fn supports(&self, ext: &Extension) -> bool {
        self.extensions.contains(ext)
    }

    /// Checks if STARTTLS is supported.
    #[must_use]
    pub fn supports_starttls(&self) -> bool {
        self.supports(&Extension::StartTls)
    }

    /// Returns true if any AUTH extension line was advertised.
    #[must_use]
    pub fn advertises_auth(&self) -> bool {
        self.extensions
            .iter()
            .any(|ext| matches!(ext, Extension::Auth(_)))
    }

    /// Returns supported authentication mechanisms, across all AUTH lines.
    #[must_use]
    pub fn auth_mechanisms(&self) -> Vec<AuthMechanism> {
        let mut mechanisms = Vec::new();
        for ext in &self.extensions {
            if let Extension::Auth(list) = ext {
                for mechanism in list {
                    if !mechanisms.contains(mechanism) {
                        mechanisms.push(*mechanism);
                    }
                }
            }
        }
        mechanisms
    }

    /// Returns the maximum message size, if advertised.
    #[must_use]
    pub fn max_message_size(&self) -> Option<usize> {
        self.extensions.iter().find_map(|ext| match ext {
            Extension::Size(size) => *size,
            _ => None,
        })
    }
}
