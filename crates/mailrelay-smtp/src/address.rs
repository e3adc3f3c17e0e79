//! Envelope addresses.

use crate::error::{Error, Result};

/// Email address for the SMTP envelope.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Address(String);

impl Address {
    /// Creates a new address from a string.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidAddress`] if the address is invalid.
    pub fn new(addr: impl Into<String>) -> Result<Self> {
        let addr = addr.into();
        Self::validate(&addr)?;
        Ok(Self(addr))
    }

    /// Returns the address as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    fn validate(addr: &str) -> Result<()> {
        if addr.is_empty() {
            return Err(Error::InvalidAddress("address cannot be empty".into()));
        }
        // Anything here would let the address escape its command line.
        if addr
            .chars()
            .any(|c| c.is_whitespace() || c.is_control() || c == '<' || c == '>')
        {
            return Err(Error::InvalidAddress(format!(
                "address contains forbidden characters: {addr:?}"
            )));
        }

        let Some((local, domain)) = addr.split_once('@') else {
            return Err(Error::InvalidAddress(format!("{addr}: missing @")));
        };
        if domain.contains('@') {
            return Err(Error::InvalidAddress(format!(
                "{addr}: must have exactly one @"
            )));
        }
        if local.is_empty() || domain.is_empty() {
            return Err(Error::InvalidAddress(format!(
                "{addr}: local and domain parts cannot be empty"
            )));
        }
        Ok(())
    }
}

impl std::fmt::Display for Address {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl std::str::FromStr for Address {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::new(s.trim())
    }
}

/// Sender and recipients of one message transfer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Envelope {
    from: Address,
    recipients: Vec<Address>,
}

impl Envelope {
    /// Creates an envelope.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidAddress`] if there are no recipients.
    pub fn new(from: Address, recipients: Vec<Address>) -> Result<Self> {
        if recipients.is_empty() {
            return Err(Error::InvalidAddress("no recipients specified".into()));
        }
        Ok(Self { from, recipients })
    }

    /// Envelope sender.
    #[must_use]
    pub const fn from(&self) -> &Address {
        &self.from
    }

    /// Envelope recipients, in order.
    #[must_use]
    pub fn recipients(&self) -> &[Address] {
        &self.recipients
    }
}
