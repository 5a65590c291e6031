//! Connection URI parsing and default driver options

use std::fmt;

use crate::error::{Error, Result};

/// Required scheme prefix for every connection URI
pub const SCHEME: &str = "mysql://";

/// Options appended to every connection target.
///
/// The driver decodes DATETIME/TIMESTAMP columns natively; pinning the
/// session zone keeps decoded values stable across servers.
pub const DEFAULT_OPTIONS: &str = "timezone=%2B00:00";

/// A validated connection URI, stored without its scheme prefix
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectUri {
    target: String,
}

impl ConnectUri {
    /// Validate the scheme prefix and keep the remainder.
    ///
    /// Fails with [`Error::InvalidUri`] before any I/O when the prefix is
    /// missing.
    pub fn parse(uri: &str) -> Result<Self> {
        let target = uri.strip_prefix(SCHEME).ok_or_else(|| {
            Error::InvalidUri(format!("connect string missing {} prefix", SCHEME))
        })?;

        if target.is_empty() {
            return Err(Error::InvalidUri("connect string has no host".to_string()));
        }

        Ok(Self {
            target: target.to_string(),
        })
    }

    /// Append [`DEFAULT_OPTIONS`], inserting a single separator if needed.
    ///
    /// A `timezone` already present in the query is kept.
    pub fn with_default_options(mut self) -> Self {
        if self.has_default_options() {
            return self;
        }

        if !self.target.ends_with(['?', '&']) {
            let separator = if self.target.contains('?') { '&' } else { '?' };
            self.target.push(separator);
        }
        self.target.push_str(DEFAULT_OPTIONS);
        self
    }

    /// Connection target without the scheme prefix
    pub fn target(&self) -> &str {
        &self.target
    }

    /// Full URL as understood by the driver
    pub fn as_url(&self) -> String {
        format!("{}{}", SCHEME, self.target)
    }

    /// Whether the query already sets the default option's key
    fn has_default_options(&self) -> bool {
        let key = option_key(DEFAULT_OPTIONS);
        self.target
            .split_once('?')
            .map(|(_, query)| query.split('&').any(|opt| option_key(opt) == key))
            .unwrap_or(false)
    }
}

fn option_key(option: &str) -> &str {
    option.split_once('=').map_or(option, |(key, _)| key)
}

impl fmt::Display for ConnectUri {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", SCHEME, self.target)
    }
}
