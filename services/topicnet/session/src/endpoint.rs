//! Network endpoint value type.

use crate::error::{Result, SessionError};
use std::fmt;
use std::str::FromStr;

/// Host and port of a publisher. Equal iff host and port are equal.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Endpoint {
    host: String,
    port: u16,
}

impl Endpoint {
    /// Create an endpoint; the host must be non-empty and the port in 1..=65535
    pub fn new(host: impl Into<String>, port: u16) -> Result<Self> {
        let host = host.into();
        if host.trim().is_empty() {
            return Err(SessionError::InvalidArgument(
                "endpoint host is empty".to_string(),
            ));
        }
        if port == 0 {
            return Err(SessionError::InvalidArgument(
                "endpoint port must be in 1..=65535".to_string(),
            ));
        }
        Ok(Self { host, port })
    }

    /// Wildcard endpoint used when binding a publisher
    pub(crate) fn any(port: u16) -> Result<Self> {
        Self::new("0.0.0.0", port)
    }

    /// Host name or address
    pub fn host(&self) -> &str {
        &self.host
    }

    /// Port number
    pub fn port(&self) -> u16 {
        self.port
    }

    /// Same host with a different port
    pub fn with_port(&self, port: u16) -> Result<Self> {
        Self::new(self.host.clone(), port)
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

impl FromStr for Endpoint {
    type Err = SessionError;

    /// Parse `host:port`; the last colon separates the port
    fn from_str(s: &str) -> Result<Self> {
        let (host, port) = s.rsplit_once(':').ok_or_else(|| {
            SessionError::InvalidArgument(format!("endpoint {:?} is not host:port", s))
        })?;
        let port = port.parse::<u16>().map_err(|_| {
            SessionError::InvalidArgument(format!("endpoint {:?} has an invalid port", s))
        })?;
        Self::new(host, port)
    }
}
