//! Error types for probing, chain retrieval and revocation checks.
//!
//! Every failure the crate can surface is a [`ProbeError`]. Each variant maps onto
//! one [`ErrorClass`], which decides whether the retry executor may try again and
//! whether a failure aborts an item or only one of its data sources.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::io;

/// Coarse classification of a [`ProbeError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorClass {
    /// Timeouts. Retried by the executor.
    TransientNetwork,
    /// Dial or handshake failures other than timeouts. Never retried.
    ConnectionFatal,
    /// The requested protocol/cipher pair is not valid. Recorded as a normal row.
    ProtocolInvalid,
    /// Empty chains and stale CRLs. Aborts processing of the item.
    DataIntegrity,
    /// One revocation source could not be used.
    PartialUnknown,
}

/// Error type for every fallible operation in the crate.
#[derive(Debug)]
pub enum ProbeError {
    /// DNS resolution failed for the given hostname
    DnsResolution {
        /// The hostname that failed to resolve
        hostname: String,
        /// The underlying I/O error
        source: io::Error,
    },

    /// TCP connection failed to the target address
    ConnectionFailed {
        /// The address (host:port) that connection failed to
        address: String,
        /// The underlying I/O error
        source: io::Error,
    },

    /// TLS handshake failed
    HandshakeFailed {
        /// Details about why the handshake failed
        details: String,
    },

    /// Network operation timeout
    Timeout {
        /// Description of which operation timed out
        operation: String,
    },

    /// Invalid input provided to the API
    InvalidInput {
        /// Which field/parameter was invalid
        field: String,
        /// Why it was invalid
        reason: String,
    },

    /// The protocol/cipher pair is not valid under the catalog
    UnsupportedCombination,

    /// The server presented no usable certificate chain
    EmptyChain {
        /// The domain whose chain was requested
        domain: String,
    },

    /// A CRL's next-update time is already in the past
    StaleCrl {
        /// Distribution point the CRL was fetched from
        url: String,
        /// The next-update timestamp carried by the CRL
        next_update: String,
    },

    /// Neither CRL nor OCSP produced a usable answer
    NoRevocationData,

    /// One revocation source failed
    RevocationCheckFailed {
        /// Description of the failure
        reason: String,
    },

    /// An HTTP exchange failed or returned an unexpected status
    Http {
        /// Requested URL
        url: String,
        /// What went wrong
        details: String,
    },

    /// Certificate parsing error
    CertificateError {
        /// Description of what went wrong
        reason: String,
    },

    /// OpenSSL error occurred
    OpenSSLError {
        /// The underlying OpenSSL error
        details: String,
    },

    /// Generic I/O error
    IoError {
        /// The underlying I/O error
        source: io::Error,
    },

    /// The operation was cancelled through its `CancellationToken`
    Cancelled,

    /// A generic error with a custom message
    Other {
        /// Error message
        message: String,
    },
}

impl ProbeError {
    /// Maps the error onto the crate's error taxonomy.
    pub fn class(&self) -> ErrorClass {
        match self {
            Self::Timeout { .. } => ErrorClass::TransientNetwork,
            Self::IoError { source } if is_timeout_kind(source.kind()) => {
                ErrorClass::TransientNetwork
            }
            Self::UnsupportedCombination => ErrorClass::ProtocolInvalid,
            Self::EmptyChain { .. } | Self::StaleCrl { .. } => ErrorClass::DataIntegrity,
            Self::NoRevocationData | Self::RevocationCheckFailed { .. } => {
                ErrorClass::PartialUnknown
            }
            _ => ErrorClass::ConnectionFatal,
        }
    }

    /// True only for transient I/O timeouts.
    pub fn is_retryable(&self) -> bool {
        if self.class() == ErrorClass::TransientNetwork {
            return true;
        }
        let message = self.to_string();
        message.contains("i/o timeout") || message.contains("timed out")
    }
}

fn is_timeout_kind(kind: io::ErrorKind) -> bool {
    matches!(kind, io::ErrorKind::TimedOut | io::ErrorKind::WouldBlock)
}

impl fmt::Display for ProbeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::DnsResolution { hostname, source } => {
                write!(f, "failed to resolve hostname {}: {}", hostname, source)
            }
            Self::ConnectionFailed { address, source } => {
                write!(f, "connection to {} failed: {}", address, source)
            }
            Self::HandshakeFailed { details } => {
                write!(f, "TLS handshake failed: {}", details)
            }
            Self::Timeout { operation } => {
                write!(f, "operation timed out: {}", operation)
            }
            Self::InvalidInput { field, reason } => {
                write!(f, "invalid input for '{}': {}", field, reason)
            }
            Self::UnsupportedCombination => {
                write!(f, "unsupported protocol-cipher combination")
            }
            Self::EmptyChain { domain } => {
                write!(f, "certificate chain can not be empty: {}", domain)
            }
            Self::StaleCrl { url, next_update } => {
                write!(f, "CRL is outdated: {} (next update {})", url, next_update)
            }
            Self::NoRevocationData => {
                write!(f, "unable to retrieve certificate revocation information")
            }
            Self::RevocationCheckFailed { reason } => {
                write!(f, "revocation check failed: {}", reason)
            }
            Self::Http { url, details } => {
                write!(f, "request to {} failed: {}", url, details)
            }
            Self::CertificateError { reason } => {
                write!(f, "certificate error: {}", reason)
            }
            Self::OpenSSLError { details } => {
                write!(f, "OpenSSL error: {}", details)
            }
            Self::IoError { source } => {
                write!(f, "I/O error: {}", source)
            }
            Self::Cancelled => write!(f, "operation cancelled"),
            Self::Other { message } => {
                write!(f, "{}", message)
            }
        }
    }
}

impl std::error::Error for ProbeError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::DnsResolution { source, .. } => Some(source),
            Self::ConnectionFailed { source, .. } => Some(source),
            Self::IoError { source } => Some(source),
            _ => None,
        }
    }
}

// Conversion implementations

impl From<io::Error> for ProbeError {
    fn from(e: io::Error) -> Self {
        if is_timeout_kind(e.kind()) {
            return Self::Timeout {
                operation: e.to_string(),
            };
        }
        Self::IoError { source: e }
    }
}

impl From<&str> for ProbeError {
    fn from(s: &str) -> Self {
        Self::Other {
            message: s.to_string(),
        }
    }
}

impl From<String> for ProbeError {
    fn from(s: String) -> Self {
        Self::Other { message: s }
    }
}

impl From<openssl::error::ErrorStack> for ProbeError {
    fn from(e: openssl::error::ErrorStack) -> Self {
        Self::OpenSSLError {
            details: e.to_string(),
        }
    }
}

impl<S: fmt::Debug> From<openssl::ssl::HandshakeError<S>> for ProbeError {
    fn from(e: openssl::ssl::HandshakeError<S>) -> Self {
        use openssl::ssl::HandshakeError;

        let timed_out = match &e {
            HandshakeError::Failure(mid) | HandshakeError::WouldBlock(mid) => mid
                .error()
                .io_error()
                .map(|io| is_timeout_kind(io.kind()))
                .unwrap_or(false),
            HandshakeError::SetupFailure(_) => false,
        };
        if timed_out {
            return Self::Timeout {
                operation: format!("TLS handshake: {}", e),
            };
        }
        Self::HandshakeFailed {
            details: format!("{}", e),
        }
    }
}

impl From<reqwest::Error> for ProbeError {
    fn from(e: reqwest::Error) -> Self {
        let url = e.url().map(|u| u.to_string()).unwrap_or_default();
        if e.is_timeout() {
            return Self::Timeout {
                operation: format!("HTTP request to {}", url),
            };
        }
        Self::Http {
            url,
            details: e.to_string(),
        }
    }
}
