//! Error types and handling for delivery-core operations.
//!
//! Failures are split by where they happen so callers can tell them apart
//! without inspecting internal state:
//!
//! - **Attempt failures**: one remote call went wrong, either because the
//!   server answered with a non-2xx status ([`AttemptFailure::Rejected`]) or
//!   because the transport never got an answer ([`TransportError`]). Each is
//!   classified into a [`FailureKind`] which drives retry decisions.
//! - **Terminal failures**: the retry policy gave up. [`TerminalFailure`]
//!   wraps the last attempt failure together with the attempt count and the
//!   total elapsed time.
//! - **Cancellation**: the caller abandoned the request. Reported as
//!   [`CancellationFailure`], never as a terminal failure.
//! - **Parse errors**: rich-text markup was malformed or a resolution strategy
//!   failed. [`ParseError`] carries the byte offset of the offending token and
//!   is never retried.
//!
//! The crate-wide [`Error`] wraps all of the above plus configuration and
//! serialization failures, and exposes [`Error::category`] and
//! [`Error::is_recoverable`] for logging and retry-at-a-higher-level logic.
//!
//! ```rust
//! use delivery_core::{Error, FailureKind};
//!
//! fn describe(err: &Error) -> &'static str {
//!     match err {
//!         Error::Terminal(t) if t.last.status().is_some() => "server rejected request",
//!         Error::Terminal(t) if t.last.kind() == FailureKind::Network => "network unreachable",
//!         Error::Parse(_) => "malformed content",
//!         _ => "other failure",
//!     }
//! }
//! # let _ = describe;
//! ```

use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Classification of a failed attempt.
///
/// The retry policy only ever looks at this value, never at the raw status or
/// transport error, so custom classifiers can remap statuses freely.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// Connection refused, DNS failure, reset, or any other transport error.
    Network,
    /// The request or the connection timed out (including HTTP 408).
    Timeout,
    /// The server throttled the request (HTTP 429).
    RateLimited,
    /// The server failed to handle the request (HTTP 5xx).
    ServerError,
    /// The server rejected the request itself (HTTP 4xx other than 408/429).
    ClientError,
    /// Anything that fits none of the above, such as an unexpected 3xx.
    Other,
}

impl FailureKind {
    /// Whether this kind of failure is usually temporary.
    ///
    /// This is the basis of the default retryable set; it does not decide
    /// retries by itself.
    #[must_use]
    pub const fn is_transient(self) -> bool {
        matches!(
            self,
            Self::Network | Self::Timeout | Self::RateLimited | Self::ServerError
        )
    }

    /// Stable snake_case identifier, matching the serialized form.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Network => "network",
            Self::Timeout => "timeout",
            Self::RateLimited => "rate_limited",
            Self::ServerError => "server_error",
            Self::ClientError => "client_error",
            Self::Other => "other",
        }
    }
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Default mapping of non-2xx HTTP status codes to failure kinds.
///
/// 429 is the only 4xx treated as throttling; 408 counts as a timeout.
#[must_use]
pub const fn classify_status(status: u16) -> FailureKind {
    match status {
        429 => FailureKind::RateLimited,
        408 => FailureKind::Timeout,
        400..=499 => FailureKind::ClientError,
        500..=599 => FailureKind::ServerError,
        _ => FailureKind::Other,
    }
}

/// The transport could not produce a response at all.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{}: {message}", describe_transport(.kind))]
pub struct TransportError {
    /// Classification used by the retry policy.
    pub kind: FailureKind,
    /// Human-readable detail from the underlying transport.
    pub message: String,
}

const fn describe_transport(kind: &FailureKind) -> &'static str {
    match kind {
        FailureKind::Network => "network unreachable",
        FailureKind::Timeout => "request timed out",
        _ => "transport failure",
    }
}

impl TransportError {
    /// Create a transport error of an explicit kind.
    pub fn new(kind: FailureKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    /// Connection-level failure.
    pub fn network(message: impl Into<String>) -> Self {
        Self::new(FailureKind::Network, message)
    }

    /// Timeout while connecting or waiting for the response.
    pub fn timeout(message: impl Into<String>) -> Self {
        Self::new(FailureKind::Timeout, message)
    }
}

impl From<reqwest::Error> for TransportError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            Self::timeout(err.to_string())
        } else {
            Self::network(err.to_string())
        }
    }
}

/// Outcome of one failed attempt.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AttemptFailure {
    /// The server answered with a non-2xx status.
    #[error("server rejected request with status {status} ({kind})")]
    Rejected {
        /// HTTP status code returned by the server.
        status: u16,
        /// Classification of the status.
        kind: FailureKind,
        /// Response body, kept for diagnostics.
        body: String,
    },
    /// No response was received.
    #[error(transparent)]
    Transport(#[from] TransportError),
}

impl AttemptFailure {
    /// Classification of this failure.
    #[must_use]
    pub const fn kind(&self) -> FailureKind {
        match self {
            Self::Rejected { kind, .. } => *kind,
            Self::Transport(err) => err.kind,
        }
    }

    /// HTTP status, when the server answered.
    #[must_use]
    pub const fn status(&self) -> Option<u16> {
        match self {
            Self::Rejected { status, .. } => Some(*status),
            Self::Transport(_) => None,
        }
    }
}

/// The retry policy stopped retrying.
///
/// `last` is the failure of the final attempt. Earlier failures are not kept.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("request failed after {attempts} attempt(s) in {elapsed:?}: {last}")]
pub struct TerminalFailure {
    /// Total number of attempts made, including the first.
    pub attempts: u32,
    /// Wall time from the first attempt to giving up.
    pub elapsed: Duration,
    /// Failure of the last attempt.
    #[source]
    pub last: AttemptFailure,
}

/// The caller cancelled the request before it completed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("request cancelled after {attempts} attempt(s) in {elapsed:?}")]
pub struct CancellationFailure {
    /// Attempts started before cancellation was observed.
    pub attempts: u32,
    /// Wall time until cancellation was observed.
    pub elapsed: Duration,
}

/// Failure of a resilient invocation.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum InvokeError {
    /// Retries were exhausted or the failure was not retryable.
    #[error(transparent)]
    Terminal(#[from] TerminalFailure),
    /// The caller cancelled the request.
    #[error(transparent)]
    Cancelled(#[from] CancellationFailure),
}

/// A resolution strategy could not produce output for an item.
#[derive(Debug, Error)]
#[error("{message}")]
pub struct StrategyFailure {
    message: String,
    #[source]
    source: Option<Box<dyn std::error::Error + Send + Sync>>,
}

impl StrategyFailure {
    /// Create a failure with a message.
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            source: None,
        }
    }

    /// Create a failure that wraps an underlying error.
    pub fn with_source(
        message: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self {
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }

    /// The failure message, without the source chain.
    #[must_use]
    pub fn message(&self) -> &str {
        &self.message
    }
}

/// Rich-text parsing failed.
///
/// `offset` is the byte offset into the markup of the token that caused the
/// failure.
#[derive(Debug, Error)]
#[error("{kind} (at byte {offset})")]
pub struct ParseError {
    /// Byte offset of the offending token.
    pub offset: usize,
    /// What went wrong.
    pub kind: ParseErrorKind,
}

impl ParseError {
    pub(crate) const fn new(offset: usize, kind: ParseErrorKind) -> Self {
        Self { offset, kind }
    }

    /// Whether the failure came from a resolution strategy rather than the
    /// markup itself.
    #[must_use]
    pub const fn is_strategy_failure(&self) -> bool {
        matches!(self.kind, ParseErrorKind::Strategy { .. })
    }
}

/// Reason for a [`ParseError`].
#[derive(Debug, Error)]
pub enum ParseErrorKind {
    /// A closing tag appeared with no element open.
    #[error("malformed content: closing </{name}> has no matching opening element")]
    UnmatchedClose {
        /// Tag name of the closing marker.
        name: String,
    },
    /// A closing tag did not match the innermost open element.
    #[error("malformed content: expected </{expected}> but found </{found}>")]
    MismatchedClose {
        /// Innermost open element.
        expected: String,
        /// Closing tag that was found.
        found: String,
    },
    /// The input ended while an element was still open.
    #[error("malformed content: <{name}> is never closed")]
    Unclosed {
        /// Tag name of the open element.
        name: String,
    },
    /// An embedded reference had no `data-codename` attribute.
    #[error("malformed content: embedded reference is missing data-codename")]
    MissingCodename,
    /// The tokenizer rejected the input.
    #[error("malformed content: {0}")]
    Markup(String),
    /// A registered resolution strategy failed.
    #[error("resolving '{codename}' of type '{content_type}' failed: {source}")]
    Strategy {
        /// Codename of the embedded item.
        codename: String,
        /// Content type of the embedded item.
        content_type: String,
        /// Failure reported by the strategy.
        #[source]
        source: StrategyFailure,
    },
}

/// The main error type for delivery-core operations.
#[derive(Error, Debug)]
pub enum Error {
    /// I/O operation failed (configuration files).
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Rich-text markup was malformed or a resolution strategy failed.
    #[error("Parse error: {0}")]
    Parse(#[from] ParseError),

    /// The remote call failed and retries are exhausted.
    #[error("Delivery request failed: {0}")]
    Terminal(#[from] TerminalFailure),

    /// The caller cancelled the remote call.
    #[error("Delivery request cancelled: {0}")]
    Cancelled(#[from] CancellationFailure),

    /// Requested item or element does not exist.
    #[error("Not found: {0}")]
    NotFound(String),

    /// URL is malformed or not absolute.
    #[error("Invalid URL: {0}")]
    InvalidUrl(String),

    /// Configuration is invalid or inaccessible.
    #[error("Configuration error: {0}")]
    Config(String),

    /// Response or configuration payload could not be (de)serialized.
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Generic error for uncategorized failures.
    #[error("{0}")]
    Other(String),
}

impl From<InvokeError> for Error {
    fn from(err: InvokeError) -> Self {
        match err {
            InvokeError::Terminal(t) => Self::Terminal(t),
            InvokeError::Cancelled(c) => Self::Cancelled(c),
        }
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}

impl From<toml::ser::Error> for Error {
    fn from(err: toml::ser::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}

impl From<toml::de::Error> for Error {
    fn from(err: toml::de::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}

impl From<url::ParseError> for Error {
    fn from(err: url::ParseError) -> Self {
        Self::InvalidUrl(err.to_string())
    }
}

impl Error {
    /// Check if the error might go away if the whole operation is repeated
    /// later.
    ///
    /// A terminal failure whose last cause was transient (for example the
    /// server kept answering 503) is recoverable; one caused by a client
    /// error is not. Parse errors never are.
    #[must_use]
    pub fn is_recoverable(&self) -> bool {
        match self {
            Self::Terminal(t) => t.last.kind().is_transient(),
            Self::Io(e) => matches!(
                e.kind(),
                std::io::ErrorKind::TimedOut | std::io::ErrorKind::Interrupted
            ),
            _ => false,
        }
    }

    /// Get the error category as a string identifier.
    ///
    /// Terminal failures are split into `"server"` (a status was received)
    /// and `"network"` (no response at all).
    #[must_use]
    pub const fn category(&self) -> &'static str {
        match self {
            Self::Io(_) => "io",
            Self::Parse(_) => "parse",
            Self::Terminal(TerminalFailure {
                last: AttemptFailure::Rejected { .. },
                ..
            }) => "server",
            Self::Terminal(_) => "network",
            Self::Cancelled(_) => "cancelled",
            Self::NotFound(_) => "not_found",
            Self::InvalidUrl(_) => "url",
            Self::Config(_) => "config",
            Self::Serialization(_) => "serialization",
            Self::Other(_) => "other",
        }
    }
}

/// Convenience type alias for `Result<T, Error>`.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::panic, clippy::disallowed_macros)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use std::error::Error as StdError;

    fn terminal(last: AttemptFailure) -> TerminalFailure {
        TerminalFailure {
            attempts: 3,
            elapsed: Duration::from_millis(300),
            last,
        }
    }

    #[test]
    fn test_classify_status() {
        assert_eq!(classify_status(429), FailureKind::RateLimited);
        assert_eq!(classify_status(408), FailureKind::Timeout);
        assert_eq!(classify_status(404), FailureKind::ClientError);
        assert_eq!(classify_status(401), FailureKind::ClientError);
        assert_eq!(classify_status(500), FailureKind::ServerError);
        assert_eq!(classify_status(503), FailureKind::ServerError);
        assert_eq!(classify_status(302), FailureKind::Other);
    }

    #[test]
    fn test_transient_kinds() {
        assert!(FailureKind::Network.is_transient());
        assert!(FailureKind::Timeout.is_transient());
        assert!(FailureKind::RateLimited.is_transient());
        assert!(FailureKind::ServerError.is_transient());
        assert!(!FailureKind::ClientError.is_transient());
        assert!(!FailureKind::Other.is_transient());
    }

    #[test]
    fn test_failure_kind_serde_matches_display() {
        for kind in [
            FailureKind::Network,
            FailureKind::Timeout,
            FailureKind::RateLimited,
            FailureKind::ServerError,
            FailureKind::ClientError,
            FailureKind::Other,
        ] {
            let json = serde_json::to_string(&kind).unwrap();
            assert_eq!(json, format!("\"{kind}\""));
        }
    }

    #[test]
    fn test_terminal_messages_distinguish_causes() {
        let rejected = terminal(AttemptFailure::Rejected {
            status: 403,
            kind: FailureKind::ClientError,
            body: String::new(),
        });
        let unreachable = terminal(AttemptFailure::Transport(TransportError::network(
            "connection refused",
        )));

        let rejected = rejected.to_string();
        let unreachable = unreachable.to_string();
        assert!(rejected.contains("server rejected request with status 403"));
        assert!(rejected.contains("after 3 attempt(s)"));
        assert!(unreachable.contains("network unreachable: connection refused"));

        let parse = ParseError::new(
            12,
            ParseErrorKind::UnmatchedClose {
                name: "p".to_string(),
            },
        );
        assert!(parse.to_string().starts_with("malformed content"));
        assert!(parse.to_string().contains("at byte 12"));
    }

    #[test]
    fn test_error_categories() {
        let server = Error::from(terminal(AttemptFailure::Rejected {
            status: 500,
            kind: FailureKind::ServerError,
            body: String::new(),
        }));
        let network = Error::from(terminal(TransportError::timeout("slow").into()));
        let cancelled = Error::from(CancellationFailure {
            attempts: 1,
            elapsed: Duration::ZERO,
        });
        let parse = Error::from(ParseError::new(0, ParseErrorKind::MissingCodename));

        assert_eq!(server.category(), "server");
        assert_eq!(network.category(), "network");
        assert_eq!(cancelled.category(), "cancelled");
        assert_eq!(parse.category(), "parse");
        assert_eq!(Error::Config("x".into()).category(), "config");
        assert_eq!(Error::NotFound("x".into()).category(), "not_found");
    }

    #[test]
    fn test_error_recoverability() {
        let transient = Error::from(terminal(AttemptFailure::Rejected {
            status: 503,
            kind: FailureKind::ServerError,
            body: String::new(),
        }));
        let permanent = Error::from(terminal(AttemptFailure::Rejected {
            status: 404,
            kind: FailureKind::ClientError,
            body: String::new(),
        }));

        assert!(transient.is_recoverable());
        assert!(!permanent.is_recoverable());
        assert!(!Error::from(ParseError::new(0, ParseErrorKind::MissingCodename)).is_recoverable());
        assert!(
            !Error::from(CancellationFailure {
                attempts: 2,
                elapsed: Duration::ZERO,
            })
            .is_recoverable()
        );
        assert!(
            Error::Io(std::io::Error::new(std::io::ErrorKind::TimedOut, "t")).is_recoverable()
        );
    }

    #[test]
    fn test_invoke_error_conversion_keeps_kind() {
        let cancelled: Error = InvokeError::Cancelled(CancellationFailure {
            attempts: 1,
            elapsed: Duration::ZERO,
        })
        .into();
        assert!(matches!(cancelled, Error::Cancelled(_)));

        let failed: Error = InvokeError::Terminal(terminal(TransportError::network("x").into())).into();
        assert!(matches!(failed, Error::Terminal(_)));
    }

    #[test]
    fn test_error_chain_source() {
        let io = std::io::Error::other("disk on fire");
        let strategy = StrategyFailure::with_source("element missing", io);
        let err = ParseError::new(
            40,
            ParseErrorKind::Strategy {
                codename: "hero".into(),
                content_type: "banner".into(),
                source: strategy,
            },
        );

        assert!(err.is_strategy_failure());
        let kind_source = err.kind.source().unwrap();
        assert_eq!(kind_source.to_string(), "element missing");
        assert_eq!(kind_source.source().unwrap().to_string(), "disk on fire");
    }

    #[test]
    fn test_terminal_failure_source_is_last_attempt() {
        let failure = terminal(TransportError::network("reset").into());
        let source = failure.source().unwrap();
        assert_eq!(source.to_string(), "network unreachable: reset");
    }

    #[test]
    fn test_from_serde_json_error() {
        let err: Error = serde_json::from_str::<serde_json::Value>("{").unwrap_err().into();
        assert!(matches!(err, Error::Serialization(_)));
    }

    proptest! {
        #[test]
        fn test_config_error_with_arbitrary_messages(msg in r".{0,500}") {
            let err = Error::Config(msg.clone());
            prop_assert_eq!(err.to_string(), format!("Configuration error: {msg}"));
            prop_assert_eq!(err.category(), "config");
        }

        #[test]
        fn test_status_classification_is_total(status in 0u16..1000) {
            let kind = classify_status(status);
            if (500..600).contains(&status) {
                prop_assert_eq!(kind, FailureKind::ServerError);
            }
            if (400..500).contains(&status) && status != 408 && status != 429 {
                prop_assert_eq!(kind, FailureKind::ClientError);
            }
        }
    }
}
