//! Error types for courier.
//!
//! Failures fall into two disjoint stages:
//!
//! - [`ConstructionError`] - building or filling the message failed. Nothing
//!   touched the network; returned directly from `send`.
//! - [`DeliveryError`] - connecting, authenticating or transmitting failed
//!   after the message was built. Only ever observed through the
//!   [`Dispatch`](crate::Dispatch) future.
//!
//! Both keep the underlying error reachable through
//! [`std::error::Error::source`].

use std::error::Error as StdError;
use std::time::Duration;

use thiserror::Error;

/// Boxed error accepted from message authors and used as a cause.
pub type BoxError = Box<dyn StdError + Send + Sync + 'static>;

/// Low-level errors raised while turning an [`Email`](crate::Email) into a
/// transmittable message.
#[derive(Debug, Clone, Error)]
pub enum MailError {
    /// Missing required field (e.g., from address).
    #[error("Missing required field: {0}")]
    MissingField(&'static str),

    /// Invalid email address format.
    #[error("Invalid email address: {0}")]
    InvalidAddress(String),

    /// Invalid custom header name or value.
    #[error("Invalid header: {0}")]
    InvalidHeader(String),

    /// Error reading or processing attachment (generic).
    #[error("Attachment error: {0}")]
    AttachmentError(String),

    /// Attachment has no content (neither data nor path provided).
    #[error("Attachment has no content: {0}")]
    AttachmentMissingContent(String),

    /// Attachment file not found.
    #[error("Attachment file not found: {0}")]
    AttachmentFileNotFound(String),

    /// Failed to read attachment file.
    #[error("Failed to read attachment: {0}")]
    AttachmentReadError(String),

    /// Error building the email message.
    #[error("Build error: {0}")]
    BuildError(String),
}

impl From<lettre::error::Error> for MailError {
    fn from(err: lettre::error::Error) -> Self {
        Self::BuildError(err.to_string())
    }
}

impl From<lettre::address::AddressError> for MailError {
    fn from(err: lettre::address::AddressError) -> Self {
        Self::InvalidAddress(err.to_string())
    }
}

/// Invalid transport configuration. Raised at build time, never retried.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// A required setting (usually an environment variable) is absent.
    #[error("Configuration error: {0} not set")]
    Missing(&'static str),

    /// Host must not be empty.
    #[error("Configuration error: SMTP host must not be empty")]
    EmptyHost,

    /// Port outside 1-65535 or not a number.
    #[error("Configuration error: invalid SMTP port '{0}'")]
    InvalidPort(String),

    /// Timeouts must be positive.
    #[error("Configuration error: invalid timeout '{0}', expected a positive number of milliseconds")]
    InvalidTimeout(String),

    /// Transport security mode is not one of the supported modes.
    #[error("Configuration error: unknown transport security '{0}', expected one of: none, tls_from_start, upgrade_to_tls")]
    UnknownSecurity(String),

    /// TLS parameters could not be assembled.
    #[error("Configuration error: TLS setup failed")]
    Tls(#[source] lettre::transport::smtp::Error),
}

/// The message could not be created or filled.
///
/// Returned synchronously from `send`; no transmission was attempted.
#[derive(Debug, Error)]
#[error("Failed to create e-mail")]
pub struct ConstructionError {
    #[source]
    source: BoxError,
}

impl ConstructionError {
    pub(crate) fn new(source: impl Into<BoxError>) -> Self {
        Self {
            source: source.into(),
        }
    }

    /// Borrow the underlying cause.
    pub fn cause(&self) -> &(dyn StdError + Send + Sync + 'static) {
        self.source.as_ref()
    }

    /// Attempt to downcast the cause to a concrete error type.
    pub fn downcast_ref<E: StdError + 'static>(&self) -> Option<&E> {
        self.source.downcast_ref::<E>()
    }

    /// Take ownership of the underlying cause.
    pub fn into_cause(self) -> BoxError {
        self.source
    }
}

/// What went wrong while transmitting a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryErrorKind {
    /// Name resolution failed, the connection was refused or dropped.
    Connection,
    /// Connecting to or waiting on the server exceeded the configured timeout.
    Timeout,
    /// The server does not offer STARTTLS although the upgrade is required.
    TlsUpgradeRefused,
    /// TLS handshake or certificate verification failed.
    Tls,
    /// The server rejected the credentials.
    Authentication,
    /// The server rejected the envelope or the message content.
    Rejected,
    /// Unexpected or malformed protocol exchange.
    Protocol,
    /// The executor dropped the task without running it.
    Abandoned,
}

impl DeliveryErrorKind {
    /// Stable lowercase label, used for logging and metrics.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Connection => "connection",
            Self::Timeout => "timeout",
            Self::TlsUpgradeRefused => "tls_upgrade_refused",
            Self::Tls => "tls",
            Self::Authentication => "authentication",
            Self::Rejected => "rejected",
            Self::Protocol => "protocol",
            Self::Abandoned => "abandoned",
        }
    }
}

impl std::fmt::Display for DeliveryErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Transmission failed after the message was built.
///
/// Delivered only through the [`Dispatch`](crate::Dispatch) future.
#[derive(Debug, Error)]
#[error("Failed to send e-mail ({kind})")]
pub struct DeliveryError {
    kind: DeliveryErrorKind,
    #[source]
    source: BoxError,
}

impl DeliveryError {
    pub(crate) fn new(kind: DeliveryErrorKind, source: impl Into<BoxError>) -> Self {
        Self {
            kind,
            source: source.into(),
        }
    }

    /// The executor dropped the task before it resolved the dispatch.
    pub(crate) fn abandoned() -> Self {
        Self::new(
            DeliveryErrorKind::Abandoned,
            "transmission task was dropped before completing",
        )
    }

    /// Classification of the failure.
    pub fn kind(&self) -> DeliveryErrorKind {
        self.kind
    }

    /// Shorthand for `kind() == DeliveryErrorKind::Timeout`.
    pub fn is_timeout(&self) -> bool {
        self.kind == DeliveryErrorKind::Timeout
    }

    /// Borrow the underlying cause.
    pub fn cause(&self) -> &(dyn StdError + Send + Sync + 'static) {
        self.source.as_ref()
    }

    /// Attempt to downcast the cause to a concrete error type.
    pub fn downcast_ref<E: StdError + 'static>(&self) -> Option<&E> {
        self.source.downcast_ref::<E>()
    }

    /// Render the full cause chain, outermost first, joined by `": "`.
    pub fn chain(&self) -> String {
        error_chain(self)
    }
}

/// Failure observed by [`EmailSenderExt::send_and_wait`](crate::EmailSenderExt::send_and_wait).
#[derive(Debug, Error)]
pub enum DispatchError {
    #[error(transparent)]
    Construction(#[from] ConstructionError),

    #[error(transparent)]
    Delivery(#[from] DeliveryError),

    /// The caller's wait limit elapsed. The transmission itself keeps running.
    #[error("Gave up waiting for delivery after {0:?}")]
    WaitTimedOut(Duration),
}

/// Join an error and all of its sources into one line.
pub(crate) fn error_chain(err: &(dyn StdError + 'static)) -> String {
    let mut out = err.to_string();
    let mut current = err.source();
    while let Some(cause) = current {
        out.push_str(": ");
        out.push_str(&cause.to_string());
        current = cause.source();
    }
    out
}
