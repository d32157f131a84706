//! # Courier
//!
//! Asynchronous outbound email over SMTP. Author a message on your thread,
//! hand the transmission to your executor, get the message id back.
//!
//! ## Quick Start
//!
//! Set environment variables:
//! ```bash
//! SMTP_HOST=smtp.example.com
//! SMTP_USERNAME=shop@example.com
//! SMTP_PASSWORD=secret
//! EMAIL_FROM=shop@example.com
//! EMAIL_FROM_NAME=Example Shop
//! ```
//!
//! Send from anywhere inside a tokio runtime:
//! ```rust,ignore
//! use courier::prelude::*;
//!
//! let dispatcher = SmtpDispatcher::from_env(tokio::runtime::Handle::current())?;
//!
//! let dispatch = dispatcher.send(&|email: Email| -> Result<Email, BoxError> {
//!     Ok(email
//!         .to("user@example.com")
//!         .subject("Welcome!")
//!         .text_body("Hello"))
//! })?;
//!
//! let message_id = dispatch.await?;
//! ```
//!
//! `send` returns as soon as the message is built and queued. Building
//! failures come back from `send` as [`ConstructionError`]; everything that
//! can go wrong on the wire arrives through the [`Dispatch`] as a
//! [`DeliveryError`].
//!
//! ## Executors
//!
//! The dispatcher owns no threads. Pass a [`tokio::runtime::Handle`] for
//! unbounded concurrency, a [`BoundedExecutor`] to cap connections, a
//! [`SerialExecutor`] for one-at-a-time in submission order, or any
//! `Fn(Task)` closure.
//!
//! ## Environment Variables
//!
//! | Variable | Description |
//! |----------|-------------|
//! | `SMTP_HOST` | SMTP server host (required) |
//! | `SMTP_PORT` | SMTP server port (default: 587) |
//! | `SMTP_SECURITY` | `none`, `tls_from_start` or `upgrade_to_tls` (default) |
//! | `SMTP_USERNAME` | SMTP username; empty disables AUTH |
//! | `SMTP_PASSWORD` | SMTP password |
//! | `SMTP_TIMEOUT_MS` | Connect/read/write timeout in milliseconds (default: 3000) |
//! | `EMAIL_FROM` | Default sender email |
//! | `EMAIL_FROM_NAME` | Default sender name |
//!
//! ## Metrics
//!
//! Enable `features = ["metrics"]` to emit Prometheus-style metrics:
//!
//! | Metric | Type | Labels | Description |
//! |--------|------|--------|-------------|
//! | `courier_emails_total` | Counter | status | Transmissions by outcome |
//! | `courier_delivery_duration_seconds` | Histogram | | Time per transmission |
//!
//! Install a recorder (e.g., `metrics-exporter-prometheus`) in your app to collect them.

/// The version of the courier crate.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

mod address;
mod attachment;
mod author;
mod config;
mod dispatch;
mod email;
mod error;
pub mod executor;

pub use address::{Address, ToAddress};
pub use attachment::{Attachment, AttachmentType};
pub use author::MessageAuthor;
pub use config::{
    default_from, Timeouts, TlsPolicy, TransportConfig, TransportConfigBuilder, TransportSecurity,
    TransportSettings, DEFAULT_TIMEOUT_MS, SUBMISSION_PORT,
};
pub use dispatch::{
    AttemptTimedOut, Dispatch, EmailSender, EmailSenderExt, SmtpDispatcher, SmtpDispatcherBuilder,
};
pub use email::Email;
pub use error::{
    BoxError, ConfigError, ConstructionError, DeliveryError, DeliveryErrorKind, DispatchError,
    MailError,
};
pub use executor::{BoundedExecutor, Executor, SerialExecutor, Task};

/// Everything needed to author and send, in one import.
pub mod prelude {
    pub use crate::Address;
    pub use crate::Attachment;
    pub use crate::BoxError;
    pub use crate::Dispatch;
    pub use crate::Email;
    pub use crate::MessageAuthor;
    pub use crate::ToAddress;
    pub use crate::{ConstructionError, DeliveryError, DeliveryErrorKind, DispatchError};
    pub use crate::{EmailSender, EmailSenderExt, SmtpDispatcher};
    pub use crate::{Timeouts, TransportConfig, TransportSecurity};
}
