//! The dispatch engine.
//!
//! [`SmtpDispatcher::send`] splits sending into two stages:
//!
//! 1. **Construction**, synchronous, on the caller's thread: an empty
//!    [`Email`] is created, handed to the [`MessageAuthor`], and frozen into a
//!    MIME message. Failures come back immediately as [`ConstructionError`]
//!    and nothing is queued.
//! 2. **Delivery**, asynchronous, on the caller's [`Executor`]: one task per
//!    message opens its own connection, negotiates TLS, authenticates and
//!    transmits. The outcome resolves the returned [`Dispatch`]; failures are
//!    [`DeliveryError`]s and never surface on the submitting thread.
//!
//! Nothing is retried. Dropping a [`Dispatch`] does not cancel the
//! transmission; cancellation is not supported.

use std::error::Error as StdError;
use std::future::Future;
use std::io;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;

#[cfg(feature = "metrics")]
use std::time::Instant;

use lettre::{AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor};
use thiserror::Error;
use tokio::sync::oneshot;
use tracing::Instrument;

use crate::address::Address;
use crate::author::MessageAuthor;
use crate::config::{default_from, Timeouts, TransportConfig, TransportSecurity, TransportSettings};
use crate::email::Email;
use crate::error::{
    error_chain, ConfigError, ConstructionError, DeliveryError, DeliveryErrorKind, DispatchError,
};
use crate::executor::Executor;

/// Anything that can send an authored email.
///
/// Object safe, so services can hold an `Arc<dyn EmailSender>` and swap in a
/// fake for tests.
pub trait EmailSender: Send + Sync {
    /// Author a message and queue it for delivery.
    ///
    /// The author has finished (including its side effects) by the time this
    /// returns. Construction failures are returned here; delivery failures
    /// only through the [`Dispatch`].
    fn send(&self, author: &dyn MessageAuthor) -> Result<Dispatch, ConstructionError>;
}

/// Convenience methods for every [`EmailSender`].
pub trait EmailSenderExt: EmailSender {
    /// Send and wait up to `limit` for the outcome.
    ///
    /// Authoring still happens before this returns the future. When `limit`
    /// elapses the transmission keeps running in the background.
    fn send_and_wait(
        &self,
        author: &dyn MessageAuthor,
        limit: Duration,
    ) -> impl Future<Output = Result<String, DispatchError>> + Send {
        let dispatch = self.send(author);
        async move { dispatch?.wait(limit).await }
    }
}

impl<S: EmailSender + ?Sized> EmailSenderExt for S {}

/// Pending outcome of one transmission.
///
/// Resolves exactly once, to the message id on success or a
/// [`DeliveryError`]. If the executor drops the task without running it the
/// dispatch resolves to [`DeliveryErrorKind::Abandoned`].
#[derive(Debug)]
#[must_use = "a Dispatch does nothing unless awaited; the email is sent either way"]
pub struct Dispatch {
    message_id: String,
    outcome: oneshot::Receiver<Result<String, DeliveryError>>,
}

impl Dispatch {
    /// The `Message-ID` assigned during construction. Known before delivery.
    pub fn message_id(&self) -> &str {
        &self.message_id
    }

    /// Await the outcome for at most `limit`.
    pub async fn wait(self, limit: Duration) -> Result<String, DispatchError> {
        match tokio::time::timeout(limit, self).await {
            Ok(outcome) => outcome.map_err(DispatchError::from),
            Err(_) => Err(DispatchError::WaitTimedOut(limit)),
        }
    }
}

impl Future for Dispatch {
    type Output = Result<String, DeliveryError>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        Pin::new(&mut self.outcome)
            .poll(cx)
            .map(|received| received.unwrap_or_else(|_| Err(DeliveryError::abandoned())))
    }
}

/// The whole attempt outlived its timeout budget.
#[derive(Debug, Error)]
#[error("no complete exchange with {host}:{port} within {after:?}")]
pub struct AttemptTimedOut {
    pub host: String,
    pub port: u16,
    pub after: Duration,
}

struct Inner {
    transport: AsyncSmtpTransport<Tokio1Executor>,
    settings: TransportSettings,
    security: TransportSecurity,
    default_from: Option<Address>,
}

/// Sends email over SMTP, one connection per message, on a caller-supplied
/// executor.
///
/// ```rust,ignore
/// use courier::{Email, EmailSender, SmtpDispatcher, Timeouts, TransportConfig};
///
/// let config = TransportConfig::from_env()?;
/// let dispatcher = SmtpDispatcher::new(config, tokio::runtime::Handle::current(), Timeouts::from_millis(3000)?)?;
///
/// let dispatch = dispatcher.send(&|email: Email| -> Result<Email, courier::BoxError> {
///     Ok(email.from("shop@example.com").to("me@example.com").subject("Hi").text_body("Hello"))
/// })?;
/// println!("sent {}", dispatch.await?);
/// ```
#[derive(Clone)]
pub struct SmtpDispatcher {
    inner: Arc<Inner>,
    executor: Arc<dyn Executor>,
}

impl SmtpDispatcher {
    /// Create a dispatcher. Fails only on invalid configuration; the server
    /// is not contacted until the first send.
    pub fn new(
        config: TransportConfig,
        executor: impl Executor + 'static,
        timeouts: Timeouts,
    ) -> Result<Self, ConfigError> {
        Self::builder(config, executor).timeouts(timeouts).build()
    }

    /// Start a builder with default timeouts and no default sender.
    pub fn builder(config: TransportConfig, executor: impl Executor + 'static) -> SmtpDispatcherBuilder {
        SmtpDispatcherBuilder {
            config,
            executor: Arc::new(executor),
            timeouts: Timeouts::default(),
            default_from: None,
        }
    }

    /// Build from `SMTP_*` and `EMAIL_FROM*` environment variables.
    pub fn from_env(executor: impl Executor + 'static) -> Result<Self, ConfigError> {
        let mut builder =
            Self::builder(TransportConfig::from_env()?, executor).timeouts(Timeouts::from_env()?);
        if let Some(from) = default_from() {
            builder = builder.default_from(from);
        }
        builder.build()
    }

    /// The protocol-client settings this dispatcher was built with.
    pub fn settings(&self) -> &TransportSettings {
        &self.inner.settings
    }

    fn construct(&self, author: &dyn MessageAuthor) -> Result<(String, Message), ConstructionError> {
        let mut email = author.author(Email::new()).map_err(|err| {
            tracing::debug!(error = %err, "Message author failed");
            ConstructionError::new(err)
        })?;

        if email.from.is_none() {
            email.from = self.inner.default_from.clone();
        }

        email.build().map_err(|err| {
            tracing::debug!(error = %err, "Message could not be built");
            ConstructionError::new(err)
        })
    }
}

impl EmailSender for SmtpDispatcher {
    fn send(&self, author: &dyn MessageAuthor) -> Result<Dispatch, ConstructionError> {
        let span = tracing::info_span!(
            "courier.send",
            host = %self.inner.settings.host,
            security = %self.inner.security,
        );
        let _guard = span.enter();

        let (message_id, message) = self.construct(author)?;

        let (tx, rx) = oneshot::channel();
        let inner = Arc::clone(&self.inner);
        let id = message_id.clone();
        let task = async move {
            let outcome = inner.deliver(message).await.map(|()| id);
            // The caller may have dropped the Dispatch; that is fine.
            let _ = tx.send(outcome);
        }
        .instrument(tracing::info_span!(
            "courier.deliver",
            message_id = %message_id,
            host = %self.inner.settings.host,
            port = self.inner.settings.port,
        ));

        self.executor.execute(Box::pin(task));
        tracing::debug!(message_id = %message_id, "Transmission submitted");

        Ok(Dispatch {
            message_id,
            outcome: rx,
        })
    }
}

impl Inner {
    async fn deliver(&self, message: Message) -> Result<(), DeliveryError> {
        #[cfg(feature = "metrics")]
        let start = Instant::now();

        let result = self.transmit(message).await;

        #[cfg(feature = "metrics")]
        {
            let duration = start.elapsed().as_secs_f64();
            let status = match &result {
                Ok(()) => "success",
                Err(e) => e.kind().as_str(),
            };
            metrics::counter!("courier_emails_total", "status" => status).increment(1);
            metrics::histogram!("courier_delivery_duration_seconds").record(duration);
        }

        match &result {
            Ok(()) => tracing::info!("Email delivered"),
            Err(e) => tracing::warn!(kind = %e.kind(), error = %e.chain(), "Email delivery failed"),
        }

        result
    }

    async fn transmit(&self, message: Message) -> Result<(), DeliveryError> {
        let deadline = self.settings.timeouts.attempt_deadline();

        match tokio::time::timeout(deadline, self.transport.send(message)).await {
            Ok(Ok(response)) => {
                tracing::debug!(code = %response.code(), "Server accepted message");
                Ok(())
            }
            Ok(Err(err)) => Err(classify(err, self.security)),
            Err(_) => Err(DeliveryError::new(
                DeliveryErrorKind::Timeout,
                AttemptTimedOut {
                    host: self.settings.host.clone(),
                    port: self.settings.port,
                    after: deadline,
                },
            )),
        }
    }
}

/// Builder for [`SmtpDispatcher`].
pub struct SmtpDispatcherBuilder {
    config: TransportConfig,
    executor: Arc<dyn Executor>,
    timeouts: Timeouts,
    default_from: Option<Address>,
}

impl SmtpDispatcherBuilder {
    /// Set the connect/read/write timeouts.
    pub fn timeouts(mut self, timeouts: Timeouts) -> Self {
        self.timeouts = timeouts;
        self
    }

    /// Sender used when the author leaves `from` empty.
    pub fn default_from(mut self, from: impl Into<Address>) -> Self {
        self.default_from = Some(from.into());
        self
    }

    pub fn build(self) -> Result<SmtpDispatcher, ConfigError> {
        let settings = self.config.transport_settings(&self.timeouts)?;
        let transport = settings.build_transport()?;

        tracing::debug!(
            host = %settings.host,
            port = settings.port,
            security = %self.config.security(),
            "SMTP dispatcher configured"
        );

        Ok(SmtpDispatcher {
            inner: Arc::new(Inner {
                transport,
                settings,
                security: self.config.security(),
                default_from: self.default_from,
            }),
            executor: self.executor,
        })
    }
}

/// Map a protocol-client error onto a delivery failure kind.
fn classify(err: lettre::transport::smtp::Error, security: TransportSecurity) -> DeliveryError {
    let kind = if err.is_timeout() || timed_out(&err) {
        DeliveryErrorKind::Timeout
    } else if security == TransportSecurity::UpgradeToTls && upgrade_unavailable(&err) {
        DeliveryErrorKind::TlsUpgradeRefused
    } else if err.is_tls() {
        DeliveryErrorKind::Tls
    } else if rejected_credentials(&err) {
        DeliveryErrorKind::Authentication
    } else if err.is_permanent() || err.is_transient() {
        DeliveryErrorKind::Rejected
    } else if err.is_response() || err.is_client() {
        DeliveryErrorKind::Protocol
    } else {
        DeliveryErrorKind::Connection
    };

    DeliveryError::new(kind, err)
}

/// lettre has no dedicated kind for a missing STARTTLS extension. With
/// `Tls::Required` it raises a client error reading "STARTTLS is not
/// supported on this server" (lettre 0.11 `AsyncSmtpConnection::starttls`).
/// If that wording changes this falls through to `Protocol`; the
/// `missing_starttls_aborts_before_content` integration test pins it.
fn upgrade_unavailable(err: &lettre::transport::smtp::Error) -> bool {
    err.is_client() && error_chain(err).to_ascii_uppercase().contains("STARTTLS")
}

/// 534/535/538 are only ever answers to AUTH.
fn rejected_credentials(err: &lettre::transport::smtp::Error) -> bool {
    err.status()
        .map(|code| matches!(code.to_string().as_str(), "534" | "535" | "538"))
        .unwrap_or(false)
}

fn timed_out(err: &(dyn StdError + 'static)) -> bool {
    let mut current = Some(err);
    while let Some(e) = current {
        if e.is::<tokio::time::error::Elapsed>() {
            return true;
        }
        if let Some(io_err) = e.downcast_ref::<io::Error>() {
            if io_err.kind() == io::ErrorKind::TimedOut {
                return true;
            }
        }
        current = e.source();
    }
    false
}
