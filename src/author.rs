//! The message authoring contract.
//!
//! An author receives the empty [`Email`] the dispatcher created and returns
//! the filled-in message. It runs once per `send`, synchronously on the
//! caller's thread, before anything is queued. Whatever error it returns is
//! reported as a [`ConstructionError`](crate::ConstructionError).
//!
//! # Example
//!
//! ```rust,ignore
//! use courier::{BoxError, Email, EmailSender};
//!
//! let dispatch = dispatcher.send(&|email: Email| -> Result<Email, BoxError> {
//!     Ok(email
//!         .from("shop@example.com")
//!         .to("customer@example.com")
//!         .subject("Your order")
//!         .text_body("It shipped."))
//! })?;
//! let message_id = dispatch.await?;
//! ```

use crate::email::Email;
use crate::error::BoxError;

/// Fills in an outgoing message.
///
/// For simple cases use a closure:
///
/// ```rust,ignore
/// dispatcher.send(&|email: Email| Ok::<_, MailError>(email.subject("Hi")))
/// ```
///
/// For reusable templates implement the trait on a struct:
///
/// ```rust,ignore
/// struct PasswordReset { to: String, link: String }
///
/// impl MessageAuthor for PasswordReset {
///     fn author(&self, email: Email) -> Result<Email, BoxError> {
///         Ok(email
///             .to(self.to.as_str())
///             .subject("Reset your password")
///             .text_body(format!("Follow {}", self.link)))
///     }
/// }
/// ```
pub trait MessageAuthor {
    /// Fill in `email`, or return a replacement for it.
    ///
    /// Return `Err(...)` to abort the send before anything is queued.
    fn author(&self, email: Email) -> Result<Email, BoxError>;
}

impl<F, E> MessageAuthor for F
where
    F: Fn(Email) -> Result<Email, E>,
    E: Into<BoxError>,
{
    fn author(&self, email: Email) -> Result<Email, BoxError> {
        (self)(email).map_err(Into::into)
    }
}
