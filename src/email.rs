//! The outgoing message handed to a [`MessageAuthor`](crate::MessageAuthor).

use chrono::{DateTime, Utc};
use lettre::message::header::{ContentType, HeaderName, HeaderValue};
use lettre::message::{MultiPart, SinglePart};
use lettre::Message;
use std::collections::HashMap;
use std::time::SystemTime;

use crate::address::{Address, ToAddress};
use crate::attachment::Attachment;
use crate::error::MailError;

/// Headers that are derived from the structured fields and cannot be set
/// through [`Email::header`].
const RESERVED_HEADERS: &[&str] = &[
    "from",
    "to",
    "cc",
    "bcc",
    "reply-to",
    "subject",
    "date",
    "content-type",
    "content-transfer-encoding",
    "mime-version",
];

/// An email message.
///
/// The dispatcher creates one empty `Email` per `send` and passes it to the
/// author, which fills it in with the builder methods:
///
/// ```
/// use courier::Email;
///
/// let email = Email::new()
///     .from("sender@example.com")
///     .to("recipient@example.com")
///     .subject("Hello!")
///     .text_body("Plain text content")
///     .html_body("<h1>HTML content</h1>");
/// assert!(email.is_valid());
/// ```
#[derive(Debug, Clone, Default)]
pub struct Email {
    /// Sender address
    pub from: Option<Address>,
    /// Primary recipients
    pub to: Vec<Address>,
    /// Carbon copy recipients
    pub cc: Vec<Address>,
    /// Blind carbon copy recipients
    pub bcc: Vec<Address>,
    /// Reply-to addresses
    pub reply_to: Vec<Address>,
    /// Email subject line
    pub subject: String,
    /// Plain text body
    pub text_body: Option<String>,
    /// HTML body
    pub html_body: Option<String>,
    /// File attachments
    pub attachments: Vec<Attachment>,
    /// Custom email headers. A `Message-ID` set here replaces the generated one.
    pub headers: HashMap<String, String>,
    /// Value of the `Date` header; the build time when unset.
    pub date: Option<DateTime<Utc>>,
}

impl Email {
    /// Create a new empty email.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the sender address.
    pub fn from(mut self, addr: impl ToAddress) -> Self {
        self.from = Some(addr.to_address());
        self
    }

    /// Add a recipient.
    pub fn to(mut self, addr: impl ToAddress) -> Self {
        self.to.push(addr.to_address());
        self
    }

    /// Replace all recipients.
    pub fn put_to(mut self, addrs: Vec<Address>) -> Self {
        self.to = addrs;
        self
    }

    /// Add a CC recipient.
    pub fn cc(mut self, addr: impl ToAddress) -> Self {
        self.cc.push(addr.to_address());
        self
    }

    /// Add a BCC recipient.
    pub fn bcc(mut self, addr: impl ToAddress) -> Self {
        self.bcc.push(addr.to_address());
        self
    }

    /// Add a reply-to address.
    pub fn reply_to(mut self, addr: impl ToAddress) -> Self {
        self.reply_to.push(addr.to_address());
        self
    }

    /// Set the subject line.
    pub fn subject(mut self, subject: impl Into<String>) -> Self {
        self.subject = subject.into();
        self
    }

    /// Set the plain text body.
    pub fn text_body(mut self, body: impl Into<String>) -> Self {
        self.text_body = Some(body.into());
        self
    }

    /// Set the HTML body.
    pub fn html_body(mut self, body: impl Into<String>) -> Self {
        self.html_body = Some(body.into());
        self
    }

    /// Add an attachment.
    pub fn attachment(mut self, attachment: Attachment) -> Self {
        self.attachments.push(attachment);
        self
    }

    /// Add a custom header.
    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name.into(), value.into());
        self
    }

    /// Set the `Date` header.
    pub fn date(mut self, date: DateTime<Utc>) -> Self {
        self.date = Some(date);
        self
    }

    /// Check if the email has all required fields for sending.
    pub fn is_valid(&self) -> bool {
        self.from.is_some() && !self.all_recipients().is_empty()
    }

    /// Get all recipients (to + cc + bcc).
    pub fn all_recipients(&self) -> Vec<&Address> {
        self.to
            .iter()
            .chain(self.cc.iter())
            .chain(self.bcc.iter())
            .collect()
    }

    /// The `Message-ID` the author set explicitly, if any.
    ///
    /// A blank value counts as unset.
    pub fn message_id(&self) -> Option<&str> {
        self.headers
            .iter()
            .find(|(name, _)| name.eq_ignore_ascii_case("message-id"))
            .map(|(_, value)| value.trim())
            .filter(|value| !value.is_empty())
    }

    /// Freeze into a transmittable message.
    ///
    /// Returns the message id together with the message. The id is the one
    /// set through [`Email::header`], or `<uuid@sender-domain>` when that is
    /// missing or blank.
    pub(crate) fn build(&self) -> Result<(String, Message), MailError> {
        let from = self.from.as_ref().ok_or(MailError::MissingField("from"))?;

        if self.all_recipients().is_empty() {
            return Err(MailError::MissingField("to"));
        }

        let message_id = match self.message_id() {
            Some(id) => id.to_string(),
            None => generate_message_id(from),
        };

        let date: SystemTime = self.date.map(Into::into).unwrap_or_else(SystemTime::now);

        let mut builder = Message::builder()
            .from(from.to_mailbox()?)
            .subject(&self.subject)
            .date(date)
            .message_id(Some(message_id.clone()));

        for to in &self.to {
            builder = builder.to(to.to_mailbox()?);
        }
        for cc in &self.cc {
            builder = builder.cc(cc.to_mailbox()?);
        }
        for bcc in &self.bcc {
            builder = builder.bcc(bcc.to_mailbox()?);
        }
        for reply_to in &self.reply_to {
            builder = builder.reply_to(reply_to.to_mailbox()?);
        }

        for (name, value) in &self.headers {
            if name.eq_ignore_ascii_case("message-id") {
                continue;
            }
            if RESERVED_HEADERS.contains(&name.to_ascii_lowercase().as_str()) {
                return Err(MailError::InvalidHeader(format!(
                    "'{}' is set through the dedicated field",
                    name
                )));
            }
            let header_name = HeaderName::new_from_ascii(name.clone())
                .map_err(|_| MailError::InvalidHeader(format!("'{}' is not a valid name", name)))?;
            builder = builder.raw_header(HeaderValue::new(header_name, value.clone()));
        }

        let message = if self.attachments.is_empty() {
            match (&self.html_body, &self.text_body) {
                (Some(html), Some(text)) => builder
                    .multipart(MultiPart::alternative_plain_html(text.clone(), html.clone()))?,
                (Some(html), None) => builder.header(ContentType::TEXT_HTML).body(html.clone())?,
                (None, Some(text)) => builder.header(ContentType::TEXT_PLAIN).body(text.clone())?,
                (None, None) => builder
                    .header(ContentType::TEXT_PLAIN)
                    .body(String::new())?,
            }
        } else {
            let body_part = match (&self.html_body, &self.text_body) {
                (Some(html), Some(text)) => {
                    MultiPart::alternative_plain_html(text.clone(), html.clone())
                }
                (Some(html), None) => MultiPart::mixed().singlepart(SinglePart::html(html.clone())),
                (None, _) => MultiPart::mixed().singlepart(
                    SinglePart::plain(self.text_body.clone().unwrap_or_default()),
                ),
            };

            let mut multipart = MultiPart::mixed().multipart(body_part);
            for attachment in &self.attachments {
                multipart = multipart.singlepart(attachment.to_part()?);
            }

            builder.multipart(multipart)?
        };

        Ok((message_id, message))
    }
}

fn generate_message_id(from: &Address) -> String {
    let domain = from
        .to_ascii()
        .ok()
        .and_then(|ascii| ascii.rsplit_once('@').map(|(_, d)| d.to_string()))
        .filter(|d| !d.is_empty())
        .unwrap_or_else(|| "localhost".to_string());
    format!("<{}@{}>", uuid::Uuid::new_v4(), domain)
}
