//! Email attachments with support for inline and regular attachments.

use lettre::message::{header::ContentType, Attachment as LettreAttachment, SinglePart};
use std::path::Path;

use crate::error::MailError;

/// Type of attachment disposition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AttachmentType {
    /// Regular attachment (shown as downloadable file)
    #[default]
    Attachment,
    /// Inline attachment (embedded in HTML via cid:)
    Inline,
}

/// An email attachment.
///
/// Attachments can be created from bytes (eager) or from a file path (lazy).
/// Lazy attachments are read while the message is built, which still happens
/// on the caller's thread before anything is queued, so a missing file is a
/// construction failure.
///
/// ```
/// use courier::Attachment;
///
/// let report = Attachment::from_bytes("report.pdf", b"%PDF".to_vec());
/// assert_eq!(report.content_type, "application/pdf");
///
/// let logo = Attachment::from_bytes("logo.png", vec![0x89, 0x50])
///     .inline()
///     .content_id("company-logo");
/// assert!(logo.is_inline());
/// ```
#[derive(Debug, Clone)]
pub struct Attachment {
    /// Filename for the attachment
    pub filename: String,
    /// MIME content type (e.g., "application/pdf", "image/png")
    pub content_type: String,
    /// Raw attachment data (empty if using path-based lazy loading)
    pub data: Vec<u8>,
    /// File path for lazy loading.
    pub path: Option<String>,
    /// Whether this is an inline or regular attachment
    pub disposition: AttachmentType,
    /// Content-ID for inline attachments (used as cid: reference)
    pub content_id: Option<String>,
}

impl Attachment {
    /// Create a new attachment from raw bytes.
    ///
    /// Content type is guessed from the filename extension.
    pub fn from_bytes(filename: impl Into<String>, data: Vec<u8>) -> Self {
        let filename = filename.into();
        let content_type = mime_guess::from_path(&filename)
            .first_or_octet_stream()
            .to_string();

        Self {
            filename,
            content_type,
            data,
            path: None,
            disposition: AttachmentType::Attachment,
            content_id: None,
        }
    }

    /// Create a new attachment from a file path, reading it immediately.
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self, MailError> {
        let path = path.as_ref();
        let data = read_file(path)?;
        Ok(Self {
            data,
            ..Self::describe(path)
        })
    }

    /// Create a new attachment from a file path, deferring the read until the
    /// message is built.
    pub fn from_path_lazy(path: impl AsRef<Path>) -> Result<Self, MailError> {
        let path = path.as_ref();
        if !path.exists() {
            return Err(MailError::AttachmentFileNotFound(path.display().to_string()));
        }

        Ok(Self {
            path: Some(path.to_string_lossy().to_string()),
            ..Self::describe(path)
        })
    }

    fn describe(path: &Path) -> Self {
        let filename = path
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or("attachment")
            .to_string();

        let content_type = mime_guess::from_path(path)
            .first_or_octet_stream()
            .to_string();

        Self {
            filename,
            content_type,
            data: Vec::new(),
            path: None,
            disposition: AttachmentType::Attachment,
            content_id: None,
        }
    }

    /// Set the content type explicitly.
    pub fn content_type(mut self, content_type: impl Into<String>) -> Self {
        self.content_type = content_type.into();
        self
    }

    /// Set as inline attachment (for embedding in HTML).
    pub fn inline(mut self) -> Self {
        self.disposition = AttachmentType::Inline;
        if self.content_id.is_none() {
            self.content_id = Some(self.filename.clone());
        }
        self
    }

    /// Set the Content-ID for inline attachments.
    ///
    /// Reference it from HTML as `<img src="cid:your-id">`.
    pub fn content_id(mut self, cid: impl Into<String>) -> Self {
        self.content_id = Some(cid.into());
        self
    }

    /// Get the attachment data, loading from path if necessary.
    pub fn get_data(&self) -> Result<Vec<u8>, MailError> {
        if let Some(ref path) = self.path {
            read_file(Path::new(path))
        } else if self.data.is_empty() {
            Err(MailError::AttachmentMissingContent(self.filename.clone()))
        } else {
            Ok(self.data.clone())
        }
    }

    /// Check if this is a path-based (lazy) attachment.
    pub fn is_lazy(&self) -> bool {
        self.path.is_some()
    }

    /// Check if this is an inline attachment.
    pub fn is_inline(&self) -> bool {
        self.disposition == AttachmentType::Inline
    }

    /// Build the MIME part for this attachment.
    pub(crate) fn to_part(&self) -> Result<SinglePart, MailError> {
        let content_type = ContentType::parse(&self.content_type).map_err(|_| {
            MailError::AttachmentError(format!(
                "invalid content type '{}' for {}",
                self.content_type, self.filename
            ))
        })?;
        let data = self.get_data()?;

        let part = match self.disposition {
            AttachmentType::Inline => {
                let cid = self.content_id.as_ref().unwrap_or(&self.filename);
                LettreAttachment::new_inline(cid.clone()).body(data, content_type)
            }
            AttachmentType::Attachment => {
                LettreAttachment::new(self.filename.clone()).body(data, content_type)
            }
        };
        Ok(part)
    }
}

fn read_file(path: &Path) -> Result<Vec<u8>, MailError> {
    std::fs::read(path).map_err(|e| {
        if e.kind() == std::io::ErrorKind::NotFound {
            MailError::AttachmentFileNotFound(path.display().to_string())
        } else {
            MailError::AttachmentReadError(format!("{}: {}", path.display(), e))
        }
    })
}
