//! Note model

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use super::attachment::Attachment;
use crate::error::{Error, Result};

/// A unique identifier for a note, using UUID v7 (time-sortable)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct NoteId(Uuid);

impl NoteId {
    /// Create a new unique note ID using UUID v7
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }

    /// Get the string representation of this ID
    #[must_use]
    pub fn as_str(&self) -> String {
        self.0.to_string()
    }
}

impl Default for NoteId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for NoteId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for NoteId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        Ok(Self(Uuid::parse_str(s.trim())?))
    }
}

/// A markdown note with its hosted PDF attachments
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Note {
    pub id: NoteId,
    pub title: String,
    /// Markdown body; may embed images hosted in the remote object store
    pub content: String,
    /// PDF attachments, URLs unique within the list
    pub attachments: Vec<Attachment>,
    /// Creation timestamp (Unix ms)
    pub created_at: i64,
    /// Last update timestamp (Unix ms)
    pub updated_at: i64,
}

impl Note {
    /// URLs of the PDF attachments, in stored order.
    pub fn attachment_urls(&self) -> impl Iterator<Item = &str> {
        self.attachments.iter().map(|attachment| attachment.url.as_str())
    }
}

/// Fields for a note that has not been persisted yet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewNote {
    pub title: String,
    pub content: String,
    pub attachments: Vec<Attachment>,
}

impl NewNote {
    /// Validate and normalize a new note.
    ///
    /// Title and content are trimmed and both must be non-empty.
    pub fn new(
        title: impl Into<String>,
        content: impl Into<String>,
        attachments: Vec<Attachment>,
    ) -> Result<Self> {
        let title = normalize_title(title.into())?;
        let content = content.into().trim().to_string();
        if content.is_empty() {
            return Err(Error::InvalidInput(
                "Content is required and must be a string".to_string(),
            ));
        }

        Ok(Self {
            title,
            content,
            attachments,
        })
    }
}

/// A partial update; `None` leaves the stored field untouched.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NoteChanges {
    pub title: Option<String>,
    pub content: Option<String>,
    pub attachments: Option<Vec<Attachment>>,
}

impl NoteChanges {
    /// Replace the title; rejected when blank.
    pub fn with_title(mut self, title: impl Into<String>) -> Result<Self> {
        self.title = Some(normalize_title(title.into())?);
        Ok(self)
    }

    #[must_use]
    pub fn with_content(mut self, content: impl Into<String>) -> Self {
        self.content = Some(content.into());
        self
    }

    #[must_use]
    pub fn with_attachments(mut self, attachments: Vec<Attachment>) -> Self {
        self.attachments = Some(attachments);
        self
    }

    /// Apply these changes on top of an existing note.
    pub(crate) fn apply_to(self, note: &mut Note) {
        if let Some(title) = self.title {
            note.title = title;
        }
        if let Some(content) = self.content {
            note.content = content;
        }
        if let Some(attachments) = self.attachments {
            note.attachments = attachments;
        }
    }
}

fn normalize_title(title: String) -> Result<String> {
    let title = title.trim();
    if title.is_empty() {
        return Err(Error::InvalidInput(
            "Title is required and must be a string".to_string(),
        ));
    }
    Ok(title.to_string())
}
