//! Attachment model

use serde::{Deserialize, Serialize};

/// A PDF attachment hosted in the remote object store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Attachment {
    /// Public URL of the hosted object; the identity of the attachment.
    pub url: String,
    /// Display title, may be empty.
    #[serde(default)]
    pub title: String,
}

impl Attachment {
    pub fn new(url: impl Into<String>, title: impl Into<String>) -> Self {
        Self {
            url: url.into().trim().to_string(),
            title: title.into().trim().to_string(),
        }
    }

    /// Attachment for a freshly uploaded file.
    ///
    /// Uses `requested_title` when it is non-blank, otherwise the uploaded
    /// file name with a trailing `.pdf` (any case) removed.
    pub fn from_upload(
        url: impl Into<String>,
        requested_title: Option<&str>,
        file_name: &str,
    ) -> Self {
        let title = requested_title
            .map(str::trim)
            .filter(|title| !title.is_empty())
            .map_or_else(|| title_from_file_name(file_name), ToOwned::to_owned);
        Self::new(url, title)
    }
}

fn title_from_file_name(file_name: &str) -> String {
    let name = file_name.trim();
    let stem = match name.len().checked_sub(4) {
        Some(cut) if name.is_char_boundary(cut) && name[cut..].eq_ignore_ascii_case(".pdf") => {
            &name[..cut]
        }
        _ => name,
    };
    stem.to_string()
}
