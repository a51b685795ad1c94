//! Multipart request parsing for note and image uploads.

use axum::body::Bytes;
use axum::extract::multipart::{Field, Multipart};
use jotter_core::util::sanitize;
use serde_json::Value;

use crate::error::AppError;

/// A file part received from the client.
#[derive(Debug, Clone)]
pub struct UploadedFile {
    pub file_name: String,
    pub content_type: Option<String>,
    pub bytes: Bytes,
}

/// Fields of a note create/update form.
#[derive(Debug, Default)]
pub struct NoteForm {
    pub title: Option<String>,
    pub content: Option<String>,
    pub pdfs: Vec<UploadedFile>,
    /// Titles aligned by index with `pdfs`.
    pub pdf_titles: Vec<String>,
    /// `None` when the client sent no `keepPdfs` part at all.
    pub keep_pdfs: Option<Vec<String>>,
    pub remove_pdfs: Vec<String>,
}

impl NoteForm {
    pub async fn read(multipart: &mut Multipart, max_pdfs: usize) -> Result<Self, AppError> {
        let mut form = Self::default();

        while let Some(field) = next_field(multipart).await? {
            let field_name = field.name().map(ToOwned::to_owned);
            match field_name.as_deref() {
                Some("title") => form.title = Some(read_text(field).await?),
                Some("content") => form.content = Some(read_text(field).await?),
                Some("pdfs") if field.file_name().is_some() => {
                    if form.pdfs.len() >= max_pdfs {
                        return Err(AppError::bad_request(format!(
                            "At most {max_pdfs} PDFs can be uploaded per request"
                        )));
                    }
                    form.pdfs.push(read_file(field).await?);
                }
                Some("pdfTitles") => form.pdf_titles.push(read_text(field).await?),
                Some("keepPdfs") => {
                    let urls = coerce_url_list(&read_text(field).await?)?;
                    form.keep_pdfs.get_or_insert_with(Vec::new).extend(urls);
                }
                Some("removePdfs") => {
                    let urls = coerce_url_list(&read_text(field).await?)?;
                    form.remove_pdfs.extend(urls);
                }
                other => {
                    tracing::debug!(field = other.unwrap_or("<unnamed>"), "Ignoring form field");
                }
            }
        }

        Ok(form)
    }

    /// Requested title for the `index`-th uploaded PDF.
    pub fn pdf_title(&self, index: usize) -> Option<&str> {
        self.pdf_titles.get(index).map(String::as_str)
    }
}

/// Read the single `image` file part of an inline image upload.
pub async fn read_image(multipart: &mut Multipart) -> Result<UploadedFile, AppError> {
    let mut image = None;
    while let Some(field) = next_field(multipart).await? {
        if field.name() == Some("image") && field.file_name().is_some() {
            image = Some(read_file(field).await?);
        }
    }

    let image = image.ok_or_else(|| AppError::bad_request("No file uploaded"))?;
    if let Some(content_type) = image.content_type.as_deref() {
        if !content_type.starts_with("image/") {
            return Err(AppError::bad_request("Only image uploads are accepted"));
        }
    }
    Ok(image)
}

/// Interpret a keep/remove form value as a list of URLs.
///
/// Accepts a JSON array whose entries are URL strings or objects with a
/// `url` field, a single JSON string or object, or a bare URL. Blank input
/// yields an empty list.
pub fn coerce_url_list(raw: &str) -> Result<Vec<String>, AppError> {
    let raw = raw.trim();
    if raw.is_empty() {
        return Ok(Vec::new());
    }
    if !raw.starts_with(['[', '{', '"']) {
        return Ok(vec![raw.to_string()]);
    }

    let value: Value = serde_json::from_str(raw).map_err(|error| {
        AppError::bad_request(format!("Malformed URL list: {}", sanitize(&error)))
    })?;
    let entries = match value {
        Value::Array(entries) => entries,
        other => vec![other],
    };

    let mut urls = Vec::with_capacity(entries.len());
    for entry in entries {
        if let Some(url) = url_from_entry(entry)? {
            urls.push(url);
        }
    }
    Ok(urls)
}

fn url_from_entry(entry: Value) -> Result<Option<String>, AppError> {
    let url = match entry {
        Value::Null => return Ok(None),
        Value::String(url) => url,
        Value::Object(mut object) => match object.remove("url") {
            Some(Value::String(url)) => url,
            _ => {
                return Err(AppError::bad_request(
                    "URL list objects must carry a string `url`",
                ))
            }
        },
        _ => {
            return Err(AppError::bad_request(
                "URL list entries must be strings or objects with a `url`",
            ))
        }
    };

    let url = url.trim();
    Ok((!url.is_empty()).then(|| url.to_string()))
}

async fn next_field(multipart: &mut Multipart) -> Result<Option<Field<'_>>, AppError> {
    multipart
        .next_field()
        .await
        .map_err(|error| AppError::bad_request(format!("Multipart error: {}", sanitize(&error))))
}

async fn read_text(field: Field<'_>) -> Result<String, AppError> {
    field
        .text()
        .await
        .map_err(|error| AppError::bad_request(format!("Read error: {}", sanitize(&error))))
}

async fn read_file(field: Field<'_>) -> Result<UploadedFile, AppError> {
    let file_name = field.file_name().unwrap_or_default().to_string();
    let content_type = field.content_type().map(ToOwned::to_owned);
    let bytes = field
        .bytes()
        .await
        .map_err(|error| AppError::bad_request(format!("Read error: {}", sanitize(&error))))?;
    if bytes.is_empty() {
        return Err(AppError::bad_request(format!(
            "Uploaded file `{file_name}` is empty"
        )));
    }

    Ok(UploadedFile {
        file_name,
        content_type,
        bytes,
    })
}
