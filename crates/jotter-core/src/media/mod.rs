//! URL convention for objects hosted in the remote media store.
//!
//! Every object this system uploads is published at
//! `{public_base_url}/{root}/{kind}/{name}`, where `root` is the configured
//! root folder (`notes` by default) and `kind` is `images` or `pdfs`. The
//! store-side identifier of an object is the path from the root folder to the
//! file name, with the file name cut at its first `.`:
//!
//! ```text
//! https://cdn.example.com/notes/pdfs/1700000000000-0190-syllabus   -> notes/pdfs/1700000000000-0190-syllabus
//! https://cdn.example.com/image/upload/v17/notes/images/abc.png    -> notes/images/abc
//! ```
//!
//! URLs that do not start with the public base URL, or have no segment equal
//! to the root folder, are not owned by this system.

use regex::Regex;

use crate::error::{Error, Result};
use crate::util::is_http_url;

/// Default root folder for uploaded media.
pub const DEFAULT_ROOT_FOLDER: &str = "notes";

const IMAGES_SUBFOLDER: &str = "images";
const PDFS_SUBFOLDER: &str = "pdfs";

/// Characters that terminate a URL inside markdown or inline HTML.
const URL_STOP_CHARS: &str = r#"\s"'<>()"#;

/// Maps public media URLs to store identifiers and recognizes embedded images.
#[derive(Debug, Clone)]
pub struct MediaUrlScheme {
    public_base_url: String,
    root_folder: String,
    image_pattern: Regex,
}

impl MediaUrlScheme {
    /// Build the convention for a public base URL and root folder.
    ///
    /// The base URL must be http(s); trailing slashes are dropped. The root
    /// folder must be a single non-empty path segment.
    pub fn new(public_base_url: &str, root_folder: &str) -> Result<Self> {
        let public_base_url = public_base_url.trim().trim_end_matches('/').to_string();
        if !is_http_url(&public_base_url) {
            return Err(Error::InvalidInput(
                "Media public base URL must start with http:// or https://".to_string(),
            ));
        }

        let root_folder = root_folder.trim().trim_matches('/').to_string();
        if root_folder.is_empty() || root_folder.contains('/') || root_folder == ".." {
            return Err(Error::InvalidInput(
                "Media root folder must be a single path segment".to_string(),
            ));
        }

        let pattern = format!(
            "{base}/(?:[^{stop}]+/)?{root}/{images}/[^{stop}]+",
            base = regex::escape(&public_base_url),
            stop = URL_STOP_CHARS,
            root = regex::escape(&root_folder),
            images = IMAGES_SUBFOLDER,
        );
        let image_pattern = Regex::new(&pattern)
            .map_err(|error| Error::InvalidInput(format!("Invalid media URL pattern: {error}")))?;

        Ok(Self {
            public_base_url,
            root_folder,
            image_pattern,
        })
    }

    pub fn public_base_url(&self) -> &str {
        &self.public_base_url
    }

    /// Folder that inline images are uploaded to.
    pub fn images_folder(&self) -> String {
        format!("{}/{IMAGES_SUBFOLDER}", self.root_folder)
    }

    /// Folder that PDF attachments are uploaded to.
    pub fn pdfs_folder(&self) -> String {
        format!("{}/{PDFS_SUBFOLDER}", self.root_folder)
    }

    /// Public URL of an object id.
    pub fn public_url(&self, object_id: &str) -> String {
        format!(
            "{}/{}",
            self.public_base_url,
            object_id.trim().trim_matches('/')
        )
    }

    /// Image URLs embedded in `text`, in order of appearance (duplicates kept).
    pub fn find_image_urls<'a>(&'a self, text: &'a str) -> impl Iterator<Item = &'a str> + 'a {
        self.image_pattern.find_iter(text).map(|found| found.as_str())
    }

    /// Resolve a public URL to the store identifier, or `None` when the URL
    /// is outside this convention.
    pub fn object_id(&self, url: &str) -> Option<String> {
        let rest = url.trim().strip_prefix(self.public_base_url.as_str())?;
        let rest = rest.strip_prefix('/')?;
        let path = rest.split(['?', '#']).next().unwrap_or_default();

        let segments: Vec<&str> = path.split('/').collect();
        let start = segments
            .iter()
            .position(|segment| *segment == self.root_folder)?;
        let (file_name, folders) = segments[start..].split_last()?;
        if folders.is_empty()
            || folders
                .iter()
                .any(|segment| segment.is_empty() || *segment == "..")
        {
            return None;
        }

        let stem = file_name.split('.').next().unwrap_or_default();
        if stem.is_empty() {
            return None;
        }

        Some(format!("{}/{stem}", folders.join("/")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scheme() -> MediaUrlScheme {
        MediaUrlScheme::new("https://cdn.example.com/", DEFAULT_ROOT_FOLDER).unwrap()
    }

    #[test]
    fn new_rejects_invalid_base_or_root() {
        assert!(MediaUrlScheme::new("cdn.example.com", "notes").is_err());
        assert!(MediaUrlScheme::new("https://cdn.example.com", "").is_err());
        assert!(MediaUrlScheme::new("https://cdn.example.com", "a/b").is_err());
    }

    #[test]
    fn folders_and_public_url() {
        let scheme = scheme();
        assert_eq!(scheme.public_base_url(), "https://cdn.example.com");
        assert_eq!(scheme.images_folder(), "notes/images");
        assert_eq!(scheme.pdfs_folder(), "notes/pdfs");
        assert_eq!(
            scheme.public_url("/notes/pdfs/abc"),
            "https://cdn.example.com/notes/pdfs/abc"
        );
    }

    #[test]
    fn object_id_round_trips_public_url() {
        let scheme = scheme();
        let url = scheme.public_url("notes/pdfs/1700000000000-0190-syllabus");
        assert_eq!(
            scheme.object_id(&url).as_deref(),
            Some("notes/pdfs/1700000000000-0190-syllabus")
        );
    }

    #[test]
    fn object_id_strips_version_prefix_extension_and_query() {
        let scheme = scheme();
        assert_eq!(
            scheme
                .object_id("https://cdn.example.com/image/upload/v17/notes/images/abc.png?w=200")
                .as_deref(),
            Some("notes/images/abc")
        );
        assert_eq!(
            scheme
                .object_id("https://cdn.example.com/notes/images/archive.tar.gz")
                .as_deref(),
            Some("notes/images/archive")
        );
    }

    #[test]
    fn object_id_rejects_foreign_urls() {
        let scheme = scheme();
        assert_eq!(scheme.object_id("https://elsewhere.com/notes/pdfs/a.pdf"), None);
        assert_eq!(scheme.object_id("https://cdn.example.com/other/pdfs/a.pdf"), None);
        assert_eq!(scheme.object_id("https://cdn.example.com/notes"), None);
        assert_eq!(scheme.object_id("https://cdn.example.com/notes/pdfs/.pdf"), None);
        assert_eq!(scheme.object_id("https://cdn.example.comevil/notes/pdfs/a"), None);
        assert_eq!(scheme.object_id(""), None);
    }

    #[test]
    fn find_image_urls_stops_at_markdown_delimiters() {
        let scheme = scheme();
        let text = "![a](https://cdn.example.com/notes/images/a.png) and \
                    <img src=\"https://cdn.example.com/v1/notes/images/b.jpg\"> \
                    plus ![c](https://cdn.example.com/notes/pdfs/c) \
                    and ![d](https://elsewhere.com/notes/images/d.png)";
        let found: Vec<&str> = scheme.find_image_urls(text).collect();
        assert_eq!(
            found,
            vec![
                "https://cdn.example.com/notes/images/a.png",
                "https://cdn.example.com/v1/notes/images/b.jpg",
            ]
        );
    }
}
