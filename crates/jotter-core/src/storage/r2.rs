//! Cloudflare R2 (S3-compatible) object store.

use std::fmt;

use async_trait::async_trait;
use aws_credential_types::Credentials;
use aws_sdk_s3::{primitives::ByteStream, Client};
use aws_types::region::Region;
use uuid::Uuid;

use super::{DeleteOutcome, RemoteObjectStore, StoredObject, UploadRequest};
use crate::media::MediaUrlScheme;
use crate::util::{sanitize, sanitize_token, unix_millis_now};
use crate::{Error, Result};

/// Cloudflare R2 credentials and bucket.
#[derive(Clone, PartialEq, Eq)]
pub struct R2Config {
    /// Cloudflare account identifier.
    pub account_id: String,
    /// R2 bucket name.
    pub bucket: String,
    /// Access key id for S3-compatible auth.
    pub access_key_id: String,
    /// Secret access key for S3-compatible auth.
    pub secret_access_key: String,
}

impl R2Config {
    /// Cloudflare R2 S3-compatible endpoint URL.
    #[must_use]
    pub fn endpoint_url(&self) -> String {
        format!("https://{}.r2.cloudflarestorage.com", self.account_id)
    }
}

impl fmt::Debug for R2Config {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter
            .debug_struct("R2Config")
            .field("account_id", &self.account_id)
            .field("bucket", &self.bucket)
            .field("access_key_id", &self.access_key_id)
            .field("secret_access_key", &"[REDACTED]")
            .finish()
    }
}

/// R2-backed [`RemoteObjectStore`].
///
/// Object keys carry no file extension so that the published URL maps back to
/// the key through [`MediaUrlScheme::object_id`]; the content type is stored on
/// the object instead.
#[derive(Clone)]
pub struct R2Storage {
    bucket: String,
    scheme: MediaUrlScheme,
    client: Client,
}

impl R2Storage {
    pub fn new(config: R2Config, scheme: MediaUrlScheme) -> Self {
        let client = build_s3_client(&config);
        Self {
            bucket: config.bucket,
            scheme,
            client,
        }
    }

    /// Check that the configured bucket is reachable with current credentials.
    pub async fn bucket_is_reachable(&self) -> Result<()> {
        self.client
            .head_bucket()
            .bucket(&self.bucket)
            .send()
            .await
            .map_err(|error| storage_error("head_bucket", &self.bucket, None, error))?;
        Ok(())
    }
}

#[async_trait]
impl RemoteObjectStore for R2Storage {
    async fn upload(&self, request: UploadRequest<'_>) -> Result<StoredObject> {
        let object_key = build_object_key(request.folder, request.file_name)?;

        let mut put = self
            .client
            .put_object()
            .bucket(&self.bucket)
            .key(&object_key)
            .body(ByteStream::from(request.bytes.to_vec()));
        if let Some(content_type) = normalize_content_type(request.content_type) {
            put = put.content_type(content_type);
        }

        put.send()
            .await
            .map_err(|error| storage_error("put_object", &self.bucket, Some(&object_key), error))?;

        tracing::debug!(
            object_key = %object_key,
            size_bytes = request.bytes.len(),
            "Uploaded object to R2"
        );

        Ok(StoredObject {
            url: self.scheme.public_url(&object_key),
            object_id: object_key,
        })
    }

    async fn delete(&self, object_id: &str) -> Result<DeleteOutcome> {
        let object_key = normalize_object_key(object_id)?;

        match self
            .client
            .delete_object()
            .bucket(&self.bucket)
            .key(&object_key)
            .send()
            .await
        {
            Ok(_) => Ok(DeleteOutcome::Deleted),
            Err(error)
                if error
                    .raw_response()
                    .is_some_and(|response| response.status().as_u16() == 404) =>
            {
                Ok(DeleteOutcome::NotFound)
            }
            Err(error) => Err(storage_error(
                "delete_object",
                &self.bucket,
                Some(&object_key),
                error,
            )),
        }
    }
}

fn build_s3_client(config: &R2Config) -> Client {
    let credentials = Credentials::new(
        config.access_key_id.clone(),
        config.secret_access_key.clone(),
        None,
        None,
        "jotter-r2-storage",
    );

    let sdk_config = aws_sdk_s3::config::Builder::new()
        .region(Region::new("auto"))
        .credentials_provider(credentials)
        .endpoint_url(config.endpoint_url())
        .force_path_style(true)
        .build();

    Client::from_conf(sdk_config)
}

fn storage_error(
    operation: &str,
    bucket: &str,
    object_key: Option<&str>,
    error: impl fmt::Display,
) -> Error {
    let target = object_key.map_or_else(|| bucket.to_string(), |key| format!("{bucket}/{key}"));
    Error::Storage(format!(
        "R2 {operation} failed for {target}: {}",
        sanitize(&error)
    ))
}

/// `{folder}/{unix_ms}-{uuid v7}-{file stem}` with every part sanitized.
fn build_object_key(folder: &str, file_name: &str) -> Result<String> {
    let folder = normalize_object_key(folder)?;
    let stem = file_name
        .trim()
        .rsplit_once('.')
        .map_or(file_name.trim(), |(stem, _)| stem);
    let stem = sanitize_token(stem);
    let stem = if stem.is_empty() { "file".to_string() } else { stem };

    Ok(format!(
        "{folder}/{}-{}-{stem}",
        unix_millis_now(),
        Uuid::now_v7()
    ))
}

fn normalize_object_key(object_key: &str) -> Result<String> {
    let object_key = object_key.trim().trim_matches('/').to_string();
    if object_key.is_empty() {
        return Err(Error::InvalidInput("object key cannot be empty".to_string()));
    }
    if object_key.split('/').any(|segment| segment == "..") {
        return Err(Error::InvalidInput(
            "object key must not contain path traversal segments".to_string(),
        ));
    }
    Ok(object_key)
}

fn normalize_content_type(content_type: Option<&str>) -> Option<String> {
    content_type
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .map(ToOwned::to_owned)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::media::DEFAULT_ROOT_FOLDER;

    fn config() -> R2Config {
        R2Config {
            account_id: "account-1".to_string(),
            bucket: "bucket-a".to_string(),
            access_key_id: "AKID123".to_string(),
            secret_access_key: "SECRET123".to_string(),
        }
    }

    #[test]
    fn endpoint_url_uses_account_id() {
        assert_eq!(
            config().endpoint_url(),
            "https://account-1.r2.cloudflarestorage.com"
        );
    }

    #[test]
    fn debug_redacts_secret() {
        let output = format!("{:?}", config());
        assert!(!output.contains("SECRET123"));
        assert!(output.contains("[REDACTED]"));
    }

    #[test]
    fn object_key_is_extensionless_and_round_trips_through_scheme() {
        let scheme = MediaUrlScheme::new("https://cdn.example.com", DEFAULT_ROOT_FOLDER).unwrap();
        let key = build_object_key(&scheme.pdfs_folder(), "My Syllabus (v2).PDF").unwrap();

        assert!(key.starts_with("notes/pdfs/"));
        assert!(key.ends_with("-my-syllabus-v2"));
        assert!(!key.contains('.'));
        assert_eq!(scheme.object_id(&scheme.public_url(&key)), Some(key));
    }

    #[test]
    fn object_key_falls_back_to_generic_stem() {
        let key = build_object_key("notes/images", "   .png").unwrap();
        assert!(key.ends_with("-file"));
    }

    #[test]
    fn normalize_object_key_rejects_empty_or_parent_segments() {
        assert!(normalize_object_key(" ").is_err());
        assert!(normalize_object_key("notes/../secrets").is_err());
        assert_eq!(
            normalize_object_key("/notes/pdfs/a/").unwrap(),
            "notes/pdfs/a"
        );
    }

    #[test]
    fn normalize_content_type_ignores_empty_values() {
        assert_eq!(normalize_content_type(None), None);
        assert_eq!(normalize_content_type(Some("   ")), None);
        assert_eq!(
            normalize_content_type(Some(" application/pdf ")),
            Some("application/pdf".to_string())
        );
    }

    #[tokio::test(flavor = "multi_thread")]
    #[ignore = "Requires R2_* and R2_PUBLIC_BASE_URL env vars plus network access"]
    async fn r2_upload_then_delete_roundtrip() {
        let _ = dotenvy::dotenv();
        let var = |name: &str| std::env::var(name).unwrap_or_else(|_| panic!("{name} must be set"));

        let scheme =
            MediaUrlScheme::new(&var("R2_PUBLIC_BASE_URL"), DEFAULT_ROOT_FOLDER).unwrap();
        let storage = R2Storage::new(
            R2Config {
                account_id: var("R2_ACCOUNT_ID"),
                bucket: var("R2_BUCKET"),
                access_key_id: var("R2_ACCESS_KEY_ID"),
                secret_access_key: var("R2_SECRET_ACCESS_KEY"),
            },
            scheme.clone(),
        );
        storage.bucket_is_reachable().await.unwrap();

        let stored = storage
            .upload(UploadRequest {
                bytes: b"r2-roundtrip-test",
                folder: &scheme.pdfs_folder(),
                file_name: "roundtrip.pdf",
                content_type: Some("application/pdf"),
            })
            .await
            .unwrap();
        assert_eq!(scheme.object_id(&stored.url), Some(stored.object_id.clone()));

        let outcome = storage.delete(&stored.object_id).await.unwrap();
        assert_eq!(outcome, DeleteOutcome::Deleted);
    }
}
