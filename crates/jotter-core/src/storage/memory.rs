//! In-process object store for tests and local development.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use async_trait::async_trait;

use super::{DeleteOutcome, RemoteObjectStore, StoredObject, UploadRequest};
use crate::media::MediaUrlScheme;
use crate::util::sanitize_token;
use crate::{Error, Result};

#[derive(Default)]
struct MemoryState {
    objects: BTreeMap<String, Vec<u8>>,
    delete_calls: Vec<String>,
    failing_deletes: BTreeSet<String>,
    fail_uploads: bool,
}

/// Keeps objects in memory and records every delete call.
#[derive(Clone)]
pub struct MemoryObjectStore {
    scheme: MediaUrlScheme,
    state: Arc<Mutex<MemoryState>>,
    next_id: Arc<AtomicU64>,
}

impl MemoryObjectStore {
    pub fn new(scheme: MediaUrlScheme) -> Self {
        Self {
            scheme,
            state: Arc::new(Mutex::new(MemoryState::default())),
            next_id: Arc::new(AtomicU64::new(1)),
        }
    }

    /// Place an object directly, as if uploaded earlier. Returns its public URL.
    pub fn insert(&self, object_id: &str, bytes: &[u8]) -> String {
        self.lock()
            .objects
            .insert(object_id.to_string(), bytes.to_vec());
        self.scheme.public_url(object_id)
    }

    pub fn contains(&self, object_id: &str) -> bool {
        self.lock().objects.contains_key(object_id)
    }

    pub fn object_ids(&self) -> Vec<String> {
        self.lock().objects.keys().cloned().collect()
    }

    /// Every object id passed to `delete`, in call order.
    pub fn delete_calls(&self) -> Vec<String> {
        self.lock().delete_calls.clone()
    }

    /// Make deletes of `object_id` fail with a storage error.
    pub fn fail_deletes_of(&self, object_id: &str) {
        self.lock().failing_deletes.insert(object_id.to_string());
    }

    /// Make every subsequent upload fail with a storage error.
    pub fn fail_uploads(&self, fail: bool) {
        self.lock().fail_uploads = fail;
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, MemoryState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[async_trait]
impl RemoteObjectStore for MemoryObjectStore {
    async fn upload(&self, request: UploadRequest<'_>) -> Result<StoredObject> {
        let mut state = self.lock();
        if state.fail_uploads {
            return Err(Error::Storage(format!(
                "upload of {} rejected",
                request.file_name
            )));
        }

        let sequence = self.next_id.fetch_add(1, Ordering::Relaxed);
        let stem = sanitize_token(request.file_name);
        let object_id = format!(
            "{}/{sequence}-{}",
            request.folder.trim_matches('/'),
            if stem.is_empty() { "file" } else { stem.as_str() }
        );
        state
            .objects
            .insert(object_id.clone(), request.bytes.to_vec());

        Ok(StoredObject {
            url: self.scheme.public_url(&object_id),
            object_id,
        })
    }

    async fn delete(&self, object_id: &str) -> Result<DeleteOutcome> {
        let mut state = self.lock();
        state.delete_calls.push(object_id.to_string());
        if state.failing_deletes.contains(object_id) {
            return Err(Error::Storage(format!("delete of {object_id} timed out")));
        }
        Ok(match state.objects.remove(object_id) {
            Some(_) => DeleteOutcome::Deleted,
            None => DeleteOutcome::NotFound,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::media::DEFAULT_ROOT_FOLDER;

    fn store() -> MemoryObjectStore {
        MemoryObjectStore::new(
            MediaUrlScheme::new("https://cdn.example.com", DEFAULT_ROOT_FOLDER).unwrap(),
        )
    }

    #[tokio::test]
    async fn upload_publishes_url_owned_by_scheme() {
        let store = store();
        let scheme = MediaUrlScheme::new("https://cdn.example.com", DEFAULT_ROOT_FOLDER).unwrap();

        let stored = store
            .upload(UploadRequest {
                bytes: b"%PDF",
                folder: "notes/pdfs",
                file_name: "week1.pdf",
                content_type: Some("application/pdf"),
            })
            .await
            .unwrap();

        assert_eq!(stored.object_id, "notes/pdfs/1-week1-pdf");
        assert_eq!(scheme.object_id(&stored.url), Some(stored.object_id.clone()));
        assert!(store.contains(&stored.object_id));
    }

    #[tokio::test]
    async fn delete_reports_missing_objects_as_not_found() {
        let store = store();
        store.insert("notes/pdfs/a", b"a");

        assert_eq!(store.delete("notes/pdfs/a").await.unwrap(), DeleteOutcome::Deleted);
        assert_eq!(store.delete("notes/pdfs/a").await.unwrap(), DeleteOutcome::NotFound);
        assert_eq!(store.delete_calls(), vec!["notes/pdfs/a", "notes/pdfs/a"]);
    }

    #[tokio::test]
    async fn configured_failures_surface_as_storage_errors() {
        let store = store();
        store.fail_deletes_of("notes/pdfs/a");
        store.fail_uploads(true);

        assert!(matches!(
            store.delete("notes/pdfs/a").await,
            Err(Error::Storage(_))
        ));
        let upload = store
            .upload(UploadRequest {
                bytes: b"x",
                folder: "notes/pdfs",
                file_name: "x.pdf",
                content_type: None,
            })
            .await;
        assert!(matches!(upload, Err(Error::Storage(_))));
    }
}
