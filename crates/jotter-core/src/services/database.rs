//! Shared database service wrapper used by the API handlers.

use std::path::PathBuf;
use std::sync::Arc;

use tokio::sync::Mutex;

use crate::db::{Database, LibSqlNoteRepository, NoteRepository};
use crate::models::{NewNote, Note, NoteChanges};
use crate::{Error, NoteId, Result};

/// Thread-safe service for note repository operations.
///
/// Every call holds the connection for its duration. Read-modify-write
/// updates must go through [`DatabaseService::update_with`] to be atomic.
#[derive(Clone)]
pub struct DatabaseService {
    db: Arc<Mutex<Database>>,
}

impl DatabaseService {
    /// Open a database service at the given filesystem path.
    pub async fn open_path(db_path: impl Into<PathBuf>) -> Result<Self> {
        let db_path = db_path.into();
        tracing::info!("Opening note database at {}", db_path.display());
        let db = Database::open(&db_path).await?;
        Ok(Self {
            db: Arc::new(Mutex::new(db)),
        })
    }

    /// Open an in-memory database service (primarily for tests).
    pub async fn open_in_memory() -> Result<Self> {
        let db = Database::open_in_memory().await?;
        Ok(Self {
            db: Arc::new(Mutex::new(db)),
        })
    }

    /// List notes newest-first.
    pub async fn list_notes(&self) -> Result<Vec<Note>> {
        let db = self.db.lock().await;
        LibSqlNoteRepository::new(db.connection()).list().await
    }

    /// Fetch a note by id.
    pub async fn get_note(&self, id: &NoteId) -> Result<Option<Note>> {
        let db = self.db.lock().await;
        LibSqlNoteRepository::new(db.connection()).get(id).await
    }

    /// Create a new note.
    pub async fn create_note(&self, note: NewNote) -> Result<Note> {
        let db = self.db.lock().await;
        LibSqlNoteRepository::new(db.connection()).create(note).await
    }

    /// Plan and apply an update against the committed note in one critical
    /// section.
    ///
    /// `plan` receives the current note and returns the changes to write plus
    /// a value handed back to the caller. Concurrent updates of the same note
    /// therefore apply one after the other, each seeing the previous result.
    pub async fn update_with<T, F>(&self, id: &NoteId, plan: F) -> Result<(Note, T)>
    where
        F: FnOnce(&Note) -> Result<(NoteChanges, T)> + Send,
        T: Send,
    {
        let db = self.db.lock().await;
        let repo = LibSqlNoteRepository::new(db.connection());
        let current = repo
            .get(id)
            .await?
            .ok_or_else(|| Error::NotFound(id.to_string()))?;
        let (changes, planned) = plan(&current)?;
        let note = repo.update(id, changes).await?;
        Ok((note, planned))
    }

    /// Delete a note, returning the removed record.
    pub async fn delete_note(&self, id: &NoteId) -> Result<Option<Note>> {
        let db = self.db.lock().await;
        LibSqlNoteRepository::new(db.connection()).delete(id).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Attachment;

    #[tokio::test(flavor = "multi_thread")]
    async fn in_memory_create_and_list_roundtrip() {
        let service = DatabaseService::open_in_memory().await.unwrap();

        let created = service
            .create_note(NewNote::new("hello", "hello core", Vec::new()).unwrap())
            .await
            .unwrap();
        let notes = service.list_notes().await.unwrap();
        assert_eq!(notes.len(), 1);
        assert_eq!(notes[0].content, "hello core");

        let removed = service.delete_note(&created.id).await.unwrap();
        assert_eq!(removed.map(|note| note.id), Some(created.id));
        assert!(service.get_note(&created.id).await.unwrap().is_none());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn concurrent_update_with_calls_see_each_others_writes() {
        let service = DatabaseService::open_in_memory().await.unwrap();
        let original = Attachment::new("https://m/notes/pdfs/p", "p");
        let created = service
            .create_note(NewNote::new("shared", "body", vec![original]).unwrap())
            .await
            .unwrap();

        let append = |name: &'static str| {
            let service = service.clone();
            let id = created.id;
            tokio::spawn(async move {
                service
                    .update_with(&id, |current| {
                        let mut attachments =
                            vec![Attachment::new(format!("https://m/notes/pdfs/{name}"), name)];
                        attachments.extend(current.attachments.iter().cloned());
                        Ok((NoteChanges::default().with_attachments(attachments), ()))
                    })
                    .await
            })
        };
        let (first, second) = tokio::join!(append("a"), append("b"));
        first.unwrap().unwrap();
        second.unwrap().unwrap();

        let stored = service.get_note(&created.id).await.unwrap().unwrap();
        let mut titles: Vec<&str> = stored
            .attachments
            .iter()
            .map(|attachment| attachment.title.as_str())
            .collect();
        titles.sort_unstable();
        assert_eq!(titles, vec!["a", "b", "p"]);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn update_with_reports_missing_note_without_planning() {
        let service = DatabaseService::open_in_memory().await.unwrap();
        let result = service
            .update_with(&NoteId::new(), |_| -> Result<(NoteChanges, ())> {
                panic!("plan must not run for a missing note")
            })
            .await;
        assert!(matches!(result, Err(Error::NotFound(_))));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn open_path_persists_between_handles() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("jotter.db");

        let id = {
            let service = DatabaseService::open_path(&path).await.unwrap();
            service
                .create_note(NewNote::new("kept", "on disk", Vec::new()).unwrap())
                .await
                .unwrap()
                .id
        };

        let reopened = DatabaseService::open_path(&path).await.unwrap();
        assert!(reopened.get_note(&id).await.unwrap().is_some());
    }
}
