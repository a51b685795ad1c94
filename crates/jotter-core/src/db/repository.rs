//! Note repository implementation

use libsql::{params, Connection, Row};

use crate::error::{Error, Result};
use crate::models::{Attachment, NewNote, Note, NoteChanges, NoteId};
use crate::util::unix_millis_now;

const NOTE_COLUMNS: &str = "id, title, content, attachments, created_at, updated_at";

/// Trait for note storage operations
///
/// Each write is a single statement, so a note is either fully updated or
/// left untouched.
#[allow(async_fn_in_trait)]
pub trait NoteRepository {
    /// Create a new note
    async fn create(&self, note: NewNote) -> Result<Note>;

    /// Get a note by ID
    async fn get(&self, id: &NoteId) -> Result<Option<Note>>;

    /// List all notes, newest first
    async fn list(&self) -> Result<Vec<Note>>;

    /// Apply changes to a note; `Error::NotFound` when it does not exist
    async fn update(&self, id: &NoteId, changes: NoteChanges) -> Result<Note>;

    /// Hard delete a note, returning what was removed
    async fn delete(&self, id: &NoteId) -> Result<Option<Note>>;
}

/// libSQL implementation of `NoteRepository`
pub struct LibSqlNoteRepository<'a> {
    conn: &'a Connection,
}

impl<'a> LibSqlNoteRepository<'a> {
    /// Create a new repository with the given connection
    pub const fn new(conn: &'a Connection) -> Self {
        Self { conn }
    }

    async fn query_one(&self, sql: &str, id: &NoteId) -> Result<Option<Note>> {
        let mut rows = self.conn.query(sql, params![id.as_str()]).await?;
        match rows.next().await? {
            Some(row) => Ok(Some(parse_note(&row)?)),
            None => Ok(None),
        }
    }
}

impl NoteRepository for LibSqlNoteRepository<'_> {
    async fn create(&self, note: NewNote) -> Result<Note> {
        let now = unix_millis_now();
        let note = Note {
            id: NoteId::new(),
            title: note.title,
            content: note.content,
            attachments: note.attachments,
            created_at: now,
            updated_at: now,
        };

        self.conn
            .execute(
                "INSERT INTO notes (id, title, content, attachments, created_at, updated_at)
                 VALUES (?, ?, ?, ?, ?, ?)",
                params![
                    note.id.as_str(),
                    note.title.as_str(),
                    note.content.as_str(),
                    serde_json::to_string(&note.attachments)?,
                    note.created_at,
                    note.updated_at
                ],
            )
            .await?;

        Ok(note)
    }

    async fn get(&self, id: &NoteId) -> Result<Option<Note>> {
        self.query_one(&format!("SELECT {NOTE_COLUMNS} FROM notes WHERE id = ?"), id)
            .await
    }

    async fn list(&self) -> Result<Vec<Note>> {
        let mut rows = self
            .conn
            .query(
                &format!("SELECT {NOTE_COLUMNS} FROM notes ORDER BY created_at DESC, id DESC"),
                (),
            )
            .await?;

        let mut notes = Vec::new();
        while let Some(row) = rows.next().await? {
            notes.push(parse_note(&row)?);
        }
        Ok(notes)
    }

    async fn update(&self, id: &NoteId, changes: NoteChanges) -> Result<Note> {
        let mut note = self
            .get(id)
            .await?
            .ok_or_else(|| Error::NotFound(id.to_string()))?;
        changes.apply_to(&mut note);
        note.updated_at = unix_millis_now().max(note.updated_at);

        let rows = self
            .conn
            .execute(
                "UPDATE notes SET title = ?, content = ?, attachments = ?, updated_at = ?
                 WHERE id = ?",
                params![
                    note.title.as_str(),
                    note.content.as_str(),
                    serde_json::to_string(&note.attachments)?,
                    note.updated_at,
                    id.as_str()
                ],
            )
            .await?;

        if rows == 0 {
            return Err(Error::NotFound(id.to_string()));
        }

        Ok(note)
    }

    async fn delete(&self, id: &NoteId) -> Result<Option<Note>> {
        self.query_one(
            &format!("DELETE FROM notes WHERE id = ? RETURNING {NOTE_COLUMNS}"),
            id,
        )
        .await
    }
}

/// Parse a note from a database row
fn parse_note(row: &Row) -> Result<Note> {
    let id: String = row.get(0)?;
    let attachments: String = row.get(3)?;
    let attachments: Vec<Attachment> = serde_json::from_str(&attachments)?;

    Ok(Note {
        id: id
            .parse()
            .map_err(|_| Error::Database(format!("Invalid note id in database: {id}")))?,
        title: row.get(1)?,
        content: row.get(2)?,
        attachments,
        created_at: row.get(4)?,
        updated_at: row.get(5)?,
    })
}
